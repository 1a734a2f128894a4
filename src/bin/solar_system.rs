//! Outer-solar-system demo: a symplectic Euler integrator compiled from
//! the Hamiltonian `Σ p²/2m − G·Σ mᵢmⱼ/|qᵢ−qⱼ|` over the six outer
//! bodies (data from "Geometric Numerical Integration", p. 13ff), with a
//! While-driven iteration countdown. The graph is canonicalized and
//! emitted as a standalone cargo package.

use anyhow::{Context, Result, bail};
use tensorlace::{Emitter, Graph, NodeRef, Output, Ring, Tensor, VectorSpace, While};

const DIMENSIONS: u32 = 3;
const GRAVITATIONAL_CONSTANT: f32 = 2.95912208286e-4;

struct ObjectData {
    name: &'static str,
    /// In solar masses.
    mass: f32,
    initial_position: [f32; 3],
    initial_velocity: [f32; 3],
}

static OBJECTS: [ObjectData; 6] = [
    ObjectData {
        name: "Sun",
        mass: 1.000_005_97,
        initial_position: [0.0, 0.0, 0.0],
        initial_velocity: [0.0, 0.0, 0.0],
    },
    ObjectData {
        name: "Jupiter",
        mass: 0.000_954_786_1,
        initial_position: [-3.502_365_3, -3.816_984_7, -1.550_796_3],
        initial_velocity: [0.005_654_29, -0.004_124_9, -0.001_905_89],
    },
    ObjectData {
        name: "Saturn",
        mass: 0.000_285_583_73,
        initial_position: [9.075_531_4, -3.045_835_3, -1.648_370_8],
        initial_velocity: [0.001_683_18, 0.004_835_25, 0.001_924_62],
    },
    ObjectData {
        name: "Uranus",
        mass: 0.000_043_727_316,
        initial_position: [8.310_142, -16.290_108, -7.252_128],
        initial_velocity: [0.003_541_78, 0.001_371_02, 0.000_550_29],
    },
    ObjectData {
        name: "Neptune",
        mass: 0.000_051_775_914,
        initial_position: [11.470_767, -25.729_483, -10.816_946],
        initial_velocity: [0.002_889_3, 0.001_145_27, 0.000_396_77],
    },
    ObjectData {
        name: "Pluto",
        mass: 1.0 / 1.3e8,
        initial_position: [-15.538_736, -25.222_559, -3.190_238_2],
        initial_velocity: [0.002_767_25, -0.001_707_02, -0.001_365_04],
    },
];

fn binomial_coefficient(n: u32, k: u32) -> u32 {
    if k > n {
        return 0;
    }
    let factorial = |mut n: u32| -> u32 {
        let mut acc = 1;
        while n > 1 {
            acc *= n;
            n -= 1;
        }
        acc
    };
    factorial(n) / (factorial(k) * factorial(n - k))
}

/// A matrix generating the vector of unique coordinate differences
/// `(q₁₁ − q₂₁, q₁₂ − q₂₂, …)` when applied to the position state:
///
/// ```text
/// 1 0 0 -1  0 ...
/// 0 1 0  0 -1 ...
/// ```
fn difference_generator_matrix(graph: &Graph, objects: u32, object_dim: u32) -> Result<Tensor> {
    let rows = object_dim * binomial_coefficient(objects, 2);
    let columns = objects * object_dim;

    let mut value = vec![0.0f32; (rows * columns) as usize];
    let mut row = 0;
    for object1 in 0..objects {
        for object2 in object1 + 1..objects {
            for dim in 0..object_dim {
                value[(row * columns + object1 * object_dim + dim) as usize] = 1.0;
                value[(row * columns + object2 * object_dim + dim) as usize] = -1.0;
                row += 1;
            }
        }
    }

    let space = VectorSpace::from_dims(Ring::Float32, &[rows, columns]);
    Ok(space.element(graph, value)?)
}

/// A matrix summing every `sum_dimensions` consecutive vector elements:
///
/// ```text
/// 1 1 1 0 0 0 ...
/// 0 0 0 1 1 1 ...
/// ```
fn partial_vector_sum_matrix(graph: &Graph, vector_size: u32, sum_dimensions: u32) -> Result<Tensor> {
    if vector_size % sum_dimensions != 0 {
        bail!("vector size {vector_size} is not divisible by {sum_dimensions}");
    }
    let rows = vector_size / sum_dimensions;
    let columns = vector_size;

    let mut value = vec![0.0f32; (rows * columns) as usize];
    for row in 0..rows {
        for sum in 0..sum_dimensions {
            let column = sum_dimensions * row + sum;
            value[(row * columns + column) as usize] = 1.0;
        }
    }

    let space = VectorSpace::from_dims(Ring::Float32, &[rows, columns]);
    Ok(space.element(graph, value)?)
}

/// The vector `(m₁·m₂, m₁·m₃, …)` that turns `(1/|q₁−q₂|, …)` into
/// `Σ_{i<j} mᵢmⱼ / |qᵢ−qⱼ|`.
fn mass_weighted_sum_vector(graph: &Graph) -> Result<Tensor> {
    let len = binomial_coefficient(OBJECTS.len() as u32, 2);
    let mut value = Vec::with_capacity(len as usize);
    for (i, object1) in OBJECTS.iter().enumerate() {
        for object2 in &OBJECTS[i + 1..] {
            value.push(object1.mass * object2.mass);
        }
    }
    let space = VectorSpace::new(Ring::Float32, len);
    Ok(space.element(graph, value)?)
}

fn build_graph(iterations: i32) -> Result<Graph> {
    let graph = Graph::new("SolarSystem");
    let objects = OBJECTS.len() as u32;
    let state_dim = 2 * DIMENSIONS * objects;

    // Initial state: positions first, then momenta.
    let mut initial_state = vec![0.0f32; state_dim as usize];
    for (object, data) in OBJECTS.iter().enumerate() {
        for dim in 0..DIMENSIONS as usize {
            initial_state[DIMENSIONS as usize * object + dim] = data.initial_position[dim];
            initial_state[(DIMENSIONS * objects) as usize + DIMENSIONS as usize * object + dim] =
                data.initial_velocity[dim] * data.mass;
        }
    }

    let phase_space = VectorSpace::new(Ring::Float32, state_dim);
    let state = phase_space.element(&graph, initial_state)?;

    // Kinetic energy T = Σ pᵢ² / 2mᵢ.
    let momentum = state.project1((DIMENSIONS * objects, state_dim))?;
    let mut diag_masses = vec![0.0f32; (DIMENSIONS * objects) as usize];
    for (object, data) in OBJECTS.iter().enumerate() {
        for dim in 0..DIMENSIONS as usize {
            diag_masses[DIMENSIONS as usize * object + dim] = 1.0 / (2.0 * data.mass);
        }
    }
    let mass_diag = momentum.space().homomorphism_with(
        &graph,
        diag_masses,
        &[tensorlace::Property::Diagonal],
    )?;
    let momentum_div_mass = momentum.contract1(&mass_diag, 0, 0)?;
    let kinetic_energy = momentum_div_mass.contract_full(&momentum)?;

    // Potential energy V = G · Σ_{i<j} mᵢmⱼ / |qᵢ−qⱼ|.
    let diff_matrix = difference_generator_matrix(&graph, objects, DIMENSIONS)?;
    let position = state.project1((0, DIMENSIONS * objects))?;
    let q_diffs = diff_matrix.contract1(&position, 1, 0)?;
    let q_diffs_squared = q_diffs.power_by(2.0f32)?;
    let partial_sum = partial_vector_sum_matrix(
        &graph,
        q_diffs_squared.space().total_dim(),
        DIMENSIONS,
    )?;
    let q_diffs_summed = partial_sum.contract1(&q_diffs_squared, 1, 0)?;
    let q_norms = q_diffs_summed.power_by(0.5f32)?;
    let q_norms_inverse = q_norms.power_by(-1.0f32)?;
    let mass_vector = mass_weighted_sum_vector(&graph)?;
    let v_missing_g = mass_vector.contract_full(&q_norms_inverse)?;
    let potential_energy = v_missing_g.multiply_by(GRAVITATIONAL_CONSTANT)?;

    let hamiltonian = kinetic_energy.subtract(&potential_energy)?;

    // Hamiltonian vector field X_H = J · dH and one Euler step.
    let symplectic = phase_space.symplectic_form(&graph)?;
    let dh = hamiltonian.derivative(&state)?;
    let x_h = symplectic.contract1(&dh, 1, 0)?;
    let time_increment = x_h.space().scalar(&graph, 1.0f32)?;
    let step = x_h.multiply(&time_increment)?;
    let new_state = state.add(&step)?;
    new_state.store_in(&state)?;

    let output = Output::new(&graph, "NewState")?;
    output.set(&new_state)?;

    // Iteration countdown driving the While loop.
    let iteration_vs = VectorSpace::new(Ring::Int32, 1);
    let sim_iterations = iteration_vs.scalar(&graph, iterations)?;
    let minus_one = iteration_vs.scalar(&graph, -1i32)?;
    let countdown = sim_iterations.add(&minus_one)?;
    countdown.store_in(&sim_iterations)?;

    let mut while_node = While::new(&graph);
    let parents: Vec<&dyn NodeRef> = vec![&output];
    while_node.set(&countdown, &parents, Some(&output as &dyn NodeRef), None)?;

    Ok(graph)
}

fn print_help() {
    println!();
    println!("-h\t\t Help: prints this help");
    println!("-i\t %u\t Iterations: [optional] number of integration steps (default 10000)");
    println!("-p\t %s\t Path: [optional] output directory for the generated package");
    println!();
}

struct CmdLineArgs {
    iterations: i32,
    path: String,
}

fn parse_args() -> Result<CmdLineArgs> {
    let mut parsed = CmdLineArgs { iterations: 10_000, path: "generated/solar-system".into() };
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" => {
                print_help();
                std::process::exit(0);
            }
            "-i" => {
                let value = args.next().context("missing parameter for -i")?;
                parsed.iterations = value
                    .parse()
                    .with_context(|| format!("cannot convert {value:?} to a number"))?;
                if parsed.iterations <= 0 {
                    bail!("{} is not a valid iteration count", parsed.iterations);
                }
            }
            "-p" => {
                parsed.path = args.next().context("missing parameter for -p")?;
            }
            other => {
                print_help();
                bail!("unknown option: {other}");
            }
        }
    }
    Ok(parsed)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = parse_args()?;
    let graph = build_graph(args.iterations)?;

    #[cfg(feature = "metrics")]
    let mut metrics = tensorlace::metrics::CompileMetrics::new(&graph);

    let stats = graph.canonicalize();
    #[cfg(feature = "metrics")]
    metrics.record_reduction(stats);
    #[cfg(not(feature = "metrics"))]
    let _ = stats;

    let report = Emitter::new(&args.path).emit(&graph)?;
    let bodies: Vec<&str> = OBJECTS.iter().map(|o| o.name).collect();
    println!(
        "emitted {} kernels for {} into {}",
        report.kernels_emitted,
        bodies.join(", "),
        args.path
    );

    #[cfg(feature = "metrics")]
    {
        metrics.record_emission(report);
        metrics.print();
    }

    Ok(())
}
