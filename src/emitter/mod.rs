//! The code emitter: walks a frozen graph and writes a standalone cargo
//! package that executes it.
//!
//! # Emitted package
//!
//! For a graph named `G` the emitter writes into its output directory:
//!
//! - `Cargo.toml` — package manifest (name derived from the graph name).
//! - `src/lib.rs` — module glue, re-exporting the interface.
//! - `src/interface.rs` — per-Output callback types and `register_*`
//!   functions, per-Input filler registration, and `run(threads_nrof)`
//!   which fatally aborts when an output callback is missing.
//! - `src/kernels.rs` — buffer statics, one kernel function per
//!   executable node, the static nodes table and the initial job pool.
//! - `src/runtime.rs` — a verbatim copy of this crate's execution
//!   engine; identical across graphs.
//!
//! # Contracts
//!
//! - **Variable materialization**: constants become read-only statics;
//!   operation results, inputs, and constants written through storage
//!   relations become writable [`Slab`](crate::runtime::Slab) statics. A
//!   node with a `stored_in` relation writes the storage target's buffer
//!   instead of owning one.
//! - **Nodes table**: one entry per executable node, ascending by id;
//!   parent/child entries are table positions restricted to executable
//!   nodes, While entries get no children, and any node with more than
//!   [`MAX_EDGES`] executable edges fails with `EdgeCapExceeded` before
//!   a single file is written.
//! - **Initial job pool**: the children of parentless nodes whose
//!   parents are all parentless — the first batch can be pushed without
//!   anyone blocking on a non-root parent.

mod kernels;
mod writer;

use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::node::{Node, NodeKind, Payload};
use crate::node_id::NodeId;
use crate::ring::{Literal, Ring};
use crate::runtime::{JOB_POOL_CAP, MAX_EDGES};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use tracing::info;
use writer::SourceWriter;

/// A materialized process-lifetime buffer.
pub(crate) struct Var {
    pub ident: String,
    pub ring: Ring,
    pub len: usize,
    pub init: Option<Literal>,
    pub writable: bool,
}

/// Everything the per-node generators need, precomputed once.
pub(crate) struct EmitCtx {
    pub nodes: BTreeMap<NodeId, Node>,
    /// Executable nodes ascending by id; index = table position.
    pub exec: Vec<NodeId>,
    pub pos: BTreeMap<NodeId, u16>,
    /// Buffer owners (storage-root nodes) to their variables.
    pub vars: BTreeMap<NodeId, Var>,
    storage: BTreeMap<NodeId, NodeId>,
}

impl EmitCtx {
    /// The node owning `id`'s buffer, following `stored_in` relations.
    pub(crate) fn storage_owner(&self, id: NodeId) -> Result<NodeId> {
        self.storage
            .get(&id)
            .copied()
            .ok_or_else(|| Error::EmitterIo { detail: format!("node {id} owns no buffer") })
    }
}

/// What an emission produced; serializable for the metrics report.
#[derive(Debug, Clone, Serialize)]
pub struct EmitReport {
    pub package_dir: PathBuf,
    pub package_name: String,
    pub files: Vec<PathBuf>,
    pub nodes_total: usize,
    pub kernels_emitted: usize,
    pub initial_jobs: usize,
}

/// Emits a frozen graph as a cargo package.
pub struct Emitter {
    out_dir: PathBuf,
}

impl Emitter {
    #[must_use]
    pub fn new(out_dir: impl Into<PathBuf>) -> Emitter {
        Emitter { out_dir: out_dir.into() }
    }

    /// Generate the package. The graph should be canonicalized first;
    /// emission does not mutate it.
    pub fn emit(&self, graph: &Graph) -> Result<EmitReport> {
        let nodes = graph.snapshot();
        if nodes.is_empty() {
            return Err(Error::EmitterIo { detail: "the graph is empty".into() });
        }

        let ctx = build_ctx(nodes)?;
        let initial = initial_job_pool(&ctx)?;

        // Generate kernel bodies; each node is independent.
        let kernel_sources: Vec<String> = ctx
            .exec
            .par_iter()
            .map(|&id| kernels::kernel_source(&ctx, id))
            .collect::<Result<Vec<_>>>()?;

        let outputs = collect_outputs(&ctx)?;
        let inputs = collect_inputs(&ctx)?;

        let package_name = kebab_ident(&graph.name());
        let kernels_rs = render_kernels_file(&ctx, &graph.name(), &kernel_sources, &initial)?;
        let interface_rs = render_interface_file(&outputs, &inputs);
        let lib_rs = render_lib_file(&package_name);
        let cargo_toml = render_manifest(&package_name);
        let runtime_rs = include_str!("../runtime.rs");

        let src = self.out_dir.join("src");
        std::fs::create_dir_all(&src)?;

        let mut files = Vec::new();
        for (path, content) in [
            (self.out_dir.join("Cargo.toml"), cargo_toml),
            (src.join("lib.rs"), lib_rs),
            (src.join("interface.rs"), interface_rs),
            (src.join("kernels.rs"), kernels_rs),
            (src.join("runtime.rs"), runtime_rs.to_string()),
        ] {
            std::fs::write(&path, content)?;
            files.push(path);
        }

        info!(
            package = %package_name,
            dir = %self.out_dir.display(),
            kernels = ctx.exec.len(),
            "emitted package"
        );

        Ok(EmitReport {
            package_dir: self.out_dir.clone(),
            package_name,
            nodes_total: ctx.nodes.len(),
            kernels_emitted: ctx.exec.len(),
            initial_jobs: initial.len(),
            files,
        })
    }
}

fn build_ctx(nodes: BTreeMap<NodeId, Node>) -> Result<EmitCtx> {
    // Storage roots: follow stored_in chains, with a step bound against
    // accidental cycles.
    let mut storage = BTreeMap::new();
    for (&id, node) in &nodes {
        if node.payload.space().is_none() {
            continue;
        }
        let mut owner = id;
        let mut steps = nodes.len();
        while let Some(next) = nodes.get(&owner).and_then(|n| n.stored_in) {
            if steps == 0 {
                return Err(Error::EmitterIo {
                    detail: format!("storage relation cycle reaching node {id}"),
                });
            }
            steps -= 1;
            owner = next;
        }
        storage.insert(id, owner);
    }

    // Variables for every buffer owner.
    let mut vars = BTreeMap::new();
    for (&id, node) in &nodes {
        if node.stored_in.is_some() || node.kind == NodeKind::VectorKroneckerDeltaProduct {
            continue;
        }
        let (space, init) = match &node.payload {
            Payload::Tensor { space, value } => (space, value.clone()),
            Payload::Input { space, default, .. } => {
                let len = space.total_dim() as usize;
                let splat = match space.ring() {
                    Ring::Float32 => Literal::F32(vec![default.0; len]),
                    Ring::Int32 => Literal::I32(vec![default.0 as i32; len]),
                    Ring::None => {
                        return Err(Error::EmitterIo { detail: format!("node {id} has no ring") });
                    }
                };
                (space, Some(splat))
            }
            _ => continue,
        };
        let writable = init.is_none()
            || node.kind == NodeKind::Input
            || !node.used_as_storage_by.is_empty();
        vars.insert(
            id,
            Var {
                ident: format!("NODE{}", id.raw()),
                ring: space.ring(),
                len: space.total_dim() as usize,
                init,
                writable,
            },
        );
    }

    // Executable nodes in id order; the table position is the index.
    let exec: Vec<NodeId> = nodes
        .iter()
        .filter(|(_, n)| n.kind.is_executable())
        .map(|(&id, _)| id)
        .collect();
    if exec.is_empty() {
        return Err(Error::EmitterIo { detail: "the graph has no executable nodes".into() });
    }
    let mut pos = BTreeMap::new();
    for (i, &id) in exec.iter().enumerate() {
        if id.raw() > u32::from(u16::MAX) || i > usize::from(u16::MAX) {
            return Err(Error::EmitterIo { detail: format!("node {id} exceeds the table range") });
        }
        pos.insert(id, i as u16);
    }

    // Edge caps, counted over executable edges only.
    for &id in &exec {
        let node = &nodes[&id];
        let parents = node.parents.iter().filter(|p| pos.contains_key(p)).count();
        let children = if node.kind == NodeKind::ControlTransferWhile {
            0
        } else {
            node.children.iter().filter(|c| pos.contains_key(c)).count()
        };
        if parents > MAX_EDGES || children > MAX_EDGES {
            return Err(Error::EdgeCapExceeded { node: id.raw(), edges: parents.max(children) });
        }
    }

    Ok(EmitCtx { nodes, exec, pos, vars, storage })
}

/// Root executable nodes' children whose parents are all roots: the
/// first batch that can be pushed without anyone blocking on a parent
/// that is itself waiting.
fn initial_job_pool(ctx: &EmitCtx) -> Result<Vec<u16>> {
    let mut roots = BTreeSet::new();
    let mut first: BTreeSet<NodeId> = BTreeSet::new();
    for (&id, node) in &ctx.nodes {
        if node.parents.is_empty() {
            roots.insert(id);
            first.extend(node.children.iter().copied());
        }
    }
    first.retain(|id| {
        ctx.nodes[id]
            .parents
            .iter()
            .all(|p| roots.contains(p))
    });

    if first.is_empty() {
        return Err(Error::EmitterIo {
            detail: "no initially runnable nodes; the graph cannot start".into(),
        });
    }
    if first.len() > JOB_POOL_CAP {
        return Err(Error::EdgeCapExceeded { node: 0, edges: first.len() });
    }

    first
        .iter()
        .map(|id| {
            ctx.pos.get(id).copied().ok_or_else(|| Error::EmitterIo {
                detail: format!("initial job {id} is not an executable node"),
            })
        })
        .collect()
}

/// Table positions a taken While branch pushes: the executable-root
/// ancestors of the branch target's cone united with the While's own
/// cone (condition and declared parents). Re-running those roots
/// cascades through their children and re-executes the region; pushing
/// the target alone would leave its parents behind and stall the loop.
pub(crate) fn while_branch_pushes(
    ctx: &EmitCtx,
    while_id: NodeId,
    target: NodeId,
) -> Result<Vec<u16>> {
    let mut roots = BTreeSet::new();
    let mut stack = vec![target, while_id];
    let mut seen = BTreeSet::new();
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        let node = ctx.nodes.get(&id).ok_or_else(|| Error::EmitterIo {
            detail: format!("while branch references unknown node {id}"),
        })?;
        let exec_parents: Vec<NodeId> = node
            .parents
            .iter()
            .copied()
            .filter(|p| ctx.pos.contains_key(p))
            .collect();
        if exec_parents.is_empty() {
            if id != while_id && ctx.pos.contains_key(&id) {
                roots.insert(ctx.pos[&id]);
            }
        } else {
            stack.extend(exec_parents);
        }
    }
    if roots.is_empty() {
        return Err(Error::EmitterIo {
            detail: format!("while node {while_id} re-enters a region with no runnable roots"),
        });
    }
    Ok(roots.into_iter().collect())
}

struct OutputSlot {
    name: String,
    ring: Ring,
}

struct InputSlot {
    name: String,
    ring: Ring,
}

fn collect_outputs(ctx: &EmitCtx) -> Result<Vec<OutputSlot>> {
    let mut slots: Vec<OutputSlot> = Vec::new();
    for node in ctx.nodes.values() {
        let Payload::Output { name } = &node.payload else {
            continue;
        };
        check_ident(name)?;
        if node.parents.is_empty() {
            return Err(Error::EmitterIo {
                detail: format!("output {name} has no bound tensor"),
            });
        }
        let ring = ctx
            .nodes
            .get(&ctx.storage_owner(node.parents[0])?)
            .and_then(|n| n.payload.space())
            .map(crate::space::VectorSpace::ring)
            .ok_or_else(|| Error::EmitterIo {
                detail: format!("output {name} is bound to a non-tensor node"),
            })?;
        if slots.iter().any(|s| s.name == *name) {
            return Err(Error::EmitterIo { detail: format!("duplicate output name {name}") });
        }
        slots.push(OutputSlot { name: name.clone(), ring });
    }
    Ok(slots)
}

fn collect_inputs(ctx: &EmitCtx) -> Result<Vec<InputSlot>> {
    let mut slots: Vec<InputSlot> = Vec::new();
    for node in ctx.nodes.values() {
        let Payload::Input { name, space, .. } = &node.payload else {
            continue;
        };
        check_ident(name)?;
        let ring = space.ring();
        match slots.iter().find(|s| s.name == *name) {
            Some(slot) if slot.ring != ring => {
                return Err(Error::EmitterIo {
                    detail: format!("input {name} is used with conflicting rings"),
                });
            }
            Some(_) => {}
            None => slots.push(InputSlot { name: name.clone(), ring }),
        }
    }
    Ok(slots)
}

fn check_ident(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if ok {
        Ok(())
    } else {
        Err(Error::EmitterIo { detail: format!("{name:?} is not a usable interface name") })
    }
}

fn render_kernels_file(
    ctx: &EmitCtx,
    graph_name: &str,
    kernel_sources: &[String],
    initial: &[u16],
) -> Result<String> {
    let mut w = SourceWriter::new();
    w.line("//! Generated by tensorlace. Buffers, kernels, the nodes table and");
    w.line(format!("//! the initial job pool for graph `{graph_name}`."));
    w.line("#![allow(unused_imports, unused_variables, clippy::all)]");
    w.blank();
    w.line("use crate::runtime::{NodeRecord, PushCtx, Slab};");
    w.blank();

    // Buffer statics, ascending by owner id.
    for var in ctx.vars.values() {
        w.line(render_static(var));
    }
    w.blank();

    for source in kernel_sources {
        for line in source.lines() {
            w.line(line);
        }
        w.blank();
    }

    // The nodes table: parent/child entries are table positions.
    w.open(format!(
        "pub(crate) static NODES: [NodeRecord; {}] = [",
        ctx.exec.len()
    ));
    for &id in &ctx.exec {
        let node = &ctx.nodes[&id];
        let parents: Vec<String> = node
            .parents
            .iter()
            .filter_map(|p| ctx.pos.get(p))
            .map(|p| p.to_string())
            .collect();
        let children: Vec<String> = if node.kind == NodeKind::ControlTransferWhile {
            Vec::new()
        } else {
            node.children
                .iter()
                .filter_map(|c| ctx.pos.get(c))
                .map(|c| c.to_string())
                .collect()
        };
        w.line(format!(
            "NodeRecord::new(node{}_kernel, &[{}], &[{}], {}),",
            id.raw(),
            parents.join(", "),
            children.join(", "),
            id.raw()
        ));
    }
    w.close("];");
    w.blank();

    let init: Vec<String> = initial.iter().map(|p| p.to_string()).collect();
    w.line(format!(
        "pub(crate) static INITIAL_JOBS: [u16; {}] = [{}];",
        initial.len(),
        init.join(", ")
    ));

    Ok(w.finish())
}

fn render_static(var: &Var) -> String {
    let ty = var.ring.type_name();
    let body = |lit: &Literal| -> String {
        match lit {
            Literal::F32(v) => v.iter().map(|x| format!("{x:?}")).collect::<Vec<_>>().join(", "),
            Literal::I32(v) => v.iter().map(i32::to_string).collect::<Vec<_>>().join(", "),
        }
    };
    match (&var.init, var.writable) {
        (Some(init), false) => {
            format!("static {}: [{ty}; {}] = [{}];", var.ident, var.len, body(init))
        }
        (Some(init), true) => format!(
            "static {}: Slab<{ty}, {}> = Slab::new([{}]);",
            var.ident,
            var.len,
            body(init)
        ),
        (None, _) => {
            let zero = if var.ring == Ring::Float32 { "0.0" } else { "0" };
            format!(
                "static {}: Slab<{ty}, {}> = Slab::new([{zero}; {}]);",
                var.ident, var.len, var.len
            )
        }
    }
}

fn render_interface_file(outputs: &[OutputSlot], inputs: &[InputSlot]) -> String {
    let mut w = SourceWriter::new();
    w.line("//! Generated by tensorlace. Callback registration and the run entry point.");
    w.blank();
    w.line("use std::sync::OnceLock;");
    w.blank();

    for out in outputs {
        let snake = snake_ident(&out.name);
        let shouty = shouty_ident(&out.name);
        let camel = camel_ident(&out.name);
        let ty = out.ring.type_name();
        w.line(format!(
            "/// Invoked with the `{snake}` buffer once per activation, from the"
        ));
        w.line("/// finishing worker thread.");
        w.line(format!("pub type {camel}Callback = fn(&[{ty}]);"));
        w.blank();
        w.line(format!(
            "pub(crate) static {shouty}: OnceLock<{camel}Callback> = OnceLock::new();"
        ));
        w.blank();
        w.open(format!("pub fn register_{snake}(callback: {camel}Callback) {{"));
        w.open(format!("if {shouty}.set(callback).is_err() {{"));
        w.line(format!("eprintln!(\"output callback {snake} registered twice\");"));
        w.line("std::process::exit(1);");
        w.close("}");
        w.close("}");
        w.blank();
    }

    for input in inputs {
        let snake = snake_ident(&input.name);
        let shouty = shouty_ident(&input.name);
        let camel = camel_ident(&input.name);
        let ty = input.ring.type_name();
        w.line(format!(
            "/// Fills the `{snake}` buffer before each use; when absent, the"
        ));
        w.line("/// declared default value is kept.");
        w.line(format!("pub type {camel}Fill = fn(&mut [{ty}]);"));
        w.blank();
        w.line(format!(
            "pub(crate) static {shouty}_FILL: OnceLock<{camel}Fill> = OnceLock::new();"
        ));
        w.blank();
        w.open(format!("pub fn register_{snake}_input(callback: {camel}Fill) {{"));
        w.open(format!("if {shouty}_FILL.set(callback).is_err() {{"));
        w.line(format!("eprintln!(\"input callback {snake} registered twice\");"));
        w.line("std::process::exit(1);");
        w.close("}");
        w.close("}");
        w.blank();
    }

    w.line("/// Check callbacks, start the workers, join them.");
    w.open("pub fn run(threads_nrof: usize) -> i32 {");
    for out in outputs {
        let snake = snake_ident(&out.name);
        let shouty = shouty_ident(&out.name);
        w.open(format!("if {shouty}.get().is_none() {{"));
        w.line(format!("eprintln!(\"output callback {snake} is not registered\");"));
        w.line("std::process::exit(1);");
        w.close("}");
    }
    w.line("crate::runtime::run(&crate::kernels::NODES, &crate::kernels::INITIAL_JOBS, threads_nrof);");
    w.line("0");
    w.close("}");
    w.finish()
}

fn render_lib_file(package_name: &str) -> String {
    let mut w = SourceWriter::new();
    w.line(format!(
        "//! Generated by tensorlace — the `{package_name}` computation package."
    ));
    w.blank();
    w.line("pub mod runtime;");
    w.blank();
    w.line("mod interface;");
    w.line("mod kernels;");
    w.blank();
    w.line("pub use interface::*;");
    w.finish()
}

fn render_manifest(package_name: &str) -> String {
    let mut w = SourceWriter::new();
    w.line("[package]");
    w.line(format!("name = \"{package_name}\""));
    w.line("version = \"0.1.0\"");
    w.line("edition = \"2024\"");
    w.blank();
    w.line("[features]");
    w.line("rt-sched = [\"dep:libc\"]");
    w.blank();
    w.line("[dependencies]");
    w.line("libc = { version = \"0.2\", optional = true }");
    w.finish()
}

/// `NewState` → `new_state`
pub(crate) fn snake_ident(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for ch in name.chars() {
        if ch.is_ascii_uppercase() && !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
        out.push(ch.to_ascii_lowercase());
    }
    out
}

/// `NewState` → `NEW_STATE`
pub(crate) fn shouty_ident(name: &str) -> String {
    snake_ident(name).to_ascii_uppercase()
}

/// `new_state` → `NewState`
pub(crate) fn camel_ident(name: &str) -> String {
    snake_ident(name)
        .split('_')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// `SolarSystem` → `solar-system`
fn kebab_ident(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    snake_ident(&cleaned).replace('_', "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_conversions() {
        assert_eq!(snake_ident("NewState"), "new_state");
        assert_eq!(snake_ident("matrixProd1"), "matrix_prod1");
        assert_eq!(shouty_ident("NewState"), "NEW_STATE");
        assert_eq!(camel_ident("new_state"), "NewState");
        assert_eq!(kebab_ident("SolarSystem"), "solar-system");
    }

    #[test]
    fn identifier_check_rejects_spaces() {
        assert!(check_ident("NewState").is_ok());
        assert!(check_ident("new state").is_err());
        assert!(check_ident("").is_err());
        assert!(check_ident("1state").is_err());
    }
}
