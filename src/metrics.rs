//! Metrics collection and reporting for graph compilation.
//!
//! The collector aggregates what a compilation run did — graph size,
//! duplicate-reduction results, emission counts — and can print a
//! summary or save it as JSON for tooling.
//!
//! # Example
//!
//! ```no_run
//! use tensorlace::metrics::CompileMetrics;
//! use tensorlace::{Emitter, Graph, Ring, VectorSpace};
//! # fn main() -> anyhow::Result<()> {
//! let graph = Graph::new("Example");
//! let vs = VectorSpace::new(Ring::Float32, 3);
//! let v = vs.element(&graph, vec![1.0f32, 2.0, 3.0])?;
//! let _sum = v.add(&v)?;
//!
//! let mut metrics = CompileMetrics::new(&graph);
//! metrics.record_reduction(graph.canonicalize());
//! metrics.record_emission(Emitter::new("out").emit(&graph)?);
//! metrics.print();
//! metrics.save_to_file("compile_metrics.json")?;
//! # Ok(())
//! # }
//! ```

use crate::emitter::EmitReport;
use crate::graph::{Graph, ReductionStats};
use serde::Serialize;
use std::io;
use std::path::Path;

/// Aggregated statistics for one compilation run.
#[derive(Debug, Clone, Serialize)]
pub struct CompileMetrics {
    pub graph_name: String,
    pub nodes_before_reduction: usize,
    pub reduction_rounds: Option<usize>,
    pub nodes_removed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emission: Option<EmitReport>,
}

impl CompileMetrics {
    /// Snapshot the graph size before any reduction.
    #[must_use]
    pub fn new(graph: &Graph) -> Self {
        CompileMetrics {
            graph_name: graph.name(),
            nodes_before_reduction: graph.len(),
            reduction_rounds: None,
            nodes_removed: None,
            emission: None,
        }
    }

    /// Record the result of a [`Graph::canonicalize`] pass.
    pub fn record_reduction(&mut self, stats: ReductionStats) {
        self.reduction_rounds = Some(stats.rounds);
        self.nodes_removed = Some(stats.nodes_removed);
    }

    /// Record what the emitter produced.
    pub fn record_emission(&mut self, report: EmitReport) {
        self.emission = Some(report);
    }

    /// Print a human-readable summary to stdout.
    pub fn print(&self) {
        println!("graph {}: {} nodes", self.graph_name, self.nodes_before_reduction);
        if let (Some(rounds), Some(removed)) = (self.reduction_rounds, self.nodes_removed) {
            println!("  reduction: {removed} duplicates removed in {rounds} rounds");
        }
        if let Some(emission) = &self.emission {
            println!(
                "  emitted {} kernels ({} initial jobs) into {}",
                emission.kernels_emitted,
                emission.initial_jobs,
                emission.package_dir.display()
            );
        }
    }

    /// Export as pretty JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Write the JSON report to a file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let json = self.to_json().map_err(io::Error::other)?;
        std::fs::write(path, json)
    }
}
