use crate::{
    analysis::MemorySsa,
    graph::RWGraph,
};

/// Runs both passes over `graph` and hands back the analysis for queries.
pub fn run_analysis(graph: RWGraph) -> MemorySsa {
    let mut ssa = MemorySsa::new(graph);
    ssa.run();
    ssa
}
