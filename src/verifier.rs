use std::fmt::{
    Display,
    Formatter,
};

use crate::{
    graph::{
        RWBlockId,
        RWGraph,
        RWNodeId,
    },
    Offset,
};

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum VerifyError {
    /// A strong update with an offset the analysis cannot place.
    UnknownOffsetOverwrite(RWNodeId),
    /// A strong update targeting the unknown-memory sentinel.
    UnknownMemoryOverwrite(RWNodeId),
    /// A def-site naming zero bytes.
    EmptyRange(RWNodeId),
    /// The unknown-memory sentinel was placed in a block or given
    /// def-sites of its own.
    SentinelTampered(RWNodeId),
    /// A block holding nodes that no control-flow edge connects.
    IsolatedBlock(RWBlockId),
}

impl Display for VerifyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownOffsetOverwrite(node) => {
                write!(f, "{node} strongly updates an unknown offset")
            }
            Self::UnknownMemoryOverwrite(node) => {
                write!(f, "{node} strongly updates unknown memory")
            }
            Self::EmptyRange(node) => write!(f, "{node} carries a zero-length def-site"),
            Self::SentinelTampered(node) => {
                write!(f, "the unknown-memory sentinel {node} was modified by the frontend")
            }
            Self::IsolatedBlock(block) => {
                write!(f, "{block} holds nodes but no edge connects it")
            }
        }
    }
}

/// Checks a frontend-built read-write graph against the contract the
/// analysis asserts at runtime. Run it before the analysis: everything
/// reported here would abort the passes later.
#[derive(Debug, Clone)]
pub struct Verifier<'g> {
    graph: &'g RWGraph,
}

impl<'g> Verifier<'g> {
    pub fn new(graph: &'g RWGraph) -> Self {
        Self { graph }
    }

    pub fn verify(self) -> Vec<VerifyError> {
        let mut errors = vec![];
        let unknown = self.graph.unknown_memory();
        for (id, node) in self.graph.nodes() {
            if id == unknown {
                let untouched = node.block().is_none()
                    && node.overwrites.is_empty()
                    && node.defs.is_empty()
                    && node.uses.is_empty();
                if !untouched {
                    errors.push(VerifyError::SentinelTampered(id));
                }
                continue;
            }
            for ds in &node.overwrites {
                if ds.offset.is_unknown() {
                    errors.push(VerifyError::UnknownOffsetOverwrite(id));
                }
                if ds.target == unknown {
                    errors.push(VerifyError::UnknownMemoryOverwrite(id));
                }
            }
            for ds in node
                .overwrites
                .iter()
                .chain(node.defs.iter())
                .chain(node.uses.iter())
            {
                if ds.length == Offset::ZERO {
                    errors.push(VerifyError::EmptyRange(id));
                }
            }
        }
        // A lone entry block carries no edges; disconnection only means
        // something once there is a second block to connect to.
        if self.graph.block_ids().nth(1).is_some() {
            for (id, block) in self.graph.blocks() {
                if block.nodes().is_empty() {
                    continue;
                }
                let connected = self.graph.predecessors(id).next().is_some()
                    || self.graph.successors(id).next().is_some();
                if !connected {
                    errors.push(VerifyError::IsolatedBlock(id));
                }
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        graph::{
            DefSite,
            GraphBuilder,
            RWGraph,
        },
        Offset,
    };

    use super::*;

    #[test]
    fn should_accept_a_well_formed_graph() {
        let mut graph = RWGraph::new();
        let mut b = GraphBuilder::new(&mut graph);
        b.start_block();
        let t = b.memory_object();
        b.overwrite(t, 0, 4);
        b.def_unknown();
        b.use_(t, 0, 4);
        assert_eq!(Verifier::new(&graph).verify(), vec![]);
    }

    #[test]
    fn should_report_strong_updates_on_unknown_offsets() {
        let mut graph = RWGraph::new();
        let mut b = GraphBuilder::new(&mut graph);
        b.start_block();
        let t = b.memory_object();
        let n = b.overwrite(t, 0, 4);
        graph.add_overwrite(n, DefSite::new(t, Offset::UNKNOWN, Offset(4)));
        assert_eq!(
            Verifier::new(&graph).verify(),
            vec![VerifyError::UnknownOffsetOverwrite(n)]
        );
    }

    #[test]
    fn should_report_strong_updates_on_unknown_memory() {
        let mut graph = RWGraph::new();
        let unknown = graph.unknown_memory();
        let mut b = GraphBuilder::new(&mut graph);
        b.start_block();
        let t = b.memory_object();
        let n = b.overwrite(t, 0, 4);
        graph.add_overwrite(n, DefSite::new(unknown, Offset(0), Offset(4)));
        assert_eq!(
            Verifier::new(&graph).verify(),
            vec![VerifyError::UnknownMemoryOverwrite(n)]
        );
    }

    #[test]
    fn should_report_zero_length_def_sites() {
        let mut graph = RWGraph::new();
        let mut b = GraphBuilder::new(&mut graph);
        b.start_block();
        let t = b.memory_object();
        let n = b.use_(t, 0, 4);
        graph.add_use(n, DefSite::new(t, Offset(4), Offset::ZERO));
        assert_eq!(
            Verifier::new(&graph).verify(),
            vec![VerifyError::EmptyRange(n)]
        );
    }

    #[test]
    fn should_report_blocks_cut_off_from_the_control_flow() {
        let mut graph = RWGraph::new();
        let mut b = GraphBuilder::new(&mut graph);
        let entry = b.start_block();
        let t = b.memory_object();
        b.overwrite(t, 0, 4);
        let stray = b.create_block();
        let reachable = b.create_block();
        b.edge(entry, reachable);
        b.set_block(stray);
        b.overwrite(t, 4, 4);
        assert_eq!(
            Verifier::new(&graph).verify(),
            vec![VerifyError::IsolatedBlock(stray)]
        );
    }

    #[test]
    fn should_report_a_tampered_sentinel() {
        let mut graph = RWGraph::new();
        let unknown = graph.unknown_memory();
        let mut b = GraphBuilder::new(&mut graph);
        let bb0 = b.start_block();
        let t = b.memory_object();
        graph.add_use(unknown, DefSite::new(t, Offset(0), Offset(4)));
        graph.place_node(bb0, unknown);
        assert_eq!(
            Verifier::new(&graph).verify(),
            vec![VerifyError::SentinelTampered(unknown)]
        );
    }
}
