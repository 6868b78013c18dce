use std::fmt::{
    Display,
    Formatter,
};

use cranelift_entity::{
    entity_impl,
    PrimaryMap,
};
use petgraph::prelude::*;
use smallvec::SmallVec;

pub use builder::GraphBuilder;

use crate::{
    DefinitionsMap,
    FxIndexSet,
    Interval,
    Offset,
};

mod builder;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RWNodeId(u32);
entity_impl!(RWNodeId, "rw");

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RWBlockId(u32);
entity_impl!(RWBlockId, "bb");

impl From<RWBlockId> for NodeIndex<u32> {
    fn from(value: RWBlockId) -> Self {
        Self::new(value.0 as usize)
    }
}

impl From<NodeIndex<u32>> for RWBlockId {
    fn from(value: NodeIndex<u32>) -> Self {
        Self(value.index() as u32)
    }
}

pub type Graph = StableGraph<(), (), Directed>;

/// A memory write or read range: `length` bytes of `target` starting at
/// `offset`. The target is the identity of the node standing for the
/// memory object. Two def-sites are equal iff all three components match.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct DefSite {
    pub target: RWNodeId,
    pub offset: Offset,
    pub length: Offset,
}

impl DefSite {
    pub fn new(target: RWNodeId, offset: Offset, length: Offset) -> Self {
        Self {
            target,
            offset,
            length,
        }
    }

    /// The byte range this site touches. An unknown offset reads as the
    /// whole object.
    pub fn range(&self) -> Interval {
        if self.offset.is_unknown() {
            Interval::new(Offset::ZERO, Offset::UNKNOWN)
        } else {
            Interval::new(self.offset, self.length)
        }
    }
}

impl Display for DefSite {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}, +{})", self.target, self.offset, self.length)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RWNodeKind {
    /// An ordinary node built by the frontend.
    Generic,
    /// A join node synthesized by the analysis.
    Phi,
    /// The unknown-memory sentinel.
    Unknown,
}

/// A node of the read-write graph.
///
/// `overwrites` are strong updates, `defs` weak updates, `uses` reads.
/// `defuse` is filled in by the analysis with the definitions reaching
/// this node; it keeps insertion order to make debugging reproducible.
#[derive(Debug, Clone)]
pub struct RWNode {
    kind: RWNodeKind,
    block: Option<RWBlockId>,
    pub overwrites: SmallVec<[DefSite; 1]>,
    pub defs: SmallVec<[DefSite; 2]>,
    pub uses: SmallVec<[DefSite; 2]>,
    pub defuse: FxIndexSet<RWNodeId>,
}

impl RWNode {
    fn new(kind: RWNodeKind) -> Self {
        Self {
            kind,
            block: None,
            overwrites: SmallVec::new(),
            defs: SmallVec::new(),
            uses: SmallVec::new(),
            defuse: FxIndexSet::default(),
        }
    }

    pub fn kind(&self) -> RWNodeKind {
        self.kind
    }

    pub fn is_phi(&self) -> bool {
        self.kind == RWNodeKind::Phi
    }

    /// The block this node is placed in. `None` for memory objects, the
    /// unknown-memory sentinel and nodes in dead code.
    pub fn block(&self) -> Option<RWBlockId> {
        self.block
    }
}

/// A basic block: an ordered node list plus the definitions visible at the
/// end of the block once the local pass has run.
#[derive(Debug, Clone)]
pub struct RWBlock {
    id: RWBlockId,
    nodes: Vec<RWNodeId>,
    pub definitions: DefinitionsMap,
}

impl RWBlock {
    fn new(id: RWBlockId) -> Self {
        Self {
            id,
            nodes: vec![],
            definitions: DefinitionsMap::new(),
        }
    }

    pub fn id(&self) -> RWBlockId {
        self.id
    }

    /// The nodes of the block in program order.
    pub fn nodes(&self) -> &[RWNodeId] {
        &self.nodes
    }
}

/// The read-write graph of one procedure.
///
/// Nodes and blocks live in arenas owned by the graph; the block-level
/// control flow is mirrored in a [`StableGraph`] whose indices stay in
/// lockstep with the block arena (blocks are never removed).
#[derive(Debug, Clone)]
pub struct RWGraph {
    graph: Graph,
    blocks: PrimaryMap<RWBlockId, RWBlock>,
    nodes: PrimaryMap<RWNodeId, RWNode>,
    unknown_memory: RWNodeId,
}

impl RWGraph {
    pub fn new() -> Self {
        let mut nodes = PrimaryMap::new();
        let unknown_memory = nodes.push(RWNode::new(RWNodeKind::Unknown));
        Self {
            graph: Graph::default(),
            blocks: PrimaryMap::new(),
            nodes,
            unknown_memory,
        }
    }

    /// The unknown-memory sentinel of this graph. Recognized by id
    /// equality everywhere.
    pub fn unknown_memory(&self) -> RWNodeId {
        self.unknown_memory
    }

    pub fn new_block(&mut self) -> RWBlockId {
        self.graph.add_node(());
        let next_id = self.blocks.next_key();
        self.blocks.push(RWBlock::new(next_id))
    }

    /// Creates an unplaced generic node. Memory objects are plain nodes
    /// that never get placed in a block.
    pub fn new_node(&mut self) -> RWNodeId {
        self.nodes.push(RWNode::new(RWNodeKind::Generic))
    }

    pub(crate) fn new_phi(&mut self, site: DefSite) -> RWNodeId {
        let mut node = RWNode::new(RWNodeKind::Phi);
        node.overwrites.push(site);
        self.nodes.push(node)
    }

    pub fn add_overwrite(&mut self, node: RWNodeId, site: DefSite) {
        self.nodes[node].overwrites.push(site);
    }

    pub fn add_def(&mut self, node: RWNodeId, site: DefSite) {
        self.nodes[node].defs.push(site);
    }

    pub fn add_use(&mut self, node: RWNodeId, site: DefSite) {
        self.nodes[node].uses.push(site);
    }

    /// Appends `node` to `block`.
    pub fn place_node(&mut self, block: RWBlockId, node: RWNodeId) {
        let data = &mut self.nodes[node];
        assert!(
            data.block.is_none(),
            "{node} is already placed in {}",
            data.block.unwrap()
        );
        data.block = Some(block);
        self.blocks[block].nodes.push(node);
    }

    /// Installs `node` as the new first node of `block`. The former first
    /// node becomes its successor: intra-block order is the node-level
    /// control flow, so the list insertion plus the backreference is the
    /// whole rewiring, and the block's entry edge now reaches `node`.
    pub fn prepend_and_update_cfg(&mut self, block: RWBlockId, node: RWNodeId) {
        let data = &mut self.nodes[node];
        assert!(data.block.is_none(), "{node} is already placed");
        data.block = Some(block);
        self.blocks[block].nodes.insert(0, node);
    }

    pub fn add_edge(&mut self, from: RWBlockId, to: RWBlockId) {
        // update_edge keeps the edge set simple; a frontend may report the
        // same control-flow edge twice (e.g. both arms of a branch).
        self.graph.update_edge(from.into(), to.into(), ());
    }

    pub fn node(&self, id: RWNodeId) -> &RWNode {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: RWNodeId) -> &mut RWNode {
        &mut self.nodes[id]
    }

    pub fn block(&self, id: RWBlockId) -> &RWBlock {
        &self.blocks[id]
    }

    pub fn block_mut(&mut self, id: RWBlockId) -> &mut RWBlock {
        &mut self.blocks[id]
    }

    /// All nodes in creation order, the sentinel included.
    pub fn nodes(&self) -> impl Iterator<Item = (RWNodeId, &RWNode)> {
        self.nodes.iter()
    }

    pub fn block_ids(&self) -> impl Iterator<Item = RWBlockId> + '_ {
        self.blocks.keys()
    }

    pub fn blocks(&self) -> impl Iterator<Item = (RWBlockId, &RWBlock)> {
        self.blocks.iter()
    }

    pub fn predecessors(&self, block: RWBlockId) -> impl Iterator<Item = RWBlockId> + '_ {
        self.graph
            .neighbors_directed(block.into(), Incoming)
            .map(|n| n.into())
    }

    pub fn successors(&self, block: RWBlockId) -> impl Iterator<Item = RWBlockId> + '_ {
        self.graph.neighbors(block.into()).map(|n| n.into())
    }

    /// The unique predecessor of `block` if it has exactly one.
    pub fn single_predecessor(&self, block: RWBlockId) -> Option<RWBlockId> {
        let mut preds = self.predecessors(block);
        let pred = preds.next()?;
        if preds.next().is_some() {
            return None;
        }
        Some(pred)
    }

    /// Whether `node` reads memory the analysis cannot name: a use of the
    /// unknown-memory target or at an unknown offset.
    pub fn uses_unknown(&self, node: RWNodeId) -> bool {
        self.nodes[node]
            .uses
            .iter()
            .any(|ds| ds.target == self.unknown_memory || ds.offset.is_unknown())
    }
}

impl Default for RWGraph {
    fn default() -> Self {
        Self::new()
    }
}
