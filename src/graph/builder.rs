use crate::{
    graph::{
        DefSite,
        RWBlockId,
        RWGraph,
        RWNodeId,
    },
    Offset,
};

/// A small construction surface for frontends lowering a procedure into a
/// read-write graph, and for tests.
///
/// Offsets and lengths are raw byte counts; [`Offset::UNKNOWN`] cases have
/// dedicated methods.
#[derive(Debug)]
pub struct GraphBuilder<'g> {
    graph: &'g mut RWGraph,
    current_block: Option<RWBlockId>,
}

impl<'g> GraphBuilder<'g> {
    pub fn new(graph: &'g mut RWGraph) -> Self {
        Self {
            graph,
            current_block: None,
        }
    }

    /// Creates a new block and makes it current.
    pub fn start_block(&mut self) -> RWBlockId {
        let block = self.graph.new_block();
        self.current_block = Some(block);
        block
    }

    pub fn create_block(&mut self) -> RWBlockId {
        self.graph.new_block()
    }

    pub fn set_block(&mut self, block: RWBlockId) {
        self.current_block = Some(block);
    }

    pub fn edge(&mut self, from: RWBlockId, to: RWBlockId) {
        self.graph.add_edge(from, to);
    }

    /// A fresh node standing for a memory object. Never placed in a block;
    /// its id is the target handle used in def-sites.
    pub fn memory_object(&mut self) -> RWNodeId {
        self.graph.new_node()
    }

    pub fn unknown_memory(&self) -> RWNodeId {
        self.graph.unknown_memory()
    }

    /// A node strongly updating `length` bytes of `target` at `offset`,
    /// appended to the current block.
    pub fn overwrite(&mut self, target: RWNodeId, offset: u64, length: u64) -> RWNodeId {
        let node = self.graph.new_node();
        self.graph
            .add_overwrite(node, DefSite::new(target, Offset(offset), Offset(length)));
        self.place(node);
        node
    }

    /// A node weakly updating `length` bytes of `target` at `offset`.
    pub fn def(&mut self, target: RWNodeId, offset: u64, length: u64) -> RWNodeId {
        let node = self.graph.new_node();
        self.graph
            .add_def(node, DefSite::new(target, Offset(offset), Offset(length)));
        self.place(node);
        node
    }

    /// A node weakly updating memory the frontend cannot name.
    pub fn def_unknown(&mut self) -> RWNodeId {
        let node = self.graph.new_node();
        let unknown = self.graph.unknown_memory();
        self.graph
            .add_def(node, DefSite::new(unknown, Offset::ZERO, Offset::UNKNOWN));
        self.place(node);
        node
    }

    /// A node reading `length` bytes of `target` at `offset`.
    pub fn use_(&mut self, target: RWNodeId, offset: u64, length: u64) -> RWNodeId {
        let node = self.graph.new_node();
        self.graph
            .add_use(node, DefSite::new(target, Offset(offset), Offset(length)));
        self.place(node);
        node
    }

    /// A node reading `target` at an offset the frontend cannot name.
    pub fn use_unknown(&mut self, target: RWNodeId) -> RWNodeId {
        let node = self.graph.new_node();
        self.graph
            .add_use(node, DefSite::new(target, Offset::UNKNOWN, Offset::UNKNOWN));
        self.place(node);
        node
    }

    pub fn current_block(&self) -> RWBlockId {
        self.current_block.expect("no current block")
    }

    fn place(&mut self, node: RWNodeId) {
        let block = self.current_block();
        self.graph.place_node(block, node);
    }
}
