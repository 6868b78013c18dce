use std::collections::BTreeSet;

use index_vec::IndexVec;
use rustc_hash::FxHashSet;
use tracing::{
    debug,
    trace,
};

use crate::{
    graph::{
        DefSite,
        RWBlockId,
        RWGraph,
        RWNodeId,
    },
    DefinitionsMap,
    Interval,
    Offset,
};

index_vec::define_index_type! {
    pub struct PhiId = u32;
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Stage {
    Initial,
    Lvn,
    Gvn,
}

/// Transforms a read-write graph into memory SSA form.
///
/// The local pass ([`run_lvn`][`MemorySsa::run_lvn`]) computes in-block
/// reaching definitions and marks bytes without an in-block definition with
/// placeholder PHI nodes. The global pass ([`run_gvn`][`MemorySsa::run_gvn`])
/// then resolves every PHI against the predecessor blocks, creating further
/// PHIs at earlier joins as needed. Afterwards
/// [`reaching_definitions`][`MemorySsa::reaching_definitions`] answers which
/// writes may reach a given read.
///
/// The passes are single-shot: one LVN, then one GVN, then queries.
#[derive(Debug)]
pub struct MemorySsa {
    graph: RWGraph,
    /// Every PHI ever created, in creation order. Append-only: GVN walks
    /// this list by index and picks up PHIs appended while it runs.
    phis: IndexVec<PhiId, RWNodeId>,
    stage: Stage,
}

impl MemorySsa {
    pub fn new(graph: RWGraph) -> Self {
        Self {
            graph,
            phis: IndexVec::new(),
            stage: Stage::Initial,
        }
    }

    pub fn graph(&self) -> &RWGraph {
        &self.graph
    }

    pub fn into_graph(self) -> RWGraph {
        self.graph
    }

    /// The PHI nodes created so far, in creation order.
    pub fn phis(&self) -> impl Iterator<Item = RWNodeId> + '_ {
        self.phis.iter().copied()
    }

    /// Runs both passes.
    pub fn run(&mut self) {
        self.run_lvn();
        self.run_gvn();
    }

    /// Local value numbering: per-block reaching definitions, in program
    /// order, with placeholder PHIs for bytes no in-block write covers.
    pub fn run_lvn(&mut self) {
        assert_ne!(self.stage, Stage::Gvn, "LVN cannot run after GVN");
        if self.stage != Stage::Initial {
            // re-running is a no-op
            return;
        }
        debug!("Starting LVN");
        let blocks: Vec<RWBlockId> = self.graph.block_ids().collect();
        for block in blocks {
            self.perform_lvn(block);
        }
        self.stage = Stage::Lvn;
        debug!("LVN finished with {} block-local phis", self.phis.len());
    }

    fn perform_lvn(&mut self, block: RWBlockId) {
        // PHIs created below are prepended to the block; iterate a snapshot
        // so the walk stays on the original nodes.
        let nodes = self.graph.block(block).nodes().to_vec();
        for node in nodes {
            let overwrites = self.graph.node(node).overwrites.clone();
            for ds in &overwrites {
                assert!(!ds.offset.is_unknown(), "strong update on unknown offset");
                assert!(
                    ds.target != self.graph.unknown_memory(),
                    "strong update on unknown memory"
                );
                self.graph.block_mut(block).definitions.update(ds, node);
            }

            let defs = self.graph.node(node).defs.clone();
            for ds in &defs {
                if ds.target == self.graph.unknown_memory() {
                    // A write to memory we cannot name may define any
                    // location known so far, and is itself a definition
                    // the global pass must find.
                    let channel = self.unknown_channel();
                    let definitions = &mut self.graph.block_mut(block).definitions;
                    definitions.add_all(node);
                    definitions.add(&channel, node);
                    continue;
                }

                let found = self.find_definitions_in_block(block, ds);
                self.graph.node_mut(node).defuse.extend(found);

                // Registering the def must come after the lookup, otherwise
                // the node would find itself.
                self.graph.block_mut(block).definitions.add(ds, node);
            }

            let uses = self.graph.node(node).uses.clone();
            for ds in &uses {
                let found = self.find_definitions_in_block(block, ds);
                self.graph.node_mut(node).defuse.extend(found);
            }
        }
    }

    /// Global value numbering: resolves every PHI's incoming definitions
    /// across its block's predecessors. PHIs created on the way are
    /// appended to the registry and resolved by the same cursor.
    pub fn run_gvn(&mut self) {
        assert_ne!(self.stage, Stage::Initial, "GVN resolves the PHIs LVN creates");
        if self.stage == Stage::Gvn {
            return;
        }
        debug!("Starting GVN over {} phis", self.phis.len());
        let mut cursor = 0;
        while cursor < self.phis.len() {
            let phi = self.phis[PhiId::from_usize(cursor)];
            cursor += 1;

            let (ds, block) = {
                let node = self.graph.node(phi);
                assert_eq!(node.overwrites.len(), 1, "PHI covers exactly one interval");
                (node.overwrites[0], node.block())
            };
            let block = block.expect("PHI is not placed in a block");

            let preds: Vec<RWBlockId> = self.graph.predecessors(block).collect();
            for pred in preds {
                let found = self.find_definitions(Some(pred), &ds);
                self.graph.node_mut(phi).defuse.extend(found);
            }
        }
        self.stage = Stage::Gvn;
        debug!("GVN finished with {} phis", self.phis.len());
    }

    /// The definitions of `ds` visible at the end of `block`, demanding
    /// them from predecessors where the block leaves bytes uncovered.
    /// Joins materialize a PHI that stands for the sought definition.
    fn find_definitions(&mut self, block: Option<RWBlockId>, ds: &DefSite) -> Vec<RWNodeId> {
        // Nodes in dead code have no block; they contribute nothing.
        let Some(block) = block else {
            return vec![];
        };

        let channel = self.unknown_channel();
        let definitions = &self.graph.block(block).definitions;
        let mut defs: Vec<RWNodeId> = definitions.get(ds).into_iter().collect();
        defs.extend(definitions.get(&channel));
        let uncovered = definitions.undefined_intervals(ds);

        for interval in uncovered {
            if let Some(pred) = self.graph.single_predecessor(block) {
                let pred_defs = self.find_definitions(Some(pred), ds);
                defs.extend(pred_defs);
            } else {
                defs.push(self.create_phi(block, ds.target, interval));
            }
        }
        defs
    }

    /// Like [`find_definitions`][`Self::find_definitions`], but local:
    /// uncovered bytes always get a PHI in this block, to be resolved by
    /// the global pass.
    fn find_definitions_in_block(&mut self, block: RWBlockId, ds: &DefSite) -> Vec<RWNodeId> {
        let channel = self.unknown_channel();
        let definitions = &self.graph.block(block).definitions;
        let mut defs: Vec<RWNodeId> = definitions.get(ds).into_iter().collect();
        defs.extend(definitions.get(&channel));
        let uncovered = definitions.undefined_intervals(ds);

        for interval in uncovered {
            defs.push(self.create_phi(block, ds.target, interval));
        }
        defs
    }

    fn create_phi(&mut self, block: RWBlockId, target: RWNodeId, interval: Interval) -> RWNodeId {
        let site = DefSite::new(target, interval.start(), interval.length());
        assert!(
            self.graph.block(block).definitions.get(&site).is_empty(),
            "PHI for bytes that already have a definition"
        );
        let phi = self.graph.new_phi(site);
        self.graph.block_mut(block).definitions.update(&site, phi);
        self.graph.prepend_and_update_cfg(block, phi);
        self.phis.push(phi);
        trace!("created {phi} covering {site} in {block}");
        phi
    }

    fn unknown_channel(&self) -> DefSite {
        DefSite::new(self.graph.unknown_memory(), Offset::ZERO, Offset::UNKNOWN)
    }

    /// The non-PHI nodes whose writes may reach the given use, in
    /// ascending id order.
    ///
    /// Reads of unknown memory cannot be summarized by PHIs; they are
    /// answered by walking the predecessor blocks directly.
    pub fn reaching_definitions(&self, use_node: RWNodeId) -> Vec<RWNodeId> {
        debug_assert_eq!(self.stage, Stage::Gvn, "queries follow the passes");
        if self.graph.uses_unknown(use_node) {
            return self.find_all_reaching_definitions(use_node);
        }
        self.gather_non_phis(self.graph.node(use_node).defuse.iter().copied())
    }

    /// Flattens PHIs to their transitively reachable non-PHI definitions.
    /// The visited set makes cyclic PHI graphs (loops) terminate.
    fn gather_non_phis(&self, nodes: impl IntoIterator<Item = RWNodeId>) -> Vec<RWNodeId> {
        let mut gathered = BTreeSet::new();
        let mut visited_phis = FxHashSet::default();
        for node in nodes {
            self.gather_non_phis_rec(node, &mut visited_phis, &mut gathered);
        }
        gathered.into_iter().collect()
    }

    fn gather_non_phis_rec(
        &self,
        node: RWNodeId,
        visited_phis: &mut FxHashSet<RWNodeId>,
        gathered: &mut BTreeSet<RWNodeId>,
    ) {
        if !self.graph.node(node).is_phi() {
            gathered.insert(node);
            return;
        }
        if !visited_phis.insert(node) {
            return;
        }
        for next in self.graph.node(node).defuse.iter().copied() {
            self.gather_non_phis_rec(next, visited_phis, gathered);
        }
    }

    /// Every definition that may reach `from`, bypassing PHIs: replays the
    /// local pass up to `from`, then merges the definition maps of all
    /// predecessor blocks, filling only bytes still uncovered.
    fn find_all_reaching_definitions(&self, from: RWNodeId) -> Vec<RWNodeId> {
        let block = self
            .graph
            .node(from)
            .block()
            .expect("use node is not placed in a block");

        let mut defs = DefinitionsMap::new();
        for &node in self.graph.block(block).nodes() {
            if node == from {
                break;
            }
            let data = self.graph.node(node);
            for ds in &data.overwrites {
                defs.update(ds, node);
            }
            for ds in &data.defs {
                if ds.target == self.graph.unknown_memory() {
                    defs.add_all(node);
                    defs.add(&self.unknown_channel(), node);
                    continue;
                }
                defs.add(ds, node);
            }
        }

        let mut found: BTreeSet<RWNodeId> = BTreeSet::new();
        for (_, entries) in defs.iter() {
            for (_, nodes) in entries {
                found.extend(nodes.iter().copied());
            }
        }

        // The starting block stays out of the visited set: a self-loop
        // predecessor must walk it once more.
        let mut visited = FxHashSet::default();
        if let Some(pred) = self.graph.single_predecessor(block) {
            self.collect_reaching_from(defs, pred, &mut found, &mut visited);
        } else {
            for pred in self.graph.predecessors(block) {
                self.collect_reaching_from(defs.clone(), pred, &mut found, &mut visited);
            }
        }

        self.gather_non_phis(found)
    }

    fn collect_reaching_from(
        &self,
        mut defs: DefinitionsMap,
        block: RWBlockId,
        found: &mut BTreeSet<RWNodeId>,
        visited: &mut FxHashSet<RWBlockId>,
    ) {
        if !visited.insert(block) {
            return;
        }

        for (target, entries) in self.graph.block(block).definitions.iter() {
            if !defs.defines_target(target) {
                for (interval, nodes) in entries {
                    defs.add_range(target, *interval, nodes);
                    found.extend(nodes.iter().copied());
                }
                continue;
            }
            for (interval, nodes) in entries {
                for gap in defs.uncovered(target, *interval) {
                    defs.add_range(target, gap, nodes);
                    // The writers behind a partially shadowed range still
                    // reach the use through these bytes.
                    found.extend(nodes.iter().copied());
                }
            }
        }

        if let Some(pred) = self.graph.single_predecessor(block) {
            self.collect_reaching_from(defs, pred, found, visited);
        } else {
            for pred in self.graph.predecessors(block) {
                self.collect_reaching_from(defs.clone(), pred, found, visited);
            }
        }
    }
}
