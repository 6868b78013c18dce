use std::collections::{
    BTreeMap,
    BTreeSet,
};
use std::ops::Range;

use crate::{
    graph::{
        DefSite,
        RWNodeId,
    },
    Interval,
};

/// One interval key and the nodes defining it.
pub type IntervalEntry = (Interval, BTreeSet<RWNodeId>);

/// Byte-precise definitions of memory, per target.
///
/// For every target the map keeps a sorted list of pairwise disjoint
/// intervals, each mapped to the set of nodes that define those bytes.
/// Strong updates kill overlapping coverage (splitting neighbors on the
/// boundaries), weak updates merge into it. Iteration is in key order, so
/// two runs over the same graph observe the same sequences.
#[derive(Debug, Clone, Default)]
pub struct DefinitionsMap {
    map: BTreeMap<RWNodeId, Vec<IntervalEntry>>,
}

/// The indices of all entries overlapping `range`. Entries are sorted and
/// disjoint, so the overlap is a contiguous span.
fn overlapping_span(entries: &[IntervalEntry], range: Interval) -> Range<usize> {
    let lo = entries.partition_point(|(interval, _)| interval.end() <= range.start());
    let mut hi = lo;
    while hi < entries.len() && entries[hi].0.start() < range.end() {
        hi += 1;
    }
    lo..hi
}

/// Merges `entries[index]` into its right neighbor if both map the same
/// node set and the intervals touch.
fn try_merge_with_next(entries: &mut Vec<IntervalEntry>, index: usize) {
    if index + 1 >= entries.len() {
        return;
    }
    if entries[index].1 != entries[index + 1].1 {
        return;
    }
    let Some(united) = entries[index].0.unite(&entries[index + 1].0) else {
        return;
    };
    entries[index].0 = united;
    entries.remove(index + 1);
}

impl DefinitionsMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// All nodes defining any byte of `ds`'s range on `ds`'s target.
    pub fn get(&self, ds: &DefSite) -> BTreeSet<RWNodeId> {
        let Some(entries) = self.map.get(&ds.target) else {
            return BTreeSet::new();
        };
        let range = ds.range();
        let mut result = BTreeSet::new();
        for (_, nodes) in &entries[overlapping_span(entries, range)] {
            result.extend(nodes.iter().copied());
        }
        result
    }

    /// Strong update: `node` becomes the only definition of `ds`'s range.
    /// Overlapping neighbors whose coverage extends beyond the range are
    /// split on the boundaries.
    pub fn update(&mut self, ds: &DefSite, node: RWNodeId) {
        assert!(
            !ds.offset.is_unknown(),
            "strong update on an unknown offset: {ds}"
        );
        let range = ds.range();
        let entries = self.map.entry(ds.target).or_default();
        let span = overlapping_span(entries, range);
        let insert_at = span.start;
        let mut replaced: Vec<IntervalEntry> = Vec::new();
        for (interval, nodes) in entries.drain(span) {
            if interval.start() < range.start() {
                replaced.push((
                    Interval::from_bounds(interval.start(), range.start()),
                    nodes.clone(),
                ));
            }
            if range.end() < interval.end() {
                replaced.push((Interval::from_bounds(range.end(), interval.end()), nodes));
            }
        }
        replaced.push((range, BTreeSet::from([node])));
        replaced.sort_by_key(|(interval, _)| interval.start());
        let key_at = insert_at
            + replaced
                .iter()
                .position(|(interval, _)| *interval == range)
                .unwrap_or(0);
        entries.splice(insert_at..insert_at, replaced);
        try_merge_with_next(entries, key_at);
        if key_at > 0 {
            try_merge_with_next(entries, key_at - 1);
        }
    }

    /// Weak update: merge `node` into every definition intersecting `ds`'s
    /// range and claim the uncovered sub-ranges for it.
    pub fn add(&mut self, ds: &DefSite, node: RWNodeId) {
        self.add_range(ds.target, ds.range(), &BTreeSet::from([node]));
    }

    /// Weak update with a whole node set, keyed directly by interval.
    pub fn add_range(&mut self, target: RWNodeId, range: Interval, nodes: &BTreeSet<RWNodeId>) {
        let entries = self.map.entry(target).or_default();
        let span = overlapping_span(entries, range);
        let mut gaps = Vec::new();
        let mut cursor = range.start();
        for (interval, set) in &mut entries[span] {
            if cursor < interval.start() {
                gaps.push(Interval::from_bounds(cursor, interval.start()));
            }
            set.extend(nodes.iter().copied());
            cursor = cursor.max(interval.end());
        }
        if cursor < range.end() {
            gaps.push(Interval::from_bounds(cursor, range.end()));
        }
        for gap in gaps {
            let at = entries.partition_point(|(interval, _)| interval.start() < gap.start());
            entries.insert(at, (gap, nodes.clone()));
        }
    }

    /// Adds `node` to every definition currently in the map. Used when a
    /// weak write targets unknown memory and must taint every tracked
    /// location.
    pub fn add_all(&mut self, node: RWNodeId) {
        for entries in self.map.values_mut() {
            for (_, nodes) in entries {
                nodes.insert(node);
            }
        }
    }

    /// The sub-ranges of `ds`'s range on `ds`'s target that no definition
    /// covers yet. Coverage of the unknown-memory target does not count.
    pub fn undefined_intervals(&self, ds: &DefSite) -> Vec<Interval> {
        self.uncovered(ds.target, ds.range())
    }

    pub fn uncovered(&self, target: RWNodeId, range: Interval) -> Vec<Interval> {
        let Some(entries) = self.map.get(&target) else {
            return vec![range];
        };
        let span = overlapping_span(entries, range);
        if let Some((interval, _)) = entries.get(span.start) {
            if interval.contains(&range) {
                return vec![];
            }
        }
        let mut gaps = Vec::new();
        let mut cursor = range.start();
        for (interval, _) in &entries[span] {
            if cursor < interval.start() {
                gaps.push(Interval::from_bounds(cursor, interval.start()));
            }
            cursor = cursor.max(interval.end());
        }
        if cursor < range.end() {
            gaps.push(Interval::from_bounds(cursor, range.end()));
        }
        gaps
    }

    pub fn defines_target(&self, target: RWNodeId) -> bool {
        self.map.contains_key(&target)
    }

    /// Iterates targets in ascending id order, intervals by start.
    pub fn iter(&self) -> impl Iterator<Item = (RWNodeId, &[IntervalEntry])> {
        self.map
            .iter()
            .map(|(target, entries)| (*target, entries.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use cranelift_entity::EntityRef;

    use super::*;
    use crate::Offset;

    fn node(id: usize) -> RWNodeId {
        RWNodeId::new(id)
    }

    fn site(target: usize, offset: u64, length: u64) -> DefSite {
        DefSite::new(node(target), Offset(offset), Offset(length))
    }

    fn unbounded_site(target: usize, offset: u64) -> DefSite {
        DefSite::new(node(target), Offset(offset), Offset::UNKNOWN)
    }

    #[test]
    fn should_return_the_updating_node_exactly() {
        let mut map = DefinitionsMap::new();
        map.update(&site(0, 0, 4), node(1));
        map.update(&site(0, 0, 4), node(2));
        assert_eq!(map.get(&site(0, 0, 4)), BTreeSet::from([node(2)]));
    }

    #[test]
    fn should_split_overlapping_neighbors_on_strong_update() {
        let mut map = DefinitionsMap::new();
        map.update(&site(0, 0, 8), node(1));
        map.update(&site(0, 2, 2), node(2));
        assert_eq!(
            map.get(&site(0, 0, 8)),
            BTreeSet::from([node(1), node(2)])
        );
        assert_eq!(map.get(&site(0, 2, 2)), BTreeSet::from([node(2)]));
        assert_eq!(map.get(&site(0, 0, 2)), BTreeSet::from([node(1)]));
        assert_eq!(map.get(&site(0, 4, 4)), BTreeSet::from([node(1)]));
        assert!(map.undefined_intervals(&site(0, 0, 8)).is_empty());
    }

    #[test]
    fn should_keep_weak_updates_additive() {
        let mut map = DefinitionsMap::new();
        map.update(&site(0, 0, 4), node(1));
        map.add(&site(0, 0, 4), node(2));
        assert_eq!(
            map.get(&site(0, 0, 4)),
            BTreeSet::from([node(1), node(2)])
        );
    }

    #[test]
    fn should_claim_uncovered_subranges_on_weak_update() {
        let mut map = DefinitionsMap::new();
        map.update(&site(0, 2, 2), node(1));
        map.add(&site(0, 0, 8), node(2));
        assert_eq!(map.get(&site(0, 0, 2)), BTreeSet::from([node(2)]));
        assert_eq!(
            map.get(&site(0, 2, 2)),
            BTreeSet::from([node(1), node(2)])
        );
        assert_eq!(map.get(&site(0, 4, 4)), BTreeSet::from([node(2)]));
        assert!(map.undefined_intervals(&site(0, 0, 8)).is_empty());
    }

    #[test]
    fn should_enumerate_gaps() {
        let mut map = DefinitionsMap::new();
        map.update(&site(0, 2, 2), node(1));
        map.update(&site(0, 6, 2), node(2));
        assert_eq!(
            map.undefined_intervals(&site(0, 0, 10)),
            vec![
                Interval::new(Offset(0), Offset(2)),
                Interval::new(Offset(4), Offset(2)),
                Interval::new(Offset(8), Offset(2)),
            ]
        );
    }

    #[test]
    fn should_report_the_whole_range_for_an_untouched_target() {
        let map = DefinitionsMap::new();
        assert_eq!(
            map.undefined_intervals(&site(0, 0, 4)),
            vec![Interval::new(Offset(0), Offset(4))]
        );
        assert_eq!(
            map.undefined_intervals(&unbounded_site(0, 0)),
            vec![Interval::new(Offset(0), Offset::UNKNOWN)]
        );
    }

    #[test]
    fn should_leave_no_gap_behind_an_unbounded_definition() {
        let mut map = DefinitionsMap::new();
        map.update(&unbounded_site(0, 4), node(1));
        assert_eq!(
            map.undefined_intervals(&unbounded_site(0, 0)),
            vec![Interval::new(Offset(0), Offset(4))]
        );
        assert_eq!(map.get(&site(0, 100, 4)), BTreeSet::from([node(1)]));
    }

    #[test]
    fn should_read_unknown_offsets_as_the_whole_object() {
        let mut map = DefinitionsMap::new();
        map.update(&site(0, 8, 4), node(1));
        let whole = DefSite::new(node(0), Offset::UNKNOWN, Offset::UNKNOWN);
        assert_eq!(map.get(&whole), BTreeSet::from([node(1)]));
        assert_eq!(
            map.undefined_intervals(&whole),
            vec![
                Interval::new(Offset(0), Offset(8)),
                Interval::new(Offset(12), Offset::UNKNOWN),
            ]
        );
    }

    #[test]
    fn should_broadcast_to_every_tracked_location() {
        let mut map = DefinitionsMap::new();
        map.update(&site(0, 0, 4), node(1));
        map.update(&site(1, 0, 8), node(2));
        map.add_all(node(3));
        assert_eq!(
            map.get(&site(0, 0, 4)),
            BTreeSet::from([node(1), node(3)])
        );
        assert_eq!(
            map.get(&site(1, 0, 8)),
            BTreeSet::from([node(2), node(3)])
        );
    }

    #[test]
    fn should_keep_targets_separate() {
        let mut map = DefinitionsMap::new();
        map.update(&site(0, 0, 4), node(1));
        assert!(map.get(&site(1, 0, 4)).is_empty());
        assert!(map.defines_target(node(0)));
        assert!(!map.defines_target(node(1)));
    }

    #[test]
    fn should_coalesce_adjacent_keys_with_equal_definitions() {
        let mut map = DefinitionsMap::new();
        map.update(&site(0, 0, 4), node(1));
        map.update(&site(0, 4, 4), node(1));
        let (_, entries) = map.iter().next().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, Interval::new(Offset(0), Offset(8)));
    }

    #[test]
    #[should_panic(expected = "strong update on an unknown offset")]
    fn should_reject_strong_updates_on_unknown_offsets() {
        let mut map = DefinitionsMap::new();
        map.update(
            &DefSite::new(node(0), Offset::UNKNOWN, Offset(4)),
            node(1),
        );
    }
}
