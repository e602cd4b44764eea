//! A tree-shaped heap reachability abstraction.
//!
//! The domain tracks which abstract objects may be referenced
//! by local variables and by the operand stack of a method frame,
//! and which objects may be referenced by the fields of other objects.
//! The operand stack is collapsed into a single merged cell,
//! so the domain describes reachability rather than exact stack positions.
//!
//! Its purpose in this crate is to carry heap information across call boundaries:
//! reduction restricts the object graph to what the callee can reach through the call arguments,
//! expansion splices the field effects observed by the callee back into the caller's object graph.

use super::{AbstractDomain, CallAbstraction, HasTop};
use crate::bytecode::CallInfo;
use crate::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

/// An abstract object, identified by its allocation site.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord)]
pub struct ObjectId {
    /// The class of the allocated object.
    pub class: String,
    /// The bytecode offset of the allocating instruction.
    pub site: usize,
}

impl ObjectId {
    /// Create a new object identifier for the given allocation site.
    pub fn new(class: impl Into<String>, site: usize) -> ObjectId {
        ObjectId {
            class: class.into(),
            site,
        }
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(formatter, "{}@{}", self.class, self.site)
    }
}

/// The reference roots of a frame: local variable slots and the merged operand stack cell.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord)]
pub enum RootKey {
    /// A local variable slot.
    Local(u16),
    /// The merged operand stack cell.
    Stack,
}

/// The points-to information tracked for one frame.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
pub struct PointsToGraph {
    /// May-point-to sets of the frame's reference roots.
    roots: BTreeMap<RootKey, BTreeSet<ObjectId>>,
    /// May-point-to sets of object fields.
    fields: BTreeMap<ObjectId, BTreeMap<String, BTreeSet<ObjectId>>>,
}

impl PointsToGraph {
    /// Get the may-point-to set of a root. Missing roots point to nothing.
    pub fn targets(&self, root: &RootKey) -> BTreeSet<ObjectId> {
        self.roots.get(root).cloned().unwrap_or_default()
    }

    /// Add targets to the may-point-to set of a root.
    pub fn add_targets(&mut self, root: RootKey, targets: impl IntoIterator<Item = ObjectId>) {
        self.roots.entry(root).or_default().extend(targets);
    }

    /// Get the may-point-to set of a field of all given objects.
    pub fn field_targets(&self, objects: &BTreeSet<ObjectId>, field: &str) -> BTreeSet<ObjectId> {
        objects
            .iter()
            .filter_map(|object| self.fields.get(object))
            .filter_map(|field_map| field_map.get(field))
            .flatten()
            .cloned()
            .collect()
    }

    /// Add targets to the may-point-to set of a field of all given objects.
    fn add_field_targets(
        &mut self,
        objects: &BTreeSet<ObjectId>,
        field: &str,
        targets: &BTreeSet<ObjectId>,
    ) {
        for object in objects {
            self.fields
                .entry(object.clone())
                .or_default()
                .entry(field.to_string())
                .or_default()
                .extend(targets.iter().cloned());
        }
    }

    /// Compute all objects reachable from the given seed objects by following field edges.
    pub fn reachable(&self, seed: &BTreeSet<ObjectId>) -> BTreeSet<ObjectId> {
        let mut reachable = seed.clone();
        let mut worklist: Vec<ObjectId> = seed.iter().cloned().collect();
        while let Some(object) = worklist.pop() {
            if let Some(field_map) = self.fields.get(&object) {
                for target in field_map.values().flatten() {
                    if reachable.insert(target.clone()) {
                        worklist.push(target.clone());
                    }
                }
            }
        }
        reachable
    }

    /// Keep only the given roots and the field edges of objects reachable from them.
    fn restricted_to(&self, roots: BTreeMap<RootKey, BTreeSet<ObjectId>>) -> PointsToGraph {
        let seed = roots.values().flatten().cloned().collect();
        let reachable = self.reachable(&seed);
        let fields = self
            .fields
            .iter()
            .filter(|(object, _)| reachable.contains(object))
            .map(|(object, field_map)| (object.clone(), field_map.clone()))
            .collect();
        PointsToGraph { roots, fields }
    }

    fn union(&self, other: &PointsToGraph) -> PointsToGraph {
        let mut result = self.clone();
        for (root, targets) in other.roots.iter() {
            result
                .roots
                .entry(root.clone())
                .or_default()
                .extend(targets.iter().cloned());
        }
        for (object, field_map) in other.fields.iter() {
            let result_field_map = result.fields.entry(object.clone()).or_default();
            for (field, targets) in field_map {
                result_field_map
                    .entry(field.clone())
                    .or_default()
                    .extend(targets.iter().cloned());
            }
        }
        result
    }

    fn is_contained_in(&self, other: &PointsToGraph) -> bool {
        self.roots.iter().all(|(root, targets)| {
            targets.is_empty()
                || other
                    .roots
                    .get(root)
                    .map(|other_targets| targets.is_subset(other_targets))
                    .unwrap_or(false)
        }) && self.fields.iter().all(|(object, field_map)| {
            field_map.iter().all(|(field, targets)| {
                targets.is_empty()
                    || other
                        .fields
                        .get(object)
                        .and_then(|other_field_map| other_field_map.get(field))
                        .map(|other_targets| targets.is_subset(other_targets))
                        .unwrap_or(false)
            })
        })
    }
}

/// A heap reachability domain with a *Top* element representing a completely unknown heap.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub enum ReferenceDomain {
    /// Arbitrary unknown heap.
    Top,
    /// Tracked points-to information.
    Tracked(PointsToGraph),
}

impl ReferenceDomain {
    /// Create an empty tracked heap without any known references.
    pub fn new() -> ReferenceDomain {
        ReferenceDomain::Tracked(PointsToGraph::default())
    }

    /// Get the tracked points-to graph if the heap is not top.
    pub fn graph(&self) -> Option<&PointsToGraph> {
        match self {
            ReferenceDomain::Top => None,
            ReferenceDomain::Tracked(graph) => Some(graph),
        }
    }

    /// Record the allocation of a new object and a reference to it on the operand stack.
    pub fn new_object(&mut self, object: ObjectId) {
        if let ReferenceDomain::Tracked(graph) = self {
            graph.add_targets(RootKey::Stack, [object]);
        }
    }

    /// Record that a local variable slot was pushed onto the operand stack.
    pub fn load_local(&mut self, slot: u16) {
        if let ReferenceDomain::Tracked(graph) = self {
            let targets = graph.targets(&RootKey::Local(slot));
            graph.add_targets(RootKey::Stack, targets);
        }
    }

    /// Record that the operand stack top was stored into a local variable slot.
    pub fn store_local(&mut self, slot: u16) {
        if let ReferenceDomain::Tracked(graph) = self {
            let targets = graph.targets(&RootKey::Stack);
            graph.add_targets(RootKey::Local(slot), targets);
        }
    }

    /// Record a field read through a reference on the operand stack.
    pub fn load_field(&mut self, field: &str) {
        if let ReferenceDomain::Tracked(graph) = self {
            let receivers = graph.targets(&RootKey::Stack);
            let targets = graph.field_targets(&receivers, field);
            graph.add_targets(RootKey::Stack, targets);
        }
    }

    /// Record a field write through a reference on the operand stack.
    pub fn store_field(&mut self, field: &str) {
        if let ReferenceDomain::Tracked(graph) = self {
            let receivers = graph.targets(&RootKey::Stack);
            let values = graph.targets(&RootKey::Stack);
            graph.add_field_targets(&receivers, field, &values);
        }
    }
}

impl Default for ReferenceDomain {
    fn default() -> Self {
        ReferenceDomain::new()
    }
}

impl AbstractDomain for ReferenceDomain {
    fn merge(&self, other: &Self) -> Self {
        match (self, other) {
            (ReferenceDomain::Top, _) | (_, ReferenceDomain::Top) => ReferenceDomain::Top,
            (ReferenceDomain::Tracked(graph), ReferenceDomain::Tracked(other_graph)) => {
                ReferenceDomain::Tracked(graph.union(other_graph))
            }
        }
    }

    fn is_top(&self) -> bool {
        matches!(self, ReferenceDomain::Top)
    }

    fn is_subsumed_by(&self, other: &Self) -> bool {
        match (self, other) {
            (_, ReferenceDomain::Top) => true,
            (ReferenceDomain::Top, ReferenceDomain::Tracked(_)) => false,
            (ReferenceDomain::Tracked(graph), ReferenceDomain::Tracked(other_graph)) => {
                graph.is_contained_in(other_graph)
            }
        }
    }
}

impl HasTop for ReferenceDomain {
    fn top(&self) -> Self {
        ReferenceDomain::Top
    }
}

impl CallAbstraction for ReferenceDomain {
    /// The callee sees the objects reachable through the call arguments.
    ///
    /// Since the operand stack is collapsed into one merged cell,
    /// all references on the caller's stack are treated as potential arguments:
    /// every argument slot of the callee may point to any of them.
    fn reduce_for_call(&self, call: &CallInfo) -> Self {
        match self {
            ReferenceDomain::Top => ReferenceDomain::Top,
            ReferenceDomain::Tracked(graph) => {
                let visible = graph.targets(&RootKey::Stack);
                let roots = (0..call.argument_count)
                    .map(|slot| (RootKey::Local(slot as u16), visible.clone()))
                    .collect();
                ReferenceDomain::Tracked(graph.restricted_to(roots))
            }
        }
    }

    /// The caller keeps its own roots but adopts the callee's view of the object fields,
    /// since the callee may have written to any object it could reach.
    /// References returned by the callee become reachable through the caller's stack cell.
    fn expand_after_call(&self, callee_exit: &Self, _call: &CallInfo) -> Self {
        match (self, callee_exit) {
            (ReferenceDomain::Top, _) | (_, ReferenceDomain::Top) => ReferenceDomain::Top,
            (ReferenceDomain::Tracked(caller), ReferenceDomain::Tracked(exit)) => {
                let mut expanded = caller.clone();
                for (object, field_map) in exit.fields.iter() {
                    let expanded_field_map = expanded.fields.entry(object.clone()).or_default();
                    for (field, targets) in field_map {
                        expanded_field_map
                            .entry(field.clone())
                            .or_default()
                            .extend(targets.iter().cloned());
                    }
                }
                expanded.add_targets(RootKey::Stack, exit.targets(&RootKey::Stack));
                ReferenceDomain::Tracked(expanded)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::MethodSignature;

    fn call(argument_count: usize) -> CallInfo {
        CallInfo {
            callee: MethodSignature::mock("callee", argument_count),
            argument_count,
        }
    }

    #[test]
    fn merge_is_union() {
        let mut left = ReferenceDomain::new();
        left.new_object(ObjectId::new("A", 0));
        let mut right = ReferenceDomain::new();
        right.new_object(ObjectId::new("B", 4));
        let merged = left.merge(&right);
        let stack_targets = merged.graph().unwrap().targets(&RootKey::Stack);
        assert!(stack_targets.contains(&ObjectId::new("A", 0)));
        assert!(stack_targets.contains(&ObjectId::new("B", 4)));
        assert!(left.is_subsumed_by(&merged));
        assert!(right.is_subsumed_by(&merged));
        assert!(!merged.is_subsumed_by(&left));
    }

    #[test]
    fn top_subsumes_everything() {
        let mut heap = ReferenceDomain::new();
        heap.new_object(ObjectId::new("A", 0));
        assert!(heap.is_subsumed_by(&ReferenceDomain::Top));
        assert!(!ReferenceDomain::Top.is_subsumed_by(&heap));
        assert_eq!(heap.top(), ReferenceDomain::Top);
    }

    #[test]
    fn reduction_restricts_to_argument_reachable_objects() {
        let mut heap = ReferenceDomain::new();
        // One object on the stack with a field edge to a second object,
        // plus an unrelated object stored only in a local variable slot.
        heap.new_object(ObjectId::new("Node", 0));
        heap.store_field("next");
        heap.new_object(ObjectId::new("Unrelated", 8));
        heap.store_local(7);
        let reduced = heap.reduce_for_call(&call(1));
        // Only argument slots survive as roots; the caller's local slot 7 does not.
        let graph = reduced.graph().unwrap();
        assert!(graph
            .targets(&RootKey::Local(0))
            .contains(&ObjectId::new("Node", 0)));
        assert!(graph.targets(&RootKey::Local(7)).is_empty());
        assert!(graph.targets(&RootKey::Stack).is_empty());
    }

    #[test]
    fn expansion_splices_callee_field_effects() {
        let mut caller = ReferenceDomain::new();
        caller.new_object(ObjectId::new("Node", 0));
        let mut callee_exit = ReferenceDomain::new();
        callee_exit.new_object(ObjectId::new("Node", 0));
        callee_exit.new_object(ObjectId::new("Fresh", 12));
        callee_exit.store_field("next");
        let expanded = caller.expand_after_call(&callee_exit, &call(1));
        let graph = expanded.graph().unwrap();
        let node = ObjectId::new("Node", 0);
        let node_next = graph.field_targets(&[node].into_iter().collect(), "next");
        assert!(node_next.contains(&ObjectId::new("Fresh", 12)));
    }

    #[test]
    fn expansion_of_top_exit_is_top() {
        let caller = ReferenceDomain::new();
        let expanded = caller.expand_after_call(&ReferenceDomain::Top, &call(0));
        assert!(expanded.is_top());
    }
}
