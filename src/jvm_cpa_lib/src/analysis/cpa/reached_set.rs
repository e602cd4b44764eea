//! A reached set indexed by program location.

use super::ProgramLocation;
use crate::abstract_domain::AbstractDomain;
use crate::prelude::*;
use fnv::FnvHashMap;

/// The set of all abstract states discovered during one analysis run,
/// indexed by program location for amortized constant-time per-location queries.
///
/// The set grows monotonically during a run and never shrinks.
/// A state stored in the set is only ever *replaced* by a state subsuming it
/// (when the merge operator widens it), never mutated in place.
#[derive(Serialize, Debug, Clone)]
pub struct ProgramLocationDependentReachedSet<V> {
    states: FnvHashMap<ProgramLocation, Vec<V>>,
    size: usize,
}

impl<V: AbstractDomain> ProgramLocationDependentReachedSet<V> {
    /// Create an empty reached set.
    pub fn new() -> Self {
        ProgramLocationDependentReachedSet {
            states: FnvHashMap::default(),
            size: 0,
        }
    }

    /// The total number of states in the set.
    pub fn len(&self) -> usize {
        self.size
    }

    /// Returns whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Get the states reached at the given location.
    pub fn states_at(&self, location: &ProgramLocation) -> &[V] {
        self.states
            .get(location)
            .map(|states| states.as_slice())
            .unwrap_or(&[])
    }

    /// Add a state at the given location.
    pub fn insert(&mut self, location: ProgramLocation, value: V) {
        self.states.entry(location).or_default().push(value);
        self.size += 1;
    }

    /// Replace the state at the given index of a location by a widened version of it.
    ///
    /// Panics if the location or the index does not exist,
    /// since only states obtained through [`Self::states_at`] may be replaced.
    pub fn replace(&mut self, location: &ProgramLocation, index: usize, value: V) {
        let states = self
            .states
            .get_mut(location)
            .expect("Location not found in reached set");
        states[index] = value;
    }

    /// Iterate over all locations with at least one reached state.
    pub fn locations(&self) -> impl Iterator<Item = &ProgramLocation> {
        self.states.keys()
    }

    /// Iterate over all (location, state) pairs in the set.
    pub fn iter(&self) -> impl Iterator<Item = (&ProgramLocation, &V)> {
        self.states
            .iter()
            .flat_map(|(location, states)| states.iter().map(move |state| (location, state)))
    }
}

impl<V: AbstractDomain> Default for ProgramLocationDependentReachedSet<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abstract_domain::FlatDomain;
    use petgraph::graph::NodeIndex;

    #[test]
    fn insert_and_query_by_location() {
        let mut reached = ProgramLocationDependentReachedSet::new();
        let first = ProgramLocation::root(NodeIndex::new(0));
        let second = ProgramLocation::root(NodeIndex::new(1));
        reached.insert(first.clone(), FlatDomain::from(1));
        reached.insert(first.clone(), FlatDomain::from(2));
        reached.insert(second.clone(), FlatDomain::from(3));
        assert_eq!(reached.len(), 3);
        assert_eq!(reached.states_at(&first).len(), 2);
        assert_eq!(reached.states_at(&second), &[FlatDomain::from(3)]);
    }

    #[test]
    fn replace_widens_in_place() {
        let mut reached = ProgramLocationDependentReachedSet::new();
        let location = ProgramLocation::root(NodeIndex::new(0));
        reached.insert(location.clone(), FlatDomain::from(1));
        reached.replace(&location, 0, FlatDomain::Top);
        assert_eq!(reached.states_at(&location), &[FlatDomain::Top]);
        assert_eq!(reached.len(), 1);
    }
}
