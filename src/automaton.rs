//! Reduction automaton narrowing a candidate module set down to one module.
//!
//! Each sample of the [Sampler](crate::sampler::Sampler) drives two automatons, one per clusterization,
//! seeded with the modules of the first drawn item. At each step both automatons receive the modules of
//! a newly reached item and the same operation (intersection or difference). A transition that would
//! empty the candidate set is rejected, so starting from a non empty set the automaton never dies.

use crate::relation::{ModuleId, ModuleSet};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AutomatonStatus {
    /// exactly one candidate left, accepting state
    Success,
    /// no candidate. Only reachable from an empty seed.
    Empty,
    /// at least 2 candidates
    Going,
}

impl AutomatonStatus {
    fn from_size(size: usize) -> Self {
        match size {
            0 => AutomatonStatus::Empty,
            1 => AutomatonStatus::Success,
            _ => AutomatonStatus::Going,
        }
    }
}

/// Joint progress predicate over a pair of automatons.
/// We go on while one of them is going and the other is not dead.
pub fn going(s1: AutomatonStatus, s2: AutomatonStatus) -> bool {
    (s1 == AutomatonStatus::Going && s2 != AutomatonStatus::Empty)
        || (s2 == AutomatonStatus::Going && s1 != AutomatonStatus::Empty)
}

/// operation applied between current candidates and a new module set
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SetOperation {
    Intersect,
    Difference,
}

//================================================================================

#[derive(Debug, Clone)]
pub struct ReductionAutomaton {
    // sorted, no duplicates
    candidates: ModuleSet,
}

impl ReductionAutomaton {
    /// seed must be sorted without duplicates (as returned by a relation)
    pub fn new(seed: &[ModuleId]) -> Self {
        debug_assert!(seed.windows(2).all(|w| w[0] < w[1]));
        ReductionAutomaton {
            candidates: seed.to_vec(),
        }
    }

    pub fn get_status(&self) -> AutomatonStatus {
        AutomatonStatus::from_size(self.candidates.len())
    }

    pub fn get_candidates(&self) -> &[ModuleId] {
        &self.candidates
    }

    /// Applies op between candidates and new_set.
    /// The transition is committed only if it leaves at least one candidate.
    /// Returns true if the candidate set changed.
    pub fn take_set(&mut self, new_set: &[ModuleId], op: SetOperation) -> bool {
        if self.candidates.len() <= 1 || new_set == self.candidates.as_slice() {
            return false;
        }
        let reduced = match op {
            SetOperation::Intersect => intersection(&self.candidates, new_set),
            SetOperation::Difference => difference(&self.candidates, new_set),
        };
        if reduced.is_empty() || reduced.len() == self.candidates.len() {
            return false;
        }
        self.candidates = reduced;
        true
    } // end of take_set

    /// forces the automaton to a given resolved set (exact match found by the sampler)
    pub(crate) fn resolve_to(&mut self, set: &[ModuleId]) {
        self.candidates.clear();
        self.candidates.extend_from_slice(set);
    }

    pub(crate) fn into_candidates(self) -> ModuleSet {
        self.candidates
    }
} // end of impl ReductionAutomaton

//================================================================================

// merge based operations on sorted slices

pub(crate) fn intersection(a: &[ModuleId], b: &[ModuleId]) -> ModuleSet {
    let mut res = Vec::with_capacity(a.len().min(b.len()));
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                res.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    res
}

pub(crate) fn difference(a: &[ModuleId], b: &[ModuleId]) -> ModuleSet {
    let mut res = Vec::with_capacity(a.len());
    let mut j = 0;
    for &m in a {
        while j < b.len() && b[j] < m {
            j += 1;
        }
        if j >= b.len() || b[j] != m {
            res.push(m);
        }
    }
    res
}

//================================================================================

// end of mod tests
