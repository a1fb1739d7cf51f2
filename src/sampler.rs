//! Randomized walk sampler over the two clusterizations.
//!
//! A sample starts from a random item of the universe and its two module sets (one per clusterization).
//! When an item belongs to several modules we do not know which module of the first clusterization
//! corresponds to which module of the second one. The sampler then walks from the current candidate modules
//! to other items, feeding their module sets to two [ReductionAutomaton]s until both are reduced to a single module.
//! The importance of the sample decreases with the ambiguity met along the walk.
//!
//! A sampler can be forked: a fork shares the relations and the universe but has its own random generator,
//! seeded from the master seed and a stream index, so that no mutable state is shared between workers.

use rand::Rng;
use rand_xoshiro::Xoshiro256PlusPlus;
use rand_xoshiro::rand_core::SeedableRng;

use crate::automaton::*;
use crate::error::{GecmiError, Result, check_unit_interval};
use crate::relation::{BipartiteRelation, ItemId, ModuleId, ModuleSet};

/// number of consecutive failed attempts before a sample is given up
pub const MAX_ACCEPTABLE_FAILURES: usize = 31;

/// Sampler parameters
#[derive(Copy, Clone, Debug)]
pub struct SamplerArg {
    /// probability of the estimated value being outside the admissible error. Drives the attempts budget.
    risk: f64,
    /// returns remaining ambiguity instead of retrying when the attempts budget is exhausted
    fast_eval: bool,
    /// consecutive failures accepted before returning a degraded sample
    max_failures: usize,
}

impl SamplerArg {
    pub fn new(risk: f64, fast_eval: bool) -> Self {
        SamplerArg {
            risk,
            fast_eval,
            max_failures: MAX_ACCEPTABLE_FAILURES,
        }
    }

    pub fn with_max_failures(mut self, max_failures: usize) -> Self {
        self.max_failures = max_failures.max(1);
        self
    }

    pub fn get_risk(&self) -> f64 {
        self.risk
    }

    pub fn is_fast_eval(&self) -> bool {
        self.fast_eval
    }
}

impl Default for SamplerArg {
    fn default() -> Self {
        SamplerArg {
            risk: 0.01,
            fast_eval: false,
            max_failures: MAX_ACCEPTABLE_FAILURES,
        }
    }
}

//==================================================================================

/// A weighted piece of evidence that modules_a (first clusterization) correspond to modules_b (second one).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Sample {
    pub importance: f64,
    pub modules_a: ModuleSet,
    pub modules_b: ModuleSet,
}

impl Sample {
    /// a sample carrying no information, returned when the sampler gives up
    pub fn degraded() -> Self {
        Sample::default()
    }

    pub fn is_degraded(&self) -> bool {
        self.importance <= 0. || self.modules_a.is_empty() || self.modules_b.is_empty()
    }
}

// outcome of one attempt
enum Attempt {
    Resolved(Sample),
    Failed(Option<Sample>),
}

//==================================================================================

pub struct Sampler<'a> {
    rel_a: &'a BipartiteRelation,
    rel_b: &'a BipartiteRelation,
    // items we draw from
    universe: &'a [ItemId],
    arg: SamplerArg,
    // master seed, forks derive their own from it
    seed: u64,
    rng: Xoshiro256PlusPlus,
}

impl<'a> Sampler<'a> {
    /// - rel_a, rel_b : the two clusterizations
    /// - universe : items to draw from. By convention the items of the clusterization with less items.
    /// - arg : risk and fast evaluation flag
    /// - seed : master seed
    pub fn new(
        rel_a: &'a BipartiteRelation,
        rel_b: &'a BipartiteRelation,
        universe: &'a [ItemId],
        arg: SamplerArg,
        seed: u64,
    ) -> Result<Self> {
        check_unit_interval("risk", arg.risk)?;
        if universe.is_empty() {
            return Err(GecmiError::EmptyPartition("sampling universe has no item"));
        }
        Ok(Sampler {
            rel_a,
            rel_b,
            universe,
            arg,
            seed,
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
        })
    } // end of new

    /// Returns an independent sampler sharing relations and universe.
    /// The seed is derived from the master seed and stream, so the same stream always gives the same fork.
    pub fn fork(&self, stream: u64) -> Sampler<'a> {
        let seed = derive_substream_seed(self.seed, stream);
        Sampler {
            rel_a: self.rel_a,
            rel_b: self.rel_b,
            universe: self.universe,
            arg: self.arg,
            seed,
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
        }
    }

    pub fn get_arg(&self) -> &SamplerArg {
        &self.arg
    }

    pub fn get_universe_size(&self) -> usize {
        self.universe.len()
    }

    /// Draws a sample. Failing attempts are retried up to max_failures consecutive times,
    /// after which a degraded sample (zero importance) is returned.
    /// The only error is a universe made of items absent from both clusterizations.
    pub fn get_sample(&mut self) -> Result<Sample> {
        let mut nb_failures = 0;
        loop {
            match self.try_get_sample()? {
                Attempt::Resolved(sample) => {
                    if nb_failures > 0 {
                        log::trace!("sample resolved after {} failed attempts", nb_failures);
                    }
                    return Ok(sample);
                }
                Attempt::Failed(partial) => {
                    if let Some(sample) = partial {
                        // fast evaluation, we keep remaining ambiguity
                        return Ok(sample);
                    }
                    nb_failures += 1;
                    if nb_failures >= self.arg.max_failures {
                        log::warn!(
                            "sampler failed {} consecutive attempts, returning a degraded sample (maybe your partition is not solvable?)",
                            nb_failures
                        );
                        return Ok(Sample::degraded());
                    }
                }
            }
        }
    } // end of get_sample

    // draws an item member of at least one clusterization, returns it with its modules
    fn draw_member(&mut self) -> Result<(ItemId, &'a [ModuleId], &'a [ModuleId])> {
        let (rel_a, rel_b) = (self.rel_a, self.rel_b);
        let nb_items = self.universe.len();
        for _ in 0..nb_items {
            let item = self.universe[self.rng.random_range(0..nb_items)];
            let (rm1, rm2) = (rel_a.modules_of(item), rel_b.modules_of(item));
            if !rm1.is_empty() || !rm2.is_empty() {
                return Ok((item, rm1, rm2));
            }
        }
        log::error!("could not draw a member item among {} draws", nb_items);
        Err(GecmiError::UnsolvablePartition { drawn: nb_items })
    }

    // one walk. The most heavy function.
    fn try_get_sample(&mut self) -> Result<Attempt> {
        let (rel_a, rel_b) = (self.rel_a, self.rel_b);
        let (mut item, rm1, rm2) = self.draw_member()?;
        //
        let attempts = ((rm1.len() + rm2.len()) as f64 / (2. * self.arg.risk)).ceil() as usize;
        let mut pa1 = ReductionAutomaton::new(rm1);
        let mut pa2 = ReductionAutomaton::new(rm2);
        // smaller joint module sets carry more information
        let mut importance = ambiguity_weight(rm1.len(), rm2.len());
        // the first item counts as used
        let mut iterations: usize = 1;
        //
        while going(pa1.get_status(), pa2.get_status()) && iterations < attempts {
            iterations += 1;
            // choose side and a module among its current candidates
            let first_side = self.rng.random_bool(0.5);
            let (candidates, relation) = match first_side {
                true if !pa1.get_candidates().is_empty() => (pa1.get_candidates(), rel_a),
                false if pa2.get_candidates().is_empty() => (pa1.get_candidates(), rel_a),
                _ => (pa2.get_candidates(), rel_b),
            };
            let module = candidates[self.rng.random_range(0..candidates.len())];
            // go to another member of this module
            let members = relation.items_of(module);
            if members.len() <= 1 {
                // nowhere to go from here, keep current candidates
                continue;
            }
            let mut rank = self.rng.random_range(0..members.len());
            if members[rank] == item {
                rank = (rank + 1) % members.len();
            }
            item = members[rank];
            let (new1, new2) = (rel_a.modules_of(item), rel_b.modules_of(item));
            if new1.len() == 1 && new2.len() == 1 {
                // exact match, no ambiguity left
                pa1.resolve_to(new1);
                pa2.resolve_to(new2);
                let sample = Sample {
                    importance: (importance + 1.) / iterations as f64,
                    modules_a: pa1.into_candidates(),
                    modules_b: pa2.into_candidates(),
                };
                return Ok(Attempt::Resolved(sample));
            }
            let op = if self.rng.random_bool(0.5) {
                SetOperation::Intersect
            } else {
                SetOperation::Difference
            };
            pa1.take_set(new1, op);
            pa2.take_set(new2, op);
            importance += ambiguity_weight(new1.len(), new2.len());
        }
        //
        let resolved = pa1.get_status() == AutomatonStatus::Success
            && pa2.get_status() == AutomatonStatus::Success;
        let sample = Sample {
            importance: importance / iterations as f64,
            modules_a: pa1.into_candidates(),
            modules_b: pa2.into_candidates(),
        };
        if resolved {
            Ok(Attempt::Resolved(sample))
        } else if self.arg.fast_eval && !sample.is_degraded() {
            log::trace!(
                "fast eval keeps ambiguous sample ({} x {})",
                sample.modules_a.len(),
                sample.modules_b.len()
            );
            Ok(Attempt::Failed(Some(sample)))
        } else {
            Ok(Attempt::Failed(None))
        }
    } // end of try_get_sample
} // end of impl Sampler

// 1/max(sqrt(n1*n2), 1)
fn ambiguity_weight(n1: usize, n2: usize) -> f64 {
    1. / ((n1 * n2) as f64).sqrt().max(1.)
}

// seed of substream stream, from a splitmix64 finalization of (master seed, stream)
fn derive_substream_seed(seed: u64, stream: u64) -> u64 {
    let mut z = seed ^ stream.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

//==================================================================================

#[cfg(test)]
mod tests {

    use super::*;

    fn log_init_test() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn disjoint_partitions_resolve_at_once() {
        log_init_test();
        //
        let rel_a = BipartiteRelation::from_clusters(vec![vec![1, 2, 3], vec![4, 5]]);
        let rel_b = BipartiteRelation::from_clusters(vec![vec![1, 2], vec![3, 4, 5]]);
        let universe: Vec<ItemId> = (1..=5).collect();
        let mut sampler =
            Sampler::new(&rel_a, &rel_b, &universe, SamplerArg::default(), 1453731).unwrap();
        for _ in 0..200 {
            let sample = sampler.get_sample().unwrap();
            assert_eq!(sample.importance, 1.);
            assert_eq!(sample.modules_a.len(), 1);
            assert_eq!(sample.modules_b.len(), 1);
            // (2,1) cannot occur : no item in both A2 and B1
            assert!(!(sample.modules_a[0] == 2 && sample.modules_b[0] == 1));
        }
    } // end of disjoint_partitions_resolve_at_once

    #[test]
    fn overlapping_self_comparison_is_diagonal() {
        log_init_test();
        //
        let clusters = vec![vec![1, 2, 3], vec![3, 4, 5], vec![5, 6, 1], vec![7, 8, 2]];
        let rel_a = BipartiteRelation::from_clusters(clusters.clone());
        let rel_b = BipartiteRelation::from_clusters(clusters);
        let universe: Vec<ItemId> = rel_a.items().collect();
        let mut sampler =
            Sampler::new(&rel_a, &rel_b, &universe, SamplerArg::default(), 117).unwrap();
        let mut nb_resolved = 0;
        for _ in 0..500 {
            let sample = sampler.get_sample().unwrap();
            if sample.is_degraded() {
                continue;
            }
            nb_resolved += 1;
            assert!(sample.importance > 0. && sample.importance <= 1.);
            assert_eq!(sample.modules_a, sample.modules_b);
            assert_eq!(sample.modules_a.len(), 1);
        }
        assert!(nb_resolved > 400);
    } // end of overlapping_self_comparison_is_diagonal

    #[test]
    fn forks_are_deterministic_and_distinct() {
        log_init_test();
        //
        let rel_a = BipartiteRelation::from_clusters(vec![vec![1, 2, 3, 4], vec![4, 5, 6, 7, 8]]);
        let rel_b = BipartiteRelation::from_clusters(vec![vec![1, 2], vec![3, 4, 5], vec![6, 7, 8]]);
        let universe: Vec<ItemId> = (1..=8).collect();
        let sampler = Sampler::new(&rel_a, &rel_b, &universe, SamplerArg::default(), 7).unwrap();
        //
        let draw = |stream: u64| -> Vec<Sample> {
            let mut fork = sampler.fork(stream);
            (0..50).map(|_| fork.get_sample().unwrap()).collect()
        };
        assert_eq!(draw(3), draw(3));
        assert_ne!(draw(3), draw(4));
        assert_ne!(derive_substream_seed(7, 0), derive_substream_seed(7, 1));
        // same grain of two batches
        assert_ne!(derive_substream_seed(7, 1 << 32), derive_substream_seed(7, 0));
        assert_ne!(derive_substream_seed(7, 3), derive_substream_seed(8, 3));
    }

    #[test]
    fn outliers_only_is_unsolvable() {
        log_init_test();
        //
        let rel_a = BipartiteRelation::from_clusters(vec![vec![1, 2]]);
        let rel_b = BipartiteRelation::from_clusters(vec![vec![1, 2]]);
        let universe: Vec<ItemId> = vec![10, 11, 12];
        let mut sampler =
            Sampler::new(&rel_a, &rel_b, &universe, SamplerArg::default(), 1).unwrap();
        let res = sampler.get_sample();
        assert!(matches!(res, Err(GecmiError::UnsolvablePartition { .. })));
        //
        let empty: Vec<ItemId> = Vec::new();
        assert!(Sampler::new(&rel_a, &rel_b, &empty, SamplerArg::default(), 1).is_err());
        assert!(Sampler::new(&rel_a, &rel_b, &universe, SamplerArg::new(1.5, false), 1).is_err());
    }

    #[test]
    fn missing_membership_degrades() {
        log_init_test();
        //
        // items of a are never members in b, automaton on b side is dead
        let rel_a = BipartiteRelation::from_clusters(vec![vec![1, 2], vec![2, 3]]);
        let rel_b = BipartiteRelation::from_clusters(vec![vec![7, 8]]);
        let universe: Vec<ItemId> = vec![1, 2, 3];
        let arg = SamplerArg::default().with_max_failures(5);
        let mut sampler = Sampler::new(&rel_a, &rel_b, &universe, arg, 11).unwrap();
        let sample = sampler.get_sample().unwrap();
        assert!(sample.is_degraded());
        assert_eq!(sample.importance, 0.);
    }

    #[test]
    fn fast_eval_keeps_ambiguity() {
        log_init_test();
        //
        // items 1 and 2 both belong to modules 1 and 2 in each clusterization, no walk can separate them
        let rel_a = BipartiteRelation::from_clusters(vec![vec![1, 2], vec![1, 2]]);
        let rel_b = BipartiteRelation::from_clusters(vec![vec![1, 2], vec![1, 2]]);
        let universe: Vec<ItemId> = vec![1, 2];
        //
        let arg = SamplerArg::new(0.1, true);
        let mut sampler = Sampler::new(&rel_a, &rel_b, &universe, arg, 5).unwrap();
        assert!(sampler.get_arg().is_fast_eval());
        assert_eq!(sampler.get_arg().get_risk(), 0.1);
        // forks keep the arguments
        assert!(sampler.fork(2).get_arg().is_fast_eval());
        let sample = sampler.get_sample().unwrap();
        assert!(!sample.is_degraded());
        assert_eq!(sample.modules_a, vec![1, 2]);
        assert_eq!(sample.modules_b, vec![1, 2]);
        assert!(sample.importance > 0. && sample.importance < 1.);
        // without fast evaluation the sampler gives up
        let arg = SamplerArg::new(0.1, false).with_max_failures(3);
        let mut sampler = Sampler::new(&rel_a, &rel_b, &universe, arg, 5).unwrap();
        assert!(!sampler.get_arg().is_fast_eval());
        assert!(sampler.get_sample().unwrap().is_degraded());
    } // end of fast_eval_keeps_ambiguity
} // end of mod tests
