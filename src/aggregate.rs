//! Parallel accumulation of samples into a shared confusion matrix.
//!
//! A batch of samples is cut in grain sized ranges. Each range is processed by its own fork of the sampler,
//! so random generators and scratch sets stay private to a worker. Only the cross product write of one
//! sample into the matrix is done under the lock.
//! The matrix is never reset, successive batches refine the estimate.

use parking_lot::Mutex;
use rayon::prelude::*;

use crate::confusion::ConfusionMatrix;
use crate::error::{GecmiError, Result};
use crate::sampler::{Sample, Sampler};

/// default number of samples processed by one fork
pub const DEFAULT_GRAIN: usize = 1536;

/// counts of one batch
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct BatchStats {
    pub nb_samples: usize,
    /// samples returned degraded (no information)
    pub nb_degraded: usize,
    /// sum of importances written in the matrix
    pub weight: f64,
}

impl BatchStats {
    pub(crate) fn merge(self, other: BatchStats) -> BatchStats {
        BatchStats {
            nb_samples: self.nb_samples + other.nb_samples,
            nb_degraded: self.nb_degraded + other.nb_degraded,
            weight: self.weight + other.weight,
        }
    }
}

/// Spreads the importance w of a sample {a1..am}x{b1..bn} uniformly: adds w/(m*n) to each cell (ai,bj).
/// Returns the weight added, 0. for a degraded sample.
pub fn accumulate(matrix: &mut ConfusionMatrix, sample: &Sample) -> f64 {
    if sample.is_degraded() {
        return 0.;
    }
    let prob = sample.importance / (sample.modules_a.len() * sample.modules_b.len()) as f64;
    for &a in &sample.modules_a {
        for &b in &sample.modules_b {
            matrix.add(a as usize, b as usize, prob);
        }
    }
    sample.importance
}

//==================================================================================

pub struct Aggregator<'a> {
    // template sampler, never used directly, only forked
    sampler: Sampler<'a>,
    grain: usize,
    // fraction of degraded samples above which a batch fails
    max_degraded_fraction: f64,
}

impl<'a> Aggregator<'a> {
    pub fn new(sampler: Sampler<'a>, grain: usize, max_degraded_fraction: f64) -> Result<Self> {
        if grain == 0 {
            return Err(GecmiError::invalid("grain", "must be positive"));
        }
        if !(0. ..=1.).contains(&max_degraded_fraction) {
            return Err(GecmiError::invalid(
                "max_degraded_fraction",
                format!("{:.3e} must be in [0,1]", max_degraded_fraction),
            ));
        }
        Ok(Aggregator {
            sampler,
            grain,
            max_degraded_fraction,
        })
    }

    pub fn get_grain(&self) -> usize {
        self.grain
    }

    /// Draws nb_samples samples in parallel and accumulates them in matrix.
    /// batch identifies the batch so that forks of different batches use different random streams.
    /// Any sampler error aborts the whole batch, as does a proportion of degraded samples above the threshold.
    pub fn run(
        &self,
        nb_samples: usize,
        batch: u64,
        matrix: &Mutex<ConfusionMatrix>,
    ) -> Result<BatchStats> {
        let nb_grains = nb_samples.div_ceil(self.grain);
        log::debug!(
            "aggregator batch {}, nb_samples : {}, nb_grains : {}",
            batch,
            nb_samples,
            nb_grains
        );
        let stats = (0..nb_grains)
            .into_par_iter()
            .map(|g| {
                let begin = g * self.grain;
                let end = (begin + self.grain).min(nb_samples);
                self.run_range(end - begin, (batch << 32) | g as u64, matrix)
            })
            .try_reduce(BatchStats::default, |a, b| Ok(a.merge(b)))?;
        //
        if stats.nb_degraded > 0 {
            log::warn!(
                "aggregator, {} unmatched (not solvable) samples met among {} (a single cluster could be accounted multiple times)",
                stats.nb_degraded,
                stats.nb_samples
            );
        }
        if stats.nb_degraded as f64 > self.max_degraded_fraction * stats.nb_samples as f64 {
            log::error!(
                "aggregator batch {} failed, degraded : {}, nb_samples : {}",
                batch,
                stats.nb_degraded,
                stats.nb_samples
            );
            return Err(GecmiError::NotSolvable {
                degraded: stats.nb_degraded,
                nb_samples: stats.nb_samples,
            });
        }
        Ok(stats)
    } // end of run

    // one worker range, with its own fork
    fn run_range(
        &self,
        nb_samples: usize,
        stream: u64,
        matrix: &Mutex<ConfusionMatrix>,
    ) -> Result<BatchStats> {
        let mut sampler = self.sampler.fork(stream);
        let mut stats = BatchStats::default();
        for _ in 0..nb_samples {
            let sample = sampler.get_sample()?;
            stats.nb_samples += 1;
            if sample.is_degraded() {
                stats.nb_degraded += 1;
                continue;
            }
            stats.weight += accumulate(&mut matrix.lock(), &sample);
        }
        Ok(stats)
    }
} // end of impl Aggregator

//==================================================================================

#[cfg(test)]
mod tests {

    use super::*;
    use crate::error::ErrorKind;
    use crate::relation::{BipartiteRelation, ItemId};
    use crate::sampler::SamplerArg;

    fn log_init_test() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn spread_over_ambiguity() {
        log_init_test();
        //
        let mut cm = ConfusionMatrix::new(4, 4);
        let sample = Sample {
            importance: 0.6,
            modules_a: vec![1, 2],
            modules_b: vec![1, 2, 3],
        };
        let w = accumulate(&mut cm, &sample);
        assert_eq!(w, 0.6);
        assert_eq!(cm.nb_occupied(), 6);
        assert!((cm.get(2, 3) - 0.1).abs() < 1.0e-12);
        assert!((cm.total_events() - 0.6).abs() < 1.0e-12);
        //
        assert_eq!(accumulate(&mut cm, &Sample::degraded()), 0.);
        assert_eq!(cm.nb_occupied(), 6);
    }

    #[test]
    fn batches_accumulate() {
        log_init_test();
        //
        let rel_a = BipartiteRelation::from_clusters(vec![vec![1, 2, 3], vec![4, 5]]);
        let rel_b = BipartiteRelation::from_clusters(vec![vec![1, 2], vec![3, 4, 5]]);
        let universe: Vec<ItemId> = (1..=5).collect();
        let sampler = Sampler::new(&rel_a, &rel_b, &universe, SamplerArg::default(), 1453).unwrap();
        let aggregator = Aggregator::new(sampler, 100, 0.5).unwrap();
        let matrix = Mutex::new(ConfusionMatrix::new(3, 3));
        //
        let stats = aggregator.run(1050, 0, &matrix).unwrap();
        assert_eq!(stats.nb_samples, 1050);
        assert_eq!(stats.nb_degraded, 0);
        // disjoint clusterings, each sample has importance 1
        assert!((stats.weight - 1050.).abs() < 1.0e-9);
        assert!((matrix.lock().total_events() - 1050.).abs() < 1.0e-9);
        assert_eq!(matrix.lock().get(2, 1), 0.);
        // second batch adds to the first
        let stats = aggregator.run(500, 1, &matrix).unwrap();
        assert_eq!(stats.nb_samples, 500);
        let cm = matrix.lock();
        assert!((cm.total_events() - 1550.).abs() < 1.0e-9);
        // frequencies close to contingency 2/5, 1/5, 2/5
        assert!((cm.get(1, 1) / 1550. - 0.4).abs() < 0.06);
        assert!((cm.get(1, 2) / 1550. - 0.2).abs() < 0.06);
        assert!((cm.get(2, 2) / 1550. - 0.4).abs() < 0.06);
    } // end of batches_accumulate

    #[test]
    fn too_many_degraded_aborts() {
        log_init_test();
        //
        // no item of a is a member in b
        let rel_a = BipartiteRelation::from_clusters(vec![vec![1, 2], vec![3, 4]]);
        let rel_b = BipartiteRelation::from_clusters(vec![vec![7, 8]]);
        let universe: Vec<ItemId> = (1..=4).collect();
        let arg = SamplerArg::default().with_max_failures(2);
        let sampler = Sampler::new(&rel_a, &rel_b, &universe, arg, 3).unwrap();
        let aggregator = Aggregator::new(sampler, 16, 0.5).unwrap();
        let matrix = Mutex::new(ConfusionMatrix::new(3, 2));
        let res = aggregator.run(64, 0, &matrix);
        assert!(matches!(res, Err(GecmiError::NotSolvable { .. })));
        assert!(matrix.lock().is_empty());
        //
        let rel_c = BipartiteRelation::from_clusters(vec![vec![1, 2]]);
        let universe = vec![10, 11];
        let sampler = Sampler::new(&rel_c, &rel_c, &universe, SamplerArg::default(), 3).unwrap();
        assert!(Aggregator::new(sampler, 0, 0.5).is_err());
    }

    #[test]
    fn sampler_error_aborts_batch() {
        log_init_test();
        //
        // no item of the universe is a member of any module
        let rel_a = BipartiteRelation::from_clusters(vec![vec![1, 2], vec![3, 4]]);
        let rel_b = BipartiteRelation::from_clusters(vec![vec![1, 3], vec![2, 4]]);
        let universe: Vec<ItemId> = vec![10, 11, 12];
        let sampler = Sampler::new(&rel_a, &rel_b, &universe, SamplerArg::default(), 5).unwrap();
        let aggregator = Aggregator::new(sampler, 4, 0.5).unwrap();
        assert_eq!(aggregator.get_grain(), 4);
        let matrix = Mutex::new(ConfusionMatrix::new(3, 3));
        // 16 grains, each one fails on its first draw
        let res = aggregator.run(64, 0, &matrix);
        match res {
            Err(err) => {
                assert!(matches!(err, GecmiError::UnsolvablePartition { drawn: 3 }));
                assert_eq!(err.kind(), ErrorKind::Data);
            }
            Ok(stats) => panic!("batch should abort, got {:?}", stats),
        }
        assert!(matrix.lock().is_empty());
    } // end of sampler_error_aborts_batch
} // end of mod tests
