//! Adaptive driver: runs aggregation rounds until the error bound on NMI meets the tolerance.
//!
//! Each round samples in two passes. The direct pass walks from the first clusterization to the second,
//! the transposed pass the other way round and accumulates in its own matrix. At analysis time the transposed
//! matrix is transposed back and merged with the direct one, so that neither side biases the estimate.
//! Matrices are never reset, each round adds to the evidence of the previous ones.
//! The number of samples of a round grows geometrically until the error bound is small enough or the
//! round budget is exhausted.

use cpu_time::ProcessTime;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

use crate::aggregate::{Aggregator, BatchStats, DEFAULT_GRAIN};
use crate::confusion::{ConfusionMatrix, Evaluation, normalize, transpose};
use crate::error::{GecmiError, Result, check_unit_interval};
use crate::relation::{BipartiteRelation, ItemId};
use crate::sampler::{MAX_ACCEPTABLE_FAILURES, Sampler, SamplerArg};

/// golden ratio, growth factor of rounds
pub const PHI: f64 = 1.618_033_988_749_895;

/// minimal number of samples of a round before the degree factor is applied
pub const STEPS_BASE: usize = 8192;

/// Evaluation parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvalParams {
    /// probability of the true value being farther than the error bound from the estimate
    pub risk: f64,
    /// maximal acceptable error bound
    pub tolerance: f64,
    /// trades accuracy for speed, see [SamplerArg]
    pub fast_eval: bool,
    /// number of items of each clusterization if known beforehand (from the input headers for example)
    pub item_counts: Option<(usize, usize)>,
}

impl EvalParams {
    pub fn new(risk: f64, tolerance: f64, fast_eval: bool) -> Self {
        EvalParams {
            risk,
            tolerance,
            fast_eval,
            item_counts: None,
        }
    }

    pub fn with_item_counts(mut self, nb_items_a: usize, nb_items_b: usize) -> Self {
        self.item_counts = Some((nb_items_a, nb_items_b));
        self
    }

    fn check(&self) -> Result<()> {
        check_unit_interval("risk", self.risk)?;
        check_unit_interval("tolerance", self.tolerance)
    }
}

impl Default for EvalParams {
    fn default() -> Self {
        EvalParams::new(0.01, 0.01, false)
    }
}

/// Tuning of the driver. None of these change the value estimated, only how fast we get there.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// floor of samples per round, before multiplication by growth and degree factor
    pub steps_base: usize,
    /// factor applied to the number of samples between rounds
    pub growth: f64,
    /// number of samples processed by one forked sampler
    pub grain: usize,
    /// maximal number of rounds before giving up with [GecmiError::AccuracyNotReached]
    pub max_rounds: usize,
    /// fraction of degraded samples in a batch above which the partition is declared not solvable
    pub max_degraded_fraction: f64,
    /// consecutive failures before the sampler degrades a sample
    pub max_failures: usize,
    /// master seed of all random streams
    pub seed: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            steps_base: STEPS_BASE,
            growth: PHI,
            grain: DEFAULT_GRAIN,
            max_rounds: 64,
            max_degraded_fraction: 0.5,
            max_failures: MAX_ACCEPTABLE_FAILURES,
            seed: 1453731,
        }
    } // end of default
}

impl DriverConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn check(&self) -> Result<()> {
        if self.steps_base == 0 {
            return Err(GecmiError::invalid("steps_base", "must be positive"));
        }
        if !(self.growth > 1.) {
            return Err(GecmiError::invalid(
                "growth",
                format!("{:.3e} must be greater than 1", self.growth),
            ));
        }
        if self.max_rounds == 0 {
            return Err(GecmiError::invalid("max_rounds", "must be positive"));
        }
        Ok(())
    }
}

//==================================================================================

/// Holds the state of an evaluation across rounds.
pub struct Estimator<'a> {
    rel_a: &'a BipartiteRelation,
    rel_b: &'a BipartiteRelation,
    // sorted items we sample from
    universe: Vec<ItemId>,
    params: EvalParams,
    config: DriverConfig,
    // rows : modules of a, cols : modules of b
    direct: Mutex<ConfusionMatrix>,
    // rows : modules of b, cols : modules of a
    transposed: Mutex<ConfusionMatrix>,
    nb_rounds: usize,
    // cumulated over rounds
    stats: BatchStats,
}

impl<'a> Estimator<'a> {
    pub fn new(
        rel_a: &'a BipartiteRelation,
        rel_b: &'a BipartiteRelation,
        params: EvalParams,
        config: DriverConfig,
    ) -> Result<Self> {
        params.check()?;
        config.check()?;
        if rel_a.is_empty() {
            return Err(GecmiError::EmptyPartition("first clusterization has no module"));
        }
        if rel_b.is_empty() {
            return Err(GecmiError::EmptyPartition("second clusterization has no module"));
        }
        // a single cluster has null entropy, mutual information vanishes whatever the other side is
        if rel_a.nb_modules() == 1 || rel_b.nb_modules() == 1 {
            log::error!(
                "nb modules a : {}, nb modules b : {}",
                rel_a.nb_modules(),
                rel_b.nb_modules()
            );
            return Err(GecmiError::NotApplicable(
                "a clusterization made of a single cluster carries no information".to_string(),
            ));
        }
        //
        let (nb_items_a, nb_items_b) = params
            .item_counts
            .unwrap_or((rel_a.nb_items(), rel_b.nb_items()));
        if nb_items_a != nb_items_b {
            log::warn!(
                "the number of nodes is different in the collections : {} vs {}, the comparison may be unfair (synchronize them first)",
                nb_items_a,
                nb_items_b
            );
        }
        // items absent from one side contribute nothing, we sample the smaller one
        let mut universe: Vec<ItemId> = if nb_items_a <= nb_items_b {
            rel_a.items().collect()
        } else {
            rel_b.items().collect()
        };
        universe.sort_unstable();
        //
        let direct = ConfusionMatrix::new(
            rel_a.max_module() as usize + 1,
            rel_b.max_module() as usize + 1,
        );
        let transposed = ConfusionMatrix::new(
            rel_b.max_module() as usize + 1,
            rel_a.max_module() as usize + 1,
        );
        Ok(Estimator {
            rel_a,
            rel_b,
            universe,
            params,
            config,
            direct: Mutex::new(direct),
            transposed: Mutex::new(transposed),
            nb_rounds: 0,
            stats: BatchStats::default(),
        })
    } // end of new

    pub fn get_universe_size(&self) -> usize {
        self.universe.len()
    }

    pub fn get_nb_rounds(&self) -> usize {
        self.nb_rounds
    }

    /// cumulated counts of all rounds
    pub fn get_stats(&self) -> BatchStats {
        self.stats
    }

    #[cfg_attr(doc, katexit::katexit)]
    /// Number of samples of the first round.
    ///
    /// We need about $\ln(2/risk)/(2 \epsilon^2)$ samples (Hoeffding) for an estimation at precision $\epsilon$ on
    /// one proportion. We take the square root of it scaled by the size of the relations and the mean membership,
    /// with a floor of steps_base * growth * degree. The floor is halved in fast evaluation.
    pub fn initial_steps(&self) -> usize {
        let mass = self
            .universe
            .len()
            .max(self.rel_a.nb_links() + self.rel_b.nb_links()) as f64;
        let degree = self
            .rel_a
            .mean_membership()
            .max(self.rel_b.mean_membership())
            .max(1.);
        let accuracy = ((2. / self.params.risk).ln() / 2.).sqrt() / self.params.tolerance;
        let steps = mass.sqrt() * degree * accuracy;
        let base = if self.params.fast_eval {
            self.config.steps_base / 2
        } else {
            self.config.steps_base
        };
        let floor = base as f64 * self.config.growth * degree;
        log::debug!(
            "initial steps, mass : {:.3e}, degree : {:.3e}, accuracy : {:.3e}, steps : {:.3e}, floor : {:.3e}",
            mass,
            degree,
            accuracy,
            steps,
            floor
        );
        steps.max(floor).ceil() as usize
    } // end of initial_steps

    /// Splits steps between the direct and the transposed pass, in proportion of the number of modules
    /// of the clusterization each pass starts from.
    pub fn split_steps(&self, steps: usize) -> (usize, usize) {
        let nb_a = self.rel_a.nb_modules() as f64;
        let nb_b = self.rel_b.nb_modules() as f64;
        let direct = ((steps as f64 * nb_a / (nb_a + nb_b)).round() as usize).min(steps);
        (direct, steps - direct)
    }

    fn sampler_arg(&self) -> SamplerArg {
        SamplerArg::new(self.params.risk, self.params.fast_eval)
            .with_max_failures(self.config.max_failures)
    }

    /// Runs one round of steps samples and analyzes the cumulated matrices.
    pub fn run_round(&mut self, steps: usize) -> Result<Evaluation> {
        let cpu_start = ProcessTime::now();
        let sys_now = SystemTime::now();
        //
        let (nb_direct, nb_transposed) = self.split_steps(steps);
        let batch = self.nb_rounds as u64;
        if nb_direct > 0 {
            let sampler = Sampler::new(
                self.rel_a,
                self.rel_b,
                &self.universe,
                self.sampler_arg(),
                self.config.seed,
            )?;
            let aggregator =
                Aggregator::new(sampler, self.config.grain, self.config.max_degraded_fraction)?;
            let stats = aggregator.run(nb_direct, 2 * batch, &self.direct)?;
            self.stats = self.stats.merge(stats);
        }
        if nb_transposed > 0 {
            let sampler = Sampler::new(
                self.rel_b,
                self.rel_a,
                &self.universe,
                self.sampler_arg(),
                self.config.seed,
            )?;
            let aggregator =
                Aggregator::new(sampler, self.config.grain, self.config.max_degraded_fraction)?;
            let stats = aggregator.run(nb_transposed, 2 * batch + 1, &self.transposed)?;
            self.stats = self.stats.merge(stats);
        }
        self.nb_rounds += 1;
        //
        let mut combined = self.direct.lock().clone();
        combined.merge(&transpose(&self.transposed.lock()));
        let total_events = combined.total_events();
        if !(total_events > 0.) {
            return Err(GecmiError::NotSolvable {
                degraded: self.stats.nb_degraded,
                nb_samples: self.stats.nb_samples,
            });
        }
        let normalized = normalize(&combined, Some(total_events));
        if log::log_enabled!(log::Level::Debug) {
            normalized.dump_entropies();
        }
        let evaluation = normalized.evaluate(total_events, self.params.risk)?;
        //
        let cpu_time: Duration = cpu_start.elapsed();
        log::info!(
            "round {}, steps : {} ({} direct), events : {:.3e}, error bound : {:.3e}, nmi : {:.3e}",
            self.nb_rounds,
            steps,
            nb_direct,
            total_events,
            evaluation.error_bound,
            evaluation.nmi_max
        );
        log::info!(
            " round sys time(ms) {:?} cpu time(ms) {:?}",
            sys_now.elapsed().map(|d| d.as_millis()).unwrap_or(0),
            cpu_time.as_millis()
        );
        Ok(evaluation)
    } // end of run_round

    /// Runs rounds, growing the number of samples, until the error bound is below tolerance.
    pub fn converge(&mut self) -> Result<Evaluation> {
        let mut steps = self.initial_steps();
        loop {
            let evaluation = self.run_round(steps)?;
            if evaluation.error_bound <= self.params.tolerance {
                log::info!(
                    "converged in {} rounds, {} samples, {} degraded",
                    self.nb_rounds,
                    self.stats.nb_samples,
                    self.stats.nb_degraded
                );
                return Ok(evaluation);
            }
            if self.nb_rounds >= self.config.max_rounds {
                log::error!(
                    "no convergence after {} rounds, error bound : {:.3e}",
                    self.nb_rounds,
                    evaluation.error_bound
                );
                return Err(GecmiError::AccuracyNotReached {
                    rounds: self.nb_rounds,
                    error_bound: evaluation.error_bound,
                    tolerance: self.params.tolerance,
                });
            }
            steps = (steps as f64 * self.config.growth).ceil() as usize;
        }
    } // end of converge
} // end of impl Estimator

//==================================================================================

/// Evaluates NMI between two clusterizations with default driver tuning.
pub fn evaluate(
    rel_a: &BipartiteRelation,
    rel_b: &BipartiteRelation,
    params: &EvalParams,
) -> Result<Evaluation> {
    evaluate_with(rel_a, rel_b, params, &DriverConfig::default())
}

/// Evaluates NMI between two clusterizations.
pub fn evaluate_with(
    rel_a: &BipartiteRelation,
    rel_b: &BipartiteRelation,
    params: &EvalParams,
    config: &DriverConfig,
) -> Result<Evaluation> {
    log::info!(
        "evaluate, nb modules : {} x {}, nb items : {} x {}, risk : {:.3e}, tolerance : {:.3e}, fast : {}",
        rel_a.nb_modules(),
        rel_b.nb_modules(),
        rel_a.nb_items(),
        rel_b.nb_items(),
        params.risk,
        params.tolerance,
        params.fast_eval
    );
    let mut estimator = Estimator::new(rel_a, rel_b, params.clone(), config.clone())?;
    estimator.converge()
}

//==================================================================================

// end of mod tests
