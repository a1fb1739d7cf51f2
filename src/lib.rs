//! Estimation of the normalized mutual information between two clusterizations with overlaps.
//!
//! The joint distribution of modules is not computed from the whole cross product of memberships.
//! It is sampled: random walks over items resolve the module correspondences, each sample bringing a weighted
//! piece of evidence to a confusion matrix. Rounds of samples are run in parallel until the statistical
//! error bound on the NMI meets the requested tolerance.
//!
//! Entry point is [evaluate](tolerance::evaluate).

pub mod prelude;

pub mod error;
pub mod relation;

pub mod automaton;
pub mod sampler;

pub mod aggregate;
pub mod confusion;
pub mod tolerance;

#[cfg(test)]
mod tests {
    #[test]
    // initialize once log system for tests.
    fn init_log() {
        let _res = env_logger::builder().is_test(true).try_init();
    }
} // end of tests
