//! Confusion matrix between modules of two clusterizations and its information analysis.
//!
//! The matrix accumulates the weighted evidence produced by the samplers. Once normalized it is a joint
//! probability on couples of modules from which we get entropies, mutual information, two normalized
//! mutual information (max and sqrt normalization) and a bound on the error of the estimated NMI.

use indexmap::IndexMap;
use ndarray::{Array1, ArrayView1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use statrs::distribution::{Beta, ContinuousCDF};

use crate::error::{GecmiError, Result, check_unit_interval};

const EPS: f64 = f64::EPSILON;

/// Sparse matrix of weighted joint evidence. Row i is module i of the first clusterization,
/// column j module j of the second one. Entries are non negative and only grow.
#[derive(Clone, Debug, Default)]
pub struct ConfusionMatrix {
    nb_rows: usize,
    nb_cols: usize,
    cells: IndexMap<(usize, usize), f64>,
}

impl ConfusionMatrix {
    /// dimensions are (max module id of first clusterization + 1, max module id of second + 1)
    pub fn new(nb_rows: usize, nb_cols: usize) -> Self {
        ConfusionMatrix {
            nb_rows,
            nb_cols,
            cells: IndexMap::new(),
        }
    }

    pub fn dim(&self) -> (usize, usize) {
        (self.nb_rows, self.nb_cols)
    }

    /// adds weight to cell (i,j). Dimensions are extended if needed.
    pub fn add(&mut self, i: usize, j: usize, weight: f64) {
        debug_assert!(weight >= 0.);
        self.nb_rows = self.nb_rows.max(i + 1);
        self.nb_cols = self.nb_cols.max(j + 1);
        *self.cells.entry((i, j)).or_insert(0.) += weight;
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.cells.get(&(i, j)).copied().unwrap_or(0.)
    }

    /// iterates on occupied cells (i, j, value)
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.cells.iter().map(|(&(i, j), &v)| (i, j, v))
    }

    pub fn nb_occupied(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// sum of all cells weights
    pub fn total_events(&self) -> f64 {
        self.cells.values().sum()
    }

    /// adds other cell by cell
    pub fn merge(&mut self, other: &ConfusionMatrix) {
        for (i, j, v) in other.iter() {
            self.add(i, j, v);
        }
    }
} // end of impl ConfusionMatrix

/// sum of all cells weights
pub fn total_events(cm: &ConfusionMatrix) -> f64 {
    cm.total_events()
}

/// exact transposition
pub fn transpose(cm: &ConfusionMatrix) -> ConfusionMatrix {
    let mut t = ConfusionMatrix::new(cm.nb_cols, cm.nb_rows);
    t.cells.reserve(cm.cells.len());
    for (i, j, v) in cm.iter() {
        t.cells.insert((j, i), v);
    }
    t
}

// for entropy calculations, x log(x) = 0 when x vanishes
fn zlog(x: f64) -> f64 {
    if x >= EPS { x.log2() } else { 0. }
}

/// entropy (in bits) of a discrete distribution. probabilities below machine epsilon contribute 0.
pub fn entropy(distribution: ArrayView1<f64>) -> f64 {
    distribution.iter().fold(0., |acc, p| acc - p * zlog(*p))
}

/// Divides all cells by total_events (computed if not given or not positive) and computes marginals.
pub fn normalize(cm: &ConfusionMatrix, total_events: Option<f64>) -> NormalizedConfusion {
    let total = match total_events {
        Some(t) if t > 0. => t,
        _ => cm.total_events(),
    };
    let (nb_rows, nb_cols) = cm.dim();
    let mut probas = ConfusionMatrix::new(nb_rows, nb_cols);
    probas.cells.reserve(cm.nb_occupied());
    let mut cols = Array1::<f64>::zeros(nb_cols);
    let mut rows = Array1::<f64>::zeros(nb_rows);
    if total > 0. {
        for (i, j, v) in cm.iter() {
            let p = v / total;
            probas.cells.insert((i, j), p);
            cols[j] += p;
            rows[i] += p;
        }
    }
    NormalizedConfusion { probas, cols, rows }
} // end of normalize

/// upper bound of a binomial proportion (Clopper-Pearson), exceeded with probability risk.
pub fn clopper_pearson_upper(successes: u64, trials: u64, risk: f64) -> Result<f64> {
    if successes >= trials {
        return Ok(1.);
    }
    let beta = Beta::new((trials - successes) as f64, (successes + 1) as f64)
        .map_err(|e| GecmiError::Statistics(format!("{:?}", e)))?;
    Ok(1. - beta.inverse_cdf(risk))
}

//=====================================================================================

/// The result of an evaluation.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// statistical error bound achieved on nmi_max
    pub error_bound: f64,
    /// mutual information normalized by max of entropies
    pub nmi_max: f64,
    /// mutual information normalized by sqrt of product of entropies
    pub nmi_sqrt: f64,
}

impl Evaluation {
    #[cfg_attr(doc, katexit::katexit)]
    /// fair nmi, penalizes clusterizations with different number of clusters.
    /// returns $ NMI_{max} \exp \left( - \frac{|c_1 - c_2|}{max(c_1, c_2)} \right) $
    pub fn fnmi(&self, nb_modules_a: usize, nb_modules_b: usize) -> f64 {
        let (c1, c2) = (nb_modules_a as f64, nb_modules_b as f64);
        let cmax = c1.max(c2);
        if cmax <= 0. {
            return self.nmi_max;
        }
        self.nmi_max * (-(c1 - c2).abs() / cmax).exp()
    }
}

//=====================================================================================

#[cfg_attr(doc, katexit::katexit)]
/// Joint probability of modules $ p_{ij} $ with its marginals.
/// Rows are modules of the first clusterization, columns modules of the second one.
///
/// - $ H_{row} = - \sum_{i} p_{i.} \log_2 p_{i.} $ and $ H_{col} = - \sum_{j} p_{.j} \log_2 p_{.j} $
/// - $ I = \sum_{i,j} p_{ij} \log_2 \frac{p_{ij}}{p_{i.} p_{.j}} $
///
/// When $ I $ vanishes, the normalized versions are 1 if both entropies vanish too (same single cluster),
/// 0 otherwise.
pub struct NormalizedConfusion {
    probas: ConfusionMatrix,
    // marginal of columns (second clusterization)
    cols: Array1<f64>,
    // marginal of rows (first clusterization)
    rows: Array1<f64>,
}

impl NormalizedConfusion {
    pub fn get_probas(&self) -> &ConfusionMatrix {
        &self.probas
    }

    pub fn get_cols(&self) -> ArrayView1<f64> {
        self.cols.view()
    }

    pub fn get_rows(&self) -> ArrayView1<f64> {
        self.rows.view()
    }

    /// entropy of second clusterization
    pub fn col_entropy(&self) -> f64 {
        entropy(self.cols.view())
    }

    /// entropy of first clusterization
    pub fn row_entropy(&self) -> f64 {
        entropy(self.rows.view())
    }

    pub fn unnormalized_mi(&self) -> f64 {
        self.probas.iter().fold(0., |acc, (i, j, p)| {
            acc + p * zlog(p / (self.cols[j] * self.rows[i]))
        })
    }

    // tolerance on vanishing entropies
    fn agg_eps(&self) -> f64 {
        self.cols.len().max(self.rows.len()) as f64 * EPS
    }

    fn degenerate(&self, h_col: f64, h_row: f64) -> f64 {
        let agg_eps = self.agg_eps();
        if h_col >= agg_eps || h_row >= agg_eps { 0. } else { 1. }
    }

    // unmi over max of entropies, degenerate value if unmi vanishes
    fn max_normalized(&self, unmi: f64, h_col: f64, h_row: f64) -> f64 {
        if unmi >= EPS {
            unmi / h_col.max(h_row)
        } else {
            self.degenerate(h_col, h_row)
        }
    }

    fn sqrt_normalized(&self, unmi: f64, h_col: f64, h_row: f64) -> f64 {
        if unmi >= EPS {
            unmi / (h_col * h_row).sqrt()
        } else {
            self.degenerate(h_col, h_row)
        }
    }

    #[cfg_attr(doc, katexit::katexit)]
    /// returns $ \frac{I}{max(H_{row}, H_{col})} $
    pub fn nmi_max(&self) -> f64 {
        let (h_col, h_row) = (self.col_entropy(), self.row_entropy());
        self.max_normalized(self.unnormalized_mi(), h_col, h_row)
    }

    #[cfg_attr(doc, katexit::katexit)]
    /// returns $ \frac{I}{\sqrt{H_{row} H_{col}}} $
    pub fn nmi_sqrt(&self) -> f64 {
        let (h_col, h_row) = (self.col_entropy(), self.row_entropy());
        self.sqrt_normalized(self.unnormalized_mi(), h_col, h_row)
    }

    #[cfg_attr(doc, katexit::katexit)]
    /// Computes both nmi and a bound of the error on nmi_max.
    ///
    /// For each occupied cell with probability $p$ among $n$ = total_events trials, we replace $p$ by
    /// its Clopper-Pearson upper bound $p'$ at the given risk, propagate the change to the row and column
    /// marginals and entropies of this cell only, and get the nmi value $v'$ we would have.
    /// The error bound is $ \sqrt{ \sum_{cells} (v' - NMI_{max})^2 } $.
    ///
    /// Returns an error if nmi_max is not positive (one clusterization is a single cluster for example),
    /// as such a value says nothing about similarity.
    pub fn evaluate(&self, total_events: f64, risk: f64) -> Result<Evaluation> {
        check_unit_interval("risk", risk)?;
        //
        let (h_col, h_row) = (self.col_entropy(), self.row_entropy());
        let unmi = self.unnormalized_mi();
        let nmi = self.max_normalized(unmi, h_col, h_row);
        log::debug!(
            "evaluate, h_col : {:.3e}, h_row : {:.3e}, unmi : {:.3e}, nmi : {:.3e}",
            h_col,
            h_row,
            unmi,
            nmi
        );
        // For some cases, for example when one of the collections is a single cluster,
        // nmi is 0 whatever the clusters of the other collection.
        if !(nmi > 0.) {
            return Err(GecmiError::NotApplicable(format!(
                "nmi = {:.3e}, which says nothing about the similarity",
                nmi
            )));
        }
        let nmi_sqrt = self.sqrt_normalized(unmi, h_col, h_row);
        //
        let trials = total_events.round().max(1.) as u64;
        let cells: Vec<(usize, usize, f64)> = self.probas.iter().collect();
        let s2 = cells
            .par_iter()
            .map(|&(i, j, p)| -> Result<f64> {
                let successes = ((p * trials as f64).floor() as u64).min(trials);
                let pp = clopper_pearson_upper(successes, trials, risk)?;
                // marginals with p replaced by pp
                let col_used = self.cols[j];
                let row_used = self.rows[i];
                let col_new = col_used - p + pp;
                let row_new = row_used - p + pp;
                // swap entropy terms of column j and row i. note inversion of signs
                let h_col_new = h_col + col_used * zlog(col_used) - col_new * zlog(col_new);
                let h_row_new = h_row + row_used * zlog(row_used) - row_new * zlog(row_new);
                // swap the cell summand in mutual information
                let old_summand = p * zlog(p / (col_used * row_used));
                let new_summand = pp * zlog(pp / (col_new * row_new));
                let ni = unmi - old_summand + new_summand;
                let nv = if ni >= EPS {
                    ni / h_col_new.max(h_row_new)
                } else {
                    self.degenerate(h_col, h_row)
                };
                Ok((nv - nmi) * (nv - nmi))
            })
            .try_reduce(|| 0., |a, b| Ok(a + b))?;
        //
        Ok(Evaluation {
            error_bound: s2.sqrt(),
            nmi_max: nmi,
            nmi_sqrt,
        })
    } // end of evaluate

    /// logs entropies and information
    pub fn dump_entropies(&self) {
        log::info!(" row entropy : {:.3e}", self.row_entropy());
        log::info!(" col entropy : {:.3e}", self.col_entropy());
        log::info!(" information : {:.3e}", self.unnormalized_mi());
    }
} // end of impl NormalizedConfusion

//=====================================================================================

// end of mod tests
