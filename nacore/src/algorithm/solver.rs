use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::CorrectionError;

/// Why a solution is not the plain answer of the requested strategy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SolveNote {
    /// The matrix could not be inverted, `values` are the observed intensities.
    Singular,
    /// NNLS hit its iteration budget, `values` come from the direct solve.
    NotConverged { iterations: usize },
}

/// Corrected intensities of one lane.
#[derive(Clone, Debug, PartialEq)]
pub struct Solution {
    pub values: DVector<f64>,
    pub note: Option<SolveNote>,
}

impl Solution {
    fn exact(values: DVector<f64>) -> Self {
        Solution { values, note: None }
    }
}

/// Strategy that recovers true intensities from `observed = matrix * true`.
pub trait Solver: Send + Sync {
    fn solve(&self, observed: &DVector<f64>, matrix: &DMatrix<f64>) -> Result<Solution, CorrectionError>;
}

fn check_dimensions(observed: &DVector<f64>, matrix: &DMatrix<f64>) -> Result<(), CorrectionError> {
    if matrix.nrows() != matrix.ncols() {
        return Err(CorrectionError::Dimension {
            expected: matrix.nrows(),
            found: matrix.ncols(),
        });
    }
    if observed.len() != matrix.nrows() {
        return Err(CorrectionError::Dimension {
            expected: matrix.nrows(),
            found: observed.len(),
        });
    }
    Ok(())
}

fn direct(observed: &DVector<f64>, matrix: &DMatrix<f64>) -> Solution {
    match matrix.clone().lu().solve(observed) {
        Some(values) if values.iter().all(|v| v.is_finite()) => Solution::exact(values),
        _ => Solution {
            values: observed.clone(),
            note: Some(SolveNote::Singular),
        },
    }
}

/// Exact inversion by LU decomposition, may produce negative intensities.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DirectSolver;

impl Solver for DirectSolver {
    fn solve(&self, observed: &DVector<f64>, matrix: &DMatrix<f64>) -> Result<Solution, CorrectionError> {
        check_dimensions(observed, matrix)?;
        Ok(direct(observed, matrix))
    }
}

/// Nonnegative least squares, always returns physically valid intensities.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NnlsSolver {
    /// Budget of inner iterations, `None` allows three per label.
    pub max_iterations: Option<usize>,
    /// Relative tolerance on the gradient and on values treated as zero.
    pub tolerance: f64,
}

impl Default for NnlsSolver {
    fn default() -> Self {
        NnlsSolver {
            max_iterations: None,
            tolerance: 1e-10,
        }
    }
}

impl Solver for NnlsSolver {
    fn solve(&self, observed: &DVector<f64>, matrix: &DMatrix<f64>) -> Result<Solution, CorrectionError> {
        check_dimensions(observed, matrix)?;
        let max_iterations = self.max_iterations.unwrap_or(3 * matrix.ncols());

        match nnls(matrix, observed, max_iterations, self.tolerance) {
            Ok(values) => Ok(Solution::exact(values)),
            Err(iterations) => {
                let fallback = direct(observed, matrix);
                let note = match fallback.note {
                    Some(SolveNote::Singular) => SolveNote::Singular,
                    _ => SolveNote::NotConverged { iterations },
                };
                Ok(Solution {
                    values: fallback.values,
                    note: Some(note),
                })
            }
        }
    }
}

/// Lawson-Hanson active set method for `min |a x - b|` subject to `x >= 0`.
///
/// Arguments:
///
/// * `a` - system matrix
/// * `b` - right hand side
/// * `max_iterations` - budget of inner iterations
/// * `tolerance` - relative tolerance on the gradient and on values treated as zero
///
/// Returns:
///
/// * `Result<DVector<f64>, usize>` - the solution, or the number of iterations
///   spent when the budget ran out
///
/// # Examples
///
/// ```
/// use nalgebra::{DMatrix, DVector};
/// use nacore::algorithm::solver::nnls;
///
/// let a = DMatrix::identity(2, 2);
/// let b = DVector::from_vec(vec![3.0, -1.0]);
/// let x = nnls(&a, &b, 10, 1e-10).unwrap();
/// assert!((x[0] - 3.0).abs() < 1e-12);
/// assert_eq!(x[1], 0.0);
/// ```
pub fn nnls(a: &DMatrix<f64>, b: &DVector<f64>, max_iterations: usize, tolerance: f64) -> Result<DVector<f64>, usize> {
    let n = a.ncols();
    let at = a.transpose();
    let gradient_tolerance = tolerance * (&at * b).amax().max(1.0);
    let zero_tolerance = tolerance * b.amax().max(1.0);

    let mut x: DVector<f64> = DVector::zeros(n);
    let mut passive = vec![false; n];
    let mut iterations = 0;

    loop {
        let w = &at * (b - a * &x);
        let candidate = (0..n)
            .filter(|&j| !passive[j] && w[j] > gradient_tolerance)
            .max_by(|&i, &j| w[i].total_cmp(&w[j]));
        let Some(entering) = candidate else {
            return Ok(x);
        };
        passive[entering] = true;

        loop {
            if iterations >= max_iterations {
                return Err(iterations);
            }
            iterations += 1;

            let z = passive_least_squares(a, b, &passive).ok_or(iterations)?;
            let blocking: Vec<usize> = (0..n).filter(|&k| passive[k] && z[k] <= 0.0).collect();
            if blocking.is_empty() {
                x = z;
                break;
            }

            let alpha = blocking
                .iter()
                .map(|&k| {
                    let gap = x[k] - z[k];
                    if gap > 0.0 { x[k] / gap } else { 0.0 }
                })
                .fold(f64::INFINITY, f64::min);
            let step = (z - &x) * alpha;
            x += step;

            for k in 0..n {
                if passive[k] && x[k] <= zero_tolerance {
                    passive[k] = false;
                    x[k] = 0.0;
                }
            }
        }
    }
}

// unconstrained least squares on the passive columns, zero elsewhere
fn passive_least_squares(a: &DMatrix<f64>, b: &DVector<f64>, passive: &[bool]) -> Option<DVector<f64>> {
    let columns: Vec<usize> = (0..passive.len()).filter(|&k| passive[k]).collect();
    let sub = a.select_columns(columns.iter());
    let solution = sub.svd(true, true).solve(b, 1e-14).ok()?;

    let mut z: DVector<f64> = DVector::zeros(passive.len());
    for (value, &k) in solution.iter().zip(columns.iter()) {
        z[k] = *value;
    }
    Some(z)
}

/// Solves one lane with the strategy selected by `optimize`.
///
/// `optimize` runs [`NnlsSolver::default`], with its default iteration budget
/// and tolerance. Batches with their own NNLS settings go through
/// `CorrectionConfig::solver`, which builds the solver from `NnlsSettings`.
pub fn solve(observed: &DVector<f64>, matrix: &DMatrix<f64>, optimize: bool) -> Result<Solution, CorrectionError> {
    if optimize {
        NnlsSolver::default().solve(observed, matrix)
    } else {
        DirectSolver.solve(observed, matrix)
    }
}
