use std::collections::HashMap;

use nalgebra::DMatrix;

use crate::algorithm::convolution::{project_on_grid, self_convolution};
use crate::chemistry::elements::{Isotope, NaturalAbundance, NaturalAbundanceTable};
use crate::chemistry::sum_formula::SumFormula;
use crate::error::CorrectionError;

/// Correction matrix of a tracer for the natural abundance of its own element.
///
/// Rows are observed label indices, columns true label indices. Column `j`
/// holds the label distribution of the `n - j` atoms that did not take up
/// the tracer, moved down by `j`. For tracers more than one mass unit above
/// the lightest isotope the single atom distribution is first reduced to the
/// label grid. An element absent from `formula` gives the 1x1 identity.
///
/// Arguments:
///
/// * `formula` - sum formula of the fragment
/// * `tracer` - tracer isotope
/// * `na` - natural abundance vector of the tracer element
///
/// Returns:
///
/// * `Result<DMatrix<f64>, CorrectionError>` - lower triangular, column stochastic
///   matrix of size `n + 1`, a configuration error if `tracer` is not a heavy isotope
///
/// # Examples
///
/// ```
/// use nacore::algorithm::matrix::build_matrix;
/// use nacore::chemistry::elements::{Isotope, NaturalAbundance};
/// use nacore::chemistry::sum_formula::SumFormula;
///
/// let formula = SumFormula::parse("C2H6O").unwrap();
/// let na = NaturalAbundance::new("C", vec![0.99, 0.01]).unwrap();
/// let matrix = build_matrix(&formula, &Isotope::new("C", 13), &na).unwrap();
///
/// assert_eq!(matrix.nrows(), 3);
/// assert!((matrix[(0, 0)] - 0.9801).abs() < 1e-12);
/// assert!((matrix[(1, 0)] - 0.0198).abs() < 1e-12);
/// assert_eq!(matrix[(0, 1)], 0.0);
/// ```
pub fn build_matrix(formula: &SumFormula, tracer: &Isotope, na: &NaturalAbundance) -> Result<DMatrix<f64>, CorrectionError> {
    let shift = label_shift(tracer)?;
    Ok(tracer_matrix(formula.count(tracer.element()), &na.on_label_grid(shift)))
}

/// Correction matrix of a non-tracer element acting along the axis of `tracer`.
///
/// Every column holds the mass shift distribution of all atoms of the element,
/// reduced to the tracer's label grid. On an `O18` axis only shifts of +2, +4, ...
/// count as labels, odd shifts are observed as the unlabeled ion. An element
/// absent from `formula` gives the identity of size `dim`.
pub fn build_interference_matrix(
    formula: &SumFormula,
    element: &str,
    na: &NaturalAbundance,
    tracer: &Isotope,
    dim: usize,
) -> Result<DMatrix<f64>, CorrectionError> {
    let shift = label_shift(tracer)?;
    Ok(interference_matrix(formula.count(element), na.probabilities(), dim, shift))
}

/// Mass units between two neighbouring labels of `tracer`.
pub fn label_shift(tracer: &Isotope) -> Result<usize, CorrectionError> {
    tracer.mass_shift().ok_or_else(|| {
        CorrectionError::configuration(tracer.element(), format!("{} is not a heavy isotope", tracer))
    })
}

pub fn tracer_matrix(atoms: u32, dist: &[f64]) -> DMatrix<f64> {
    let dim = atoms as usize + 1;
    let mut matrix = DMatrix::zeros(dim, dim);
    for j in 0..dim {
        let column = self_convolution(dist, atoms - j as u32);
        place_column(&mut matrix, j, &column);
    }
    matrix
}

/// Interference matrix of `atoms` atoms with single atom distribution `dist` on
/// a label grid `shift` mass units wide.
pub fn interference_matrix(atoms: u32, dist: &[f64], dim: usize, shift: usize) -> DMatrix<f64> {
    let mut matrix = DMatrix::zeros(dim, dim);
    let column = project_on_grid(&self_convolution(dist, atoms), shift);
    for j in 0..dim {
        place_column(&mut matrix, j, &column);
    }
    matrix
}

// shifts that run past the last label are observed as the last label
fn place_column(matrix: &mut DMatrix<f64>, j: usize, dist: &[f64]) {
    let last = matrix.nrows() - 1;
    for (shift, p) in dist.iter().enumerate() {
        matrix[((j + shift).min(last), j)] += p;
    }
}

/// Forward composite of correction steps given in correction order.
///
/// Correcting with `matrices[0]` first, then `matrices[1]` and so on is the same
/// as correcting once with `matrices[0] * matrices[1] * ...`.
pub fn compose_matrices(dim: usize, matrices: &[DMatrix<f64>]) -> Result<DMatrix<f64>, CorrectionError> {
    matrices.iter().try_fold(DMatrix::identity(dim, dim), |acc, matrix| {
        if matrix.nrows() != dim || matrix.ncols() != dim {
            return Err(CorrectionError::Dimension {
                expected: dim,
                found: matrix.nrows(),
            });
        }
        Ok(acc * matrix)
    })
}

/// Identity of a cached correction matrix.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MatrixKey {
    /// Self correction of a tracer with `atoms` atoms in the formula.
    Tracer { isotope: Isotope, atoms: u32 },
    /// Correction for `atoms` atoms of a non-tracer element along an axis of size
    /// `dim` whose labels are `shift` mass units apart.
    Interference { element: String, atoms: u32, dim: usize, shift: usize },
}

impl MatrixKey {
    pub fn element(&self) -> &str {
        match self {
            MatrixKey::Tracer { isotope, .. } => isotope.element(),
            MatrixKey::Interference { element, .. } => element,
        }
    }
}

/// Correction matrices memoized by [`MatrixKey`].
///
/// Filled through [`MatrixCache::insert`] before a batch runs, read through
/// [`MatrixCache::get`] from any number of threads afterwards.
#[derive(Clone, Debug)]
pub struct MatrixCache {
    abundances: NaturalAbundanceTable,
    matrices: HashMap<MatrixKey, DMatrix<f64>>,
}

impl MatrixCache {
    pub fn new(abundances: NaturalAbundanceTable) -> Self {
        MatrixCache {
            abundances,
            matrices: HashMap::new(),
        }
    }

    /// Builds the matrix for `key` unless it is cached already.
    pub fn insert(&mut self, key: MatrixKey) -> Result<&DMatrix<f64>, CorrectionError> {
        if !self.matrices.contains_key(&key) {
            let matrix = self.build(&key)?;
            tracing::debug!(?key, size = matrix.nrows(), "built correction matrix");
            self.matrices.insert(key.clone(), matrix);
        }
        Ok(&self.matrices[&key])
    }

    pub fn get(&self, key: &MatrixKey) -> Option<&DMatrix<f64>> {
        self.matrices.get(key)
    }

    pub fn len(&self) -> usize {
        self.matrices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matrices.is_empty()
    }

    fn build(&self, key: &MatrixKey) -> Result<DMatrix<f64>, CorrectionError> {
        let na = self.abundances.require(key.element())?;
        match key {
            MatrixKey::Tracer { isotope, atoms } => Ok(tracer_matrix(*atoms, &na.on_label_grid(label_shift(isotope)?))),
            MatrixKey::Interference { element, atoms, dim, shift } => {
                if *shift == 0 {
                    return Err(CorrectionError::configuration(element.as_str(), "label grid has zero width"));
                }
                Ok(interference_matrix(*atoms, na.probabilities(), *dim, *shift))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn na(element: &str) -> NaturalAbundance {
        NaturalAbundanceTable::default().get(element).unwrap().clone()
    }

    fn assert_column_stochastic(matrix: &DMatrix<f64>) {
        for j in 0..matrix.ncols() {
            let sum: f64 = matrix.column(j).iter().sum();
            assert!((sum - 1.0).abs() < 1e-12, "column {} sums to {}", j, sum);
        }
    }

    fn assert_lower_triangular(matrix: &DMatrix<f64>) {
        for i in 0..matrix.nrows() {
            for j in (i + 1)..matrix.ncols() {
                assert_eq!(matrix[(i, j)], 0.0);
            }
        }
    }

    #[test]
    fn test_tracer_matrix_two_atoms() {
        let formula = SumFormula::parse("C2H4O2").unwrap();
        let carbon = NaturalAbundance::new("C", vec![0.99, 0.01]).unwrap();
        let matrix = build_matrix(&formula, &Isotope::new("C", 13), &carbon).unwrap();

        let expected = DMatrix::from_row_slice(3, 3, &[
            0.9801, 0.0, 0.0,
            0.0198, 0.99, 0.0,
            0.0001, 0.01, 1.0,
        ]);
        assert!((matrix - expected).abs().max() < 1e-12);
    }

    #[test]
    fn test_absent_element_is_identity() {
        let formula = SumFormula::parse("C3H3O3").unwrap();
        let matrix = build_matrix(&formula, &Isotope::new("N", 15), &na("N")).unwrap();
        assert_eq!(matrix, DMatrix::identity(1, 1));

        let interference = build_interference_matrix(&formula, "S", &na("S"), &Isotope::new("C", 13), 4).unwrap();
        assert_eq!(interference, DMatrix::identity(4, 4));
    }

    #[test]
    fn test_matrices_are_column_stochastic_and_triangular() {
        let formula = SumFormula::parse("C6H7O7S2").unwrap();
        for (element, mass) in [("C", 13), ("H", 2), ("O", 18), ("S", 34)] {
            let isotope = Isotope::new(element, mass);
            let tracer = build_matrix(&formula, &isotope, &na(element)).unwrap();
            assert_column_stochastic(&tracer);
            assert_lower_triangular(&tracer);

            let interference = build_interference_matrix(&formula, element, &na(element), &isotope, 7).unwrap();
            assert_column_stochastic(&interference);
            assert_lower_triangular(&interference);
        }
    }

    #[test]
    fn test_interference_matrices_commute() {
        let formula = SumFormula::parse("C5H8NO4").unwrap();
        let carbon = Isotope::new("C", 13);
        let hydrogen = build_interference_matrix(&formula, "H", &na("H"), &carbon, 6).unwrap();
        let oxygen = build_interference_matrix(&formula, "O", &na("O"), &carbon, 6).unwrap();

        let ho = compose_matrices(6, &[hydrogen.clone(), oxygen.clone()]).unwrap();
        let oh = compose_matrices(6, &[oxygen, hydrogen]).unwrap();
        assert!((&ho - &oh).abs().max() < 1e-14);

        // the composite is the matrix of the joint H and O shift distribution
        let joint = crate::algorithm::convolution::convolve(
            &self_convolution(na("H").probabilities(), 8),
            &self_convolution(na("O").probabilities(), 4),
        );
        assert!((ho - interference_matrix(1, &joint, 6, 1)).abs().max() < 1e-14);
    }

    #[test]
    fn test_compose_rejects_wrong_size() {
        let matrices = vec![DMatrix::identity(3, 3), DMatrix::identity(2, 2)];
        assert!(matches!(
            compose_matrices(3, &matrices),
            Err(CorrectionError::Dimension { expected: 3, found: 2 })
        ));
    }

    #[test]
    fn test_cache_builds_once() {
        let mut cache = MatrixCache::new(NaturalAbundanceTable::default());
        let key = MatrixKey::Tracer { isotope: Isotope::new("C", 13), atoms: 5 };
        cache.insert(key.clone()).unwrap();
        cache.insert(key.clone()).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key).unwrap().nrows(), 6);

        let oxygen_tracer = MatrixKey::Tracer { isotope: Isotope::new("O", 18), atoms: 2 };
        let matrix = cache.insert(oxygen_tracer).unwrap();
        assert!((matrix[(1, 0)] - 2.0 * 0.00205 * (1.0 - 0.00205)).abs() < 1e-12);

        let unknown = MatrixKey::Interference { element: "Xe".to_string(), atoms: 1, dim: 2, shift: 1 };
        assert!(cache.insert(unknown).is_err());

        let flat = MatrixKey::Interference { element: "C".to_string(), atoms: 1, dim: 2, shift: 0 };
        assert!(cache.insert(flat).is_err());
    }

    #[test]
    fn test_build_matrix_rejects_light_tracer() {
        let formula = SumFormula::parse("C3H3O3").unwrap();
        assert!(build_matrix(&formula, &Isotope::new("C", 12), &na("C")).is_err());
    }

    #[test]
    fn test_interference_on_oxygen_axis_uses_even_shifts() {
        // glucose on an O18 axis, six oxygens give labels 0..=6
        let formula = SumFormula::parse("C6H12O6").unwrap();
        let oxygen = Isotope::new("O", 18);
        let matrix = build_interference_matrix(&formula, "C", &na("C"), &oxygen, 7).unwrap();
        assert_column_stochastic(&matrix);
        assert_lower_triangular(&matrix);

        let (p, q) = (0.0107f64, 0.9893f64);
        let two_heavy = 15.0 * p.powi(2) * q.powi(4);
        let four_heavy = 15.0 * p.powi(4) * q.powi(2);
        let six_heavy = p.powi(6);
        assert!((matrix[(1, 0)] - two_heavy).abs() < 1e-14);
        assert!((matrix[(2, 0)] - four_heavy).abs() < 1e-16);
        assert!((matrix[(3, 0)] - six_heavy).abs() < 1e-18);
        assert!((matrix[(0, 0)] - (1.0 - two_heavy - four_heavy - six_heavy)).abs() < 1e-14);
        // odd shifts stay on the unlabeled row
        assert!(matrix[(0, 0)] > q.powi(6) + 6.0 * p * q.powi(5) - 1e-12);
        assert!((matrix[(2, 1)] - two_heavy).abs() < 1e-14);

        let mut cache = MatrixCache::new(NaturalAbundanceTable::default());
        let key = MatrixKey::Interference { element: "C".to_string(), atoms: 6, dim: 7, shift: 2 };
        let cached = cache.insert(key).unwrap();
        assert!((cached - &matrix).abs().max() < 1e-15);

        let tracer = build_matrix(&formula, &oxygen, &na("O")).unwrap();
        let key = MatrixKey::Tracer { isotope: oxygen, atoms: 6 };
        assert!((cache.insert(key).unwrap() - tracer).abs().max() < 1e-15);
    }

    #[test]
    fn test_interference_on_unit_axis_keeps_every_shift() {
        let formula = SumFormula::parse("C2H6O").unwrap();
        let matrix = build_interference_matrix(&formula, "H", &na("H"), &Isotope::new("C", 13), 3).unwrap();
        let expected = self_convolution(na("H").probabilities(), 6);
        assert!((matrix[(0, 0)] - expected[0]).abs() < 1e-15);
        assert!((matrix[(1, 0)] - expected[1]).abs() < 1e-15);
    }
}
