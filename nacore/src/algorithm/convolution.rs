use statrs::distribution::{Binomial, Discrete};

/// convolve two distributions indexed by nominal mass shift
///
/// Arguments:
///
/// * `dist_a` - first distribution, entry `i` is the probability of a shift of `i`
/// * `dist_b` - second distribution, entry `i` is the probability of a shift of `i`
///
/// Returns:
///
/// * `Vec<f64>` - distribution of the summed shift, of length `len(a) + len(b) - 1`
///
/// # Examples
///
/// ```
/// use nacore::algorithm::convolution::convolve;
///
/// let result = convolve(&[0.5, 0.5], &[0.5, 0.5]);
/// assert_eq!(result, vec![0.25, 0.5, 0.25]);
/// ```
pub fn convolve(dist_a: &[f64], dist_b: &[f64]) -> Vec<f64> {
    if dist_a.is_empty() || dist_b.is_empty() {
        return Vec::new();
    }

    let mut result = vec![0.0; dist_a.len() + dist_b.len() - 1];

    for (i, abundance_a) in dist_a.iter().enumerate() {
        if *abundance_a == 0.0 {
            continue;
        }
        for (j, abundance_b) in dist_b.iter().enumerate() {
            result[i + j] += abundance_a * abundance_b;
        }
    }

    result
}

/// convolve a distribution with itself n times
///
/// Arguments:
///
/// * `dist` - distribution indexed by nominal mass shift
/// * `n` - number of copies in the convolution, i.e. the number of atoms
///
/// Returns:
///
/// * `Vec<f64>` - distribution of the total shift of `n` independent atoms
///
/// # Examples
///
/// ```
/// use nacore::algorithm::convolution::convolve_pow;
///
/// assert_eq!(convolve_pow(&[0.5, 0.5], 0), vec![1.0]);
/// assert_eq!(convolve_pow(&[0.5, 0.5], 2), vec![0.25, 0.5, 0.25]);
/// ```
pub fn convolve_pow(dist: &[f64], n: u32) -> Vec<f64> {
    if n == 0 {
        return vec![1.0]; // Return the delta distribution
    }
    if n == 1 {
        return dist.to_vec();
    }

    let mut result = dist.to_vec();
    let mut power = 2;

    while power <= n {
        result = convolve(&result, &result); // Square the result to get the next power of 2
        power *= 2;
    }

    // If n is not a power of 2, recursively fill in the remainder
    if power / 2 < n {
        result = convolve(&result, &convolve_pow(dist, n - power / 2));
    }

    result
}

/// probability mass function of the number of heavy atoms among `n` atoms
///
/// Arguments:
///
/// * `n` - number of atoms
/// * `p` - probability of a single atom to be heavy
///
/// Returns:
///
/// * `Option<Vec<f64>>` - `n + 1` probabilities, `None` if `p` is not a probability
pub fn binomial_pmf(n: u32, p: f64) -> Option<Vec<f64>> {
    let binomial = Binomial::new(p, n as u64).ok()?;
    Some((0..=n as u64).map(|k| binomial.pmf(k)).collect())
}

/// Distribution of the total mass shift of `n` atoms with single atom distribution `dist`.
///
/// Elements with two isotopes one mass unit apart take the binomial closed form,
/// everything else is convolved.
pub fn self_convolution(dist: &[f64], n: u32) -> Vec<f64> {
    if n == 0 {
        return vec![1.0];
    }
    if dist.len() == 2 {
        if let Some(pmf) = binomial_pmf(n, dist[1]) {
            return pmf;
        }
    }
    convolve_pow(dist, n)
}

/// Reduces a mass shift distribution to the label grid of a tracer whose heavy
/// isotope sits `shift` mass units above the lightest one.
///
/// Entry `m > 0` is the probability of a shift of exactly `m * shift`. Mass that
/// falls between grid points cannot be told apart from an unlabeled ion and is
/// added to entry 0.
///
/// # Examples
///
/// ```
/// use nacore::algorithm::convolution::project_on_grid;
///
/// let grid = project_on_grid(&[0.9, 0.06, 0.03, 0.01], 2);
/// assert_eq!(grid.len(), 2);
/// assert!((grid[0] - 0.97).abs() < 1e-12);
/// assert!((grid[1] - 0.03).abs() < 1e-12);
/// ```
pub fn project_on_grid(dist: &[f64], shift: usize) -> Vec<f64> {
    if shift <= 1 || dist.is_empty() {
        return dist.to_vec();
    }
    let mut grid: Vec<f64> = dist.iter().step_by(shift).copied().collect();
    let heavy: f64 = grid.iter().skip(1).sum();
    grid[0] = 1.0 - heavy;
    grid
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: &[f64], b: &[f64], tolerance: f64) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < tolerance, "{} != {}", x, y);
        }
    }

    #[test]
    fn test_convolve_lengths() {
        let oxygen = [0.99757, 0.00038, 0.00205];
        let result = convolve(&oxygen, &[0.9893, 0.0107]);
        assert_eq!(result.len(), 4);
        assert!((result.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(convolve(&[], &oxygen).is_empty());
    }

    #[test]
    fn test_convolve_pow_matches_repeated_convolution() {
        let oxygen = [0.99757, 0.00038, 0.00205];
        let mut expected = vec![1.0];
        for n in 0..12 {
            assert_close(&convolve_pow(&oxygen, n), &expected, 1e-13);
            expected = convolve(&expected, &oxygen);
        }
    }

    #[test]
    fn test_binomial_fast_path() {
        let carbon = [0.9893, 0.0107];
        for n in [0, 1, 2, 5, 17, 40] {
            assert_close(&self_convolution(&carbon, n), &convolve_pow(&carbon, n), 1e-12);
        }
    }

    #[test]
    fn test_monoisotopic_element() {
        assert_eq!(self_convolution(&[1.0], 9), vec![1.0]);
    }

    #[test]
    fn test_project_on_grid() {
        let carbon = self_convolution(&[0.9893, 0.0107], 6);
        let grid = project_on_grid(&carbon, 2);
        assert_eq!(grid.len(), 4);
        assert!((grid[1] - 15.0 * 0.0107f64.powi(2) * 0.9893f64.powi(4)).abs() < 1e-14);
        assert!((grid.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert_eq!(project_on_grid(&carbon, 1), carbon);
    }

    #[test]
    fn test_binomial_pmf_rejects_invalid_probability() {
        assert!(binomial_pmf(3, 1.5).is_none());
        assert_close(&binomial_pmf(2, 0.0).unwrap(), &[1.0, 0.0, 0.0], 1e-15);
    }
}
