use crate::data::tensor::LabelTensor;

/// Fraction of the total corrected signal carried by labeled isotopologues.
///
/// Every label with at least one heavy tracer atom counts as labeled, which in
/// row-major storage is every entry but the first. A zero total gives 0 and the
/// result is clamped to `[0, 1]`.
///
/// Arguments:
///
/// * `corrected` - corrected intensities of one fragment in one sample
///
/// Returns:
///
/// * `f64` - fractional enrichment
///
/// # Examples
///
/// ```
/// use nacore::algorithm::enrichment::fractional_enrichment;
/// use nacore::data::tensor::LabelTensor;
///
/// let corrected = LabelTensor::from_values(vec![3], vec![75.0, 20.0, 5.0]).unwrap();
/// assert!((fractional_enrichment(&corrected) - 0.25).abs() < 1e-12);
/// ```
pub fn fractional_enrichment(corrected: &LabelTensor) -> f64 {
    let total = corrected.sum();
    if total == 0.0 || !total.is_finite() {
        return 0.0;
    }
    let labeled: f64 = corrected.values().iter().skip(1).sum();
    (labeled / total).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_zero_gives_zero() {
        assert_eq!(fractional_enrichment(&LabelTensor::zeros(vec![4])), 0.0);
    }

    #[test]
    fn test_unlabeled_only() {
        let corrected = LabelTensor::from_values(vec![3], vec![10.0, 0.0, 0.0]).unwrap();
        assert_eq!(fractional_enrichment(&corrected), 0.0);
    }

    #[test]
    fn test_fully_labeled() {
        let corrected = LabelTensor::from_values(vec![2, 2], vec![0.0, 1.0, 2.0, 3.0]).unwrap();
        assert_eq!(fractional_enrichment(&corrected), 1.0);
    }

    #[test]
    fn test_dual_tracer_counts_any_heavy_atom() {
        // C13 axis of size 2, N15 axis of size 2
        let corrected = LabelTensor::from_values(vec![2, 2], vec![50.0, 25.0, 25.0, 0.0]).unwrap();
        assert!((fractional_enrichment(&corrected) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_overshoot_is_clamped() {
        let corrected = LabelTensor::from_values(vec![3], vec![-10.0, 40.0, 20.0]).unwrap();
        assert_eq!(fractional_enrichment(&corrected), 1.0);
    }
}
