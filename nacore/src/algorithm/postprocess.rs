use crate::data::tensor::LabelTensor;

/// Replaces negative corrected intensities by zero.
///
/// Nonnegative entries are left untouched and the total is not renormalized.
/// With `enabled == false` the tensor is passed through as is, negatives included.
///
/// # Examples
///
/// ```
/// use nacore::algorithm::postprocess::clamp;
/// use nacore::data::tensor::LabelTensor;
///
/// let corrected = LabelTensor::from_values(vec![3], vec![102.0, -2.1, 0.5]).unwrap();
/// assert_eq!(clamp(corrected.clone(), true).values(), &[102.0, 0.0, 0.5]);
/// assert_eq!(clamp(corrected, false).values(), &[102.0, -2.1, 0.5]);
/// ```
pub fn clamp(mut corrected: LabelTensor, enabled: bool) -> LabelTensor {
    if enabled {
        for value in corrected.values_mut() {
            if *value < 0.0 {
                *value = 0.0;
            }
        }
    }
    corrected
}
