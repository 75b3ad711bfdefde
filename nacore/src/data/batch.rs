use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::chemistry::elements::Isotope;
use crate::chemistry::sum_formula::SumFormula;
use crate::data::fragment::{Fragment, IntensityRecord};
use crate::data::tensor::LabelTensor;
use crate::error::{CorrectionWarning, WarningKind};

/// Raw label tensors of one fragment, one per sample the fragment was measured in.
#[derive(Clone, Debug, PartialEq)]
pub struct FragmentGroup {
    pub formula: SumFormula,
    pub shape: Vec<usize>,
    pub samples: BTreeMap<String, LabelTensor>,
}

impl FragmentGroup {
    pub fn new(formula: SumFormula, tracers: &[Isotope]) -> Self {
        let shape = tracers.iter().map(|t| formula.count(t.element()) as usize + 1).collect();
        FragmentGroup { formula, shape, samples: BTreeMap::new() }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }
}

/// Long-form records reshaped into fixed-shape tensors.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Batch {
    pub groups: BTreeMap<Fragment, FragmentGroup>,
    pub warnings: Vec<CorrectionWarning>,
}

impl Batch {
    /// Groups `records` by fragment and sample.
    ///
    /// A fragment gets a tensor for each sample with at least one valid record
    /// for it, labels without a record stay zero. Fragment and sample pairs
    /// absent from the input get no tensor. A repeated (fragment, label, sample) keeps
    /// the later value. Records with a negative or non-finite intensity, an
    /// unparseable label or a label outside the fragment's label space are
    /// dropped, a fragment whose formula cannot be parsed is dropped entirely.
    /// All of these are reported as warnings.
    ///
    /// Arguments:
    ///
    /// * `records` - raw intensities
    /// * `tracers` - tracer isotopes, one tensor axis each
    ///
    /// Returns:
    ///
    /// * `Batch` - grouped tensors and warnings
    ///
    /// # Examples
    ///
    /// ```
    /// use nacore::chemistry::elements::Isotope;
    /// use nacore::data::batch::Batch;
    /// use nacore::data::fragment::{Fragment, IntensityRecord};
    ///
    /// let lactate = Fragment::metabolite("Lactate", "C3H5O3");
    /// let records = vec![
    ///     IntensityRecord::new(lactate.clone(), "C12 PARENT", "S1", 1000.0),
    ///     IntensityRecord::new(lactate.clone(), "C13_3", "S1", 250.0),
    /// ];
    ///
    /// let batch = Batch::group(&records, &[Isotope::new("C", 13)]);
    /// let tensor = &batch.groups[&lactate].samples["S1"];
    /// assert_eq!(tensor.values(), &[1000.0, 0.0, 0.0, 250.0]);
    /// ```
    pub fn group(records: &[IntensityRecord], tracers: &[Isotope]) -> Self {
        let mut batch = Batch::default();
        let mut rejected: BTreeSet<&Fragment> = BTreeSet::new();
        let mut seen: HashSet<(&Fragment, &str, usize)> = HashSet::new();

        for record in records {
            let fragment = &record.fragment;
            if rejected.contains(fragment) {
                continue;
            }

            if !batch.groups.contains_key(fragment) {
                match fragment.sum_formula() {
                    Ok(formula) => {
                        batch.groups.insert(fragment.clone(), FragmentGroup::new(formula, tracers));
                    }
                    Err(err) => {
                        batch.warn(Some(fragment), None, WarningKind::InvalidRecord { reason: err.to_string() });
                        rejected.insert(fragment);
                        continue;
                    }
                }
            }

            if !record.intensity.is_finite() || record.intensity < 0.0 {
                let reason = format!("intensity {} of label {} is not a nonnegative number", record.intensity, record.label);
                batch.warn(Some(fragment), Some(record.sample.as_str()), WarningKind::InvalidRecord { reason });
                continue;
            }

            let shape = batch.groups[fragment].shape();
            let position = match record.parsed_label().and_then(|label| label.position(tracers, shape)) {
                Ok(position) => position,
                Err(err) => {
                    let reason = format!("label {}: {}", record.label, err);
                    batch.warn(Some(fragment), Some(record.sample.as_str()), WarningKind::InvalidRecord { reason });
                    continue;
                }
            };

            if let Some(group) = batch.groups.get_mut(fragment) {
                let tensor = group
                    .samples
                    .entry(record.sample.clone())
                    .or_insert_with(|| LabelTensor::zeros(group.shape.clone()));
                let index = tensor.flat_index(&position);
                tensor.values_mut()[index] = record.intensity;
                if !seen.insert((fragment, record.sample.as_str(), index)) {
                    let kind = WarningKind::DuplicateRecord { label: record.label.clone() };
                    batch.warn(Some(fragment), Some(record.sample.as_str()), kind);
                }
            }
        }

        // fragments whose every record was invalid
        batch.groups.retain(|_, group| !group.samples.is_empty());

        tracing::debug!(
            fragments = batch.groups.len(),
            tensors = batch.len(),
            dropped = batch.warnings.len(),
            "grouped intensity records"
        );
        batch
    }

    /// Subtracts the raw tensor of each sample's background sample and floors at zero.
    ///
    /// All subtractions read the tensors as they were before this call. A
    /// background sample without data leaves the sample as is and is reported.
    pub fn subtract_background(&mut self, background_samples: &BTreeMap<String, String>) {
        if background_samples.is_empty() {
            return;
        }

        let mut warnings = Vec::new();
        for (fragment, group) in self.groups.iter_mut() {
            let raw = group.samples.clone();
            for (sample, tensor) in group.samples.iter_mut() {
                let Some(background) = background_samples.get(sample) else {
                    continue;
                };
                let Some(blank) = raw.get(background) else {
                    let kind = WarningKind::BackgroundUnavailable { background: background.clone() };
                    warnings.push(CorrectionWarning::new(Some(fragment.name.as_str()), Some(sample.as_str()), kind).logged());
                    continue;
                };
                for (value, b) in tensor.values_mut().iter_mut().zip(blank.values().iter()) {
                    *value = (*value - b).max(0.0);
                }
            }
        }
        self.warnings.extend(warnings);
    }

    pub fn len(&self) -> usize {
        self.groups.values().map(|g| g.samples.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn warn(&mut self, fragment: Option<&Fragment>, sample: Option<&str>, kind: WarningKind) {
        let warning = CorrectionWarning::new(fragment.map(|f| f.name.as_str()), sample, kind);
        self.warnings.push(warning.logged());
    }
}
