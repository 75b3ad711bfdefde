use std::collections::BTreeMap;

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};

use crate::algorithm::correction::{correct_tensor, CorrectionPlan};
use crate::algorithm::enrichment::fractional_enrichment;
use crate::algorithm::matrix::MatrixCache;
use crate::algorithm::postprocess::clamp;
use crate::algorithm::solver::Solver;
use crate::chemistry::elements::{Isotope, NaturalAbundanceTable};
use crate::chemistry::label::IsotopeLabel;
use crate::chemistry::sum_formula::SumFormula;
use crate::config::CorrectionConfig;
use crate::data::batch::Batch;
use crate::data::fragment::{Fragment, IntensityRecord, SampleKey};
use crate::data::tensor::LabelTensor;
use crate::error::{CorrectionError, CorrectionWarning, WarningKind};

/// One corrected intensity in long form, ready for a tabular writer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CorrectedRecord {
    pub fragment: Fragment,
    pub label: String,
    pub sample: String,
    pub intensity: f64,
    pub enrichment: f64,
}

/// Corrected tensors and enrichments of a batch, plus everything that went wrong on the way.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrectionResult {
    pub tracers: Vec<Isotope>,
    pub corrected: BTreeMap<SampleKey, LabelTensor>,
    pub enrichment: BTreeMap<SampleKey, f64>,
    pub warnings: Vec<CorrectionWarning>,
}

impl CorrectionResult {
    /// Flattens the corrected tensors into one record per label, fragment and sample.
    ///
    /// Labels use the canonical form, e.g. `C13_2_N15_0`.
    pub fn to_records(&self) -> Vec<CorrectedRecord> {
        self.corrected
            .iter()
            .flat_map(|(key, tensor)| {
                let enrichment = self.enrichment.get(key).copied().unwrap_or(0.0);
                tensor
                    .positions()
                    .zip(tensor.values().iter())
                    .map(move |(position, &intensity)| CorrectedRecord {
                        fragment: key.fragment.clone(),
                        label: IsotopeLabel::from_position(&self.tracers, &position).to_string(),
                        sample: key.sample.clone(),
                        intensity,
                        enrichment,
                    })
            })
            .collect()
    }

    pub fn get(&self, fragment: &Fragment, sample: &str) -> Option<&LabelTensor> {
        self.corrected.get(&SampleKey::new(fragment.clone(), sample))
    }

    pub fn enrichment_of(&self, fragment: &Fragment, sample: &str) -> Option<f64> {
        self.enrichment.get(&SampleKey::new(fragment.clone(), sample)).copied()
    }
}

/// A validated configuration, ready to correct any number of batches.
pub struct CorrectionEngine {
    config: CorrectionConfig,
    tracers: Vec<Isotope>,
    correction_map: Vec<Vec<String>>,
    abundances: NaturalAbundanceTable,
    solver: Box<dyn Solver>,
}

impl CorrectionEngine {
    /// Validates `config`.
    ///
    /// Fails if the tracer list is missing or malformed, if the correction map
    /// names an element that is not a tracer, if a natural abundance vector is
    /// malformed or if a tracer or listed element has none.
    pub fn new(config: CorrectionConfig) -> Result<Self, CorrectionError> {
        let tracers = config.tracers()?;
        let correction_map = config.correction_map(&tracers)?;
        let abundances = config.abundance_table()?;

        for tracer in &tracers {
            abundances.require(tracer.element())?;
        }
        for element in correction_map.iter().flatten() {
            abundances.require(element)?;
        }

        let solver = config.solver();
        Ok(CorrectionEngine {
            config,
            tracers,
            correction_map,
            abundances,
            solver,
        })
    }

    pub fn config(&self) -> &CorrectionConfig {
        &self.config
    }

    pub fn tracers(&self) -> &[Isotope] {
        &self.tracers
    }

    pub fn plan(&self, formula: &SumFormula) -> CorrectionPlan {
        CorrectionPlan::for_formula(formula, &self.tracers, &self.correction_map)
    }

    /// Corrects a batch of raw intensities.
    ///
    /// Records are grouped into one tensor per fragment and sample, background
    /// samples are subtracted, every tensor is corrected along each tracer axis,
    /// clamped if configured and summarized by its fractional enrichment.
    /// Problems with single fragments end up in the result's warnings.
    ///
    /// # Examples
    ///
    /// ```
    /// use nacore::data::fragment::{Fragment, IntensityRecord};
    /// use nacore::{CorrectionConfig, CorrectionEngine};
    ///
    /// let mut config = CorrectionConfig::new(&["C13"]);
    /// config.optimize = false;
    /// config.natural_abundance.insert("C".to_string(), vec![0.99, 0.01]);
    ///
    /// let ethanol = Fragment::metabolite("Ethanol", "C2H6O");
    /// let records = vec![IntensityRecord::new(ethanol.clone(), "C13_0", "S1", 100.0)];
    ///
    /// let result = CorrectionEngine::new(config).unwrap().run(&records).unwrap();
    /// let corrected = result.get(&ethanol, "S1").unwrap();
    /// assert!((corrected.values()[0] - 100.0 / (0.99 * 0.99)).abs() < 1e-9);
    /// ```
    pub fn run(&self, records: &[IntensityRecord]) -> Result<CorrectionResult, CorrectionError> {
        if records.is_empty() {
            return Err(CorrectionError::EmptyInput);
        }

        let span = tracing::info_span!(
            "natural_abundance_correction",
            records = records.len(),
            tracers = %self.config.tracer_isotopes.join(","),
            optimize = self.config.optimize
        );
        let _enter = span.enter();

        let mut batch = Batch::group(records, &self.tracers);
        batch.subtract_background(&self.config.background_samples);
        let mut warnings = std::mem::take(&mut batch.warnings);

        let mut cache = MatrixCache::new(self.abundances.clone());
        let mut plans: BTreeMap<&Fragment, CorrectionPlan> = BTreeMap::new();
        for (fragment, group) in &batch.groups {
            let plan = self.plan(&group.formula);
            for key in plan.keys() {
                cache.insert(key.clone())?;
            }
            warnings.extend(plan.warnings.iter().map(|kind| {
                CorrectionWarning::new(Some(fragment.name.as_str()), None, kind.clone()).logged()
            }));
            plans.insert(fragment, plan);
        }
        tracing::debug!(fragments = plans.len(), matrices = cache.len(), "prepared correction plans");

        let jobs: Vec<(&Fragment, &CorrectionPlan, &String, &LabelTensor)> = batch
            .groups
            .iter()
            .flat_map(|(fragment, group)| {
                let plan = &plans[fragment];
                group.samples.iter().map(move |(sample, tensor)| (fragment, plan, sample, tensor))
            })
            .collect();

        let pool = ThreadPoolBuilder::new().num_threads(self.config.num_threads).build()?;
        let cache = &cache;
        let solver = self.solver.as_ref();
        let replace_negatives = self.config.replace_negatives;

        let outcomes: Vec<(SampleKey, Option<(LabelTensor, f64)>, Vec<CorrectionWarning>)> = pool.install(|| {
            jobs.par_iter()
                .map(|&(fragment, plan, sample, tensor)| {
                    let key = SampleKey::new(fragment.clone(), sample);
                    let warn = |kind: WarningKind| {
                        CorrectionWarning::new(Some(fragment.name.as_str()), Some(sample.as_str()), kind).logged()
                    };

                    match correct_tensor(tensor.clone(), plan, cache, solver) {
                        Ok((corrected, kinds)) => {
                            let corrected = clamp(corrected, replace_negatives);
                            let enrichment = fractional_enrichment(&corrected);
                            (key, Some((corrected, enrichment)), kinds.into_iter().map(warn).collect())
                        }
                        Err(CorrectionError::Dimension { expected, found }) => {
                            (key, None, vec![warn(WarningKind::DimensionMismatch { expected, found })])
                        }
                        Err(err) => {
                            let reason = err.to_string();
                            (key, None, vec![warn(WarningKind::InvalidRecord { reason })])
                        }
                    }
                })
                .collect()
        });

        let mut result = CorrectionResult {
            tracers: self.tracers.clone(),
            ..Default::default()
        };
        for (key, outcome, notes) in outcomes {
            if let Some((corrected, enrichment)) = outcome {
                result.enrichment.insert(key.clone(), enrichment);
                result.corrected.insert(key, corrected);
            }
            warnings.extend(notes);
        }
        result.warnings = warnings;

        tracing::info!(
            fragments = batch.groups.len(),
            corrected = result.corrected.len(),
            warnings = result.warnings.len(),
            "natural abundance correction finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct_config(tracers: &[&str]) -> CorrectionConfig {
        let mut config = CorrectionConfig::new(tracers);
        config.optimize = false;
        config.replace_negatives = false;
        config
    }

    #[test]
    fn test_empty_input() {
        let engine = CorrectionEngine::new(CorrectionConfig::new(&["C13"])).unwrap();
        assert!(matches!(engine.run(&[]), Err(CorrectionError::EmptyInput)));
    }

    #[test]
    fn test_configuration_errors() {
        assert!(CorrectionEngine::new(CorrectionConfig::default()).is_err());

        let mut unknown_element = CorrectionConfig::new(&["C13"]);
        unknown_element.element_correction_map.insert("C".to_string(), vec!["Xe".to_string()]);
        assert!(matches!(
            CorrectionEngine::new(unknown_element),
            Err(CorrectionError::Configuration { element, .. }) if element == "Xe"
        ));

        let mut malformed = CorrectionConfig::new(&["C13"]);
        malformed.natural_abundance.insert("C".to_string(), vec![0.5, 0.6]);
        assert!(CorrectionEngine::new(malformed).is_err());
    }

    #[test]
    fn test_low_abundance_two_atoms() {
        let mut config = direct_config(&["C13"]);
        config.natural_abundance.insert("C".to_string(), vec![0.99, 0.01]);
        let engine = CorrectionEngine::new(config).unwrap();

        let fragment = Fragment::metabolite("X", "C2");
        let records = vec![
            IntensityRecord::new(fragment.clone(), "C13_0", "S1", 100.0),
            IntensityRecord::new(fragment.clone(), "C13_1", "S1", 0.0),
            IntensityRecord::new(fragment.clone(), "C13_2", "S1", 0.0),
        ];
        let result = engine.run(&records).unwrap();
        assert!(result.warnings.is_empty());

        let corrected = result.get(&fragment, "S1").unwrap().values().to_vec();
        assert!((corrected[0] - 100.0 / (0.99 * 0.99)).abs() < 1e-9);
        assert!(corrected[1] < 0.0 && corrected[1] > -3.0);

        // forward application reproduces the observed values
        let matrix = crate::algorithm::matrix::tracer_matrix(2, &[0.99, 0.01]);
        let reproduced = matrix * nalgebra::DVector::from_vec(corrected);
        assert!((reproduced[0] - 100.0).abs() < 1e-9);
        assert!(reproduced[1].abs() < 1e-9);
        assert!(reproduced[2].abs() < 1e-9);
    }

    #[test]
    fn test_clamping_and_enrichment() {
        let mut config = CorrectionConfig::new(&["C13"]);
        config.optimize = false;
        config.natural_abundance.insert("C".to_string(), vec![0.99, 0.01]);
        let engine = CorrectionEngine::new(config).unwrap();

        let fragment = Fragment::metabolite("X", "C2");
        let records = vec![IntensityRecord::new(fragment.clone(), "C13_0", "S1", 100.0)];
        let result = engine.run(&records).unwrap();

        let corrected = result.get(&fragment, "S1").unwrap();
        assert!(corrected.values().iter().all(|v| *v >= 0.0));
        assert_eq!(corrected.values()[1], 0.0);
        // only the tiny M+2 overshoot of the inversion is left as label
        let enrichment = result.enrichment_of(&fragment, "S1").unwrap();
        assert!(enrichment > 0.0 && enrichment < 1e-3);
    }

    #[test]
    fn test_missing_element_is_a_warning() {
        let mut config = direct_config(&["C13"]);
        config.element_correction_map.insert("C13".to_string(), vec!["S".to_string(), "H".to_string()]);
        let engine = CorrectionEngine::new(config).unwrap();

        let pyruvate = Fragment::metabolite("Pyruvate", "C3H3O3");
        let records = vec![IntensityRecord::new(pyruvate.clone(), "C13_0", "S1", 1000.0)];
        let result = engine.run(&records).unwrap();

        assert!(result.get(&pyruvate, "S1").is_some());
        assert_eq!(
            result.warnings,
            vec![CorrectionWarning::new(
                Some("Pyruvate"),
                None,
                WarningKind::MissingElement { element: "S".to_string(), tracer: "C13".to_string() }
            )]
        );
    }

    #[test]
    fn test_nnls_results_are_nonnegative() {
        let mut config = CorrectionConfig::new(&["C13"]);
        config.replace_negatives = false;
        config.element_correction_map.insert("C".to_string(), vec!["H".to_string(), "O".to_string()]);
        let engine = CorrectionEngine::new(config).unwrap();

        let citrate = Fragment::metabolite("Citrate", "C6H7O7");
        let records: Vec<IntensityRecord> = [5000.0, 10.0, 900.0, 0.0, 40.0, 0.0, 300.0]
            .iter()
            .enumerate()
            .map(|(n, &v)| IntensityRecord::new(citrate.clone(), &format!("C13_{}", n), "S1", v))
            .collect();
        let result = engine.run(&records).unwrap();

        let corrected = result.get(&citrate, "S1").unwrap();
        assert!(corrected.values().iter().all(|v| *v >= 0.0));
        let enrichment = result.enrichment_of(&citrate, "S1").unwrap();
        assert!(enrichment > 0.0 && enrichment < 1.0);
    }

    #[test]
    fn test_to_records_uses_canonical_labels() {
        let engine = CorrectionEngine::new(direct_config(&["C13", "N15"])).unwrap();
        let alanine = Fragment::metabolite("Alanine", "C3H7NO2");
        let records = vec![
            IntensityRecord::new(alanine.clone(), "C13N15-label-0-0", "S1", 900.0),
            IntensityRecord::new(alanine.clone(), "C13N15-label-3-1", "S1", 100.0),
        ];
        let result = engine.run(&records).unwrap();

        let rows = result.to_records();
        assert_eq!(rows.len(), 8);
        assert_eq!(rows[0].label, "C13_0_N15_0");
        assert_eq!(rows[1].label, "C13_0_N15_1");
        assert_eq!(rows[7].label, "C13_3_N15_1");
        assert!(rows.iter().all(|r| r.sample == "S1" && r.fragment == alanine));
        let enrichment = result.enrichment_of(&alanine, "S1").unwrap();
        assert!(rows.iter().all(|r| r.enrichment == enrichment));
    }

    #[test]
    fn test_thread_count_does_not_change_results() {
        let fragments = [
            Fragment::metabolite("Glutamate", "C5H8NO4"),
            Fragment::new("Glutamate 146/41", "C2HO", "Glutamate 146", "C5H8NO4"),
        ];
        let records: Vec<IntensityRecord> = fragments
            .iter()
            .flat_map(|f| {
                (0..4).flat_map(move |s| {
                    (0..3).map(move |n| {
                        IntensityRecord::new(f.clone(), &format!("C13_{}", n), &format!("S{}", s), 100.0 * (n + s + 1) as f64)
                    })
                })
            })
            .collect();

        let mut single = CorrectionConfig::new(&["C13"]);
        single.num_threads = 1;
        single.element_correction_map.insert("C13".to_string(), vec!["H".to_string(), "O".to_string(), "N".to_string()]);
        let mut parallel = single.clone();
        parallel.num_threads = 4;

        let first = CorrectionEngine::new(single).unwrap().run(&records).unwrap();
        let second = CorrectionEngine::new(parallel).unwrap().run(&records).unwrap();
        assert_eq!(first.corrected.len(), 8);
        assert_eq!(first, second);
    }
}
