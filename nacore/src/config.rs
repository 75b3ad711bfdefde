use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::algorithm::solver::{DirectSolver, NnlsSolver, Solver};
use crate::chemistry::elements::{Isotope, NaturalAbundanceTable};
use crate::error::CorrectionError;

/// Settings of the nonnegative least squares solver
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NnlsSettings {
    /// Iteration budget per lane, `None` allows three per label (default: None)
    pub max_iterations: Option<usize>,
    /// Relative tolerance on the gradient and on values treated as zero (default: 1e-10)
    pub tolerance: f64,
}

impl Default for NnlsSettings {
    fn default() -> Self {
        NnlsSettings {
            max_iterations: None,
            tolerance: 1e-10,
        }
    }
}

impl NnlsSettings {
    pub fn solver(&self) -> NnlsSolver {
        NnlsSolver {
            max_iterations: self.max_iterations,
            tolerance: self.tolerance,
        }
    }
}

/// Configuration of one correction batch
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionConfig {
    /// Tracer isotopes in tensor axis order, e.g. `["C13", "N15"]` (default: empty)
    pub tracer_isotopes: Vec<String>,
    /// Per tracer, the non-tracer elements whose natural abundance is removed (default: empty)
    pub element_correction_map: BTreeMap<String, Vec<String>>,
    /// Natural abundance vectors replacing or extending the built-in table (default: empty)
    pub natural_abundance: BTreeMap<String, Vec<f64>>,
    /// Use nonnegative least squares instead of direct inversion (default: true)
    pub optimize: bool,
    /// Set negative corrected intensities to zero (default: true)
    pub replace_negatives: bool,
    /// Nonnegative least squares settings, used when `optimize` is set
    pub nnls: NnlsSettings,
    /// Worker threads, 0 lets rayon decide (default: 0)
    pub num_threads: usize,
    /// Sample name to the name of its background sample (default: empty)
    pub background_samples: BTreeMap<String, String>,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        CorrectionConfig {
            tracer_isotopes: Vec::new(),
            element_correction_map: BTreeMap::new(),
            natural_abundance: BTreeMap::new(),
            optimize: true,
            replace_negatives: true,
            nnls: NnlsSettings::default(),
            num_threads: 0,
            background_samples: BTreeMap::new(),
        }
    }
}

impl CorrectionConfig {
    /// Default configuration for the given tracers without interference correction.
    pub fn new(tracer_isotopes: &[&str]) -> Self {
        CorrectionConfig {
            tracer_isotopes: tracer_isotopes.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Reads a configuration from JSON, fields left out take their default.
    ///
    /// # Examples
    ///
    /// ```
    /// use nacore::CorrectionConfig;
    ///
    /// let config = CorrectionConfig::from_json(r#"{
    ///     "tracer_isotopes": ["C13"],
    ///     "element_correction_map": {"C13": ["H", "O"]},
    ///     "optimize": false
    /// }"#).unwrap();
    ///
    /// assert!(!config.optimize);
    /// assert!(config.replace_negatives);
    /// assert_eq!(config.element_correction_map["C13"], vec!["H", "O"]);
    /// ```
    pub fn from_json(json: &str) -> Result<Self, CorrectionError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, CorrectionError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parsed tracer isotopes in axis order.
    ///
    /// Fails on an empty list, on unparseable entries, on a tracer without a
    /// known heavy isotope and on two tracers of the same element.
    pub fn tracers(&self) -> Result<Vec<Isotope>, CorrectionError> {
        if self.tracer_isotopes.is_empty() {
            return Err(CorrectionError::configuration("-", "no tracer isotopes given"));
        }

        let mut tracers: Vec<Isotope> = Vec::with_capacity(self.tracer_isotopes.len());
        for entry in &self.tracer_isotopes {
            let isotope = Isotope::from_str(entry)?;
            if isotope.mass_shift().is_none() {
                return Err(CorrectionError::configuration(
                    isotope.element(),
                    format!("{} is not a heavy isotope of a known element", isotope),
                ));
            }
            if tracers.iter().any(|t| t.element() == isotope.element()) {
                return Err(CorrectionError::configuration(
                    isotope.element(),
                    "element is listed as tracer more than once",
                ));
            }
            tracers.push(isotope);
        }
        Ok(tracers)
    }

    /// Interference elements per tracer, aligned with `tracers`.
    ///
    /// Keys of `element_correction_map` may name the tracer isotope (`C13`) or
    /// its element (`C`). A key that matches no tracer is an error.
    pub fn correction_map(&self, tracers: &[Isotope]) -> Result<Vec<Vec<String>>, CorrectionError> {
        let mut map = vec![Vec::new(); tracers.len()];
        for (key, elements) in &self.element_correction_map {
            let isotope = Isotope::from_str(key)?;
            let axis = tracers
                .iter()
                .position(|t| t.element() == isotope.element())
                .ok_or_else(|| {
                    CorrectionError::configuration(isotope.element(), format!("{} in correction map is not a tracer", key))
                })?;
            for element in elements {
                if !map[axis].contains(element) {
                    map[axis].push(element.clone());
                }
            }
        }
        Ok(map)
    }

    /// Built-in natural abundance table with the configured overrides applied.
    pub fn abundance_table(&self) -> Result<NaturalAbundanceTable, CorrectionError> {
        NaturalAbundanceTable::with_overrides(&self.natural_abundance)
    }

    pub fn solver(&self) -> Box<dyn Solver> {
        if self.optimize {
            Box::new(self.nnls.solver())
        } else {
            Box::new(DirectSolver)
        }
    }
}
