use std::fmt;

use serde::{Deserialize, Serialize};

use crate::chemistry::label::IsotopeLabel;
use crate::chemistry::sum_formula::SumFormula;
use crate::error::CorrectionError;

/// A measured ion species, either a whole metabolite or an MS/MS fragment of a parent.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fragment {
    pub name: String,
    pub formula: String,
    pub parent: String,
    pub parent_formula: String,
}

impl Fragment {
    pub fn new(name: &str, formula: &str, parent: &str, parent_formula: &str) -> Self {
        Fragment {
            name: name.to_string(),
            formula: formula.to_string(),
            parent: parent.to_string(),
            parent_formula: parent_formula.to_string(),
        }
    }

    /// A whole-metabolite measurement, its own parent.
    pub fn metabolite(name: &str, formula: &str) -> Self {
        Fragment::new(name, formula, name, formula)
    }

    pub fn is_parent(&self) -> bool {
        self.name == self.parent && self.formula == self.parent_formula
    }

    /// Parses the fragment's own formula, the one that drives correction.
    pub fn sum_formula(&self) -> Result<SumFormula, CorrectionError> {
        SumFormula::parse(&self.formula)
    }

    pub fn parent_sum_formula(&self) -> Result<SumFormula, CorrectionError> {
        SumFormula::parse(&self.parent_formula)
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_parent() {
            write!(f, "{} ({})", self.name, self.formula)
        } else {
            write!(f, "{} ({}) of {} ({})", self.name, self.formula, self.parent, self.parent_formula)
        }
    }
}

/// One raw intensity of one isotopologue of one fragment in one sample.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntensityRecord {
    pub fragment: Fragment,
    pub label: String,
    pub sample: String,
    pub intensity: f64,
}

impl IntensityRecord {
    pub fn new(fragment: Fragment, label: &str, sample: &str, intensity: f64) -> Self {
        IntensityRecord {
            fragment,
            label: label.to_string(),
            sample: sample.to_string(),
            intensity,
        }
    }

    pub fn parsed_label(&self) -> Result<IsotopeLabel, CorrectionError> {
        self.label.parse()
    }
}

/// Key of every per-sample result: fragment identity plus sample name.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SampleKey {
    pub fragment: Fragment,
    pub sample: String,
}

impl SampleKey {
    pub fn new(fragment: Fragment, sample: &str) -> Self {
        SampleKey {
            fragment,
            sample: sample.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_detection() {
        let whole = Fragment::metabolite("Pyruvate 87/87", "C3H3O3");
        assert!(whole.is_parent());

        let daughter = Fragment::new("Citrate 191/67", "C4H3O", "Citrate 191", "C6H7O7");
        assert!(!daughter.is_parent());
        assert_eq!(daughter.sum_formula().unwrap().count("C"), 4);
        assert_eq!(daughter.parent_sum_formula().unwrap().count("C"), 6);
        assert!(daughter.to_string().contains("of Citrate 191"));
    }

    #[test]
    fn test_sample_key_ordering() {
        let fragment = Fragment::metabolite("Lactate", "C3H5O3");
        let a = SampleKey::new(fragment.clone(), "sample_1");
        let b = SampleKey::new(fragment, "sample_2");
        assert!(a < b);
    }
}
