use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::algorithm::convolution::project_on_grid;
use crate::error::CorrectionError;

/// Maximum deviation from 1.0 allowed for the sum of a natural abundance vector.
pub const ABUNDANCE_TOLERANCE: f64 = 1e-6;

/// Natural isotope abundances (IUPAC) indexed by nominal mass shift from the lightest isotope.
///
/// Gaps in the isotope ladder are stored as explicit zeros, e.g. chlorine has no
/// isotope at +1 so its vector reads `[35Cl, 0, 37Cl]`.
pub fn isotopic_abundance() -> HashMap<&'static str, Vec<f64>> {

    let mut map = HashMap::new();

    map.insert("H", vec![0.999885, 0.000115]);
    map.insert("C", vec![0.9893, 0.0107]);
    map.insert("N", vec![0.99632, 0.00368]);
    map.insert("O", vec![0.99757, 0.00038, 0.00205]);
    map.insert("F", vec![1.0]);
    map.insert("Na", vec![1.0]);
    map.insert("Mg", vec![0.7899, 0.1000, 0.1101]);
    map.insert("Si", vec![0.9223, 0.0467, 0.0310]);
    map.insert("P", vec![1.0]);
    map.insert("S", vec![0.9493, 0.0076, 0.0429, 0.0, 0.0002]);
    map.insert("Cl", vec![0.7578, 0.0, 0.2422]);
    map.insert("K", vec![0.932581, 0.000117, 0.067302]);
    map.insert("Fe", vec![0.05845, 0.0, 0.91754, 0.02119, 0.00282]);

    map
}

/// Mass number of the lightest stable isotope of each element.
pub fn lightest_mass_number() -> HashMap<&'static str, u16> {

    let mut map = HashMap::new();

    map.insert("H", 1);
    map.insert("C", 12);
    map.insert("N", 14);
    map.insert("O", 16);
    map.insert("F", 19);
    map.insert("Na", 23);
    map.insert("Mg", 24);
    map.insert("Si", 28);
    map.insert("P", 31);
    map.insert("S", 32);
    map.insert("Cl", 35);
    map.insert("K", 39);
    map.insert("Fe", 54);

    map
}

/// Heavy isotope used as tracer when only the element symbol is given.
pub fn default_tracer_mass_number(element: &str) -> Option<u16> {
    match element {
        "H" => Some(2),
        "C" => Some(13),
        "N" => Some(15),
        "O" => Some(18),
        "S" => Some(34),
        _ => None,
    }
}

/// A single isotope, e.g. `C13` or `N15`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Isotope {
    element: String,
    mass_number: u16,
}

impl Isotope {
    pub fn new(element: &str, mass_number: u16) -> Self {
        Isotope {
            element: element.to_string(),
            mass_number,
        }
    }

    pub fn element(&self) -> &str {
        &self.element
    }

    pub fn mass_number(&self) -> u16 {
        self.mass_number
    }

    /// Nominal mass shift relative to the lightest isotope of the element,
    /// `None` if the element is unknown or the isotope is the lightest one.
    ///
    /// # Examples
    ///
    /// ```
    /// use nacore::chemistry::elements::Isotope;
    ///
    /// assert_eq!(Isotope::new("C", 13).mass_shift(), Some(1));
    /// assert_eq!(Isotope::new("O", 18).mass_shift(), Some(2));
    /// assert_eq!(Isotope::new("C", 12).mass_shift(), None);
    /// ```
    pub fn mass_shift(&self) -> Option<usize> {
        let lightest = *lightest_mass_number().get(self.element.as_str())?;
        match self.mass_number.checked_sub(lightest) {
            Some(0) | None => None,
            Some(shift) => Some(shift as usize),
        }
    }
}

impl fmt::Display for Isotope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.element, self.mass_number)
    }
}

impl FromStr for Isotope {
    type Err = CorrectionError;

    /// Accepts `C13`, `13C` and a bare symbol such as `C`, which resolves to
    /// the default tracer isotope of the element.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = |reason: &str| CorrectionError::configuration(s, reason);

        let digits_first = s.starts_with(|c: char| c.is_ascii_digit());
        let (symbol, number): (String, String) = if digits_first {
            let number: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
            (s[number.len()..].to_string(), number)
        } else {
            let symbol: String = s.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
            (symbol.clone(), s[symbol.len()..].to_string())
        };

        let mut chars = symbol.chars();
        let valid_symbol = matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
            && chars.all(|c| c.is_ascii_lowercase())
            && symbol.len() <= 2;
        if !valid_symbol || !number.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid("not an isotope symbol"));
        }

        let mass_number = if number.is_empty() {
            default_tracer_mass_number(&symbol).ok_or_else(|| invalid("no default tracer isotope for element"))?
        } else {
            number.parse::<u16>().map_err(|_| invalid("mass number out of range"))?
        };

        Ok(Isotope::new(&symbol, mass_number))
    }
}

/// Validated natural abundance vector of one element.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NaturalAbundance {
    element: String,
    probabilities: Vec<f64>,
}

impl NaturalAbundance {
    /// Validates the probabilities of `element`.
    ///
    /// Arguments:
    ///
    /// * `element` - element symbol, used in error messages
    /// * `probabilities` - isotope probabilities, lightest isotope first
    ///
    /// Returns:
    ///
    /// * `Result<NaturalAbundance, CorrectionError>` - a configuration error if
    ///   the vector is empty, holds a value outside `[0, 1]` or does not sum to 1
    ///   within [`ABUNDANCE_TOLERANCE`]
    ///
    /// # Examples
    ///
    /// ```
    /// use nacore::chemistry::elements::NaturalAbundance;
    ///
    /// assert!(NaturalAbundance::new("C", vec![0.9893, 0.0107]).is_ok());
    /// assert!(NaturalAbundance::new("C", vec![0.9, 0.0107]).is_err());
    /// ```
    pub fn new(element: &str, probabilities: Vec<f64>) -> Result<Self, CorrectionError> {
        if probabilities.is_empty() {
            return Err(CorrectionError::configuration(element, "natural abundance vector is empty"));
        }
        if let Some(p) = probabilities.iter().find(|p| !p.is_finite() || **p < 0.0 || **p > 1.0) {
            return Err(CorrectionError::configuration(
                element,
                format!("probability {} is outside [0, 1]", p),
            ));
        }
        let total: f64 = probabilities.iter().sum();
        if (total - 1.0).abs() > ABUNDANCE_TOLERANCE {
            return Err(CorrectionError::configuration(
                element,
                format!("probabilities sum to {}, expected 1 within {:e}", total, ABUNDANCE_TOLERANCE),
            ));
        }
        Ok(NaturalAbundance {
            element: element.to_string(),
            probabilities,
        })
    }

    pub fn element(&self) -> &str {
        &self.element
    }

    pub fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }

    /// Projects the vector onto the grid of a tracer whose heavy isotope sits
    /// `shift` mass units above the lightest one.
    ///
    /// Entry `m > 0` is the probability of a mass shift of `m * shift`, everything
    /// that does not land on the grid is counted as unlabeled.
    pub fn on_label_grid(&self, shift: usize) -> Vec<f64> {
        project_on_grid(&self.probabilities, shift)
    }
}

/// Natural abundance vectors by element symbol.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NaturalAbundanceTable {
    entries: BTreeMap<String, NaturalAbundance>,
}

impl NaturalAbundanceTable {
    /// Builds the default table and replaces or extends it with `overrides`.
    pub fn with_overrides(overrides: &BTreeMap<String, Vec<f64>>) -> Result<Self, CorrectionError> {
        let mut table = NaturalAbundanceTable::default();
        for (element, probabilities) in overrides {
            table.insert(NaturalAbundance::new(element, probabilities.clone())?);
        }
        Ok(table)
    }

    pub fn insert(&mut self, abundance: NaturalAbundance) {
        self.entries.insert(abundance.element.clone(), abundance);
    }

    pub fn get(&self, element: &str) -> Option<&NaturalAbundance> {
        self.entries.get(element)
    }

    /// Like [`NaturalAbundanceTable::get`] but a missing element is a configuration error.
    pub fn require(&self, element: &str) -> Result<&NaturalAbundance, CorrectionError> {
        self.get(element)
            .ok_or_else(|| CorrectionError::configuration(element, "no natural abundance vector available"))
    }

    pub fn elements(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl Default for NaturalAbundanceTable {
    fn default() -> Self {
        let entries = isotopic_abundance()
            .into_iter()
            .map(|(element, probabilities)| {
                (element.to_string(), NaturalAbundance { element: element.to_string(), probabilities })
            })
            .collect();
        NaturalAbundanceTable { entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_is_valid() {
        for (element, probabilities) in isotopic_abundance() {
            assert!(
                NaturalAbundance::new(element, probabilities).is_ok(),
                "default vector for {} is invalid",
                element
            );
        }
    }

    #[test]
    fn test_every_element_has_a_lightest_isotope() {
        let lightest = lightest_mass_number();
        for element in isotopic_abundance().keys() {
            assert!(lightest.contains_key(element));
        }
    }

    #[test]
    fn test_negative_probability_rejected() {
        let err = NaturalAbundance::new("N", vec![1.1, -0.1]).unwrap_err();
        assert!(err.to_string().contains("outside [0, 1]"));
    }

    #[test]
    fn test_parse_isotope() {
        assert_eq!("C13".parse::<Isotope>().unwrap(), Isotope::new("C", 13));
        assert_eq!("15N".parse::<Isotope>().unwrap(), Isotope::new("N", 15));
        assert_eq!("H".parse::<Isotope>().unwrap(), Isotope::new("H", 2));
        assert_eq!("Se82".parse::<Isotope>().unwrap(), Isotope::new("Se", 82));
        assert!("Fe".parse::<Isotope>().is_err());
        assert!("c13".parse::<Isotope>().is_err());
        assert!("".parse::<Isotope>().is_err());
    }

    #[test]
    fn test_on_label_grid() {
        let oxygen = NaturalAbundanceTable::default().get("O").unwrap().clone();
        assert_eq!(oxygen.on_label_grid(1), vec![0.99757, 0.00038, 0.00205]);

        let grid = oxygen.on_label_grid(2);
        assert_eq!(grid.len(), 2);
        assert!((grid[1] - 0.00205).abs() < 1e-12);
        assert!((grid.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_overrides() {
        let mut overrides = BTreeMap::new();
        overrides.insert("C".to_string(), vec![0.99, 0.01]);
        overrides.insert("Se".to_string(), vec![1.0]);
        let table = NaturalAbundanceTable::with_overrides(&overrides).unwrap();
        assert_eq!(table.get("C").unwrap().probabilities(), &[0.99, 0.01]);
        assert!(table.get("Se").is_some());
        assert!(table.require("Xe").is_err());

        overrides.insert("H".to_string(), vec![0.5, 0.4]);
        assert!(NaturalAbundanceTable::with_overrides(&overrides).is_err());
    }
}
