use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CorrectionError;

/// Elemental composition of a metabolite or fragment, e.g. `C5H8NO4`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SumFormula {
    pub formula: String,
    pub elements: BTreeMap<String, u32>,
}

impl SumFormula {
    /// Parse a sum formula.
    ///
    /// # Example
    ///
    /// ```
    /// use nacore::chemistry::sum_formula::SumFormula;
    ///
    /// let glutamate = SumFormula::parse("C5H8NO4").unwrap();
    /// assert_eq!(glutamate.count("C"), 5);
    /// assert_eq!(glutamate.count("N"), 1);
    /// assert_eq!(glutamate.count("S"), 0);
    /// ```
    pub fn parse(formula: &str) -> Result<Self, CorrectionError> {
        let elements = parse_formula(formula)?;
        Ok(SumFormula {
            formula: formula.to_string(),
            elements,
        })
    }

    /// Number of atoms of `element`, zero if absent.
    pub fn count(&self, element: &str) -> u32 {
        self.elements.get(element).copied().unwrap_or(0)
    }

    pub fn contains(&self, element: &str) -> bool {
        self.count(element) > 0
    }
}

impl FromStr for SumFormula {
    type Err = CorrectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SumFormula::parse(s)
    }
}

impl fmt::Display for SumFormula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.formula)
    }
}

/// Parse a chemical formula into a map of elements and their counts.
///
/// Arguments:
///
/// * `formula` - The chemical formula to parse.
///
/// Returns:
///
/// * `Result<BTreeMap<String, u32>, CorrectionError>` - A map of elements and their counts,
///   repeated elements are summed.
///
/// # Example
///
/// ```
/// use nacore::chemistry::sum_formula::parse_formula;
///
/// let elements = parse_formula("O3P").unwrap();
/// assert_eq!(elements.get("O"), Some(&3));
/// assert_eq!(elements.get("P"), Some(&1));
/// ```
pub fn parse_formula(formula: &str) -> Result<BTreeMap<String, u32>, CorrectionError> {
    let invalid = |reason: String| CorrectionError::Formula {
        formula: formula.to_string(),
        reason,
    };

    let mut element_counts = BTreeMap::new();
    let mut current_element = String::new();
    let mut current_count = String::new();
    let mut chars = formula.trim().chars().peekable();

    if chars.peek().is_none() {
        return Err(invalid("formula is empty".to_string()));
    }

    while let Some(c) = chars.next() {
        if c.is_ascii_uppercase() {
            current_element = c.to_string();
            current_count = String::new();
        } else if c.is_ascii_lowercase() && !current_element.is_empty() && current_count.is_empty() {
            current_element.push(c);
        } else if c.is_ascii_digit() && !current_element.is_empty() {
            current_count.push(c);
        } else {
            return Err(invalid(format!("unexpected character {:?}", c)));
        }

        if chars.peek().map_or(true, |next_c| next_c.is_ascii_uppercase()) {
            let count = if current_count.is_empty() {
                1
            } else {
                current_count
                    .parse::<u32>()
                    .map_err(|_| invalid(format!("atom count {} out of range", current_count)))?
            };
            *element_counts.entry(current_element.clone()).or_insert(0) += count;
            current_element = String::new();
            current_count = String::new();
        }
    }

    Ok(element_counts)
}
