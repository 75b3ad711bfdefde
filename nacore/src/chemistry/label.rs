use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use itertools::Itertools;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::chemistry::elements::Isotope;
use crate::error::CorrectionError;

static MAVEN_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^((?:[A-Z][a-z]?\d+)+)-label-(\d+(?:-\d+)*)$").expect("maven label pattern is valid")
});

static ISOTOPE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Z][a-z]?)(\d+)").expect("isotope token pattern is valid"));

static PARENT_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^[A-Z][a-z]?\d+\s+parent$").expect("parent label pattern is valid"));

/// Number of heavy atoms per tracer isotope in one isotopologue.
///
/// Parsed from the canonical form `C13_2_N15_1`, the unlabeled form
/// `C12 PARENT` and the Maven form `C13N15-label-2-1`. Always displayed in the
/// canonical form.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IsotopeLabel {
    counts: Vec<(Isotope, u32)>,
}

impl IsotopeLabel {
    pub fn new(counts: Vec<(Isotope, u32)>) -> Self {
        IsotopeLabel { counts }
    }

    /// The label with every tracer at zero heavy atoms.
    pub fn unlabeled(tracers: &[Isotope]) -> Self {
        IsotopeLabel::new(tracers.iter().map(|t| (t.clone(), 0)).collect())
    }

    /// Label for a position in a label tensor, one count per tracer.
    pub fn from_position(tracers: &[Isotope], position: &[usize]) -> Self {
        IsotopeLabel::new(
            tracers
                .iter()
                .zip(position.iter())
                .map(|(t, &n)| (t.clone(), n as u32))
                .collect(),
        )
    }

    pub fn counts(&self) -> &[(Isotope, u32)] {
        &self.counts
    }

    /// Heavy atoms of `isotope`, zero if the label does not mention it.
    pub fn count(&self, isotope: &Isotope) -> u32 {
        self.counts
            .iter()
            .filter(|(i, _)| i == isotope)
            .map(|(_, n)| *n)
            .sum()
    }

    pub fn total(&self) -> u32 {
        self.counts.iter().map(|(_, n)| *n).sum()
    }

    pub fn is_unlabeled(&self) -> bool {
        self.total() == 0
    }

    /// Position of the label in a tensor whose axes are `tracers` with sizes `shape`.
    ///
    /// Fails if the label carries heavy atoms of an isotope that is not a tracer
    /// or if a count does not fit its axis.
    pub fn position(&self, tracers: &[Isotope], shape: &[usize]) -> Result<Vec<usize>, CorrectionError> {
        if let Some((isotope, _)) = self.counts.iter().find(|(i, n)| *n > 0 && !tracers.contains(i)) {
            return Err(CorrectionError::Label {
                label: self.to_string(),
                reason: format!("{} is not a tracer isotope", isotope),
            });
        }
        tracers
            .iter()
            .zip(shape.iter())
            .map(|(tracer, &size)| {
                let n = self.count(tracer) as usize;
                if n < size {
                    Ok(n)
                } else {
                    Err(CorrectionError::Dimension { expected: size, found: n + 1 })
                }
            })
            .collect()
    }
}

impl fmt::Display for IsotopeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.counts.is_empty() {
            return write!(f, "unlabeled");
        }
        let text = self.counts.iter().map(|(i, n)| format!("{}_{}", i, n)).join("_");
        write!(f, "{}", text)
    }
}

impl FromStr for IsotopeLabel {
    type Err = CorrectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = |reason: &str| CorrectionError::Label {
            label: s.to_string(),
            reason: reason.to_string(),
        };

        if s.eq_ignore_ascii_case("unlabeled") || PARENT_LABEL.is_match(s) {
            return Ok(IsotopeLabel::new(Vec::new()));
        }

        if let Some(captures) = MAVEN_LABEL.captures(s) {
            let isotopes: Vec<Isotope> = ISOTOPE_TOKEN
                .captures_iter(&captures[1])
                .map(|token| Isotope::from_str(&token[0]))
                .collect::<Result<_, _>>()?;
            let counts: Vec<u32> = captures[2]
                .split('-')
                .map(|n| n.parse::<u32>().map_err(|_| invalid("heavy atom count out of range")))
                .collect::<Result<_, _>>()?;
            if isotopes.len() != counts.len() {
                return Err(invalid("number of isotopes and counts differ"));
            }
            return Ok(IsotopeLabel::new(isotopes.into_iter().zip(counts).collect()));
        }

        let tokens: Vec<&str> = s.split('_').collect();
        if tokens.len() % 2 != 0 {
            return Err(invalid("expected alternating isotopes and counts"));
        }
        let counts = tokens
            .chunks(2)
            .map(|pair| {
                let isotope = Isotope::from_str(pair[0]).map_err(|_| invalid("unknown isotope"))?;
                let count = pair[1].parse::<u32>().map_err(|_| invalid("heavy atom count is not a number"))?;
                Ok((isotope, count))
            })
            .collect::<Result<Vec<_>, CorrectionError>>()?;
        Ok(IsotopeLabel::new(counts))
    }
}
