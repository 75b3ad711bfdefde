use crate::algorithm::matrix::{MatrixCache, MatrixKey};
use crate::algorithm::solver::{SolveNote, Solver};
use crate::chemistry::elements::Isotope;
use crate::chemistry::sum_formula::SumFormula;
use crate::data::tensor::LabelTensor;
use crate::error::{CorrectionError, WarningKind};

/// One correction applied along one tracer axis.
#[derive(Clone, Debug, PartialEq)]
pub enum CorrectionStep {
    /// Removes the natural abundance of a non-tracer element.
    Interference { element: String, tracer: Isotope, axis: usize, key: MatrixKey },
    /// Removes the natural abundance of the tracer element itself.
    Tracer { tracer: Isotope, axis: usize, key: MatrixKey },
}

impl CorrectionStep {
    pub fn axis(&self) -> usize {
        match self {
            CorrectionStep::Interference { axis, .. } | CorrectionStep::Tracer { axis, .. } => *axis,
        }
    }

    pub fn key(&self) -> &MatrixKey {
        match self {
            CorrectionStep::Interference { key, .. } | CorrectionStep::Tracer { key, .. } => key,
        }
    }

    pub fn element(&self) -> &str {
        self.key().element()
    }
}

/// Ordered correction steps for one fragment formula.
///
/// Tracers are handled in configuration order. For every tracer the non-tracer
/// elements come first, in the order they are listed for that tracer, followed
/// by the tracer's own correction.
#[derive(Clone, Debug, PartialEq)]
pub struct CorrectionPlan {
    pub shape: Vec<usize>,
    pub steps: Vec<CorrectionStep>,
    pub warnings: Vec<WarningKind>,
}

impl CorrectionPlan {
    /// Arguments:
    ///
    /// * `formula` - formula of the fragment
    /// * `tracers` - tracer isotopes, one tensor axis each
    /// * `correction_map` - per tracer, the non-tracer elements to correct for
    pub fn for_formula(formula: &SumFormula, tracers: &[Isotope], correction_map: &[Vec<String>]) -> Self {
        let shape: Vec<usize> = tracers
            .iter()
            .map(|t| formula.count(t.element()) as usize + 1)
            .collect();
        let mut steps = Vec::new();
        let mut warnings = Vec::new();

        for (axis, tracer) in tracers.iter().enumerate() {
            let atoms = formula.count(tracer.element());
            if atoms == 0 {
                tracing::debug!(formula = %formula, tracer = %tracer, "tracer element absent, axis left as is");
                continue;
            }

            let elements = correction_map.get(axis).map(Vec::as_slice).unwrap_or(&[]);
            for element in elements {
                if tracers.iter().any(|t| t.element() == element) {
                    continue;
                }
                let count = formula.count(element);
                if count == 0 {
                    warnings.push(WarningKind::MissingElement {
                        element: element.clone(),
                        tracer: tracer.to_string(),
                    });
                    continue;
                }
                steps.push(CorrectionStep::Interference {
                    element: element.clone(),
                    tracer: tracer.clone(),
                    axis,
                    key: MatrixKey::Interference {
                        element: element.clone(),
                        atoms: count,
                        dim: shape[axis],
                        shift: tracer.mass_shift().unwrap_or(1),
                    },
                });
            }

            steps.push(CorrectionStep::Tracer {
                tracer: tracer.clone(),
                axis,
                key: MatrixKey::Tracer {
                    isotope: tracer.clone(),
                    atoms,
                },
            });
        }

        CorrectionPlan { shape, steps, warnings }
    }

    pub fn keys(&self) -> impl Iterator<Item = &MatrixKey> {
        self.steps.iter().map(CorrectionStep::key)
    }
}

/// Applies every step of `plan` to `tensor`, a fold of pure single-step corrections.
///
/// Steps that fail are skipped and reported, as are singular matrices and
/// solver fallbacks. Fails only if the tensor does not have the plan's shape.
pub fn correct_tensor(
    tensor: LabelTensor,
    plan: &CorrectionPlan,
    cache: &MatrixCache,
    solver: &dyn Solver,
) -> Result<(LabelTensor, Vec<WarningKind>), CorrectionError> {
    if tensor.shape() != plan.shape.as_slice() {
        return Err(CorrectionError::Dimension {
            expected: plan.shape.iter().product(),
            found: tensor.len(),
        });
    }

    Ok(plan.steps.iter().fold((tensor, Vec::new()), |(tensor, mut warnings), step| {
        match apply_step(&tensor, step, cache, solver) {
            Ok((corrected, notes)) => {
                warnings.extend(notes);
                (corrected, warnings)
            }
            Err(err) => {
                warnings.push(step_failure(step, err));
                (tensor, warnings)
            }
        }
    }))
}

/// Corrects every lane of `tensor` along the axis of `step`.
pub fn apply_step(
    tensor: &LabelTensor,
    step: &CorrectionStep,
    cache: &MatrixCache,
    solver: &dyn Solver,
) -> Result<(LabelTensor, Vec<WarningKind>), CorrectionError> {
    let matrix = cache
        .get(step.key())
        .ok_or_else(|| CorrectionError::configuration(step.element(), "correction matrix was not prepared"))?;

    let mut singular = false;
    let mut iterations = None;
    let corrected = tensor.clone().map_lanes(step.axis(), |lane| {
        let solution = solver.solve(&lane, matrix)?;
        match solution.note {
            Some(SolveNote::Singular) => singular = true,
            Some(SolveNote::NotConverged { iterations: n }) => {
                iterations = Some(iterations.map_or(n, |m: usize| m.max(n)))
            }
            None => {}
        }
        Ok::<_, CorrectionError>(solution.values)
    })?;

    let mut warnings = Vec::new();
    if singular {
        warnings.push(WarningKind::SingularMatrix {
            element: step.element().to_string(),
        });
    }
    if let Some(iterations) = iterations {
        warnings.push(WarningKind::SolverNonconvergence {
            element: step.element().to_string(),
            iterations,
        });
    }
    Ok((corrected, warnings))
}

fn step_failure(step: &CorrectionStep, err: CorrectionError) -> WarningKind {
    match err {
        CorrectionError::Dimension { expected, found } => WarningKind::DimensionMismatch { expected, found },
        other => WarningKind::InvalidRecord {
            reason: format!("{} correction skipped: {}", step.element(), other),
        },
    }
}
