pub mod models;

use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt, TerminationReason};
use nalgebra::{DVector, Dyn, OMatrix, OVector, Owned};
use std::panic::{catch_unwind, AssertUnwindSafe};

pub use models::CurveModel;

/// A converged fit of one model to a series.
#[derive(Debug, Clone, PartialEq)]
pub struct FittedCurve {
    pub model: CurveModel,
    pub params: Vec<f64>,
    /// Model values at each index.
    pub fitted: Vec<f64>,
    /// Observed minus fitted, per index.
    pub residuals: Vec<f64>,
    pub evaluations: usize,
}

impl FittedCurve {
    pub fn max_abs_residual(&self) -> f64 {
        self.residuals.iter().fold(0.0_f64, |acc, r| acc.max(r.abs()))
    }

    /// True when every residual is strictly below `tolerance`.
    pub fn explains(&self, tolerance: f64) -> bool {
        self.residuals.iter().all(|r| r.abs() < tolerance)
    }
}

/// Result of one fit attempt. Failures are values, not errors: the
/// classifier moves on to the next model.
#[derive(Debug, Clone, PartialEq)]
pub enum FitOutcome {
    Fit(FittedCurve),
    FitFailed { model: CurveModel, reason: String },
}

impl FitOutcome {
    pub fn model(&self) -> CurveModel {
        match self {
            FitOutcome::Fit(curve) => curve.model,
            FitOutcome::FitFailed { model, .. } => *model,
        }
    }

    pub fn fitted(&self) -> Option<&FittedCurve> {
        match self {
            FitOutcome::Fit(curve) => Some(curve),
            FitOutcome::FitFailed { .. } => None,
        }
    }

    fn failed(model: CurveModel, reason: impl Into<String>) -> Self {
        FitOutcome::FitFailed {
            model,
            reason: reason.into(),
        }
    }
}

/// Least squares problem for any [`CurveModel`].
///
/// Residuals are r = y - f(x), so the Jacobian is the negated model gradient.
struct CurveProblem {
    model: CurveModel,
    params: DVector<f64>,
    x: Vec<f64>,
    y: Vec<f64>,
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for CurveProblem {
    type ParameterStorage = Owned<f64, Dyn>;
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;

    fn set_params(&mut self, p: &DVector<f64>) {
        self.params.copy_from(p);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<OVector<f64, Dyn>> {
        let p = self.params.as_slice();
        let mut residuals = OVector::<f64, Dyn>::zeros(self.x.len());
        for i in 0..self.x.len() {
            let r = self.y[i] - self.model.evaluate(self.x[i], p);
            // Overflow: stop the solver instead of feeding it infinities
            if !r.is_finite() {
                return None;
            }
            residuals[i] = r;
        }
        Some(residuals)
    }

    fn jacobian(&self) -> Option<OMatrix<f64, Dyn, Dyn>> {
        let p = self.params.as_slice();
        let k = self.model.param_count();
        let mut grad = vec![0.0; k];
        let mut jac = OMatrix::<f64, Dyn, Dyn>::zeros(self.x.len(), k);
        for i in 0..self.x.len() {
            self.model.gradient(self.x[i], p, &mut grad);
            for j in 0..k {
                if !grad[j].is_finite() {
                    return None;
                }
                jac[(i, j)] = -grad[j];
            }
        }
        Some(jac)
    }
}

/// Solver settings for a single fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitBudget {
    /// Evaluations per (parameter + 1) for ordinary models.
    pub default_patience: usize,
    /// Total evaluations for models that need the extended budget.
    pub extended_max_evaluations: usize,
}

impl FitBudget {
    /// Patience value handed to the solver, which caps evaluations at
    /// `patience * (params + 1)`.
    pub fn patience_for(&self, model: CurveModel) -> usize {
        if model.needs_extended_budget() {
            (self.extended_max_evaluations / (model.param_count() + 1)).max(1)
        } else {
            self.default_patience.max(1)
        }
    }
}

/// Fit `model` to `(x, y)` by Levenberg-Marquardt from the model's default
/// starting point.
///
/// Every failure mode (bad input, non-convergence, numerical trouble, a
/// panic inside the solver) comes back as [`FitOutcome::FitFailed`].
pub fn fit(model: CurveModel, x: &[f64], y: &[f64], budget: FitBudget) -> FitOutcome {
    fit_from(model, x, y, budget, model.initial_params())
}

/// Fit `model` to `(x, y)` from each of its [starting points] in turn and
/// return the first fit whose residuals are all below `tolerance`.
///
/// When no start explains the data, the converged fit with the smallest
/// maximum residual is returned, or the first failure if none converged.
///
/// [starting points]: CurveModel::starting_points
pub fn fit_within(model: CurveModel, x: &[f64], y: &[f64], budget: FitBudget, tolerance: f64) -> FitOutcome {
    let mut best: Option<FitOutcome> = None;

    for (attempt, initial) in model.starting_points(x, y).into_iter().enumerate() {
        let outcome = fit_from(model, x, y, budget, initial);
        let residual = outcome.fitted().map(FittedCurve::max_abs_residual);

        if outcome.fitted().is_some_and(|curve| curve.explains(tolerance)) {
            if attempt > 0 {
                tracing::debug!(model = %model, attempt, "fit explained data from estimated start");
            }
            return outcome;
        }

        let improves = match (residual, best.as_ref().and_then(FitOutcome::fitted)) {
            (Some(r), Some(current)) => r < current.max_abs_residual(),
            (Some(_), None) => true,
            (None, _) => best.is_none(),
        };
        if improves {
            best = Some(outcome);
        }
    }

    best.unwrap_or_else(|| FitOutcome::failed(model, "no starting point"))
}

/// Fit `model` to `(x, y)` by Levenberg-Marquardt from `initial`.
pub fn fit_from(model: CurveModel, x: &[f64], y: &[f64], budget: FitBudget, initial: Vec<f64>) -> FitOutcome {
    if initial.len() != model.param_count() {
        return FitOutcome::failed(
            model,
            format!("expected {} starting parameters, got {}", model.param_count(), initial.len()),
        );
    }
    if x.is_empty() || x.len() != y.len() {
        return FitOutcome::failed(
            model,
            format!("x and y must be non-empty and equal length (got {} and {})", x.len(), y.len()),
        );
    }
    if x.len() < model.param_count() {
        return FitOutcome::failed(
            model,
            format!(
                "{} points cannot determine {} parameters",
                x.len(),
                model.param_count()
            ),
        );
    }
    if y.iter().any(|v| !v.is_finite()) {
        return FitOutcome::failed(model, "series contains non-finite values");
    }

    let problem = CurveProblem {
        model,
        params: DVector::from_vec(initial),
        x: x.to_vec(),
        y: y.to_vec(),
    };
    let solver = LevenbergMarquardt::new().with_patience(budget.patience_for(model));

    let (result, report) = match catch_unwind(AssertUnwindSafe(|| solver.minimize(problem))) {
        Ok(solved) => solved,
        Err(_) => return FitOutcome::failed(model, "solver panicked"),
    };

    let accepted = report.termination.was_successful()
        || matches!(report.termination, TerminationReason::NoImprovementPossible(_));
    if !accepted {
        tracing::debug!(
            model = %model,
            evaluations = report.number_of_evaluations,
            termination = ?report.termination,
            "fit did not converge"
        );
        return FitOutcome::failed(model, format!("{:?}", report.termination));
    }

    let params: Vec<f64> = result.params.iter().copied().collect();
    let fitted: Vec<f64> = x.iter().map(|&xi| model.evaluate(xi, &params)).collect();
    let residuals: Vec<f64> = y.iter().zip(&fitted).map(|(yi, fi)| yi - fi).collect();

    if residuals.iter().any(|r| !r.is_finite()) {
        return FitOutcome::failed(model, "fitted values are not finite");
    }

    let curve = FittedCurve {
        model,
        params,
        fitted,
        residuals,
        evaluations: report.number_of_evaluations,
    };
    tracing::debug!(
        model = %model,
        evaluations = curve.evaluations,
        max_residual = curve.max_abs_residual(),
        "fit converged"
    );
    FitOutcome::Fit(curve)
}

/// Index sequence 0..n-1 used as the x axis for every fit.
pub fn index_axis(n: usize) -> Vec<f64> {
    (0..n).map(|i| i as f64).collect()
}
