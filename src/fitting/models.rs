use std::fmt;

/// y = a * x + b
pub fn linear(x: f64, a: f64, b: f64) -> f64 {
    a * x + b
}

/// y = a * sin(b * x + c)
pub fn sinusoidal(x: f64, a: f64, b: f64, c: f64) -> f64 {
    a * (b * x + c).sin()
}

/// y = a * x^2 + b * x + c
pub fn quadratic(x: f64, a: f64, b: f64, c: f64) -> f64 {
    a * x * x + b * x + c
}

/// y = a * ln(x + 1) + b. Defined for x > -1.
pub fn logarithmic(x: f64, a: f64, b: f64) -> f64 {
    a * (x + 1.0).ln() + b
}

/// The candidate curves a balance history may be explained by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CurveModel {
    Linear,
    Sinusoidal,
    Quadratic,
    Logarithmic,
}

impl CurveModel {
    /// Trial order. The first model that explains a series wins.
    pub const ALL: [CurveModel; 4] = [
        CurveModel::Linear,
        CurveModel::Sinusoidal,
        CurveModel::Quadratic,
        CurveModel::Logarithmic,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CurveModel::Linear => "Linear",
            CurveModel::Sinusoidal => "Sinusoidal",
            CurveModel::Quadratic => "Quadratic",
            CurveModel::Logarithmic => "Logarithmic",
        }
    }

    pub fn param_count(self) -> usize {
        match self {
            CurveModel::Linear | CurveModel::Logarithmic => 2,
            CurveModel::Sinusoidal | CurveModel::Quadratic => 3,
        }
    }

    /// Starting point for the solver. All ones, so fits are reproducible.
    pub fn initial_params(self) -> Vec<f64> {
        vec![1.0; self.param_count()]
    }

    /// Starting points to try, in order. The all-ones point always comes
    /// first; sinusoids add points estimated from the data, since a fit from
    /// the wrong frequency rarely finds its way back.
    pub fn starting_points(self, x: &[f64], y: &[f64]) -> Vec<Vec<f64>> {
        let mut points = vec![self.initial_params()];
        if self == CurveModel::Sinusoidal {
            points.extend(estimate_sinusoid_params(x, y).into_iter().map(|p| p.to_vec()));
        }
        points
    }

    /// Sinusoidal and quadratic fits converge slowly and get a larger budget.
    pub fn needs_extended_budget(self) -> bool {
        matches!(self, CurveModel::Sinusoidal | CurveModel::Quadratic)
    }

    /// Evaluate the model at `x`. `params` must hold `param_count()` values.
    pub fn evaluate(self, x: f64, params: &[f64]) -> f64 {
        match self {
            CurveModel::Linear => linear(x, params[0], params[1]),
            CurveModel::Sinusoidal => sinusoidal(x, params[0], params[1], params[2]),
            CurveModel::Quadratic => quadratic(x, params[0], params[1], params[2]),
            CurveModel::Logarithmic => logarithmic(x, params[0], params[1]),
        }
    }

    /// Partial derivatives of the model w.r.t. each parameter at `x`,
    /// written into `out` (length `param_count()`).
    pub fn gradient(self, x: f64, params: &[f64], out: &mut [f64]) {
        match self {
            CurveModel::Linear => {
                out[0] = x;
                out[1] = 1.0;
            }
            CurveModel::Sinusoidal => {
                let (a, b, c) = (params[0], params[1], params[2]);
                let phase = b * x + c;
                let (sin, cos) = phase.sin_cos();
                out[0] = sin;
                out[1] = a * x * cos;
                out[2] = a * cos;
            }
            CurveModel::Quadratic => {
                out[0] = x * x;
                out[1] = x;
                out[2] = 1.0;
            }
            CurveModel::Logarithmic => {
                out[0] = (x + 1.0).ln();
                out[1] = 1.0;
            }
        }
    }
}

/// Candidate angular frequencies for sinusoid seeds. On an integer axis
/// every frequency aliases into (0, pi], so the grid stops just short of pi.
const SINUSOID_FREQUENCIES: [f64; 12] = [
    0.25,
    0.5,
    0.75,
    1.0,
    1.25,
    1.5,
    1.75,
    2.0,
    2.25,
    2.5,
    2.75,
    3.0,
];

/// How many of the best-scoring frequency seeds are handed to the solver.
const MAX_SINUSOID_SEEDS: usize = 4;

/// Estimate `[a, b, c]` seeds for `a * sin(b * x + c)`.
///
/// For a fixed `b` the model is linear in `p = a cos c` and `q = a sin c`
/// (`y = p sin(bx) + q cos(bx)`), so amplitude and phase come from a 2x2
/// least-squares solve. Frequencies are ranked by that solve's squared
/// error; ties keep grid order.
fn estimate_sinusoid_params(x: &[f64], y: &[f64]) -> Vec<[f64; 3]> {
    if x.is_empty() || x.len() != y.len() {
        return Vec::new();
    }

    let mut scored: Vec<(f64, [f64; 3])> = Vec::with_capacity(SINUSOID_FREQUENCIES.len());
    for &b in &SINUSOID_FREQUENCIES {
        let (mut ss, mut sc, mut cc, mut ys, mut yc) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for (&xi, &yi) in x.iter().zip(y) {
            let (s, c) = (b * xi).sin_cos();
            ss += s * s;
            sc += s * c;
            cc += c * c;
            ys += yi * s;
            yc += yi * c;
        }

        let n = x.len() as f64;
        let det = ss * cc - sc * sc;
        // sin(bx) and cos(bx) are (nearly) collinear on this axis
        if ss <= 1e-9 * n || cc <= 1e-9 * n || det <= 1e-9 * ss * cc {
            continue;
        }
        let p = (ys * cc - yc * sc) / det;
        let q = (ss * yc - sc * ys) / det;

        let sse: f64 = x
            .iter()
            .zip(y)
            .map(|(&xi, &yi)| {
                let (s, c) = (b * xi).sin_cos();
                (yi - p * s - q * c).powi(2)
            })
            .sum();
        let seed = [p.hypot(q), b, q.atan2(p)];
        if sse.is_finite() && seed.iter().all(|v| v.is_finite()) {
            scored.push((sse, seed));
        }
    }

    scored.sort_by(|a, b| a.0.total_cmp(&b.0));
    scored.into_iter().take(MAX_SINUSOID_SEEDS).map(|(_, seed)| seed).collect()
}

impl fmt::Display for CurveModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
