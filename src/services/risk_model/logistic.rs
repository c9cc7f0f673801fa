//! L2-regularized, class-weighted logistic regression fitted by damped Newton–Raphson.
//!
//! Objective: `0.5 ‖w‖² + C Σ sᵢ ℓ(yᵢ, w·xᵢ + b)` with the intercept unpenalized and
//! `sᵢ = n / (2 n_class(yᵢ))`. Fitting has no random state.

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

use super::Explainable;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitOptions {
    pub regularization_c: f64,
    pub max_iterations: usize,
    pub tolerance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// `ln(1 + e^z)` without overflow.
fn softplus(z: f64) -> f64 {
    if z > 0.0 {
        z + (-z).exp().ln_1p()
    } else {
        z.exp().ln_1p()
    }
}

fn balanced_weights(labels: &[u8]) -> [f64; 2] {
    let n = labels.len() as f64;
    let positives = labels.iter().filter(|y| **y == 1).count() as f64;
    let negatives = n - positives;
    let weight = |count: f64| if count > 0.0 { n / (2.0 * count) } else { 0.0 };
    [weight(negatives), weight(positives)]
}

/// Solves `a x = b` in place by Gaussian elimination with partial pivoting.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|i, j| a[*i][col].abs().total_cmp(&a[*j][col].abs()))?;
        if !a[pivot][col].is_finite() || a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    x.iter().all(|v| v.is_finite()).then_some(x)
}

struct Problem<'a> {
    x: &'a [Vec<f64>],
    y: &'a [u8],
    sample_weight: [f64; 2],
    c: f64,
    width: usize,
}

impl Problem<'_> {
    /// `params = [w_0 .. w_{d-1}, b]`.
    fn decision(&self, params: &[f64], row: &[f64]) -> f64 {
        let w = &params[..self.width];
        row.iter().zip(w).map(|(x, w)| x * w).sum::<f64>() + params[self.width]
    }

    fn objective(&self, params: &[f64]) -> f64 {
        let penalty = 0.5 * params[..self.width].iter().map(|w| w * w).sum::<f64>();
        let loss: f64 = self
            .x
            .iter()
            .zip(self.y)
            .map(|(row, y)| {
                let z = self.decision(params, row);
                let l = if *y == 1 { softplus(-z) } else { softplus(z) };
                self.sample_weight[usize::from(*y)] * l
            })
            .sum();
        penalty + self.c * loss
    }

    fn gradient_and_hessian(&self, params: &[f64]) -> (Vec<f64>, Vec<Vec<f64>>) {
        let dim = self.width + 1;
        let mut grad = vec![0.0; dim];
        let mut hess = vec![vec![0.0; dim]; dim];
        for (row, y) in self.x.iter().zip(self.y) {
            let p = sigmoid(self.decision(params, row));
            let s = self.sample_weight[usize::from(*y)] * self.c;
            let residual = s * (p - f64::from(*y));
            let curvature = s * p * (1.0 - p);
            for i in 0..dim {
                let xi = if i < self.width { row[i] } else { 1.0 };
                grad[i] += residual * xi;
                for j in i..dim {
                    let xj = if j < self.width { row[j] } else { 1.0 };
                    hess[i][j] += curvature * xi * xj;
                }
            }
        }
        for i in 0..dim {
            for j in 0..i {
                hess[i][j] = hess[j][i];
            }
        }
        for i in 0..self.width {
            grad[i] += params[i];
            hess[i][i] += 1.0;
        }
        (grad, hess)
    }

    /// Newton direction, adding diagonal damping until the system is solvable.
    fn newton_step(&self, grad: &[f64], hess: &[Vec<f64>]) -> Option<Vec<f64>> {
        let rhs: Vec<f64> = grad.iter().map(|g| -g).collect();
        let mut damping = 0.0;
        for _ in 0..8 {
            let mut damped = hess.to_vec();
            for (i, row) in damped.iter_mut().enumerate() {
                row[i] += damping;
            }
            if let Some(step) = solve(damped, rhs.clone()) {
                return Some(step);
            }
            damping = if damping == 0.0 { 1e-8 } else { damping * 100.0 };
        }
        None
    }
}

impl LogisticRegression {
    pub fn fit(x: &[Vec<f64>], y: &[u8], options: FitOptions) -> PipelineResult<Self> {
        let width = x.first().map(|row| row.len()).unwrap_or(0);
        if x.len() != y.len() || x.iter().any(|row| row.len() != width) {
            return Err(PipelineError::ModelFit(
                "design matrix and labels disagree in shape".to_string(),
            ));
        }
        let problem = Problem {
            x,
            y,
            sample_weight: balanced_weights(y),
            c: options.regularization_c,
            width,
        };

        let mut params = vec![0.0; width + 1];
        let mut current = problem.objective(&params);
        let mut iterations = 0;
        let mut converged = false;
        while iterations < options.max_iterations {
            iterations += 1;
            let (grad, hess) = problem.gradient_and_hessian(&params);
            let grad_norm = grad.iter().fold(0.0f64, |acc, g| acc.max(g.abs()));
            if grad_norm <= options.tolerance {
                converged = true;
                break;
            }
            let step = problem.newton_step(&grad, &hess).ok_or_else(|| {
                PipelineError::ModelFit("singular Newton system after damping".to_string())
            })?;

            let mut t = 1.0;
            let mut accepted = None;
            for _ in 0..30 {
                let candidate: Vec<f64> =
                    params.iter().zip(&step).map(|(p, s)| p + t * s).collect();
                let value = problem.objective(&candidate);
                if value.is_finite() && value <= current {
                    accepted = Some((candidate, value));
                    break;
                }
                t *= 0.5;
            }
            let Some((next, value)) = accepted else {
                converged = true;
                break;
            };
            let moved = next
                .iter()
                .zip(&params)
                .fold(0.0f64, |acc, (a, b)| acc.max((a - b).abs()));
            params = next;
            let improvement = current - value;
            current = value;
            if moved <= options.tolerance || improvement <= options.tolerance * current.abs().max(1.0) {
                converged = true;
                break;
            }
        }
        if !converged {
            tracing::warn!(
                iterations,
                objective = current,
                "logistic regression reached the iteration limit before converging"
            );
        } else {
            tracing::debug!(iterations, objective = current, "logistic regression converged");
        }

        let intercept = params[width];
        params.truncate(width);
        Ok(Self {
            coefficients: params,
            intercept,
        })
    }

    pub fn decision(&self, row: &[f64]) -> f64 {
        row.iter()
            .zip(&self.coefficients)
            .map(|(x, w)| x * w)
            .sum::<f64>()
            + self.intercept
    }

    pub fn probability(&self, row: &[f64]) -> f64 {
        sigmoid(self.decision(row))
    }
}

impl Explainable for LogisticRegression {
    fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }
}
