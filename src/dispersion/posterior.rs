//! Cox-Reid adjusted log-posterior of log(alpha) and its maximisation

use ndarray::Array2;
use statrs::function::gamma::{digamma, ln_gamma};

use super::DispersionParams;
use crate::glm::linalg::{invert_spd, log_det_spd, xtwx};

/// Hard bounds on proposed log-dispersions during the line search
const LOG_ALPHA_FLOOR: f64 = -30.0;
const LOG_ALPHA_CEILING: f64 = 10.0;

/// Armijo sufficient-increase constant
const ARMIJO_EPSILON: f64 = 1e-4;

/// Number of points in each pass of the grid fallback
const GRID_POINTS: usize = 20;

/// Normal prior on log(alpha), used by the MAP step
#[derive(Debug, Clone, Copy)]
pub(crate) struct LogNormalPrior {
    pub mean: f64,
    pub variance: f64,
}

/// Outcome of a line search
#[derive(Debug, Clone, Copy)]
pub(crate) struct LineSearch {
    pub log_alpha: f64,
    pub initial_lp: f64,
    pub last_lp: f64,
    pub iterations: usize,
}

fn cr_weights(mu: &[f64], alpha: f64) -> Vec<f64> {
    mu.iter().map(|&m| 1.0 / (1.0 / m.max(1e-10) + alpha)).collect()
}

/// Log-likelihood with the Cox-Reid term, plus the prior when given
pub(crate) fn log_posterior(
    counts: &[f64],
    design: &Array2<f64>,
    mu: &[f64],
    log_alpha: f64,
    prior: Option<LogNormalPrior>,
) -> f64 {
    let alpha = log_alpha.exp();
    let alpha_inv = 1.0 / alpha;
    let p = design.ncols();

    let ll: f64 = counts
        .iter()
        .zip(mu)
        .map(|(&y, &m)| {
            let m = m.max(1e-10);
            ln_gamma(y + alpha_inv) - ln_gamma(alpha_inv) - y * (m + alpha_inv).ln() - alpha_inv * (1.0 + m * alpha).ln()
        })
        .sum();

    let cr = log_det_spd(&xtwx(design, &cr_weights(mu, alpha)), p)
        .map(|ld| -0.5 * ld)
        .unwrap_or(0.0);

    let prior_term = prior.map_or(0.0, |pr| -0.5 * (log_alpha - pr.mean).powi(2) / pr.variance);
    ll + cr + prior_term
}

/// Derivative of [`log_posterior`] with respect to log(alpha)
pub(crate) fn d_log_posterior(
    counts: &[f64],
    design: &Array2<f64>,
    mu: &[f64],
    log_alpha: f64,
    prior: Option<LogNormalPrior>,
) -> f64 {
    let alpha = log_alpha.exp();
    let alpha_inv = 1.0 / alpha;
    let p = design.ncols();

    let ll_sum: f64 = counts
        .iter()
        .zip(mu)
        .map(|(&y, &m)| {
            let m = m.max(1e-10);
            digamma(alpha_inv) + (1.0 + m * alpha).ln() - m * alpha / (1.0 + m * alpha) - digamma(y + alpha_inv)
                + y / (m + alpha_inv)
        })
        .sum();
    let ll_part = alpha_inv * alpha_inv * ll_sum;

    // d/dalpha of -0.5 log|X'WX| is -0.5 tr(B^-1 dB) with dw = -w^2
    let w = cr_weights(mu, alpha);
    let dw: Vec<f64> = w.iter().map(|&wi| -wi * wi).collect();
    let cr_part = match invert_spd(&xtwx(design, &w), p) {
        Some(b_inv) => {
            let db = xtwx(design, &dw);
            let trace: f64 = (0..p).flat_map(|i| (0..p).map(move |j| (i, j))).map(|(i, j)| b_inv[i * p + j] * db[j * p + i]).sum();
            -0.5 * trace
        }
        None => 0.0,
    };

    let prior_part = prior.map_or(0.0, |pr| -(log_alpha - pr.mean) / pr.variance);
    (ll_part + cr_part) * alpha + prior_part
}

/// Armijo line search on log(alpha) starting from `alpha_init`
pub(crate) fn line_search(
    counts: &[f64],
    design: &Array2<f64>,
    mu: &[f64],
    alpha_init: f64,
    max_disp: f64,
    prior: Option<LogNormalPrior>,
    params: &DispersionParams,
) -> LineSearch {
    let stop_below = (params.min_disp / 10.0).ln();
    let mut log_alpha = alpha_init.max(1e-10).ln().clamp(LOG_ALPHA_FLOOR, max_disp.ln());
    let initial_lp = log_posterior(counts, design, mu, log_alpha, prior);
    let mut lp = initial_lp;
    let mut dlp = d_log_posterior(counts, design, mu, log_alpha, prior);
    let mut kappa = params.kappa_0;
    let mut accepted = 0;
    let mut iterations = params.maxit;

    for iter in 0..params.maxit {
        let raw = log_alpha + kappa * dlp;
        if raw < LOG_ALPHA_FLOOR && dlp != 0.0 {
            kappa = (LOG_ALPHA_FLOOR - log_alpha) / dlp;
        }
        if raw > LOG_ALPHA_CEILING && dlp != 0.0 {
            kappa = (LOG_ALPHA_CEILING - log_alpha) / dlp;
        }
        let proposal = log_alpha + kappa * dlp;
        let lp_proposal = log_posterior(counts, design, mu, proposal, prior);

        if -lp_proposal <= -lp - kappa * ARMIJO_EPSILON * dlp * dlp {
            accepted += 1;
            log_alpha = proposal;
            let change = lp_proposal - lp;
            lp = lp_proposal;
            if change < params.disp_tol || log_alpha < stop_below {
                iterations = iter + 1;
                break;
            }
            dlp = d_log_posterior(counts, design, mu, log_alpha, prior);
            kappa = (kappa * 1.1).min(params.kappa_0);
            if accepted % 5 == 0 {
                kappa /= 2.0;
            }
        } else {
            kappa /= 2.0;
        }
    }

    LineSearch {
        log_alpha,
        initial_lp,
        last_lp: lp,
        iterations,
    }
}

/// Coarse then fine grid search over `[min_disp, max_disp]`; returns alpha
pub(crate) fn grid_search(
    counts: &[f64],
    design: &Array2<f64>,
    mu: &[f64],
    min_disp: f64,
    max_disp: f64,
    prior: Option<LogNormalPrior>,
) -> f64 {
    let lo = min_disp.ln();
    let delta = (max_disp.ln() - lo) / (GRID_POINTS - 1) as f64;
    let best_of = |start: f64, step: f64| {
        (0..GRID_POINTS)
            .map(|i| start + i as f64 * step)
            .map(|la| (la, log_posterior(counts, design, mu, la, prior)))
            .fold((start, f64::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best })
            .0
    };

    let coarse = best_of(lo, delta);
    let fine_step = 2.0 * delta / (GRID_POINTS - 1) as f64;
    best_of(coarse - delta, fine_step).exp()
}
