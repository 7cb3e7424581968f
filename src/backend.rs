use std::f64::consts::{PI, SQRT_2};

use statrs::distribution::{Continuous, ContinuousCDF, Normal};

use crate::error::Error;

/// Provider of the standard normal Phi, phi and inverse-Phi at some working
/// precision. Selected when building a [`TrueSkill`](crate::TrueSkill)
/// environment; everything else in the crate only depends on these three
/// functions being correct.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum Backend {
    /// Built-in rational approximations via the complementary error
    /// function. Absolute accuracy around 1e-7, which is plenty for
    /// ordinary ratings but collapses earlier than [`Backend::Statrs`] on
    /// extremely lopsided matches.
    #[default]
    Internal,
    /// The `statrs` crate's `Normal` distribution. Higher precision in the
    /// tails; the documented remedy when the internal backend reports a
    /// floating-point error.
    Statrs,
}

impl Backend {
    /// Cumulative distribution function of the standard normal.
    pub fn cdf(self, x: f64) -> f64 {
        match self {
            Backend::Internal => 0.5 * erfc(-x / SQRT_2),
            Backend::Statrs => std_normal().cdf(x),
        }
    }

    /// Probability density function of the standard normal.
    pub fn pdf(self, x: f64) -> f64 {
        match self {
            Backend::Internal => (1.0 / (2.0 * PI).sqrt()) * (-(x * x) / 2.0).exp(),
            Backend::Statrs => std_normal().pdf(x),
        }
    }

    /// Inverse cumulative distribution function (quantile) of the standard
    /// normal.
    pub fn ppf(self, x: f64) -> f64 {
        match self {
            Backend::Internal => -SQRT_2 * erfcinv(2.0 * x),
            Backend::Statrs => std_normal().inverse_cdf(x),
        }
    }
}

fn std_normal() -> Normal {
    Normal::new(0.0, 1.0).unwrap()
}

/// Complementary error function, Numerical Recipes rational approximation.
fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + z / 2.0);
    let r = t
        * (-z * z - 1.26551223
            + t * (1.00002368
                + t * (0.37409196
                    + t * (0.09678418
                        + t * (-0.18628806
                            + t * (0.27886807
                                + t * (-1.13520398
                                    + t * (1.48851587
                                        + t * (-0.82215223 + t * 0.17087277)))))))))
        .exp();
    if x < 0.0 {
        2.0 - r
    } else {
        r
    }
}

/// Inverse of [`erfc`]: a rational first guess polished by two Newton steps.
fn erfcinv(y: f64) -> f64 {
    if y >= 2.0 {
        return -100.0;
    } else if y <= 0.0 {
        return 100.0;
    }
    let zero_point = y < 1.0;
    let y = if zero_point { y } else { 2.0 - y };
    let t = (-2.0 * (y / 2.0).ln()).sqrt();
    let mut x = -0.70711 * ((2.30753 + t * 0.27061) / (1.0 + t * (0.99229 + t * 0.04481)) - t);
    for _ in 0..2 {
        let err = erfc(x) - y;
        x += err / (1.128_379_167_095_512_6 * (-(x * x)).exp() - x * err);
    }
    if zero_point {
        x
    } else {
        -x
    }
}

// Truncation corrections for the outcome factors. V adjusts a mean, W a
// variance; the win pair truncates the team-performance difference to
// `diff > draw_margin`, the draw pair to `|diff| <= draw_margin`.

pub(crate) fn v_win(backend: Backend, diff: f64, draw_margin: f64) -> f64 {
    let x = diff - draw_margin;
    let denom = backend.cdf(x);
    if denom == 0.0 {
        -x
    } else {
        backend.pdf(x) / denom
    }
}

pub(crate) fn w_win(backend: Backend, diff: f64, draw_margin: f64) -> Result<f64, Error> {
    let x = diff - draw_margin;
    let v = v_win(backend, diff, draw_margin);
    let w = v * (v + x);
    if 0.0 < w && w < 1.0 {
        Ok(w)
    } else {
        Err(Error::FloatingPoint { context: "w_win" })
    }
}

pub(crate) fn v_draw(backend: Backend, diff: f64, draw_margin: f64) -> f64 {
    let abs_diff = diff.abs();
    let (a, b) = (draw_margin - abs_diff, -draw_margin - abs_diff);
    let denom = backend.cdf(a) - backend.cdf(b);
    let v = if denom == 0.0 {
        a
    } else {
        (backend.pdf(b) - backend.pdf(a)) / denom
    };
    if diff < 0.0 {
        -v
    } else {
        v
    }
}

pub(crate) fn w_draw(backend: Backend, diff: f64, draw_margin: f64) -> Result<f64, Error> {
    let abs_diff = diff.abs();
    let (a, b) = (draw_margin - abs_diff, -draw_margin - abs_diff);
    let denom = backend.cdf(a) - backend.cdf(b);
    if denom == 0.0 {
        return Err(Error::FloatingPoint { context: "w_draw" });
    }
    let v = v_draw(backend, abs_diff, draw_margin);
    Ok(v * v + (a * backend.pdf(a) - b * backend.pdf(b)) / denom)
}
