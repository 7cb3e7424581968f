use std::fmt;

use crate::error::Error;
use crate::gaussian::Gaussian;

/// A player's skill belief `N(mu, sigma^2)`. Higher `mu` is better; smaller
/// `sigma` means the system is more certain.
///
/// Ratings are plain values: a rate call never mutates its inputs, it
/// returns new `Rating`s. Use [`TrueSkill::create_rating`] for a rating
/// with the environment's defaults, or construct one directly from stored
/// numbers:
///
/// ```
/// use trueskill::Rating;
///
/// let loaded = Rating::new(27.13, 4.92);
/// assert_eq!(loaded.mu, 27.13);
/// ```
///
/// [`TrueSkill::create_rating`]: crate::TrueSkill::create_rating
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Rating {
    /// Mean of the skill belief.
    pub mu: f64,
    /// Standard deviation of the skill belief. Must be positive.
    pub sigma: f64,
}

impl Rating {
    pub fn new(mu: f64, sigma: f64) -> Rating {
        Rating { mu, sigma }
    }

    /// Checks the invariants every input rating must satisfy: finite mean,
    /// finite positive deviation.
    pub(crate) fn validate(self) -> Result<Rating, Error> {
        if self.mu.is_finite() && self.sigma.is_finite() && self.sigma > 0.0 {
            Ok(self)
        } else {
            Err(Error::InvalidRating {
                mu: self.mu,
                sigma: self.sigma,
            })
        }
    }

    pub(crate) fn from_gaussian(g: Gaussian) -> Rating {
        Rating {
            mu: g.mu(),
            sigma: g.sigma(),
        }
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Rating(mu={:.3}, sigma={:.3})", self.mu, self.sigma)
    }
}
