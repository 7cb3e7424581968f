//! Implementation of the TrueSkill rating system for team matches.
//!
//! See <https://www.microsoft.com/en-us/research/project/trueskill-ranking-system/>
//! for a description of the model: each player's skill is a Gaussian
//! belief, each match builds a small factor graph over the participating
//! teams, and approximate message passing (Expectation Propagation with
//! truncated-Gaussian moment matching at the outcome factors) turns the
//! observed ranking into posterior skills. Matches may have any number of
//! teams, unequal team sizes, ties between teams and per-player
//! partial-play weights.
//!
//! This implementation promises:
//!
//! - Ratings are plain values. A rate call never mutates its inputs; it
//!   returns new [`Rating`]s mirroring the input team shape exactly.
//! - No panics on any input: malformed matches, invalid values and lost
//!   floating-point precision all surface as [`Error`].
//! - Rating is deterministic for a fixed environment and backend, and
//!   concurrent calls share no mutable state apart from the explicit
//!   process-wide default environment.
//!
//! # Quickstart
//!
//! ```
//! use trueskill::{Rating, TrueSkill};
//!
//! let env = TrueSkill::new();
//!
//! // A fresh player against a seasoned one.
//! let newbie = env.create_rating();
//! let veteran = Rating::new(30.0, 4.0);
//!
//! // An upset: the newbie wins.
//! let (newbie, veteran) = env.rate_1vs1(newbie, veteran, false)?;
//! assert!(newbie.mu > 25.0);
//! assert!(veteran.mu < 30.0);
//!
//! // Team matches take one Vec per team, ordered by finishing rank.
//! let rated = env.rate(
//!     &[vec![newbie, veteran], vec![env.create_rating(); 2]],
//!     None,
//!     None,
//!     None,
//! )?;
//! assert_eq!(rated.len(), 2);
//! # Ok::<(), trueskill::Error>(())
//! ```

#![forbid(unsafe_code)]

mod backend;
mod env;
mod error;
mod factor_graph;
mod gaussian;
mod matrix;
mod rating;

use std::hash::Hash;
use std::sync::{Arc, RwLock};

use rustc_hash::FxHashMap;

pub use backend::Backend;
pub use env::{TrueSkill, TrueSkillBuilder, BETA, DELTA, DRAW_PROBABILITY, MU, SIGMA, TAU};
pub use error::Error;
pub use rating::Rating;

static GLOBAL: RwLock<Option<Arc<TrueSkill>>> = RwLock::new(None);

/// A snapshot of the process-wide default environment used by the
/// crate-level convenience functions. Lazily initialized with the library
/// defaults on first use; replaceable with [`setup`].
pub fn global_env() -> Arc<TrueSkill> {
    if let Some(env) = GLOBAL.read().expect("environment lock").as_ref() {
        return Arc::clone(env);
    }
    Arc::clone(
        GLOBAL
            .write()
            .expect("environment lock")
            .get_or_insert_with(|| Arc::new(TrueSkill::new())),
    )
}

/// Installs `env` as the process-wide default environment.
///
/// The swap is atomic with respect to concurrent readers: every call in
/// flight keeps the snapshot it started with.
///
/// ```
/// use trueskill::TrueSkill;
///
/// trueskill::setup(TrueSkill::builder().mu(50.0).build()?);
/// assert_eq!(trueskill::create_rating().mu, 50.0);
/// # Ok::<(), trueskill::Error>(())
/// ```
pub fn setup(env: TrueSkill) -> Arc<TrueSkill> {
    let env = Arc::new(env);
    *GLOBAL.write().expect("environment lock") = Some(Arc::clone(&env));
    env
}

/// A rating with the default environment's initial mean and deviation.
pub fn create_rating() -> Rating {
    global_env().create_rating()
}

/// [`TrueSkill::rate`] on the default environment.
pub fn rate(
    teams: &[Vec<Rating>],
    ranks: Option<&[usize]>,
    weights: Option<&[Vec<f64>]>,
    min_delta: Option<f64>,
) -> Result<Vec<Vec<Rating>>, Error> {
    global_env().rate(teams, ranks, weights, min_delta)
}

/// [`TrueSkill::rate_keyed`] on the default environment.
pub fn rate_keyed<K>(
    teams: &[FxHashMap<K, Rating>],
    ranks: Option<&[usize]>,
    weights: Option<&FxHashMap<(usize, K), f64>>,
) -> Result<Vec<FxHashMap<K, Rating>>, Error>
where
    K: Clone + Eq + Hash,
{
    global_env().rate_keyed(teams, ranks, weights)
}

/// [`TrueSkill::quality`] on the default environment.
pub fn quality(teams: &[Vec<Rating>], weights: Option<&[Vec<f64>]>) -> Result<f64, Error> {
    global_env().quality(teams, weights)
}

/// [`TrueSkill::rate_1vs1`] on the default environment.
pub fn rate_1vs1(rating1: Rating, rating2: Rating, drawn: bool) -> Result<(Rating, Rating), Error> {
    global_env().rate_1vs1(rating1, rating2, drawn)
}

/// [`TrueSkill::quality_1vs1`] on the default environment.
pub fn quality_1vs1(rating1: Rating, rating2: Rating) -> Result<f64, Error> {
    global_env().quality_1vs1(rating1, rating2)
}

/// [`TrueSkill::expose`] on the default environment.
pub fn expose(rating: Rating) -> f64 {
    global_env().expose(rating)
}
