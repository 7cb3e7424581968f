use thiserror::Error;

/// Errors surfaced at the `rate`/`quality` operation boundary.
///
/// No operation partially commits: on error the input ratings are untouched
/// and nothing is retried internally.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum Error {
    /// A match needs at least two teams.
    #[error("need multiple teams, got {teams}")]
    NotEnoughTeams { teams: usize },

    /// Every team must contain at least one player.
    #[error("team {team} has no players")]
    EmptyTeam { team: usize },

    /// `ranks` must be parallel to `teams`.
    #[error("expected {teams} ranks, got {ranks}")]
    RanksMismatch { teams: usize, ranks: usize },

    /// `weights` must have one entry per team.
    #[error("expected weights for {teams} teams, got {weights}")]
    WeightsCountMismatch { teams: usize, weights: usize },

    /// Positional `weights` must mirror the team shape exactly.
    #[error("weights for team {team} cover {weights} of {players} players")]
    WeightsMismatch {
        team: usize,
        players: usize,
        weights: usize,
    },

    /// A rating with a non-finite mean or non-positive deviation.
    #[error("invalid rating N(mu={mu}, sigma={sigma}): sigma must be finite and positive")]
    InvalidRating { mu: f64, sigma: f64 },

    /// A partial-play weight outside `0.0..=1.0`.
    #[error("weight {weight} for player {player} of team {team} is outside 0..=1")]
    InvalidWeight {
        team: usize,
        player: usize,
        weight: f64,
    },

    /// An environment parameter outside its valid range.
    #[error("invalid environment parameter {name} = {value}")]
    InvalidParameter { name: &'static str, value: f64 },

    /// `min_delta` must be strictly positive.
    #[error("min_delta must be greater than 0, got {min_delta}")]
    InvalidMinDelta { min_delta: f64 },

    /// Floating-point precision was exhausted: a truncation-correction
    /// denominator collapsed, the message-passing sweep hit its iteration
    /// cap without converging, or a posterior came out non-finite. Retrying
    /// with a higher-precision backend is the documented remedy.
    #[error("floating-point precision exhausted in {context}; try a higher-precision backend")]
    FloatingPoint { context: &'static str },
}
