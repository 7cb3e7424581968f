#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use trueskill::{Rating, TrueSkill};

#[derive(Arbitrary, Debug)]
struct ArbitraryRating {
    mu: f64,
    sigma: f64,
    weight: f64,
}

impl ArbitraryRating {
    fn into_clamped(self) -> Option<(Rating, f64)> {
        if self.mu.is_nan() || self.sigma.is_nan() || self.weight.is_nan() {
            None
        } else {
            Some((
                Rating {
                    mu: self.mu.clamp(-1000.0, 1000.0),
                    sigma: self.sigma.abs().clamp(0.001, 100.0),
                },
                self.weight.clamp(0.0, 1.0),
            ))
        }
    }
}

#[derive(Arbitrary, Debug)]
struct ArbitraryMatch {
    teams: Vec<Vec<ArbitraryRating>>,
    ranks: Vec<u8>,
}

fuzz_target!(|arbitrary: ArbitraryMatch| {
    let mut teams = Vec::new();
    let mut weights = Vec::new();
    for team in arbitrary.teams.into_iter().take(8) {
        let mut ratings = Vec::new();
        let mut team_weights = Vec::new();
        for rating in team.into_iter().take(8) {
            let Some((rating, weight)) = rating.into_clamped() else {
                return;
            };
            ratings.push(rating);
            team_weights.push(weight);
        }
        if ratings.is_empty() {
            return;
        }
        teams.push(ratings);
        weights.push(team_weights);
    }
    if teams.len() < 2 || arbitrary.ranks.len() != teams.len() {
        return;
    }
    let ranks: Vec<usize> = arbitrary.ranks.iter().map(|&r| r as usize).collect();

    let env = TrueSkill::new();
    // Either a well-formed result or a reported error, but never a panic
    // and never a non-finite posterior.
    if let Ok(rated) = env.rate(&teams, Some(&ranks), Some(&weights), None) {
        assert_eq!(rated.len(), teams.len());
        for (rated_team, team) in rated.iter().zip(&teams) {
            assert_eq!(rated_team.len(), team.len());
            for rating in rated_team {
                assert!(rating.mu.is_finite());
                assert!(rating.sigma.is_finite());
                assert!(rating.sigma > 0.0);
            }
        }
    }
});
