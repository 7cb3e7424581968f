use std::hash::Hash;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::backend::Backend;
use crate::error::Error;
use crate::factor_graph::{Factor, Graph, TruncateKind, VarId};
use crate::gaussian::Gaussian;
use crate::matrix::Matrix;
use crate::rating::Rating;

/// Default initial mean of ratings.
pub const MU: f64 = 25.0;
/// Default initial standard deviation of ratings.
pub const SIGMA: f64 = MU / 3.0;
/// Default distance that guarantees about a 76% chance of winning.
pub const BETA: f64 = SIGMA / 2.0;
/// Default dynamic factor.
pub const TAU: f64 = SIGMA / 100.0;
/// Default draw probability of the game.
pub const DRAW_PROBABILITY: f64 = 0.10;
/// Default convergence tolerance of the message-passing loop.
pub const DELTA: f64 = 0.0001;

/// Builds a [`TrueSkill`] environment with custom constants.
///
/// ```
/// use trueskill::TrueSkill;
///
/// let env = TrueSkill::builder()
///     .draw_probability(0.25)
///     .tau(0.0)
///     .build()?;
/// assert_eq!(env.draw_probability(), 0.25);
/// # Ok::<(), trueskill::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct TrueSkillBuilder {
    mu: f64,
    sigma: f64,
    beta: f64,
    tau: f64,
    draw_probability: f64,
    backend: Backend,
}

impl Default for TrueSkillBuilder {
    fn default() -> TrueSkillBuilder {
        TrueSkillBuilder::new()
    }
}

impl TrueSkillBuilder {
    pub fn new() -> TrueSkillBuilder {
        TrueSkillBuilder {
            mu: MU,
            sigma: SIGMA,
            beta: BETA,
            tau: TAU,
            draw_probability: DRAW_PROBABILITY,
            backend: Backend::Internal,
        }
    }

    /// Initial mean of new ratings.
    pub fn mu(&mut self, mu: f64) -> &mut Self {
        self.mu = mu;
        self
    }

    /// Initial standard deviation of new ratings.
    pub fn sigma(&mut self, sigma: f64) -> &mut Self {
        self.sigma = sigma;
        self
    }

    /// Performance noise: the skill distance giving the better player about
    /// a 76% win chance.
    pub fn beta(&mut self, beta: f64) -> &mut Self {
        self.beta = beta;
        self
    }

    /// Between-match dynamics, added to every prior's variance.
    pub fn tau(&mut self, tau: f64) -> &mut Self {
        self.tau = tau;
        self
    }

    /// Draw probability of the underlying match model, in `[0, 1)`.
    pub fn draw_probability(&mut self, draw_probability: f64) -> &mut Self {
        self.draw_probability = draw_probability;
        self
    }

    pub fn backend(&mut self, backend: Backend) -> &mut Self {
        self.backend = backend;
        self
    }

    pub fn build(&self) -> Result<TrueSkill, Error> {
        let param = |name: &'static str, value: f64| Error::InvalidParameter { name, value };
        if !self.mu.is_finite() {
            return Err(param("mu", self.mu));
        }
        if !(self.sigma.is_finite() && self.sigma > 0.0) {
            return Err(param("sigma", self.sigma));
        }
        if !(self.beta.is_finite() && self.beta > 0.0) {
            return Err(param("beta", self.beta));
        }
        if !(self.tau.is_finite() && self.tau >= 0.0) {
            return Err(param("tau", self.tau));
        }
        if !(0.0..1.0).contains(&self.draw_probability) {
            return Err(param("draw_probability", self.draw_probability));
        }
        Ok(TrueSkill {
            mu: self.mu,
            sigma: self.sigma,
            beta: self.beta,
            tau: self.tau,
            draw_probability: self.draw_probability,
            backend: self.backend,
        })
    }
}

/// A TrueSkill environment: the immutable bundle of rating constants plus
/// the normal-distribution backend. Every rating operation hangs off an
/// environment; games with different dynamics (more draws, more noise)
/// build their own instead of sharing the defaults.
///
/// ```
/// use trueskill::TrueSkill;
///
/// let env = TrueSkill::new();
/// let (alice, bob) = (env.create_rating(), env.create_rating());
/// let (alice, bob) = env.rate_1vs1(alice, bob, false)?;
/// assert!(alice.mu > bob.mu);
/// # Ok::<(), trueskill::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct TrueSkill {
    mu: f64,
    sigma: f64,
    beta: f64,
    tau: f64,
    draw_probability: f64,
    backend: Backend,
}

impl Default for TrueSkill {
    fn default() -> TrueSkill {
        TrueSkill::new()
    }
}

struct Layers {
    rating: Vec<Factor>,
    perf: Vec<Factor>,
    teamperf: Vec<Factor>,
    teamdiff: Vec<Factor>,
    trunc: Vec<Factor>,
    /// Skill variables in flattened (rank-sorted) player order.
    skills: Vec<VarId>,
}

impl TrueSkill {
    /// The default environment.
    pub fn new() -> TrueSkill {
        TrueSkill {
            mu: MU,
            sigma: SIGMA,
            beta: BETA,
            tau: TAU,
            draw_probability: DRAW_PROBABILITY,
            backend: Backend::Internal,
        }
    }

    pub fn builder() -> TrueSkillBuilder {
        TrueSkillBuilder::new()
    }

    pub fn mu(&self) -> f64 {
        self.mu
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    pub fn tau(&self) -> f64 {
        self.tau
    }

    pub fn draw_probability(&self) -> f64 {
        self.draw_probability
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// A rating with this environment's default mean and deviation.
    pub fn create_rating(&self) -> Rating {
        Rating::new(self.mu, self.sigma)
    }

    /// A conservative skill estimate: `mu - k * sigma` with
    /// `k = mu / sigma` of the environment, which is 3 for the default
    /// constants. It starts at zero and goes up as the system grows
    /// confident.
    pub fn expose(&self, rating: Rating) -> f64 {
        let k = self.mu / self.sigma;
        rating.mu - k * rating.sigma
    }

    /// The skill-difference threshold under which `size` players produce a
    /// draw: `ppf((p + 1) / 2) * sqrt(size) * beta`.
    pub fn draw_margin(&self, size: usize) -> f64 {
        self.backend.ppf((self.draw_probability + 1.0) / 2.0) * (size as f64).sqrt() * self.beta
    }

    /// Installs this environment as the process-wide default used by the
    /// crate-level convenience functions.
    pub fn make_global(self) -> Arc<TrueSkill> {
        crate::setup(self)
    }

    /// Recalculates ratings from one match outcome.
    ///
    /// `teams` lists each team's current ratings; the result mirrors that
    /// shape exactly. `ranks` gives each team's finishing rank (lower is
    /// better, equal ranks tie) and defaults to the team order. `weights`
    /// scales each player's contribution for partial play, `1.0` by
    /// default. `min_delta` is the convergence tolerance of the
    /// message-passing loop, [`DELTA`] by default.
    ///
    /// ```
    /// use trueskill::{Rating, TrueSkill};
    ///
    /// let env = TrueSkill::new();
    /// let winners = vec![env.create_rating(), Rating::new(30.0, 4.0)];
    /// let losers = vec![env.create_rating()];
    /// let rated = env.rate(&[winners, losers], None, None, None)?;
    /// assert_eq!(rated.len(), 2);
    /// assert!(rated[0][0].mu > 25.0);
    /// # Ok::<(), trueskill::Error>(())
    /// ```
    pub fn rate(
        &self,
        teams: &[Vec<Rating>],
        ranks: Option<&[usize]>,
        weights: Option<&[Vec<f64>]>,
        min_delta: Option<f64>,
    ) -> Result<Vec<Vec<Rating>>, Error> {
        let min_delta = min_delta.unwrap_or(DELTA);
        if !(min_delta.is_finite() && min_delta > 0.0) {
            return Err(Error::InvalidMinDelta { min_delta });
        }
        validate_teams(teams)?;
        let weights = normalized_weights(teams, weights)?;
        let group_size = teams.len();
        let ranks: Vec<usize> = match ranks {
            Some(ranks) => {
                if ranks.len() != group_size {
                    return Err(Error::RanksMismatch {
                        teams: group_size,
                        ranks: ranks.len(),
                    });
                }
                ranks.to_vec()
            }
            None => (0..group_size).collect(),
        };

        // Sort teams by rank (stable, so tied teams keep their order) and
        // remember the permutation to undo afterwards.
        let mut order: Vec<usize> = (0..group_size).collect();
        order.sort_by_key(|&x| ranks[x]);
        let sorted_teams: Vec<&[Rating]> = order.iter().map(|&x| teams[x].as_slice()).collect();
        let sorted_ranks: Vec<usize> = order.iter().map(|&x| ranks[x]).collect();
        // Weights get a positive floor so that sitting-out players stay
        // numerically connected to their team factor.
        let sorted_weights: Vec<Vec<f64>> = order
            .iter()
            .map(|&x| weights[x].iter().map(|&w| w.max(min_delta)).collect())
            .collect();

        let mut graph = Graph::default();
        let layers =
            self.build_factor_graph(&mut graph, &sorted_teams, &sorted_ranks, &sorted_weights);
        run_schedule(&mut graph, &layers, min_delta)?;

        let mut sorted_result = Vec::with_capacity(group_size);
        let mut skills = layers.skills.iter();
        for team in &sorted_teams {
            let mut group = Vec::with_capacity(team.len());
            for _ in 0..team.len() {
                let skill = skills.next().expect("one skill variable per player");
                let posterior = Rating::from_gaussian(graph.marginal(*skill));
                if posterior.validate().is_err() {
                    return Err(Error::FloatingPoint {
                        context: "posterior extraction",
                    });
                }
                group.push(posterior);
            }
            sorted_result.push(group);
        }

        let mut result = vec![Vec::new(); group_size];
        for (&original, group) in order.iter().zip(sorted_result) {
            result[original] = group;
        }
        Ok(result)
    }

    /// [`rate`](TrueSkill::rate) for teams kept as keyed maps. Weights are
    /// looked up by `(team index, player key)` and default to `1.0`. The
    /// result maps every key of every input team to its posterior rating.
    pub fn rate_keyed<K>(
        &self,
        teams: &[FxHashMap<K, Rating>],
        ranks: Option<&[usize]>,
        weights: Option<&FxHashMap<(usize, K), f64>>,
    ) -> Result<Vec<FxHashMap<K, Rating>>, Error>
    where
        K: Clone + Eq + Hash,
    {
        let mut keys: Vec<Vec<K>> = Vec::with_capacity(teams.len());
        let mut positional: Vec<Vec<Rating>> = Vec::with_capacity(teams.len());
        for team in teams {
            let mut team_keys = Vec::with_capacity(team.len());
            let mut team_ratings = Vec::with_capacity(team.len());
            for (key, &rating) in team {
                team_keys.push(key.clone());
                team_ratings.push(rating);
            }
            keys.push(team_keys);
            positional.push(team_ratings);
        }
        let positional_weights: Option<Vec<Vec<f64>>> = weights.map(|weights| {
            keys.iter()
                .enumerate()
                .map(|(team, team_keys)| {
                    team_keys
                        .iter()
                        .map(|key| {
                            weights
                                .get(&(team, key.clone()))
                                .copied()
                                .unwrap_or(1.0)
                        })
                        .collect()
                })
                .collect()
        });
        let rated = self.rate(&positional, ranks, positional_weights.as_deref(), None)?;
        Ok(keys
            .into_iter()
            .zip(rated)
            .map(|(team_keys, team_ratings)| {
                team_keys.into_iter().zip(team_ratings).collect()
            })
            .collect())
    }

    /// The draw probability of the match were it played now: a scalar in
    /// `(0, 1]`, close to 1 for evenly skilled line-ups. High quality means
    /// a fair, and therefore interesting, match.
    ///
    /// ```
    /// use trueskill::TrueSkill;
    ///
    /// let env = TrueSkill::new();
    /// let (r1, r2) = (env.create_rating(), env.create_rating());
    /// let quality = env.quality(&[vec![r1], vec![r2]], None)?;
    /// assert!((quality - 0.447).abs() < 1e-3);
    /// # Ok::<(), trueskill::Error>(())
    /// ```
    pub fn quality(&self, teams: &[Vec<Rating>], weights: Option<&[Vec<f64>]>) -> Result<f64, Error> {
        validate_teams(teams)?;
        let weights = normalized_weights(teams, weights)?;
        let ratings: Vec<Rating> = teams.iter().flatten().copied().collect();
        let flat_weights: Vec<f64> = weights.iter().flatten().copied().collect();
        let length = ratings.len();
        let team_count = teams.len();

        let mean = Matrix::column(&ratings.iter().map(|r| r.mu).collect::<Vec<_>>());
        let variance = Matrix::diagonal(
            &ratings
                .iter()
                .map(|r| r.sigma * r.sigma)
                .collect::<Vec<_>>(),
        );

        // One row per adjacent team pair: +weight on the first team's
        // players, -weight on the second's.
        let mut rotated_a = Matrix::zeros(team_count - 1, length);
        let mut offset = 0;
        for row in 0..team_count - 1 {
            let cur = teams[row].len();
            let next = teams[row + 1].len();
            for x in offset..offset + cur {
                rotated_a[(row, x)] = flat_weights[x];
            }
            for x in offset + cur..offset + cur + next {
                rotated_a[(row, x)] = -flat_weights[x];
            }
            offset += cur;
        }
        let a = rotated_a.transpose();

        let ata = (&rotated_a * &a).scale(self.beta * self.beta);
        let atsa = &(&rotated_a * &variance) * &a;
        let start = &mean.transpose() * &a;
        let middle = &ata + &atsa;
        let end = &rotated_a * &mean;

        let middle_inv = middle.inverse().ok_or(Error::FloatingPoint {
            context: "match quality",
        })?;
        let e_arg = (&(&start * &middle_inv) * &end).scale(-0.5).determinant();
        let s_arg = ata.determinant() / middle.determinant();
        Ok(e_arg.exp() * s_arg.sqrt())
    }

    /// [`quality`](TrueSkill::quality) for teams kept as keyed maps, with
    /// weights looked up by `(team index, player key)`.
    pub fn quality_keyed<K>(
        &self,
        teams: &[FxHashMap<K, Rating>],
        weights: Option<&FxHashMap<(usize, K), f64>>,
    ) -> Result<f64, Error>
    where
        K: Clone + Eq + Hash,
    {
        let mut positional = Vec::with_capacity(teams.len());
        let mut positional_weights = Vec::with_capacity(teams.len());
        for (team, members) in teams.iter().enumerate() {
            let mut team_ratings = Vec::with_capacity(members.len());
            let mut team_weights = Vec::with_capacity(members.len());
            for (key, &rating) in members {
                team_ratings.push(rating);
                team_weights.push(
                    weights
                        .and_then(|weights| weights.get(&(team, key.clone())))
                        .copied()
                        .unwrap_or(1.0),
                );
            }
            positional.push(team_ratings);
            positional_weights.push(team_weights);
        }
        self.quality(&positional, Some(&positional_weights))
    }

    /// Rates a single head-to-head game: `rating1` belongs to the winner
    /// unless `drawn`.
    pub fn rate_1vs1(
        &self,
        rating1: Rating,
        rating2: Rating,
        drawn: bool,
    ) -> Result<(Rating, Rating), Error> {
        let ranks = [0, if drawn { 0 } else { 1 }];
        let rated = self.rate(&[vec![rating1], vec![rating2]], Some(&ranks), None, None)?;
        Ok((rated[0][0], rated[1][0]))
    }

    /// Match quality of a single head-to-head game.
    pub fn quality_1vs1(&self, rating1: Rating, rating2: Rating) -> Result<f64, Error> {
        self.quality(&[vec![rating1], vec![rating2]], None)
    }

    fn build_factor_graph(
        &self,
        graph: &mut Graph,
        teams: &[&[Rating]],
        ranks: &[usize],
        weights: &[Vec<f64>],
    ) -> Layers {
        let ratings: Vec<Rating> = teams.iter().flat_map(|t| t.iter().copied()).collect();
        let flat_weights: Vec<f64> = weights.iter().flatten().copied().collect();
        let size = ratings.len();
        let team_count = teams.len();

        let skills: Vec<VarId> = (0..size).map(|_| graph.variable()).collect();
        let perfs: Vec<VarId> = (0..size).map(|_| graph.variable()).collect();
        let teamperfs: Vec<VarId> = (0..team_count).map(|_| graph.variable()).collect();
        let teamdiffs: Vec<VarId> = (0..team_count - 1).map(|_| graph.variable()).collect();

        let rating_layer: Vec<Factor> = skills
            .iter()
            .zip(&ratings)
            .map(|(&skill, rating)| Factor::Prior {
                edge: graph.attach(skill),
                prior: Gaussian::new(
                    rating.mu,
                    (rating.sigma * rating.sigma + self.tau * self.tau).sqrt(),
                ),
            })
            .collect();

        let perf_layer: Vec<Factor> = skills
            .iter()
            .zip(&perfs)
            .map(|(&skill, &perf)| Factor::Likelihood {
                mean: graph.attach(skill),
                value: graph.attach(perf),
                variance: self.beta * self.beta,
            })
            .collect();

        let mut teamperf_layer = Vec::with_capacity(team_count);
        let mut start = 0;
        for (team, &teamperf) in teams.iter().zip(&teamperfs) {
            let end = start + team.len();
            teamperf_layer.push(Factor::Sum {
                sum: graph.attach(teamperf),
                terms: perfs[start..end].iter().map(|&p| graph.attach(p)).collect(),
                coeffs: flat_weights[start..end].to_vec(),
            });
            start = end;
        }

        let teamdiff_layer: Vec<Factor> = teamdiffs
            .iter()
            .enumerate()
            .map(|(team, &teamdiff)| Factor::Sum {
                sum: graph.attach(teamdiff),
                terms: vec![
                    graph.attach(teamperfs[team]),
                    graph.attach(teamperfs[team + 1]),
                ],
                coeffs: vec![1.0, -1.0],
            })
            .collect();

        let trunc_layer: Vec<Factor> = teamdiffs
            .iter()
            .enumerate()
            .map(|(team, &teamdiff)| {
                let pair_size = teams[team].len() + teams[team + 1].len();
                Factor::Truncate {
                    edge: graph.attach(teamdiff),
                    kind: if ranks[team] == ranks[team + 1] {
                        TruncateKind::Draw
                    } else {
                        TruncateKind::Win
                    },
                    draw_margin: self.draw_margin(pair_size),
                    backend: self.backend,
                }
            })
            .collect();

        Layers {
            rating: rating_layer,
            perf: perf_layer,
            teamperf: teamperf_layer,
            teamdiff: teamdiff_layer,
            trunc: trunc_layer,
            skills,
        }
    }
}

fn validate_teams(teams: &[Vec<Rating>]) -> Result<(), Error> {
    if teams.len() < 2 {
        return Err(Error::NotEnoughTeams { teams: teams.len() });
    }
    for (index, team) in teams.iter().enumerate() {
        if team.is_empty() {
            return Err(Error::EmptyTeam { team: index });
        }
        for rating in team {
            rating.validate()?;
        }
    }
    Ok(())
}

fn normalized_weights(
    teams: &[Vec<Rating>],
    weights: Option<&[Vec<f64>]>,
) -> Result<Vec<Vec<f64>>, Error> {
    match weights {
        None => Ok(teams.iter().map(|team| vec![1.0; team.len()]).collect()),
        Some(weights) => {
            if weights.len() != teams.len() {
                return Err(Error::WeightsCountMismatch {
                    teams: teams.len(),
                    weights: weights.len(),
                });
            }
            for (team, (members, team_weights)) in teams.iter().zip(weights).enumerate() {
                if team_weights.len() != members.len() {
                    return Err(Error::WeightsMismatch {
                        team,
                        players: members.len(),
                        weights: team_weights.len(),
                    });
                }
                for (player, &weight) in team_weights.iter().enumerate() {
                    if !(0.0..=1.0).contains(&weight) {
                        return Err(Error::InvalidWeight {
                            team,
                            player,
                            weight,
                        });
                    }
                }
            }
            Ok(weights.to_vec())
        }
    }
}

/// The TrueSkill message-passing schedule: one downward pass from the
/// priors, an iterated sweep over the team-difference chain until the
/// truncation updates settle, then one upward pass back to the skills.
fn run_schedule(graph: &mut Graph, layers: &Layers, min_delta: f64) -> Result<(), Error> {
    for factor in layers
        .rating
        .iter()
        .chain(&layers.perf)
        .chain(&layers.teamperf)
    {
        factor.down(graph)?;
    }

    let teamdiff_len = layers.teamdiff.len();
    let max_sweeps = 10 * (teamdiff_len + 1);
    let mut converged = false;
    for _ in 0..max_sweeps {
        let delta = if teamdiff_len == 1 {
            // Only two teams: a single pass settles the chain.
            layers.teamdiff[0].down(graph)?;
            layers.trunc[0].up(graph, 0)?
        } else {
            let mut delta = 0.0f64;
            for x in 0..teamdiff_len - 1 {
                layers.teamdiff[x].down(graph)?;
                delta = delta.max(layers.trunc[x].up(graph, 0)?);
                layers.teamdiff[x].up(graph, 1)?;
            }
            for x in (1..teamdiff_len).rev() {
                layers.teamdiff[x].down(graph)?;
                delta = delta.max(layers.trunc[x].up(graph, 0)?);
                layers.teamdiff[x].up(graph, 0)?;
            }
            delta
        };
        if delta <= min_delta {
            converged = true;
            break;
        }
    }
    if !converged {
        return Err(Error::FloatingPoint {
            context: "message-passing schedule",
        });
    }

    // Both chain ends still owe their outer team an upward message.
    layers.teamdiff[0].up(graph, 0)?;
    layers.teamdiff[teamdiff_len - 1].up(graph, 1)?;

    for factor in &layers.teamperf {
        if let Factor::Sum { terms, .. } = factor {
            for x in 0..terms.len() {
                factor.up(graph, x)?;
            }
        }
    }
    for factor in &layers.perf {
        factor.up(graph, 0)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The golden values below come from sublee's Python `trueskill`
    /// package and are quoted to three decimals, so comparisons use a
    /// 1e-3 tolerance.
    fn assert_rated(rated: &[Vec<Rating>], expected: &[(f64, f64)], tolerance: f64) {
        let flat: Vec<Rating> = rated.iter().flatten().copied().collect();
        assert_eq!(flat.len(), expected.len());
        for (actual, &(mu, sigma)) in flat.iter().zip(expected) {
            assert!(
                (actual.mu - mu).abs() < tolerance,
                "mu {} != expected {mu}",
                actual.mu
            );
            assert!(
                (actual.sigma - sigma).abs() < tolerance,
                "sigma {} != expected {sigma}",
                actual.sigma
            );
        }
    }

    fn assert_quality(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 5e-4,
            "quality {actual} != expected {expected}"
        );
    }

    fn envs() -> Vec<TrueSkill> {
        vec![
            TrueSkill::new(),
            TrueSkill::builder()
                .backend(Backend::Statrs)
                .build()
                .unwrap(),
        ]
    }

    fn teams_of(env: &TrueSkill, sizes: &[usize]) -> Vec<Vec<Rating>> {
        sizes
            .iter()
            .map(|&size| vec![env.create_rating(); size])
            .collect()
    }

    #[test]
    fn n_vs_n() {
        for env in envs() {
            let teams = teams_of(&env, &[1, 1]);
            assert_quality(env.quality(&teams, None).unwrap(), 0.447);
            let rated = env.rate(&teams, None, None, None).unwrap();
            assert_rated(&rated, &[(29.396, 7.171), (20.604, 7.171)], 1e-3);
            let drawn = env.rate(&teams, Some(&[0, 0]), None, None).unwrap();
            assert_rated(&drawn, &[(25.000, 6.458), (25.000, 6.458)], 1e-3);

            let teams = teams_of(&env, &[2, 2]);
            assert_quality(env.quality(&teams, None).unwrap(), 0.447);
            let rated = env.rate(&teams, None, None, None).unwrap();
            assert_rated(
                &rated,
                &[
                    (28.108, 7.774),
                    (28.108, 7.774),
                    (21.892, 7.774),
                    (21.892, 7.774),
                ],
                1e-3,
            );
            let drawn = env.rate(&teams, Some(&[0, 0]), None, None).unwrap();
            assert_rated(&drawn, &[(25.000, 7.455); 4], 1e-3);

            let teams = teams_of(&env, &[4, 4]);
            assert_quality(env.quality(&teams, None).unwrap(), 0.447);
            let rated = env.rate(&teams, None, None, None).unwrap();
            let mut expected = vec![(27.198, 8.059); 4];
            expected.extend_from_slice(&[(22.802, 8.059); 4]);
            assert_rated(&rated, &expected, 1e-3);
        }
    }

    #[test]
    fn one_vs_n() {
        for env in envs() {
            let teams = teams_of(&env, &[1, 2]);
            assert_quality(env.quality(&teams, None).unwrap(), 0.135);
            let rated = env.rate(&teams, None, None, None).unwrap();
            assert_rated(
                &rated,
                &[(33.730, 7.317), (16.270, 7.317), (16.270, 7.317)],
                1e-3,
            );
            let drawn = env.rate(&teams, Some(&[0, 0]), None, None).unwrap();
            assert_rated(
                &drawn,
                &[(31.660, 7.138), (18.340, 7.138), (18.340, 7.138)],
                1e-3,
            );

            let teams = teams_of(&env, &[1, 3]);
            assert_quality(env.quality(&teams, None).unwrap(), 0.012);
            let rated = env.rate(&teams, None, None, None).unwrap();
            assert_rated(
                &rated,
                &[
                    (36.337, 7.527),
                    (13.663, 7.527),
                    (13.663, 7.527),
                    (13.663, 7.527),
                ],
                1e-3,
            );
            let drawn = env.rate(&teams, Some(&[0, 0]), None, None).unwrap();
            assert_rated(
                &drawn,
                &[
                    (34.990, 7.455),
                    (15.010, 7.455),
                    (15.010, 7.455),
                    (15.010, 7.455),
                ],
                1e-2,
            );

            let teams = teams_of(&env, &[1, 7]);
            assert_quality(env.quality(&teams, None).unwrap(), 0.0);
            let rated = env.rate(&teams, None, None, None).unwrap();
            let mut expected = vec![(40.582, 7.917)];
            expected.extend_from_slice(&[(9.418, 7.917); 7]);
            assert_rated(&rated, &expected, 1e-3);
        }
    }

    #[test]
    fn individual_free_for_all() {
        for env in envs() {
            let players = teams_of(&env, &[1, 1, 1]);
            assert_quality(env.quality(&players, None).unwrap(), 0.200);
            let rated = env.rate(&players, None, None, None).unwrap();
            assert_rated(
                &rated,
                &[(31.675, 6.656), (25.000, 6.208), (18.325, 6.656)],
                1e-3,
            );
            let drawn = env.rate(&players, Some(&[0, 0, 0]), None, None).unwrap();
            assert_rated(
                &drawn,
                &[(25.000, 5.698), (25.000, 5.695), (25.000, 5.698)],
                1e-3,
            );

            let players = teams_of(&env, &[1, 1, 1, 1]);
            assert_quality(env.quality(&players, None).unwrap(), 0.089);
            let rated = env.rate(&players, None, None, None).unwrap();
            assert_rated(
                &rated,
                &[
                    (33.207, 6.348),
                    (27.401, 5.787),
                    (22.599, 5.787),
                    (16.793, 6.348),
                ],
                1e-3,
            );

            let players = teams_of(&env, &[1, 1, 1, 1, 1]);
            assert_quality(env.quality(&players, None).unwrap(), 0.040);
            let rated = env.rate(&players, None, None, None).unwrap();
            assert_rated(
                &rated,
                &[
                    (34.363, 6.136),
                    (29.058, 5.536),
                    (25.000, 5.420),
                    (20.942, 5.536),
                    (15.637, 6.136),
                ],
                1e-3,
            );

            let players = teams_of(&env, &[1; 8]);
            assert_quality(env.quality(&players, None).unwrap(), 0.004);
            let drawn = env.rate(&players, Some(&[0; 8]), None, None).unwrap();
            assert_rated(
                &drawn,
                &[
                    (25.000, 4.592),
                    (25.000, 4.583),
                    (25.000, 4.576),
                    (25.000, 4.573),
                    (25.000, 4.573),
                    (25.000, 4.576),
                    (25.000, 4.583),
                    (25.000, 4.592),
                ],
                1e-3,
            );
        }
    }

    #[test]
    fn sixteen_player_free_for_all_converges() {
        for env in envs() {
            let players = teams_of(&env, &[1; 16]);
            let rated = env.rate(&players, None, None, None).unwrap();
            assert_rated(
                &rated,
                &[
                    (40.539, 5.276),
                    (36.810, 4.711),
                    (34.347, 4.524),
                    (32.336, 4.433),
                    (30.550, 4.380),
                    (28.893, 4.349),
                    (27.310, 4.330),
                    (25.766, 4.322),
                    (24.234, 4.322),
                    (22.690, 4.330),
                    (21.107, 4.349),
                    (19.450, 4.380),
                    (17.664, 4.433),
                    (15.653, 4.524),
                    (13.190, 4.711),
                    (9.461, 5.276),
                ],
                1e-3,
            );
        }
    }

    #[test]
    fn multiple_teams_with_ties() {
        for env in envs() {
            let t1 = vec![Rating::new(40.0, 4.0), Rating::new(45.0, 3.0)];
            let t2 = vec![
                Rating::new(20.0, 7.0),
                Rating::new(19.0, 6.0),
                Rating::new(30.0, 9.0),
                Rating::new(10.0, 4.0),
            ];
            let t3 = vec![Rating::new(50.0, 5.0), Rating::new(30.0, 2.0)];
            let teams = vec![t1, t2, t3];
            assert_quality(env.quality(&teams, None).unwrap(), 0.367);
            let rated = env.rate(&teams, Some(&[0, 1, 1]), None, None).unwrap();
            assert_rated(
                &rated,
                &[
                    (40.877, 3.840),
                    (45.493, 2.934),
                    (19.609, 6.396),
                    (18.712, 5.625),
                    (29.353, 7.673),
                    (9.872, 3.891),
                    (48.830, 4.590),
                    (29.813, 1.976),
                ],
                1e-3,
            );

            let teams = teams_of(&env, &[1, 2, 1]);
            assert_quality(env.quality(&teams, None).unwrap(), 0.047);
        }
    }

    #[test]
    fn unsorted_ranks_restore_input_order() {
        let env = TrueSkill::new();
        let teams = teams_of(&env, &[1, 1, 1]);
        let rated = env.rate(&teams, Some(&[2, 1, 0]), None, None).unwrap();
        assert_rated(
            &rated,
            &[(18.325, 6.656), (25.000, 6.208), (31.675, 6.656)],
            1e-3,
        );
    }

    #[test]
    fn upsets() {
        for env in envs() {
            let teams = vec![vec![env.create_rating()], vec![Rating::new(50.0, 12.5)]];
            assert_quality(env.quality(&teams, None).unwrap(), 0.110);
            let drawn = env.rate(&teams, Some(&[0, 0]), None, None).unwrap();
            assert_rated(&drawn, &[(31.662, 7.137), (35.010, 7.910)], 1e-3);

            let t1 = vec![Rating::new(20.0, 8.0), Rating::new(25.0, 6.0)];
            let t2 = vec![Rating::new(35.0, 7.0), Rating::new(40.0, 5.0)];
            let teams = vec![t1, t2];
            assert_quality(env.quality(&teams, None).unwrap(), 0.084);
            let rated = env.rate(&teams, None, None, None).unwrap();
            assert_rated(
                &rated,
                &[
                    (29.698, 7.008),
                    (30.455, 5.594),
                    (27.575, 6.346),
                    (36.211, 4.768),
                ],
                1e-3,
            );

            let t1 = vec![
                Rating::new(28.0, 7.0),
                Rating::new(27.0, 6.0),
                Rating::new(26.0, 5.0),
            ];
            let t2 = vec![Rating::new(30.0, 4.0), Rating::new(31.0, 3.0)];
            let teams = vec![t1, t2];
            assert_quality(env.quality(&teams, None).unwrap(), 0.254);
            let rated = env.rate(&teams, Some(&[0, 1]), None, None).unwrap();
            assert_rated(
                &rated,
                &[
                    (28.658, 6.770),
                    (27.484, 5.856),
                    (26.336, 4.917),
                    (29.785, 3.958),
                    (30.879, 2.983),
                ],
                1e-3,
            );
            let rated = env.rate(&teams, Some(&[1, 0]), None, None).unwrap();
            assert_rated(
                &rated,
                &[
                    (21.840, 6.314),
                    (22.474, 5.575),
                    (22.857, 4.757),
                    (32.012, 3.877),
                    (32.132, 2.949),
                ],
                1e-3,
            );

            let players: Vec<Vec<Rating>> = [
                (10.0, 8.0),
                (15.0, 7.0),
                (20.0, 6.0),
                (25.0, 5.0),
                (30.0, 4.0),
                (35.0, 3.0),
                (40.0, 2.0),
                (45.0, 1.0),
            ]
            .iter()
            .map(|&(mu, sigma)| vec![Rating::new(mu, sigma)])
            .collect();
            assert_quality(env.quality(&players, None).unwrap(), 0.000);
            let rated = env.rate(&players, None, None, None).unwrap();
            assert_rated(
                &rated,
                &[
                    (35.135, 4.506),
                    (32.585, 4.037),
                    (31.329, 3.756),
                    (30.984, 3.453),
                    (31.751, 3.064),
                    (34.051, 2.541),
                    (38.263, 1.849),
                    (44.118, 0.983),
                ],
                1e-3,
            );
        }
    }

    #[test]
    fn partial_play() {
        for env in envs() {
            let teams = teams_of(&env, &[1, 2]);
            // all-ones weights match the unweighted call
            let weighted = env
                .rate(&teams, None, Some(&[vec![1.0], vec![1.0, 1.0]]), None)
                .unwrap();
            assert_eq!(weighted, env.rate(&teams, None, None, None).unwrap());
            assert_rated(
                &weighted,
                &[(33.730, 7.317), (16.270, 7.317), (16.270, 7.317)],
                1e-3,
            );

            let rated = env
                .rate(&teams, None, Some(&[vec![0.5], vec![0.5, 0.5]]), None)
                .unwrap();
            assert_rated(
                &rated,
                &[(33.939, 7.312), (16.061, 7.312), (16.061, 7.312)],
                1e-3,
            );

            // a zero-weight player keeps their prior
            let rated = env
                .rate(&teams, None, Some(&[vec![1.0], vec![0.0, 1.0]]), None)
                .unwrap();
            assert_rated(
                &rated,
                &[(29.440, 7.166), (25.000, 8.333), (20.560, 7.166)],
                1e-3,
            );

            let rated = env
                .rate(&teams, None, Some(&[vec![1.0], vec![0.5, 1.0]]), None)
                .unwrap();
            assert_rated(
                &rated,
                &[(32.417, 7.056), (21.291, 8.033), (17.583, 7.056)],
                1e-3,
            );

            let teams = teams_of(&env, &[1, 2, 1]);
            let quality = env
                .quality(&teams, Some(&[vec![1.0], vec![0.25, 0.75], vec![1.0]]))
                .unwrap();
            assert_quality(quality, 0.2);
            let quality = env
                .quality(&teams, Some(&[vec![1.0], vec![0.8, 0.9], vec![1.0]]))
                .unwrap();
            assert_quality(quality, 0.0809);
        }
    }

    #[test]
    fn keyed_teams_and_weights() {
        let env = TrueSkill::new();
        let teams: Vec<FxHashMap<&str, Rating>> = vec![
            [("solo", env.create_rating())].into_iter().collect(),
            [("active", env.create_rating()), ("benched", env.create_rating())]
                .into_iter()
                .collect(),
        ];
        let weights: FxHashMap<(usize, &str), f64> =
            [((1usize, "benched"), 0.0)].into_iter().collect();
        let rated = env.rate_keyed(&teams, None, Some(&weights)).unwrap();
        assert_eq!(rated.len(), 2);
        assert_eq!(rated[0].len(), 1);
        assert_eq!(rated[1].len(), 2);
        let close = |r: Rating, mu: f64, sigma: f64| {
            (r.mu - mu).abs() < 1e-3 && (r.sigma - sigma).abs() < 1e-3
        };
        assert!(close(rated[0]["solo"], 29.440, 7.166));
        assert!(close(rated[1]["benched"], 25.000, 8.333));
        assert!(close(rated[1]["active"], 20.560, 7.166));

        // a keyed all-default-weight call matches the positional one
        let unweighted = env.rate_keyed(&teams, None, None).unwrap();
        let positional = env
            .rate(&teams_of(&env, &[1, 2]), None, None, None)
            .unwrap();
        assert!(close(
            unweighted[0]["solo"],
            positional[0][0].mu,
            positional[0][0].sigma
        ));

        let quality = env.quality_keyed(&teams, None).unwrap();
        assert_quality(quality, 0.135);
    }

    #[test]
    fn eight_player_free_for_all_keyed() {
        let names = [
            "alice", "bob", "chris", "darren", "eve", "fabien", "george", "hillary",
        ];
        let env = TrueSkill::new();
        let teams: Vec<FxHashMap<&str, Rating>> = names
            .iter()
            .map(|&name| [(name, env.create_rating())].into_iter().collect())
            .collect();
        let rated = env.rate_keyed(&teams, None, None).unwrap();
        let expected = [
            (36.771, 5.749),
            (32.242, 5.133),
            (29.074, 4.943),
            (26.322, 4.874),
            (23.678, 4.874),
            (20.926, 4.943),
            (17.758, 5.133),
            (13.229, 5.749),
        ];
        for (team, (&name, &(mu, sigma))) in names.iter().zip(&expected).enumerate() {
            let rating = rated[team][name];
            assert!((rating.mu - mu).abs() < 1e-3);
            assert!((rating.sigma - sigma).abs() < 1e-3);
        }
    }

    #[test]
    fn head_to_head_shortcuts_match_full_calls() {
        let env = TrueSkill::new();
        let (r1, r2) = (Rating::new(30.0, 3.0), Rating::new(20.0, 2.0));
        assert_eq!(
            env.quality_1vs1(r1, r2).unwrap(),
            env.quality(&[vec![r1], vec![r2]], None).unwrap()
        );
        let rated = env.rate(&[vec![r1], vec![r2]], None, None, None).unwrap();
        assert_eq!(
            env.rate_1vs1(r1, r2, false).unwrap(),
            (rated[0][0], rated[1][0])
        );
        let drawn = env
            .rate(&[vec![r1], vec![r2]], Some(&[0, 0]), None, None)
            .unwrap();
        assert_eq!(
            env.rate_1vs1(r1, r2, true).unwrap(),
            (drawn[0][0], drawn[1][0])
        );
    }

    #[test]
    fn symmetric_inputs_give_mirrored_outputs() {
        let env = TrueSkill::new();
        let (a, b) = (Rating::new(28.0, 6.0), Rating::new(23.0, 5.0));
        let forward = env
            .rate(&[vec![a], vec![b]], Some(&[0, 1]), None, None)
            .unwrap();
        let reversed = env
            .rate(&[vec![b], vec![a]], Some(&[1, 0]), None, None)
            .unwrap();
        assert_eq!(forward[0][0], reversed[1][0]);
        assert_eq!(forward[1][0], reversed[0][0]);
    }

    #[test]
    fn custom_draw_probability() {
        let env = TrueSkill::builder().draw_probability(0.50).build().unwrap();
        let teams = teams_of(&env, &[1, 1]);
        let rated = env.rate(&teams, None, None, None).unwrap();
        assert_rated(&rated, &[(30.267, 7.077), (19.733, 7.077)], 1e-3);
    }

    #[test]
    fn backends_agree_on_ordinary_matches() {
        let [internal, statrs] = [
            TrueSkill::new(),
            TrueSkill::builder()
                .backend(Backend::Statrs)
                .build()
                .unwrap(),
        ];
        let teams = vec![
            vec![Rating::new(31.0, 6.5), Rating::new(24.0, 2.0)],
            vec![Rating::new(27.0, 7.2)],
        ];
        let a = internal.rate(&teams, None, None, None).unwrap();
        let b = statrs.rate(&teams, None, None, None).unwrap();
        // the internal erfc approximation is good to about 1e-7, which
        // propagates to roughly 1e-5 on posteriors
        for (x, y) in a.iter().flatten().zip(b.iter().flatten()) {
            assert!((x.mu - y.mu).abs() < 1e-4);
            assert!((x.sigma - y.sigma).abs() < 1e-4);
        }
    }

    #[test]
    fn two_team_quality_matches_scalar_closed_form() {
        let env = TrueSkill::new();
        let (r1, r2) = (Rating::new(29.0, 6.0), Rating::new(24.5, 3.5));
        let quality = env.quality_1vs1(r1, r2).unwrap();
        let denom = 2.0 * env.beta() * env.beta() + r1.sigma * r1.sigma + r2.sigma * r2.sigma;
        let expected = (2.0 * env.beta() * env.beta() / denom).sqrt()
            * (-(r1.mu - r2.mu) * (r1.mu - r2.mu) / (2.0 * denom)).exp();
        assert!((quality - expected).abs() < 1e-12);
    }

    #[test]
    fn quality_of_near_certain_ratings_approaches_one() {
        let env = TrueSkill::new();
        let (r1, r2) = (Rating::new(25.0, 0.001), Rating::new(25.0, 0.001));
        let quality = env.quality_1vs1(r1, r2).unwrap();
        assert!(quality > 0.999_999_9 && quality <= 1.0);
    }

    #[test]
    fn quality_is_unchanged_by_rating() {
        let env = TrueSkill::new();
        let teams = vec![
            vec![Rating::new(27.0, 6.0)],
            vec![Rating::new(22.0, 5.0), Rating::new(30.0, 2.0)],
        ];
        let before = env.quality(&teams, None).unwrap();
        env.rate(&teams, None, None, None).unwrap();
        let after = env.quality(&teams, None).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn posterior_round_trips_through_mu_sigma() {
        let env = TrueSkill::new();
        let teams = teams_of(&env, &[1, 1]);
        let rated = env.rate(&teams, None, None, None).unwrap();
        let r = rated[0][0];
        assert_eq!(Rating::new(r.mu, r.sigma), r);
    }

    #[test]
    fn dynamics_free_rating_never_loses_information() {
        let env = TrueSkill::builder().tau(0.0).build().unwrap();
        let teams = vec![
            vec![Rating::new(27.0, 6.0)],
            vec![Rating::new(22.0, 5.0), Rating::new(30.0, 2.0)],
            vec![Rating::new(25.0, 8.0)],
        ];
        let rated = env.rate(&teams, Some(&[1, 0, 1]), None, None).unwrap();
        for (before, after) in teams.iter().flatten().zip(rated.iter().flatten()) {
            assert!(after.sigma <= before.sigma + 1e-9);
        }
    }

    #[test]
    fn exposure() {
        let env = TrueSkill::new();
        assert_eq!(env.expose(env.create_rating()), 0.0);
        let env = TrueSkill::builder().mu(1000.0).sigma(200.0).build().unwrap();
        assert_eq!(env.expose(env.create_rating()), 0.0);
        // more certainty, higher exposure
        let env = TrueSkill::new();
        assert!(env.expose(Rating::new(25.0, 2.0)) > env.expose(Rating::new(25.0, 4.0)));
    }

    #[test]
    fn draw_margin_default_head_to_head() {
        let env = TrueSkill::new();
        assert!((env.draw_margin(2) - 0.7405).abs() < 1e-3);
        let no_draws = TrueSkill::builder().draw_probability(0.0).build().unwrap();
        assert!(no_draws.draw_margin(2).abs() < 1e-9);
    }

    #[test]
    fn shape_errors() {
        let env = TrueSkill::new();
        let r = env.create_rating();
        assert_eq!(
            env.rate(&[], None, None, None),
            Err(Error::NotEnoughTeams { teams: 0 })
        );
        assert_eq!(
            env.rate(&[vec![r]], None, None, None),
            Err(Error::NotEnoughTeams { teams: 1 })
        );
        assert_eq!(
            env.rate(&[vec![r], vec![]], None, None, None),
            Err(Error::EmptyTeam { team: 1 })
        );
        assert_eq!(
            env.rate(&[vec![r], vec![r]], Some(&[0]), None, None),
            Err(Error::RanksMismatch { teams: 2, ranks: 1 })
        );
        assert_eq!(
            env.rate(&[vec![r], vec![r]], None, Some(&[vec![1.0]]), None),
            Err(Error::WeightsCountMismatch {
                teams: 2,
                weights: 1
            })
        );
        assert_eq!(
            env.rate(
                &[vec![r], vec![r]],
                None,
                Some(&[vec![1.0], vec![1.0, 1.0]]),
                None
            ),
            Err(Error::WeightsMismatch {
                team: 1,
                players: 1,
                weights: 2
            })
        );
        assert!(env.quality(&[vec![r]], None).is_err());
    }

    #[test]
    fn value_errors() {
        let env = TrueSkill::new();
        let r = env.create_rating();
        assert!(matches!(
            env.rate(&[vec![r], vec![r]], None, None, Some(0.0)),
            Err(Error::InvalidMinDelta { .. })
        ));
        assert!(matches!(
            env.rate(&[vec![r], vec![Rating::new(25.0, 0.0)]], None, None, None),
            Err(Error::InvalidRating { .. })
        ));
        assert!(matches!(
            env.rate(
                &[vec![r], vec![r]],
                None,
                Some(&[vec![1.0], vec![1.5]]),
                None
            ),
            Err(Error::InvalidWeight { .. })
        ));
        assert!(matches!(
            TrueSkill::builder().sigma(0.0).build(),
            Err(Error::InvalidParameter { name: "sigma", .. })
        ));
        assert!(matches!(
            TrueSkill::builder().beta(-1.0).build(),
            Err(Error::InvalidParameter { name: "beta", .. })
        ));
        assert!(matches!(
            TrueSkill::builder().tau(-0.1).build(),
            Err(Error::InvalidParameter { name: "tau", .. })
        ));
        assert!(matches!(
            TrueSkill::builder().draw_probability(1.0).build(),
            Err(Error::InvalidParameter {
                name: "draw_probability",
                ..
            })
        ));
    }

    #[test]
    fn hopeless_upsets_report_precision_loss() {
        for env in envs() {
            let err = env
                .rate_1vs1(Rating::new(-323.263, 2.965), Rating::new(-48.441, 2.190), false)
                .unwrap_err();
            assert!(matches!(err, Error::FloatingPoint { .. }));
            let quality = env
                .quality_1vs1(Rating::new(-323.263, 2.965), Rating::new(-48.441, 2.190))
                .unwrap();
            assert!(quality < 1e-3);

            let err = env
                .rate_1vs1(env.create_rating(), Rating::new(1000.0, SIGMA), false)
                .unwrap_err();
            assert!(matches!(err, Error::FloatingPoint { .. }));
        }
    }

    #[test]
    fn lopsided_but_recoverable_matches_succeed() {
        // regression inputs that used to divide by zero upstream
        // (sublee/trueskill#3)
        let env = TrueSkill::new();
        let t1 = vec![Rating::new(42.234, 3.728), Rating::new(43.290, 3.842)];
        let t2 = vec![Rating::new(16.667, 0.500); 15];
        env.rate(&[t1, t2], Some(&[6, 5]), None, None).unwrap();

        let mut t1 = Vec::new();
        for mu in [25.000, 33.333, 41.667] {
            t1.extend_from_slice(&[Rating::new(mu, 0.500); 4]);
        }
        let t2 = vec![Rating::new(42.234, 3.728), Rating::new(43.291, 3.842)];
        env.rate(&[t1, t2], Some(&[0, 28]), None, None).unwrap();
    }

    #[test]
    fn custom_min_delta_converges() {
        let env = TrueSkill::new();
        let teams = teams_of(&env, &[1, 1]);
        let rated = env.rate(&teams, None, None, Some(0.01)).unwrap();
        assert_rated(&rated, &[(29.396, 7.171), (20.604, 7.171)], 1e-2);
    }
}
