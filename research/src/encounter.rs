use std::str::FromStr;

use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr};
use thiserror::Error;

#[serde_as]
#[derive(Deserialize)]
pub struct RawEncounter {
    pub first: String,
    pub second: String,
    #[serde_as(as = "DisplayFromStr")]
    pub result: MatchResult,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MatchResult {
    FirstWins,
    SecondWins,
    Draw,
}

#[derive(Debug, Error)]
#[error("invalid match result")]
pub struct InvalidMatchResult;

impl FromStr for MatchResult {
    type Err = InvalidMatchResult;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "first" | "1-0" => MatchResult::FirstWins,
            "second" | "0-1" => MatchResult::SecondWins,
            "draw" | "1/2-1/2" => MatchResult::Draw,
            _ => return Err(InvalidMatchResult),
        })
    }
}

impl MatchResult {
    /// Realized score from the first player's perspective.
    pub fn first_score(self) -> f64 {
        match self {
            MatchResult::FirstWins => 1.0,
            MatchResult::SecondWins => 0.0,
            MatchResult::Draw => 0.5,
        }
    }

    pub fn drawn(self) -> bool {
        self == MatchResult::Draw
    }

    /// The encounter ordered winner-first, as `rate_1vs1` expects.
    pub fn winner_first(self, first: PlayerId, second: PlayerId) -> (PlayerId, PlayerId) {
        match self {
            MatchResult::SecondWins => (second, first),
            _ => (first, second),
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct PlayerId(pub usize);

#[derive(Default)]
pub struct PlayerIds {
    inner: FxHashMap<Box<str>, PlayerId>,
}

impl PlayerIds {
    pub fn get_or_insert(&mut self, name: String) -> PlayerId {
        let next_id = PlayerId(self.inner.len());
        *self.inner.entry(name.into_boxed_str()).or_insert(next_id)
    }

    pub fn get(&self, name: &str) -> Option<PlayerId> {
        self.inner.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

pub struct ByPlayerId<T> {
    inner: Vec<Option<T>>,
}

impl<T> Default for ByPlayerId<T> {
    fn default() -> Self {
        ByPlayerId { inner: Vec::new() }
    }
}

impl<T> ByPlayerId<T> {
    pub fn get(&self, PlayerId(id): PlayerId) -> Option<&T> {
        match self.inner.get(id) {
            Some(Some(value)) => Some(value),
            _ => None,
        }
    }

    pub fn set(&mut self, PlayerId(id): PlayerId, value: T) {
        if self.inner.len() <= id {
            self.inner.resize_with(id + 1, || None);
        }
        self.inner[id] = Some(value);
    }

    pub fn table(&self) -> &[Option<T>] {
        &self.inner
    }
}
