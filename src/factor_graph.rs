//! Variable/factor substrate for the per-match rating graph.
//!
//! Variables and factors are arena-allocated per call and addressed by
//! index; the graph shape is frozen once built and the whole arena is
//! dropped when the rate call returns. A variable carries its current
//! marginal plus one stored message per adjacent factor edge; factors
//! recompute outgoing messages from the cavity (marginal divided by the
//! stored message) and report the size of the change so the driver can test
//! convergence.

use crate::backend::{self, Backend};
use crate::error::Error;
use crate::gaussian::Gaussian;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct VarId(usize);

/// One factor-variable adjacency: the variable plus the slot of the message
/// this factor last sent it.
#[derive(Debug, Copy, Clone)]
pub(crate) struct Edge {
    var: VarId,
    slot: usize,
}

#[derive(Debug, Default)]
struct Variable {
    value: Gaussian,
    messages: Vec<Gaussian>,
}

#[derive(Debug, Default)]
pub(crate) struct Graph {
    vars: Vec<Variable>,
}

impl Graph {
    pub fn variable(&mut self) -> VarId {
        self.vars.push(Variable::default());
        VarId(self.vars.len() - 1)
    }

    pub fn attach(&mut self, var: VarId) -> Edge {
        let messages = &mut self.vars[var.0].messages;
        messages.push(Gaussian::default());
        Edge {
            var,
            slot: messages.len() - 1,
        }
    }

    pub fn marginal(&self, var: VarId) -> Gaussian {
        self.vars[var.0].value
    }

    fn message(&self, edge: Edge) -> Gaussian {
        self.vars[edge.var.0].messages[edge.slot]
    }

    /// Replaces the stored message on `edge` and folds the change into the
    /// variable's marginal. Returns the convergence delta.
    fn update_message(&mut self, edge: Edge, message: Gaussian) -> f64 {
        let var = &mut self.vars[edge.var.0];
        let old_message = std::mem::replace(&mut var.messages[edge.slot], message);
        let value = var.value / old_message * message;
        let delta = var.value.delta(value);
        var.value = value;
        delta
    }

    /// Forces the variable's marginal to `value`, deriving the message this
    /// factor must have sent to account for the difference. Returns the
    /// convergence delta.
    fn update_value(&mut self, edge: Edge, value: Gaussian) -> f64 {
        let var = &mut self.vars[edge.var.0];
        let old_message = var.messages[edge.slot];
        var.messages[edge.slot] = value * old_message / var.value;
        let delta = var.value.delta(value);
        var.value = value;
        delta
    }
}

#[derive(Debug, Copy, Clone)]
pub(crate) enum TruncateKind {
    /// The higher-ranked team was required to win: truncates the difference
    /// to `diff > draw_margin`.
    Win,
    /// The adjacent teams tied: truncates to `|diff| <= draw_margin`.
    Draw,
}

/// The five factor kinds of the rating graph, dispatched by tag.
#[derive(Debug, Clone)]
pub(crate) enum Factor {
    /// Anchors a skill variable to the player's (dynamics-inflated) prior.
    Prior { edge: Edge, prior: Gaussian },
    /// `value = mean + N(0, variance)`; links skill to match performance.
    Likelihood {
        mean: Edge,
        value: Edge,
        variance: f64,
    },
    /// `sum = dot(coeffs, terms)`; links performances to team performance
    /// and team performances to their pairwise difference.
    Sum {
        sum: Edge,
        terms: Vec<Edge>,
        coeffs: Vec<f64>,
    },
    /// Moment-matched outcome truncation on a team-difference variable.
    Truncate {
        edge: Edge,
        kind: TruncateKind,
        draw_margin: f64,
        backend: Backend,
    },
}

impl Factor {
    /// Sends the message away from the priors (towards the team-difference
    /// chain).
    pub fn down(&self, g: &mut Graph) -> Result<f64, Error> {
        Ok(match *self {
            Factor::Prior { edge, prior } => g.update_value(edge, prior),
            Factor::Likelihood {
                mean,
                value,
                variance,
            } => {
                let div = g.marginal(mean.var) / g.message(mean);
                let a = 1.0 / (1.0 + variance * div.pi);
                g.update_message(value, Gaussian::with_precision(a * div.pi, a * div.tau))
            }
            Factor::Sum {
                sum,
                ref terms,
                ref coeffs,
            } => sum_update(g, sum, terms, coeffs),
            Factor::Truncate { .. } => unreachable!("truncation factors only send upward"),
        })
    }

    /// Sends the message back towards the priors. For a weighted-sum factor
    /// `index` selects which term variable to update; the other kinds own a
    /// single upward edge and ignore it.
    pub fn up(&self, g: &mut Graph, index: usize) -> Result<f64, Error> {
        match *self {
            Factor::Prior { .. } => unreachable!("prior factors only send downward"),
            Factor::Likelihood {
                mean,
                value,
                variance,
            } => {
                let div = g.marginal(value.var) / g.message(value);
                let a = 1.0 / (1.0 + variance * div.pi);
                Ok(g.update_message(mean, Gaussian::with_precision(a * div.pi, a * div.tau)))
            }
            Factor::Sum {
                sum,
                ref terms,
                ref coeffs,
            } => {
                // Invert `sum = dot(coeffs, terms)` around terms[index]:
                // terms[index] = (sum - sum of the other terms) / coeff.
                let coeff = coeffs[index];
                let inverted: Vec<f64> = coeffs
                    .iter()
                    .enumerate()
                    .map(|(x, &c)| {
                        if coeff == 0.0 {
                            0.0
                        } else if x == index {
                            1.0 / coeff
                        } else {
                            -c / coeff
                        }
                    })
                    .collect();
                let mut sources = terms.clone();
                sources[index] = sum;
                Ok(sum_update(g, terms[index], &sources, &inverted))
            }
            Factor::Truncate {
                edge,
                kind,
                draw_margin,
                backend,
            } => {
                let div = g.marginal(edge.var) / g.message(edge);
                let sqrt_pi = div.pi.sqrt();
                let diff = div.tau / sqrt_pi;
                let margin = draw_margin * sqrt_pi;
                let (v, w) = match kind {
                    TruncateKind::Win => (
                        backend::v_win(backend, diff, margin),
                        backend::w_win(backend, diff, margin)?,
                    ),
                    TruncateKind::Draw => (
                        backend::v_draw(backend, diff, margin),
                        backend::w_draw(backend, diff, margin)?,
                    ),
                };
                let denom = 1.0 - w;
                let pi = div.pi / denom;
                let tau = (div.tau + sqrt_pi * v) / denom;
                Ok(g.update_value(edge, Gaussian::with_precision(pi, tau)))
            }
        }
    }
}

/// Linear-Gaussian message towards `target`: mean is the coefficient-weighted
/// sum of the source cavities, precision the harmonic combination of theirs.
/// An uninformative source makes the whole message uninformative.
fn sum_update(g: &mut Graph, target: Edge, sources: &[Edge], coeffs: &[f64]) -> f64 {
    let mut pi_inv = 0.0;
    let mut mu = 0.0;
    for (&edge, &coeff) in sources.iter().zip(coeffs) {
        let div = g.marginal(edge.var) / g.message(edge);
        mu += coeff * div.mu();
        if pi_inv == f64::INFINITY {
            continue;
        }
        if div.pi == 0.0 {
            pi_inv = f64::INFINITY;
        } else {
            pi_inv += coeff * coeff / div.pi;
        }
    }
    let pi = 1.0 / pi_inv;
    let tau = pi * mu;
    g.update_message(target, Gaussian::with_precision(pi, tau))
}
