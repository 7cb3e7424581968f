use std::{error::Error as StdError, fs::File, io, io::Write};

use clap::Parser as _;
use compensated_summation::KahanBabuskaNeumaier;
use ordered_float::OrderedFloat;
use rayon::prelude::*;
use trueskill::{Backend, Rating, TrueSkill};
use trueskill_research::encounter::{ByPlayerId, MatchResult, PlayerId, PlayerIds, RawEncounter};
use uuid::Uuid;

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

struct Encounter {
    first: PlayerId,
    second: PlayerId,
    result: MatchResult,
}

/// Log likelihood deviance of a win-probability prediction against the
/// realized score. Lower is better.
fn deviance(expected: f64, actual: f64) -> f64 {
    let expected = expected.clamp(0.01, 0.99);
    -(actual * expected.log10() + (1.0 - actual) * (1.0 - expected).log10())
}

struct Experiment {
    env: TrueSkill,
    leaderboard: ByPlayerId<Rating>,
    total_deviance: KahanBabuskaNeumaier<f64>,
    total_games: u64,
    errors: u64,
}

impl Experiment {
    fn new(env: TrueSkill) -> Experiment {
        Experiment {
            env,
            leaderboard: ByPlayerId::default(),
            total_deviance: KahanBabuskaNeumaier::default(),
            total_games: 0,
            errors: 0,
        }
    }

    fn sort_key(&self) -> impl Ord {
        OrderedFloat(-self.total_deviance.total())
    }

    /// Pre-match probability that `first` beats `second`.
    fn win_probability(&self, first: Rating, second: Rating) -> f64 {
        let beta = self.env.beta();
        let denom =
            (2.0 * beta * beta + first.sigma * first.sigma + second.sigma * second.sigma).sqrt();
        self.env.backend().cdf((first.mu - second.mu) / denom)
    }

    fn batch_encounters(&mut self, encounters: &[Encounter]) {
        for encounter in encounters {
            self.encounter(encounter);
        }
    }

    fn encounter(&mut self, encounter: &Encounter) {
        let first = self
            .leaderboard
            .get(encounter.first)
            .copied()
            .unwrap_or_else(|| self.env.create_rating());
        let second = self
            .leaderboard
            .get(encounter.second)
            .copied()
            .unwrap_or_else(|| self.env.create_rating());

        self.total_deviance += deviance(
            self.win_probability(first, second),
            encounter.result.first_score(),
        );
        self.total_games += 1;

        let (winner_id, loser_id) = encounter
            .result
            .winner_first(encounter.first, encounter.second);
        let (winner, loser) = if winner_id == encounter.first {
            (first, second)
        } else {
            (second, first)
        };
        let (winner, loser) = self
            .env
            .rate_1vs1(winner, loser, encounter.result.drawn())
            .unwrap_or_else(|_| {
                self.errors += 1;
                (self.env.create_rating(), self.env.create_rating())
            });

        self.leaderboard.set(winner_id, winner);
        self.leaderboard.set(loser_id, loser);
    }

    fn avg_deviance(&self) -> f64 {
        self.total_deviance.total() / self.total_games as f64
    }

    fn estimate_avg_rating(&self) -> f64 {
        let mut total_rating = KahanBabuskaNeumaier::default();
        let mut num_ratings: u64 = 0;

        let table = self.leaderboard.table();
        let mut i = 0;
        while i < table.len() {
            if let Some(rating) = &table[i] {
                total_rating += rating.mu;
                num_ratings += 1;
            }
            i += 1000;
        }

        total_rating.total() / num_ratings as f64
    }

    fn estimate_percentiles(&self) -> (f64, f64, f64, f64, f64) {
        let mut samples = Vec::new();

        let table = self.leaderboard.table();
        let mut i = 0;
        while i < table.len() {
            if let Some(rating) = &table[i] {
                samples.push(OrderedFloat(rating.mu));
            }
            i += 1000;
        }

        samples.sort_unstable();

        let p = |x: usize| {
            samples
                .get(samples.len() * x / 100)
                .copied()
                .map(f64::from)
                .unwrap_or(f64::NAN)
        };

        (p(1), p(10), p(50), p(90), p(99))
    }
}

fn write_report<W: Write>(
    mut writer: W,
    players: &PlayerIds,
    experiments: &[Experiment],
) -> io::Result<()> {
    let mut num_encounters = 0;
    let mut total_errors = 0;

    writeln!(writer, "beta,tau,draw_probability,backend,avg_deviance")?;

    for experiment in experiments {
        writeln!(
            writer,
            "{},{},{},{:?},{}",
            experiment.env.beta(),
            experiment.env.tau(),
            experiment.env.draw_probability(),
            experiment.env.backend(),
            experiment.avg_deviance()
        )?;

        num_encounters = experiment.total_games; // Not summing
        total_errors += experiment.errors;
    }

    writeln!(writer, "# ---")?;

    let best_experiment = experiments.last().expect("at least one experiment");

    let (p1, p10, median, p90, p99) = best_experiment.estimate_percentiles();
    let avg = best_experiment.estimate_avg_rating();
    writeln!(
        writer,
        "# Estimated mu distribution: p1 {p1:.1}, p10 {p10:.1}, median {median:.1}, p90 {p90:.1}, p99 {p99:.1}, avg {avg:.1}",
    )?;
    writeln!(writer, "# Distinct players: {}", players.len())?;
    writeln!(writer, "# Processed encounters: {num_encounters}")?;
    writeln!(writer, "# Total errors: {total_errors}")?;
    writeln!(writer, "# ---")?;

    Ok(())
}

#[derive(clap::Parser)]
struct Opt {
    #[clap(long, value_delimiter = ',', num_args = 1.., default_value = "4.166666666666667")]
    beta: Vec<f64>,
    #[clap(long, value_delimiter = ',', num_args = 1.., default_value = "0.08333333333333333")]
    tau: Vec<f64>,
    #[clap(long, value_delimiter = ',', num_args = 1.., default_value = "0.1")]
    draw_probability: Vec<f64>,
    /// 0 for the internal backend, 1 for statrs.
    #[clap(long, value_delimiter = ',', num_args = 1.., default_value = "0")]
    statrs: Vec<u8>,
}

fn main() -> Result<(), Box<dyn StdError>> {
    let opt = Opt::parse();

    let process_uuid = Uuid::now_v7();

    let mut experiments = Vec::new();

    for &beta in &opt.beta {
        for &tau in &opt.tau {
            for &draw_probability in &opt.draw_probability {
                for &statrs in &opt.statrs {
                    experiments.push(Experiment::new(
                        TrueSkill::builder()
                            .beta(beta)
                            .tau(tau)
                            .draw_probability(draw_probability)
                            .backend(if statrs != 0 {
                                Backend::Statrs
                            } else {
                                Backend::Internal
                            })
                            .build()?,
                    ));
                }
            }
        }
    }

    println!("# Parallel experiments: {}", experiments.len());
    println!("# ---");

    let mut reader = csv::Reader::from_reader(io::stdin().lock());

    let mut players = PlayerIds::default();

    let mut batch = Vec::new();

    let process_batch = |batch: &mut Vec<Encounter>,
                             players: &PlayerIds,
                             experiments: &mut Vec<Experiment>,
                             final_batch: bool|
     -> io::Result<()> {
        experiments
            .par_iter_mut()
            .for_each(|experiment| experiment.batch_encounters(batch));

        batch.clear();

        experiments.sort_by_key(Experiment::sort_key);
        write_report(
            File::create(format!(
                "{}report-{}.csv",
                if final_batch { "" } else { "progress-" },
                process_uuid
            ))?,
            players,
            experiments,
        )?;
        write_report(io::stdout(), players, experiments)
    };

    for encounter in reader.deserialize() {
        let encounter: RawEncounter = encounter?;

        batch.push(Encounter {
            first: players.get_or_insert(encounter.first),
            second: players.get_or_insert(encounter.second),
            result: encounter.result,
        });

        if batch.len() >= 100_000 {
            process_batch(&mut batch, &players, &mut experiments, false)?;
        }
    }

    process_batch(&mut batch, &players, &mut experiments, true)?;

    Ok(())
}
