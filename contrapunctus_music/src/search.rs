// Monte Carlo beam search over action sequences.
//
// The search keeps a set of stubs (action prefixes) and a pool of records
// (played episodes with their final rewards). Each iteration:
//
// 1. Picks the number of trials from `n_trials_schedule`, indexed by the
//    current stub length and clamped to the last entry. With
//    `trials_estimation` set, each stub instead gets a count proportional to
//    the estimated number of continuations a few actions deep, so wide parts
//    of the tree are sampled harder than narrow ones.
// 2. For every stub, replays it on a reset environment (roll-in), then plays
//    that many independent continuations to the end of the episode with the
//    rollout policy (roll-out). Rollouts run on a rayon pool; each clones the
//    rolled-in environment and gets its own generator forked from the run
//    seed, so results do not depend on thread count or scheduling.
// 3. Sorts all records by reward, derives the next stubs (the best distinct
//    prefixes one action longer), and prunes the records to the best
//    `n_records_to_keep` distinct ones.
//
// The loop ends when no stub can be extended. Only records of completed
// pieces are returned; dead ends take part in ranking but are never handed
// back as results.
//
// The rollout policy is a seam for external agents: the default
// `UniformPolicy` picks uniformly among valid actions.

use crate::environment::Environment;
use crate::error::{MusicError, Result};
use contrapunctus_prng::SearchRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Rollouts per stub sized from the stub's own branching.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrialsEstimation {
    /// Actions looked ahead.
    pub depth: usize,
    /// Random walks averaged.
    pub width: usize,
    /// Trials per estimated continuation.
    pub factor: f64,
}

/// Beam search parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeamSearchConfig {
    /// Stubs kept per iteration and sequences returned.
    pub beam_width: usize,
    /// Records kept between iterations.
    pub n_records_to_keep: usize,
    /// Rollouts per stub, by stub length; the last entry repeats.
    pub n_trials_schedule: Vec<usize>,
    /// Replaces `n_trials_schedule` when set.
    pub trials_estimation: Option<TrialsEstimation>,
    /// Whether finished sequences count toward `beam_width` when stubs are made.
    pub include_finalized_sequences: bool,
    /// Rollout threads; `None` uses rayon's default.
    pub n_workers: Option<usize>,
    pub seed: u64,
}

impl Default for BeamSearchConfig {
    fn default() -> Self {
        BeamSearchConfig {
            beam_width: 3,
            n_records_to_keep: 10,
            n_trials_schedule: vec![200, 100, 50, 20],
            trials_estimation: None,
            include_finalized_sequences: true,
            n_workers: None,
            seed: 42,
        }
    }
}

impl BeamSearchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.beam_width == 0 {
            return Err(MusicError::InvalidSearch(
                "beam_width must be positive".to_string(),
            ));
        }
        if self.n_records_to_keep == 0 {
            return Err(MusicError::InvalidSearch(
                "n_records_to_keep must be positive".to_string(),
            ));
        }
        match &self.trials_estimation {
            None if self.n_trials_schedule.is_empty() || self.n_trials_schedule.contains(&0) => {
                return Err(MusicError::InvalidSearch(format!(
                    "n_trials_schedule must be non-empty and positive, got {:?}",
                    self.n_trials_schedule
                )));
            }
            Some(estimation)
                if estimation.depth == 0
                    || estimation.width == 0
                    || !(estimation.factor.is_finite() && estimation.factor > 0.0) =>
            {
                return Err(MusicError::InvalidSearch(format!(
                    "trials_estimation needs positive depth, width and factor, got {estimation:?}"
                )));
            }
            _ => {}
        }
        if self.n_workers == Some(0) {
            return Err(MusicError::InvalidSearch(
                "n_workers must be positive".to_string(),
            ));
        }
        Ok(())
    }

    fn n_trials(&self, stub_length: usize) -> usize {
        let index = stub_length.min(self.n_trials_schedule.len().saturating_sub(1));
        self.n_trials_schedule.get(index).copied().unwrap_or(1)
    }
}

/// Trials for a rolled-in environment: `factor` times the mean, over `width`
/// random walks, of the product of branching factors met along the first
/// `depth` actions. At least one.
pub fn estimate_number_of_trials<E>(
    env: &E,
    estimation: &TrialsEstimation,
    rng: &mut SearchRng,
) -> Result<usize>
where
    E: Environment + Clone,
{
    let mut total = 0.0;
    for _ in 0..estimation.width {
        let mut walker = env.clone();
        let mut n_leaves = 1.0;
        for _ in 0..estimation.depth {
            if walker.is_done() {
                break;
            }
            let valid = walker.valid_actions();
            let n_valid = valid.len();
            let Some(&action) = rng.choose(valid) else {
                break;
            };
            n_leaves *= n_valid as f64;
            walker.step(action)?;
        }
        total += n_leaves;
    }
    let mean = total / estimation.width as f64;
    Ok(((estimation.factor * mean).round() as usize).max(1))
}

/// One played episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub actions: Vec<usize>,
    pub reward: f64,
    /// False when the episode stopped at a dead end.
    pub complete: bool,
}

/// Chooses actions during roll-out.
pub trait RolloutPolicy: Sync {
    /// Pick one of `valid_actions`, or `None` if there is nothing to pick.
    fn choose_action(
        &self,
        observation: &[f64],
        valid_actions: &[usize],
        rng: &mut SearchRng,
    ) -> Option<usize>;
}

/// Uniform choice among valid actions.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformPolicy;

impl RolloutPolicy for UniformPolicy {
    fn choose_action(
        &self,
        _observation: &[f64],
        valid_actions: &[usize],
        rng: &mut SearchRng,
    ) -> Option<usize> {
        rng.choose(valid_actions).copied()
    }
}

/// Reset the environment and replay `actions`.
pub fn roll_in<E: Environment>(env: &mut E, actions: &[usize]) -> Result<()> {
    env.reset();
    for &action in actions {
        env.step(action)?;
    }
    Ok(())
}

/// Continue an episode with `policy` until it ends.
pub fn roll_out<E, P>(
    env: &mut E,
    past_actions: Vec<usize>,
    policy: &P,
    rng: &mut SearchRng,
) -> Result<Record>
where
    E: Environment + ?Sized,
    P: RolloutPolicy + ?Sized,
{
    let mut actions = past_actions;
    let mut reward = f64::NEG_INFINITY;
    while !env.is_done() {
        let observation = env.observation();
        let Some(action) = policy.choose_action(&observation, env.valid_actions(), rng) else {
            break;
        };
        let outcome = env.step(action)?;
        actions.push(action);
        reward = outcome.reward;
    }
    Ok(Record {
        actions,
        reward,
        complete: env.is_complete(),
    })
}

fn sort_records(records: &mut [Record]) {
    records.sort_by(|a, b| b.reward.total_cmp(&a.reward));
}

/// Prefixes of length `stub_length` to expand next.
///
/// `records` must be sorted by reward, best first. Prefixes are taken in
/// that order without repeats. A record no longer than `stub_length` is
/// finished and cannot be extended; with `include_finalized_sequences` it
/// still uses up one of the `n_stubs` slots, so fewer stubs may come back.
pub fn create_stubs(
    records: &[Record],
    n_stubs: usize,
    stub_length: usize,
    include_finalized_sequences: bool,
) -> Vec<Vec<usize>> {
    let mut n_stubs = n_stubs;
    let mut stubs: Vec<Vec<usize>> = Vec::new();
    for record in records {
        if stubs.len() >= n_stubs {
            break;
        }
        let key = &record.actions[..stub_length.min(record.actions.len())];
        if stubs.iter().any(|stub| stub.as_slice() == key) {
            continue;
        }
        if record.actions.len() <= stub_length {
            if include_finalized_sequences {
                n_stubs = n_stubs.saturating_sub(1);
            }
            continue;
        }
        stubs.push(key.to_vec());
    }
    stubs
}

/// The best `n` records with distinct action sequences, best first.
pub fn select_distinct_best_records(records: &[Record], n: usize) -> Vec<Record> {
    let mut sorted = records.to_vec();
    sort_records(&mut sorted);
    let mut selected: Vec<Record> = Vec::with_capacity(n);
    for record in sorted {
        if selected.len() == n {
            break;
        }
        if selected.iter().all(|kept| kept.actions != record.actions) {
            selected.push(record);
        }
    }
    selected
}

/// Generator stream of one rollout.
fn stream_id(stub_length: usize, stub_index: usize, trial: usize) -> u64 {
    ((stub_length as u64) << 42) ^ ((stub_index as u64) << 21) ^ trial as u64
}

/// Beam search with uniformly random rollouts.
pub fn optimize_with_monte_carlo_beam_search<E>(
    env: &E,
    config: &BeamSearchConfig,
) -> Result<Vec<Record>>
where
    E: Environment + Clone + Send + Sync,
{
    optimize_with_policy(env, &UniformPolicy, config)
}

/// Beam search with rollouts driven by `policy`.
///
/// Returns up to `beam_width` distinct complete sequences, best first.
pub fn optimize_with_policy<E, P>(
    env: &E,
    policy: &P,
    config: &BeamSearchConfig,
) -> Result<Vec<Record>>
where
    E: Environment + Clone + Send + Sync,
    P: RolloutPolicy,
{
    config.validate()?;
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.n_workers.unwrap_or(0))
        .build()
        .map_err(|e| MusicError::InvalidSearch(e.to_string()))?;
    let base_rng = SearchRng::new(config.seed);

    let mut template = env.clone();
    let mut stubs: Vec<Vec<usize>> = vec![Vec::new()];
    let mut records: Vec<Record> = Vec::new();
    let mut stub_length = 0usize;

    while !stubs.is_empty() {
        let mut n_trials = config.n_trials(stub_length);
        for (stub_index, stub) in stubs.iter().enumerate() {
            roll_in(&mut template, stub)?;
            if let Some(estimation) = &config.trials_estimation {
                let mut rng = base_rng.fork(!stream_id(stub_length, stub_index, 0));
                n_trials = estimate_number_of_trials(&template, estimation, &mut rng)?;
            }
            let rolled_in = &template;
            let batch: Vec<Record> = pool.install(|| {
                (0..n_trials)
                    .into_par_iter()
                    .map(|trial| {
                        let mut env = rolled_in.clone();
                        let mut rng = base_rng.fork(stream_id(stub_length, stub_index, trial));
                        roll_out(&mut env, stub.clone(), policy, &mut rng)
                    })
                    .collect::<Result<Vec<Record>>>()
            })?;
            let n_complete = batch.iter().filter(|r| r.complete).count();
            debug!(
                stub = ?stub,
                n_trials,
                n_complete,
                "rolled out stub"
            );
            records.extend(batch);
        }

        sort_records(&mut records);
        if let Some(best) = records.first() {
            info!(
                stub_length,
                n_stubs = stubs.len(),
                n_trials,
                best_reward = best.reward,
                "beam iteration finished"
            );
        }
        stub_length += 1;
        stubs = create_stubs(
            &records,
            config.beam_width,
            stub_length,
            config.include_finalized_sequences,
        );
        records = select_distinct_best_records(&records, config.n_records_to_keep);
    }

    let complete: Vec<Record> = records.into_iter().filter(|r| r.complete).collect();
    if complete.is_empty() {
        warn!("no rollout reached the end of the piece");
        return Err(MusicError::NoCompleteSequences);
    }
    Ok(select_distinct_best_records(&complete, config.beam_width))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::StepOutcome;

    fn record(actions: &[usize], reward: f64) -> Record {
        Record {
            actions: actions.to_vec(),
            reward,
            complete: true,
        }
    }

    /// Three decisions from {0, 1, 2}; the reward is the number of 2s.
    /// Playing 0 twice in a row is a dead end.
    #[derive(Debug, Clone, Default)]
    struct Counting {
        actions: Vec<usize>,
        valid: Vec<usize>,
        done: bool,
    }

    impl Counting {
        fn new() -> Self {
            let mut env = Counting::default();
            env.reset();
            env
        }
    }

    impl Environment for Counting {
        fn reset(&mut self) -> Vec<f64> {
            self.actions.clear();
            self.valid = vec![0, 1, 2];
            self.done = false;
            self.observation()
        }

        fn step(&mut self, action: usize) -> Result<StepOutcome> {
            if self.done {
                return Err(MusicError::EpisodeFinished);
            }
            if !self.valid.contains(&action) {
                return Err(MusicError::InvalidAction { action });
            }
            self.actions.push(action);
            let dead = self.actions.ends_with(&[0, 0]);
            let finished = self.actions.len() == 3;
            self.done = dead || finished;
            self.valid = if self.done { Vec::new() } else { vec![0, 1, 2] };
            let reward = if dead {
                -100.0
            } else if finished {
                self.actions.iter().filter(|&&a| a == 2).count() as f64
            } else {
                0.0
            };
            Ok(StepOutcome {
                observation: self.observation(),
                reward,
                done: self.done,
                valid_actions: self.valid.clone(),
            })
        }

        fn observation(&self) -> Vec<f64> {
            vec![self.actions.len() as f64]
        }

        fn valid_actions(&self) -> &[usize] {
            &self.valid
        }

        fn is_done(&self) -> bool {
            self.done
        }

        fn is_complete(&self) -> bool {
            self.actions.len() == 3 && !self.actions.ends_with(&[0, 0])
        }
    }

    #[test]
    fn test_create_stubs() {
        let records = vec![
            record(&[1, 2, 3], 5.0),
            record(&[1, 2, 2], 4.0),
            record(&[3, 2, 1], 3.0),
            record(&[2, 3, 2], 2.0),
        ];
        assert_eq!(create_stubs(&records, 2, 2, true), vec![vec![1, 2], vec![3, 2]]);
        assert!(create_stubs(&[], 2, 2, true).is_empty());
    }

    #[test]
    fn test_create_stubs_with_finalized_sequences() {
        let records = vec![
            record(&[1, 3], 6.0),
            record(&[1, 2, 3], 5.0),
            record(&[1, 2, 2], 4.0),
            record(&[3, 2, 1], 3.0),
        ];
        assert_eq!(create_stubs(&records, 2, 2, true), vec![vec![1, 2]]);
        assert_eq!(create_stubs(&records, 2, 2, false), vec![vec![1, 2], vec![3, 2]]);
    }

    #[test]
    fn test_select_distinct_best_records() {
        let records = vec![
            record(&[1, 2], 1.0),
            record(&[2, 2], 3.0),
            record(&[2, 2], 3.0),
            record(&[0, 1], 2.0),
        ];
        let best = select_distinct_best_records(&records, 2);
        assert_eq!(best, vec![record(&[2, 2], 3.0), record(&[0, 1], 2.0)]);
        assert_eq!(select_distinct_best_records(&records, 10).len(), 3);
    }

    #[test]
    fn test_roll_in_and_out() {
        let mut env = Counting::new();
        roll_in(&mut env, &[2, 1]).unwrap();
        let mut rng = SearchRng::new(3);
        let record = roll_out(&mut env, vec![2, 1], &UniformPolicy, &mut rng).unwrap();
        assert_eq!(record.actions.len(), 3);
        assert_eq!(&record.actions[..2], &[2, 1]);
        assert!(record.complete);

        assert!(matches!(
            roll_in(&mut env, &[0, 0, 1]),
            Err(MusicError::EpisodeFinished)
        ));
    }

    #[test]
    fn test_search_finds_best_sequence() {
        let config = BeamSearchConfig {
            beam_width: 3,
            n_records_to_keep: 10,
            n_trials_schedule: vec![100, 50],
            trials_estimation: None,
            include_finalized_sequences: true,
            n_workers: Some(2),
            seed: 7,
        };
        let results = optimize_with_monte_carlo_beam_search(&Counting::new(), &config).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].actions, vec![2, 2, 2]);
        assert_eq!(results[0].reward, 3.0);
        assert!(results.iter().all(|r| r.complete && r.actions.len() == 3));
        assert_ne!(results[0].actions, results[1].actions);
    }

    #[test]
    fn test_search_is_deterministic_across_thread_counts() {
        let mut config = BeamSearchConfig {
            beam_width: 3,
            n_trials_schedule: vec![5],
            n_workers: Some(1),
            seed: 11,
            ..BeamSearchConfig::default()
        };
        let single = optimize_with_monte_carlo_beam_search(&Counting::new(), &config).unwrap();
        config.n_workers = Some(4);
        let multi = optimize_with_monte_carlo_beam_search(&Counting::new(), &config).unwrap();
        assert_eq!(single, multi);
    }

    #[test]
    fn test_invalid_parameters_are_rejected() {
        let env = Counting::new();
        for config in [
            BeamSearchConfig {
                beam_width: 0,
                ..BeamSearchConfig::default()
            },
            BeamSearchConfig {
                n_trials_schedule: Vec::new(),
                ..BeamSearchConfig::default()
            },
            BeamSearchConfig {
                n_workers: Some(0),
                ..BeamSearchConfig::default()
            },
            BeamSearchConfig {
                trials_estimation: Some(TrialsEstimation {
                    depth: 2,
                    width: 0,
                    factor: 1.0,
                }),
                ..BeamSearchConfig::default()
            },
            BeamSearchConfig {
                trials_estimation: Some(TrialsEstimation {
                    depth: 2,
                    width: 3,
                    factor: f64::NAN,
                }),
                ..BeamSearchConfig::default()
            },
        ] {
            assert!(matches!(
                optimize_with_monte_carlo_beam_search(&env, &config),
                Err(MusicError::InvalidSearch(_))
            ));
        }
    }

    /// Always plays the smallest valid action, which leads into the dead end.
    struct Lowest;

    impl RolloutPolicy for Lowest {
        fn choose_action(
            &self,
            _observation: &[f64],
            valid_actions: &[usize],
            _rng: &mut SearchRng,
        ) -> Option<usize> {
            valid_actions.iter().min().copied()
        }
    }

    #[test]
    fn test_only_dead_ends_is_an_error() {
        let config = BeamSearchConfig {
            beam_width: 1,
            n_trials_schedule: vec![1],
            ..BeamSearchConfig::default()
        };
        assert!(matches!(
            optimize_with_policy(&Counting::new(), &Lowest, &config),
            Err(MusicError::NoCompleteSequences)
        ));
    }

    #[test]
    fn test_estimate_number_of_trials() {
        let estimation = TrialsEstimation {
            depth: 2,
            width: 3,
            factor: 1.0,
        };
        let mut rng = SearchRng::new(5);
        // Every walk meets three choices twice: nine continuations.
        let fresh = Counting::new();
        assert_eq!(estimate_number_of_trials(&fresh, &estimation, &mut rng).unwrap(), 9);

        // One action left.
        let mut late = Counting::new();
        roll_in(&mut late, &[1, 2]).unwrap();
        assert_eq!(estimate_number_of_trials(&late, &estimation, &mut rng).unwrap(), 3);

        // Nothing left still gets one trial.
        roll_in(&mut late, &[1, 2, 1]).unwrap();
        let scaled = TrialsEstimation {
            factor: 0.1,
            ..estimation
        };
        assert_eq!(estimate_number_of_trials(&late, &scaled, &mut rng).unwrap(), 1);
    }

    #[test]
    fn test_search_with_estimated_trials() {
        let config = BeamSearchConfig {
            beam_width: 3,
            n_trials_schedule: Vec::new(),
            trials_estimation: Some(TrialsEstimation {
                depth: 3,
                width: 4,
                factor: 4.0,
            }),
            n_workers: Some(2),
            seed: 3,
            ..BeamSearchConfig::default()
        };
        let results = optimize_with_monte_carlo_beam_search(&Counting::new(), &config).unwrap();
        assert_eq!(results[0].actions, vec![2, 2, 2]);
        assert_eq!(results[0].reward, 3.0);
        assert!(results.iter().all(|r| r.complete));
    }
}
