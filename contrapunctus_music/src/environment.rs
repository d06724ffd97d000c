// Episode wrapper around a `Piece` for agents and search.
//
// An episode starts from a reset piece and ends when every line is complete
// or when no valid action remains (a dead end). Actions are plain integers;
// `ActionSpace` decides what they mean:
//
// - `Measure`: one action moves every line by a whole measure. The action is
//   a mixed-radix number with one digit per line, line 0 most significant.
//   Line `i` has radix `2 * max_skip_i + 1` and its digit minus `max_skip_i`
//   is the movement.
// - `Element`: one action places a single element in `Piece::next_line()`.
//   With `M` the largest `max_skip` of any line and `D` the number of allowed
//   durations, action `a` is movement `a / D - M` with duration index `a % D`.
//
// The observation is one value per piano-roll row: the roll columns before
// the current time summed with weight `decay^age`, the newest column having
// age 0. The reward is 0 until the episode ends; a finished piece is scored
// with `evaluation::evaluate` and a dead end yields `reward_for_dead_end`.
//
// The valid actions for the next decision are computed once per state and
// cached, since both agents and the search ask for them after every step.

use crate::config::{ActionSpace, EnvironmentConfig};
use crate::error::{MusicError, Result};
use crate::evaluation::{ScoringFunction, evaluate, evaluate_breakdown};
use crate::piano_roll::PianoRoll;
use crate::piece::{Piece, RenderedLine};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Result of one `step`.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub observation: Vec<f64>,
    pub reward: f64,
    pub done: bool,
    /// Actions valid in the new state; empty once the episode is over.
    pub valid_actions: Vec<usize>,
}

/// Artifacts of a piece for an external renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedPiece {
    pub roll: PianoRoll,
    pub lines: Vec<RenderedLine>,
}

/// The interface the search drives.
pub trait Environment {
    /// Start a new episode and return its first observation.
    fn reset(&mut self) -> Vec<f64>;

    fn step(&mut self, action: usize) -> Result<StepOutcome>;

    fn observation(&self) -> Vec<f64>;

    /// Actions valid in the current state.
    fn valid_actions(&self) -> &[usize];

    fn is_done(&self) -> bool;

    /// Whether the episode reached its goal rather than a dead end.
    fn is_complete(&self) -> bool;
}

/// A decoded action.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Move {
    Measure(Vec<i32>),
    Element {
        line: usize,
        movement: i32,
        duration: usize,
    },
}

#[derive(Debug, Clone)]
pub struct CounterpointEnv {
    piece: Piece,
    config: Arc<EnvironmentConfig>,
    next_actions: Vec<usize>,
    done: bool,
}

impl CounterpointEnv {
    pub fn new(piece: Piece, config: EnvironmentConfig) -> Self {
        let mut env = CounterpointEnv {
            piece,
            config: Arc::new(config),
            next_actions: Vec::new(),
            done: false,
        };
        env.reset();
        env
    }

    pub fn piece(&self) -> &Piece {
        &self.piece
    }

    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    /// Number of distinct action codes, valid or not.
    pub fn n_actions(&self) -> usize {
        match self.config.action_space {
            ActionSpace::Measure => (0..self.piece.n_lines())
                .map(|line| self.radix(line))
                .product(),
            ActionSpace::Element => {
                (2 * self.widest_skip() + 1) * self.piece.allowed_durations().len()
            }
        }
    }

    /// Reward the current piece would receive if it were final.
    pub fn evaluate(&self) -> f64 {
        let scoring = &self.config.scoring;
        evaluate(&self.piece, &scoring.coefs, &scoring.params)
    }

    /// Unweighted value of every configured scoring function.
    pub fn score_breakdown(&self) -> BTreeMap<ScoringFunction, f64> {
        let scoring = &self.config.scoring;
        evaluate_breakdown(&self.piece, &scoring.coefs, &scoring.params)
    }

    pub fn render(&self) -> RenderedPiece {
        RenderedPiece {
            roll: self.piece.piano_roll().clone(),
            lines: self.piece.rendered_lines(),
        }
    }

    // -----------------------------------------------------------------------
    // Action codec
    // -----------------------------------------------------------------------

    fn radix(&self, line: usize) -> usize {
        2 * self.piece.max_skip(line) + 1
    }

    fn widest_skip(&self) -> usize {
        (0..self.piece.n_lines())
            .map(|line| self.piece.max_skip(line))
            .max()
            .unwrap_or(0)
    }

    /// Action code of one movement per line.
    pub fn encode_measure(&self, movements: &[i32]) -> Option<usize> {
        if movements.len() != self.piece.n_lines() {
            return None;
        }
        let mut code = 0usize;
        for (line, &movement) in movements.iter().enumerate() {
            let max_skip = self.piece.max_skip(line) as i32;
            if movement.abs() > max_skip {
                return None;
            }
            code = code * self.radix(line) + (movement + max_skip) as usize;
        }
        Some(code)
    }

    /// Action code of a movement and a duration index for the next line.
    pub fn encode_element(&self, movement: i32, duration_index: usize) -> Option<usize> {
        let widest = self.widest_skip() as i32;
        let n_durations = self.piece.allowed_durations().len();
        if movement.abs() > widest || duration_index >= n_durations {
            return None;
        }
        Some((movement + widest) as usize * n_durations + duration_index)
    }

    fn decode(&self, action: usize) -> Option<Move> {
        if action >= self.n_actions() {
            return None;
        }
        match self.config.action_space {
            ActionSpace::Measure => {
                let mut rest = action;
                let mut movements = vec![0; self.piece.n_lines()];
                for line in (0..self.piece.n_lines()).rev() {
                    let radix = self.radix(line);
                    movements[line] = (rest % radix) as i32 - self.piece.max_skip(line) as i32;
                    rest /= radix;
                }
                Some(Move::Measure(movements))
            }
            ActionSpace::Element => {
                let line = self.piece.next_line()?;
                let durations = self.piece.allowed_durations();
                let movement = (action / durations.len()) as i32 - self.widest_skip() as i32;
                Some(Move::Element {
                    line,
                    movement,
                    duration: durations[action % durations.len()],
                })
            }
        }
    }

    fn compute_valid_actions(&self) -> Vec<usize> {
        if self.piece.is_complete() {
            return Vec::new();
        }
        match self.config.action_space {
            ActionSpace::Measure => {
                let per_line: Vec<&[i32]> = (0..self.piece.n_lines())
                    .map(|line| self.piece.current_allowed_movements(line))
                    .collect();
                let mut actions = Vec::new();
                let mut movements = vec![0; per_line.len()];
                self.collect_measures(&per_line, 0, &mut movements, &mut actions);
                actions
            }
            ActionSpace::Element => {
                let Some(line) = self.piece.next_line() else {
                    return Vec::new();
                };
                let mut actions = Vec::new();
                for &movement in self.piece.current_allowed_movements(line) {
                    for (index, &duration) in self.piece.allowed_durations().iter().enumerate() {
                        if self.piece.check_element_validity(line, movement, duration) {
                            actions.extend(self.encode_element(movement, index));
                        }
                    }
                }
                actions
            }
        }
    }

    /// Depth-first walk over the product of per-line movement sets. Sets are
    /// sorted and line 0 is the most significant digit, so codes come out in
    /// ascending order.
    fn collect_measures(
        &self,
        per_line: &[&[i32]],
        line: usize,
        movements: &mut [i32],
        actions: &mut Vec<usize>,
    ) {
        if line == per_line.len() {
            if self.piece.check_measure_validity(movements) {
                actions.extend(self.encode_measure(movements));
            }
            return;
        }
        for &movement in per_line[line] {
            movements[line] = movement;
            self.collect_measures(per_line, line + 1, movements, actions);
        }
    }
}

impl Environment for CounterpointEnv {
    fn reset(&mut self) -> Vec<f64> {
        self.piece.reset();
        self.done = false;
        self.next_actions = self.compute_valid_actions();
        self.observation()
    }

    fn step(&mut self, action: usize) -> Result<StepOutcome> {
        if self.done {
            return Err(MusicError::EpisodeFinished);
        }
        if !self.next_actions.contains(&action) {
            return Err(MusicError::InvalidAction { action });
        }
        match self.decode(action) {
            Some(Move::Measure(movements)) => self.piece.add_measure(&movements)?,
            Some(Move::Element {
                line,
                movement,
                duration,
            }) => self.piece.add_line_element(line, movement, Some(duration))?,
            None => return Err(MusicError::InvalidAction { action }),
        }

        let reward = if self.piece.is_complete() {
            self.done = true;
            self.next_actions.clear();
            self.evaluate()
        } else {
            self.next_actions = self.compute_valid_actions();
            if self.next_actions.is_empty() {
                self.done = true;
                self.config.reward_for_dead_end
            } else {
                0.0
            }
        };
        Ok(StepOutcome {
            observation: self.observation(),
            reward,
            done: self.done,
            valid_actions: self.next_actions.clone(),
        })
    }

    fn observation(&self) -> Vec<f64> {
        let roll = self.piece.piano_roll();
        let now = self.piece.current_time().min(roll.n_cols());
        let decay = self.config.observation_decay;
        (0..roll.n_rows())
            .map(|row| {
                let cells = &roll.row(row)[..now];
                cells
                    .iter()
                    .rev()
                    .fold((0.0, 1.0), |(sum, weight), &cell| {
                        (sum + weight * cell as f64, weight * decay)
                    })
                    .0
            })
            .collect()
    }

    fn valid_actions(&self) -> &[usize] {
        &self.next_actions
    }

    fn is_done(&self) -> bool {
        self.done
    }

    fn is_complete(&self) -> bool {
        self.piece.is_complete()
    }
}
