// Contrapunctus: rule-constrained counterpoint generation.
//
// Melodic lines are built as sequences of scale-degree movements inside a
// diatonic scale. Every candidate movement is checked against voice-leading
// rules for its line and harmony rules for the sonorities it completes;
// finished pieces are scored by a weighted battery of heuristics, and a Monte
// Carlo beam search looks for the best-scoring complete pieces.
//
// Architecture:
// - scale.rs: Diatonic scales (major, natural and harmonic minor), note names
// - piece.rs: Lines and the piece state machine (validity, mutation, reset)
// - piano_roll.rs: Pitch-by-time 0/1 matrix mirrored from the lines
// - rules.rs: Melodic and harmony rule predicates as closed enums
// - evaluation.rs: Scoring registry and weighted evaluation of pieces
// - roll_scoring.rs: Scoring functions over a bare piano roll
// - environment.rs: Episode wrapper with integer actions and rewards
// - search.rs: Monte Carlo beam search with parallel rollouts
// - config.rs: JSON configuration of piece, environment and search
// - error.rs: Error taxonomy
//
// The search is deterministic given a seed, regardless of thread count.

pub mod config;
pub mod environment;
pub mod error;
pub mod evaluation;
pub mod piano_roll;
pub mod piece;
pub mod roll_scoring;
pub mod rules;
pub mod scale;
pub mod search;
