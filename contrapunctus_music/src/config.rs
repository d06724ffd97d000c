// Data-driven composer configuration.
//
// Everything a run needs lives in `ComposerConfig`, loaded from JSON: the
// piece layout (scale, lines, rule sets), the environment wrapping it
// (action granularity, rewards, scoring), and the beam search parameters.
// Every section has defaults, so a config file only needs the fields it
// changes. `ComposerConfig::default()` is a ready-to-run two-voice piece in
// C major.
//
// Construction-time validation of the piece (note names, ranges, endpoints)
// happens in `Piece::new`; `validate` here only covers what can be judged
// without building anything.
//
// See also: `piece.rs` which consumes `PieceConfig`, `environment.rs` for
// `EnvironmentConfig`, `search.rs` for `BeamSearchConfig`.

use crate::error::{MusicError, Result};
use crate::evaluation::{ScoringFunction, ScoringParams};
use crate::rules::{HarmonyRule, MelodicRule};
use crate::scale::ScaleType;
use crate::search::BeamSearchConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

// ---------------------------------------------------------------------------
// Piece
// ---------------------------------------------------------------------------

fn default_max_skip() -> usize {
    2
}

/// One melodic line: its pitch range and the notes it starts and ends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSpec {
    /// Display name; empty means "line N".
    #[serde(default)]
    pub name: String,
    pub lowest_note: String,
    pub highest_note: String,
    /// Must be a tonic triad member within the range.
    pub start_note: String,
    /// Must be a tonic triad member within the range.
    pub end_note: String,
    /// Largest movement in scale degrees.
    #[serde(default = "default_max_skip")]
    pub max_skip: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PieceConfig {
    /// Tonic pitch class, e.g. "C" or "F#".
    pub tonic: String,
    pub scale_type: ScaleType,
    /// Including the start and end measures.
    pub n_measures: usize,
    pub steps_per_measure: usize,
    /// Element durations in steps; empty means whole measures only.
    pub allowed_durations: Vec<usize>,
    /// Declared from the highest voice to the lowest.
    pub lines: Vec<LineSpec>,
    pub melodic_rules: Vec<MelodicRule>,
    pub harmony_rules: Vec<HarmonyRule>,
}

impl Default for PieceConfig {
    fn default() -> Self {
        PieceConfig {
            tonic: "C".to_string(),
            scale_type: ScaleType::Major,
            n_measures: 8,
            steps_per_measure: 1,
            allowed_durations: Vec::new(),
            lines: vec![
                LineSpec {
                    name: "cantus".to_string(),
                    lowest_note: "E4".to_string(),
                    highest_note: "E5".to_string(),
                    start_note: "G4".to_string(),
                    end_note: "C5".to_string(),
                    max_skip: 2,
                },
                LineSpec {
                    name: "bassus".to_string(),
                    lowest_note: "G3".to_string(),
                    highest_note: "G4".to_string(),
                    start_note: "C4".to_string(),
                    end_note: "C4".to_string(),
                    max_skip: 2,
                },
            ],
            melodic_rules: MelodicRule::default_set(),
            harmony_rules: HarmonyRule::default_set(),
        }
    }
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// How an integer action maps onto piece mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionSpace {
    /// One action advances every line by a whole measure.
    #[default]
    Measure,
    /// One action places one element (movement and duration) in the line
    /// that lags furthest behind.
    Element,
}

/// Weights and parameter overrides for the final reward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub coefs: BTreeMap<ScoringFunction, f64>,
    pub params: ScoringParams,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        ScoringConfig {
            coefs: BTreeMap::from([
                (ScoringFunction::AbsenceOfLoopedPitches, 1.0),
                (ScoringFunction::AbsenceOfLoopedFragments, 1.0),
                (ScoringFunction::Entropy, 3.0),
                (ScoringFunction::AbsenceOfPitchClassClashes, 1.0),
                (ScoringFunction::MotionTypes, 1.0),
                (ScoringFunction::LinesCorrelation, 1.0),
                (ScoringFunction::ClimaxExplicitness, 1.0),
                (ScoringFunction::NumberOfSkips, 1.0),
                (ScoringFunction::AbsenceOfDownwardSkips, 0.2),
            ]),
            params: ScoringParams::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    pub action_space: ActionSpace,
    /// Reward for reaching a state with no valid action.
    pub reward_for_dead_end: f64,
    /// Weight ratio between consecutive roll columns in the observation.
    pub observation_decay: f64,
    pub scoring: ScoringConfig,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        EnvironmentConfig {
            action_space: ActionSpace::Measure,
            reward_for_dead_end: -100.0,
            observation_decay: 0.75,
            scoring: ScoringConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Top level
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposerConfig {
    pub piece: PieceConfig,
    pub environment: EnvironmentConfig,
    pub search: BeamSearchConfig,
}

impl ComposerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: ComposerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject settings that cannot work regardless of the scale and ranges.
    pub fn validate(&self) -> Result<()> {
        if self.piece.lines.is_empty() {
            return Err(MusicError::Configuration(
                "at least one line is required".to_string(),
            ));
        }
        if !(self.environment.observation_decay > 0.0 && self.environment.observation_decay <= 1.0)
        {
            return Err(MusicError::Configuration(format!(
                "observation_decay must lie in (0, 1], got {}",
                self.environment.observation_decay
            )));
        }
        self.search.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::piece::Piece;
    use crate::search::TrialsEstimation;

    #[test]
    fn default_config_builds_a_piece() {
        let config = ComposerConfig::default();
        config.validate().unwrap();
        let piece = Piece::new(&config.piece).unwrap();
        assert_eq!(piece.n_lines(), 2);
        assert_eq!(piece.line_name(0), "cantus");
    }

    #[test]
    fn default_config_serializes() {
        let config = ComposerConfig::default();
        let json = config.to_json().unwrap();
        let restored = ComposerConfig::from_json(&json).unwrap();
        assert_eq!(config, restored);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let json = r#"{
            "piece": {
                "tonic": "D",
                "scale_type": "natural_minor",
                "n_measures": 6,
                "lines": [
                    {"lowest_note": "D4", "highest_note": "D5",
                     "start_note": "F4", "end_note": "D4"}
                ],
                "melodic_rules": [
                    {"name": "turn_after_skip"},
                    {"name": "absence_of_stalled_pitches", "max_n_repetitions": 3}
                ]
            },
            "environment": {
                "action_space": "element",
                "scoring": {"coefs": {"entropy": 1.0}}
            },
            "search": {"beam_width": 3,
                       "trials_estimation": {"depth": 2, "width": 5, "factor": 1.5}}
        }"#;
        let config = ComposerConfig::from_json(json).unwrap();
        assert_eq!(config.piece.scale_type, ScaleType::NaturalMinor);
        assert_eq!(config.piece.steps_per_measure, 1);
        assert_eq!(config.piece.lines[0].max_skip, 2);
        assert!(config.piece.lines[0].name.is_empty());
        assert_eq!(config.piece.melodic_rules.len(), 2);
        assert_eq!(
            config.piece.melodic_rules[0],
            MelodicRule::TurnAfterSkip {
                min_n_scale_degrees: 3
            }
        );
        assert_eq!(config.piece.harmony_rules, HarmonyRule::default_set());
        assert_eq!(config.environment.action_space, ActionSpace::Element);
        assert_eq!(config.environment.reward_for_dead_end, -100.0);
        assert_eq!(config.environment.scoring.coefs.len(), 1);
        assert_eq!(config.search.beam_width, 3);
        assert_eq!(
            config.search.trials_estimation,
            Some(TrialsEstimation {
                depth: 2,
                width: 5,
                factor: 1.5
            })
        );
        Piece::new(&config.piece).unwrap();
    }

    #[test]
    fn validate_rejects_bad_settings() {
        let mut config = ComposerConfig::default();
        config.environment.observation_decay = 0.0;
        assert!(matches!(
            config.validate(),
            Err(MusicError::Configuration(_))
        ));

        let mut config = ComposerConfig::default();
        config.piece.lines.clear();
        assert!(config.validate().is_err());

        let mut config = ComposerConfig::default();
        config.search.beam_width = 0;
        assert!(matches!(config.validate(), Err(MusicError::InvalidSearch(_))));

        assert!(matches!(
            ComposerConfig::from_json("{not json"),
            Err(MusicError::Json(_))
        ));
    }
}
