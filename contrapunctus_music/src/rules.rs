// Voice-leading and harmony rules.
//
// Rules are a closed set of variants, each carrying its own parameters, so a
// rule list in configuration deserializes straight into `MelodicRule` /
// `HarmonyRule` values (`{"name": "turn_after_skip", "min_n_scale_degrees": 3}`).
//
// Melodic rules look at one line: its placed elements, the candidate element
// and the movement that reaches it. Harmony rules look at a sonority: one
// voice per line sounding at a time point, ordered by line index with lines
// declared from top to bottom. A voice knows whether it starts there, how it
// got there and how its previous element clashed, which is what the
// dissonance-handling rules need. Every predicate is pure and answers with a
// plain `bool`.
//
// piece.rs builds the contexts and calls `check` for each configured rule,
// stopping at the first failure.

use crate::piece::{LineElement, MotionRun};
use serde::{Deserialize, Serialize};

/// Interval classes (semitones mod 12) that are always consonant.
const CONSONANT_INTERVALS: [usize; 6] = [0, 3, 4, 7, 8, 9];

/// Perfect fourth, consonant only between upper voices by default.
const PERFECT_FOURTH: usize = 5;

fn default_true() -> bool {
    true
}

fn default_min_skip() -> usize {
    3
}

fn default_max_repetitions() -> usize {
    2
}

fn default_max_motion() -> usize {
    9
}

fn default_max_skips() -> usize {
    2
}

fn default_max_interval() -> usize {
    16
}

/// Everything a melodic rule may inspect about one candidate movement.
#[derive(Debug, Clone, Copy)]
pub struct MelodicContext<'a> {
    /// Elements already placed in the line, oldest first. Never empty: the
    /// start note is always present.
    pub history: &'a [LineElement],
    pub candidate: LineElement,
    /// Signed movement in scale degrees from the last element to the candidate.
    pub movement: i32,
    /// Motion run of the line before the candidate is placed.
    pub motion_run: MotionRun,
    /// The fixed last note of the line.
    pub end: LineElement,
    /// Measures still to be traversed after the candidate, counting the
    /// measure of the end note.
    pub measures_left: usize,
    /// True when the candidate is the end note itself, i.e. the implied final
    /// transition is being checked.
    pub is_final_transition: bool,
    pub steps_per_measure: usize,
}

impl MelodicContext<'_> {
    fn last(&self) -> &LineElement {
        // `history` always holds at least the start note.
        &self.history[self.history.len() - 1]
    }

    /// Movements between consecutive placed elements, oldest first.
    fn past_movements(&self) -> impl DoubleEndedIterator<Item = i32> + '_ {
        self.history
            .windows(2)
            .map(|pair| pair[1].position_in_degrees as i32 - pair[0].position_in_degrees as i32)
    }
}

/// A rule applied to a single line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum MelodicRule {
    /// A pitch may be repeated only if it belongs to the tonic triad.
    RearticulationStability,
    /// A skip must land on a tonic triad member.
    SkipDestinationStability,
    /// After a skip of at least `min_n_scale_degrees`, step back once.
    TurnAfterSkip {
        #[serde(default = "default_min_skip")]
        min_n_scale_degrees: usize,
    },
    /// 6-7 continues up to the tonic, 7-6 continues down to the dominant.
    SubmediantLeadingToneResolution,
    /// The end note must stay reachable by steps.
    StepMotionToEnd {
        #[serde(default = "default_true")]
        prohibit_rearticulation: bool,
    },
    /// At most `max_n_repetitions` consecutive equal pitches.
    AbsenceOfStalledPitches {
        #[serde(default = "default_max_repetitions")]
        max_n_repetitions: usize,
    },
    /// Motion in one direction may not cover more than this many semitones.
    AbsenceOfLongMotion {
        #[serde(default = "default_max_motion")]
        max_distance_in_semitones: usize,
    },
    /// At most `max_n_skips` skips in a row.
    AbsenceOfSkipSeries {
        #[serde(default = "default_max_skips")]
        max_n_skips: usize,
    },
    /// Durations within a measure must follow one of the given patterns.
    RhythmicPatternValidity { patterns: Vec<Vec<usize>> },
}

impl MelodicRule {
    /// Rules active when a configuration does not name any.
    pub fn default_set() -> Vec<MelodicRule> {
        vec![
            MelodicRule::RearticulationStability,
            MelodicRule::SkipDestinationStability,
            MelodicRule::TurnAfterSkip {
                min_n_scale_degrees: default_min_skip(),
            },
            MelodicRule::SubmediantLeadingToneResolution,
            MelodicRule::StepMotionToEnd {
                prohibit_rearticulation: true,
            },
        ]
    }

    pub fn check(&self, ctx: &MelodicContext<'_>) -> bool {
        match self {
            MelodicRule::RearticulationStability => {
                ctx.movement != 0 || ctx.candidate.is_from_tonic_triad
            }
            MelodicRule::SkipDestinationStability => {
                ctx.movement.abs() <= 1 || ctx.candidate.is_from_tonic_triad
            }
            MelodicRule::TurnAfterSkip {
                min_n_scale_degrees,
            } => match ctx.past_movements().next_back() {
                Some(previous) if previous.unsigned_abs() as usize >= *min_n_scale_degrees => {
                    ctx.movement == -previous.signum()
                }
                _ => true,
            },
            MelodicRule::SubmediantLeadingToneResolution => {
                let n = ctx.history.len();
                if n < 2 {
                    return true;
                }
                match (ctx.history[n - 2].degree, ctx.history[n - 1].degree) {
                    (6, 7) => ctx.movement == 1,
                    (7, 6) => ctx.movement == -1,
                    _ => true,
                }
            }
            MelodicRule::StepMotionToEnd {
                prohibit_rearticulation,
            } => {
                if ctx.is_final_transition {
                    return true;
                }
                let distance = ctx
                    .end
                    .position_in_degrees
                    .abs_diff(ctx.candidate.position_in_degrees);
                if ctx.measures_left == 1 && distance == 0 {
                    return !prohibit_rearticulation;
                }
                distance <= ctx.measures_left
            }
            MelodicRule::AbsenceOfStalledPitches { max_n_repetitions } => {
                if ctx.movement != 0 {
                    return true;
                }
                let repeated = ctx
                    .past_movements()
                    .rev()
                    .take_while(|&m| m == 0)
                    .count();
                // `repeated` zero movements mean `repeated + 1` equal pitches,
                // the candidate adds one more.
                repeated + 2 <= *max_n_repetitions
            }
            MelodicRule::AbsenceOfLongMotion {
                max_distance_in_semitones,
            } => {
                let direction = ctx.movement.signum();
                if direction == 0 {
                    return true;
                }
                let origin = if ctx.motion_run.direction == direction {
                    ctx.history
                        .get(ctx.motion_run.start_index)
                        .unwrap_or_else(|| ctx.last())
                } else {
                    ctx.last()
                };
                origin
                    .position_in_semitones
                    .abs_diff(ctx.candidate.position_in_semitones)
                    <= *max_distance_in_semitones
            }
            MelodicRule::AbsenceOfSkipSeries { max_n_skips } => {
                if ctx.movement.abs() <= 1 {
                    return true;
                }
                let series = ctx
                    .past_movements()
                    .rev()
                    .take_while(|m| m.abs() > 1)
                    .count();
                series < *max_n_skips
            }
            MelodicRule::RhythmicPatternValidity { patterns } => {
                if ctx.is_final_transition || ctx.steps_per_measure == 0 {
                    return true;
                }
                let measure = ctx.candidate.start / ctx.steps_per_measure;
                let mut durations: Vec<usize> = ctx
                    .history
                    .iter()
                    .filter(|e| e.start / ctx.steps_per_measure == measure)
                    .map(|e| e.duration)
                    .collect();
                durations.push(ctx.candidate.duration);
                patterns
                    .iter()
                    .any(|pattern| pattern.starts_with(&durations))
            }
        }
    }
}

/// How an element of a line clashed with the other lines while it sounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dissonance {
    #[default]
    Consonant,
    /// Dissonant from its own onset: a passing or neighbour tone.
    Struck,
    /// Consonant when it started, then made dissonant on a strong beat by
    /// another line moving while it was held.
    Suspended,
}

/// One line's part in a sonority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Voice {
    /// Piano-key position sounding at this time point.
    pub position: usize,
    /// Position the line sounded one step earlier.
    pub previous_position: Option<usize>,
    /// True when the sounding element starts at this time point.
    pub onset: bool,
    /// Movement in scale degrees into the sounding element; only set on an
    /// onset that has an element before it.
    pub movement: Option<i32>,
    /// How the element before an onset clashed. Always `Consonant` for held
    /// voices, and also when no rule asks for it.
    pub previous_dissonance: Dissonance,
}

impl Voice {
    fn moves_by_step(&self) -> bool {
        self.movement.is_none_or(|m| m.abs() == 1)
    }
}

/// A complete sonority: one voice per line, in line order, top line first.
#[derive(Debug, Clone, Copy)]
pub struct HarmonyContext<'a> {
    pub voices: &'a [Voice],
    /// Time point falls on a measure or half-measure boundary.
    pub strong_beat: bool,
}

/// Whether two pitches form a consonance in a sonority whose lowest pitch is
/// `lowest`.
fn is_consonant_pair(a: usize, b: usize, lowest: usize, perfect_fourth_is_consonant: bool) -> bool {
    let interval = a.abs_diff(b) % 12;
    CONSONANT_INTERVALS.contains(&interval)
        || (interval == PERFECT_FOURTH && (perfect_fourth_is_consonant || a.min(b) != lowest))
}

impl HarmonyContext<'_> {
    fn positions(&self) -> impl Iterator<Item = usize> + '_ {
        self.voices.iter().map(|v| v.position)
    }

    fn lowest(&self) -> usize {
        self.positions().min().unwrap_or(0)
    }

    fn all_consonant(&self, perfect_fourth_is_consonant: bool) -> bool {
        let lowest = self.lowest();
        self.voices.iter().enumerate().all(|(i, a)| {
            self.voices[i + 1..]
                .iter()
                .all(|b| is_consonant_pair(a.position, b.position, lowest, perfect_fourth_is_consonant))
        })
    }

    /// Whether voice `index` is consonant with every other voice.
    pub fn is_consonant(&self, index: usize) -> bool {
        let lowest = self.lowest();
        let me = self.voices[index].position;
        self.voices
            .iter()
            .enumerate()
            .all(|(j, other)| j == index || is_consonant_pair(me, other.position, lowest, false))
    }

    /// Whether voice `index` is the one a clash at this time point counts
    /// against.
    ///
    /// Two voices starting together share the blame. When one starts and the
    /// other is held, a strong beat blames the held voice (a suspension) and a
    /// weak beat blames the moving one (a passing tone). Clashes between two
    /// held voices were judged when they arose.
    pub fn is_dissonant(&self, index: usize) -> bool {
        let lowest = self.lowest();
        let me = &self.voices[index];
        self.voices.iter().enumerate().any(|(j, other)| {
            if j == index || is_consonant_pair(me.position, other.position, lowest, false) {
                return false;
            }
            match (me.onset, other.onset) {
                (true, true) => true,
                (true, false) => !self.strong_beat,
                (false, true) => self.strong_beat,
                (false, false) => false,
            }
        })
    }
}

/// A rule applied to every completed sonority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum HarmonyRule {
    /// Every pair of pitches forms a consonance.
    Consonance {
        #[serde(default)]
        perfect_fourth_is_consonant: bool,
    },
    /// On a strong beat no starting voice is dissonant.
    ConsonanceOnStrongBeat,
    /// A voice that starts dissonant is reached by a step.
    StepMotionToDissonance,
    /// A voice leaves a dissonant element by a step.
    StepMotionFromDissonance,
    /// A suspended element resolves one step down onto a consonance.
    ResolutionOfSuspendedDissonance,
    /// No two lines more than `max_n_semitones` apart.
    AbsenceOfLargeIntervals {
        #[serde(default = "default_max_interval")]
        max_n_semitones: usize,
    },
    /// No two pitches share a pitch class.
    DistinctPitchClasses,
    /// A line never sounds below the line declared after it.
    AbsenceOfLinesCrossing {
        #[serde(default)]
        prohibit_unisons: bool,
    },
    /// A starting voice does not pass the pitch its neighbouring line held
    /// one step earlier.
    AbsenceOfOverlappingMotion,
}

impl HarmonyRule {
    pub fn default_set() -> Vec<HarmonyRule> {
        vec![
            HarmonyRule::Consonance {
                perfect_fourth_is_consonant: false,
            },
            HarmonyRule::AbsenceOfLargeIntervals {
                max_n_semitones: default_max_interval(),
            },
        ]
    }

    /// Rules for lines moving faster than one note per measure: dissonances
    /// are allowed off the strong beats when approached and left by step.
    pub fn florid_set() -> Vec<HarmonyRule> {
        vec![
            HarmonyRule::ConsonanceOnStrongBeat,
            HarmonyRule::StepMotionToDissonance,
            HarmonyRule::StepMotionFromDissonance,
            HarmonyRule::ResolutionOfSuspendedDissonance,
            HarmonyRule::AbsenceOfLargeIntervals {
                max_n_semitones: default_max_interval(),
            },
            HarmonyRule::AbsenceOfLinesCrossing {
                prohibit_unisons: true,
            },
            HarmonyRule::AbsenceOfOverlappingMotion,
        ]
    }

    /// Whether the rule reads `Voice::previous_dissonance`.
    pub fn needs_dissonance_history(&self) -> bool {
        matches!(
            self,
            HarmonyRule::StepMotionFromDissonance | HarmonyRule::ResolutionOfSuspendedDissonance
        )
    }

    pub fn check(&self, ctx: &HarmonyContext<'_>) -> bool {
        let voices = ctx.voices;
        match self {
            HarmonyRule::Consonance {
                perfect_fourth_is_consonant,
            } => ctx.all_consonant(*perfect_fourth_is_consonant),
            HarmonyRule::ConsonanceOnStrongBeat => {
                !ctx.strong_beat
                    || (0..voices.len()).all(|i| !voices[i].onset || !ctx.is_dissonant(i))
            }
            HarmonyRule::StepMotionToDissonance => (0..voices.len()).all(|i| {
                let voice = &voices[i];
                !voice.onset || voice.moves_by_step() || !ctx.is_dissonant(i)
            }),
            HarmonyRule::StepMotionFromDissonance => voices.iter().all(|voice| {
                !voice.onset
                    || voice.previous_dissonance == Dissonance::Consonant
                    || voice.moves_by_step()
            }),
            HarmonyRule::ResolutionOfSuspendedDissonance => (0..voices.len()).all(|i| {
                let voice = &voices[i];
                !voice.onset
                    || voice.previous_dissonance != Dissonance::Suspended
                    || (voice.movement == Some(-1) && ctx.is_consonant(i))
            }),
            HarmonyRule::AbsenceOfLargeIntervals { max_n_semitones } => {
                match (ctx.positions().min(), ctx.positions().max()) {
                    (Some(low), Some(high)) => high - low <= *max_n_semitones,
                    _ => true,
                }
            }
            HarmonyRule::DistinctPitchClasses => {
                let mut seen = [false; 12];
                ctx.positions()
                    .all(|p| !std::mem::replace(&mut seen[p % 12], true))
            }
            HarmonyRule::AbsenceOfLinesCrossing { prohibit_unisons } => {
                voices.windows(2).all(|pair| {
                    if *prohibit_unisons {
                        pair[0].position > pair[1].position
                    } else {
                        pair[0].position >= pair[1].position
                    }
                })
            }
            HarmonyRule::AbsenceOfOverlappingMotion => voices.windows(2).all(|pair| {
                let (upper, lower) = (&pair[0], &pair[1]);
                let upper_ok = !upper.onset
                    || lower.previous_position.is_none_or(|p| upper.position > p);
                let lower_ok = !lower.onset
                    || upper.previous_position.is_none_or(|p| lower.position < p);
                upper_ok && lower_ok
            }),
        }
    }
}
