// Scoring of pieces: the named function registry and the weighted sum.
//
// Every scoring function maps a piece to one number. Functions that look at
// lines (melodic repetition, skips, climax, voice interplay) are defined
// here; functions that only need the piano roll live in roll_scoring.rs and
// are called on `Piece::piano_roll()`.
//
// `evaluate` sums `coefficient * function(piece, params)` over the entries
// of a coefficient map. Parameters for functions without a coefficient are
// never read, and functions without a coefficient are never called.
//
// Consumed by environment.rs for episode rewards.

use crate::piece::{LineElement, Piece};
use crate::roll_scoring;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Names of all scoring functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringFunction {
    AbsenceOfLoopedPitches,
    AbsenceOfLoopedFragments,
    Entropy,
    AbsenceOfPitchClassClashes,
    MotionTypes,
    LinesCorrelation,
    ClimaxExplicitness,
    NumberOfSkips,
    AbsenceOfDownwardSkips,
    AbsenceOfNarrowRanges,
    HorizontalVariance,
    VerticalVariance,
    AbsenceOfLongSounds,
    Noncyclicity,
    Consonances,
    ConjunctMotion,
    Tonality,
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopedPitchesParams {
    /// Longest run of one pitch that goes unpunished.
    pub max_n_repetitions: usize,
}

impl Default for LoopedPitchesParams {
    fn default() -> Self {
        LoopedPitchesParams {
            max_n_repetitions: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopedFragmentsParams {
    pub min_size: usize,
    /// Defaults to half the piece length.
    pub max_size: Option<usize>,
}

impl Default for LoopedFragmentsParams {
    fn default() -> Self {
        LoopedFragmentsParams {
            min_size: 2,
            max_size: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PitchClassClashesParams {
    pub unison_penalty: f64,
    pub octave_penalty: f64,
}

impl Default for PitchClassClashesParams {
    fn default() -> Self {
        PitchClassClashesParams {
            unison_penalty: 2.0,
            octave_penalty: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionTypesParams {
    pub parallel: f64,
    pub similar: f64,
    pub oblique: f64,
    pub contrary: f64,
}

impl Default for MotionTypesParams {
    fn default() -> Self {
        MotionTypesParams {
            parallel: -1.0,
            similar: -0.25,
            oblique: 0.5,
            contrary: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClimaxParams {
    /// Per scale degree between the highest allowed and the highest reached pitch.
    pub shortage_penalty: f64,
    /// Per repetition of the highest reached pitch.
    pub duplication_penalty: f64,
}

impl Default for ClimaxParams {
    fn default() -> Self {
        ClimaxParams {
            shortage_penalty: 0.3,
            duplication_penalty: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NumberOfSkipsParams {
    pub min_n_skips: usize,
    pub max_n_skips: usize,
}

impl Default for NumberOfSkipsParams {
    fn default() -> Self {
        NumberOfSkipsParams {
            min_n_skips: 1,
            max_n_skips: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownwardSkipsParams {
    pub exponent: f64,
}

impl Default for DownwardSkipsParams {
    fn default() -> Self {
        DownwardSkipsParams { exponent: 2.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrowRangesParams {
    /// Window length in elements.
    pub min_size: usize,
    /// Penalty by window range in scale degrees.
    pub penalties: BTreeMap<usize, f64>,
}

impl Default for NarrowRangesParams {
    fn default() -> Self {
        NarrowRangesParams {
            min_size: 9,
            penalties: BTreeMap::from([(2, 1.0), (3, 0.5)]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LongSoundsParams {
    pub max_n_time_steps: usize,
}

impl Default for LongSoundsParams {
    fn default() -> Self {
        LongSoundsParams {
            max_n_time_steps: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoncyclicityParams {
    pub max_n_time_steps: usize,
    pub max_share: f64,
}

impl Default for NoncyclicityParams {
    fn default() -> Self {
        NoncyclicityParams {
            max_n_time_steps: 8,
            max_share: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsonancesParams {
    /// Score by interval in semitones mod 12.
    pub interval_consonances: BTreeMap<usize, f64>,
    /// Weight by time distance in steps.
    pub distance_weights: BTreeMap<usize, f64>,
}

impl Default for ConsonancesParams {
    fn default() -> Self {
        ConsonancesParams {
            interval_consonances: BTreeMap::from([
                (0, 0.5),
                (1, -1.0),
                (2, -0.5),
                (3, 1.0),
                (4, 1.0),
                (5, 0.0),
                (6, -1.0),
                (7, 1.0),
                (8, 1.0),
                (9, 1.0),
                (10, -0.5),
                (11, -1.0),
            ]),
            distance_weights: BTreeMap::from([(0, 1.0), (1, 0.5)]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConjunctMotionParams {
    pub max_n_semitones: usize,
    pub max_n_time_steps: usize,
}

impl Default for ConjunctMotionParams {
    fn default() -> Self {
        ConjunctMotionParams {
            max_n_semitones: 2,
            max_n_time_steps: 1,
        }
    }
}

/// Parameter overrides for every scoring function.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringParams {
    pub absence_of_looped_pitches: LoopedPitchesParams,
    pub absence_of_looped_fragments: LoopedFragmentsParams,
    pub absence_of_pitch_class_clashes: PitchClassClashesParams,
    pub motion_types: MotionTypesParams,
    pub climax_explicitness: ClimaxParams,
    pub number_of_skips: NumberOfSkipsParams,
    pub absence_of_downward_skips: DownwardSkipsParams,
    pub absence_of_narrow_ranges: NarrowRangesParams,
    pub absence_of_long_sounds: LongSoundsParams,
    pub noncyclicity: NoncyclicityParams,
    pub consonances: ConsonancesParams,
    pub conjunct_motion: ConjunctMotionParams,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

impl ScoringFunction {
    pub fn score(self, piece: &Piece, params: &ScoringParams) -> f64 {
        let roll = piece.piano_roll();
        match self {
            ScoringFunction::AbsenceOfLoopedPitches => {
                absence_of_looped_pitches(piece, &params.absence_of_looped_pitches)
            }
            ScoringFunction::AbsenceOfLoopedFragments => {
                absence_of_looped_fragments(piece, &params.absence_of_looped_fragments)
            }
            ScoringFunction::Entropy => entropy(piece),
            ScoringFunction::AbsenceOfPitchClassClashes => {
                absence_of_pitch_class_clashes(piece, &params.absence_of_pitch_class_clashes)
            }
            ScoringFunction::MotionTypes => motion_types(piece, &params.motion_types),
            ScoringFunction::LinesCorrelation => lines_correlation(piece),
            ScoringFunction::ClimaxExplicitness => {
                climax_explicitness(piece, &params.climax_explicitness)
            }
            ScoringFunction::NumberOfSkips => number_of_skips(piece, &params.number_of_skips),
            ScoringFunction::AbsenceOfDownwardSkips => {
                absence_of_downward_skips(piece, &params.absence_of_downward_skips)
            }
            ScoringFunction::AbsenceOfNarrowRanges => {
                absence_of_narrow_ranges(piece, &params.absence_of_narrow_ranges)
            }
            ScoringFunction::HorizontalVariance => roll_scoring::horizontal_variance(roll),
            ScoringFunction::VerticalVariance => roll_scoring::vertical_variance(roll),
            ScoringFunction::AbsenceOfLongSounds => roll_scoring::absence_of_long_sounds(
                roll,
                params.absence_of_long_sounds.max_n_time_steps,
            ),
            ScoringFunction::Noncyclicity => roll_scoring::noncyclicity(
                roll,
                params.noncyclicity.max_n_time_steps,
                params.noncyclicity.max_share,
            ),
            ScoringFunction::Consonances => roll_scoring::consonances(
                roll,
                &params.consonances.interval_consonances,
                &params.consonances.distance_weights,
            ),
            ScoringFunction::ConjunctMotion => roll_scoring::conjunct_motion(
                roll,
                params.conjunct_motion.max_n_semitones,
                params.conjunct_motion.max_n_time_steps,
            ),
            ScoringFunction::Tonality => roll_scoring::tonality(roll, piece.scale()),
        }
    }
}

/// Weighted sum of the functions named in `coefs`.
pub fn evaluate(piece: &Piece, coefs: &BTreeMap<ScoringFunction, f64>, params: &ScoringParams) -> f64 {
    coefs
        .iter()
        .map(|(&function, &coef)| coef * function.score(piece, params))
        .sum()
}

/// Unweighted score of every function named in `coefs`.
pub fn evaluate_breakdown(
    piece: &Piece,
    coefs: &BTreeMap<ScoringFunction, f64>,
    params: &ScoringParams,
) -> BTreeMap<ScoringFunction, f64> {
    coefs
        .keys()
        .map(|&function| (function, function.score(piece, params)))
        .collect()
}

// ---------------------------------------------------------------------------
// Line-based scoring functions
// ---------------------------------------------------------------------------

fn degrees(line: &[LineElement]) -> Vec<usize> {
    line.iter().map(|e| e.position_in_degrees).collect()
}

/// Minus the total excess length of runs of one repeated pitch.
pub fn absence_of_looped_pitches(piece: &Piece, params: &LoopedPitchesParams) -> f64 {
    let mut penalty = 0usize;
    for line in 0..piece.n_lines() {
        let positions = degrees(&piece.full_line(line));
        for run in positions.chunk_by(|a, b| a == b) {
            penalty += run.len().saturating_sub(params.max_n_repetitions);
        }
    }
    -(penalty as f64)
}

/// Minus the number of places where a slice of the roll is immediately
/// repeated. The final measure is never the start of a fragment.
pub fn absence_of_looped_fragments(piece: &Piece, params: &LoopedFragmentsParams) -> f64 {
    let roll = piece.piano_roll();
    let n_steps = roll.n_cols();
    let last_start = n_steps.saturating_sub(piece.steps_per_measure() + 1);
    let max_size = params.max_size.unwrap_or(n_steps / 2).min(n_steps / 2);
    let mut count = 0usize;
    for size in params.min_size.max(1)..=max_size {
        let max_position = (n_steps - 2 * size).min(last_start);
        for position in 0..=max_position {
            let repeated = roll.rows().all(|row| {
                row[position..position + size] == row[position + size..position + 2 * size]
            });
            if repeated {
                count += 1;
            }
        }
    }
    -(count as f64)
}

/// Normalized Shannon entropy of each line's pitch usage, averaged over
/// lines. A line whose range holds a single pitch scores 0.
pub fn entropy(piece: &Piece) -> f64 {
    if piece.n_lines() == 0 {
        return 0.0;
    }
    let mut total = 0.0;
    for line in 0..piece.n_lines() {
        let range_size = piece.line_range_size(line);
        if range_size < 2 {
            continue;
        }
        let elements = piece.full_line(line);
        let mut counts = vec![0usize; range_size];
        for element in &elements {
            counts[element.relative_position] += 1;
        }
        let n = elements.len() as f64;
        let h: f64 = counts
            .iter()
            .filter(|&&c| c > 0)
            .map(|&c| {
                let p = c as f64 / n;
                -p * p.ln()
            })
            .sum();
        total += h / (range_size as f64).ln();
    }
    total / piece.n_lines() as f64
}

/// Minus the mean clash penalty over all line pairs at every time step of
/// the inner measures. Equal pitches cost `unison_penalty`, equal pitch
/// classes in different octaves cost `octave_penalty`.
pub fn absence_of_pitch_class_clashes(piece: &Piece, params: &PitchClassClashesParams) -> f64 {
    let timelines: Vec<Vec<Option<usize>>> =
        (0..piece.n_lines()).map(|line| piece.pitch_timeline(line)).collect();
    let steps = piece.steps_per_measure();
    let inner = steps..piece.total_steps().saturating_sub(steps);
    let mut penalty = 0.0;
    let mut n_pairs = 0usize;
    for t in inner {
        for i in 0..timelines.len() {
            for j in i + 1..timelines.len() {
                let (Some(a), Some(b)) = (timelines[i][t], timelines[j][t]) else {
                    continue;
                };
                n_pairs += 1;
                if a == b {
                    penalty += params.unison_penalty;
                } else if a % 12 == b % 12 {
                    penalty += params.octave_penalty;
                }
            }
        }
    }
    if n_pairs == 0 {
        return 0.0;
    }
    -penalty / n_pairs as f64
}

/// Per-step degree positions of a line.
fn degree_timeline(piece: &Piece, line: usize) -> Vec<Option<usize>> {
    let mut timeline = vec![None; piece.total_steps()];
    for element in piece.full_line(line) {
        for slot in &mut timeline[element.start..element.end()] {
            *slot = Some(element.position_in_degrees);
        }
    }
    timeline
}

/// Mean weight of the motion types between every pair of lines at every
/// step where at least one of them moves.
pub fn motion_types(piece: &Piece, params: &MotionTypesParams) -> f64 {
    let timelines: Vec<Vec<Option<usize>>> =
        (0..piece.n_lines()).map(|line| degree_timeline(piece, line)).collect();
    let movement = |line: usize, t: usize| -> Option<i64> {
        let now = timelines[line][t]? as i64;
        let before = timelines[line][t - 1]? as i64;
        Some(now - before)
    };
    let mut total = 0.0;
    let mut count = 0usize;
    for t in 1..piece.total_steps() {
        for i in 0..timelines.len() {
            for j in i + 1..timelines.len() {
                let (Some(a), Some(b)) = (movement(i, t), movement(j, t)) else {
                    continue;
                };
                let weight = match (a, b) {
                    (0, 0) => continue,
                    (0, _) | (_, 0) => params.oblique,
                    _ if a == b => params.parallel,
                    _ if a.signum() == b.signum() => params.similar,
                    _ => params.contrary,
                };
                total += weight;
                count += 1;
            }
        }
    }
    if count == 0 {
        return 0.0;
    }
    total / count as f64
}

fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len().min(ys.len());
    if n == 0 {
        return 1.0;
    }
    let mean_x = xs[..n].iter().sum::<f64>() / n as f64;
    let mean_y = ys[..n].iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for k in 0..n {
        let dx = xs[k] - mean_x;
        let dy = ys[k] - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x == 0.0 || var_y == 0.0 {
        return 1.0;
    }
    cov / (var_x * var_y).sqrt()
}

/// Minus the mean pairwise Pearson correlation of the lines' pitch curves.
/// A constant line counts as fully correlated. 0 for a single line.
pub fn lines_correlation(piece: &Piece) -> f64 {
    let curves: Vec<Vec<f64>> = (0..piece.n_lines())
        .map(|line| {
            piece
                .pitch_timeline(line)
                .into_iter()
                .flatten()
                .map(|p| p as f64)
                .collect()
        })
        .collect();
    let mut sum = 0.0;
    let mut n_pairs = 0usize;
    for i in 0..curves.len() {
        for j in i + 1..curves.len() {
            sum += pearson(&curves[i], &curves[j]);
            n_pairs += 1;
        }
    }
    if n_pairs == 0 {
        return 0.0;
    }
    -sum / n_pairs as f64
}

/// Mean over lines of `1 - shortage - duplications`: how far the line's
/// peak falls below the top of its range, and how often the peak recurs.
pub fn climax_explicitness(piece: &Piece, params: &ClimaxParams) -> f64 {
    if piece.n_lines() == 0 {
        return 0.0;
    }
    let mut total = 0.0;
    for line in 0..piece.n_lines() {
        let positions = degrees(&piece.full_line(line));
        let mut peak = 0usize;
        let mut duplications = 0usize;
        for (k, &position) in positions.iter().enumerate() {
            if k == 0 || position > peak {
                peak = position;
                duplications = 0;
            } else if position == peak {
                duplications += 1;
            }
        }
        let shortage = piece.line_highest_degree(line).saturating_sub(peak);
        total += 1.0
            - params.shortage_penalty * shortage as f64
            - params.duplication_penalty * duplications as f64;
    }
    total / piece.n_lines() as f64
}

/// Share of lines whose number of skips lies in `min_n_skips..=max_n_skips`.
pub fn number_of_skips(piece: &Piece, params: &NumberOfSkipsParams) -> f64 {
    if piece.n_lines() == 0 {
        return 0.0;
    }
    let in_range = (0..piece.n_lines())
        .filter(|&line| {
            let skips = piece.movements(line).iter().filter(|m| m.abs() > 1).count();
            (params.min_n_skips..=params.max_n_skips).contains(&skips)
        })
        .count();
    in_range as f64 / piece.n_lines() as f64
}

/// Minus the sum of `|skip| ^ exponent` over all downward skips.
pub fn absence_of_downward_skips(piece: &Piece, params: &DownwardSkipsParams) -> f64 {
    let penalty: f64 = (0..piece.n_lines())
        .flat_map(|line| piece.movements(line))
        .filter(|&m| m < -1)
        .map(|m| (m.unsigned_abs() as f64).powf(params.exponent))
        .sum();
    -penalty
}

/// Minus the penalties of all windows of `min_size` consecutive elements
/// whose range (in scale degrees) is too narrow. A window pays the largest
/// penalty among thresholds at or above its range.
pub fn absence_of_narrow_ranges(piece: &Piece, params: &NarrowRangesParams) -> f64 {
    if params.min_size == 0 {
        return 0.0;
    }
    let mut penalty = 0.0;
    for line in 0..piece.n_lines() {
        let positions = degrees(&piece.full_line(line));
        for window in positions.windows(params.min_size) {
            let (Some(low), Some(high)) = (window.iter().min(), window.iter().max()) else {
                continue;
            };
            let range = high - low;
            penalty += params
                .penalties
                .range(range..)
                .map(|(_, &p)| p)
                .fold(0.0, f64::max);
        }
    }
    -penalty
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LineSpec, PieceConfig};
    use crate::scale::ScaleType;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    /// A one-line piece in C major written with the given movements.
    fn solo(lowest: &str, highest: &str, end: &str, max_skip: usize, movements: &[i32]) -> Piece {
        let config = PieceConfig {
            tonic: "C".to_string(),
            scale_type: ScaleType::Major,
            n_measures: movements.len() + 2,
            steps_per_measure: 1,
            allowed_durations: Vec::new(),
            lines: vec![LineSpec {
                name: String::new(),
                lowest_note: lowest.to_string(),
                highest_note: highest.to_string(),
                start_note: "E4".to_string(),
                end_note: end.to_string(),
                max_skip,
            }],
            melodic_rules: Vec::new(),
            harmony_rules: Vec::new(),
        };
        let mut piece = Piece::new(&config).unwrap();
        for &m in movements {
            piece.add_line_element(0, m, None).unwrap();
        }
        assert!(piece.is_complete());
        piece
    }

    fn duet(upper: &[i32], lower: &[i32]) -> Piece {
        let spec = |lowest: &str, highest: &str, start: &str, end: &str| LineSpec {
            name: String::new(),
            lowest_note: lowest.to_string(),
            highest_note: highest.to_string(),
            start_note: start.to_string(),
            end_note: end.to_string(),
            max_skip: 2,
        };
        let config = PieceConfig {
            tonic: "C".to_string(),
            scale_type: ScaleType::Major,
            n_measures: upper.len() + 2,
            steps_per_measure: 1,
            allowed_durations: Vec::new(),
            lines: vec![spec("C5", "C6", "E5", "C5"), spec("C4", "C5", "C4", "C4")],
            melodic_rules: Vec::new(),
            harmony_rules: Vec::new(),
        };
        let mut piece = Piece::new(&config).unwrap();
        for (&a, &b) in upper.iter().zip(lower) {
            piece.add_measure(&[a, b]).unwrap();
        }
        assert!(piece.is_complete());
        piece
    }

    #[test]
    fn test_entropy_uniform_usage() {
        // E F G D C B A, then the end note G3: every pitch of G3..G4 once.
        let piece = solo("G3", "G4", "G3", 3, &[1, 1, -3, -1, -1, -1]);
        assert_close(entropy(&piece), 1.0);
        let repetitive = solo("G3", "G4", "E4", 3, &[1, -1, 0, 1, -1, 0]);
        assert!(entropy(&repetitive) < 0.5);
    }

    #[test]
    fn test_climax_explicitness() {
        // E4 D4 C4 C4 B3 C4 D4 E4: the peak E4 is the top of the range but recurs once.
        let piece = solo("G3", "E4", "E4", 2, &[-1, -1, 0, -1, 1, 1]);
        assert_close(climax_explicitness(&piece, &ClimaxParams::default()), 0.5);
        // Peak F4 one degree short of G4, reached once.
        let piece = solo("G3", "G4", "E4", 2, &[1, -1, 0, 0, 0, 0]);
        assert_close(climax_explicitness(&piece, &ClimaxParams::default()), 0.7);
    }

    #[test]
    fn test_absence_of_narrow_ranges() {
        let params = NarrowRangesParams {
            min_size: 4,
            penalties: BTreeMap::from([(1, 1.0), (2, 0.6), (3, 0.1)]),
        };
        let piece = solo("G3", "G4", "G3", 3, &[1, 1, -1, -1, -3, -1]);
        assert_close(absence_of_narrow_ranges(&piece, &params), -1.2);
        let piece = solo("G3", "G4", "G3", 3, &[1, 1, 0, -1, -3, -1]);
        assert_close(absence_of_narrow_ranges(&piece, &params), -1.6);
    }

    #[test]
    fn test_skips() {
        // Movements 1 1 -3 -1 -1 -1 and the final -1: one skip.
        let piece = solo("G3", "G4", "G3", 3, &[1, 1, -3, -1, -1, -1]);
        let params = NumberOfSkipsParams {
            min_n_skips: 1,
            max_n_skips: 2,
        };
        assert_close(number_of_skips(&piece, &params), 1.0);
        let strict = NumberOfSkipsParams {
            min_n_skips: 2,
            max_n_skips: 4,
        };
        assert_close(number_of_skips(&piece, &strict), 0.0);
        assert_close(
            absence_of_downward_skips(&piece, &DownwardSkipsParams { exponent: 2.0 }),
            -9.0,
        );
    }

    #[test]
    fn test_absence_of_looped_pitches() {
        // E4 E4 E4 G4 G4 E4 E4 E4: two runs of three.
        let piece = solo("C4", "C5", "E4", 2, &[0, 0, 2, 0, -2, 0]);
        let params = LoopedPitchesParams {
            max_n_repetitions: 2,
        };
        assert_close(absence_of_looped_pitches(&piece, &params), -2.0);
    }

    #[test]
    fn test_absence_of_looped_fragments() {
        // E4 F4 E4 F4 E4 F4 E4 E4 on a single-row-per-pitch roll.
        let piece = solo("C4", "C5", "E4", 2, &[1, -1, 1, -1, 1, -1]);
        let params = LoopedFragmentsParams {
            min_size: 2,
            max_size: Some(2),
        };
        // Fragments of two starting at 0, 1, 2, 3 repeat; position 4 would
        // compare E4 F4 with E4 E4.
        assert_close(absence_of_looped_fragments(&piece, &params), -4.0);
    }

    #[test]
    fn test_motion_types() {
        // Upper E5 D5 C5 | C5, lower C4 D4 E4 | C4.
        let piece = duet(&[-1, -1], &[1, 1]);
        let params = MotionTypesParams::default();
        // Two contrary steps, then upper holds while lower leaps: oblique.
        assert_close(motion_types(&piece, &params), (1.0 + 1.0 + 0.5) / 3.0);
        let oblique = duet(&[-1, -1], &[0, 0]);
        assert_close(motion_types(&oblique, &params), 0.5);
    }

    #[test]
    fn test_lines_correlation() {
        let contrary = duet(&[-1, -1], &[1, 1]);
        assert!(lines_correlation(&contrary) > 0.0);
        let similar = duet(&[1, -1], &[1, -1]);
        assert!(lines_correlation(&similar) < 0.0);
    }

    #[test]
    fn test_pitch_class_clashes() {
        // Upper E5 D5 C5 C5 over lower C4 D4 C4 C4: D5/D4 octave in measure 1,
        // C5/C4 in measure 2. Outer measures are excluded.
        let piece = duet(&[-1, -1], &[1, -1]);
        let params = PitchClassClashesParams::default();
        assert_close(absence_of_pitch_class_clashes(&piece, &params), -1.0);
    }

    #[test]
    fn test_evaluate_is_weighted_sum_over_named_functions() {
        let piece = solo("G3", "G4", "G3", 3, &[1, 1, -3, -1, -1, -1]);
        let params = ScoringParams::default();
        let coefs = BTreeMap::from([
            (ScoringFunction::Entropy, 2.0),
            (ScoringFunction::AbsenceOfDownwardSkips, 0.5),
        ]);
        assert_close(evaluate(&piece, &coefs, &params), 2.0 * 1.0 + 0.5 * -9.0);
        let breakdown = evaluate_breakdown(&piece, &coefs, &params);
        assert_eq!(breakdown.len(), 2);
        assert_close(breakdown[&ScoringFunction::Entropy], 1.0);
        assert_close(evaluate(&piece, &BTreeMap::new(), &params), 0.0);
    }

    #[test]
    fn test_coefficients_deserialize_by_name() {
        let coefs: BTreeMap<ScoringFunction, f64> =
            serde_json::from_str(r#"{"entropy": 1.0, "absence_of_long_sounds": 0.5}"#).unwrap();
        assert_eq!(coefs[&ScoringFunction::AbsenceOfLongSounds], 0.5);
        let params: ScoringParams =
            serde_json::from_str(r#"{"absence_of_narrow_ranges": {"min_size": 4}}"#).unwrap();
        assert_eq!(params.absence_of_narrow_ranges.min_size, 4);
        assert_eq!(params.absence_of_narrow_ranges.penalties.len(), 2);
    }
}
