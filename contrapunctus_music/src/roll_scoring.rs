// Scoring functions over a bare piano roll.
//
// These work on the rectangular 0/1 matrix alone, with no knowledge of
// lines: row 0 is the highest pitch, one semitone per row, and columns are
// time steps (see piano_roll.rs). Most of them compare the roll with shifted
// copies of itself, either in time (repetition, cyclicity) or in pitch
// (interval content).
//
// evaluation.rs wires these into the named scoring registry.

use crate::piano_roll::PianoRoll;
use crate::scale::{Scale, pitch_class_of};
use std::collections::BTreeMap;

fn variance(values: impl Iterator<Item = f64> + Clone) -> f64 {
    let (sum, count) = values.clone().fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        return 0.0;
    }
    let mean = sum / count as f64;
    values.map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64
}

/// Mean over pitches of the variance of each pitch's occupancy in time.
pub fn horizontal_variance(roll: &PianoRoll) -> f64 {
    if roll.n_rows() == 0 {
        return 0.0;
    }
    let total: f64 = roll
        .rows()
        .map(|row| variance(row.iter().map(|&v| v as f64)))
        .sum();
    total / roll.n_rows() as f64
}

/// Mean over time steps of the variance of each column across pitches.
pub fn vertical_variance(roll: &PianoRoll) -> f64 {
    if roll.n_cols() == 0 {
        return 0.0;
    }
    let total: f64 = (0..roll.n_cols())
        .map(|c| variance((0..roll.n_rows()).map(move |r| roll.get(r, c) as f64)))
        .sum();
    total / roll.n_cols() as f64
}

/// Minus the number of windows where a pitch sounds for more than
/// `max_n_time_steps` consecutive steps. A note held one step too long
/// costs 1, two steps too long costs 2, and so on.
pub fn absence_of_long_sounds(roll: &PianoRoll, max_n_time_steps: usize) -> f64 {
    let window = max_n_time_steps + 1;
    let mut count = 0usize;
    for row in roll.rows() {
        let mut run = 0usize;
        for &cell in row {
            if cell > 0 {
                run += 1;
                if run >= window {
                    count += 1;
                }
            } else {
                run = 0;
            }
        }
    }
    -(count as f64)
}

/// Mean over sounding pitches of the weighted share of periods that do not
/// cycle.
///
/// A row cycles with period `k` (1 to `max_n_time_steps`) when at most
/// `max_share * k` of its cells differ from the cell `k` steps earlier.
/// Each period weighs `k`, so a row that only repeats over long periods
/// keeps less of its score than one that repeats note by note. Rows that
/// never sound are skipped; a roll with no sounding row, or too short for
/// any period, scores 1.
pub fn noncyclicity(roll: &PianoRoll, max_n_time_steps: usize, max_share: f64) -> f64 {
    let max_period = max_n_time_steps.min(roll.n_cols().saturating_sub(1));
    if max_period == 0 {
        return 1.0;
    }
    let total_weight = (max_period * (max_period + 1) / 2) as f64;
    let mut sum = 0.0;
    let mut n_sounding = 0usize;
    for row in roll.rows() {
        if row.iter().all(|&v| v == 0) {
            continue;
        }
        n_sounding += 1;
        let broken: usize = (1..=max_period)
            .filter(|&k| {
                let changes = (k..row.len()).filter(|&t| row[t] != row[t - k]).count();
                changes as f64 > max_share * k as f64
            })
            .sum();
        sum += broken as f64 / total_weight;
    }
    if n_sounding == 0 {
        return 1.0;
    }
    sum / n_sounding as f64
}

/// Interval content weighted by temporal distance.
///
/// For every row and every higher row, the interval between them (in
/// semitones, reduced mod 12) is looked up in `interval_consonances`. The
/// lower row is shifted by every distance `d` with `|d|` a key of
/// `distance_weights`; each step where the shifted lower row and the higher
/// row both sound adds `distance_weights[|d|] * interval_consonances[interval]`.
/// Missing intervals count as 0.
pub fn consonances(
    roll: &PianoRoll,
    interval_consonances: &BTreeMap<usize, f64>,
    distance_weights: &BTreeMap<usize, f64>,
) -> f64 {
    let mut distances: Vec<i64> = distance_weights
        .keys()
        .flat_map(|&d| [d as i64, -(d as i64)])
        .collect();
    distances.sort_unstable();
    distances.dedup();

    let n_cols = roll.n_cols() as i64;
    let mut score = 0.0;
    for lower in 1..roll.n_rows() {
        let lower_row = roll.row(lower);
        if lower_row.iter().all(|&v| v == 0) {
            continue;
        }
        for upper in 0..lower {
            let upper_row = roll.row(upper);
            let interval = (lower - upper) % 12;
            let consonance = interval_consonances.get(&interval).copied().unwrap_or(0.0);
            if consonance == 0.0 {
                continue;
            }
            for &d in &distances {
                let weight = distance_weights
                    .get(&(d.unsigned_abs() as usize))
                    .copied()
                    .unwrap_or(0.0);
                let count = (0..n_cols)
                    .filter(|&t| {
                        let source = t - d;
                        (0..n_cols).contains(&source)
                            && lower_row[source as usize] > 0
                            && upper_row[t as usize] > 0
                    })
                    .count();
                score += weight * consonance * count as f64;
            }
        }
    }
    score
}

/// Number of note onsets approached by conjunct motion.
///
/// An onset is a sounding cell whose left neighbour in the same row is
/// silent (or the first column). It counts once if some cell 1 to
/// `max_n_semitones` rows away sounds 1 to `max_n_time_steps` steps
/// earlier.
pub fn conjunct_motion(roll: &PianoRoll, max_n_semitones: usize, max_n_time_steps: usize) -> f64 {
    let last_row = roll.n_rows().saturating_sub(1);
    let mut count = 0usize;
    for row in 0..roll.n_rows() {
        let row_lo = row.saturating_sub(max_n_semitones);
        let row_hi = (row + max_n_semitones).min(last_row);
        for col in 1..roll.n_cols() {
            if !roll.is_on(row, col) || roll.is_on(row, col - 1) {
                continue;
            }
            let col_lo = col.saturating_sub(max_n_time_steps);
            let approached = (row_lo..=row_hi)
                .filter(|&other| other != row)
                .any(|other| (col_lo..col).any(|c| roll.is_on(other, c)));
            if approached {
                count += 1;
            }
        }
    }
    count as f64
}

/// Share of sounding cells whose pitch belongs to the scale; 1 for an
/// empty roll.
pub fn tonality(roll: &PianoRoll, scale: &Scale) -> f64 {
    let mut sounding = 0usize;
    let mut in_scale = 0usize;
    for row in 0..roll.n_rows() {
        let pc = pitch_class_of(roll.position_of(row));
        let ones = roll.row(row).iter().filter(|&&v| v > 0).count();
        sounding += ones;
        if scale.contains_pitch_class(pc) {
            in_scale += ones;
        }
    }
    if sounding == 0 {
        return 1.0;
    }
    in_scale as f64 / sounding as f64
}
