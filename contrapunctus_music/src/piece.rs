// The piece: several melodic lines growing in time against one scale.
//
// A `Piece` is split into an immutable layout shared through an `Arc` (the
// scale, per-line pitch ranges, the precomputed allowed-movement table for
// every pitch of every line, the rule lists) and a small mutable state made
// of plain values (placed elements, motion runs, measure fill, the piano
// roll). Cloning a piece therefore copies only the state, which is what the
// search does when it forks one rolled-in piece into many rollouts.
//
// Time is measured in steps; a measure holds `steps_per_measure` steps. The
// start note of every line fills measure 0 and the end note fills the last
// measure. Everything in between is written one element at a time through
// `add_line_element` (or one whole measure for all lines through
// `add_measure`). An element never crosses a measure boundary.
//
// Validity of a candidate element, checked in order, short-circuiting:
// 1. the duration is allowed and fits in the current measure;
// 2. the movement is in the allowed-movement table of the current pitch;
// 3. the end note stays reachable with `max_skip` per remaining transition;
// 4. every melodic rule passes;
// 5. every sonority the element completes passes every harmony rule;
// 6. if the element fills the line's last free slot, the implied movement to
//    the end note is allowed and passes the melodic rules too.
//
// A sonority at time t is complete once every line has been written past t.
// Only time points where some line has an onset are checked, since nothing
// changes in between. Each line also remembers how its last element clashed
// with the others (see `Dissonance`), refreshed after every placement, so the
// rules on leaving a dissonance know what they are leaving.
//
// The piano roll (see piano_roll.rs) is written only by `paint`, called when
// an element is placed or on reset, so it always mirrors the lines.

use crate::config::{LineSpec, PieceConfig};
use crate::error::{MusicError, Result};
use crate::piano_roll::PianoRoll;
use crate::rules::{Dissonance, HarmonyContext, HarmonyRule, MelodicContext, MelodicRule, Voice};
use crate::scale::{Scale, ScaleElement, note_to_position};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A pitch placed in a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineElement {
    /// Ordinal of the pitch within the scale.
    pub position_in_degrees: usize,
    /// Piano-key position (A0 = 0).
    pub position_in_semitones: usize,
    pub degree: u8,
    pub is_from_tonic_triad: bool,
    /// Ordinal of the pitch within the line's range.
    pub relative_position: usize,
    /// First time step covered.
    pub start: usize,
    /// Length in time steps.
    pub duration: usize,
}

impl LineElement {
    pub fn from_scale_element(
        element: &ScaleElement,
        relative_position: usize,
        start: usize,
        duration: usize,
    ) -> Self {
        LineElement {
            position_in_degrees: element.position_in_degrees,
            position_in_semitones: element.position_in_semitones,
            degree: element.degree,
            is_from_tonic_triad: element.is_from_tonic_triad,
            relative_position,
            start,
            duration,
        }
    }

    /// First time step after the element.
    pub fn end(&self) -> usize {
        self.start + self.duration
    }
}

/// The current run of movements in one direction.
///
/// `direction` is -1, 0 or 1; a run of repeated pitches has direction 0.
/// `start_index` is the index of the element the run departed from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MotionRun {
    pub direction: i32,
    pub length: usize,
    pub start_index: usize,
}

impl MotionRun {
    /// The run after a movement away from the element at `from_index`.
    pub fn advance(self, movement: i32, from_index: usize) -> MotionRun {
        let direction = movement.signum();
        if self.length > 0 && direction == self.direction {
            MotionRun {
                length: self.length + 1,
                ..self
            }
        } else {
            MotionRun {
                direction,
                length: 1,
                start_index: from_index,
            }
        }
    }
}

/// A note of a rendered line, ready for MIDI-style export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedNote {
    pub midi_pitch: u8,
    pub start: usize,
    pub duration: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedLine {
    pub name: String,
    pub notes: Vec<RenderedNote>,
}

/// Immutable tables of one line.
#[derive(Debug)]
struct LineLayout {
    name: String,
    /// Position in degrees of the lowest pitch of the range.
    lowest_degree: usize,
    n_pitches: usize,
    max_skip: usize,
    start: usize,
    end: usize,
    /// Allowed movements indexed by relative position.
    allowed_movements: Vec<Vec<i32>>,
}

impl LineLayout {
    fn new(scale: &Scale, spec: &LineSpec, index: usize, n_measures: usize) -> Result<Self> {
        let name = if spec.name.is_empty() {
            format!("line {index}")
        } else {
            spec.name.clone()
        };
        let lowest = note_to_position(&spec.lowest_note)?;
        let highest = note_to_position(&spec.highest_note)?;
        if spec.max_skip == 0 {
            return Err(MusicError::Configuration(format!(
                "{name}: max_skip must be at least 1"
            )));
        }

        let in_range: Vec<&ScaleElement> = scale
            .elements()
            .iter()
            .filter(|e| (lowest..=highest).contains(&e.position_in_semitones))
            .collect();
        let (Some(first), Some(last)) = (in_range.first(), in_range.last()) else {
            return Err(MusicError::EmptyRange {
                scale: scale.name(),
                lowest: spec.lowest_note.clone(),
                highest: spec.highest_note.clone(),
            });
        };
        let lowest_degree = first.position_in_degrees;
        let n_pitches = last.position_in_degrees - lowest_degree + 1;

        let endpoint = |note: &str| -> Result<usize> {
            let element = scale.get_element_by_note(note)?;
            if !(lowest..=highest).contains(&element.position_in_semitones) {
                return Err(MusicError::Configuration(format!(
                    "{name}: {note} lies outside {}..{}",
                    spec.lowest_note, spec.highest_note
                )));
            }
            if !element.is_from_tonic_triad {
                return Err(MusicError::InvalidEndpoint {
                    note: note.to_string(),
                    scale: scale.name(),
                });
            }
            Ok(element.position_in_degrees - lowest_degree)
        };
        let start = endpoint(&spec.start_note)?;
        let end = endpoint(&spec.end_note)?;

        let max_skip = spec.max_skip as i32;
        let allowed_movements = in_range
            .iter()
            .enumerate()
            .map(|(relative, element)| {
                (-max_skip..=max_skip)
                    .filter(|&m| {
                        let destination = relative as i32 + m;
                        destination >= 0
                            && (destination as usize) < n_pitches
                            && (m != 0 || element.is_from_tonic_triad)
                    })
                    .collect()
            })
            .collect();

        if start.abs_diff(end) > spec.max_skip * (n_measures - 1) {
            return Err(MusicError::Configuration(format!(
                "{name}: {} cannot reach {} in {n_measures} measures",
                spec.start_note, spec.end_note
            )));
        }

        Ok(LineLayout {
            name,
            lowest_degree,
            n_pitches,
            max_skip: spec.max_skip,
            start,
            end,
            allowed_movements,
        })
    }
}

/// Everything about a piece that never changes after construction.
#[derive(Debug)]
struct PieceLayout {
    scale: Scale,
    lines: Vec<LineLayout>,
    n_measures: usize,
    steps_per_measure: usize,
    /// Sorted ascending, deduplicated.
    allowed_durations: Vec<usize>,
    melodic_rules: Vec<MelodicRule>,
    harmony_rules: Vec<HarmonyRule>,
    /// Some harmony rule reads how previous elements clashed.
    needs_dissonance_history: bool,
    roll_rows: usize,
    roll_highest: usize,
}

/// Mutable cursor of one line.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LineState {
    /// Placed elements, starting with the start note. The end note is kept
    /// in the layout and is not part of this list.
    elements: Vec<LineElement>,
    motion_run: MotionRun,
    /// Steps already filled in the current measure.
    measure_duration: usize,
    /// How the last element clashed over the sonorities completed so far.
    last_dissonance: Dissonance,
}

impl LineState {
    fn cursor(&self) -> usize {
        self.elements.last().map_or(0, LineElement::end)
    }

    fn sounding_at(&self, time: usize) -> Option<&LineElement> {
        self.elements
            .iter()
            .rev()
            .find(|e| e.start <= time && time < e.end())
    }
}

/// A candidate element treated as placed while it is being checked.
#[derive(Debug, Clone, Copy)]
struct Pending<'a> {
    line: usize,
    element: &'a LineElement,
}

#[derive(Debug, Clone)]
pub struct Piece {
    layout: Arc<PieceLayout>,
    lines: Vec<LineState>,
    roll: PianoRoll,
}

impl Piece {
    pub fn new(config: &PieceConfig) -> Result<Self> {
        let scale = Scale::new(&config.tonic, config.scale_type)?;
        if config.n_measures < 3 {
            return Err(MusicError::Configuration(format!(
                "a piece needs at least 3 measures, got {}",
                config.n_measures
            )));
        }
        let steps = config.steps_per_measure;
        if steps == 0 {
            return Err(MusicError::Configuration(
                "steps_per_measure must be positive".to_string(),
            ));
        }
        let mut allowed_durations = if config.allowed_durations.is_empty() {
            vec![steps]
        } else {
            config.allowed_durations.clone()
        };
        allowed_durations.sort_unstable();
        allowed_durations.dedup();
        if allowed_durations.iter().any(|&d| d == 0 || d > steps) {
            return Err(MusicError::Configuration(format!(
                "allowed durations {allowed_durations:?} must lie in 1..={steps}"
            )));
        }
        if config.lines.is_empty() {
            return Err(MusicError::Configuration(
                "a piece needs at least one line".to_string(),
            ));
        }

        let mut lines = Vec::with_capacity(config.lines.len());
        let mut lowest = usize::MAX;
        let mut highest = 0;
        for (index, spec) in config.lines.iter().enumerate() {
            lines.push(LineLayout::new(&scale, spec, index, config.n_measures)?);
            lowest = lowest.min(note_to_position(&spec.lowest_note)?);
            highest = highest.max(note_to_position(&spec.highest_note)?);
        }

        let layout = PieceLayout {
            scale,
            lines,
            n_measures: config.n_measures,
            steps_per_measure: steps,
            allowed_durations,
            melodic_rules: config.melodic_rules.clone(),
            harmony_rules: config.harmony_rules.clone(),
            needs_dissonance_history: config
                .harmony_rules
                .iter()
                .any(HarmonyRule::needs_dissonance_history),
            roll_rows: highest - lowest + 1,
            roll_highest: highest,
        };
        let roll = PianoRoll::new(
            layout.roll_rows,
            layout.n_measures * steps,
            layout.roll_highest,
        );
        let mut piece = Piece {
            layout: Arc::new(layout),
            lines: Vec::new(),
            roll,
        };
        piece.reset();
        Ok(piece)
    }

    /// Drop everything but the start and end notes.
    pub fn reset(&mut self) {
        let steps = self.layout.steps_per_measure;
        self.roll.clear();
        self.lines = (0..self.layout.lines.len())
            .map(|line| LineState {
                elements: vec![self.make_element(line, self.layout.lines[line].start, 0, steps)],
                motion_run: MotionRun::default(),
                measure_duration: 0,
                last_dissonance: Dissonance::Consonant,
            })
            .collect();
        self.refresh_dissonances();
        for line in 0..self.lines.len() {
            let start = self.lines[line].elements[0];
            let end = self.end_element(line);
            Self::paint(&mut self.roll, &start);
            Self::paint(&mut self.roll, &end);
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn scale(&self) -> &Scale {
        &self.layout.scale
    }

    pub fn n_lines(&self) -> usize {
        self.layout.lines.len()
    }

    pub fn n_measures(&self) -> usize {
        self.layout.n_measures
    }

    pub fn steps_per_measure(&self) -> usize {
        self.layout.steps_per_measure
    }

    pub fn total_steps(&self) -> usize {
        self.layout.n_measures * self.layout.steps_per_measure
    }

    pub fn allowed_durations(&self) -> &[usize] {
        &self.layout.allowed_durations
    }

    /// Panics if `line` is out of range, as do the other per-line accessors.
    pub fn line_name(&self, line: usize) -> &str {
        &self.layout.lines[line].name
    }

    pub fn max_skip(&self, line: usize) -> usize {
        self.layout.lines[line].max_skip
    }

    /// Number of scale pitches in the line's range.
    pub fn line_range_size(&self, line: usize) -> usize {
        self.layout.lines[line].n_pitches
    }

    /// Position in degrees of the highest pitch the line may use.
    pub fn line_highest_degree(&self, line: usize) -> usize {
        let layout = &self.layout.lines[line];
        layout.lowest_degree + layout.n_pitches - 1
    }

    /// Placed elements, start note first, end note excluded.
    pub fn line_elements(&self, line: usize) -> &[LineElement] {
        &self.lines[line].elements
    }

    pub fn end_element(&self, line: usize) -> LineElement {
        let steps = self.layout.steps_per_measure;
        self.make_element(
            line,
            self.layout.lines[line].end,
            self.end_start(),
            steps,
        )
    }

    /// Placed elements followed by the end note.
    pub fn full_line(&self, line: usize) -> Vec<LineElement> {
        let mut elements = self.lines[line].elements.clone();
        elements.push(self.end_element(line));
        elements
    }

    /// Movements between consecutive elements of `full_line`.
    pub fn movements(&self, line: usize) -> Vec<i32> {
        self.full_line(line)
            .windows(2)
            .map(|pair| pair[1].position_in_degrees as i32 - pair[0].position_in_degrees as i32)
            .collect()
    }

    /// Allowed movements from a pitch of the line, by relative position.
    pub fn allowed_movements_at(&self, line: usize, relative_position: usize) -> &[i32] {
        &self.layout.lines[line].allowed_movements[relative_position]
    }

    /// Allowed movements from the line's current pitch.
    pub fn current_allowed_movements(&self, line: usize) -> &[i32] {
        let last = self.last_element(line);
        self.allowed_movements_at(line, last.relative_position)
    }

    pub fn motion_run(&self, line: usize) -> MotionRun {
        self.lines[line].motion_run
    }

    pub fn measure_duration(&self, line: usize) -> usize {
        self.lines[line].measure_duration
    }

    /// How the line's last placed element clashed with the other lines, over
    /// the sonorities completed so far.
    pub fn last_element_dissonance(&self, line: usize) -> Dissonance {
        self.lines[line].last_dissonance
    }

    pub fn is_last_element_consonant(&self, line: usize) -> bool {
        self.last_element_dissonance(line) == Dissonance::Consonant
    }

    /// Measure and half-measure boundaries. With an odd number of steps per
    /// measure only the downbeat is strong.
    pub fn is_strong_beat(&self, time: usize) -> bool {
        let steps = self.layout.steps_per_measure;
        let period = if steps % 2 == 0 { steps / 2 } else { steps };
        time % period == 0
    }

    /// First time step not yet written in the line.
    pub fn line_cursor(&self, line: usize) -> usize {
        self.lines[line].cursor()
    }

    /// Earliest cursor over all lines: every sonority before it is complete.
    pub fn current_time(&self) -> usize {
        self.lines
            .iter()
            .map(LineState::cursor)
            .min()
            .unwrap_or(0)
    }

    pub fn is_line_complete(&self, line: usize) -> bool {
        self.lines[line].cursor() >= self.end_start()
    }

    pub fn is_complete(&self) -> bool {
        (0..self.n_lines()).all(|line| self.is_line_complete(line))
    }

    /// The unfinished line with the earliest cursor, lowest index on ties.
    pub fn next_line(&self) -> Option<usize> {
        (0..self.n_lines())
            .filter(|&line| !self.is_line_complete(line))
            .min_by_key(|&line| (self.lines[line].cursor(), line))
    }

    /// Duration that fills the rest of the line's current measure.
    pub fn default_duration(&self, line: usize) -> usize {
        self.layout.steps_per_measure - self.lines[line].measure_duration
    }

    pub fn scale_element(&self, element: &LineElement) -> Option<&ScaleElement> {
        self.layout
            .scale
            .get_element_by_position_in_degrees(element.position_in_degrees)
            .ok()
    }

    /// Semitone position sounding in the line at every time step, `None`
    /// where the line has not been written yet.
    pub fn pitch_timeline(&self, line: usize) -> Vec<Option<usize>> {
        let mut timeline = vec![None; self.total_steps()];
        for element in self.full_line(line) {
            for slot in &mut timeline[element.start..element.end()] {
                *slot = Some(element.position_in_semitones);
            }
        }
        timeline
    }

    /// Piano roll over the union of all line ranges; row 0 is the highest pitch.
    pub fn piano_roll(&self) -> &PianoRoll {
        &self.roll
    }

    /// Per-line (MIDI pitch, start, duration) notes including the end note.
    pub fn rendered_lines(&self) -> Vec<RenderedLine> {
        (0..self.n_lines())
            .map(|line| RenderedLine {
                name: self.line_name(line).to_string(),
                notes: self
                    .full_line(line)
                    .iter()
                    .map(|e| RenderedNote {
                        midi_pitch: e.position_in_semitones as u8 + crate::scale::LOWEST_MIDI_PITCH,
                        start: e.start,
                        duration: e.duration,
                    })
                    .collect(),
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Validity and mutation
    // -----------------------------------------------------------------------

    /// Whether `movement` may be played in `line` with the default duration.
    pub fn check_validity(&self, line: usize, movement: i32) -> bool {
        line < self.n_lines()
            && self
                .candidate(line, movement, self.default_duration(line))
                .is_some()
    }

    pub fn check_element_validity(&self, line: usize, movement: i32, duration: usize) -> bool {
        line < self.n_lines() && self.candidate(line, movement, duration).is_some()
    }

    /// Append one element to a line. `None` duration fills the current measure.
    pub fn add_line_element(
        &mut self,
        line: usize,
        movement: i32,
        duration: Option<usize>,
    ) -> Result<()> {
        if line >= self.n_lines() {
            return Err(MusicError::OutOfRange {
                what: "line",
                index: line,
                len: self.n_lines(),
            });
        }
        let duration = duration.unwrap_or_else(|| self.default_duration(line));
        let candidate = self
            .candidate(line, movement, duration)
            .ok_or(MusicError::InvalidMovement {
                line,
                movement,
                duration,
            })?;

        let steps = self.layout.steps_per_measure;
        let state = &mut self.lines[line];
        let from_index = state.elements.len() - 1;
        state.motion_run = state.motion_run.advance(movement, from_index);
        state.measure_duration = (state.measure_duration + duration) % steps;
        state.elements.push(candidate);
        Self::paint(&mut self.roll, &candidate);
        self.refresh_dissonances();
        Ok(())
    }

    /// Whether every line can advance by one whole measure with the given
    /// movements, applied in line order.
    pub fn check_measure_validity(&self, movements: &[i32]) -> bool {
        let mut scratch = self.clone();
        scratch.apply_measure(movements).is_ok()
    }

    /// Advance every line by one whole measure. On error the piece is left
    /// untouched.
    pub fn add_measure(&mut self, movements: &[i32]) -> Result<()> {
        let mut scratch = self.clone();
        scratch.apply_measure(movements)?;
        *self = scratch;
        Ok(())
    }

    fn apply_measure(&mut self, movements: &[i32]) -> Result<()> {
        if movements.len() != self.n_lines() {
            return Err(MusicError::MovementCount {
                expected: self.n_lines(),
                got: movements.len(),
            });
        }
        let steps = self.layout.steps_per_measure;
        for (line, &movement) in movements.iter().enumerate() {
            self.add_line_element(line, movement, Some(steps))?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn end_start(&self) -> usize {
        (self.layout.n_measures - 1) * self.layout.steps_per_measure
    }

    fn last_element(&self, line: usize) -> LineElement {
        let elements = &self.lines[line].elements;
        elements[elements.len() - 1]
    }

    fn make_element(&self, line: usize, relative: usize, start: usize, duration: usize) -> LineElement {
        let degree = self.layout.lines[line].lowest_degree + relative;
        let element = &self.layout.scale.elements()[degree];
        LineElement::from_scale_element(element, relative, start, duration)
    }

    fn paint(roll: &mut PianoRoll, element: &LineElement) {
        if let Some(row) = roll.row_of(element.position_in_semitones) {
            for col in element.start..element.end().min(roll.n_cols()) {
                roll.set(row, col, 1);
            }
        }
    }

    /// The element a movement would place, or `None` if it is not valid.
    fn candidate(&self, line: usize, movement: i32, duration: usize) -> Option<LineElement> {
        let layout = &self.layout.lines[line];
        let state = &self.lines[line];
        let steps = self.layout.steps_per_measure;
        let end_start = self.end_start();
        let last = self.last_element(line);

        if last.end() >= end_start
            || !self.layout.allowed_durations.contains(&duration)
            || state.measure_duration + duration > steps
        {
            return None;
        }
        if !layout.allowed_movements[last.relative_position].contains(&movement) {
            return None;
        }
        let relative = (last.relative_position as i32 + movement) as usize;
        let candidate = self.make_element(line, relative, last.end(), duration);

        let remaining = end_start - candidate.end();
        let shortest = self.layout.allowed_durations.first().copied().unwrap_or(steps);
        let transitions = remaining / shortest + 1;
        if relative.abs_diff(layout.end) > layout.max_skip * transitions {
            return None;
        }

        let end = self.end_element(line);
        let context = MelodicContext {
            history: &state.elements,
            candidate,
            movement,
            motion_run: state.motion_run,
            end,
            measures_left: remaining.div_ceil(steps) + 1,
            is_final_transition: false,
            steps_per_measure: steps,
        };
        if !self.layout.melodic_rules.iter().all(|rule| rule.check(&context)) {
            return None;
        }
        if !self.completed_sonorities_pass(line, &candidate) {
            return None;
        }
        if candidate.end() == end_start && !self.final_transition_passes(line, &candidate, movement) {
            return None;
        }
        Some(candidate)
    }

    fn completed_sonorities_pass(&self, line: usize, candidate: &LineElement) -> bool {
        if self.lines.len() < 2 || self.layout.harmony_rules.is_empty() {
            return true;
        }
        let horizon = self
            .lines
            .iter()
            .enumerate()
            .filter(|&(other, _)| other != line)
            .map(|(_, state)| state.cursor())
            .fold(candidate.end(), usize::min);
        if horizon <= candidate.start {
            return true;
        }

        let mut onsets = vec![candidate.start];
        for (other, state) in self.lines.iter().enumerate() {
            if other == line {
                continue;
            }
            onsets.extend(
                state
                    .elements
                    .iter()
                    .map(|e| e.start)
                    .filter(|&t| t > candidate.start && t < horizon),
            );
        }
        onsets.sort_unstable();
        onsets.dedup();

        let pending = Some(Pending {
            line,
            element: candidate,
        });
        let with_history = self.layout.needs_dissonance_history;
        for time in onsets {
            let Some(voices) = self.sonority_at(time, pending, with_history) else {
                continue;
            };
            let context = HarmonyContext {
                voices: &voices,
                strong_beat: self.is_strong_beat(time),
            };
            if !self
                .layout
                .harmony_rules
                .iter()
                .all(|rule| rule.check(&context))
            {
                return false;
            }
        }
        true
    }

    /// The element sounding in `line` at `time`, with the pending element
    /// treated as placed.
    fn element_at(
        &self,
        line: usize,
        time: usize,
        pending: Option<Pending<'_>>,
    ) -> Option<LineElement> {
        let covers = |p: &Pending<'_>| p.line == line && p.element.start <= time && time < p.element.end();
        if let Some(p) = pending.filter(covers) {
            return Some(*p.element);
        }
        self.lines[line].sounding_at(time).copied()
    }

    /// One voice per line at `time`, or `None` while some line has not been
    /// written that far. `with_history` fills in how each starting voice's
    /// previous element clashed.
    fn sonority_at(
        &self,
        time: usize,
        pending: Option<Pending<'_>>,
        with_history: bool,
    ) -> Option<Vec<Voice>> {
        (0..self.lines.len())
            .map(|line| {
                let element = self.element_at(line, time, pending)?;
                let previous = time
                    .checked_sub(1)
                    .and_then(|t| self.element_at(line, t, pending));
                let onset = element.start == time;
                let movement = previous.filter(|_| onset).map(|p| {
                    element.position_in_degrees as i32 - p.position_in_degrees as i32
                });
                let previous_dissonance = match previous {
                    Some(before) if onset && with_history => {
                        let is_pending =
                            pending.is_some_and(|p| p.line == line && p.element.start == time);
                        if is_pending {
                            self.lines[line].last_dissonance
                        } else {
                            self.dissonance_of(line, &before, pending)
                        }
                    }
                    _ => Dissonance::Consonant,
                };
                Some(Voice {
                    position: element.position_in_semitones,
                    previous_position: previous.map(|p| p.position_in_semitones),
                    onset,
                    movement,
                    previous_dissonance,
                })
            })
            .collect()
    }

    /// How `element` of `line` clashes over the complete sonorities in its
    /// span: dissonant at its own onset, or made dissonant later on a strong
    /// beat while held.
    fn dissonance_of(
        &self,
        line: usize,
        element: &LineElement,
        pending: Option<Pending<'_>>,
    ) -> Dissonance {
        let inside = |t: usize| t > element.start && t < element.end();
        let mut times = vec![element.start];
        for (other, state) in self.lines.iter().enumerate() {
            if other != line {
                times.extend(state.elements.iter().map(|e| e.start).filter(|&t| inside(t)));
            }
        }
        if let Some(p) = pending.filter(|p| p.line != line && inside(p.element.start)) {
            times.push(p.element.start);
        }
        times.sort_unstable();
        times.dedup();

        let mut dissonance = Dissonance::Consonant;
        for time in times {
            let Some(voices) = self.sonority_at(time, pending, false) else {
                continue;
            };
            let context = HarmonyContext {
                voices: &voices,
                strong_beat: self.is_strong_beat(time),
            };
            if context.is_dissonant(line) {
                if time == element.start {
                    return Dissonance::Struck;
                }
                dissonance = Dissonance::Suspended;
            }
        }
        dissonance
    }

    fn refresh_dissonances(&mut self) {
        let updated: Vec<Dissonance> = (0..self.lines.len())
            .map(|line| self.dissonance_of(line, &self.last_element(line), None))
            .collect();
        for (state, dissonance) in self.lines.iter_mut().zip(updated) {
            state.last_dissonance = dissonance;
        }
    }

    fn final_transition_passes(&self, line: usize, candidate: &LineElement, movement: i32) -> bool {
        let layout = &self.layout.lines[line];
        let state = &self.lines[line];
        let end = self.end_element(line);
        let final_movement = end.position_in_degrees as i32 - candidate.position_in_degrees as i32;
        if !layout.allowed_movements[candidate.relative_position].contains(&final_movement) {
            return false;
        }
        let mut history = state.elements.clone();
        history.push(*candidate);
        let context = MelodicContext {
            history: &history,
            candidate: end,
            movement: final_movement,
            motion_run: state.motion_run.advance(movement, state.elements.len() - 1),
            end,
            measures_left: 0,
            is_final_transition: true,
            steps_per_measure: self.layout.steps_per_measure,
        };
        self.layout
            .melodic_rules
            .iter()
            .all(|rule| rule.check(&context))
    }
}
