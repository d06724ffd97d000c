// Piano roll: a 0/1 matrix of pitch (rows) by time step (columns).
//
// Orientation is fixed across the crate: row 0 is the HIGHEST pitch and row
// indices grow downward in pitch, one semitone per row. Row `r` therefore
// holds piano-key position `highest_position - r`. The scorers in
// roll_scoring.rs rely on this (a row with a larger index is a lower pitch)
// and the environment observation and renderer output follow it too.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PianoRoll {
    n_rows: usize,
    n_cols: usize,
    /// Piano-key position of row 0.
    highest_position: usize,
    cells: Vec<u8>,
}

impl PianoRoll {
    /// An empty roll covering `n_rows` semitones downward from `highest_position`.
    pub fn new(n_rows: usize, n_cols: usize, highest_position: usize) -> Self {
        PianoRoll {
            n_rows,
            n_cols,
            highest_position,
            cells: vec![0; n_rows * n_cols],
        }
    }

    /// Build a roll from explicit rows; all rows must share one length.
    /// Returns `None` for ragged input.
    pub fn from_rows(rows: &[Vec<u8>], highest_position: usize) -> Option<Self> {
        let n_cols = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|r| r.len() != n_cols) {
            return None;
        }
        Some(PianoRoll {
            n_rows: rows.len(),
            n_cols,
            highest_position,
            cells: rows.iter().flatten().map(|&v| u8::from(v > 0)).collect(),
        })
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn highest_position(&self) -> usize {
        self.highest_position
    }

    pub fn get(&self, row: usize, col: usize) -> u8 {
        self.cells[row * self.n_cols + col]
    }

    pub fn is_on(&self, row: usize, col: usize) -> bool {
        self.get(row, col) > 0
    }

    pub fn set(&mut self, row: usize, col: usize, value: u8) {
        self.cells[row * self.n_cols + col] = value;
    }

    pub fn row(&self, row: usize) -> &[u8] {
        &self.cells[row * self.n_cols..(row + 1) * self.n_cols]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[u8]> {
        (0..self.n_rows).map(move |r| self.row(r))
    }

    pub fn column(&self, col: usize) -> Vec<u8> {
        (0..self.n_rows).map(|r| self.get(r, col)).collect()
    }

    /// Row holding the given piano-key position, if covered.
    pub fn row_of(&self, position: usize) -> Option<usize> {
        let row = self.highest_position.checked_sub(position)?;
        (row < self.n_rows).then_some(row)
    }

    /// Piano-key position of a row.
    pub fn position_of(&self, row: usize) -> usize {
        self.highest_position - row
    }

    pub fn count_ones(&self) -> usize {
        self.cells.iter().filter(|&&v| v > 0).count()
    }

    pub fn clear(&mut self) {
        self.cells.fill(0);
    }

    /// Text rendering, one line per row, highest pitch first.
    pub fn to_ascii(&self) -> String {
        let mut out = String::with_capacity(self.n_rows * (self.n_cols + 6));
        for r in 0..self.n_rows {
            let name = crate::scale::position_to_note(self.position_of(r));
            out.push_str(&format!("{name:>4} "));
            for c in 0..self.n_cols {
                out.push(if self.is_on(r, c) { '#' } else { '.' });
            }
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_position_mapping() {
        let roll = PianoRoll::new(13, 4, 51);
        assert_eq!(roll.row_of(51), Some(0));
        assert_eq!(roll.row_of(39), Some(12));
        assert_eq!(roll.row_of(38), None);
        assert_eq!(roll.row_of(52), None);
        assert_eq!(roll.position_of(12), 39);
    }

    #[test]
    fn test_from_rows() {
        let roll = PianoRoll::from_rows(&[vec![0, 1], vec![1, 0]], 40).unwrap();
        assert!(roll.is_on(0, 1));
        assert_eq!(roll.column(0), vec![0, 1]);
        assert_eq!(roll.count_ones(), 2);
        assert!(PianoRoll::from_rows(&[vec![0, 1], vec![1]], 40).is_none());
    }

    #[test]
    fn test_ascii() {
        let mut roll = PianoRoll::new(2, 3, 40);
        roll.set(1, 2, 1);
        assert_eq!(roll.to_ascii(), " C#4 ...\n  C4 ..#\n");
    }
}
