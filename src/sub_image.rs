//! The rectangle of pixels owned by a single worker.
//!
//! Two parallel row-major arrays of the same shape: `current` evolves under
//! sampling, `initial` is frozen at receipt and enters the energy as the
//! data-fidelity term. Pixels are single bytes; the sampler only ever stores
//! −1 or +1.

use crate::direction::Direction;

pub type Pixel = i8;

#[derive(Clone, Debug)]
pub struct SubImage {
    rows: usize,
    columns: usize,
    current: Vec<Pixel>,
    initial: Vec<Pixel>,
}

impl SubImage {
    /// Build a sub-image from its rows, as they arrive from the coordinator.
    /// Panics if the rows are ragged or empty; the coordinator slices them
    /// from a rectangular image so this indicates a protocol bug.
    pub fn from_rows(rows: Vec<Vec<Pixel>>) -> Self {
        let columns = rows.first().map_or(0, Vec::len);
        assert!(columns > 0, "sub-image must not be empty");
        assert!(rows.iter().all(|r| r.len() == columns));
        let data: Vec<_> = rows.into_iter().flatten().collect();
        Self {
            rows: data.len() / columns,
            columns,
            initial: data.clone(),
            current: data,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn get(&self, row: usize, column: usize) -> Pixel {
        self.current[row * self.columns + column]
    }

    pub fn initial(&self, row: usize, column: usize) -> Pixel {
        self.initial[row * self.columns + column]
    }

    pub fn flip(&mut self, row: usize, column: usize) {
        self.current[row * self.columns + column] *= -1;
    }

    /// One row of the current image, for shipping back to the coordinator.
    pub fn row(&self, row: usize) -> &[Pixel] {
        &self.current[row * self.columns..(row + 1) * self.columns]
    }

    /// Sum the current pixels inside the 3×3 window about the given centre,
    /// clipped to the array bounds and excluding the centre cell itself.
    ///
    /// The centre may lie outside the array: a neighbour answering a
    /// boundary question places the asker's pixel just beyond its own edge
    /// and calls this with that out-of-bounds centre, so a single summer
    /// covers the local interior case and all eight remote cases.
    pub fn window_sum(&self, centre_row: i64, centre_column: i64) -> i64 {
        let mut sum = 0;
        for i in centre_row - 1..=centre_row + 1 {
            for j in centre_column - 1..=centre_column + 1 {
                if (i, j) == (centre_row, centre_column) {
                    continue;
                }
                if i < 0 || j < 0 || i >= self.rows as i64 || j >= self.columns as i64 {
                    continue;
                }
                sum += self.get(i as usize, j as usize) as i64;
            }
        }
        sum
    }

    /// The window centre, in this sub-image's frame, of a question asked by
    /// the neighbour lying in `asker` direction. The asker's pixel sits one
    /// step beyond the shared edge, so the centre is off the array on that
    /// axis; on an axis the asker shares, `position` carries the index.
    pub fn remote_centre(&self, asker: Direction, position: i64) -> (i64, i64) {
        let (dr, dc) = asker.offset();
        let row = match dr {
            -1 => -1,
            1 => self.rows as i64,
            _ => position,
        };
        let column = match dc {
            -1 => -1,
            1 => self.columns as i64,
            _ => position,
        };
        (row, column)
    }
}
