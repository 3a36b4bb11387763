//! Worker-grid derivation and neighbour lookup.
//!
//! The coordinator arranges the `S` workers into a `grid_rows × grid_cols`
//! grid and cuts the image into matching tiles. The factoring is derived
//! from the worker count and the image shape rather than assumed: the most
//! nearly square factoring of `S` whose grid rows divide the image rows and
//! whose grid columns divide the image columns wins. An inadmissible worker
//! count is an error, reported before any messages flow.

use crate::direction::{Direction, ALL, DIRECTIONS};
use crate::error::{Error, Result};
use std::ops::Range;

/// Returns `floor(sqrt(n))` by Newton iteration.
fn integer_square_root(n: u64) -> u64 {
    if n < 2 {
        return n;
    }
    let mut x0 = n / 2;
    let mut x1 = (x0 + n / x0) / 2;
    while x1 < x0 {
        x0 = x1;
        x1 = (x0 + n / x0) / 2;
    }
    x0
}

#[derive(Clone, Copy, Debug)]
pub struct WorkerGrid {
    grid_rows: usize,
    grid_cols: usize,
    image_rows: usize,
    image_cols: usize,
}

impl WorkerGrid {
    /// Derive the worker grid for `workers` workers over a `rows × columns`
    /// image. Factorings are tried from the most square outward, each in
    /// both orientations.
    pub fn derive(workers: usize, rows: usize, columns: usize) -> Result<Self> {
        if workers == 0 || rows == 0 || columns == 0 {
            return Err(Error::Topology(format!(
                "cannot split a {}x{} image over {} workers",
                rows, columns, workers
            )));
        }
        for d in (1..=integer_square_root(workers as u64) as usize).rev() {
            if workers % d != 0 {
                continue;
            }
            for (grid_rows, grid_cols) in [(d, workers / d), (workers / d, d)] {
                if rows % grid_rows == 0 && columns % grid_cols == 0 {
                    return Ok(Self {
                        grid_rows,
                        grid_cols,
                        image_rows: rows,
                        image_cols: columns,
                    });
                }
            }
        }
        Err(Error::Topology(format!(
            "no factoring of {} workers tiles a {}x{} image",
            workers, rows, columns
        )))
    }

    pub fn workers(&self) -> usize {
        self.grid_rows * self.grid_cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.grid_rows, self.grid_cols)
    }

    /// Shape of each worker's tile.
    pub fn tile_shape(&self) -> (usize, usize) {
        (
            self.image_rows / self.grid_rows,
            self.image_cols / self.grid_cols,
        )
    }

    fn coordinate(&self, worker: usize) -> (i64, i64) {
        ((worker / self.grid_cols) as i64, (worker % self.grid_cols) as i64)
    }

    /// The worker adjacent to `worker` in the given direction, if that grid
    /// cell exists. Diagonals fall off the grid exactly when either adjacent
    /// axial neighbour does.
    pub fn neighbour(&self, worker: usize, direction: Direction) -> Option<usize> {
        let (row, col) = self.coordinate(worker);
        let (dr, dc) = direction.offset();
        let (row, col) = (row + dr, col + dc);
        if row < 0 || col < 0 || row >= self.grid_rows as i64 || col >= self.grid_cols as i64 {
            None
        } else {
            Some(row as usize * self.grid_cols + col as usize)
        }
    }

    /// The image rows and columns covered by a worker's tile.
    pub fn tile(&self, worker: usize) -> (Range<usize>, Range<usize>) {
        let (tile_rows, tile_cols) = self.tile_shape();
        let (row, col) = self.coordinate(worker);
        let (row, col) = (row as usize, col as usize);
        (
            row * tile_rows..(row + 1) * tile_rows,
            col * tile_cols..(col + 1) * tile_cols,
        )
    }
}

/// A worker's static map from direction to neighbouring rank. `None` means
/// the sub-image lies on that global edge.
#[derive(Clone, Debug, Default)]
pub struct NeighbourTable {
    peers: [Option<usize>; DIRECTIONS],
}

impl NeighbourTable {
    pub fn new(peers: [Option<usize>; DIRECTIONS]) -> Self {
        Self { peers }
    }

    pub fn peer(&self, direction: Direction) -> Option<usize> {
        self.peers[direction.index()]
    }

    /// The present directions with their peer ranks, in direction order.
    pub fn present(&self) -> impl Iterator<Item = (Direction, usize)> + '_ {
        ALL.iter()
            .filter_map(|&dir| self.peers[dir.index()].map(|peer| (dir, peer)))
    }

    pub fn len(&self) -> usize {
        self.present().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
