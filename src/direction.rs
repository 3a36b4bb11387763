//! The eight compass directions around a sub-image.
//!
//! Directions carry a fixed numbering 0..7 which is used to index the
//! per-direction slot arrays throughout the exchange protocol. Wire tags are
//! derived elsewhere, so the numbering here never doubles as a message tag.

pub const DIRECTIONS: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    North,
    NorthEast,
    East,
    SouthEast,
    South,
    SouthWest,
    West,
    NorthWest,
}

use Direction::*;

pub const ALL: [Direction; DIRECTIONS] = [
    North, NorthEast, East, SouthEast, South, SouthWest, West, NorthWest,
];

impl Direction {
    /// The fixed slot index of this direction.
    pub fn index(self) -> usize {
        match self {
            North => 0,
            NorthEast => 1,
            East => 2,
            SouthEast => 3,
            South => 4,
            SouthWest => 5,
            West => 6,
            NorthWest => 7,
        }
    }

    /// The (row, column) offset of the neighbouring sub-image, in image
    /// coordinates where row 0 is the top edge.
    pub fn offset(self) -> (i64, i64) {
        match self {
            North => (-1, 0),
            NorthEast => (-1, 1),
            East => (0, 1),
            SouthEast => (1, 1),
            South => (1, 0),
            SouthWest => (1, -1),
            West => (0, -1),
            NorthWest => (-1, -1),
        }
    }

    /// The direction a neighbour sees this rank in.
    pub fn opposite(self) -> Self {
        match self {
            North => South,
            NorthEast => SouthWest,
            East => West,
            SouthEast => NorthWest,
            South => North,
            SouthWest => NorthEast,
            West => East,
            NorthWest => SouthEast,
        }
    }

    pub fn is_axial(self) -> bool {
        let (dr, dc) = self.offset();
        dr == 0 || dc == 0
    }

    pub fn is_diagonal(self) -> bool {
        !self.is_axial()
    }
}
