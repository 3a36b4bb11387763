//! Whole-image text I/O on the coordinator side.
//!
//! The file format is whitespace-separated integers, one image row per
//! line. The reader counts columns from the first row and rows from the
//! line count, and rejects ragged input.

use crate::error::{Error, Result};
use crate::sub_image::Pixel;
use std::fmt::Write as _;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Image {
    rows: usize,
    columns: usize,
    data: Vec<Pixel>,
}

impl Image {
    pub fn new(rows: usize, columns: usize, data: Vec<Pixel>) -> Self {
        assert_eq!(data.len(), rows * columns);
        Self {
            rows,
            columns,
            data,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn pixels(&self) -> &[Pixel] {
        &self.data
    }

    pub fn row(&self, row: usize) -> &[Pixel] {
        &self.data[row * self.columns..(row + 1) * self.columns]
    }

    /// Overwrite the given span of one row.
    pub fn splice_row(&mut self, row: usize, columns: std::ops::Range<usize>, values: &[Pixel]) {
        let start = row * self.columns;
        self.data[start + columns.start..start + columns.end].copy_from_slice(values);
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let mut data = Vec::new();
        let mut columns = 0;
        let mut rows = 0;
        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let row: Vec<Pixel> = line
                .split_whitespace()
                .map(|token| {
                    token.parse().map_err(|_| {
                        Error::Parse(format!("line {}: bad pixel value {:?}", number + 1, token))
                    })
                })
                .collect::<Result<_>>()?;
            if rows == 0 {
                columns = row.len();
            } else if row.len() != columns {
                return Err(Error::Parse(format!(
                    "line {}: expected {} values, found {}",
                    number + 1,
                    columns,
                    row.len()
                )));
            }
            rows += 1;
            data.extend(row);
        }
        if rows == 0 {
            return Err(Error::Parse("image file is empty".into()));
        }
        Ok(Self {
            rows,
            columns,
            data,
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let mut writer = BufWriter::new(file);
        let mut line = String::new();
        for row in 0..self.rows {
            line.clear();
            for (i, pixel) in self.row(row).iter().enumerate() {
                if i > 0 {
                    line.push(' ');
                }
                let _ = write!(line, "{}", pixel);
            }
            line.push('\n');
            writer.write_all(line.as_bytes())?;
        }
        Ok(())
    }
}
