// Well-ID grammar, grid generation, and the dense volume matrix type.
use std::sync::LazyLock;

use regex::Regex;

use crate::core::error::{Error, ErrorKind};

pub const ROW_LETTERS: &[u8; 26] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";

static WELL_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z])(\d+)$").expect("well id pattern"));

/// Splits an alphanumeric well ID like `"A01"` into its row letter and
/// 1-based column number.
pub fn parse_well(well: &str) -> Result<(char, usize), Error> {
    let captures = WELL_ID.captures(well).ok_or_else(|| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("not an alphanumeric well ID: '{well}'"))
    })?;
    let row = captures[1]
        .chars()
        .next()
        .map(|c| c.to_ascii_uppercase())
        .ok_or_else(|| Error::new(ErrorKind::Usage).with_message("empty row letter"))?;
    let column: usize = captures[2].parse().map_err(|_| {
        Error::new(ErrorKind::Usage).with_message(format!("invalid well column in '{well}'"))
    })?;
    if column == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message(format!("well columns are 1-based: '{well}'")));
    }
    Ok((row, column))
}

/// Formats a well ID from a row letter and 1-based column number.
pub fn well_id(row: char, column: usize) -> String {
    format!("{row}{column:02}")
}

/// 1-based column-major position of a well inside a physical grid.
pub fn linear_position(row: usize, column: usize, physical_rows: usize) -> usize {
    1 + column * physical_rows + row
}

#[derive(Clone, Debug, PartialEq)]
pub struct Matrix {
    rows: usize,
    columns: usize,
    data: Vec<f64>,
}

impl Matrix {
    pub fn zeros(rows: usize, columns: usize) -> Self {
        Self::filled(rows, columns, 0.0)
    }

    pub fn filled(rows: usize, columns: usize, value: f64) -> Self {
        Self {
            rows,
            columns,
            data: vec![value; rows * columns],
        }
    }

    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self, Error> {
        let n_rows = rows.len();
        let n_columns = rows.first().map(Vec::len).unwrap_or(0);
        if n_rows == 0 || n_columns == 0 {
            return Err(Error::new(ErrorKind::Usage).with_message("matrix must not be empty"));
        }
        let mut data = Vec::with_capacity(n_rows * n_columns);
        for row in &rows {
            if row.len() != n_columns {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("matrix rows must have equal lengths"));
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            rows: n_rows,
            columns: n_columns,
            data,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn get(&self, row: usize, column: usize) -> f64 {
        self.data[row * self.columns + column]
    }

    pub fn set(&mut self, row: usize, column: usize, value: f64) {
        self.data[row * self.columns + column] = value;
    }

    pub fn total(&self) -> f64 {
        self.data.iter().sum()
    }

    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        (0..self.rows)
            .map(|r| self.data[r * self.columns..(r + 1) * self.columns].to_vec())
            .collect()
    }

    /// Renders the matrix one row per line with values rounded to the given
    /// number of decimals, the way ledger histories are reported.
    pub fn render_rounded(&self, decimals: u32) -> String {
        let factor = 10f64.powi(decimals as i32);
        let mut out = String::new();
        for r in 0..self.rows {
            let cells: Vec<String> = (0..self.columns)
                .map(|c| {
                    let value = (self.get(r, c) * factor).round() / factor;
                    format!("{value}")
                })
                .collect();
            out.push('[');
            out.push_str(&cells.join(" "));
            out.push(']');
            if r + 1 < self.rows {
                out.push('\n');
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::{linear_position, parse_well, well_id, Matrix};
    use crate::core::error::ErrorKind;

    #[test]
    fn well_ids_round_trip() {
        assert_eq!(well_id('A', 1), "A01");
        assert_eq!(well_id('H', 12), "H12");
        assert_eq!(parse_well("A01").expect("parse"), ('A', 1));
        assert_eq!(parse_well("b3").expect("parse"), ('B', 3));
        assert_eq!(parse_well("F12").expect("parse"), ('F', 12));
    }

    #[test]
    fn malformed_well_ids_are_rejected() {
        for bad in ["", "A", "01", "AA01", "A0", "A-1"] {
            let err = parse_well(bad).expect_err("should fail");
            assert_eq!(err.kind(), ErrorKind::Usage, "well {bad:?}");
        }
    }

    #[test]
    fn positions_count_down_columns_first() {
        // 3-row plate: A01=1, B01=2, C01=3, A02=4, ...
        assert_eq!(linear_position(0, 0, 3), 1);
        assert_eq!(linear_position(2, 0, 3), 3);
        assert_eq!(linear_position(0, 1, 3), 4);
        // single physical row (trough): position equals the column number
        assert_eq!(linear_position(0, 2, 1), 3);
    }

    #[test]
    fn matrix_accessors() {
        let mut m = Matrix::filled(2, 3, 1.5);
        m.set(1, 2, 4.0);
        assert_eq!(m.get(1, 2), 4.0);
        assert_eq!(m.get(0, 0), 1.5);
        assert_eq!(m.total(), 1.5 * 5.0 + 4.0);
        assert_eq!(m.to_rows(), vec![vec![1.5, 1.5, 1.5], vec![1.5, 1.5, 4.0]]);
    }

    #[test]
    fn ragged_matrix_is_rejected() {
        let err = Matrix::from_rows(vec![vec![1.0, 2.0], vec![3.0]]).expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn render_rounds_to_decimals() {
        let mut m = Matrix::zeros(1, 2);
        m.set(0, 0, 12.345);
        m.set(0, 1, 0.04);
        assert_eq!(m.render_rounded(1), "[12.3 0]");
    }
}
