use serde::{Deserialize, Serialize};

use crate::error::{GridError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    Empty,
    Bool,
    Number,
    Date,
    Text,
}

impl DType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DType::Empty => "empty",
            DType::Bool => "bool",
            DType::Number => "number",
            DType::Date => "date",
            DType::Text => "text",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    Empty,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl CellValue {
    /// Types a raw field the way the tabular loaders do.
    pub fn infer(raw: &str) -> Self {
        if raw.is_empty() {
            return CellValue::Empty;
        }
        let trimmed = raw.trim();
        if let Ok(v) = trimmed.parse::<i64>() {
            return CellValue::Int(v);
        }
        if looks_like_float(trimmed) {
            if let Ok(v) = trimmed.parse::<f64>() {
                return CellValue::Float(v);
            }
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "true" => CellValue::Bool(true),
            "false" => CellValue::Bool(false),
            _ => CellValue::Text(raw.to_string()),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            CellValue::Empty => DType::Empty,
            CellValue::Float(v) if v.is_nan() => DType::Empty,
            CellValue::Bool(_) => DType::Bool,
            CellValue::Int(_) | CellValue::Float(_) => DType::Number,
            CellValue::Text(s) => {
                let has_sep = s.chars().any(|c| matches!(c, '-' | '/' | ':'));
                let has_digit = s.chars().any(|c| c.is_ascii_digit());
                if has_sep && has_digit && s.chars().count() <= 25 {
                    DType::Date
                } else {
                    DType::Text
                }
            }
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, CellValue::Text(_))
    }

    /// Literal form used in cell assignments.
    pub fn render(&self) -> String {
        match self {
            CellValue::Empty => "NaN".to_string(),
            CellValue::Bool(true) => "True".to_string(),
            CellValue::Bool(false) => "False".to_string(),
            CellValue::Int(v) => v.to_string(),
            CellValue::Float(v) => format!("{v:?}"),
            CellValue::Text(s) => quote_literal(s),
        }
    }
}

// Rejects inputs like "inf" or "nan" that `f64::from_str` would accept.
fn looks_like_float(s: &str) -> bool {
    s.chars().any(|c| c.is_ascii_digit())
        && s
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
}

pub fn quote_literal(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

pub fn column_letters(col: usize) -> String {
    let mut letters = Vec::new();
    let mut c = col + 1;
    while c > 0 {
        let rem = (c - 1) % 26;
        letters.push(b'A' + rem as u8);
        c = (c - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

pub fn cell_address(row: usize, col: usize) -> String {
    format!("{}{}", column_letters(col), row + 1)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub row: usize,
    pub col: usize,
    pub address: String,
    pub value: CellValue,
    pub dtype: DType,
    pub fmt: Option<String>,
}

impl Cell {
    pub fn new(row: usize, col: usize, value: CellValue) -> Self {
        Self {
            row,
            col,
            address: cell_address(row, col),
            dtype: value.dtype(),
            value,
            fmt: None,
        }
    }

    pub fn header(row: usize, col: usize, name: impl Into<String>) -> Self {
        Self::new(row, col, CellValue::Text(name.into())).with_fmt("header")
    }

    pub fn with_fmt(mut self, fmt: impl Into<String>) -> Self {
        self.fmt = Some(fmt.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedRegion {
    pub first_row: usize,
    pub first_col: usize,
    pub last_row: usize,
    pub last_col: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrozenPanes {
    pub rows: usize,
    pub cols: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    pub name: String,
    pub nrows: usize,
    pub ncols: usize,
    pub cells: Vec<Cell>,
    #[serde(default)]
    pub merged_regions: Vec<MergedRegion>,
    #[serde(default)]
    pub frozen: Option<FrozenPanes>,
}

impl Grid {
    pub fn new(name: impl Into<String>, nrows: usize, ncols: usize) -> Self {
        Self {
            name: name.into(),
            nrows,
            ncols,
            cells: Vec::new(),
            merged_regions: Vec::new(),
            frozen: None,
        }
    }

    /// Header names land on row 0 tagged `header`, data rows start at row 1.
    pub fn from_rows<S: AsRef<str>>(
        name: impl Into<String>,
        header: &[S],
        rows: Vec<Vec<CellValue>>,
    ) -> Self {
        let ncols = header.len();
        let mut grid = Self::new(name, rows.len() + 1, ncols);
        grid.cells.reserve((rows.len() + 1) * ncols);
        for (j, column) in header.iter().enumerate() {
            grid.cells.push(Cell::header(0, j, column.as_ref()));
        }
        for (i, row) in rows.into_iter().enumerate() {
            let mut values = row.into_iter();
            for j in 0..ncols {
                let value = values.next().unwrap_or(CellValue::Empty);
                grid.cells.push(Cell::new(i + 1, j, value));
            }
        }
        grid
    }

    pub fn push(&mut self, cell: Cell) {
        self.cells.push(cell);
    }

    pub fn validate(&self) -> Result<()> {
        for cell in &self.cells {
            if cell.row >= self.nrows || cell.col >= self.ncols {
                return Err(GridError::InvalidGrid(format!(
                    "cell {} at ({}, {}) outside {}x{}",
                    cell.address, cell.row, cell.col, self.nrows, self.ncols
                )));
            }
            if cell.address != cell_address(cell.row, cell.col) {
                return Err(GridError::InvalidGrid(format!(
                    "cell address {} does not match ({}, {})",
                    cell.address, cell.row, cell.col
                )));
            }
        }
        Ok(())
    }

    /// Cells bucketed per row and sorted by column; out-of-range cells are dropped.
    pub fn ordered_rows(&self) -> Vec<Vec<&Cell>> {
        let mut rows: Vec<Vec<&Cell>> = vec![Vec::new(); self.nrows];
        for cell in &self.cells {
            if let Some(row) = rows.get_mut(cell.row) {
                row.push(cell);
            }
        }
        for row in &mut rows {
            row.sort_by_key(|c| c.col);
        }
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_follow_spreadsheet_letters() {
        assert_eq!(cell_address(0, 0), "A1");
        assert_eq!(cell_address(9, 25), "Z10");
        assert_eq!(cell_address(0, 26), "AA1");
        assert_eq!(cell_address(2, 701), "ZZ3");
        assert_eq!(cell_address(0, 702), "AAA1");
    }

    #[test]
    fn dtype_inference() {
        assert_eq!(CellValue::Empty.dtype(), DType::Empty);
        assert_eq!(CellValue::Float(f64::NAN).dtype(), DType::Empty);
        assert_eq!(CellValue::Bool(true).dtype(), DType::Bool);
        assert_eq!(CellValue::Int(3).dtype(), DType::Number);
        assert_eq!(CellValue::Text("2024-01-05".into()).dtype(), DType::Date);
        assert_eq!(CellValue::Text("12:30".into()).dtype(), DType::Date);
        assert_eq!(CellValue::Text("North".into()).dtype(), DType::Text);
        assert_eq!(
            CellValue::Text("order 1-2-3 shipped to the north warehouse".into()).dtype(),
            DType::Text
        );
    }

    #[test]
    fn field_inference() {
        assert_eq!(CellValue::infer(""), CellValue::Empty);
        assert_eq!(CellValue::infer("42"), CellValue::Int(42));
        assert_eq!(CellValue::infer("-1.5"), CellValue::Float(-1.5));
        assert_eq!(CellValue::infer("TRUE"), CellValue::Bool(true));
        assert_eq!(CellValue::infer("nan"), CellValue::Text("nan".into()));
        assert_eq!(CellValue::infer("North"), CellValue::Text("North".into()));
    }

    #[test]
    fn literals_are_quoted() {
        assert_eq!(CellValue::Text("Yes".into()).render(), "'Yes'");
        assert_eq!(CellValue::Text("it's".into()).render(), "\"it's\"");
        assert_eq!(
            CellValue::Text("a'b\"c".into()).render(),
            "'a\\'b\"c'"
        );
        assert_eq!(CellValue::Float(f64::NAN).render(), "NaN");
        assert_eq!(CellValue::Empty.render(), "NaN");
        assert_eq!(CellValue::Float(5.0).render(), "5.0");
        assert_eq!(CellValue::Int(-7).render(), "-7");
    }

    #[test]
    fn bools_render_capitalized_and_infer_back() {
        assert_eq!(CellValue::Bool(true).render(), "True");
        assert_eq!(CellValue::Bool(false).render(), "False");
        for value in [true, false] {
            let rendered = CellValue::Bool(value).render();
            assert_eq!(CellValue::infer(&rendered), CellValue::Bool(value));
        }
    }

    #[test]
    fn from_rows_places_header_first() {
        let grid = Grid::from_rows(
            "Sales",
            &["Region", "Units"],
            vec![vec![CellValue::Text("North".into())]],
        );
        assert_eq!(grid.nrows, 2);
        assert_eq!(grid.ncols, 2);
        assert_eq!(grid.cells[0].fmt.as_deref(), Some("header"));
        assert_eq!(grid.cells[3].value, CellValue::Empty);
        assert!(grid.validate().is_ok());
    }

    #[test]
    fn validate_rejects_out_of_range_cells() {
        let mut grid = Grid::new("S", 1, 1);
        grid.push(Cell::new(1, 0, CellValue::Int(1)));
        assert!(matches!(grid.validate(), Err(GridError::InvalidGrid(_))));
    }
}
