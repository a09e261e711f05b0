use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::error::Result;
use crate::model::Grid;
use crate::scan::CELL_SEPARATOR;

#[derive(Debug, Clone)]
pub struct TextSerializerConfig {
    pub include_format: bool,
}

impl Default for TextSerializerConfig {
    fn default() -> Self {
        Self {
            include_format: true,
        }
    }
}

/// Renders a grid into the row-major "vanilla" encoding.
#[derive(Debug, Clone, Default)]
pub struct TextSerializer {
    config: TextSerializerConfig,
}

impl TextSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: TextSerializerConfig) -> Self {
        Self { config }
    }

    pub fn to_string(&self, grid: &Grid) -> String {
        let mut lines = Vec::with_capacity(grid.nrows + 2 + grid.merged_regions.len());
        lines.push(title_line(&grid.name, &grid.nrows.to_string(), grid.ncols));
        if let Some(frozen) = grid.frozen {
            lines.push(format!(
                "[META] frozen_rows={} frozen_cols={}",
                frozen.rows, frozen.cols
            ));
        }
        for region in &grid.merged_regions {
            lines.push(format!(
                "[META] merged={},{},{},{}",
                region.first_row, region.first_col, region.last_row, region.last_col
            ));
        }
        for row in grid.ordered_rows() {
            let rendered = row
                .iter()
                .map(|cell| {
                    render_assignment(
                        &cell.address,
                        &cell.value.render(),
                        cell.fmt.as_deref().filter(|_| self.config.include_format),
                    )
                })
                .collect::<Vec<_>>();
            lines.push(rendered.join(CELL_SEPARATOR));
        }
        tracing::debug!(sheet = %grid.name, lines = lines.len(), "serialized grid");
        lines.join("\n")
    }

    pub fn write_textual<P: AsRef<Path>>(&self, grid: &Grid, path: P) -> Result<()> {
        let txt = self.to_string(grid);
        let mut file = File::create(path)?;
        file.write_all(txt.as_bytes())?;
        Ok(())
    }
}

pub fn title_line(name: &str, rows: &str, cols: usize) -> String {
    format!("# Sheet: {name} ({rows}x{cols})")
}

pub fn render_assignment(address: &str, value: &str, fmt: Option<&str>) -> String {
    match fmt {
        Some(fmt) => format!("{address}={value}::{fmt}"),
        None => format!("{address}={value}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Cell, CellValue, FrozenPanes, Grid, MergedRegion};

    fn sample_grid() -> Grid {
        let mut grid = Grid::new("Budget", 4, 3);
        grid.frozen = Some(FrozenPanes { rows: 1, cols: 0 });
        grid.merged_regions.push(MergedRegion {
            first_row: 0,
            first_col: 0,
            last_row: 0,
            last_col: 1,
        });
        // deliberately out of column order
        grid.push(Cell::header(0, 1, "Amount"));
        grid.push(Cell::header(0, 0, "Item"));
        grid.push(Cell::new(1, 0, CellValue::Text("Rent".into())));
        grid.push(Cell::new(1, 1, CellValue::Int(1200)).with_fmt("#,##0"));
        grid.push(Cell::new(1, 2, CellValue::Float(f64::NAN)));
        grid.push(Cell::new(3, 0, CellValue::Text("Total".into())));
        grid.push(Cell::new(3, 1, CellValue::Float(1200.5)));
        grid.push(Cell::new(3, 2, CellValue::Bool(true)));
        grid
    }

    #[test]
    fn snapshot_serialization() {
        let rendered = TextSerializer::new().to_string(&sample_grid());
        insta::assert_snapshot!(rendered, @r###"
        # Sheet: Budget (4x3)
        [META] frozen_rows=1 frozen_cols=0
        [META] merged=0,0,0,1
        A1='Item'::header | B1='Amount'::header
        A2='Rent' | B2=1200::#,##0 | C2=NaN

        A4='Total' | B4=1200.5 | C4=True
        "###);
    }

    #[test]
    fn snapshot_serialization_without_format() {
        let serializer = TextSerializer::with_config(TextSerializerConfig {
            include_format: false,
        });
        let rendered = serializer.to_string(&sample_grid());
        insta::assert_snapshot!(rendered, @r###"
        # Sheet: Budget (4x3)
        [META] frozen_rows=1 frozen_cols=0
        [META] merged=0,0,0,1
        A1='Item' | B1='Amount'
        A2='Rent' | B2=1200 | C2=NaN

        A4='Total' | B4=1200.5 | C4=True
        "###);
    }

    #[test]
    fn one_line_per_row() {
        let rendered = TextSerializer::new().to_string(&sample_grid());
        // title + two meta lines + four rows
        assert_eq!(rendered.split('\n').count(), 7);
        assert_eq!(rendered.split('\n').nth(5), Some(""));
    }
}
