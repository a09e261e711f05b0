use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use calamine::{open_workbook_auto, Data, Dimensions, Reader, Sheets};
use csv::ReaderBuilder;
use flate2::read::MultiGzDecoder;

use crate::error::{GridError, Result};
use crate::model::{Cell, CellValue, Grid, MergedRegion};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Csv { gzip: bool },
    Tsv { gzip: bool },
    Workbook,
}

impl InputFormat {
    pub fn detect(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.to_ascii_lowercase())
            .unwrap_or_default();
        let (name, gzip) = match name.strip_suffix(".gz") {
            Some(inner) => (inner.to_string(), true),
            None => (name, false),
        };
        let ext = name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
        match ext {
            "csv" => Ok(Self::Csv { gzip }),
            "tsv" | "tab" => Ok(Self::Tsv { gzip }),
            "xlsx" | "xlsm" | "xls" | "xlsb" | "ods" if !gzip => Ok(Self::Workbook),
            _ => Err(GridError::UnsupportedInput(path.to_path_buf())),
        }
    }

    pub fn delimiter(&self) -> u8 {
        match self {
            Self::Tsv { .. } => b'\t',
            _ => b',',
        }
    }
}

/// Sheet name used when the caller does not supply one: the file name up to
/// its first dot.
pub fn default_sheet_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.split('.').next())
        .filter(|n| !n.is_empty())
        .unwrap_or("Sheet1")
        .to_string()
}

/// Loads a CSV/TSV (optionally gzipped) file or one sheet of a workbook.
pub fn load_grid(path: &Path, sheet: Option<&str>) -> Result<Grid> {
    if !path.exists() {
        return Err(GridError::InputNotFound(path.to_path_buf()));
    }
    let format = InputFormat::detect(path)?;
    let grid = match format {
        InputFormat::Workbook => load_workbook(path, sheet)?,
        _ => {
            let name = sheet.map(str::to_string).unwrap_or_else(|| default_sheet_name(path));
            load_delimited(open_delimited(path, format)?, format.delimiter(), &name)?
        }
    };
    tracing::debug!(
        path = %path.display(),
        rows = grid.nrows,
        cols = grid.ncols,
        "loaded grid"
    );
    Ok(grid)
}

pub(crate) fn open_delimited(path: &Path, format: InputFormat) -> Result<Box<dyn Read>> {
    let file = File::open(path)?;
    let gzip = matches!(format, InputFormat::Csv { gzip: true } | InputFormat::Tsv { gzip: true });
    Ok(if gzip {
        Box::new(MultiGzDecoder::new(file))
    } else {
        Box::new(BufReader::new(file))
    })
}

pub(crate) fn delimited_reader<R: Read>(reader: R, delimiter: u8) -> csv::Reader<R> {
    ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(reader)
}

/// Header record on row 0, one typed cell per field for every data row.
pub fn load_delimited<R: Read>(reader: R, delimiter: u8, name: &str) -> Result<Grid> {
    let mut reader = delimited_reader(reader, delimiter);
    let header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if header.is_empty() || header.iter().all(|h| h.is_empty()) {
        return Err(GridError::EmptySource(format!("{name}: no header record")));
    }
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(CellValue::infer).collect::<Vec<_>>());
    }
    Ok(Grid::from_rows(name, &header, rows))
}

fn load_workbook(path: &Path, sheet: Option<&str>) -> Result<Grid> {
    let mut workbook = open_workbook_auto(path)?;
    let names = workbook.sheet_names();
    let name = match sheet {
        Some(wanted) => names
            .iter()
            .find(|n| n.as_str() == wanted)
            .cloned()
            .ok_or_else(|| GridError::SheetNotFound(wanted.to_string()))?,
        None => names
            .first()
            .cloned()
            .ok_or_else(|| GridError::EmptySource(format!("{} has no sheets", path.display())))?,
    };
    let range = workbook.worksheet_range(&name)?;
    let (row0, col0) = range
        .start()
        .map(|(r, c)| (r as usize, c as usize))
        .unwrap_or((0, 0));
    let nrows = if range.is_empty() { 0 } else { row0 + range.height() };
    let ncols = if range.is_empty() { 0 } else { col0 + range.width() };
    let mut grid = Grid::new(name, nrows, ncols);

    let header_row = range
        .rows()
        .position(|row| row.iter().any(|v| !matches!(v, Data::Empty)))
        .map(|i| row0 + i);
    for (i, row) in range.rows().enumerate() {
        for (j, value) in row.iter().enumerate() {
            let (r, c) = (row0 + i, col0 + j);
            let cell = Cell::new(r, c, workbook_value(value));
            grid.push(if Some(r) == header_row {
                cell.with_fmt("header")
            } else {
                cell
            });
        }
    }
    grid.merged_regions = merged_regions(&mut workbook, &grid.name)?;
    Ok(grid)
}

/// Merged ranges of sheet `name`. Only the xlsx and xls readers expose them.
fn merged_regions(
    workbook: &mut Sheets<BufReader<File>>,
    name: &str,
) -> Result<Vec<MergedRegion>> {
    let dims = match workbook {
        Sheets::Xlsx(xlsx) => xlsx
            .worksheet_merge_cells(name)
            .transpose()
            .map_err(calamine::Error::from)?,
        Sheets::Xls(xls) => xls.worksheet_merge_cells(name),
        _ => None,
    };
    Ok(dims.unwrap_or_default().iter().map(merged_region).collect())
}

fn merged_region(dims: &Dimensions) -> MergedRegion {
    MergedRegion {
        first_row: dims.start.0 as usize,
        first_col: dims.start.1 as usize,
        last_row: dims.end.0 as usize,
        last_col: dims.end.1 as usize,
    }
}

fn workbook_value(value: &Data) -> CellValue {
    match value {
        Data::Empty => CellValue::Empty,
        Data::Bool(v) => CellValue::Bool(*v),
        Data::Int(v) => CellValue::Int(*v),
        Data::Float(v) => CellValue::Float(*v),
        Data::String(v) => CellValue::Text(v.clone()),
        Data::DateTime(v) => CellValue::Float(v.as_f64()),
        Data::DateTimeIso(v) | Data::DurationIso(v) => CellValue::Text(v.clone()),
        Data::Error(e) => CellValue::Text(format!("#{e:?}")),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::tempdir;

    use super::*;
    use crate::model::DType;

    const SHEET_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
<sheetData>
<row r="1"><c r="A1" t="inlineStr"><is><t>Item</t></is></c><c r="B1" t="inlineStr"><is><t>Amount</t></is></c></row>
<row r="2"><c r="A2" t="inlineStr"><is><t>Rent</t></is></c><c r="B2"><v>1200</v></c></row>
<row r="3"><c r="A3" t="inlineStr"><is><t>Total</t></is></c></row>
</sheetData>
<mergeCells count="1"><mergeCell ref="A3:B3"/></mergeCells>
</worksheet>"#;

    fn write_xlsx(path: &Path) {
        let parts = [
            (
                "xl/workbook.xml",
                r#"<?xml version="1.0" encoding="UTF-8"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
<sheets><sheet name="Budget" sheetId="1" r:id="rId1"/></sheets>
</workbook>"#,
            ),
            (
                "xl/_rels/workbook.xml.rels",
                r#"<?xml version="1.0" encoding="UTF-8"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/>
</Relationships>"#,
            ),
            ("xl/worksheets/sheet1.xml", SHEET_XML),
        ];
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        for (name, xml) in parts {
            zip.start_file(name, options).unwrap();
            zip.write_all(xml.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn detects_formats() {
        assert_eq!(
            InputFormat::detect(Path::new("a/b.CSV")).unwrap(),
            InputFormat::Csv { gzip: false }
        );
        assert_eq!(
            InputFormat::detect(Path::new("b.tsv.gz")).unwrap(),
            InputFormat::Tsv { gzip: true }
        );
        assert_eq!(
            InputFormat::detect(Path::new("b.xlsx")).unwrap(),
            InputFormat::Workbook
        );
        assert!(matches!(
            InputFormat::detect(Path::new("notes.txt")),
            Err(GridError::UnsupportedInput(_))
        ));
    }

    #[test]
    fn loads_csv_with_header_row() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sales.csv");
        std::fs::write(&path, "region,units,active\nEast,12,true\nWest,,false\n").unwrap();
        let grid = load_grid(&path, None).unwrap();
        assert_eq!(grid.name, "sales");
        assert_eq!((grid.nrows, grid.ncols), (3, 3));
        assert_eq!(grid.cells[0].fmt.as_deref(), Some("header"));
        assert_eq!(grid.cells[4].value, CellValue::Int(12));
        assert_eq!(grid.cells[5].dtype, DType::Bool);
        assert_eq!(grid.cells[7].value, CellValue::Empty);
    }

    #[test]
    fn loads_gzipped_tsv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.tsv.gz");
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        writeln!(encoder, "name\tvalue").unwrap();
        writeln!(encoder, "beta\t2.5").unwrap();
        encoder.finish().unwrap();
        let grid = load_grid(&path, Some("metrics")).unwrap();
        assert_eq!(grid.name, "metrics");
        assert_eq!(grid.cells[3].value, CellValue::Float(2.5));
    }

    #[test]
    fn loads_xlsx_merged_regions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("budget.xlsx");
        write_xlsx(&path);
        let grid = load_grid(&path, None).unwrap();
        assert_eq!(grid.name, "Budget");
        assert_eq!((grid.nrows, grid.ncols), (3, 2));
        assert_eq!(
            grid.merged_regions,
            vec![MergedRegion {
                first_row: 2,
                first_col: 0,
                last_row: 2,
                last_col: 1,
            }]
        );
        assert_eq!(grid.frozen, None);
        assert!(matches!(
            load_grid(&path, Some("Summary")),
            Err(GridError::SheetNotFound(_))
        ));
    }

    #[test]
    fn merged_region_keeps_absolute_coordinates() {
        let region = merged_region(&Dimensions::new((4, 1), (6, 3)));
        assert_eq!(
            region,
            MergedRegion {
                first_row: 4,
                first_col: 1,
                last_row: 6,
                last_col: 3,
            }
        );
    }

    #[test]
    fn missing_file_is_reported() {
        let err = load_grid(Path::new("/definitely/not/here.csv"), None).unwrap_err();
        assert!(matches!(err, GridError::InputNotFound(_)));
    }

    #[test]
    fn empty_csv_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        std::fs::write(&path, "").unwrap();
        assert!(matches!(
            load_grid(&path, None),
            Err(GridError::EmptySource(_))
        ));
    }
}
