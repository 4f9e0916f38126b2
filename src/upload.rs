//! Spreadsheet ingestion: Excel workbook and CSV preview and import into Doris tables.

use crate::db::{quote_ident, quote_literal, Database, Row};
use calamine::{open_workbook_auto_from_rs, Data, DataType, Reader};
use chrono::{NaiveDate, NaiveDateTime, Timelike};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::io::Cursor;
use thiserror::Error;

const INSERT_BATCH_SIZE: usize = 500;
const MAX_VARCHAR_BYTES: usize = 65533;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("invalid spreadsheet: {0}")]
    Invalid(String),

    #[error("import failed: {0:#}")]
    Database(anyhow::Error),
}

/// Parsed sheet: header row plus data rows, empty cells as `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ColumnKind {
    BigInt,
    Double,
    Date,
    DateTime,
    Varchar(usize),
    Text,
}

impl ColumnKind {
    pub fn sql_type(&self) -> String {
        match self {
            ColumnKind::BigInt => "BIGINT".into(),
            ColumnKind::Double => "DOUBLE".into(),
            ColumnKind::Date => "DATE".into(),
            ColumnKind::DateTime => "DATETIME".into(),
            ColumnKind::Varchar(n) => format!("VARCHAR({})", n),
            ColumnKind::Text => "STRING".into(),
        }
    }

    /// Doris does not allow floating point or STRING key columns.
    fn can_be_key(&self) -> bool {
        !matches!(self, ColumnKind::Double | ColumnKind::Text)
    }

    fn literal(&self, value: &str) -> String {
        match self {
            ColumnKind::BigInt | ColumnKind::Double => value.trim().to_string(),
            _ => quote_literal(value),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnPreview {
    pub name: String,
    pub inferred_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Preview {
    pub columns: Vec<ColumnPreview>,
    pub rows: Vec<Row>,
    pub total_rows: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub table_name: String,
    /// Source header to target column name.
    pub column_mapping: Option<HashMap<String, String>>,
    pub create_table: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub success: bool,
    pub table: String,
    pub columns: Vec<String>,
    pub rows_imported: usize,
    pub table_created: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetFormat {
    Csv,
    /// xlsx, xlsm, xlsb, xls or ods; the exact format is detected from the bytes.
    Workbook,
}

impl SheetFormat {
    pub fn from_filename(filename: &str) -> Self {
        if filename.to_lowercase().ends_with(".csv") {
            SheetFormat::Csv
        } else {
            SheetFormat::Workbook
        }
    }
}

pub fn read_sheet(filename: &str, content: &[u8]) -> Result<Sheet, UploadError> {
    match SheetFormat::from_filename(filename) {
        SheetFormat::Csv => parse_csv(content),
        SheetFormat::Workbook => parse_workbook(content),
    }
}

/// First worksheet of a workbook; its first row is the header.
pub fn parse_workbook(content: &[u8]) -> Result<Sheet, UploadError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(content.to_vec()))
        .map_err(|e| UploadError::Invalid(format!("could not open workbook: {}", e)))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| UploadError::Invalid("workbook has no sheets".into()))?
        .map_err(|e| UploadError::Invalid(format!("could not read first sheet: {}", e)))?;

    let mut records = range.rows();
    let header = records
        .next()
        .ok_or_else(|| UploadError::Invalid("first sheet is empty".into()))?;
    let headers = normalize_headers(header.iter().map(|c| cell_text(c).unwrap_or_default()).collect());

    let rows = records
        .map(|record| {
            let mut cells: Vec<Option<String>> = record.iter().map(cell_text).collect();
            cells.resize(headers.len(), None);
            cells
        })
        .filter(|cells| cells.iter().any(Option::is_some))
        .collect();

    Ok(Sheet { headers, rows })
}

/// Render a workbook cell the way it would appear in a CSV export.
fn cell_text(cell: &Data) -> Option<String> {
    let text = match cell {
        Data::Empty | Data::Error(_) => return None,
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        // whole numbers are stored as floats
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(_) => match cell.as_datetime() {
            Some(dt) if dt.hour() == 0 && dt.minute() == 0 && dt.second() == 0 => {
                dt.format("%Y-%m-%d").to_string()
            }
            Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => cell.to_string(),
        },
    };
    (!text.is_empty()).then_some(text)
}

/// UTF-8 CSV with an optional BOM. Quoted cells may contain commas and newlines.
pub fn parse_csv(content: &[u8]) -> Result<Sheet, UploadError> {
    let text = std::str::from_utf8(content)
        .map_err(|e| UploadError::Invalid(format!("file is not UTF-8 text: {}", e)))?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let header = reader
        .headers()
        .map_err(|e| UploadError::Invalid(format!("could not read header row: {}", e)))?;
    if header.iter().all(str::is_empty) {
        return Err(UploadError::Invalid("file has no header row".into()));
    }
    let headers = normalize_headers(header.iter().map(str::to_string).collect());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| UploadError::Invalid(e.to_string()))?;
        if record.iter().skip(headers.len()).any(|c| !c.is_empty()) {
            let line = record.position().map(|p| p.line()).unwrap_or_default();
            return Err(UploadError::Invalid(format!(
                "line {} has {} cells but the header has {} columns",
                line,
                record.len(),
                headers.len()
            )));
        }

        let mut cells: Vec<Option<String>> = record
            .iter()
            .take(headers.len())
            .map(|c| (!c.is_empty()).then(|| c.to_string()))
            .collect();
        if cells.iter().all(Option::is_none) {
            continue;
        }
        cells.resize(headers.len(), None);
        rows.push(cells);
    }

    Ok(Sheet { headers, rows })
}

fn normalize_headers(raw: Vec<String>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    raw.into_iter()
        .enumerate()
        .map(|(i, h)| {
            let base = if h.is_empty() { format!("column_{}", i + 1) } else { h };
            let count = seen.entry(base.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                base
            } else {
                format!("{}_{}", base, count)
            }
        })
        .collect()
}

pub fn infer_kind<'a>(values: impl Iterator<Item = Option<&'a str>>) -> ColumnKind {
    let present: Vec<&str> = values.flatten().map(str::trim).collect();
    if present.is_empty() {
        return ColumnKind::Varchar(64);
    }
    if present.iter().all(|v| v.parse::<i64>().is_ok()) {
        return ColumnKind::BigInt;
    }
    if present.iter().all(|v| v.parse::<f64>().map(f64::is_finite).unwrap_or(false)) {
        return ColumnKind::Double;
    }
    if present.iter().all(|v| NaiveDate::parse_from_str(v, "%Y-%m-%d").is_ok()) {
        return ColumnKind::Date;
    }
    if present
        .iter()
        .all(|v| NaiveDateTime::parse_from_str(v, "%Y-%m-%d %H:%M:%S").is_ok())
    {
        return ColumnKind::DateTime;
    }

    let widest = present.iter().map(|v| v.len()).max().unwrap_or(0);
    if widest * 2 > MAX_VARCHAR_BYTES {
        ColumnKind::Text
    } else {
        ColumnKind::Varchar((widest * 2).max(64))
    }
}

impl Sheet {
    pub fn column_kinds(&self) -> Vec<ColumnKind> {
        (0..self.headers.len())
            .map(|i| infer_kind(self.rows.iter().map(|r| r[i].as_deref())))
            .collect()
    }

    fn row_json(&self, row: &[Option<String>]) -> Row {
        self.headers
            .iter()
            .zip(row)
            .map(|(h, v)| (h.clone(), v.clone().map(Value::String).unwrap_or(Value::Null)))
            .collect()
    }
}

pub fn preview(filename: &str, content: &[u8], rows: usize) -> Result<Preview, UploadError> {
    let sheet = read_sheet(filename, content)?;
    let columns = sheet
        .headers
        .iter()
        .zip(sheet.column_kinds())
        .map(|(name, kind)| ColumnPreview {
            name: name.clone(),
            inferred_type: kind.sql_type(),
        })
        .collect();

    Ok(Preview {
        columns,
        rows: sheet.rows.iter().take(rows).map(|r| sheet.row_json(r)).collect(),
        total_rows: sheet.rows.len(),
    })
}

pub fn create_table_sql(table: &str, columns: &[String], kinds: &[ColumnKind]) -> String {
    let defs: Vec<String> = columns
        .iter()
        .zip(kinds)
        .map(|(name, kind)| format!("{} {} NULL", quote_ident(name), kind.sql_type()))
        .collect();

    let key = columns
        .iter()
        .zip(kinds)
        .find(|(_, kind)| kind.can_be_key())
        .map(|(name, _)| format!("\nDUPLICATE KEY({})", quote_ident(name)))
        .unwrap_or_default();

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n  {}\n){}\nDISTRIBUTED BY RANDOM BUCKETS 10\nPROPERTIES (\"replication_num\" = \"1\")",
        quote_ident(table),
        defs.join(",\n  "),
        key
    )
}

pub fn insert_batches(
    table: &str,
    columns: &[String],
    kinds: &[ColumnKind],
    rows: &[Vec<Option<String>>],
) -> Vec<String> {
    let column_list = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");

    rows.chunks(INSERT_BATCH_SIZE)
        .map(|chunk| {
            let values: Vec<String> = chunk
                .iter()
                .map(|row| {
                    let cells: Vec<String> = row
                        .iter()
                        .zip(kinds)
                        .map(|(cell, kind)| match cell {
                            Some(v) => kind.literal(v),
                            None => "NULL".to_string(),
                        })
                        .collect();
                    format!("({})", cells.join(", "))
                })
                .collect();
            format!(
                "INSERT INTO {} ({}) VALUES {}",
                quote_ident(table),
                column_list,
                values.join(", ")
            )
        })
        .collect()
}

pub async fn import(
    db: &dyn Database,
    filename: &str,
    content: &[u8],
    options: &ImportOptions,
) -> Result<ImportSummary, UploadError> {
    if options.table_name.trim().is_empty() {
        return Err(UploadError::Invalid("table_name is required".into()));
    }
    let sheet = read_sheet(filename, content)?;
    let kinds = sheet.column_kinds();

    let columns: Vec<String> = sheet
        .headers
        .iter()
        .map(|h| {
            options
                .column_mapping
                .as_ref()
                .and_then(|m| m.get(h))
                .cloned()
                .unwrap_or_else(|| h.clone())
        })
        .collect();

    if options.create_table {
        let sql = create_table_sql(&options.table_name, &columns, &kinds);
        db.execute_update(&sql).await.map_err(UploadError::Database)?;
    }

    for sql in insert_batches(&options.table_name, &columns, &kinds, &sheet.rows) {
        db.execute_update(&sql).await.map_err(UploadError::Database)?;
    }

    tracing::info!(
        table = %options.table_name,
        rows = sheet.rows.len(),
        "spreadsheet imported"
    );

    Ok(ImportSummary {
        success: true,
        table: options.table_name.clone(),
        columns,
        rows_imported: sheet.rows.len(),
        table_created: options.create_table,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::FakeDatabase;

    const CSV: &str = "\u{feff}id,name,city,score,founded\n\
        1,\"广州科技, 有限公司\",广州市,3.5,2020-01-02\n\
        2,\"He said \"\"hi\"\"\",深圳市,,2021-03-04\n";

    #[test]
    fn parses_quotes_and_bom() {
        let sheet = parse_csv(CSV.as_bytes()).unwrap();
        assert_eq!(sheet.headers, ["id", "name", "city", "score", "founded"]);
        assert_eq!(sheet.rows.len(), 2);
        assert_eq!(sheet.rows[0][1].as_deref(), Some("广州科技, 有限公司"));
        assert_eq!(sheet.rows[1][1].as_deref(), Some("He said \"hi\""));
        assert_eq!(sheet.rows[1][3], None);
    }

    #[test]
    fn short_rows_are_padded_and_headers_deduplicated() {
        let sheet = parse_csv(b"a,a,\n1\n").unwrap();
        assert_eq!(sheet.headers, ["a", "a_2", "column_3"]);
        assert_eq!(sheet.rows[0], vec![Some("1".to_string()), None, None]);
    }

    #[test]
    fn infers_types() {
        let sheet = parse_csv(CSV.as_bytes()).unwrap();
        let kinds = sheet.column_kinds();
        assert_eq!(kinds[0], ColumnKind::BigInt);
        assert!(matches!(kinds[1], ColumnKind::Varchar(_)));
        assert_eq!(kinds[3], ColumnKind::Double);
        assert_eq!(kinds[4], ColumnKind::Date);
        assert_eq!(
            infer_kind(["2022-01-01 10:00:00"].into_iter().map(Some)),
            ColumnKind::DateTime
        );
    }

    #[test]
    fn quoted_newlines_stay_in_one_cell() {
        let sheet = parse_csv(b"id,note\n1,\"line one\nline two\"\n2,b\n").unwrap();
        assert_eq!(sheet.rows.len(), 2);
        assert_eq!(sheet.rows[0][1].as_deref(), Some("line one\nline two"));
        assert_eq!(sheet.rows[1][0].as_deref(), Some("2"));
    }

    #[test]
    fn rows_wider_than_header_are_rejected() {
        let err = parse_csv(b"id,note\n1,a\n2,a,EXTRA\n").unwrap_err();
        assert!(matches!(err, UploadError::Invalid(ref m) if m.contains("line 3")));

        // trailing empty cells are harmless
        let sheet = parse_csv(b"id,note\n1,a,\n").unwrap();
        assert_eq!(sheet.rows[0].len(), 2);
    }

    #[test]
    fn empty_files_are_invalid() {
        assert!(matches!(parse_csv(b"\n\n"), Err(UploadError::Invalid(_))));
        assert!(matches!(parse_csv(b""), Err(UploadError::Invalid(_))));
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(SheetFormat::from_filename("data.CSV"), SheetFormat::Csv);
        assert_eq!(SheetFormat::from_filename("data.xlsx"), SheetFormat::Workbook);
        assert_eq!(SheetFormat::from_filename("data.xls"), SheetFormat::Workbook);
        assert_eq!(read_sheet("data.csv", b"x\n1\n").unwrap().rows.len(), 1);
    }

    #[test]
    fn unreadable_workbook_is_invalid() {
        let err = read_sheet("data.xlsx", b"id,name\n1,a\n").unwrap_err();
        assert!(matches!(err, UploadError::Invalid(ref m) if m.contains("workbook")));
    }

    #[test]
    fn workbook_cells_render_like_csv() {
        assert_eq!(cell_text(&Data::Float(2022.0)).as_deref(), Some("2022"));
        assert_eq!(cell_text(&Data::Float(3.5)).as_deref(), Some("3.5"));
        assert_eq!(cell_text(&Data::Int(-7)).as_deref(), Some("-7"));
        assert_eq!(cell_text(&Data::String(" 广州市 ".into())).as_deref(), Some("广州市"));
        assert_eq!(cell_text(&Data::Bool(true)).as_deref(), Some("true"));
        assert_eq!(cell_text(&Data::String("  ".into())), None);
        assert_eq!(cell_text(&Data::Empty), None);
    }

    #[test]
    fn preview_limits_rows() {
        let preview = preview("orgs.csv", CSV.as_bytes(), 1).unwrap();
        assert_eq!(preview.total_rows, 2);
        assert_eq!(preview.rows.len(), 1);
        assert_eq!(preview.rows[0]["city"], "广州市");
        assert_eq!(preview.columns[0].inferred_type, "BIGINT");
    }

    #[test]
    fn create_table_skips_double_key() {
        let sql = create_table_sql(
            "scores",
            &["score".into(), "id".into()],
            &[ColumnKind::Double, ColumnKind::BigInt],
        );
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS `scores`"));
        assert!(sql.contains("`score` DOUBLE NULL"));
        assert!(sql.contains("DUPLICATE KEY(`id`)"));
    }

    #[tokio::test]
    async fn import_maps_columns_and_inserts() {
        let db = FakeDatabase::new();
        let options = ImportOptions {
            table_name: "institutions".into(),
            column_mapping: Some(HashMap::from([("city".to_string(), "城市".to_string())])),
            create_table: true,
        };

        let summary = import(&db, "orgs.csv", CSV.as_bytes(), &options).await.unwrap();

        assert_eq!(summary.rows_imported, 2);
        assert_eq!(summary.columns[2], "城市");
        let executed = db.executed();
        assert_eq!(executed.len(), 2);
        assert!(executed[0].contains("`城市` VARCHAR"));
        assert!(executed[1].starts_with("INSERT INTO `institutions` (`id`, `name`, `城市`, `score`, `founded`) VALUES"));
        assert!(executed[1].contains("(2, 'He said \"hi\"', '深圳市', NULL, '2021-03-04')"));
    }

    #[tokio::test]
    async fn import_without_create_only_inserts() {
        let db = FakeDatabase::new();
        let options = ImportOptions {
            table_name: "t".into(),
            ..Default::default()
        };
        import(&db, "t.csv", b"x\n1\n2\n", &options).await.unwrap();
        assert_eq!(db.executed(), ["INSERT INTO `t` (`x`) VALUES (1), (2)"]);
    }
}
