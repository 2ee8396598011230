//! Delimited-text uploads
//!
//! Columns are matched by header name. Unknown columns are ignored and
//! missing columns leave the corresponding measurement absent.

use crate::errors::TabularError;
use crate::features::{
    column_index, integral_catalog_id, CatalogId, FeatureRecord, CATALOG_ID_COLUMN,
};
use csv::{ReaderBuilder, StringRecord, Trim};

/// Content types accepted when an upload carries no filename.
pub const TABULAR_CONTENT_TYPES: [&str; 2] = ["text/csv", "application/csv"];

/// Cell spellings read as "no value".
const MISSING_TOKENS: [&str; 7] = ["", "NaN", "nan", "NA", "N/A", "null", "None"];

/// Whether an upload declares itself as CSV.
///
/// The filename wins when present; the content type is consulted only for
/// anonymous uploads.
pub fn is_tabular(filename: Option<&str>, content_type: Option<&str>) -> bool {
    match filename {
        Some(name) => name
            .rsplit_once('.')
            .map(|(_, ext)| ext.eq_ignore_ascii_case("csv"))
            .unwrap_or(false),
        None => content_type
            .map(|ct| {
                let essence = ct.split(';').next().unwrap_or("").trim();
                TABULAR_CONTENT_TYPES
                    .iter()
                    .any(|accepted| essence.eq_ignore_ascii_case(accepted))
            })
            .unwrap_or(false),
    }
}

#[derive(Debug, Clone, Copy)]
enum Column {
    Feature(usize),
    CatalogId,
    Ignored,
}

/// Parse a CSV document into feature records.
pub fn parse_records(bytes: &[u8]) -> Result<Vec<FeatureRecord>, TabularError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .comment(Some(b'#'))
        .trim(Trim::All)
        .from_reader(bytes);

    let headers = reader
        .headers()
        .map_err(|err| TabularError::MalformedRow {
            row: 0,
            reason: err.to_string(),
        })?
        .clone();

    if headers.is_empty() || headers.iter().all(str::is_empty) {
        return Err(TabularError::MissingHeader);
    }

    let columns: Vec<Column> = headers
        .iter()
        .map(|name| {
            if name == CATALOG_ID_COLUMN {
                Column::CatalogId
            } else {
                column_index(name).map_or(Column::Ignored, Column::Feature)
            }
        })
        .collect();

    let mut records = Vec::new();
    for (index, row) in reader.records().enumerate() {
        let row_number = index + 1;
        let row = row.map_err(|err| TabularError::MalformedRow {
            row: row_number,
            reason: err.to_string(),
        })?;
        records.push(parse_row(&headers, &columns, &row, row_number)?);
    }

    Ok(records)
}

fn parse_row(
    headers: &StringRecord,
    columns: &[Column],
    row: &StringRecord,
    row_number: usize,
) -> Result<FeatureRecord, TabularError> {
    let mut record = FeatureRecord::default();

    for (position, (column, cell)) in columns.iter().zip(row.iter()).enumerate() {
        match column {
            Column::Ignored => {}
            Column::Feature(index) => {
                let value = parse_measurement(cell)
                    .ok_or_else(|| invalid(headers, position, cell, row_number))?;
                if let Some(slot) = record.slot_mut(*index) {
                    *slot = value;
                }
            }
            Column::CatalogId => {
                record.kepid = parse_catalog_id(cell)
                    .ok_or_else(|| invalid(headers, position, cell, row_number))?;
            }
        }
    }

    Ok(record)
}

fn invalid(headers: &StringRecord, position: usize, cell: &str, row: usize) -> TabularError {
    TabularError::InvalidNumber {
        row,
        column: headers.get(position).unwrap_or_default().to_string(),
        value: cell.to_string(),
    }
}

/// Read one measurement cell: `Some(None)` when the cell is a missing
/// marker, `None` when it is not a number at all.
pub fn parse_measurement(cell: &str) -> Option<Option<f64>> {
    if MISSING_TOKENS.contains(&cell) {
        return Some(None);
    }
    let value: f64 = cell.parse().ok()?;
    Some(if value.is_nan() { None } else { Some(value) })
}

/// Integer IDs, also accepting integral floats such as `10797460.0`.
fn parse_catalog_id(cell: &str) -> Option<Option<CatalogId>> {
    if MISSING_TOKENS.contains(&cell) {
        return Some(None);
    }
    if let Ok(id) = cell.parse::<CatalogId>() {
        return Some(Some(id));
    }
    let value: f64 = cell.parse().ok()?;
    if value.is_nan() {
        return Some(None);
    }
    integral_catalog_id(value).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_prefers_filename() {
        assert!(is_tabular(Some("koi.csv"), None));
        assert!(is_tabular(Some("KOI.CSV"), Some("application/octet-stream")));
        assert!(!is_tabular(Some("koi.xlsx"), Some("text/csv")));
        assert!(!is_tabular(Some("csv"), None));
        assert!(is_tabular(None, Some("text/csv; charset=utf-8")));
        assert!(!is_tabular(None, Some("application/json")));
        assert!(!is_tabular(None, None));
    }

    #[test]
    fn columns_are_matched_by_name() {
        let text = "dec,kepid,koi_disposition,koi_period\n48.1,10797460,CONFIRMED,9.5\n";
        let records = parse_records(text.as_bytes()).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kepid, Some(10797460));
        assert_eq!(records[0].koi_period, Some(9.5));
        assert_eq!(records[0].dec, Some(48.1));
        assert_eq!(records[0].present_count(), 2);
    }

    #[test]
    fn missing_tokens_are_absent() {
        let text = "kepid,koi_period,koi_depth,koi_steff\n,NaN,,N/A\n10797460.0,1.5,null,5800\n";
        let records = parse_records(text.as_bytes()).unwrap();

        assert_eq!(records[0], FeatureRecord::default());
        assert_eq!(records[1].kepid, Some(10797460));
        assert_eq!(records[1].koi_depth, None);
        assert_eq!(records[1].koi_steff, Some(5800.0));
    }

    #[test]
    fn comment_lines_are_skipped() {
        let text = "# NASA Exoplanet Archive\n# exported\nkoi_period\n# mid-file note\n3.0\n";
        let records = parse_records(text.as_bytes()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].koi_period, Some(3.0));
    }

    #[test]
    fn header_only_yields_no_rows() {
        assert!(parse_records(b"koi_period,koi_depth\n").unwrap().is_empty());
    }

    #[test]
    fn empty_blob_has_no_header() {
        assert_eq!(parse_records(b"").unwrap_err(), TabularError::MissingHeader);
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let err = parse_records(b"koi_period,koi_depth\n1.0\n").unwrap_err();
        assert!(matches!(err, TabularError::MalformedRow { row: 1, .. }));
    }

    #[test]
    fn text_in_numeric_column_is_rejected() {
        let err = parse_records(b"koi_period\nlong\n").unwrap_err();
        assert_eq!(
            err,
            TabularError::InvalidNumber {
                row: 1,
                column: "koi_period".into(),
                value: "long".into()
            }
        );
    }

    #[test]
    fn fractional_catalog_id_is_rejected() {
        assert!(parse_records(b"kepid\n12.5\n").is_err());
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        assert!(parse_records(b"koi_period\n\xff\xfe\n").is_err());
    }
}
