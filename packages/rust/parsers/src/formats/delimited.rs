//! Delimited text (CSV / TSV / PSV) parser.

use sheetloader_shared::{
    Cell, RawBuffer, Result, RowCapture, SheetCapture, SheetloaderError, WorkbookCapture,
};
use tracing::{debug, warn};

use super::{DEFAULT_SHEET_NAME, FormatParser, decode_utf8, dedupe_labels};

/// Parses character-delimited text. The first non-blank record is the header row.
#[derive(Debug, Clone)]
pub struct DelimitedParser {
    format: &'static str,
    delimiter: u8,
}

impl DelimitedParser {
    pub const fn csv() -> Self {
        Self {
            format: "csv",
            delimiter: b',',
        }
    }

    pub const fn tsv() -> Self {
        Self {
            format: "tsv",
            delimiter: b'\t',
        }
    }

    pub const fn psv() -> Self {
        Self {
            format: "psv",
            delimiter: b'|',
        }
    }
}

impl FormatParser for DelimitedParser {
    fn format(&self) -> &str {
        self.format
    }

    fn parse(&self, buffer: &RawBuffer) -> Result<WorkbookCapture> {
        let text = decode_utf8(self.format, buffer)?;
        let mut capture = WorkbookCapture::new();
        if text.trim().is_empty() {
            return Ok(capture);
        }

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(false)
            .flexible(true)
            .from_reader(text.as_bytes());

        let mut headers: Option<Vec<String>> = None;
        let mut data = Vec::new();
        let mut dropped_cells = 0usize;

        for (i, record) in reader.records().enumerate() {
            let record = record.map_err(|e| {
                SheetloaderError::parse(self.format, format!("record {}: {e}", i + 1))
            })?;

            if record.iter().all(|field| field.trim().is_empty()) {
                continue;
            }

            let Some(headers) = headers.as_ref() else {
                headers = Some(dedupe_labels(record.iter()));
                continue;
            };

            if record.len() > headers.len() {
                dropped_cells += record.len() - headers.len();
            }

            let row: RowCapture = headers
                .iter()
                .zip(record.iter())
                .filter(|(_, field)| !field.is_empty())
                .map(|(header, field)| (header.clone(), Cell::new(field)))
                .collect();

            data.push(row);
        }

        if dropped_cells > 0 {
            warn!(
                format = self.format,
                dropped_cells, "cells beyond the header row were dropped"
            );
        }

        let Some(headers) = headers else {
            return Ok(capture);
        };

        debug!(
            format = self.format,
            columns = headers.len(),
            rows = data.len(),
            "parsed delimited sheet"
        );

        capture.insert(DEFAULT_SHEET_NAME, SheetCapture { headers, data })?;
        Ok(capture)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheetloader_shared::CellValue;

    fn parse_csv(text: &str) -> WorkbookCapture {
        DelimitedParser::csv()
            .parse(&RawBuffer::from(text))
            .expect("parse csv")
    }

    #[test]
    fn header_row_and_values() {
        let capture = parse_csv("First Name,Email\nTony,me@opbaj.tp\nJane,jane@example.com\n");
        let sheet = capture.get("Sheet1").expect("sheet");

        assert_eq!(sheet.headers, vec!["First Name", "Email"]);
        assert_eq!(sheet.data.len(), 2);
        assert_eq!(
            sheet.data[0]["First Name"].value,
            CellValue::Text("Tony".into())
        );
        assert_eq!(
            sheet.data[1]["Email"].value,
            CellValue::Text("jane@example.com".into())
        );
    }

    #[test]
    fn blank_rows_are_skipped_and_empty_cells_omitted() {
        let capture = parse_csv("\n,,\na,b,c\n1,,3\n,,\n4,5,6\n");
        let sheet = capture.get("Sheet1").unwrap();

        assert_eq!(sheet.headers, vec!["a", "b", "c"]);
        assert_eq!(sheet.data.len(), 2);
        assert!(!sheet.data[0].contains_key("b"));
        assert_eq!(sheet.data[1].len(), 3);
    }

    #[test]
    fn ragged_rows_keep_headers_intact() {
        let capture = parse_csv("a,b\n1\n2,3,4,5\n");
        let sheet = capture.get("Sheet1").unwrap();

        assert_eq!(sheet.headers, vec!["a", "b"]);
        assert_eq!(sheet.data[0].len(), 1);
        assert_eq!(sheet.data[1].len(), 2);
        for row in &sheet.data {
            assert!(row.keys().all(|k| sheet.headers.contains(k)));
        }
    }

    #[test]
    fn duplicate_headers_are_disambiguated() {
        let capture = parse_csv("Amount ($),Amount ($),\n10,20,x\n");
        let sheet = capture.get("Sheet1").unwrap();
        assert_eq!(sheet.headers, vec!["Amount ($)", "Amount ($)_1", "empty"]);
        assert_eq!(
            sheet.data[0]["Amount ($)_1"].value,
            CellValue::Text("20".into())
        );
    }

    #[test]
    fn quoted_fields() {
        let capture = parse_csv("name,notes\n\"Lamb, Tony\",\"said \"\"hi\"\"\"\n");
        let sheet = capture.get("Sheet1").unwrap();
        assert_eq!(
            sheet.data[0]["name"].value,
            CellValue::Text("Lamb, Tony".into())
        );
        assert_eq!(
            sheet.data[0]["notes"].value,
            CellValue::Text("said \"hi\"".into())
        );
    }

    #[test]
    fn tsv_uses_tabs() {
        let capture = DelimitedParser::tsv()
            .parse(&RawBuffer::from("a\tb\n1\t2\n"))
            .unwrap();
        assert_eq!(capture.get("Sheet1").unwrap().headers, vec!["a", "b"]);
    }

    #[test]
    fn empty_file_is_empty_capture() {
        assert!(parse_csv("").is_empty());
        assert!(parse_csv("  \n\n").is_empty());
    }

    #[test]
    fn header_only_file_has_no_rows() {
        let capture = parse_csv("a,b,c\n");
        let sheet = capture.get("Sheet1").unwrap();
        assert_eq!(sheet.headers.len(), 3);
        assert!(sheet.data.is_empty());
    }
}
