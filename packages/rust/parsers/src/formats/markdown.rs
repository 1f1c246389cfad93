//! Markdown pipe-table parser.
//!
//! Every GitHub-style table (header row, `---` separator row, body rows)
//! becomes its own sheet, named `Table_1`, `Table_2`, … in document order.
//! Text outside tables is ignored.

use std::sync::LazyLock;

use regex::Regex;
use sheetloader_shared::{Cell, RawBuffer, Result, RowCapture, SheetCapture, WorkbookCapture};
use tracing::debug;

use super::{FormatParser, decode_utf8, dedupe_labels};

/// Matches a separator row such as `| --- | :---: |` or `---|---`.
static SEPARATOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\|?\s*:?-+:?\s*(\|\s*:?-+:?\s*)*\|?$").expect("separator regex")
});

/// Stand-in for escaped pipes while splitting cells.
const ESCAPED_PIPE: &str = "\u{0}";

#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownTableParser;

impl FormatParser for MarkdownTableParser {
    fn format(&self) -> &str {
        "markdown"
    }

    fn parse(&self, buffer: &RawBuffer) -> Result<WorkbookCapture> {
        let text = decode_utf8(self.format(), buffer)?;
        let lines: Vec<&str> = text.lines().map(str::trim).collect();
        let mut capture = WorkbookCapture::new();

        let mut i = 0;
        while i + 1 < lines.len() {
            if !is_table_start(lines[i], lines[i + 1]) {
                i += 1;
                continue;
            }

            let headers = dedupe_labels(split_row(lines[i]));
            let mut data = Vec::new();
            i += 2;

            while i < lines.len() && !lines[i].is_empty() && lines[i].contains('|') {
                let row: RowCapture = headers
                    .iter()
                    .zip(split_row(lines[i]))
                    .filter(|(_, cell)| !cell.is_empty())
                    .map(|(header, cell)| (header.clone(), Cell::new(cell)))
                    .collect();
                if !row.is_empty() {
                    data.push(row);
                }
                i += 1;
            }

            let name = format!("Table_{}", capture.len() + 1);
            debug!(sheet = %name, columns = headers.len(), rows = data.len(), "parsed table");
            capture.insert(name, SheetCapture { headers, data })?;
        }

        Ok(capture)
    }
}

/// A header row followed by a piped separator with the same number of cells.
/// A bare `---` under prose is a thematic break or setext underline.
fn is_table_start(header: &str, separator: &str) -> bool {
    header.contains('|')
        && separator.contains('|')
        && SEPARATOR_RE.is_match(separator)
        && split_row(header).len() == split_row(separator).len()
}

/// Split a table row into trimmed cells, honoring `\|` escapes.
fn split_row(line: &str) -> Vec<String> {
    let line = line.replace("\\|", ESCAPED_PIPE);
    let line = line.trim();
    let line = line.strip_prefix('|').unwrap_or(line);
    let line = line.strip_suffix('|').unwrap_or(line);

    line.split('|')
        .map(|cell| cell.trim().replace(ESCAPED_PIPE, "|"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheetloader_shared::CellValue;

    fn parse(text: &str) -> WorkbookCapture {
        MarkdownTableParser
            .parse(&RawBuffer::from(text))
            .expect("parse markdown")
    }

    #[test]
    fn single_table() {
        let capture = parse(
            "# Contacts\n\nSome intro.\n\n| Name | Email |\n|------|:-----:|\n| Tony | me@opbaj.tp |\n| Jane |  |\n",
        );
        let sheet = capture.get("Table_1").unwrap();
        assert_eq!(sheet.headers, vec!["Name", "Email"]);
        assert_eq!(sheet.data.len(), 2);
        assert_eq!(sheet.data[0]["Email"].value, CellValue::Text("me@opbaj.tp".into()));
        assert!(!sheet.data[1].contains_key("Email"));
    }

    #[test]
    fn multiple_tables_in_order() {
        let capture = parse("a | b\n--|--\n1 | 2\n\ntext\n\n| c |\n| --- |\n| 3 |\n");
        let names: Vec<&str> = capture.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["Table_1", "Table_2"]);
        assert_eq!(capture.get("Table_2").unwrap().headers, vec!["c"]);
    }

    #[test]
    fn escaped_pipes_stay_in_cell() {
        let capture = parse("| expr |\n| --- |\n| a \\| b |\n");
        let sheet = capture.get("Table_1").unwrap();
        assert_eq!(sheet.data[0]["expr"].value, CellValue::Text("a | b".into()));
    }

    #[test]
    fn pipes_without_separator_are_not_tables() {
        assert!(parse("this | is | prose\nand more prose\n").is_empty());
        assert!(parse("").is_empty());
    }

    #[test]
    fn prose_above_a_rule_is_not_a_table() {
        assert!(parse("either this | or that\n---\n\nmore text\n").is_empty());
        assert!(parse("Title | subtitle\n------\n").is_empty());
    }

    #[test]
    fn separator_must_match_header_width() {
        assert!(parse("| a | b | c |\n| --- | --- |\n| 1 | 2 | 3 |\n").is_empty());
        assert_eq!(parse("a|b\n-|-\n1|2\n").len(), 1);
    }

    #[test]
    fn separator_regex() {
        assert!(SEPARATOR_RE.is_match("|---|---|"));
        assert!(SEPARATOR_RE.is_match("| :--- | ---: |"));
        assert!(SEPARATOR_RE.is_match("---|---"));
        assert!(!SEPARATOR_RE.is_match("| a | b |"));
    }
}
