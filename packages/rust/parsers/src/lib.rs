//! Format parsers and the extension-matched parser registry.
//!
//! This crate provides:
//! - [`FormatParser`]: the single parse capability every format implements
//! - [`ParserRegistry`]: ordered extension → parser table (first match wins)
//! - Built-in formats: delimited text, JSON / JSON Lines, Markdown tables

pub mod formats;

pub use formats::{
    DEFAULT_SHEET_NAME, DelimitedParser, ExtensionMatch, FormatParser, JsonLinesParser,
    JsonParser, MarkdownTableParser, ParserRegistry,
};

#[cfg(test)]
mod tests {
    use super::*;
    use sheetloader_shared::{CellValue, RawBuffer, Result, SheetloaderError, WorkbookCapture};

    fn load_fixture(name: &str) -> RawBuffer {
        let path = format!("../../../fixtures/data/{name}");
        let content =
            std::fs::read(&path).unwrap_or_else(|_| panic!("missing fixture: {path}"));
        RawBuffer::new(content)
    }

    // -----------------------------------------------------------------------
    // Registry resolution tests
    // -----------------------------------------------------------------------

    #[test]
    fn resolve_exact_extensions() {
        let registry = ParserRegistry::new();
        assert_eq!(registry.resolve("csv").unwrap().format(), "csv");
        assert_eq!(registry.resolve("TSV").unwrap().format(), "tsv");
        assert_eq!(registry.resolve(".json").unwrap().format(), "json");
    }

    #[test]
    fn resolve_pattern_extensions() {
        let registry = ParserRegistry::new();
        assert_eq!(registry.resolve("ndjson").unwrap().format(), "jsonl");
        assert_eq!(registry.resolve("markdown").unwrap().format(), "markdown");
        assert_eq!(registry.resolve("md").unwrap().format(), "markdown");
    }

    #[test]
    fn resolve_unknown_extension() {
        let registry = ParserRegistry::new();
        let err = registry.resolve("xlsx").map(|p| p.format().to_string()).unwrap_err();
        assert!(matches!(err, SheetloaderError::Parse { ref format, .. } if format == "xlsx"));

        let err = registry.resolve("").map(|_| ()).unwrap_err();
        assert!(err.to_string().contains("unknown"));
    }

    struct UpperCsv;

    impl FormatParser for UpperCsv {
        fn format(&self) -> &str {
            "upper-csv"
        }

        fn parse(&self, _buffer: &RawBuffer) -> Result<WorkbookCapture> {
            Ok(WorkbookCapture::new())
        }
    }

    #[test]
    fn first_match_wins() {
        let mut registry = ParserRegistry::new();
        registry.register(ExtensionMatch::exact("csv"), UpperCsv);
        assert_eq!(registry.resolve("csv").unwrap().format(), "csv");

        registry.register_first(ExtensionMatch::pattern(r"^c.v$").unwrap(), UpperCsv);
        assert_eq!(registry.resolve("csv").unwrap().format(), "upper-csv");
        assert_eq!(registry.resolve("json").unwrap().format(), "json");
    }

    #[test]
    fn invalid_pattern_is_config_error() {
        let err = ExtensionMatch::pattern("(").unwrap_err();
        assert!(matches!(err, SheetloaderError::Config { .. }));
    }

    #[test]
    fn describe_lists_in_priority_order() {
        let registry = ParserRegistry::new();
        let listing = registry.describe();
        assert_eq!(listing[0], (".csv".to_string(), "csv".to_string()));
        assert!(listing.iter().any(|(m, f)| m == "/^(md|markdown)$/" && f == "markdown"));
    }

    // -----------------------------------------------------------------------
    // Fixture parsing tests
    // -----------------------------------------------------------------------

    #[test]
    fn contacts_json_fixture() {
        let registry = ParserRegistry::new();
        let capture = registry
            .resolve("json")
            .unwrap()
            .parse(&load_fixture("contacts.json"))
            .unwrap();

        assert_eq!(capture.len(), 1);
        let sheet = capture.get(DEFAULT_SHEET_NAME).unwrap();
        assert_eq!(sheet.headers, vec!["First Name", "Last Name", "Email"]);
        assert_eq!(sheet.data.len(), 2);
        assert_eq!(
            sheet.data[0]["First Name"].value,
            CellValue::Text("Tony".into())
        );
        assert_eq!(
            sheet.data[0]["Last Name"].value,
            CellValue::Text("Lamb".into())
        );
        assert_eq!(
            sheet.data[0]["Email"].value,
            CellValue::Text("me@opbaj.tp".into())
        );
    }

    #[test]
    fn amounts_csv_fixture() {
        let registry = ParserRegistry::new();
        let capture = registry
            .resolve("csv")
            .unwrap()
            .parse(&load_fixture("amounts.csv"))
            .unwrap();

        let sheet = capture.get(DEFAULT_SHEET_NAME).unwrap();
        assert_eq!(
            sheet.headers,
            vec!["Invoice", "Amount ($)", "Amount ($)_1", "Paid?"]
        );
        assert_eq!(sheet.data.len(), 3);
        assert!(!sheet.data[1].contains_key("Amount ($)_1"));
    }

    #[test]
    fn inventory_markdown_fixture() {
        let registry = ParserRegistry::new();
        let capture = registry
            .resolve("md")
            .unwrap()
            .parse(&load_fixture("inventory.md"))
            .unwrap();

        assert_eq!(capture.len(), 2);
        let stock = capture.get("Table_1").unwrap();
        assert_eq!(stock.headers, vec!["SKU", "Description", "Qty"]);
        assert_eq!(stock.data[0]["Description"].value, CellValue::Text("Bolts, 10mm".into()));
        assert_eq!(capture.get("Table_2").unwrap().data.len(), 1);
    }
}
