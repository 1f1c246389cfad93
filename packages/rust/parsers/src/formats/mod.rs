//! Format parser capability and the extension-matched parser registry.
//!
//! Each supported file format is an independent [`FormatParser`]. The
//! [`ParserRegistry`] maps file extensions to parsers; entries are tried in
//! order and the first match wins.

mod delimited;
mod json;
mod markdown;

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use sheetloader_shared::{RawBuffer, Result, SheetloaderError, WorkbookCapture};

pub use delimited::DelimitedParser;
pub use json::{JsonLinesParser, JsonParser};
pub use markdown::MarkdownTableParser;

/// Sheet name used by formats that carry a single table.
pub const DEFAULT_SHEET_NAME: &str = "Sheet1";

static JSON_LINES_EXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(jsonl|ndjson)$").expect("valid regex"));

static MARKDOWN_EXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(md|markdown)$").expect("valid regex"));

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Turns raw bytes into a [`WorkbookCapture`].
///
/// Implementations fail with a parse error on unrecoverable input, drop
/// recoverable oddities (blank rows, stray cells), and return an empty
/// capture for structurally empty files.
pub trait FormatParser: Send + Sync {
    /// Short format name used in errors and tracing.
    fn format(&self) -> &str;

    /// Parse the full buffer.
    fn parse(&self, buffer: &RawBuffer) -> Result<WorkbookCapture>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// How a registry entry matches a file extension.
#[derive(Debug, Clone)]
pub enum ExtensionMatch {
    /// Case-insensitive exact extension (without the dot).
    Exact(String),
    /// Regex tested against the lower-cased extension.
    Pattern(Regex),
}

impl ExtensionMatch {
    pub fn exact(ext: impl Into<String>) -> Self {
        Self::Exact(ext.into().trim_start_matches('.').to_lowercase())
    }

    pub fn pattern(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(Self::Pattern)
            .map_err(|e| SheetloaderError::config(format!("invalid extension pattern: {e}")))
    }

    fn matches(&self, ext: &str) -> bool {
        match self {
            Self::Exact(expected) => expected == ext,
            Self::Pattern(re) => re.is_match(ext),
        }
    }

    /// Human-readable form for listings.
    pub fn describe(&self) -> String {
        match self {
            Self::Exact(ext) => format!(".{ext}"),
            Self::Pattern(re) => format!("/{}/", re.as_str()),
        }
    }
}

/// Holds registered parsers in priority order.
pub struct ParserRegistry {
    entries: Vec<(ExtensionMatch, Box<dyn FormatParser>)>,
}

impl ParserRegistry {
    /// Create a registry with all built-in parsers.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(ExtensionMatch::exact("csv"), DelimitedParser::csv());
        registry.register(ExtensionMatch::exact("tsv"), DelimitedParser::tsv());
        registry.register(ExtensionMatch::exact("psv"), DelimitedParser::psv());
        registry.register(ExtensionMatch::exact("json"), JsonParser);
        registry.register(
            ExtensionMatch::Pattern(JSON_LINES_EXT.clone()),
            JsonLinesParser,
        );
        registry.register(
            ExtensionMatch::Pattern(MARKDOWN_EXT.clone()),
            MarkdownTableParser,
        );
        registry
    }

    /// Create a registry with no parsers.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Append a parser (lowest priority so far).
    pub fn register(&mut self, matcher: ExtensionMatch, parser: impl FormatParser + 'static) {
        self.entries.push((matcher, Box::new(parser)));
    }

    /// Insert a parser ahead of every existing entry.
    pub fn register_first(
        &mut self,
        matcher: ExtensionMatch,
        parser: impl FormatParser + 'static,
    ) {
        self.entries.insert(0, (matcher, Box::new(parser)));
    }

    /// Find the parser for a file extension.
    pub fn resolve(&self, ext: &str) -> Result<&dyn FormatParser> {
        let ext = ext.trim_start_matches('.').to_lowercase();
        self.entries
            .iter()
            .find(|(matcher, _)| matcher.matches(&ext))
            .map(|(_, parser)| parser.as_ref())
            .ok_or_else(|| {
                SheetloaderError::parse(
                    if ext.is_empty() { "unknown" } else { ext.as_str() },
                    "no parser registered for this file extension",
                )
            })
    }

    /// `(matcher, format)` pairs in priority order.
    pub fn describe(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|(matcher, parser)| (matcher.describe(), parser.format().to_string()))
            .collect()
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Helpers shared by the built-in formats
// ---------------------------------------------------------------------------

/// Decode a buffer as UTF-8, dropping a leading byte-order mark.
pub(crate) fn decode_utf8<'a>(format: &str, buffer: &'a RawBuffer) -> Result<&'a str> {
    let text = std::str::from_utf8(buffer.as_bytes())
        .map_err(|e| SheetloaderError::parse(format, format!("input is not valid UTF-8: {e}")))?;
    Ok(text.strip_prefix('\u{feff}').unwrap_or(text))
}

/// Make positional header labels unique.
///
/// Blank labels become `empty`; repeats get `_1`, `_2`, … in first-seen order.
pub(crate) fn dedupe_labels<I, S>(labels: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut used: HashSet<String> = HashSet::new();
    let mut out = Vec::new();

    for label in labels {
        let label = label.as_ref().trim();
        let base = if label.is_empty() { "empty" } else { label };

        let mut candidate = base.to_string();
        let mut n = 1;
        while used.contains(&candidate) {
            candidate = format!("{base}_{n}");
            n += 1;
        }
        used.insert(candidate.clone());
        out.push(candidate);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedupe_labels_blank_and_repeats() {
        let labels = dedupe_labels(["", "Amount ($)", " ", "Amount ($)", "", "id"]);
        assert_eq!(
            labels,
            vec!["empty", "Amount ($)", "empty_1", "Amount ($)_1", "empty_2", "id"]
        );
    }

    #[test]
    fn decode_strips_bom() {
        let buffer = RawBuffer::from("\u{feff}a,b");
        assert_eq!(decode_utf8("csv", &buffer).unwrap(), "a,b");
    }

    #[test]
    fn decode_rejects_invalid_utf8() {
        let buffer = RawBuffer::new(vec![0xff, 0xfe, 0x00]);
        let err = decode_utf8("csv", &buffer).unwrap_err();
        assert!(err.to_string().contains("not valid UTF-8"));
    }
}
