//! JSON and JSON Lines parsers.
//!
//! Nested objects are flattened with `.`-joined keys; arrays are kept as JSON
//! text. Headers are the union of keys in first-seen order.

use std::collections::HashSet;

use serde_json::{Map, Number, Value};
use sheetloader_shared::{
    Cell, CellValue, RawBuffer, Result, RowCapture, SheetCapture, SheetloaderError,
    WorkbookCapture,
};
use tracing::debug;

use super::{DEFAULT_SHEET_NAME, FormatParser, decode_utf8};

/// Largest integer an `f64` holds exactly (2^53 - 1).
const MAX_EXACT_INTEGER: u64 = (1 << 53) - 1;

/// Parses a JSON document.
///
/// - `[{...}, {...}]` → one sheet
/// - `{"Contacts": [{...}], "Orders": [{...}]}` → one sheet per key
/// - `{...}` (any other object) → one sheet with a single row
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonParser;

impl FormatParser for JsonParser {
    fn format(&self) -> &str {
        "json"
    }

    fn parse(&self, buffer: &RawBuffer) -> Result<WorkbookCapture> {
        let text = decode_utf8(self.format(), buffer)?;
        let mut capture = WorkbookCapture::new();
        if text.trim().is_empty() {
            return Ok(capture);
        }

        let value: Value = serde_json::from_str(text)
            .map_err(|e| SheetloaderError::parse(self.format(), e.to_string()))?;

        match value {
            Value::Array(items) => {
                if !items.is_empty() {
                    let sheet = sheet_from_items(self.format(), DEFAULT_SHEET_NAME, items)?;
                    capture.insert(DEFAULT_SHEET_NAME, sheet)?;
                }
            }
            Value::Object(map) if !map.is_empty() && map.values().all(Value::is_array) => {
                for (name, items) in map {
                    let Value::Array(items) = items else {
                        continue;
                    };
                    if items.is_empty() {
                        debug!(sheet = %name, "skipping empty sheet");
                        continue;
                    }
                    let sheet = sheet_from_items(self.format(), &name, items)?;
                    capture.insert(name, sheet)?;
                }
            }
            Value::Object(map) => {
                if !map.is_empty() {
                    let mut builder = SheetBuilder::default();
                    builder
                        .push_object(map)
                        .map_err(|key| key_collision(self.format(), &key, "the object"))?;
                    capture.insert(DEFAULT_SHEET_NAME, builder.finish())?;
                }
            }
            other => {
                return Err(SheetloaderError::parse(
                    self.format(),
                    format!(
                        "expected an array or object at the top level, found {}",
                        kind_of(&other)
                    ),
                ));
            }
        }

        Ok(capture)
    }
}

/// Parses newline-delimited JSON objects into a single sheet.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLinesParser;

impl FormatParser for JsonLinesParser {
    fn format(&self) -> &str {
        "jsonl"
    }

    fn parse(&self, buffer: &RawBuffer) -> Result<WorkbookCapture> {
        let text = decode_utf8(self.format(), buffer)?;
        let mut builder = SheetBuilder::default();

        for (i, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(line).map_err(|e| {
                SheetloaderError::parse(self.format(), format!("line {}: {e}", i + 1))
            })?;
            match value {
                Value::Object(map) => builder.push_object(map).map_err(|key| {
                    key_collision(self.format(), &key, &format!("line {}", i + 1))
                })?,
                other => {
                    return Err(SheetloaderError::parse(
                        self.format(),
                        format!("line {}: expected an object, found {}", i + 1, kind_of(&other)),
                    ));
                }
            }
        }

        let mut capture = WorkbookCapture::new();
        if !builder.is_empty() {
            capture.insert(DEFAULT_SHEET_NAME, builder.finish())?;
        }
        Ok(capture)
    }
}

fn sheet_from_items(format: &str, sheet: &str, items: Vec<Value>) -> Result<SheetCapture> {
    let mut builder = SheetBuilder::default();
    for (i, item) in items.into_iter().enumerate() {
        match item {
            Value::Object(map) => builder.push_object(map).map_err(|key| {
                key_collision(format, &key, &format!("sheet '{sheet}' element {i}"))
            })?,
            other => {
                return Err(SheetloaderError::parse(
                    format,
                    format!(
                        "sheet '{sheet}' element {i} is {}, expected an object",
                        kind_of(&other)
                    ),
                ));
            }
        }
    }
    Ok(builder.finish())
}

fn key_collision(format: &str, key: &str, at: &str) -> SheetloaderError {
    SheetloaderError::parse(
        format,
        format!("{at}: key '{key}' appears twice once nested objects are flattened"),
    )
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ---------------------------------------------------------------------------
// Sheet builder
// ---------------------------------------------------------------------------

/// Accumulates rows, tracking header order by first appearance.
#[derive(Debug, Default)]
struct SheetBuilder {
    headers: Vec<String>,
    seen: HashSet<String>,
    data: Vec<RowCapture>,
}

impl SheetBuilder {
    /// Adds one row. On a flattened key clash, returns the clashing key and
    /// leaves the builder untouched.
    fn push_object(&mut self, map: Map<String, Value>) -> std::result::Result<(), String> {
        let mut cells = Vec::new();
        flatten("", Value::Object(map), &mut cells);

        let mut row = RowCapture::with_capacity(cells.len());
        let mut order = Vec::with_capacity(cells.len());
        for (key, value) in cells {
            if row.contains_key(&key) {
                return Err(key);
            }
            order.push(key.clone());
            row.insert(key, Cell { value });
        }

        for key in order {
            if !self.seen.contains(&key) {
                self.seen.insert(key.clone());
                self.headers.push(key);
            }
        }
        self.data.push(row);
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn finish(self) -> SheetCapture {
        SheetCapture {
            headers: self.headers,
            data: self.data,
        }
    }
}

fn flatten(prefix: &str, value: Value, out: &mut Vec<(String, CellValue)>) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                let key = if prefix.is_empty() {
                    key
                } else {
                    format!("{prefix}.{key}")
                };
                flatten(&key, nested, out);
            }
        }
        Value::Array(items) => {
            let text = Value::Array(items).to_string();
            out.push((prefix.to_string(), CellValue::Text(text)));
        }
        Value::Null => out.push((prefix.to_string(), CellValue::Null)),
        Value::Bool(b) => out.push((prefix.to_string(), CellValue::Bool(b))),
        Value::Number(n) => out.push((prefix.to_string(), number_cell(&n))),
        Value::String(s) => out.push((prefix.to_string(), CellValue::Text(s))),
    }
}

/// Integers an `f64` cannot hold exactly are kept as their decimal text.
fn number_cell(n: &Number) -> CellValue {
    let exact = match (n.as_u64(), n.as_i64()) {
        (Some(u), _) => u <= MAX_EXACT_INTEGER,
        (None, Some(i)) => i.unsigned_abs() <= MAX_EXACT_INTEGER,
        (None, None) => true,
    };
    match n.as_f64() {
        Some(f) if exact => CellValue::Number(f),
        _ => CellValue::Text(n.to_string()),
    }
}
