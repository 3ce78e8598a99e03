//! Uniform output rendering: JSON, table, and Markdown, plus an NDJSON
//! streaming mode for incremental consumers.
//!
//! JSON is the compiled default and stays minified unless pretty output is
//! requested. `ASC_DEFAULT_OUTPUT` overrides the compiled default; an
//! explicit `--output` flag beats both.

use crate::constants;
use crate::error::Error;
use clap::ValueEnum;
use indexmap::IndexSet;
use serde_json::Value;
use std::io::Write;
use tabled::builder::Builder;
use tabled::settings::Style;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Output as JSON (default)
    Json,
    /// Output as a formatted table
    Table,
    /// Output as a GitHub-flavored Markdown table
    Markdown,
}

impl OutputFormat {
    fn parse_env(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "json" => Some(Self::Json),
            "table" => Some(Self::Table),
            "markdown" | "md" => Some(Self::Markdown),
            _ => None,
        }
    }
}

/// The effective format: explicit flag > `ASC_DEFAULT_OUTPUT` > JSON.
#[must_use]
pub fn resolve_format(explicit: Option<OutputFormat>) -> OutputFormat {
    if let Some(format) = explicit {
        return format;
    }
    std::env::var(constants::ENV_DEFAULT_OUTPUT)
        .ok()
        .and_then(|v| OutputFormat::parse_env(&v))
        .unwrap_or(OutputFormat::Json)
}

/// Renders values in one format.
#[derive(Debug, Clone, Copy)]
pub struct Renderer {
    format: OutputFormat,
    pretty: bool,
}

impl Renderer {
    #[must_use]
    pub const fn new(format: OutputFormat, pretty: bool) -> Self {
        Self { format, pretty }
    }

    /// Render to a string.
    ///
    /// # Errors
    ///
    /// Returns a JSON error when serialization fails.
    pub fn render(&self, value: &Value) -> Result<String, Error> {
        match self.format {
            OutputFormat::Json => {
                if self.pretty {
                    Ok(serde_json::to_string_pretty(value)?)
                } else {
                    Ok(serde_json::to_string(value)?)
                }
            }
            OutputFormat::Table => Ok(render_table(value)),
            OutputFormat::Markdown => Ok(render_markdown(value)),
        }
    }

    /// Render to stdout.
    ///
    /// # Errors
    ///
    /// Returns a JSON error when serialization fails.
    pub fn print(&self, value: &Value) -> Result<(), Error> {
        println!("{}", self.render(value)?);
        Ok(())
    }
}

/// One JSON object per line, flushed between lines, for consumers that read
/// output incrementally.
#[derive(Debug)]
pub struct NdjsonWriter<W: Write> {
    writer: W,
}

impl<W: Write> NdjsonWriter<W> {
    pub const fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Emit one value as a single minified line and flush.
    ///
    /// # Errors
    ///
    /// Returns an error when serialization or the write fails.
    pub fn emit(&mut self, value: &Value) -> Result<(), Error> {
        serde_json::to_writer(&mut self.writer, value)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Rows-and-columns view of a value: arrays of objects become one row per
/// element; a single object becomes a field/value listing.
fn tabulate(value: &Value) -> (Vec<String>, Vec<Vec<String>>) {
    match value {
        Value::Array(items) if items.iter().all(Value::is_object) && !items.is_empty() => {
            let mut columns: IndexSet<String> = IndexSet::new();
            for item in items {
                if let Value::Object(map) = item {
                    for key in map.keys() {
                        columns.insert(key.clone());
                    }
                }
            }
            let header: Vec<String> = columns.iter().cloned().collect();
            let rows = items
                .iter()
                .map(|item| {
                    header
                        .iter()
                        .map(|key| cell_text(item.get(key).unwrap_or(&Value::Null)))
                        .collect()
                })
                .collect();
            (header, rows)
        }
        Value::Object(map) => {
            let rows = map
                .iter()
                .map(|(key, val)| vec![key.clone(), cell_text(val)])
                .collect();
            (vec!["field".to_string(), "value".to_string()], rows)
        }
        other => (
            vec!["value".to_string()],
            vec![vec![cell_text(other)]],
        ),
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn render_table(value: &Value) -> String {
    let (header, rows) = tabulate(value);

    let mut builder = Builder::default();
    builder.push_record(header);
    for row in rows {
        // Cell newlines would break row alignment
        builder.push_record(row.iter().map(|cell| cell.replace('\n', " ")));
    }

    let mut table = builder.build();
    table.with(Style::sharp());
    table.to_string()
}

fn render_markdown(value: &Value) -> String {
    let (header, rows) = tabulate(value);

    let mut out = String::new();
    out.push_str(&markdown_row(&header));
    out.push('\n');
    out.push_str(&format!("|{}|", " --- |".repeat(header.len())));
    for row in rows {
        out.push('\n');
        out.push_str(&markdown_row(&row));
    }
    out
}

fn markdown_row(cells: &[String]) -> String {
    let escaped: Vec<String> = cells.iter().map(|cell| markdown_escape(cell)).collect();
    format!("| {} |", escaped.join(" | "))
}

fn markdown_escape(cell: &str) -> String {
    cell.replace('|', "\\|").replace('\n', "\\n")
}
