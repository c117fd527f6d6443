use std::sync::{Arc, LazyLock};

use chrono::NaiveDateTime;
use nfe_core::error::AppError;
use nfe_core::models::{FieldValue, SnapshotResult, StatusCode, StatusRow};
use nfe_core::normalize::normalize_key;
use nfe_core::reference::ReferenceData;
use nfe_core::traits::SnapshotParser;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

/// Header labels of which at least one must be present.
pub const EXPECTED_HEADERS: &[&str] = &["Autorizador", "Status"];

/// Error message of the snapshot produced when validation fails.
pub const INVALID_TABLE_MESSAGE: &str = "Invalid table structure";

static TIMESTAMP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Última Verificação:\s*(\d{2}/\d{2}/\d{4} \d{2}:\d{2}:\d{2})").unwrap()
});

static TR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr").unwrap());
static TH: LazyLock<Selector> = LazyLock::new(|| Selector::parse("th").unwrap());
static TD: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td").unwrap());
static IMG: LazyLock<Selector> = LazyLock::new(|| Selector::parse("img").unwrap());
static CAPTION: LazyLock<Selector> = LazyLock::new(|| Selector::parse("caption").unwrap());

/// Extracts the availability table from the NF-e status page and enriches
/// every row with [`ReferenceData`].
#[derive(Clone)]
pub struct TableParser {
    reference: Arc<ReferenceData>,
    table_id: String,
}

impl TableParser {
    pub fn new(reference: Arc<ReferenceData>, table_id: impl Into<String>) -> Self {
        Self {
            reference,
            table_id: table_id.into(),
        }
    }

    fn table_selector(&self) -> Result<Selector, AppError> {
        Selector::parse(&format!(r#"table[id="{}"]"#, self.table_id))
            .map_err(|e| AppError::ParseError(format!("Invalid table id '{}': {e}", self.table_id)))
    }
}

impl SnapshotParser for TableParser {
    fn parse(&self, html: &str) -> SnapshotResult {
        tracing::info!("Starting HTML parsing and enrichment");

        let selector = match self.table_selector() {
            Ok(sel) => sel,
            Err(e) => {
                tracing::error!(error = %e, "Failed to parse HTML");
                return SnapshotResult::failed(e.to_string());
            }
        };

        let doc = Html::parse_document(html);
        let table = doc.select(&selector).next();
        let Some(table) = table.filter(|t| validate_table(Some(*t))) else {
            if table.is_none() {
                tracing::error!(table_id = %self.table_id, "Table not found in HTML");
            }
            return SnapshotResult::failed(INVALID_TABLE_MESSAGE);
        };

        let checked_at = parse_timestamp(table.select(&CAPTION).next());
        let mut rows = extract_rows(table, &self.reference);
        for row in &mut rows {
            self.reference.enrich(row);
        }

        tracing::info!(rows = rows.len(), "Successfully parsed rows");
        SnapshotResult::succeeded(checked_at, rows)
    }
}

/// Collapse an element's text the way the page renders it: each text node
/// trimmed, empty ones dropped, the rest concatenated.
fn stripped_text(element: ElementRef<'_>) -> String {
    element.text().map(str::trim).collect()
}

fn header_texts(table: ElementRef<'_>) -> Option<Vec<String>> {
    let header_row = table.select(&TR).next()?;
    Some(header_row.select(&TH).map(stripped_text).collect())
}

/// Check that `table` looks like the availability table.
///
/// Requires a header row with at least two `<th>` cells, one of which is
/// an [`EXPECTED_HEADERS`] label. Failures are logged.
pub fn validate_table(table: Option<ElementRef<'_>>) -> bool {
    let Some(table) = table else {
        tracing::error!("Table not found in HTML");
        return false;
    };
    let Some(headers) = header_texts(table) else {
        tracing::error!("Table headers not found");
        return false;
    };
    if headers.len() < 2 {
        tracing::error!(columns = headers.len(), "Table has insufficient columns");
        return false;
    }
    if !EXPECTED_HEADERS
        .iter()
        .any(|expected| headers.iter().any(|h| h == expected))
    {
        tracing::error!(found = ?headers, "Expected headers not found");
        return false;
    }
    true
}

/// Parse the `Última Verificação: DD/MM/YYYY HH:MM:SS` stamp out of the
/// table caption. Absent or malformed stamps yield `None`.
pub fn parse_timestamp(caption: Option<ElementRef<'_>>) -> Option<NaiveDateTime> {
    let Some(caption) = caption else {
        tracing::warn!("No caption found for timestamp extraction");
        return None;
    };

    let text = caption.text().collect::<Vec<_>>().join(" ");
    parse_timestamp_text(&text)
}

/// Text-level half of [`parse_timestamp`].
pub fn parse_timestamp_text(text: &str) -> Option<NaiveDateTime> {
    let Some(captures) = TIMESTAMP_RE.captures(text) else {
        tracing::warn!(caption = %text.trim(), "Timestamp pattern not found in caption");
        return None;
    };

    let raw = &captures[1];
    match NaiveDateTime::parse_from_str(raw, "%d/%m/%Y %H:%M:%S") {
        Ok(ts) => {
            tracing::info!(%ts, "Parsed timestamp");
            Some(ts)
        }
        Err(e) => {
            tracing::error!(raw, error = %e, "Failed to parse timestamp");
            None
        }
    }
}

/// Extract every data row of `table` (header row excluded).
///
/// Rows whose cell count does not match the header count, or that fail to
/// parse, are logged and skipped.
pub fn extract_rows(table: ElementRef<'_>, reference: &ReferenceData) -> Vec<StatusRow> {
    let Some(labels) = header_texts(table) else {
        return Vec::new();
    };
    let keys: Vec<String> = labels.iter().map(|h| normalize_key(h)).collect();
    tracing::info!(headers = ?labels, "Found headers");

    let mut rows = Vec::new();
    for (idx, tr) in table.select(&TR).skip(1).enumerate() {
        let row_no = idx + 1;
        let cells: Vec<ElementRef<'_>> = tr.select(&TD).collect();
        if cells.len() != keys.len() {
            tracing::warn!(
                row = row_no,
                expected = keys.len(),
                got = cells.len(),
                "Cell count mismatch, skipping row"
            );
            continue;
        }

        match parse_row(&keys, &cells, reference) {
            Ok(row) => rows.push(row),
            Err(e) => {
                tracing::error!(row = row_no, error = %e, "Error parsing row");
            }
        }
    }
    rows
}

fn parse_row(
    keys: &[String],
    cells: &[ElementRef<'_>],
    reference: &ReferenceData,
) -> Result<StatusRow, AppError> {
    let mut row = StatusRow::new();
    for (key, cell) in keys.iter().zip(cells) {
        let value = match cell.select(&IMG).next() {
            Some(img) => {
                let src = img.value().attr("src").ok_or_else(|| {
                    AppError::ParseError(format!("Status image in column '{key}' has no src"))
                })?;
                FieldValue::from(status_from_src(src, reference))
            }
            None => {
                let text = stripped_text(*cell);
                if text.is_empty() {
                    FieldValue::Null
                } else {
                    FieldValue::Text(text)
                }
            }
        };
        row.insert(key.as_str(), value);
    }
    Ok(row)
}

fn status_from_src(src: &str, reference: &ReferenceData) -> StatusCode {
    let filename = src.rsplit('/').next().unwrap_or(src);
    reference.status_for_image(filename).unwrap_or_else(|| {
        tracing::warn!(filename, "Unknown image filename");
        StatusCode::Desconhecido
    })
}
