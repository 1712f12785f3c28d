//! Row aggregation and spreadsheet export.
//!
//! Each successful [`StructuredRecord`] becomes one flat [`TableRow`]; line
//! items are collapsed into a single display string. Rows keep the order in
//! which they were added, which the pipeline guarantees is submission order.

use crate::error::IntakeError;
use crate::record::{LineItem, StructuredRecord, RECORD_FIELDS};
use rust_xlsxwriter::{Format, Workbook, XlsxError};
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

/// MIME type of the exported workbook.
pub const XLSX_MIME_TYPE: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Worksheet name in the exported workbook.
pub const SHEET_NAME: &str = "Receipts";

/// Header row, in column order: the ten record fields, then the items.
pub const COLUMN_HEADERS: [&str; 11] = [
    "Store Name",
    "Address",
    "Phone",
    "Date/Time",
    "Cashier",
    "Discount",
    "Total Amount",
    "Final Total",
    "Payment",
    "Change",
    "Items",
];

/// Longest string Excel accepts in one cell, in characters.
pub const MAX_CELL_CHARS: usize = 32_767;

const MIN_COLUMN_WIDTH: f64 = 10.0;
const MAX_COLUMN_WIDTH: f64 = 60.0;

/// Display projection of one record. Every cell is plain text; absent
/// values are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableRow {
    pub store_name: String,
    pub address: String,
    pub phone: String,
    pub date_time: String,
    pub cashier: String,
    pub discount: String,
    pub total_amount: String,
    pub final_total: String,
    pub payment: String,
    pub change: String,
    pub items: String,
}

impl TableRow {
    pub fn from_record(record: &StructuredRecord) -> Self {
        let text = |key: &str| record.field(key).unwrap_or_default().to_string();
        Self {
            store_name: text("store_name"),
            address: text("address"),
            phone: text("phone"),
            date_time: text("date_time"),
            cashier: text("cashier"),
            discount: text("discount"),
            total_amount: text("total_amount"),
            final_total: text("final_total"),
            payment: text("payment"),
            change: text("change"),
            items: flatten_items(&record.items),
        }
    }

    /// Cells in [`COLUMN_HEADERS`] order.
    pub fn cells(&self) -> [&str; 11] {
        [
            &self.store_name,
            &self.address,
            &self.phone,
            &self.date_time,
            &self.cashier,
            &self.discount,
            &self.total_amount,
            &self.final_total,
            &self.payment,
            &self.change,
            &self.items,
        ]
    }
}

/// `"<name> (Qty: <q>, Price: <p>, Total: <t>)"` per item, joined with `"; "`.
pub fn flatten_items(items: &[LineItem]) -> String {
    items
        .iter()
        .map(|item| {
            format!(
                "{} (Qty: {}, Price: {}, Total: {})",
                item.name.as_deref().unwrap_or_default(),
                item.quantity.as_deref().unwrap_or_default(),
                item.unit_price.as_deref().unwrap_or_default(),
                item.total_price.as_deref().unwrap_or_default(),
            )
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Ordered collection of table rows for one run.
#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    rows: Vec<TableRow>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the flattened form of `record`.
    pub fn add(&mut self, record: &StructuredRecord) {
        self.rows.push(TableRow::from_record(record));
    }

    pub fn rows(&self) -> &[TableRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Serialise the rows as an xlsx workbook.
    ///
    /// Returns [`IntakeError::NothingToExport`] when no rows were added; the
    /// spreadsheet writer is never invoked in that case.
    pub fn export(&self) -> Result<Vec<u8>, IntakeError> {
        if self.rows.is_empty() {
            return Err(IntakeError::NothingToExport { attempted: 0 });
        }
        self.write_workbook()
            .map_err(|e| IntakeError::ExportFailed(e.to_string()))
    }

    /// Rows as a pretty-printed JSON array.
    pub fn export_json(&self) -> Result<String, IntakeError> {
        if self.rows.is_empty() {
            return Err(IntakeError::NothingToExport { attempted: 0 });
        }
        serde_json::to_string_pretty(&self.rows).map_err(|e| IntakeError::ExportFailed(e.to_string()))
    }

    /// Export and write to `path` atomically (temp file + rename).
    pub async fn export_to_file(&self, path: impl AsRef<Path>) -> Result<usize, IntakeError> {
        let bytes = self.export()?;
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| IntakeError::OutputWriteFailed {
                    path: path.to_path_buf(),
                    source: e,
                })?;
        }

        let tmp_path = path.with_extension("xlsx.tmp");
        tokio::fs::write(&tmp_path, &bytes)
            .await
            .map_err(|e| IntakeError::OutputWriteFailed {
                path: path.to_path_buf(),
                source: e,
            })?;
        tokio::fs::rename(&tmp_path, path)
            .await
            .map_err(|e| IntakeError::OutputWriteFailed {
                path: path.to_path_buf(),
                source: e,
            })?;

        info!("Wrote {} rows to {}", self.rows.len(), path.display());
        Ok(self.rows.len())
    }

    fn write_workbook(&self) -> Result<Vec<u8>, XlsxError> {
        let mut workbook = Workbook::new();
        let header_format = Format::new().set_bold();
        let wrap_format = Format::new().set_text_wrap();

        let worksheet = workbook.add_worksheet();
        worksheet.set_name(SHEET_NAME)?;

        for (col, header) in COLUMN_HEADERS.iter().enumerate() {
            worksheet.write_string_with_format(0, col as u16, *header, &header_format)?;
        }

        for (idx, row) in self.rows.iter().enumerate() {
            let row_num = (idx + 1) as u32;
            for (col, cell) in row.cells().iter().enumerate() {
                let text = sanitize_cell(cell, row_num, col);
                worksheet.write_string_with_format(row_num, col as u16, text, &wrap_format)?;
            }
        }

        for (col, width) in self.column_widths().into_iter().enumerate() {
            worksheet.set_column_width(col as u16, width)?;
        }
        worksheet.set_freeze_panes(1, 0)?;

        workbook.save_to_buffer()
    }

    fn column_widths(&self) -> Vec<f64> {
        COLUMN_HEADERS
            .iter()
            .enumerate()
            .map(|(col, header)| {
                let longest = self
                    .rows
                    .iter()
                    .map(|r| r.cells()[col].chars().count())
                    .chain(std::iter::once(header.chars().count()))
                    .max()
                    .unwrap_or(0);
                (longest as f64 + 2.0).clamp(MIN_COLUMN_WIDTH, MAX_COLUMN_WIDTH)
            })
            .collect()
    }
}

/// Drop characters that are illegal in sheet XML (control chars other than
/// tab/newline/CR, and U+FFFE/U+FFFF) and cut the text to [`MAX_CELL_CHARS`].
fn sanitize_cell(s: &str, row: u32, col: usize) -> String {
    let clean: String = s
        .chars()
        .filter(|&c| {
            let u = c as u32;
            c == '\t' || c == '\n' || c == '\r' || !(u < 0x20 || u == 0x7F || u == 0xFFFE || u == 0xFFFF)
        })
        .collect();

    let len = clean.chars().count();
    if len <= MAX_CELL_CHARS {
        return clean;
    }
    warn!(
        "Row {} {}: {} characters truncated to {}",
        row, COLUMN_HEADERS[col], len, MAX_CELL_CHARS
    );
    clean.chars().take(MAX_CELL_CHARS).collect()
}

// Header labels must stay aligned with the record field order.
const _: () = assert!(COLUMN_HEADERS.len() == RECORD_FIELDS.len() + 1);
