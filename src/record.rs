//! Normalised receipt data produced for each successfully processed document.

use serde::{Deserialize, Serialize};

/// The ten top-level scalar fields, in spreadsheet column order.
pub const RECORD_FIELDS: [&str; 10] = [
    "store_name",
    "address",
    "phone",
    "date_time",
    "cashier",
    "discount",
    "total_amount",
    "final_total",
    "payment",
    "change",
];

/// One purchased line on a receipt.
///
/// Values are kept as the text the model produced (currency literals and
/// number formatting untouched).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub name: Option<String>,
    pub quantity: Option<String>,
    pub unit_price: Option<String>,
    pub total_price: Option<String>,
}

/// Structured fields extracted from one receipt or invoice.
///
/// Fields absent from the model response stay `None`; nothing is carried
/// over from other documents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredRecord {
    pub store_name: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub date_time: Option<String>,
    pub cashier: Option<String>,
    pub discount: Option<String>,
    pub total_amount: Option<String>,
    pub final_total: Option<String>,
    pub payment: Option<String>,
    pub change: Option<String>,
    pub items: Vec<LineItem>,
}

impl StructuredRecord {
    /// Look up a scalar field by its JSON key.
    pub fn field(&self, key: &str) -> Option<&str> {
        let value = match key {
            "store_name" => &self.store_name,
            "address" => &self.address,
            "phone" => &self.phone,
            "date_time" => &self.date_time,
            "cashier" => &self.cashier,
            "discount" => &self.discount,
            "total_amount" => &self.total_amount,
            "final_total" => &self.final_total,
            "payment" => &self.payment,
            "change" => &self.change,
            _ => return None,
        };
        value.as_deref()
    }

    /// Mutable slot for a scalar field by its JSON key.
    pub(crate) fn field_mut(&mut self, key: &str) -> Option<&mut Option<String>> {
        match key {
            "store_name" => Some(&mut self.store_name),
            "address" => Some(&mut self.address),
            "phone" => Some(&mut self.phone),
            "date_time" => Some(&mut self.date_time),
            "cashier" => Some(&mut self.cashier),
            "discount" => Some(&mut self.discount),
            "total_amount" => Some(&mut self.total_amount),
            "final_total" => Some(&mut self.final_total),
            "payment" => Some(&mut self.payment),
            "change" => Some(&mut self.change),
            _ => None,
        }
    }
}
