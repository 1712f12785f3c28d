//! Response normalisation: model text → [`StructuredRecord`].
//!
//! Models are told to answer with bare JSON and often wrap it in a
//! ` ```json ` fence anyway. [`strip_fencing`] removes that wrapping;
//! [`parse`] then accepts only a JSON object of the expected shape and
//! reports anything else as a [`ParseFailure`] carrying the raw text.

use crate::error::{ParseFailure, ParseFailureReason};
use crate::record::{LineItem, StructuredRecord, RECORD_FIELDS};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::value::RawValue;
use serde_json::Value;
use std::collections::HashMap;

/// A JSON object whose values are kept as their source text.
type RawObject<'a> = HashMap<String, &'a RawValue>;

static RE_OPENING_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\A```[ \t]*(?:json)?[ \t]*\r?\n?").unwrap());

static RE_CLOSING_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\r?\n?```\z").unwrap());

/// Remove leading/trailing Markdown code-fence markers (with an optional
/// `json` tag) and surrounding whitespace. Interior content is untouched.
///
/// Idempotent: `strip_fencing(strip_fencing(s)) == strip_fencing(s)`.
pub fn strip_fencing(raw: &str) -> String {
    let mut current = raw.trim().to_string();
    loop {
        let opened = RE_OPENING_FENCE.replace(&current, "");
        let closed = RE_CLOSING_FENCE.replace(&opened, "");
        let next = closed.trim().to_string();
        if next == current {
            return next;
        }
        current = next;
    }
}

/// Parse fence-stripped model output into a record.
///
/// * Missing keys and `null` values leave the field empty.
/// * JSON numbers and booleans are kept as their literal text.
/// * A top-level array/scalar, a non-list `items`, or an object/array in a
///   scalar field is a [`ParseFailure`]; no coercion is guessed.
pub fn parse(stripped: &str) -> Result<StructuredRecord, ParseFailure> {
    let fail = |reason| ParseFailure::new(reason, stripped);

    let value: Value = serde_json::from_str(stripped)
        .map_err(|e| fail(ParseFailureReason::InvalidJson(e.to_string())))?;
    if !value.is_object() {
        return Err(fail(ParseFailureReason::NotAnObject));
    }
    let object: RawObject = serde_json::from_str(stripped)
        .map_err(|e| fail(ParseFailureReason::InvalidJson(e.to_string())))?;

    let mut record = StructuredRecord::default();
    for key in RECORD_FIELDS {
        let text = scalar_text(&object, key).map_err(fail)?;
        if let Some(slot) = record.field_mut(key) {
            *slot = text;
        }
    }

    record.items = match object.get("items").map(|raw| (raw, serde_json::from_str::<Value>(raw.get()))) {
        None | Some((_, Ok(Value::Null))) => Vec::new(),
        Some((raw, Ok(Value::Array(_)))) => serde_json::from_str::<Vec<&RawValue>>(raw.get())
            .map_err(|_| fail(ParseFailureReason::ItemsNotAList))?
            .into_iter()
            .map(|item| parse_item(item).map_err(fail))
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => return Err(fail(ParseFailureReason::ItemsNotAList)),
    };

    Ok(record)
}

/// [`strip_fencing`] followed by [`parse`].
pub fn normalize_response(raw: &str) -> Result<StructuredRecord, ParseFailure> {
    parse(&strip_fencing(raw)).map_err(|mut failure| {
        failure.raw = raw.to_string();
        failure
    })
}

fn parse_item(item: &RawValue) -> Result<LineItem, ParseFailureReason> {
    let object: RawObject = serde_json::from_str(item.get()).map_err(|_| ParseFailureReason::ItemsNotAList)?;
    Ok(LineItem {
        name: scalar_text(&object, "name")?,
        quantity: scalar_text(&object, "quantity")?,
        unit_price: scalar_text(&object, "unit_price")?,
        total_price: scalar_text(&object, "total_price")?,
    })
}

/// Numbers keep their literal text, so `10.00` stays `"10.00"`.
fn scalar_text(object: &RawObject, key: &str) -> Result<Option<String>, ParseFailureReason> {
    let Some(raw) = object.get(key) else {
        return Ok(None);
    };
    match serde_json::from_str::<Value>(raw.get()) {
        Ok(Value::Null) => Ok(None),
        Ok(Value::String(s)) => Ok(Some(s)),
        Ok(Value::Number(_)) => Ok(Some(raw.get().trim().to_string())),
        Ok(Value::Bool(b)) => Ok(Some(b.to_string())),
        Ok(Value::Array(_)) | Ok(Value::Object(_)) | Err(_) => Err(ParseFailureReason::WrongFieldType {
            field: key.to_string(),
        }),
    }
}
