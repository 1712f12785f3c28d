//! Prompt template for receipt field extraction.
//!
//! The prompt is the only contract we have with the model: it names the ten
//! top-level fields and the item shape the normaliser expects. Keep the field
//! list here in sync with [`crate::record::RECORD_FIELDS`].
//!
//! Callers can override the template via
//! [`crate::config::IntakeConfig::prompt_template`]; the override must
//! contain [`RECEIPT_TEXT_PLACEHOLDER`].

/// Marker replaced with the OCR text.
pub const RECEIPT_TEXT_PLACEHOLDER: &str = "{receipt_text}";

/// Default extraction prompt.
pub const RECEIPT_PROMPT_TEMPLATE: &str = r#"Extract important details from the receipt, correct any spelling errors, and return a properly formatted JSON object.

### Requirements:
- Correct spelling mistakes in names, addresses, and other details.
- Ensure the output contains these fields:
  - "store_name": Store name
  - "address": Store address
  - "phone": Contact number
  - "date_time": Date and time of the transaction
  - "cashier": Cashier's name
  - "items": A list of purchased items with:
    - "name": Item name (correct spelling if needed)
    - "quantity": Quantity purchased
    - "unit_price": Price per unit
    - "total_price": Total price for item
  - "discount": Any discount applied
  - "total_amount": Total amount before rounding
  - "final_total": Final payable amount after rounding
  - "payment": Amount paid
  - "change": Change returned

### Instructions:
- Fix typos and spacing issues in store names, addresses, and product descriptions.
- Keep dates and numbers formatted correctly.
- Preserve currency symbols (e.g. RM, $) and numerical values exactly as extracted.
- Return only valid JSON with no extra text, explanations, or formatting.

### Extracted Receipt Text:
{receipt_text}

Output: Return only a valid JSON object."#;

/// Join OCR lines with newlines and substitute them into `template`.
pub fn build_prompt<S: AsRef<str>>(lines: &[S], template: &str) -> String {
    let text = lines
        .iter()
        .map(|l| l.as_ref())
        .collect::<Vec<_>>()
        .join("\n");
    template.replace(RECEIPT_TEXT_PLACEHOLDER, &text)
}
