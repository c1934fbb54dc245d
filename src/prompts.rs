//! Prompts sent to the model.
//!
//! Every prompt is built here so the pipelines stay focused on flow control
//! and the wording can be inspected directly in tests. Category lists are
//! always rendered from [`crate::categories`] so prompt and validator can
//! never disagree.

use crate::categories::{EXPENSE_CATEGORIES, INCOME_CATEGORIES};
use crate::output::Receipt;

fn joined(tags: &[&str]) -> String {
    tags.join(", ")
}

/// First-pass receipt prompt, sent alongside the inline image.
pub fn receipt_prompt() -> String {
    format!(
        "You will be given an image (inline). Extract structured receipt data and \
return a single JSON object (no explanatory text) with the following fields:\n\
- merchant (string)\n\
- date (ISO or obvious string)\n\
- items: list of {{name, qty, price, category}}\n\
- total (raw total from receipt if present)\n\
- amount_paid (final numeric amount paid)\n\
- category (choose exactly one from the allowed list)\n\n\
The allowed categories are: {categories}.\n\
For EACH item include a 'category' field whose value is exactly one of the allowed categories.\n\
Also choose the most suitable single overall 'category' for this transaction from the same allowed list.\n\
Respond ONLY with valid JSON. If you return text, ensure it is valid JSON; do not wrap in markdown.",
        categories = joined(&EXPENSE_CATEGORIES)
    )
}

/// Repair prompt: the parsed receipt goes back with a request to fill in
/// missing or invalid categories and change nothing else.
pub fn category_repair_prompt(receipt: &Receipt) -> String {
    let parsed = serde_json::to_string_pretty(&receipt.to_model_json())
        .unwrap_or_else(|_| "{}".to_string());
    format!(
        "You will be given a parsed receipt JSON object. Return a single JSON object \
that is the same receipt but with each item extended to include a 'category' field \
(value must be exactly one of the allowed categories) and with the top-level 'category' \
set to the most appropriate single category (also from the allowed list). \
Only fill in missing or invalid categories; leave every other field unchanged. \
Do NOT include any text outside the JSON.\n\n\
Allowed categories: {categories}\n\n\
Here is the parsed receipt JSON:\n{parsed}\n\n\
Respond only with a valid JSON object. Example output shape:\n\
{{\"merchant\":..., \"items\":[{{\"name\":..., \"qty\":..., \"price\":..., \"category\":\"groceries\"}}], \"category\":\"groceries\"}}",
        categories = joined(&EXPENSE_CATEGORIES)
    )
}

/// Text-only statement prompt. `statement_text` must already be cut to budget.
pub fn statement_text_prompt(statement_text: &str) -> String {
    format!(
        r#"You will be given a bank statement or transaction history PDF text. Extract structured transaction data and return a single JSON object with the following format:

{{
  "accountNumber": "string (account number if visible)",
  "period": "string (statement period like 'January 2024')",
  "openingBalance": "number (opening balance if visible)",
  "closingBalance": "number (closing balance if visible)",
  "transactions": [
    {{
      "date": "YYYY-MM-DD format",
      "description": "transaction description",
      "debit": "number (if expense/withdrawal)",
      "credit": "number (if income/deposit)",
      "amount": "number (absolute amount)",
      "balance": "number (running balance if visible)",
      "category": "suggested category from allowed lists",
      "confidence": "high/medium/low"
    }}
  ]
}}

INCOME CATEGORIES: {income}
EXPENSE CATEGORIES: {expense}

Instructions:
1. Extract ALL transactions from the statement
2. For each transaction, determine if it's income (credit) or expense (debit)
3. Suggest appropriate category from the allowed lists
4. Include running balance if visible in the statement
5. Use ISO date format (YYYY-MM-DD)
6. Return ONLY valid JSON, no additional text

Statement text:
{statement_text}
"#,
        income = joined(&INCOME_CATEGORIES),
        expense = joined(&EXPENSE_CATEGORIES),
    )
}

/// Statement prompt sent with the rendered first page. `context` is a short
/// prefix of the extracted text (may be empty for image inputs).
pub fn statement_image_prompt(context: &str) -> String {
    format!(
        r#"Analyze this bank statement image and extract transaction data. Return a JSON object with this structure:

{{
  "accountNumber": "account number",
  "period": "statement period",
  "openingBalance": number,
  "closingBalance": number,
  "transactions": [
    {{
      "date": "YYYY-MM-DD",
      "description": "description",
      "debit": number_or_null,
      "credit": number_or_null,
      "amount": number,
      "balance": number,
      "category": "suggested_category",
      "confidence": "high/medium/low"
    }}
  ]
}}

INCOME CATEGORIES: {income}
EXPENSE CATEGORIES: {expense}

Instructions:
- Extract ALL visible transactions
- Use debit for expenses, credit for income
- Suggest categories from the allowed lists
- Return only valid JSON

Additional text context: {context}
"#,
        income = joined(&INCOME_CATEGORIES),
        expense = joined(&EXPENSE_CATEGORIES),
    )
}

/// First `max_chars` characters of `text` (never splits a code point).
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
