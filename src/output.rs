//! Records produced by the pipelines.
//!
//! Model output is loosely typed: numbers arrive as strings, lists arrive as
//! `null`, categories arrive as whatever the model felt like. The record
//! types deserialize leniently (a field of the wrong shape becomes `None` /
//! empty instead of failing the whole object) and keep every unknown field in
//! `extra` so nothing the model returned is lost on the way to the output.

use crate::error::ExtractError;
use chrono::{DateTime, Local};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

/// How the final categories of a receipt were resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategorySource {
    /// The first response already carried valid categories.
    Model,
    /// A repair request produced fully valid categories.
    Reprompt,
    /// The client-side merchant rules decided.
    LocalFallback,
}

impl CategorySource {
    pub fn as_str(self) -> &'static str {
        match self {
            CategorySource::Model => "model",
            CategorySource::Reprompt => "reprompt",
            CategorySource::LocalFallback => "local_fallback",
        }
    }
}

/// One receipt line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qty: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Value>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub category: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A parsed receipt, mutated in place while categories are repaired.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub merchant: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, deserialize_with = "lenient_items")]
    pub items: Vec<LineItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_paid: Option<Value>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub category: Option<String>,
    #[serde(default, deserialize_with = "lenient_source", skip_serializing_if = "Option::is_none")]
    pub category_source: Option<CategorySource>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub category_reason: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    /// A non-empty `items` value that was not a list. `items` is empty then.
    #[serde(skip)]
    pub malformed_items: Option<Value>,
}

impl Receipt {
    /// Interpret a JSON object returned by the model.
    pub fn from_object(object: Map<String, Value>) -> Self {
        let malformed_items = object
            .get("items")
            .filter(|v| !v.is_array() && !is_blank(v))
            .cloned();
        // Every field is lenient, so only a non-object could fail here.
        let mut receipt: Receipt =
            serde_json::from_value(Value::Object(object)).unwrap_or_default();
        receipt.malformed_items = malformed_items;
        receipt
    }

    /// The receipt as the model should see it again, with a malformed
    /// `items` value restored.
    pub fn to_model_json(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()));
        if let (Some(raw), Value::Object(map)) = (&self.malformed_items, &mut value) {
            map.insert("items".to_string(), raw.clone());
        }
        value
    }
}

/// `null`, `false`, `0`, `""` and empty containers.
fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

/// Confidence label attached to each statement transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    #[default]
    Medium,
    Low,
}

impl Confidence {
    /// Parse a model-supplied label; anything unrecognised is `Medium`.
    pub fn from_label(value: Option<&Value>) -> Self {
        match value.and_then(Value::as_str).map(|s| s.trim().to_lowercase()) {
            Some(s) if s == "high" => Confidence::High,
            Some(s) if s == "low" => Confidence::Low,
            _ => Confidence::Medium,
        }
    }
}

/// A cleaned statement transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// `YYYY-MM-DD`.
    pub date: String,
    pub description: String,
    pub debit: Option<f64>,
    pub credit: Option<f64>,
    pub amount: f64,
    pub balance: f64,
    pub category: String,
    pub confidence: Confidence,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A statement as returned by the model, before cleaning.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StatementDraft {
    #[serde(rename = "accountNumber", default)]
    pub account_number: Option<Value>,
    #[serde(default)]
    pub period: Option<Value>,
    #[serde(rename = "openingBalance", default)]
    pub opening_balance: Option<Value>,
    #[serde(rename = "closingBalance", default)]
    pub closing_balance: Option<Value>,
    #[serde(default, deserialize_with = "lenient_objects")]
    pub transactions: Vec<Map<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StatementDraft {
    pub fn from_object(object: Map<String, Value>) -> Self {
        serde_json::from_value(Value::Object(object)).unwrap_or_default()
    }
}

/// Metadata attached to every cleaned statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingInfo {
    pub method: String,
    /// Characters of text extracted from the input.
    pub text_length: usize,
    pub processed_at: DateTime<Local>,
    pub transaction_count: usize,
}

/// A cleaned statement ready for output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    #[serde(rename = "accountNumber", skip_serializing_if = "Option::is_none")]
    pub account_number: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<Value>,
    #[serde(rename = "openingBalance", skip_serializing_if = "Option::is_none")]
    pub opening_balance: Option<Value>,
    #[serde(rename = "closingBalance", skip_serializing_if = "Option::is_none")]
    pub closing_balance: Option<Value>,
    pub transactions: Vec<Transaction>,
    pub processing_info: ProcessingInfo,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An explicit failure object (`{"error": ...}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
}

impl ErrorReport {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            raw_text: None,
        }
    }
}

/// Final result of the receipt pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReceiptOutput {
    /// Parsed and categorised.
    Categorized(Receipt),
    /// The model answered, but not with JSON.
    RawText { raw_text: String },
    /// The API produced nothing; text from the local OCR engine.
    Ocr { ocr_text: String },
    Failed(ErrorReport),
}

impl ReceiptOutput {
    /// Short description of how the run resolved.
    pub fn resolution(&self) -> &str {
        match self {
            ReceiptOutput::Categorized(r) => r
                .category_source
                .map(CategorySource::as_str)
                .unwrap_or("model"),
            ReceiptOutput::RawText { .. } => "raw_text",
            ReceiptOutput::Ocr { .. } => "local_ocr",
            ReceiptOutput::Failed(_) => "error",
        }
    }
}

/// Final result of the statement pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatementOutput {
    Extracted(Statement),
    Failed(ErrorReport),
}

impl StatementOutput {
    pub fn resolution(&self) -> &str {
        match self {
            StatementOutput::Extracted(_) => "extracted",
            StatementOutput::Failed(_) => "error",
        }
    }
}

/// Pretty-printed JSON, exactly as printed to stdout.
pub fn to_pretty_json<T: Serialize>(value: &T) -> Result<String, ExtractError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| ExtractError::Internal(format!("JSON serialisation failed: {e}")))
}

/// Write `value` as pretty JSON to `path`.
///
/// Atomic write: the JSON goes to `<path>.tmp` first and is then renamed.
pub async fn write_json<T: Serialize>(
    value: &T,
    path: impl AsRef<Path>,
) -> Result<(), ExtractError> {
    let path = path.as_ref();
    let json = to_pretty_json(value)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ExtractError::OutputWriteFailed {
                path: path.to_path_buf(),
                source: e,
            })?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = std::path::PathBuf::from(tmp_name);
    tokio::fs::write(&tmp_path, json)
        .await
        .map_err(|e| ExtractError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| ExtractError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })
}

// ── Lenient field deserializers ──────────────────────────────────────────────

/// Strings pass through, numbers and booleans are stringified, anything else is `None`.
fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}

fn lenient_source<'de, D: Deserializer<'de>>(d: D) -> Result<Option<CategorySource>, D::Error> {
    Ok(serde_json::from_value(Value::deserialize(d)?).ok())
}

/// Arrays keep their object elements; any other shape is an empty list.
fn lenient_objects<'de, D: Deserializer<'de>>(
    d: D,
) -> Result<Vec<Map<String, Value>>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Array(values) => values
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    })
}

fn lenient_items<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<LineItem>, D::Error> {
    Ok(lenient_objects(d)?
        .into_iter()
        .map(|map| serde_json::from_value(Value::Object(map)).unwrap_or_default())
        .collect())
}
