//! Statement pipeline: bank statement PDF (or image) → cleaned transactions.
//!
//! The text stage is tried first because it is faster and cheaper. If it fails
//! or finds no transactions, the rendered first page is sent with a short text
//! excerpt as context. Whatever the model returns then goes through
//! [`clean_statement`], which enforces the transaction invariants regardless
//! of what the model actually produced.

use crate::categories::{is_known_category, CategoryKind};
use crate::config::ExtractionConfig;
use crate::error::{ExtractError, StageError};
use crate::output::{
    Confidence, ErrorReport, ProcessingInfo, Statement, StatementDraft, StatementOutput,
    Transaction,
};
use crate::pipeline::encode::{self, EncodedImage};
use crate::pipeline::extract::extract_json_object;
use crate::pipeline::gemini::{call_model, GeminiClient, GenerateRequest, GenerativeModel};
use crate::pipeline::input::{self, ResolvedInput};
use crate::pipeline::render::{self, DocumentRenderer, PdfiumRenderer};
use crate::progress::{Reporter, Stage};
use crate::prompts::{self, truncate_chars};
use chrono::{DateTime, Local, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Value of `processing_info.method`.
pub const PROCESSING_METHOD: &str = "gemini_ai";

/// Date formats tried, in order, when a date is not already ISO.
pub const DATE_FORMATS: [&str; 6] = [
    "%Y-%m-%d",
    "%d/%m/%Y",
    "%m/%d/%Y",
    "%d-%m-%Y",
    "%d-%b-%Y",
    "%b %d, %Y",
];

/// Fields consumed by cleaning; everything else is carried through in `extra`.
const KNOWN_FIELDS: [&str; 8] = [
    "date",
    "description",
    "debit",
    "credit",
    "amount",
    "balance",
    "category",
    "confidence",
];

static RE_ISO_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{4}-\d{2}-\d{2})").unwrap());

// ── Cleaning ─────────────────────────────────────────────────────────────────

/// Normalise a transaction date to `YYYY-MM-DD`, substituting `today` when
/// nothing parses.
pub fn normalize_date(raw: Option<&Value>, today: NaiveDate) -> String {
    let Some(s) = raw.and_then(Value::as_str).map(str::trim) else {
        return today.format("%Y-%m-%d").to_string();
    };

    if let Some(prefix) = RE_ISO_PREFIX.captures(s).and_then(|c| c.get(1)) {
        if NaiveDate::parse_from_str(prefix.as_str(), "%Y-%m-%d").is_ok() {
            return prefix.as_str().to_string();
        }
    }

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .unwrap_or_else(|| {
            debug!("Unparseable date {:?}; using today", s);
            today
        })
        .format("%Y-%m-%d")
        .to_string()
}

/// A numeric field that could not be coerced.
#[derive(Debug, Clone, PartialEq)]
pub struct NotNumeric(pub Value);

/// Coerce a JSON value to `f64`.
///
/// Absent, `null`, `false`, empty strings and empty containers are `Ok(None)`.
/// Numbers and numeric strings (thousands separators allowed) are `Ok(Some)`.
/// Anything else is [`NotNumeric`].
pub fn coerce_f64(value: Option<&Value>) -> Result<Option<f64>, NotNumeric> {
    let Some(value) = value else {
        return Ok(None);
    };
    match value {
        Value::Null | Value::Bool(false) => Ok(None),
        Value::Number(n) => n.as_f64().map(Some).ok_or_else(|| NotNumeric(value.clone())),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(None);
            }
            s.replace(',', "")
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(Some)
                .ok_or_else(|| NotNumeric(value.clone()))
        }
        Value::Array(a) if a.is_empty() => Ok(None),
        Value::Object(o) if o.is_empty() => Ok(None),
        _ => Err(NotNumeric(value.clone())),
    }
}

/// Zero counts as absent for debit, credit and balance.
fn non_zero(value: Option<f64>) -> Option<f64> {
    value.filter(|v| *v != 0.0)
}

/// Clean one raw transaction; `None` means it is dropped.
pub fn clean_transaction(mut raw: Map<String, Value>, today: NaiveDate) -> Option<Transaction> {
    let description = raw
        .get("description")
        .and_then(|d| match d {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .filter(|d| !d.is_empty())?;

    let numbers = (|| -> Result<_, NotNumeric> {
        let debit = non_zero(coerce_f64(raw.get("debit"))?);
        let credit = non_zero(coerce_f64(raw.get("credit"))?);
        let amount = coerce_f64(raw.get("amount"))?;
        let balance = non_zero(coerce_f64(raw.get("balance"))?).unwrap_or(0.0);
        Ok((debit, credit, amount, balance))
    })();
    let (debit, credit, amount, balance) = match numbers {
        Ok(n) => n,
        Err(NotNumeric(v)) => {
            debug!("Dropping transaction {:?}: non-numeric value {}", description, v);
            return None;
        }
    };
    // An explicit `amount: null` or `""` also falls back to debit/credit
    // rather than dropping the row.
    let Some(amount) = amount.or(debit).or(credit) else {
        debug!("Dropping transaction {:?}: no amount", description);
        return None;
    };

    let date = normalize_date(raw.get("date"), today);
    let category = match raw.get("category").and_then(Value::as_str) {
        Some(tag) if is_known_category(Some(tag)) => tag.to_string(),
        _ if credit.is_some_and(|c| c > 0.0) => CategoryKind::Income.fallback().to_string(),
        _ => CategoryKind::Expense.fallback().to_string(),
    };
    let confidence = Confidence::from_label(raw.get("confidence"));

    for field in KNOWN_FIELDS {
        raw.remove(field);
    }

    Some(Transaction {
        date,
        description,
        debit,
        credit,
        amount,
        balance,
        category,
        confidence,
        extra: raw,
    })
}

/// Clean a transaction list, keeping order and dropping invalid entries.
pub fn clean_transactions(raw: Vec<Map<String, Value>>, today: NaiveDate) -> Vec<Transaction> {
    let total = raw.len();
    let cleaned: Vec<Transaction> = raw
        .into_iter()
        .filter_map(|tx| clean_transaction(tx, today))
        .collect();
    if cleaned.len() < total {
        info!("Dropped {} of {} transactions during cleaning", total - cleaned.len(), total);
    }
    cleaned
}

/// Turn a model draft into the output statement and attach `processing_info`.
pub fn clean_statement(
    draft: StatementDraft,
    text_length: usize,
    processed_at: DateTime<Local>,
) -> Statement {
    let transactions = clean_transactions(draft.transactions, processed_at.date_naive());
    let mut extra = draft.extra;
    // Pipeline-owned keys always win over anything the model echoed back.
    extra.remove("processing_info");
    extra.remove("transactions");
    Statement {
        account_number: draft.account_number,
        period: draft.period,
        opening_balance: draft.opening_balance,
        closing_balance: draft.closing_balance,
        processing_info: ProcessingInfo {
            method: PROCESSING_METHOD.to_string(),
            text_length,
            processed_at,
            transaction_count: transactions.len(),
        },
        transactions,
        extra,
    }
}

// ── Extractor ────────────────────────────────────────────────────────────────

/// Runs the statement pipeline against injected collaborators.
pub struct StatementExtractor {
    model: Arc<dyn GenerativeModel>,
    renderer: Arc<dyn DocumentRenderer>,
    config: ExtractionConfig,
}

impl StatementExtractor {
    pub fn new(
        model: Arc<dyn GenerativeModel>,
        renderer: Arc<dyn DocumentRenderer>,
        config: ExtractionConfig,
    ) -> Self {
        Self {
            model,
            renderer,
            config,
        }
    }

    /// Production wiring: Gemini over HTTPS and pdfium.
    pub fn from_config(config: ExtractionConfig) -> Result<Self, ExtractError> {
        let api_key = config.resolve_api_key()?;
        let model = GeminiClient::new(&config, api_key)?;
        Ok(Self::new(
            Arc::new(model),
            Arc::new(PdfiumRenderer::default()),
            config,
        ))
    }

    /// Process one statement. Never fails: problems become an error object.
    pub async fn extract(&self, path: impl AsRef<Path>) -> StatementOutput {
        let reporter = Reporter(self.config.progress_callback.as_ref());
        let output = self.run(path.as_ref(), &reporter).await;
        info!("Statement resolved via {}", output.resolution());
        reporter.finished(output.resolution());
        output
    }

    async fn run(&self, path: &Path, reporter: &Reporter<'_>) -> StatementOutput {
        let input = match input::resolve_input(path) {
            Ok(input) => input,
            Err(ExtractError::FileNotFound { .. }) => {
                return StatementOutput::Failed(ErrorReport::new("PDF file not found"));
            }
            Err(e) => return StatementOutput::Failed(ErrorReport::new(e.to_string())),
        };

        let text = if input.is_pdf() {
            let text = self.pdf_text(&input, reporter).await;
            if text.trim().is_empty() {
                return StatementOutput::Failed(ErrorReport::new(
                    "Could not extract text from PDF",
                ));
            }
            text
        } else {
            String::new()
        };

        let mut draft = None;
        if input.is_pdf() {
            reporter.start(Stage::StatementText);
            match self.text_stage(&text).await {
                Ok(d) => {
                    reporter.complete(Stage::StatementText);
                    draft = Some(d);
                }
                Err(e) => {
                    warn!("Statement text request failed: {}", e);
                    reporter.failed(Stage::StatementText, &e);
                }
            }
        }

        // The image stage's outcome replaces whatever the text stage produced.
        if draft.as_ref().map_or(true, |d| d.transactions.is_empty()) {
            reporter.start(Stage::StatementImage);
            draft = match self.image_stage(&input, &text).await {
                Ok(d) => {
                    reporter.complete(Stage::StatementImage);
                    Some(d)
                }
                Err(e) => {
                    warn!("Statement image request failed: {}", e);
                    reporter.failed(Stage::StatementImage, &e);
                    None
                }
            };
        }

        let Some(draft) = draft else {
            return StatementOutput::Failed(ErrorReport {
                error: "Failed to process statement".to_string(),
                raw_text: Some(truncate_chars(&text, self.config.raw_text_preview).to_string()),
            });
        };

        let statement = clean_statement(draft, text.chars().count(), Local::now());
        info!(
            "Extracted {} transactions",
            statement.processing_info.transaction_count
        );
        StatementOutput::Extracted(statement)
    }

    async fn pdf_text(&self, input: &ResolvedInput, reporter: &Reporter<'_>) -> String {
        reporter.start(Stage::StatementTextExtraction);
        match render::extract_text(&self.renderer, input.path()).await {
            Ok(text) => {
                reporter.complete(Stage::StatementTextExtraction);
                text
            }
            Err(e) => {
                warn!("Text extraction failed: {}", e);
                reporter.failed(Stage::StatementTextExtraction, &e);
                String::new()
            }
        }
    }

    async fn text_stage(&self, text: &str) -> Result<StatementDraft, StageError> {
        let budget = self.config.statement_text_budget;
        let total = text.chars().count();
        if total > budget {
            warn!(
                "Statement text truncated from {} to {} chars; later transactions may be missed",
                total, budget
            );
        }
        let prompt = prompts::statement_text_prompt(truncate_chars(text, budget));
        let request = GenerateRequest::text(prompt);
        let timeout = Duration::from_secs(self.config.statement_text_timeout_secs);
        let reply = call_model(self.model.as_ref(), &request, timeout, &self.config).await?;
        let object = extract_json_object(&reply).ok_or(StageError::NoJson)?;
        Ok(StatementDraft::from_object(object))
    }

    async fn image_stage(
        &self,
        input: &ResolvedInput,
        text: &str,
    ) -> Result<StatementDraft, StageError> {
        let image = self.load_image(input).await?;
        let context = truncate_chars(text, self.config.image_context_budget);
        let request =
            GenerateRequest::with_image(prompts::statement_image_prompt(context), image.inline);
        let timeout = Duration::from_secs(self.config.statement_image_timeout_secs);
        let reply = call_model(self.model.as_ref(), &request, timeout, &self.config).await?;
        let object = extract_json_object(&reply).ok_or(StageError::NoJson)?;
        if object.is_empty() {
            return Err(StageError::EmptyObject);
        }
        Ok(StatementDraft::from_object(object))
    }

    async fn load_image(&self, input: &ResolvedInput) -> Result<EncodedImage, ExtractError> {
        if !input.is_pdf() {
            return encode::encode_image_file(input);
        }
        let page = render::render_first_page(&self.renderer, input.path()).await?;
        encode::encode_page(&page).map_err(|e| ExtractError::CorruptPdf {
            path: input.path.clone(),
            detail: format!("Image encoding failed: {e}"),
        })
    }
}
