//! Receipt pipeline: one image (or single-page PDF) → categorised receipt.
//!
//! ```text
//! image ─▶ receipt request ─┬─ no reply ─────────────▶ local OCR  {"ocr_text"}
//!                           ├─ reply without JSON ───▶ {"raw_text"}
//!                           └─ JSON ─▶ categories valid? ── yes ─▶ model
//!                                           │ no
//!                                           ▼
//!                                       reprompt valid? ── yes ─▶ reprompt
//!                                           │ no
//!                                           ▼
//!                                       merchant rules ─────────▶ local_fallback
//! ```
//!
//! Whichever branch produced the receipt, [`ensure_categories`] runs last so
//! every category leaving this module is an expense tag.

use crate::categories::{is_expense_category, FALLBACK_EXPENSE};
use crate::config::ExtractionConfig;
use crate::error::{ExtractError, StageError};
use crate::output::{CategorySource, ErrorReport, Receipt, ReceiptOutput};
use crate::pipeline::encode::{self, EncodedImage};
use crate::pipeline::extract::extract_json_object;
use crate::pipeline::gemini::{call_model, GeminiClient, GenerateRequest, GenerativeModel};
use crate::pipeline::input::{self, ResolvedInput};
use crate::pipeline::ocr::{self, OcrBackend};
use crate::pipeline::render::{self, DocumentRenderer, PdfiumRenderer};
use crate::progress::{Reporter, Stage};
use crate::prompts;
use crate::rules::MerchantRules;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const MODEL_REASON: &str = "model returned valid overall and per-item categories";
pub const REPROMPT_REASON: &str = "reprompted model returned per-item and overall categories";
pub const FALLBACK_REASON: &str = "merchant fallback or defaulted to other_expenses";

const NORMALIZED_SUFFIX: &str = "; normalized to other_expenses";

/// Every line item carries a valid expense tag. An empty list qualifies;
/// `items` that were not a list do not.
pub fn has_full_item_categories(receipt: &Receipt) -> bool {
    receipt.malformed_items.is_none()
        && receipt
            .items
            .iter()
            .all(|item| is_expense_category(item.category.as_deref()))
}

/// Top-level and per-item categories are all valid.
pub fn has_valid_categories(receipt: &Receipt) -> bool {
    is_expense_category(receipt.category.as_deref()) && has_full_item_categories(receipt)
}

/// Overwrite every invalid category with `other_expenses`.
///
/// When anything changed, the reason records the normalisation. Returns
/// whether anything changed.
pub fn ensure_categories(receipt: &mut Receipt) -> bool {
    let mut changed = false;
    for item in &mut receipt.items {
        if !is_expense_category(item.category.as_deref()) {
            item.category = Some(FALLBACK_EXPENSE.to_string());
            changed = true;
        }
    }
    if !is_expense_category(receipt.category.as_deref()) {
        receipt.category = Some(FALLBACK_EXPENSE.to_string());
        changed = true;
    }

    if receipt.category_source.is_none() {
        receipt.category_source = Some(CategorySource::LocalFallback);
    }
    if changed {
        let reason = receipt.category_reason.take().unwrap_or_default();
        receipt.category_reason = Some(format!("{reason}{NORMALIZED_SUFFIX}"));
    }
    changed
}

/// Apply the merchant rule table: invalid items and the top-level category
/// take the merchant's category.
pub fn apply_local_fallback(receipt: &mut Receipt, rules: &MerchantRules) {
    let category = rules.categorize(receipt.merchant.as_deref()).to_string();
    if let Some(raw) = receipt.malformed_items.take() {
        warn!("Discarding non-list items {} from {:?}", raw, receipt.merchant);
    }
    for item in &mut receipt.items {
        if !is_expense_category(item.category.as_deref()) {
            item.category = Some(category.clone());
        }
    }
    receipt.category = Some(category);
    mark(receipt, CategorySource::LocalFallback, FALLBACK_REASON);
}

fn mark(receipt: &mut Receipt, source: CategorySource, reason: &str) {
    receipt.category_source = Some(source);
    receipt.category_reason = Some(reason.to_string());
}

/// Runs the receipt pipeline against injected collaborators.
pub struct ReceiptExtractor {
    model: Arc<dyn GenerativeModel>,
    renderer: Arc<dyn DocumentRenderer>,
    ocr: Arc<dyn OcrBackend>,
    rules: MerchantRules,
    config: ExtractionConfig,
}

impl ReceiptExtractor {
    pub fn new(
        model: Arc<dyn GenerativeModel>,
        renderer: Arc<dyn DocumentRenderer>,
        ocr: Arc<dyn OcrBackend>,
        config: ExtractionConfig,
    ) -> Self {
        Self {
            model,
            renderer,
            ocr,
            rules: MerchantRules::builtin(),
            config,
        }
    }

    /// Production wiring: Gemini over HTTPS, pdfium and [`ocr::default_backend`].
    ///
    /// # Errors
    /// - [`ExtractError::MissingApiKey`] when no key can be found
    /// - [`ExtractError::HttpClient`] when the HTTP client cannot be built
    pub fn from_config(config: ExtractionConfig) -> Result<Self, ExtractError> {
        let api_key = config.resolve_api_key()?;
        let model = GeminiClient::new(&config, api_key)?;
        Ok(Self::new(
            Arc::new(model),
            Arc::new(PdfiumRenderer::default()),
            ocr::default_backend(),
            config,
        ))
    }

    /// Replace the built-in merchant rules.
    pub fn with_rules(mut self, rules: MerchantRules) -> Self {
        self.rules = rules;
        self
    }

    /// Process one receipt. Never fails: every problem resolves to one of the
    /// [`ReceiptOutput`] variants.
    pub async fn extract(&self, path: impl AsRef<Path>) -> ReceiptOutput {
        let reporter = Reporter(self.config.progress_callback.as_ref());
        let output = match self.load_image(path.as_ref()).await {
            Ok(image) => self.process(&image, &reporter).await,
            Err(e) => {
                warn!("Cannot read receipt: {}", e);
                ReceiptOutput::Failed(ErrorReport::new(e.to_string()))
            }
        };
        info!("Receipt resolved via {}", output.resolution());
        reporter.finished(output.resolution());
        output
    }

    async fn load_image(&self, path: &Path) -> Result<EncodedImage, ExtractError> {
        let input: ResolvedInput = input::resolve_input(path)?;
        if !input.is_pdf() {
            return encode::encode_image_file(&input);
        }
        let page = render::render_first_page(&self.renderer, input.path()).await?;
        encode::encode_page(&page).map_err(|e| ExtractError::CorruptPdf {
            path: input.path.clone(),
            detail: format!("Image encoding failed: {e}"),
        })
    }

    async fn process(&self, image: &EncodedImage, reporter: &Reporter<'_>) -> ReceiptOutput {
        reporter.start(Stage::ReceiptRequest);
        let request = GenerateRequest::with_image(prompts::receipt_prompt(), image.inline.clone());
        let timeout = Duration::from_secs(self.config.receipt_timeout_secs);

        let text = match call_model(self.model.as_ref(), &request, timeout, &self.config).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Receipt request failed: {}", e);
                reporter.failed(Stage::ReceiptRequest, &e);
                return self.ocr_fallback(image, reporter).await;
            }
        };

        let Some(object) = extract_json_object(&text) else {
            warn!("Receipt reply contained no JSON object; passing raw text through");
            reporter.failed(Stage::ReceiptRequest, &StageError::NoJson);
            return ReceiptOutput::RawText { raw_text: text };
        };
        reporter.complete(Stage::ReceiptRequest);

        let mut receipt = self.categorize(Receipt::from_object(object), reporter).await;
        if ensure_categories(&mut receipt) {
            info!("Invalid categories normalised to {}", FALLBACK_EXPENSE);
        }
        ReceiptOutput::Categorized(receipt)
    }

    async fn categorize(&self, mut receipt: Receipt, reporter: &Reporter<'_>) -> Receipt {
        if has_valid_categories(&receipt) {
            mark(&mut receipt, CategorySource::Model, MODEL_REASON);
            return receipt;
        }

        reporter.start(Stage::Reprompt);
        match self.reprompt(&receipt).await {
            Ok(mut repaired) => {
                reporter.complete(Stage::Reprompt);
                mark(&mut repaired, CategorySource::Reprompt, REPROMPT_REASON);
                repaired
            }
            Err(e) => {
                warn!("Category reprompt failed: {}", e);
                reporter.failed(Stage::Reprompt, &e);
                reporter.start(Stage::LocalFallback);
                apply_local_fallback(&mut receipt, &self.rules);
                reporter.complete(Stage::LocalFallback);
                receipt
            }
        }
    }

    /// Ask the model to repair the categories. Only a fully valid answer counts.
    async fn reprompt(&self, receipt: &Receipt) -> Result<Receipt, StageError> {
        let request = GenerateRequest::text(prompts::category_repair_prompt(receipt));
        let timeout = Duration::from_secs(self.config.reprompt_timeout_secs);
        let text = call_model(self.model.as_ref(), &request, timeout, &self.config).await?;
        let object = extract_json_object(&text).ok_or(StageError::NoJson)?;
        let repaired = Receipt::from_object(object);
        if has_valid_categories(&repaired) {
            Ok(repaired)
        } else {
            Err(StageError::StillInvalid)
        }
    }

    async fn ocr_fallback(&self, image: &EncodedImage, reporter: &Reporter<'_>) -> ReceiptOutput {
        reporter.start(Stage::OcrFallback);
        let ocr = Arc::clone(&self.ocr);
        let bytes = image.raw.clone();
        let result = tokio::task::spawn_blocking(move || ocr.recognize(&bytes))
            .await
            .unwrap_or_else(|e| Err(StageError::Ocr(format!("OCR task panicked: {e}"))));

        match result {
            Ok(text) => {
                reporter.complete(Stage::OcrFallback);
                ReceiptOutput::Ocr { ocr_text: text }
            }
            Err(e) => {
                warn!("Local OCR failed: {}", e);
                reporter.failed(Stage::OcrFallback, &e);
                ReceiptOutput::Failed(ErrorReport::new(format!(
                    "Failed to get a response from the model and local OCR failed: {e}"
                )))
            }
        }
    }
}
