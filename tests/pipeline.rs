//! Integration tests for the receipt and statement pipelines.
//!
//! The model, PDF engine and OCR engine are replaced by scripted in-memory
//! implementations, so these tests run offline and need neither pdfium nor
//! tesseract.
//!
//! Run with:
//!   cargo test --test pipeline -- --nocapture

use async_trait::async_trait;
use image::{DynamicImage, Rgba, RgbaImage};
use ledgerlens::{
    CategorySource, DocumentRenderer, ExtractError, ExtractionConfig, ExtractionProgress,
    GenerateRequest, GenerativeModel, MerchantRule, MerchantRules, OcrBackend, ReceiptExtractor,
    ReceiptOutput, Stage, StageError, StatementExtractor, StatementOutput,
};
use serde_json::json;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Test doubles ─────────────────────────────────────────────────────────────

/// Replays canned replies in order and records every request it saw.
struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String, StageError>>>,
    requests: Mutex<Vec<(GenerateRequest, Duration)>>,
}

impl ScriptedModel {
    fn new(replies: Vec<Result<String, StageError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::default(),
        })
    }

    fn requests(&self) -> Vec<(GenerateRequest, Duration)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerativeModel for ScriptedModel {
    async fn generate(
        &self,
        request: &GenerateRequest,
        timeout: Duration,
    ) -> Result<String, StageError> {
        self.requests.lock().unwrap().push((request.clone(), timeout));
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(StageError::Transport("script exhausted".into())))
    }
}

struct FakePdf {
    text: String,
}

impl DocumentRenderer for FakePdf {
    fn extract_text(&self, _path: &Path) -> Result<String, ExtractError> {
        Ok(self.text.clone())
    }

    fn render_first_page(&self, _path: &Path) -> Result<DynamicImage, ExtractError> {
        Ok(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            8,
            8,
            Rgba([255, 255, 255, 255]),
        )))
    }
}

struct FakeOcr(Result<String, StageError>);

impl OcrBackend for FakeOcr {
    fn recognize(&self, image_bytes: &[u8]) -> Result<String, StageError> {
        assert!(!image_bytes.is_empty(), "OCR must receive the image bytes");
        self.0.clone()
    }
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl ExtractionProgress for Recorder {
    fn on_stage_start(&self, stage: Stage) {
        self.events.lock().unwrap().push(format!("start {stage}"));
    }

    fn on_stage_failed(&self, stage: Stage, _error: &str) {
        self.events.lock().unwrap().push(format!("failed {stage}"));
    }

    fn on_finished(&self, resolution: &str) {
        self.events.lock().unwrap().push(format!("finished {resolution}"));
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────────────

fn receipt_png(dir: &Path) -> PathBuf {
    let path = dir.join("receipt.png");
    DynamicImage::ImageRgba8(RgbaImage::from_pixel(6, 6, Rgba([250, 250, 250, 255])))
        .save_with_format(&path, image::ImageFormat::Png)
        .unwrap();
    path
}

fn fake_pdf(dir: &Path) -> PathBuf {
    let path = dir.join("statement.pdf");
    std::fs::write(&path, b"%PDF-1.4\n% rendered by a test double\n").unwrap();
    path
}

fn receipt_extractor(
    model: Arc<ScriptedModel>,
    ocr: Result<String, StageError>,
    config: ExtractionConfig,
) -> ReceiptExtractor {
    ReceiptExtractor::new(
        model,
        Arc::new(FakePdf { text: String::new() }),
        Arc::new(FakeOcr(ocr)),
        config,
    )
}

fn statement_extractor(model: Arc<ScriptedModel>, pdf_text: &str) -> StatementExtractor {
    StatementExtractor::new(
        model,
        Arc::new(FakePdf {
            text: pdf_text.to_string(),
        }),
        ExtractionConfig::default(),
    )
}

fn categorized(output: ReceiptOutput) -> ledgerlens::Receipt {
    match output {
        ReceiptOutput::Categorized(r) => r,
        other => panic!("expected a categorised receipt, got {other:?}"),
    }
}

fn extracted(output: StatementOutput) -> ledgerlens::Statement {
    match output {
        StatementOutput::Extracted(s) => s,
        other => panic!("expected an extracted statement, got {other:?}"),
    }
}

// ── Receipt pipeline ─────────────────────────────────────────────────────────

#[tokio::test]
async fn receipt_direct_accept() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(vec![Ok(
        "```json\n{\"merchant\":\"Shell\",\"items\":[{\"name\":\"Unleaded\",\"qty\":1,\"price\":40.0,\"category\":\"fuel\"}],\"category\":\"fuel\",\"amount_paid\":40.0}\n```".into(),
    )]);
    let extractor =
        receipt_extractor(model.clone(), Ok(String::new()), ExtractionConfig::default());

    let receipt = categorized(extractor.extract(receipt_png(dir.path())).await);
    assert_eq!(receipt.category.as_deref(), Some("fuel"));
    assert_eq!(receipt.category_source, Some(CategorySource::Model));
    assert_eq!(
        receipt.category_reason.as_deref(),
        Some("model returned valid overall and per-item categories")
    );

    let requests = model.requests();
    assert_eq!(requests.len(), 1, "no reprompt for a valid receipt");
    assert!(requests[0].0.has_image());
    assert_eq!(requests[0].1, Duration::from_secs(30));
}

#[tokio::test]
async fn receipt_non_list_items_trigger_reprompt() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(vec![
        Ok(r#"{"merchant":"Shell","items":"see attached","category":"fuel"}"#.into()),
        Ok(r#"{"merchant":"Shell","items":[{"name":"Diesel","category":"fuel"}],"category":"fuel"}"#.into()),
    ]);
    let extractor =
        receipt_extractor(model.clone(), Ok(String::new()), ExtractionConfig::default());

    let receipt = categorized(extractor.extract(receipt_png(dir.path())).await);
    assert_eq!(receipt.category_source, Some(CategorySource::Reprompt));
    assert_eq!(receipt.items.len(), 1);
    assert_eq!(receipt.items[0].name.as_deref(), Some("Diesel"));

    let requests = model.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].1, Duration::from_secs(25));
    assert!(requests[1].0.prompt().contains("\"items\": \"see attached\""));
}

#[tokio::test]
async fn receipt_reprompt_accepted_when_fully_valid() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(vec![
        Ok(r#"{"merchant":"Blue Bottle","items":[{"name":"Latte"}],"category":"coffee"}"#.into()),
        Ok(r#"Here you go: {"merchant":"Blue Bottle","items":[{"name":"Latte","category":"food_dining"}],"category":"food_dining"}"#.into()),
    ]);
    let extractor =
        receipt_extractor(model.clone(), Ok(String::new()), ExtractionConfig::default());

    let receipt = categorized(extractor.extract(receipt_png(dir.path())).await);
    assert_eq!(receipt.category.as_deref(), Some("food_dining"));
    assert_eq!(receipt.items[0].category.as_deref(), Some("food_dining"));
    assert_eq!(receipt.category_source, Some(CategorySource::Reprompt));

    let requests = model.requests();
    assert_eq!(requests.len(), 2);
    assert!(!requests[1].0.has_image(), "reprompt is text-only");
    assert_eq!(requests[1].1, Duration::from_secs(25));
    assert!(requests[1].0.prompt().contains("\"merchant\": \"Blue Bottle\""));
}

#[tokio::test]
async fn receipt_partial_repair_falls_through_to_merchant_rules() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(vec![
        Ok(r#"{"merchant":"Walmart Supercenter","items":[{"name":"Bananas","category":"produce"},{"name":"Socks","category":"clothing"}],"category":"misc"}"#.into()),
        // Top-level fixed, one item still invalid.
        Ok(r#"{"merchant":"Walmart Supercenter","items":[{"name":"Bananas","category":"produce"},{"name":"Socks","category":"clothing"}],"category":"groceries"}"#.into()),
    ]);
    let extractor = receipt_extractor(model, Ok(String::new()), ExtractionConfig::default());

    let receipt = categorized(extractor.extract(receipt_png(dir.path())).await);
    assert_eq!(receipt.category_source, Some(CategorySource::LocalFallback));
    assert_eq!(receipt.category.as_deref(), Some("groceries"));
    assert_eq!(receipt.items[0].category.as_deref(), Some("groceries"));
    assert_eq!(receipt.items[1].category.as_deref(), Some("clothing"));
    assert_eq!(
        receipt.category_reason.as_deref(),
        Some("merchant fallback or defaulted to other_expenses")
    );
}

#[tokio::test]
async fn receipt_reprompt_network_failure_falls_through() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(vec![
        Ok(r#"{"merchant":"Uber  Trip","category":null}"#.into()),
        Err(StageError::Timeout { secs: 25 }),
    ]);
    let extractor = receipt_extractor(model, Ok(String::new()), ExtractionConfig::default());

    let receipt = categorized(extractor.extract(receipt_png(dir.path())).await);
    assert_eq!(receipt.category.as_deref(), Some("transportation"));
    assert_eq!(receipt.category_source, Some(CategorySource::LocalFallback));
}

#[tokio::test]
async fn receipt_custom_rules_replace_builtin_table() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(vec![
        Ok(r#"{"merchant":"City Parking Garage","items":[],"category":"parking"}"#.into()),
        Ok("no idea".into()),
    ]);
    let rules = MerchantRules::new(vec![MerchantRule {
        pattern: "parking".into(),
        category: "transportation".into(),
    }])
    .unwrap();
    let extractor =
        receipt_extractor(model, Ok(String::new()), ExtractionConfig::default()).with_rules(rules);

    let receipt = categorized(extractor.extract(receipt_png(dir.path())).await);
    assert_eq!(receipt.category.as_deref(), Some("transportation"));
    assert_eq!(receipt.category_source, Some(CategorySource::LocalFallback));
}

#[tokio::test]
async fn receipt_prose_reply_passed_through_as_raw_text() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(vec![Ok("The image is too blurry to read.".into())]);
    let extractor = receipt_extractor(model, Ok(String::new()), ExtractionConfig::default());

    let output = extractor.extract(receipt_png(dir.path())).await;
    assert_eq!(
        serde_json::to_value(&output).unwrap(),
        json!({"raw_text": "The image is too blurry to read."})
    );
}

#[tokio::test]
async fn receipt_api_failure_uses_local_ocr() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Arc::new(Recorder::default());
    let config = ExtractionConfig::builder()
        .progress_callback(recorder.clone())
        .build()
        .unwrap();
    let model = ScriptedModel::new(vec![Err(StageError::Status {
        status: 403,
        body: "API key not valid".into(),
    })]);
    let extractor = receipt_extractor(model, Ok("ALDI\nMILK 1.29\nTOTAL 1.29".into()), config);

    let output = extractor.extract(receipt_png(dir.path())).await;
    assert_eq!(
        serde_json::to_value(&output).unwrap(),
        json!({"ocr_text": "ALDI\nMILK 1.29\nTOTAL 1.29"})
    );

    let events = recorder.events.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            "start receipt request",
            "failed receipt request",
            "start local OCR",
            "finished local_ocr",
        ]
    );
}

#[tokio::test]
async fn receipt_ocr_failure_is_error_object() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(vec![Err(StageError::EmptyCandidate)]);
    let extractor = receipt_extractor(
        model,
        Err(StageError::Ocr("tesseract not installed".into())),
        ExtractionConfig::default(),
    );

    match extractor.extract(receipt_png(dir.path())).await {
        ReceiptOutput::Failed(report) => assert!(report.error.contains("tesseract not installed")),
        other => panic!("expected error object, got {other:?}"),
    }
}

#[tokio::test]
async fn receipt_pdf_sends_rendered_first_page() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(vec![Ok(
        r#"{"merchant":"Apple Store","items":[],"category":"shopping"}"#.into(),
    )]);
    let extractor =
        receipt_extractor(model.clone(), Ok(String::new()), ExtractionConfig::default());

    let receipt = categorized(extractor.extract(fake_pdf(dir.path())).await);
    assert_eq!(receipt.category.as_deref(), Some("shopping"));

    let body = serde_json::to_value(&model.requests()[0].0).unwrap();
    assert_eq!(
        body["contents"][0]["parts"][1]["inline_data"]["mime_type"],
        json!("image/png")
    );
}

#[tokio::test]
async fn receipt_missing_file_is_error_object() {
    let model = ScriptedModel::new(vec![]);
    let extractor =
        receipt_extractor(model.clone(), Ok(String::new()), ExtractionConfig::default());

    let output = extractor.extract("/definitely/not/here.jpg").await;
    assert_eq!(output.resolution(), "error");
    assert!(model.requests().is_empty());
}

#[tokio::test]
async fn receipt_retries_transient_failure_when_configured() {
    let dir = tempfile::tempdir().unwrap();
    let config = ExtractionConfig::builder()
        .max_retries(1)
        .retry_backoff_ms(1)
        .build()
        .unwrap();
    let model = ScriptedModel::new(vec![
        Err(StageError::Status { status: 503, body: String::new() }),
        Ok(r#"{"merchant":"Costco","items":[],"category":"groceries"}"#.into()),
    ]);
    let extractor = receipt_extractor(model.clone(), Ok(String::new()), config);

    let receipt = categorized(extractor.extract(receipt_png(dir.path())).await);
    assert_eq!(receipt.category_source, Some(CategorySource::Model));
    assert_eq!(model.requests().len(), 2);
}

// ── Statement pipeline ───────────────────────────────────────────────────────

const STATEMENT_REPLY: &str = r#"```json
{
  "accountNumber": "****4321",
  "period": "January 2024",
  "openingBalance": 1000.0,
  "closingBalance": 3262.5,
  "transactions": [
    {"date": "01/15/2024", "description": "ACME PAYROLL", "credit": 2500, "amount": 2500, "balance": 3500, "category": "salary", "confidence": "high"},
    {"date": "2024-01-20", "description": "WHOLE FOODS", "debit": "237.50", "amount": "237.50", "balance": 3262.5, "category": "grocery"},
    {"date": "2024-01-21", "description": "", "amount": 5},
    {"date": "2024-01-22", "description": "MYSTERY", "amount": "n/a"}
  ]
}
```"#;

#[tokio::test]
async fn statement_text_stage_success() {
    let model = ScriptedModel::new(vec![Ok(STATEMENT_REPLY.into())]);
    let extractor =
        statement_extractor(model.clone(), "ACME PAYROLL 2500.00\nWHOLE FOODS 237.50\n");
    let dir = tempfile::tempdir().unwrap();

    let statement = extracted(extractor.extract(fake_pdf(dir.path())).await);
    assert_eq!(statement.transactions.len(), 2);

    let payroll = &statement.transactions[0];
    assert_eq!(payroll.date, "2024-01-15");
    assert_eq!(payroll.category, "salary");
    assert_eq!(payroll.credit, Some(2500.0));

    let groceries = &statement.transactions[1];
    assert_eq!(groceries.amount, 237.5);
    assert_eq!(groceries.category, "other_expenses");

    assert_eq!(statement.processing_info.method, "gemini_ai");
    assert_eq!(statement.processing_info.transaction_count, 2);
    assert_eq!(statement.processing_info.text_length, 40);

    let requests = model.requests();
    assert_eq!(requests.len(), 1);
    assert!(!requests[0].0.has_image());
    assert_eq!(requests[0].1, Duration::from_secs(45));

    let out = serde_json::to_value(StatementOutput::Extracted(statement)).unwrap();
    assert_eq!(out["accountNumber"], json!("****4321"));
    assert_eq!(out["transactions"][1]["confidence"], json!("medium"));
}

#[tokio::test]
async fn statement_empty_text_stage_uses_image() {
    let model = ScriptedModel::new(vec![
        Ok(r#"{"accountNumber": "****4321", "transactions": []}"#.into()),
        Ok(r#"{"transactions": [{"date": "Jan 05, 2024", "description": "NETFLIX", "debit": 15.49, "amount": 15.49, "category": "subscriptions"}]}"#.into()),
    ]);
    let long_text = "x".repeat(5000);
    let extractor = statement_extractor(model.clone(), &long_text);
    let dir = tempfile::tempdir().unwrap();

    let statement = extracted(extractor.extract(fake_pdf(dir.path())).await);
    assert_eq!(statement.transactions.len(), 1);
    assert_eq!(statement.transactions[0].date, "2024-01-05");
    assert_eq!(statement.transactions[0].category, "subscriptions");

    let requests = model.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[1].0.has_image());
    assert_eq!(requests[1].1, Duration::from_secs(60));
    let prompt = requests[1].0.prompt();
    let context = prompt.split("Additional text context: ").nth(1).unwrap();
    assert_eq!(context.trim_end().len(), 2000);
}

#[tokio::test]
async fn statement_text_is_truncated_to_budget() {
    let model = ScriptedModel::new(vec![Ok(
        r#"{"transactions": [{"description": "FEE", "amount": 1}]}"#.into(),
    )]);
    let text = format!("{}TAIL-MARKER", "a".repeat(8000));
    let extractor = statement_extractor(model.clone(), &text);
    let dir = tempfile::tempdir().unwrap();

    let statement = extracted(extractor.extract(fake_pdf(dir.path())).await);
    assert_eq!(statement.processing_info.text_length, 8011);
    assert!(!model.requests()[0].0.prompt().contains("TAIL-MARKER"));
}

#[tokio::test]
async fn statement_without_text_is_error() {
    let model = ScriptedModel::new(vec![]);
    let extractor = statement_extractor(model.clone(), "  \n ");
    let dir = tempfile::tempdir().unwrap();

    let output = extractor.extract(fake_pdf(dir.path())).await;
    assert_eq!(
        serde_json::to_value(&output).unwrap(),
        json!({"error": "Could not extract text from PDF"})
    );
    assert!(model.requests().is_empty());
}

#[tokio::test]
async fn statement_total_failure_reports_raw_text() {
    let model = ScriptedModel::new(vec![
        Err(StageError::Timeout { secs: 45 }),
        Ok("I cannot help with that.".into()),
    ]);
    let text = "b".repeat(1500);
    let extractor = statement_extractor(model, &text);
    let dir = tempfile::tempdir().unwrap();

    match extractor.extract(fake_pdf(dir.path())).await {
        StatementOutput::Failed(report) => {
            assert_eq!(report.error, "Failed to process statement");
            assert_eq!(report.raw_text.map(|t| t.len()), Some(1000));
        }
        other => panic!("expected error object, got {other:?}"),
    }
}

#[tokio::test]
async fn statement_image_failure_discards_empty_text_result() {
    let model = ScriptedModel::new(vec![
        Ok(r#"{"accountNumber": "****4321", "transactions": []}"#.into()),
        Err(StageError::Timeout { secs: 60 }),
    ]);
    let extractor = statement_extractor(model.clone(), "OPENING BALANCE 100.00");
    let dir = tempfile::tempdir().unwrap();

    match extractor.extract(fake_pdf(dir.path())).await {
        StatementOutput::Failed(report) => {
            assert_eq!(report.error, "Failed to process statement");
            assert_eq!(report.raw_text.as_deref(), Some("OPENING BALANCE 100.00"));
        }
        other => panic!("expected error object, got {other:?}"),
    }
    assert_eq!(model.requests().len(), 2);
}

#[tokio::test]
async fn statement_empty_image_reply_is_failure() {
    let model = ScriptedModel::new(vec![
        Err(StageError::Timeout { secs: 45 }),
        Ok("{}".into()),
    ]);
    let extractor = statement_extractor(model, "CARD PURCHASE 12.00");
    let dir = tempfile::tempdir().unwrap();

    let output = extractor.extract(fake_pdf(dir.path())).await;
    assert_eq!(output.resolution(), "error");
    assert_eq!(
        serde_json::to_value(&output).unwrap(),
        json!({"error": "Failed to process statement", "raw_text": "CARD PURCHASE 12.00"})
    );
}

#[tokio::test]
async fn statement_processing_info_ignores_model_copy() {
    let model = ScriptedModel::new(vec![Ok(r#"{
        "transactions": [{"description": "RENT", "debit": 1200, "amount": 1200}],
        "processing_info": {"method": "model_said"}
    }"#
    .into())]);
    let extractor = statement_extractor(model, "RENT 1200.00");
    let dir = tempfile::tempdir().unwrap();

    let output = extractor.extract(fake_pdf(dir.path())).await;
    let printed = ledgerlens::output::to_pretty_json(&output).unwrap();
    assert_eq!(printed.matches("\"processing_info\"").count(), 1);

    let out = serde_json::to_value(&output).unwrap();
    assert_eq!(out["processing_info"]["method"], json!("gemini_ai"));
    assert_eq!(out["processing_info"]["transaction_count"], json!(1));
}

#[tokio::test]
async fn statement_missing_file() {
    let model = ScriptedModel::new(vec![]);
    let extractor = statement_extractor(model, "unused");

    let output = extractor.extract("/no/such/statement.pdf").await;
    assert_eq!(
        serde_json::to_value(&output).unwrap(),
        json!({"error": "PDF file not found"})
    );
}

#[tokio::test]
async fn statement_image_input_skips_text_stage() {
    let model = ScriptedModel::new(vec![Ok(
        r#"{"transactions": [{"date": "bogus", "description": "DEPOSIT", "credit": "100", "amount": 100}]}"#.into(),
    )]);
    let extractor = statement_extractor(model.clone(), "never read");
    let dir = tempfile::tempdir().unwrap();

    let statement = extracted(extractor.extract(receipt_png(dir.path())).await);
    assert_eq!(statement.transactions[0].category, "other_income");
    assert_eq!(statement.processing_info.text_length, 0);

    let requests = model.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].0.has_image());
}
