//! 门户阶段实现测试：真实的 PortalSteps 驱动假门户
mod common;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::{FakeFactory, SharedPortal};
use manifest_portal_submit::config::{Credentials, EngineConfig};
use manifest_portal_submit::error::PrintError;
use manifest_portal_submit::infrastructure::SessionFactory;
use manifest_portal_submit::models::{ListingEntry, PortalProfile, ServiceLevel, SubmissionRequest};
use manifest_portal_submit::services::{DocumentPrinter, OrderSelector};
use manifest_portal_submit::workflow::{
    PortalSteps, Stage, StageEngine, StageStatus, SubmissionResult, SubmissionStatus,
};
use tempfile::TempDir;

#[derive(Default)]
struct RecordingPrinter {
    printed: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl DocumentPrinter for RecordingPrinter {
    fn name(&self) -> &str {
        "recording"
    }

    async fn print(&self, document: &Path) -> Result<(), PrintError> {
        self.printed.lock().unwrap().push(document.to_path_buf());
        Ok(())
    }
}

struct Portal {
    portal: SharedPortal,
    factory: Arc<FakeFactory>,
    dir: TempDir,
}

impl Portal {
    fn new() -> Self {
        let portal = SharedPortal::default();
        portal.lock().unwrap().entries = vec![
            ListingEntry::new("PO123", "STANDARD MAIL SORTED", "r0"),
            ListingEntry::new("PO123", "PREMIUM MAIL SORTED", "r1"),
            ListingEntry::new("PO999", "STANDARD MAIL SORTED", "r2"),
        ];
        Self {
            factory: Arc::new(FakeFactory::new(Arc::clone(&portal))),
            portal,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn steps(&self) -> PortalSteps {
        PortalSteps::new(
            Arc::new(PortalProfile::default()),
            Credentials::new("ops@example.com", "s3cret"),
            OrderSelector::default(),
        )
    }

    fn request(&self, levels: &[ServiceLevel]) -> SubmissionRequest {
        SubmissionRequest::new(
            self.dir.path().join("PO123.csv"),
            "PO123",
            levels.iter().copied(),
            EngineConfig::immediate(self.dir.path())
                .with_stage_retries(2)
                .with_overall_retries(1),
        )
    }

    async fn run(&self, steps: PortalSteps, levels: &[ServiceLevel]) -> SubmissionResult {
        let engine = StageEngine::new(
            self.factory.clone() as Arc<dyn SessionFactory>,
            steps.into_steps(),
        );
        engine.run(&self.request(levels)).await
    }
}

#[tokio::test]
async fn submits_and_downloads_confirmation() {
    let p = Portal::new();
    let result = p.run(p.steps(), &ServiceLevel::ALL).await;

    assert_eq!(result.status, SubmissionStatus::Success, "{}", result.trace_summary());
    assert_eq!(result.trace.len(), 6);

    let document = result.document.clone().unwrap();
    assert!(document.exists());
    let name = document.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("Spring_PO123_"), "{}", name);
    assert!(name.ends_with(".pdf"));

    let handles: Vec<&str> = result.selected.iter().map(|e| e.handle.as_str()).collect();
    assert_eq!(handles, vec!["r0", "r1"]);
    assert!(result.missing_levels.is_empty());

    let portal = p.portal.lock().unwrap();
    assert_eq!(portal.selected, vec!["r0", "r1"]);
    assert!(portal.calls.contains(&"fill:ops@example.com".to_string()));
    assert!(portal.calls.contains(&"fill:s3cret".to_string()));
    assert_eq!(portal.count("attach:"), 1);
    assert!(portal.calls.iter().any(|c| c.ends_with("PO123.csv")));
    assert_eq!(portal.closed, 1);
}

#[tokio::test]
async fn selects_only_the_expected_level() {
    let p = Portal::new();
    let result = p.run(p.steps(), &[ServiceLevel::Premium]).await;

    assert_eq!(result.status, SubmissionStatus::Success);
    let handles: Vec<&str> = result.selected.iter().map(|e| e.handle.as_str()).collect();
    assert_eq!(handles, vec!["r1"]);
}

#[tokio::test]
async fn reports_levels_missing_from_the_listing() {
    let p = Portal::new();
    p.portal.lock().unwrap().entries.remove(1);
    let result = p.run(p.steps(), &ServiceLevel::ALL).await;

    assert_eq!(result.status, SubmissionStatus::Success);
    assert_eq!(result.missing_levels, vec![ServiceLevel::Premium]);
}

#[tokio::test]
async fn missing_view_orders_button_uses_order_confirmation() {
    let p = Portal::new();
    p.portal.lock().unwrap().missing = vec!["view uploaded".to_string()];
    let result = p.run(p.steps(), &ServiceLevel::ALL).await;

    assert_eq!(result.status, SubmissionStatus::Success, "{}", result.trace_summary());
    let view = result.outcomes_of(Stage::ViewOrders).next().unwrap();
    assert_eq!(view.status, StageStatus::Failed);
    assert_eq!(view.attempts, 3);
    assert!(result
        .outcomes_of(Stage::OrderConfirmationFallback)
        .all(|o| o.succeeded()));
    assert_eq!(p.factory.opens(), 1);
}

#[tokio::test]
async fn rejected_credentials_stop_immediately() {
    let p = Portal::new();
    p.portal.lock().unwrap().page_text = "Incorrect password for this account".to_string();
    let result = p.run(p.steps(), &ServiceLevel::ALL).await;

    assert_eq!(result.status, SubmissionStatus::Failed);
    assert_eq!(result.trace.len(), 1);
    assert_eq!(result.trace[0].attempts, 1);
    assert_eq!(p.factory.opens(), 1);
    assert_eq!(p.portal.lock().unwrap().count("attach:"), 0);
}

#[tokio::test]
async fn unknown_reference_leaves_upload_for_manual_follow_up() {
    let p = Portal::new();
    p.portal.lock().unwrap().entries = vec![ListingEntry::new("PO999", "STANDARD MAIL SORTED", "r2")];
    let result = p.run(p.steps(), &ServiceLevel::ALL).await;

    assert_eq!(result.status, SubmissionStatus::PartialSuccess);
    assert!(result.message.as_deref().unwrap().contains("PO123"));
    let select = result.outcomes_of(Stage::SelectOrders).next().unwrap();
    assert_eq!(select.attempts, 3);
    assert_eq!(p.factory.opens(), 1);
    assert_eq!(p.portal.lock().unwrap().count("attach:"), 1);
}

#[tokio::test]
async fn downloaded_document_is_printed() {
    let p = Portal::new();
    let printer = Arc::new(RecordingPrinter::default());
    let steps = p.steps().with_printer(printer.clone() as Arc<dyn DocumentPrinter>);
    let result = p.run(steps, &ServiceLevel::ALL).await;

    assert_eq!(result.status, SubmissionStatus::Success);
    assert!(result.outcomes_of(Stage::Print).all(|o| o.succeeded()));
    assert!(!result.requires_manual_intervention());

    let printed = printer.printed.lock().unwrap();
    assert_eq!(printed.as_slice(), &[result.document.clone().unwrap()]);
}
