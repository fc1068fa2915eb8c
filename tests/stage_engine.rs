//! 阶段引擎测试：重试、重启、降级、取消和恢复
mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Harness, Script, ScriptedStep};
use manifest_portal_submit::error::SessionError;
use manifest_portal_submit::workflow::{Disposition, Stage, StageStatus, SubmissionStatus};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn all_stages_succeed_on_first_attempt() {
    let h = Harness::new();
    let result = h.engine().run(&h.request()).await;

    assert_eq!(result.status, SubmissionStatus::Success);
    assert_eq!(result.disposition(), Disposition::Completed);
    assert_eq!(result.trace.len(), 6);
    assert!(result.trace.iter().all(|o| o.succeeded() && o.attempts == 1));
    assert!(result.document.is_some());
    assert!(result.upload_done);
    assert_eq!(result.rounds, 1);
    assert_eq!(result.selected.len(), 1);
    assert_eq!(h.factory.opens(), 1);
    assert_eq!(h.portal().closed, 1);
    assert_eq!(h.calls(Stage::OrderConfirmationFallback), 0);
}

#[tokio::test]
async fn stage_recovers_within_its_retry_budget() {
    let h = Harness::new().script(
        Stage::LocateUploadControl,
        vec![Script::Transient, Script::Transient],
        Script::Ok,
    );
    let result = h.engine().run(&h.request()).await;

    assert_eq!(result.status, SubmissionStatus::Success);
    let locate: Vec<_> = result.outcomes_of(Stage::LocateUploadControl).collect();
    assert_eq!(locate.len(), 1);
    assert_eq!(locate[0].attempts, 3);
    assert!(locate[0].succeeded());
    assert_eq!(h.factory.opens(), 1);
}

#[tokio::test]
async fn every_failed_attempt_leaves_a_screenshot() {
    let h = Harness::new().script(
        Stage::LocateUploadControl,
        vec![Script::Transient, Script::Transient],
        Script::Ok,
    );
    let result = h.engine().run(&h.request()).await;

    assert_eq!(result.artifacts.len(), 2);
    assert_eq!(h.portal().screenshots, 2);
    let first = result.artifacts[0].file_name().unwrap().to_string_lossy().to_string();
    assert!(first.ends_with("LocateUploadControl_r1_a1.png"), "{}", first);
    assert!(result.artifacts[0].starts_with(h.dir.path().join("diagnostics")));
}

#[tokio::test]
async fn exhausted_stage_restarts_the_whole_flow_once() {
    let h = Harness::new().script(
        Stage::Login,
        vec![Script::Transient, Script::Transient, Script::Transient],
        Script::Ok,
    );
    let result = h.engine().run(&h.request()).await;

    assert_eq!(result.status, SubmissionStatus::Success);
    assert_eq!(result.rounds, 2);
    assert_eq!(h.factory.opens(), 2);
    assert_eq!(h.portal().closed, 2);

    let logins: Vec<_> = result.outcomes_of(Stage::Login).collect();
    assert_eq!(logins.len(), 2);
    assert_eq!(logins[0].status, StageStatus::Failed);
    assert_eq!(logins[0].attempts, 3);
    assert_eq!(logins[0].round, 1);
    assert!(logins[1].succeeded());
    assert_eq!(logins[1].round, 2);
}

#[tokio::test]
async fn restart_budget_is_not_exceeded() {
    let h = Harness::new().script(Stage::Login, Vec::new(), Script::Transient);
    let result = h.engine().run(&h.request()).await;

    assert_eq!(result.status, SubmissionStatus::Failed);
    assert_eq!(result.disposition(), Disposition::ManualIntervention);
    assert_eq!(h.factory.opens(), 2);
    assert_eq!(h.calls(Stage::Login), 6);
    assert_eq!(h.calls(Stage::UploadFile), 0);
    assert!(result.message.as_deref().unwrap().contains("Login"));
}

#[tokio::test]
async fn restart_after_upload_skips_the_upload() {
    let h = Harness::new().script(
        Stage::DownloadDocument,
        vec![Script::Transient, Script::Transient, Script::Transient],
        Script::Ok,
    );
    let result = h.engine().run(&h.request()).await;

    assert_eq!(result.status, SubmissionStatus::Success);
    assert_eq!(result.rounds, 2);
    assert_eq!(h.calls(Stage::UploadFile), 1);
    assert_eq!(h.calls(Stage::LocateUploadControl), 1);
    assert_eq!(h.calls(Stage::ViewOrders), 1);
    assert_eq!(h.calls(Stage::OrderConfirmationFallback), 1);
    assert_eq!(h.calls(Stage::SelectOrders), 2);

    let second_round: Vec<Stage> = result
        .trace
        .iter()
        .filter(|o| o.round == 2)
        .map(|o| o.stage)
        .collect();
    assert_eq!(
        second_round,
        vec![
            Stage::Login,
            Stage::OrderConfirmationFallback,
            Stage::SelectOrders,
            Stage::DownloadDocument
        ]
    );
}

#[tokio::test]
async fn missing_document_after_upload_is_partial_success() {
    let h = Harness::new().script(Stage::DownloadDocument, Vec::new(), Script::Transient);
    let result = h.engine().run(&h.request()).await;

    assert_eq!(result.status, SubmissionStatus::PartialSuccess);
    assert_eq!(result.disposition(), Disposition::ManualPrint);
    assert!(result.document.is_none());
    assert!(result.upload_done);
    assert_eq!(h.calls(Stage::UploadFile), 1);
    assert_eq!(h.calls(Stage::DownloadDocument), 6);
}

#[tokio::test]
async fn structural_failure_after_upload_does_not_restart() {
    let h = Harness::new().script(Stage::SelectOrders, Vec::new(), Script::Structural);
    let result = h.engine().run(&h.request()).await;

    assert_eq!(result.status, SubmissionStatus::PartialSuccess);
    assert_eq!(h.factory.opens(), 1);
    assert_eq!(h.calls(Stage::SelectOrders), 3);
    assert_eq!(h.calls(Stage::DownloadDocument), 0);
}

#[tokio::test]
async fn view_orders_falls_back_to_order_confirmation() {
    let h = Harness::new().script(Stage::ViewOrders, Vec::new(), Script::Structural);
    let result = h.engine().run(&h.request()).await;

    assert_eq!(result.status, SubmissionStatus::Success);
    assert_eq!(h.factory.opens(), 1);

    let view = result.outcomes_of(Stage::ViewOrders).next().unwrap();
    assert_eq!(view.status, StageStatus::Failed);
    let fallback = result.outcomes_of(Stage::OrderConfirmationFallback).next().unwrap();
    assert!(fallback.succeeded());

    let stages: Vec<Stage> = result.trace.iter().map(|o| o.stage).collect();
    let view_at = stages.iter().position(|s| *s == Stage::ViewOrders).unwrap();
    assert_eq!(stages[view_at + 1], Stage::OrderConfirmationFallback);
    assert_eq!(stages[view_at + 2], Stage::SelectOrders);
}

#[tokio::test]
async fn fatal_login_terminates_without_retry() {
    let h = Harness::new().script(Stage::Login, vec![Script::Fatal], Script::Ok);
    let result = h.engine().run(&h.request()).await;

    assert_eq!(result.status, SubmissionStatus::Failed);
    assert_eq!(h.calls(Stage::Login), 1);
    assert_eq!(h.factory.opens(), 1);
    assert_eq!(result.trace.len(), 1);
}

#[tokio::test]
async fn cancellation_stops_before_the_next_stage() {
    let token = CancellationToken::new();
    let trigger = token.clone();
    let h = Harness::new().step(
        ScriptedStep::new(Stage::LocateUploadControl, Vec::new(), Script::Transient)
            .with_hook(move |_| trigger.cancel()),
    );
    let result = h.engine().with_cancellation(token).run(&h.request()).await;

    assert_eq!(result.status, SubmissionStatus::Cancelled);
    assert_eq!(result.disposition(), Disposition::Requeue);
    assert_eq!(h.calls(Stage::LocateUploadControl), 1);
    assert_eq!(h.calls(Stage::UploadFile), 0);

    let locate = result.outcomes_of(Stage::LocateUploadControl).next().unwrap();
    assert_eq!(locate.status, StageStatus::Cancelled);
    assert_eq!(locate.attempts, 1);
    assert_eq!(h.portal().closed, 1);
}

#[tokio::test]
async fn cancellation_after_upload_is_not_requeued() {
    let token = CancellationToken::new();
    let trigger = token.clone();
    let h = Harness::new().step(
        ScriptedStep::new(Stage::UploadFile, Vec::new(), Script::Ok).with_hook(move |_| trigger.cancel()),
    );
    let result = h.engine().with_cancellation(token).run(&h.request()).await;

    assert_eq!(result.status, SubmissionStatus::Cancelled);
    assert!(result.upload_done);
    assert_eq!(result.disposition(), Disposition::ManualPrint);
    assert_eq!(h.calls(Stage::ViewOrders), 0);

    let last = result.trace.last().unwrap();
    assert_eq!(last.stage, Stage::ViewOrders);
    assert_eq!(last.status, StageStatus::Cancelled);
    assert_eq!(last.attempts, 0);
    assert!(result.outcomes_of(Stage::UploadFile).all(|o| o.succeeded()));
}

#[tokio::test]
async fn cancellation_during_restart_wait_records_the_skipped_round() {
    let token = CancellationToken::new();
    let trigger = token.clone();
    let h = Harness::new().script(Stage::LocateUploadControl, Vec::new(), Script::Transient);
    let request = h.request_with(h.config().with_restart_delay_ms(60_000));

    // 第一轮关闭会话后，引擎在重启等待中收到取消
    let portal = Arc::clone(&h.portal);
    let canceller = tokio::spawn(async move {
        loop {
            let closed = portal.lock().unwrap().closed;
            if closed > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        trigger.cancel();
    });
    let result = h.engine().with_cancellation(token).run(&request).await;
    canceller.await.unwrap();

    assert_eq!(result.status, SubmissionStatus::Cancelled);
    assert_eq!(h.factory.opens(), 1);
    assert_eq!(h.calls(Stage::LocateUploadControl), 3);
    let last = result.trace.last().unwrap();
    assert_eq!(last.stage, Stage::Login);
    assert_eq!(last.status, StageStatus::Cancelled);
    assert_eq!(last.attempts, 0);
    assert_eq!(last.round, 2);
}

#[tokio::test]
async fn cancellation_before_print_needs_manual_print() {
    let token = CancellationToken::new();
    let trigger = token.clone();
    let h = Harness::new()
        .script(Stage::Print, Vec::new(), Script::Ok)
        .step(
            ScriptedStep::new(Stage::DownloadDocument, Vec::new(), Script::Ok)
                .with_hook(move |_| trigger.cancel()),
        );
    let result = h.engine().with_cancellation(token).run(&h.request()).await;

    assert_eq!(result.status, SubmissionStatus::Cancelled);
    assert!(result.document.is_some());
    assert_eq!(result.disposition(), Disposition::ManualPrint);
    assert!(result.requires_manual_intervention());
    assert_eq!(h.calls(Stage::Print), 0);

    let print = result.outcomes_of(Stage::Print).next().unwrap();
    assert_eq!(print.status, StageStatus::Cancelled);
    assert_eq!(print.attempts, 0);
}

#[tokio::test]
async fn cancellation_after_the_last_stage_keeps_success() {
    let token = CancellationToken::new();
    let trigger = token.clone();
    let h = Harness::new().step(
        ScriptedStep::new(Stage::DownloadDocument, Vec::new(), Script::Ok)
            .with_hook(move |_| trigger.cancel()),
    );
    let result = h.engine().with_cancellation(token).run(&h.request()).await;

    assert_eq!(result.status, SubmissionStatus::Success);
    assert_eq!(result.trace.len(), 6);
    assert!(result.trace.iter().all(|o| o.succeeded()));
}

#[tokio::test]
async fn print_failure_is_tolerated() {
    let h = Harness::new().script(Stage::Print, Vec::new(), Script::Transient);
    let result = h.engine().run(&h.request()).await;

    assert_eq!(result.status, SubmissionStatus::Success);
    assert_eq!(result.trace.len(), 7);
    let print = result.outcomes_of(Stage::Print).next().unwrap();
    assert_eq!(print.status, StageStatus::Failed);
    assert_eq!(print.attempts, 3);
    assert!(result.print_failed());
    assert!(result.requires_manual_intervention());
    assert_eq!(h.factory.opens(), 1);
}

#[tokio::test]
async fn portal_error_is_dismissed_and_selection_redone() {
    let h = Harness::new();
    h.portal()
        .errors
        .extend([None, None, Some("An unexpected error occurred".to_string())]);
    let result = h.engine().run(&h.request()).await;

    assert_eq!(result.status, SubmissionStatus::Success);
    let download = result.outcomes_of(Stage::DownloadDocument).next().unwrap();
    assert_eq!(download.attempts, 2);
    assert_eq!(h.calls(Stage::SelectOrders), 2);

    let portal = h.portal();
    let dismiss = portal.calls.iter().position(|c| c == "dismiss").unwrap();
    let reload = portal.calls.iter().position(|c| c == "reload").unwrap();
    assert!(dismiss < reload);
    assert_eq!(portal.screenshots, 1);
}

#[tokio::test]
async fn download_overturned_by_portal_error_is_kept_as_artifact() {
    let h = Harness::new();
    h.portal()
        .errors
        .extend([None, None, Some("Document generation failed".to_string())]);
    let result = h.engine().run(&h.request()).await;

    assert_eq!(result.status, SubmissionStatus::Success);
    let orphaned = h.config().output_dir().join("confirmation.pdf");
    assert!(result.artifacts.contains(&orphaned));
    assert_eq!(result.artifacts.len(), 2);
}

#[tokio::test]
async fn upload_is_never_judged_by_error_indicators() {
    let h = Harness::new();
    // 第一次检查发生在 ViewOrders；如果 UploadFile 也检查，上传会被重做
    h.portal().errors.push_back(Some("Something went wrong".to_string()));
    let result = h.engine().run(&h.request()).await;

    assert_eq!(result.status, SubmissionStatus::Success);
    assert_eq!(h.calls(Stage::UploadFile), 1);
    assert_eq!(h.calls(Stage::ViewOrders), 2);
    assert_eq!(h.calls(Stage::SelectOrders), 1);
    assert_eq!(h.portal().count("dismiss"), 1);
}

#[tokio::test]
async fn unreachable_browser_is_fatal() {
    let h = Harness::new();
    h.factory.fail_next_open(SessionError::ConnectionFailed {
        port: 9222,
        message: "connection refused".to_string(),
    });
    let result = h.engine().run(&h.request()).await;

    assert_eq!(result.status, SubmissionStatus::Failed);
    assert_eq!(h.factory.opens(), 1);
    assert_eq!(h.calls(Stage::Login), 0);
    let login = result.outcomes_of(Stage::Login).next().unwrap();
    assert!(login.error.as_deref().unwrap().contains("9222"));
}

#[tokio::test]
async fn transient_open_failure_is_retried() {
    let h = Harness::new();
    h.factory.fail_next_open(SessionError::NavigationFailed {
        url: "https://portal.example".to_string(),
        message: "net::ERR_TIMED_OUT".to_string(),
    });
    let result = h.engine().run(&h.request()).await;

    assert_eq!(result.status, SubmissionStatus::Success);
    assert_eq!(result.rounds, 2);
    assert_eq!(h.factory.opens(), 2);
}

#[tokio::test]
async fn missing_step_is_reported_not_panicked() {
    let mut h = Harness::new();
    h.steps.remove(&Stage::ViewOrders);
    h.steps.remove(&Stage::OrderConfirmationFallback);
    let result = h.engine().run(&h.request()).await;

    assert_eq!(result.status, SubmissionStatus::PartialSuccess);
    let view = result.outcomes_of(Stage::ViewOrders).next().unwrap();
    assert_eq!(view.attempts, 0);
    assert!(view.error.as_deref().unwrap().contains("ViewOrders"));
}

#[tokio::test]
async fn engine_can_be_shared_between_tasks() {
    let h = Harness::new();
    let engine = Arc::new(h.engine());
    let request = h.request();

    let handle = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.run(&request).await })
    };
    let result = handle.await.unwrap();
    assert!(result.is_success());
}
