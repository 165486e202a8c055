use super::*;
use crate::ProgressReporter;
use chrono::Utc;
use fh_core::{Job, JobClass, JobStatus, ManualClock, NetworkFailure, NewJob};
use fh_store::{JobStore, MemoryJobStore, StatusChange};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

async fn running_context(providers: &[&str], payload: &str) -> (JobContext, Arc<MemoryJobStore>) {
    let store = Arc::new(MemoryJobStore::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let job: Job = NewJob {
        class: JobClass::Fast,
        providers: providers.iter().map(|p| p.to_string()).collect(),
        priority: 0,
        payload: payload.to_string(),
    }
    .into_job(Utc::now());
    store.insert(job.clone()).await.unwrap();
    store
        .compare_and_set_status(
            &job.id,
            JobStatus::Queued,
            StatusChange::new(JobStatus::Running, Utc::now()),
        )
        .await
        .unwrap();
    let ctx = JobContext {
        progress: ProgressReporter::new(&job.id, store.clone(), clock),
        job,
        cancel: CancellationToken::new(),
    };
    (ctx, store)
}

#[tokio::test]
async fn test_zero_exit_succeeds_and_reads_payload() {
    let (ctx, _) = running_context(&[], "claim-42").await;
    let exec = CommandExecutor::new(r#"test "$(cat)" = claim-42"#, HashMap::new());
    assert_eq!(exec.run(ctx).await, Outcome::Succeeded);
}

#[tokio::test]
async fn test_job_identity_is_exported() {
    let (ctx, _) = running_context(&["llm:opus", "search"], "").await;
    let expected_id = ctx.job.id.clone();
    let mut env = HashMap::new();
    env.insert("EXPECTED_ID".to_string(), expected_id);
    let exec = CommandExecutor::new(
        r#"[ "$FH_JOB_ID" = "$EXPECTED_ID" ] && [ "$FH_JOB_CLASS" = fast ] && [ "$FH_PROVIDERS" = "llm:opus,search" ]"#,
        env,
    );
    assert_eq!(exec.run(ctx).await, Outcome::Succeeded);
}

#[tokio::test]
async fn test_progress_lines_update_store() {
    let (ctx, store) = running_context(&[], "").await;
    let id = ctx.job.id.clone();
    let exec = CommandExecutor::new(
        "echo 'progress: extracting claims'; echo noise; echo 'progress: scoring'",
        HashMap::new(),
    );
    assert_eq!(exec.run(ctx).await, Outcome::Succeeded);
    let job = store.get(&id).await.unwrap();
    assert_eq!(job.progress.as_deref(), Some("scoring"));
}

#[tokio::test]
async fn test_failure_is_normalised_with_single_provider() {
    let (ctx, _) = running_context(&["search"], "").await;
    let exec = CommandExecutor::new("echo 'HTTP 503 upstream' >&2; exit 4", HashMap::new());
    match exec.run(ctx).await {
        Outcome::Failed(TaskError::Http {
            provider, status, ..
        }) => {
            assert_eq!(provider.as_deref(), Some("search"));
            assert_eq!(status, 503);
        }
        other => panic!("expected Http failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_declared_provider_wins() {
    let (ctx, _) = running_context(&["llm:opus", "search"], "").await;
    let exec = CommandExecutor::new(
        "echo 'provider: search'; echo 'Connection refused' >&2; exit 1",
        HashMap::new(),
    );
    match exec.run(ctx).await {
        Outcome::Failed(TaskError::Network { provider, kind, .. }) => {
            assert_eq!(provider.as_deref(), Some("search"));
            assert_eq!(kind, NetworkFailure::Connect);
        }
        other => panic!("expected Network failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unattributed_failure_with_many_providers() {
    let (ctx, _) = running_context(&["llm:opus", "search"], "").await;
    let exec = CommandExecutor::new("echo 'HTTP 500' >&2; exit 1", HashMap::new());
    match exec.run(ctx).await {
        Outcome::Failed(err) => assert_eq!(err.provider(), None),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_cancellation_kills_process() {
    let (ctx, _) = running_context(&[], "").await;
    let cancel = ctx.cancel.clone();
    let exec = CommandExecutor::new("sleep 30", HashMap::new());

    let handle = tokio::spawn(async move { exec.run(ctx).await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();

    let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("cancelled run should return promptly")
        .unwrap();
    assert_eq!(outcome, Outcome::Cancelled);
}
