//! Behaviour every `JobStore` implementation must share.

use chrono::{Duration, Utc};
use fh_core::{ErrorCategory, Job, JobClass, JobStatus, NewJob, RunnerError};

use crate::{JobFilter, JobStore, ProgressUpdate, StatusChange};

fn job(class: JobClass, priority: i32, offset_secs: i64) -> Job {
    NewJob {
        class,
        providers: vec!["llm:opus".into()],
        priority,
        payload: format!("p{priority}"),
    }
    .into_job(Utc::now() - Duration::seconds(offset_secs))
}

pub(crate) async fn run_all(store: &dyn JobStore) {
    insert_and_get(store).await;
    list_orders_and_filters(store).await;
    cas_requires_expected_status(store).await;
    terminal_status_is_never_overwritten(store).await;
    progress_refreshes_running_jobs_only(store).await;
    missing_jobs_are_reported(store).await;
}

async fn insert_and_get(store: &dyn JobStore) {
    let job = job(JobClass::Fast, 0, 0);
    store.insert(job.clone()).await.unwrap();
    assert_eq!(store.get(&job.id).await.unwrap(), job);

    let err = store.insert(job.clone()).await.unwrap_err();
    assert!(matches!(err, RunnerError::DuplicateJob(id) if id == job.id));
}

async fn list_orders_and_filters(store: &dyn JobStore) {
    let oldest = job(JobClass::Slow, 0, 600);
    let mut tie_low = job(JobClass::Slow, 1, 300);
    let mut tie_high = job(JobClass::Slow, 5, 300);
    tie_high.enqueued_at = tie_low.enqueued_at;
    tie_low.updated_at = tie_low.enqueued_at;
    tie_high.updated_at = tie_high.enqueued_at;
    for j in [&tie_low, &oldest, &tie_high] {
        store.insert(j.clone()).await.unwrap();
    }

    let slow = store
        .list(&JobFilter {
            status: Some(JobStatus::Queued),
            class: Some(JobClass::Slow),
        })
        .await
        .unwrap();
    let ids: Vec<&str> = slow.iter().map(|j| j.id.as_str()).collect();
    assert_eq!(
        ids,
        vec![oldest.id.as_str(), tie_high.id.as_str(), tie_low.id.as_str()]
    );

    let running = store
        .list(&JobFilter::status(JobStatus::Running))
        .await
        .unwrap();
    assert!(running.iter().all(|j| j.status == JobStatus::Running));
}

async fn cas_requires_expected_status(store: &dyn JobStore) {
    let job = job(JobClass::Fast, 0, 0);
    store.insert(job.clone()).await.unwrap();

    let later = job.updated_at + Duration::seconds(5);
    let won = store
        .compare_and_set_status(
            &job.id,
            JobStatus::Running,
            StatusChange::new(JobStatus::Succeeded, later),
        )
        .await
        .unwrap();
    assert!(!won, "QUEUED job must not match expected RUNNING");
    assert_eq!(store.get(&job.id).await.unwrap(), job, "lost CAS wrote nothing");

    let won = store
        .compare_and_set_status(
            &job.id,
            JobStatus::Queued,
            StatusChange::new(JobStatus::Running, later),
        )
        .await
        .unwrap();
    assert!(won);
    let stored = store.get(&job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Running);
    assert_eq!(stored.updated_at, later);
}

async fn terminal_status_is_never_overwritten(store: &dyn JobStore) {
    let job = job(JobClass::Slow, 0, 0);
    store.insert(job.clone()).await.unwrap();
    let now = Utc::now();
    let running = StatusChange::new(JobStatus::Running, now);
    store
        .compare_and_set_status(&job.id, JobStatus::Queued, running)
        .await
        .unwrap();

    let failed = StatusChange::new(JobStatus::Failed, now)
        .with_reason("stale")
        .with_category(ErrorCategory::Timeout);
    let succeeded = StatusChange::new(JobStatus::Succeeded, now);
    assert!(
        store
            .compare_and_set_status(&job.id, JobStatus::Running, failed)
            .await
            .unwrap()
    );
    assert!(
        !store
            .compare_and_set_status(&job.id, JobStatus::Running, succeeded)
            .await
            .unwrap()
    );

    let stored = store.get(&job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.reason.as_deref(), Some("stale"));
    assert_eq!(stored.error_category, Some(ErrorCategory::Timeout));
}

async fn progress_refreshes_running_jobs_only(store: &dyn JobStore) {
    let job = job(JobClass::Fast, 0, 60);
    store.insert(job.clone()).await.unwrap();

    let beat = ProgressUpdate {
        message: Some("extracting claims".into()),
        at: Utc::now(),
    };
    assert!(!store.update_progress(&job.id, beat.clone()).await.unwrap());

    let running = StatusChange::new(JobStatus::Running, job.enqueued_at);
    store
        .compare_and_set_status(&job.id, JobStatus::Queued, running)
        .await
        .unwrap();
    assert!(store.update_progress(&job.id, beat.clone()).await.unwrap());
    let stored = store.get(&job.id).await.unwrap();
    assert_eq!(stored.updated_at, beat.at);
    assert_eq!(stored.progress.as_deref(), Some("extracting claims"));

    let silent = ProgressUpdate {
        message: None,
        at: beat.at + Duration::seconds(1),
    };
    assert!(store.update_progress(&job.id, silent).await.unwrap());
    let stored = store.get(&job.id).await.unwrap();
    assert_eq!(stored.progress.as_deref(), Some("extracting claims"));
}

async fn missing_jobs_are_reported(store: &dyn JobStore) {
    let err = store.get("missing").await.unwrap_err();
    assert!(matches!(err, RunnerError::JobNotFound(_)));
    let running = StatusChange::new(JobStatus::Running, Utc::now());
    let err = store
        .compare_and_set_status("missing", JobStatus::Queued, running)
        .await
        .unwrap_err();
    assert!(matches!(err, RunnerError::JobNotFound(_)));
}
