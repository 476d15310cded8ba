//! Deletion wins over anything still in flight for the deleted job.

mod common;

use std::sync::Arc;
use std::time::Duration;

use heatwatch::model::{Area, JobStatus, StatusReport};
use heatwatch::{ExecutionContext, NotificationLevel};

use common::*;

#[tokio::test]
async fn test_delete_during_in_flight_poll() {
    let backend = Arc::new(
        FakeBackend::new()
            .with_statuses(vec![StatusReport::new(JobStatus::Completed, "done")])
            .with_history(vec![completed_job("J1", 0)])
            .with_status_delay(Duration::from_millis(300)),
    );
    let mut context = ExecutionContext::local_only(Duration::from_secs(60));
    let log = SignalLog::attach(&context);
    let session = session_for(&context, backend.clone(), Arc::new(FixedProbe(None)), fast_options());

    session.track_job("J1", Some("J1.mp4"));
    assert!(eventually(Duration::from_secs(2), || backend.status_calls() == 1).await);

    // The status request is still sleeping in the backend.
    session.delete_job("J1").await.unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;

    let snap = session.snapshot();
    assert!(snap.history.is_empty());
    assert!(snap.selected_job.is_none());
    assert!(!snap.generating);
    assert!(session.registry().get("J1").is_none());
    assert_eq!(
        log.notifications_at(NotificationLevel::Success),
        vec!["Heatmap deleted!".to_string()]
    );

    // A later listing that still has the row does not bring it back.
    session.refresh_history().await.unwrap();
    assert!(session.snapshot().history.is_empty());

    session.shutdown().await;
    context.shutdown().await;
}

#[tokio::test]
async fn test_delete_clears_selection_and_custom_sub_job() {
    let backend = Arc::new(
        FakeBackend::new()
            .with_history(vec![completed_job("J1", 2), completed_job("J2", 1)])
            .with_progress(vec![0.3]),
    );
    let mut context = ExecutionContext::local_only(Duration::from_secs(60));
    let session = session_for(
        &context,
        backend.clone(),
        Arc::new(FixedProbe(Some(60.0))),
        fast_options(),
    );

    session.load_history(Some("J2")).await.unwrap();
    session
        .request_custom_heatmap(Some(1.0), Some(30.0), Area::Aisles)
        .await
        .unwrap();
    assert!(
        eventually(Duration::from_secs(2), || session.snapshot().custom_progress == Some(0.3))
            .await
    );

    session.delete_job("J2").await.unwrap();

    let snap = session.snapshot();
    assert!(snap.selected_job.is_none());
    assert!(!snap.heatmap_generated);
    assert_eq!(snap.custom_progress, None);
    assert_eq!(snap.custom_heatmap_url, None);
    assert_eq!(snap.heatmap_url, None);
    assert_eq!(snap.video_duration, None);
    assert!(snap.analysis.is_none());
    let ids: Vec<String> = snap.history.into_iter().map(|j| j.job_id).collect();
    assert_eq!(ids, vec!["J1".to_string()]);

    let calls = backend.progress_calls();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(backend.progress_calls(), calls);
    assert_eq!(backend.delete_calls(), 1);

    session.shutdown().await;
    context.shutdown().await;
}

#[tokio::test]
async fn test_job_deleted_by_another_client_leaves_on_refresh() {
    let backend = Arc::new(
        FakeBackend::new()
            .with_history(vec![completed_job("J1", 2), completed_job("J2", 1)])
            .with_progress(vec![0.4]),
    );
    let mut context = ExecutionContext::local_only(Duration::from_secs(60));
    let log = SignalLog::attach(&context);
    let session = session_for(
        &context,
        backend.clone(),
        Arc::new(FixedProbe(Some(60.0))),
        fast_options(),
    );

    session.load_history(Some("J2")).await.unwrap();
    session
        .request_custom_heatmap(Some(1.0), Some(30.0), Area::Entrance)
        .await
        .unwrap();
    assert!(
        eventually(Duration::from_secs(2), || session.snapshot().custom_progress == Some(0.4))
            .await
    );

    backend.set_history(vec![completed_job("J1", 2)]);
    session.refresh_history().await.unwrap();

    let snap = session.snapshot();
    let ids: Vec<String> = snap.history.into_iter().map(|j| j.job_id).collect();
    assert_eq!(ids, vec!["J1".to_string()]);
    assert!(snap.selected_job.is_none());
    assert_eq!(snap.custom_progress, None);

    let calls = backend.progress_calls();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(backend.progress_calls(), calls);
    assert_eq!(backend.delete_calls(), 0);
    assert!(log.notifications_at(NotificationLevel::Success).is_empty());

    // The row may come back, e.g. after a restore on the backend.
    backend.set_history(vec![completed_job("J1", 2), completed_job("J2", 1)]);
    let history = session.load_history(None).await.unwrap();
    assert_eq!(history.len(), 2);

    session.shutdown().await;
    context.shutdown().await;
}
