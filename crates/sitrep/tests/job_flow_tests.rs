//! End-to-end job flow: upload, progress stream, terminal state, history.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use sitrep::broadcast::{HistoryCache, HistoryEntry, JobStatus, Stage, StreamEvent, SummaryStats};
use sitrep::{observe_job, ObservedOutcome};

async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

fn stage_of(harness: &TestHarness, job_id: &str) -> Stage {
    harness.service.status(job_id).unwrap().stage
}

#[tokio::test]
async fn test_full_progress_sequence_and_history() {
    let (analyzer, gate) = GatedAnalyzer::new();
    let harness = TestHarness::build(|c| c.pipeline.max_concurrent_jobs = 1, Some(analyzer));

    // The first job holds the only permit so the second is observed from the start.
    let blocker = harness.submit("first.csv", EXPORT_CSV);
    wait_until(|| stage_of(&harness, &blocker) == Stage::Analysis).await;
    let job_id = harness.submit("export.csv", EXPORT_CSV);
    assert_eq!(harness.service.status(&job_id).unwrap().status, JobStatus::Pending);

    let mut events = Vec::new();
    let observing = observe_job(&harness.service, &job_id, &harness.history, |e| {
        events.push(e.clone())
    });
    let release = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.add_permits(1);
    };
    let (outcome, ()) = tokio::join!(observing, release);
    let outcome = outcome.unwrap();

    assert_eq!(kinds(&events).first(), Some(&"connected"));
    assert_eq!(kinds(&events).last(), Some(&"finished"));
    assert_eq!(progress_values(&events), vec![0, 10, 30, 50, 85, 100]);

    let stages: Vec<Stage> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Progress { job } => Some(job.stage),
            _ => None,
        })
        .collect();
    assert!(stages.windows(2).all(|w| w[0] <= w[1]), "{:?}", stages);
    assert_eq!(stages.last(), Some(&Stage::Completed));

    let ObservedOutcome::Completed(entry) = outcome else {
        panic!("expected completion, got {:?}", outcome);
    };
    assert_eq!(
        entry.summary_stats,
        SummaryStats {
            total_items: 3,
            retained_items: 2,
            removed_duplicates: 1,
            domestic_items: 1,
            foreign_items: 1,
        }
    );

    let listed = harness.history.lock().unwrap().list(10);
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].job_id, job_id);
    assert_eq!(listed[0].filename, "export.csv");
}

#[tokio::test]
async fn test_analysis_timeout_fails_job() {
    let harness = TestHarness::build(
        |c| c.pipeline.analysis_timeout_secs = 1,
        Some(Arc::new(StalledAnalyzer)),
    );
    let job_id = harness.submit("export.csv", EXPORT_CSV);

    let mut events = Vec::new();
    let outcome = observe_job(&harness.service, &job_id, &harness.history, |e| {
        events.push(e.clone())
    })
    .await
    .unwrap();

    let ObservedOutcome::Failed { error_detail } = outcome else {
        panic!("expected failure, got {:?}", outcome);
    };
    assert!(error_detail.contains("timed out"), "{}", error_detail);

    let tail: Vec<_> = kinds(&events).into_iter().rev().take(2).collect();
    assert_eq!(tail, vec!["finished", "error"]);
    assert!(matches!(
        events.last(),
        Some(StreamEvent::Finished {
            status: JobStatus::Failed,
            ..
        })
    ));

    let record = harness.service.status(&job_id).unwrap();
    assert_eq!(record.stage, Stage::Error);
    assert_eq!(record.failed_stage, Some(Stage::Analysis));
    assert_eq!(record.progress, 50);
    assert_eq!(harness.history_len(), 0);
    assert!(harness.service.summary_stats(&job_id).unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_unreadable_upload_fails_in_intake() {
    let harness = TestHarness::new();
    let job_id = harness.submit("empty.csv", EMPTY_CSV);

    let events = harness.collect_events(&job_id).await;
    assert_eq!(kinds(&events).last(), Some(&"finished"));
    assert!(events
        .iter()
        .any(|e| matches!(e, StreamEvent::Error { error_detail, .. } if error_detail.contains("no data rows"))));

    let record = harness.service.status(&job_id).unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.failed_stage, Some(Stage::Intake));
}

#[tokio::test]
async fn test_concurrent_jobs_progress_independently() {
    let (analyzer, gate) = GatedAnalyzer::new();
    let harness = TestHarness::build(|c| c.pipeline.max_concurrent_jobs = 2, Some(analyzer));

    let first = harness.submit("first.csv", EXPORT_CSV);
    let second = harness.submit("second.csv", EXPORT_CSV);
    wait_until(|| {
        stage_of(&harness, &first) == Stage::Analysis
            && stage_of(&harness, &second) == Stage::Analysis
    })
    .await;

    // Both permits are taken; the third job waits.
    let third = harness.submit("third.csv", EXPORT_CSV);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let waiting = harness.service.status(&third).unwrap();
    assert_eq!(waiting.status, JobStatus::Pending);
    assert_eq!(waiting.progress, 0);

    let subscriptions: Vec<_> = [&first, &second, &third]
        .into_iter()
        .map(|id| harness.service.subscribe(id).unwrap())
        .collect();
    gate.add_permits(1);

    let mut streams = Vec::new();
    for mut subscription in subscriptions {
        streams.push(tokio::spawn(async move {
            let mut events = Vec::new();
            while let Some(event) = subscription.next_event().await {
                events.push(event);
            }
            events
        }));
    }

    for stream in streams {
        let events = stream.await.unwrap();
        let job_ids: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Progress { job } => Some(job.job_id.as_str()),
                _ => None,
            })
            .collect();
        assert!(job_ids.windows(2).all(|w| w[0] == w[1]));

        let values = progress_values(&events);
        assert!(values.windows(2).all(|w| w[0] < w[1]), "{:?}", values);
        assert_eq!(values.last(), Some(&100));
        assert_eq!(kinds(&events).last(), Some(&"finished"));
    }

    let counts = harness.service.counts();
    assert_eq!(counts.completed, 3);
    assert_eq!(counts.running + counts.pending + counts.failed, 0);
}

#[tokio::test]
async fn test_attach_after_completion() {
    let harness = TestHarness::new();
    let job_id = harness.submit("export.csv", EXPORT_CSV);
    harness.collect_events(&job_id).await;

    let events = harness.collect_events(&job_id).await;
    assert_eq!(kinds(&events), vec!["connected", "finished"]);

    let first = observe_job(&harness.service, &job_id, &harness.history, |_| {})
        .await
        .unwrap();
    let again = observe_job(&harness.service, &job_id, &harness.history, |_| {})
        .await
        .unwrap();
    match (first, again) {
        (ObservedOutcome::Completed(a), ObservedOutcome::Completed(b)) => assert_eq!(a.id, b.id),
        other => panic!("expected two completions, got {:?}", other),
    }
    assert_eq!(harness.history_len(), 1);
}

#[tokio::test]
async fn test_subscriber_timeout_leaves_job_running() {
    let (analyzer, gate) = GatedAnalyzer::new();
    let harness = TestHarness::with_analyzer(analyzer);
    let job_id = harness.submit("export.csv", EXPORT_CSV);
    wait_until(|| stage_of(&harness, &job_id) == Stage::Analysis).await;

    let mut subscription = harness
        .service
        .subscribe(&job_id)
        .unwrap()
        .with_inactivity_timeout(Duration::from_millis(50));
    let mut events = Vec::new();
    while let Some(event) = subscription.next_event().await {
        events.push(event);
    }
    assert_eq!(kinds(&events), vec!["connected", "timeout"]);

    // The job is unaffected and still completes.
    gate.add_permits(1);
    let events = harness.collect_events(&job_id).await;
    assert_eq!(kinds(&events).last(), Some(&"finished"));
    assert_eq!(
        harness.service.status(&job_id).unwrap().status,
        JobStatus::Completed
    );
}

#[tokio::test]
async fn test_shutdown_ends_streams_without_finished() {
    let (analyzer, _gate) = GatedAnalyzer::new();
    let harness = TestHarness::with_analyzer(analyzer);
    let job_id = harness.submit("export.csv", EXPORT_CSV);
    wait_until(|| stage_of(&harness, &job_id) == Stage::Analysis).await;

    let mut subscription = harness.service.subscribe(&job_id).unwrap();
    assert!(matches!(
        subscription.next_event().await,
        Some(StreamEvent::Connected { .. })
    ));

    harness.service.shutdown();
    assert_eq!(subscription.next_event().await, None);

    let record = harness.service.status(&job_id).unwrap();
    assert_eq!(record.status, JobStatus::Running);
    assert_eq!(record.stage, Stage::Analysis);
}

#[test]
fn test_history_keeps_newest_entries() {
    let mut cache = HistoryCache::default();
    for n in 0..51 {
        let now = chrono::Utc::now();
        cache.upsert(HistoryEntry {
            id: 0,
            job_id: format!("job-{}", n),
            filename: format!("export-{}.csv", n),
            summary_stats: SummaryStats::default(),
            created_at: now,
            completed_at: now,
            size_bytes: 10,
        });
    }

    assert_eq!(cache.len(), 50);
    assert!(cache.get("job-0").is_none());
    let listed = cache.list(3);
    let ids: Vec<&str> = listed.iter().map(|e| e.job_id.as_str()).collect();
    assert_eq!(ids, vec!["job-50", "job-49", "job-48"]);
}

#[tokio::test]
async fn test_history_survives_restart() {
    let harness = TestHarness::new();
    let job_id = harness.submit("export.csv", EXPORT_CSV);
    observe_job(&harness.service, &job_id, &harness.history, |_| {})
        .await
        .unwrap();

    let path = harness.service.config().storage.history_path();
    harness.history.lock().unwrap().save(&path).unwrap();

    let reloaded = HistoryCache::load(&path, 50).unwrap();
    assert_eq!(reloaded.len(), 1);
    assert_eq!(reloaded.get(&job_id).unwrap().summary_stats.retained_items, 2);
}
