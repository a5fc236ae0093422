//! Pipeline behaviour against the in-memory backends: submission, claim,
//! retry, crash recovery, sweep and cancellation.

mod fixtures;
mod helpers;

use chrono::TimeDelta;
use document_classifier::{
    jobs::{
        error::{CancelError, StatusError, SubmissionError},
        worker::{wait_until_ready, Outcome},
    },
    models::{
        classification::DocumentClass,
        job::{ErrorKind, Job, JobMessage, JobState, JobUpdate},
    },
    services::{classifier::KeywordClassifier, queue::Broker, store::JobStore},
};
use fixtures::*;
use helpers::*;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn keyword_harness() -> Harness {
    Harness::new(Arc::new(KeywordClassifier::new().unwrap()))
}

/// Stand in for a worker that claimed the next message and then died.
async fn claim_and_crash(h: &Harness) -> Job {
    let delivery = h
        .broker
        .receive(h.config.lease_duration)
        .await
        .unwrap()
        .expect("a message is queued");
    let job = h.store.read(delivery.message.job_id).await.unwrap().unwrap();
    h.store
        .compare_and_set(job.id, job.expected(), JobUpdate::claim(&job))
        .await
        .unwrap()
        .expect("claim succeeds")
}

/// Make the crashed worker's lease and record look long abandoned.
fn abandon(h: &Harness, job_id: Uuid) {
    h.broker.expire_leases();
    h.store.backdate(job_id, TimeDelta::seconds(3600));
}

#[tokio::test]
async fn test_submission_is_pending_then_succeeds() {
    let h = keyword_harness();
    let document = invoice_of_size(10 * 1024);

    let job = assert_ok!(h.controller.submit(&document).await);
    assert_eq!(job.state, JobState::Pending);
    assert_eq!(job.attempt_count, 0);
    assert_eq!(h.job(job.id).await.state, JobState::Pending);

    let outcomes = h.drain().await;
    assert_eq!(outcomes, vec![Outcome::Succeeded]);

    let done = h.job(job.id).await;
    assert_eq!(done.state, JobState::Succeeded);
    assert_eq!(done.attempt_count, 1);
    assert!(done.error.is_none());
    let result = done.result.expect("succeeded job carries a result");
    assert_eq!(result.label, DocumentClass::Invoice);
    assert!((0.0..=1.0).contains(&result.confidence.value()));
    assert_eq!(h.broker.inflight_count(), 0);
}

#[tokio::test]
async fn test_sample_documents_get_expected_labels() {
    let h = keyword_harness();
    let mut submitted = Vec::new();
    for (text, label) in LABELLED_SAMPLES {
        let job = h.controller.submit(text.as_bytes()).await.unwrap();
        submitted.push((job.id, *label));
    }

    h.drain().await;

    for (job_id, label) in submitted {
        let job = h.job(job_id).await;
        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.result.unwrap().label.to_string(), label);
    }
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let classifier = ScriptedClassifier::always(Step::Permanent);
    let h = Harness::new(classifier.clone());
    let job = h.controller.submit(INVOICE_TEXT.as_bytes()).await.unwrap();

    let outcomes = h.drain().await;
    assert_eq!(
        outcomes,
        vec![Outcome::Failed(ErrorKind::PermanentProcessingError)]
    );

    let failed = h.job(job.id).await;
    assert_eq!(failed.state, JobState::Failed);
    assert_eq!(failed.attempt_count, 1);
    assert!(failed.result.is_none());
    let error = failed.error.unwrap();
    assert_eq!(error.kind, ErrorKind::PermanentProcessingError);
    assert!(!error.message.is_empty());
    assert_eq!(classifier.calls(), 1);
}

#[tokio::test]
async fn test_transient_failures_retry_until_success() {
    let classifier = ScriptedClassifier::new([Step::Transient, Step::Transient, Step::Succeed]);
    let h = Harness::new(classifier.clone());
    let job = h.controller.submit(INVOICE_TEXT.as_bytes()).await.unwrap();

    let outcomes = h.drain().await;
    assert_eq!(outcomes.len(), 3);
    assert!(matches!(outcomes[0], Outcome::Requeued { attempt: 1, .. }));
    assert!(matches!(outcomes[1], Outcome::Requeued { attempt: 2, .. }));
    assert_eq!(outcomes[2], Outcome::Succeeded);

    let done = h.job(job.id).await;
    assert_eq!(done.state, JobState::Succeeded);
    assert_eq!(done.attempt_count, 3);
    assert_eq!(classifier.calls(), 3);
}

#[tokio::test]
async fn test_transient_failures_give_up_at_max_attempts() {
    let h = Harness::new(ScriptedClassifier::always(Step::Transient));
    let job = h.controller.submit(INVOICE_TEXT.as_bytes()).await.unwrap();

    let outcomes = h.drain().await;
    assert_eq!(
        outcomes.last(),
        Some(&Outcome::Failed(ErrorKind::TransientProcessingError))
    );

    let failed = h.job(job.id).await;
    assert_eq!(failed.state, JobState::Failed);
    assert_eq!(failed.attempt_count, h.config.retry.max_attempts());
    assert_eq!(
        failed.error.unwrap().kind,
        ErrorKind::TransientProcessingError
    );
}

#[tokio::test]
async fn test_requeue_waits_for_backoff() {
    let mut config = test_config();
    config.retry = document_classifier::jobs::retry::RetryPolicy::new(
        3,
        Duration::from_secs(60),
        Duration::from_secs(60),
    );
    let h = Harness::with_config(ScriptedClassifier::always(Step::Transient), config);
    let job = h.controller.submit(INVOICE_TEXT.as_bytes()).await.unwrap();

    let outcomes = h.drain().await;
    assert_eq!(
        outcomes,
        vec![Outcome::Requeued {
            attempt: 1,
            delay: Duration::from_secs(60)
        }]
    );

    let waiting = h.job(job.id).await;
    assert_eq!(waiting.state, JobState::Pending);
    assert_eq!(waiting.attempt_count, 1);
    assert_eq!(h.broker.inflight_count(), 1);
}

#[tokio::test]
async fn test_panicking_classifier_is_treated_as_transient() {
    let h = Harness::new(ScriptedClassifier::new([Step::Panic, Step::Succeed]));
    let job = h.controller.submit(INVOICE_TEXT.as_bytes()).await.unwrap();

    let outcomes = h.drain().await;
    assert!(matches!(outcomes[0], Outcome::Requeued { attempt: 1, .. }));
    assert_eq!(outcomes[1], Outcome::Succeeded);
    assert_eq!(h.job(job.id).await.attempt_count, 2);
}

#[tokio::test]
async fn test_processing_is_bounded_by_lease() {
    let mut config = test_config();
    config.lease_duration = Duration::from_millis(50);
    let h = Harness::with_config(ScriptedClassifier::new([Step::Hang, Step::Succeed]), config);
    let job = h.controller.submit(INVOICE_TEXT.as_bytes()).await.unwrap();

    let first = h.worker("w").poll_once().await.unwrap();
    assert!(matches!(first, Some(Outcome::Requeued { attempt: 1, .. })));

    h.drain().await;
    let done = h.job(job.id).await;
    assert_eq!(done.state, JobState::Succeeded);
    assert_eq!(done.attempt_count, 2);
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let h = keyword_harness();
    let missing = Uuid::new_v4();

    let err = assert_err!(h.controller.get_status(missing).await);
    assert!(matches!(err, StatusError::NotFound(id) if id == missing));
}

#[tokio::test]
async fn test_identical_submissions_get_distinct_jobs() {
    let h = keyword_harness();
    let first = h.controller.submit(INVOICE_TEXT.as_bytes()).await.unwrap();
    let second = h.controller.submit(INVOICE_TEXT.as_bytes()).await.unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(h.store.len(), 2);

    let outcomes = h.drain().await;
    assert_eq!(outcomes, vec![Outcome::Succeeded, Outcome::Succeeded]);
}

#[tokio::test]
async fn test_submission_rejects_empty_and_oversized_documents() {
    let h = keyword_harness();

    let empty = h.controller.submit(b"").await.unwrap_err();
    assert!(matches!(empty, SubmissionError::EmptyDocument));

    let too_big = vec![b'a'; h.config.max_document_size + 1];
    let err = h.controller.submit(&too_big).await.unwrap_err();
    assert!(matches!(err, SubmissionError::TooLarge { .. }));

    assert!(h.store.is_empty());
    assert!(h.documents.is_empty());
    assert_eq!(h.broker.ready_count(), 0);
}

#[tokio::test]
async fn test_submission_fails_when_stores_are_down() {
    let h = keyword_harness();

    h.documents.set_unavailable(true);
    let err = h.controller.submit(INVOICE_TEXT.as_bytes()).await.unwrap_err();
    assert!(matches!(err, SubmissionError::DocumentStore(_)));
    assert!(h.store.is_empty());
    h.documents.set_unavailable(false);

    h.store.set_unavailable(true);
    let err = h.controller.submit(INVOICE_TEXT.as_bytes()).await.unwrap_err();
    assert!(matches!(err, SubmissionError::JobStore(_)));
    assert_eq!(h.broker.ready_count(), 0);
    assert!(h.documents.is_empty(), "document of a rejected submission was kept");
}

#[tokio::test]
async fn test_crash_loop_ends_in_failure() {
    let h = Harness::new(ScriptedClassifier::always(Step::Succeed));
    let job = h.controller.submit(INVOICE_TEXT.as_bytes()).await.unwrap();
    let max = h.config.retry.max_attempts();

    for attempt in 1..=max {
        let claimed = claim_and_crash(&h).await;
        assert_eq!(claimed.attempt_count, attempt);
        abandon(&h, job.id);
    }

    let outcome = h.worker("survivor").poll_once().await.unwrap();
    assert_eq!(
        outcome,
        Some(Outcome::Failed(ErrorKind::TransientProcessingError))
    );

    let failed = h.job(job.id).await;
    assert_eq!(failed.state, JobState::Failed);
    assert_eq!(failed.attempt_count, max);
    assert_eq!(h.broker.inflight_count(), 0);
}

#[tokio::test]
async fn test_abandoned_job_is_reclaimed() {
    let h = Harness::new(ScriptedClassifier::always(Step::Succeed));
    let job = h.controller.submit(INVOICE_TEXT.as_bytes()).await.unwrap();

    claim_and_crash(&h).await;
    abandon(&h, job.id);

    let outcomes = h.drain().await;
    assert_eq!(outcomes, vec![Outcome::Succeeded]);
    assert_eq!(h.job(job.id).await.attempt_count, 2);
}

#[tokio::test]
async fn test_duplicate_delivery_defers_while_job_runs_elsewhere() {
    let h = Harness::new(ScriptedClassifier::always(Step::Succeed));
    let job = h.controller.submit(INVOICE_TEXT.as_bytes()).await.unwrap();
    h.broker.publish(&JobMessage::new(job.id)).await.unwrap();

    claim_and_crash(&h).await;

    let outcome = h.worker("second").poll_once().await.unwrap();
    assert_eq!(outcome, Some(Outcome::Deferred));

    let running = h.job(job.id).await;
    assert_eq!(running.state, JobState::Running);
    assert_eq!(running.attempt_count, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_have_one_winner() {
    let h = keyword_harness();
    let job = h.controller.submit(INVOICE_TEXT.as_bytes()).await.unwrap();

    let mut claims = Vec::new();
    for _ in 0..8 {
        let store = h.store.clone();
        let job = job.clone();
        claims.push(tokio::spawn(async move {
            store
                .compare_and_set(job.id, job.expected(), JobUpdate::claim(&job))
                .await
                .unwrap()
        }));
    }

    let mut winners = 0;
    for claim in claims {
        if claim.await.unwrap().is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(h.job(job.id).await.attempt_count, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_workers_process_each_job_once() {
    let classifier = ScriptedClassifier::always(Step::Succeed);
    let h = Harness::new(classifier.clone());
    let mut ids = Vec::new();
    for _ in 0..20 {
        let job = h.controller.submit(INVOICE_TEXT.as_bytes()).await.unwrap();
        // A duplicate message for every job.
        h.broker.publish(&JobMessage::new(job.id)).await.unwrap();
        ids.push(job.id);
    }

    let shutdown = CancellationToken::new();
    let mut tasks = Vec::new();
    for n in 0..4 {
        let worker = h.worker(&format!("worker-{n}"));
        let shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move { worker.run(shutdown).await }));
    }

    for _ in 0..500 {
        let mut finished = 0;
        for id in &ids {
            if h.job(*id).await.state.is_terminal() {
                finished += 1;
            }
        }
        if finished == ids.len() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    shutdown.cancel();
    for task in tasks {
        task.await.unwrap();
    }

    for id in ids {
        let job = h.job(id).await;
        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.attempt_count, 1);
    }
    assert_eq!(classifier.calls(), 20);
}

#[tokio::test]
async fn test_terminal_state_survives_redelivery() {
    let classifier = ScriptedClassifier::always(Step::Succeed);
    let h = Harness::new(classifier.clone());
    let job = h.controller.submit(INVOICE_TEXT.as_bytes()).await.unwrap();
    h.drain().await;
    let done = h.job(job.id).await;

    h.broker.publish(&JobMessage::new(job.id)).await.unwrap();
    let outcomes = h.drain().await;
    assert_eq!(outcomes, vec![Outcome::Discarded]);

    let after = h.job(job.id).await;
    assert_eq!(after.state, JobState::Succeeded);
    assert_eq!(after.attempt_count, done.attempt_count);
    assert_eq!(after.result, done.result);
    assert_eq!(classifier.calls(), 1);
}

#[tokio::test]
async fn test_message_for_unknown_job_is_discarded() {
    let h = keyword_harness();
    h.broker.publish(&JobMessage::new(Uuid::new_v4())).await.unwrap();

    assert_eq!(h.drain().await, vec![Outcome::Discarded]);
    assert_eq!(h.broker.inflight_count(), 0);
}

#[tokio::test]
async fn test_missing_document_fails_permanently() {
    let h = keyword_harness();
    let job = Job::new("documents/never-uploaded");
    h.store.create(&job).await.unwrap();
    h.broker.publish(&JobMessage::new(job.id)).await.unwrap();

    assert_eq!(
        h.drain().await,
        vec![Outcome::Failed(ErrorKind::PermanentProcessingError)]
    );
    assert_eq!(h.job(job.id).await.attempt_count, 1);
}

#[tokio::test]
async fn test_store_outage_leaves_message_for_redelivery() {
    let h = keyword_harness();
    let job = h.controller.submit(INVOICE_TEXT.as_bytes()).await.unwrap();

    h.store.set_unavailable(true);
    assert_err!(h.worker("w").poll_once().await);
    assert_eq!(h.broker.inflight_count(), 1);

    h.store.set_unavailable(false);
    h.broker.expire_leases();
    assert_eq!(h.drain().await, vec![Outcome::Succeeded]);
    assert_eq!(h.job(job.id).await.state, JobState::Succeeded);
}

#[tokio::test]
async fn test_sweep_recovers_unpublished_submission() {
    let h = keyword_harness();

    h.broker.set_unavailable(true);
    let job = h.controller.submit(INVOICE_TEXT.as_bytes()).await.unwrap();
    assert_eq!(job.state, JobState::Pending);
    h.broker.set_unavailable(false);
    assert_eq!(h.broker.ready_count(), 0);

    // Not stale yet.
    assert_eq!(h.reconciler().sweep_once().await.unwrap(), 0);

    h.store.backdate(job.id, TimeDelta::seconds(120));
    assert_eq!(h.reconciler().sweep_once().await.unwrap(), 1);
    assert_eq!(h.broker.ready_count(), 1);

    // The touch keeps the next pass from publishing it again.
    assert_eq!(h.reconciler().sweep_once().await.unwrap(), 0);

    assert_eq!(h.drain().await, vec![Outcome::Succeeded]);
    assert_eq!(h.job(job.id).await.state, JobState::Succeeded);
}

#[tokio::test]
async fn test_sweep_recovers_lost_running_job() {
    let h = Harness::new(ScriptedClassifier::always(Step::Succeed));
    let job = h.controller.submit(INVOICE_TEXT.as_bytes()).await.unwrap();

    // Worker died and the broker lost its message.
    let delivery = h.broker.receive(h.config.lease_duration).await.unwrap().unwrap();
    let current = h.store.read(job.id).await.unwrap().unwrap();
    h.store
        .compare_and_set(job.id, current.expected(), JobUpdate::claim(&current))
        .await
        .unwrap();
    h.broker.ack(&delivery.handle).await.unwrap();
    h.store.backdate(job.id, TimeDelta::seconds(3600));

    assert_eq!(h.reconciler().sweep_once().await.unwrap(), 1);
    let released = h.job(job.id).await;
    assert_eq!(released.state, JobState::Pending);
    assert_eq!(released.attempt_count, 1);

    assert_eq!(h.drain().await, vec![Outcome::Succeeded]);

    let done = h.job(job.id).await;
    assert_eq!(done.state, JobState::Succeeded);
    assert_eq!(done.attempt_count, 2);
}

#[tokio::test]
async fn test_sweep_leaves_running_job_within_lease() {
    let mut config = test_config();
    config.staleness_threshold = Duration::from_secs(1);
    config.lease_duration = Duration::from_secs(600);
    let h = Harness::with_config(ScriptedClassifier::always(Step::Succeed), config);
    let job = h.controller.submit(INVOICE_TEXT.as_bytes()).await.unwrap();

    claim_and_crash(&h).await;
    h.store.backdate(job.id, TimeDelta::seconds(5));

    assert_eq!(h.reconciler().sweep_once().await.unwrap(), 0);
    assert_eq!(h.job(job.id).await.state, JobState::Running);
}

#[tokio::test]
async fn test_sweep_ignores_terminal_jobs() {
    let h = keyword_harness();
    let job = h.controller.submit(INVOICE_TEXT.as_bytes()).await.unwrap();
    h.drain().await;
    h.store.backdate(job.id, TimeDelta::seconds(3600));

    assert_eq!(h.reconciler().sweep_once().await.unwrap(), 0);
    assert_eq!(h.broker.ready_count(), 0);
}

#[tokio::test]
async fn test_cancel_pending_job() {
    let classifier = ScriptedClassifier::always(Step::Succeed);
    let h = Harness::new(classifier.clone());
    let job = h.controller.submit(INVOICE_TEXT.as_bytes()).await.unwrap();

    let cancelled = assert_ok!(h.controller.cancel(job.id).await);
    assert_eq!(cancelled.state, JobState::Failed);
    assert_eq!(cancelled.error.unwrap().kind, ErrorKind::Cancelled);

    assert_eq!(h.drain().await, vec![Outcome::Discarded]);
    assert_eq!(classifier.calls(), 0);

    let err = h.controller.cancel(job.id).await.unwrap_err();
    assert!(matches!(
        err,
        CancelError::AlreadyTerminal {
            state: JobState::Failed,
            ..
        }
    ));
}

#[tokio::test]
async fn test_cancel_unknown_or_finished_job() {
    let h = keyword_harness();

    let err = h.controller.cancel(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, CancelError::NotFound(_)));

    let job = h.controller.submit(INVOICE_TEXT.as_bytes()).await.unwrap();
    h.drain().await;
    let err = h.controller.cancel(job.id).await.unwrap_err();
    assert!(matches!(
        err,
        CancelError::AlreadyTerminal {
            state: JobState::Succeeded,
            ..
        }
    ));
}

#[tokio::test]
async fn test_cancel_wins_over_running_worker() {
    let h = Harness::new(ScriptedClassifier::always(Step::Succeed));
    let job = h.controller.submit(INVOICE_TEXT.as_bytes()).await.unwrap();
    h.broker.publish(&JobMessage::new(job.id)).await.unwrap();

    claim_and_crash(&h).await;
    h.controller.cancel(job.id).await.unwrap();
    abandon(&h, job.id);

    let outcomes = h.drain().await;
    assert!(outcomes.iter().all(|o| *o == Outcome::Discarded), "{outcomes:?}");
    let job = h.job(job.id).await;
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.error.unwrap().kind, ErrorKind::Cancelled);
}

#[tokio::test]
async fn test_wait_until_ready_returns_once_backends_answer() {
    let h = keyword_harness();
    h.broker.set_unavailable(true);
    let shutdown = CancellationToken::new();

    let broker = h.broker.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        broker.set_unavailable(false);
    });

    let mut config = test_config();
    config.retry = document_classifier::jobs::retry::RetryPolicy::new(
        3,
        Duration::from_millis(5),
        Duration::from_millis(20),
    );
    let ready = tokio::time::timeout(
        Duration::from_secs(5),
        wait_until_ready(&h.store, &h.broker, &config, &shutdown),
    )
    .await
    .expect("readiness wait finished");
    assert!(ready);
}

#[tokio::test]
async fn test_wait_until_ready_stops_on_shutdown() {
    let h = keyword_harness();
    h.store.set_unavailable(true);
    let shutdown = CancellationToken::new();
    shutdown.cancel();

    assert!(!wait_until_ready(&h.store, &h.broker, &h.config, &shutdown).await);
}
