//! Test helper utilities: an in-memory pipeline harness, a scripted
//! classifier, and HTTP helpers for talking to a running API server.
#![allow(dead_code)]

use async_trait::async_trait;
use document_classifier::{
    app_state::Backends,
    config::PipelineConfig,
    jobs::{
        controller::JobController,
        error::{PermanentReason, ProcessingError},
        retry::RetryPolicy,
        sweep::Reconciler,
        worker::{Outcome, Worker, WorkerDeps},
    },
    models::{
        api::{JobStatusResponse, SubmitResponse},
        classification::{Classification, Confidence, Content, DocumentClass},
        job::Job,
    },
    services::{
        classifier::Classifier,
        extract::DocumentExtractor,
        memory::{InMemoryBroker, InMemoryJobStore, InMemoryObjectStore},
    },
};
use reqwest::multipart;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

/// One scripted classifier response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    Succeed,
    Transient,
    Permanent,
    Panic,
    Hang,
}

/// Classifier that replays a fixed sequence of responses. The last step
/// repeats once the script runs out.
pub struct ScriptedClassifier {
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
}

impl ScriptedClassifier {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into_iter().collect()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn always(step: Step) -> Arc<Self> {
        Self::new([step])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Step {
        let mut steps = self.steps.lock().unwrap();
        if steps.len() > 1 {
            steps.pop_front().unwrap()
        } else {
            steps.front().copied().unwrap_or(Step::Succeed)
        }
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn classify(&self, _content: &Content) -> Result<Classification, ProcessingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.next_step() {
            Step::Succeed => Ok(Classification::new(
                DocumentClass::Invoice,
                Confidence::new(0.9),
            )),
            Step::Transient => Err(ProcessingError::transient("model backend timed out")),
            Step::Permanent => Err(ProcessingError::permanent(
                PermanentReason::UnsupportedDocument,
                "document layout not recognized",
            )),
            Step::Panic => panic!("classifier crashed"),
            Step::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

/// Pipeline settings for tests: three attempts, no backoff delay, and a
/// lease long enough that nothing expires unless a test says so.
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        retry: RetryPolicy::new(3, Duration::ZERO, Duration::ZERO),
        lease_duration: Duration::from_secs(30),
        staleness_threshold: Duration::from_secs(60),
        max_document_size: 64 * 1024,
        poll_interval: Duration::from_millis(10),
        sweep_interval: Duration::from_millis(20),
        sweep_batch_size: 100,
    }
}

/// Controller, workers and sweep wired to in-memory backends.
pub struct Harness {
    pub store: InMemoryJobStore,
    pub broker: InMemoryBroker,
    pub documents: InMemoryObjectStore,
    pub controller: JobController,
    pub config: PipelineConfig,
    deps: WorkerDeps,
}

impl Harness {
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self::with_config(classifier, test_config())
    }

    pub fn with_config(classifier: Arc<dyn Classifier>, config: PipelineConfig) -> Self {
        let store = InMemoryJobStore::default();
        let broker = InMemoryBroker::default();
        let documents = InMemoryObjectStore::default();
        let backends = wire_backends(&store, &broker, &documents);

        let controller = JobController::new(
            backends.store.clone(),
            backends.broker.clone(),
            backends.documents.clone(),
            &config,
        );
        let deps = WorkerDeps {
            store: backends.store,
            broker: backends.broker,
            documents: backends.documents,
            extractor: Arc::new(DocumentExtractor::text_only()),
            classifier,
        };

        Self {
            store,
            broker,
            documents,
            controller,
            config,
            deps,
        }
    }

    pub fn backends(&self) -> Backends {
        wire_backends(&self.store, &self.broker, &self.documents)
    }

    pub fn worker(&self, name: &str) -> Worker {
        Worker::new(name, self.deps.clone(), self.config.clone())
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            self.deps.store.clone(),
            self.deps.broker.clone(),
            self.config.clone(),
        )
    }

    /// Poll with a single worker until no message is visible.
    pub async fn drain(&self) -> Vec<Outcome> {
        let worker = self.worker("drain");
        let mut outcomes = Vec::new();
        for _ in 0..100 {
            match worker.poll_once().await.expect("in-memory backends are up") {
                Some(outcome) => outcomes.push(outcome),
                None => return outcomes,
            }
        }
        panic!("queue never drained: {outcomes:?}");
    }

    pub async fn job(&self, job_id: Uuid) -> Job {
        self.controller
            .get_status(job_id)
            .await
            .expect("job exists")
    }
}

fn wire_backends(
    store: &InMemoryJobStore,
    broker: &InMemoryBroker,
    documents: &InMemoryObjectStore,
) -> Backends {
    Backends {
        store: Arc::new(store.clone()),
        broker: Arc::new(broker.clone()),
        documents: Arc::new(documents.clone()),
    }
}

/// Upload a document to the submit endpoint
pub async fn submit_document(
    client: &reqwest::Client,
    base_url: &str,
    document: Vec<u8>,
) -> Result<SubmitResponse, Box<dyn std::error::Error>> {
    let form = multipart::Form::new().part(
        "file",
        multipart::Part::bytes(document)
            .file_name("document.txt")
            .mime_str("text/plain")?,
    );

    let response = client
        .post(format!("{}/api/v1/jobs", base_url))
        .multipart(form)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await?;
        return Err(format!("Upload failed with status {}: {}", status, error_text).into());
    }

    Ok(response.json::<SubmitResponse>().await?)
}

/// Poll job status until it reaches a terminal state (with timeout)
pub async fn poll_job_status(
    client: &reqwest::Client,
    base_url: &str,
    job_id: Uuid,
    timeout: Duration,
) -> Result<JobStatusResponse, Box<dyn std::error::Error>> {
    let interval = Duration::from_millis(50);
    let max_polls = (timeout.as_millis() / interval.as_millis()).max(1);

    for _ in 0..max_polls {
        let response = client
            .get(format!("{}/api/v1/jobs/{}", base_url, job_id))
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(format!("Status check failed: {}", error_text).into());
        }

        let status = response.json::<JobStatusResponse>().await?;
        if status.state.is_terminal() {
            return Ok(status);
        }
        sleep(interval).await;
    }

    Err(format!("Job {} did not finish within {:?}", job_id, timeout).into())
}
