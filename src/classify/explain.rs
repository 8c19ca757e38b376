//! The explanation collaborator: free-text reasons and next steps for
//! anomalies, produced by an external text generator.
//!
//! Nothing here affects the anomaly decision. Callers always have a
//! fallback string when the generator is missing, slow or broken.

use crossbeam_channel::{RecvTimeoutError, SendTimeoutError, Sender};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::common::error::ExplainError;
use crate::common::types::AnomalyFlag;

/// Text used in place of an explanation that could not be generated.
pub const FALLBACK_TEXT: &str = "LLM response unavailable";

/// Default time allowed for one explanation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of threads calling the text generator.
pub const DEFAULT_WORKERS: usize = 4;

/// What the explainer is asked to write.
#[derive(Debug, Clone, PartialEq)]
pub enum ExplanationRequest {
    /// Why the series was flagged.
    AnomalyReason { balance_diffs: Vec<f64> },
    /// What the reconciler should do next.
    NextSteps { anomaly: AnomalyFlag, balance_diffs: Vec<f64> },
}

impl ExplanationRequest {
    /// The prompt handed to a text-generation backend.
    pub fn prompt(&self) -> String {
        match self {
            ExplanationRequest::AnomalyReason { balance_diffs } => format!(
                "Analyze balance history and provide the reason behind the anomaly. Using: {:?}. IN 8-10 WORDS CRISP AND CLEAR",
                balance_diffs
            ),
            ExplanationRequest::NextSteps { anomaly, .. } => format!(
                "Analyze balance history and provide next steps. Anomaly detected: {}. IN 8-10 WORDS CRISP AND CLEAR",
                anomaly
            ),
        }
    }
}

/// A text generator for anomaly explanations.
pub trait Explainer: Send + Sync {
    fn explain(&self, request: &ExplanationRequest) -> Result<String, ExplainError>;
}

/// Stand-in used when no text generator is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unavailable;

impl Explainer for Unavailable {
    fn explain(&self, _request: &ExplanationRequest) -> Result<String, ExplainError> {
        Err(ExplainError::Unavailable("no explainer configured".to_string()))
    }
}

/// Settings handed to a text-generation backend when it is built.
#[derive(Clone)]
pub struct ExplainerConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f64,
    pub timeout: Duration,
    pub fallback: String,
    /// Threads calling the backend. A hung backend can hold at most this many.
    pub workers: usize,
}

impl Default for ExplainerConfig {
    fn default() -> Self {
        ExplainerConfig {
            api_key: None,
            model: "llama-3.3-70b-versatile".to_string(),
            temperature: 0.0,
            timeout: DEFAULT_TIMEOUT,
            fallback: FALLBACK_TEXT.to_string(),
            workers: DEFAULT_WORKERS,
        }
    }
}

impl fmt::Debug for ExplainerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExplainerConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("timeout", &self.timeout)
            .field("fallback", &self.fallback)
            .field("workers", &self.workers)
            .finish()
    }
}

struct Job {
    request: ExplanationRequest,
    deadline: Instant,
    reply: Sender<Result<String, ExplainError>>,
}

/// Runs another explainer on a fixed pool of worker threads and gives up
/// after a timeout.
///
/// A request that times out keeps its worker busy until the backend returns;
/// its answer is dropped. Requests still queued past their deadline are
/// skipped. With every worker stuck, callers time out without new threads
/// being spawned. Workers exit once the explainer is dropped and their
/// current call returns.
pub struct TimeBoundedExplainer {
    jobs: Sender<Job>,
    timeout: Duration,
}

impl TimeBoundedExplainer {
    pub fn new(inner: Arc<dyn Explainer>, config: &ExplainerConfig) -> Self {
        let workers = config.workers.max(1);
        let (jobs, queue) = crossbeam_channel::bounded::<Job>(workers);

        for id in 0..workers {
            let inner = Arc::clone(&inner);
            let queue = queue.clone();
            let spawned = thread::Builder::new()
                .name(format!("reconstats-explainer-{}", id))
                .spawn(move || {
                    for job in queue.iter() {
                        if Instant::now() >= job.deadline {
                            continue;
                        }
                        let answer = catch_unwind(AssertUnwindSafe(|| inner.explain(&job.request)))
                            .unwrap_or_else(|_| Err(ExplainError::Failed("explainer panicked".to_string())));
                        // The caller may have timed out already
                        let _ = job.reply.send(answer);
                    }
                });
            if let Err(e) = spawned {
                tracing::warn!(error = %e, worker = id, "could not start explainer worker");
            }
        }

        TimeBoundedExplainer {
            jobs,
            timeout: config.timeout,
        }
    }
}

impl Explainer for TimeBoundedExplainer {
    fn explain(&self, request: &ExplanationRequest) -> Result<String, ExplainError> {
        let deadline = Instant::now() + self.timeout;
        let (reply, answer) = crossbeam_channel::bounded(1);
        let job = Job {
            request: request.clone(),
            deadline,
            reply,
        };

        match self.jobs.send_timeout(job, self.timeout) {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => return Err(ExplainError::TimedOut(self.timeout)),
            Err(SendTimeoutError::Disconnected(_)) => {
                return Err(ExplainError::Unavailable("no explainer workers running".to_string()))
            }
        }

        match answer.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(answer) => answer,
            Err(RecvTimeoutError::Timeout) => Err(ExplainError::TimedOut(self.timeout)),
            Err(RecvTimeoutError::Disconnected) => {
                // Skipped after its deadline while queued
                Err(ExplainError::TimedOut(self.timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo;

    impl Explainer for Echo {
        fn explain(&self, request: &ExplanationRequest) -> Result<String, ExplainError> {
            Ok(request.prompt())
        }
    }

    struct Slow(Duration);

    impl Explainer for Slow {
        fn explain(&self, _request: &ExplanationRequest) -> Result<String, ExplainError> {
            thread::sleep(self.0);
            Ok("too late".to_string())
        }
    }

    struct Panics;

    impl Explainer for Panics {
        fn explain(&self, _request: &ExplanationRequest) -> Result<String, ExplainError> {
            panic!("backend crashed");
        }
    }

    fn reason_request() -> ExplanationRequest {
        ExplanationRequest::AnomalyReason {
            balance_diffs: vec![400.0, 12.5, -3.0],
        }
    }

    fn config(timeout: Duration) -> ExplainerConfig {
        ExplainerConfig {
            timeout,
            ..ExplainerConfig::default()
        }
    }

    #[test]
    fn test_prompts() {
        assert_eq!(
            reason_request().prompt(),
            "Analyze balance history and provide the reason behind the anomaly. Using: [400.0, 12.5, -3.0]. IN 8-10 WORDS CRISP AND CLEAR"
        );
        let next = ExplanationRequest::NextSteps {
            anomaly: AnomalyFlag::Yes,
            balance_diffs: vec![1.0],
        };
        assert_eq!(
            next.prompt(),
            "Analyze balance history and provide next steps. Anomaly detected: Yes. IN 8-10 WORDS CRISP AND CLEAR"
        );
    }

    #[test]
    fn test_unavailable_always_errors() {
        assert!(matches!(
            Unavailable.explain(&reason_request()),
            Err(ExplainError::Unavailable(_))
        ));
    }

    #[test]
    fn test_time_bounded_passes_answer_through() {
        let explainer = TimeBoundedExplainer::new(Arc::new(Echo), &config(Duration::from_secs(5)));
        let answer = explainer.explain(&reason_request()).unwrap();
        assert!(answer.contains("reason behind the anomaly"));
    }

    #[test]
    fn test_time_bounded_times_out() {
        let timeout = Duration::from_millis(20);
        let explainer = TimeBoundedExplainer::new(
            Arc::new(Slow(Duration::from_millis(500))),
            &config(timeout),
        );
        assert_eq!(
            explainer.explain(&reason_request()),
            Err(ExplainError::TimedOut(timeout))
        );
    }

    #[test]
    fn test_time_bounded_survives_panicking_backend() {
        let explainer = TimeBoundedExplainer::new(Arc::new(Panics), &config(Duration::from_secs(5)));
        assert!(matches!(
            explainer.explain(&reason_request()),
            Err(ExplainError::Failed(_))
        ));
    }

    /// Blocks until `release` is dropped, counting calls that got started.
    struct Hung {
        started: Arc<AtomicUsize>,
        release: crossbeam_channel::Receiver<()>,
    }

    impl Explainer for Hung {
        fn explain(&self, _request: &ExplanationRequest) -> Result<String, ExplainError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            let _ = self.release.recv();
            Ok("released".to_string())
        }
    }

    #[test]
    fn test_hung_backend_holds_at_most_the_worker_count() {
        let started = Arc::new(AtomicUsize::new(0));
        let (release_tx, release) = crossbeam_channel::bounded::<()>(0);
        let config = ExplainerConfig {
            timeout: Duration::from_millis(20),
            workers: 2,
            ..ExplainerConfig::default()
        };
        let explainer = TimeBoundedExplainer::new(
            Arc::new(Hung {
                started: Arc::clone(&started),
                release,
            }),
            &config,
        );

        for _ in 0..10 {
            assert!(matches!(
                explainer.explain(&reason_request()),
                Err(ExplainError::TimedOut(_))
            ));
        }
        assert!(
            started.load(Ordering::SeqCst) <= 2,
            "{} backend calls started",
            started.load(Ordering::SeqCst)
        );
        drop(release_tx);
    }

    #[test]
    fn test_pool_serves_sequential_requests() {
        let config = ExplainerConfig {
            timeout: Duration::from_secs(5),
            workers: 1,
            ..ExplainerConfig::default()
        };
        let explainer = TimeBoundedExplainer::new(Arc::new(Echo), &config);
        for _ in 0..5 {
            assert!(explainer.explain(&reason_request()).is_ok());
        }
    }

    #[test]
    fn test_config_debug_redacts_key() {
        let config = ExplainerConfig {
            api_key: Some("secret-key".to_string()),
            ..ExplainerConfig::default()
        };
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("secret-key"));
        assert!(rendered.contains("<redacted>"));
    }
}
