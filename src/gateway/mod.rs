//! Label detection behind a narrow trait, plus the timeout/retry policy
//! applied to every call.

mod credentials;
mod vision;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::{config::Config, error::GatewayError, models::AnnotationResult};

pub use credentials::Credentials;
pub use vision::VisionClient;

/// Anything that can turn image bytes into ranked labels.
#[async_trait]
pub trait LabelDetector: Send + Sync {
    async fn detect_labels(&self, image: &[u8]) -> Result<AnnotationResult, GatewayError>;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: config.request_timeout,
            max_retries: config.max_retries,
            base_delay: config.retry_base_delay,
        }
    }

    fn backoff(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(retry))
    }
}

/// Applies a timeout to every detector call and retries transient failures.
pub struct Annotator {
    detector: Arc<dyn LabelDetector>,
    policy: RetryPolicy,
}

impl Annotator {
    pub fn new(detector: Arc<dyn LabelDetector>, policy: RetryPolicy) -> Self {
        Self { detector, policy }
    }

    pub async fn annotate(&self, image: &[u8]) -> Result<AnnotationResult, GatewayError> {
        let mut retry = 0;
        loop {
            let attempt =
                tokio::time::timeout(self.policy.timeout, self.detector.detect_labels(image))
                    .await
                    .unwrap_or_else(|_| Err(GatewayError::Timeout(self.policy.timeout)));

            match attempt {
                Ok(result) => {
                    tracing::debug!(labels = result.len(), retry, "labels detected");
                    return Ok(result);
                }
                Err(err) if err.is_retryable() && retry < self.policy.max_retries => {
                    let delay = self.policy.backoff(retry);
                    tracing::warn!(error = %err, retry, ?delay, "label detection failed, retrying");
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(err) => {
                    tracing::warn!(error = %err, kind = ?err.kind(), retry, "label detection failed");
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
        time::Duration,
    };

    use super::*;

    type Outcome = Result<AnnotationResult, GatewayError>;

    /// Replays scripted outcomes, then answers with `fallback`, counting calls.
    pub struct StubDetector {
        script: Mutex<VecDeque<Outcome>>,
        fallback: Box<dyn Fn() -> Outcome + Send + Sync>,
        delay: Option<Duration>,
        calls: AtomicUsize,
    }

    /// Serves `router` on an ephemeral local port and returns its base URL.
    pub async fn spawn_server(router: axum::Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    impl StubDetector {
        pub fn returning(result: AnnotationResult) -> Self {
            Self::scripted(Vec::new(), move || Ok(result.clone()))
        }

        pub fn failing(fallback: impl Fn() -> Outcome + Send + Sync + 'static) -> Self {
            Self::scripted(Vec::new(), fallback)
        }

        pub fn scripted(
            script: Vec<Outcome>,
            fallback: impl Fn() -> Outcome + Send + Sync + 'static,
        ) -> Self {
            Self {
                script: Mutex::new(script.into()),
                fallback: Box::new(fallback),
                delay: None,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LabelDetector for StubDetector {
        async fn detect_labels(&self, _image: &[u8]) -> Result<AnnotationResult, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| (self.fallback)())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{testing::StubDetector, *};
    use crate::models::Label;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(200),
            max_retries,
            base_delay: Duration::from_millis(1),
        }
    }

    fn unavailable() -> Result<AnnotationResult, GatewayError> {
        Err(GatewayError::from_status(503, "backend unavailable"))
    }

    fn denied() -> Result<AnnotationResult, GatewayError> {
        Err(GatewayError::from_status(403, "permission denied"))
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let labels = AnnotationResult::new(vec![Label::new("Tree", 0.9)]);
        let stub = Arc::new(StubDetector::scripted(
            vec![unavailable(), unavailable(), Ok(labels.clone())],
            unavailable,
        ));
        let annotator = Annotator::new(stub.clone(), policy(2));

        assert_eq!(annotator.annotate(b"img").await.unwrap(), labels);
        assert_eq!(stub.calls(), 3);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let stub = Arc::new(StubDetector::failing(unavailable));
        let annotator = Annotator::new(stub.clone(), policy(2));

        let err = annotator.annotate(b"img").await.unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable { status: 503, .. }));
        assert_eq!(stub.calls(), 3);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let stub = Arc::new(StubDetector::failing(denied));
        let annotator = Annotator::new(stub.clone(), policy(5));

        let err = annotator.annotate(b"img").await.unwrap_err();
        assert!(matches!(err, GatewayError::Unauthorized { .. }));
        assert_eq!(stub.calls(), 1);
    }

    #[tokio::test]
    async fn slow_detector_times_out() {
        let stub = Arc::new(
            StubDetector::returning(AnnotationResult::default()).with_delay(Duration::from_secs(5)),
        );
        let annotator = Annotator::new(stub.clone(), policy(0));

        let err = annotator.annotate(b"img").await.unwrap_err();
        assert!(matches!(err, GatewayError::Timeout(_)));
        assert_eq!(stub.calls(), 1);
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy {
            timeout: Duration::from_secs(1),
            max_retries: 3,
            base_delay: Duration::from_millis(250),
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(250));
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
    }
}
