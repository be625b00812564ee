//! Vision-service interaction: one page image in, one extraction result out.
//!
//! [`VisionService`] is the boundary to the external model: it takes a PNG
//! and the instruction text and returns the raw reply. [`LlmVisionService`]
//! implements it on top of any `edgequake-llm` provider. [`ExtractionClient`]
//! adds what the pipeline needs around a service: optional per-call timeout,
//! optional retry with exponential backoff, and response normalisation.
//!
//! Retries apply to [`ServiceError`] only. A reply that does not parse is the
//! model's answer, not a transport hiccup, and asking again would just spend
//! tokens.

use crate::config::PipelineConfig;
use crate::error::{IntakeError, ServiceError};
use crate::pipeline::{encode, normalize};
use crate::pipeline::render::PageImage;
use crate::record::ExtractionResult;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Upper bound on the wait between two attempts.
pub const MAX_RETRY_BACKOFF_MS: u64 = 30_000;

/// An external service that reads a page image according to an instruction.
#[async_trait]
pub trait VisionService: Send + Sync {
    /// Label used in logs and error messages.
    fn name(&self) -> &str;

    /// Send one image with the instruction text; return the raw reply text.
    async fn analyze(&self, page: &PageImage, instruction: &str) -> Result<String, ServiceError>;
}

/// [`VisionService`] backed by an `edgequake-llm` chat provider.
pub struct LlmVisionService {
    provider: Arc<dyn LLMProvider>,
    label: String,
    options: CompletionOptions,
}

impl LlmVisionService {
    pub fn new(provider: Arc<dyn LLMProvider>, label: impl Into<String>, config: &PipelineConfig) -> Self {
        Self {
            provider,
            label: label.into(),
            options: build_options(config),
        }
    }
}

#[async_trait]
impl VisionService for LlmVisionService {
    fn name(&self) -> &str {
        &self.label
    }

    /// The request is a single user turn carrying the page image and the
    /// instruction text together.
    async fn analyze(&self, page: &PageImage, instruction: &str) -> Result<String, ServiceError> {
        let messages = vec![ChatMessage::user_with_images(
            instruction,
            vec![encode::to_image_data(page)],
        )];

        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| ServiceError::Call {
                provider: self.label.clone(),
                message: e.to_string(),
            })?;

        debug!(
            "Page {}: {} input tokens, {} output tokens",
            page.page_num, response.prompt_tokens, response.completion_tokens
        );
        Ok(response.content)
    }
}

/// Build `CompletionOptions` from the pipeline config.
fn build_options(config: &PipelineConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

/// Exponential backoff for the given 1-based attempt, capped at
/// [`MAX_RETRY_BACKOFF_MS`].
fn retry_delay_ms(base_ms: u64, attempt: u32) -> u64 {
    let factor = 2u64
        .checked_pow(attempt.saturating_sub(1))
        .unwrap_or(u64::MAX);
    base_ms.saturating_mul(factor).min(MAX_RETRY_BACKOFF_MS)
}

/// Drives a [`VisionService`] for single pages.
#[derive(Clone)]
pub struct ExtractionClient {
    service: Arc<dyn VisionService>,
    instruction: Arc<str>,
    max_retries: u32,
    retry_backoff_ms: u64,
    api_timeout_secs: Option<u64>,
}

impl ExtractionClient {
    pub fn new(service: Arc<dyn VisionService>, config: &PipelineConfig) -> Self {
        Self {
            service,
            instruction: Arc::from(config.extraction_prompt.as_str()),
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            api_timeout_secs: config.api_timeout_secs,
        }
    }

    pub fn service_name(&self) -> &str {
        self.service.name()
    }

    /// Extract the structured fields from one page.
    ///
    /// # Errors
    /// [`IntakeError::Service`] when every attempt failed (the last cause is
    /// kept), [`IntakeError::MalformedResponse`] when the reply is not a JSON
    /// object.
    pub async fn extract(&self, page: &PageImage) -> Result<ExtractionResult, IntakeError> {
        let start = Instant::now();
        let raw = self.call_with_retries(page).await?;

        let result = normalize::normalize_response(&raw).map_err(|source| {
            IntakeError::MalformedResponse {
                page: page.page_num,
                source,
            }
        })?;

        debug!(
            "Page {}: {} fields in {:?}",
            page.page_num,
            result.len(),
            start.elapsed()
        );
        Ok(result)
    }

    async fn call_with_retries(&self, page: &PageImage) -> Result<String, IntakeError> {
        let mut attempt: u32 = 0;
        loop {
            match self.call_once(page).await {
                Ok(raw) => return Ok(raw),
                Err(source) if attempt < self.max_retries => {
                    attempt += 1;
                    let backoff = retry_delay_ms(self.retry_backoff_ms, attempt);
                    warn!(
                        "Page {}: {}; retry {}/{} after {}ms",
                        page.page_num, source, attempt, self.max_retries, backoff
                    );
                    sleep(Duration::from_millis(backoff)).await;
                }
                Err(source) => {
                    return Err(IntakeError::Service {
                        page: page.page_num,
                        source,
                    })
                }
            }
        }
    }

    async fn call_once(&self, page: &PageImage) -> Result<String, ServiceError> {
        let call = self.service.analyze(page, &self.instruction);
        match self.api_timeout_secs {
            Some(secs) => timeout(Duration::from_secs(secs), call)
                .await
                .map_err(|_| ServiceError::Timeout { secs })?,
            None => call.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Replays canned replies in order.
    struct Scripted {
        replies: Mutex<VecDeque<Result<String, ServiceError>>>,
        instructions: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String, ServiceError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                instructions: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl VisionService for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn analyze(&self, _page: &PageImage, instruction: &str) -> Result<String, ServiceError> {
            self.instructions.lock().unwrap().push(instruction.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("no scripted reply left")
        }
    }

    fn page() -> PageImage {
        PageImage {
            page_num: 1,
            png: vec![0x89, b'P', b'N', b'G'],
            width: 1,
            height: 1,
        }
    }

    fn transient() -> ServiceError {
        ServiceError::Call {
            provider: "scripted".into(),
            message: "503 overloaded".into(),
        }
    }

    #[test]
    fn build_options_defaults() {
        let opts = build_options(&PipelineConfig::default());
        assert_eq!(opts.temperature, Some(0.1));
        assert_eq!(opts.max_tokens, Some(1024));
    }

    #[tokio::test]
    async fn sends_configured_instruction_and_parses_fenced_reply() {
        let svc = Scripted::new(vec![Ok("```json\n{\"phone\": \"555-0100\"}\n```".into())]);
        let config = PipelineConfig::builder()
            .extraction_prompt("read the form")
            .build()
            .unwrap();
        let client = ExtractionClient::new(svc.clone(), &config);

        let result = client.extract(&page()).await.unwrap();
        assert_eq!(result.fields()["phone"], "555-0100");
        assert_eq!(*svc.instructions.lock().unwrap(), vec!["read the form".to_string()]);
    }

    #[tokio::test]
    async fn service_error_is_not_retried_by_default() {
        let svc = Scripted::new(vec![Err(transient()), Ok("{}".into())]);
        let client = ExtractionClient::new(svc.clone(), &PipelineConfig::default());

        let err = client.extract(&page()).await.unwrap_err();
        assert!(matches!(err, IntakeError::Service { page: 1, .. }));
        assert!(err.to_string().contains("503 overloaded"));
        assert_eq!(svc.instructions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn retries_recover_transient_failure() {
        let svc = Scripted::new(vec![Err(transient()), Ok(r#"{"gender": "F"}"#.into())]);
        let config = PipelineConfig::builder()
            .max_retries(2)
            .retry_backoff_ms(1)
            .build()
            .unwrap();
        let client = ExtractionClient::new(svc.clone(), &config);

        let result = client.extract(&page()).await.unwrap();
        assert_eq!(result.fields()["gender"], "F");
        assert_eq!(svc.instructions.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn malformed_reply_is_not_retried() {
        let svc = Scripted::new(vec![Ok("not json".into()), Ok("{}".into())]);
        let config = PipelineConfig::builder()
            .max_retries(3)
            .retry_backoff_ms(1)
            .build()
            .unwrap();
        let client = ExtractionClient::new(svc.clone(), &config);

        let err = client.extract(&page()).await.unwrap_err();
        assert!(matches!(err, IntakeError::MalformedResponse { page: 1, .. }));
        assert_eq!(svc.instructions.lock().unwrap().len(), 1);
    }

    #[test]
    fn retry_delay_doubles_then_caps() {
        assert_eq!(retry_delay_ms(500, 1), 500);
        assert_eq!(retry_delay_ms(500, 2), 1000);
        assert_eq!(retry_delay_ms(500, 4), 4000);
        assert_eq!(retry_delay_ms(500, 30), MAX_RETRY_BACKOFF_MS);
        assert_eq!(retry_delay_ms(500, 64), MAX_RETRY_BACKOFF_MS);
        assert_eq!(retry_delay_ms(500, u32::MAX), MAX_RETRY_BACKOFF_MS);
        assert_eq!(retry_delay_ms(0, 70), 0);
    }

    /// Fails every call.
    struct AlwaysDown {
        calls: AtomicU32,
    }

    #[async_trait]
    impl VisionService for AlwaysDown {
        fn name(&self) -> &str {
            "down"
        }

        async fn analyze(&self, _page: &PageImage, _instruction: &str) -> Result<String, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ServiceError::Call {
                provider: "down".into(),
                message: "502 bad gateway".into(),
            })
        }
    }

    #[tokio::test]
    async fn many_retries_exhaust_without_overflow() {
        let svc = Arc::new(AlwaysDown {
            calls: AtomicU32::new(0),
        });
        let config = PipelineConfig::builder()
            .max_retries(70)
            .retry_backoff_ms(0)
            .build()
            .unwrap();
        let client = ExtractionClient::new(svc.clone(), &config);

        let err = client.extract(&page()).await.unwrap_err();
        assert!(matches!(err, IntakeError::Service { page: 1, .. }));
        assert_eq!(svc.calls.load(Ordering::SeqCst), 71);
    }

    struct Stalled;

    #[async_trait]
    impl VisionService for Stalled {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn analyze(&self, _page: &PageImage, _instruction: &str) -> Result<String, ServiceError> {
            sleep(Duration::from_secs(3600)).await;
            Ok("{}".into())
        }
    }

    #[tokio::test]
    async fn timeout_surfaces_as_service_error() {
        let config = PipelineConfig::builder().api_timeout_secs(1).build().unwrap();
        let client = ExtractionClient::new(Arc::new(Stalled), &config);

        let err = client.extract(&page()).await.unwrap_err();
        assert!(matches!(
            err,
            IntakeError::Service {
                source: ServiceError::Timeout { secs: 1 },
                ..
            }
        ));
    }
}
