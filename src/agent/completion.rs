//! Completion handler - one quota-charged exchange with the completion service
//!
//! A chat exchange is a system preamble plus one user turn. When images are
//! allowed the model may call `generate_image`; the handler then renders the
//! batch, reports the outcome as a function result and asks the model once
//! more for its final answer. Every call that reports usage is debited from
//! the user's quota as soon as it returns.

use std::sync::{Mutex, PoisonError};

use tracing::{debug, error, info};

use crate::error::Error;
use crate::images::{all_succeeded, GeneratedImage, ImageGenerator};
use crate::store::UserSettingsHandle;
use crate::tools::{self, ImageToolArgs, GENERATE_IMAGE};
use crate::Result;

use super::llm::{LlmClient, LlmResponse, Sampling};
use super::message::Message;
use super::retry::{retry_bounded, RetryOutcome};

pub const CONNECTION_APOLOGY: &str =
    "I'm currently experiencing connection difficulties, please try again later.";
pub const UNKNOWN_ERROR: &str = "An unknown error occurred, please try again later.";

/// Chat tokens are billed at a tenth of what the service reports.
const CHAT_TOKEN_DIVISOR: i64 = 10;

/// Inputs of one chat completion.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub prompt: &'a str,
    pub preprompt: &'a str,
    /// Offer the `generate_image` function
    pub allow_images: bool,
    /// Debit the user's quota for this exchange
    pub charge_tokens: bool,
    /// Prefix of the cached image files
    pub generation_id: &'a str,
}

/// Final text plus the image batch produced along the way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    /// One slot per requested image; `None` where generation failed.
    pub images: Vec<Option<GeneratedImage>>,
}

impl Completion {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            images: vec![],
        }
    }

    /// True when images were requested and at least one is missing.
    pub fn image_failed(&self) -> bool {
        !self.images.is_empty() && !all_succeeded(&self.images)
    }

    pub fn attachments(&self) -> impl Iterator<Item = &GeneratedImage> {
        self.images.iter().flatten()
    }
}

/// Runs completions against an [`LlmClient`] with bounded retries.
pub struct CompletionHandler<C: LlmClient> {
    client: C,
    images: ImageGenerator,
    max_attempts: u32,
}

impl<C: LlmClient> CompletionHandler<C> {
    pub fn new(client: C, images: ImageGenerator, max_attempts: u32) -> Self {
        Self {
            client,
            images,
            max_attempts,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn images(&self) -> &ImageGenerator {
        &self.images
    }

    /// Chat completion with the optional image round.
    ///
    /// Upstream failures never surface as errors: they are turned into the
    /// apology or unknown-error text. Store failures do propagate.
    pub async fn complete(
        &self,
        request: CompletionRequest<'_>,
        settings: &UserSettingsHandle,
    ) -> Result<Completion> {
        let batch = Mutex::new(Vec::new());
        let batch_ref = &batch;

        let outcome = retry_bounded(self.max_attempts, Error::is_transient, move |attempt| {
            debug!("Chat completion attempt {} on {}", attempt, self.client.default_model());
            self.chat_once(request, settings, batch_ref)
        })
        .await;

        let images = batch.into_inner().unwrap_or_else(PoisonError::into_inner);
        let text = settle(outcome)?;
        Ok(Completion { text, images })
    }

    /// Plain prompt completion on the legacy model. Always charged in full.
    pub async fn complete_legacy(
        &self,
        prompt: &str,
        settings: &UserSettingsHandle,
    ) -> Result<String> {
        let sampling = Sampling::default();
        let sampling = &sampling;

        let outcome = retry_bounded(self.max_attempts, Error::is_transient, move |attempt| {
            async move {
                debug!("Legacy completion attempt {}", attempt);
                let response = self.client.complete(prompt, sampling).await?;
                Self::charge(settings, &response, 1).await?;
                Ok(clean_reply(&response))
            }
        })
        .await;

        settle(outcome)
    }

    async fn chat_once(
        &self,
        request: CompletionRequest<'_>,
        settings: &UserSettingsHandle,
        batch: &Mutex<Vec<Option<GeneratedImage>>>,
    ) -> Result<String> {
        let divisor = if request.charge_tokens { CHAT_TOKEN_DIVISOR } else { 0 };
        let mut messages = vec![Message::system(request.preprompt), Message::user(request.prompt)];
        let functions = if request.allow_images {
            vec![tools::generate_image_definition()]
        } else {
            vec![]
        };

        let response = self.client.chat(&messages, &functions).await?;
        Self::charge(settings, &response, divisor).await?;

        let call = match response.tool_call.clone() {
            Some(call) if call.name == GENERATE_IMAGE => call,
            _ => return Ok(clean_reply(&response)),
        };

        let args = ImageToolArgs::parse(&call.arguments)?;
        info!("Generating {} image(s) for {}", args.descriptions.len(), request.generation_id);

        let previous = std::mem::take(&mut *batch.lock().unwrap_or_else(PoisonError::into_inner));
        if !previous.is_empty() {
            self.images.clear_cache(request.generation_id, previous.len()).await;
        }

        let images = self
            .images
            .generate(request.generation_id, &args.descriptions, args.aspect_ratio)
            .await?;
        let result = tools::image_result_message(all_succeeded(&images));
        *batch.lock().unwrap_or_else(PoisonError::into_inner) = images;

        messages.push(Message::assistant_with_tool(
            response.content.clone().unwrap_or_default(),
            call,
        ));
        messages.push(Message::tool_result(GENERATE_IMAGE, result));

        let follow_up = self.client.chat(&messages, &[]).await?;
        Self::charge(settings, &follow_up, divisor).await?;

        Ok(clean_reply(&follow_up))
    }

    /// Debit `total_tokens / divisor`; a zero divisor means free.
    async fn charge(
        settings: &UserSettingsHandle,
        response: &LlmResponse,
        divisor: i64,
    ) -> Result<()> {
        if divisor == 0 {
            return Ok(());
        }
        match response.total_tokens() {
            Some(total) => settings.debit(total as i64 / divisor).await,
            None => Ok(()),
        }
    }
}

fn settle(outcome: RetryOutcome<String, Error>) -> Result<String> {
    match outcome {
        RetryOutcome::Success(text) => Ok(text),
        RetryOutcome::Exhausted { attempts, last_error } => {
            error!(
                "Completion failed after {} attempts: {}",
                attempts,
                last_error.map(|e| e.to_string()).unwrap_or_default()
            );
            Ok(CONNECTION_APOLOGY.to_string())
        }
        RetryOutcome::Failed(e) if e.is_store() => Err(e),
        RetryOutcome::Failed(e) => {
            error!("Completion failed: {}", e);
            Ok(UNKNOWN_ERROR.to_string())
        }
    }
}

/// Trim whitespace, then any wrapping double quotes.
fn clean_reply(response: &LlmResponse) -> String {
    response
        .content
        .as_deref()
        .unwrap_or_default()
        .trim()
        .trim_matches('"')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::llm::{FakeLlmClient, FakeRequest};
    use crate::agent::message::{Role, ToolCallRequest};
    use crate::images::FakeImageBackend;
    use crate::store::{InMemoryBackend, SettingsBackend, SettingsStore, UserKeyHasher};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    const PROMPT: &str = "Ada asked: \"hi\". The divine creature responded wisely: \"";

    fn request(allow_images: bool, charge_tokens: bool) -> CompletionRequest<'static> {
        CompletionRequest {
            prompt: PROMPT,
            preprompt: "You are a divine creature",
            allow_images,
            charge_tokens,
            generation_id: "1234",
        }
    }

    async fn settings(quota: i64) -> UserSettingsHandle {
        let store = SettingsStore::new(
            Arc::new(InMemoryBackend::new()),
            UserKeyHasher::new("salt").unwrap(),
            quota,
        );
        store.get(1).await.unwrap()
    }

    fn handler(
        responses: Vec<Result<LlmResponse>>,
        backend: FakeImageBackend,
        dir: &tempfile::TempDir,
    ) -> CompletionHandler<FakeLlmClient> {
        CompletionHandler::new(
            FakeLlmClient::scripted(responses),
            ImageGenerator::new(Arc::new(backend), dir.path()),
            5,
        )
    }

    fn busy() -> Result<LlmResponse> {
        Err(Error::ServiceUnavailable("overloaded".to_string()))
    }

    fn image_call(descriptions: &[&str]) -> LlmResponse {
        LlmResponse {
            content: None,
            tool_call: Some(ToolCallRequest {
                name: GENERATE_IMAGE.to_string(),
                arguments: json!({"descriptions": descriptions, "aspect_ratio": "landscape"}),
            }),
            usage: None,
        }
        .with_usage(200)
    }

    #[tokio::test]
    async fn test_retries_then_charges_once() {
        let dir = tempfile::tempdir().unwrap();
        let handler = handler(
            vec![
                busy(),
                busy(),
                busy(),
                busy(),
                Ok(LlmResponse::text("  \"Hello!\" ").with_usage(300)),
            ],
            FakeImageBackend::default(),
            &dir,
        );
        let settings = settings(1500).await;

        let completion = handler.complete(request(false, true), &settings).await.unwrap();

        assert_eq!(completion.text, "Hello!");
        assert!(completion.images.is_empty());
        assert_eq!(handler.client().calls(), 5);
        assert_eq!(settings.quota(), 1470);
    }

    #[tokio::test]
    async fn test_exhaustion_apologizes_without_charge() {
        let dir = tempfile::tempdir().unwrap();
        let handler = handler(
            vec![busy(), busy(), busy(), busy(), busy(), Ok(LlmResponse::text("late"))],
            FakeImageBackend::default(),
            &dir,
        );
        let settings = settings(100).await;

        let completion = handler.complete(request(false, true), &settings).await.unwrap();

        assert_eq!(completion.text, CONNECTION_APOLOGY);
        assert_eq!(handler.client().calls(), 5);
        assert_eq!(settings.quota(), 100);
    }

    #[tokio::test]
    async fn test_unclassified_error_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let handler = handler(
            vec![Err(Error::Llm("bad request".to_string()))],
            FakeImageBackend::default(),
            &dir,
        );
        let settings = settings(100).await;

        let completion = handler.complete(request(false, true), &settings).await.unwrap();

        assert_eq!(completion.text, UNKNOWN_ERROR);
        assert_eq!(handler.client().calls(), 1);
    }

    #[tokio::test]
    async fn test_exempt_exchange_is_free() {
        let dir = tempfile::tempdir().unwrap();
        let handler = handler(
            vec![Ok(LlmResponse::text("free").with_usage(900))],
            FakeImageBackend::default(),
            &dir,
        );
        let settings = settings(0).await;

        let completion = handler.complete(request(false, false), &settings).await.unwrap();

        assert_eq!(completion.text, "free");
        assert_eq!(settings.quota(), 0);
    }

    #[tokio::test]
    async fn test_tools_offered_only_when_images_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let handler = handler(
            vec![Ok(LlmResponse::text("a")), Ok(LlmResponse::text("b"))],
            FakeImageBackend::default(),
            &dir,
        );
        let settings = settings(100).await;

        handler.complete(request(false, true), &settings).await.unwrap();
        handler.complete(request(true, true), &settings).await.unwrap();

        let offered: Vec<usize> = handler
            .client()
            .requests()
            .into_iter()
            .map(|r| match r {
                FakeRequest::Chat { tools, .. } => tools.len(),
                FakeRequest::Complete { .. } => panic!("unexpected legacy call"),
            })
            .collect();
        assert_eq!(offered, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_image_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let handler = handler(
            vec![
                Ok(image_call(&["a cat", "forbidden", "a dog"])),
                Ok(LlmResponse::text("Here are your pictures").with_usage(100)),
            ],
            FakeImageBackend::denying(&["forbidden"]),
            &dir,
        );
        let settings = settings(1500).await;

        let completion = handler.complete(request(true, true), &settings).await.unwrap();

        assert_eq!(completion.text, "Here are your pictures");
        assert_eq!(completion.images.len(), 3);
        assert!(completion.image_failed());
        assert_eq!(completion.attachments().count(), 2);
        assert_eq!(settings.quota(), 1500 - 20 - 10);

        let requests = handler.client().requests();
        assert_eq!(requests.len(), 2);
        match &requests[1] {
            FakeRequest::Chat { messages, tools } => {
                assert!(tools.is_empty());
                assert_eq!(messages.len(), 4);
                assert_eq!(messages[2].role, Role::Assistant);
                assert!(messages[2].tool_call.is_some());
                assert_eq!(messages[3].role, Role::Function);
                assert_eq!(messages[3].content, tools::IMAGES_FAILED);
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_images_survive_failed_follow_up() {
        let dir = tempfile::tempdir().unwrap();
        let mut responses = vec![Ok(image_call(&["a cat"]))];
        responses.extend((0..5).map(|_| busy()));
        let handler = handler(responses, FakeImageBackend::default(), &dir);
        let settings = settings(1500).await;

        let completion = handler.complete(request(true, true), &settings).await.unwrap();

        assert_eq!(completion.text, CONNECTION_APOLOGY);
        assert_eq!(completion.images.len(), 1);
        assert!(!completion.image_failed());
        assert_eq!(settings.quota(), 1480);
    }

    #[tokio::test]
    async fn test_legacy_charges_full_count() {
        let dir = tempfile::tempdir().unwrap();
        let handler = handler(
            vec![Ok(LlmResponse::text(" \"Old school.\"").with_usage(120))],
            FakeImageBackend::default(),
            &dir,
        );
        let settings = settings(1500).await;

        let text = handler.complete_legacy(PROMPT, &settings).await.unwrap();

        assert_eq!(text, "Old school.");
        assert_eq!(settings.quota(), 1380);
        match &handler.client().requests()[0] {
            FakeRequest::Complete { prompt, sampling } => {
                assert_eq!(prompt, PROMPT);
                assert_eq!(sampling, &Sampling::default());
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_legacy_exhaustion_apologizes_without_charge() {
        let dir = tempfile::tempdir().unwrap();
        let rate_limited = || Err(Error::RateLimited("slow down".to_string()));
        let handler = handler(
            vec![rate_limited(), busy(), rate_limited(), busy(), rate_limited()],
            FakeImageBackend::default(),
            &dir,
        );
        let settings = settings(1500).await;

        let text = handler.complete_legacy(PROMPT, &settings).await.unwrap();

        assert_eq!(text, CONNECTION_APOLOGY);
        assert_eq!(handler.client().calls(), 5);
        assert_eq!(settings.quota(), 1500);
    }

    #[tokio::test]
    async fn test_legacy_unclassified_error_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let handler = handler(
            vec![Err(Error::Llm("bad request".to_string())), Ok(LlmResponse::text("never"))],
            FakeImageBackend::default(),
            &dir,
        );
        let settings = settings(1500).await;

        let text = handler.complete_legacy(PROMPT, &settings).await.unwrap();

        assert_eq!(text, UNKNOWN_ERROR);
        assert_eq!(handler.client().calls(), 1);
        assert_eq!(settings.quota(), 1500);
    }

    struct FlakyStore {
        inner: InMemoryBackend,
        fail_writes: AtomicBool,
    }

    #[async_trait]
    impl SettingsBackend for FlakyStore {
        async fn read_fields(&self, key: &str) -> Result<HashMap<String, String>> {
            self.inner.read_fields(key).await
        }

        async fn write_fields(&self, key: &str, fields: &[(&'static str, String)]) -> Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                let refused = (redis::ErrorKind::IoError, "connection refused");
                return Err(redis::RedisError::from(refused).into());
            }
            self.inner.write_fields(key, fields).await
        }
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FlakyStore {
            inner: InMemoryBackend::new(),
            fail_writes: AtomicBool::new(false),
        });
        let store = SettingsStore::new(backend.clone(), UserKeyHasher::new("salt").unwrap(), 1500);
        let settings = store.get(1).await.unwrap();
        backend.fail_writes.store(true, Ordering::SeqCst);

        let handler = handler(
            vec![Ok(LlmResponse::text("hi").with_usage(50))],
            FakeImageBackend::default(),
            &dir,
        );

        let err = handler.complete(request(false, true), &settings).await.unwrap_err();
        assert!(err.is_store());
        assert_eq!(handler.client().calls(), 1);
    }
}
