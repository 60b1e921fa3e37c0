//! Reflection prompt state machine and the text-completion client behind it.
//!
//! After a burst of activity followed by a pause the canvas offers a
//! "reflection": a one or two sentence caption describing the mood of the
//! recent interactions. Only the interaction style and the dominant harmonic
//! class leave the process; positions and timings never do.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::analysis::{DominantHarmony, InteractionStyle};
use crate::config::ReflectionConfig;
use crate::error::{HeartbeatError, Result};

/// Quiet time after which the prompt may appear.
pub const PROMPT_MIN_IDLE_MS: u64 = 3_000;
/// Quiet time after which an unanswered prompt resets.
pub const PROMPT_EXPIRE_MS: u64 = 10_000;
/// Interactions needed in the window before a prompt is offered.
pub const PROMPT_MIN_EVENTS: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub enum ReflectionState {
    Idle,
    PromptShown,
    /// Waiting on the completion service.
    Pending,
    Showing(String),
}

/// Summary sent to the completion service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReflectionRequest {
    pub style: InteractionStyle,
    pub dominant: DominantHarmony,
}

impl ReflectionRequest {
    pub fn prompt(&self) -> String {
        format!(
            "Create a very short, poetic sensory description (1-2 sentences) for a musical interaction experience.\n\
             \n\
             Interaction style: {}\n\
             Dominant note type: {}\n\
             \n\
             The description should be gentle, evocative, and child-friendly. Focus on sensory qualities like colors, movement, or feelings.\n\
             Keep it very brief and simple. Don't use complex metaphors or abstract concepts.",
            self.style, self.dominant
        )
    }
}

#[derive(Debug)]
pub struct ReflectionTrigger {
    state: ReflectionState,
    /// Timestamp of the last interaction when the prompt last fired.
    fired_for: Option<u64>,
}

impl Default for ReflectionTrigger {
    fn default() -> Self {
        Self {
            state: ReflectionState::Idle,
            fired_for: None,
        }
    }
}

impl ReflectionTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ReflectionState {
        &self.state
    }

    /// Per-frame check. `last_interaction` is the timestamp of the newest event.
    pub fn evaluate(&mut self, window_len: usize, last_interaction: Option<u64>, now: u64) {
        let Some(last) = last_interaction else {
            return;
        };
        let idle = now.saturating_sub(last);
        match self.state {
            ReflectionState::Idle => {
                let fresh = self.fired_for != Some(last);
                if fresh
                    && window_len >= PROMPT_MIN_EVENTS
                    && idle > PROMPT_MIN_IDLE_MS
                    && idle < PROMPT_EXPIRE_MS
                {
                    debug!("Reflection prompt shown after {}ms of quiet", idle);
                    self.fired_for = Some(last);
                    self.state = ReflectionState::PromptShown;
                }
            }
            ReflectionState::PromptShown if idle > PROMPT_EXPIRE_MS => {
                debug!("Reflection prompt expired");
                self.state = ReflectionState::Idle;
            }
            _ => {}
        }
    }

    /// User activated the prompt.
    pub fn activate(&mut self, style: InteractionStyle, dominant: DominantHarmony) -> Option<ReflectionRequest> {
        if self.state != ReflectionState::PromptShown {
            return None;
        }
        self.state = ReflectionState::Pending;
        Some(ReflectionRequest { style, dominant })
    }

    /// Delivers text for a pending request; ignored if the user dismissed meanwhile.
    pub fn resolve(&mut self, text: String) {
        if self.state == ReflectionState::Pending {
            self.state = ReflectionState::Showing(text);
        }
    }

    pub fn dismiss(&mut self) {
        self.state = ReflectionState::Idle;
    }
}

/// Prompt plus decoding parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// External text-generation service.
#[async_trait]
pub trait TextCompletion: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String>;
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

/// OpenAI-compatible chat completions over HTTPS.
pub struct HttpCompletionClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpCompletionClient {
    pub fn from_config(config: &ReflectionConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty());
        if api_key.is_none() {
            warn!(
                "{} is not set; reflections will use the fallback text",
                config.api_key_env
            );
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl TextCompletion for HttpCompletionClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| HeartbeatError::Completion("no API key configured".to_string()))?;

        let body = ChatBody {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(HeartbeatError::Completion(format!("service answered {}", status)));
        }

        let parsed: ChatResponse = resp.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| HeartbeatError::Completion("empty completion".to_string()))
    }
}

/// Runs reflection requests on the tokio runtime.
#[derive(Clone)]
pub struct ReflectionClient {
    backend: Arc<dyn TextCompletion>,
    runtime: tokio::runtime::Handle,
    timeout: Duration,
    temperature: f32,
    max_tokens: u32,
    fallback: String,
}

impl ReflectionClient {
    pub fn new(backend: Arc<dyn TextCompletion>, runtime: tokio::runtime::Handle, config: &ReflectionConfig) -> Self {
        Self {
            backend,
            runtime,
            timeout: Duration::from_secs(config.timeout_secs),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            fallback: config.fallback.clone(),
        }
    }

    #[cfg(test)]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Starts the request; the job always ends with some text.
    pub fn spawn(&self, request: ReflectionRequest) -> ReflectionJob {
        let (tx, rx) = oneshot::channel();
        let backend = self.backend.clone();
        let timeout = self.timeout;
        let fallback = self.fallback.clone();
        let completion = CompletionRequest {
            prompt: request.prompt(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        info!("Requesting reflection ({} / {})", request.style, request.dominant);

        self.runtime.spawn(async move {
            let text = match tokio::time::timeout(timeout, backend.complete(completion)).await {
                Ok(Ok(text)) => text,
                Ok(Err(e)) => {
                    warn!("Reflection request failed: {}", e);
                    fallback
                }
                Err(_) => {
                    warn!("{}", HeartbeatError::Timeout(timeout.as_secs()));
                    fallback
                }
            };
            // The receiver is gone if the session was torn down.
            let _ = tx.send(text);
        });

        ReflectionJob {
            rx,
            fallback: self.fallback.clone(),
        }
    }
}

/// Handle to an in-flight reflection.
pub struct ReflectionJob {
    rx: oneshot::Receiver<String>,
    fallback: String,
}

impl ReflectionJob {
    /// Non-blocking check, called once per frame.
    pub fn poll(&mut self) -> Option<String> {
        match self.rx.try_recv() {
            Ok(text) => Some(text),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(self.fallback.clone()),
        }
    }

    #[cfg(test)]
    pub async fn wait(self) -> String {
        self.rx.await.unwrap_or(self.fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_needs_a_pause_after_activity() {
        let mut trigger = ReflectionTrigger::new();
        trigger.evaluate(5, Some(0), 2999);
        assert_eq!(trigger.state(), &ReflectionState::Idle);
        trigger.evaluate(5, Some(0), 3000);
        assert_eq!(trigger.state(), &ReflectionState::Idle);
        trigger.evaluate(5, Some(0), 3001);
        assert_eq!(trigger.state(), &ReflectionState::PromptShown);
    }

    #[test]
    fn test_prompt_needs_five_events() {
        let mut trigger = ReflectionTrigger::new();
        trigger.evaluate(4, Some(0), 5000);
        assert_eq!(trigger.state(), &ReflectionState::Idle);
        trigger.evaluate(0, None, 5000);
        assert_eq!(trigger.state(), &ReflectionState::Idle);
    }

    #[test]
    fn test_unanswered_prompt_expires() {
        let mut trigger = ReflectionTrigger::new();
        trigger.evaluate(5, Some(0), 4000);
        trigger.evaluate(5, Some(0), 10_000);
        assert_eq!(trigger.state(), &ReflectionState::PromptShown);
        trigger.evaluate(5, Some(0), 10_001);
        assert_eq!(trigger.state(), &ReflectionState::Idle);
    }

    #[test]
    fn test_no_prompt_past_expiry_window() {
        let mut trigger = ReflectionTrigger::new();
        trigger.evaluate(5, Some(0), 12_000);
        assert_eq!(trigger.state(), &ReflectionState::Idle);
    }

    #[test]
    fn test_dismiss_rearms_only_after_fresh_interactions() {
        let mut trigger = ReflectionTrigger::new();
        trigger.evaluate(5, Some(0), 4000);
        trigger.dismiss();
        trigger.evaluate(5, Some(0), 4100);
        assert_eq!(trigger.state(), &ReflectionState::Idle);
        trigger.evaluate(6, Some(5000), 8100);
        assert_eq!(trigger.state(), &ReflectionState::PromptShown);
    }

    #[test]
    fn test_activation_flow() {
        let mut trigger = ReflectionTrigger::new();
        assert!(trigger.activate(InteractionStyle::Calm, DominantHarmony::Major).is_none());

        trigger.evaluate(5, Some(0), 4000);
        let request = trigger.activate(InteractionStyle::Calm, DominantHarmony::Major).unwrap();
        assert_eq!(trigger.state(), &ReflectionState::Pending);
        assert!(request.prompt().contains("Interaction style: calm"));
        assert!(request.prompt().contains("Dominant note type: major"));

        trigger.resolve("Blue ripples hum softly.".to_string());
        assert_eq!(
            trigger.state(),
            &ReflectionState::Showing("Blue ripples hum softly.".to_string())
        );
        trigger.dismiss();
        assert_eq!(trigger.state(), &ReflectionState::Idle);
    }

    #[test]
    fn test_late_result_after_dismiss_is_dropped() {
        let mut trigger = ReflectionTrigger::new();
        trigger.evaluate(5, Some(0), 4000);
        trigger.activate(InteractionStyle::Neutral, DominantHarmony::Balanced);
        trigger.dismiss();
        trigger.resolve("too late".to_string());
        assert_eq!(trigger.state(), &ReflectionState::Idle);
    }

    struct Fixed(Result<String>);

    #[async_trait]
    impl TextCompletion for Fixed {
        async fn complete(&self, request: CompletionRequest) -> Result<String> {
            assert!(request.prompt.contains("Interaction style"));
            match &self.0 {
                Ok(text) => Ok(text.clone()),
                Err(_) => Err(HeartbeatError::Completion("boom".to_string())),
            }
        }
    }

    struct Hangs;

    #[async_trait]
    impl TextCompletion for Hangs {
        async fn complete(&self, _request: CompletionRequest) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("never".to_string())
        }
    }

    fn client(backend: Arc<dyn TextCompletion>) -> ReflectionClient {
        ReflectionClient::new(
            backend,
            tokio::runtime::Handle::current(),
            &ReflectionConfig::default(),
        )
    }

    fn request() -> ReflectionRequest {
        ReflectionRequest {
            style: InteractionStyle::Energetic,
            dominant: DominantHarmony::Minor,
        }
    }

    #[tokio::test]
    async fn test_client_returns_service_text() {
        let job = client(Arc::new(Fixed(Ok("Stars twirl.".to_string())))).spawn(request());
        assert_eq!(job.wait().await, "Stars twirl.");
    }

    #[tokio::test]
    async fn test_client_falls_back_on_error() {
        let job = client(Arc::new(Fixed(Err(HeartbeatError::Completion(String::new()))))).spawn(request());
        assert_eq!(job.wait().await, ReflectionConfig::default().fallback);
    }

    #[tokio::test]
    async fn test_client_falls_back_on_timeout() {
        let job = client(Arc::new(Hangs))
            .with_timeout(Duration::from_millis(20))
            .spawn(request());
        assert_eq!(job.wait().await, ReflectionConfig::default().fallback);
    }

    #[tokio::test]
    async fn test_missing_api_key_is_an_error() {
        let config = ReflectionConfig {
            api_key_env: "PIANO_HEARTBEAT_TEST_UNSET_KEY".to_string(),
            ..ReflectionConfig::default()
        };
        let http = HttpCompletionClient::from_config(&config).unwrap();
        let result = http
            .complete(CompletionRequest {
                prompt: "hi".to_string(),
                temperature: 0.7,
                max_tokens: 10,
            })
            .await;
        assert!(matches!(result, Err(HeartbeatError::Completion(_))));
    }
}
