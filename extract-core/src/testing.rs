//! Test doubles for the model seam and the event sink.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::error::ModelError;
use crate::events::{ExtractionObserver, PipelineEvent};
use crate::extractor::ExtractionModel;
use crate::normalize::RawResult;
use crate::schema::ExtractionSchema;

/// One canned model answer.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedReply {
    /// A structured payload.
    Payload(Value),
    /// A reply without structured output.
    Empty,
    /// A plain text answer, returned by free-text completions.
    Text(String),
    /// A provider failure.
    Error(String),
}

impl ScriptedReply {
    /// A structured payload reply.
    #[must_use]
    pub const fn payload(value: Value) -> Self {
        Self::Payload(value)
    }

    /// A plain text reply.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// A provider failure reply.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }
}

type Router = Box<dyn Fn(&str) -> ScriptedReply + Send + Sync>;

enum Script {
    Queue(Mutex<VecDeque<ScriptedReply>>),
    Routed(Router),
}

/// A model answering from a script.
///
/// Queue scripts hand out replies in call order and answer
/// [`ScriptedReply::Empty`] once exhausted. Routed scripts pick the reply from
/// the prompt, which keeps concurrent rounds deterministic.
pub struct ScriptedModel {
    script: Script,
    prompts: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl ScriptedModel {
    /// Replies in order.
    #[must_use]
    pub fn new(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            script: Script::Queue(Mutex::new(replies.into_iter().collect())),
            prompts: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Replies chosen by inspecting the prompt.
    #[must_use]
    pub fn routed<F>(router: F) -> Self
    where
        F: Fn(&str) -> ScriptedReply + Send + Sync + 'static,
    {
        Self {
            script: Script::Routed(Box::new(router)),
            prompts: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Sleeps before every reply.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of calls received.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Prompts received, in call order.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn next_reply(&self, prompt: &str) -> ScriptedReply {
        match &self.script {
            Script::Queue(queue) => queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front()
                .unwrap_or(ScriptedReply::Empty),
            Script::Routed(router) => router(prompt),
        }
    }
}

impl ScriptedModel {
    async fn answer(&self, prompt: &str) -> ScriptedReply {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prompt.to_string());
        let reply = self.next_reply(prompt);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        reply
    }
}

#[async_trait]
impl ExtractionModel for ScriptedModel {
    async fn generate(
        &self,
        prompt: &str,
        _schema: &ExtractionSchema,
    ) -> Result<Option<RawResult>, ModelError> {
        match self.answer(prompt).await {
            ScriptedReply::Payload(value) => Ok(Some(value)),
            ScriptedReply::Empty | ScriptedReply::Text(_) => Ok(None),
            ScriptedReply::Error(message) => Err(ModelError::Provider(message)),
        }
    }

    async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
        match self.answer(prompt).await {
            ScriptedReply::Text(text) => Ok(text),
            ScriptedReply::Payload(value) => Ok(value.to_string()),
            ScriptedReply::Empty => Ok(String::new()),
            ScriptedReply::Error(message) => Err(ModelError::Provider(message)),
        }
    }
}

/// Collects every event it receives.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingObserver {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ExtractionObserver for RecordingObserver {
    fn on_event(&self, event: &PipelineEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}
