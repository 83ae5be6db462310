//! One user's conversation with one uploaded file.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::catalog::{ModelId, ModelInfo};
use crate::document::{Document, DocumentInfo};
use crate::llm_interaction::{ChatBackend, ChatRequest, GroqClient, GroqError, GroqSettings};
use crate::prompt;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("please enter a question")]
    EmptyQuestion,
    #[error("upload a TXT or CSV file before asking questions")]
    NoDocument,
    #[error(transparent)]
    Groq(#[from] GroqError),
}

/// A single question/answer exchange. Never modified once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatTurn {
    pub question: String,
    pub answer: String,
    pub model: ModelId,
    pub asked_at: String,
}

/// Where the session's API key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeySource {
    None,
    Server,
    Session,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelOption {
    #[serde(flatten)]
    pub info: ModelInfo,
    pub selected: bool,
}

/// Serializable snapshot used by both the HTML page and the JSON API.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub document: Option<DocumentInfo>,
    pub history: Vec<ChatTurn>,
    pub model: ModelId,
    pub models: Vec<ModelOption>,
    pub key_source: KeySource,
    pub error: Option<String>,
    pub draft: Option<String>,
}

/// A validated question waiting on the backend.
pub struct PendingAsk {
    question: String,
    draft: String,
    model: ModelId,
    request: ChatRequest,
    backend: Arc<dyn ChatBackend>,
    epoch: u64,
}

impl PendingAsk {
    pub async fn send(&self) -> Result<String, GroqError> {
        self.backend.complete(&self.request).await
    }
}

pub struct Session {
    document: Option<Document>,
    history: Vec<ChatTurn>,
    model: ModelId,
    backend: Option<Arc<dyn ChatBackend>>,
    key_source: KeySource,
    last_error: Option<String>,
    draft: Option<String>,
    // Bumped whenever the history is reset, so late answers are dropped.
    epoch: u64,
    last_active: Instant,
}

impl Session {
    pub fn new(backend: Option<Arc<dyn ChatBackend>>) -> Self {
        let key_source = if backend.is_some() {
            KeySource::Server
        } else {
            KeySource::None
        };
        Self {
            document: None,
            history: Vec::new(),
            model: ModelId::default(),
            backend,
            key_source,
            last_error: None,
            draft: None,
            epoch: 0,
            last_active: Instant::now(),
        }
    }

    fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_active.elapsed()
    }

    pub fn document(&self) -> Option<&Document> {
        self.document.as_ref()
    }

    pub fn history(&self) -> &[ChatTurn] {
        &self.history
    }

    pub fn model(&self) -> ModelId {
        self.model
    }

    pub fn key_source(&self) -> KeySource {
        self.key_source
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Replaces the loaded file. Answers about the previous file no longer
    /// apply, so the history starts over.
    pub fn load_document(&mut self, document: Document) {
        self.touch();
        info!(
            name = document.name(),
            kind = ?document.kind(),
            size = document.size_bytes(),
            "Loaded document into session"
        );
        self.document = Some(document);
        self.history.clear();
        self.epoch += 1;
        self.last_error = None;
        self.draft = None;
    }

    pub fn select_model(&mut self, model: ModelId) {
        self.touch();
        self.model = model;
    }

    /// Switches this session to its own key, leaving other sessions on the
    /// server key.
    pub fn use_api_key(&mut self, api_key: &str, settings: &GroqSettings) -> Result<(), GroqError> {
        self.touch();
        let client = GroqClient::new(api_key, settings)?;
        self.set_backend(Arc::new(client), KeySource::Session);
        Ok(())
    }

    pub fn set_backend(&mut self, backend: Arc<dyn ChatBackend>, source: KeySource) {
        self.backend = Some(backend);
        self.key_source = source;
    }

    pub fn clear_history(&mut self) {
        self.touch();
        self.history.clear();
        self.epoch += 1;
        self.last_error = None;
        self.draft = None;
    }

    pub fn record_error(&mut self, message: String) {
        self.last_error = Some(message);
    }

    pub fn dismiss_error(&mut self) {
        self.touch();
        self.last_error = None;
        self.draft = None;
    }

    /// Asks a question about the loaded file, optionally switching models
    /// first. The turn is appended only when the backend answers; on failure
    /// the question is kept as a draft so it can be retried.
    #[instrument(skip(self, question, model), fields(model = tracing::field::Empty))]
    pub async fn ask(
        &mut self,
        question: &str,
        model: Option<ModelId>,
    ) -> Result<ChatTurn, SessionError> {
        let pending = self.begin_ask(question, model)?;
        tracing::Span::current().record("model", pending.model.as_str());
        let answer = pending.send().await;
        self.finish_ask(pending, answer)
    }

    /// Validates a question and builds its request without waiting on the
    /// backend. The model override is applied only once validation passes.
    pub fn begin_ask(
        &mut self,
        question: &str,
        model: Option<ModelId>,
    ) -> Result<PendingAsk, SessionError> {
        self.touch();
        let pending = self.validate(question, model);
        if let Err(e) = &pending {
            self.fail(question, e);
        }
        let pending = pending?;
        self.model = pending.model;
        Ok(pending)
    }

    fn validate(&self, question: &str, model: Option<ModelId>) -> Result<PendingAsk, SessionError> {
        let trimmed = question.trim();
        if trimmed.is_empty() {
            return Err(SessionError::EmptyQuestion);
        }
        let document = self.document.as_ref().ok_or(SessionError::NoDocument)?;
        let backend = self.backend.clone().ok_or(GroqError::MissingApiKey)?;
        let model = model.unwrap_or(self.model);

        Ok(PendingAsk {
            question: trimmed.to_string(),
            draft: question.to_string(),
            model,
            request: prompt::build_request(document.text(), trimmed, model),
            backend,
            epoch: self.epoch,
        })
    }

    /// Records the backend's answer for a question started with
    /// [`Session::begin_ask`]. If the document was replaced or the history
    /// cleared in the meantime, the answer is returned but not recorded.
    pub fn finish_ask(
        &mut self,
        pending: PendingAsk,
        answer: Result<String, GroqError>,
    ) -> Result<ChatTurn, SessionError> {
        self.touch();
        let answer = match answer {
            Ok(answer) => answer,
            Err(e) => {
                let e = SessionError::from(e);
                self.fail(&pending.draft, &e);
                return Err(e);
            }
        };

        let turn = ChatTurn {
            question: pending.question,
            answer,
            model: pending.model,
            asked_at: Local::now().format("%H:%M:%S").to_string(),
        };
        if pending.epoch == self.epoch {
            self.history.push(turn.clone());
            self.last_error = None;
            self.draft = None;
            info!(turns = self.history.len(), answer_len = turn.answer.len(), "Question answered");
        } else {
            debug!("History was reset while waiting for the answer; not recording it");
        }
        Ok(turn)
    }

    fn fail(&mut self, question: &str, error: &SessionError) {
        warn!(error = %error, "Question failed");
        self.last_error = Some(error.to_string());
        self.draft = Some(question.to_string());
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            document: self.document.as_ref().map(Document::info),
            history: self.history.clone(),
            model: self.model,
            models: ModelId::all()
                .map(|id| ModelOption {
                    info: *id.info(),
                    selected: id == self.model,
                })
                .collect(),
            key_source: self.key_source,
            error: self.last_error.clone(),
            draft: self.draft.clone(),
        }
    }
}
