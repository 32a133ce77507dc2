//! In-process [`LlmBackend`] that replays canned replies. Used for offline
//! replays of recorded sessions and to drive whole runs in tests.

use crate::interfaces::{CompletionRequest, LlmBackend, RuntimeError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

type Responder = Box<dyn Fn(&CompletionRequest) -> Result<String, RuntimeError> + Send + Sync>;

pub struct ScriptedBackend {
    script: Mutex<VecDeque<Result<String, RuntimeError>>>,
    responder: Option<Responder>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedBackend {
    /// Replies are handed out in order; once they run out every call fails.
    pub fn new(script: Vec<Result<String, RuntimeError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            responder: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn from_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(replies.into_iter().map(|r| Ok(r.into())).collect())
    }

    /// Answers computed from the request, used once the script is exhausted.
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&CompletionRequest) -> Result<String, RuntimeError> + Send + Sync + 'static,
    {
        self.responder = Some(Box::new(responder));
        self
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().len()
    }
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, RuntimeError> {
        self.requests.lock().push(request.clone());

        if let Some(reply) = self.script.lock().pop_front() {
            return reply;
        }
        match &self.responder {
            Some(responder) => responder(request),
            None => Err(RuntimeError::LLMError("script exhausted".to_string())),
        }
    }
}
