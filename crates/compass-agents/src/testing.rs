//! Scripted provider used by unit tests across the crate.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use compass_common::{Error, Result};

use crate::providers::{LlmProvider, LlmRequest, LlmResponse};

#[derive(Clone, Default)]
pub(crate) struct CallCount(Arc<AtomicUsize>);

impl CallCount {
    pub(crate) fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Replays queued outcomes in order, then `otherwise` (or an error) once the queue runs dry.
pub(crate) struct ScriptedProvider {
    id: &'static str,
    script: Mutex<VecDeque<std::result::Result<String, String>>>,
    otherwise: Option<String>,
    calls: CallCount,
    requests: Arc<Mutex<Vec<LlmRequest>>>,
}

impl ScriptedProvider {
    pub(crate) fn new(id: &'static str) -> Self {
        Self {
            id,
            script: Mutex::new(VecDeque::new()),
            otherwise: None,
            calls: CallCount::default(),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn reply(self, text: &str) -> Self {
        self.push(Ok(text.to_string()))
    }

    pub(crate) fn fail(self, message: &str) -> Self {
        self.push(Err(message.to_string()))
    }

    pub(crate) fn otherwise(mut self, text: &str) -> Self {
        self.otherwise = Some(text.to_string());
        self
    }

    pub(crate) fn calls(&self) -> CallCount {
        self.calls.clone()
    }

    pub(crate) fn requests(&self) -> Arc<Mutex<Vec<LlmRequest>>> {
        Arc::clone(&self.requests)
    }

    fn push(self, outcome: std::result::Result<String, String>) -> Self {
        self.script.lock().unwrap().push_back(outcome);
        self
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn provider_id(&self) -> &str {
        self.id
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        self.calls.0.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        let next = self.script.lock().unwrap().pop_front();
        let text = match next {
            Some(Ok(text)) => text,
            Some(Err(message)) => return Err(Error::Agent(message)),
            None => self
                .otherwise
                .clone()
                .ok_or_else(|| Error::Agent(format!("{} has no scripted response", self.id)))?,
        };

        Ok(LlmResponse {
            text,
            model: request.model.clone(),
            usage: None,
            stop_reason: Some("stop".to_string()),
        })
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}
