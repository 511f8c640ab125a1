//! Test doubles shared by the unit tests.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::config::PersonaSettings;
use crate::context::PersonaContext;
use crate::llm_client::{CompletionRequest, CompletionService};

/// Replays canned completions in order and records every request.
#[derive(Default)]
pub struct ScriptedCompletion {
    responses: Mutex<VecDeque<Result<String, String>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let scripted = Self::new();
        for response in responses {
            scripted.push_ok(response);
        }
        scripted
    }

    pub fn push_ok(&self, response: impl Into<String>) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(response.into()));
    }

    pub fn push_err(&self, error: impl Into<String>) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(error.into()));
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request);
        match self.responses.lock().unwrap().pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(error)) => Err(anyhow::anyhow!(error)),
            None => Err(anyhow::anyhow!("connection refused: no scripted response left")),
        }
    }
}

/// A context rooted in `root` whose documents have been initialized.
pub fn persona_context(
    root: &Path,
    persona_name: &str,
    completion: Arc<ScriptedCompletion>,
    settings: PersonaSettings,
) -> PersonaContext {
    let context = PersonaContext::new(root, persona_name, completion, settings);
    context.store().ensure_defaults().unwrap();
    context
}
