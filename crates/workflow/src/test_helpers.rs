//! Shared test doubles for workflow tests.

use async_trait::async_trait;
use loresmith_core::error::{ProviderError, RetrievalError};
use loresmith_core::message::Message;
use loresmith_core::provider::{
    Backend, ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage,
};
use loresmith_core::retrieval::{Passage, Retriever};
use loresmith_providers::{BackendRouter, WorkflowStep};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// The prompt a workflow step sent: the content of the last message.
pub fn prompt_of(request: &ProviderRequest) -> String {
    request
        .messages
        .last()
        .map(|m| m.content.clone())
        .unwrap_or_default()
}

pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

/// Returns scripted replies in order. Running out is an API error.
pub struct SequentialMockProvider {
    name: String,
    responses: Mutex<VecDeque<Result<String, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl SequentialMockProvider {
    pub fn new(name: &str, responses: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            name: name.into(),
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn texts(name: &str, texts: &[&str]) -> Self {
        Self::new(name, texts.iter().map(|t| Ok(t.to_string())).collect())
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.requests.lock().unwrap().iter().map(prompt_of).collect()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(Ok(text)) => Ok(make_text_response(&text)),
            Some(Err(e)) => Err(e),
            None => Err(ProviderError::ApiError {
                status_code: 500,
                message: format!("{}: no scripted response left", self.name),
            }),
        }
    }
}

type ReplyFn = dyn Fn(&str) -> Result<String, ProviderError> + Send + Sync;
type DelayFn = dyn Fn(&str) -> Duration + Send + Sync;

/// Replies computed from the prompt, with an optional per-prompt delay.
/// Used where concurrent calls make ordering unpredictable.
pub struct FnProvider {
    name: String,
    reply: Box<ReplyFn>,
    delay: Option<Box<DelayFn>>,
    calls: AtomicUsize,
}

impl FnProvider {
    pub fn new(
        name: &str,
        reply: impl Fn(&str) -> Result<String, ProviderError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            reply: Box::new(reply),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: impl Fn(&str) -> Duration + Send + Sync + 'static) -> Self {
        self.delay = Some(Box::new(delay));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for FnProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let prompt = prompt_of(&request);
        if let Some(delay) = &self.delay {
            tokio::time::sleep(delay(&prompt)).await;
        }
        (self.reply)(&prompt).map(|text| make_text_response(&text))
    }
}

/// How a [`StreamingMockProvider`] stream behaves.
#[derive(Clone)]
pub enum StreamScript {
    /// Yield these chunks, then finish cleanly.
    Chunks(Vec<String>),
    /// Yield these chunks, then break with an error.
    BreakAfter(Vec<String>),
    /// Refuse to open the stream.
    OpenFails,
}

/// Streams scripted chunks; `complete` returns the chunks joined.
pub struct StreamingMockProvider {
    script: StreamScript,
}

impl StreamingMockProvider {
    pub fn new(script: StreamScript) -> Self {
        Self { script }
    }
}

#[async_trait]
impl Provider for StreamingMockProvider {
    fn name(&self) -> &str {
        "streaming_mock"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        match &self.script {
            StreamScript::Chunks(chunks) => Ok(make_text_response(&chunks.concat())),
            StreamScript::BreakAfter(_) | StreamScript::OpenFails => Err(ProviderError::Network(
                "connection reset".into(),
            )),
        }
    }

    async fn stream(&self, _request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let (chunks, broken) = match &self.script {
            StreamScript::OpenFails => {
                return Err(ProviderError::Network("connection refused".into()));
            }
            StreamScript::Chunks(chunks) => (chunks.clone(), false),
            StreamScript::BreakAfter(chunks) => (chunks.clone(), true),
        };

        let (tx, rx) = mpsc::channel(chunks.len() + 2);
        for chunk in chunks {
            let _ = tx
                .send(Ok(StreamChunk {
                    content: Some(chunk),
                    done: false,
                    usage: None,
                }))
                .await;
        }
        let last = if broken {
            Err(ProviderError::StreamInterrupted("connection dropped".into()))
        } else {
            Ok(StreamChunk {
                content: None,
                done: true,
                usage: None,
            })
        };
        let _ = tx.send(last).await;
        Ok(rx)
    }
}

/// Panics on every call.
pub struct PanickingProvider;

#[async_trait]
impl Provider for PanickingProvider {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        panic!("provider exploded");
    }
}

type SearchFn = dyn Fn(&str) -> Result<Vec<Passage>, RetrievalError> + Send + Sync;

/// Retriever whose results are computed from the query. Records every query.
pub struct MockRetriever {
    search: Box<SearchFn>,
    queries: Mutex<Vec<String>>,
}

impl MockRetriever {
    pub fn new(
        search: impl Fn(&str) -> Result<Vec<Passage>, RetrievalError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            search: Box::new(search),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn empty() -> Self {
        Self::new(|_| Ok(Vec::new()))
    }

    /// Same passages for every query.
    pub fn fixed(passages: Vec<Passage>) -> Self {
        Self::new(move |_| Ok(passages.clone()))
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl Retriever for MockRetriever {
    fn name(&self) -> &str {
        "mock"
    }

    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Passage>, RetrievalError> {
        self.queries.lock().unwrap().push(query.to_string());
        let mut passages = (self.search)(query)?;
        passages.truncate(top_k);
        Ok(passages)
    }
}

/// Bind a provider to a mock model.
pub fn backend(provider: Arc<dyn Provider>) -> Backend {
    Backend::new(provider, "mock-model")
}

/// A router pinning each listed step; unlisted steps use `user`.
pub fn router(user: Arc<dyn Provider>, routes: Vec<(WorkflowStep, Backend)>) -> Arc<BackendRouter> {
    let router = routes
        .into_iter()
        .fold(BackendRouter::new(backend(user)), |router, (step, backend)| {
            router.with_route(step, backend)
        });
    Arc::new(router)
}

/// A provider that fails every call with the given error.
pub fn failing(name: &str, error: ProviderError) -> Arc<FnProvider> {
    Arc::new(FnProvider::new(name, move |_| Err(error.clone())))
}
