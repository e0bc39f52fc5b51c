//! Scripted transport for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{Transport, TransportError, TransportRequest, TransportResponse};

type Reply = Result<TransportResponse, TransportError>;

/// Replays queued replies in order, then repeats the fallback.
pub(crate) struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    fallback: Option<Reply>,
    delay: Option<Duration>,
    calls: Mutex<Vec<TransportRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            fallback: None,
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn repeating(reply: Reply) -> Self {
        Self {
            fallback: Some(reply),
            ..Self::new(Vec::new())
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn calls(&self) -> Vec<TransportRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: TransportRequest) -> Reply {
        self.calls.lock().unwrap().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.replies.lock().unwrap().pop_front();
        next.or_else(|| self.fallback.clone())
            .unwrap_or_else(|| Err(TransportError::Network("no scripted reply".into())))
    }
}

/// Answers every request with a closure.
pub(crate) struct FnTransport<F> {
    handler: F,
    calls: Mutex<Vec<TransportRequest>>,
}

impl<F> FnTransport<F>
where
    F: Fn(&TransportRequest) -> Reply + Send + Sync,
{
    pub(crate) fn new(handler: F) -> Self {
        Self {
            handler,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Paths of every request, in the order they were sent.
    pub(crate) fn paths(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|request| request.path.clone())
            .collect()
    }

    pub(crate) fn calls_to(&self, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|request| request.path == path)
            .count()
    }
}

#[async_trait]
impl<F> Transport for FnTransport<F>
where
    F: Fn(&TransportRequest) -> Reply + Send + Sync,
{
    async fn send(&self, request: TransportRequest) -> Reply {
        let reply = (self.handler)(&request);
        self.calls.lock().unwrap().push(request);
        reply
    }
}
