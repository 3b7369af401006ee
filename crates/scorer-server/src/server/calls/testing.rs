//! In-memory call channels for exercising handlers without a transport.

use super::channel::{Inbound, Outbound};
use scorer_core::{
    Error, Result,
    proto::{ScoreRequest, ScoreResponse},
};
use std::collections::{HashSet, VecDeque};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};
use tokio::time::Instant;
use tonic::Status;

/// Inbound channel that replays a fixed script, then ends, fails, or hangs.
#[derive(Debug, Default)]
pub struct ScriptedInbound {
    script: VecDeque<core::result::Result<ScoreRequest, Status>>,
    hang: bool,
}

impl ScriptedInbound {
    pub fn prompts<I, S>(prompts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: prompts
                .into_iter()
                .map(|p| Ok(ScoreRequest { prompt: p.into() }))
                .collect(),
            hang: false,
        }
    }

    pub fn then_error(mut self, status: Status) -> Self {
        self.script.push_back(Err(status));
        self
    }

    /// Never signals end of input once the script is exhausted.
    pub fn then_hang(mut self) -> Self {
        self.hang = true;
        self
    }
}

#[tonic::async_trait]
impl Inbound for ScriptedInbound {
    async fn recv(&mut self) -> Result<Option<ScoreRequest>> {
        match self.script.pop_front() {
            Some(Ok(request)) => Ok(Some(request)),
            Some(Err(status)) => Err(status.into()),
            None if self.hang => std::future::pending().await,
            None => Ok(None),
        }
    }
}

/// Outbound channel that records every delivered response with its send time.
///
/// Sends whose zero-based attempt index is marked failing are rejected with a
/// channel error instead of being recorded.
#[derive(Debug, Clone, Default)]
pub struct RecordingOutbound {
    sent: Arc<Mutex<Vec<(Instant, String)>>>,
    attempts: Arc<AtomicUsize>,
    failing: Arc<HashSet<usize>>,
}

impl RecordingOutbound {
    pub fn failing_at(attempts: impl IntoIterator<Item = usize>) -> Self {
        Self {
            failing: Arc::new(attempts.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn results(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn send_times(&self) -> Vec<Instant> {
        self.sent.lock().unwrap().iter().map(|(t, _)| *t).collect()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[tonic::async_trait]
impl Outbound for RecordingOutbound {
    async fn send(&mut self, response: ScoreResponse) -> Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&attempt) {
            return Err(Error::ChannelError {
                context: format!("send {attempt} rejected"),
            });
        }
        self.sent
            .lock()
            .unwrap()
            .push((Instant::now(), response.result));
        Ok(())
    }
}
