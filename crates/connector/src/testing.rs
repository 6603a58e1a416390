//! Scripted connector for supervisor and manager tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::ConnectorError;
use crate::traits::{Connector, Link, LinkEvent};

/// Outcome of one scripted connect attempt
pub enum Step {
    Open,
    Fail(ConnectorError),
}

/// Server end of an opened link
pub struct ServerSide {
    pub outbound: mpsc::UnboundedReceiver<String>,
    pub inbound: mpsc::Sender<LinkEvent>,
}

impl ServerSide {
    pub fn drain(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.outbound.try_recv() {
            frames.push(frame);
        }
        frames
    }

    pub async fn send_frame(&self, frame: &str) {
        self.inbound
            .send(LinkEvent::Frame(frame.as_bytes().to_vec()))
            .await
            .unwrap();
    }
}

#[derive(Default)]
struct ScriptState {
    steps: VecDeque<Step>,
    attempts: Vec<Instant>,
    credentials: Vec<Option<String>>,
    servers: VecDeque<ServerSide>,
}

/// Plays back `Step`s in order; once exhausted every attempt fails transiently
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedConnector {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        let connector = Self::default();
        connector.state.lock().steps.extend(steps);
        connector
    }

    pub fn push(&self, step: Step) {
        self.state.lock().steps.push_back(step);
    }

    pub fn attempts(&self) -> Vec<Instant> {
        self.state.lock().attempts.clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.state.lock().attempts.len()
    }

    pub fn credentials(&self) -> Vec<Option<String>> {
        self.state.lock().credentials.clone()
    }

    /// Next opened link not yet taken by the test
    pub fn take_server(&self) -> Option<ServerSide> {
        self.state.lock().servers.pop_front()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(
        &self,
        _endpoint: &str,
        credential: Option<&str>,
    ) -> Result<Link, ConnectorError> {
        let mut state = self.state.lock();
        state.attempts.push(Instant::now());
        state.credentials.push(credential.map(str::to_string));
        match state.steps.pop_front() {
            Some(Step::Open) => {
                let (out_tx, out_rx) = mpsc::unbounded_channel();
                let (in_tx, in_rx) = mpsc::channel(64);
                state.servers.push_back(ServerSide {
                    outbound: out_rx,
                    inbound: in_tx,
                });
                Ok(Link {
                    outbound: out_tx,
                    inbound: in_rx,
                })
            }
            Some(Step::Fail(e)) => Err(e),
            None => Err(ConnectorError::ConnectionFailed(
                "connection refused".to_string(),
            )),
        }
    }
}
