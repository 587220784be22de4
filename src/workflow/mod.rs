// Agent workflow seam: the orchestrator drives whatever engine sits behind
// `AgentWorkflow` through a lazy, finite, non-restartable event stream.
pub mod agent;

use crate::citations::RetrievedSource;
use crate::errors::ChatError;
use crate::models::chat::Product;
use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use tokio::sync::oneshot;

/// One event pulled off a running workflow. The set is deliberately small:
/// anything the engine emits that the chat turn doesn't care about collapses
/// into `ToolOutput`.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent {
    /// Incremental answer text.
    AgentDelta { delta: String },
    /// Scored documents the agent consulted; feeds the citations chunk.
    Retrieval { sources: Vec<RetrievedSource> },
    /// Chart or table payload produced by an agent tool.
    ToolOutput {
        name: String,
        layout: serde_json::Value,
    },
    /// The engine's own policy classifier vetoed the turn mid-stream.
    GuardRailsTriggered { reason: String },
}

pub type EventStream = BoxStream<'static, WorkflowEvent>;

/// Handle on one running workflow invocation. Events are consumed first;
/// `result` reports the terminal outcome afterwards.
pub struct WorkflowHandle {
    pub events: EventStream,
    result: oneshot::Receiver<Result<(), String>>,
}

impl WorkflowHandle {
    pub fn new(events: EventStream, result: oneshot::Receiver<Result<(), String>>) -> Self {
        Self { events, result }
    }

    /// Handle over a fixed event list that terminates successfully. Used by
    /// synthetic event sources in tests.
    pub fn from_events(events: Vec<WorkflowEvent>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Ok(()));
        Self {
            events: Box::pin(stream::iter(events)),
            result: rx,
        }
    }

    /// Terminal outcome; await after the event stream drains.
    pub async fn result(self) -> Result<(), ChatError> {
        match self.result.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ChatError::Workflow(e)),
            // Producer went away without reporting; a drained stream counts
            // as success.
            Err(_) => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryRole {
    User,
    Assistant,
}

impl HistoryRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryRole::User => "user",
            HistoryRole::Assistant => "assistant",
        }
    }
}

/// Prior conversation turn in the representation the workflow engine expects.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryMessage {
    pub role: HistoryRole,
    pub content: String,
}

/// Caller identity and scope threaded into the workflow invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowContext {
    pub user_id: String,
    pub tenant_id: String,
    pub products: Vec<Product>,
}

#[async_trait]
pub trait AgentWorkflow: Send + Sync {
    async fn run(
        &self,
        user_input: &str,
        chat_history: Vec<HistoryMessage>,
        context: WorkflowContext,
    ) -> Result<WorkflowHandle, ChatError>;
}
