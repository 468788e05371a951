//! Orchestrator events and sinks
//!
//! Every state change in a run is reported as an `OrchestratorEvent`, in the
//! order it happens. Sinks are per run so concurrent runs never share a log.

use crate::models::{
    AgentMessage, AgentType, ExecutionPlan, MessageType, QueryAnalysis, ResultEnvelope, Task,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    Analysis(QueryAnalysis),
    Plan(ExecutionPlan),
    Message(AgentMessage),
    TaskUpdate(Task),
    Result(ResultEnvelope),
    Error { message: String },
}

impl OrchestratorEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            OrchestratorEvent::Analysis(_) => "analysis",
            OrchestratorEvent::Plan(_) => "plan",
            OrchestratorEvent::Message(_) => "message",
            OrchestratorEvent::TaskUpdate(_) => "task_update",
            OrchestratorEvent::Result(_) => "result",
            OrchestratorEvent::Error { .. } => "error",
        }
    }
}

/// Receives events in production order.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: OrchestratorEvent);
}

/// Discards every event.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: OrchestratorEvent) {}
}

/// Forwards events into an unbounded channel.
pub struct ChannelSink {
    tx: UnboundedSender<OrchestratorEvent>,
}

impl ChannelSink {
    pub fn new(tx: UnboundedSender<OrchestratorEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: OrchestratorEvent) {
        if let Err(e) = self.tx.send(event) {
            debug!(event_type = e.0.event_type(), "Event receiver dropped");
        }
    }
}

/// Append-only message log for one run, mirrored to the run's sink.
pub struct RunJournal {
    sink: Arc<dyn EventSink>,
    messages: Vec<AgentMessage>,
}

impl RunJournal {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            messages: Vec::new(),
        }
    }

    pub fn emit(&self, event: OrchestratorEvent) {
        self.sink.emit(event);
    }

    pub fn say(&mut self, from: AgentType, message_type: MessageType, content: impl Into<String>) {
        self.record(AgentMessage::new(from, message_type, content));
    }

    pub fn say_with(
        &mut self,
        from: AgentType,
        message_type: MessageType,
        content: impl Into<String>,
        metadata: Value,
    ) {
        self.record(AgentMessage::new(from, message_type, content).with_metadata(metadata));
    }

    fn record(&mut self, message: AgentMessage) {
        self.messages.push(message.clone());
        self.sink.emit(OrchestratorEvent::Message(message));
    }

    /// Task update followed by the full plan snapshot.
    pub fn task_updated(&self, task: &Task, plan: &ExecutionPlan) {
        self.sink.emit(OrchestratorEvent::TaskUpdate(task.clone()));
        self.sink.emit(OrchestratorEvent::Plan(plan.clone()));
    }

    pub fn messages(&self) -> &[AgentMessage] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<AgentMessage> {
        self.messages
    }
}
