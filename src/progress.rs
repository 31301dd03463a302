use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, timeout};
use tracing::{debug, warn};
use uuid::Uuid;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStep {
    Connected,
    EntityExtraction,
    ToolExecution,
    ScamDb,
    ExaSearch,
    DomainReputation,
    PhoneValidator,
    CompanyVerification,
    Reasoning,
    Completed,
    Failed,
}

impl ProgressStep {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressMessage {
    pub step: ProgressStep,
    pub tool: Option<String>,
    pub message: String,
    pub percent: u8,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub error: bool,
    #[serde(default)]
    pub heartbeat: bool,
}

impl ProgressMessage {
    pub fn new(step: ProgressStep, message: impl Into<String>, percent: u8) -> Self {
        Self {
            step,
            tool: None,
            message: message.into(),
            percent,
            timestamp: chrono::Utc::now(),
            error: matches!(step, ProgressStep::Failed),
            heartbeat: false,
        }
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    fn connected() -> Self {
        Self::new(ProgressStep::Connected, "subscribed", 0)
    }

    fn heartbeat() -> Self {
        Self {
            step: ProgressStep::Connected,
            tool: None,
            message: "heartbeat".into(),
            percent: 0,
            timestamp: chrono::Utc::now(),
            error: false,
            heartbeat: true,
        }
    }
}

struct TaskChannel {
    sender: broadcast::Sender<ProgressMessage>,
}

/// Per-task pub/sub registry. One broadcast channel per `task_id`, created
/// lazily on first publish or subscribe and torn down implicitly once its
/// last sender/receiver drops — `DashMap` gives us the shared, internally-
/// locked singleton this needs without a global mutex around the whole map.
pub struct ProgressBus {
    channels: DashMap<Uuid, TaskChannel>,
}

static PROGRESS_BUS: LazyLock<Arc<ProgressBus>> = LazyLock::new(|| Arc::new(ProgressBus::new()));

pub fn global() -> Arc<ProgressBus> {
    PROGRESS_BUS.clone()
}

impl ProgressBus {
    fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    fn channel_for(&self, task_id: Uuid) -> broadcast::Sender<ProgressMessage> {
        self.channels
            .entry(task_id)
            .or_insert_with(|| TaskChannel {
                sender: broadcast::channel(CHANNEL_CAPACITY).0,
            })
            .sender
            .clone()
    }

    /// Fire-and-forget publish. No subscribers is not an error — the
    /// orchestrator path never blocks on progress delivery. Channel
    /// teardown on a terminal step happens from the subscriber side (see
    /// `run_subscriber_session`), which is the side that actually observes
    /// the step; the sender here has no way to inspect its own history.
    pub fn publish(&self, task_id: Uuid, message: ProgressMessage) {
        let sender = self.channel_for(task_id);
        if sender.send(message).is_err() {
            debug!(%task_id, "no active progress subscribers");
        }
    }

    /// Subscribe to a task's progress stream. Returns a receiver that yields
    /// a `connected` message immediately, then every published message plus
    /// a synthetic heartbeat every 15s, closing itself on a terminal step or
    /// 60s of silence.
    pub fn subscribe(&self, task_id: Uuid) -> broadcast::Receiver<ProgressMessage> {
        let sender = self.channel_for(task_id);
        let rx = sender.subscribe();
        let _ = sender.send(ProgressMessage::connected());
        rx
    }
}

/// Drives one subscriber's session to completion: relays messages, injects
/// heartbeats, and enforces the idle timeout. Intended to run inside the
/// task that owns a single WebSocket connection.
pub async fn run_subscriber_session<F, Fut>(
    mut rx: broadcast::Receiver<ProgressMessage>,
    mut deliver: F,
) where
    F: FnMut(ProgressMessage) -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let mut heartbeat_timer = interval(HEARTBEAT_INTERVAL);
    heartbeat_timer.tick().await; // first tick fires immediately; discard

    loop {
        tokio::select! {
            recv = timeout(IDLE_TIMEOUT, rx.recv()) => {
                match recv {
                    Ok(Ok(msg)) => {
                        let is_terminal = msg.step.is_terminal();
                        if !deliver(msg).await {
                            break;
                        }
                        if is_terminal {
                            break;
                        }
                    }
                    Ok(Err(broadcast::error::RecvError::Lagged(n))) => {
                        warn!(skipped = n, "progress subscriber lagged, dropping messages");
                        continue;
                    }
                    Ok(Err(broadcast::error::RecvError::Closed)) => break,
                    Err(_) => {
                        debug!("progress subscriber idle timeout");
                        break;
                    }
                }
            }
            _ = heartbeat_timer.tick() => {
                if !deliver(ProgressMessage::heartbeat()).await {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_connected_message_first() {
        let bus = ProgressBus::new();
        let task_id = Uuid::new_v4();
        let mut rx = bus.subscribe(task_id);
        let first = rx.recv().await.unwrap();
        assert_eq!(first.step, ProgressStep::Connected);
        assert_eq!(first.percent, 0);
    }

    #[tokio::test]
    async fn subscriber_receives_published_messages_in_order() {
        let bus = ProgressBus::new();
        let task_id = Uuid::new_v4();
        let mut rx = bus.subscribe(task_id);
        rx.recv().await.unwrap(); // connected

        bus.publish(
            task_id,
            ProgressMessage::new(ProgressStep::EntityExtraction, "extracting", 10),
        );
        bus.publish(
            task_id,
            ProgressMessage::new(ProgressStep::ToolExecution, "fanning out", 30),
        );

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.step, ProgressStep::EntityExtraction);
        assert_eq!(second.step, ProgressStep::ToolExecution);
    }

    #[tokio::test]
    async fn multiple_subscribers_all_receive_fan_out() {
        let bus = ProgressBus::new();
        let task_id = Uuid::new_v4();
        let mut rx1 = bus.subscribe(task_id);
        let mut rx2 = bus.subscribe(task_id);
        rx1.recv().await.unwrap();
        rx2.recv().await.unwrap();

        bus.publish(
            task_id,
            ProgressMessage::new(ProgressStep::Completed, "done", 100),
        );

        assert_eq!(rx1.recv().await.unwrap().step, ProgressStep::Completed);
        assert_eq!(rx2.recv().await.unwrap().step, ProgressStep::Completed);
    }

    #[tokio::test]
    async fn session_closes_on_terminal_step() {
        let bus = ProgressBus::new();
        let task_id = Uuid::new_v4();
        let rx = bus.subscribe(task_id);

        bus.publish(
            task_id,
            ProgressMessage::new(ProgressStep::Completed, "done", 100),
        );

        let delivered = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let delivered_clone = delivered.clone();
        run_subscriber_session(rx, move |_msg| {
            delivered_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { true }
        })
        .await;

        assert_eq!(delivered.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn progress_message_json_roundtrip() {
        let msg = ProgressMessage::new(ProgressStep::Reasoning, "analyzing", 90).with_tool("llm");
        let json = serde_json::to_string(&msg).unwrap();
        let back: ProgressMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.step, ProgressStep::Reasoning);
        assert_eq!(back.percent, 90);
        assert_eq!(back.tool.as_deref(), Some("llm"));
    }
}
