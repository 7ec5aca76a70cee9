//! Fire-and-forget persistence of conversation turns.

use std::sync::Arc;

use chat_relay_core::{MessageStore, Role};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

/// Outcome of one persisted turn, handed to the completion hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistReport {
    pub turn_id: Uuid,
    pub session: String,
    pub user_saved: bool,
    pub assistant_saved: bool,
}

impl PersistReport {
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.user_saved && self.assistant_saved
    }
}

/// A failed write, published on the failure channel.
#[derive(Debug, Clone)]
pub struct PersistFailure {
    pub turn_id: Uuid,
    pub session: String,
    pub role: Role,
    pub error: String,
}

/// Callback invoked after every job, successful or not.
pub type CompletionHook = Arc<dyn Fn(&PersistReport) + Send + Sync>;

struct TurnJob {
    turn_id: Uuid,
    session: String,
    user: String,
    assistant: String,
}

/// Background writer for conversation turns.
///
/// Enqueuing never waits on the store. Jobs are written in order by a single
/// task; a turn's assistant message is only written after its user message
/// succeeded, so no reply is ever stored without its question.
#[derive(Clone)]
pub struct PersistenceSink {
    tx: mpsc::UnboundedSender<TurnJob>,
    failures: broadcast::Sender<PersistFailure>,
}

impl PersistenceSink {
    /// Spawn the writer task.
    #[must_use]
    pub fn spawn(store: Arc<dyn MessageStore>) -> Self {
        Self::spawn_with_hook(store, None)
    }

    /// Spawn the writer task with a completion hook.
    #[must_use]
    pub fn spawn_with_hook(store: Arc<dyn MessageStore>, hook: Option<CompletionHook>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (failures, _) = broadcast::channel(64);

        tokio::spawn(write_loop(store, rx, failures.clone(), hook));

        Self { tx, failures }
    }

    /// Queue a user turn and its reply for persistence.
    ///
    /// Returns the id used in reports and logs.
    pub fn record_turn(&self, session: &str, user: &str, assistant: &str) -> Uuid {
        let turn_id = Uuid::new_v4();
        let job = TurnJob {
            turn_id,
            session: session.to_string(),
            user: user.to_string(),
            assistant: assistant.to_string(),
        };
        if self.tx.send(job).is_err() {
            tracing::error!(%turn_id, session, "Persistence writer has stopped, turn dropped");
        }
        turn_id
    }

    /// Receive failed writes as they happen.
    #[must_use]
    pub fn subscribe_failures(&self) -> broadcast::Receiver<PersistFailure> {
        self.failures.subscribe()
    }
}

async fn write_loop(
    store: Arc<dyn MessageStore>,
    mut rx: mpsc::UnboundedReceiver<TurnJob>,
    failures: broadcast::Sender<PersistFailure>,
    hook: Option<CompletionHook>,
) {
    while let Some(job) = rx.recv().await {
        let mut report = PersistReport {
            turn_id: job.turn_id,
            session: job.session.clone(),
            user_saved: false,
            assistant_saved: false,
        };

        for (role, content) in [(Role::User, &job.user), (Role::Assistant, &job.assistant)] {
            match store.insert(&job.session, role, content).await {
                Ok(_) => match role {
                    Role::User => report.user_saved = true,
                    _ => report.assistant_saved = true,
                },
                Err(e) => {
                    tracing::error!(
                        turn_id = %job.turn_id,
                        session = %job.session,
                        %role,
                        "Failed to persist message: {e}"
                    );
                    let _ = failures.send(PersistFailure {
                        turn_id: job.turn_id,
                        session: job.session.clone(),
                        role,
                        error: e.to_string(),
                    });
                    break;
                }
            }
        }

        if let Some(hook) = &hook {
            hook(&report);
        }
    }
    tracing::debug!("Persistence writer stopped");
}
