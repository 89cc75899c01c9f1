//! Leadership Gate
//!
//! Keeps the ingestion path running on the leader and stopped everywhere
//! else. Leadership notifications are accepted without blocking and
//! applied in order by a dedicated worker task, which owns the
//! `Inactive`/`Active` state machine.

use std::sync::Arc;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::Result;

/// Gate state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GateState {
    /// Ingestion stopped
    Inactive,
    /// Ingestion running
    Active,
}

impl std::fmt::Display for GateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateState::Inactive => write!(f, "INACTIVE"),
            GateState::Active => write!(f, "ACTIVE"),
        }
    }
}

/// Something the gate can switch on and off
#[async_trait::async_trait]
pub trait IngestionPath: Send + Sync {
    /// Begin consuming notifications
    async fn start(&self) -> Result<()>;

    /// Stop consuming. Always treated as successful.
    async fn stop(&self);
}

enum GateCommand {
    Leadership(bool),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Starts and stops the ingestion path on leadership changes
pub struct LeadershipGate {
    commands: mpsc::UnboundedSender<GateCommand>,
    state: watch::Receiver<GateState>,
}

impl LeadershipGate {
    /// Create the gate and spawn its worker
    pub fn new(path: Arc<dyn IngestionPath>) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(GateState::Inactive);
        tokio::spawn(run_gate(path, rx, state_tx));
        Self { commands, state }
    }

    /// Accept a leadership notification. Never blocks.
    pub fn on_leadership_change(&self, is_leader: bool) {
        if self.commands.send(GateCommand::Leadership(is_leader)).is_err() {
            tracing::debug!("Gate is shut down, ignoring leadership change to {}", is_leader);
        }
    }

    /// A listener suitable for `MembershipCoordinator::register_listener`
    pub fn listener(self: &Arc<Self>) -> impl Fn(bool) + Send + Sync + 'static {
        let gate = Arc::clone(self);
        move |is_leader| gate.on_leadership_change(is_leader)
    }

    /// Current state
    pub fn state(&self) -> GateState {
        *self.state.borrow()
    }

    /// Wait until every notification accepted so far has been applied
    pub async fn settle(&self) -> GateState {
        let (ack, done) = oneshot::channel();
        if self.commands.send(GateCommand::Flush(ack)).is_ok() {
            let _ = done.await;
        }
        self.state()
    }

    /// Stop ingestion if active and end the worker
    pub async fn shutdown(&self) {
        let (ack, done) = oneshot::channel();
        if self.commands.send(GateCommand::Shutdown(ack)).is_ok() {
            let _ = done.await;
        }
    }
}

async fn run_gate(
    path: Arc<dyn IngestionPath>,
    mut commands: mpsc::UnboundedReceiver<GateCommand>,
    state_tx: watch::Sender<GateState>,
) {
    let mut state = GateState::Inactive;

    while let Some(command) = commands.recv().await {
        match command {
            GateCommand::Leadership(true) if state == GateState::Inactive => {
                tracing::info!("Now leader. Starting ingestion");
                match path.start().await {
                    Ok(()) => {
                        state = GateState::Active;
                        tracing::info!("Ingestion active");
                    }
                    Err(e) => {
                        tracing::error!("Failed to start ingestion, gate stays inactive: {}", e);
                    }
                }
            }
            GateCommand::Leadership(false) if state == GateState::Active => {
                tracing::info!("No longer leader. Stopping ingestion");
                path.stop().await;
                state = GateState::Inactive;
                tracing::info!("Ingestion stopped");
            }
            GateCommand::Leadership(is_leader) => {
                tracing::debug!("Redundant leadership notification ({}) while {}", is_leader, state);
            }
            GateCommand::Flush(ack) => {
                let _ = ack.send(());
            }
            GateCommand::Shutdown(ack) => {
                if state == GateState::Active {
                    path.stop().await;
                }
                state_tx.send_replace(GateState::Inactive);
                let _ = ack.send(());
                break;
            }
        }
        state_tx.send_replace(state);
    }

    tracing::debug!("Gate worker stopped");
}
