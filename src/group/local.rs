//! In-process Group Hub
//!
//! A sequenced, loss-free group substrate for nodes sharing one process.
//! All deliveries happen under a single lock, so every member observes
//! the same views and payloads in the same order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use bytes::Bytes;
use tokio::sync::mpsc;

use super::{GroupChannel, GroupSender, GroupTransport, GroupView, Inbound, MemberId};
use crate::error::{Error, Result};

struct Endpoint {
    id: MemberId,
    views: mpsc::UnboundedSender<GroupView>,
    messages: mpsc::UnboundedSender<Inbound>,
}

#[derive(Default)]
struct LocalGroup {
    view_id: u64,
    members: Vec<Endpoint>,
}

impl LocalGroup {
    fn current_view(&self) -> GroupView {
        GroupView::new(
            self.view_id,
            self.members.iter().map(|e| e.id.clone()).collect(),
        )
    }

    /// Bump the view number and deliver the new view to every member
    fn install_view(&mut self) {
        self.view_id += 1;
        let view = self.current_view();
        for endpoint in &self.members {
            if endpoint.views.send(view.clone()).is_err() {
                tracing::debug!("View {} not delivered to {}: receiver dropped", view, endpoint.id);
            }
        }
    }
}

#[derive(Default)]
struct HubState {
    groups: HashMap<String, LocalGroup>,
    closed: bool,
}

/// Shared in-process substrate
#[derive(Clone, Default)]
pub struct LocalGroupHub {
    state: Arc<Mutex<HubState>>,
}

impl LocalGroupHub {
    /// Create an empty hub
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport that joins this hub as the given member
    pub fn transport(&self, member: impl Into<MemberId>) -> LocalTransport {
        LocalTransport {
            hub: self.clone(),
            member: member.into(),
        }
    }

    /// Drop a member as if its process died. Survivors get a new view.
    pub fn crash(&self, group: &str, member: &str) {
        self.remove_member(group, member);
    }

    /// Refuse all further joins
    pub fn shutdown(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.closed = true;
        }
    }

    /// Current view of a group, if it has ever been joined
    pub fn view(&self, group: &str) -> Option<GroupView> {
        let state = self.state.lock().ok()?;
        state.groups.get(group).map(LocalGroup::current_view)
    }

    fn remove_member(&self, group: &str, member: &str) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        let Some(local_group) = state.groups.get_mut(group) else {
            return false;
        };
        let before = local_group.members.len();
        local_group.members.retain(|e| e.id != member);
        if local_group.members.len() == before {
            return false;
        }
        tracing::debug!("Member {} left local group {}", member, group);
        local_group.install_view();
        true
    }
}

/// Joins a [`LocalGroupHub`] under a fixed member id
#[derive(Clone)]
pub struct LocalTransport {
    hub: LocalGroupHub,
    member: MemberId,
}

#[async_trait::async_trait]
impl GroupTransport for LocalTransport {
    async fn join(&self, group: &str) -> Result<GroupChannel> {
        let (views_tx, views_rx) = mpsc::unbounded_channel();
        let (messages_tx, messages_rx) = mpsc::unbounded_channel();

        {
            let mut state = self.hub.state.lock().map_err(|_| Error::Membership {
                group: group.to_string(),
                reason: "hub lock poisoned".into(),
            })?;

            if state.closed {
                return Err(Error::Membership {
                    group: group.to_string(),
                    reason: "local hub is shut down".into(),
                });
            }

            let local_group = state.groups.entry(group.to_string()).or_default();
            if local_group.members.iter().any(|e| e.id == self.member) {
                return Err(Error::Membership {
                    group: group.to_string(),
                    reason: format!("member {} already joined", self.member),
                });
            }

            local_group.members.push(Endpoint {
                id: self.member.clone(),
                views: views_tx,
                messages: messages_tx,
            });
            local_group.install_view();
        }

        tracing::debug!("Member {} joined local group {}", self.member, group);

        Ok(GroupChannel {
            local: self.member.clone(),
            views: views_rx,
            messages: messages_rx,
            sender: Arc::new(LocalSender {
                hub: self.hub.clone(),
                group: group.to_string(),
                member: self.member.clone(),
                left: AtomicBool::new(false),
            }),
        })
    }
}

struct LocalSender {
    hub: LocalGroupHub,
    group: String,
    member: MemberId,
    left: AtomicBool,
}

#[async_trait::async_trait]
impl GroupSender for LocalSender {
    async fn send(&self, payload: Bytes) -> Result<()> {
        if self.left.load(Ordering::SeqCst) {
            return Err(Error::Transport("channel closed".into()));
        }

        let state = self
            .hub
            .state
            .lock()
            .map_err(|_| Error::Transport("hub lock poisoned".into()))?;
        let local_group = state
            .groups
            .get(&self.group)
            .filter(|g| g.members.iter().any(|e| e.id == self.member))
            .ok_or_else(|| Error::Transport(format!("{} is not a member of {}", self.member, self.group)))?;

        // Loopback included: the sender receives its own broadcast too
        for endpoint in &local_group.members {
            let inbound = Inbound {
                sender: self.member.clone(),
                payload: payload.clone(),
            };
            if endpoint.messages.send(inbound).is_err() {
                tracing::trace!("Broadcast from {} not delivered to {}: receiver dropped", self.member, endpoint.id);
            }
        }
        Ok(())
    }

    async fn leave(&self) -> Result<()> {
        if self.left.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.hub.remove_member(&self.group, &self.member);
        Ok(())
    }
}
