//! Membership Coordinator
//!
//! Joins a named group, tracks the ordered member list, and derives
//! leadership: the member at position 0 of the current view leads, under
//! a term equal to the id of that view.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::term::{TermCheck, TermTracker};
use crate::error::{Error, Result};
use crate::group::{GroupSender, GroupTransport, GroupView, Inbound, MemberId};

/// Callback invoked with the new leadership value whenever it flips
pub type ChangeListener = Box<dyn Fn(bool) + Send + Sync>;

/// Substrate deliveries handed back by [`MembershipCoordinator::join`]
pub struct Deliveries {
    /// Views, to be fed to [`MembershipCoordinator::spawn_view_delivery`]
    pub views: mpsc::UnboundedReceiver<GroupView>,
    /// Inbound payloads, for the replication receiver
    pub messages: mpsc::UnboundedReceiver<Inbound>,
}

/// Authoritative membership and leadership knowledge for this process
pub struct MembershipCoordinator {
    /// This member's id
    local: MemberId,
    /// Group name
    group: String,
    /// Derived leadership state
    leader: AtomicBool,
    /// Last delivered view
    view: RwLock<GroupView>,
    /// Registered listeners, in registration order
    listeners: Mutex<Vec<ChangeListener>>,
    /// Leadership terms
    terms: TermTracker,
    /// Outbound half of the group channel
    sender: Arc<dyn GroupSender>,
    /// Set once shutdown has run
    closed: AtomicBool,
}

impl MembershipCoordinator {
    /// Join the named group.
    ///
    /// View delivery does not start until [`spawn_view_delivery`] is
    /// called, so listeners registered in between see the first flip.
    ///
    /// [`spawn_view_delivery`]: MembershipCoordinator::spawn_view_delivery
    pub async fn join(transport: &dyn GroupTransport, group: &str) -> Result<(Arc<Self>, Deliveries)> {
        tracing::info!("Connecting to group: {}", group);
        let channel = transport.join(group).await?;
        tracing::info!("Joined group {} as {}", group, channel.local);

        let coordinator = Arc::new(Self {
            local: channel.local,
            group: group.to_string(),
            leader: AtomicBool::new(false),
            view: RwLock::new(GroupView::new(0, Vec::new())),
            listeners: Mutex::new(Vec::new()),
            terms: TermTracker::new(),
            sender: channel.sender,
            closed: AtomicBool::new(false),
        });

        Ok((coordinator, Deliveries {
            views: channel.views,
            messages: channel.messages,
        }))
    }

    /// Run view delivery on its own task, one view at a time
    pub fn spawn_view_delivery(self: &Arc<Self>, mut views: mpsc::UnboundedReceiver<GroupView>) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(view) = views.recv().await {
                coordinator.on_view_change(view);
            }
            tracing::debug!("View delivery for {} stopped", coordinator.local);
        })
    }

    /// Apply a newly delivered view.
    ///
    /// Listeners run synchronously on the calling context, in registration
    /// order, only when the leadership value actually changes.
    pub fn on_view_change(&self, view: GroupView) {
        let is_leader = view.coordinator().map(|m| *m == self.local).unwrap_or(false);
        let view_id = view.view_id;
        tracing::info!("View accepted: {}", view);

        if let Ok(mut current) = self.view.write() {
            *current = view;
        }

        // Term first, so a broadcast never sees the flag without it
        let term = is_leader.then(|| self.terms.lead(view_id));
        let previous = self.leader.swap(is_leader, Ordering::SeqCst);
        match term {
            Some(term) if !previous => {
                tracing::info!("{} is the leader", self.local);
                tracing::info!("Leadership acquired with term {}", term);
            }
            Some(term) => tracing::info!("{} is the leader (term {})", self.local, term),
            None => tracing::info!("{} is a follower", self.local),
        }

        if is_leader == previous {
            return;
        }

        tracing::info!("Notifying listeners about leadership change");
        self.notify_listeners(is_leader);
    }

    fn notify_listeners(&self, is_leader: bool) {
        match self.listeners.lock() {
            Ok(listeners) => {
                for listener in listeners.iter() {
                    listener(is_leader);
                }
            }
            Err(_) => tracing::error!("Listener registry poisoned, leadership change not delivered"),
        }
    }

    /// Append a listener; there is no removal
    pub fn register_listener<F>(&self, listener: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push(Box::new(listener));
        }
    }

    /// Leadership as of the last delivered view
    pub fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }

    /// This member's id
    pub fn local_id(&self) -> &str {
        &self.local
    }

    /// Group name
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Last delivered view
    pub fn view(&self) -> GroupView {
        self.view
            .read()
            .map(|v| v.clone())
            .unwrap_or_else(|_| GroupView::new(0, Vec::new()))
    }

    /// Term this node leads (or last led) under
    pub fn term(&self) -> u64 {
        self.terms.current()
    }

    /// Record the term carried by an inbound broadcast
    pub fn observe_term(&self, term: u64) -> TermCheck {
        self.terms.observe(term)
    }

    /// Hand a payload to the transport for all current members
    pub async fn broadcast(&self, payload: Bytes) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Transport("channel closed".into()));
        }
        let len = payload.len();
        self.sender.send(payload).await?;
        tracing::info!("Broadcasted {} bytes to group {}", len, self.group);
        Ok(())
    }

    /// Leave the group. Idempotent.
    pub async fn shutdown(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.leader.store(false, Ordering::SeqCst);
        self.sender.leave().await?;
        tracing::info!("{} left group {}", self.local, self.group);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use crate::group::LocalGroupHub;

    fn view(id: u64, members: &[&str]) -> GroupView {
        GroupView::new(id, members.iter().map(|m| m.to_string()).collect())
    }

    async fn coordinator(hub: &LocalGroupHub, id: &str) -> Arc<MembershipCoordinator> {
        let (coordinator, _deliveries) = MembershipCoordinator::join(&hub.transport(id), "g")
            .await
            .unwrap();
        coordinator
    }

    #[tokio::test]
    async fn test_leadership_uniqueness() {
        let hub = LocalGroupHub::new();
        let nodes = [
            coordinator(&hub, "a").await,
            coordinator(&hub, "b").await,
            coordinator(&hub, "c").await,
        ];

        let shared = view(3, &["b", "a", "c"]);
        for node in &nodes {
            node.on_view_change(shared.clone());
        }

        let leaders: Vec<_> = nodes.iter().filter(|n| n.is_leader()).collect();
        assert_eq!(leaders.len(), 1);
        assert_eq!(leaders[0].local_id(), "b");
    }

    #[tokio::test]
    async fn test_listeners_fire_only_on_flip_in_order() {
        let hub = LocalGroupHub::new();
        let node = coordinator(&hub, "a").await;

        let events = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second"] {
            let events = Arc::clone(&events);
            node.register_listener(move |leader| events.lock().unwrap().push((tag, leader)));
        }

        node.on_view_change(view(1, &["a"]));
        node.on_view_change(view(2, &["a", "b"]));
        node.on_view_change(view(3, &["b", "a"]));
        node.on_view_change(view(4, &["c", "b", "a"]));

        let events = events.lock().unwrap();
        assert_eq!(
            *events,
            vec![("first", true), ("second", true), ("first", false), ("second", false)]
        );
    }

    #[tokio::test]
    async fn test_term_follows_led_view() {
        let hub = LocalGroupHub::new();
        let node = coordinator(&hub, "a").await;

        node.on_view_change(view(1, &["a"]));
        assert_eq!(node.term(), 1);

        node.on_view_change(view(2, &["b", "a"]));
        assert_eq!(node.observe_term(2), TermCheck::Current);
        node.on_view_change(view(3, &["a"]));
        assert_eq!(node.term(), 3);

        // Still leading after a join: the term moves with the view
        node.on_view_change(view(5, &["a", "c"]));
        assert_eq!(node.term(), 5);
    }

    #[tokio::test]
    async fn test_members_agree_on_term_after_flapping() {
        let hub = LocalGroupHub::new();
        let a = coordinator(&hub, "a").await;
        let b = coordinator(&hub, "b").await;

        let views = [
            view(1, &["b", "a", "c"]),
            view(2, &["c", "a", "b"]),
            view(3, &["b", "a", "c"]),
            view(4, &["a", "b", "c"]),
        ];
        for shared in views {
            a.on_view_change(shared.clone());
            b.on_view_change(shared);
        }

        assert!(a.is_leader());
        assert_eq!(a.term(), 4);
        assert_eq!(b.observe_term(a.term()), TermCheck::Current);
    }

    #[tokio::test]
    async fn test_empty_view_is_not_leader() {
        let hub = LocalGroupHub::new();
        let node = coordinator(&hub, "a").await;
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        node.register_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        node.on_view_change(view(1, &[]));
        assert!(!node.is_leader());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_view_delivery_task_applies_views() {
        let hub = LocalGroupHub::new();
        let (node, deliveries) = MembershipCoordinator::join(&hub.transport("a"), "g")
            .await
            .unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        node.register_listener(move |leader| {
            let _ = tx.send(leader);
        });
        node.spawn_view_delivery(deliveries.views);

        assert_eq!(rx.recv().await, Some(true));
        assert!(node.is_leader());
        assert_eq!(node.view().members, vec!["a"]);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let hub = LocalGroupHub::new();
        let node = coordinator(&hub, "a").await;
        node.shutdown().await.unwrap();
        node.shutdown().await.unwrap();

        let result = node.broadcast(Bytes::from_static(b"x")).await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }
}
