//! TCP Group Transport
//!
//! Heartbeat-based membership between processes. Each member announces
//! itself to every address it knows; a member silent for longer than the
//! heartbeat timeout is dropped from the view. Views are ordered by join
//! time (oldest first, ties broken by id), so members holding the same
//! liveness information compute the same ordering.
//!
//! A joining member delivers no view until it has heard from its seeds or
//! one heartbeat timeout has passed. View ids are carried in heartbeats and
//! a new view always takes an id above every id heard so far.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use bytes::Bytes;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::protocol::{read_frame, write_frame, GroupFrame};
use super::{GroupChannel, GroupSender, GroupTransport, GroupView, Inbound, MemberId};
use crate::config::WolfCastConfig;
use crate::error::{Error, Result};

/// Settings for the TCP transport
#[derive(Debug, Clone)]
pub struct TcpGroupConfig {
    /// This member's id
    pub member_id: MemberId,
    /// Address to listen on
    pub bind_address: String,
    /// Address other members use to reach us
    pub advertise_address: String,
    /// Addresses contacted before any heartbeat arrives
    pub seeds: Vec<String>,
    /// Interval between heartbeats
    pub heartbeat_interval: Duration,
    /// Silence after which a member is dropped
    pub heartbeat_timeout: Duration,
    /// Outbound connect timeout
    pub connect_timeout: Duration,
}

impl TcpGroupConfig {
    /// Build transport settings from the node configuration
    pub fn from_config(config: &WolfCastConfig) -> Self {
        Self {
            member_id: config.node.id.clone(),
            bind_address: config.node.bind_address.clone(),
            advertise_address: config.advertise_address().to_string(),
            seeds: config.cluster.peers.clone(),
            heartbeat_interval: config.heartbeat_interval(),
            heartbeat_timeout: config.heartbeat_timeout(),
            connect_timeout: Duration::from_secs(2),
        }
    }
}

/// TCP group-communication substrate
pub struct TcpGroup {
    config: TcpGroupConfig,
}

impl TcpGroup {
    /// Create a new transport
    pub fn new(config: TcpGroupConfig) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl GroupTransport for TcpGroup {
    async fn join(&self, group: &str) -> Result<GroupChannel> {
        let listener = TcpListener::bind(&self.config.bind_address)
            .await
            .map_err(|e| Error::Membership {
                group: group.to_string(),
                reason: format!("cannot listen on {}: {}", self.config.bind_address, e),
            })?;
        tracing::info!(
            "Group transport listening on {} (advertised as {})",
            self.config.bind_address,
            self.config.advertise_address
        );

        let (views_tx, views_rx) = mpsc::unbounded_channel();
        let (messages_tx, messages_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared::new(group.to_string(), self.config.clone(), views_tx, messages_tx));

        tokio::spawn(accept_loop(listener, Arc::clone(&shared)));
        tokio::spawn(heartbeat_loop(Arc::clone(&shared)));
        tokio::spawn(discover(Arc::clone(&shared)));

        Ok(GroupChannel {
            local: self.config.member_id.clone(),
            views: views_rx,
            messages: messages_rx,
            sender: Arc::new(TcpSender { shared }),
        })
    }
}

/// Liveness record of a remote member
#[derive(Debug, Clone)]
struct PeerRecord {
    address: String,
    joined_at: i64,
    last_seen: Instant,
}

/// State shared by the accept loop, heartbeat loop, and sender
struct Shared {
    group: String,
    config: TcpGroupConfig,
    joined_at: i64,
    peers: Mutex<HashMap<MemberId, PeerRecord>>,
    contacts: Mutex<HashSet<String>>,
    view: Mutex<GroupView>,
    /// Highest view id heard from any member, including ourselves
    highest_view: AtomicU64,
    /// No view is delivered before discovery finishes
    discovered: AtomicBool,
    views_tx: mpsc::UnboundedSender<GroupView>,
    messages_tx: mpsc::UnboundedSender<Inbound>,
    shutdown: CancellationToken,
    left: AtomicBool,
}

impl Shared {
    fn new(
        group: String,
        config: TcpGroupConfig,
        views_tx: mpsc::UnboundedSender<GroupView>,
        messages_tx: mpsc::UnboundedSender<Inbound>,
    ) -> Self {
        let contacts = config
            .seeds
            .iter()
            .filter(|addr| **addr != config.advertise_address)
            .cloned()
            .collect();

        Self {
            group,
            joined_at: chrono::Utc::now().timestamp_millis(),
            peers: Mutex::new(HashMap::new()),
            contacts: Mutex::new(contacts),
            view: Mutex::new(GroupView::new(0, Vec::new())),
            highest_view: AtomicU64::new(0),
            discovered: AtomicBool::new(false),
            views_tx,
            messages_tx,
            shutdown: CancellationToken::new(),
            left: AtomicBool::new(false),
            config,
        }
    }

    fn member_id(&self) -> &str {
        &self.config.member_id
    }

    /// Recompute the ordered member list and deliver it if it changed
    fn refresh_view(&self) {
        if !self.discovered.load(Ordering::SeqCst) {
            return;
        }

        // Held across the snapshot so concurrent refreshes install in order
        let Ok(mut view) = self.view.lock() else {
            return;
        };
        let mut ordered: Vec<(i64, MemberId)> = match self.peers.lock() {
            Ok(peers) => peers
                .iter()
                .map(|(id, record)| (record.joined_at, id.clone()))
                .collect(),
            Err(_) => return,
        };
        ordered.push((self.joined_at, self.config.member_id.clone()));
        ordered.sort();
        let members: Vec<MemberId> = ordered.into_iter().map(|(_, id)| id).collect();

        if view.members == members {
            return;
        }
        let view_id = self.highest_view.load(Ordering::SeqCst).max(view.view_id) + 1;
        self.highest_view.fetch_max(view_id, Ordering::SeqCst);
        *view = GroupView::new(view_id, members);
        tracing::info!("Installing view {}", view);
        if self.views_tx.send(view.clone()).is_err() {
            tracing::debug!("View {} not delivered: receiver dropped", view);
        }
    }

    /// Whether every seed has been heard from
    fn seeds_answered(&self) -> bool {
        let Ok(peers) = self.peers.lock() else {
            return false;
        };
        self.config
            .seeds
            .iter()
            .filter(|seed| **seed != self.config.advertise_address)
            .all(|seed| peers.values().any(|record| record.address == *seed))
    }

    /// Drop members whose heartbeats stopped
    fn expire_peers(&self) {
        let expired: Vec<MemberId> = match self.peers.lock() {
            Ok(mut peers) => {
                let timeout = self.config.heartbeat_timeout;
                let expired: Vec<MemberId> = peers
                    .iter()
                    .filter(|(_, record)| record.last_seen.elapsed() > timeout)
                    .map(|(id, _)| id.clone())
                    .collect();
                for id in &expired {
                    peers.remove(id);
                }
                expired
            }
            Err(_) => return,
        };

        if !expired.is_empty() {
            tracing::warn!("Members timed out: {:?}", expired);
            self.refresh_view();
        }
    }

    /// Addresses of every remote member in the current view
    fn member_addresses(&self) -> Vec<String> {
        self.peers
            .lock()
            .map(|peers| peers.values().map(|r| r.address.clone()).collect())
            .unwrap_or_default()
    }

    /// Everything we should send heartbeats to
    fn heartbeat_targets(&self) -> Vec<String> {
        let mut targets: HashSet<String> = self
            .contacts
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default();
        targets.extend(self.member_addresses());
        targets.remove(&self.config.advertise_address);
        targets.into_iter().collect()
    }

    fn handle_frame(&self, frame: GroupFrame, peer_addr: &str) {
        if frame.group() != self.group {
            tracing::trace!("Ignoring {} for group {} from {}", frame.type_name(), frame.group(), peer_addr);
            return;
        }

        match frame {
            GroupFrame::Heartbeat { member, address, joined_at, view_id, known, .. } => {
                if member == self.member_id() {
                    return;
                }
                self.highest_view.fetch_max(view_id, Ordering::SeqCst);
                if let Ok(mut contacts) = self.contacts.lock() {
                    contacts.insert(address.clone());
                    contacts.extend(known.into_iter().filter(|a| *a != self.config.advertise_address));
                }
                if let Ok(mut peers) = self.peers.lock() {
                    peers.insert(member, PeerRecord {
                        address,
                        joined_at,
                        last_seen: Instant::now(),
                    });
                }
                self.refresh_view();
            }
            GroupFrame::Leave { member, .. } => {
                let removed = self
                    .peers
                    .lock()
                    .map(|mut peers| peers.remove(&member).is_some())
                    .unwrap_or(false);
                if removed {
                    tracing::info!("Member {} left the group", member);
                    self.refresh_view();
                }
            }
            GroupFrame::Data { sender, payload, .. } => {
                tracing::trace!("Received {} bytes from {}", payload.len(), sender);
                let inbound = Inbound {
                    sender,
                    payload: Bytes::from(payload),
                };
                if self.messages_tx.send(inbound).is_err() {
                    tracing::trace!("Dropping broadcast from {}: receiver dropped", peer_addr);
                }
            }
        }
    }

    fn heartbeat_frame(&self) -> GroupFrame {
        let mut known: Vec<String> = self.member_addresses();
        known.push(self.config.advertise_address.clone());
        let view_id = self.view.lock().map(|view| view.view_id).unwrap_or_default();
        GroupFrame::Heartbeat {
            group: self.group.clone(),
            member: self.config.member_id.clone(),
            address: self.config.advertise_address.clone(),
            joined_at: self.joined_at,
            view_id,
            known,
        }
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((socket, addr)) => {
                        let shared = Arc::clone(&shared);
                        let peer_addr = addr.to_string();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(socket, &peer_addr, &shared).await {
                                tracing::debug!("Connection error from {}: {}", peer_addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                    }
                }
            }
            _ = shared.shutdown.cancelled() => break,
        }
    }
    tracing::info!("Group transport stopped listening");
}

async fn handle_connection(socket: TcpStream, peer_addr: &str, shared: &Shared) -> Result<()> {
    let (mut reader, _writer) = socket.into_split();
    loop {
        match read_frame(&mut reader).await {
            Ok(frame) => shared.handle_frame(frame, peer_addr),
            Err(Error::Io(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Hold back the first view until the seeds answered or the timeout passed
async fn discover(shared: Arc<Shared>) {
    let deadline = tokio::time::sleep(shared.config.heartbeat_timeout);
    tokio::pin!(deadline);
    let mut poll = tokio::time::interval(Duration::from_millis(10));

    while !shared.seeds_answered() {
        tokio::select! {
            _ = poll.tick() => {}
            _ = &mut deadline => {
                tracing::debug!("Discovery timed out; not every seed answered");
                break;
            }
            _ = shared.shutdown.cancelled() => return,
        }
    }

    shared.discovered.store(true, Ordering::SeqCst);
    shared.refresh_view();
}

async fn heartbeat_loop(shared: Arc<Shared>) {
    let mut ticker = tokio::time::interval(shared.config.heartbeat_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shared.shutdown.cancelled() => break,
        }

        shared.expire_peers();

        let frame = shared.heartbeat_frame();
        let targets = shared.heartbeat_targets();
        let sends = targets.iter().map(|address| {
            send_frame(address, &frame, shared.config.connect_timeout)
        });
        for (address, result) in targets.iter().zip(futures::future::join_all(sends).await) {
            if let Err(e) = result {
                tracing::trace!("Heartbeat to {} failed: {}", address, e);
            }
        }
    }
}

/// Open a connection, write one frame, close
async fn send_frame(address: &str, frame: &GroupFrame, connect_timeout: Duration) -> Result<()> {
    let stream = match timeout(connect_timeout, TcpStream::connect(address)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            return Err(Error::ConnectionFailed {
                address: address.to_string(),
                reason: e.to_string(),
            })
        }
        Err(_) => return Err(Error::ConnectionTimeout(address.to_string())),
    };
    stream.set_nodelay(true)?;
    let (_, mut writer) = stream.into_split();
    write_frame(&mut writer, frame).await
}

struct TcpSender {
    shared: Arc<Shared>,
}

#[async_trait::async_trait]
impl GroupSender for TcpSender {
    async fn send(&self, payload: Bytes) -> Result<()> {
        if self.shared.left.load(Ordering::SeqCst) {
            return Err(Error::Transport("channel closed".into()));
        }

        let frame = GroupFrame::Data {
            group: self.shared.group.clone(),
            sender: self.shared.config.member_id.clone(),
            payload: payload.to_vec(),
        };

        // Loopback to ourselves, like every other member
        let loopback = Inbound {
            sender: self.shared.config.member_id.clone(),
            payload,
        };
        if self.shared.messages_tx.send(loopback).is_err() {
            tracing::trace!("Loopback not delivered: receiver dropped");
        }

        let addresses = self.shared.member_addresses();
        let sends = addresses.iter().map(|address| {
            send_frame(address, &frame, self.shared.config.connect_timeout)
        });
        for (address, result) in addresses.iter().zip(futures::future::join_all(sends).await) {
            match result {
                Ok(()) => tracing::debug!("Delivered broadcast to {}", address),
                Err(e) => tracing::warn!("Broadcast to {} failed: {}", address, e),
            }
        }
        Ok(())
    }

    async fn leave(&self) -> Result<()> {
        if self.shared.left.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let frame = GroupFrame::Leave {
            group: self.shared.group.clone(),
            member: self.shared.config.member_id.clone(),
        };
        let addresses = self.shared.member_addresses();
        let sends = addresses.iter().map(|address| {
            send_frame(address, &frame, self.shared.config.connect_timeout)
        });
        futures::future::join_all(sends).await;

        self.shared.shutdown.cancel();
        tracing::info!("Left group {}", self.shared.group);
        Ok(())
    }
}
