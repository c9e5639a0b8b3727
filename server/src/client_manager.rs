//! Connection registry and outbound fan-out for the room server
//!
//! This module tracks every accepted TCP connection, including:
//! - Connection ids, remote addresses and the host designation
//! - The per-connection outbound queue drained by that connection's writer task
//! - Display names and characters replayed to late joiners
//!
//! Messages are encoded once per broadcast and the resulting frames are shared
//! between recipients, so one slow socket never holds up the others. Each
//! queue is bounded: a client that lets it fill up is evicted.

use crate::error::ServerError;
use crate::room::Shutdown;
use crate::utils::unique_id;
use log::{debug, info, warn};
use shared::{encode_packet, CharacterSelection, CodecConfig, Packet};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};

/// Queued work items a client may fall behind by before it is evicted
pub const OUTBOUND_CAPACITY: usize = 1024;

/// Work item for a connection's writer task
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Newline-terminated frames to write in order
    Frames(Arc<Vec<Vec<u8>>>),
    /// Flush and shut down the write half of the socket
    Close,
}

/// Creates a bounded outbound queue plus the eviction signal tied to it
pub fn outbound_channel(capacity: usize) -> (OutboundSender, OutboundReceiver) {
    let (queue, rx) = mpsc::channel(capacity);
    let evicted = Shutdown::new();
    (
        OutboundSender {
            queue,
            evicted: evicted.clone(),
        },
        OutboundReceiver { queue: rx, evicted },
    )
}

/// Producer side, owned by the client's roster entry
#[derive(Debug, Clone)]
pub struct OutboundSender {
    queue: mpsc::Sender<Outbound>,
    evicted: Shutdown,
}

/// Consumer side, owned by the connection's writer task
#[derive(Debug)]
pub struct OutboundReceiver {
    queue: mpsc::Receiver<Outbound>,
    evicted: Shutdown,
}

impl OutboundReceiver {
    /// Next item to write. Once the client is evicted this yields `Close`
    /// ahead of anything still queued.
    pub async fn recv(&mut self) -> Option<Outbound> {
        tokio::select! {
            biased;
            _ = self.evicted.wait() => Some(Outbound::Close),
            item = self.queue.recv() => item,
        }
    }

    pub fn try_recv(&mut self) -> Result<Outbound, TryRecvError> {
        self.queue.try_recv()
    }

    /// Signal the reader task watches to drop the connection
    pub fn eviction(&self) -> Shutdown {
        self.evicted.clone()
    }

    pub fn is_evicted(&self) -> bool {
        self.evicted.is_triggered()
    }
}

/// Represents one connected player
#[derive(Debug)]
pub struct Client {
    /// Random 8 character id assigned by the server
    pub id: String,
    /// Remote address, used by the duplicate connection guard
    pub addr: SocketAddr,
    /// Whether this connection may select maps and start the game
    pub is_host: bool,
    /// When the connection was accepted
    pub connected_at: Instant,
    /// When a frame was last decoded from this connection
    pub last_seen: Instant,
    pub character_name: Option<String>,
    pub player_name: Option<String>,
    sender: OutboundSender,
}

impl Client {
    /// Creates a new client record around the sending half of its outbound queue
    pub fn new(id: String, addr: SocketAddr, is_host: bool, sender: OutboundSender) -> Self {
        let now = Instant::now();
        Self {
            id,
            addr,
            is_host,
            connected_at: now,
            last_seen: now,
            character_name: None,
            player_name: None,
            sender,
        }
    }

    /// Queues already encoded frames for this client
    ///
    /// Never waits. A full queue evicts the client and reports `QueueFull`;
    /// `ChannelClosed` means the writer task is already gone.
    pub fn send_frames(&self, frames: Arc<Vec<Vec<u8>>>) -> Result<(), ServerError> {
        match self.sender.queue.try_send(Outbound::Frames(frames)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.evict();
                Err(ServerError::QueueFull(self.id.clone()))
            }
            Err(TrySendError::Closed(_)) => Err(ServerError::ChannelClosed(self.id.clone())),
        }
    }

    /// Asks the writer task to close the socket after pending frames are written
    pub fn close(&self) {
        if self.sender.queue.try_send(Outbound::Close).is_err() {
            self.evict();
        }
    }

    /// Drops the connection without flushing what is queued
    pub fn evict(&self) {
        if !self.sender.evicted.is_triggered() {
            warn!("Evicting client {}", self.id);
            self.sender.evicted.trigger();
        }
    }

    /// Marks the client as active now
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Time since a frame was last decoded from this client
    pub fn idle_for(&self) -> Duration {
        self.last_seen.elapsed()
    }

    fn selection(&self) -> Option<CharacterSelection> {
        if self.character_name.is_none() && self.player_name.is_none() {
            return None;
        }
        Some(CharacterSelection {
            player_id: Some(self.id.clone()),
            character_name: self.character_name.clone(),
            player_name: self.player_name.clone(),
            ..Default::default()
        })
    }
}

/// Result of registering a new connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub id: String,
    pub is_host: bool,
}

/// Manages all connected clients and their outbound queues
///
/// The ClientManager hands out ids, decides who the host is, and provides
/// the broadcast primitives used by the router, the scheduler and the room
/// lifecycle. It is shared behind a lock by every connection task.
#[derive(Debug)]
pub struct ClientManager {
    /// Connected clients indexed by their id
    clients: HashMap<String, Client>,
    /// Id of the current host, if one is connected
    host_id: Option<String>,
    codec: CodecConfig,
}

impl ClientManager {
    /// Creates an empty roster that encodes with the given codec limits
    pub fn new(codec: CodecConfig) -> Self {
        Self {
            clients: HashMap::new(),
            host_id: None,
            codec,
        }
    }

    /// Registers a new connection
    ///
    /// Rejects a second connection from an address that is already connected.
    /// The first client becomes host. The welcome `player_id` message and the
    /// current roster are queued before the client becomes visible to
    /// broadcasts, so the welcome is always the first thing it reads.
    pub fn add_client(&mut self, addr: SocketAddr, sender: OutboundSender) -> Result<Registration, ServerError> {
        if self.find_client_by_addr(addr).is_some() {
            return Err(ServerError::DuplicateAddress(addr));
        }

        let id = unique_id(|candidate| self.clients.contains_key(candidate));
        let is_host = self.host_id.is_none();
        let client = Client::new(id.clone(), addr, is_host, sender);

        let welcome = Packet::PlayerId {
            id: id.clone(),
            is_host,
        };
        client.send_frames(Arc::new(encode_packet(&welcome, &self.codec)?))?;

        for other in self.clients.values() {
            if let Some(selection) = other.selection() {
                let frames = encode_packet(&Packet::CharacterSelection(selection), &self.codec)?;
                client.send_frames(Arc::new(frames))?;
            }
        }

        if is_host {
            self.host_id = Some(id.clone());
        }
        info!(
            "Client {} connected from {}{}",
            id,
            addr,
            if is_host { " (host)" } else { "" }
        );
        self.clients.insert(id.clone(), client);

        Ok(Registration { id, is_host })
    }

    /// Removes a client from the roster
    ///
    /// Returns the removed record, or None if it was already gone. Only the
    /// first caller for a given id gets Some, which is what keeps the
    /// disconnect path from running twice.
    pub fn remove_client(&mut self, id: &str) -> Option<Client> {
        let client = self.clients.remove(id)?;
        if self.host_id.as_deref() == Some(id) {
            self.host_id = None;
        }
        info!(
            "Client {} disconnected after {:?} idle",
            client.id,
            client.idle_for()
        );
        Some(client)
    }

    /// Finds a client id by remote address
    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<String> {
        self.clients
            .values()
            .find(|client| client.addr == addr)
            .map(|client| client.id.clone())
    }

    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    pub fn is_host(&self, id: &str) -> bool {
        self.host_id.as_deref() == Some(id)
    }

    pub fn host_id(&self) -> Option<&str> {
        self.host_id.as_deref()
    }

    /// Drops the host designation without removing anyone
    pub fn clear_host(&mut self) {
        if let Some(id) = self.host_id.take() {
            if let Some(client) = self.clients.get_mut(&id) {
                client.is_host = false;
            }
        }
    }

    /// Refreshes a client's last activity time. Returns false for unknown ids.
    pub fn touch(&mut self, id: &str) -> bool {
        match self.clients.get_mut(id) {
            Some(client) => {
                client.touch();
                true
            }
            None => false,
        }
    }

    /// Records a character selection so it can be replayed to late joiners
    pub fn record_selection(&mut self, id: &str, character_name: Option<&str>, player_name: Option<&str>) {
        if let Some(client) = self.clients.get_mut(id) {
            if let Some(character) = character_name {
                client.character_name = Some(character.to_string());
            }
            if let Some(name) = player_name {
                client.player_name = Some(name.to_string());
            }
        }
    }

    /// Sends a packet to every client except `exclude`
    ///
    /// The packet is encoded once. Per-recipient failures are logged and do
    /// not stop the broadcast. Returns how many clients it was queued for.
    pub fn broadcast(&self, packet: &Packet, exclude: Option<&str>) -> usize {
        match encode_packet(packet, &self.codec) {
            Ok(frames) => self.fan_out(packet.type_name(), Arc::new(frames), exclude),
            Err(e) => {
                warn!("Failed to encode {}: {}", packet.type_name(), e);
                0
            }
        }
    }

    fn fan_out(&self, kind: &str, frames: Arc<Vec<Vec<u8>>>, exclude: Option<&str>) -> usize {
        let mut delivered = 0;
        for client in self.clients.values() {
            if Some(client.id.as_str()) == exclude {
                continue;
            }
            match client.send_frames(Arc::clone(&frames)) {
                Ok(()) => delivered += 1,
                Err(e) => warn!("Failed to queue {} for {}: {}", kind, client.id, e),
            }
        }
        debug!("Queued {} for {} clients", kind, delivered);
        delivered
    }

    /// Sends a packet to a single client
    pub fn send_to(&self, id: &str, packet: &Packet) -> Result<(), ServerError> {
        let client = self
            .clients
            .get(id)
            .ok_or_else(|| ServerError::UnknownClient(id.to_string()))?;
        let frames = encode_packet(packet, &self.codec)?;
        client.send_frames(Arc::new(frames))
    }

    /// Closes every socket after its pending frames are written
    pub fn close_all(&self) {
        for client in self.clients.values() {
            client.close();
        }
    }

    /// Returns the number of currently connected clients
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns true if no clients are currently connected
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
