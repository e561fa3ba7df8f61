use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use doodle_common::code::RoomCode;
use doodle_common::protocol::{serialize_message, GameEvent, ServerEvent};
use doodle_common::round::RoundProjector;

/// Everything that can happen to a room, in the order the server observed
/// it. One task per room drains these sequentially, so room state has
/// exactly one writer and needs no locks.
#[derive(Debug)]
pub enum RoomEvent {
    Joined(PeerHandle),
    Left { peer_id: Uuid },
    Frame { sender: Uuid, payload: Bytes },
}

/// Outbound half of one attached client. The room only knows its identity
/// and where to push frames; everything else about the socket lives in the
/// connection task.
#[derive(Debug)]
pub struct PeerHandle {
    pub id: Uuid,
    pub tx: mpsc::Sender<Bytes>,
}

/// The set of connections currently attached to a room.
#[derive(Debug, Default)]
pub struct Peers {
    handles: Vec<PeerHandle>,
}

impl Peers {
    pub fn insert(&mut self, handle: PeerHandle) {
        self.handles.retain(|h| h.id != handle.id);
        self.handles.push(handle);
    }

    pub fn remove(&mut self, peer_id: Uuid) {
        self.handles.retain(|h| h.id != peer_id);
    }

    pub fn count(&self) -> usize {
        self.handles.len()
    }

    /// Direct send to one peer. Delivery is fire-and-forget: a peer whose
    /// queue is full or gone is its own problem, never the room's.
    pub fn send_to(&self, peer_id: Uuid, frame: Bytes) {
        if let Some(handle) = self.handles.iter().find(|h| h.id == peer_id) {
            if let Err(e) = handle.tx.try_send(frame) {
                tracing::debug!("Dropping frame for peer {}: {}", peer_id, e);
            }
        }
    }

    pub fn broadcast_all(&self, frame: &Bytes) {
        for handle in &self.handles {
            if let Err(e) = handle.tx.try_send(frame.clone()) {
                tracing::debug!("Dropping frame for peer {}: {}", handle.id, e);
            }
        }
    }

    /// Broadcast to everyone except the sending peer.
    pub fn broadcast_except(&self, sender: Uuid, frame: &Bytes) {
        for handle in self.handles.iter().filter(|h| h.id != sender) {
            if let Err(e) = handle.tx.try_send(frame.clone()) {
                tracing::debug!("Dropping frame for peer {}: {}", handle.id, e);
            }
        }
    }
}

/// One game session: the attached peers plus the projected round state.
/// Created when the first peer names its code, dropped when the last one
/// leaves; nothing in here outlives the session.
pub struct Room {
    code: RoomCode,
    peers: Peers,
    projector: RoundProjector,
}

impl Room {
    pub fn new(code: RoomCode) -> Self {
        Self {
            code,
            peers: Peers::default(),
            projector: RoundProjector::new(),
        }
    }

    pub fn handle(&mut self, event: RoomEvent, now: DateTime<Utc>) {
        match event {
            RoomEvent::Joined(handle) => {
                let peer_id = handle.id;
                self.peers.insert(handle);
                tracing::info!(
                    "Peer {} joined room {} ({} connected)",
                    peer_id,
                    self.code,
                    self.peers.count()
                );
                self.announce_presence();
                // A round already underway is reconstructed privately for
                // the newcomer, with the clock adjusted for what it missed.
                if let Some(catch_up) = self.projector.catch_up(now) {
                    match serialize_message(&catch_up) {
                        Ok(frame) => self.peers.send_to(peer_id, frame),
                        Err(e) => tracing::error!("Failed to serialize catch-up: {}", e),
                    }
                }
            }
            RoomEvent::Left { peer_id } => {
                self.peers.remove(peer_id);
                tracing::info!(
                    "Peer {} left room {} ({} connected)",
                    peer_id,
                    self.code,
                    self.peers.count()
                );
                self.announce_presence();
            }
            RoomEvent::Frame { sender, payload } => {
                if let Some(event) = GameEvent::decode(&payload) {
                    self.projector.observe(&event, now);
                }
                // The payload goes out as-is whether or not it decoded.
                self.peers.broadcast_except(sender, &payload);
            }
        }
    }

    fn announce_presence(&self) {
        let presence = ServerEvent::Presence {
            count: self.peers.count(),
        };
        match serialize_message(&presence) {
            Ok(frame) => self.peers.broadcast_all(&frame),
            Err(e) => tracing::error!("Failed to serialize presence: {}", e),
        }
    }
}

/// Drives one room until its last peer's event sender is gone. All events
/// for the room come through `events`; nothing else may touch its state.
pub async fn run(code: RoomCode, mut events: mpsc::Receiver<RoomEvent>) {
    let mut room = Room::new(code.clone());
    tracing::info!("Room {} opened", code);
    while let Some(event) = events.recv().await {
        room.handle(event, Utc::now());
    }
    tracing::info!("Room {} closed", code);
}
