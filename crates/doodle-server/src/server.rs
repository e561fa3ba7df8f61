use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock};

use doodle_common::code::RoomCode;

use crate::connection;
use crate::room::{self, PeerHandle, RoomEvent};

/// Queue depth for a room's inbound event stream.
const ROOM_QUEUE: usize = 256;

/// Rooms are addressed by code and held weakly: a room task lives exactly as
/// long as connections hold strong senders into it, so room lifetime follows
/// membership without the registry keeping ghosts alive.
pub struct ServerState {
    pub rooms: RwLock<HashMap<RoomCode, mpsc::WeakSender<RoomEvent>>>,
    pub active_connections: AtomicUsize,
    pub max_connections: usize,
}

pub type SharedState = Arc<ServerState>;

pub async fn run(addr: SocketAddr, max_connections: usize) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Listening on {}", addr);
    serve(listener, max_connections).await
}

pub async fn serve(listener: TcpListener, max_connections: usize) -> anyhow::Result<()> {
    let state: SharedState = Arc::new(ServerState {
        rooms: RwLock::new(HashMap::new()),
        active_connections: AtomicUsize::new(0),
        max_connections,
    });

    loop {
        let (stream, peer_addr) = listener.accept().await?;

        // Enforce max connections
        let conn_count = state.active_connections.load(Ordering::Relaxed);
        if conn_count >= state.max_connections {
            tracing::warn!(
                "Rejecting connection from {} (max {} reached)",
                peer_addr,
                state.max_connections
            );
            drop(stream);
            continue;
        }

        tracing::info!("New connection from {} ({}/{})", peer_addr, conn_count + 1, state.max_connections);

        state.active_connections.fetch_add(1, Ordering::Relaxed);
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = connection::handle_connection(stream, peer_addr, &state).await {
                tracing::warn!("Connection error from {}: {}", peer_addr, e);
            }
            state.active_connections.fetch_sub(1, Ordering::Relaxed);
        });
    }
}

/// Attach a freshly greeted connection to its room, creating the room if
/// this is the first peer to name its code. Returns the room's event queue
/// for the connection's subsequent frames.
pub async fn attach(
    state: &SharedState,
    code: RoomCode,
    peer: PeerHandle,
) -> mpsc::Sender<RoomEvent> {
    let mut event = RoomEvent::Joined(peer);
    loop {
        let room_tx = {
            let mut rooms = state.rooms.write().await;
            match rooms.get(&code).and_then(|weak| weak.upgrade()) {
                Some(tx) => tx,
                None => {
                    let tx = spawn_room(state.clone(), code.clone());
                    rooms.insert(code.clone(), tx.downgrade());
                    tx
                }
            }
        };
        match room_tx.send(event).await {
            Ok(()) => return room_tx,
            // The room wound down between lookup and send; go around and
            // take a fresh one.
            Err(mpsc::error::SendError(returned)) => event = returned,
        }
    }
}

fn spawn_room(state: SharedState, code: RoomCode) -> mpsc::Sender<RoomEvent> {
    let (tx, rx) = mpsc::channel(ROOM_QUEUE);
    tokio::spawn(async move {
        room::run(code.clone(), rx).await;
        // Drop the registry entry unless a newer room already took the code
        // over.
        let mut rooms = state.rooms.write().await;
        if rooms
            .get(&code)
            .map(|weak| weak.upgrade().is_none())
            .unwrap_or(false)
        {
            rooms.remove(&code);
        }
    });
    tx
}
