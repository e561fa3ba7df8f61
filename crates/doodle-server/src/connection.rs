use std::net::SocketAddr;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use uuid::Uuid;

use doodle_common::protocol::{self, ClientHello};

use crate::room::{PeerHandle, RoomEvent};
use crate::server::{self, SharedState};

/// Outbound frames queued per peer before the transport gets a say.
const PEER_QUEUE: usize = 64;

pub async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: &SharedState,
) -> anyhow::Result<()> {
    let mut transport = protocol::framed_transport(stream);

    // Step 1: Handshake -- the first frame names the room.
    let room = match protocol::recv_message::<ClientHello>(&mut transport).await {
        Ok(Some(ClientHello::Hello { room })) => room,
        Ok(None) => return Ok(()),
        Err(e) => {
            tracing::warn!("Rejecting connection from {}: {}", peer_addr, e);
            return Ok(());
        }
    };

    let peer_id = Uuid::new_v4();
    tracing::info!("Peer {} from {} joining room {}", peer_id, peer_addr, room);

    // Step 2: Outbound queue, drained into the socket by a writer task.
    let (tx, mut rx) = mpsc::channel::<Bytes>(PEER_QUEUE);
    let (mut sink, mut frames) = transport.split();
    let write_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(frame).await.is_err() {
                break;
            }
        }
    });

    // Step 3: Attach to the room; the presence broadcast and any catch-up
    // flow from here.
    let room_tx = server::attach(state, room, PeerHandle { id: peer_id, tx }).await;

    // Step 4: Reader loop -- every frame goes to the room verbatim.
    loop {
        match frames.next().await {
            Some(Ok(frame)) => {
                let event = RoomEvent::Frame {
                    sender: peer_id,
                    payload: frame.freeze(),
                };
                if room_tx.send(event).await.is_err() {
                    break;
                }
            }
            Some(Err(e)) => {
                tracing::warn!("Read error from {}: {}", peer_addr, e);
                break;
            }
            None => {
                tracing::info!("Peer {} disconnected", peer_id);
                break;
            }
        }
    }

    // Cleanup: tell the room, then let our sender drop so an emptied room
    // can wind down.
    let _ = room_tx.send(RoomEvent::Left { peer_id }).await;
    write_task.abort();
    Ok(())
}
