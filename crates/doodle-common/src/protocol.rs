use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Deserializer, Serialize};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::code::RoomCode;

// -- Framing --

pub type Transport = Framed<TcpStream, LengthDelimitedCodec>;

pub fn framed_transport(stream: TcpStream) -> Transport {
    LengthDelimitedCodec::builder()
        .max_frame_length(64 * 1024)
        .new_framed(stream)
}

// -- Handshake --

/// The only frame the server insists on understanding: the first one, naming
/// the room to attach to. Every frame after it is game payload and passes
/// through the relay untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ClientHello {
    Hello { room: RoomCode },
}

// -- Game events (the server-interpreted subset) --

/// Which side of the party currently has the active role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    A,
    B,
}

/// Message kinds the relay recognizes while forwarding. Recognition only
/// feeds the round projection; a frame that fails to decode is still relayed
/// verbatim, so clients are free to invent kinds the server has never heard
/// of.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum GameEvent {
    #[serde(rename_all = "camelCase")]
    RoundStart {
        topic: String,
        acting_side: Side,
        round_number: u32,
        #[serde(default, deserialize_with = "lenient_seconds")]
        allotted_seconds: Option<u32>,
    },
    RoundResolved,
    TimeExpired,
    SessionConcluded,
    LobbyReset,
}

impl GameEvent {
    /// Opportunistic decode of a raw frame. `None` covers everything the
    /// relay does not interpret: unknown kinds, missing fields, payloads
    /// that are not structured at all.
    pub fn decode(payload: &[u8]) -> Option<Self> {
        serde_json::from_slice(payload).ok()
    }
}

/// Accepts whatever a client put in `allottedSeconds` without failing the
/// surrounding decode. Anything that is not a non-negative number counts as
/// unusable and comes back as `None`.
fn lenient_seconds<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value
        .as_f64()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(|secs| secs as u32))
}

// -- Relay-originated events --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ServerEvent {
    Presence {
        count: usize,
    },
    #[serde(rename_all = "camelCase")]
    CatchUp {
        topic: String,
        acting_side: Side,
        round_number: u32,
        remaining_seconds: u32,
    },
}

// -- Serialization helpers --

pub fn serialize_message<T: Serialize>(msg: &T) -> Result<Bytes, serde_json::Error> {
    let json = serde_json::to_vec(msg)?;
    Ok(Bytes::from(json))
}

pub fn deserialize_message<T: for<'de> Deserialize<'de>>(
    data: &[u8],
) -> Result<T, serde_json::Error> {
    serde_json::from_slice(data)
}

// -- Transport helpers --

pub async fn send_message<T: Serialize>(
    transport: &mut Transport,
    msg: &T,
) -> anyhow::Result<()> {
    let bytes = serialize_message(msg).map_err(|e| anyhow::anyhow!("serialize error: {}", e))?;
    transport
        .send(bytes)
        .await
        .map_err(|e| anyhow::anyhow!("send error: {}", e))
}

pub async fn recv_message<T: for<'de> Deserialize<'de>>(
    transport: &mut Transport,
) -> anyhow::Result<Option<T>> {
    match transport.next().await {
        Some(Ok(frame)) => {
            let msg = deserialize_message(&frame)
                .map_err(|e| anyhow::anyhow!("deserialize error: {}", e))?;
            Ok(Some(msg))
        }
        Some(Err(e)) => Err(anyhow::anyhow!("recv error: {}", e)),
        None => Ok(None),
    }
}
