//! Frame types for the three wire layouts.
//!
//! Every frame starts with a 4-byte big-endian length that counts the whole
//! frame, the length field included. What follows depends on the
//! [`ProtocolType`] negotiated for the link:
//!
//! | Protocol           | Header after length                                         | Bytes |
//! |--------------------|-------------------------------------------------------------|-------|
//! | `Gateway`          | msg_id:i32, seq:i16, magic:i16                              | 8     |
//! | `GatewayInternal`  | session_id:i32, msg_id:i32, seq:i32                         | 12    |
//! | `GameServer`       | msg_id:i32, seq:i16, gate_id:i16, role_id:i64, con_id:i64   | 24    |
//!
//! The body is opaque to this crate.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::heartbeat::{HEARTBEAT_REQUEST_ID, HEARTBEAT_RESPONSE_ID};

/// Size of the leading length field.
pub const LENGTH_FIELD_LEN: usize = 4;

/// Default upper bound for a single frame (1 MiB), length field included.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 1024 * 1024;

/// Wire layout spoken on a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolType {
    /// Client-facing layout.
    Gateway,
    /// Gateway to game node, carries the session id.
    GatewayInternal,
    /// Node-facing layout with role and connection ids.
    GameServer,
}

impl ProtocolType {
    /// Full header size, length field included.
    pub const fn header_len(self) -> usize {
        match self {
            ProtocolType::Gateway => 12,
            ProtocolType::GatewayInternal => 16,
            ProtocolType::GameServer => 28,
        }
    }

    /// Largest body that fits in a frame of at most `max_frame_length` bytes.
    pub const fn max_body_len(self, max_frame_length: usize) -> usize {
        max_frame_length.saturating_sub(self.header_len())
    }
}

impl std::fmt::Display for ProtocolType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProtocolType::Gateway => "gateway",
            ProtocolType::GatewayInternal => "gateway_internal",
            ProtocolType::GameServer => "game_server",
        };
        f.write_str(name)
    }
}

/// Client-facing frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayPacket {
    pub msg_id: i32,
    pub seq: i16,
    pub magic: i16,
    pub body: Bytes,
}

impl GatewayPacket {
    pub fn new(msg_id: i32, seq: i16, body: impl Into<Bytes>) -> Self {
        Self {
            msg_id,
            seq,
            magic: 0,
            body: body.into(),
        }
    }
}

/// Frame exchanged between the gateway and a game node.
///
/// `session_id` and `seq` together identify the request a reply belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalPacket {
    pub session_id: i32,
    pub msg_id: i32,
    pub seq: i32,
    pub body: Bytes,
}

impl InternalPacket {
    pub fn new(session_id: i32, msg_id: i32, seq: i32, body: impl Into<Bytes>) -> Self {
        Self {
            session_id,
            msg_id,
            seq,
            body: body.into(),
        }
    }

    /// Wraps a client frame for forwarding on behalf of `session_id`.
    ///
    /// The client's 16-bit sequence is sign-extended so the node echoes the
    /// same value back and the gateway can narrow it again on delivery.
    pub fn wrap(session_id: i32, packet: &GatewayPacket) -> Self {
        Self {
            session_id,
            msg_id: packet.msg_id,
            seq: i32::from(packet.seq),
            body: packet.body.clone(),
        }
    }

    /// Strips the session wrapper, producing the frame a client sees.
    pub fn unwrap_for_client(self) -> GatewayPacket {
        GatewayPacket {
            msg_id: self.msg_id,
            seq: self.seq as i16,
            magic: 0,
            body: self.body,
        }
    }
}

/// Node-facing frame with role and connection routing fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameServerPacket {
    pub msg_id: i32,
    pub seq: i16,
    pub gate_id: i16,
    pub role_id: i64,
    pub con_id: i64,
    pub body: Bytes,
}

/// A decoded frame of any layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Gateway(GatewayPacket),
    Internal(InternalPacket),
    GameServer(GameServerPacket),
}

impl Packet {
    pub fn protocol(&self) -> ProtocolType {
        match self {
            Packet::Gateway(_) => ProtocolType::Gateway,
            Packet::Internal(_) => ProtocolType::GatewayInternal,
            Packet::GameServer(_) => ProtocolType::GameServer,
        }
    }

    pub fn msg_id(&self) -> i32 {
        match self {
            Packet::Gateway(p) => p.msg_id,
            Packet::Internal(p) => p.msg_id,
            Packet::GameServer(p) => p.msg_id,
        }
    }

    pub fn body(&self) -> &Bytes {
        match self {
            Packet::Gateway(p) => &p.body,
            Packet::Internal(p) => &p.body,
            Packet::GameServer(p) => &p.body,
        }
    }

    /// Total encoded size, length field included.
    pub fn encoded_len(&self) -> usize {
        self.protocol().header_len() + self.body().len()
    }

    /// True for msg ids reserved by the transport (heartbeat request/response).
    pub fn is_reserved(&self) -> bool {
        is_reserved_msg_id(self.msg_id())
    }
}

impl From<GatewayPacket> for Packet {
    fn from(packet: GatewayPacket) -> Self {
        Packet::Gateway(packet)
    }
}

impl From<InternalPacket> for Packet {
    fn from(packet: InternalPacket) -> Self {
        Packet::Internal(packet)
    }
}

impl From<GameServerPacket> for Packet {
    fn from(packet: GameServerPacket) -> Self {
        Packet::GameServer(packet)
    }
}

/// Msg ids 0 and 1 belong to the heartbeat and never reach business logic.
pub const fn is_reserved_msg_id(msg_id: i32) -> bool {
    msg_id == HEARTBEAT_REQUEST_ID || msg_id == HEARTBEAT_RESPONSE_ID
}
