//! # Gate Protocol
//!
//! Wire format shared by the gateway and its game nodes.
//!
//! Three frame layouts share one length-prefixed framing:
//!
//! * [`GatewayPacket`] - spoken by game clients
//! * [`InternalPacket`] - gateway to game node, tagged with the session id
//! * [`GameServerPacket`] - node-facing layout with role/connection ids
//!
//! [`PacketCodec`] implements `tokio_util` framing for any of them, and
//! [`HeartbeatFactory`] builds the reserved keep-alive frames (msg ids 0 and
//! 1) that never reach business code.
//!
//! ## Example
//!
//! ```rust
//! use bytes::BytesMut;
//! use gate_protocol::{GatewayPacket, Packet, PacketCodec, ProtocolType};
//! use tokio_util::codec::{Decoder, Encoder};
//!
//! let mut codec = PacketCodec::new(ProtocolType::Gateway);
//! let mut buf = BytesMut::new();
//! codec
//!     .encode(Packet::Gateway(GatewayPacket::new(11000, 1, &b"token"[..])), &mut buf)
//!     .unwrap();
//! let decoded = codec.decode(&mut buf).unwrap().unwrap();
//! assert_eq!(decoded.msg_id(), 11000);
//! ```

pub mod codec;
pub mod error;
pub mod heartbeat;
pub mod message_ids;
pub mod packet;

pub use codec::PacketCodec;
pub use error::{MessageIdError, ProtocolError};
pub use heartbeat::{
    current_millis, HeartbeatFactory, HEARTBEAT_REQUEST_ID, HEARTBEAT_RESPONSE_BODY_LEN,
    HEARTBEAT_RESPONSE_ID,
};
pub use message_ids::{MessageIdTable, MessageIdTableBuilder, DEFAULT_LOGIN_MSG_ID, LOGIN};
pub use packet::{
    is_reserved_msg_id, GameServerPacket, GatewayPacket, InternalPacket, Packet, ProtocolType,
    DEFAULT_MAX_FRAME_LENGTH, LENGTH_FIELD_LEN,
};
