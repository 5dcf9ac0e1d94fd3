//! Length-prefixed codec for all three frame layouts.
//!
//! [`PacketCodec`] plugs into `tokio_util::codec::Framed`. Decoding buffers
//! until a full frame is available, so a partial frame is never surfaced.
//! A length field above the configured maximum, or below the header size,
//! is a [`ProtocolError`] and the caller is expected to drop the link.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::packet::{
    GameServerPacket, GatewayPacket, InternalPacket, Packet, ProtocolType,
    DEFAULT_MAX_FRAME_LENGTH, LENGTH_FIELD_LEN,
};

/// Encoder/decoder for one [`ProtocolType`].
#[derive(Debug, Clone)]
pub struct PacketCodec {
    protocol: ProtocolType,
    max_frame_length: usize,
}

impl PacketCodec {
    pub fn new(protocol: ProtocolType) -> Self {
        Self::with_max_frame_length(protocol, DEFAULT_MAX_FRAME_LENGTH)
    }

    pub fn with_max_frame_length(protocol: ProtocolType, max_frame_length: usize) -> Self {
        Self {
            protocol,
            max_frame_length,
        }
    }

    pub fn protocol(&self) -> ProtocolType {
        self.protocol
    }

    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }

    fn parse(&self, mut frame: BytesMut) -> Packet {
        match self.protocol {
            ProtocolType::Gateway => {
                let msg_id = frame.get_i32();
                let seq = frame.get_i16();
                let magic = frame.get_i16();
                Packet::Gateway(GatewayPacket {
                    msg_id,
                    seq,
                    magic,
                    body: frame.freeze(),
                })
            }
            ProtocolType::GatewayInternal => {
                let session_id = frame.get_i32();
                let msg_id = frame.get_i32();
                let seq = frame.get_i32();
                Packet::Internal(InternalPacket {
                    session_id,
                    msg_id,
                    seq,
                    body: frame.freeze(),
                })
            }
            ProtocolType::GameServer => {
                let msg_id = frame.get_i32();
                let seq = frame.get_i16();
                let gate_id = frame.get_i16();
                let role_id = frame.get_i64();
                let con_id = frame.get_i64();
                Packet::GameServer(GameServerPacket {
                    msg_id,
                    seq,
                    gate_id,
                    role_id,
                    con_id,
                    body: frame.freeze(),
                })
            }
        }
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, ProtocolError> {
        if src.len() < LENGTH_FIELD_LEN {
            return Ok(None);
        }

        let mut length_bytes = [0u8; LENGTH_FIELD_LEN];
        length_bytes.copy_from_slice(&src[..LENGTH_FIELD_LEN]);
        let length = u32::from_be_bytes(length_bytes) as usize;

        if length > self.max_frame_length {
            return Err(ProtocolError::FrameTooLarge {
                length,
                max: self.max_frame_length,
            });
        }
        let header = self.protocol.header_len();
        if length < header {
            return Err(ProtocolError::FrameTooShort { length, header });
        }

        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(length);
        frame.advance(LENGTH_FIELD_LEN);
        Ok(Some(self.parse(frame)))
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        if packet.protocol() != self.protocol {
            return Err(ProtocolError::ProtocolMismatch {
                expected: self.protocol,
                found: packet.protocol(),
            });
        }

        let length = packet.encoded_len();
        if length > self.max_frame_length {
            return Err(ProtocolError::FrameTooLarge {
                length,
                max: self.max_frame_length,
            });
        }

        dst.reserve(length);
        dst.put_u32(length as u32);
        match packet {
            Packet::Gateway(p) => {
                dst.put_i32(p.msg_id);
                dst.put_i16(p.seq);
                dst.put_i16(p.magic);
                dst.extend_from_slice(&p.body);
            }
            Packet::Internal(p) => {
                dst.put_i32(p.session_id);
                dst.put_i32(p.msg_id);
                dst.put_i32(p.seq);
                dst.extend_from_slice(&p.body);
            }
            Packet::GameServer(p) => {
                dst.put_i32(p.msg_id);
                dst.put_i16(p.seq);
                dst.put_i16(p.gate_id);
                dst.put_i64(p.role_id);
                dst.put_i64(p.con_id);
                dst.extend_from_slice(&p.body);
            }
        }
        Ok(())
    }
}

impl Encoder<GatewayPacket> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, packet: GatewayPacket, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        Encoder::<Packet>::encode(self, Packet::Gateway(packet), dst)
    }
}

impl Encoder<InternalPacket> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, packet: InternalPacket, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        Encoder::<Packet>::encode(self, Packet::Internal(packet), dst)
    }
}
