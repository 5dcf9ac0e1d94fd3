//! Reserved heartbeat frames.
//!
//! Msg id 0 is a heartbeat request whose body is the sender's wall clock in
//! milliseconds (`i64`). Msg id 1 is the response: the responder's clock
//! followed by the echoed sender clock (16 bytes). Both ids are reserved on
//! every layout and are consumed by the link layer before any business
//! dispatch happens.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::packet::{GameServerPacket, GatewayPacket, InternalPacket, Packet, ProtocolType};

/// Msg id of a heartbeat request.
pub const HEARTBEAT_REQUEST_ID: i32 = 0;

/// Msg id of a heartbeat response.
pub const HEARTBEAT_RESPONSE_ID: i32 = 1;

/// Minimum response body that carries the echoed sender clock.
pub const HEARTBEAT_RESPONSE_BODY_LEN: usize = 16;

/// Wall clock in milliseconds since the Unix epoch.
pub fn current_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Builds and recognizes heartbeat frames for one protocol layout.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatFactory {
    protocol: ProtocolType,
}

impl HeartbeatFactory {
    pub fn new(protocol: ProtocolType) -> Self {
        Self { protocol }
    }

    pub fn protocol(&self) -> ProtocolType {
        self.protocol
    }

    /// A heartbeat request stamped with `now_millis`.
    pub fn request(&self, now_millis: i64) -> Packet {
        let body = Bytes::copy_from_slice(&now_millis.to_be_bytes());
        match self.protocol {
            ProtocolType::Gateway => Packet::Gateway(GatewayPacket {
                msg_id: HEARTBEAT_REQUEST_ID,
                seq: 0,
                magic: 0,
                body,
            }),
            ProtocolType::GatewayInternal => {
                Packet::Internal(InternalPacket::new(0, HEARTBEAT_REQUEST_ID, 0, body))
            }
            ProtocolType::GameServer => Packet::GameServer(GameServerPacket {
                msg_id: HEARTBEAT_REQUEST_ID,
                seq: 0,
                gate_id: 0,
                role_id: 0,
                con_id: 0,
                body,
            }),
        }
    }

    /// The response to `request`, echoing its header correlation fields and
    /// its sender clock (0 when the request body is shorter than 8 bytes).
    pub fn response_to(&self, request: &Packet, now_millis: i64) -> Packet {
        let mut sender_body = request.body().clone();
        let sender_millis = if sender_body.len() >= 8 {
            sender_body.get_i64()
        } else {
            0
        };

        let mut body = BytesMut::with_capacity(HEARTBEAT_RESPONSE_BODY_LEN);
        body.put_i64(now_millis);
        body.put_i64(sender_millis);
        let body = body.freeze();

        match request {
            Packet::Gateway(p) => Packet::Gateway(GatewayPacket {
                msg_id: HEARTBEAT_RESPONSE_ID,
                seq: p.seq,
                magic: p.magic,
                body,
            }),
            Packet::Internal(p) => {
                Packet::Internal(InternalPacket::new(p.session_id, HEARTBEAT_RESPONSE_ID, p.seq, body))
            }
            Packet::GameServer(p) => Packet::GameServer(GameServerPacket {
                msg_id: HEARTBEAT_RESPONSE_ID,
                seq: p.seq,
                gate_id: p.gate_id,
                role_id: p.role_id,
                con_id: p.con_id,
                body,
            }),
        }
    }

    pub fn is_request(packet: &Packet) -> bool {
        packet.msg_id() == HEARTBEAT_REQUEST_ID
    }

    pub fn is_response(packet: &Packet) -> bool {
        packet.msg_id() == HEARTBEAT_RESPONSE_ID
    }

    /// Round trip in milliseconds for a heartbeat response, `None` when the
    /// body is too short or the echoed clock is unset.
    pub fn latency(response: &Packet, now_millis: i64) -> Option<i64> {
        let mut body = response.body().clone();
        if body.len() < HEARTBEAT_RESPONSE_BODY_LEN {
            return None;
        }
        let _server_millis = body.get_i64();
        let echoed = body.get_i64();
        (echoed > 0).then(|| now_millis - echoed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_sender_clock() {
        let factory = HeartbeatFactory::new(ProtocolType::Gateway);
        let request = factory.request(1_700_000_000_000);
        assert!(HeartbeatFactory::is_request(&request));
        assert_eq!(request.body().len(), 8);
        assert_eq!(&request.body()[..], &1_700_000_000_000i64.to_be_bytes());
    }

    #[test]
    fn response_echoes_clock_and_correlation() {
        let factory = HeartbeatFactory::new(ProtocolType::GatewayInternal);
        let request = Packet::Internal(InternalPacket::new(
            9,
            HEARTBEAT_REQUEST_ID,
            77,
            Bytes::copy_from_slice(&1_000i64.to_be_bytes()),
        ));
        let response = factory.response_to(&request, 1_250);

        assert!(HeartbeatFactory::is_response(&response));
        match &response {
            Packet::Internal(p) => {
                assert_eq!(p.session_id, 9);
                assert_eq!(p.seq, 77);
            }
            other => panic!("unexpected layout: {other:?}"),
        }
        assert_eq!(HeartbeatFactory::latency(&response, 1_300), Some(300));
    }

    #[test]
    fn response_to_short_request_echoes_zero() {
        let factory = HeartbeatFactory::new(ProtocolType::Gateway);
        let request = Packet::Gateway(GatewayPacket::new(HEARTBEAT_REQUEST_ID, 4, Bytes::new()));
        let response = factory.response_to(&request, 500);
        assert_eq!(response.body().len(), HEARTBEAT_RESPONSE_BODY_LEN);
        assert_eq!(HeartbeatFactory::latency(&response, 900), None);
    }

    #[test]
    fn latency_requires_full_body() {
        let short = Packet::Gateway(GatewayPacket::new(
            HEARTBEAT_RESPONSE_ID,
            0,
            Bytes::copy_from_slice(&5i64.to_be_bytes()),
        ));
        assert_eq!(HeartbeatFactory::latency(&short, 10), None);
    }

    #[test]
    fn game_server_request_layout() {
        let factory = HeartbeatFactory::new(ProtocolType::GameServer);
        let request = factory.request(42);
        assert_eq!(request.protocol(), ProtocolType::GameServer);
        assert_eq!(request.msg_id(), HEARTBEAT_REQUEST_ID);
        let response = factory.response_to(&request, 50);
        assert_eq!(HeartbeatFactory::latency(&response, 60), Some(18));
    }

    #[test]
    fn current_millis_is_after_2020() {
        assert!(current_millis() > 1_577_836_800_000);
    }
}
