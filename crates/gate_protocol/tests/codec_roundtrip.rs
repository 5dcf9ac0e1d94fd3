//! Round-trip framing across all layouts and boundary body sizes.

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use gate_protocol::{
    GameServerPacket, GatewayPacket, HeartbeatFactory, InternalPacket, Packet, PacketCodec,
    ProtocolError, ProtocolType,
};
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite};

const MAX_FRAME: usize = 512;

fn sample(protocol: ProtocolType, body_len: usize) -> Packet {
    let body = Bytes::from((0..body_len).map(|i| (i % 251) as u8).collect::<Vec<u8>>());
    match protocol {
        ProtocolType::Gateway => Packet::Gateway(GatewayPacket {
            msg_id: 10_001,
            seq: -2,
            magic: 0x55,
            body,
        }),
        ProtocolType::GatewayInternal => {
            Packet::Internal(InternalPacket::new(i32::MAX, 10_002, 70_000, body))
        }
        ProtocolType::GameServer => Packet::GameServer(GameServerPacket {
            msg_id: 10_003,
            seq: 9,
            gate_id: 3,
            role_id: 1_234_567_890_123,
            con_id: -1,
            body,
        }),
    }
}

fn roundtrip(protocol: ProtocolType, packet: Packet) -> Packet {
    let mut codec = PacketCodec::with_max_frame_length(protocol, MAX_FRAME);
    let mut buf = BytesMut::new();
    Encoder::<Packet>::encode(&mut codec, packet, &mut buf).unwrap();
    let decoded = codec.decode(&mut buf).unwrap().expect("full frame");
    assert!(buf.is_empty());
    decoded
}

#[test]
fn boundary_body_sizes_roundtrip_for_every_layout() {
    for protocol in [
        ProtocolType::Gateway,
        ProtocolType::GatewayInternal,
        ProtocolType::GameServer,
    ] {
        let max = protocol.max_body_len(MAX_FRAME);
        for body_len in [0, 1, max - 1, max] {
            let packet = sample(protocol, body_len);
            assert!(packet.encoded_len() <= MAX_FRAME);
            assert_eq!(
                roundtrip(protocol, packet.clone()),
                packet,
                "{protocol} with {body_len}-byte body"
            );
        }
    }
}

#[test]
fn one_byte_past_max_is_rejected() {
    for protocol in [
        ProtocolType::Gateway,
        ProtocolType::GatewayInternal,
        ProtocolType::GameServer,
    ] {
        let mut codec = PacketCodec::with_max_frame_length(protocol, MAX_FRAME);
        let packet = sample(protocol, protocol.max_body_len(MAX_FRAME) + 1);
        let mut buf = BytesMut::new();
        let err = Encoder::<Packet>::encode(&mut codec, packet, &mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { .. }));
    }
}

#[test]
fn heartbeat_frames_roundtrip() {
    for protocol in [
        ProtocolType::Gateway,
        ProtocolType::GatewayInternal,
        ProtocolType::GameServer,
    ] {
        let factory = HeartbeatFactory::new(protocol);
        let request = roundtrip(protocol, factory.request(1_000));
        assert!(request.is_reserved());
        assert!(HeartbeatFactory::is_request(&request));

        let response = roundtrip(protocol, factory.response_to(&request, 1_010));
        assert!(HeartbeatFactory::is_response(&response));
        assert_eq!(HeartbeatFactory::latency(&response, 1_040), Some(40));
    }
}

#[tokio::test]
async fn framed_stream_over_duplex() {
    let (client, server) = tokio::io::duplex(64);
    let mut writer = FramedWrite::new(client, PacketCodec::new(ProtocolType::GatewayInternal));
    let mut reader = FramedRead::new(server, PacketCodec::new(ProtocolType::GatewayInternal));

    let sent: Vec<InternalPacket> = (0..20)
        .map(|i| InternalPacket::new(i, 10_000 + i, i, vec![i as u8; 40]))
        .collect();

    let to_send = sent.clone();
    let write_task = tokio::spawn(async move {
        for packet in to_send {
            writer.send(packet).await.unwrap();
        }
    });

    for expected in sent {
        let packet = reader.next().await.unwrap().unwrap();
        assert_eq!(packet, Packet::Internal(expected));
    }
    write_task.await.unwrap();
}
