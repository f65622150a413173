use super::*;
use crate::metainfo::InfoHash;
use bytes::{BufMut, Bytes, BytesMut};
use tokio::net::{TcpListener, TcpStream};

fn frame(id: u8, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u32(1 + payload.len() as u32);
    buf.put_u8(id);
    buf.put_slice(payload);
    buf.freeze()
}

#[test]
fn test_peer_id_generate() {
    let id1 = PeerId::generate();
    let id2 = PeerId::generate();
    assert_ne!(id1.0, id2.0);
    assert_eq!(id1.client_id(), Some("RS0001"));
}

#[test]
fn test_bitfield() {
    let mut bf = Bitfield::new(100);
    assert!(!bf.has_piece(0));

    bf.set_piece(0);
    assert!(bf.has_piece(0));

    bf.set_piece(99);
    assert!(bf.has_piece(99));

    bf.clear_piece(0);
    assert!(!bf.has_piece(0));

    bf.set_piece(100);
    assert_eq!(bf.count(), 1);
}

#[test]
fn test_bitfield_full_clears_spare_bits() {
    let bf = Bitfield::full(10);
    assert_eq!(bf.as_bytes(), &[0xFF, 0xC0]);
    assert!(bf.is_complete());
}

#[test]
fn test_bitfield_from_bytes() {
    let bf = Bitfield::try_from_bytes(&[0x80, 0x00], 16).unwrap();
    assert!(bf.has_piece(0));
    assert!(!bf.has_piece(1));
}

#[test]
fn test_bitfield_wrong_length() {
    let err = Bitfield::try_from_bytes(&[0x80], 10).unwrap_err();
    assert!(matches!(
        err,
        PeerError::InvalidLength {
            id: 5,
            expected: 2,
            actual: 1
        }
    ));

    assert!(Bitfield::try_from_bytes(&[0x80, 0x00, 0x00], 10).is_err());
}

#[test]
fn test_bitfield_spare_bits_rejected() {
    let err = Bitfield::try_from_bytes(&[0x00, 0x20], 10).unwrap_err();
    assert!(matches!(err, PeerError::Protocol(_)));
}

#[test]
fn test_bitfield_missing_from() {
    let mut ours = Bitfield::new(10);
    let mut theirs = Bitfield::new(10);
    assert!(!theirs.has_missing_from(&ours));

    theirs.set_piece(3);
    assert!(theirs.has_missing_from(&ours));

    ours.set_piece(3);
    assert!(!theirs.has_missing_from(&ours));
}

#[test]
fn test_handshake_encode_decode() {
    let info_hash = InfoHash::from_bytes([1u8; 20]);
    let peer_id = PeerId([2u8; 20]);

    let handshake = Handshake::new(info_hash, peer_id);
    let encoded = handshake.encode();
    assert_eq!(encoded.len(), HANDSHAKE_LEN);
    assert_eq!(encoded[0], 19);
    assert_eq!(&encoded[1..20], b"BitTorrent protocol");
    assert_eq!(&encoded[20..28], &[0u8; 8]);

    let decoded = Handshake::decode(&encoded).unwrap();
    assert_eq!(decoded, handshake);
}

#[test]
fn test_handshake_rejects_bad_prefix() {
    let handshake = Handshake::new(InfoHash::from_bytes([1u8; 20]), PeerId([2u8; 20]));
    let mut encoded = handshake.encode().to_vec();
    encoded[0] = 18;
    assert!(matches!(
        Handshake::decode(&encoded),
        Err(PeerError::InvalidHandshake)
    ));

    assert!(matches!(
        Handshake::decode(&handshake.encode()[..67]),
        Err(PeerError::InvalidHandshake)
    ));
}

#[test]
fn test_message_encode_decode() {
    let mut bits = Bitfield::new(10);
    for i in [1, 3, 7] {
        bits.set_piece(i);
    }

    let messages = vec![
        Message::KeepAlive,
        Message::Choke,
        Message::Unchoke,
        Message::Interested,
        Message::NotInterested,
        Message::Have { piece: 42 },
        Message::Bitfield(bits.to_bytes()),
        Message::Request {
            index: 3,
            begin: 0,
            length: 16384,
        },
        Message::Piece {
            index: 1,
            begin: 16384,
            data: Bytes::from_static(b"hello world"),
        },
        Message::Cancel {
            index: 1,
            begin: 0,
            length: 16384,
        },
        Message::Port(6881),
    ];

    for msg in messages {
        let decoded = Message::decode(msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }
}

#[test]
fn test_wire_layout() {
    assert_eq!(
        Message::Have { piece: 42 }.encode().as_ref(),
        &[0, 0, 0, 5, 4, 0, 0, 0, 42]
    );
    assert_eq!(Message::KeepAlive.encode().as_ref(), &[0, 0, 0, 0]);

    let request = Message::request(BlockAddress::new(3, 0, 16384)).encode();
    assert_eq!(
        request.as_ref(),
        &[0, 0, 0, 13, 6, 0, 0, 0, 3, 0, 0, 0, 0, 0, 0, 0x40, 0]
    );
}

#[test]
fn test_bitfield_message_round_trip() {
    let mut bits = Bitfield::new(10);
    for i in [1, 3, 7] {
        bits.set_piece(i);
    }

    let decoded = Message::decode(Message::Bitfield(bits.to_bytes()).encode()).unwrap();
    let Message::Bitfield(raw) = decoded else {
        panic!("expected bitfield message");
    };
    let parsed = Bitfield::try_from_bytes(&raw, 10).unwrap();
    let set: Vec<usize> = (0..10).filter(|&i| parsed.has_piece(i)).collect();
    assert_eq!(set, vec![1, 3, 7]);
}

#[test]
fn test_unknown_message_id() {
    let err = Message::decode(frame(200, &[])).unwrap_err();
    assert!(matches!(err, PeerError::UnknownMessage(200)));
}

#[test]
fn test_request_with_wrong_payload() {
    let err = Message::decode(frame(6, &[0u8; 10])).unwrap_err();
    assert!(matches!(
        err,
        PeerError::InvalidLength {
            id: 6,
            expected: 12,
            actual: 10
        }
    ));

    let err = Message::decode(frame(4, &[0u8; 5])).unwrap_err();
    assert!(matches!(err, PeerError::InvalidLength { id: 4, .. }));

    let err = Message::decode(frame(0, &[1])).unwrap_err();
    assert!(matches!(err, PeerError::InvalidLength { id: 0, .. }));
}

#[test]
fn test_short_piece() {
    let err = Message::decode(frame(7, &[0u8; 7])).unwrap_err();
    assert!(matches!(
        err,
        PeerError::InvalidLength {
            id: 7,
            expected: 8,
            actual: 7
        }
    ));
}

#[test]
fn test_block_address() {
    let block = Block::new(2, 16384, Bytes::from_static(&[0u8; 100]));
    assert_eq!(block.address(), BlockAddress::new(2, 16384, 100));
}

#[test]
fn test_choking_state_default() {
    let state = ChokingState::default();
    assert!(state.am_choking);
    assert!(!state.am_interested);
    assert!(state.peer_choking);
    assert!(!state.peer_interested);
}

#[test]
fn test_session_apply() {
    let addr = "127.0.0.1:6881".parse().unwrap();
    let mut session = PeerSession::new(addr, 10, true);

    session.apply(&Message::Unchoke).unwrap();
    session.apply(&Message::Interested).unwrap();
    assert!(!session.choking.peer_choking);
    assert!(session.choking.peer_interested);

    session.apply(&Message::Have { piece: 4 }).unwrap();
    assert!(session.bitfield.has_piece(4));
    assert!(session.apply(&Message::Have { piece: 10 }).is_err());

    session
        .apply(&Message::Bitfield(Bytes::from_static(&[0x40, 0x00])))
        .unwrap();
    assert!(session.bitfield.has_piece(1));
    assert!(!session.bitfield.has_piece(4));

    let block = BlockAddress::new(1, 0, 16384);
    assert!(session.add_request(block));
    assert!(!session.add_request(block));
    assert_eq!(session.take_requests(), vec![block]);
    assert_eq!(session.pending_count(), 0);
}

#[test]
fn test_session_states() {
    let addr = "127.0.0.1:6881".parse().unwrap();

    let mut outbound = PeerSession::new(addr, 1, true);
    assert!(outbound.is_outbound());
    assert_eq!(outbound.state(), SessionState::Connecting);
    outbound.mark_handshake_sent();
    assert_eq!(outbound.state(), SessionState::HandshakeSent);
    outbound.mark_handshake_received(PeerId([1; 20]));
    assert_eq!(outbound.state(), SessionState::Active);

    let mut inbound = PeerSession::new(addr, 1, false);
    assert!(!inbound.is_outbound());
    inbound.mark_handshake_received(PeerId([1; 20]));
    assert_eq!(inbound.state(), SessionState::HandshakeReceived);
    inbound.mark_handshake_sent();
    assert!(inbound.is_active());

    inbound.close();
    assert_eq!(inbound.state(), SessionState::Closing);
}

async fn socket_pair() -> (PeerTransport, PeerTransport) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (client, server) = tokio::join!(TcpStream::connect(addr), listener.accept());
    (
        PeerTransport::new(client.unwrap()).unwrap(),
        PeerTransport::new(server.unwrap().0).unwrap(),
    )
}

#[tokio::test]
async fn test_session_handshake_loopback() {
    let info_hash = InfoHash::from_bytes([7; 20]);
    let (a_id, b_id) = (PeerId::generate(), PeerId::generate());
    let (mut a_transport, mut b_transport) = socket_pair().await;

    let mut a = PeerSession::new(b_transport.peer_addr(), 4, true);
    let mut b = PeerSession::new(a_transport.peer_addr(), 4, false);

    let (a_result, b_result) = tokio::join!(
        a.handshake(&mut a_transport, info_hash, a_id),
        b.handshake(&mut b_transport, info_hash, b_id),
    );

    assert_eq!(a_result.unwrap(), b_id);
    assert_eq!(b_result.unwrap(), a_id);
    assert!(a.is_active());
    assert!(b.is_active());

    a_transport.send_message(&Message::Have { piece: 2 }).await.unwrap();
    assert_eq!(
        b_transport.receive_message().await.unwrap(),
        Message::Have { piece: 2 }
    );
}

#[tokio::test]
async fn test_session_handshake_both_outbound() {
    let info_hash = InfoHash::from_bytes([7; 20]);
    let (a_id, b_id) = (PeerId::generate(), PeerId::generate());
    let (mut a_transport, mut b_transport) = socket_pair().await;

    let mut a = PeerSession::new(b_transport.peer_addr(), 4, true);
    let mut b = PeerSession::new(a_transport.peer_addr(), 4, true);

    let (a_result, b_result) = tokio::join!(
        a.handshake(&mut a_transport, info_hash, a_id),
        b.handshake(&mut b_transport, info_hash, b_id),
    );

    assert_eq!(a_result.unwrap(), b_id);
    assert_eq!(b_result.unwrap(), a_id);
}

#[tokio::test]
async fn test_session_handshake_info_hash_mismatch() {
    let (mut a_transport, mut b_transport) = socket_pair().await;

    let mut a = PeerSession::new(b_transport.peer_addr(), 4, true);
    let mut b = PeerSession::new(a_transport.peer_addr(), 4, false);

    // The rejecting side drops its socket so the initiator sees the close.
    let responder = async move {
        let result = b
            .handshake(&mut b_transport, InfoHash::from_bytes([2; 20]), PeerId::generate())
            .await;
        (result, b)
    };

    let (a_result, (b_result, b)) = tokio::join!(
        a.handshake(&mut a_transport, InfoHash::from_bytes([1; 20]), PeerId::generate()),
        responder,
    );

    assert!(matches!(b_result, Err(PeerError::InfoHashMismatch)));
    assert!(!b.is_active());
    assert!(a_result.is_err());
    assert!(!a.is_active());
}

#[tokio::test]
async fn test_session_handshake_self_connection() {
    let info_hash = InfoHash::from_bytes([7; 20]);
    let id = PeerId::generate();
    let (mut a_transport, mut b_transport) = socket_pair().await;

    let mut a = PeerSession::new(b_transport.peer_addr(), 4, true);
    let mut b = PeerSession::new(a_transport.peer_addr(), 4, false);

    let responder = async move { b.handshake(&mut b_transport, info_hash, id).await };

    let (a_result, b_result) = tokio::join!(a.handshake(&mut a_transport, info_hash, id), responder);

    assert!(a_result.is_err());

    assert!(matches!(b_result, Err(PeerError::SelfConnection)));
}

#[tokio::test]
async fn test_transport_rejects_oversized_frame() {
    use tokio::io::AsyncWriteExt;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (client, server) = tokio::join!(TcpStream::connect(addr), listener.accept());
    let mut raw = client.unwrap();
    let mut transport = PeerTransport::new(server.unwrap().0).unwrap();

    raw.write_all(&u32::MAX.to_be_bytes()).await.unwrap();
    assert!(matches!(
        transport.receive_message().await,
        Err(PeerError::MessageTooLarge(_))
    ));
}

#[test]
fn test_session_upload_queue() {
    let addr = "127.0.0.1:6881".parse().unwrap();
    let mut session = PeerSession::new(addr, 4, false);
    let a = BlockAddress::new(0, 0, 16384);
    let b = BlockAddress::new(1, 0, 16384);

    session.queue_upload(a);
    session.queue_upload(a);
    session.queue_upload(b);
    assert!(session.cancel_upload(&a));
    assert!(!session.cancel_upload(&a));
    assert_eq!(session.next_upload(), Some(b));
    assert!(!session.has_uploads());
}
