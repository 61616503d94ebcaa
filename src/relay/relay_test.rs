use super::*;

fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

fn conn() -> TurnConn {
    TurnConn::new(TurnConnConfig {
        server: addr("198.51.100.1:3478"),
        transport: RelayTransport::Udp,
        username: "user".to_owned(),
        password: "pass".to_owned(),
        software: "mediaflow".to_owned(),
        local_addr: addr("10.0.0.1:4000"),
    })
}

fn decode(raw: &[u8]) -> Message {
    let mut m = Message {
        raw: raw.to_vec(),
        ..Message::default()
    };
    m.decode().unwrap();
    m
}

/// Walks a connection through the 401 challenge into an allocation.
fn allocate(conn: &mut TurnConn, now: Instant) -> (SocketAddr, SocketAddr) {
    conn.allocate(now).unwrap();
    let attempt = conn.poll_transmit().expect("allocate attempt");
    assert_eq!(attempt.transport.peer_addr, conn.server());
    let attempt_msg = decode(&attempt.message);

    // server answers 401 with realm and nonce
    let mut challenge = Message::new();
    challenge
        .build(&[
            Box::new(attempt_msg.clone()),
            Box::new(MessageType::new(METHOD_ALLOCATE, CLASS_ERROR_RESPONSE)),
            Box::new(TextAttribute::new(ATTR_REALM, "webrtc.rs".to_owned())),
            Box::new(TextAttribute::new(ATTR_NONCE, "nonce123".to_owned())),
        ])
        .unwrap();
    conn.handle_read(now, &challenge.raw).unwrap();

    // client retries with credentials
    let retry = conn.poll_transmit().expect("authenticated allocate");
    let retry_msg = decode(&retry.message);
    assert!(retry_msg.contains(ATTR_USERNAME));
    assert!(retry_msg.contains(ATTR_REALM));
    assert!(retry_msg.contains(ATTR_NONCE));

    let relayed_addr = addr("198.51.100.1:49152");
    let mapped_addr = addr("203.0.113.9:4000");
    let mut success = Message::new();
    success
        .build(&[
            Box::new(retry_msg.clone()),
            Box::new(MessageType::new(METHOD_ALLOCATE, CLASS_SUCCESS_RESPONSE)),
            Box::new(RelayedAddress {
                ip: relayed_addr.ip(),
                port: relayed_addr.port(),
            }),
            Box::new(XorMappedAddress {
                ip: mapped_addr.ip(),
                port: mapped_addr.port(),
            }),
            Box::new(Lifetime(Duration::from_secs(600))),
        ])
        .unwrap();
    conn.handle_read(now, &success.raw).unwrap();

    match conn.poll_event() {
        Some(TurnEvent::Allocated {
            relayed_addr: r,
            mapped_addr: m,
        }) => {
            assert_eq!(r, relayed_addr);
            assert_eq!(m, mapped_addr);
        }
        _ => panic!("expected Allocated event"),
    }
    (relayed_addr, mapped_addr)
}

#[test]
fn test_allocation_auth_ladder() {
    let mut c = conn();
    let now = Instant::now();
    let (relayed, mapped) = allocate(&mut c, now);

    assert!(c.is_allocated());
    assert_eq!(c.relayed_addr(), Some(relayed));
    assert_eq!(c.mapped_addr(), Some(mapped));
    assert_eq!(c.route(), Route::TurnIndication);
}

#[test]
fn test_permission_then_send_indication_offset() {
    let mut c = conn();
    let now = Instant::now();
    allocate(&mut c, now);

    let peer = addr("192.0.2.7:6000");
    c.create_permission(now, peer).unwrap();
    let request = c.poll_transmit().expect("create-permission request");
    let request_msg = decode(&request.message);
    assert_eq!(request_msg.typ.method, METHOD_CREATE_PERMISSION);

    // no permission yet: sending is refused
    assert!(c.send_to(now, &[0u8; 8], peer).is_err());

    let mut success = Message::new();
    success
        .build(&[
            Box::new(request_msg.clone()),
            Box::new(MessageType::new(
                METHOD_CREATE_PERMISSION,
                CLASS_SUCCESS_RESPONSE,
            )),
        ])
        .unwrap();
    c.handle_read(now, &success.raw).unwrap();
    assert!(c.has_permission(peer));

    // relayed via Send indication: payload starts at the 36 byte headroom
    let payload = [0xabu8; 16];
    c.send_to(now, &payload, peer).unwrap();
    let relayed = c.poll_transmit().unwrap();
    assert_eq!(relayed.message.len(), Route::TurnIndication.headroom() + payload.len());
    assert_eq!(
        &relayed.message[Route::TurnIndication.headroom()..],
        &payload[..]
    );
}

#[test]
fn test_channel_bind_shrinks_headroom() {
    let mut c = conn();
    let now = Instant::now();
    allocate(&mut c, now);

    let peer = addr("192.0.2.7:6000");
    c.create_permission(now, peer).unwrap();
    let perm_request = decode(&c.poll_transmit().unwrap().message);
    let mut perm_ok = Message::new();
    perm_ok
        .build(&[
            Box::new(perm_request),
            Box::new(MessageType::new(
                METHOD_CREATE_PERMISSION,
                CLASS_SUCCESS_RESPONSE,
            )),
        ])
        .unwrap();
    c.handle_read(now, &perm_ok.raw).unwrap();

    c.bind_channel(now, peer).unwrap();
    let bind_request = decode(&c.poll_transmit().unwrap().message);
    assert_eq!(bind_request.typ.method, METHOD_CHANNEL_BIND);

    let mut bind_ok = Message::new();
    bind_ok
        .build(&[
            Box::new(bind_request),
            Box::new(MessageType::new(METHOD_CHANNEL_BIND, CLASS_SUCCESS_RESPONSE)),
        ])
        .unwrap();
    c.handle_read(now, &bind_ok.raw).unwrap();

    assert!(matches!(
        c.poll_event(),
        Some(TurnEvent::ChannelBound(p)) if p == peer
    ));
    assert_eq!(c.route(), Route::TurnChannel);

    // ChannelData framing: four byte header in front of the payload
    let payload = [0x80u8; 20];
    c.send_to(now, &payload, peer).unwrap();
    let relayed = c.poll_transmit().unwrap();
    assert_eq!(relayed.message.len(), Route::TurnChannel.headroom() + payload.len());
    assert_eq!(
        &relayed.message[Route::TurnChannel.headroom()..],
        &payload[..]
    );
}

#[test]
fn test_inbound_data_indication() {
    let mut c = conn();
    let now = Instant::now();
    allocate(&mut c, now);

    let peer = addr("192.0.2.7:6000");
    let mut indication = Message::new();
    indication
        .build(&[
            Box::new(TransactionId::new()),
            Box::new(MessageType::new(METHOD_DATA, CLASS_INDICATION)),
            Box::new(PeerAddress {
                ip: peer.ip(),
                port: peer.port(),
            }),
            Box::new(Data(b"hello".to_vec())),
        ])
        .unwrap();

    c.handle_read(now, &indication.raw).unwrap();
    match c.poll_event() {
        Some(TurnEvent::Data { peer_addr, payload }) => {
            assert_eq!(peer_addr, peer);
            assert_eq!(&payload[..], b"hello");
        }
        _ => panic!("expected Data event"),
    }
}

#[test]
fn test_allocate_timeout_fails_conn() {
    let mut c = conn();
    let mut now = Instant::now();
    c.allocate(now).unwrap();
    while c.poll_transmit().is_some() {}

    for _ in 0..64 {
        now += Duration::from_millis(500);
        c.handle_timeout(now);
        while c.poll_transmit().is_some() {}
    }

    assert!(c.is_failed());
    assert!(matches!(c.poll_event(), Some(TurnEvent::Error(_))));
}

#[test]
fn test_permission_policy() {
    let host_private = Candidate::host(addr("192.168.1.10:5000"));
    let host_public = Candidate::host(addr("198.51.100.77:5000"));
    let relay_v6 = Candidate::host(addr("[2001:db8::1]:5000"));
    let srflx_private = Candidate::server_reflexive(
        addr("10.1.2.3:5000"),
        addr("10.0.0.1:4000"),
        GatherTransport::Udp,
    );

    assert!(!should_permit(&host_private));
    assert!(should_permit(&host_public));
    assert!(!should_permit(&relay_v6));
    assert!(should_permit(&srflx_private));
}
