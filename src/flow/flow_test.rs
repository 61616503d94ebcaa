use super::*;
use std::time::Duration;

fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

fn flow(laddr: &str, tag: &str) -> Mediaflow {
    Mediaflow::new(MediaflowConfig {
        laddr_sdp: addr(laddr),
        cryptos: CryptoSet::DTLS_SRTP,
        audio_codecs: vec![crate::codec::CodecDescriptor::audio("opus", 111, 48000, 2)],
        tag: tag.to_owned(),
        privacy_mode: false,
        certificate: None,
    })
    .unwrap()
}

/// Shuttles datagrams between two flows until neither makes progress, then
/// advances time. Returns after `rounds` iterations at the latest.
fn drive(a: &mut Mediaflow, b: &mut Mediaflow, now: &mut Instant, rounds: usize) {
    for _ in 0..rounds {
        let mut progress = false;
        while let Some(t) = a.poll_transmit() {
            let delivered = TaggedBytesMut {
                now: *now,
                transport: TransportContext {
                    local_addr: t.transport.peer_addr,
                    peer_addr: t.transport.local_addr,
                    ecn: None,
                    transport_protocol: TransportProtocol::UDP,
                },
                message: t.message,
            };
            b.handle_read(delivered).unwrap();
            progress = true;
        }
        while let Some(t) = b.poll_transmit() {
            let delivered = TaggedBytesMut {
                now: *now,
                transport: TransportContext {
                    local_addr: t.transport.peer_addr,
                    peer_addr: t.transport.local_addr,
                    ecn: None,
                    transport_protocol: TransportProtocol::UDP,
                },
                message: t.message,
            };
            a.handle_read(delivered).unwrap();
            progress = true;
        }
        if !progress {
            *now += Duration::from_millis(30);
            a.handle_timeout(*now);
            b.handle_timeout(*now);
        }
    }
}

fn established(flow_events: &mut Vec<MediaflowEvent>, flow: &mut Mediaflow) -> bool {
    while let Some(event) = flow.poll_event() {
        flow_events.push(event);
    }
    flow_events
        .iter()
        .any(|e| matches!(e, MediaflowEvent::Established { .. }))
}

/// Runs offer/answer plus ICE and DTLS between two flows.
fn establish_pair(a: &mut Mediaflow, b: &mut Mediaflow, now: &mut Instant) {
    a.add_local_host_candidate(*now, "en0", addr("10.0.0.1:1000"))
        .unwrap();
    b.add_local_host_candidate(*now, "en0", addr("10.0.0.2:2000"))
        .unwrap();

    let offer = a.generate_offer().unwrap();
    b.handle_offer(*now, &offer).unwrap();
    let answer = b.generate_answer().unwrap();
    a.handle_answer(*now, &answer).unwrap();

    a.start_ice(*now).unwrap();
    b.start_ice(*now).unwrap();

    let mut a_events = vec![];
    let mut b_events = vec![];
    for _ in 0..100 {
        drive(a, b, now, 20);
        if established(&mut a_events, a) && established(&mut b_events, b) {
            break;
        }
    }

    assert!(
        a_events
            .iter()
            .any(|e| matches!(e, MediaflowEvent::Established { .. })),
        "offerer established"
    );
    assert!(
        b_events
            .iter()
            .any(|e| matches!(e, MediaflowEvent::Established { .. })),
        "answerer established"
    );
}

fn sample_rtp(seq: u16) -> Vec<u8> {
    let mut pkt = vec![
        0x80, 0x6f, (seq >> 8) as u8, seq as u8, 0, 0, 0, 0, 0, 0, 0x12, 0x34,
    ];
    pkt.extend_from_slice(b"payload-bytes");
    pkt
}

#[test]
fn test_init_and_close_smoke() {
    let now = Instant::now();
    let mut mf = flow("10.0.0.1:1000", "smoke");
    mf.close(now);

    assert_eq!(mf.state(), FlowState::Terminated);
    assert!(mf.poll_event().is_none());
    assert!(mf.poll_transmit().is_none());
}

#[test]
fn test_answer_resolves_actpass_to_active() {
    let now = Instant::now();
    let mut offerer = flow("10.0.0.1:1000", "offerer");
    let mut answerer = flow("10.0.0.2:2000", "answerer");

    let offer = offerer.generate_offer().unwrap();
    answerer.handle_offer(now, &offer).unwrap();
    let answer = answerer.generate_answer().unwrap();

    assert!(answer.contains("a=setup:active"));
    assert_eq!(answerer.local_setup(), Setup::Active);

    offerer.handle_answer(now, &answer).unwrap();
    assert_eq!(offerer.local_setup(), Setup::Passive);
}

#[test]
fn test_send_before_ready_is_refused() {
    let now = Instant::now();
    let mut mf = flow("10.0.0.1:1000", "early");
    assert_eq!(
        mf.send_raw_rtp(now, &sample_rtp(1)),
        Err(Error::ErrNotReady)
    );
    assert_eq!(
        mf.send_raw_rtcp(now, &[0x80, 0xc9, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0]),
        Err(Error::ErrNotReady)
    );
}

#[test]
fn test_start_ice_requires_complete_sdp_exchange() {
    let now = Instant::now();
    let mut mf = flow("10.0.0.1:1000", "sdp-gate");
    assert_eq!(mf.start_ice(now), Err(Error::ErrInvalidSdpState));

    let _offer = mf.generate_offer().unwrap();
    // still no remote description
    assert_eq!(mf.start_ice(now), Err(Error::ErrInvalidSdpState));
}

#[test]
fn test_end_to_end_establish_and_media() {
    let mut now = Instant::now();
    let mut a = flow("10.0.0.1:1000", "a");
    let mut b = flow("10.0.0.2:2000", "b");

    establish_pair(&mut a, &mut b, &mut now);

    assert!(a.is_ready());
    assert!(b.is_ready());
    assert_eq!(a.crypto(), CryptoKind::DtlsSrtp);

    a.start_media();
    b.start_media();
    while a.poll_transmit().is_some() {}
    while b.poll_transmit().is_some() {}

    // outbound media is SRTP protected on the wire
    let plain = sample_rtp(7);
    a.send_raw_rtp(now, &plain).unwrap();
    let on_wire = a.poll_transmit().expect("rtp on the wire");
    assert_ne!(&on_wire.message[..], &plain[..]);
    assert_eq!(demux::classify(&on_wire.message), PacketKind::Rtp);

    b.handle_read(TaggedBytesMut {
        now,
        transport: TransportContext {
            local_addr: on_wire.transport.peer_addr,
            peer_addr: on_wire.transport.local_addr,
            ecn: None,
            transport_protocol: TransportProtocol::UDP,
        },
        message: on_wire.message,
    })
    .unwrap();

    match b.poll_read() {
        Some(MediaflowMessage::Rtp(payload)) => assert_eq!(&payload[..], &plain[..]),
        other => panic!("expected decrypted RTP, got {other:?}"),
    }

    // rtp-state edges fired on first tx / first rx
    let mut saw_rtp_state = false;
    while let Some(event) = b.poll_event() {
        if matches!(event, MediaflowEvent::RtpState { .. }) {
            saw_rtp_state = true;
        }
    }
    assert!(saw_rtp_state);
}

#[test]
fn test_established_fires_exactly_once() {
    let mut now = Instant::now();
    let mut a = flow("10.0.0.1:1000", "a");
    let mut b = flow("10.0.0.2:2000", "b");

    establish_pair(&mut a, &mut b, &mut now);

    // keep driving; no further Established may appear
    let mut extra = 0;
    for _ in 0..10 {
        drive(&mut a, &mut b, &mut now, 10);
        while let Some(event) = a.poll_event() {
            if matches!(event, MediaflowEvent::Established { .. }) {
                extra += 1;
            }
        }
    }
    assert_eq!(extra, 0);
}

#[test]
fn test_fingerprint_mismatch_closes_with_auth_failure() {
    let mut now = Instant::now();
    let mut a = flow("10.0.0.1:1000", "a");
    let mut b = flow("10.0.0.2:2000", "b");

    a.add_local_host_candidate(now, "en0", addr("10.0.0.1:1000"))
        .unwrap();
    b.add_local_host_candidate(now, "en0", addr("10.0.0.2:2000"))
        .unwrap();

    let offer = a.generate_offer().unwrap();
    b.handle_offer(now, &offer).unwrap();
    let answer = b.generate_answer().unwrap();

    // flip one byte of the answer's fingerprint before the offerer sees it
    let marker = "a=fingerprint:sha-256 ";
    let pos = answer.find(marker).unwrap() + marker.len();
    let tampered = if &answer[pos..pos + 2] == "00" {
        format!("{}11{}", &answer[..pos], &answer[pos + 2..])
    } else {
        format!("{}00{}", &answer[..pos], &answer[pos + 2..])
    };
    a.handle_answer(now, &tampered).unwrap();

    a.start_ice(now).unwrap();
    b.start_ice(now).unwrap();

    let mut a_closed = 0;
    let mut a_established = 0;
    for _ in 0..100 {
        drive(&mut a, &mut b, &mut now, 20);
        while let Some(event) = a.poll_event() {
            match event {
                MediaflowEvent::Closed(Error::ErrAuthFailure) => a_closed += 1,
                MediaflowEvent::Established { .. } => a_established += 1,
                _ => {}
            }
        }
        if a_closed > 0 {
            break;
        }
    }

    assert_eq!(a_closed, 1, "close(EAUTH) fires exactly once");
    assert_eq!(a_established, 0, "no established after auth failure");
}

#[test]
fn test_rtp_liveness_timeout() {
    let mut now = Instant::now();
    let mut a = flow("10.0.0.1:1000", "a");
    let mut b = flow("10.0.0.2:2000", "b");

    establish_pair(&mut a, &mut b, &mut now);
    a.start_media();
    b.start_media();

    // one RTP exchange in each direction starts the liveness accounting
    a.send_raw_rtp(now, &sample_rtp(1)).unwrap();
    b.send_raw_rtp(now, &sample_rtp(1)).unwrap();
    drive(&mut a, &mut b, &mut now, 10);
    while a.poll_event().is_some() {}
    assert!(a.is_rtp_started());

    // then the inbound direction goes silent for 21+ seconds
    for _ in 0..30 {
        now += Duration::from_secs(1);
        a.handle_timeout(now);
    }

    let mut closed = 0;
    while let Some(event) = a.poll_event() {
        if matches!(event, MediaflowEvent::Closed(Error::ErrTimeout)) {
            closed += 1;
        }
    }
    assert_eq!(closed, 1);
    assert_eq!(a.state(), FlowState::Terminated);
}

#[test]
fn test_short_rtcp_inbound_dropped_silently() {
    let mut now = Instant::now();
    let mut a = flow("10.0.0.1:1000", "a");
    let mut b = flow("10.0.0.2:2000", "b");

    establish_pair(&mut a, &mut b, &mut now);
    b.start_media();

    let before = b.stats().counters.n_srtp_error;
    b.handle_read(TaggedBytesMut {
        now,
        transport: TransportContext {
            local_addr: addr("10.0.0.2:2000"),
            peer_addr: addr("10.0.0.1:1000"),
            ecn: None,
            transport_protocol: TransportProtocol::UDP,
        },
        message: BytesMut::from(&[0x80u8, 0xc9, 0x00, 0x00, 0x00, 0x00][..]),
    })
    .unwrap();

    assert!(b.poll_read().is_none());
    assert_eq!(b.stats().counters.n_srtp_error, before);
}

#[test]
fn test_media_without_rx_context_is_counted_dropped() {
    let now = Instant::now();
    let mut mf = flow("10.0.0.1:1000", "drop");
    mf.start_media();

    mf.handle_read(TaggedBytesMut {
        now,
        transport: TransportContext {
            local_addr: addr("10.0.0.1:1000"),
            peer_addr: addr("10.0.0.9:9999"),
            ecn: None,
            transport_protocol: TransportProtocol::UDP,
        },
        message: BytesMut::from(&sample_rtp(3)[..]),
    })
    .unwrap();

    assert_eq!(mf.stats().counters.n_srtp_dropped, 1);
    assert!(mf.poll_read().is_none());
}

#[test]
fn test_trickle_candidate_injection() {
    let now = Instant::now();
    let mut mf = flow("10.0.0.1:1000", "trickle");

    mf.add_remote_candidate(now, "a=candidate:1 1 UDP 2113929471 192.0.2.7 9000 typ host")
        .unwrap();
    assert_eq!(mf.remote_cand_count(), 1);
    assert_eq!(mf.stats().counters.n_cand_recv, 1);

    // non-UDP and garbage lines are silently skipped
    mf.add_remote_candidate(now, "a=candidate:1 1 TCP 2105458943 192.0.2.7 9000 typ host")
        .unwrap();
    mf.add_remote_candidate(now, "a=unknown-attribute:whatever")
        .unwrap();
    assert_eq!(mf.remote_cand_count(), 1);

    mf.add_remote_candidate(now, "a=end-of-candidates").unwrap();
    assert!(mf.have_remote_eoc());
}

#[test]
fn test_summary_renders() {
    let mut now = Instant::now();
    let mut a = flow("10.0.0.1:1000", "summary-tag");
    let mut b = flow("10.0.0.2:2000", "b");
    establish_pair(&mut a, &mut b, &mut now);

    let summary = a.summary();
    assert!(summary.contains("summary-tag"));
    assert!(summary.contains("selected local candidate"));
    assert!(summary.contains("DTLS-SRTP"));
}
