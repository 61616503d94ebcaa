use super::*;
use std::net::SocketAddr;
use std::time::Duration;

fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

fn new_agent(controlling: bool) -> IceAgent {
    let mut agent = IceAgent::new(IceAgentConfig {
        local_ufrag: "LOCALUFRAGLOCALU".to_owned(),
        local_pwd: "LOCALPWDLOCALPWDLOCALPWDLOCALPWD".to_owned(),
        privacy_mode: false,
    });
    agent.set_role(controlling);
    agent
        .set_remote_credentials(
            "REMOTEUFRAGREMOT".to_owned(),
            "REMOTEPWDREMOTEPWDREMOTEPWDREMOT".to_owned(),
        )
        .unwrap();
    agent
}

fn decode(raw: &TaggedBytesMut) -> Message {
    let mut m = Message {
        raw: raw.message.to_vec(),
        ..Message::default()
    };
    m.decode().unwrap();
    m
}

fn success_response(request: &Message, mapped: SocketAddr) -> Vec<u8> {
    let mut out = Message::new();
    out.build(&[
        Box::new(request.clone()),
        Box::new(BINDING_SUCCESS),
        Box::new(stun::xoraddr::XorMappedAddress {
            ip: mapped.ip(),
            port: mapped.port(),
        }),
        Box::new(MessageIntegrity::new_short_term_integrity(
            "REMOTEPWDREMOTEPWDREMOTEPWDREMOT".to_owned(),
        )),
        Box::new(FINGERPRINT),
    ])
    .unwrap();
    out.raw
}

#[test]
fn test_first_success_wins() {
    let mut agent = new_agent(true);
    let mut now = Instant::now();
    let local = addr("10.0.0.1:4000");

    agent
        .add_local_candidate(Candidate::host(local), now)
        .unwrap();

    let mut c1 = Candidate::host(addr("192.0.2.1:5000"));
    c1.priority = 100;
    let mut c2 = Candidate::host(addr("192.0.2.2:5000"));
    c2.priority = 200;
    agent.add_remote_candidate(c1, now).unwrap();
    agent.add_remote_candidate(c2, now).unwrap();

    agent.start_checklist(now).unwrap();

    // two ticks start checks toward both remotes; higher priority first
    agent.handle_timeout(now);
    now += Duration::from_millis(50);
    agent.handle_timeout(now);

    let mut checks = vec![];
    while let Some(t) = agent.poll_transmit() {
        checks.push(t);
    }
    assert_eq!(checks.len(), 2);

    // answer the C1 check first, even though C2 has higher priority
    let to_c1 = checks
        .iter()
        .find(|t| t.transport.peer_addr == addr("192.0.2.1:5000"))
        .unwrap();
    let request = decode(to_c1);
    let response = success_response(&request, local);
    agent
        .handle_read(now, local, addr("192.0.2.1:5000"), &response)
        .unwrap();

    let (_, remote) = agent.selected_pair().expect("pair selected");
    assert_eq!(remote.addr, addr("192.0.2.1:5000"));
    match agent.poll_event() {
        Some(IceEvent::SelectedPair { remote, .. }) => {
            assert_eq!(remote.addr, addr("192.0.2.1:5000"))
        }
        _ => panic!("expected SelectedPair event"),
    }

    // a later success toward C2 must not re-select
    let to_c2 = checks
        .iter()
        .find(|t| t.transport.peer_addr == addr("192.0.2.2:5000"))
        .unwrap();
    let request = decode(to_c2);
    let response = success_response(&request, local);
    agent
        .handle_read(now, local, addr("192.0.2.2:5000"), &response)
        .unwrap();

    let (_, remote) = agent.selected_pair().unwrap();
    assert_eq!(remote.addr, addr("192.0.2.1:5000"));
    assert!(agent.poll_event().is_none());
}

#[test]
fn test_controlling_checks_carry_use_candidate() {
    let mut agent = new_agent(true);
    let now = Instant::now();
    let local = addr("10.0.0.1:4000");

    agent
        .add_local_candidate(Candidate::host(local), now)
        .unwrap();
    agent
        .add_remote_candidate(Candidate::host(addr("192.0.2.1:5000")), now)
        .unwrap();
    agent.start_checklist(now).unwrap();
    agent.handle_timeout(now);

    let check = agent.poll_transmit().unwrap();
    let m = decode(&check);
    assert!(UseCandidateAttr::is_set(&m));
}

#[test]
fn test_prflx_discovery() {
    let mut agent = new_agent(false);
    let now = Instant::now();
    let local = addr("10.0.0.1:4000");
    agent
        .add_local_candidate(Candidate::host(local), now)
        .unwrap();

    // inbound check from an address we have never heard of
    let mut request = Message::new();
    request
        .build(&[
            Box::new(BINDING_REQUEST),
            Box::new(TransactionId::new()),
            Box::new(TextAttribute::new(
                ATTR_USERNAME,
                "LOCALUFRAGLOCALU:REMOTEUFRAGREMOT".to_owned(),
            )),
            Box::new(AttrControlling(1)),
            Box::new(PriorityAttr(12345)),
            Box::new(MessageIntegrity::new_short_term_integrity(
                "LOCALPWDLOCALPWDLOCALPWDLOCALPWD".to_owned(),
            )),
            Box::new(FINGERPRINT),
        ])
        .unwrap();

    let source = addr("198.51.100.7:7000");
    agent.handle_read(now, local, source, &request.raw).unwrap();

    let remotes = agent.remote_candidates();
    assert_eq!(remotes.len(), 1);
    assert_eq!(remotes[0].kind, CandidateKind::PeerReflexive);
    assert_eq!(remotes[0].addr, source);
    assert_eq!(remotes[0].priority, 12345);

    // the check is answered
    let response = agent.poll_transmit().unwrap();
    assert_eq!(response.transport.peer_addr, source);
}

#[test]
fn test_privacy_mode_disables_prflx() {
    let mut agent = IceAgent::new(IceAgentConfig {
        local_ufrag: "LOCALUFRAGLOCALU".to_owned(),
        local_pwd: "LOCALPWDLOCALPWDLOCALPWDLOCALPWD".to_owned(),
        privacy_mode: true,
    });
    agent.set_role(false);
    agent
        .set_remote_credentials(
            "REMOTEUFRAGREMOT".to_owned(),
            "REMOTEPWDREMOTEPWDREMOTEPWDREMOT".to_owned(),
        )
        .unwrap();

    let now = Instant::now();
    let local = addr("10.0.0.1:4000");
    agent
        .add_local_candidate(Candidate::host(local), now)
        .unwrap();

    let mut request = Message::new();
    request
        .build(&[
            Box::new(BINDING_REQUEST),
            Box::new(TransactionId::new()),
            Box::new(TextAttribute::new(
                ATTR_USERNAME,
                "LOCALUFRAGLOCALU:REMOTEUFRAGREMOT".to_owned(),
            )),
            Box::new(AttrControlling(1)),
            Box::new(PriorityAttr(1)),
            Box::new(MessageIntegrity::new_short_term_integrity(
                "LOCALPWDLOCALPWDLOCALPWDLOCALPWD".to_owned(),
            )),
            Box::new(FINGERPRINT),
        ])
        .unwrap();

    agent
        .handle_read(now, local, addr("198.51.100.7:7000"), &request.raw)
        .unwrap();

    assert!(agent.remote_candidates().is_empty());
    // the STUN check itself is still answered
    assert!(agent.poll_transmit().is_some());
}

#[test]
fn test_all_failed_after_eoc_emits_failure() {
    let mut agent = new_agent(true);
    let mut now = Instant::now();
    let local = addr("10.0.0.1:4000");

    agent
        .add_local_candidate(Candidate::host(local), now)
        .unwrap();
    agent
        .add_remote_candidate(Candidate::host(addr("192.0.2.1:5000")), now)
        .unwrap();
    agent.set_remote_eoc();
    agent.start_checklist(now).unwrap();

    // let every retransmission elapse without a response
    for _ in 0..600 {
        agent.handle_timeout(now);
        while agent.poll_transmit().is_some() {}
        now += Duration::from_millis(50);
    }

    let mut failed = 0;
    while let Some(event) = agent.poll_event() {
        if matches!(event, IceEvent::Failed) {
            failed += 1;
        }
    }
    assert_eq!(failed, 1);
    assert!(!agent.is_ready());
}
