use super::pair::*;
use super::*;
use std::time::Duration;

fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

#[test]
fn test_priority_ordering_by_kind() {
    let host = Candidate::host(addr("10.0.0.1:4000"));
    let srflx = Candidate::server_reflexive(
        addr("203.0.113.1:4000"),
        addr("10.0.0.1:4000"),
        GatherTransport::Udp,
    );
    let prflx = Candidate::peer_reflexive(addr("203.0.113.2:4000"), addr("10.0.0.1:4000"));
    let relay = Candidate::relay(
        addr("198.51.100.1:3478"),
        addr("203.0.113.1:4000"),
        GatherTransport::Udp,
    );

    assert!(host.priority > prflx.priority);
    assert!(prflx.priority > srflx.priority);
    assert!(srflx.priority > relay.priority);
}

#[test]
fn test_priority_transport_bias() {
    let udp = Candidate::relay(
        addr("198.51.100.1:3478"),
        addr("203.0.113.1:4000"),
        GatherTransport::Udp,
    );
    let tcp = Candidate::relay(
        addr("198.51.100.1:3478"),
        addr("203.0.113.1:4000"),
        GatherTransport::Tcp,
    );
    let tls = Candidate::relay(
        addr("198.51.100.1:3478"),
        addr("203.0.113.1:4000"),
        GatherTransport::Tls,
    );

    assert!(udp.priority > tcp.priority);
    assert!(tcp.priority > tls.priority);
}

#[test]
fn test_priority_formula() {
    let host = Candidate::host(addr("10.0.0.1:4000"));
    assert_eq!(host.priority, (126 << 24) | (3 << 8) | 255);
}

#[test]
fn test_candidate_attr_round_trip() {
    let cand = Candidate::server_reflexive(
        addr("203.0.113.1:40691"),
        addr("10.0.0.1:40691"),
        GatherTransport::Udp,
    );
    let attr = cand.marshal();
    let parsed = Candidate::unmarshal(&attr).unwrap();

    assert_eq!(parsed.kind, CandidateKind::ServerReflexive);
    assert_eq!(parsed.addr, cand.addr);
    assert_eq!(parsed.priority, cand.priority);
    assert_eq!(parsed.related_addr, cand.related_addr);
}

#[test]
fn test_candidate_attr_prefixes_and_extensions() {
    let parsed =
        Candidate::unmarshal("a=candidate:1 1 UDP 2113929471 192.0.2.7 9000 typ host generation 0")
            .unwrap();
    assert_eq!(parsed.kind, CandidateKind::Host);
    assert_eq!(parsed.addr, addr("192.0.2.7:9000"));
    assert_eq!(parsed.related_addr, None);
}

#[test]
fn test_candidate_attr_rejects_tcp() {
    let result = Candidate::unmarshal("1 1 TCP 2105458943 192.0.2.7 9000 typ host");
    assert_eq!(result, Err(Error::ErrNotSupported));
}

#[test]
fn test_pair_priority_symmetric() {
    let a = CandidatePair::new(0, 0, 100, 200, true, Duration::from_millis(150));
    let b = CandidatePair::new(0, 0, 200, 100, false, Duration::from_millis(150));
    assert_eq!(a.priority(), b.priority());
}
