use super::certificate::Certificate;
use super::*;

#[test]
fn test_certificate_fingerprint_shape() {
    let cert = Certificate::generate().unwrap();
    let (algorithm, value) = cert.fingerprint();

    assert_eq!(algorithm, "sha-256");
    // 32 bytes, colon separated, lowercase hex
    assert_eq!(value.len(), 32 * 3 - 1);
    assert!(value
        .chars()
        .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase() || c == ':'));
    assert_eq!(cert.fingerprint_bytes().len(), 32);
}

#[test]
fn test_set_peer_reasserts_route() {
    let cert = Certificate::generate().unwrap();
    let mut transport = DtlsTransport::new(cert);

    let addr = "192.0.2.1:5000".parse().unwrap();
    transport.set_peer(Route::Direct, addr);
    assert_eq!(
        transport.peer(),
        Some(DtlsPeer {
            route: Route::Direct,
            addr
        })
    );

    transport.set_peer(Route::TurnChannel, addr);
    assert_eq!(transport.peer().unwrap().route, Route::TurnChannel);
    assert_eq!(transport.peer().unwrap().route.headroom(), 4);
}

#[test]
fn test_connect_requires_peer() {
    let cert = Certificate::generate().unwrap();
    let mut transport = DtlsTransport::new(cert);
    assert_eq!(
        transport.connect(Instant::now()),
        Err(Error::ErrNotConnected)
    );
}

#[test]
fn test_connect_emits_client_hello() {
    let cert = Certificate::generate().unwrap();
    let mut transport = DtlsTransport::new(cert);
    transport.set_peer(Route::Direct, "192.0.2.1:5000".parse().unwrap());

    transport.connect(Instant::now()).unwrap();
    assert!(transport.is_active());

    let flight = transport.poll_transmit().expect("client hello queued");
    // first byte of a DTLS handshake record
    assert_eq!(flight.message[0], 22);
}
