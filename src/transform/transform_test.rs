use super::*;

fn sample_rtp() -> Vec<u8> {
    // version 2, payload type 111, seq 1, ts 0, ssrc 0x1234
    let mut pkt = vec![
        0x80, 0x6f, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x12, 0x34,
    ];
    pkt.extend_from_slice(b"opus-payload");
    pkt
}

fn sample_rtcp() -> Vec<u8> {
    // receiver report, one word body plus sender ssrc
    vec![0x80, 0xc9, 0x00, 0x01, 0x00, 0x00, 0x12, 0x34, 0x00, 0x00, 0x00, 0x00]
}

fn master_key() -> Vec<u8> {
    (0u8..30).collect()
}

#[test]
fn test_sdes_round_trip() {
    let mut sender = SrtpTransform::default();
    let mut receiver = SrtpTransform::default();
    sender.install_sdes_tx(&master_key()).unwrap();
    receiver.install_sdes_rx(&master_key()).unwrap();

    let plain = sample_rtp();
    let encrypted = match sender.protect(&plain).unwrap() {
        Protected::Packet(p) => p,
        _ => panic!("expected encrypted packet"),
    };
    assert_ne!(&encrypted[..], &plain[..]);

    let decrypted = receiver.unprotect(PacketKind::Rtp, &encrypted).unwrap();
    assert_eq!(&decrypted[..], &plain[..]);
}

#[test]
fn test_replay_is_flagged_duplicate() {
    let mut sender = SrtpTransform::default();
    let mut receiver = SrtpTransform::default();
    sender.install_sdes_tx(&master_key()).unwrap();
    receiver.install_sdes_rx(&master_key()).unwrap();

    let encrypted = match sender.protect(&sample_rtp()).unwrap() {
        Protected::Packet(p) => p,
        _ => panic!("expected encrypted packet"),
    };

    receiver.unprotect(PacketKind::Rtp, &encrypted).unwrap();
    let again = receiver.unprotect(PacketKind::Rtp, &encrypted);
    assert_eq!(again.unwrap_err(), Error::ErrDuplicate);
}

#[test]
fn test_short_rtcp_dropped_before_encrypt() {
    let mut sender = SrtpTransform::default();
    sender.install_sdes_tx(&master_key()).unwrap();

    let short = vec![0x80, 0xc9, 0x00, 0x00, 0x00, 0x00, 0x12, 0x34];
    assert!(matches!(
        sender.protect(&short).unwrap(),
        Protected::Drop
    ));

    let full = sample_rtcp();
    assert!(matches!(
        sender.protect(&full).unwrap(),
        Protected::Packet(_)
    ));
}

#[test]
fn test_non_media_bypasses() {
    let mut sender = SrtpTransform::default();
    sender.install_sdes_tx(&master_key()).unwrap();

    // DTLS record must never be touched
    let dtls = vec![22, 0xfe, 0xfd, 0, 0];
    assert!(matches!(sender.protect(&dtls).unwrap(), Protected::Bypass));
}

#[test]
fn test_unprotect_without_context() {
    let mut receiver = SrtpTransform::default();
    let result = receiver.unprotect(PacketKind::Rtp, &sample_rtp());
    assert_eq!(result.unwrap_err(), Error::ErrNotReady);
}

#[test]
fn test_rejects_bad_master_key_length() {
    let mut t = SrtpTransform::default();
    assert_eq!(
        t.install_sdes_tx(&[0u8; 16]),
        Err(Error::ErrInvalidArgument)
    );
}
