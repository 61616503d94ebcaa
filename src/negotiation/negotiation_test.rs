use super::*;
use crate::codec::CodecDescriptor;

fn session(cryptos: CryptoSet) -> Session {
    Session::new(SessionConfig {
        laddr: "10.0.0.1:0".parse().unwrap(),
        cryptos,
        audio_codecs: vec![CodecDescriptor::audio("opus", 111, 48000, 2)],
        ice_ufrag: "ufragufragufragu".to_owned(),
        ice_pwd: "pwdpwdpwdpwdpwdpwdpwdpwdpwdpwdpw".to_owned(),
        fingerprint: Some((
            "sha-256".to_owned(),
            "ab:cd:ef:01:23:45:67:89:ab:cd:ef:01:23:45:67:89:ab:cd:ef:01:23:45:67:89:ab:cd:ef:01:23:45:67:89".to_owned(),
        )),
    })
}

#[test]
fn test_offer_contains_required_attributes() {
    let mut s = session(CryptoSet::DTLS_SRTP);
    s.add_video(vec![CodecDescriptor::video("VP8", 100)]);
    s.add_data();

    let offer = s.generate_offer().unwrap();

    assert!(offer.contains("m=audio 9 UDP/TLS/RTP/SAVPF 111"));
    assert!(offer.contains("a=group:BUNDLE audio video data"));
    assert!(offer.contains("a=ice-options:trickle"));
    assert!(offer.contains("a=rtcp-mux"));
    assert!(offer.contains("a=setup:actpass"));
    assert!(offer.contains("a=fingerprint:sha-256"));
    assert!(offer.contains("a=ice-ufrag:ufragufragufragu"));
    assert!(offer.contains("a=mid:audio"));
    assert!(offer.contains("a=ssrc-group:FID"));
    assert!(offer.contains("a=sctpmap:5000 webrtc-datachannel 16"));
    assert!(offer.contains("a=x-OFFER"));
    assert!(offer.contains("b=AS:50"));
    assert!(offer.contains("b=AS:800"));
    assert_eq!(s.state(), SdpState::OfferGenerated);
    assert!(s.sent_sdp());
}

#[test]
fn test_sdes_offer_profile_and_crypto() {
    let mut s = session(CryptoSet::SDES);
    let offer = s.generate_offer().unwrap();

    assert!(offer.contains("m=audio 9 RTP/SAVPF 111"));
    assert!(offer.contains("a=crypto:1 AES_CM_128_HMAC_SHA1_80 inline:"));
    assert!(!offer.contains("a=setup:"));
}

#[test]
fn test_offer_answer_actpass_resolves_active() {
    let mut offerer = session(CryptoSet::DTLS_SRTP);
    let offer = offerer.generate_offer().unwrap();

    let mut answerer = session(CryptoSet::DTLS_SRTP);
    answerer.handle_offer(&offer).unwrap();

    // remote actpass and local actpass resolves to active
    assert_eq!(answerer.setup_local(), Setup::Active);
    assert_eq!(answerer.crypto(), CryptoKind::DtlsSrtp);

    let answer = answerer.generate_answer().unwrap();
    assert!(answer.contains("a=setup:active"));
    assert!(answer.contains("a=x-ANSWER"));
    assert_eq!(answerer.state(), SdpState::Done);

    offerer.handle_answer(&answer).unwrap();
    assert_eq!(offerer.setup_local(), Setup::Passive);
    assert_eq!(offerer.state(), SdpState::Done);
    assert_eq!(offerer.remote().codec_name.as_deref(), Some("opus"));
}

#[test]
fn test_handle_offer_round_trips_candidates() {
    let mut offerer = session(CryptoSet::DTLS_SRTP);
    let cand = Candidate::host("192.0.2.10:3456".parse().unwrap());
    offerer.add_local_candidate_attr(&cand);
    offerer.set_end_of_candidates();
    let offer = offerer.generate_offer().unwrap();

    let mut answerer = session(CryptoSet::DTLS_SRTP);
    answerer.handle_offer(&offer).unwrap();

    let remote = answerer.remote();
    assert_eq!(remote.candidates.len(), 1);
    assert_eq!(remote.candidates[0].addr, cand.addr);
    assert!(remote.end_of_candidates);
    assert_eq!(remote.ufrag, "ufragufragufragu");
    assert!(remote.fingerprint.is_some());
}

#[test]
fn test_handle_offer_rejects_port_zero() {
    let sdp = "v=0\r\n\
               o=- 1 1 IN IP4 10.0.0.2\r\n\
               s=-\r\n\
               t=0 0\r\n\
               m=audio 0 UDP/TLS/RTP/SAVPF 111\r\n\
               a=rtcp-mux\r\n";
    let mut s = session(CryptoSet::DTLS_SRTP);
    assert_eq!(s.handle_offer(sdp), Err(Error::ErrProtocolViolation));
}

#[test]
fn test_handle_offer_rejects_missing_rtcp_mux() {
    let sdp = "v=0\r\n\
               o=- 1 1 IN IP4 10.0.0.2\r\n\
               s=-\r\n\
               t=0 0\r\n\
               m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
               a=ice-ufrag:abcdabcdabcdabcd\r\n\
               a=ice-pwd:0123456789012345678901234567890123456789\r\n";
    let mut s = session(CryptoSet::DTLS_SRTP);
    assert_eq!(s.handle_offer(sdp), Err(Error::ErrProtocolViolation));
}

#[test]
fn test_handle_offer_rejects_no_common_crypto() {
    let mut offerer = session(CryptoSet::SDES);
    let offer = offerer.generate_offer().unwrap();

    let mut answerer = session(CryptoSet::DTLS_SRTP);
    assert_eq!(answerer.handle_offer(&offer), Err(Error::ErrNoCommonCrypto));
}

#[test]
fn test_both_cryptos_fall_back() {
    let mut offerer = session(CryptoSet::BOTH);
    let offer = offerer.generate_offer().unwrap();

    let mut answerer = session(CryptoSet::BOTH);
    answerer.handle_offer(&offer).unwrap();
    assert_eq!(answerer.crypto(), CryptoKind::DtlsSrtp);

    let mut answerer_sdes = session(CryptoSet::BOTH);
    answerer_sdes.set_fallback_crypto(CryptoKind::Sdes);
    answerer_sdes.handle_offer(&offer).unwrap();
    assert_eq!(answerer_sdes.crypto(), CryptoKind::Sdes);
    assert_eq!(
        answerer_sdes.remote().sdes_key.as_ref().map(Vec::len),
        Some(SDES_MASTER_KEY_LEN)
    );
}

#[test]
fn test_set_setup_transitions() {
    let mut s = session(CryptoSet::DTLS_SRTP);
    assert_eq!(s.setup_local(), Setup::ActPass);
    s.set_setup(Setup::Passive).unwrap();
    assert_eq!(s.setup_local(), Setup::Passive);
    // once pinned, only the same value is accepted
    s.set_setup(Setup::Passive).unwrap();
    assert_eq!(
        s.set_setup(Setup::Active),
        Err(Error::ErrProtocolViolation)
    );
}

#[test]
fn test_sdp_state_machine_rejects_bad_transitions() {
    let mut s = session(CryptoSet::DTLS_SRTP);
    assert_eq!(s.generate_answer(), Err(Error::ErrInvalidSdpState));
    let _offer = s.generate_offer().unwrap();
    assert_eq!(s.generate_offer(), Err(Error::ErrInvalidSdpState));

    let mut other = session(CryptoSet::DTLS_SRTP);
    let offer2 = other.generate_offer().unwrap();
    assert_eq!(s.handle_offer(&offer2), Err(Error::ErrInvalidSdpState));
}

#[test]
fn test_reset_returns_to_idle() {
    let mut s = session(CryptoSet::DTLS_SRTP);
    let _ = s.generate_offer().unwrap();
    s.reset();
    assert_eq!(s.state(), SdpState::Idle);
    assert!(!s.sent_sdp());
    assert!(!s.got_sdp());
}
