#[cfg(test)]
mod negotiation_test;

use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use log::{debug, info, warn};
use rand::RngCore;
use std::fmt;
use std::io::Cursor;
use std::net::SocketAddr;

use sdp::description::common::{Address, Attribute, Bandwidth, ConnectionInformation};
use sdp::description::media::{MediaDescription, MediaName, RangedPort};
use sdp::description::session::{
    Origin, SessionDescription, TimeDescription, ATTR_KEY_SSRC,
};

use crate::candidate::Candidate;
use crate::codec::CodecDescriptor;
use crate::constants::{
    AUDIO_BANDWIDTH, PORT_DISCARD, SDES_MASTER_KEY_LEN, SDP_TOOL, VIDEO_BANDWIDTH,
};
use crate::error::{Error, Result};

const SDES_SUITE: &str = "AES_CM_128_HMAC_SHA1_80";

/// DTLS setup role carried in `a=setup`.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum Setup {
    #[default]
    ActPass,
    Active,
    Passive,
}

impl Setup {
    pub fn name(self) -> &'static str {
        match self {
            Setup::ActPass => "actpass",
            Setup::Active => "active",
            Setup::Passive => "passive",
        }
    }

    pub fn resolve(name: &str) -> Option<Self> {
        Some(match name {
            "actpass" => Setup::ActPass,
            "active" => Setup::Active,
            "passive" => Setup::Passive,
            _ => return None,
        })
    }
}

impl fmt::Display for Setup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The key-management scheme the session ends up using.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum CryptoKind {
    #[default]
    None,
    DtlsSrtp,
    Sdes,
}

impl CryptoKind {
    pub fn name(self) -> &'static str {
        match self {
            CryptoKind::None => "None",
            CryptoKind::DtlsSrtp => "DTLS-SRTP",
            CryptoKind::Sdes => "SDESC",
        }
    }
}

impl fmt::Display for CryptoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Set of key-management schemes a side is willing to use.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct CryptoSet {
    pub dtls_srtp: bool,
    pub sdes: bool,
}

impl CryptoSet {
    pub const NONE: CryptoSet = CryptoSet {
        dtls_srtp: false,
        sdes: false,
    };
    pub const DTLS_SRTP: CryptoSet = CryptoSet {
        dtls_srtp: true,
        sdes: false,
    };
    pub const SDES: CryptoSet = CryptoSet {
        dtls_srtp: false,
        sdes: true,
    };
    pub const BOTH: CryptoSet = CryptoSet {
        dtls_srtp: true,
        sdes: true,
    };

    pub fn is_empty(self) -> bool {
        !self.dtls_srtp && !self.sdes
    }

    fn common(self, other: CryptoSet) -> CryptoSet {
        CryptoSet {
            dtls_srtp: self.dtls_srtp && other.dtls_srtp,
            sdes: self.sdes && other.sdes,
        }
    }
}

impl fmt::Display for CryptoSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.dtls_srtp, self.sdes) {
            (false, false) => write!(f, "None"),
            (true, false) => write!(f, "DTLS-SRTP"),
            (false, true) => write!(f, "SDESC"),
            (true, true) => write!(f, "DTLS-SRTP SDESC"),
        }
    }
}

/// Offer/answer progress.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum SdpState {
    #[default]
    Idle,
    OfferGenerated,
    OfferHandled,
    Done,
}

/// Media kinds sharing the one bundled transport.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
    VideoRtx,
    Data,
}

/// What was learned from the peer's description.
#[derive(Debug, Default, Clone)]
pub struct RemoteDescription {
    pub tool: Option<String>,
    pub ufrag: String,
    pub pwd: String,
    pub setup: Setup,
    pub cryptos: CryptoSet,
    pub fingerprint: Option<(String, Vec<u8>)>,
    pub sdes_key: Option<Vec<u8>>,
    pub candidates: Vec<Candidate>,
    pub end_of_candidates: bool,
    pub ice_lite: bool,
    pub has_video: bool,
    pub has_data: bool,
    pub codec_name: Option<String>,
}

struct VideoSection {
    codecs: Vec<CodecDescriptor>,
    ssrc: u32,
    rtx_ssrc: u32,
    label: String,
    mid: String,
}

pub struct SessionConfig {
    pub laddr: SocketAddr,
    pub cryptos: CryptoSet,
    pub audio_codecs: Vec<CodecDescriptor>,
    pub ice_ufrag: String,
    pub ice_pwd: String,
    /// `a=fingerprint` of the local certificate, e.g. ("sha-256", "AB:CD:..").
    pub fingerprint: Option<(String, String)>,
}

/// Local side of the offer/answer exchange: owns the emitted description and
/// digests the remote one.
pub struct Session {
    laddr: SocketAddr,

    cname: String,
    msid: String,
    audio_label: String,

    audio_codecs: Vec<CodecDescriptor>,
    audio_ssrc: u32,
    audio_mid: String,
    video: Option<VideoSection>,
    data_mid: Option<String>,
    bundle_group: Option<String>,

    ice_ufrag: String,
    ice_pwd: String,
    fingerprint: Option<(String, String)>,
    candidates: Vec<String>,
    end_of_candidates: bool,

    cryptos_local: CryptoSet,
    crypto_fallback: CryptoKind,
    crypto: CryptoKind,
    setup_local: Setup,
    sdes_tx_key: Option<Vec<u8>>,

    state: SdpState,
    offerer: bool,
    got_sdp: bool,
    sent_sdp: bool,

    remote: RemoteDescription,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        let sdes_tx_key = if config.cryptos.sdes {
            let mut key = vec![0u8; SDES_MASTER_KEY_LEN];
            rand::rng().fill_bytes(&mut key);
            Some(key)
        } else {
            None
        };

        Self {
            laddr: config.laddr,
            cname: random_string(16),
            msid: random_string(36),
            audio_label: random_string(36),
            audio_codecs: config.audio_codecs,
            audio_ssrc: rand::random::<u32>(),
            audio_mid: "audio".to_owned(),
            video: None,
            data_mid: None,
            bundle_group: None,
            ice_ufrag: config.ice_ufrag,
            ice_pwd: config.ice_pwd,
            fingerprint: config.fingerprint,
            candidates: vec![],
            end_of_candidates: false,
            cryptos_local: config.cryptos,
            crypto_fallback: CryptoKind::DtlsSrtp,
            crypto: CryptoKind::None,
            setup_local: Setup::ActPass,
            sdes_tx_key,
            state: SdpState::Idle,
            offerer: false,
            got_sdp: false,
            sent_sdp: false,
            remote: RemoteDescription::default(),
        }
    }

    /// Adds a video section with its primary and retransmission SSRCs.
    pub fn add_video(&mut self, codecs: Vec<CodecDescriptor>) {
        if self.video.is_some() {
            return;
        }
        self.video = Some(VideoSection {
            codecs,
            ssrc: rand::random::<u32>(),
            rtx_ssrc: rand::random::<u32>(),
            label: random_string(36),
            mid: "video".to_owned(),
        });
    }

    /// Adds an application section for the data channel.
    pub fn add_data(&mut self) {
        if self.data_mid.is_none() {
            self.data_mid = Some("data".to_owned());
        }
    }

    pub fn has_video(&self) -> bool {
        self.video.is_some()
    }

    pub fn has_data(&self) -> bool {
        self.data_mid.is_some()
    }

    pub fn cname(&self) -> &str {
        &self.cname
    }

    pub fn local_ssrc(&self, kind: MediaKind) -> Option<u32> {
        match kind {
            MediaKind::Audio => Some(self.audio_ssrc),
            MediaKind::Video => self.video.as_ref().map(|v| v.ssrc),
            MediaKind::VideoRtx => self.video.as_ref().map(|v| v.rtx_ssrc),
            MediaKind::Data => None,
        }
    }

    pub fn state(&self) -> SdpState {
        self.state
    }

    pub fn is_offerer(&self) -> bool {
        self.offerer
    }

    pub fn got_sdp(&self) -> bool {
        self.got_sdp
    }

    pub fn sent_sdp(&self) -> bool {
        self.sent_sdp
    }

    pub fn crypto(&self) -> CryptoKind {
        self.crypto
    }

    pub fn cryptos_local(&self) -> CryptoSet {
        self.cryptos_local
    }

    pub fn cryptos_remote(&self) -> CryptoSet {
        self.remote.cryptos
    }

    pub fn set_fallback_crypto(&mut self, fallback: CryptoKind) {
        self.crypto_fallback = fallback;
    }

    pub fn setup_local(&self) -> Setup {
        self.setup_local
    }

    pub fn setup_remote(&self) -> Setup {
        self.remote.setup
    }

    /// Pins the local setup role. Only the actpass wildcard may move to a
    /// concrete role; any other transition is a protocol error.
    pub fn set_setup(&mut self, setup: Setup) -> Result<()> {
        info!(
            "mediaflow: local_setup: `{}' --> `{}'",
            self.setup_local, setup
        );
        if setup != self.setup_local {
            if self.setup_local == Setup::ActPass {
                self.setup_local = setup;
            } else {
                warn!(
                    "mediaflow: set_setup: illegal transition from `{}' to `{}'",
                    self.setup_local, setup
                );
                return Err(Error::ErrProtocolViolation);
            }
        }
        Ok(())
    }

    pub fn remote(&self) -> &RemoteDescription {
        &self.remote
    }

    pub fn sdes_tx_key(&self) -> Option<&[u8]> {
        self.sdes_tx_key.as_deref()
    }

    /// Records a gathered local candidate for inclusion in the description.
    pub fn add_local_candidate_attr(&mut self, cand: &Candidate) {
        self.candidates.push(cand.marshal());
    }

    pub fn set_end_of_candidates(&mut self) {
        self.end_of_candidates = true;
    }

    pub fn generate_offer(&mut self) -> Result<String> {
        if self.state != SdpState::Idle {
            warn!("mediaflow: invalid sdp state {:?} (generate_offer)", self.state);
            return Err(Error::ErrInvalidSdpState);
        }
        self.state = SdpState::OfferGenerated;
        self.offerer = true;

        let sdp = self.build(true).marshal();
        self.sent_sdp = true;
        debug!("---------- generate SDP offer ---------\n{sdp}");
        Ok(sdp)
    }

    pub fn generate_answer(&mut self) -> Result<String> {
        if self.state != SdpState::OfferHandled {
            warn!("mediaflow: invalid sdp state {:?} (generate_answer)", self.state);
            return Err(Error::ErrInvalidSdpState);
        }
        self.state = SdpState::Done;
        self.offerer = false;

        let sdp = self.build(false).marshal();
        self.sent_sdp = true;
        debug!("---------- generate SDP answer ---------\n{sdp}");
        Ok(sdp)
    }

    pub fn handle_offer(&mut self, sdp: &str) -> Result<()> {
        if self.state != SdpState::Idle {
            warn!("mediaflow: invalid sdp state {:?} (handle_offer)", self.state);
            return Err(Error::ErrInvalidSdpState);
        }
        self.state = SdpState::OfferHandled;
        self.offerer = false;

        debug!("---------- recv SDP offer ----------\n{sdp}");
        self.parse_remote(sdp)?;
        self.got_sdp = true;
        Ok(())
    }

    pub fn handle_answer(&mut self, sdp: &str) -> Result<()> {
        if self.state != SdpState::OfferGenerated {
            warn!("mediaflow: invalid sdp state {:?} (handle_answer)", self.state);
            return Err(Error::ErrInvalidSdpState);
        }
        self.state = SdpState::Done;

        debug!("---------- recv SDP answer ----------\n{sdp}");
        self.parse_remote(sdp)?;
        self.got_sdp = true;
        Ok(())
    }

    /// Returns to idle so a new exchange can start.
    pub fn reset(&mut self) {
        self.state = SdpState::Idle;
        self.got_sdp = false;
        self.sent_sdp = false;
    }

    fn profile(&self) -> &'static str {
        // https://tools.ietf.org/html/draft-ietf-rtcweb-jsep section 5.1.1
        if self.cryptos_local.dtls_srtp {
            "UDP/TLS/RTP/SAVPF"
        } else {
            "RTP/SAVPF"
        }
    }

    fn build(&self, offer: bool) -> SessionDescription {
        let addr_type = if self.laddr.is_ipv4() { "IP4" } else { "IP6" };
        let mut sd = SessionDescription {
            version: 0,
            origin: Origin {
                username: "-".to_owned(),
                session_id: rand::random::<u32>() as u64,
                session_version: rand::random::<u32>() as u64,
                network_type: "IN".to_owned(),
                address_type: addr_type.to_owned(),
                unicast_address: self.laddr.ip().to_string(),
            },
            session_name: "-".to_owned(),
            session_information: None,
            uri: None,
            email_address: None,
            phone_number: None,
            connection_information: Some(ConnectionInformation {
                network_type: "IN".to_owned(),
                address_type: addr_type.to_owned(),
                address: Some(Address {
                    address: self.laddr.ip().to_string(),
                    ttl: None,
                    range: None,
                }),
            }),
            bandwidth: vec![],
            time_descriptions: vec![TimeDescription::default()],
            time_zones: vec![],
            encryption_key: None,
            attributes: vec![],
            media_descriptions: vec![],
        };

        sd = sd.with_value_attribute("tool".to_owned(), SDP_TOOL.to_owned());

        let group = self.bundle_group.clone().unwrap_or_else(|| {
            let mut group = format!("BUNDLE {}", self.audio_mid);
            if let Some(video) = &self.video {
                group.push(' ');
                group.push_str(&video.mid);
            }
            if let Some(data_mid) = &self.data_mid {
                group.push(' ');
                group.push_str(data_mid);
            }
            group
        });
        sd = sd
            .with_value_attribute("group".to_owned(), group)
            .with_value_attribute("ice-options".to_owned(), "trickle".to_owned())
            .with_property_attribute(if offer { "x-OFFER" } else { "x-ANSWER" }.to_owned());

        sd.media_descriptions.push(self.build_audio());
        if let Some(video) = &self.video {
            sd.media_descriptions.push(self.build_video(video));
        }
        if let Some(data_mid) = &self.data_mid {
            sd.media_descriptions.push(self.build_data(data_mid));
        }

        sd
    }

    fn push_transport_attrs(&self, m: &mut MediaDescription) {
        m.attributes
            .push(Attribute::new("rtcp-mux".to_owned(), None));
        m.attributes.push(Attribute::new(
            "ice-ufrag".to_owned(),
            Some(self.ice_ufrag.clone()),
        ));
        m.attributes.push(Attribute::new(
            "ice-pwd".to_owned(),
            Some(self.ice_pwd.clone()),
        ));

        if self.cryptos_local.dtls_srtp {
            if let Some((algorithm, value)) = &self.fingerprint {
                m.attributes.push(Attribute::new(
                    "fingerprint".to_owned(),
                    Some(format!("{algorithm} {value}")),
                ));
            }
            m.attributes.push(Attribute::new(
                "setup".to_owned(),
                Some(self.setup_local.name().to_owned()),
            ));
        }
    }

    /// Candidates ride on the audio section; every other section shares the
    /// one bundled transport.
    fn push_candidate_attrs(&self, m: &mut MediaDescription) {
        for cand in &self.candidates {
            m.attributes
                .push(Attribute::new("candidate".to_owned(), Some(cand.clone())));
        }
        if self.end_of_candidates {
            m.attributes
                .push(Attribute::new("end-of-candidates".to_owned(), None));
        }
    }

    fn build_audio(&self) -> MediaDescription {
        let mut m = MediaDescription {
            media_name: MediaName {
                media: "audio".to_owned(),
                port: RangedPort {
                    value: PORT_DISCARD as isize,
                    range: None,
                },
                protos: self.profile().split('/').map(ToOwned::to_owned).collect(),
                formats: self
                    .audio_codecs
                    .iter()
                    .map(|c| c.payload_type.to_string())
                    .collect(),
            },
            media_title: None,
            connection_information: None,
            bandwidth: vec![Bandwidth {
                experimental: false,
                bandwidth_type: "AS".to_owned(),
                bandwidth: AUDIO_BANDWIDTH,
            }],
            encryption_key: None,
            attributes: vec![],
        };

        m.attributes.push(Attribute::new(
            "mid".to_owned(),
            Some(self.audio_mid.clone()),
        ));
        for codec in &self.audio_codecs {
            m.attributes
                .push(Attribute::new("rtpmap".to_owned(), Some(codec.rtpmap())));
            if let Some(fmtp) = &codec.fmtp {
                m.attributes.push(Attribute::new(
                    "fmtp".to_owned(),
                    Some(format!("{} {}", codec.payload_type, fmtp)),
                ));
            }
        }

        self.push_transport_attrs(&mut m);
        self.push_candidate_attrs(&mut m);

        if let (true, Some(key)) = (self.cryptos_local.sdes, &self.sdes_tx_key) {
            m.attributes.push(Attribute::new(
                "crypto".to_owned(),
                Some(format!(
                    "1 {SDES_SUITE} inline:{}",
                    BASE64_STANDARD.encode(key)
                )),
            ));
        }

        m.attributes.push(Attribute::new(
            ATTR_KEY_SSRC.to_owned(),
            Some(format!("{} cname:{}", self.audio_ssrc, self.cname)),
        ));

        m
    }

    fn build_video(&self, video: &VideoSection) -> MediaDescription {
        let mut m = MediaDescription {
            media_name: MediaName {
                media: "video".to_owned(),
                port: RangedPort {
                    value: PORT_DISCARD as isize,
                    range: None,
                },
                protos: self.profile().split('/').map(ToOwned::to_owned).collect(),
                formats: video
                    .codecs
                    .iter()
                    .map(|c| c.payload_type.to_string())
                    .collect(),
            },
            media_title: None,
            connection_information: None,
            bandwidth: vec![Bandwidth {
                experimental: false,
                bandwidth_type: "AS".to_owned(),
                bandwidth: VIDEO_BANDWIDTH,
            }],
            encryption_key: None,
            attributes: vec![],
        };

        m.attributes
            .push(Attribute::new("mid".to_owned(), Some(video.mid.clone())));
        for codec in &video.codecs {
            m.attributes
                .push(Attribute::new("rtpmap".to_owned(), Some(codec.rtpmap())));
            if let Some(fmtp) = &codec.fmtp {
                m.attributes.push(Attribute::new(
                    "fmtp".to_owned(),
                    Some(format!("{} {}", codec.payload_type, fmtp)),
                ));
            }
        }

        self.push_transport_attrs(&mut m);

        m.attributes.push(Attribute::new(
            "ssrc-group".to_owned(),
            Some(format!("FID {} {}", video.ssrc, video.rtx_ssrc)),
        ));
        for ssrc in [video.ssrc, video.rtx_ssrc] {
            m.attributes.push(Attribute::new(
                ATTR_KEY_SSRC.to_owned(),
                Some(format!("{ssrc} cname:{}", self.cname)),
            ));
            m.attributes.push(Attribute::new(
                ATTR_KEY_SSRC.to_owned(),
                Some(format!("{ssrc} msid:{} {}", self.msid, video.label)),
            ));
            m.attributes.push(Attribute::new(
                ATTR_KEY_SSRC.to_owned(),
                Some(format!("{ssrc} mslabel:{}", self.msid)),
            ));
            m.attributes.push(Attribute::new(
                ATTR_KEY_SSRC.to_owned(),
                Some(format!("{ssrc} label:{}", video.label)),
            ));
        }

        m
    }

    fn build_data(&self, mid: &str) -> MediaDescription {
        let mut m = MediaDescription {
            media_name: MediaName {
                media: "application".to_owned(),
                port: RangedPort {
                    value: PORT_DISCARD as isize,
                    range: None,
                },
                protos: vec!["DTLS".to_owned(), "SCTP".to_owned()],
                formats: vec!["5000".to_owned()],
            },
            media_title: None,
            connection_information: None,
            bandwidth: vec![],
            encryption_key: None,
            attributes: vec![],
        };

        m.attributes
            .push(Attribute::new("mid".to_owned(), Some(mid.to_owned())));
        self.push_transport_attrs(&mut m);
        m.attributes.push(Attribute::new(
            "sctpmap".to_owned(),
            Some("5000 webrtc-datachannel 16".to_owned()),
        ));

        m
    }

    fn parse_remote(&mut self, raw: &str) -> Result<()> {
        let mut reader = Cursor::new(raw.as_bytes());
        let sd = SessionDescription::unmarshal(&mut reader)
            .map_err(|_| Error::ErrProtocolViolation)?;

        let audio = sd
            .media_descriptions
            .iter()
            .find(|m| m.media_name.media == "audio")
            .ok_or(Error::ErrProtocolViolation)?;

        if audio.media_name.port.value == 0 {
            warn!("mediaflow: sdp medialine port is 0 - disabled");
            return Err(Error::ErrProtocolViolation);
        }

        if !audio.has_attribute("rtcp-mux") {
            warn!("mediaflow: no 'rtcp-mux' attribute in SDP -- rejecting");
            return Err(Error::ErrProtocolViolation);
        }

        let mut remote = RemoteDescription {
            tool: sd.attribute("tool").cloned(),
            ..RemoteDescription::default()
        };

        remote.ufrag = media_session_attr(audio, &sd, "ice-ufrag")
            .unwrap_or_default();
        remote.pwd = media_session_attr(audio, &sd, "ice-pwd").unwrap_or_default();
        if remote.ufrag.is_empty() || remote.pwd.is_empty() {
            warn!("mediaflow: missing remote ice-ufrag/ice-pwd");
        }

        remote.ice_lite = sd.has_attribute("ice-lite");
        remote.end_of_candidates = audio.has_attribute("end-of-candidates");

        for attr in &audio.attributes {
            if attr.key != "candidate" {
                continue;
            }
            let Some(value) = &attr.value else { continue };
            // non-RTP, non-UDP candidates are silently skipped
            if let Ok(cand) = Candidate::unmarshal(value) {
                if cand.component == 1 {
                    remote.candidates.push(cand);
                }
            }
        }

        if let Some(fingerprint) = media_session_attr(audio, &sd, "fingerprint") {
            remote.fingerprint = parse_fingerprint(&fingerprint);
            remote.cryptos.dtls_srtp = true;
        }
        for attr in &audio.attributes {
            if attr.key != "crypto" {
                continue;
            }
            remote.cryptos.sdes = true;
            if remote.sdes_key.is_none() {
                remote.sdes_key = attr.value.as_deref().and_then(parse_sdes_crypto);
            }
        }

        if let Some(setup) = media_session_attr(audio, &sd, "setup") {
            remote.setup = Setup::resolve(&setup).ok_or_else(|| {
                warn!("mediaflow: illegal setup '{setup}' from remote");
                Error::ErrProtocolViolation
            })?;
        }

        // echo the peer's mid values
        if let Some(Some(mid)) = audio.attribute("mid") {
            debug!("mediaflow: updating mid-value to '{mid}'");
            self.audio_mid = mid.to_owned();
        }
        for m in &sd.media_descriptions {
            match m.media_name.media.as_str() {
                "video" => {
                    remote.has_video = !m.media_name.formats.is_empty();
                    if let (Some(video), Some(Some(mid))) = (self.video.as_mut(), m.attribute("mid"))
                    {
                        video.mid = mid.to_owned();
                    }
                }
                "application" => {
                    remote.has_data = true;
                    if let (Some(_), Some(Some(mid))) = (self.data_mid.as_ref(), m.attribute("mid"))
                    {
                        self.data_mid = Some(mid.to_owned());
                    }
                }
                _ => {}
            }
        }
        if let Some(group) = sd.attribute("group") {
            self.bundle_group = Some(group.clone());
        }

        // negotiate a common crypto
        let common = self.cryptos_local.common(remote.cryptos);
        if !self.cryptos_local.is_empty() && remote.cryptos.is_empty() {
            warn!("mediaflow: we offered crypto, but got none");
            return Err(Error::ErrProtocolViolation);
        }
        if !self.cryptos_local.is_empty() && !remote.cryptos.is_empty() && common.is_empty() {
            warn!("mediaflow: no common crypto in SDP -- rejecting");
            return Err(Error::ErrNoCommonCrypto);
        }
        self.crypto = match (common.dtls_srtp, common.sdes) {
            (true, true) => {
                info!(
                    "mediaflow: negotiated both cryptos, fallback to '{}'",
                    self.crypto_fallback
                );
                self.crypto_fallback
            }
            (true, false) => CryptoKind::DtlsSrtp,
            (false, true) => CryptoKind::Sdes,
            (false, false) => CryptoKind::None,
        };
        info!("mediaflow: negotiated crypto = {}", self.crypto);

        // pick the codec: first remote format that matches a local codec
        remote.codec_name = audio
            .media_name
            .formats
            .iter()
            .filter_map(|pt| pt.parse::<u8>().ok())
            .find_map(|pt| {
                self.audio_codecs
                    .iter()
                    .find(|c| c.payload_type == pt)
                    .map(|c| c.name.clone())
            });

        self.remote = remote;

        // the setup role also decides the data-channel initiator, so it is
        // resolved regardless of the negotiated crypto
        self.resolve_setup()?;

        Ok(())
    }

    /// RFC 5763 setup-role resolution against the remote offer/answer.
    fn resolve_setup(&mut self) -> Result<()> {
        let setup_local = match self.remote.setup {
            Setup::ActPass => {
                // setup:active is RECOMMENDED
                if self.setup_local == Setup::ActPass {
                    Setup::Active
                } else {
                    self.setup_local
                }
            }
            Setup::Active => Setup::Passive,
            Setup::Passive => Setup::Active,
        };

        info!("mediaflow: local_setup={}", setup_local.name());
        self.set_setup(setup_local)
    }
}

fn random_string(len: usize) -> String {
    const RUNES: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    shared::util::generate_crypto_random_string(len, RUNES)
}

/// Looks up an attribute at media level first, session level second.
fn media_session_attr(m: &MediaDescription, sd: &SessionDescription, key: &str) -> Option<String> {
    if let Some(Some(value)) = m.attribute(key) {
        return Some(value.to_owned());
    }
    sd.attribute(key).cloned()
}

/// Parses `a=fingerprint` into (algorithm, digest bytes).
fn parse_fingerprint(value: &str) -> Option<(String, Vec<u8>)> {
    let mut parts = value.split_whitespace();
    let algorithm = parts.next()?.to_lowercase();
    let digest = parts.next()?;
    let bytes: Option<Vec<u8>> = digest
        .split(':')
        .map(|b| u8::from_str_radix(b, 16).ok())
        .collect();
    Some((algorithm, bytes?))
}

/// Parses `a=crypto:1 AES_CM_128_HMAC_SHA1_80 inline:<b64>`; MKI and
/// multi-key parameters are not supported.
fn parse_sdes_crypto(value: &str) -> Option<Vec<u8>> {
    let mut parts = value.split_whitespace();
    let _tag = parts.next()?;
    let suite = parts.next()?;
    if !suite.eq_ignore_ascii_case(SDES_SUITE) {
        return None;
    }
    let keyprm = parts.next()?;
    let b64 = keyprm.strip_prefix("inline:")?;
    let b64 = b64.split(['|', ';']).next()?;
    let key = BASE64_STANDARD.decode(b64).ok()?;
    if key.len() != SDES_MASTER_KEY_LEN {
        return None;
    }
    Some(key)
}
