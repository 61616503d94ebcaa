#[cfg(test)]
mod flow_test;

use bytes::BytesMut;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::time::Instant;

use sansio::Protocol as _;
use stun::message::{Getter, Message, TransactionId, BINDING_REQUEST};
use stun::xoraddr::XorMappedAddress;

use crate::agent::{generate_pwd, generate_ufrag, IceAgent, IceAgentConfig, IceEvent};
use crate::candidate::{Candidate, CandidateKind, GatherTransport};
use crate::codec::CodecDescriptor;
use crate::constants::{RTP_CHECK_INTERVAL, RTP_FIRST_CHECK_DELAY, RTP_TIMEOUT, STUN_RTO};
use crate::datachannel::{self, DataChannelDriver, DataChannelEvent};
use crate::demux::{self, PacketKind};
use crate::error::{Error, Result};
use crate::keying::certificate::Certificate;
use crate::keying::{DtlsTransport, KeyingEvent};
use crate::negotiation::{CryptoKind, CryptoSet, Session, SessionConfig, Setup};
use crate::relay::{should_permit, Route, TurnConn, TurnConnConfig, TurnEvent};
use crate::stats::MediaflowStats;
use crate::transform::{Protected, SrtpTransform};

use shared::{TaggedBytesMut, TransportContext, TransportProtocol};

const RTP_HEADER_SIZE: usize = 12;

/// Overall life of the flow.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FlowState {
    Init,
    LocalOffer,
    RemoteOffer,
    Negotiated,
    Checking,
    IceUp,
    Ready,
    Terminated,
}

/// Control-plane events for the host, drained with `poll_event`.
#[derive(Debug)]
pub enum MediaflowEvent {
    /// Newly gathered local candidates as `a=candidate` lines; the final
    /// emission carries `a=end-of-candidates` as a synthetic second entry.
    LocalCandidates { candidates: Vec<String> },
    /// All gathering sources have reported.
    GatheringComplete,
    /// ICE and crypto are up; fired exactly once.
    Established {
        crypto: &'static str,
        codec: String,
        remote_kind: CandidateKind,
        remote_addr: SocketAddr,
    },
    /// Edge-triggered on first tx, first rx and first video rx.
    RtpState {
        audio_started: bool,
        video_started: bool,
    },
    /// The data channel came up.
    DataChannelEstablished,
    /// Terminal; at most one per session.
    Closed(Error),
}

/// Data-plane messages for the host, drained with `poll_read`.
#[derive(Debug)]
pub enum MediaflowMessage {
    /// A decrypted inbound RTP packet for the decoder.
    Rtp(BytesMut),
    /// A decrypted inbound RTCP packet.
    Rtcp(BytesMut),
    /// One data-channel message.
    Data(BytesMut),
}

struct StunGather {
    client: stun::client::Client,
    server: SocketAddr,
    done: bool,
}

pub struct MediaflowConfig {
    /// Default local address, used in the SDP origin and as the base for
    /// server-reflexive gathering.
    pub laddr_sdp: SocketAddr,
    pub cryptos: CryptoSet,
    pub audio_codecs: Vec<CodecDescriptor>,
    pub tag: String,
    pub privacy_mode: bool,
    /// DTLS identity; generated when not supplied.
    pub certificate: Option<Certificate>,
}

/// A single-peer, single-session media flow: one UDP 5-tuple carrying ICE,
/// DTLS, SRTP and data-channel traffic, driven sans-io by the host.
pub struct Mediaflow {
    tag: String,
    state: FlowState,
    laddr_default: SocketAddr,
    privacy_mode: bool,

    session: Session,
    agent: IceAgent,
    dtls: DtlsTransport,
    srtp: SrtpTransform,
    dce: DataChannelDriver,
    turn_conns: Vec<TurnConn>,
    stun_gather: Option<StunGather>,

    ice_ready: bool,
    crypto_ready: bool,
    started: bool,
    hold: bool,
    sent_rtp: bool,
    got_rtp: bool,
    video_rtp: bool,

    established_emitted: bool,
    close_emitted: bool,
    terminated: bool,
    local_eoc: bool,
    gather_pending: usize,

    dtls_conn_key: Option<SocketAddr>,

    tmr_rtp: Option<Instant>,
    deferred_error: Option<(Error, Instant)>,
    ts_nat_start: Option<Instant>,

    stats: MediaflowStats,
    interfaces: Vec<(String, SocketAddr)>,

    transmits: VecDeque<TaggedBytesMut>,
    events: VecDeque<MediaflowEvent>,
    reads: VecDeque<MediaflowMessage>,
}

impl Mediaflow {
    pub fn new(config: MediaflowConfig) -> Result<Self> {
        let certificate = match config.certificate {
            Some(certificate) => certificate,
            None => Certificate::generate()?,
        };

        let ice_ufrag = generate_ufrag();
        let ice_pwd = generate_pwd();

        let fingerprint = if config.cryptos.dtls_srtp {
            Some(certificate.fingerprint())
        } else {
            None
        };

        let session = Session::new(SessionConfig {
            laddr: config.laddr_sdp,
            cryptos: config.cryptos,
            audio_codecs: config.audio_codecs,
            ice_ufrag: ice_ufrag.clone(),
            ice_pwd: ice_pwd.clone(),
            fingerprint,
        });

        let agent = IceAgent::new(IceAgentConfig {
            local_ufrag: ice_ufrag,
            local_pwd: ice_pwd,
            privacy_mode: config.privacy_mode,
        });

        info!(
            "mediaflow: created new mediaflow with tag '{}' and cryptos [{}]",
            config.tag, config.cryptos
        );

        Ok(Self {
            tag: config.tag,
            state: FlowState::Init,
            laddr_default: config.laddr_sdp,
            privacy_mode: config.privacy_mode,
            session,
            agent,
            dtls: DtlsTransport::new(certificate),
            srtp: SrtpTransform::default(),
            dce: DataChannelDriver::new(),
            turn_conns: vec![],
            stun_gather: None,
            ice_ready: false,
            crypto_ready: false,
            started: false,
            hold: false,
            sent_rtp: false,
            got_rtp: false,
            video_rtp: false,
            established_emitted: false,
            close_emitted: false,
            terminated: false,
            local_eoc: false,
            gather_pending: 0,
            dtls_conn_key: None,
            tmr_rtp: None,
            deferred_error: None,
            ts_nat_start: None,
            stats: MediaflowStats::default(),
            interfaces: vec![],
            transmits: VecDeque::new(),
            events: VecDeque::new(),
            reads: VecDeque::new(),
        })
    }

    pub fn set_tag(&mut self, tag: &str) {
        self.tag = tag.to_owned();
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn stats(&self) -> &MediaflowStats {
        &self.stats
    }

    pub fn crypto(&self) -> CryptoKind {
        self.session.crypto()
    }

    pub fn local_setup(&self) -> Setup {
        self.session.setup_local()
    }

    pub fn set_setup(&mut self, setup: Setup) -> Result<()> {
        self.session.set_setup(setup)
    }

    pub fn set_fallback_crypto(&mut self, fallback: CryptoKind) {
        self.session.set_fallback_crypto(fallback);
    }

    pub fn add_video(&mut self, codecs: Vec<CodecDescriptor>) {
        self.session.add_video(codecs);
    }

    pub fn add_data(&mut self) {
        self.session.add_data();
    }

    pub fn is_ice_ready(&self) -> bool {
        self.ice_ready
    }

    pub fn is_crypto_ready(&self) -> bool {
        self.crypto_ready
    }

    /// Media may be sent once ICE selected a pair and the negotiated crypto
    /// (if any) finished keying.
    pub fn is_ready(&self) -> bool {
        if !self.ice_ready {
            return false;
        }
        if self.session.cryptos_local().is_empty() {
            return true;
        }
        if self.session.crypto() == CryptoKind::None {
            return false;
        }
        self.crypto_ready
    }

    pub fn is_rtp_started(&self) -> bool {
        self.sent_rtp && self.got_rtp
    }

    pub fn peer_software(&self) -> Option<&str> {
        self.agent.peer_software()
    }

    pub fn remote_cand_count(&self) -> usize {
        self.agent.remote_candidates().len()
    }

    pub fn have_local_eoc(&self) -> bool {
        self.local_eoc
    }

    pub fn have_remote_eoc(&self) -> bool {
        self.agent.remote_eoc()
    }

    pub fn start_media(&mut self) {
        self.started = true;
    }

    pub fn stop_media(&mut self) {
        self.started = false;
        self.tmr_rtp = None;
        self.sent_rtp = false;
        self.got_rtp = false;
        self.video_rtp = false;
    }

    pub fn hold_media(&mut self, hold: bool) {
        self.hold = hold;
    }

    pub fn is_hold(&self) -> bool {
        self.hold
    }

    // --- SDP -------------------------------------------------------------

    pub fn generate_offer(&mut self) -> Result<String> {
        self.check_alive()?;
        let sdp = self.session.generate_offer()?;
        self.agent.set_role(true);
        self.state = FlowState::LocalOffer;
        Ok(sdp)
    }

    pub fn generate_answer(&mut self) -> Result<String> {
        self.check_alive()?;
        let sdp = self.session.generate_answer()?;
        self.state = FlowState::Negotiated;
        Ok(sdp)
    }

    pub fn handle_offer(&mut self, now: Instant, sdp: &str) -> Result<()> {
        self.check_alive()?;
        self.stats.counters.n_sdp_recv += 1;
        self.session.handle_offer(sdp)?;
        self.agent.set_role(false);
        self.apply_remote_description(now)?;
        self.state = FlowState::RemoteOffer;
        Ok(())
    }

    pub fn handle_answer(&mut self, now: Instant, sdp: &str) -> Result<()> {
        self.check_alive()?;
        self.stats.counters.n_sdp_recv += 1;
        self.session.handle_answer(sdp)?;
        self.apply_remote_description(now)?;
        self.state = FlowState::Negotiated;
        Ok(())
    }

    /// Handles an offer and immediately produces the answer.
    pub fn offer_answer(&mut self, now: Instant, offer: &str) -> Result<String> {
        self.handle_offer(now, offer)?;
        self.generate_answer()
    }

    pub fn sdpstate_reset(&mut self) {
        self.session.reset();
        if self.state != FlowState::Terminated {
            self.state = FlowState::Init;
        }
    }

    fn apply_remote_description(&mut self, now: Instant) -> Result<()> {
        let remote = self.session.remote().clone();

        if let Some(tool) = &remote.tool {
            debug!("mediaflow: remote tool '{tool}'");
        }

        if !remote.ufrag.is_empty() && !remote.pwd.is_empty() {
            self.agent
                .set_remote_credentials(remote.ufrag.clone(), remote.pwd.clone())?;
        }

        if remote.ice_lite {
            info!("mediaflow: remote side is ice-lite -- force controlling");
            self.agent.set_role(true);
        }

        for cand in &remote.candidates {
            let _ = self.agent.add_remote_candidate(cand.clone(), now);
        }
        if remote.end_of_candidates {
            self.agent.set_remote_eoc();
        }

        match self.session.crypto() {
            CryptoKind::Sdes => {
                let tx_key = self
                    .session
                    .sdes_tx_key()
                    .map(<[u8]>::to_vec)
                    .ok_or(Error::ErrNoCommonCrypto)?;
                let rx_key = remote.sdes_key.clone().ok_or_else(|| {
                    warn!("mediaflow: crypto parameter not found");
                    Error::ErrProtocolViolation
                })?;
                self.srtp.install_sdes_tx(&tx_key)?;
                self.srtp.install_sdes_rx(&rx_key)?;
            }
            CryptoKind::DtlsSrtp | CryptoKind::None => {}
        }

        self.sync(now);
        Ok(())
    }

    // --- gathering -------------------------------------------------------

    /// Adds one local host candidate, typically per interface.
    pub fn add_local_host_candidate(
        &mut self,
        now: Instant,
        ifname: &str,
        addr: SocketAddr,
    ) -> Result<()> {
        self.check_alive()?;
        if addr.port() == 0 {
            return Err(Error::ErrInvalidArgument);
        }

        self.interfaces.push((ifname.to_owned(), addr));

        if self.privacy_mode {
            debug!("mediaflow: NOT adding host cand (privacy mode)");
            return Ok(());
        }

        let cand = Candidate::host(addr);
        if self.agent.add_local_candidate(cand.clone(), now)? {
            self.submit_local_candidate(&cand, false);
        }
        self.sync(now);
        Ok(())
    }

    /// Starts a plain STUN binding toward `server` to learn a
    /// server-reflexive candidate.
    pub fn gather_stun(&mut self, now: Instant, server: SocketAddr) -> Result<()> {
        self.check_alive()?;
        if self.stun_gather.is_some() {
            return Err(Error::ErrDuplicate);
        }

        let mut client = stun::client::ClientBuilder::new()
            .with_rto(STUN_RTO)
            .build(server)
            .map_err(Error::Shared)?;

        let mut msg = Message::new();
        msg.build(&[Box::<TransactionId>::default(), Box::new(BINDING_REQUEST)])
            .map_err(Error::Shared)?;
        client.handle_write(msg).map_err(Error::Shared)?;

        self.stun_gather = Some(StunGather {
            client,
            server,
            done: false,
        });
        self.gather_pending += 1;
        self.sync(now);
        Ok(())
    }

    /// Starts a TURN allocation over UDP, gathering RELAY and SRFLX
    /// candidates.
    pub fn gather_turn(
        &mut self,
        now: Instant,
        server: SocketAddr,
        username: &str,
        password: &str,
    ) -> Result<()> {
        self.gather_turn_with_transport(now, server, username, password, crate::relay::RelayTransport::Udp)
    }

    /// Adds a TURN server reached over TCP or TLS.
    pub fn gather_turn_tcp(
        &mut self,
        now: Instant,
        server: SocketAddr,
        username: &str,
        password: &str,
        secure: bool,
    ) -> Result<()> {
        let transport = if secure {
            crate::relay::RelayTransport::Tls
        } else {
            crate::relay::RelayTransport::Tcp
        };
        self.gather_turn_with_transport(now, server, username, password, transport)
    }

    fn gather_turn_with_transport(
        &mut self,
        now: Instant,
        server: SocketAddr,
        username: &str,
        password: &str,
        transport: crate::relay::RelayTransport,
    ) -> Result<()> {
        self.check_alive()?;
        info!("mediaflow: gather_turn: username='{username}' srv={server}");

        let mut conn = TurnConn::new(TurnConnConfig {
            server,
            transport,
            username: username.to_owned(),
            password: password.to_owned(),
            software: crate::constants::SDP_TOOL.to_owned(),
            local_addr: self.laddr_default,
        });
        conn.allocate(now)?;
        self.turn_conns.push(conn);
        self.gather_pending += 1;
        self.sync(now);
        Ok(())
    }

    fn submit_local_candidate(&mut self, cand: &Candidate, end_of_candidates: bool) {
        self.session.add_local_candidate_attr(cand);

        let mut candidates = vec![format!("a=candidate:{}", cand.marshal())];
        if end_of_candidates {
            self.local_eoc = true;
            self.session.set_end_of_candidates();
            candidates.push("a=end-of-candidates".to_owned());
        }
        self.events
            .push_back(MediaflowEvent::LocalCandidates { candidates });
    }

    fn gather_source_done(&mut self) {
        self.gather_pending = self.gather_pending.saturating_sub(1);
        if self.gather_pending == 0 {
            self.events.push_back(MediaflowEvent::GatheringComplete);
        }
    }

    // --- trickle / ICE ---------------------------------------------------

    /// Injects one remote candidate line (or the end-of-candidates marker).
    pub fn add_remote_candidate(&mut self, now: Instant, sdp: &str) -> Result<()> {
        self.check_alive()?;

        let line = sdp.trim();
        if line.eq_ignore_ascii_case("a=end-of-candidates") {
            self.agent.set_remote_eoc();
            self.sync(now);
            return Ok(());
        }

        // candidates that cannot be decoded are ignored
        let Ok(cand) = Candidate::unmarshal(line) else {
            return Ok(());
        };
        if cand.component != 1 {
            return Ok(());
        }

        self.stats.counters.n_cand_recv += 1;

        if self.agent.add_remote_candidate(cand.clone(), now)? {
            for conn in &mut self.turn_conns {
                if conn.is_allocated() && should_permit(&cand) {
                    let _ = conn.create_permission(now, cand.addr);
                }
            }
        }

        self.sync(now);
        Ok(())
    }

    /// Starts connectivity checks. Requires the offer/answer exchange to be
    /// complete in both directions.
    pub fn start_ice(&mut self, now: Instant) -> Result<()> {
        self.check_alive()?;
        if !(self.session.sent_sdp() && self.session.got_sdp()) {
            return Err(Error::ErrInvalidSdpState);
        }

        self.ts_nat_start = Some(now);

        // permissions for every TURN allocation toward every known remote
        let remotes: Vec<Candidate> = self.agent.remote_candidates().to_vec();
        for conn in &mut self.turn_conns {
            if !conn.is_allocated() {
                continue;
            }
            for cand in &remotes {
                if should_permit(cand) {
                    let _ = conn.create_permission(now, cand.addr);
                }
            }
        }

        info!(
            "mediaflow: start_ice: starting ICE checklist with {} remote candidates",
            remotes.len()
        );
        self.agent.start_checklist(now)?;
        self.state = FlowState::Checking;
        self.sync(now);
        Ok(())
    }

    // --- sending ---------------------------------------------------------

    /// Sends one already-encoded RTP packet from the encoder.
    pub fn send_raw_rtp(&mut self, now: Instant, buf: &[u8]) -> Result<()> {
        if buf.is_empty() {
            return Err(Error::ErrInvalidArgument);
        }
        if !self.is_ready() {
            warn!(
                "mediaflow: send_raw_rtp({} bytes): not ready [ice={}, crypto={}]",
                buf.len(),
                self.ice_ready,
                self.crypto_ready
            );
            return Err(Error::ErrNotReady);
        }

        if buf.len() >= RTP_HEADER_SIZE {
            self.stats
                .tx
                .update(now, buf.len() - RTP_HEADER_SIZE);
        }
        self.rtp_start_send();

        self.protect_and_send(now, buf)
    }

    /// Sends one RTCP packet from the encoder.
    pub fn send_raw_rtcp(&mut self, now: Instant, buf: &[u8]) -> Result<()> {
        if buf.is_empty() {
            return Err(Error::ErrInvalidArgument);
        }
        if !self.is_ready() {
            warn!(
                "mediaflow: send_raw_rtcp({} bytes): not ready [ice={}, crypto={}]",
                buf.len(),
                self.ice_ready,
                self.crypto_ready
            );
            return Err(Error::ErrNotReady);
        }

        self.protect_and_send(now, buf)
    }

    /// Builds and sends an RTP packet from header and payload.
    pub fn send_rtp(&mut self, now: Instant, packet: &rtp::packet::Packet) -> Result<()> {
        use shared::marshal::Marshal;
        let raw = packet.marshal().map_err(Error::Shared)?;
        self.send_raw_rtp(now, &raw)
    }

    /// Sends one data-channel message.
    pub fn send_data(&mut self, now: Instant, buf: &[u8]) -> Result<()> {
        if !self.is_ready() {
            warn!(
                "mediaflow: send_data({} bytes): not ready [ice={}, crypto={}]",
                buf.len(),
                self.ice_ready,
                self.crypto_ready
            );
            return Err(Error::ErrNotReady);
        }
        self.dce.send(now, buf)?;
        self.sync(now);
        Ok(())
    }

    /// Marks the first outbound RTP packet; edge-triggers the rtp-state
    /// report.
    pub fn rtp_start_send(&mut self) {
        if !self.sent_rtp {
            info!("mediaflow: first RTP packet sent");
            self.sent_rtp = true;
            self.check_rtpstart();
        }
    }

    fn check_rtpstart(&mut self) {
        self.events.push_back(MediaflowEvent::RtpState {
            audio_started: self.is_rtp_started(),
            video_started: self.video_rtp,
        });
    }

    fn protect_and_send(&mut self, now: Instant, buf: &[u8]) -> Result<()> {
        match self.srtp.protect(buf) {
            Ok(Protected::Packet(encrypted)) => {
                self.send_on_selected(now, BytesMut::from(&encrypted[..]))
            }
            Ok(Protected::Bypass) => self.send_on_selected(now, BytesMut::from(buf)),
            Ok(Protected::Drop) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Sends one datagram on the selected pair's socket, preferring an IPv6
    /// host socket when the remote is IPv6, and routing through TURN when
    /// the selected local candidate is relayed.
    fn send_on_selected(&mut self, now: Instant, data: BytesMut) -> Result<()> {
        let Some((local, remote)) = self.agent.selected_pair() else {
            warn!(
                "mediaflow: send_packet: drop {} bytes (ICE not ready)",
                data.len()
            );
            return Err(Error::ErrNotConnected);
        };
        let (local, remote) = (local.clone(), remote.clone());
        self.send_via(now, &local, remote.addr, data)
    }

    fn send_via(
        &mut self,
        now: Instant,
        local: &Candidate,
        raddr: SocketAddr,
        data: BytesMut,
    ) -> Result<()> {
        if local.kind == CandidateKind::Relay {
            let Some(conn) = self
                .turn_conns
                .iter_mut()
                .find(|c| c.relayed_addr() == Some(local.base))
            else {
                return Err(Error::ErrNotConnected);
            };
            conn.send_to(now, &data, raddr)?;
            Self::drain_turn_transmits(conn, &mut self.transmits);
            return Ok(());
        }

        let mut local_addr = local.base;
        if raddr.is_ipv6() {
            if let Some(v6) = self
                .agent
                .local_candidates()
                .iter()
                .find(|c| c.kind == CandidateKind::Host && c.base.is_ipv6())
            {
                local_addr = v6.base;
            }
        }

        self.transmits.push_back(TaggedBytesMut {
            now,
            transport: TransportContext {
                local_addr,
                peer_addr: raddr,
                ecn: None,
                transport_protocol: TransportProtocol::UDP,
            },
            message: data,
        });
        Ok(())
    }

    // --- inbound ---------------------------------------------------------

    /// Demultiplexes one inbound datagram.
    pub fn handle_read(&mut self, msg: TaggedBytesMut) -> Result<()> {
        if self.terminated {
            return Ok(());
        }
        let now = msg.now;
        let src = msg.transport.peer_addr;
        let local_addr = msg.transport.local_addr;

        // traffic from a TURN server belongs to its connection
        if let Some(index) = self.turn_conns.iter().position(|c| c.server() == src) {
            let result = self.turn_conns[index].handle_read(now, &msg.message);
            if let Err(err) = result {
                debug!("mediaflow: turn read error: {err}");
            }
            self.sync(now);
            return Ok(());
        }

        // a pending STUN gather owns its server's traffic
        if let Some(gather) = self.stun_gather.as_mut() {
            if gather.server == src && !gather.done {
                let _ = gather.client.handle_read(&msg.message);
                self.pump_stun_gather(now);
                self.sync(now);
                return Ok(());
            }
        }

        self.demux(now, local_addr, src, msg.message);
        self.sync(now);
        Ok(())
    }

    fn demux(&mut self, now: Instant, local_addr: SocketAddr, src: SocketAddr, data: BytesMut) {
        let kind = demux::classify(&data);

        // unknown sources are logged but still processed; connectivity
        // checks may add them as peer-reflexive candidates
        if !self.agent.remote_candidates().is_empty()
            && self.agent.find_remote_candidate(src).is_none()
        {
            debug!(
                "mediaflow: demux: unauthorized {kind} packet from {src} (rcand-list={})",
                self.agent.remote_candidates().len()
            );
        }

        match kind {
            PacketKind::Stun => {
                if let Err(err) = self.agent.handle_read(now, local_addr, src, &data) {
                    debug!("mediaflow: stun: {err}");
                }
            }
            PacketKind::Dtls => self.handle_dtls_packet(now, src, local_addr, data),
            PacketKind::Rtp | PacketKind::Rtcp => self.handle_media_packet(now, kind, data),
            PacketKind::Unknown => {
                warn!(
                    "mediaflow: udp: dropping {} bytes from {src}",
                    data.len()
                );
            }
        }
    }

    /// Inbound data arriving through a TURN allocation.
    fn handle_relayed(&mut self, now: Instant, relayed_addr: SocketAddr, src: SocketAddr, data: BytesMut) {
        if demux::classify(&data) == PacketKind::Stun
            && self
                .agent
                .local_candidates()
                .iter()
                .any(|c| c.kind == CandidateKind::Relay && c.base == relayed_addr)
        {
            if let Err(err) = self.agent.handle_read(now, relayed_addr, src, &data) {
                debug!("mediaflow: stun via turn: {err}");
            }
        } else {
            self.demux(now, relayed_addr, src, data);
        }
    }

    fn handle_dtls_packet(&mut self, now: Instant, src: SocketAddr, local_addr: SocketAddr, data: BytesMut) {
        self.stats.counters.dtls_pkt_recv += 1;

        if !self.session.got_sdp() {
            info!("mediaflow: SDP is not ready -- drop DTLS packet from {src}");
            return;
        }
        if !self.ice_ready {
            warn!("mediaflow: ICE is not ready -- drop DTLS packet from {src}");
            return;
        }
        if self.session.setup_local() == Setup::ActPass {
            info!("mediaflow: dtls: local setup not decided yet, drop packet");
            return;
        }

        // re-assert the peer on route or source changes
        let route = self.route_for_local(local_addr);
        if let Some(peer) = self.dtls.peer() {
            if peer.addr != src || peer.route != route {
                info!(
                    "mediaflow: dtls: source mismatch ({}|{} != {}|{src})",
                    peer.route.name(),
                    peer.addr,
                    route.name()
                );
                self.dtls.set_peer(route, src);
            }
        } else {
            self.dtls.set_peer(route, src);
        }

        if self.session.setup_local() == Setup::Passive {
            if let Err(err) = self.dtls.accept(now) {
                warn!("mediaflow: dtls_accept failed ({err})");
                self.crypto_error(now, err);
                return;
            }
        }

        let conn_key = *self.dtls_conn_key.get_or_insert(src);
        match self.dtls.handle_read(now, conn_key, data) {
            Ok(events) => {
                for event in events {
                    match event {
                        KeyingEvent::HandshakeComplete => self.on_dtls_established(now, conn_key),
                        KeyingEvent::ApplicationData(data) => {
                            if let Err(err) = self.dce.handle_carrier_read(now, data) {
                                debug!("mediaflow: dce recv error: {err}");
                            }
                        }
                    }
                }
            }
            Err(err) => {
                debug!("mediaflow: dtls read error: {err}");
                if !self.crypto_ready {
                    self.crypto_error(now, err);
                } else {
                    // media keeps flowing on the installed SRTP contexts
                    self.dtls.close(now);
                }
            }
        }
    }

    fn on_dtls_established(&mut self, now: Instant, conn_key: SocketAddr) {
        if let Some(start) = self.dtls.handshake_started_at() {
            if self.stats.milestones.dtls_estab.is_none() {
                self.stats.milestones.dtls_estab = Some(now.saturating_duration_since(start));
            }
        }
        info!("mediaflow: DTLS established");

        if self.session.got_sdp() && !self.dtls.is_verified() {
            let remote = self.session.remote().clone();
            let Some((algorithm, expected)) = remote.fingerprint else {
                warn!("mediaflow: dtls_srtp: no remote fingerprint to verify");
                self.crypto_error(now, Error::ErrAuthFailure);
                return;
            };
            if let Err(err) =
                self.dtls
                    .verify_remote_fingerprint(conn_key, &algorithm, &expected)
            {
                warn!("mediaflow: dtls_srtp: could not verify remote fingerprint");
                self.crypto_error(now, err);
                return;
            }
        }

        let active = self.session.setup_local() == Setup::Active;
        let result = match self.dtls.connection_state(conn_key) {
            Some(state) => self.srtp.install_from_dtls(state, active),
            None => Err(Error::ErrInternal),
        };
        if let Err(err) = result {
            warn!("mediaflow: could not get SRTP keyinfo ({err})");
            self.crypto_error(now, err);
            return;
        }

        self.crypto_ready = true;
        self.maybe_established(now);
        self.check_data_channel(now);
    }

    fn check_data_channel(&mut self, now: Instant) {
        if !self.session.has_data() || !self.session.remote().has_data {
            return;
        }
        let active = self.session.setup_local() == Setup::Active;
        let remote = self
            .dtls
            .peer()
            .map(|p| p.addr)
            .or_else(|| self.agent.selected_pair().map(|(_, r)| r.addr));
        if let Some(remote) = remote {
            if let Err(err) = self.dce.connect(now, active, remote) {
                warn!("mediaflow: dce_connect failed ({err})");
            }
        }
    }

    fn handle_media_packet(&mut self, now: Instant, kind: PacketKind, data: BytesMut) {
        if kind == PacketKind::Rtcp && data.len() < demux::RTCP_MIN_LENGTH {
            // short RTCP is dropped silently
            return;
        }

        let payload = if self.session.cryptos_local().is_empty() {
            data
        } else {
            if !self.srtp.has_rx() {
                self.stats.counters.n_srtp_dropped += 1;
                return;
            }
            match self.srtp.unprotect(kind, &data) {
                Ok(payload) => BytesMut::from(&payload[..]),
                Err(Error::ErrDuplicate) => {
                    self.stats.counters.n_srtp_error += 1;
                    return;
                }
                Err(err) => {
                    self.stats.counters.n_srtp_error += 1;
                    warn!(
                        "mediaflow: srtp_decrypt failed [{} bytes] ({err})",
                        data.len()
                    );
                    return;
                }
            }
        };

        if kind == PacketKind::Rtcp {
            // the data channel consumes APP packets named "DATA"
            if let Some(sctp_payload) = datachannel::decode_app(&payload) {
                if let Err(err) = self.dce.handle_carrier_read(now, sctp_payload) {
                    debug!("mediaflow: dce recv error: {err}");
                }
                return;
            }
            if self.started {
                self.reads.push_back(MediaflowMessage::Rtcp(payload));
            }
            return;
        }

        self.stats.rx.update(now, payload.len());

        if !self.started {
            return;
        }

        if !self.got_rtp {
            info!(
                "mediaflow: first RTP packet received ({} bytes)",
                payload.len()
            );
            self.got_rtp = true;
            self.check_rtpstart();
        }

        if !self.video_rtp && payload.len() > 1 && self.session.has_video() {
            // edge-trigger once video payload types show up
            let pt = payload[1] & 0x7f;
            if self.session.remote().has_video && pt >= 96 {
                self.video_rtp = true;
                self.check_rtpstart();
            }
        }

        self.reads.push_back(MediaflowMessage::Rtp(payload));
    }

    fn route_for_local(&self, local_addr: SocketAddr) -> Route {
        for conn in &self.turn_conns {
            if conn.relayed_addr() == Some(local_addr) {
                return conn.route();
            }
        }
        Route::Direct
    }

    /// Bytes an outer transport will prepend in front of outbound packets on
    /// the current route.
    pub fn headroom(&self) -> usize {
        self.agent
            .selected_pair()
            .map(|(local, _)| {
                if local.kind == CandidateKind::Relay {
                    self.route_for_local(local.base).headroom()
                } else {
                    0
                }
            })
            .unwrap_or(0)
    }

    // --- driving surface -------------------------------------------------

    pub fn poll_transmit(&mut self) -> Option<TaggedBytesMut> {
        self.transmits.pop_front()
    }

    pub fn poll_event(&mut self) -> Option<MediaflowEvent> {
        self.events.pop_front()
    }

    pub fn poll_read(&mut self) -> Option<MediaflowMessage> {
        self.reads.pop_front()
    }

    pub fn poll_timeout(&mut self, now: Instant) -> Option<Instant> {
        if self.terminated {
            return None;
        }

        let mut timeouts = vec![
            self.deferred_error.as_ref().map(|(_, at)| *at),
            self.agent.poll_timeout(),
            self.dtls.poll_timeout(now),
            self.dce.poll_timeout(),
            self.tmr_rtp,
        ];
        for conn in &self.turn_conns {
            timeouts.push(conn.poll_timeout());
        }
        if let Some(gather) = self.stun_gather.as_mut() {
            if !gather.done {
                timeouts.push(gather.client.poll_timeout());
            }
        }

        timeouts.into_iter().flatten().min()
    }

    pub fn handle_timeout(&mut self, now: Instant) {
        if self.terminated {
            return;
        }

        // a deferred ICE failure fires outside the I/O frame that found it
        if let Some((err, at)) = self.deferred_error.take() {
            if at <= now {
                self.ice_error(err);
                return;
            }
            self.deferred_error = Some((err, at));
        }

        self.agent.handle_timeout(now);
        for conn in &mut self.turn_conns {
            conn.handle_timeout(now);
        }
        if let Some(gather) = self.stun_gather.as_mut() {
            if !gather.done {
                let _ = gather.client.handle_timeout(now);
            }
        }
        self.pump_stun_gather(now);
        self.dtls.handle_timeout(now);
        self.dce.handle_timeout(now);

        if let Some(at) = self.tmr_rtp {
            if at <= now {
                self.tmr_rtp = Some(now + RTP_CHECK_INTERVAL);
                self.check_rtp_liveness(now);
            }
        }

        self.sync(now);
    }

    fn check_rtp_liveness(&mut self, now: Instant) {
        if !self.is_rtp_started() {
            return;
        }
        let last = self.stats.rx.last.unwrap_or(now);
        let diff = now.saturating_duration_since(last);
        if diff > RTP_TIMEOUT {
            warn!(
                "mediaflow: no RTP packets recvd for {} ms -- stop",
                diff.as_millis()
            );
            self.terminate(Error::ErrTimeout);
        }
    }

    // --- teardown and errors --------------------------------------------

    /// Tears the flow down without emitting a close event. Resources are
    /// released in dependency order: data channel and TLS first, then ICE,
    /// the TURN allocations and finally the SRTP contexts.
    pub fn close(&mut self, now: Instant) {
        if self.terminated {
            return;
        }
        info!("mediaflow: mediaflow closed, got_sdp={}", self.session.got_sdp());
        self.terminated = true;
        self.tmr_rtp = None;
        self.deferred_error = None;

        self.stop_media();
        self.dce.close();
        self.dtls.close(now);
        self.agent.close();
        for conn in &mut self.turn_conns {
            conn.close(now);
            Self::drain_turn_transmits(conn, &mut self.transmits);
        }
        self.srtp.clear();
        self.state = FlowState::Terminated;
    }

    /// Reports a fatal error from the host's encoder or decoder; it is
    /// surfaced verbatim through the close event.
    pub fn codec_error(&mut self, err: Error) {
        warn!("mediaflow: codec error ({err})");
        self.terminate(err);
    }

    fn terminate(&mut self, err: Error) {
        self.terminated = true;
        self.ice_ready = false;
        self.tmr_rtp = None;
        self.state = FlowState::Terminated;
        self.emit_close(err);
    }

    fn emit_close(&mut self, err: Error) {
        if self.close_emitted {
            return;
        }
        self.close_emitted = true;
        self.events.push_back(MediaflowEvent::Closed(err));
    }

    fn ice_error(&mut self, err: Error) {
        warn!("mediaflow: error in ICE-transport ({err})");
        self.ice_ready = false;
        self.agent.close();
        self.turn_conns.clear();
        self.terminate(err);
    }

    fn crypto_error(&mut self, now: Instant, err: Error) {
        warn!("mediaflow: error in DTLS ({err})");
        self.crypto_ready = false;
        self.dtls.close(now);
        self.terminate(err);
    }

    fn check_alive(&self) -> Result<()> {
        if self.terminated {
            Err(Error::ErrTerminated)
        } else {
            Ok(())
        }
    }

    // --- internal pumping ------------------------------------------------

    fn sync(&mut self, now: Instant) {
        self.pump_agent(now);
        self.pump_turn(now);
        self.pump_dce(now);
        self.pump_dtls(now);
    }

    fn pump_agent(&mut self, now: Instant) {
        while let Some(transmit) = self.agent.poll_transmit() {
            let local = transmit.transport.local_addr;
            if let Some(conn) = self
                .turn_conns
                .iter_mut()
                .find(|c| c.relayed_addr() == Some(local))
            {
                let _ = conn.send_to(now, &transmit.message, transmit.transport.peer_addr);
                Self::drain_turn_transmits(conn, &mut self.transmits);
            } else {
                self.transmits.push_back(transmit);
            }
        }

        while let Some(event) = self.agent.poll_event() {
            match event {
                IceEvent::SelectedPair { local, remote } => {
                    self.on_pair_established(now, local, remote);
                }
                IceEvent::Failed => {
                    warn!("mediaflow: all pairs failed");
                    self.deferred_error = Some((Error::ErrProtocolViolation, now));
                }
            }
        }
    }

    fn on_pair_established(&mut self, now: Instant, local: Candidate, remote: Candidate) {
        info!(
            "mediaflow: ICE-transport established [got_sdp={}] (peer = {remote})",
            self.session.got_sdp()
        );
        self.ice_ready = true;
        if self.state == FlowState::Checking {
            self.state = FlowState::IceUp;
        }

        if self.stats.milestones.nat_estab.is_none() {
            if let Some(start) = self.ts_nat_start {
                self.stats.milestones.nat_estab = Some(now.saturating_duration_since(start));
            }
        }

        // a relayed pair wants a channel binding toward the nominee
        let route = if local.kind == CandidateKind::Relay {
            let mut route = Route::TurnIndication;
            if let Some(conn) = self
                .turn_conns
                .iter_mut()
                .find(|c| c.relayed_addr() == Some(local.base))
            {
                info!("mediaflow: adding TURN channel to {}", remote.addr);
                let _ = conn.bind_channel(now, remote.addr);
                Self::drain_turn_transmits(conn, &mut self.transmits);
                route = conn.route();
            }
            route
        } else {
            Route::Direct
        };

        self.dtls.set_peer(route, remote.addr);

        if !self.crypto_ready {
            if let Err(err) = self.start_crypto(now) {
                self.crypto_error(now, err);
                return;
            }
        }

        self.maybe_established(now);
    }

    fn start_crypto(&mut self, now: Instant) -> Result<()> {
        match self.session.crypto() {
            CryptoKind::None => Ok(()),
            CryptoKind::DtlsSrtp => {
                if self.session.setup_local() == Setup::Active {
                    if let Some(peer) = self.dtls.peer() {
                        self.dtls_conn_key = Some(peer.addr);
                    }
                    self.dtls.connect(now)?;
                }
                Ok(())
            }
            CryptoKind::Sdes => {
                self.crypto_ready = true;
                self.check_data_channel(now);
                Ok(())
            }
        }
    }

    fn maybe_established(&mut self, now: Instant) {
        if self.terminated || self.established_emitted || !self.is_ready() {
            return;
        }
        self.established_emitted = true;
        self.state = FlowState::Ready;

        info!("mediaflow: ICE+DTLS established");

        if self.tmr_rtp.is_none() {
            self.tmr_rtp = Some(now + RTP_FIRST_CHECK_DELAY);
        }

        let (remote_kind, remote_addr) = self
            .agent
            .selected_pair()
            .map(|(_, r)| (r.kind, r.addr))
            .unwrap_or((
                CandidateKind::Host,
                SocketAddr::from(([0, 0, 0, 0], 0)),
            ));

        let codec = self
            .session
            .remote()
            .codec_name
            .clone()
            .unwrap_or_else(|| "?".to_owned());

        self.events.push_back(MediaflowEvent::Established {
            crypto: self.session.crypto().name(),
            codec,
            remote_kind,
            remote_addr,
        });
    }

    fn pump_turn(&mut self, now: Instant) {
        for index in 0..self.turn_conns.len() {
            while let Some(event) = self.turn_conns[index].poll_event() {
                match event {
                    TurnEvent::Allocated {
                        relayed_addr,
                        mapped_addr,
                    } => {
                        self.on_turn_allocated(now, index, relayed_addr, mapped_addr);
                    }
                    TurnEvent::ChannelBound(peer_addr) => {
                        if let Some(peer) = self.dtls.peer() {
                            if peer.addr == peer_addr {
                                self.dtls.set_peer(Route::TurnChannel, peer_addr);
                            }
                        }
                    }
                    TurnEvent::Data { peer_addr, payload } => {
                        if let Some(relayed_addr) = self.turn_conns[index].relayed_addr() {
                            self.handle_relayed(now, relayed_addr, peer_addr, payload);
                        }
                    }
                    TurnEvent::Error(err) => {
                        self.on_turn_error(now, index, err);
                    }
                }
            }
            Self::drain_turn_transmits(&mut self.turn_conns[index], &mut self.transmits);
        }
    }

    fn on_turn_allocated(
        &mut self,
        now: Instant,
        index: usize,
        relayed_addr: SocketAddr,
        mapped_addr: SocketAddr,
    ) {
        info!("mediaflow: TURN established ({relayed_addr})");

        if self.stats.milestones.turn_alloc.is_none() {
            self.stats.milestones.turn_alloc = self.turn_conns[index].alloc_duration();
        }

        let transport = self.turn_conns[index].transport();

        // permissions so the allocations can reach each other when needed
        let other_servers: Vec<SocketAddr> = self
            .turn_conns
            .iter()
            .enumerate()
            .filter(|(i, c)| *i != index && c.server().is_ipv4())
            .map(|(_, c)| c.server())
            .collect();
        for server in other_servers {
            info!("mediaflow: turn: add permission to relay {server}");
            let _ = self.turn_conns[index].create_permission(now, server);
        }

        // the SRFLX candidate ships before the RELAY one
        if transport == crate::relay::RelayTransport::Udp {
            let srflx = Candidate::server_reflexive(
                mapped_addr,
                self.laddr_default,
                transport.gather_transport(),
            );
            if let Ok(true) = self.agent.add_local_candidate(srflx.clone(), now) {
                self.submit_local_candidate(&srflx, false);
            }
        }

        let relay = Candidate::relay(relayed_addr, mapped_addr, transport.gather_transport());
        if let Ok(true) = self.agent.add_local_candidate(relay.clone(), now) {
            self.submit_local_candidate(&relay, true);
        }

        // server-reflexive permissions toward every known remote
        let remotes: Vec<Candidate> = self.agent.remote_candidates().to_vec();
        for cand in &remotes {
            if should_permit(cand) {
                info!(
                    "mediaflow: adding TURN permission to remote address {}.{}",
                    cand.kind,
                    cand.addr.ip()
                );
                let _ = self.turn_conns[index].create_permission(now, cand.addr);
            }
        }

        self.gather_source_done();
    }

    fn on_turn_error(&mut self, now: Instant, index: usize, err: Error) {
        warn!(
            "mediaflow: turnconn_error: turnconnl={} ({err})",
            self.turn_conns.len()
        );

        let others_alive = self
            .turn_conns
            .iter()
            .enumerate()
            .any(|(i, c)| i != index && (c.is_allocated() || !c.is_failed()));

        self.gather_source_done();

        if others_alive {
            info!("mediaflow: ignoring turn error, already have 1");
            return;
        }

        if !self.ice_ready {
            self.deferred_error = Some((Error::ErrProtocolViolation, now));
        }
    }

    fn pump_stun_gather(&mut self, now: Instant) {
        let Some(gather) = self.stun_gather.as_mut() else {
            return;
        };
        if gather.done {
            return;
        }

        while let Some(transmit) = gather.client.poll_transmit() {
            self.transmits.push_back(TaggedBytesMut {
                now,
                transport: TransportContext {
                    local_addr: self.laddr_default,
                    peer_addr: transmit.remote,
                    ecn: transmit.ecn,
                    transport_protocol: TransportProtocol::UDP,
                },
                message: transmit.payload,
            });
        }

        let mut outcome: Option<Result<SocketAddr>> = None;
        while let Some(event) = gather.client.poll_event() {
            match event.result {
                Ok(msg) => {
                    let mut xor_addr = XorMappedAddress::default();
                    match xor_addr.get_from(&msg) {
                        Ok(()) => {
                            outcome =
                                Some(Ok(SocketAddr::new(xor_addr.ip, xor_addr.port)));
                        }
                        Err(err) => outcome = Some(Err(Error::Shared(err))),
                    }
                }
                Err(err) => outcome = Some(Err(Error::Shared(err))),
            }
        }

        match outcome {
            Some(Ok(mapped)) => {
                info!("mediaflow: STUN allocation OK (mapped={mapped})");
                gather.done = true;
                let srflx =
                    Candidate::server_reflexive(mapped, self.laddr_default, GatherTransport::Udp);
                if let Ok(true) = self.agent.add_local_candidate(srflx.clone(), now) {
                    self.submit_local_candidate(&srflx, true);
                }
                self.gather_source_done();
            }
            Some(Err(err)) => {
                warn!("mediaflow: stun_resp {err}");
                gather.done = true;
                self.gather_source_done();
                if !self.ice_ready {
                    self.deferred_error = Some((Error::ErrProtocolViolation, now));
                }
            }
            None => {}
        }
    }

    fn pump_dce(&mut self, now: Instant) {
        while let Some(event) = self.dce.poll_event() {
            match event {
                DataChannelEvent::Established => {
                    if self.stats.milestones.dce_estab.is_none() {
                        self.stats.milestones.dce_estab = self.dce.establish_duration();
                    }
                    self.events.push_back(MediaflowEvent::DataChannelEstablished);
                }
                DataChannelEvent::Message(data) => {
                    self.reads.push_back(MediaflowMessage::Data(data));
                }
            }
        }

        let mut outbound = vec![];
        while let Some(datagram) = self.dce.poll_transmit() {
            outbound.push(datagram);
        }
        for datagram in outbound {
            match self.session.crypto() {
                CryptoKind::DtlsSrtp => {
                    if let Err(err) = self.dtls.write(now, &datagram) {
                        warn!("mediaflow: dce_send_data: no DTLS connection ({err})");
                    }
                }
                CryptoKind::Sdes => match datachannel::encode_app(&datagram) {
                    Ok(app) => {
                        if let Err(err) = self.protect_and_send(now, &app) {
                            warn!("mediaflow: dce_send_data: rtcp_send_app ({err})");
                        }
                    }
                    Err(err) => warn!("mediaflow: rtcp_encode failed ({err})"),
                },
                CryptoKind::None => {
                    warn!("mediaflow: dce_send_data: invalid crypto");
                }
            }
        }
    }

    fn pump_dtls(&mut self, now: Instant) {
        while let Some(transmit) = self.dtls.poll_transmit() {
            self.stats.counters.dtls_pkt_sent += 1;

            let Some(peer) = self.dtls.peer() else {
                warn!("mediaflow: send_dtls: DTLS peer is not set");
                continue;
            };

            debug!(
                "mediaflow: dtls_helper: send DTLS packet #{} ({} bytes) via {}",
                self.stats.counters.dtls_pkt_sent,
                transmit.message.len(),
                peer.route.name()
            );

            if peer.route.via_turn() {
                if let Some(conn) = self
                    .turn_conns
                    .iter_mut()
                    .find(|c| c.route() == peer.route && c.is_allocated())
                {
                    let _ = conn.send_to(now, &transmit.message, peer.addr);
                    Self::drain_turn_transmits(conn, &mut self.transmits);
                    continue;
                }
            }

            let local_addr = self
                .agent
                .selected_pair()
                .map(|(l, _)| l.base)
                .unwrap_or(self.laddr_default);
            self.transmits.push_back(TaggedBytesMut {
                now,
                transport: TransportContext {
                    local_addr,
                    peer_addr: peer.addr,
                    ecn: None,
                    transport_protocol: TransportProtocol::UDP,
                },
                message: transmit.message,
            });
        }
    }

    fn drain_turn_transmits(conn: &mut TurnConn, out: &mut VecDeque<TaggedBytesMut>) {
        while let Some(transmit) = conn.poll_transmit() {
            out.push_back(transmit);
        }
    }

    // --- reporting -------------------------------------------------------

    /// Human-readable session summary.
    pub fn summary(&self) -> String {
        let mut s = String::new();
        let _ = writeln!(s, "------------- mediaflow summary -------------");
        let _ = writeln!(s, "tag:  {}", self.tag);
        let _ = writeln!(
            s,
            "sdp: state={:?}, got_sdp={}, sent_sdp={}",
            self.session.state(),
            self.session.got_sdp(),
            self.session.sent_sdp()
        );
        let _ = writeln!(s, "nat: Trickle-Dualstack (ready={})", self.ice_ready);
        let _ = writeln!(s, "remote candidates:");
        for cand in self.agent.remote_candidates() {
            let _ = writeln!(s, "  {cand}");
        }
        if let Some((local, remote)) = self.agent.selected_pair() {
            let _ = writeln!(s, "selected local candidate:   {local}");
            let _ = writeln!(s, "selected remote candidate:  {remote}");
        }
        let _ = writeln!(
            s,
            "peer_software:       {}",
            self.agent.peer_software().unwrap_or("")
        );
        let _ = writeln!(
            s,
            "eoc:                 local={}, remote={}",
            self.local_eoc,
            self.agent.remote_eoc()
        );
        let _ = writeln!(
            s,
            "crypto: local  = {}\n        remote = {}\n        common = {}",
            self.session.cryptos_local(),
            self.session.cryptos_remote(),
            self.session.crypto()
        );
        let _ = writeln!(s, "        ready={}", self.crypto_ready);
        if self.session.crypto() == CryptoKind::DtlsSrtp {
            if let Some(peer) = self.dtls.peer() {
                let _ = writeln!(s, "        peer = {}|{}", peer.route.name(), peer.addr);
            }
            let _ = writeln!(
                s,
                "        verified={}\n        setup_local={}\n        setup_remote={}",
                self.dtls.is_verified(),
                self.session.setup_local(),
                self.session.setup_remote()
            );
            let _ = writeln!(
                s,
                "        packets sent={}, recv={}",
                self.stats.counters.dtls_pkt_sent, self.stats.counters.dtls_pkt_recv
            );
        }
        let _ = writeln!(s, "RTP packets:");
        let _ = writeln!(
            s,
            "bytes sent:  {} ({:.1} bit/s) for {:.2} sec",
            self.stats.tx.bytes,
            self.stats.tx.bitrate(),
            self.stats.tx.duration().as_secs_f64()
        );
        let _ = writeln!(
            s,
            "bytes recv:  {} ({:.1} bit/s) for {:.2} sec",
            self.stats.rx.bytes,
            self.stats.rx.bitrate(),
            self.stats.rx.duration().as_secs_f64()
        );
        let _ = writeln!(s, "SDP recvd:       {}", self.stats.counters.n_sdp_recv);
        let _ = writeln!(s, "ICE cand recvd:  {}", self.stats.counters.n_cand_recv);
        let _ = writeln!(s, "SRTP dropped:    {}", self.stats.counters.n_srtp_dropped);
        let _ = writeln!(s, "SRTP errors:     {}", self.stats.counters.n_srtp_error);
        let _ = writeln!(s, "TURN Clients: ({})", self.turn_conns.len());
        for conn in &self.turn_conns {
            let _ = writeln!(
                s,
                "  srv={} allocated={} relayed={:?}",
                conn.server(),
                conn.is_allocated(),
                conn.relayed_addr()
            );
        }
        let _ = writeln!(s, "Interfaces: ({})", self.interfaces.len());
        for (ifname, addr) in &self.interfaces {
            let _ = writeln!(s, "  {ifname}|{addr}");
        }
        let _ = writeln!(s, "-----------------------------------------------");
        s
    }
}
