#[cfg(test)]
mod relay_test;

use bytes::BytesMut;
use log::{debug, info, trace, warn};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use stun::attributes::{ATTR_NONCE, ATTR_REALM, ATTR_SOFTWARE, ATTR_USERNAME};
use stun::error_code::ErrorCodeAttribute;
use stun::fingerprint::FINGERPRINT;
use stun::integrity::MessageIntegrity;
use stun::message::{
    is_stun_message, Getter, Message, MessageType, Setter, TransactionId, CLASS_ERROR_RESPONSE,
    CLASS_INDICATION, CLASS_REQUEST, CLASS_SUCCESS_RESPONSE, METHOD_ALLOCATE, METHOD_CHANNEL_BIND,
    METHOD_CREATE_PERMISSION, METHOD_DATA, METHOD_REFRESH, METHOD_SEND,
};
use stun::textattrs::TextAttribute;
use stun::xoraddr::XorMappedAddress;

use turn::proto::chandata::ChannelData;
use turn::proto::channum::ChannelNumber;
use turn::proto::data::Data;
use turn::proto::lifetime::Lifetime;
use turn::proto::peeraddr::PeerAddress;
use turn::proto::relayaddr::RelayedAddress;
use turn::proto::reqtrans::RequestedTransport;
use turn::proto::{PROTO_TCP, PROTO_UDP};

use crate::candidate::{Candidate, CandidateKind, GatherTransport};
use crate::constants::{
    HEADROOM_TURN_CHANNEL, HEADROOM_TURN_INDICATION, TURN_CHANNEL_MIN, TURN_PERM_REFRESH,
};
use crate::error::{Error, Result};

use shared::error::Error as SharedError;
use shared::tcp_framing::{frame_packet, TcpFrameDecoder};
use shared::{TaggedBytesMut, TransportContext, TransportProtocol};

const DEFAULT_RTO: Duration = Duration::from_millis(200);
const MAX_RETRANSMITS: u16 = 7;

/// How an outbound packet reaches the peer, and the bytes the route
/// prepends in front of it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Route {
    Direct,
    TurnIndication,
    TurnChannel,
}

impl Route {
    pub fn headroom(self) -> usize {
        match self {
            Route::Direct => 0,
            Route::TurnIndication => HEADROOM_TURN_INDICATION,
            Route::TurnChannel => HEADROOM_TURN_CHANNEL,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Route::Direct => "Socket",
            Route::TurnIndication => "TURN-Ind",
            Route::TurnChannel => "TURN-Chan",
        }
    }

    pub fn via_turn(self) -> bool {
        !matches!(self, Route::Direct)
    }
}

/// Transport used to reach the TURN server.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum RelayTransport {
    #[default]
    Udp,
    Tcp,
    Tls,
}

impl RelayTransport {
    pub(crate) fn gather_transport(self) -> GatherTransport {
        match self {
            RelayTransport::Udp => GatherTransport::Udp,
            RelayTransport::Tcp => GatherTransport::Tcp,
            RelayTransport::Tls => GatherTransport::Tls,
        }
    }

    fn is_stream(self) -> bool {
        !matches!(self, RelayTransport::Udp)
    }
}

pub enum TurnEvent {
    /// The allocation succeeded.
    Allocated {
        relayed_addr: SocketAddr,
        mapped_addr: SocketAddr,
    },
    /// A channel to the given peer is bound; the short header applies now.
    ChannelBound(SocketAddr),
    /// Application data relayed from a peer.
    Data {
        peer_addr: SocketAddr,
        payload: BytesMut,
    },
    /// The allocation failed terminally.
    Error(Error),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum PermState {
    Requesting,
    Permitted,
}

enum TransactionKind {
    AllocateAttempt,
    AllocateRequest,
    CreatePermission(SocketAddr),
    ChannelBind(SocketAddr),
    Refresh,
}

struct Transaction {
    kind: TransactionKind,
    raw: BytesMut,
    attempt: u16,
    interval: Duration,
    next: Instant,
}

pub struct TurnConnConfig {
    pub server: SocketAddr,
    pub transport: RelayTransport,
    pub username: String,
    pub password: String,
    pub software: String,
    pub local_addr: SocketAddr,
}

/// One TURN allocation with its permissions and channel binding. Several of
/// these may run concurrently toward different servers.
pub struct TurnConn {
    server: SocketAddr,
    transport: RelayTransport,
    local_addr: SocketAddr,

    username: TextAttribute,
    password: String,
    software: TextAttribute,
    realm: Option<TextAttribute>,
    nonce: Option<TextAttribute>,
    integrity: Option<MessageIntegrity>,

    allocated: bool,
    failed: bool,
    relayed_addr: Option<SocketAddr>,
    mapped_addr: Option<SocketAddr>,
    lifetime: Duration,

    permissions: HashMap<SocketAddr, PermState>,
    channel: Option<(ChannelNumber, SocketAddr)>,
    channel_ready: bool,
    next_channel_number: u16,

    transactions: HashMap<TransactionId, Transaction>,
    ts_alloc_req: Option<Instant>,
    ts_alloc_resp: Option<Instant>,
    refresh_alloc_at: Option<Instant>,
    refresh_perms_at: Option<Instant>,

    frame_decoder: TcpFrameDecoder,

    transmits: VecDeque<TaggedBytesMut>,
    events: VecDeque<TurnEvent>,
}

impl TurnConn {
    pub fn new(config: TurnConnConfig) -> Self {
        Self {
            server: config.server,
            transport: config.transport,
            local_addr: config.local_addr,
            username: TextAttribute::new(ATTR_USERNAME, config.username),
            password: config.password,
            software: TextAttribute::new(ATTR_SOFTWARE, config.software),
            realm: None,
            nonce: None,
            integrity: None,
            allocated: false,
            failed: false,
            relayed_addr: None,
            mapped_addr: None,
            lifetime: Duration::from_secs(0),
            permissions: HashMap::new(),
            channel: None,
            channel_ready: false,
            next_channel_number: TURN_CHANNEL_MIN,
            transactions: HashMap::new(),
            ts_alloc_req: None,
            ts_alloc_resp: None,
            refresh_alloc_at: None,
            refresh_perms_at: None,
            frame_decoder: TcpFrameDecoder::new(),
            transmits: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }

    pub fn transport(&self) -> RelayTransport {
        self.transport
    }

    pub fn is_allocated(&self) -> bool {
        self.allocated
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn relayed_addr(&self) -> Option<SocketAddr> {
        self.relayed_addr
    }

    pub fn mapped_addr(&self) -> Option<SocketAddr> {
        self.mapped_addr
    }

    /// Milliseconds the allocation round trip took.
    pub fn alloc_duration(&self) -> Option<Duration> {
        match (self.ts_alloc_req, self.ts_alloc_resp) {
            (Some(req), Some(resp)) => Some(resp.saturating_duration_since(req)),
            _ => None,
        }
    }

    /// Current route for packets relayed through this allocation.
    pub fn route(&self) -> Route {
        if self.channel_ready {
            Route::TurnChannel
        } else {
            Route::TurnIndication
        }
    }

    fn requested_transport(&self) -> RequestedTransport {
        RequestedTransport {
            protocol: if self.transport == RelayTransport::Udp {
                PROTO_UDP
            } else {
                PROTO_TCP
            },
        }
    }

    /// Starts the allocation: the first, unauthenticated request.
    pub fn allocate(&mut self, now: Instant) -> Result<()> {
        let mut msg = Message::new();
        msg.build(&[
            Box::new(TransactionId::new()),
            Box::new(MessageType::new(METHOD_ALLOCATE, CLASS_REQUEST)),
            Box::new(self.requested_transport()),
            Box::new(FINGERPRINT),
        ])
        .map_err(Error::Shared)?;

        self.ts_alloc_req = Some(now);
        self.perform_transaction(&msg, TransactionKind::AllocateAttempt, now);
        Ok(())
    }

    /// Installs a permission toward a peer address.
    pub fn create_permission(&mut self, now: Instant, peer_addr: SocketAddr) -> Result<()> {
        if !self.allocated {
            return Err(Error::ErrNotConnected);
        }
        if self.permissions.contains_key(&peer_addr) {
            return Ok(());
        }
        self.permissions.insert(peer_addr, PermState::Requesting);
        self.send_create_permission(now, peer_addr)
    }

    fn send_create_permission(&mut self, now: Instant, peer_addr: SocketAddr) -> Result<()> {
        let setters = self.authenticated(vec![
            Box::new(TransactionId::new()),
            Box::new(MessageType::new(METHOD_CREATE_PERMISSION, CLASS_REQUEST)),
            Box::new(PeerAddress {
                ip: peer_addr.ip(),
                port: peer_addr.port(),
            }),
        ])?;

        let mut msg = Message::new();
        msg.build(&setters).map_err(Error::Shared)?;
        self.perform_transaction(&msg, TransactionKind::CreatePermission(peer_addr), now);
        Ok(())
    }

    pub fn has_permission(&self, peer_addr: SocketAddr) -> bool {
        matches!(
            self.permissions.get(&peer_addr),
            Some(PermState::Permitted)
        )
    }

    /// Binds a channel to the selected peer so relayed packets shrink to a
    /// four byte header.
    pub fn bind_channel(&mut self, now: Instant, peer_addr: SocketAddr) -> Result<()> {
        if !self.allocated {
            return Err(Error::ErrNotConnected);
        }
        if self.channel.is_some() {
            return Ok(());
        }

        let number = ChannelNumber(self.next_channel_number);
        self.next_channel_number += 1;

        let setters = self.authenticated(vec![
            Box::new(TransactionId::new()),
            Box::new(MessageType::new(METHOD_CHANNEL_BIND, CLASS_REQUEST)),
            Box::new(number),
            Box::new(PeerAddress {
                ip: peer_addr.ip(),
                port: peer_addr.port(),
            }),
        ])?;

        let mut msg = Message::new();
        msg.build(&setters).map_err(Error::Shared)?;

        self.channel = Some((number, peer_addr));
        self.perform_transaction(&msg, TransactionKind::ChannelBind(peer_addr), now);
        Ok(())
    }

    /// Relays one datagram to a peer, encapsulated either as ChannelData or
    /// as a Send indication.
    pub fn send_to(&mut self, now: Instant, data: &[u8], peer_addr: SocketAddr) -> Result<()> {
        if !self.allocated {
            return Err(Error::ErrNotConnected);
        }

        match self.channel {
            Some((number, addr)) if self.channel_ready && addr == peer_addr => {
                let mut ch_data = ChannelData {
                    data: data.to_vec(),
                    number,
                    ..Default::default()
                };
                ch_data.encode();
                let raw = ch_data.raw.clone();
                self.write_to_server(&raw, now);
                Ok(())
            }
            _ => {
                if !self.has_permission(peer_addr) {
                    return Err(Error::Shared(SharedError::ErrNoPermission));
                }
                // attribute order keeps the payload at the 36 byte offset the
                // route's headroom reserves for IPv4 peers
                let mut msg = Message::new();
                msg.build(&[
                    Box::new(TransactionId::new()),
                    Box::new(MessageType::new(METHOD_SEND, CLASS_INDICATION)),
                    Box::new(PeerAddress {
                        ip: peer_addr.ip(),
                        port: peer_addr.port(),
                    }),
                    Box::new(Data(data.to_vec())),
                ])
                .map_err(Error::Shared)?;

                // indications are fire-and-forget
                self.write_to_server(&msg.raw, now);
                Ok(())
            }
        }
    }

    /// Handles bytes arriving from the TURN server socket.
    pub fn handle_read(&mut self, now: Instant, data: &[u8]) -> Result<()> {
        if self.transport.is_stream() {
            self.frame_decoder.extend_from_slice(data);
            let mut packets = vec![];
            while let Some(packet) = self.frame_decoder.next_packet() {
                packets.push(packet.to_vec());
            }
            for packet in packets {
                self.handle_packet(now, &packet)?;
            }
            Ok(())
        } else {
            self.handle_packet(now, data)
        }
    }

    fn handle_packet(&mut self, now: Instant, data: &[u8]) -> Result<()> {
        if is_stun_message(data) {
            self.handle_stun_message(now, data)
        } else if ChannelData::is_channel_data(data) {
            self.handle_channel_data(data)
        } else {
            trace!("turn: non-STUN/TURN packet from server, unhandled");
            Err(Error::Shared(SharedError::ErrNonStunmessage))
        }
    }

    fn handle_stun_message(&mut self, now: Instant, data: &[u8]) -> Result<()> {
        let mut msg = Message::new();
        msg.raw = data.to_vec();
        msg.decode().map_err(Error::Shared)?;

        if msg.typ.class == CLASS_REQUEST {
            return Err(Error::Shared(SharedError::ErrUnexpectedStunrequestMessage));
        }

        if msg.typ.class == CLASS_INDICATION {
            if msg.typ.method == METHOD_DATA {
                let mut peer_addr = PeerAddress::default();
                peer_addr.get_from(&msg).map_err(Error::Shared)?;
                let from = SocketAddr::new(peer_addr.ip, peer_addr.port);

                let mut data = Data::default();
                data.get_from(&msg).map_err(Error::Shared)?;

                debug!("turn: data indication received from {from}");
                self.events.push_back(TurnEvent::Data {
                    peer_addr: from,
                    payload: BytesMut::from(&data.0[..]),
                });
            }
            return Ok(());
        }

        let Some(tr) = self.transactions.remove(&msg.transaction_id) else {
            debug!("turn: no transaction for {msg}");
            return Ok(());
        };

        match tr.kind {
            TransactionKind::AllocateAttempt => self.handle_allocate_attempt(now, &msg),
            TransactionKind::AllocateRequest => self.handle_allocate_response(now, &msg),
            TransactionKind::CreatePermission(peer_addr) => {
                self.handle_permission_response(&msg, peer_addr)
            }
            TransactionKind::ChannelBind(peer_addr) => {
                self.handle_channel_bind_response(&msg, peer_addr)
            }
            TransactionKind::Refresh => {
                self.update_nonce(&msg);
                Ok(())
            }
        }
    }

    fn handle_allocate_attempt(&mut self, now: Instant, response: &Message) -> Result<()> {
        // the anonymous attempt is expected to fail with 401; authenticate
        let nonce = match TextAttribute::get_from_as(response, ATTR_NONCE) {
            Ok(nonce) => nonce,
            Err(err) => {
                self.fail(Error::Shared(err));
                return Ok(());
            }
        };
        let realm = match TextAttribute::get_from_as(response, ATTR_REALM) {
            Ok(realm) => realm,
            Err(err) => {
                self.fail(Error::Shared(err));
                return Ok(());
            }
        };

        self.integrity = Some(MessageIntegrity::new_long_term_integrity(
            self.username.text.clone(),
            realm.text.clone(),
            self.password.clone(),
        ));
        self.realm = Some(realm);
        self.nonce = Some(nonce);

        let setters = self.authenticated(vec![
            Box::new(TransactionId::new()),
            Box::new(MessageType::new(METHOD_ALLOCATE, CLASS_REQUEST)),
            Box::new(self.requested_transport()),
        ])?;

        let mut msg = Message::new();
        msg.build(&setters).map_err(Error::Shared)?;
        self.perform_transaction(&msg, TransactionKind::AllocateRequest, now);
        Ok(())
    }

    fn handle_allocate_response(&mut self, now: Instant, response: &Message) -> Result<()> {
        if response.typ.class == CLASS_ERROR_RESPONSE {
            let mut code = ErrorCodeAttribute::default();
            let err = if code.get_from(response).is_err() {
                Error::Other(format!("{}", response.typ))
            } else {
                Error::Other(format!("{} (error {})", response.typ, code))
            };
            self.fail(err);
            return Ok(());
        }

        let mut relayed = RelayedAddress::default();
        relayed.get_from(response).map_err(Error::Shared)?;
        let relayed_addr = SocketAddr::new(relayed.ip, relayed.port);

        let mut mapped = XorMappedAddress::default();
        mapped.get_from(response).map_err(Error::Shared)?;
        let mapped_addr = SocketAddr::new(mapped.ip, mapped.port);

        let mut lifetime = Lifetime::default();
        let _ = lifetime.get_from(response);

        info!("turn: allocation established ({relayed_addr})");

        self.allocated = true;
        self.relayed_addr = Some(relayed_addr);
        self.mapped_addr = Some(mapped_addr);
        self.lifetime = lifetime.0;
        self.ts_alloc_resp = Some(now);
        if !self.lifetime.is_zero() {
            self.refresh_alloc_at = Some(now + self.lifetime / 2);
        }
        self.refresh_perms_at = Some(now + TURN_PERM_REFRESH);

        self.events.push_back(TurnEvent::Allocated {
            relayed_addr,
            mapped_addr,
        });
        Ok(())
    }

    fn handle_permission_response(&mut self, response: &Message, peer_addr: SocketAddr) -> Result<()> {
        if response.typ.class == CLASS_SUCCESS_RESPONSE {
            debug!("turn: permission for {peer_addr} granted");
            self.permissions.insert(peer_addr, PermState::Permitted);
        } else {
            self.update_nonce(response);
            warn!("turn: create-permission for {peer_addr} failed");
            self.permissions.remove(&peer_addr);
        }
        Ok(())
    }

    fn handle_channel_bind_response(&mut self, response: &Message, peer_addr: SocketAddr) -> Result<()> {
        if response.typ.class == CLASS_SUCCESS_RESPONSE {
            info!("turn: channel to {peer_addr} bound");
            self.channel_ready = true;
            self.events.push_back(TurnEvent::ChannelBound(peer_addr));
        } else {
            self.update_nonce(response);
            warn!("turn: channel-bind to {peer_addr} failed");
            self.channel = None;
        }
        Ok(())
    }

    /// 438 responses carry a fresh nonce.
    fn update_nonce(&mut self, response: &Message) {
        if let Ok(nonce) = TextAttribute::get_from_as(response, ATTR_NONCE) {
            self.nonce = Some(nonce);
        }
    }

    /// Releases the allocation by refreshing it with a zero lifetime.
    pub fn close(&mut self, now: Instant) {
        if self.allocated {
            if let Ok(setters) = self.authenticated(vec![
                Box::new(TransactionId::new()),
                Box::new(MessageType::new(METHOD_REFRESH, CLASS_REQUEST)),
                Box::new(Lifetime(Duration::from_secs(0))),
            ]) {
                let mut msg = Message::new();
                if msg.build(&setters).is_ok() {
                    self.write_to_server(&msg.raw, now);
                }
            }
        }
        self.allocated = false;
        self.transactions.clear();
    }

    pub fn poll_transmit(&mut self) -> Option<TaggedBytesMut> {
        self.transmits.pop_front()
    }

    pub fn poll_event(&mut self) -> Option<TurnEvent> {
        self.events.pop_front()
    }

    pub fn poll_timeout(&self) -> Option<Instant> {
        let mut eto: Option<Instant> = None;
        let mut consider = |t: Option<Instant>| {
            if let Some(t) = t {
                if eto.map(|e| t < e).unwrap_or(true) {
                    eto = Some(t);
                }
            }
        };
        for tr in self.transactions.values() {
            consider(Some(tr.next));
        }
        consider(self.refresh_alloc_at);
        consider(self.refresh_perms_at);
        eto
    }

    pub fn handle_timeout(&mut self, now: Instant) {
        // retransmit pending requests, dropping the ones that ran out
        let mut timed_out = vec![];
        let mut retransmits = vec![];
        for (id, tr) in self.transactions.iter_mut() {
            if tr.next > now {
                continue;
            }
            if tr.attempt >= MAX_RETRANSMITS {
                timed_out.push(*id);
                continue;
            }
            tr.attempt += 1;
            tr.interval *= 2;
            tr.next = now + tr.interval;
            retransmits.push(tr.raw.clone());
        }
        for raw in retransmits {
            self.write_to_server(&raw, now);
        }
        for id in timed_out {
            if let Some(tr) = self.transactions.remove(&id) {
                match tr.kind {
                    TransactionKind::AllocateAttempt | TransactionKind::AllocateRequest => {
                        self.fail(Error::ErrTimeout);
                    }
                    TransactionKind::CreatePermission(peer_addr) => {
                        self.permissions.remove(&peer_addr);
                    }
                    TransactionKind::ChannelBind(_) => {
                        self.channel = None;
                    }
                    TransactionKind::Refresh => {}
                }
            }
        }

        if let Some(at) = self.refresh_alloc_at {
            if at <= now && self.allocated {
                self.refresh_alloc_at = Some(now + self.lifetime / 2);
                let _ = self.refresh_allocation(now);
            }
        }
        if let Some(at) = self.refresh_perms_at {
            if at <= now && self.allocated {
                self.refresh_perms_at = Some(now + TURN_PERM_REFRESH);
                let peers: Vec<SocketAddr> = self
                    .permissions
                    .iter()
                    .filter(|(_, state)| **state == PermState::Permitted)
                    .map(|(addr, _)| *addr)
                    .collect();
                for peer in peers {
                    let _ = self.send_create_permission(now, peer);
                }
            }
        }
    }

    fn refresh_allocation(&mut self, now: Instant) -> Result<()> {
        let setters = self.authenticated(vec![
            Box::new(TransactionId::new()),
            Box::new(MessageType::new(METHOD_REFRESH, CLASS_REQUEST)),
            Box::new(Lifetime(self.lifetime)),
        ])?;
        let mut msg = Message::new();
        msg.build(&setters).map_err(Error::Shared)?;
        self.perform_transaction(&msg, TransactionKind::Refresh, now);
        Ok(())
    }

    fn handle_channel_data(&mut self, data: &[u8]) -> Result<()> {
        let mut ch_data = ChannelData {
            raw: data.to_vec(),
            ..Default::default()
        };
        ch_data.decode().map_err(Error::Shared)?;

        let Some((number, peer_addr)) = self.channel else {
            return Err(Error::Shared(SharedError::ErrChannelBindNotFound));
        };
        if ch_data.number != number {
            return Err(Error::Shared(SharedError::ErrChannelBindNotFound));
        }

        trace!(
            "turn: channel data received from {peer_addr} (ch={})",
            ch_data.number.0
        );
        self.events.push_back(TurnEvent::Data {
            peer_addr,
            payload: BytesMut::from(&ch_data.data[..]),
        });
        Ok(())
    }

    /// Appends username/realm/nonce/integrity/fingerprint to a request.
    fn authenticated(
        &self,
        mut setters: Vec<Box<dyn Setter>>,
    ) -> Result<Vec<Box<dyn Setter>>> {
        let (Some(realm), Some(nonce), Some(integrity)) =
            (&self.realm, &self.nonce, &self.integrity)
        else {
            return Err(Error::ErrNotConnected);
        };
        setters.push(Box::new(self.username.clone()));
        setters.push(Box::new(realm.clone()));
        setters.push(Box::new(nonce.clone()));
        if !self.software.text.is_empty() {
            setters.push(Box::new(self.software.clone()));
        }
        setters.push(Box::new(integrity.clone()));
        setters.push(Box::new(FINGERPRINT));
        Ok(setters)
    }

    fn perform_transaction(&mut self, msg: &Message, kind: TransactionKind, now: Instant) {
        trace!(
            "turn: start {} transaction {:?} to {}",
            msg.typ,
            msg.transaction_id,
            self.server
        );
        self.transactions.insert(
            msg.transaction_id,
            Transaction {
                kind,
                raw: BytesMut::from(&msg.raw[..]),
                attempt: 0,
                interval: DEFAULT_RTO,
                next: now + DEFAULT_RTO,
            },
        );
        let raw = msg.raw.clone();
        self.write_to_server(&raw, now);
    }

    fn write_to_server(&mut self, data: &[u8], now: Instant) {
        let (payload, protocol) = if self.transport.is_stream() {
            (
                BytesMut::from(&frame_packet(data)[..]),
                TransportProtocol::TCP,
            )
        } else {
            (BytesMut::from(data), TransportProtocol::UDP)
        };

        self.transmits.push_back(TaggedBytesMut {
            now,
            transport: TransportContext {
                local_addr: self.local_addr,
                peer_addr: self.server,
                ecn: None,
                transport_protocol: protocol,
            },
            message: payload,
        });
    }

    fn fail(&mut self, err: Error) {
        warn!("turn: allocation to {} failed: {err}", self.server);
        self.failed = true;
        self.events.push_back(TurnEvent::Error(err));
    }
}

/// Permission policy of the pool: IPv4 peers only, and host candidates only
/// when they are not in private address space.
pub(crate) fn should_permit(cand: &Candidate) -> bool {
    let ip = cand.addr.ip();
    match ip {
        std::net::IpAddr::V6(_) => false,
        std::net::IpAddr::V4(v4) => {
            if cand.kind == CandidateKind::Host {
                !v4.is_private()
            } else {
                true
            }
        }
    }
}
