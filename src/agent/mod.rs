#[cfg(test)]
mod agent_test;

pub mod attributes;

use bytes::BytesMut;
use log::{debug, info, trace, warn};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use stun::attributes::{ATTR_ICE_CONTROLLED, ATTR_ICE_CONTROLLING, ATTR_SOFTWARE, ATTR_USERNAME};
use stun::fingerprint::FINGERPRINT;
use stun::integrity::MessageIntegrity;
use stun::message::{
    is_stun_message, Message, TransactionId, BINDING_REQUEST, BINDING_SUCCESS, CLASS_INDICATION,
    CLASS_REQUEST, CLASS_SUCCESS_RESPONSE, METHOD_BINDING,
};
use stun::textattrs::TextAttribute;

use crate::candidate::pair::{CandidatePair, CandidatePairState};
use crate::candidate::{Candidate, CandidateKind};
use crate::constants::{ICE_INTERVAL, STUN_MAX_RETRANSMITS, STUN_RTO};
use crate::error::{Error, Result};
use attributes::{AttrControlled, AttrControlling, PriorityAttr, UseCandidateAttr};

use shared::error::Error as SharedError;
use shared::{TaggedBytesMut, TransportContext, TransportProtocol};

/// Pending outbound binding requests older than this are forgotten.
const MAX_BINDING_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const RUNES_ALPHA: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

const LEN_UFRAG: usize = 16;
const LEN_PWD: usize = 32;

/// ICE user fragment.
pub fn generate_ufrag() -> String {
    shared::util::generate_crypto_random_string(LEN_UFRAG, RUNES_ALPHA)
}

/// Generates ICE pwd.
pub fn generate_pwd() -> String {
    shared::util::generate_crypto_random_string(LEN_PWD, RUNES_ALPHA)
}

#[derive(Default, Clone)]
pub struct Credentials {
    pub ufrag: String,
    pub pwd: String,
}

#[derive(Debug, Clone)]
struct BindingRequest {
    timestamp: Instant,
    transaction_id: TransactionId,
    destination: SocketAddr,
    is_use_candidate: bool,
    local_index: usize,
    remote_index: usize,
}

pub enum IceEvent {
    /// The first pair produced a valid response; it is now the selected
    /// pair for the lifetime of the flow.
    SelectedPair {
        local: Candidate,
        remote: Candidate,
    },
    /// Every check failed after the remote signalled end-of-candidates.
    Failed,
}

pub struct IceAgentConfig {
    pub local_ufrag: String,
    pub local_pwd: String,
    /// Privacy mode disables peer-reflexive candidate discovery.
    pub privacy_mode: bool,
}

/// Trickle-ICE agent for a single RTP component. Nomination is
/// "first success wins": the first pair with a valid response is selected
/// and never reassigned; remaining checks only refresh statistics.
pub struct IceAgent {
    controlling: bool,
    tie_breaker: u64,
    privacy_mode: bool,

    local_credentials: Credentials,
    remote_credentials: Option<Credentials>,

    local_candidates: Vec<Candidate>,
    remote_candidates: Vec<Candidate>,
    pairs: Vec<CandidatePair>,
    selected_pair: Option<usize>,

    pending_requests: Vec<BindingRequest>,

    checklist_running: bool,
    next_tick: Option<Instant>,
    remote_eoc: bool,
    failed: bool,
    closed: bool,

    peer_software: Option<String>,

    transmits: VecDeque<TaggedBytesMut>,
    events: VecDeque<IceEvent>,
}

impl IceAgent {
    pub fn new(config: IceAgentConfig) -> Self {
        Self {
            controlling: false,
            tie_breaker: rand::random::<u64>(),
            privacy_mode: config.privacy_mode,
            local_credentials: Credentials {
                ufrag: config.local_ufrag,
                pwd: config.local_pwd,
            },
            remote_credentials: None,
            local_candidates: vec![],
            remote_candidates: vec![],
            pairs: vec![],
            selected_pair: None,
            pending_requests: vec![],
            checklist_running: false,
            next_tick: None,
            remote_eoc: false,
            failed: false,
            closed: false,
            peer_software: None,
            transmits: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    pub fn set_role(&mut self, controlling: bool) {
        self.controlling = controlling;
    }

    pub fn is_controlling(&self) -> bool {
        self.controlling
    }

    pub fn local_credentials(&self) -> &Credentials {
        &self.local_credentials
    }

    pub fn set_remote_credentials(&mut self, ufrag: String, pwd: String) -> Result<()> {
        if ufrag.is_empty() {
            return Err(Error::Shared(SharedError::ErrRemoteUfragEmpty));
        }
        if pwd.is_empty() {
            return Err(Error::Shared(SharedError::ErrRemotePwdEmpty));
        }
        self.remote_credentials = Some(Credentials { ufrag, pwd });
        Ok(())
    }

    pub fn set_remote_eoc(&mut self) {
        self.remote_eoc = true;
        self.check_for_failure();
    }

    pub fn remote_eoc(&self) -> bool {
        self.remote_eoc
    }

    pub fn peer_software(&self) -> Option<&str> {
        self.peer_software.as_deref()
    }

    pub fn local_candidates(&self) -> &[Candidate] {
        &self.local_candidates
    }

    pub fn remote_candidates(&self) -> &[Candidate] {
        &self.remote_candidates
    }

    pub fn is_ready(&self) -> bool {
        self.selected_pair.is_some()
    }

    /// Returns the selected (local, remote) candidates, if nominated.
    pub fn selected_pair(&self) -> Option<(&Candidate, &Candidate)> {
        self.selected_pair.map(|index| {
            let pair = &self.pairs[index];
            (
                &self.local_candidates[pair.local_index],
                &self.remote_candidates[pair.remote_index],
            )
        })
    }

    pub fn add_local_candidate(&mut self, c: Candidate, now: Instant) -> Result<bool> {
        if self.closed {
            return Err(Error::ErrTerminated);
        }
        for cand in &self.local_candidates {
            if cand.addr == c.addr && cand.kind == c.kind {
                return Ok(false);
            }
        }

        self.local_candidates.push(c);
        let local_index = self.local_candidates.len() - 1;
        for remote_index in 0..self.remote_candidates.len() {
            self.add_pair(local_index, remote_index);
        }

        self.kick_checklist(now);
        Ok(true)
    }

    pub fn add_remote_candidate(&mut self, c: Candidate, now: Instant) -> Result<bool> {
        if self.closed {
            return Err(Error::ErrTerminated);
        }
        for cand in &self.remote_candidates {
            if cand.addr == c.addr {
                return Ok(false);
            }
        }

        info!("ice: new remote candidate ({c})");
        self.remote_candidates.push(c);
        let remote_index = self.remote_candidates.len() - 1;
        for local_index in 0..self.local_candidates.len() {
            self.add_pair(local_index, remote_index);
        }

        self.kick_checklist(now);
        Ok(true)
    }

    /// Starts (or restarts) the checklist. Requires that the remote
    /// credentials have been learned from SDP.
    pub fn start_checklist(&mut self, now: Instant) -> Result<()> {
        if self.remote_credentials.is_none() {
            return Err(Error::Shared(SharedError::ErrPasswordEmpty));
        }

        info!(
            "ice: starting checklist with {} remote candidates",
            self.remote_candidates.len()
        );
        self.checklist_running = true;
        self.next_tick = Some(now);
        Ok(())
    }

    pub fn close(&mut self) {
        self.closed = true;
        self.checklist_running = false;
        self.next_tick = None;
        self.pending_requests.clear();
        self.transmits.clear();
    }

    pub fn poll_transmit(&mut self) -> Option<TaggedBytesMut> {
        self.transmits.pop_front()
    }

    pub fn poll_event(&mut self) -> Option<IceEvent> {
        self.events.pop_front()
    }

    pub fn poll_timeout(&self) -> Option<Instant> {
        self.next_tick
    }

    pub fn handle_timeout(&mut self, now: Instant) {
        let Some(tick) = self.next_tick else {
            return;
        };
        if now < tick || !self.checklist_running || self.closed {
            return;
        }
        self.tick(now);
    }

    /// Processes one inbound STUN datagram received on the local candidate
    /// with base address `local_addr`.
    pub fn handle_read(
        &mut self,
        now: Instant,
        local_addr: SocketAddr,
        remote_addr: SocketAddr,
        buf: &[u8],
    ) -> Result<()> {
        if self.closed {
            return Err(Error::ErrTerminated);
        }
        if !is_stun_message(buf) {
            return Err(Error::Shared(SharedError::ErrNonStunmessage));
        }

        let Some(local_index) = self.find_pairable_local(local_addr) else {
            warn!("ice: discarded message, no local candidate at {local_addr}");
            return Err(Error::Shared(SharedError::ErrUnhandledStunpacket));
        };

        let mut m = Message {
            raw: vec![],
            ..Message::default()
        };
        m.raw.extend_from_slice(buf);
        m.decode().map_err(Error::Shared)?;

        self.handle_inbound(now, &mut m, local_index, remote_addr)
    }

    /// Marks a remote candidate as seen by non-STUN traffic; returns false
    /// when the source is not a known remote candidate.
    pub fn validate_non_stun_traffic(&self, remote_addr: SocketAddr) -> bool {
        self.find_remote_candidate(remote_addr).is_some()
    }

    fn kick_checklist(&mut self, now: Instant) {
        // every newly added candidate restarts the checklist timer
        if self.checklist_running {
            self.next_tick = Some(now);
        }
    }

    fn add_pair(&mut self, local_index: usize, remote_index: usize) {
        let local = &self.local_candidates[local_index];
        if !matches!(local.kind, CandidateKind::Host | CandidateKind::Relay) {
            // server-reflexive candidates are pruned to their base
            return;
        }

        for p in &self.pairs {
            if p.local_index == local_index && p.remote_index == remote_index {
                return;
            }
        }

        let state = if self.checklist_running {
            CandidatePairState::Waiting
        } else {
            CandidatePairState::Frozen
        };
        let mut pair = CandidatePair::new(
            local_index,
            remote_index,
            local.priority,
            self.remote_candidates[remote_index].priority,
            self.controlling,
            STUN_RTO,
        );
        pair.state = state;
        self.pairs.push(pair);
    }

    fn find_pair(&self, local_index: usize, remote_index: usize) -> Option<usize> {
        self.pairs
            .iter()
            .position(|p| p.local_index == local_index && p.remote_index == remote_index)
    }

    fn find_pairable_local(&self, addr: SocketAddr) -> Option<usize> {
        self.local_candidates
            .iter()
            .position(|c| c.base == addr && matches!(c.kind, CandidateKind::Host | CandidateKind::Relay))
    }

    pub(crate) fn find_remote_candidate(&self, addr: SocketAddr) -> Option<usize> {
        self.remote_candidates.iter().position(|c| c.addr == addr)
    }

    fn tick(&mut self, now: Instant) {
        // retransmit in-progress checks whose timer elapsed
        let mut failed_any = false;
        for index in 0..self.pairs.len() {
            let due = {
                let p = &self.pairs[index];
                p.state == CandidatePairState::InProgress
                    && p.next_transmit.map(|t| t <= now).unwrap_or(false)
            };
            if !due {
                continue;
            }

            if self.pairs[index].binding_request_count > STUN_MAX_RETRANSMITS {
                trace!(
                    "[{}]: max requests reached for pair {}, marking it as failed",
                    self.role_name(),
                    self.pairs[index]
                );
                self.pairs[index].state = CandidatePairState::Failed;
                self.pairs[index].next_transmit = None;
                self.pairs[index].transaction_id = None;
                failed_any = true;
                continue;
            }

            self.send_check(index, now, false);
        }

        // unfreeze, then start at most one new check per tick
        let mut started = false;
        for index in 0..self.pairs.len() {
            if self.pairs[index].state == CandidatePairState::Frozen {
                self.pairs[index].state = CandidatePairState::Waiting;
            }
        }
        if let Some(index) = self.best_waiting_pair() {
            self.pairs[index].state = CandidatePairState::InProgress;
            self.send_check(index, now, true);
            started = true;
        }

        if failed_any {
            self.check_for_failure();
        }

        let active = self.pairs.iter().any(|p| {
            matches!(
                p.state,
                CandidatePairState::Waiting | CandidatePairState::InProgress
            )
        });
        self.next_tick = if active || started {
            Some(now + ICE_INTERVAL)
        } else {
            None
        };
    }

    fn best_waiting_pair(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (index, p) in self.pairs.iter().enumerate() {
            if p.state != CandidatePairState::Waiting {
                continue;
            }
            match best {
                Some(b) if self.pairs[b].priority() >= p.priority() => {}
                _ => best = Some(index),
            }
        }
        best
    }

    fn role_name(&self) -> &'static str {
        if self.controlling {
            "controlling"
        } else {
            "controlled"
        }
    }

    fn send_check(&mut self, pair_index: usize, now: Instant, fresh: bool) {
        let (msg, local_index, remote_index) = {
            let Some(remote_credentials) = &self.remote_credentials else {
                return;
            };
            let p = &self.pairs[pair_index];
            let username = remote_credentials.ufrag.clone()
                + ":"
                + self.local_credentials.ufrag.as_str();

            let mut msg = Message::new();
            let mut setters: Vec<Box<dyn stun::message::Setter>> = vec![
                Box::new(BINDING_REQUEST),
                Box::new(TransactionId::new()),
                Box::new(TextAttribute::new(ATTR_USERNAME, username)),
            ];
            if self.controlling {
                // aggressive nomination: every check carries USE-CANDIDATE
                setters.push(Box::new(AttrControlling(self.tie_breaker)));
                setters.push(Box::new(UseCandidateAttr));
            } else {
                setters.push(Box::new(AttrControlled(self.tie_breaker)));
            }
            setters.push(Box::new(PriorityAttr(p.local_priority)));
            setters.push(Box::new(MessageIntegrity::new_short_term_integrity(
                remote_credentials.pwd.clone(),
            )));
            setters.push(Box::new(FINGERPRINT));

            if let Err(err) = msg.build(&setters) {
                warn!("ice: failed to build binding request: {err}");
                return;
            }
            (msg, p.local_index, p.remote_index)
        };

        trace!(
            "[{}]: ping STUN from {} to {}",
            self.role_name(),
            self.local_candidates[local_index],
            self.remote_candidates[remote_index],
        );

        {
            let p = &mut self.pairs[pair_index];
            p.binding_request_count += 1;
            if fresh {
                p.rto = STUN_RTO;
            } else {
                // doubling capped at 16*RTO keeps the whole ladder near 12 s
                p.rto = (p.rto * 2).min(STUN_RTO * 16);
            }
            p.next_transmit = Some(now + p.rto);
            p.transaction_id = Some(msg.transaction_id);
        }

        self.invalidate_pending_requests(now);
        self.pending_requests.push(BindingRequest {
            timestamp: now,
            transaction_id: msg.transaction_id,
            destination: self.remote_candidates[remote_index].addr,
            is_use_candidate: self.controlling,
            local_index,
            remote_index,
        });

        self.send_stun(&msg, local_index, remote_index, now);
    }

    fn send_stun(&mut self, msg: &Message, local_index: usize, remote_index: usize, now: Instant) {
        let local_addr = self.local_candidates[local_index].base;
        let peer_addr = self.remote_candidates[remote_index].addr;

        self.transmits.push_back(TaggedBytesMut {
            now,
            transport: TransportContext {
                local_addr,
                peer_addr,
                ecn: None,
                transport_protocol: TransportProtocol::UDP,
            },
            message: BytesMut::from(&msg.raw[..]),
        });
    }

    fn invalidate_pending_requests(&mut self, now: Instant) {
        self.pending_requests.retain(|request| {
            now.saturating_duration_since(request.timestamp) < MAX_BINDING_REQUEST_TIMEOUT
        });
    }

    fn handle_inbound(
        &mut self,
        now: Instant,
        m: &mut Message,
        local_index: usize,
        remote_addr: SocketAddr,
    ) -> Result<()> {
        if m.typ.method != METHOD_BINDING
            || !(m.typ.class == CLASS_SUCCESS_RESPONSE
                || m.typ.class == CLASS_REQUEST
                || m.typ.class == CLASS_INDICATION)
        {
            trace!(
                "[{}]: unhandled STUN from {} class({}) method({})",
                self.role_name(),
                remote_addr,
                m.typ.class,
                m.typ.method
            );
            return Err(Error::Shared(SharedError::ErrUnhandledStunpacket));
        }

        if self.controlling {
            if m.contains(ATTR_ICE_CONTROLLING) && m.typ.class == CLASS_REQUEST {
                debug!("[{}]: both sides are controlling", self.role_name());
                return Err(Error::Shared(SharedError::ErrUnexpectedStunrequestMessage));
            }
        } else if m.contains(ATTR_ICE_CONTROLLED) && m.typ.class == CLASS_REQUEST {
            debug!("[{}]: both sides are controlled", self.role_name());
            return Err(Error::Shared(SharedError::ErrUnexpectedStunrequestMessage));
        }

        let Some(remote_credentials) = self.remote_credentials.clone() else {
            debug!("[{}]: no remote credentials yet", self.role_name());
            return Err(Error::Shared(SharedError::ErrPasswordEmpty));
        };

        if m.typ.class == CLASS_SUCCESS_RESPONSE {
            let integrity = MessageIntegrity(remote_credentials.pwd.as_bytes().to_vec());
            if let Err(err) = integrity.check(m) {
                warn!(
                    "[{}]: discard response from {remote_addr}: {err}",
                    self.role_name()
                );
                return Err(Error::Shared(err));
            }
            self.handle_success_response(now, m, remote_addr);
        } else if m.typ.class == CLASS_REQUEST {
            let username =
                self.local_credentials.ufrag.clone() + ":" + remote_credentials.ufrag.as_str();
            let actual = TextAttribute::get_from_as(m, ATTR_USERNAME)
                .map(|u| u.text)
                .unwrap_or_default();
            if actual != username {
                warn!(
                    "[{}]: discard request from {remote_addr}: username mismatch",
                    self.role_name()
                );
                return Err(Error::Shared(SharedError::ErrMismatchUsername));
            }
            let integrity = MessageIntegrity(self.local_credentials.pwd.as_bytes().to_vec());
            if let Err(err) = integrity.check(m) {
                warn!(
                    "[{}]: discard request from {remote_addr}: {err}",
                    self.role_name()
                );
                return Err(Error::Shared(err));
            }

            self.handle_binding_request(now, m, local_index, remote_addr)?;
        }

        Ok(())
    }

    fn handle_success_response(&mut self, now: Instant, m: &Message, remote_addr: SocketAddr) {
        self.invalidate_pending_requests(now);

        let Some(position) = self
            .pending_requests
            .iter()
            .position(|r| r.transaction_id == m.transaction_id)
        else {
            warn!(
                "[{}]: discard response from {remote_addr}, unknown transaction",
                self.role_name()
            );
            return;
        };
        let request = self.pending_requests.remove(position);

        // symmetric check: response must come from where the request went
        if request.destination != remote_addr {
            debug!(
                "[{}]: discard response, source {} does not match destination {}",
                self.role_name(),
                remote_addr,
                request.destination
            );
            return;
        }

        let Some(pair_index) = self.find_pair(request.local_index, request.remote_index) else {
            return;
        };

        self.pairs[pair_index].state = CandidatePairState::Succeeded;
        self.pairs[pair_index].next_transmit = None;
        self.pairs[pair_index].transaction_id = None;

        if self.peer_software.is_none() {
            if let Ok(software) = TextAttribute::get_from_as(m, ATTR_SOFTWARE) {
                self.peer_software = Some(software.text);
            }
        }

        // first success wins; later successes only refresh statistics
        if self.selected_pair.is_none() {
            self.set_selected(pair_index);
        }
    }

    fn handle_binding_request(
        &mut self,
        now: Instant,
        m: &Message,
        local_index: usize,
        remote_addr: SocketAddr,
    ) -> Result<()> {
        let mut remote_index = self.find_remote_candidate(remote_addr);

        if remote_index.is_none() {
            if self.privacy_mode {
                debug!(
                    "[{}]: unknown source {remote_addr} ignored (privacy mode)",
                    self.role_name()
                );
            } else {
                let base = self.local_candidates[local_index].base;
                let mut prflx = Candidate::peer_reflexive(remote_addr, base);
                let mut priority = PriorityAttr::default();
                if priority.get_from(m).is_ok() {
                    prflx.priority = priority.0;
                }
                debug!(
                    "[{}]: adding a new peer-reflexive candidate: {remote_addr}",
                    self.role_name()
                );
                self.add_remote_candidate(prflx, now)?;
                remote_index = self.find_remote_candidate(remote_addr);
            }
        }

        trace!(
            "[{}]: inbound STUN (Request) from {} to {}",
            self.role_name(),
            remote_addr,
            local_index
        );

        let Some(remote_index) = remote_index else {
            // privacy mode and unknown source: answer the check but form no pair
            self.send_binding_success(now, m, local_index, remote_addr);
            return Ok(());
        };

        self.send_binding_success(now, m, local_index, remote_addr);

        if let Some(pair_index) = self.find_pair(local_index, remote_index) {
            let succeeded = self.pairs[pair_index].state == CandidatePairState::Succeeded;
            if UseCandidateAttr::is_set(m)
                && !self.controlling
                && succeeded
                && self.selected_pair.is_none()
            {
                self.set_selected(pair_index);
            }
        }

        Ok(())
    }

    fn send_binding_success(
        &mut self,
        now: Instant,
        m: &Message,
        local_index: usize,
        remote_addr: SocketAddr,
    ) {
        let local_pwd = self.local_credentials.pwd.clone();
        let (out, result) = {
            let mut out = Message::new();
            let result = out.build(&[
                Box::new(m.clone()),
                Box::new(BINDING_SUCCESS),
                Box::new(stun::xoraddr::XorMappedAddress {
                    ip: remote_addr.ip(),
                    port: remote_addr.port(),
                }),
                Box::new(MessageIntegrity::new_short_term_integrity(local_pwd)),
                Box::new(FINGERPRINT),
            ]);
            (out, result)
        };

        match result {
            Ok(()) => {
                let local_addr = self.local_candidates[local_index].base;
                self.transmits.push_back(TaggedBytesMut {
                    now,
                    transport: TransportContext {
                        local_addr,
                        peer_addr: remote_addr,
                        ecn: None,
                        transport_protocol: TransportProtocol::UDP,
                    },
                    message: BytesMut::from(&out.raw[..]),
                });
            }
            Err(err) => {
                warn!(
                    "[{}]: failed to build binding success for {remote_addr}: {err}",
                    self.role_name()
                );
            }
        }
    }

    fn set_selected(&mut self, pair_index: usize) {
        self.pairs[pair_index].nominated = true;
        self.selected_pair = Some(pair_index);

        let pair = &self.pairs[pair_index];
        let local = self.local_candidates[pair.local_index].clone();
        let remote = self.remote_candidates[pair.remote_index].clone();

        info!("ice: pair established {local} <-> {remote}");

        self.events.push_back(IceEvent::SelectedPair { local, remote });
    }

    fn check_for_failure(&mut self) {
        if self.failed || self.selected_pair.is_some() {
            return;
        }
        if !self.remote_eoc || self.pairs.is_empty() {
            return;
        }
        let all_failed = self
            .pairs
            .iter()
            .all(|p| p.state == CandidatePairState::Failed);
        if all_failed {
            warn!(
                "ice: all {} pairs failed after end-of-candidates",
                self.pairs.len()
            );
            self.failed = true;
            self.events.push_back(IceEvent::Failed);
        }
    }
}
