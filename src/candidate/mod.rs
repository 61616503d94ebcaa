#[cfg(test)]
mod candidate_test;

pub mod pair;

use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;

use crate::error::{Error, Result};

/// The one component multiplexing RTP and RTCP.
pub(crate) const COMPONENT_RTP: u16 = 1;

/// ICE candidate types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CandidateKind {
    #[serde(rename = "host")]
    Host,
    #[serde(rename = "srflx")]
    ServerReflexive,
    #[serde(rename = "prflx")]
    PeerReflexive,
    #[serde(rename = "relay")]
    Relay,
}

impl fmt::Display for CandidateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            CandidateKind::Host => "host",
            CandidateKind::ServerReflexive => "srflx",
            CandidateKind::PeerReflexive => "prflx",
            CandidateKind::Relay => "relay",
        };
        write!(f, "{s}")
    }
}

impl CandidateKind {
    /// RFC 8445 4.2 type preferences: 126 for host, 110 for peer
    /// reflexive, 100 for server reflexive and 0 for relayed candidates.
    #[must_use]
    pub const fn preference(self) -> u16 {
        match self {
            Self::Host => 126,
            Self::PeerReflexive => 110,
            Self::ServerReflexive => 100,
            Self::Relay => 0,
        }
    }

    pub(crate) fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "host" => Self::Host,
            "srflx" => Self::ServerReflexive,
            "prflx" => Self::PeerReflexive,
            "relay" => Self::Relay,
            _ => return None,
        })
    }
}

/// Transport a candidate was gathered over. The local preference keeps UDP
/// above plain TCP above TLS-over-TCP when priorities tie on type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GatherTransport {
    #[default]
    Udp,
    Tcp,
    Tls,
}

impl GatherTransport {
    pub(crate) const fn local_preference(self) -> u16 {
        match self {
            Self::Udp => 3,
            Self::Tcp => 2,
            Self::Tls => 1,
        }
    }
}

/// RFC 8445 5.1.2.1 candidate priority.
pub(crate) fn calc_priority(kind: CandidateKind, local_pref: u16, component: u16) -> u32 {
    ((kind.preference() as u32) << 24)
        | ((local_pref as u32) << 8)
        | (256 - component as u32)
}

/// One ICE candidate. `base` is the transport address packets are actually
/// sent from: for host candidates the address itself, for server reflexive
/// ones the local socket and for relayed ones the relay allocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub foundation: String,
    pub component: u16,
    pub priority: u32,
    pub addr: SocketAddr,
    pub kind: CandidateKind,
    pub related_addr: Option<SocketAddr>,
    pub base: SocketAddr,
}

impl Candidate {
    pub fn host(addr: SocketAddr) -> Self {
        Self {
            foundation: "1".to_owned(),
            component: COMPONENT_RTP,
            priority: calc_priority(
                CandidateKind::Host,
                GatherTransport::Udp.local_preference(),
                COMPONENT_RTP,
            ),
            addr,
            kind: CandidateKind::Host,
            related_addr: None,
            base: addr,
        }
    }

    pub fn server_reflexive(
        addr: SocketAddr,
        base: SocketAddr,
        transport: GatherTransport,
    ) -> Self {
        Self {
            foundation: "1".to_owned(),
            component: COMPONENT_RTP,
            priority: calc_priority(
                CandidateKind::ServerReflexive,
                transport.local_preference(),
                COMPONENT_RTP,
            ),
            addr,
            kind: CandidateKind::ServerReflexive,
            related_addr: Some(base),
            base,
        }
    }

    pub fn peer_reflexive(addr: SocketAddr, base: SocketAddr) -> Self {
        Self {
            foundation: "1".to_owned(),
            component: COMPONENT_RTP,
            priority: calc_priority(
                CandidateKind::PeerReflexive,
                GatherTransport::Udp.local_preference(),
                COMPONENT_RTP,
            ),
            addr,
            kind: CandidateKind::PeerReflexive,
            related_addr: None,
            base,
        }
    }

    pub fn relay(
        relayed: SocketAddr,
        mapped: SocketAddr,
        transport: GatherTransport,
    ) -> Self {
        Self {
            foundation: "1".to_owned(),
            component: COMPONENT_RTP,
            priority: calc_priority(
                CandidateKind::Relay,
                transport.local_preference(),
                COMPONENT_RTP,
            ),
            addr: relayed,
            kind: CandidateKind::Relay,
            related_addr: Some(mapped),
            base: relayed,
        }
    }

    /// Encodes the value of an `a=candidate` attribute.
    pub fn marshal(&self) -> String {
        let mut s = format!(
            "{} {} UDP {} {} {} typ {}",
            self.foundation,
            self.component,
            self.priority,
            self.addr.ip(),
            self.addr.port(),
            self.kind,
        );
        if let Some(rel) = &self.related_addr {
            s.push_str(&format!(" raddr {} rport {}", rel.ip(), rel.port()));
        }
        s
    }

    /// Decodes an `a=candidate` attribute value. The leading `candidate:`
    /// prefix (with or without `a=`) is accepted and stripped. Unknown
    /// trailing key/value extensions are ignored.
    pub fn unmarshal(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let raw = raw.strip_prefix("a=").unwrap_or(raw);
        let raw = raw.strip_prefix("candidate:").unwrap_or(raw);

        let fields: Vec<&str> = raw.split_whitespace().collect();
        if fields.len() < 8 {
            return Err(Error::ErrInvalidArgument);
        }

        let foundation = fields[0].to_owned();
        let component: u16 = fields[1].parse().map_err(|_| Error::ErrInvalidArgument)?;
        let protocol = fields[2].to_uppercase();
        let priority: u32 = fields[3].parse().map_err(|_| Error::ErrInvalidArgument)?;
        let ip = fields[4].parse().map_err(|_| Error::ErrInvalidArgument)?;
        let port: u16 = fields[5].parse().map_err(|_| Error::ErrInvalidArgument)?;
        if fields[6] != "typ" {
            return Err(Error::ErrInvalidArgument);
        }
        let kind = CandidateKind::from_name(fields[7]).ok_or(Error::ErrInvalidArgument)?;

        if protocol != "UDP" {
            return Err(Error::ErrNotSupported);
        }

        let mut related_addr = None;
        let mut rest = fields[8..].iter();
        let mut raddr = None;
        let mut rport = None;
        while let Some(key) = rest.next() {
            match (*key, rest.next()) {
                ("raddr", Some(v)) => raddr = v.parse().ok(),
                ("rport", Some(v)) => rport = v.parse().ok(),
                _ => {}
            }
        }
        if let (Some(ip), Some(port)) = (raddr, rport) {
            related_addr = Some(SocketAddr::new(ip, port));
        }

        let addr = SocketAddr::new(ip, port);
        Ok(Self {
            foundation,
            component,
            priority,
            addr,
            kind,
            related_addr,
            base: addr,
        })
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.addr)
    }
}
