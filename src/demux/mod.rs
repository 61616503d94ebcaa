
use std::fmt;

/// Packet classes multiplexed on the single UDP 5-tuple, told apart by the
/// first byte as described in RFC 7983:
///
/// ```text
///              +----------------+
///              |        [0..3] -+--> forward to STUN
///              |                |
///              |      [20..63] -+--> forward to DTLS
///              |                |
///  packet -->  |    [128..191] -+--> forward to RTP/RTCP
///              +----------------+
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PacketKind {
    Stun,
    Dtls,
    Rtp,
    Rtcp,
    Unknown,
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            PacketKind::Stun => "STUN",
            PacketKind::Dtls => "DTLS",
            PacketKind::Rtp => "RTP",
            PacketKind::Rtcp => "RTCP",
            PacketKind::Unknown => "Unknown",
        };
        write!(f, "{s}")
    }
}

/// Minimum length of an SRTCP packet; anything shorter is dropped.
pub(crate) const RTCP_MIN_LENGTH: usize = 8;

fn in_range(lower: u8, upper: u8, b: u8) -> bool {
    b >= lower && b <= upper
}

/// Classifies a datagram by its first byte. RTCP is separated from RTP by
/// the payload-type window 64..=95 of the second byte.
pub fn classify(buf: &[u8]) -> PacketKind {
    if buf.is_empty() {
        return PacketKind::Unknown;
    }

    let b = buf[0];
    if in_range(0, 3, b) {
        PacketKind::Stun
    } else if in_range(20, 63, b) {
        PacketKind::Dtls
    } else if in_range(128, 191, b) {
        if buf.len() > 1 && in_range(64, 95, buf[1] & 0x7f) {
            PacketKind::Rtcp
        } else {
            PacketKind::Rtp
        }
    } else {
        PacketKind::Unknown
    }
}

pub(crate) fn is_rtp_or_rtcp(buf: &[u8]) -> bool {
    matches!(classify(buf), PacketKind::Rtp | PacketKind::Rtcp)
}

pub(crate) fn is_rtcp(buf: &[u8]) -> bool {
    classify(buf) == PacketKind::Rtcp
}
