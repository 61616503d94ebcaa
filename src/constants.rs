use std::time::Duration;

/// How often the RTP liveness timer inspects the receive path.
pub(crate) const RTP_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// No inbound RTP for this long after media started means the flow is dead.
pub(crate) const RTP_TIMEOUT: Duration = Duration::from_secs(20);

/// First liveness check fires earlier so a dead flow is caught quickly.
pub(crate) const RTP_FIRST_CHECK_DELAY: Duration = Duration::from_secs(1);

pub(crate) const DTLS_MTU: usize = 1480;

/// Pacing interval for the ICE checklist.
pub(crate) const ICE_INTERVAL: Duration = Duration::from_millis(50);

/// STUN transaction tuning: RTO=150 and RC=8 gives around 12 seconds timeout.
pub(crate) const STUN_RTO: Duration = Duration::from_millis(150);
pub(crate) const STUN_MAX_RETRANSMITS: u16 = 8;

/// Discard port used on SDP media lines (draft-ietf-ice-trickle-05).
pub(crate) const PORT_DISCARD: u16 = 9;

/// b=AS bandwidth, kilobits/second.
pub(crate) const AUDIO_BANDWIDTH: u64 = 50;
pub(crate) const VIDEO_BANDWIDTH: u64 = 800;

/// Bytes reserved in front of an outbound packet for the TURN encapsulation
/// of its route: a Send indication for an IPv4 peer, or a ChannelData header.
pub(crate) const HEADROOM_TURN_INDICATION: usize = 36;
pub(crate) const HEADROOM_TURN_CHANNEL: usize = 4;

/// SDES master key material: 16 byte key plus 14 byte salt per direction.
pub(crate) const SDES_MASTER_KEY_LEN: usize = 30;
pub(crate) const SRTP_MASTER_KEY_LEN: usize = 16;
pub(crate) const SRTP_MASTER_SALT_LEN: usize = 14;

/// First TURN channel number (RFC 5766 section 11).
pub(crate) const TURN_CHANNEL_MIN: u16 = 0x4000;

/// Default TURN allocation lifetime requested from the server.
pub(crate) const TURN_LIFETIME: Duration = Duration::from_secs(600);

/// Refresh installed TURN permissions well inside their 5 minute lifetime.
pub(crate) const TURN_PERM_REFRESH: Duration = Duration::from_secs(120);

pub(crate) const SRTP_REPLAY_PROTECTION_WINDOW: usize = 64;
pub(crate) const SRTCP_REPLAY_PROTECTION_WINDOW: usize = 64;

/// Value of the session-level `a=tool` attribute.
pub(crate) const SDP_TOOL: &str = concat!("mediaflow ", env!("CARGO_PKG_VERSION"));
