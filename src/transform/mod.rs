#[cfg(test)]
mod transform_test;

use bytes::Bytes;
use log::warn;
use srtp::context::Context;
use srtp::option::{srtcp_replay_protection, srtp_replay_protection};
use srtp::protection_profile::ProtectionProfile;

use crate::constants::{
    SDES_MASTER_KEY_LEN, SRTCP_REPLAY_PROTECTION_WINDOW, SRTP_MASTER_KEY_LEN,
    SRTP_REPLAY_PROTECTION_WINDOW,
};
use crate::demux::{self, PacketKind, RTCP_MIN_LENGTH};
use crate::error::{Error, Result};

use shared::error::Error as SharedError;

/// Outcome of pushing a packet through the outbound half.
pub enum Protected {
    /// The encrypted packet to put on the wire.
    Packet(Bytes),
    /// Not RTP/RTCP, or no tx context yet: send as-is.
    Bypass,
    /// Short RTCP is dropped before encryption.
    Drop,
}

/// Independent tx and rx SRTP contexts. Rekeying swaps a whole context; the
/// old one is released before the new one is installed.
#[derive(Default)]
pub struct SrtpTransform {
    tx: Option<Context>,
    rx: Option<Context>,
}

impl SrtpTransform {
    pub fn has_tx(&self) -> bool {
        self.tx.is_some()
    }

    pub fn has_rx(&self) -> bool {
        self.rx.is_some()
    }

    /// Installs freshly keyed contexts, replacing any previous pair.
    pub fn install(&mut self, tx: Context, rx: Context) {
        self.tx = None;
        self.rx = None;
        self.tx = Some(tx);
        self.rx = Some(rx);
    }

    pub fn clear(&mut self) {
        self.tx = None;
        self.rx = None;
    }

    /// Builds both contexts from DTLS-exported keying material. The active
    /// endpoint keys its transmit direction from the client half.
    pub fn install_from_dtls(
        &mut self,
        state: &dtls::state::State,
        active: bool,
    ) -> Result<()> {
        use dtls::extension::extension_use_srtp::SrtpProtectionProfile;

        let profile = match state.srtp_protection_profile() {
            SrtpProtectionProfile::Srtp_Aes128_Cm_Hmac_Sha1_80 => {
                ProtectionProfile::Aes128CmHmacSha1_80
            }
            SrtpProtectionProfile::Srtp_Aead_Aes_128_Gcm => ProtectionProfile::AeadAes128Gcm,
            _ => return Err(Error::Shared(SharedError::ErrNoSuchSrtpProfile)),
        };

        let mut srtp_config = srtp::config::Config {
            profile,
            ..Default::default()
        };
        srtp_config
            .extract_session_keys_from_dtls(state, active)
            .map_err(Error::Shared)?;

        let tx = Context::new(
            &srtp_config.keys.local_master_key,
            &srtp_config.keys.local_master_salt,
            profile,
            None,
            None,
        )
        .map_err(Error::Shared)?;

        let rx = Context::new(
            &srtp_config.keys.remote_master_key,
            &srtp_config.keys.remote_master_salt,
            profile,
            Some(srtp_replay_protection(SRTP_REPLAY_PROTECTION_WINDOW)),
            Some(srtcp_replay_protection(SRTCP_REPLAY_PROTECTION_WINDOW)),
        )
        .map_err(Error::Shared)?;

        self.install(tx, rx);
        Ok(())
    }

    /// Keys the transmit direction from a 30-byte SDES master key.
    pub fn install_sdes_tx(&mut self, master: &[u8]) -> Result<()> {
        self.tx = None;
        self.tx = Some(sdes_context(master, false)?);
        Ok(())
    }

    /// Keys the receive direction from the peer's 30-byte SDES master key.
    pub fn install_sdes_rx(&mut self, master: &[u8]) -> Result<()> {
        self.rx = None;
        self.rx = Some(sdes_context(master, true)?);
        Ok(())
    }

    /// Encrypts an outbound packet when it is RTP or RTCP and a tx context
    /// exists; everything else passes through untouched.
    pub fn protect(&mut self, payload: &[u8]) -> Result<Protected> {
        if !demux::is_rtp_or_rtcp(payload) {
            return Ok(Protected::Bypass);
        }
        let Some(tx) = self.tx.as_mut() else {
            return Ok(Protected::Bypass);
        };

        if demux::is_rtcp(payload) {
            if payload.len() <= RTCP_MIN_LENGTH {
                return Ok(Protected::Drop);
            }
            let encrypted = tx.encrypt_rtcp(payload).map_err(|err| {
                warn!("srtcp_encrypt() failed ({err})");
                Error::Shared(err)
            })?;
            Ok(Protected::Packet(encrypted))
        } else {
            let encrypted = tx.encrypt_rtp(payload).map_err(|err| {
                warn!("srtp_encrypt() [{} bytes] failed ({err})", payload.len());
                Error::Shared(err)
            })?;
            Ok(Protected::Packet(encrypted))
        }
    }

    /// Decrypts an inbound RTP/RTCP packet. Replay of an already seen packet
    /// surfaces as [`Error::ErrDuplicate`]; the caller keeps it silent.
    pub fn unprotect(&mut self, kind: PacketKind, payload: &[u8]) -> Result<Bytes> {
        let Some(rx) = self.rx.as_mut() else {
            return Err(Error::ErrNotReady);
        };

        let result = match kind {
            PacketKind::Rtcp => rx.decrypt_rtcp(payload),
            _ => rx.decrypt_rtp(payload),
        };

        result.map_err(|err| {
            if err == SharedError::ErrDuplicated {
                Error::ErrDuplicate
            } else {
                Error::Shared(err)
            }
        })
    }
}

fn sdes_context(master: &[u8], inbound: bool) -> Result<Context> {
    if master.len() != SDES_MASTER_KEY_LEN {
        return Err(Error::ErrInvalidArgument);
    }
    let (key, salt) = master.split_at(SRTP_MASTER_KEY_LEN);
    let (rtp_opt, rtcp_opt) = if inbound {
        (
            Some(srtp_replay_protection(SRTP_REPLAY_PROTECTION_WINDOW)),
            Some(srtcp_replay_protection(SRTCP_REPLAY_PROTECTION_WINDOW)),
        )
    } else {
        (None, None)
    };
    Context::new(
        key,
        salt,
        ProtectionProfile::Aes128CmHmacSha1_80,
        rtp_opt,
        rtcp_opt,
    )
    .map_err(Error::Shared)
}
