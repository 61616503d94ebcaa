#[cfg(test)]
mod keying_test;

pub mod certificate;

use bytes::BytesMut;
use log::{debug, info, warn};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dtls::config::ClientAuthType;
use dtls::endpoint::{Endpoint, EndpointEvent};
use dtls::extension::extension_use_srtp::SrtpProtectionProfile;

use crate::error::{Error, Result};
use crate::relay::Route;
use certificate::Certificate;

use shared::{TaggedBytesMut, TransportContext, TransportProtocol};

/// Where encrypted records go: the address of the winning candidate pair,
/// re-asserted whenever inbound DTLS arrives on a different route.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DtlsPeer {
    pub route: Route,
    pub addr: SocketAddr,
}

pub enum KeyingEvent {
    HandshakeComplete,
    ApplicationData(BytesMut),
}

/// DTLS layered above the shared UDP socket. The transport only shuffles
/// records; role policy (who connects, who accepts) is decided by the flow
/// from the negotiated setup attribute.
pub struct DtlsTransport {
    endpoint: Endpoint,
    certificate: Certificate,
    connecting: bool,
    accepting: bool,
    peer: Option<DtlsPeer>,
    verified: bool,
    ts_start: Option<Instant>,
    transmits: VecDeque<TaggedBytesMut>,
}

impl DtlsTransport {
    pub fn new(certificate: Certificate) -> Self {
        Self {
            endpoint: Endpoint::new(None),
            certificate,
            connecting: false,
            accepting: false,
            peer: None,
            verified: false,
            ts_start: None,
            transmits: VecDeque::new(),
        }
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    pub fn peer(&self) -> Option<DtlsPeer> {
        self.peer
    }

    pub fn is_verified(&self) -> bool {
        self.verified
    }

    pub fn handshake_started_at(&self) -> Option<Instant> {
        self.ts_start
    }

    /// Updates the peer address and route for outbound records.
    pub fn set_peer(&mut self, route: Route, addr: SocketAddr) {
        match self.peer {
            None => info!("mediaflow: dtls_peer: setting to {}|{addr}", route.name()),
            Some(peer) if peer.route != route || peer.addr != addr => {
                info!(
                    "mediaflow: dtls peer: change from {}|{} --> {}|{addr}",
                    peer.route.name(),
                    peer.addr,
                    route.name()
                );
            }
            _ => {}
        }
        self.peer = Some(DtlsPeer { route, addr });
    }

    fn handshake_config(&self, is_client: bool) -> Result<dtls::config::HandshakeConfig> {
        let handshake_config = dtls::config::ConfigBuilder::default()
            .with_certificates(vec![self.certificate.dtls_certificate().clone()])
            .with_srtp_protection_profiles(vec![
                SrtpProtectionProfile::Srtp_Aes128_Cm_Hmac_Sha1_80,
            ])
            .with_client_auth(ClientAuthType::RequireAnyClientCert)
            .with_insecure_skip_verify(true)
            .build(is_client, None)
            .map_err(Error::Shared)?;
        Ok(handshake_config)
    }

    /// Initiates the handshake toward the current peer (active role).
    pub fn connect(&mut self, now: Instant) -> Result<()> {
        let Some(peer) = self.peer else {
            return Err(Error::ErrNotConnected);
        };
        if self.connecting {
            info!("mediaflow: dtls_connect, already connecting ..");
            return Ok(());
        }
        self.connecting = true;
        self.ts_start = Some(now);

        info!(
            "mediaflow: dtls connect via {} to peer {}",
            peer.route.name(),
            peer.addr
        );

        let config = Arc::new(self.handshake_config(true)?);
        self.endpoint
            .connect(peer.addr, config, None)
            .map_err(Error::Shared)?;
        self.pump_transmits(now);
        Ok(())
    }

    /// Arms the passive side: the next ClientHello creates the server-side
    /// handshake.
    pub fn accept(&mut self, now: Instant) -> Result<()> {
        if !self.accepting {
            let config = Arc::new(self.handshake_config(false)?);
            self.endpoint.set_server_config(Some(config));
            self.accepting = true;
            self.ts_start = Some(now);
            info!("mediaflow: dtls accepted");
        }
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.connecting
    }

    /// Feeds one inbound DTLS record through the endpoint.
    pub fn handle_read(
        &mut self,
        now: Instant,
        remote: SocketAddr,
        data: BytesMut,
    ) -> Result<Vec<KeyingEvent>> {
        let events = self
            .endpoint
            .read(now, remote, None, None, data)
            .map_err(Error::Shared)?;
        self.pump_transmits(now);

        Ok(events
            .into_iter()
            .map(|event| match event {
                EndpointEvent::HandshakeComplete => KeyingEvent::HandshakeComplete,
                EndpointEvent::ApplicationData(data) => KeyingEvent::ApplicationData(data),
            })
            .collect())
    }

    /// Sends application data (SCTP) over the established session.
    pub fn write(&mut self, now: Instant, data: &[u8]) -> Result<()> {
        let Some(peer) = self.peer else {
            return Err(Error::ErrNotConnected);
        };
        self.endpoint
            .write(peer.addr, data)
            .map_err(Error::Shared)?;
        self.pump_transmits(now);
        Ok(())
    }

    /// Recomputes the remote certificate fingerprint and compares it to the
    /// one carried in the peer's description. A mismatch is fatal.
    pub fn verify_remote_fingerprint(
        &mut self,
        remote: SocketAddr,
        algorithm: &str,
        expected: &[u8],
    ) -> Result<()> {
        let state = self
            .endpoint
            .get_connection_state(remote)
            .ok_or(Error::ErrNotConnected)?;
        let cert = state
            .peer_certificates
            .first()
            .ok_or(Error::ErrAuthFailure)?;

        let actual: Vec<u8> = match algorithm {
            "sha-256" => Sha256::digest(cert).to_vec(),
            "sha-1" => Sha1::digest(cert).to_vec(),
            other => {
                warn!("mediaflow: dtls_srtp: unknown fingerprint '{other}'");
                return Err(Error::ErrAuthFailure);
            }
        };

        if actual.len() != expected.len() || actual != expected {
            warn!("mediaflow: dtls_srtp: {algorithm} fingerprint mismatch");
            return Err(Error::ErrAuthFailure);
        }

        info!("mediaflow: dtls_srtp: verified {algorithm} fingerprint OK");
        self.verified = true;
        Ok(())
    }

    pub fn connection_state(&self, remote: SocketAddr) -> Option<&dtls::state::State> {
        self.endpoint.get_connection_state(remote)
    }

    pub fn poll_transmit(&mut self) -> Option<TaggedBytesMut> {
        self.transmits.pop_front()
    }

    pub fn handle_timeout(&mut self, now: Instant) {
        let remotes: Vec<SocketAddr> = self.endpoint.get_connections_keys().copied().collect();
        for remote in remotes {
            let _ = self.endpoint.handle_timeout(remote, now);
        }
        self.pump_transmits(now);
    }

    pub fn poll_timeout(&self, now: Instant) -> Option<Instant> {
        let mut eto = now + Duration::from_secs(86400);
        let mut armed = false;
        for remote in self.endpoint.get_connections_keys() {
            let before = eto;
            if self.endpoint.poll_timeout(*remote, &mut eto).is_ok() && eto < before {
                armed = true;
            }
        }
        if armed {
            Some(eto)
        } else {
            None
        }
    }

    /// Closes the connection to the current peer, flushing the alert.
    pub fn close(&mut self, now: Instant) {
        let remotes: Vec<SocketAddr> = self.endpoint.get_connections_keys().copied().collect();
        for remote in remotes {
            debug!("mediaflow: dtls-connection closed ({remote})");
            let _ = self.endpoint.stop(remote);
        }
        self.pump_transmits(now);
        self.connecting = false;
    }

    fn pump_transmits(&mut self, _now: Instant) {
        while let Some(transmit) = self.endpoint.poll_transmit() {
            self.transmits.push_back(TaggedBytesMut {
                now: transmit.now,
                transport: TransportContext {
                    // the flow rewrites the destination to the dtls peer
                    local_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
                    peer_addr: transmit.transport.peer_addr,
                    ecn: transmit.transport.ecn,
                    transport_protocol: TransportProtocol::UDP,
                },
                message: transmit.message,
            });
        }
    }
}
