
use bytes::{BufMut, BytesMut};
use log::{debug, info, warn};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sctp::{
    Association, AssociationHandle, DatagramEvent, Event, Payload, PayloadProtocolIdentifier,
    StreamEvent,
};

use crate::error::{Error, Result};
use rtcp::header::{Header, PacketType};
use shared::error::Error as SharedError;
use shared::marshal::{Marshal, Unmarshal};
use shared::TransportProtocol;

/// Four byte name of the RTCP APP packets that carry SCTP in SDES mode.
pub(crate) const APP_LABEL: [u8; 4] = *b"DATA";

const SCTP_STREAM_ID: u16 = 0;
const SCTP_PORT: u16 = 5000;
const MAX_MESSAGE_SIZE: u32 = 65536;

pub enum DataChannelEvent {
    /// The SCTP association is up.
    Established,
    /// One application message from the peer.
    Message(BytesMut),
}

/// Drives a single SCTP association whose datagrams ride on an established
/// DTLS session, or inside RTCP APP packets when the session negotiated
/// SDES. The active endpoint connects, the passive one accepts.
pub struct DataChannelDriver {
    endpoint: Option<sctp::Endpoint>,
    associations: HashMap<AssociationHandle, Association>,

    is_started: bool,
    active: bool,
    ready: bool,
    ts_connect: Option<Instant>,
    established_at: Option<Instant>,

    remote: Option<SocketAddr>,
    internal_buffer: Vec<u8>,

    transmits: VecDeque<BytesMut>,
    events: VecDeque<DataChannelEvent>,
}

impl Default for DataChannelDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl DataChannelDriver {
    pub fn new() -> Self {
        Self {
            endpoint: None,
            associations: HashMap::new(),
            is_started: false,
            active: false,
            ready: false,
            ts_connect: None,
            established_at: None,
            remote: None,
            internal_buffer: vec![0u8; MAX_MESSAGE_SIZE as usize],
            transmits: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Time from `connect` to the association coming up.
    pub fn establish_duration(&self) -> Option<Duration> {
        match (self.ts_connect, self.established_at) {
            (Some(start), Some(end)) => Some(end.saturating_duration_since(start)),
            _ => None,
        }
    }

    /// Brings up the SCTP endpoint. The active side initiates, the passive
    /// side waits for the peer's INIT.
    pub fn connect(&mut self, now: Instant, active: bool, remote: SocketAddr) -> Result<()> {
        if self.is_started {
            return Ok(());
        }
        self.is_started = true;
        self.active = active;
        self.remote = Some(remote);
        self.ts_connect = Some(now);

        info!("mediaflow: dce: connecting.. (active={active})");

        let endpoint_config = sctp::EndpointConfig::default();
        let transport_config = sctp::TransportConfig::default()
            .with_max_message_size(MAX_MESSAGE_SIZE)
            .with_sctp_port(SCTP_PORT);

        if active {
            let mut endpoint = sctp::Endpoint::new(
                "127.0.0.1:0".parse().unwrap(), // local_addr doesn't matter
                TransportProtocol::UDP,         // TransportProtocol doesn't matter
                Arc::new(endpoint_config),
                None,
            );

            let mut client_config = sctp::ClientConfig::default();
            client_config.transport = Arc::new(transport_config);
            let (handle, association) = endpoint
                .connect(client_config, remote)
                .map_err(|e| Error::Other(e.to_string()))?;
            self.associations.insert(handle, association);
            self.endpoint = Some(endpoint);
            self.pump(now);
        } else {
            self.endpoint = Some(sctp::Endpoint::new(
                "127.0.0.1:0".parse().unwrap(),
                TransportProtocol::UDP,
                Arc::new(endpoint_config),
                Some(Arc::new(sctp::ServerConfig::new(transport_config))),
            ));
        }

        Ok(())
    }

    /// Feeds one raw SCTP datagram received from the carrier.
    pub fn handle_carrier_read(&mut self, now: Instant, data: BytesMut) -> Result<()> {
        let remote = self.remote.ok_or(Error::ErrNotConnected)?;
        let endpoint = self
            .endpoint
            .as_mut()
            .ok_or(Error::Shared(SharedError::ErrSCTPNotEstablished))?;

        if let Some((handle, event)) = endpoint.handle(now, remote, None, data.freeze()) {
            match event {
                DatagramEvent::NewAssociation(association) => {
                    debug!("mediaflow: dce: new inbound association");
                    self.associations.insert(handle, association);
                }
                DatagramEvent::AssociationEvent(event) => {
                    if let Some(association) = self.associations.get_mut(&handle) {
                        association.handle_event(event);
                    }
                }
            }
        }

        self.pump(now);
        Ok(())
    }

    /// Sends one application message to the peer.
    pub fn send(&mut self, now: Instant, data: &[u8]) -> Result<()> {
        if data.len() > self.internal_buffer.len() {
            return Err(Error::Shared(SharedError::ErrOutboundPacketTooLarge));
        }
        if !self.ready {
            return Err(Error::ErrNotReady);
        }

        info!("mediaflow: sending DCE packet: {}", data.len());

        for association in self.associations.values_mut() {
            let mut stream = match association.stream(SCTP_STREAM_ID) {
                Ok(stream) => stream,
                Err(_) => association
                    .open_stream(SCTP_STREAM_ID, PayloadProtocolIdentifier::Binary)
                    .map_err(|e| Error::Other(e.to_string()))?,
            };
            stream
                .write_with_ppi(data, PayloadProtocolIdentifier::Binary)
                .map_err(Error::Shared)?;
        }

        self.pump(now);
        Ok(())
    }

    pub fn poll_transmit(&mut self) -> Option<BytesMut> {
        self.transmits.pop_front()
    }

    pub fn poll_event(&mut self) -> Option<DataChannelEvent> {
        self.events.pop_front()
    }

    pub fn poll_timeout(&self) -> Option<Instant> {
        let mut eto: Option<Instant> = None;
        for association in self.associations.values() {
            if let Some(timeout) = association.poll_timeout() {
                if eto.map(|e| timeout < e).unwrap_or(true) {
                    eto = Some(timeout);
                }
            }
        }
        eto
    }

    pub fn handle_timeout(&mut self, now: Instant) {
        for association in self.associations.values_mut() {
            association.handle_timeout(now);
        }
        self.pump(now);
    }

    pub fn close(&mut self) {
        self.associations.clear();
        self.endpoint = None;
        self.ready = false;
        self.is_started = false;
    }

    fn pump(&mut self, now: Instant) {
        let Some(endpoint) = self.endpoint.as_mut() else {
            return;
        };

        let mut endpoint_events = vec![];
        let mut established = false;

        for (handle, association) in self.associations.iter_mut() {
            while let Some(event) = association.poll() {
                match event {
                    Event::Connected => {
                        established = true;
                    }
                    Event::Stream(StreamEvent::Readable { id }) => {
                        if let Ok(mut stream) = association.stream(id) {
                            while let Ok(Some(chunks)) = stream.read_sctp() {
                                if let Ok(n) = chunks.read(&mut self.internal_buffer) {
                                    self.events.push_back(DataChannelEvent::Message(
                                        BytesMut::from(&self.internal_buffer[0..n]),
                                    ));
                                }
                            }
                        }
                    }
                    Event::AssociationLost { reason, .. } => {
                        warn!("mediaflow: dce: association lost: {reason}");
                    }
                    _ => {}
                }
            }

            while let Some(event) = association.poll_endpoint_event() {
                endpoint_events.push((*handle, event));
            }

            while let Some(transmit) = association.poll_transmit(now) {
                if let Payload::RawEncode(raw_data) = transmit.message {
                    for raw in raw_data {
                        self.transmits.push_back(BytesMut::from(&raw[..]));
                    }
                }
            }
        }

        for (handle, event) in endpoint_events {
            endpoint.handle_event(handle, event);
            self.associations.remove(&handle);
        }

        if established && !self.ready {
            self.ready = true;
            self.established_at = Some(now);
            info!("mediaflow: dce established");
            self.events.push_back(DataChannelEvent::Established);
        }
    }
}

/// Wraps one SCTP datagram in an RTCP APP packet named "DATA".
pub(crate) fn encode_app(payload: &[u8]) -> Result<BytesMut> {
    let pad = (4 - payload.len() % 4) % 4;
    let total = 12 + payload.len() + pad;

    let header = Header {
        padding: pad > 0,
        count: 0,
        packet_type: PacketType::ApplicationDefined,
        length: (total / 4 - 1) as u16,
    };

    let mut pkt = BytesMut::with_capacity(total);
    let raw = header.marshal().map_err(Error::Shared)?;
    pkt.extend_from_slice(&raw);
    pkt.put_u32(0); // sender SSRC
    pkt.extend_from_slice(&APP_LABEL);
    pkt.extend_from_slice(payload);
    if pad > 0 {
        for _ in 0..pad - 1 {
            pkt.put_u8(0);
        }
        pkt.put_u8(pad as u8);
    }
    Ok(pkt)
}

/// Returns the payload of an RTCP APP packet named "DATA", or `None` when
/// the packet is some other RTCP.
pub(crate) fn decode_app(data: &[u8]) -> Option<BytesMut> {
    if data.len() < 12 {
        return None;
    }
    let mut buf = &data[..];
    let header = Header::unmarshal(&mut buf).ok()?;
    if header.packet_type != PacketType::ApplicationDefined {
        return None;
    }
    if data[8..12] != APP_LABEL {
        warn!("mediaflow: invalid app name {:?}", &data[8..12]);
        return None;
    }

    let mut end = data.len();
    if header.padding {
        let pad = data[end - 1] as usize;
        if pad == 0 || pad > end - 12 {
            return None;
        }
        end -= pad;
    }
    Some(BytesMut::from(&data[12..end]))
}
