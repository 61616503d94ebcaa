use std::fmt;

/// Describes one codec the host can run. The engine never encodes or
/// decodes media itself; descriptors only populate the SDP format lines and
/// name the codec picked during negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecDescriptor {
    pub name: String,
    pub payload_type: u8,
    pub clock_rate: u32,
    pub channels: u16,
    pub fmtp: Option<String>,
}

impl CodecDescriptor {
    pub fn audio(name: &str, payload_type: u8, clock_rate: u32, channels: u16) -> Self {
        Self {
            name: name.to_owned(),
            payload_type,
            clock_rate,
            channels,
            fmtp: None,
        }
    }

    /// Video formats are always 90 kHz, single channel.
    pub fn video(name: &str, payload_type: u8) -> Self {
        Self {
            name: name.to_owned(),
            payload_type,
            clock_rate: 90000,
            channels: 1,
            fmtp: None,
        }
    }

    pub fn with_fmtp(mut self, fmtp: &str) -> Self {
        self.fmtp = Some(fmtp.to_owned());
        self
    }

    /// `a=rtpmap` encoding of this codec.
    pub(crate) fn rtpmap(&self) -> String {
        if self.channels > 1 {
            format!(
                "{} {}/{}/{}",
                self.payload_type, self.name, self.clock_rate, self.channels
            )
        } else {
            format!("{} {}/{}", self.payload_type, self.name, self.clock_rate)
        }
    }
}

impl fmt::Display for CodecDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.name, self.clock_rate, self.channels)
    }
}
