#![warn(rust_2018_idioms)]
#![allow(dead_code)]

pub mod agent;
pub mod candidate;
pub mod codec;
pub mod constants;
pub mod datachannel;
pub mod demux;
pub mod error;
pub mod flow;
pub mod keying;
pub mod negotiation;
pub mod relay;
pub mod stats;
pub mod transform;

pub use error::{Error, Result};
pub use flow::{Mediaflow, MediaflowConfig, MediaflowEvent, MediaflowMessage};
pub use shared::{TaggedBytesMut, TransportContext, TransportProtocol};
