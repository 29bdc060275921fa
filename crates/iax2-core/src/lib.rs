//! IAX2 (Inter-Asterisk eXchange v2) protocol engine for the rvoip stack
//!
//! This crate implements the IAX2 signalling and media framing over a single
//! UDP socket: frame and information element codecs, reliable delivery of full
//! frames, call token and MD5 authentication, AES-128 payload encryption and a
//! per-call state machine.
//!
//! ```no_run
//! use rvoip_iax2_core::prelude::*;
//!
//! # async fn example() -> Result<()> {
//! let config = Iax2Config::builder()
//!     .listen_addr("0.0.0.0:4569".parse().unwrap())
//!     .local_number("2000")
//!     .build()?;
//! let (endpoint, mut events) = Iax2Endpoint::bind(config).await?;
//! let call = endpoint.make_call("192.0.2.7:4569".parse().unwrap(), "100")?;
//! while let Some(event) = events.recv().await {
//!     if let Iax2Event::CallEstablished { call_id } = event {
//!         endpoint.send_dtmf(call_id, '1')?;
//!         endpoint.hangup(call, "done")?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod call;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod frame;
pub mod ie;
pub mod reliability;
pub mod transport;
pub mod wire;

// Re-export commonly used types
pub use call::{CallDirection, CallPhase};
pub use codec::{Codec, CodecSet, ConfiguredMediaFormats, MediaFormatProvider};
pub use config::{Iax2Config, Iax2ConfigBuilder, DEFAULT_IAX2_PORT};
pub use endpoint::Iax2Endpoint;
pub use error::{Error, Result};
pub use events::{CallId, Iax2Event};
pub use frame::{Frame, FullFrame, MiniFrame};

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::{
        CallDirection, CallId, CallPhase, Codec, CodecSet, Error, Iax2Config, Iax2Endpoint,
        Iax2Event, MediaFormatProvider, Result,
    };
}
