//! Endpoint configuration
//!
//! Values can be built in code with [`Iax2ConfigBuilder`] or loaded from TOML:
//!
//! ```toml
//! listen_addr = "0.0.0.0:4569"
//! local_number = "2001"
//! local_name = "Front desk"
//! password = "s3cret"
//! preferred_codec = "ulaw"
//! supported_codecs = ["ulaw", "alaw", "gsm"]
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::{Codec, ConfiguredMediaFormats};
use crate::error::{Error, Result};

/// Well-known IAX2 UDP port
pub const DEFAULT_IAX2_PORT: u16 = 4569;

/// Endpoint configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Iax2Config {
    /// Address the UDP socket binds to
    pub listen_addr: SocketAddr,
    /// Number sent as `CallingNumber`
    pub local_number: String,
    /// Display name sent as `CallingName`
    pub local_name: String,
    /// Account sent as `Username` and expected from callers when set
    pub user_name: Option<String>,
    /// Shared secret; incoming calls must authenticate when set
    pub password: Option<String>,
    /// Dial plan context sent as `CalledContext`
    pub called_context: String,
    /// Codec advertised in `Format`
    pub preferred_codec: Codec,
    /// Local codecs in preference order
    pub supported_codecs: Vec<Codec>,
    /// Interval between Ping/LagRq probes on an established call
    pub status_check_interval_ms: u64,
    /// How long a call waits for the peer to answer a frame that expects a reply
    pub no_response_timeout_ms: u64,
    /// Granularity of the retransmission timer
    pub retransmit_tick_ms: u64,
    /// Demand a valid call token before accepting a `New`
    pub require_call_token: bool,
    /// Offer and accept AES-128 payload encryption
    pub encryption: bool,
}

impl Default for Iax2Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_IAX2_PORT)),
            local_number: String::new(),
            local_name: String::new(),
            user_name: None,
            password: None,
            called_context: "default".to_string(),
            preferred_codec: Codec::Ulaw,
            supported_codecs: vec![Codec::Ulaw, Codec::Alaw, Codec::Gsm],
            status_check_interval_ms: 10_000,
            no_response_timeout_ms: 60_000,
            retransmit_tick_ms: 50,
            require_call_token: false,
            encryption: false,
        }
    }
}

impl Iax2Config {
    pub fn builder() -> Iax2ConfigBuilder {
        Iax2ConfigBuilder::new()
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Iax2Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.supported_codecs.is_empty() {
            return Err(Error::Config("supported_codecs must not be empty".into()));
        }
        if !self.supported_codecs.contains(&self.preferred_codec) {
            return Err(Error::Config(format!(
                "preferred codec {} is not in supported_codecs",
                self.preferred_codec
            )));
        }
        if self.retransmit_tick_ms == 0 {
            return Err(Error::Config("retransmit_tick_ms must be positive".into()));
        }
        if self.status_check_interval_ms == 0 {
            return Err(Error::Config("status_check_interval_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn status_check_interval(&self) -> Duration {
        Duration::from_millis(self.status_check_interval_ms)
    }

    pub fn no_response_timeout(&self) -> Duration {
        Duration::from_millis(self.no_response_timeout_ms)
    }

    pub fn retransmit_tick(&self) -> Duration {
        Duration::from_millis(self.retransmit_tick_ms)
    }

    /// Media formats derived from the codec settings
    pub fn media_formats(&self) -> ConfiguredMediaFormats {
        ConfiguredMediaFormats::new(self.preferred_codec, self.supported_codecs.clone())
    }
}

/// Builder for [`Iax2Config`]
#[derive(Debug, Clone, Default)]
pub struct Iax2ConfigBuilder {
    config: Iax2Config,
}

impl Iax2ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listen_addr(mut self, addr: SocketAddr) -> Self {
        self.config.listen_addr = addr;
        self
    }

    pub fn local_number(mut self, number: impl Into<String>) -> Self {
        self.config.local_number = number.into();
        self
    }

    pub fn local_name(mut self, name: impl Into<String>) -> Self {
        self.config.local_name = name.into();
        self
    }

    pub fn user_name(mut self, user: impl Into<String>) -> Self {
        self.config.user_name = Some(user.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = Some(password.into());
        self
    }

    pub fn called_context(mut self, context: impl Into<String>) -> Self {
        self.config.called_context = context.into();
        self
    }

    /// Set the codec list; the first entry becomes the preferred codec
    pub fn codecs(mut self, codecs: Vec<Codec>) -> Self {
        if let Some(first) = codecs.first() {
            self.config.preferred_codec = *first;
        }
        self.config.supported_codecs = codecs;
        self
    }

    pub fn preferred_codec(mut self, codec: Codec) -> Self {
        self.config.preferred_codec = codec;
        self
    }

    pub fn status_check_interval(mut self, interval: Duration) -> Self {
        self.config.status_check_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn no_response_timeout(mut self, timeout: Duration) -> Self {
        self.config.no_response_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn retransmit_tick(mut self, tick: Duration) -> Self {
        self.config.retransmit_tick_ms = tick.as_millis() as u64;
        self
    }

    pub fn require_call_token(mut self, require: bool) -> Self {
        self.config.require_call_token = require;
        self
    }

    pub fn encryption(mut self, enable: bool) -> Self {
        self.config.encryption = enable;
        self
    }

    /// Validate and return the configuration
    pub fn build(self) -> Result<Iax2Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Iax2Config::default();
        assert_eq!(config.listen_addr.port(), 4569);
        assert_eq!(config.called_context, "default");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml() {
        let config = Iax2Config::from_toml_str(
            r#"
            listen_addr = "127.0.0.1:4570"
            local_number = "2001"
            password = "s3cret"
            preferred_codec = "gsm"
            supported_codecs = ["gsm", "ulaw"]
            require_call_token = true
            "#,
        )
        .unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:4570".parse().unwrap());
        assert_eq!(config.password.as_deref(), Some("s3cret"));
        assert_eq!(config.preferred_codec, Codec::Gsm);
        assert!(config.require_call_token);
        // untouched fields keep their defaults
        assert_eq!(config.no_response_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_validation_errors() {
        assert!(matches!(
            Iax2Config::from_toml_str("supported_codecs = []"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Iax2Config::from_toml_str("preferred_codec = \"ilbc\""),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Iax2Config::from_toml_str("listen_addr = 5"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_builder() {
        let config = Iax2Config::builder()
            .local_number("100")
            .codecs(vec![Codec::Alaw, Codec::Ulaw])
            .no_response_timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        assert_eq!(config.preferred_codec, Codec::Alaw);
        assert_eq!(config.no_response_timeout_ms, 5000);
        assert!(Iax2Config::builder().codecs(vec![]).build().is_err());
    }
}
