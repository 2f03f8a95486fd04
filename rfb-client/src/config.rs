//! Configuration types for the VNC client.

use crate::errors::RfbClientError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Complete VNC client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    pub connection: ConnectionConfig,
    /// Display settings.
    pub display: DisplayConfig,
    /// Security settings.
    pub security: SecurityConfig,
    /// Input settings.
    pub input: InputConfig,
    /// Reconnection settings.
    pub reconnect: ReconnectConfig,
}

/// Connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Server hostname or IP address.
    pub host: String,
    /// Server port (typically 5900 + display number).
    pub port: u16,
    /// VNC password (if required). Used by VNC-DES, MS-Logon and ARD auth.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Username, required by MS-Logon, ARD and SASL auth.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Connection timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Shared-session flag sent in `ClientInit`: request a non-exclusive
    /// session that other viewers may join concurrently. The wire protocol
    /// only carries this once, at connection setup; it cannot be changed
    /// mid-session (see `ClientCommand::SetShared`'s doc comment).
    #[serde(default = "default_true")]
    pub shared: bool,
}

fn default_timeout_ms() -> u64 {
    10_000
}

/// Display configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Preferred encodings in priority order.
    #[serde(default = "default_encodings")]
    pub encodings: Vec<i32>,
    /// JPEG quality (0-9), if applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,
    /// Compression level (0-9), if applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression: Option<u8>,
    /// Pixel format to request via `SetPixelFormat`.
    ///
    /// `None` keeps whatever format the server advertises in `ServerInit`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pixel_format: Option<PixelFormatConfig>,
    /// Pixel format the local framebuffer stores decoded pixels in, independent
    /// of the wire format negotiated with the server. `None` defaults to
    /// host-native RGB888.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_pixel_format: Option<PixelFormatConfig>,
}

impl DisplayConfig {
    /// Resolves the local framebuffer's pixel format, defaulting to RGB888.
    pub fn resolved_local_pixel_format(&self) -> rfb_pixelbuffer::PixelFormat {
        self.local_pixel_format
            .map(Into::into)
            .unwrap_or_else(rfb_pixelbuffer::PixelFormat::rgb888)
    }
}

/// Serializable mirror of [`rfb_pixelbuffer::PixelFormat`] for configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelFormatConfig {
    pub bits_per_pixel: u8,
    pub depth: u8,
    pub big_endian: bool,
    pub true_color: bool,
    pub red_max: u16,
    pub green_max: u16,
    pub blue_max: u16,
    pub red_shift: u8,
    pub green_shift: u8,
    pub blue_shift: u8,
}

impl From<PixelFormatConfig> for rfb_pixelbuffer::PixelFormat {
    fn from(cfg: PixelFormatConfig) -> Self {
        rfb_pixelbuffer::PixelFormat {
            bits_per_pixel: cfg.bits_per_pixel,
            depth: cfg.depth,
            big_endian: cfg.big_endian,
            true_color: cfg.true_color,
            red_max: cfg.red_max,
            green_max: cfg.green_max,
            blue_max: cfg.blue_max,
            red_shift: cfg.red_shift,
            green_shift: cfg.green_shift,
            blue_shift: cfg.blue_shift,
        }
    }
}

fn default_encodings() -> Vec<i32> {
    // Minimal, known-good baseline encodings: Raw(0), CopyRect(1), ZRLE(16)
    vec![
        rfb_encodings::ENCODING_RAW,
        rfb_encodings::ENCODING_COPY_RECT,
        rfb_encodings::ENCODING_ZRLE,
    ]
}

/// Security configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// TLS configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
    /// View-only mode (no input sent to server).
    #[serde(default)]
    pub view_only: bool,
    /// Path to a PEM client certificate, used by VeNCrypt's X.509 subtypes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_cert_file: Option<PathBuf>,
    /// Path to the PEM private key matching `client_cert_file`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_key_file: Option<PathBuf>,
    /// Preferred SASL mechanism, in case the server offers several.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sasl_mechanism: Option<String>,
}

/// TLS configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Enable TLS encryption.
    pub enabled: bool,
    /// Server name for certificate validation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    /// Path to CA certificate file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<PathBuf>,
    /// Skip certificate validation (DANGEROUS - use only for testing).
    #[serde(default)]
    pub danger_accept_invalid_certs: bool,
}

/// Input configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Pointer event rate limit in Hz.
    #[serde(default = "default_pointer_rate_hz")]
    pub pointer_rate_hz: u32,
    /// Enable pointer event throttling.
    #[serde(default = "default_true")]
    pub pointer_throttle: bool,
}

fn default_pointer_rate_hz() -> u32 {
    60
}

fn default_true() -> bool {
    true
}

/// Reconnection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Enable automatic reconnection.
    #[serde(default)]
    pub enabled: bool,
    /// Maximum number of retry attempts (0 = infinite).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Initial backoff duration in milliseconds.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Maximum backoff duration in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Jitter factor (0.0-1.0) for backoff randomization.
    #[serde(default = "default_jitter")]
    pub jitter: f32,
}

fn default_max_retries() -> u32 {
    5
}

fn default_backoff_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_jitter() -> f32 {
    0.1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig {
                host: String::new(),
                port: 5900,
                password: None,
                username: None,
                timeout_ms: default_timeout_ms(),
                shared: default_true(),
            },
            display: DisplayConfig {
                encodings: default_encodings(),
                quality: None,
                compression: None,
                pixel_format: None,
                local_pixel_format: None,
            },
            security: SecurityConfig {
                tls: None,
                view_only: false,
                client_cert_file: None,
                client_key_file: None,
                sasl_mechanism: None,
            },
            input: InputConfig {
                pointer_rate_hz: default_pointer_rate_hz(),
                pointer_throttle: default_true(),
            },
            reconnect: ReconnectConfig {
                enabled: false,
                max_retries: default_max_retries(),
                backoff_ms: default_backoff_ms(),
                max_backoff_ms: default_max_backoff_ms(),
                jitter: default_jitter(),
            },
        }
    }
}

impl Config {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<(), RfbClientError> {
        // Validate host
        if self.connection.host.is_empty() {
            return Err(RfbClientError::Config("Host cannot be empty".to_string()));
        }

        // Validate port
        if self.connection.port == 0 {
            return Err(RfbClientError::Config("Port cannot be 0".to_string()));
        }

        // Validate encodings
        if self.display.encodings.is_empty() {
            return Err(RfbClientError::Config(
                "At least one encoding must be specified".to_string(),
            ));
        }

        // Validate jitter
        if !(0.0..=1.0).contains(&self.reconnect.jitter) {
            return Err(RfbClientError::Config(
                "Jitter must be between 0.0 and 1.0".to_string(),
            ));
        }

        Ok(())
    }

    /// Returns the connection timeout duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.connection.timeout_ms)
    }

    /// Returns the encodings to advertise in `SetEncodings`, in preference order.
    ///
    /// Omits ZRLE when `server_format` is a "broken" 32-bit truecolour format
    /// (depth 32 with any channel max above 255) — a documented RealVNC
    /// server-side bug this client works around by not offering ZRLE at all
    /// rather than risk sending the server a format it can't reduce to CPIXEL.
    #[must_use]
    pub fn effective_encodings(&self, server_format: Option<&rfb_pixelbuffer::PixelFormat>) -> Vec<i32> {
        let omit_zrle = server_format.is_some_and(|f| {
            f.depth == 32 && (f.red_max > 255 || f.green_max > 255 || f.blue_max > 255)
        });

        self.display
            .encodings
            .iter()
            .copied()
            .filter(|&enc| !(omit_zrle && enc == rfb_encodings::ENCODING_ZRLE))
            .collect()
    }
}

/// Builder for creating a `Config`.
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Sets the server hostname or IP address.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.connection.host = host.into();
        self
    }

    /// Sets the server port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.connection.port = port;
        self
    }

    /// Sets the VNC password.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.connection.password = Some(password.into());
        self
    }

    /// Sets the username (MS-Logon, ARD, SASL).
    #[must_use]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.config.connection.username = Some(username.into());
        self
    }

    /// Sets the shared-session flag sent in `ClientInit` (defaults to `true`).
    #[must_use]
    pub fn shared(mut self, shared: bool) -> Self {
        self.config.connection.shared = shared;
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self) -> Result<Config, RfbClientError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = Config::builder()
            .host("localhost")
            .port(5900)
            .build()
            .unwrap();

        assert_eq!(config.connection.host, "localhost");
        assert_eq!(config.connection.port, 5900);
        assert!(config.connection.shared);
    }

    #[test]
    fn test_config_builder_shared_false() {
        let config = Config::builder()
            .host("localhost")
            .port(5900)
            .shared(false)
            .build()
            .unwrap();

        assert!(!config.connection.shared);
    }

    #[test]
    fn test_config_validation_empty_host() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_port() {
        let mut config = Config::default();
        config.connection.host = "localhost".to_string();
        config.connection.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_invalid_jitter() {
        let mut config = Config::default();
        config.connection.host = "localhost".to_string();
        config.reconnect.jitter = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_effective_encodings_baseline() {
        let config = Config::default();
        let encodings = config.effective_encodings(None);
        assert_eq!(encodings.len(), 3);
        assert_eq!(encodings[0], rfb_encodings::ENCODING_RAW);
        assert_eq!(encodings[1], rfb_encodings::ENCODING_COPY_RECT);
        assert_eq!(encodings[2], rfb_encodings::ENCODING_ZRLE);
    }

    #[test]
    fn test_effective_encodings_omits_zrle_for_broken_format() {
        let config = Config::default();
        let mut broken = rfb_pixelbuffer::PixelFormat::rgb888();
        broken.depth = 32;
        broken.red_max = 1023;
        let encodings = config.effective_encodings(Some(&broken));
        assert!(!encodings.contains(&rfb_encodings::ENCODING_ZRLE));
        assert!(encodings.contains(&rfb_encodings::ENCODING_RAW));
    }

    #[test]
    fn test_effective_encodings_keeps_zrle_for_normal_format() {
        let config = Config::default();
        let normal = rfb_pixelbuffer::PixelFormat::rgb888();
        let encodings = config.effective_encodings(Some(&normal));
        assert!(encodings.contains(&rfb_encodings::ENCODING_ZRLE));
    }
}
