use crate::error::RelayError;
use crate::relay::Relay;

/// Host the listener binds to when none is configured.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Port the listener binds to when none is configured.
pub const DEFAULT_PORT: u16 = 3490;

/// Pending-connection queue length passed to `listen`.
pub const DEFAULT_BACKLOG: u32 = 8;

/// Number of registry slots allocated up front.
pub const DEFAULT_INITIAL_CAPACITY: usize = 5;

/// Maximum number of bytes read from a client per readiness event.
///
/// Larger writes from a peer are forwarded as several chunks.
pub const DEFAULT_CHUNK_SIZE: usize = 256;

/// Settings used to bind and run a [`Relay`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Host name or address to resolve for the listener.
    pub host: String,
    /// TCP port to listen on. `0` lets the OS pick one.
    pub port: u16,
    /// Listen backlog.
    pub backlog: u32,
    /// Initial registry capacity.
    pub initial_capacity: usize,
    /// Receive chunk size.
    pub chunk_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            backlog: DEFAULT_BACKLOG,
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Builder for configuring and binding a relay.
///
/// # Examples
///
/// ```rust,ignore
/// let relay = RelayBuilder::new()
///     .host("127.0.0.1")
///     .port(0)
///     .bind()?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct RelayBuilder {
    config: RelayConfig,
}

impl RelayBuilder {
    /// Creates a builder holding the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the host name or address to resolve and bind.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Sets the port to listen on. `0` picks an ephemeral port.
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Sets the listen backlog.
    ///
    /// # Panics
    ///
    /// Panics if `backlog == 0`.
    pub fn backlog(mut self, backlog: u32) -> Self {
        assert!(backlog > 0, "backlog must be > 0");

        self.config.backlog = backlog;
        self
    }

    /// Sets the number of registry slots allocated up front.
    ///
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        assert!(capacity > 0, "initial_capacity must be > 0");

        self.config.initial_capacity = capacity;
        self
    }

    /// Sets the maximum number of bytes read per readiness event.
    ///
    /// # Panics
    ///
    /// Panics if `size == 0`.
    pub fn chunk_size(mut self, size: usize) -> Self {
        assert!(size > 0, "chunk_size must be > 0");

        self.config.chunk_size = size;
        self
    }

    /// Returns the configuration without binding anything.
    pub fn config(self) -> RelayConfig {
        self.config
    }

    /// Binds the listener and builds the relay.
    pub fn bind(self) -> Result<Relay, RelayError> {
        Relay::bind(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = RelayBuilder::new().config();

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3490);
        assert_eq!(config.backlog, 8);
        assert_eq!(config.initial_capacity, 5);
        assert_eq!(config.chunk_size, 256);
    }

    #[test]
    fn test_builder_overrides() {
        let config = RelayBuilder::new()
            .host("127.0.0.1")
            .port(0)
            .backlog(16)
            .initial_capacity(1)
            .chunk_size(4)
            .config();

        assert_eq!(
            config,
            RelayConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                backlog: 16,
                initial_capacity: 1,
                chunk_size: 4,
            }
        );
    }

    #[test]
    #[should_panic(expected = "chunk_size must be > 0")]
    fn test_zero_chunk_size_panics() {
        let _ = RelayBuilder::new().chunk_size(0);
    }

    #[test]
    #[should_panic(expected = "initial_capacity must be > 0")]
    fn test_zero_capacity_panics() {
        let _ = RelayBuilder::new().initial_capacity(0);
    }

    #[test]
    #[should_panic(expected = "backlog must be > 0")]
    fn test_zero_backlog_panics() {
        let _ = RelayBuilder::new().backlog(0);
    }
}
