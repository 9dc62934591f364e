//! Server configuration.

use std::time::Duration;

use wayfinder_room::RoomSettings;
use wayfinder_session::NexusSettings;

/// Configuration for a Wayfinder server.
///
/// Everything has a default; override the fields you care about:
///
/// ```rust
/// use wayfinder::WayfinderConfig;
///
/// let config = WayfinderConfig {
///     bind_addr: "0.0.0.0:9001".to_string(),
///     ..WayfinderConfig::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct WayfinderConfig {
    /// Address the device-facing WebSocket listener binds to.
    pub bind_addr: String,
    /// How long a device gets to send its ready frame after connecting.
    pub handshake_timeout: Duration,
    /// Capacity of each per-device and per-room outbound queue.
    pub queue_capacity: usize,
    /// How often the reaper sweeps suspended sessions.
    pub reaper_sweep_interval: Duration,
    /// Sweeps a suspended session survives before it is destroyed.
    pub reaper_threshold: u32,
    /// Per-endpoint dial timeout when connecting to a room backend.
    pub connect_timeout: Duration,
    /// How often a sick room retries its endpoints.
    pub sick_retry_interval: Duration,
    /// How long cached exit tables stay fresh.
    pub exit_cache_ttl: Duration,
}

impl Default for WayfinderConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9001".to_string(),
            handshake_timeout: Duration::from_secs(10),
            queue_capacity: 64,
            reaper_sweep_interval: Duration::from_secs(60),
            reaper_threshold: 5,
            connect_timeout: Duration::from_secs(5),
            sick_retry_interval: Duration::from_secs(30),
            exit_cache_ttl: Duration::from_secs(300),
        }
    }
}

impl WayfinderConfig {
    pub(crate) fn room_settings(&self) -> RoomSettings {
        RoomSettings {
            connect_timeout: self.connect_timeout,
            sick_retry_interval: self.sick_retry_interval,
            exit_cache_ttl: self.exit_cache_ttl,
            queue_capacity: self.queue_capacity,
        }
    }

    pub(crate) fn nexus_settings(&self) -> NexusSettings {
        NexusSettings {
            queue_capacity: self.queue_capacity,
            reaper_sweep_interval: self.reaper_sweep_interval,
            reaper_threshold: self.reaper_threshold,
        }
    }
}
