//! Server configuration
//!
//! Queue sizing and the failure policies that govern how per-client
//! faults and slow recipients are handled.

use std::time::Duration;

/// Default listen / connect address
pub const DEFAULT_ADDR: &str = "127.0.0.1:8000";

/// Capacity of each session's outbound queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// Capacity of each of the hub's event queues
pub const DEFAULT_EVENT_CAPACITY: usize = 10;

/// Consecutive transient read errors tolerated before a connection is dropped
pub const DEFAULT_MAX_READ_RETRIES: u32 = 3;

/// How per-connection decode and write failures are scoped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultPolicy {
    /// Terminate only the offending connection
    #[default]
    Isolate,
    /// Stop the whole server (legacy compatibility)
    Strict,
}

/// What the hub does when a recipient's outbound queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum FanoutPolicy {
    /// Wait for room; one stalled client delays delivery to everyone
    #[default]
    Block,
    /// Drop the message for that recipient only
    DropNewest,
    /// Remove the stalled client from the registry
    Disconnect,
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind
    pub addr: String,
    /// Outbound queue capacity per session
    pub queue_capacity: usize,
    /// Capacity of the broadcast / entering / leaving queues
    pub event_capacity: usize,
    /// Scope of decode and write failures
    pub fault_policy: FaultPolicy,
    /// Handling of full recipient queues
    pub fanout_policy: FanoutPolicy,
    /// Consecutive transient read errors tolerated per connection
    pub max_read_retries: u32,
    /// Pause between transient read retries
    pub read_retry_delay: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            fault_policy: FaultPolicy::default(),
            fanout_policy: FanoutPolicy::default(),
            max_read_retries: DEFAULT_MAX_READ_RETRIES,
            read_retry_delay: Duration::from_millis(50),
        }
    }
}

impl ServerConfig {
    /// Whether strict compatibility mode is on
    pub fn is_strict(&self) -> bool {
        self.fault_policy == FaultPolicy::Strict
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_sizing() {
        let config = ServerConfig::default();
        assert_eq!(config.addr, "127.0.0.1:8000");
        assert_eq!(config.queue_capacity, 10);
        assert_eq!(config.event_capacity, 10);
        assert_eq!(config.fanout_policy, FanoutPolicy::Block);
        assert!(!config.is_strict());
    }
}
