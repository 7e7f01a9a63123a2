//! Command-line interface
//!
//! The first positional argument selects the role: the literal `runserver`
//! starts the server, anything else is taken as a userid and starts the
//! console client.

use clap::Parser;

use crate::config::{
    FanoutPolicy, FaultPolicy, ServerConfig, DEFAULT_ADDR, DEFAULT_EVENT_CAPACITY,
    DEFAULT_MAX_READ_RETRIES, DEFAULT_QUEUE_CAPACITY,
};

/// Literal first argument that selects the server role
pub const RUN_SERVER: &str = "runserver";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// `runserver` to start the server, otherwise the userid to log in as
    pub target: String,

    /// Address to listen on (server) or connect to (client)
    #[arg(long, default_value = DEFAULT_ADDR)]
    pub addr: String,

    /// Outbound queue capacity per client
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// Capacity of the hub's event queues
    #[arg(long, default_value_t = DEFAULT_EVENT_CAPACITY)]
    pub event_capacity: usize,

    /// Policy for recipients whose outbound queue is full
    #[arg(long, value_enum, default_value_t = FanoutPolicy::Block)]
    pub fanout: FanoutPolicy,

    /// Stop the whole server on a malformed packet or failed write
    #[arg(long)]
    pub strict: bool,

    /// Consecutive transient read errors tolerated per connection
    #[arg(long, default_value_t = DEFAULT_MAX_READ_RETRIES)]
    pub max_read_retries: u32,
}

/// Selected process role
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Server(ServerConfig),
    Client { userid: String, addr: String },
}

impl Cli {
    /// Resolve the role and its configuration
    pub fn role(self) -> Role {
        if self.target == RUN_SERVER {
            let fault_policy = if self.strict {
                FaultPolicy::Strict
            } else {
                FaultPolicy::Isolate
            };
            Role::Server(ServerConfig {
                addr: self.addr,
                queue_capacity: self.queue_capacity.max(1),
                event_capacity: self.event_capacity.max(1),
                fault_policy,
                fanout_policy: self.fanout,
                max_read_retries: self.max_read_retries,
                ..ServerConfig::default()
            })
        } else {
            Role::Client {
                userid: self.target,
                addr: self.addr,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runserver_selects_server() {
        let cli = Cli::parse_from(["linechat", "runserver", "--strict", "--fanout", "drop-newest"]);
        match cli.role() {
            Role::Server(config) => {
                assert!(config.is_strict());
                assert_eq!(config.fanout_policy, FanoutPolicy::DropNewest);
                assert_eq!(config.addr, DEFAULT_ADDR);
            }
            other => panic!("Wrong role: {:?}", other),
        }
    }

    #[test]
    fn test_userid_selects_client() {
        let cli = Cli::parse_from(["linechat", "alice", "--addr", "127.0.0.1:9000"]);
        assert_eq!(
            cli.role(),
            Role::Client {
                userid: "alice".to_string(),
                addr: "127.0.0.1:9000".to_string(),
            }
        );
    }

    #[test]
    fn test_missing_target_is_rejected() {
        assert!(Cli::try_parse_from(["linechat"]).is_err());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let cli = Cli::parse_from(["linechat", "runserver", "--queue-capacity", "0"]);
        match cli.role() {
            Role::Server(config) => assert_eq!(config.queue_capacity, 1),
            other => panic!("Wrong role: {:?}", other),
        }
    }
}
