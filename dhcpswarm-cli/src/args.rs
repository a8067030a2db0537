//! Command-line argument surface
//!
//! The arguments fold into one immutable [`SimConfig`] which is all the
//! rest of the simulator ever sees.

use std::net::Ipv4Addr;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use dhcpswarm_core::{RetryPolicy, RunMode, SimConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    V4,
    V6,
    Dual,
}

impl From<ModeArg> for RunMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::V4 => RunMode::V4,
            ModeArg::V6 => RunMode::V6,
            ModeArg::Dual => RunMode::Dual,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "dhcpswarm")]
#[command(author, version, about = "Concurrent DHCP client swarm simulator", long_about = None)]
pub struct Cli {
    /// Network interface to open the raw channel on
    #[arg(short, long)]
    pub interface: String,

    /// Protocol family to exercise
    #[arg(short, long, value_enum, default_value_t = ModeArg::V4)]
    pub mode: ModeArg,

    /// Number of simulated clients
    #[arg(short, long, default_value_t = 50)]
    pub clients: usize,

    /// Ceiling on simultaneously active sessions
    #[arg(short = 'j', long, default_value_t = 10)]
    pub concurrency: usize,

    /// Seconds a bound client holds its lease before releasing it
    #[arg(long, default_value_t = 30)]
    pub hold: u64,

    /// Expected DHCPv4 server address, logged alongside the probe
    #[arg(long)]
    pub server: Option<Ipv4Addr>,

    /// Seconds to wait for the server to answer the readiness probe
    #[arg(long, default_value_t = 30)]
    pub server_wait: u64,

    /// Skip the readiness probe and launch immediately
    #[arg(long)]
    pub no_probe: bool,

    /// Base reply-wait window in seconds, doubling per attempt
    #[arg(long, default_value_t = 4)]
    pub retry_base: u64,

    /// Ceiling on the reply-wait window in seconds
    #[arg(long, default_value_t = 64)]
    pub retry_cap: u64,

    /// Send attempts per exchange phase
    #[arg(long, default_value_t = 4)]
    pub retry_attempts: u32,

    /// Full exchange restarts allowed after server rejections
    #[arg(long, default_value_t = 3)]
    pub max_restarts: u32,

    /// Seconds granted to the shutdown release pass
    #[arg(long, default_value_t = 5)]
    pub grace: u64,

    /// Log filter used when RUST_LOG is not set
    #[arg(short, long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    /// Fold the argument surface into the immutable run configuration
    pub fn into_config(self) -> SimConfig {
        let server_wait = if self.no_probe {
            None
        } else {
            Some(Duration::from_secs(self.server_wait))
        };
        let retry = RetryPolicy::new(
            Duration::from_secs(self.retry_base),
            Duration::from_secs(self.retry_cap),
            self.retry_attempts,
            self.max_restarts,
        );
        let mut config = SimConfig::new(self.interface)
            .with_mode(self.mode.into())
            .with_clients(self.clients)
            .with_concurrency(self.concurrency)
            .with_hold(Duration::from_secs(self.hold))
            .with_server_wait(server_wait)
            .with_retry(retry)
            .with_grace(Duration::from_secs(self.grace));
        if let Some(server) = self.server {
            config = config.with_server_v4(server);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults_fold_into_config() {
        let cli = Cli::try_parse_from(["dhcpswarm", "--interface", "eth0"]).unwrap();
        let config = cli.into_config();

        assert_eq!(config.interface, "eth0");
        assert_eq!(config.mode, RunMode::V4);
        assert_eq!(config.total_clients, 50);
        assert_eq!(config.max_concurrent, 10);
        assert_eq!(config.hold, Duration::from_secs(30));
        assert_eq!(config.server_wait, Some(Duration::from_secs(30)));
        assert_eq!(config.grace, Duration::from_secs(5));
        assert_eq!(config.retry, RetryPolicy::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_mode_values_parse() {
        for (value, mode) in [
            ("v4", RunMode::V4),
            ("v6", RunMode::V6),
            ("dual", RunMode::Dual),
        ] {
            let cli =
                Cli::try_parse_from(["dhcpswarm", "-i", "eth0", "--mode", value]).unwrap();
            assert_eq!(RunMode::from(cli.mode), mode);
        }
    }

    #[test]
    fn test_no_probe_clears_the_wait_budget() {
        let cli = Cli::try_parse_from(["dhcpswarm", "-i", "eth0", "--no-probe"]).unwrap();
        assert_eq!(cli.into_config().server_wait, None);
    }

    #[test]
    fn test_retry_flags_build_the_policy() {
        let cli = Cli::try_parse_from([
            "dhcpswarm",
            "-i",
            "eth0",
            "--retry-base",
            "2",
            "--retry-cap",
            "16",
            "--retry-attempts",
            "5",
            "--max-restarts",
            "1",
        ])
        .unwrap();
        let config = cli.into_config();
        assert_eq!(
            config.retry,
            RetryPolicy::new(Duration::from_secs(2), Duration::from_secs(16), 5, 1)
        );
    }

    #[test]
    fn test_server_address_is_optional() {
        let cli =
            Cli::try_parse_from(["dhcpswarm", "-i", "eth0", "--server", "192.168.1.1"]).unwrap();
        assert_eq!(
            cli.into_config().server_v4,
            Some("192.168.1.1".parse().unwrap())
        );

        let cli = Cli::try_parse_from(["dhcpswarm", "-i", "eth0"]).unwrap();
        assert_eq!(cli.into_config().server_v4, None);
    }

    #[test]
    fn test_interface_is_required() {
        assert!(Cli::try_parse_from(["dhcpswarm"]).is_err());
    }
}
