//! SplitSocket drill
//!
//! Opens simulated connections, stacks shutdown hooks on them and tears them
//! down, logging every hook failure along the way.

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

mod drill;

use drill::{Drill, DrillConfig};

/// Connection lifecycle drill
#[derive(Parser, Debug)]
#[command(name = "splitsocket-drill")]
#[command(about = "Drive simulated connections through graceful shutdown", long_about = None)]
struct Args {
    /// Simulated connections to open
    #[arg(long, default_value_t = 4)]
    connections: usize,

    /// Shutdown hooks registered per connection
    #[arg(long, default_value_t = 3)]
    hooks: usize,

    /// Every Nth hook suspends before finishing (0 disables)
    #[arg(long, default_value_t = 2)]
    async_every: usize,

    /// Every Nth hook fails (0 disables)
    #[arg(long, default_value_t = 0)]
    fail_every: usize,

    /// Every Nth connection is aborted instead of closed (0 disables)
    #[arg(long, default_value_t = 0)]
    abort_every: usize,

    /// Milliseconds before the simulated peer hangs up
    #[arg(long, default_value_t = 100)]
    close_after_ms: u64,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

impl From<&Args> for DrillConfig {
    fn from(args: &Args) -> Self {
        Self {
            connections: args.connections,
            hooks_per_connection: args.hooks,
            async_every: args.async_every,
            fail_every: args.fail_every,
            abort_every: args.abort_every,
            close_after: Duration::from_millis(args.close_after_ms),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(if args.debug { Level::DEBUG } else { Level::INFO })
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    anyhow::ensure!(args.connections > 0, "nothing to drill, use --connections to open at least one");

    let config = DrillConfig::from(&args);
    info!("Drill starting: {:?}", config);

    let drill = Arc::new(Drill::new(config));
    let report = drill
        .run(async {
            if tokio::signal::ctrl_c().await.is_err() {
                // Without a signal handler the drill just runs to completion
                std::future::pending::<()>().await;
            }
        })
        .await?;

    info!(
        "Drill finished: {} connections ({} aborted), {} hooks run, {} failed",
        report.connections, report.aborted, report.hooks_run, report.hooks_failed
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_map_to_config() {
        let args = Args::parse_from([
            "splitsocket-drill",
            "--connections",
            "8",
            "--hooks",
            "5",
            "--fail-every",
            "3",
            "--close-after-ms",
            "20",
        ]);
        let config = DrillConfig::from(&args);

        assert_eq!(config.connections, 8);
        assert_eq!(config.hooks_per_connection, 5);
        assert_eq!(config.async_every, 2);
        assert_eq!(config.fail_every, 3);
        assert_eq!(config.abort_every, 0);
        assert_eq!(config.close_after, Duration::from_millis(20));
    }

    #[test]
    fn test_defaults_match_config_default() {
        let args = Args::parse_from(["splitsocket-drill"]);
        let config = DrillConfig::from(&args);
        let default = DrillConfig::default();

        assert_eq!(config.connections, default.connections);
        assert_eq!(config.hooks_per_connection, default.hooks_per_connection);
        assert_eq!(config.close_after, default.close_after);
    }
}
