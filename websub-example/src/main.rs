use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use websub_subscriber::logging::{init_logging, LoggingMode};

pub mod commands;
pub mod events;

/// WebSub Subscriber Example
///
/// Discovers the hubs of a topic, subscribes at each of them, answers the
/// hubs' verification requests and prints every delivery until interrupted.
#[derive(Parser, Debug)]
#[command(name = "websub-example")]
#[command(about = "WebSub subscriber example - discover, subscribe and receive updates")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the canonical topic URL and hubs of a resource
    Discover {
        /// Topic or page URL
        topic: String,

        /// Only honour <link> elements inside <head>
        #[arg(long)]
        head_only: bool,
    },

    /// Subscribe to a topic and print deliveries until Ctrl+C
    Subscribe(SubscribeArgs),

    /// List the subscriptions in a store file
    List {
        /// Subscription store file
        #[arg(short, long, default_value = "subscriptions.json")]
        store: PathBuf,

        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(ClapArgs, Debug, Clone)]
pub struct SubscribeArgs {
    /// Topic or page URL
    pub topic: String,

    /// Subscription store file
    #[arg(short, long, default_value = "subscriptions.json")]
    pub store: PathBuf,

    /// Public base URL hubs use to reach the callback server
    #[arg(long)]
    pub public_url: Option<String>,

    /// Callback server port range start
    #[arg(long, default_value = "8400")]
    pub port_start: u16,

    /// Callback server port range end
    #[arg(long, default_value = "8500")]
    pub port_end: u16,

    /// Requested lease in seconds
    #[arg(short, long)]
    pub lease: Option<u64>,

    /// Renew automatically this many seconds before the lease ends
    #[arg(long, default_value = "3600")]
    pub renew_before: u64,

    /// Ask hubs to sign deliveries with a per-subscription secret
    #[arg(long)]
    pub secret: bool,

    /// Subscribe at no more than this many hubs
    #[arg(long)]
    pub max_hubs: Option<usize>,

    /// Only honour <link> elements inside <head>
    #[arg(long)]
    pub head_only: bool,

    /// Unsubscribe from every hub before exiting
    #[arg(long)]
    pub cancel_on_exit: bool,

    /// Print delivered bodies, not just their size
    #[arg(long)]
    pub show_body: bool,
}

impl SubscribeArgs {
    /// Apply `WEBSUB_*` environment overrides.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(store) = std::env::var("WEBSUB_STORE") {
            self.store = PathBuf::from(store);
        }

        if let Ok(url) = std::env::var("WEBSUB_PUBLIC_URL") {
            self.public_url = Some(url);
        }

        if let Ok(port_start) = std::env::var("WEBSUB_PORT_START") {
            self.port_start = port_start
                .parse()
                .context("Invalid WEBSUB_PORT_START environment variable")?;
        }

        if let Ok(port_end) = std::env::var("WEBSUB_PORT_END") {
            self.port_end = port_end
                .parse()
                .context("Invalid WEBSUB_PORT_END environment variable")?;
        }

        if let Ok(lease) = std::env::var("WEBSUB_LEASE") {
            self.lease = Some(lease.parse().context("Invalid WEBSUB_LEASE environment variable")?);
        }

        Ok(self)
    }

    /// Validate command line arguments
    pub fn validate(&self) -> Result<()> {
        if self.port_start == 0 || self.port_end == 0 {
            return Err(anyhow::anyhow!("Port range must not include port 0"));
        }

        if self.port_start > self.port_end {
            return Err(anyhow::anyhow!(
                "Invalid port range: start ({}) > end ({})",
                self.port_start,
                self.port_end
            ));
        }

        if self.lease == Some(0) {
            return Err(anyhow::anyhow!("Lease must be positive"));
        }

        if self.max_hubs == Some(0) {
            return Err(anyhow::anyhow!("Max hubs must be at least 1"));
        }

        Ok(())
    }

    pub fn renew_window(&self) -> Duration {
        Duration::from_secs(self.renew_before)
    }
}

fn parse_log_level(level: &str) -> Result<&'static str> {
    match level.to_lowercase().as_str() {
        "error" => Ok("error"),
        "warn" => Ok("warn"),
        "info" => Ok("info"),
        "debug" => Ok("debug"),
        "trace" => Ok("trace"),
        _ => Err(anyhow::anyhow!(
            "Invalid log level '{level}'. Valid levels: error, warn, info, debug, trace"
        )),
    }
}

/// Initialize logging through the subscriber crate's logging setup.
///
/// `WEBSUB_LOG_LEVEL` still wins over `--log-level` when set.
fn init_tracing(log_level: &str, json: bool) -> Result<()> {
    let level = parse_log_level(log_level)?;
    if std::env::var("WEBSUB_LOG_LEVEL").is_err() {
        std::env::set_var("WEBSUB_LOG_LEVEL", format!("{level},websub_subscriber={level}"));
    }

    let mode = if json {
        LoggingMode::Json
    } else if matches!(level, "debug" | "trace") {
        LoggingMode::Debug
    } else {
        LoggingMode::Development
    };
    init_logging(mode).context("Failed to initialize logging")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level, args.json_logs)?;

    match args.command {
        Command::Discover { topic, head_only } => commands::discover(&topic, head_only).await,
        Command::Subscribe(subscribe) => {
            let subscribe = subscribe.with_env_overrides()?;
            subscribe.validate()?;
            info!(topic = %subscribe.topic, store = %subscribe.store.display(), "starting subscriber");
            commands::subscribe(subscribe).await
        }
        Command::List { store, json } => commands::list(&store, json).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn subscribe_args(extra: &[&str]) -> SubscribeArgs {
        let mut argv = vec!["websub-example", "subscribe", "https://example.com/feed"];
        argv.extend_from_slice(extra);
        match Args::try_parse_from(argv).unwrap().command {
            Command::Subscribe(args) => args,
            other => panic!("Expected subscribe command, got {other:?}"),
        }
    }

    #[test]
    fn test_subscribe_defaults() {
        let args = subscribe_args(&[]);
        assert_eq!(args.store, PathBuf::from("subscriptions.json"));
        assert_eq!((args.port_start, args.port_end), (8400, 8500));
        assert_eq!(args.renew_window(), Duration::from_secs(3600));
        assert!(!args.secret);
        assert!(args.validate().is_ok());
    }

    #[rstest]
    #[case(&["--port-start", "9000", "--port-end", "8000"])]
    #[case(&["--port-start", "0"])]
    #[case(&["--lease", "0"])]
    #[case(&["--max-hubs", "0"])]
    fn test_invalid_subscribe_args(#[case] extra: &[&str]) {
        assert!(subscribe_args(extra).validate().is_err());
    }

    #[rstest]
    #[case("INFO", "info")]
    #[case("trace", "trace")]
    fn test_parse_log_level(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(parse_log_level(input).unwrap(), expected);
    }

    #[test]
    fn test_parse_log_level_rejects_unknown() {
        assert!(parse_log_level("loud").is_err());
    }
}
