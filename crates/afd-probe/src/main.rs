//! `afd-probe` - one-shot HTTP, S3 and SMTP transfers with the AFD engines.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod http;
mod smtp;

use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line interface.
#[derive(Parser)]
#[command(name = "afd-probe")]
#[command(about = "Fetch, send and list files over HTTP, S3 and SMTP")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Command,
}

/// Options shared by every protocol.
#[derive(Args, Clone)]
struct CommonArgs {
    /// Trace level for protocol dumps (-d commands, -dd wire data)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    debug: u8,

    /// Connect timeout in seconds
    #[arg(long, default_value = "30", global = true)]
    connect_timeout: u64,

    /// Transfer timeout in seconds
    #[arg(long, default_value = "120", global = true)]
    timeout: u64,

    /// Resolve names to IPv4 addresses only
    #[arg(short = '4', long, global = true)]
    ipv4: bool,

    /// Fail on certificates that do not verify
    #[arg(long, global = true)]
    strict_tls: bool,
}

impl CommonArgs {
    const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    const fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    fn features(&self) -> afd_net::ProtocolOptions {
        let mut features = afd_net::ProtocolOptions::NONE;
        if self.ipv4 {
            features.insert(afd_net::ProtocolOptions::DISABLE_IPV6);
        }
        if self.strict_tls {
            features.insert(afd_net::ProtocolOptions::TLS_STRICT_VERIFY);
        }
        features
    }
}

#[derive(Subcommand)]
enum Command {
    /// HTTP and S3 operations
    Http(http::HttpArgs),
    /// Send mail over SMTP
    Smtp(smtp::SmtpArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "afd_probe=info,afd_net=info,afd_http=info,afd_smtp=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Command::Http(args) => http::run(&cli.common, args).await?,
        Command::Smtp(args) => smtp::run(&cli.common, args).await?,
    };
    tracing::info!(%outcome, "done");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_common_flags_map_to_features() {
        let cli = Cli::try_parse_from([
            "afd-probe", "-4", "--strict-tls", "-dd", "smtp", "mx.test", "--from", "a@x", "--to",
            "b@y",
        ])
        .unwrap();
        assert_eq!(cli.common.debug, 2);
        let features = cli.common.features();
        assert!(features.contains(afd_net::ProtocolOptions::DISABLE_IPV6));
        assert!(features.contains(afd_net::ProtocolOptions::TLS_STRICT_VERIFY));
        assert_eq!(cli.common.transfer_timeout(), Duration::from_secs(120));
    }
}
