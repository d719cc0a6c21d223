//! `afd-probe smtp` subcommand.

use std::path::PathBuf;

use afd_smtp::{Address, AuthType, Client, ExitCode, SmtpConfig, SmtpConnection};
use anyhow::Context;
use clap::{Args, ValueEnum};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::CommonArgs;

const BLOCK_SIZE: usize = 16 * 1024;

#[derive(Args)]
pub struct SmtpArgs {
    /// Mail server host name
    host: String,

    /// Server port (default 25, or 465 with --ssl)
    #[arg(short, long)]
    port: Option<u16>,

    /// Implicit TLS from the first byte
    #[arg(long, conflicts_with = "starttls")]
    ssl: bool,

    /// Upgrade with STARTTLS when the server offers it
    #[arg(long)]
    starttls: bool,

    /// Name sent with EHLO
    #[arg(long, default_value = "localhost")]
    helo: String,

    /// Login mechanism
    #[arg(long, value_enum, requires = "user")]
    auth: Option<Mechanism>,

    /// Login name
    #[arg(short, long)]
    user: Option<String>,

    /// Login password
    #[arg(long, default_value = "")]
    password: String,

    /// Envelope sender (empty for the null reverse-path)
    #[arg(short, long)]
    from: String,

    /// Envelope recipient, repeatable
    #[arg(short, long, required = true)]
    to: Vec<String>,

    /// Subject header to prepend
    #[arg(short, long)]
    subject: Option<String>,

    /// Charset for an encoded subject
    #[arg(long)]
    charset: Option<String>,

    /// Map the body from code page 437 to ISO 8859-1
    #[arg(long)]
    iso8859: bool,

    /// Message file (default: standard input)
    file: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mechanism {
    Login,
    Plain,
}

impl From<Mechanism> for AuthType {
    fn from(mechanism: Mechanism) -> Self {
        match mechanism {
            Mechanism::Login => Self::SmtpAuthLogin,
            Mechanism::Plain => Self::SmtpAuthPlain,
        }
    }
}

impl SmtpArgs {
    fn config(&self, common: &CommonArgs) -> SmtpConfig {
        let mut builder = SmtpConfig::builder(&self.host)
            .ssl_enabled(self.ssl)
            .starttls(self.starttls)
            .client_hostname(self.helo.as_str())
            .flag(common.features())
            .debug_level(common.debug)
            .connect_timeout(common.connect_timeout())
            .transfer_timeout(common.transfer_timeout());
        if let Some(port) = self.port {
            builder = builder.port(port);
        }
        if let (Some(mechanism), Some(user)) = (self.auth, &self.user) {
            builder = builder.credentials(user.as_str(), self.password.as_str(), mechanism.into());
        }
        builder.build()
    }
}

pub async fn run(common: &CommonArgs, args: SmtpArgs) -> anyhow::Result<ExitCode> {
    let from = if args.from.is_empty() {
        Address::null()
    } else {
        Address::new(&args.from)?
    };
    let recipients = args
        .to
        .iter()
        .map(Address::new)
        .collect::<afd_smtp::Result<Vec<_>>>()?;

    let config = args.config(common);
    let client = Client::connect(&config)
        .await
        .with_context(|| format!("cannot connect to {}", config.host))?;
    tracing::info!(
        server = %client.server_info().hostname,
        tls = client.capabilities().ssl_enabled || client.connection().tls_active(),
        "connected"
    );

    let transaction = match &config.credentials {
        Some(credentials) => client.authenticate(credentials).await?.mail_from(from).await?,
        None => client.mail_from(from).await?,
    };

    let mut recipients = recipients.into_iter();
    let first = recipients.next().context("no recipient")?;
    let mut envelope = transaction.rcpt_to(first).await?;
    for to in recipients {
        envelope = envelope.rcpt_to(to).await?;
    }

    let mut data = envelope.data().await?;
    data.use_iso8859(args.iso8859);
    if let Some(subject) = &args.subject {
        data.write_subject(subject.as_bytes(), args.charset.as_deref())
            .await?;
    }

    let mut input: Box<dyn AsyncRead + Unpin> = match &args.file {
        Some(path) => Box::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("cannot open {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdin()),
    };
    let mut buf = vec![0u8; BLOCK_SIZE];
    let mut sent = 0usize;
    loop {
        let n = input.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        data.write(&buf[..n]).await?;
        sent += n;
    }

    let client = data.finish().await?;
    tracing::info!(bytes = sent, recipients = args.to.len(), "message sent");
    client.quit().await?;
    Ok(ExitCode::Success)
}
