//! `afd-probe http` subcommands.

use std::path::{Path, PathBuf};

use afd_http::{
    AuthType, Chunk, Credentials, ExitCode, HttpClient, HttpConfig, ListVersion, ProtocolOptions,
};
use anyhow::Context;
use clap::{Args, Subcommand, ValueEnum};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::CommonArgs;

const BLOCK_SIZE: usize = 64 * 1024;

#[derive(Args)]
pub struct HttpArgs {
    /// Server host name
    host: String,

    /// Server port (default 80, or 443 with --tls)
    #[arg(short, long)]
    port: Option<u16>,

    /// Use TLS
    #[arg(long)]
    tls: bool,

    /// Send requests through a proxy (host:port)
    #[arg(long, value_name = "HOST:PORT")]
    proxy: Option<String>,

    /// Authentication scheme
    #[arg(long, value_enum, default_value = "none")]
    auth: Auth,

    /// User name or S3 access key
    #[arg(short, long, default_value = "")]
    user: String,

    /// Password or S3 secret key
    #[arg(long, default_value = "")]
    password: String,

    /// S3 region
    #[arg(long, default_value = "us-east-1")]
    region: String,

    /// Bucket is the first path segment instead of part of the host
    #[arg(long)]
    bucket_in_path: bool,

    /// Use the old ListObjects API with markers
    #[arg(long)]
    list_v1: bool,

    /// Do not send `Expect: 100-continue` with PUT
    #[arg(long)]
    no_expect: bool,

    #[command(subcommand)]
    op: HttpOp,
}

#[derive(Clone, Copy, ValueEnum)]
enum Auth {
    None,
    Basic,
    Digest,
    Aws4,
    AwsNoSign,
}

impl From<Auth> for AuthType {
    fn from(auth: Auth) -> Self {
        match auth {
            Auth::None => Self::None,
            Auth::Basic => Self::Basic,
            Auth::Digest => Self::Digest,
            Auth::Aws4 => Self::Aws4HmacSha256,
            Auth::AwsNoSign => Self::AwsNoSignRequest,
        }
    }
}

#[derive(Subcommand)]
enum HttpOp {
    /// Download a file
    Get {
        /// Remote directory
        path: String,
        /// Remote file name
        filename: String,
        /// Local output file (default: the remote name)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Resume at this byte offset
        #[arg(long, default_value = "0")]
        offset: u64,
        /// Only fetch if the entity tag changed
        #[arg(long)]
        etag: Option<String>,
    },
    /// Upload a file
    Put {
        /// Remote directory
        path: String,
        /// Local file to send
        local: PathBuf,
        /// Remote file name (default: the local name)
        #[arg(long)]
        filename: Option<String>,
    },
    /// Show size and modification time of a remote file
    Head {
        /// Remote directory
        path: String,
        /// Remote file name
        filename: String,
    },
    /// Delete a remote file
    Delete {
        /// Remote directory
        path: String,
        /// Remote file name
        filename: String,
    },
    /// List an S3 bucket prefix
    List {
        /// Bucket path and prefix
        path: String,
    },
}

impl HttpArgs {
    fn config(&self, common: &CommonArgs) -> anyhow::Result<HttpConfig> {
        let mut builder = HttpConfig::builder(&self.host)
            .tls(self.tls)
            .features(common.features())
            .credentials(Credentials::new(
                self.user.as_str(),
                self.password.as_str(),
                self.auth.into(),
            ))
            .region(self.region.as_str())
            .debug_level(common.debug)
            .connect_timeout(common.connect_timeout())
            .transfer_timeout(common.transfer_timeout());
        if let Some(port) = self.port {
            builder = builder.port(port);
        }
        if let Some(proxy) = &self.proxy {
            let (host, port) = proxy
                .rsplit_once(':')
                .context("proxy must be given as host:port")?;
            let port = port.parse().context("invalid proxy port")?;
            builder = builder.proxy(host, port);
        }
        if self.bucket_in_path {
            builder = builder.flag(ProtocolOptions::BUCKETNAME_IS_IN_PATH);
        }
        if self.no_expect {
            builder = builder.flag(ProtocolOptions::NO_EXPECT);
        }
        if self.list_v1 {
            builder = builder.listobject_version(ListVersion::V1);
        }
        Ok(builder.build())
    }
}

pub async fn run(common: &CommonArgs, args: HttpArgs) -> anyhow::Result<ExitCode> {
    let config = args.config(common)?;
    let mut client = HttpClient::connect(config)
        .await
        .with_context(|| format!("cannot connect to {}", args.host))?;

    let result = match args.op {
        HttpOp::Get {
            path,
            filename,
            output,
            offset,
            etag,
        } => {
            let output = output.unwrap_or_else(|| PathBuf::from(&filename));
            get(&mut client, &path, &filename, &output, offset, etag.as_deref()).await
        }
        HttpOp::Put {
            path,
            local,
            filename,
        } => put(&mut client, &path, &local, filename).await,
        HttpOp::Head { path, filename } => {
            let response = client.head(&path, &filename).await?;
            match response.status {
                Some(_) => println!(
                    "size={} mtime={} etag={}",
                    response
                        .content_length
                        .map_or_else(|| "-".to_string(), |n| n.to_string()),
                    response
                        .mtime()
                        .map_or_else(|| "-".to_string(), |t| t.to_string()),
                    response.etag.as_deref().unwrap_or("-"),
                ),
                None => println!("HEAD not supported by server"),
            }
            Ok(response.outcome)
        }
        HttpOp::Delete { path, filename } => Ok(client.delete(&path, &filename).await?.outcome),
        HttpOp::List { path } => list(&mut client, &path).await,
    };
    client.quit().await;
    result
}

async fn get(
    client: &mut HttpClient,
    path: &str,
    filename: &str,
    output: &Path,
    offset: u64,
    etag: Option<&str>,
) -> anyhow::Result<ExitCode> {
    let response = client.get(path, filename, offset, etag).await?;
    if response.outcome == ExitCode::NothingToFetch {
        tracing::info!(filename, "nothing to fetch");
        return Ok(response.outcome);
    }

    let mut file = if response.offset > 0 {
        tokio::fs::OpenOptions::new()
            .append(true)
            .open(output)
            .await
            .with_context(|| format!("cannot append to {}", output.display()))?
    } else {
        File::create(output)
            .await
            .with_context(|| format!("cannot create {}", output.display()))?
    };

    let mut received = 0u64;
    if response.chunked {
        let mut chunk = Vec::new();
        while let Chunk::Data(n) = client.chunk_read(&mut chunk).await? {
            file.write_all(&chunk).await?;
            received += n as u64;
        }
    } else {
        let mut buf = vec![0u8; BLOCK_SIZE];
        loop {
            let n = client.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n]).await?;
            received += n as u64;
        }
    }
    file.flush().await?;
    tracing::info!(
        filename,
        bytes = received,
        offset = response.offset,
        "download complete"
    );
    Ok(ExitCode::Success)
}

async fn put(
    client: &mut HttpClient,
    path: &str,
    local: &Path,
    filename: Option<String>,
) -> anyhow::Result<ExitCode> {
    let filename = match filename {
        Some(name) => name,
        None => local
            .file_name()
            .context("local path has no file name")?
            .to_string_lossy()
            .into_owned(),
    };
    let mut file = File::open(local)
        .await
        .with_context(|| format!("cannot open {}", local.display()))?;
    let size = file.metadata().await?.len();

    client.put(path, &filename, size).await?;
    let mut buf = vec![0u8; BLOCK_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        client.write(&buf[..n]).await?;
    }
    let response = client.put_response().await?;
    tracing::info!(filename, bytes = size, status = ?response.status, "upload complete");
    Ok(response.outcome)
}

async fn list(client: &mut HttpClient, path: &str) -> anyhow::Result<ExitCode> {
    loop {
        let page = client.list_page(path).await?;
        for prefix in &page.common_prefixes {
            println!("{prefix}");
        }
        for entry in &page.entries {
            println!("{:>12} {}", entry.size, entry.key);
        }
        if !page.is_truncated || page.next_marker.is_none() {
            return Ok(ExitCode::Success);
        }
    }
}
