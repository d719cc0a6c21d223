//! # afd-http
//!
//! HTTP/1.1 client engine used by AFD to fetch from and send to web
//! servers and S3-compatible object stores.
//!
//! ## Features
//!
//! - **Methods**: GET (resume with `Range`, conditional with
//!   `If-None-Match`), PUT with `Expect: 100-continue`, HEAD, DELETE,
//!   OPTIONS and a HEAD-based NOOP
//! - **Framing**: `Content-Length` and chunked bodies, buffered residue
//!   handed out first, error bodies drained to keep the connection usable
//! - **Authentication**: Basic, Digest and AWS Signature V4 through
//!   [`afd_auth`], with one retry after a 401
//! - **Keep-alive**: reconnect on `Connection: close` or peer hangup, one
//!   automatic retry on a stale connection
//! - **S3**: path- or host-style buckets, LIST v1/v2 paging, XML error
//!   codes in failure messages
//!
//! ## Quick Start
//!
//! ```ignore
//! use afd_http::{HttpClient, HttpConfig};
//!
//! #[tokio::main]
//! async fn main() -> afd_http::Result<()> {
//!     let config = HttpConfig::builder("www.example.com").build();
//!     let mut client = HttpClient::connect(config).await?;
//!     let response = client.get("/data/", "index.html", 0, None).await?;
//!     println!("{:?} {:?}", response.outcome, response.content_length);
//!     let body = client.read_body(1 << 20).await?;
//!     println!("{} bytes", body.len());
//!     client.quit().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod client;
mod config;
mod error;
pub mod header;
pub mod s3;
mod state;

pub use client::{
    Chunk, DRAIN_LIMIT, HttpClient, MAX_CHUNK_SIZE, Method, Response, join_path,
    parse_chunk_size,
};
pub use config::{Credentials, HttpConfig, HttpConfigBuilder};
pub use error::{Error, Result};
pub use header::{Methods, StatusLine};
pub use s3::{ListEntry, ListPage, S3Error};
pub use state::HttpMessageState;

pub use afd_auth::{AuthType, ListVersion};
pub use afd_net::{ExitCode, ProtocolOptions};
