//! # afd-net
//!
//! Connection layer shared by the AFD HTTP and SMTP clients.
//!
//! ## Features
//!
//! - **Transport**: ordered IPv6/IPv4 candidate dialing, optional IP cache,
//!   connect timeout, socket buffer sizes and keepalive
//! - **TLS**: rustls with SNI, TLS 1.2 floor, `SSL_CIPHER` override and an
//!   optional strict peer verification with classified failures
//! - **Line reader**: CRLF reassembly with a 32 KiB carry buffer whose residue
//!   feeds the next line or body read
//! - **Command writer**: CRLF framing, 8 KiB line limit, secret redaction
//! - **Error taxonomy**: retryable vs. fatal classification and exit codes
//!
//! Every read, write and handshake is bounded by the connection's transfer
//! timeout. Wire traces are emitted on the `afd::trace` target.
//!
//! ## Quick Start
//!
//! ```ignore
//! use afd_net::{Connection, ConnectOptions, Protocol};
//!
//! #[tokio::main]
//! async fn main() -> afd_net::Result<()> {
//!     let options = ConnectOptions::builder(Protocol::Smtp).build();
//!     let mut conn = Connection::connect("mail.example.com", 25, options).await?;
//!     let banner = conn.read_line().await?;
//!     println!("{}", banner.text());
//!     conn.write_command("QUIT").await?;
//!     conn.close().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod config;
mod connection;
mod error;
pub mod line;
pub mod resolve;
pub mod tls;
pub mod trace;
mod transport;

pub use config::{
    ConnectOptions, ConnectOptionsBuilder, DEFAULT_CONNECT_TIMEOUT, DEFAULT_TRANSFER_TIMEOUT,
    Protocol, ProtocolOptions, TlsFloor,
};
pub use connection::{Connection, MAX_LINE_LENGTH};
pub use error::{Error, ErrorKind, ExitCode, Result};
pub use line::{LINE_BUFFER_CAPACITY, Line, LineBuffer};
pub use resolve::IpCache;
pub use tls::{TlsFailure, TlsInfo};
pub use transport::NetStream;
