//! # afd-smtp
//!
//! SMTP client engine used by AFD to deliver files as mail.
//!
//! ## Features
//!
//! - **Type-state session**: the compiler rejects out-of-order commands
//! - **TLS**: implicit TLS (port 465) and STARTTLS with a fresh EHLO
//! - **Authentication**: AUTH LOGIN and AUTH PLAIN, credentials never traced
//! - **Streaming DATA**: CRLF promotion and dot-stuffing across block
//!   boundaries, optional code page 437 to Latin-1 remap
//! - **Subjects**: 7-bit as is, otherwise RFC 2047 base64 encoded words
//!
//! ## Quick Start
//!
//! ```ignore
//! use afd_smtp::{Address, Client, SmtpConfig};
//!
//! #[tokio::main]
//! async fn main() -> afd_smtp::Result<()> {
//!     let config = SmtpConfig::builder("mail.example.com").starttls(true).build();
//!     let client = Client::connect(&config).await?;
//!     let client = client.auth_login("alice", "secret").await?;
//!
//!     let client = client.mail_from(Address::new("alice@example.com")?).await?;
//!     let client = client.rcpt_to(Address::new("bob@example.com")?).await?;
//!     let mut data = client.data().await?;
//!     data.write_subject("Report".as_bytes(), None).await?;
//!     data.write(b"\r\nSee attached.\r\n").await?;
//!     let client = data.finish().await?;
//!
//!     client.quit().await
//! }
//! ```
//!
//! ## Connection States
//!
//! ```text
//! ┌──────────────┐
//! │  Connected   │ ─── auth_login() / auth_plain() ───→ Authenticated
//! └──────────────┘
//!        │
//!        └─── mail_from() ───→ MailTransaction ───→ RecipientAdded ───→ Data
//!                                                                        │
//!                  Connected ←──────────── finish() ─────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod body;
pub mod command;
mod config;
pub mod connection;
mod error;
pub mod parser;
pub mod types;

pub use body::{BodyWriter, encode_subject};
pub use config::{SmtpConfig, SmtpConfigBuilder, SmtpCredentials};
pub use connection::{
    Authenticated, Client, Connected, Data, MailTransaction, RecipientAdded, ServerInfo,
    SmtpConnection,
};
pub use error::{Error, Result};
pub use types::{Address, AuthMechanism, Extension, Reply, ReplyCode, SmtpCapabilities};

pub use afd_auth::AuthType;
pub use afd_net::{ExitCode, ProtocolOptions};
