/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! # mail-send
//!
//! [![crates.io](https://img.shields.io/crates/v/mail-send)](https://crates.io/crates/mail-send)
//! [![build](https://github.com/stalwartlabs/mail-send/actions/workflows/rust.yml/badge.svg)](https://github.com/stalwartlabs/mail-send/actions/workflows/rust.yml)
//! [![docs.rs](https://img.shields.io/docsrs/mail-send)](https://docs.rs/mail-send)
//! [![crates.io](https://img.shields.io/crates/l/mail-send)](http://www.apache.org/licenses/LICENSE-2.0)
//!
//! _mail-send_ is a Rust library to build and send e-mail messages via SMTP. It includes:
//!
//! - A **MIME** message builder (_RFC 5322 / 2045-2049_) with nested `multipart/mixed`,
//!   `related`, `alternative` and `signed` trees, automatic per-part content-transfer
//!   encoding and RFC 2047 encoded-word header folding.
//! - A **SMTP** (_RFC 5321_) client with STARTTLS (_RFC 3207_), implicit TLS
//!   (_RFC 8314_), 8BITMIME, SMTPUTF8, DSN (_RFC 1891_) and SASL authentication:
//!   PLAIN, LOGIN, CRAM-MD5, SCRAM-SHA-1/256 (with optional `-PLUS` channel binding)
//!   and XOAUTH2.
//! - Optional detached **S/MIME** (PKCS#7) signing of outgoing messages.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! # async fn go() -> mail_send::Result<()> {
//! use mail_send::{SmtpClientBuilder, MessageBuilder};
//!
//! let message = MessageBuilder::new()
//!     .from(("John Doe", "john@example.com"))
//!     .to(vec![("Jane Doe", "jane@example.com")])
//!     .subject("Hi!")
//!     .html_body("<h1>Hello, world!</h1>")
//!     .text_body("Hello world!");
//!
//! SmtpClientBuilder::new("smtp.gmail.com", 587)
//!     .credentials(("john", "p4ssw0rd"))
//!     .connect()
//!     .await?
//!     .send(message)
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## License
//!
//! Licensed under either of
//!
//!  * Apache License, Version 2.0 ([LICENSE-APACHE](LICENSE-APACHE) or <http://www.apache.org/licenses/LICENSE-2.0>)
//!  * MIT license ([LICENSE-MIT](LICENSE-MIT) or <http://opensource.org/licenses/MIT>)
//!
//! at your option.
//!
//! ## Copyright
//!
//! Copyright (C) 2020-2022, Stalwart Labs Ltd.
//!
//! See [COPYING] for the license.
//!
//! [COPYING]: https://github.com/stalwartlabs/mail-send/blob/main/COPYING
//!

pub mod client;
pub mod message;
pub mod smtp;

pub use client::config::Logger;
pub use client::{Client, SmtpClientBuilder};
pub use message::{Message, MessageBuilder};
pub use smtp::reply::Reply;

use std::fmt::Display;

/// Everything that can go wrong while composing or delivering a message.
///
/// This is a flat enum rather than one type per error kind: most callers
/// only care whether an operation succeeded, and the ones that do want to
/// discriminate match on the variant they expect.
#[derive(Debug)]
pub enum Error {
    /// I/O error talking to the transport.
    Io(std::io::Error),

    /// TLS handshake or record-layer error.
    Tls(Box<rustls::Error>),

    /// Base64 decode error (malformed SASL challenge).
    Base64(base64::DecodeError),

    /// An option passed to [`SmtpClientBuilder`] was invalid.
    Configuration(ConfigurationError),

    /// A liveness check (`NOOP`) or deadline extension failed; there is no
    /// usable connection.
    NoActiveConnection,

    /// Failed to establish the transport, including after exhausting the
    /// configured fallback port.
    Dial(DialError),

    /// The server returned a reply that did not fit the protocol state we
    /// were in (malformed reply, unexpected code at a transaction step).
    Protocol(ProtocolError),

    /// STARTTLS was required by policy but unavailable, or a `-PLUS` SASL
    /// mechanism was attempted on a connection with no usable channel
    /// binding.
    TlsPolicy(TlsPolicyError),

    /// The mechanism selected (or auto-discovered) is not in the server's
    /// advertised `AUTH` list.
    AuthUnsupported(String),

    /// The server rejected the SASL exchange.
    AuthFailed(Reply),

    /// Delivery of one message in a batch failed; see [`SendError`] for the
    /// per-recipient detail.
    Send(Box<SendError>),

    /// Invalid TLS server name.
    InvalidTlsName,

    /// Connection timeout.
    Timeout,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Invalid configuration supplied to [`SmtpClientBuilder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// Port must be in `1..=65535`.
    InvalidPort,
    /// Timeout must be greater than zero.
    InvalidTimeout,
    /// HELO/EHLO identity must not be empty.
    InvalidHelo,
    /// A `None` TLS configuration was supplied.
    MissingTlsConfig,
    /// `dsn_notify(NEVER)` was combined with another notify option.
    IncompatibleDsnNotify,
    /// `dsn_return` was something other than `HDRS` or `FULL`.
    InvalidDsnReturn,
}

/// Transport establishment failure, including the outcome of any fallback
/// attempt.
#[derive(Debug)]
pub struct DialError {
    pub primary: Box<Error>,
    pub fallback: Option<Box<Error>>,
}

/// A reply did not match what the protocol state machine expected.
#[derive(Debug)]
pub struct ProtocolError {
    pub during: &'static str,
    pub reply: Option<Reply>,
}

/// STARTTLS/SCRAM-PLUS policy violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsPolicyError {
    /// `TLSMandatory` but the server did not advertise `STARTTLS`.
    StartTlsRequired,
    /// A `-PLUS` mechanism was attempted on a plaintext connection.
    PlainTextChannelBinding,
    /// A `-PLUS` mechanism was attempted but the negotiated TLS session
    /// exposes no usable channel-binding data (e.g. TLS 1.2 `tls-unique`,
    /// which this crate does not attempt to extract from rustls).
    ChannelBindingUnavailable,
}

/// Reason a single message failed to send, per the design's error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendErrorReason {
    ConnCheck,
    GetSender,
    GetRcpts,
    NoUnencoded,
    SmtpMailFrom,
    SmtpRcptTo,
    SmtpData,
    SmtpDataClose,
    SmtpReset,
    WriteContent,
}

/// Structured per-message send failure.
#[derive(Debug)]
pub struct SendError {
    pub reason: SendErrorReason,
    pub is_temp: bool,
    pub errcode: Option<u16>,
    pub enhanced_status_code: Option<(u8, u8, u8)>,
    pub rcpt: Vec<String>,
    pub errlist: Vec<Error>,
    /// Index of the offending message within the slice passed to
    /// [`Client::send_all`]. A back-reference by position rather than by
    /// ownership, since the caller retains the messages.
    pub message_index: usize,
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Tls(e) => write!(f, "TLS error: {e}"),
            Error::Base64(e) => write!(f, "Base64 decode error: {e}"),
            Error::Configuration(e) => write!(f, "Invalid configuration: {e}"),
            Error::NoActiveConnection => write!(f, "No active connection"),
            Error::Dial(e) => write!(f, "Failed to connect: {e}"),
            Error::Protocol(e) => write!(f, "Protocol error: {e}"),
            Error::TlsPolicy(e) => write!(f, "TLS policy error: {e}"),
            Error::AuthUnsupported(m) => write!(f, "Server does not support mechanism {m}"),
            Error::AuthFailed(r) => write!(f, "Authentication failed: {r}"),
            Error::Send(e) => write!(f, "Failed to send message: {e}"),
            Error::InvalidTlsName => write!(f, "Invalid TLS server name"),
            Error::Timeout => write!(f, "Connection timeout"),
        }
    }
}

impl Display for ConfigurationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigurationError::InvalidPort => write!(f, "port must be in 1..=65535"),
            ConfigurationError::InvalidTimeout => write!(f, "timeout must be greater than zero"),
            ConfigurationError::InvalidHelo => write!(f, "HELO/EHLO identity must not be empty"),
            ConfigurationError::MissingTlsConfig => write!(f, "TLS configuration must not be nil"),
            ConfigurationError::IncompatibleDsnNotify => {
                write!(f, "NOTIFY=NEVER cannot combine with other notify options")
            }
            ConfigurationError::InvalidDsnReturn => write!(f, "RET must be HDRS or FULL"),
        }
    }
}

impl Display for DialError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.primary)?;
        if let Some(fallback) = &self.fallback {
            write!(f, " (fallback attempt also failed: {fallback})")?;
        }
        Ok(())
    }
}

impl Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.reply {
            Some(reply) => write!(f, "unexpected reply during {}: {}", self.during, reply),
            None => write!(f, "malformed reply during {}", self.during),
        }
    }
}

impl Display for TlsPolicyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TlsPolicyError::StartTlsRequired => {
                write!(f, "STARTTLS required by policy but not advertised")
            }
            TlsPolicyError::PlainTextChannelBinding => {
                write!(f, "channel-binding mechanism requires an encrypted connection")
            }
            TlsPolicyError::ChannelBindingUnavailable => {
                write!(f, "no channel-binding data available for this TLS session")
            }
        }
    }
}

impl Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} failed", self.reason)?;
        if let Some(code) = self.errcode {
            write!(f, " (code {code})")?;
        }
        if !self.rcpt.is_empty() {
            write!(f, " for recipients {:?}", self.rcpt)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<base64::DecodeError> for Error {
    fn from(err: base64::DecodeError) -> Self {
        Error::Base64(err)
    }
}

impl From<rustls::Error> for Error {
    fn from(err: rustls::Error) -> Self {
        Error::Tls(Box::new(err))
    }
}

impl From<ConfigurationError> for Error {
    fn from(err: ConfigurationError) -> Self {
        Error::Configuration(err)
    }
}

impl From<SendError> for Error {
    fn from(err: SendError) -> Self {
        Error::Send(Box::new(err))
    }
}

impl From<TlsPolicyError> for Error {
    fn from(err: TlsPolicyError) -> Self {
        Error::TlsPolicy(err)
    }
}
