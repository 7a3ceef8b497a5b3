/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! SASL authentication mechanisms (RFC 4422) offered over `AUTH`
//! (RFC 4954).

pub mod scram;

use std::fmt::Display;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::smtp::capability::Capabilities;
use crate::smtp::tls::tls_exporter;

/// Username/password pair used by every built-in mechanism except
/// XOAUTH2, which pairs a username with a bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Credentials {
            username: username.into(),
            secret: secret.into(),
        }
    }
}

impl From<(&str, &str)> for Credentials {
    fn from((username, secret): (&str, &str)) -> Self {
        Credentials::new(username, secret)
    }
}

impl From<(String, String)> for Credentials {
    fn from((username, secret): (String, String)) -> Self {
        Credentials::new(username, secret)
    }
}

/// One turn of a SASL exchange: either the mechanism is done (no more
/// data to send, and the server's final reply should be taken as
/// authoritative) or it has a response to the server's challenge.
pub enum Step {
    /// Send this response and expect another challenge (or the final
    /// `235`/failure reply).
    Respond(Vec<u8>),
    /// The mechanism has nothing further to send; wait for the server's
    /// final reply.
    Done,
}

/// A pluggable SASL mechanism, driven turn by turn by the SMTP client.
/// Built-in mechanisms implement this internally; [`Mechanism::Custom`]
/// lets a caller supply their own (e.g. a vendor-specific bearer-token
/// flow this crate does not know about).
pub trait SaslMechanism: Send + Sync {
    /// RFC 4954 mechanism name sent after `AUTH`.
    fn name(&self) -> &str;

    /// The initial response, if the mechanism sends one inline with the
    /// `AUTH` command (PLAIN, XOAUTH2) rather than waiting for the
    /// server's first challenge (LOGIN, CRAM-MD5, SCRAM).
    ///
    /// Takes `&self` (not `&mut self`) so mechanisms can be driven through
    /// a shared `Arc`, which [`Mechanism::Custom`] relies on; mechanisms
    /// that need to track turn state (LOGIN, SCRAM) do so with interior
    /// mutability.
    fn initial_response(&self) -> Option<Vec<u8>>;

    /// Computes the response to a base64-decoded server challenge.
    fn challenge(&self, challenge: &[u8]) -> crate::Result<Step>;
}

/// Data the SASL layer needs from the transport to support channel
/// binding (`-PLUS` mechanisms); `None` on a plaintext connection.
#[derive(Clone, Copy)]
pub struct ChannelBinding {
    pub is_encrypted: bool,
    pub tls_exporter: Option<[u8; 32]>,
}

impl ChannelBinding {
    pub fn none() -> Self {
        ChannelBinding {
            is_encrypted: false,
            tls_exporter: None,
        }
    }

    pub fn from_tls(conn: Option<&rustls::ClientConnection>) -> Self {
        match conn {
            Some(conn) => ChannelBinding {
                is_encrypted: true,
                tls_exporter: tls_exporter(conn),
            },
            None => ChannelBinding::none(),
        }
    }
}

/// Selects (or auto-discovers) which SASL mechanism to run.
pub enum Mechanism {
    Plain,
    Login,
    CramMd5,
    XOAuth2,
    ScramSha1,
    ScramSha256,
    ScramSha1Plus,
    ScramSha256Plus,
    /// Let the client pick the strongest mechanism both sides support,
    /// preferring channel-bound SCRAM on an encrypted connection and
    /// falling back to PLAIN/LOGIN only when nothing stronger is on
    /// offer.
    AutoDiscover,
    Custom(Arc<dyn SaslMechanism>),
}

impl std::fmt::Debug for Mechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.static_name().unwrap_or("Custom"))
    }
}

impl Mechanism {
    fn static_name(&self) -> Option<&'static str> {
        Some(match self {
            Mechanism::Plain => "PLAIN",
            Mechanism::Login => "LOGIN",
            Mechanism::CramMd5 => "CRAM-MD5",
            Mechanism::XOAuth2 => "XOAUTH2",
            Mechanism::ScramSha1 => "SCRAM-SHA-1",
            Mechanism::ScramSha256 => "SCRAM-SHA-256",
            Mechanism::ScramSha1Plus => "SCRAM-SHA-1-PLUS",
            Mechanism::ScramSha256Plus => "SCRAM-SHA-256-PLUS",
            Mechanism::AutoDiscover | Mechanism::Custom(_) => return None,
        })
    }

    /// The preference-ordered list consulted by [`Mechanism::AutoDiscover`]
    /// (§4.3): on an encrypted connection, `SCRAM-SHA-256-PLUS,
    /// SCRAM-SHA-256, SCRAM-SHA-1-PLUS, SCRAM-SHA-1, XOAUTH2, CRAM-MD5,
    /// PLAIN, LOGIN`; on a plaintext connection, `SCRAM-SHA-256,
    /// SCRAM-SHA-1, XOAUTH2, CRAM-MD5` with PLAIN/LOGIN excluded. The
    /// `-PLUS` variants are further gated on exporter-based channel
    /// binding actually being available (e.g. unavailable on a TLS 1.2
    /// session), since offering them otherwise would only fail later.
    fn auto_discover_order(binding: &ChannelBinding) -> Vec<&'static str> {
        let mut order = Vec::with_capacity(8);
        let plus_available = binding.is_encrypted && binding.tls_exporter.is_some();
        if plus_available {
            order.push("SCRAM-SHA-256-PLUS");
        }
        order.push("SCRAM-SHA-256");
        if plus_available {
            order.push("SCRAM-SHA-1-PLUS");
        }
        order.push("SCRAM-SHA-1");
        order.push("XOAUTH2");
        order.push("CRAM-MD5");
        if binding.is_encrypted {
            order.push("PLAIN");
            order.push("LOGIN");
        }
        order
    }

    /// Resolves `self` against the server's advertised mechanisms and the
    /// connection's encryption/channel-binding state, building the
    /// concrete [`SaslMechanism`] to drive.
    pub fn resolve(
        &self,
        credentials: &Credentials,
        caps: &Capabilities,
        binding: &ChannelBinding,
    ) -> crate::Result<Arc<dyn SaslMechanism>> {
        if let Mechanism::Custom(m) = self {
            return Ok(m.clone());
        }

        if let Mechanism::AutoDiscover = self {
            for name in Self::auto_discover_order(binding) {
                if caps.has_auth_mechanism(name) {
                    return Self::build_named(name, credentials, binding);
                }
            }
            return Err(crate::Error::AuthUnsupported("no supported mechanism offered".to_string()));
        }

        let name = self.static_name().expect("non-Custom, non-AutoDiscover");
        if !caps.has_auth_mechanism(name) {
            return Err(crate::Error::AuthUnsupported(name.to_string()));
        }
        Self::build_named(name, credentials, binding)
    }

    fn build_named(
        name: &str,
        credentials: &Credentials,
        binding: &ChannelBinding,
    ) -> crate::Result<Arc<dyn SaslMechanism>> {
        Ok(match name {
            "PLAIN" => Arc::new(Plain::new(credentials)),
            "LOGIN" => Arc::new(Login::new(credentials)),
            "CRAM-MD5" => Arc::new(CramMd5::new(credentials)),
            "XOAUTH2" => Arc::new(XOAuth2::new(credentials)),
            "SCRAM-SHA-1" => Arc::new(scram::Scram::sha1(credentials, None)),
            "SCRAM-SHA-256" => Arc::new(scram::Scram::sha256(credentials, None)),
            "SCRAM-SHA-1-PLUS" => {
                let cb = binding
                    .tls_exporter
                    .ok_or(crate::Error::TlsPolicy(crate::TlsPolicyError::ChannelBindingUnavailable))?;
                Arc::new(scram::Scram::sha1(credentials, Some(cb)))
            }
            "SCRAM-SHA-256-PLUS" => {
                let cb = binding
                    .tls_exporter
                    .ok_or(crate::Error::TlsPolicy(crate::TlsPolicyError::ChannelBindingUnavailable))?;
                Arc::new(scram::Scram::sha256(credentials, Some(cb)))
            }
            other => return Err(crate::Error::AuthUnsupported(other.to_string())),
        })
    }
}

/// RFC 4616 PLAIN: `\0username\0secret`, sent as the initial response.
struct Plain {
    response: Vec<u8>,
}

impl Plain {
    fn new(credentials: &Credentials) -> Self {
        let mut response = Vec::new();
        response.push(0);
        response.extend_from_slice(credentials.username.as_bytes());
        response.push(0);
        response.extend_from_slice(credentials.secret.as_bytes());
        Plain { response }
    }
}

impl SaslMechanism for Plain {
    fn name(&self) -> &str {
        "PLAIN"
    }

    fn initial_response(&self) -> Option<Vec<u8>> {
        Some(self.response.clone())
    }

    fn challenge(&self, _challenge: &[u8]) -> crate::Result<Step> {
        Ok(Step::Done)
    }
}

/// LOGIN has no fixed prompt text to parse: some servers send
/// "Username:"/"Password:", others "User Name\0"; this mechanism tracks
/// its own turn count and replies username-then-secret regardless of
/// what the prompt says, matching the common client convention.
struct Login {
    username: String,
    secret: String,
    turn: std::sync::atomic::AtomicU8,
}

impl Login {
    fn new(credentials: &Credentials) -> Self {
        Login {
            username: credentials.username.clone(),
            secret: credentials.secret.clone(),
            turn: std::sync::atomic::AtomicU8::new(0),
        }
    }
}

impl SaslMechanism for Login {
    fn name(&self) -> &str {
        "LOGIN"
    }

    fn initial_response(&self) -> Option<Vec<u8>> {
        None
    }

    fn challenge(&self, _challenge: &[u8]) -> crate::Result<Step> {
        let turn = self.turn.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(Step::Respond(match turn {
            0 => self.username.as_bytes().to_vec(),
            _ => self.secret.as_bytes().to_vec(),
        }))
    }
}

/// RFC 2195 CRAM-MD5: HMAC-MD5 of the server's nonce, keyed by the
/// secret, rendered as `username hex-digest`.
struct CramMd5 {
    username: String,
    secret: String,
}

impl CramMd5 {
    fn new(credentials: &Credentials) -> Self {
        CramMd5 {
            username: credentials.username.clone(),
            secret: credentials.secret.clone(),
        }
    }
}

impl SaslMechanism for CramMd5 {
    fn name(&self) -> &str {
        "CRAM-MD5"
    }

    fn initial_response(&self) -> Option<Vec<u8>> {
        None
    }

    fn challenge(&self, challenge: &[u8]) -> crate::Result<Step> {
        let mut secret_opad: Vec<u8> = vec![0x5c; 64];
        let mut secret_ipad: Vec<u8> = vec![0x36; 64];
        let secret = self.secret.as_bytes();

        if secret.len() < 64 {
            for (pos, byte) in secret.iter().enumerate() {
                secret_opad[pos] = *byte ^ 0x5c;
                secret_ipad[pos] = *byte ^ 0x36;
            }
        } else {
            for (pos, byte) in md5_compute(secret).iter().enumerate() {
                secret_opad[pos] = *byte ^ 0x5c;
                secret_ipad[pos] = *byte ^ 0x36;
            }
        }

        secret_ipad.extend_from_slice(challenge);
        secret_opad.extend_from_slice(&md5_compute(&secret_ipad));

        let digest = md5_compute(&secret_opad);
        let response = format!("{} {}", self.username, hex(&digest));
        Ok(Step::Respond(response.into_bytes()))
    }
}

fn md5_compute(data: &[u8]) -> [u8; 16] {
    use md5::{Digest, Md5};
    let mut hasher = Md5::new();
    hasher.update(data);
    hasher.finalize().into()
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// RFC 7628 XOAUTH2, sent as the initial response.
struct XOAuth2 {
    response: Vec<u8>,
}

impl XOAuth2 {
    fn new(credentials: &Credentials) -> Self {
        let payload = format!(
            "user={}\x01auth=Bearer {}\x01\x01",
            credentials.username, credentials.secret
        );
        XOAuth2 {
            response: payload.into_bytes(),
        }
    }
}

impl SaslMechanism for XOAuth2 {
    fn name(&self) -> &str {
        "XOAUTH2"
    }

    fn initial_response(&self) -> Option<Vec<u8>> {
        Some(self.response.clone())
    }

    fn challenge(&self, _challenge: &[u8]) -> crate::Result<Step> {
        Ok(Step::Done)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum AuthError {
    InvalidChallenge,
}

impl Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::InvalidChallenge => write!(f, "invalid challenge received from server"),
        }
    }
}

/// Decodes a base64 server challenge, as received in the text of a `334`
/// continuation reply.
pub fn decode_challenge(text: &str) -> crate::Result<Vec<u8>> {
    Ok(BASE64.decode(text)?)
}

pub fn encode_response(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn plain_encode() {
        let m = Plain::new(&Credentials::new("tim", "tanstaaftanstaaf"));
        let resp = m.initial_response().unwrap();
        assert_eq!(encode_response(&resp), "AHRpbQB0YW5zdGFhZnRhbnN0YWFm");
    }

    #[test]
    fn login_encode() {
        let m = Login::new(&Credentials::new("tim", "tanstaaftanstaaf"));
        let Step::Respond(r1) = m.challenge(b"ignored").unwrap() else {
            panic!()
        };
        assert_eq!(encode_response(&r1), "dGlt");
        let Step::Respond(r2) = m.challenge(b"ignored").unwrap() else {
            panic!()
        };
        assert_eq!(encode_response(&r2), "dGFuc3RhYWZ0YW5zdGFhZg==");
    }

    #[test]
    fn xoauth2_encode() {
        let m = XOAuth2::new(&Credentials::new(
            "someuser@example.com",
            "ya29.vF9dft4qmTc2Nvb3RlckBhdHRhdmlzdGEuY29tCg",
        ));
        let resp = m.initial_response().unwrap();
        assert_eq!(
            encode_response(&resp),
            concat!(
                "dXNlcj1zb21ldXNlckBleGFtcGxlLmNvbQFhdXRoPUJlYXJlciB5YTI5Ln",
                "ZGOWRmdDRxbVRjMk52YjNSbGNrQmhkSFJoZG1semRHRXVZMjl0Q2cBAQ=="
            )
        );
    }

    #[test]
    fn cram_md5_encode() {
        let m = CramMd5::new(&Credentials::new("tim", "tanstaaftanstaaf"));
        let challenge = BASE64
            .decode("PDE4OTYuNjk3MTcwOTUyQHBvc3RvZmZpY2UucmVzdG9uLm1jaS5uZXQ+")
            .unwrap();
        let Step::Respond(resp) = m.challenge(&challenge).unwrap() else {
            panic!()
        };
        assert_eq!(
            encode_response(&resp),
            "dGltIGI5MTNhNjAyYzdlZGE3YTQ5NWI0ZTZlNzMzNGQzODkw"
        );
    }

    #[test]
    fn auto_discover_prefers_plus_on_encrypted_exporter() {
        let binding = ChannelBinding {
            is_encrypted: true,
            tls_exporter: Some([0u8; 32]),
        };
        assert_eq!(
            Mechanism::auto_discover_order(&binding),
            vec![
                "SCRAM-SHA-256-PLUS",
                "SCRAM-SHA-256",
                "SCRAM-SHA-1-PLUS",
                "SCRAM-SHA-1",
                "XOAUTH2",
                "CRAM-MD5",
                "PLAIN",
                "LOGIN",
            ]
        );
    }

    #[test]
    fn auto_discover_skips_plain_on_plaintext() {
        let binding = ChannelBinding::none();
        let order = Mechanism::auto_discover_order(&binding);
        assert_eq!(order, vec!["SCRAM-SHA-256", "SCRAM-SHA-1", "XOAUTH2", "CRAM-MD5"]);
        assert!(!order.contains(&"PLAIN"));
        assert!(!order.contains(&"LOGIN"));
    }

    #[test]
    fn auto_discover_selects_scram_sha_256_plus_per_s8() {
        // §8 property 8: on an encrypted connection advertising
        // `PLAIN LOGIN SCRAM-SHA-256 SCRAM-SHA-256-PLUS`, auto-discovery
        // selects `SCRAM-SHA-256-PLUS`.
        let caps = Capabilities {
            auth_mechanisms: vec![
                "PLAIN".to_string(),
                "LOGIN".to_string(),
                "SCRAM-SHA-256".to_string(),
                "SCRAM-SHA-256-PLUS".to_string(),
            ],
            ..Default::default()
        };
        let binding = ChannelBinding {
            is_encrypted: true,
            tls_exporter: Some([0u8; 32]),
        };
        let order = Mechanism::auto_discover_order(&binding);
        let chosen = order.into_iter().find(|name| caps.has_auth_mechanism(name));
        assert_eq!(chosen, Some("SCRAM-SHA-256-PLUS"));
    }
}
