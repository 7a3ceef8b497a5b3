/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! The MIME message model and builder (RFC 5322 / 2045-2049): header
//! stores, body parts, attachments/embeds, and the nested multipart tree
//! the writer (`writer.rs`) serializes. `mail-send`'s own builder lives in
//! the separate `mail-builder` crate; this module grows one in the same
//! idiom since that crate is not part of this repository's dependency
//! graph.

pub mod encoding;
pub mod headers;
#[cfg(feature = "smime")]
pub mod smime;
pub mod writer;

use std::collections::HashMap;
use std::sync::Arc;

#[cfg(feature = "smime")]
pub use smime::SmimeSigner;

/// The fixed set of address headers a [`Message`] may carry (Design
/// Notes: "use the fixed enum `{From,To,Cc,Bcc,ReplyTo,EnvelopeFrom}` as
/// keys").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressHeader {
    From,
    To,
    Cc,
    Bcc,
    ReplyTo,
    EnvelopeFrom,
}

/// A display name plus addr-spec (`local@domain`). Structural validity
/// (not full RFC 5322 grammar) is delegated to `email_address`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub name: Option<String>,
    pub email: String,
}

impl Address {
    pub fn new(email: impl Into<String>) -> Self {
        Address {
            name: None,
            email: email.into(),
        }
    }

    pub fn with_name(name: impl Into<String>, email: impl Into<String>) -> Self {
        Address {
            name: Some(name.into()),
            email: email.into(),
        }
    }

    /// Structural validity check, delegated per the spec's Non-goals.
    pub fn is_valid(&self) -> bool {
        email_address::EmailAddress::is_valid(&self.email)
    }
}

impl From<&str> for Address {
    fn from(email: &str) -> Self {
        Address::new(email)
    }
}

impl From<String> for Address {
    fn from(email: String) -> Self {
        Address::new(email)
    }
}

impl From<(&str, &str)> for Address {
    fn from((name, email): (&str, &str)) -> Self {
        Address::with_name(name, email)
    }
}

impl From<(String, String)> for Address {
    fn from((name, email): (String, String)) -> Self {
        Address::with_name(name, email)
    }
}

/// Content-Transfer-Encoding applied to a part or file. `SevenBit`/
/// `EightBit` pass the body through untouched; 8-bit payloads sent this
/// way require the server to advertise `8BITMIME`, checked by the SMTP
/// layer rather than here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    QuotedPrintable,
    Base64,
    SevenBit,
    EightBit,
}

impl Encoding {
    pub(crate) fn cte_name(self) -> &'static str {
        match self {
            Encoding::QuotedPrintable => "quoted-printable",
            Encoding::Base64 => "base64",
            Encoding::SevenBit => "7bit",
            Encoding::EightBit => "8bit",
        }
    }
}

/// Which PGP envelope, if any, wraps the message. Only the MIME framing
/// is produced here; the armored PGP block itself is supplied by the
/// caller as ordinary part content (Non-goal: no OpenPGP implementation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PgpType {
    Encrypt,
    Signature,
}

/// Which multipart container a generated boundary belongs to, for the
/// `multiPartBoundary` precedence rule in §4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum MultipartKind {
    Signed,
    Mixed,
    Related,
    Alternative,
}

/// A producer that writes a part or file's raw payload into the supplied
/// buffer and returns the number of bytes written. Re-invoked on every
/// send, so implementations must be restartable (the reference
/// implementation re-invokes `Writer` on each send); a plain in-memory
/// body is the common case and is always restartable by construction.
pub type BodyWriter = Arc<dyn Fn(&mut Vec<u8>) -> std::io::Result<usize> + Send + Sync>;

/// The raw content of a [`Part`] or [`File`], either already in memory or
/// produced lazily by a [`BodyWriter`].
#[derive(Clone)]
pub enum Body {
    Bytes(Vec<u8>),
    Writer(BodyWriter),
}

impl Body {
    pub(crate) fn materialize(&self) -> std::io::Result<Vec<u8>> {
        match self {
            Body::Bytes(b) => Ok(b.clone()),
            Body::Writer(w) => {
                let mut buf = Vec::new();
                w(&mut buf)?;
                Ok(buf)
            }
        }
    }
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Body::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Body::Writer(_) => f.write_str("Writer(..)"),
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(b: Vec<u8>) -> Self {
        Body::Bytes(b)
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Body::Bytes(s.into_bytes())
    }
}

impl From<&str> for Body {
    fn from(s: &str) -> Self {
        Body::Bytes(s.as_bytes().to_vec())
    }
}

/// One body alternative (e.g. `text/plain`, `text/html`, or the detached
/// S/MIME signature). Ordered sequences of these sit under
/// `multipart/alternative` when more than one is present.
#[derive(Debug, Clone)]
pub struct Part {
    pub content_type: String,
    pub charset: Option<String>,
    pub encoding: Option<Encoding>,
    pub description: Option<String>,
    pub body: Body,
    pub is_deleted: bool,
    pub smime: bool,
}

impl Part {
    pub fn new(content_type: impl Into<String>, body: impl Into<Body>) -> Self {
        Part {
            content_type: content_type.into(),
            charset: None,
            encoding: None,
            description: None,
            body: body.into(),
            is_deleted: false,
            smime: false,
        }
    }

    pub fn text(body: impl Into<Body>) -> Self {
        Part::new("text/plain", body)
    }

    pub fn html(body: impl Into<Body>) -> Self {
        Part::new("text/html", body)
    }

    pub fn charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = Some(charset.into());
        self
    }

    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// An attachment (`multipart/mixed`) or embed (`multipart/related`,
/// referenced by `Content-ID`).
#[derive(Debug, Clone)]
pub struct File {
    pub name: String,
    pub header: Vec<(String, String)>,
    pub content_type: Option<String>,
    pub encoding: Option<Encoding>,
    pub description: Option<String>,
    pub content_id: Option<String>,
    pub body: Body,
}

impl File {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, body: impl Into<Body>) -> Self {
        File {
            name: name.into(),
            header: Vec::new(),
            content_type: Some(content_type.into()),
            encoding: None,
            description: None,
            content_id: None,
            body: body.into(),
        }
    }

    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn content_id(mut self, cid: impl Into<String>) -> Self {
        self.content_id = Some(cid.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.header.push((name.into(), value.into()));
        self
    }
}

/// A composed MIME message, ready for [`crate::Client::send`].
///
/// Mutable until sent; the writer only reads from it, but boundaries and
/// default headers (`Message-ID`, `Date`) generated during serialization
/// are memoized back onto the message so a resend reuses them (Design
/// Notes: "a generated boundary is a random ... string"; reusing it
/// across resends keeps repeated sends of the same `Message` byte-stable).
#[derive(Default)]
pub struct Message {
    pub(crate) gen_headers: Vec<(String, Vec<String>)>,
    pub(crate) preform_headers: Vec<(String, String)>,
    pub(crate) addr_headers: HashMap<AddressHeader, Vec<Address>>,
    pub(crate) parts: Vec<Part>,
    pub(crate) attachments: Vec<File>,
    pub(crate) embeds: Vec<File>,
    pub charset: String,
    pub encoding: Option<Encoding>,
    pub(crate) boundary: Option<String>,
    pub(crate) multipart_boundary: HashMap<MultipartKind, String>,
    pub(crate) message_id: Option<String>,
    pub(crate) date: Option<String>,
    pub pgp_type: Option<PgpType>,
    #[cfg(feature = "smime")]
    pub(crate) smime: Option<Arc<dyn SmimeSigner>>,
    pub is_delivered: bool,
    pub(crate) header_count: usize,
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("Message");
        s.field("gen_headers", &self.gen_headers)
            .field("preform_headers", &self.preform_headers)
            .field("addr_headers", &self.addr_headers)
            .field("parts", &self.parts)
            .field("attachments", &self.attachments)
            .field("embeds", &self.embeds)
            .field("charset", &self.charset)
            .field("encoding", &self.encoding)
            .field("boundary", &self.boundary)
            .field("message_id", &self.message_id)
            .field("date", &self.date)
            .field("pgp_type", &self.pgp_type);
        #[cfg(feature = "smime")]
        s.field("smime", &self.smime.as_ref().map(|_| "<signer>"));
        s.field("is_delivered", &self.is_delivered).finish()
    }
}

impl Message {
    pub fn mail_from(&self) -> Option<&Address> {
        self.addr_headers
            .get(&AddressHeader::From)
            .and_then(|v| v.first())
            .or_else(|| {
                self.addr_headers
                    .get(&AddressHeader::EnvelopeFrom)
                    .and_then(|v| v.first())
            })
    }

    pub fn rcpt_to(&self) -> Vec<&Address> {
        let mut out = Vec::new();
        for header in [AddressHeader::To, AddressHeader::Cc, AddressHeader::Bcc] {
            if let Some(addrs) = self.addr_headers.get(&header) {
                out.extend(addrs.iter());
            }
        }
        out
    }

    /// True if any header value or address contains a non-ASCII byte,
    /// consulted by `MAIL FROM` to decide whether to request `SMTPUTF8`.
    pub fn has_non_ascii(&self) -> bool {
        self.gen_headers
            .iter()
            .any(|(_, values)| values.iter().any(|v| !v.is_ascii()))
            || self
                .addr_headers
                .values()
                .flatten()
                .any(|a| !a.email.is_ascii() || a.name.as_deref().is_some_and(|n| !n.is_ascii()))
    }
}

/// Owned builder over [`Message`], following the teacher's convention of
/// `fn foo(mut self) -> Self` methods returning an owned value rather
/// than `&mut self`.
#[derive(Debug, Default)]
pub struct MessageBuilder {
    message: Message,
}

impl MessageBuilder {
    pub fn new() -> Self {
        MessageBuilder {
            message: Message {
                charset: "UTF-8".to_string(),
                ..Default::default()
            },
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        if let Some((_, values)) = self
            .message
            .gen_headers
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(&name))
        {
            values.push(value);
        } else {
            self.message.gen_headers.push((name, vec![value]));
        }
        self
    }

    /// A header emitted verbatim, bypassing folding.
    pub fn preformatted_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.message.preform_headers.push((name.into(), value.into()));
        self
    }

    pub fn subject(self, subject: impl Into<String>) -> Self {
        self.header("Subject", subject)
    }

    pub fn message_id(mut self, id: impl Into<String>) -> Self {
        self.message.message_id = Some(id.into());
        self
    }

    fn addr(mut self, header: AddressHeader, address: impl Into<Address>) -> Self {
        self.message
            .addr_headers
            .entry(header)
            .or_default()
            .push(address.into());
        self
    }

    fn addrs(mut self, header: AddressHeader, addresses: impl IntoIterator<Item = impl Into<Address>>) -> Self {
        let entry = self.message.addr_headers.entry(header).or_default();
        entry.extend(addresses.into_iter().map(Into::into));
        self
    }

    pub fn from(self, address: impl Into<Address>) -> Self {
        self.addr(AddressHeader::From, address)
    }

    pub fn envelope_from(self, address: impl Into<Address>) -> Self {
        self.addr(AddressHeader::EnvelopeFrom, address)
    }

    pub fn to(self, addresses: impl IntoIterator<Item = impl Into<Address>>) -> Self {
        self.addrs(AddressHeader::To, addresses)
    }

    pub fn cc(self, addresses: impl IntoIterator<Item = impl Into<Address>>) -> Self {
        self.addrs(AddressHeader::Cc, addresses)
    }

    pub fn bcc(self, addresses: impl IntoIterator<Item = impl Into<Address>>) -> Self {
        self.addrs(AddressHeader::Bcc, addresses)
    }

    pub fn reply_to(self, address: impl Into<Address>) -> Self {
        self.addr(AddressHeader::ReplyTo, address)
    }

    pub fn text_body(mut self, body: impl Into<Body>) -> Self {
        self.message.parts.push(Part::text(body));
        self
    }

    pub fn html_body(mut self, body: impl Into<Body>) -> Self {
        self.message.parts.push(Part::html(body));
        self
    }

    pub fn body_part(mut self, part: Part) -> Self {
        self.message.parts.push(part);
        self
    }

    pub fn attachment(mut self, file: File) -> Self {
        self.message.attachments.push(file);
        self
    }

    pub fn embed(mut self, file: File) -> Self {
        self.message.embeds.push(file);
        self
    }

    pub fn boundary(mut self, boundary: impl Into<String>) -> Self {
        self.message.boundary = Some(boundary.into());
        self
    }

    pub fn charset(mut self, charset: impl Into<String>) -> Self {
        self.message.charset = charset.into();
        self
    }

    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.message.encoding = Some(encoding);
        self
    }

    pub fn pgp(mut self, pgp_type: PgpType) -> Self {
        self.message.pgp_type = Some(pgp_type);
        self
    }

    #[cfg(feature = "smime")]
    pub fn smime(mut self, signer: Arc<dyn SmimeSigner>) -> Self {
        self.message.smime = Some(signer);
        self
    }

    pub fn build(self) -> Message {
        self.message
    }
}

impl From<MessageBuilder> for Message {
    fn from(builder: MessageBuilder) -> Self {
        builder.build()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn builder_collects_addresses_and_parts() {
        let msg: Message = MessageBuilder::new()
            .from(("John Doe", "john@example.com"))
            .to(vec![("Jane Doe", "jane@example.com")])
            .subject("Hi!")
            .html_body("<h1>Hello, world!</h1>")
            .text_body("Hello world!")
            .into();

        assert_eq!(msg.mail_from().unwrap().email, "john@example.com");
        assert_eq!(msg.rcpt_to().len(), 1);
        assert_eq!(msg.parts.len(), 2);
    }

    #[test]
    fn address_validity() {
        assert!(Address::new("valid@domain.tld").is_valid());
        assert!(!Address::new("not-an-address").is_valid());
    }
}
