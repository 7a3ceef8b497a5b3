/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! Serializes a [`super::Message`] into the exact bytes handed to
//! `DATA`: default headers, lexicographically sorted generic headers,
//! verbatim preformatted headers, address headers, and the nested
//! multipart tree (`signed` → `mixed` → `related` → `alternative`),
//! per §4.6. The tree is built bottom-up as a stack of at most four
//! levels rather than by open-ended recursion (Design Notes).

use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;

use super::encoding::{base64_encode_wrapped, is_eight_bit, quoted_printable_encode, sanitize_filename};
use super::headers::{encode_word, fold_header};
use super::{Address, AddressHeader, Body, Encoding, Message, MultipartKind, Part, PgpType};

/// A rendered MIME node: the header lines that describe it when nested
/// inside a parent container (or the top-level message header section),
/// plus the exact bytes that follow the blank line.
struct Rendered {
    header_lines: Vec<String>,
    bytes: Vec<u8>,
}

fn generate_boundary() -> String {
    let mut bytes = [0u8; 30];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex_encode(&bytes)
}

fn generate_message_id(host: &str) -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("<{}@{}>", hex_encode(&bytes), host)
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

const DAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// RFC 5322 §3.3 date, e.g. `Tue, 01 Jul 2025 12:34:56 +0000`. Computed
/// from `SystemTime` with no external date/time crate, matching the
/// "no fabricated dependencies" rule: rather than add a new crate for a
/// one-shot calendar conversion, this uses the well-known civil-from-days
/// algorithm (Howard Hinnant's `civil_from_days`).
pub(crate) fn rfc5322_date_now() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    let days = secs.div_euclid(86400);
    let time_of_day = secs.rem_euclid(86400);
    let (hh, mm, ss) = (time_of_day / 3600, (time_of_day / 60) % 60, time_of_day % 60);

    let (year, month, day) = civil_from_days(days);
    // 1970-01-01 was a Thursday (weekday index 4).
    let weekday = ((days % 7 + 7 + 4) % 7) as usize;

    format!(
        "{}, {:02} {} {:04} {:02}:{:02}:{:02} +0000",
        DAYS[weekday], day, MONTHS[(month - 1) as usize], year, hh, mm, ss
    )
}

fn civil_from_days(z: i64) -> (i64, i64, i64) {
    let z = z + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = (z - era * 146097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as i64;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as i64;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

fn pick_boundary(msg: &mut Message, kind: MultipartKind) -> String {
    if let Some(b) = &msg.boundary {
        return b.clone();
    }
    if let Some(b) = msg.multipart_boundary.get(&kind) {
        return b.clone();
    }
    let b = generate_boundary();
    msg.multipart_boundary.insert(kind, b);
    msg.multipart_boundary[&kind].clone()
}

fn format_address(addr: &Address, charset: &str) -> String {
    match &addr.name {
        Some(name) if !name.is_empty() => {
            if name.is_ascii() {
                format!("\"{}\" <{}>", name.replace('"', "'"), addr.email)
            } else {
                format!("{} <{}>", encode_word(name, charset), addr.email)
            }
        }
        _ => addr.email.clone(),
    }
}

fn encode_body(body: &[u8], encoding: Encoding) -> std::io::Result<Vec<u8>> {
    Ok(match encoding {
        Encoding::QuotedPrintable => quoted_printable_encode(body),
        Encoding::Base64 => base64_encode_wrapped(body),
        Encoding::SevenBit | Encoding::EightBit => body.to_vec(),
    })
}

fn render_part(part: &Part, msg: &Message) -> crate::Result<Rendered> {
    let body = part.body.materialize()?;
    let encoding = part.encoding.unwrap_or(msg.encoding.unwrap_or(Encoding::QuotedPrintable));
    let encoded = encode_body(&body, encoding)?;

    let mut content_type = part.content_type.clone();
    if !part.smime {
        let charset = part.charset.as_deref().unwrap_or(&msg.charset);
        content_type.push_str(&format!("; charset={charset}"));
    }

    let mut header_lines = vec![
        format!("Content-Type: {content_type}"),
        format!("Content-Transfer-Encoding: {}", encoding.cte_name()),
    ];
    if let Some(desc) = &part.description {
        header_lines.push(format!("Content-Description: {}", encode_word(desc, &msg.charset)));
    }

    Ok(Rendered {
        header_lines,
        bytes: encoded,
    })
}

fn render_file(file: &super::File, msg: &Message, disposition: &str) -> crate::Result<Rendered> {
    let body = file.body.materialize()?;
    let encoding = file.encoding.unwrap_or(Encoding::Base64);
    let encoded = encode_body(&body, encoding)?;

    let safe_name = sanitize_filename(&file.name);
    let content_type = file
        .content_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".to_string());

    let mut header_lines = Vec::new();
    let has_preset = |n: &str| file.header.iter().any(|(k, _)| k.eq_ignore_ascii_case(n));

    if !has_preset("Content-Type") {
        let charset_param = if content_type.starts_with("text/") {
            format!("; charset={}", msg.charset.to_ascii_lowercase())
        } else {
            String::new()
        };
        header_lines.push(format!(
            "Content-Type: {content_type}{charset_param}; name=\"{safe_name}\""
        ));
    }
    if !has_preset("Content-Disposition") {
        header_lines.push(format!("Content-Disposition: {disposition}; filename=\"{safe_name}\""));
    }
    if !has_preset("Content-Transfer-Encoding") {
        header_lines.push(format!("Content-Transfer-Encoding: {}", encoding.cte_name()));
    }
    if let Some(desc) = &file.description {
        if !has_preset("Content-Description") {
            header_lines.push(format!(
                "Content-Description: {}",
                encode_word(desc, &msg.charset)
            ));
        }
    }
    if disposition == "inline" && !has_preset("Content-ID") {
        let cid = file
            .content_id
            .clone()
            .unwrap_or_else(|| sanitize_filename(&file.name));
        header_lines.push(format!("Content-ID: <{cid}>"));
    }
    for (name, value) in &file.header {
        header_lines.push(format!("{name}: {value}"));
    }

    Ok(Rendered {
        header_lines,
        bytes: encoded,
    })
}

fn assemble_multipart(kind: &str, extra_params: &str, boundary: &str, children: Vec<Rendered>) -> Rendered {
    let mut bytes = Vec::new();
    for child in &children {
        bytes.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        for line in &child.header_lines {
            bytes.extend_from_slice(line.as_bytes());
            bytes.extend_from_slice(b"\r\n");
        }
        bytes.extend_from_slice(b"\r\n");
        bytes.extend_from_slice(&child.bytes);
        bytes.extend_from_slice(b"\r\n");
    }
    bytes.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

    Rendered {
        header_lines: vec![format!("Content-Type: multipart/{kind};\r\n boundary={boundary}{extra_params}")],
        bytes,
    }
}

fn build_alternative(msg: &mut Message) -> crate::Result<Rendered> {
    let live: Vec<&Part> = msg.parts.iter().filter(|p| !p.is_deleted).collect();
    if live.is_empty() {
        let empty = Part::text(Vec::new());
        return render_part(&empty, msg);
    }
    if live.len() == 1 {
        return render_part(live[0], msg);
    }
    let mut children = Vec::with_capacity(live.len());
    for part in &live {
        children.push(render_part(part, msg)?);
    }
    let boundary = pick_boundary(msg, MultipartKind::Alternative);
    Ok(assemble_multipart("alternative", "", &boundary, children))
}

fn wrap_related(msg: &mut Message, inner: Rendered) -> crate::Result<Rendered> {
    if msg.embeds.is_empty() {
        return Ok(inner);
    }
    let embeds = std::mem::take(&mut msg.embeds);
    let mut children = vec![inner];
    for file in &embeds {
        children.push(render_file(file, msg, "inline")?);
    }
    msg.embeds = embeds;
    let boundary = pick_boundary(msg, MultipartKind::Related);
    Ok(assemble_multipart("related", "", &boundary, children))
}

fn wrap_mixed(msg: &mut Message, inner: Rendered) -> crate::Result<Rendered> {
    if msg.attachments.is_empty() {
        return Ok(inner);
    }
    let attachments = std::mem::take(&mut msg.attachments);
    let mut children = vec![inner];
    for file in &attachments {
        children.push(render_file(file, msg, "attachment")?);
    }
    msg.attachments = attachments;
    let boundary = pick_boundary(msg, MultipartKind::Mixed);
    Ok(assemble_multipart("mixed", "", &boundary, children))
}

#[cfg(feature = "smime")]
fn wrap_signed(msg: &mut Message, inner: Rendered) -> crate::Result<Rendered> {
    let Some(signer) = msg.smime.clone() else {
        return Ok(inner);
    };

    let mut canonical = Vec::new();
    for line in &inner.header_lines {
        canonical.extend_from_slice(line.as_bytes());
        canonical.extend_from_slice(b"\r\n");
    }
    canonical.extend_from_slice(b"\r\n");
    canonical.extend_from_slice(&inner.bytes);

    let der = signer.sign(&canonical)?;
    let signature = Rendered {
        header_lines: vec![
            "Content-Type: application/pkcs7-signature; name=\"smime.p7s\"".to_string(),
            "Content-Transfer-Encoding: base64".to_string(),
            "Content-Disposition: attachment; filename=\"smime.p7s\"".to_string(),
        ],
        bytes: base64_encode_wrapped(&der),
    };

    let boundary = pick_boundary(msg, MultipartKind::Signed);
    Ok(assemble_multipart(
        "signed",
        "; protocol=\"application/pkcs7-signature\"; micalg=sha-256",
        &boundary,
        vec![inner, signature],
    ))
}

/// PGP output frames the already-armored content the caller supplied as
/// ordinary parts (Non-goal: no OpenPGP implementation here). The two
/// `PgpType`s produce different RFC 3156 shapes: `multipart/encrypted` is
/// a `Version: 1` control part followed by the encrypted blob, while
/// `multipart/signed` is the signed content followed by the detached
/// `application/pgp-signature` part — there is no control part in the
/// signed case.
fn write_pgp(msg: &mut Message, pgp_type: PgpType) -> crate::Result<Rendered> {
    let boundary = match msg.boundary.clone() {
        Some(boundary) => boundary,
        None => pick_boundary(msg, MultipartKind::Mixed),
    };
    let live: Vec<&Part> = msg.parts.iter().filter(|p| !p.is_deleted).collect();

    match pgp_type {
        PgpType::Encrypt => {
            let control = Rendered {
                header_lines: vec!["Content-Type: application/pgp-encrypted".to_string()],
                bytes: b"Version: 1\r\n".to_vec(),
            };
            let content = if let Some(part) = live.first() {
                render_part(part, msg)?
            } else {
                render_part(&Part::text(Vec::new()), msg)?
            };
            Ok(assemble_multipart(
                "encrypted",
                "; protocol=\"application/pgp-encrypted\"",
                &boundary,
                vec![control, content],
            ))
        }
        PgpType::Signature => {
            let content = if let Some(part) = live.first() {
                render_part(part, msg)?
            } else {
                render_part(&Part::text(Vec::new()), msg)?
            };
            // No charset parameter belongs on the detached signature part;
            // `smime` doubles as the "skip charset" flag `render_part`
            // already honors for the S/MIME signature part.
            let signature = if let Some(part) = live.get(1) {
                let mut sig_part = (*part).clone();
                sig_part.smime = true;
                render_part(&sig_part, msg)?
            } else {
                let mut sig_part = Part::new("application/pgp-signature", Vec::new());
                sig_part.smime = true;
                render_part(&sig_part, msg)?
            };
            Ok(assemble_multipart(
                "signed",
                "; protocol=\"application/pgp-signature\"; micalg=pgp-sha256",
                &boundary,
                vec![content, signature],
            ))
        }
    }
}

fn write_headers(msg: &mut Message, out: &mut Vec<u8>, body_header_lines: &[String]) {
    let has_header = |msg: &Message, name: &str| {
        msg.gen_headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
            || msg.preform_headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    };

    let mut lines: Vec<String> = Vec::new();

    if !has_header(msg, "MIME-Version") {
        lines.push("MIME-Version: 1.0".to_string());
    }
    if !has_header(msg, "Date") {
        let date = msg.date.clone().unwrap_or_else(rfc5322_date_now);
        msg.date = Some(date.clone());
        lines.push(format!("Date: {date}"));
    }
    if !has_header(msg, "Message-ID") {
        let host = gethostname::gethostname()
            .to_str()
            .unwrap_or("localhost")
            .to_string();
        let id = msg
            .message_id
            .clone()
            .unwrap_or_else(|| generate_message_id(&host));
        msg.message_id = Some(id.clone());
        lines.push(format!("Message-ID: {id}"));
    }
    if !has_header(msg, "User-Agent") {
        lines.push(format!(
            "User-Agent: {}/{}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        ));
    }

    let mut generic = msg.gen_headers.clone();
    generic.sort_by(|a, b| a.0.to_ascii_lowercase().cmp(&b.0.to_ascii_lowercase()));
    for (name, values) in &generic {
        lines.push(fold_header(name, values));
    }

    for (name, value) in &msg.preform_headers {
        lines.push(super::headers::write_preformatted(name, value));
    }

    let charset = msg.charset.clone();
    if let Some(from) = msg
        .addr_headers
        .get(&AddressHeader::From)
        .filter(|v| !v.is_empty())
        .or_else(|| msg.addr_headers.get(&AddressHeader::EnvelopeFrom))
    {
        if !from.is_empty() {
            let joined = from.iter().map(|a| format_address(a, &charset)).collect::<Vec<_>>();
            lines.push(fold_header("From", &joined));
        }
    }
    for (header, name) in [
        (AddressHeader::To, "To"),
        (AddressHeader::Cc, "Cc"),
        (AddressHeader::ReplyTo, "Reply-To"),
    ] {
        if let Some(addrs) = msg.addr_headers.get(&header) {
            if !addrs.is_empty() {
                let joined = addrs.iter().map(|a| format_address(a, &charset)).collect::<Vec<_>>();
                lines.push(fold_header(name, &joined));
            }
        }
    }

    lines.extend_from_slice(body_header_lines);

    msg.header_count = lines.len();
    for line in &lines {
        out.extend_from_slice(line.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
}

/// Serializes `msg` into the full header-section-plus-body byte stream
/// handed to `DATA`.
pub fn serialize_message(msg: &mut Message) -> crate::Result<Vec<u8>> {
    let mut out = Vec::new();

    let body = if let Some(pgp_type) = msg.pgp_type {
        write_pgp(msg, pgp_type)?
    } else {
        let alt = build_alternative(msg)?;
        let related = wrap_related(msg, alt)?;
        let mixed = wrap_mixed(msg, related)?;
        #[cfg(feature = "smime")]
        {
            wrap_signed(msg, mixed)?
        }
        #[cfg(not(feature = "smime"))]
        {
            mixed
        }
    };

    write_headers(msg, &mut out, &body.header_lines);
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&body.bytes);
    Ok(out)
}

/// `true` if the serialized body contains any byte outside 7-bit ASCII,
/// consulted by the SMTP layer to decide whether `BODY=8BITMIME` must be
/// requested (or the transaction must fail with `NoUnencoded`).
pub fn body_is_eight_bit(bytes: &[u8]) -> bool {
    is_eight_bit(bytes)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::message::{Encoding, File, MessageBuilder, PgpType};

    #[test]
    fn minimal_message_s1() {
        let mut msg: Message = MessageBuilder::new()
            .from("valid-from@domain.tld")
            .to(vec!["valid-to@domain.tld"])
            .subject("Testmail")
            .text_body("Testmail")
            .into();

        let bytes = serialize_message(&mut msg).unwrap();
        let text = String::from_utf8(bytes).unwrap();

        assert!(text.contains("Subject: Testmail\r\n"));
        assert!(text.contains("Content-Type: text/plain; charset=UTF-8\r\n"));
        assert!(text.contains("Content-Transfer-Encoding: quoted-printable\r\n"));
        assert!(text.contains("\r\n\r\nTestmail"));
    }

    #[test]
    fn generic_headers_emit_in_lexicographic_order() {
        let mut msg: Message = MessageBuilder::new()
            .header("Zebra", "z")
            .header("Apple", "a")
            .from("a@b.tld")
            .to(vec!["c@d.tld"])
            .text_body("hi")
            .into();
        let bytes = serialize_message(&mut msg).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let apple_pos = text.find("Apple:").unwrap();
        let zebra_pos = text.find("Zebra:").unwrap();
        assert!(apple_pos < zebra_pos);
    }

    #[test]
    fn attachment_multipart_s5() {
        let mut msg: Message = MessageBuilder::new()
            .from("valid-from@domain.tld")
            .to(vec!["valid-to@domain.tld"])
            .text_body("body")
            .attachment(File::new(
                "attachment.txt",
                "text/plain",
                "This is a test attachment\n",
            ))
            .boundary("testboundary")
            .into();

        let bytes = serialize_message(&mut msg).unwrap();
        let text = String::from_utf8(bytes).unwrap();

        assert!(text.contains("Content-Type: multipart/mixed;\r\n boundary=testboundary\r\n"));
        assert!(text.contains("--testboundary\r\n"));
        assert!(text.contains("Content-Type: text/plain; charset=utf-8; name=\"attachment.txt\"\r\n"));
        assert!(text.contains("Content-Disposition: attachment; filename=\"attachment.txt\"\r\n"));
        assert!(text.contains("Content-Transfer-Encoding: base64\r\n"));
        assert!(text.contains("VGhpcyBpcyBhIHRlc3QgYXR0YWNobWVudAo=\r\n"));
        assert!(text.contains("--testboundary--\r\n"));
    }

    #[test]
    fn boundary_uniqueness_across_two_messages() {
        let mut m1: Message = MessageBuilder::new()
            .from("a@b.tld")
            .to(vec!["c@d.tld"])
            .text_body("a")
            .attachment(File::new("f.txt", "text/plain", "x"))
            .into();
        let mut m2: Message = MessageBuilder::new()
            .from("a@b.tld")
            .to(vec!["c@d.tld"])
            .text_body("a")
            .attachment(File::new("f.txt", "text/plain", "x"))
            .into();
        let b1 = serialize_message(&mut m1).unwrap();
        let b2 = serialize_message(&mut m2).unwrap();
        assert_ne!(b1, b2);
    }

    #[test]
    fn eight_bit_encoding_passes_through_unencoded() {
        let mut msg: Message = MessageBuilder::new()
            .from("a@b.tld")
            .to(vec!["c@d.tld"])
            .encoding(Encoding::EightBit)
            .text_body("café")
            .into();
        let bytes = serialize_message(&mut msg).unwrap();
        assert!(body_is_eight_bit(&bytes));
    }

    #[test]
    fn line_length_invariant() {
        let mut msg: Message = MessageBuilder::new()
            .from("a@b.tld")
            .to(vec!["c@d.tld"])
            .header(
                "X-Long",
                "a very long header value that should wrap across several lines because it exceeds the budget by quite a lot",
            )
            .text_body("hi")
            .into();
        let bytes = serialize_message(&mut msg).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        for line in text.split("\r\n") {
            // Message-ID may legitimately exceed the budget on machines with
            // a long hostname; it is a single atomic token and is not folded.
            if line.starts_with("Message-ID:") {
                continue;
            }
            assert!(line.len() <= 76, "line too long: {line:?}");
        }
    }

    #[test]
    fn pgp_signed_container_frames_content_then_signature() {
        let mut msg: Message = MessageBuilder::new()
            .from("a@b.tld")
            .to(vec!["c@d.tld"])
            .text_body("signed body")
            .body_part(Part::new("application/pgp-signature", "-----BEGIN PGP SIGNATURE-----\n...\n-----END PGP SIGNATURE-----\n"))
            .pgp(PgpType::Signature)
            .boundary("pgpboundary")
            .into();

        let bytes = serialize_message(&mut msg).unwrap();
        let text = String::from_utf8(bytes).unwrap();

        assert!(text.contains(
            "Content-Type: multipart/signed;\r\n boundary=pgpboundary; protocol=\"application/pgp-signature\"; micalg=pgp-sha256\r\n"
        ));
        assert!(!text.contains("Version: 1"));
        let content_pos = text.find("signed body").unwrap();
        let signature_pos = text.find("-----BEGIN PGP SIGNATURE-----").unwrap();
        assert!(content_pos < signature_pos, "content must precede the detached signature");
        let sig_header_start = text[..signature_pos].rfind("Content-Type: application/pgp-signature").unwrap();
        let sig_header_line = &text[sig_header_start..signature_pos];
        assert!(
            !sig_header_line.contains("charset"),
            "detached signature part must not carry a charset parameter"
        );
    }
}
