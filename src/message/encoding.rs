/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! Content-Transfer-Encoding codecs (RFC 2045 §6) and filename
//! sanitization for `Content-Disposition`.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

const LINE_LIMIT: usize = 76;
const HEX: &[u8; 16] = b"0123456789ABCDEF";

/// RFC 2045 §6.7 quoted-printable, with soft line breaks keeping encoded
/// lines at or under 76 characters.
pub fn quoted_printable_encode(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len() + input.len() / 3 + 16);
    let mut col = 0usize;
    let mut i = 0;

    while i < input.len() {
        let byte = input[i];

        if byte == b'\r' && input.get(i + 1) == Some(&b'\n') {
            out.extend_from_slice(b"\r\n");
            col = 0;
            i += 2;
            continue;
        }
        if byte == b'\n' {
            out.extend_from_slice(b"\r\n");
            col = 0;
            i += 1;
            continue;
        }

        let is_trailing_ws = (byte == b' ' || byte == b'\t')
            && matches!(input.get(i + 1), None | Some(b'\r') | Some(b'\n'));
        let printable = (0x21..=0x7e).contains(&byte) && byte != b'=';

        if printable || ((byte == b' ' || byte == b'\t') && !is_trailing_ws) {
            if col + 1 > LINE_LIMIT {
                out.extend_from_slice(b"=\r\n");
                col = 0;
            }
            out.push(byte);
            col += 1;
        } else {
            if col + 3 > LINE_LIMIT {
                out.extend_from_slice(b"=\r\n");
                col = 0;
            }
            out.push(b'=');
            out.push(HEX[(byte >> 4) as usize]);
            out.push(HEX[(byte & 0x0f) as usize]);
            col += 3;
        }
        i += 1;
    }
    out
}

/// Standard base64, padded, wrapped at 76 characters per line.
pub fn base64_encode_wrapped(input: &[u8]) -> Vec<u8> {
    let encoded = BASE64.encode(input);
    let mut out = Vec::with_capacity(encoded.len() + encoded.len() / LINE_LIMIT * 2 + 2);
    for chunk in encoded.as_bytes().chunks(LINE_LIMIT) {
        out.extend_from_slice(chunk);
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// Replaces control characters, DEL, and `" / : < > ? \ |` with `_`.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if (c as u32) < 0x20
                || c == '\u{7f}'
                || matches!(c, '"' | '/' | ':' | '<' | '>' | '?' | '\\' | '|')
            {
                '_'
            } else {
                c
            }
        })
        .collect()
}

/// `true` if any byte is outside the 7-bit ASCII range.
pub fn is_eight_bit(data: &[u8]) -> bool {
    data.iter().any(|b| *b >= 0x80)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn quoted_printable_escapes_equals_and_high_bytes() {
        let encoded = quoted_printable_encode("café=1".as_bytes());
        assert_eq!(String::from_utf8(encoded).unwrap(), "caf=C3=A9=3D1");
    }

    #[test]
    fn quoted_printable_preserves_crlf() {
        let encoded = quoted_printable_encode(b"line one\r\nline two");
        assert_eq!(
            String::from_utf8(encoded).unwrap(),
            "line one\r\nline two"
        );
    }

    #[test]
    fn quoted_printable_escapes_trailing_whitespace() {
        let encoded = quoted_printable_encode(b"trailing \r\nspace");
        assert_eq!(
            String::from_utf8(encoded).unwrap(),
            "trailing=20\r\nspace"
        );
    }

    #[test]
    fn quoted_printable_soft_wraps_long_lines() {
        let input = vec![b'a'; 100];
        let encoded = quoted_printable_encode(&input);
        for line in encoded.split(|b| *b == b'\n') {
            assert!(line.len() <= LINE_LIMIT + 1); // + trailing \r
        }
    }

    #[test]
    fn base64_wraps_at_76() {
        let encoded = base64_encode_wrapped(b"This is a test attachment\n");
        assert_eq!(
            String::from_utf8(encoded).unwrap(),
            "VGhpcyBpcyBhIHRlc3QgYXR0YWNobWVudAo=\r\n"
        );
    }

    #[test]
    fn base64_wraps_multiple_lines() {
        let input = vec![b'A'; 200];
        let encoded = base64_encode_wrapped(&input);
        for line in String::from_utf8(encoded).unwrap().lines() {
            assert!(line.len() <= LINE_LIMIT);
        }
    }

    #[test]
    fn sanitizes_forbidden_characters() {
        assert_eq!(sanitize_filename("a/b:c<d>e?f\\g|h\"i"), "a_b_c_d_e_f_g_h_i");
        assert_eq!(sanitize_filename("normal name.txt"), "normal name.txt");
    }
}
