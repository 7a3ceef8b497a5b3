/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! Header line folding (RFC 5322 §2.2.3) and RFC 2047 encoded-word
//! encoding of non-ASCII header content.

const LINE_LIMIT: usize = 76;

/// Folds `name: value1, value2, ...` to at most 76 characters per line,
/// inserting `CRLF ` (one leading space) before any token that would
/// overflow. See §4.6 item 2 for the exact budget-tracking rule.
pub fn fold_header(name: &str, values: &[String]) -> String {
    let joined = values.join(", ");
    let mut out = String::with_capacity(name.len() + joined.len() + 4);
    out.push_str(name);
    out.push_str(": ");

    let mut budget = LINE_LIMIT.saturating_sub(name.len() + 2);
    let mut first = true;

    for token in joined.split(' ') {
        if token.is_empty() {
            continue;
        }
        let cost = token.len() + usize::from(!first);

        if !first && cost > budget {
            out.push_str("\r\n ");
            budget = LINE_LIMIT - 3;
        } else if !first {
            out.push(' ');
            budget = budget.saturating_sub(1);
        }

        out.push_str(token);
        budget = budget.saturating_sub(token.len());
        first = false;
    }

    out
}

/// Emits a preformatted header verbatim, one `CRLF` terminated line.
pub fn write_preformatted(name: &str, value: &str) -> String {
    format!("{name}: {value}")
}

/// RFC 2047 `Q`-encoding of a header value that contains non-ASCII bytes.
/// ASCII-only input is returned unchanged. Long values are split across
/// multiple adjacent encoded-words joined by `CRLF ` so no single encoded
/// word pushes the line past 76 characters.
pub fn encode_word(input: &str, charset: &str) -> String {
    if input.is_ascii() {
        return input.to_string();
    }

    // Budget for the base64-ish Q-encoded payload per word: 76 minus the
    // `=?charset?Q??=` wrapper and a safety margin for multi-byte escapes
    // that must not be split across words.
    let wrapper_len = charset.len() + 7; // "=?" + charset + "?Q?" + "?="
    let max_body = LINE_LIMIT.saturating_sub(wrapper_len).max(8);

    let mut words = Vec::new();
    let mut body = String::new();

    let push_escaped = |body: &mut String, byte: u8| match byte {
        b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' => body.push(byte as char),
        b' ' => body.push('_'),
        _ => body.push_str(&format!("={byte:02X}")),
    };

    for ch in input.chars() {
        let mut buf = [0u8; 4];
        let encoded_ch = ch.encode_utf8(&mut buf);
        let mut candidate = String::new();
        for byte in encoded_ch.as_bytes() {
            push_escaped(&mut candidate, *byte);
        }
        if body.len() + candidate.len() > max_body && !body.is_empty() {
            words.push(std::mem::take(&mut body));
        }
        body.push_str(&candidate);
    }
    if !body.is_empty() {
        words.push(body);
    }

    words
        .into_iter()
        .map(|body| format!("=?{charset}?Q?{body}?="))
        .collect::<Vec<_>>()
        .join("\r\n ")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ascii_values_pass_through_unescaped() {
        assert_eq!(encode_word("Testmail", "UTF-8"), "Testmail");
    }

    #[test]
    fn non_ascii_value_is_q_encoded() {
        let encoded = encode_word("café", "UTF-8");
        assert_eq!(encoded, "=?UTF-8?Q?caf=C3=A9?=");
    }

    #[test]
    fn fold_keeps_lines_at_or_under_76() {
        let long = vec!["word".repeat(30)];
        let folded = fold_header("X-Long", &long);
        for line in folded.split("\r\n") {
            assert!(line.trim_start().len() <= LINE_LIMIT || !line.contains(' '));
        }
    }

    #[test]
    fn fold_wraps_at_word_boundary() {
        let values = vec!["one two three four five six seven eight nine ten eleven twelve \
thirteen fourteen fifteen"
            .to_string()];
        let folded = fold_header("Subject", &values);
        assert!(folded.contains("\r\n "));
    }
}
