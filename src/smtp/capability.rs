/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! The EHLO extension table: each continuation line of a `250` greeting
//! reply is `KEYWORD[ args...]`; this module turns that into a structured
//! set the rest of the client consults to decide what to do.

use std::collections::HashMap;

use crate::smtp::reply::Reply;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub hostname: String,
    pub auth_mechanisms: Vec<String>,
    pub start_tls: bool,
    pub eight_bit_mime: bool,
    pub smtp_utf8: bool,
    pub dsn: bool,
    pub enhanced_status_codes: bool,
    pub pipelining: bool,
    pub chunking: bool,
    pub size: Option<usize>,
    /// Any keyword not listed above, keyed by name, with its raw argument
    /// string (possibly empty). Kept around so advisory extensions this
    /// crate does not otherwise model are still observable.
    pub other: HashMap<String, String>,
}

impl Capabilities {
    /// Parses the greeting reply of an `EHLO`/`LHLO` command. The first
    /// line is the server's hostname plus a greeting message; every
    /// subsequent line is `KEYWORD[ args]`.
    pub fn parse(reply: &Reply) -> crate::Result<Self> {
        if !reply.is_positive_completion() {
            return Err(crate::Error::Protocol(crate::ProtocolError {
                during: "EHLO",
                reply: Some(reply.clone()),
            }));
        }

        let mut caps = Capabilities::default();
        for (pos, line) in reply.message().iter().enumerate() {
            if pos == 0 {
                caps.hostname = line.split(' ').next().unwrap_or_default().to_string();
                continue;
            }

            let mut tokens = line.split(' ');
            let keyword = match tokens.next() {
                Some(k) if !k.is_empty() => k,
                _ => continue,
            };

            match keyword.to_ascii_uppercase().as_str() {
                "AUTH" => {
                    caps.auth_mechanisms
                        .extend(tokens.map(|m| m.to_ascii_uppercase()));
                }
                "STARTTLS" => caps.start_tls = true,
                "8BITMIME" => caps.eight_bit_mime = true,
                "SMTPUTF8" => caps.smtp_utf8 = true,
                "DSN" => caps.dsn = true,
                "ENHANCEDSTATUSCODES" => caps.enhanced_status_codes = true,
                "PIPELINING" => caps.pipelining = true,
                "CHUNKING" => caps.chunking = true,
                "SIZE" => caps.size = tokens.next().and_then(|s| s.parse().ok()),
                other => {
                    caps.other
                        .insert(other.to_string(), tokens.collect::<Vec<_>>().join(" "));
                }
            }
        }

        Ok(caps)
    }

    pub fn has_auth_mechanism(&self, mechanism: &str) -> bool {
        self.auth_mechanisms
            .iter()
            .any(|m| m.eq_ignore_ascii_case(mechanism))
    }
}

#[cfg(test)]
mod test {
    use crate::smtp::reply::ReplyParser;

    use super::Capabilities;

    #[test]
    fn parses_known_keywords() {
        let mut parser = ReplyParser::new();
        let reply = parser
            .parse(
                b"250-mail.example.com greets client.example.com\r\n\
250-AUTH PLAIN LOGIN CRAM-MD5\r\n\
250-8BITMIME\r\n\
250-SMTPUTF8\r\n\
250-DSN\r\n\
250-ENHANCEDSTATUSCODES\r\n\
250-PIPELINING\r\n\
250-SIZE 35882577\r\n\
250 STARTTLS\r\n",
            )
            .unwrap();

        let caps = Capabilities::parse(&reply).unwrap();
        assert_eq!(caps.hostname, "mail.example.com");
        assert_eq!(caps.auth_mechanisms, vec!["PLAIN", "LOGIN", "CRAM-MD5"]);
        assert!(caps.eight_bit_mime);
        assert!(caps.smtp_utf8);
        assert!(caps.dsn);
        assert!(caps.enhanced_status_codes);
        assert!(caps.pipelining);
        assert!(caps.start_tls);
        assert_eq!(caps.size, Some(35882577));
    }

    #[test]
    fn unknown_keyword_is_preserved() {
        let mut parser = ReplyParser::new();
        let reply = parser
            .parse(b"250-mail.example.com\r\n250 XCLIENT LOGIN\r\n")
            .unwrap();
        let caps = Capabilities::parse(&reply).unwrap();
        assert_eq!(caps.other.get("XCLIENT").map(String::as_str), Some("LOGIN"));
    }

    #[test]
    fn no_extensions() {
        let mut parser = ReplyParser::new();
        let reply = parser.parse(b"250 mail.example.com is on the air\r\n").unwrap();
        let caps = Capabilities::parse(&reply).unwrap();
        assert_eq!(caps.hostname, "mail.example.com");
        assert!(caps.auth_mechanisms.is_empty());
        assert!(!caps.start_tls);
    }
}
