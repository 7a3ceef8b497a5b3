/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! Decoding of SMTP replies (RFC 5321 §4.2), including the optional
//! enhanced status code (RFC 3463) that prefixes the text when the server
//! advertised `ENHANCEDSTATUSCODES`.

use std::fmt::Display;

const MAX_MESSAGE_LENGTH: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    PositiveCompletion = 2,
    PositiveIntermediate = 3,
    TransientNegativeCompletion = 4,
    PermanentNegativeCompletion = 5,
    Invalid = 0,
}

/// A fully decoded, possibly multi-line, SMTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    code: u16,
    enhanced: Option<(u8, u8, u8)>,
    message: Vec<String>,
}

impl Reply {
    /// The three-digit reply code.
    pub fn code(&self) -> u16 {
        self.code
    }

    /// The enhanced status code (`X.Y.Z`), if the first line carried one.
    pub fn enhanced_status_code(&self) -> Option<(u8, u8, u8)> {
        self.enhanced
    }

    /// The reply text, one entry per line. The enhanced status code, if
    /// any, is left in place at the start of the first line as well as
    /// being available from [`Reply::enhanced_status_code`].
    pub fn message(&self) -> &[String] {
        &self.message
    }

    /// All lines joined with `" "`, convenient for `Display` and error
    /// reporting.
    pub fn text(&self) -> String {
        self.message.join(" ")
    }

    pub fn severity(&self) -> Severity {
        match self.code / 100 {
            2 => Severity::PositiveCompletion,
            3 => Severity::PositiveIntermediate,
            4 => Severity::TransientNegativeCompletion,
            5 => Severity::PermanentNegativeCompletion,
            _ => Severity::Invalid,
        }
    }

    pub fn is_positive_completion(&self) -> bool {
        self.severity() == Severity::PositiveCompletion
    }

    pub fn is_temporary_failure(&self) -> bool {
        self.severity() == Severity::TransientNegativeCompletion
    }

    pub fn assert_positive_completion(self, during: &'static str) -> crate::Result<Self> {
        if self.is_positive_completion() {
            Ok(self)
        } else {
            Err(crate::Error::Protocol(crate::ProtocolError {
                during,
                reply: Some(self),
            }))
        }
    }

    pub fn assert_code(self, code: u16, during: &'static str) -> crate::Result<Self> {
        if self.code == code {
            Ok(self)
        } else {
            Err(crate::Error::Protocol(crate::ProtocolError {
                during,
                reply: Some(self),
            }))
        }
    }
}

impl Display for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code, self.text())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    InvalidReplyCode,
    InvalidSeparator,
    CodeMismatch,
    MessageTooLong,
    NeedsMoreData,
}

#[doc(hidden)]
enum State {
    FirstDigit,
    SecondDigit,
    ThirdDigit,
    Separator,
    Description,
}

/// Incremental byte-at-a-time reply parser. Fed arbitrary-sized chunks as
/// they arrive off the wire; returns a complete [`Reply`] once the
/// terminating (space-separated) line has been seen, or
/// [`ParseError::NeedsMoreData`] otherwise so the caller can read more.
pub struct ReplyParser {
    code: u16,
    current_code: u16,
    state: State,
    is_last: bool,
    buf: Vec<u8>,
    message: Vec<String>,
    message_len: usize,
}

impl Default for ReplyParser {
    fn default() -> Self {
        Self {
            code: u16::MAX,
            current_code: 0,
            state: State::FirstDigit,
            buf: Vec::with_capacity(128),
            is_last: false,
            message: Vec::with_capacity(4),
            message_len: 0,
        }
    }
}

impl ReplyParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn parse(&mut self, bytes: &[u8]) -> Result<Reply, ParseError> {
        for byte in bytes {
            match self.state {
                State::FirstDigit => {
                    if byte.is_ascii_digit() {
                        self.current_code = ((byte - b'0') as u16) * 100;
                        self.state = State::SecondDigit;
                    } else {
                        self.reset();
                        return Err(ParseError::InvalidReplyCode);
                    }
                }
                State::SecondDigit => {
                    if byte.is_ascii_digit() {
                        self.current_code += ((byte - b'0') as u16) * 10;
                        self.state = State::ThirdDigit;
                    } else {
                        self.reset();
                        return Err(ParseError::InvalidReplyCode);
                    }
                }
                State::ThirdDigit => {
                    if byte.is_ascii_digit() {
                        self.current_code += (byte - b'0') as u16;
                        self.state = State::Separator;
                    } else {
                        self.reset();
                        return Err(ParseError::InvalidReplyCode);
                    }
                }
                State::Separator => {
                    match byte {
                        b' ' => self.is_last = true,
                        b'-' => (),
                        _ => {
                            self.reset();
                            return Err(ParseError::InvalidSeparator);
                        }
                    }

                    if self.code == u16::MAX {
                        self.code = self.current_code;
                    } else if self.code != self.current_code {
                        self.reset();
                        return Err(ParseError::CodeMismatch);
                    }
                    self.current_code = 0;
                    self.state = State::Description;
                }
                State::Description => match byte {
                    b'\n' => {
                        self.message
                            .push(String::from_utf8_lossy(&self.buf).into_owned());
                        self.buf.clear();
                        self.state = State::FirstDigit;

                        if self.is_last {
                            let code = self.code;
                            let message = std::mem::take(&mut self.message);
                            let enhanced = extract_enhanced_status(code, &message);
                            self.reset();
                            return Ok(Reply {
                                code,
                                enhanced,
                                message,
                            });
                        }
                    }
                    b'\r' => (),
                    _ => {
                        if self.message_len < MAX_MESSAGE_LENGTH {
                            self.buf.push(*byte);
                            self.message_len += 1;
                        } else {
                            self.reset();
                            return Err(ParseError::MessageTooLong);
                        }
                    }
                },
            }
        }

        Err(ParseError::NeedsMoreData)
    }
}

/// Strips a leading `X.Y.Z` enhanced status code (RFC 3463) from the first
/// reply line in place and returns it, if present and consistent with the
/// reply's class digit.
fn extract_enhanced_status(code: u16, message: &[String]) -> Option<(u8, u8, u8)> {
    let first = message.first()?;
    let mut parts = first.splitn(2, ' ');
    let candidate = parts.next()?;
    let mut fields = candidate.split('.');
    let class = fields.next()?.parse::<u8>().ok()?;
    let subject = fields.next()?.parse::<u8>().ok()?;
    let detail = fields.next()?.parse::<u8>().ok()?;
    if fields.next().is_some() {
        return None;
    }
    // The class digit must agree with the reply code's first digit.
    if class as u16 != code / 100 {
        return None;
    }
    Some((class, subject, detail))
}

#[cfg(test)]
mod test {
    use super::{ParseError, ReplyParser, Severity};

    #[test]
    fn multiline_reply() {
        let mut parser = ReplyParser::new();
        let result = parser
            .parse(
                b"250-mail.example.com greets client\r\n\
250-8BITMIME\r\n\
250-DSN\r\n\
250 ENHANCEDSTATUSCODES\r\n",
            )
            .unwrap();
        assert_eq!(result.code(), 250);
        assert_eq!(result.severity(), Severity::PositiveCompletion);
        assert_eq!(
            result.message(),
            &[
                "mail.example.com greets client",
                "8BITMIME",
                "DSN",
                "ENHANCEDSTATUSCODES"
            ]
        );
    }

    #[test]
    fn chunked_across_reads() {
        let mut parser = ReplyParser::new();
        assert_eq!(
            parser.parse(b"250-First chunk\r\n"),
            Err(ParseError::NeedsMoreData)
        );
        let result = parser.parse(b"250 Second chunk\r\n").unwrap();
        assert_eq!(result.code(), 250);
        assert_eq!(result.message(), &["First chunk", "Second chunk"]);
    }

    #[test]
    fn code_mismatch() {
        let mut parser = ReplyParser::new();
        assert_eq!(
            parser.parse(b"250-a\r\n251 b\r\n"),
            Err(ParseError::CodeMismatch)
        );
    }

    #[test]
    fn invalid_code() {
        let mut parser = ReplyParser::new();
        assert_eq!(
            parser.parse(b"2a0 not a code\r\n"),
            Err(ParseError::InvalidReplyCode)
        );
    }

    #[test]
    fn enhanced_status_code_extracted() {
        let mut parser = ReplyParser::new();
        let result = parser
            .parse(b"250 2.1.0 Sender OK\r\n")
            .unwrap();
        assert_eq!(result.code(), 250);
        assert_eq!(result.enhanced_status_code(), Some((2, 1, 0)));
        assert_eq!(result.message(), &["2.1.0 Sender OK"]);
    }

    #[test]
    fn enhanced_status_code_absent_when_class_mismatched() {
        let mut parser = ReplyParser::new();
        let result = parser.parse(b"550 5.1.1 unknown user\r\n").unwrap();
        assert_eq!(result.enhanced_status_code(), Some((5, 1, 1)));

        // A code whose class digit disagrees with the reply is not treated
        // as an enhanced status code.
        let mut parser = ReplyParser::new();
        let result = parser.parse(b"250 4.1.1 odd but legal text\r\n").unwrap();
        assert_eq!(result.enhanced_status_code(), None);
    }
}
