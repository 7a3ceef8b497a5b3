/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! The byte-stream the protocol client drives. Wrapping the two concrete
//! transports (plain `TcpStream`, and `TlsStream` after an implicit or
//! STARTTLS handshake) in one enum lets [`crate::smtp::client::Connection`]
//! stay non-generic across the TLS upgrade, which is a runtime transition
//! (`STARTTLS`), not a type-level one.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

pub enum SmtpStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
    #[cfg(test)]
    Mock(tokio::io::DuplexStream),
}

impl SmtpStream {
    pub fn is_encrypted(&self) -> bool {
        matches!(self, SmtpStream::Tls(_))
    }

    pub async fn write_all(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        match self {
            SmtpStream::Plain(s) => s.write_all(bytes).await,
            SmtpStream::Tls(s) => s.write_all(bytes).await,
            #[cfg(test)]
            SmtpStream::Mock(s) => s.write_all(bytes).await,
        }
    }

    pub async fn flush(&mut self) -> std::io::Result<()> {
        match self {
            SmtpStream::Plain(s) => s.flush().await,
            SmtpStream::Tls(s) => s.flush().await,
            #[cfg(test)]
            SmtpStream::Mock(s) => s.flush().await,
        }
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            SmtpStream::Plain(s) => s.read(buf).await,
            SmtpStream::Tls(s) => s.read(buf).await,
            #[cfg(test)]
            SmtpStream::Mock(s) => s.read(buf).await,
        }
    }

    /// Writes `message` through the SMTP dot-stuffing "transparency
    /// procedure" (RFC 5321 §4.5.2): any line beginning with `.` gets an
    /// extra leading `.`, and the payload is terminated by `CRLF.CRLF`.
    pub async fn write_dot_stuffed(&mut self, message: &[u8]) -> std::io::Result<()> {
        #[derive(Clone, Copy)]
        enum State {
            Init,
            Cr,
            CrLf,
        }

        // A line beginning with `.` needs stuffing even at offset 0, where
        // there is no preceding CRLF to trigger `State::CrLf`.
        let mut state = State::CrLf;
        let mut last_pos = 0;
        for (pos, byte) in message.iter().enumerate() {
            if *byte == b'.' && matches!(state, State::CrLf) {
                if let Some(bytes) = message.get(last_pos..pos) {
                    self.write_all(bytes).await?;
                    self.write_all(b".").await?;
                    last_pos = pos;
                }
                state = State::Init;
            } else if *byte == b'\r' {
                state = State::Cr;
            } else if *byte == b'\n' && matches!(state, State::Cr) {
                state = State::CrLf;
            } else {
                state = State::Init;
            }
        }
        if let Some(bytes) = message.get(last_pos..) {
            self.write_all(bytes).await?;
        }
        self.write_all(b"\r\n.\r\n").await
    }
}

#[cfg(test)]
mod test {
    use super::SmtpStream;

    async fn roundtrip(input: &str) -> String {
        let (client, mut server) = tokio::io::duplex(4096);
        let mut stream = SmtpStream::Mock(client);
        stream.write_dot_stuffed(input.as_bytes()).await.unwrap();
        drop(stream);
        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut server, &mut buf)
            .await
            .unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn transparency_procedure() {
        assert_eq!(roundtrip("A: b\r\n.\r\n").await, "A: b\r\n..\r\n\r\n.\r\n");
        assert_eq!(roundtrip("A: b\r\n.").await, "A: b\r\n..\r\n.\r\n");
        assert_eq!(roundtrip("A: b\r\n..\r\n").await, "A: b\r\n...\r\n\r\n.\r\n");
        assert_eq!(roundtrip("A: ...b").await, "A: ...b\r\n.\r\n");
    }

    #[tokio::test]
    async fn leading_dot_at_message_start_is_stuffed() {
        assert_eq!(roundtrip(".leading\r\n").await, "..leading\r\n\r\n.\r\n");
    }
}
