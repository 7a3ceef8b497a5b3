/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! TLS connector construction and the RFC 9266 `tls-exporter` channel
//! binding used by the `-PLUS` SASL mechanisms.

use std::{convert::TryFrom, io, sync::Arc};

use rustls::{
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    ClientConfig, ClientConnection, RootCertStore, SignatureScheme,
};
use rustls_pki_types::{ServerName, TrustAnchor};
use tokio::net::TcpStream;
use tokio_rustls::{client::TlsStream, TlsConnector};

use crate::client::config::TlsMinVersion;
use crate::Error;

/// Exporter label and output length for `tls-exporter` (RFC 9266 §3). Only
/// defined from TLS 1.3 upward; TLS 1.2's `tls-unique` is not supported
/// because rustls does not expose the Finished-message bytes it requires
/// through its safe public API.
const TLS_EXPORTER_LABEL: &[u8] = b"EXPORTER-Channel-Binding";
const TLS_EXPORTER_LENGTH: usize = 32;

pub fn build_tls_connector(allow_invalid_certs: bool, min_version: TlsMinVersion) -> TlsConnector {
    let versions: &[&'static rustls::SupportedProtocolVersion] = match min_version {
        TlsMinVersion::Tls12 => &[&rustls::version::TLS13, &rustls::version::TLS12],
        TlsMinVersion::Tls13 => &[&rustls::version::TLS13],
    };
    let builder = ClientConfig::builder_with_protocol_versions(versions);

    let config = if !allow_invalid_certs {
        let mut root_cert_store = RootCertStore::empty();

        root_cert_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| TrustAnchor {
            subject: ta.subject.clone(),
            subject_public_key_info: ta.subject_public_key_info.clone(),
            name_constraints: ta.name_constraints.clone(),
        }));

        builder
            .with_root_certificates(root_cert_store)
            .with_no_client_auth()
    } else {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(DummyVerifier {}))
            .with_no_client_auth()
    };

    TlsConnector::from(Arc::new(config))
}

pub async fn connect_tls(
    tls_connector: &TlsConnector,
    stream: TcpStream,
    hostname: &str,
    timeout: std::time::Duration,
) -> crate::Result<TlsStream<TcpStream>> {
    tokio::time::timeout(
        timeout,
        tls_connector.connect(
            ServerName::try_from(hostname.to_string())
                .map_err(|_| Error::InvalidTlsName)?,
            stream,
        ),
    )
    .await
    .map_err(|_| Error::Timeout)?
    .map_err(|err| {
        let kind = err.kind();
        if let Some(inner) = err.into_inner() {
            match inner.downcast::<rustls::Error>() {
                Ok(error) => Error::Tls(error),
                Err(error) => Error::Io(io::Error::new(kind, error)),
            }
        } else {
            Error::Io(io::Error::new(kind, "unspecified TLS error"))
        }
    })
}

/// Extracts the `tls-exporter` channel-binding value (RFC 9266) from a
/// negotiated session, for use with a `-PLUS` SASL mechanism. Returns
/// `None` for anything short of TLS 1.3, or if the exporter is otherwise
/// unavailable (e.g. a resumed/early-data session).
pub fn tls_exporter(conn: &ClientConnection) -> Option<[u8; TLS_EXPORTER_LENGTH]> {
    if conn.protocol_version() != Some(rustls::ProtocolVersion::TLSv1_3) {
        return None;
    }
    let mut out = [0u8; TLS_EXPORTER_LENGTH];
    conn.export_keying_material(&mut out, TLS_EXPORTER_LABEL, None)
        .ok()?;
    Some(out)
}

#[doc(hidden)]
#[derive(Debug)]
struct DummyVerifier;

impl ServerCertVerifier for DummyVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls_pki_types::CertificateDer<'_>,
        _intermediates: &[rustls_pki_types::CertificateDer<'_>],
        _server_name: &rustls_pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls_pki_types::UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls_pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls_pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA1,
            SignatureScheme::ECDSA_SHA1_Legacy,
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
            SignatureScheme::ED448,
        ]
    }
}
