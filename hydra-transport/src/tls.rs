//! Shared TLS plumbing for the QUIC and obfuscated transports
//!
//! Both variants terminate TLS with a certificate generated at listen time
//! and dial with verification disabled: the protocol's own handshake is the
//! authentication layer, TLS here provides the wire look and the record
//! encryption.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};

use crate::{Error, Result};

/// Install the ring provider as the process default, once
///
/// Dependencies that call `ClientConfig::builder()` (the WebSocket TLS
/// path) need a process-default provider when more than one is compiled
/// into the binary.
pub(crate) fn ensure_crypto_provider() {
    static INSTALL: std::sync::Once = std::sync::Once::new();
    INSTALL.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// A freshly generated self-signed certificate
pub(crate) struct SelfSignedCert {
    pub cert: CertificateDer<'static>,
    pub key: PrivateKeyDer<'static>,
}

/// Generate a self-signed certificate for the listener
pub(crate) fn generate_self_signed() -> Result<SelfSignedCert> {
    let generated =
        rcgen::generate_simple_self_signed(vec!["hydravpn".to_string(), "localhost".to_string()])
            .map_err(|e| Error::Tls(e.to_string()))?;

    Ok(SelfSignedCert {
        cert: CertificateDer::from(generated.cert),
        key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
            generated.key_pair.serialize_der(),
        )),
    })
}

/// Server-side rustls configuration with a fresh self-signed certificate
pub(crate) fn server_tls_config(alpn: &[&[u8]]) -> Result<rustls::ServerConfig> {
    let cert = generate_self_signed()?;
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let mut config = rustls::ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| Error::Tls(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(vec![cert.cert], cert.key)
        .map_err(|e| Error::Tls(e.to_string()))?;

    config.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();
    Ok(config)
}

/// Client-side rustls configuration that skips certificate verification
pub(crate) fn client_tls_config(alpn: &[&[u8]]) -> Result<rustls::ClientConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let mut config = rustls::ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| Error::Tls(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(InsecureVerifier))
        .with_no_client_auth();

    config.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();
    Ok(config)
}

/// Certificate verifier that accepts anything
///
/// The listener's certificate is ephemeral and self-signed; peer
/// authentication happens in the protocol handshake, not at TLS.
#[derive(Debug)]
pub(crate) struct InsecureVerifier;

impl ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::ED25519,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
        ]
    }
}
