//! Plain-TCP / TLS transport, with fingerprint pinning.

use crate::error::TlsError;

use log::warn;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::{
    self,
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    crypto::CryptoProvider,
    pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime},
    DigitallySignedStruct, SignatureScheme,
};

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// How the peer certificate is checked.
#[derive(Debug, Clone, Default)]
pub enum TlsVerify {
    /// System trust store.
    #[default]
    NativeRoots,

    /// Accept any certificate (tls_verify off).
    None,

    /// Match the certificate digest against a comma-separated list of hex fingerprints (SHA-1,
    /// SHA-256 or SHA-512, recognized by length). Any match accepts.
    Fingerprint(String),
}

/// TLS client parameters of one server.
#[derive(Debug, Clone, Default)]
pub(crate) struct TlsParams {
    pub(crate) verify: TlsVerify,

    /// DER certificate chain + key for SASL EXTERNAL.
    pub(crate) client_cert: Option<(Vec<u8>, Vec<u8>)>,
}

// We box the fields to reduce type size; there's a large size difference between the variants.
#[derive(Debug)]
pub(crate) enum Stream {
    Tcp(Box<TcpStream>),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Stream {
    /// Wraps the connected socket handed over by the connection worker.
    pub(crate) fn new_tcp(std_stream: std::net::TcpStream) -> Result<Stream, std::io::Error> {
        std_stream.set_nonblocking(true)?;
        Ok(Stream::Tcp(Box::new(TcpStream::from_std(std_stream)?)))
    }

    /// Runs the TLS handshake on top of the connected socket.
    pub(crate) async fn new_tls(
        std_stream: std::net::TcpStream,
        host_name: &str,
        params: &TlsParams,
    ) -> Result<Stream, TlsError> {
        std_stream.set_nonblocking(true)?;
        let tcp_stream = TcpStream::from_std(std_stream)?;

        let connector = tls_connector(params)?;
        let name = ServerName::try_from(host_name.to_owned())
            .map_err(|_| TlsError::BadServerName(host_name.to_owned()))?;
        let tls_stream = connector.connect(name, tcp_stream).await?;
        Ok(Stream::Tls(Box::new(tls_stream)))
    }
}

fn tls_connector(params: &TlsParams) -> Result<tokio_rustls::TlsConnector, TlsError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(rustls::Error::from)?;

    let builder = match &params.verify {
        TlsVerify::NativeRoots => {
            let mut roots = rustls::RootCertStore::empty();
            for cert in rustls_native_certs::load_native_certs()? {
                if let Err(err) = roots.add(cert) {
                    warn!("skipping invalid root certificate: {}", err);
                }
            }
            builder.with_root_certificates(roots)
        }
        TlsVerify::None => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert {
                provider: provider.clone(),
            })),
        TlsVerify::Fingerprint(fingerprints) => {
            let fingerprints = parse_fingerprints(fingerprints)?;
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(FingerprintVerifier {
                    fingerprints,
                    provider: provider.clone(),
                }))
        }
    };

    let config = match &params.client_cert {
        None => builder.with_no_client_auth(),
        Some((cert, key)) => {
            let cert = CertificateDer::from(cert.clone());
            let key = PrivateKeyDer::try_from(key.clone())
                .map_err(|err| TlsError::BadClientCert(err.to_owned()))?;
            builder
                .with_client_auth_cert(vec![cert], key)
                .map_err(TlsError::Rustls)?
        }
    };

    Ok(tokio_rustls::TlsConnector::from(Arc::new(config)))
}

/// Parses a comma-separated fingerprint list. Accepted digest sizes: SHA-1 (40 hex), SHA-256
/// (64 hex), SHA-512 (128 hex).
fn parse_fingerprints(value: &str) -> Result<Vec<Vec<u8>>, TlsError> {
    let mut fingerprints = Vec::new();
    for fp in value.split(',') {
        let fp = fp.trim();
        if fp.is_empty() {
            continue;
        }
        if !matches!(fp.len(), 40 | 64 | 128) {
            return Err(TlsError::BadFingerprint(format!(
                "{:?} has {} chars, expected 40 (SHA-1), 64 (SHA-256) or 128 (SHA-512)",
                fp,
                fp.len()
            )));
        }
        let mut bytes = Vec::with_capacity(fp.len() / 2);
        for i in (0..fp.len()).step_by(2) {
            let byte = u8::from_str_radix(&fp[i..i + 2], 16)
                .map_err(|_| TlsError::BadFingerprint(format!("{:?} is not hexadecimal", fp)))?;
            bytes.push(byte);
        }
        fingerprints.push(bytes);
    }
    if fingerprints.is_empty() {
        return Err(TlsError::BadFingerprint("empty fingerprint list".to_owned()));
    }
    Ok(fingerprints)
}

#[derive(Debug)]
struct FingerprintVerifier {
    fingerprints: Vec<Vec<u8>>,
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for FingerprintVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let der = end_entity.as_ref();
        for fingerprint in &self.fingerprints {
            let algorithm = match fingerprint.len() {
                20 => &ring::digest::SHA1_FOR_LEGACY_USE_ONLY,
                32 => &ring::digest::SHA256,
                64 => &ring::digest::SHA512,
                _ => continue,
            };
            if ring::digest::digest(algorithm, der).as_ref() == fingerprint.as_slice() {
                return Ok(ServerCertVerified::assertion());
            }
        }
        Err(rustls::Error::General(
            "certificate fingerprint does not match".to_owned(),
        ))
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[derive(Debug)]
struct AcceptAnyCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

//
// Boilerplate
//

impl AsyncRead for Stream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context,
        buf: &mut ReadBuf,
    ) -> Poll<Result<(), std::io::Error>> {
        match *self {
            Stream::Tcp(ref mut tcp_stream) => Pin::new(tcp_stream).poll_read(cx, buf),
            Stream::Tls(ref mut tls_stream) => Pin::new(tls_stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context,
        buf: &[u8],
    ) -> Poll<Result<usize, std::io::Error>> {
        match *self {
            Stream::Tcp(ref mut tcp_stream) => Pin::new(tcp_stream).poll_write(cx, buf),
            Stream::Tls(ref mut tls_stream) => Pin::new(tls_stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Result<(), std::io::Error>> {
        match *self {
            Stream::Tcp(ref mut tcp_stream) => Pin::new(tcp_stream).poll_flush(cx),
            Stream::Tls(ref mut tls_stream) => Pin::new(tls_stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        cx: &mut Context,
    ) -> Poll<Result<(), std::io::Error>> {
        match *self {
            Stream::Tcp(ref mut tcp_stream) => Pin::new(tcp_stream).poll_shutdown(cx),
            Stream::Tls(ref mut tls_stream) => Pin::new(tls_stream).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_lengths() {
        assert!(parse_fingerprints(&"a".repeat(40)).is_ok());
        assert!(parse_fingerprints(&"0".repeat(64)).is_ok());
        assert!(parse_fingerprints(&"f".repeat(128)).is_ok());
        assert!(parse_fingerprints("abcd").is_err());
        assert!(parse_fingerprints(&"g".repeat(40)).is_err());
        assert!(parse_fingerprints("").is_err());
    }

    #[test]
    fn fingerprint_list() {
        let list = format!("{},{}", "a".repeat(40), "b".repeat(64));
        let fps = parse_fingerprints(&list).unwrap();
        assert_eq!(fps.len(), 2);
        assert_eq!(fps[0].len(), 20);
        assert_eq!(fps[1].len(), 32);
    }

    #[test]
    fn fingerprint_digest_match() {
        let der = b"not really a certificate";
        let digest = ring::digest::digest(&ring::digest::SHA256, der);
        let hex: String = digest.as_ref().iter().map(|b| format!("{:02x}", b)).collect();

        let verifier = FingerprintVerifier {
            fingerprints: parse_fingerprints(&hex).unwrap(),
            provider: Arc::new(rustls::crypto::ring::default_provider()),
        };
        let cert = CertificateDer::from(der.to_vec());
        let name = ServerName::try_from("irc.example.org").unwrap();
        assert!(verifier
            .verify_server_cert(&cert, &[], &name, &[], UnixTime::now())
            .is_ok());

        let other = CertificateDer::from(b"another blob".to_vec());
        assert!(verifier
            .verify_server_cert(&other, &[], &name, &[], UnixTime::now())
            .is_err());
    }
}
