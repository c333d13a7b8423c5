//! Error taxonomy of the connection pipeline.
//!
//! Only the connection path uses these; protocol-level problems (malformed frames, unexpected
//! numerics) are reported to the server buffer and never tear the connection down.

use thiserror::Error;

/// A failure while bringing a connection up. Every variant transitions the server to
/// `disconnected` and, when auto-reconnect is on, schedules a retry.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("address not found: {0}")]
    Resolve(String),

    #[error("IP address family mismatch for {0}")]
    IpFamily(String),

    #[error("connection refused")]
    Refused,

    #[error("proxy authentication failed")]
    ProxyAuth,

    #[error("unable to set local hostname/IP")]
    LocalBind,

    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum TlsError {
    #[error(transparent)]
    Rustls(#[from] tokio_rustls::rustls::Error),

    #[error("invalid TLS fingerprint: {0}")]
    BadFingerprint(String),

    #[error("invalid client certificate: {0}")]
    BadClientCert(String),

    #[error("invalid server name {0:?}")]
    BadServerName(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
