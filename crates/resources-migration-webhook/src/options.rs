//! Contains available options to configure the [WebhookServer][crate::server::WebhookServer].
use std::{net::SocketAddr, path::PathBuf};

use crate::constants::{
    DEFAULT_SOCKET_ADDRESS, DEFAULT_TLS_CERTIFICATE_PATH, DEFAULT_TLS_PRIVATE_KEY_PATH,
};

/// Specifies available webhook server options.
///
/// The [`Default`] implementation for this struct contains the following values:
///
/// - The socket binds to 0.0.0.0 on port 8443 (HTTPS)
/// - The certificate chain and private key are read from `/etc/webhook/tls`
///
/// ### Example with Custom Socket Address and Certificate
///
/// ```
/// use resources_migration_webhook::options::WebhookOptions;
///
/// let options = WebhookOptions::builder()
///     .socket_addr("127.0.0.1:12345".parse().unwrap())
///     .tls_certificate("/tmp/tls.crt")
///     .build();
///
/// assert_eq!(options.socket_addr.port(), 12345);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WebhookOptions {
    /// The HTTPS socket address the [`TcpListener`][tokio::net::TcpListener]
    /// binds to.
    pub socket_addr: SocketAddr,

    /// PEM encoded certificate chain presented to clients, leaf first.
    pub tls_certificate: PathBuf,

    /// PEM encoded private key belonging to the leaf certificate.
    pub tls_private_key: PathBuf,
}

impl Default for WebhookOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl WebhookOptions {
    /// Returns the default [`WebhookOptionsBuilder`] which allows to selectively
    /// customize the options.
    pub fn builder() -> WebhookOptionsBuilder {
        WebhookOptionsBuilder::default()
    }
}

/// The [`WebhookOptionsBuilder`] which allows to selectively customize the webhook
/// server [`WebhookOptions`].
#[derive(Debug, Default)]
pub struct WebhookOptionsBuilder {
    socket_addr: Option<SocketAddr>,
    tls_certificate: Option<PathBuf>,
    tls_private_key: Option<PathBuf>,
}

impl WebhookOptionsBuilder {
    /// Sets the socket address the webhook server binds to for HTTPS.
    pub fn socket_addr(mut self, socket_addr: SocketAddr) -> Self {
        self.socket_addr = Some(socket_addr);
        self
    }

    pub fn tls_certificate(mut self, path: impl Into<PathBuf>) -> Self {
        self.tls_certificate = Some(path.into());
        self
    }

    pub fn tls_private_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.tls_private_key = Some(path.into());
        self
    }

    /// Builds the final [`WebhookOptions`] by using default values for any not
    /// explicitly set option.
    pub fn build(self) -> WebhookOptions {
        WebhookOptions {
            socket_addr: self.socket_addr.unwrap_or(DEFAULT_SOCKET_ADDRESS),
            tls_certificate: self
                .tls_certificate
                .unwrap_or_else(|| DEFAULT_TLS_CERTIFICATE_PATH.into()),
            tls_private_key: self
                .tls_private_key
                .unwrap_or_else(|| DEFAULT_TLS_PRIVATE_KEY_PATH.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = WebhookOptions::default();

        assert_eq!(options.socket_addr, "0.0.0.0:8443".parse().expect("valid address"));
        assert_eq!(options.tls_certificate, PathBuf::from("/etc/webhook/tls/tls.crt"));
        assert_eq!(options.tls_private_key, PathBuf::from("/etc/webhook/tls/tls.key"));
    }

    #[test]
    fn overrides_keep_remaining_defaults() {
        let options = WebhookOptions::builder()
            .socket_addr("127.0.0.1:9443".parse().expect("valid address"))
            .tls_private_key("/tmp/tls.key")
            .build();

        assert_eq!(options.socket_addr, "127.0.0.1:9443".parse().expect("valid address"));
        assert_eq!(options.tls_certificate, PathBuf::from("/etc/webhook/tls/tls.crt"));
        assert_eq!(options.tls_private_key, PathBuf::from("/tmp/tls.key"));
    }
}
