//! Terminates TLS in front of an axum [`Router`], using the certificate
//! mounted into the webhook pod.
use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use axum::{Router, extract::Request};
use hyper::{body::Incoming, service::service_fn};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto::Builder,
};
use snafu::{ResultExt, Snafu};
use tokio::net::TcpListener;
use tokio_rustls::{
    TlsAcceptor,
    rustls::{
        ServerConfig,
        crypto::ring::default_provider,
        pki_types::{CertificateDer, PrivateKeyDer, pem::PemObject},
        version::{TLS12, TLS13},
    },
};
use tower::ServiceExt;
use tracing::{Instrument, instrument};

use crate::options::WebhookOptions;

pub type Result<T, E = TlsServerError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum TlsServerError {
    #[snafu(display("failed to read certificate chain from {path:?}"))]
    ReadCertificateChain {
        source: tokio_rustls::rustls::pki_types::pem::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to read private key from {path:?}"))]
    ReadPrivateKey {
        source: tokio_rustls::rustls::pki_types::pem::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to construct TLS server config, bad certificate/key"))]
    InvalidTlsPrivateKey { source: tokio_rustls::rustls::Error },

    #[snafu(display("failed to set safe TLS protocol versions"))]
    SetSafeTlsProtocolVersions { source: tokio_rustls::rustls::Error },

    #[snafu(display("failed to create TCP listener by binding to socket address {socket_addr:?}"))]
    BindTcpListener {
        source: std::io::Error,
        socket_addr: SocketAddr,
    },
}

/// A server which terminates TLS connections and allows clients to communicate
/// via HTTPS with the underlying HTTP router.
pub struct TlsServer {
    config: Arc<ServerConfig>,
    socket_addr: SocketAddr,
    router: Router,
}

impl TlsServer {
    /// Creates the server from the certificate chain and private key
    /// referenced by `options`.
    #[instrument(name = "create_tls_server", skip(router))]
    pub async fn new(options: WebhookOptions, router: Router) -> Result<Self> {
        let certificate_chain = CertificateDer::pem_file_iter(&options.tls_certificate)
            .and_then(|certificates| certificates.collect::<Result<Vec<_>, _>>())
            .context(ReadCertificateChainSnafu {
                path: &options.tls_certificate,
            })?;

        let private_key = PrivateKeyDer::from_pem_file(&options.tls_private_key).context(
            ReadPrivateKeySnafu {
                path: &options.tls_private_key,
            },
        )?;

        let tls_provider = default_provider();
        let mut config = ServerConfig::builder_with_provider(tls_provider.into())
            .with_protocol_versions(&[&TLS12, &TLS13])
            .context(SetSafeTlsProtocolVersionsSnafu)?
            .with_no_client_auth()
            .with_single_cert(certificate_chain, private_key)
            .context(InvalidTlsPrivateKeySnafu)?;

        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

        Ok(Self {
            config: Arc::new(config),
            socket_addr: options.socket_addr,
            router,
        })
    }

    /// Accepts TCP connections on the configured socket address until the
    /// future is dropped. Every connection must complete a TLS handshake and
    /// is then served by the router over HTTP/1.1 or HTTP/2.
    pub async fn run(self) -> Result<()> {
        let tls_acceptor = TlsAcceptor::from(self.config);
        let tcp_listener = TcpListener::bind(self.socket_addr)
            .await
            .context(BindTcpListenerSnafu {
                socket_addr: self.socket_addr,
            })?;

        tracing::info!(socket_addr = %self.socket_addr, "webhook server listening");

        loop {
            let (tcp_stream, remote_addr) = match tcp_listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    tracing::trace!(%err, "failed to accept incoming TCP connection");
                    continue;
                }
            };

            let tls_acceptor = tls_acceptor.clone();
            let router = self.router.clone();
            let span = tracing::debug_span!(
                "serve connection",
                client.address = %remote_addr.ip(),
                client.port = remote_addr.port(),
            );

            tokio::spawn(
                async move {
                    let tls_stream = match tls_acceptor.accept(tcp_stream).await {
                        Ok(tls_stream) => TokioIo::new(tls_stream),
                        Err(err) => {
                            tracing::debug!(%err, "TLS handshake failed");
                            return;
                        }
                    };

                    // oneshot consumes the router
                    let service = service_fn(move |request: Request<Incoming>| {
                        router.clone().oneshot(request)
                    });

                    if let Err(err) = Builder::new(TokioExecutor::new())
                        .serve_connection_with_upgrades(tls_stream, service)
                        .await
                    {
                        tracing::warn!(%err, "failed to serve connection");
                    }
                }
                .instrument(span),
            );
        }
    }
}
