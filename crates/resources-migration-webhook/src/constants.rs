//! Contains various constant definitions: default ports and addresses, the
//! default CRD and the field locations the migration works with.
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

/// The default HTTPS port `8443`
pub const DEFAULT_HTTPS_PORT: u16 = 8443;

/// The default IP address [`Ipv4Addr::UNSPECIFIED`] (`0.0.0.0`) the webhook server binds to,
/// which represents binding on all network addresses.
pub const DEFAULT_LISTEN_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

/// The default socket address `0.0.0.0:8443` the webhook server binds to.
pub const DEFAULT_SOCKET_ADDRESS: SocketAddr =
    SocketAddr::new(DEFAULT_LISTEN_ADDRESS, DEFAULT_HTTPS_PORT);

/// The CRD whose installed schema decides the migration direction.
pub const DEFAULT_CRD_NAME: &str = "keycloaks.k8s.keycloak.org";

/// The HTTP path the API server sends admission reviews to.
pub const DEFAULT_WEBHOOK_PATH: &str = "/mutate-operator-ibm-com-v1alpha1-keycloak";

/// How long a single CRD lookup may take before the request is failed.
pub const DEFAULT_SCHEMA_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEFAULT_TLS_CERTIFICATE_PATH: &str = "/etc/webhook/tls/tls.crt";
pub const DEFAULT_TLS_PRIVATE_KEY_PATH: &str = "/etc/webhook/tls/tls.key";

pub const SPEC_PROPERTY: &str = "spec";
pub const RESOURCES_PROPERTY: &str = "resources";

/// Where older releases of the resource type expect container resources.
pub const LEGACY_RESOURCES_PATH: &str = "spec.resources";

/// Where newer releases of the resource type expect container resources.
pub const NESTED_RESOURCES_PATH: &str = "spec.unsupported.podTemplate.spec.containers[0].resources";
