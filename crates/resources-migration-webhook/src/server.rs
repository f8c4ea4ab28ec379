//! The HTTPS server which receives admission reviews from the API server.
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use futures_util::{FutureExt as _, pin_mut, select};
use kube::core::{
    DynamicObject,
    admission::{AdmissionRequest, AdmissionResponse, AdmissionReview},
};
use snafu::{ResultExt, Snafu};
use tokio::signal::unix::{SignalKind, signal};
use tower_http::trace::TraceLayer;

use crate::{
    defaulter::{MigrationRequest, Outcome, ResourcesDefaulter, STATUS_BAD_REQUEST},
    options::WebhookOptions,
    tls::{TlsServer, TlsServerError},
};

pub type Result<T, E = WebhookServerError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum WebhookServerError {
    #[snafu(display("failed to create TLS server"))]
    CreateTlsServer { source: TlsServerError },

    #[snafu(display("failed to run TLS server"))]
    RunTlsServer { source: TlsServerError },

    #[snafu(display("failed to create {signal} listener"))]
    CreateSignalListener {
        source: std::io::Error,
        signal: &'static str,
    },
}

/// Builds the router serving the mutating webhook at `webhook_path` and a
/// `/health` endpoint.
pub fn router(defaulter: Arc<ResourcesDefaulter>, webhook_path: &str) -> Router {
    tracing::debug!(route = webhook_path, "registering route for mutating webhook");

    Router::new()
        .route(webhook_path, post(mutate))
        .layer(TraceLayer::new_for_http())
        .with_state(defaulter)
        // The health route is below the TraceLayer so as not to be instrumented
        .route("/health", get(|| async { "ok" }))
}

async fn mutate(
    State(defaulter): State<Arc<ResourcesDefaulter>>,
    Json(review): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let request: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(request) => request,
        Err(err) => {
            return Json(
                AdmissionResponse::invalid(format!("failed to convert to request: {err}"))
                    .into_review(),
            );
        }
    };

    let outcome = match MigrationRequest::from_admission(&request) {
        Ok(Some(migration_request)) => defaulter.handle(&migration_request).await,
        Ok(None) => Outcome::Allow,
        Err(err) => Outcome::error(STATUS_BAD_REQUEST, &err),
    };

    Json(outcome.into_admission_response(&request).into_review())
}

/// A ready-to-use webhook server terminating TLS in front of the [`router`].
pub struct WebhookServer {
    tls_server: TlsServer,
}

impl WebhookServer {
    pub async fn new(router: Router, options: WebhookOptions) -> Result<Self> {
        tracing::debug!("create TLS server");
        let tls_server = TlsServer::new(options, router)
            .await
            .context(CreateTlsServerSnafu)?;

        Ok(Self { tls_server })
    }

    /// Runs the webhook server until SIGINT or SIGTERM is received.
    ///
    /// This does not implement graceful shutdown of in-flight connections.
    pub async fn run(self) -> Result<()> {
        let mut sigint = signal(SignalKind::interrupt())
            .context(CreateSignalListenerSnafu { signal: "SIGINT" })?;
        let mut sigterm = signal(SignalKind::terminate())
            .context(CreateSignalListenerSnafu { signal: "SIGTERM" })?;
        tracing::debug!("created unix signal handlers");

        let future_server = self.tls_server.run().fuse();
        let future_signal = async {
            select! {
                signal = sigint.recv().fuse() => {
                    if signal.is_some() {
                        tracing::debug!("received SIGINT");
                    }
                },
                signal = sigterm.recv().fuse() => {
                    if signal.is_some() {
                        tracing::debug!("received SIGTERM");
                    }
                },
            };
        }
        .fuse();

        pin_mut!(future_server);
        pin_mut!(future_signal);

        select! {
            result = future_server => result.context(RunTlsServerSnafu),
            () = future_signal => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode, header},
    };
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::provider::{SchemaFetchError, SchemaProvider};

    struct MissingResourcesProvider;

    #[async_trait]
    impl SchemaProvider for MissingResourcesProvider {
        async fn get(&self, _crd_name: &str) -> Result<CustomResourceDefinition, SchemaFetchError> {
            Ok(serde_json::from_value(json!({
                "apiVersion": "apiextensions.k8s.io/v1",
                "kind": "CustomResourceDefinition",
                "metadata": { "name": "keycloaks.k8s.keycloak.org" },
                "spec": {
                    "group": "k8s.keycloak.org",
                    "names": { "kind": "Keycloak", "plural": "keycloaks" },
                    "scope": "Namespaced",
                    "versions": [{
                        "name": "v2alpha1",
                        "served": true,
                        "storage": true,
                        "schema": {
                            "openAPIV3Schema": {
                                "type": "object",
                                "properties": { "spec": { "type": "object" } }
                            }
                        }
                    }]
                }
            }))
            .expect("test CRD is valid"))
        }
    }

    fn review(object: Value) -> Value {
        json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "b3c4a3e4-0f5c-4b7e-9d89-2f8fcb3c9d11",
                "kind": { "group": "k8s.keycloak.org", "version": "v2alpha1", "kind": "Keycloak" },
                "resource": { "group": "k8s.keycloak.org", "version": "v2alpha1", "resource": "keycloaks" },
                "name": "example",
                "namespace": "default",
                "operation": "CREATE",
                "userInfo": { "username": "admin" },
                "object": object
            }
        })
    }

    async fn send(router: Router, uri: &str, body: Value) -> Value {
        let request = Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request is valid");

        let response = router.oneshot(request).await.expect("router is infallible");
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body can be read");
        serde_json::from_slice(&body).expect("response is JSON")
    }

    fn test_router() -> Router {
        let defaulter = ResourcesDefaulter::builder(Arc::new(MissingResourcesProvider)).build();
        router(Arc::new(defaulter), "/mutate")
    }

    #[tokio::test]
    async fn health_route_responds() {
        let response = test_router()
            .oneshot(Request::get("/health").body(Body::empty()).expect("request is valid"))
            .await
            .expect("router is infallible");

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn review_with_legacy_resources_is_patched() {
        let object = json!({
            "apiVersion": "k8s.keycloak.org/v2alpha1",
            "kind": "Keycloak",
            "metadata": { "name": "example", "namespace": "default" },
            "spec": { "resources": { "limits": { "cpu": "500m" } } }
        });

        let review = send(test_router(), "/mutate", review(object.clone())).await;
        let response = &review["response"];

        assert_eq!(response["uid"], "b3c4a3e4-0f5c-4b7e-9d89-2f8fcb3c9d11");
        assert_eq!(response["allowed"], true);
        assert_eq!(response["patchType"], "JSONPatch");

        // The patch goes over the wire as the raw bytes of the JSON document
        let patch: Vec<u8> =
            serde_json::from_value(response["patch"].clone()).expect("patch is a byte array");
        let patch: json_patch::Patch = serde_json::from_slice(&patch).expect("patch is JSON");

        let mut patched = object;
        json_patch::patch(&mut patched, &patch).expect("patch applies");
        assert_eq!(
            patched,
            json!({
                "apiVersion": "k8s.keycloak.org/v2alpha1",
                "kind": "Keycloak",
                "metadata": { "name": "example", "namespace": "default" },
                "spec": {
                    "unsupported": {
                        "podTemplate": {
                            "spec": {
                                "containers": [{ "resources": { "limits": { "cpu": "500m" } } }]
                            }
                        }
                    }
                }
            })
        );
    }

    #[tokio::test]
    async fn review_without_spec_is_denied() {
        let object = json!({
            "apiVersion": "k8s.keycloak.org/v2alpha1",
            "kind": "Keycloak",
            "metadata": { "name": "example", "namespace": "default" }
        });

        let review = send(test_router(), "/mutate", review(object)).await;
        let response = &review["response"];

        assert_eq!(response["allowed"], false);
        assert_eq!(response["status"]["code"], 500);
    }

    #[tokio::test]
    async fn review_without_object_is_allowed() {
        let review = send(test_router(), "/mutate", review(Value::Null)).await;
        let response = &review["response"];

        assert_eq!(response["allowed"], true);
        assert!(response.get("patch").is_none());
    }
}
