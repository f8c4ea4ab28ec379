//! The admission handler which adapts submitted resources to the installed
//! schema.
//!
//! Every request runs through the same steps:
//!
//! 1. the dormant flag short-circuits everything,
//! 2. the installed CRD is fetched (bounded by a deadline) and inspected,
//! 3. the submitted object is decoded and migrated,
//! 4. the migrated object is diffed against the submitted one.
//!
//! Any failure denies the request. No partially migrated object is ever
//! admitted.
use std::{sync::Arc, time::Duration};

use json_patch::Patch;
use kube::core::{
    DynamicObject, GroupVersionKind,
    admission::{AdmissionRequest, AdmissionResponse},
};
use snafu::{ResultExt, Snafu};
use tracing::instrument;

use crate::{
    constants::{DEFAULT_CRD_NAME, DEFAULT_SCHEMA_FETCH_TIMEOUT},
    decoder::{DecodeError, Decoder, JsonDecoder},
    migrator::{FieldMigrator, StructuralError},
    patch::{self, Emission, PatchError},
    provider::{SchemaFetchError, SchemaProvider},
    schema::{self, SchemaInterpretError},
};

/// HTTP status code used for malformed requests.
pub const STATUS_BAD_REQUEST: u16 = 400;

/// HTTP status code used for every other failure.
pub const STATUS_INTERNAL_SERVER_ERROR: u16 = 500;

#[derive(Debug, Snafu)]
pub enum DefaulterError {
    #[snafu(display("failed to fetch schema of CRD {crd_name:?}"))]
    FetchSchema {
        source: SchemaFetchError,
        crd_name: String,
    },

    #[snafu(display("fetching schema of CRD {crd_name:?} did not finish within {timeout:?}"))]
    FetchSchemaTimeout { crd_name: String, timeout: Duration },

    #[snafu(display("failed to interpret schema of CRD {crd_name:?}"))]
    InterpretSchema {
        source: SchemaInterpretError,
        crd_name: String,
    },

    #[snafu(display("failed to decode object"))]
    DecodeObject { source: DecodeError },

    #[snafu(display("failed to migrate resources of object"))]
    MigrateObject { source: StructuralError },

    #[snafu(display("failed to compute patch for migrated object"))]
    EmitPatch { source: PatchError },
}

impl DefaulterError {
    /// The HTTP status code reported in the admission response.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::DecodeObject { .. } => STATUS_BAD_REQUEST,
            Self::FetchSchema { .. }
            | Self::FetchSchemaTimeout { .. }
            | Self::InterpretSchema { .. }
            | Self::MigrateObject { .. }
            | Self::EmitPatch { .. } => STATUS_INTERNAL_SERVER_ERROR,
        }
    }
}

/// The object under admission, as received from the API server.
#[derive(Clone, Debug)]
pub struct MigrationRequest {
    pub kind: GroupVersionKind,
    pub namespace: Option<String>,
    pub name: String,
    pub raw: Vec<u8>,
}

impl MigrationRequest {
    /// Extracts the object of an admission request.
    ///
    /// Returns [`None`] if the request does not carry an object, which is the
    /// case for deletions.
    pub fn from_admission(
        request: &AdmissionRequest<DynamicObject>,
    ) -> Result<Option<Self>, serde_json::Error> {
        let Some(object) = &request.object else {
            return Ok(None);
        };

        Ok(Some(Self {
            kind: request.kind.clone(),
            namespace: request.namespace.clone(),
            name: request.name.clone(),
            raw: serde_json::to_vec(object)?,
        }))
    }
}

/// The decision for a single admission request.
#[derive(Debug, PartialEq)]
pub enum Outcome {
    /// Admit the object as submitted.
    Allow,

    /// Admit the object after applying the patch.
    AllowWithPatch(Patch),

    /// Deny the object.
    Error { code: u16, message: String },
}

impl Outcome {
    pub fn error(code: u16, error: &(dyn std::error::Error + 'static)) -> Self {
        Self::Error {
            code,
            message: error_chain(error),
        }
    }

    /// Converts the outcome into the response for `request`.
    pub fn into_admission_response<T>(self, request: &AdmissionRequest<T>) -> AdmissionResponse
    where
        T: kube::Resource,
    {
        let response = AdmissionResponse::from(request);

        match self {
            Self::Allow => response,
            Self::AllowWithPatch(patch) => match response.with_patch(patch) {
                Ok(response) => response,
                Err(err) => deny(
                    AdmissionResponse::from(request),
                    STATUS_INTERNAL_SERVER_ERROR,
                    error_chain(&err),
                ),
            },
            Self::Error { code, message } => deny(response, code, message),
        }
    }
}

fn deny(response: AdmissionResponse, code: u16, message: String) -> AdmissionResponse {
    let mut response = response.deny(message);
    response.result.code = code;
    response
}

/// Joins the error with all of its sources, like `snafu::Report` does on one
/// line.
fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();

    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }

    message
}

/// Options of a [`ResourcesDefaulter`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DefaulterOptions {
    /// The name of the CRD whose schema selects the migration direction.
    pub crd_name: String,

    /// Admit every object unchanged without looking at it.
    pub dormant: bool,

    /// Deadline for fetching the CRD.
    pub schema_fetch_timeout: Duration,
}

impl Default for DefaulterOptions {
    fn default() -> Self {
        Self {
            crd_name: DEFAULT_CRD_NAME.to_owned(),
            dormant: false,
            schema_fetch_timeout: DEFAULT_SCHEMA_FETCH_TIMEOUT,
        }
    }
}

/// Mutates objects so that their `resources` field is placed where the
/// installed schema expects it.
///
/// The defaulter holds no per-request state and can be shared between any
/// number of concurrent requests.
///
/// ```
/// use std::sync::Arc;
///
/// use resources_migration_webhook::{
///     defaulter::ResourcesDefaulter, provider::KubeSchemaProvider,
/// };
///
/// # async fn docs() {
/// let client = kube::Client::try_default().await.unwrap();
/// let defaulter = ResourcesDefaulter::builder(Arc::new(KubeSchemaProvider::new(client)))
///     .crd_name("keycloaks.k8s.keycloak.org")
///     .build();
/// # }
/// ```
pub struct ResourcesDefaulter {
    schema_provider: Arc<dyn SchemaProvider>,
    decoder: Arc<dyn Decoder>,
    migrator: FieldMigrator,
    options: DefaulterOptions,
}

impl ResourcesDefaulter {
    /// Returns a [`ResourcesDefaulterBuilder`]. The schema provider is the
    /// only required dependency, everything else has a default.
    pub fn builder(schema_provider: Arc<dyn SchemaProvider>) -> ResourcesDefaulterBuilder {
        ResourcesDefaulterBuilder {
            schema_provider,
            decoder: Arc::new(JsonDecoder),
            options: DefaulterOptions::default(),
        }
    }

    pub fn options(&self) -> &DefaulterOptions {
        &self.options
    }

    /// Handles a single admission request.
    #[instrument(
        skip(self, request),
        fields(k8s.namespace = ?request.namespace, k8s.name = %request.name)
    )]
    pub async fn handle(&self, request: &MigrationRequest) -> Outcome {
        tracing::info!(
            namespace = ?request.namespace,
            name = %request.name,
            "webhook invoked"
        );

        if self.options.dormant {
            tracing::debug!("webhook is dormant, admitting object unchanged");
            return Outcome::Allow;
        }

        match self.migrate(request).await {
            Ok(Emission::Unchanged) => Outcome::Allow,
            Ok(Emission::Patch(patch)) => Outcome::AllowWithPatch(patch),
            Err(err) => {
                tracing::error!(
                    code = err.status_code(),
                    error = &err as &dyn std::error::Error,
                    "denying object"
                );
                Outcome::error(err.status_code(), &err)
            }
        }
    }

    async fn migrate(&self, request: &MigrationRequest) -> Result<Emission, DefaulterError> {
        let crd_name = &self.options.crd_name;
        let timeout = self.options.schema_fetch_timeout;

        let crd = tokio::time::timeout(timeout, self.schema_provider.get(crd_name))
            .await
            .map_err(|_| DefaulterError::FetchSchemaTimeout {
                crd_name: crd_name.clone(),
                timeout,
            })?
            .context(FetchSchemaSnafu { crd_name })?;

        let direction = schema::direction_for(&crd).context(InterpretSchemaSnafu { crd_name })?;

        let tree = self
            .decoder
            .decode(&request.raw, &request.kind)
            .context(DecodeObjectSnafu)?;

        let migrated = self
            .migrator
            .migrate(tree, direction)
            .context(MigrateObjectSnafu)?;

        patch::emit(&request.raw, &migrated).context(EmitPatchSnafu)
    }
}

/// Builds a fully configured [`ResourcesDefaulter`].
pub struct ResourcesDefaulterBuilder {
    schema_provider: Arc<dyn SchemaProvider>,
    decoder: Arc<dyn Decoder>,
    options: DefaulterOptions,
}

impl ResourcesDefaulterBuilder {
    pub fn decoder(mut self, decoder: Arc<dyn Decoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn crd_name(mut self, crd_name: impl Into<String>) -> Self {
        self.options.crd_name = crd_name.into();
        self
    }

    pub fn dormant(mut self, dormant: bool) -> Self {
        self.options.dormant = dormant;
        self
    }

    pub fn schema_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.options.schema_fetch_timeout = timeout;
        self
    }

    pub fn options(mut self, options: DefaulterOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> ResourcesDefaulter {
        ResourcesDefaulter {
            schema_provider: self.schema_provider,
            decoder: self.decoder,
            migrator: FieldMigrator::default(),
            options: self.options,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use serde_json::json;

    use super::*;

    /// Serves a fixed CRD and counts how often it was asked.
    struct StaticProvider {
        crd: CustomResourceDefinition,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SchemaProvider for StaticProvider {
        async fn get(&self, _crd_name: &str) -> Result<CustomResourceDefinition, SchemaFetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.crd.clone())
        }
    }

    /// Fails every fetch like an API server which does not know the CRD.
    struct MissingCrdProvider;

    #[async_trait]
    impl SchemaProvider for MissingCrdProvider {
        async fn get(&self, crd_name: &str) -> Result<CustomResourceDefinition, SchemaFetchError> {
            let status = kube::core::Status::failure("not found", "NotFound").with_code(404);

            Err(SchemaFetchError::GetCustomResourceDefinition {
                source: kube::Error::Api(status.boxed()),
                crd_name: crd_name.to_owned(),
            })
        }
    }

    struct StalledProvider;

    #[async_trait]
    impl SchemaProvider for StalledProvider {
        async fn get(&self, _crd_name: &str) -> Result<CustomResourceDefinition, SchemaFetchError> {
            std::future::pending().await
        }
    }

    fn crd(spec_properties: serde_json::Value) -> CustomResourceDefinition {
        serde_json::from_value(json!({
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
                            "properties": {
                                "spec": { "type": "object", "properties": spec_properties }
                            }
                        }
                    }
                }]
            }
        }))
        .expect("test CRD is valid")
    }

    fn request(object: serde_json::Value) -> MigrationRequest {
        MigrationRequest {
            kind: GroupVersionKind::gvk("k8s.keycloak.org", "v2alpha1", "Keycloak"),
            namespace: Some("default".to_owned()),
            name: "example".to_owned(),
            raw: serde_json::to_vec(&object).expect("object serializes"),
        }
    }

    fn defaulter(
        crd: CustomResourceDefinition,
        dormant: bool,
    ) -> (ResourcesDefaulter, Arc<StaticProvider>) {
        let provider = Arc::new(StaticProvider {
            crd,
            calls: AtomicUsize::new(0),
        });
        let defaulter = ResourcesDefaulter::builder(provider.clone())
            .dormant(dormant)
            .build();

        (defaulter, provider)
    }

    #[tokio::test]
    async fn dormant_defaulter_allows_without_fetching() {
        let (defaulter, provider) = defaulter(crd(json!({})), true);

        let outcome = defaulter.handle(&request(json!({ "spec": { "resources": {} } }))).await;

        assert_eq!(outcome, Outcome::Allow);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unchanged_object_is_allowed() {
        let (defaulter, _) = defaulter(crd(json!({ "resources": { "type": "object" } })), false);

        let outcome = defaulter
            .handle(&request(json!({ "spec": { "resources": { "limits": { "cpu": "1" } } } })))
            .await;

        assert_eq!(outcome, Outcome::Allow);
    }

    #[tokio::test]
    async fn malformed_object_is_bad_request() {
        let (defaulter, _) = defaulter(crd(json!({})), false);
        let mut request = request(json!({}));
        request.raw = b"{\"spec\":".to_vec();

        let outcome = defaulter.handle(&request).await;

        assert!(matches!(outcome, Outcome::Error { code: 400, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_schema_fetch_fails_fast() {
        let defaulter = ResourcesDefaulter::builder(Arc::new(StalledProvider))
            .schema_fetch_timeout(Duration::from_secs(1))
            .build();

        let outcome = defaulter.handle(&request(json!({ "spec": {} }))).await;

        let Outcome::Error { code, message } = outcome else {
            panic!("expected an error outcome");
        };
        assert_eq!(code, 500);
        assert!(message.contains("did not finish within"));
    }

    #[tokio::test]
    async fn failed_schema_fetch_is_internal_error() {
        let defaulter = ResourcesDefaulter::builder(Arc::new(MissingCrdProvider)).build();

        let outcome = defaulter
            .handle(&request(json!({ "spec": { "resources": {} } })))
            .await;

        let Outcome::Error { code, message } = outcome else {
            panic!("expected an error outcome");
        };
        assert_eq!(code, 500);
        assert!(message.starts_with("failed to fetch schema"), "{message}");
        assert!(message.contains("not found"), "{message}");
    }

    #[test]
    fn error_outcome_denies_with_status_code() {
        let review: kube::core::admission::AdmissionReview<DynamicObject> =
            serde_json::from_value(json!({
                "apiVersion": "admission.k8s.io/v1",
                "kind": "AdmissionReview",
                "request": {
                    "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
                    "kind": { "group": "k8s.keycloak.org", "version": "v2alpha1", "kind": "Keycloak" },
                    "resource": { "group": "k8s.keycloak.org", "version": "v2alpha1", "resource": "keycloaks" },
                    "name": "example",
                    "namespace": "default",
                    "operation": "CREATE",
                    "userInfo": {},
                    "object": null
                }
            }))
            .expect("review is valid");
        let request: AdmissionRequest<DynamicObject> =
            review.try_into().expect("review has request");

        let response = Outcome::Error {
            code: 500,
            message: "boom".to_owned(),
        }
        .into_admission_response(&request);

        assert!(!response.allowed);
        assert_eq!(response.result.code, 500);
        assert_eq!(response.result.message, "boom");
    }
}
