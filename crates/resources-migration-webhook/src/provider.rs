//! Access to the CustomResourceDefinitions installed in the cluster.
use async_trait::async_trait;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{Api, Client};
use snafu::{ResultExt, Snafu};
use tracing::instrument;

#[derive(Debug, Snafu)]
pub enum SchemaFetchError {
    #[snafu(display("failed to get CRD {crd_name:?}"))]
    GetCustomResourceDefinition {
        source: kube::Error,
        crd_name: String,
    },
}

/// Supplies the currently installed schema of a resource type.
///
/// Implementations must not retry internally. Caching is up to the
/// implementation, the caller bounds every call with a deadline.
//
// We still need to use the async-trait crate, as the provider is used as a trait object.
#[async_trait]
pub trait SchemaProvider: Send + Sync {
    async fn get(&self, crd_name: &str) -> Result<CustomResourceDefinition, SchemaFetchError>;
}

/// Reads CRDs from the Kubernetes API server.
#[derive(Clone)]
pub struct KubeSchemaProvider {
    client: Client,
}

impl KubeSchemaProvider {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SchemaProvider for KubeSchemaProvider {
    #[instrument(skip(self))]
    async fn get(&self, crd_name: &str) -> Result<CustomResourceDefinition, SchemaFetchError> {
        let crd_api: Api<CustomResourceDefinition> = Api::all(self.client.clone());

        crd_api
            .get(crd_name)
            .await
            .context(GetCustomResourceDefinitionSnafu { crd_name })
    }
}
