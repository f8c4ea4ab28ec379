//! Answers questions about the installed CustomResourceDefinition schema.
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::ResourceExt;
use snafu::{OptionExt, Snafu};

use crate::{
    constants::{RESOURCES_PROPERTY, SPEC_PROPERTY},
    migrator::Direction,
};

#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum SchemaInterpretError {
    #[snafu(display("CRD {crd_name:?} does not define any version"))]
    NoVersions { crd_name: String },

    #[snafu(display(
        "version {version:?} of CRD {crd_name:?} does not contain an OpenAPI v3 schema"
    ))]
    MissingOpenApiSchema { crd_name: String, version: String },

    #[snafu(display("version {version:?} of CRD {crd_name:?} does not declare a spec property"))]
    MissingSpecProperty { crd_name: String, version: String },
}

/// Returns whether the installed schema declares `spec.resources`.
///
/// Only the first listed version is inspected, regardless of which version is
/// marked as storage version.
pub fn declares_legacy_resources(
    crd: &CustomResourceDefinition,
) -> Result<bool, SchemaInterpretError> {
    let crd_name = crd.name_any();
    let version = crd.spec.versions.first().context(NoVersionsSnafu {
        crd_name: &crd_name,
    })?;

    let schema = version
        .schema
        .as_ref()
        .and_then(|validation| validation.open_api_v3_schema.as_ref())
        .context(MissingOpenApiSchemaSnafu {
            crd_name: &crd_name,
            version: &version.name,
        })?;

    let spec = schema
        .properties
        .as_ref()
        .and_then(|properties| properties.get(SPEC_PROPERTY))
        .context(MissingSpecPropertySnafu {
            crd_name: &crd_name,
            version: &version.name,
        })?;

    Ok(spec
        .properties
        .as_ref()
        .is_some_and(|properties| properties.contains_key(RESOURCES_PROPERTY)))
}

/// Picks the migration direction matching the installed schema.
///
/// A schema without `spec.resources` belongs to a controller which reads the
/// nested location, so legacy values have to be moved there.
pub fn direction_for(crd: &CustomResourceDefinition) -> Result<Direction, SchemaInterpretError> {
    let direction = if declares_legacy_resources(crd)? {
        Direction::NestedToLegacy
    } else {
        Direction::LegacyToNested
    };

    tracing::debug!(
        k8s.crd.name = %crd.name_any(),
        ?direction,
        "selected migration direction from installed schema"
    );

    Ok(direction)
}
