//! A mutating admission webhook which keeps custom resources working across a
//! breaking schema change of their `resources` field.
//!
//! Older releases of the resource type accept container resources at
//! `spec.resources`, newer releases only below
//! `spec.unsupported.podTemplate.spec.containers[0].resources`. For every
//! admitted object, the webhook looks at the currently installed CRD and moves
//! the field to the location that schema expects. The resulting difference is
//! returned to the API server as a JSON patch.
//!
//! The building blocks can be used on their own:
//!
//! - [`schema`] decides the [`Direction`] from an installed CRD,
//! - [`migrator`] rewrites resource trees using the typed accessors in [`path`],
//! - [`patch`] diffs the rewritten tree against the submitted object.
//!
//! [`ResourcesDefaulter`] composes them per request, [`server`] exposes it via
//! HTTPS.
//!
//! ```
//! use resources_migration_webhook::{Direction, FieldMigrator};
//! use serde_json::json;
//!
//! let migrated = FieldMigrator::default()
//!     .migrate(
//!         json!({ "spec": { "resources": { "limits": { "cpu": "500m" } } } }),
//!         Direction::LegacyToNested,
//!     )
//!     .unwrap();
//!
//! assert_eq!(
//!     migrated["spec"]["unsupported"]["podTemplate"]["spec"]["containers"][0]["resources"],
//!     json!({ "limits": { "cpu": "500m" } })
//! );
//! ```
pub mod cli;
pub mod constants;
pub mod decoder;
pub mod defaulter;
pub mod logging;
pub mod migrator;
pub mod options;
pub mod patch;
pub mod path;
pub mod provider;
pub mod schema;
pub mod server;
pub mod tls;

// Selected re-exports
pub use crate::{
    defaulter::{MigrationRequest, Outcome, ResourcesDefaulter},
    migrator::{Direction, FieldMigrator},
    options::WebhookOptions,
    server::WebhookServer,
};
