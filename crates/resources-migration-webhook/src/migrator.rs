//! Moves the `resources` field between its legacy and nested location.
//!
//! Older releases of the resource type accepted container resources at
//! `spec.resources`, newer ones only accept them below
//! `spec.unsupported.podTemplate.spec.containers[0].resources`. The
//! [`FieldMigrator`] rewrites a decoded resource so that it matches whichever
//! layout the installed schema expects.
use serde_json::Value;
use snafu::{ResultExt, Snafu, ensure};

use crate::{
    constants::{RESOURCES_PROPERTY, SPEC_PROPERTY},
    path::{FieldPath, PathError, Segment, kind_of},
};

/// Nodes above this depth (the `spec` mapping itself) are never pruned.
const PRUNE_KEEP_DEPTH: usize = 1;

#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum StructuralError {
    #[snafu(display("resource does not have a .spec field"))]
    MissingSpec,

    #[snafu(display("resource field .spec is {found}, expected a mapping"))]
    SpecNotMapping { found: &'static str },

    #[snafu(display("failed to access {path}"))]
    AccessPath { source: PathError, path: String },
}

/// The rewrite applied to a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Move `spec.resources` into the nested container location.
    LegacyToNested,

    /// Drop the nested container resources in favour of `spec.resources`.
    NestedToLegacy,

    /// Leave the resource untouched.
    NoOp,
}

#[derive(Clone, Debug)]
pub struct FieldMigrator {
    legacy: FieldPath,
    nested: FieldPath,
}

impl Default for FieldMigrator {
    fn default() -> Self {
        Self {
            legacy: FieldPath::new([
                Segment::key(SPEC_PROPERTY),
                Segment::key(RESOURCES_PROPERTY),
            ]),
            nested: FieldPath::new([
                Segment::key(SPEC_PROPERTY),
                Segment::key("unsupported"),
                Segment::key("podTemplate"),
                Segment::key("spec"),
                Segment::key("containers"),
                Segment::Index(0),
                Segment::key(RESOURCES_PROPERTY),
            ]),
        }
    }
}

impl FieldMigrator {
    pub fn legacy_path(&self) -> &FieldPath {
        &self.legacy
    }

    pub fn nested_path(&self) -> &FieldPath {
        &self.nested
    }

    /// Rewrites `tree` in the given `direction`.
    ///
    /// Migrating is idempotent, running the same direction twice yields the
    /// same tree as running it once. On error the tree is consumed and must
    /// not be admitted.
    pub fn migrate(&self, tree: Value, direction: Direction) -> Result<Value, StructuralError> {
        match direction {
            Direction::LegacyToNested => self.legacy_to_nested(tree),
            Direction::NestedToLegacy => self.nested_to_legacy(tree),
            Direction::NoOp => Ok(tree),
        }
    }

    fn legacy_to_nested(&self, mut tree: Value) -> Result<Value, StructuralError> {
        ensure_spec(&tree)?;

        // Absent or null legacy resources never touch the nested path
        if get_at(&self.legacy, &tree)?.is_none() {
            remove_at(&self.legacy, &mut tree)?;
            return Ok(tree);
        }

        // Validate every existing node on the nested path before the first
        // write, so that a collision leaves the tree untouched.
        get_at(&self.nested, &tree)?;

        if let Some(resources) = remove_at(&self.legacy, &mut tree)? {
            tracing::debug!(
                from = %self.legacy,
                to = %self.nested,
                "moving resources to nested location"
            );

            self.nested
                .set(&mut tree, resources)
                .with_context(|_| AccessPathSnafu {
                    path: self.nested.to_string(),
                })?;
        }

        Ok(tree)
    }

    fn nested_to_legacy(&self, mut tree: Value) -> Result<Value, StructuralError> {
        ensure_spec(&tree)?;

        let legacy_is_empty = get_at(&self.legacy, &tree)?.is_none_or(Value::is_null);

        let Some(resources) = remove_at(&self.nested, &mut tree)? else {
            return Ok(tree);
        };

        self.nested
            .prune_empty(&mut tree, PRUNE_KEEP_DEPTH)
            .with_context(|_| AccessPathSnafu {
                path: self.nested.to_string(),
            })?;

        // Only restore the value if nothing occupies the legacy location,
        // an existing legacy value always wins.
        if legacy_is_empty && !resources.is_null() {
            tracing::debug!(
                from = %self.nested,
                to = %self.legacy,
                "restoring resources to legacy location"
            );

            self.legacy
                .set(&mut tree, resources)
                .with_context(|_| AccessPathSnafu {
                    path: self.legacy.to_string(),
                })?;
        } else {
            tracing::debug!(path = %self.nested, "dropped nested resources");
        }

        Ok(tree)
    }
}

fn get_at<'a>(path: &FieldPath, tree: &'a Value) -> Result<Option<&'a Value>, StructuralError> {
    path.get(tree).with_context(|_| AccessPathSnafu {
        path: path.to_string(),
    })
}

fn remove_at(path: &FieldPath, tree: &mut Value) -> Result<Option<Value>, StructuralError> {
    path.remove(tree).with_context(|_| AccessPathSnafu {
        path: path.to_string(),
    })
}

fn ensure_spec(tree: &Value) -> Result<(), StructuralError> {
    match tree.get(SPEC_PROPERTY) {
        None | Some(Value::Null) => MissingSpecSnafu.fail(),
        Some(spec) => {
            ensure!(
                spec.is_object(),
                SpecNotMappingSnafu {
                    found: kind_of(spec)
                }
            );
            Ok(())
        }
    }
}
