//! Computes the JSON patch between the submitted object and the migrated one.
use json_patch::Patch;
use serde_json::Value;
use snafu::{ResultExt, Snafu};

#[derive(Debug, Snafu)]
pub enum PatchError {
    #[snafu(display("failed to serialize migrated object"))]
    SerializeMigrated { source: serde_json::Error },

    #[snafu(display("failed to parse original object"))]
    ParseOriginal { source: serde_json::Error },
}

/// The result of comparing the original and the migrated object.
#[derive(Debug, PartialEq)]
pub enum Emission {
    /// Both encodings describe the same object.
    Unchanged,

    /// An RFC 6902 patch which transforms the original into the migrated object.
    Patch(Patch),
}

/// Serializes `mutated` and diffs it against `original_raw`.
pub fn emit(original_raw: &[u8], mutated: &Value) -> Result<Emission, PatchError> {
    let mutated_raw = serde_json::to_vec(mutated).context(SerializeMigratedSnafu)?;
    if mutated_raw == original_raw {
        return Ok(Emission::Unchanged);
    }

    let original: Value = serde_json::from_slice(original_raw).context(ParseOriginalSnafu)?;
    let patch = json_patch::diff(&original, mutated);

    if patch.0.is_empty() {
        Ok(Emission::Unchanged)
    } else {
        tracing::debug!(operations = patch.0.len(), "computed patch for migrated object");
        Ok(Emission::Patch(patch))
    }
}
