//! Turns the raw object of an admission request into a resource tree.
use kube::core::GroupVersionKind;
use serde_json::Value;
use snafu::{ResultExt, Snafu, ensure};

use crate::path::kind_of;

#[derive(Debug, Snafu)]
pub enum DecodeError {
    #[snafu(display("failed to parse object as JSON"))]
    ParseJson { source: serde_json::Error },

    #[snafu(display("object is {found}, expected a mapping"))]
    NotAnObject { found: &'static str },

    #[snafu(display("object has {field} {found:?}, expected {expected:?}"))]
    TypeMismatch {
        field: &'static str,
        expected: String,
        found: String,
    },
}

/// Decodes the raw encoding of an object of the given kind.
pub trait Decoder: Send + Sync {
    fn decode(&self, raw: &[u8], kind: &GroupVersionKind) -> Result<Value, DecodeError>;
}

/// Decodes JSON encoded objects.
///
/// If the object carries `apiVersion` or `kind`, they have to match the kind
/// the admission request was issued for.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonDecoder;

impl Decoder for JsonDecoder {
    fn decode(&self, raw: &[u8], kind: &GroupVersionKind) -> Result<Value, DecodeError> {
        let tree: Value = serde_json::from_slice(raw).context(ParseJsonSnafu)?;
        ensure!(tree.is_object(), NotAnObjectSnafu { found: kind_of(&tree) });

        check_type_field(&tree, "apiVersion", &kind.api_version())?;
        check_type_field(&tree, "kind", &kind.kind)?;

        Ok(tree)
    }
}

fn check_type_field(tree: &Value, field: &'static str, expected: &str) -> Result<(), DecodeError> {
    match tree.get(field) {
        None | Some(Value::Null) => Ok(()),
        Some(Value::String(found)) if found == expected => Ok(()),
        Some(found) => TypeMismatchSnafu {
            field,
            expected,
            found: found.to_string(),
        }
        .fail(),
    }
}
