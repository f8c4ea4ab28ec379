//! Typed navigation inside untyped resource trees.
//!
//! A [`FieldPath`] addresses a single location inside a [`serde_json::Value`]
//! and offers get, set (with auto-vivification) and remove operations. Walking
//! the tree never panics: a node which exists but has an unexpected shape is
//! reported as [`PathError::WrongShape`] and is never overwritten.
//!
//! ```
//! use resources_migration_webhook::path::FieldPath;
//! use serde_json::json;
//!
//! let path: FieldPath = "spec.containers[0].name".parse().unwrap();
//! let mut tree = json!({ "spec": {} });
//!
//! path.set(&mut tree, json!("main")).unwrap();
//! assert_eq!(tree, json!({ "spec": { "containers": [{ "name": "main" }] } }));
//! ```
use std::{fmt, str::FromStr};

use serde_json::{Map, Value};
use snafu::{OptionExt, ResultExt, Snafu, ensure};

#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum PathError {
    #[snafu(display("value at {at:?} is {found}, expected {expected}"))]
    WrongShape {
        at: String,
        expected: Shape,
        found: &'static str,
    },

    #[snafu(display(
        "index {index} at {at:?} is out of bounds for a sequence of length {len}"
    ))]
    IndexOutOfBounds { at: String, index: usize, len: usize },

    #[snafu(display("cannot write to an empty path"))]
    EmptyPath,
}

#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum ParsePathError {
    #[snafu(display("path {input:?} contains an empty segment"))]
    EmptySegment { input: String },

    #[snafu(display("path {input:?} contains an unclosed index bracket"))]
    UnclosedBracket { input: String },

    #[snafu(display("path {input:?} contains an invalid index"))]
    InvalidIndex {
        source: std::num::ParseIntError,
        input: String,
    },
}

/// The container shape a path segment requires its parent node to have.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shape {
    Mapping,
    Sequence,
}

impl Shape {
    fn empty(self) -> Value {
        match self {
            Self::Mapping => Value::Object(Map::new()),
            Self::Sequence => Value::Array(Vec::new()),
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mapping => f.write_str("a mapping"),
            Self::Sequence => f.write_str("a sequence"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl Segment {
    pub fn key(key: impl Into<String>) -> Self {
        Self::Key(key.into())
    }

    /// The shape the node this segment is applied to must have.
    fn parent_shape(&self) -> Shape {
        match self {
            Self::Key(_) => Shape::Mapping,
            Self::Index(_) => Shape::Sequence,
        }
    }
}

/// An ordered sequence of [`Segment`]s identifying a location in a resource
/// tree.
///
/// Null nodes are treated like missing ones: reads stop at them and writes
/// replace them with an empty container of the required shape.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldPath {
    segments: Vec<Segment>,
}

impl FieldPath {
    pub fn new(segments: impl IntoIterator<Item = Segment>) -> Self {
        Self {
            segments: segments.into_iter().collect(),
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Returns the value at this path, or [`None`] if any node along the way
    /// is missing or null.
    pub fn get<'a>(&self, root: &'a Value) -> Result<Option<&'a Value>, PathError> {
        let mut node = root;

        for (depth, segment) in self.segments.iter().enumerate() {
            let child = match (segment, node) {
                (_, Value::Null) => None,
                (Segment::Key(key), Value::Object(map)) => map.get(key),
                (Segment::Index(index), Value::Array(seq)) => seq.get(*index),
                (segment, other) => return self.wrong_shape(depth, segment, other),
            };

            match child {
                Some(child) => node = child,
                None => return Ok(None),
            }
        }

        Ok(Some(node))
    }

    /// Writes `value` at this path, creating every missing intermediate
    /// mapping or sequence on the way.
    pub fn set(&self, root: &mut Value, value: Value) -> Result<(), PathError> {
        let (last, _) = self.segments.split_last().context(EmptyPathSnafu)?;
        let depth = self.segments.len() - 1;

        let parent = self.vivify_parent(root)?;
        match last {
            Segment::Key(key) => {
                self.as_mapping(parent, depth)?.insert(key.clone(), value);
            }
            Segment::Index(index) => {
                let seq = self.as_sequence(parent, depth)?;
                let slot = self.sequence_slot(seq, *index, depth)?;
                *slot = value;
            }
        }

        Ok(())
    }

    /// Removes and returns the value at this path. Nothing is created if the
    /// path does not exist.
    pub fn remove(&self, root: &mut Value) -> Result<Option<Value>, PathError> {
        let Some((last, _)) = self.segments.split_last() else {
            return Ok(None);
        };
        let depth = self.segments.len() - 1;

        let Some(parent) = self.lookup_mut(root, depth)? else {
            return Ok(None);
        };

        match (last, parent) {
            (_, Value::Null) => Ok(None),
            (Segment::Key(key), Value::Object(map)) => Ok(map.remove(key)),
            (Segment::Index(index), Value::Array(seq)) if *index < seq.len() => {
                Ok(Some(seq.remove(*index)))
            }
            (Segment::Index(_), Value::Array(_)) => Ok(None),
            (segment, other) => self.wrong_shape(depth, segment, other),
        }
    }

    /// Removes empty mappings and sequences along this path, deepest first,
    /// stopping at the first non-empty node. Nodes at a depth lower than
    /// `keep_depth` are never removed, so `keep_depth = 1` keeps the node
    /// addressed by the first segment.
    ///
    /// A sequence element is only removed when it is the last element of its
    /// sequence, which keeps the indices of its siblings stable.
    pub fn prune_empty(&self, root: &mut Value, keep_depth: usize) -> Result<(), PathError> {
        for depth in (keep_depth..self.segments.len()).rev() {
            let Some(parent) = self.lookup_mut(root, depth)? else {
                continue;
            };

            // A missing child counts as pruned, the walk continues upwards.
            let pruned = match (&self.segments[depth], parent) {
                (Segment::Key(key), Value::Object(map)) => match map.get(key) {
                    None => true,
                    Some(child) if is_empty_container(child) => {
                        map.remove(key);
                        true
                    }
                    Some(_) => false,
                },
                (Segment::Index(index), Value::Array(seq)) => {
                    if *index >= seq.len() {
                        true
                    } else if *index + 1 == seq.len() && seq.last().is_some_and(is_empty_container)
                    {
                        seq.pop();
                        true
                    } else {
                        false
                    }
                }
                (_, Value::Null) => true,
                _ => false,
            };

            if !pruned {
                break;
            }
        }

        Ok(())
    }

    /// Walks the first `depth` segments without creating anything.
    fn lookup_mut<'a>(
        &self,
        root: &'a mut Value,
        depth: usize,
    ) -> Result<Option<&'a mut Value>, PathError> {
        let mut node = root;

        for (current, segment) in self.segments[..depth].iter().enumerate() {
            let child = match (segment, node) {
                (_, Value::Null) => None,
                (Segment::Key(key), Value::Object(map)) => map.get_mut(key),
                (Segment::Index(index), Value::Array(seq)) => seq.get_mut(*index),
                (segment, other) => return self.wrong_shape(current, segment, other),
            };

            match child {
                Some(child) => node = child,
                None => return Ok(None),
            }
        }

        Ok(Some(node))
    }

    /// Walks every segment but the last one, creating missing or null nodes
    /// with the shape the following segment requires.
    fn vivify_parent<'a>(&self, root: &'a mut Value) -> Result<&'a mut Value, PathError> {
        let mut node = root;
        let parents = self.segments.len().saturating_sub(1);

        for depth in 0..parents {
            node = match &self.segments[depth] {
                Segment::Key(key) => self
                    .as_mapping(node, depth)?
                    .entry(key.clone())
                    .or_insert(Value::Null),
                Segment::Index(index) => {
                    let seq = self.as_sequence(node, depth)?;
                    self.sequence_slot(seq, *index, depth)?
                }
            };

            if node.is_null() {
                *node = self.segments[depth + 1].parent_shape().empty();
            }
        }

        Ok(node)
    }

    fn as_mapping<'a>(
        &self,
        node: &'a mut Value,
        depth: usize,
    ) -> Result<&'a mut Map<String, Value>, PathError> {
        if node.is_null() {
            *node = Shape::Mapping.empty();
        }

        match node {
            Value::Object(map) => Ok(map),
            other => WrongShapeSnafu {
                at: self.display_prefix(depth),
                expected: Shape::Mapping,
                found: kind_of(other),
            }
            .fail(),
        }
    }

    fn as_sequence<'a>(
        &self,
        node: &'a mut Value,
        depth: usize,
    ) -> Result<&'a mut Vec<Value>, PathError> {
        if node.is_null() {
            *node = Shape::Sequence.empty();
        }

        match node {
            Value::Array(seq) => Ok(seq),
            other => WrongShapeSnafu {
                at: self.display_prefix(depth),
                expected: Shape::Sequence,
                found: kind_of(other),
            }
            .fail(),
        }
    }

    /// Returns the element at `index`, appending a null element if `index`
    /// is exactly one past the end.
    fn sequence_slot<'a>(
        &self,
        seq: &'a mut Vec<Value>,
        index: usize,
        depth: usize,
    ) -> Result<&'a mut Value, PathError> {
        let len = seq.len();
        ensure!(
            index <= len,
            IndexOutOfBoundsSnafu {
                at: self.display_prefix(depth),
                index,
                len
            }
        );

        if index == len {
            seq.push(Value::Null);
        }

        Ok(&mut seq[index])
    }

    fn wrong_shape<T>(
        &self,
        depth: usize,
        segment: &Segment,
        found: &Value,
    ) -> Result<T, PathError> {
        WrongShapeSnafu {
            at: self.display_prefix(depth),
            expected: segment.parent_shape(),
            found: kind_of(found),
        }
        .fail()
    }

    fn display_prefix(&self, depth: usize) -> String {
        if depth == 0 {
            return ".".to_owned();
        }

        Self::new(self.segments[..depth].iter().cloned()).to_string()
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (position, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Key(key) if position == 0 => write!(f, "{key}")?,
                Segment::Key(key) => write!(f, ".{key}")?,
                Segment::Index(index) => write!(f, "[{index}]")?,
            }
        }

        Ok(())
    }
}

impl FromStr for FieldPath {
    type Err = ParsePathError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let mut segments = Vec::new();

        for part in input.split('.') {
            let (key, mut indices) = match part.find('[') {
                Some(bracket) => part.split_at(bracket),
                None => (part, ""),
            };
            ensure!(!key.is_empty(), EmptySegmentSnafu { input });
            segments.push(Segment::key(key));

            while let Some(rest) = indices.strip_prefix('[') {
                let (index, remainder) = rest
                    .split_once(']')
                    .context(UnclosedBracketSnafu { input })?;
                let index = index.parse().context(InvalidIndexSnafu { input })?;

                segments.push(Segment::Index(index));
                indices = remainder;
            }

            ensure!(indices.is_empty(), UnclosedBracketSnafu { input });
        }

        Ok(Self { segments })
    }
}

fn is_empty_container(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.is_empty(),
        Value::Array(seq) => seq.is_empty(),
        _ => false,
    }
}

pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}
