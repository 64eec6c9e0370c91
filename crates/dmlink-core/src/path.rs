// ── Path codec ──
//
// A datamodel path is an ordered list of segments. A singleton segment is
// rendered `Type`, a named-object member `Type:Name`; segments are joined
// with `/`. The empty path (the namespace root) encodes to "".

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CoreError;

const SEPARATOR: char = '/';
const INSTANCE: char = ':';

// ── PathSegment ─────────────────────────────────────────────────────

/// One `(type-name, optional instance-name)` step of a path.
///
/// Validated on construction: the type name is non-empty and contains
/// neither `/` nor `:`; an instance name is non-empty and contains no `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathSegment {
    type_name: String,
    instance: Option<String>,
}

impl PathSegment {
    /// A singleton child, e.g. `Setup`.
    pub fn singleton(type_name: impl Into<String>) -> Result<Self, CoreError> {
        let type_name = type_name.into();
        validate_type(&type_name)?;
        Ok(Self {
            type_name,
            instance: None,
        })
    }

    /// A member of a named-object container, e.g. `Zone:inlet`.
    pub fn named(
        type_name: impl Into<String>,
        instance: impl Into<String>,
    ) -> Result<Self, CoreError> {
        let type_name = type_name.into();
        let instance = instance.into();
        validate_type(&type_name)?;
        if instance.is_empty() {
            return Err(CoreError::addressing(format!(
                "empty instance name for type '{type_name}'"
            )));
        }
        if instance.contains(SEPARATOR) {
            return Err(CoreError::addressing(format!(
                "instance name '{instance}' contains '/'"
            )));
        }
        Ok(Self {
            type_name,
            instance: Some(instance),
        })
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn instance(&self) -> Option<&str> {
        self.instance.as_deref()
    }

    pub fn is_singleton(&self) -> bool {
        self.instance.is_none()
    }

    fn parse(raw: &str) -> Result<Self, CoreError> {
        if raw.is_empty() {
            return Err(CoreError::addressing("empty path segment"));
        }
        match raw.split_once(INSTANCE) {
            Some((type_name, instance)) => Self::named(type_name, instance),
            None => Self::singleton(raw),
        }
    }
}

fn validate_type(type_name: &str) -> Result<(), CoreError> {
    if type_name.is_empty() {
        return Err(CoreError::addressing("empty type name"));
    }
    if type_name.contains([SEPARATOR, INSTANCE]) {
        return Err(CoreError::addressing(format!(
            "type name '{type_name}' contains '/' or ':'"
        )));
    }
    Ok(())
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.instance {
            Some(name) => write!(f, "{}{INSTANCE}{name}", self.type_name),
            None => f.write_str(&self.type_name),
        }
    }
}

// ── Codec ───────────────────────────────────────────────────────────

/// Encode segments to the wire path string.
pub fn encode(segments: &[PathSegment]) -> String {
    let mut out = String::new();
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            out.push(SEPARATOR);
        }
        out.push_str(&segment.to_string());
    }
    out
}

/// Decode a wire path string. Exact inverse of [`encode`].
pub fn decode(raw: &str) -> Result<Vec<PathSegment>, CoreError> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    raw.split(SEPARATOR)
        .map(PathSegment::parse)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| match e {
            CoreError::Addressing { message } => {
                CoreError::addressing(format!("malformed path '{raw}': {message}"))
            }
            other => other,
        })
}

// ── DatamodelPath ───────────────────────────────────────────────────

/// A validated path into one rules namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatamodelPath {
    segments: Vec<PathSegment>,
}

impl DatamodelPath {
    /// The namespace root.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn from_segments(segments: Vec<PathSegment>) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn last(&self) -> Option<&PathSegment> {
        self.segments.last()
    }

    /// The containing path, or `None` at the root.
    pub fn parent(&self) -> Option<Self> {
        let (_, head) = self.segments.split_last()?;
        Some(Self {
            segments: head.to_vec(),
        })
    }

    /// A new path with `segment` appended.
    pub fn join(&self, segment: PathSegment) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Self { segments }
    }

    /// Segment-wise prefix test: `A:A1` is a prefix of `A:A1/X` but not of
    /// `A:A10`. Every path starts with itself and with the root.
    pub fn starts_with(&self, prefix: &DatamodelPath) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    /// Every proper ancestor, nearest first, ending with the root.
    pub fn ancestors(&self) -> impl Iterator<Item = DatamodelPath> + '_ {
        (0..self.segments.len()).rev().map(|n| Self {
            segments: self.segments[..n].to_vec(),
        })
    }

    pub fn encode(&self) -> String {
        encode(&self.segments)
    }
}

impl fmt::Display for DatamodelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for DatamodelPath {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode(s).map(Self::from_segments)
    }
}

impl Serialize for DatamodelPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for DatamodelPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
