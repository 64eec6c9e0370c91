// ── Read-only views ──
//
// `ReadOnly<N>` exposes the reads of the wrapped node and nothing that
// writes. `set_state` exists only to fail: it returns `ReadOnlyViolation`
// without any remote call. Nested objects, containers and parameters come
// back wrapped as well.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::CoreError;
use crate::node::{ContainerOf, NamedObjectContainer, ObjectNode, ParameterNode, Readable};
use crate::path::DatamodelPath;

#[derive(Debug, Clone)]
pub struct ReadOnly<N> {
    inner: N,
}

impl<N: Readable> ReadOnly<N> {
    pub fn new(inner: N) -> Self {
        Self { inner }
    }

    /// Always fails; writes must go through the writable node.
    pub async fn set_state(&self, _value: Value) -> Result<(), CoreError> {
        Err(CoreError::ReadOnlyViolation {
            path: self.inner.path().encode(),
        })
    }
}

impl ReadOnly<ObjectNode> {
    pub fn object(&self, name: &str) -> Result<ReadOnly<ObjectNode>, CoreError> {
        self.inner.object(name).map(ReadOnly::new)
    }

    pub fn parameter(&self, name: &str) -> Result<ReadOnly<ParameterNode>, CoreError> {
        self.inner.parameter(name).map(ReadOnly::new)
    }

    pub fn container(&self, name: &str) -> Result<ReadOnly<NamedObjectContainer>, CoreError> {
        self.inner.container(name).map(ReadOnly::new)
    }

    pub fn child_names(&self) -> Vec<String> {
        self.inner.child_names()
    }

    pub fn parameter_names(&self) -> BTreeSet<String> {
        self.inner.parameter_names()
    }
}

/// Member listing and lookup only; there is no `delete_object`.
impl ReadOnly<NamedObjectContainer> {
    pub async fn object_names(&self) -> Result<Vec<String>, CoreError> {
        self.inner.object_names().await
    }

    pub fn object(&self, name: &str) -> Result<ReadOnly<ObjectNode>, CoreError> {
        self.inner.object(name).map(ReadOnly::new)
    }
}

#[async_trait]
impl<N: Readable> Readable for ReadOnly<N> {
    fn rules(&self) -> &str {
        self.inner.rules()
    }

    fn path(&self) -> &DatamodelPath {
        self.inner.path()
    }

    async fn get_state(&self, explicit_only: bool) -> Result<Value, CoreError> {
        self.inner.get_state(explicit_only).await
    }

    async fn attribute_value(&self, attribute: &str) -> Result<Value, CoreError> {
        self.inner.attribute_value(attribute).await
    }
}
