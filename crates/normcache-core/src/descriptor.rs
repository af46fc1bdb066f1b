//! Pre-parsed operation descriptors.
//!
//! The cache never parses a query language. Callers describe each
//! operation with its root field, declared key arguments and the shape of
//! the entities it returns; `document` is forwarded to the link untouched.

use serde::{Deserialize, Serialize};

/// Kind of operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Query,
    Mutation,
}

/// Shape of the entities returned by a root field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shape {
    /// Type name used when the response carries no `__typename`
    pub type_name: String,
    /// Selected fields, rendered back out of the cache
    pub fields: Vec<String>,
    /// Whether the root field returns a list
    pub list: bool,
}

/// Descriptor of a single-root-field operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    /// Operation name sent to the server
    pub operation_name: String,
    /// Query or mutation
    pub kind: OperationKind,
    /// Root field selected by the operation
    pub root_field: String,
    /// Key-bearing arguments; falls back to the type policies when unset
    pub key_args: Option<Vec<String>>,
    /// Entity shape; `None` for scalar root fields
    pub shape: Option<Shape>,
    /// Opaque operation text for the transport
    pub document: String,
}

impl QueryDescriptor {
    /// Describe a query.
    pub fn query(operation_name: impl Into<String>, root_field: impl Into<String>) -> Self {
        Self::new(OperationKind::Query, operation_name, root_field)
    }

    /// Describe a mutation.
    pub fn mutation(operation_name: impl Into<String>, root_field: impl Into<String>) -> Self {
        Self::new(OperationKind::Mutation, operation_name, root_field)
    }

    fn new(
        kind: OperationKind,
        operation_name: impl Into<String>,
        root_field: impl Into<String>,
    ) -> Self {
        Self {
            operation_name: operation_name.into(),
            kind,
            root_field: root_field.into(),
            key_args: None,
            shape: None,
            document: String::new(),
        }
    }

    /// Declare the key-bearing arguments.
    pub fn with_key_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_args = Some(args.into_iter().map(Into::into).collect());
        self
    }

    /// Declare a list-of-entities result.
    pub fn returning_list<I, S>(self, type_name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.returning(type_name, fields, true)
    }

    /// Declare a single-entity result.
    pub fn returning_one<I, S>(self, type_name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.returning(type_name, fields, false)
    }

    fn returning<I, S>(mut self, type_name: impl Into<String>, fields: I, list: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shape = Some(Shape {
            type_name: type_name.into(),
            fields: fields.into_iter().map(Into::into).collect(),
            list,
        });
        self
    }

    /// Attach the operation text.
    pub fn with_document(mut self, document: impl Into<String>) -> Self {
        self.document = document.into();
        self
    }

    /// Whether this is a mutation.
    pub fn is_mutation(&self) -> bool {
        self.kind == OperationKind::Mutation
    }
}
