//! Parsed template representation.
//!
//! Field paths are resolved against the [`Context`](crate::Context) schema
//! while parsing, so a [`Template`] only ever holds typed references.

use std::fmt;

/// What kind of value a context field holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// A string or number that can be spliced into the output.
    Scalar,
    /// A record with named sub-fields, such as `persistent_storage`.
    Record,
    /// An ordered list of records that can be iterated.
    Sequence,
}

/// A field of the root context, including the sub-fields of records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    MetadataName,
    Image,
    Count,
    Environment,
    PersistentStorage,
    StorageSize,
    StorageClassName,
    StorageMountPath,
    ServiceName,
    ServiceTopology,
    ServiceGroup,
    Config,
    RingSecretName,
    Binds,
}

impl Field {
    /// Resolves a normalised (snake_case) path such as `["persistent_storage", "size"]`.
    pub fn resolve(segments: &[String]) -> Option<Field> {
        let segments: Vec<&str> = segments.iter().map(String::as_str).collect();
        let field = match segments.as_slice() {
            ["metadata_name"] => Field::MetadataName,
            ["image"] => Field::Image,
            ["count"] => Field::Count,
            ["environment"] => Field::Environment,
            ["persistent_storage"] => Field::PersistentStorage,
            ["persistent_storage", "size"] => Field::StorageSize,
            ["persistent_storage", "storage_class_name"] => Field::StorageClassName,
            ["persistent_storage", "mount_path"] => Field::StorageMountPath,
            ["service_name"] => Field::ServiceName,
            ["service_topology"] => Field::ServiceTopology,
            ["service_group"] => Field::ServiceGroup,
            ["config"] => Field::Config,
            ["ring_secret_name"] => Field::RingSecretName,
            ["binds"] => Field::Binds,
            _ => return None,
        };
        Some(field)
    }

    pub fn kind(&self) -> Kind {
        match self {
            Field::Environment | Field::Binds => Kind::Sequence,
            Field::PersistentStorage => Kind::Record,
            _ => Kind::Scalar,
        }
    }

    /// The field's name as it appears in parameter documents.
    pub fn name(&self) -> &'static str {
        match self {
            Field::MetadataName => "metadataName",
            Field::Image => "image",
            Field::Count => "count",
            Field::Environment => "environment",
            Field::PersistentStorage => "persistentStorage",
            Field::StorageSize => "persistentStorage.size",
            Field::StorageClassName => "persistentStorage.storageClassName",
            Field::StorageMountPath => "persistentStorage.mountPath",
            Field::ServiceName => "serviceName",
            Field::ServiceTopology => "serviceTopology",
            Field::ServiceGroup => "serviceGroup",
            Field::Config => "config",
            Field::RingSecretName => "ringSecretName",
            Field::Binds => "binds",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A sub-field of a loop element, reached through `this`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemField {
    EnvName,
    EnvValue,
    BindName,
    BindService,
    BindGroup,
}

impl ItemField {
    pub fn resolve(sequence: Field, name: &str) -> Option<ItemField> {
        match (sequence, name) {
            (Field::Environment, "name") => Some(ItemField::EnvName),
            (Field::Environment, "value") => Some(ItemField::EnvValue),
            (Field::Binds, "name") => Some(ItemField::BindName),
            (Field::Binds, "service") => Some(ItemField::BindService),
            (Field::Binds, "group") => Some(ItemField::BindGroup),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ItemField::EnvName | ItemField::BindName => "this.name",
            ItemField::EnvValue => "this.value",
            ItemField::BindService => "this.service",
            ItemField::BindGroup => "this.group",
        }
    }
}

/// A value reference inside a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expr {
    Field(Field),
    Item(ItemField),
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Expr::Field(field) => f.write_str(field.name()),
            Expr::Item(item) => f.write_str(item.name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Literal text, already trimmed by whitespace control.
    Text(String),
    /// `{{path}}`
    Interpolate(Expr),
    /// `{{helper path}}`
    HelperCall { helper: String, arg: Expr },
    /// `{{#if path}}...{{/if}}`
    Conditional { test: Expr, body: Vec<Node> },
    /// `{{#each path}}...{{/each}}`
    Loop { sequence: Field, body: Vec<Node> },
}

/// A compiled template. Immutable and reusable across contexts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    nodes: Vec<Node>,
}

impl Template {
    pub(crate) fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }
}
