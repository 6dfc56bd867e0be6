use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::error::RenderError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("Invalid binding '{0}', expected name:service.group")]
    InvalidBind(String),
    #[error("Invalid persistent storage '{0}', expected size:/mount/path:storage-class")]
    InvalidPersistentStorage(String),
    #[error("Invalid environment variable '{0}', expected NAME=value")]
    InvalidEnvVar(String),
    #[error("Invalid topology '{0}', expected standalone or leader")]
    InvalidTopology(String),
}

/// How the members of a service group relate to each other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topology {
    #[default]
    Standalone,
    Leader,
}

impl Topology {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topology::Standalone => "standalone",
            Topology::Leader => "leader",
        }
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topology {
    type Err = ContextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "standalone" => Ok(Topology::Standalone),
            "leader" => Ok(Topology::Leader),
            other => Err(ContextError::InvalidTopology(other.to_string())),
        }
    }
}

/// A single environment variable passed to the workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl FromStr for EnvVar {
    type Err = ContextError;

    /// Parses `NAME=value`. Everything after the first `=` is the value.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((name, value)) if !name.trim().is_empty() => {
                Ok(EnvVar::new(name.trim(), value))
            }
            _ => Err(ContextError::InvalidEnvVar(s.to_string())),
        }
    }
}

/// A request for a durable volume mounted into every member of the group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistentStorage {
    pub size: String,
    #[serde(alias = "storage_class_name")]
    pub storage_class_name: String,
    #[serde(alias = "mount_path")]
    pub mount_path: String,
}

impl PersistentStorage {
    pub fn new(
        size: impl Into<String>,
        storage_class_name: impl Into<String>,
        mount_path: impl Into<String>,
    ) -> Self {
        Self {
            size: size.into(),
            storage_class_name: storage_class_name.into(),
            mount_path: mount_path.into(),
        }
    }
}

impl FromStr for PersistentStorage {
    type Err = ContextError;

    /// Parses `size:/mount/path:storage-class`, e.g. `10Gi:/hab/svc/db/data:standard`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 3 || parts.iter().any(|p| p.trim().is_empty()) {
            return Err(ContextError::InvalidPersistentStorage(s.to_string()));
        }
        if !parts[1].starts_with('/') {
            return Err(ContextError::InvalidPersistentStorage(s.to_string()));
        }
        Ok(PersistentStorage::new(parts[0], parts[2], parts[1]))
    }
}

impl fmt::Display for PersistentStorage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.size, self.mount_path, self.storage_class_name
        )
    }
}

/// A named reference from this service to another service group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceBind {
    pub name: String,
    pub service: String,
    pub group: String,
}

impl ServiceBind {
    pub fn new(
        name: impl Into<String>,
        service: impl Into<String>,
        group: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            service: service.into(),
            group: group.into(),
        }
    }
}

impl FromStr for ServiceBind {
    type Err = ContextError;

    /// Parses `name:service.group`. The manifest's bind entry only carries a
    /// service and a group, so composite `service:name:service.group` binds
    /// and `app.env#service.group@org` service groups are rejected.
    fn from_str(bind_str: &str) -> Result<Self, Self::Err> {
        let invalid = || ContextError::InvalidBind(bind_str.to_string());

        let values: Vec<&str> = bind_str.split(':').collect();
        if values.len() != 2 || values[0].is_empty() {
            return Err(invalid());
        }
        let (service, group) = values[1].split_once('.').ok_or_else(invalid)?;
        if service.is_empty()
            || group.is_empty()
            || group.contains('.')
            || service.contains('#')
            || group.contains('@')
        {
            return Err(invalid());
        }
        Ok(ServiceBind::new(values[0], service, group))
    }
}

impl fmt::Display for ServiceBind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}.{}", self.name, self.service, self.group)
    }
}

/// Every input needed to render one manifest.
///
/// Strings that are empty or only whitespace are treated as absent: a
/// required one fails the render, an optional one omits its section.
///
/// The built-in template quotes environment values, `service_group`,
/// `ring_secret_name` and bind fields. `metadata_name`, `image`,
/// `service_name` and the persistent storage fields are written as plain
/// scalars, so they must be Kubernetes names, image references, quantities
/// or paths without `": "`, `" #"` or line breaks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    pub metadata_name: String,
    pub image: String,
    pub count: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environment: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_storage: Option<PersistentStorage>,
    pub service_name: String,
    #[serde(default)]
    pub service_topology: Topology,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ring_secret_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub binds: Vec<ServiceBind>,
}

impl Context {
    /// Creates a context with one replica, standalone topology and no
    /// optional sections.
    pub fn new(
        metadata_name: impl Into<String>,
        image: impl Into<String>,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            metadata_name: metadata_name.into(),
            image: image.into(),
            count: 1,
            environment: Vec::new(),
            persistent_storage: None,
            service_name: service_name.into(),
            service_topology: Topology::Standalone,
            service_group: None,
            config: None,
            ring_secret_name: None,
            binds: Vec::new(),
        }
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.service_topology = topology;
        self
    }

    pub fn with_env(mut self, var: EnvVar) -> Self {
        self.environment.push(var);
        self
    }

    pub fn with_persistent_storage(mut self, storage: PersistentStorage) -> Self {
        self.persistent_storage = Some(storage);
        self
    }

    pub fn with_service_group(mut self, group: impl Into<String>) -> Self {
        self.service_group = Some(group.into());
        self
    }

    /// Sets the user config blob. The value must already be base64-encoded.
    pub fn with_config(mut self, encoded: impl Into<String>) -> Self {
        self.config = Some(encoded.into());
        self
    }

    pub fn with_ring_secret_name(mut self, name: impl Into<String>) -> Self {
        self.ring_secret_name = Some(name.into());
        self
    }

    pub fn with_bind(mut self, bind: ServiceBind) -> Self {
        self.binds.push(bind);
        self
    }

    /// Checks the required fields and the replica count.
    pub fn validate(&self) -> Result<(), RenderError> {
        let required = [
            ("metadataName", &self.metadata_name),
            ("image", &self.image),
            ("serviceName", &self.service_name),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(RenderError::MissingRequiredField(name));
            }
        }
        if self.count == 0 {
            return Err(RenderError::InvalidContext(
                "count must be greater than zero".to_string(),
            ));
        }
        if let Some(storage) = &self.persistent_storage {
            let parts = [
                ("persistentStorage.size", &storage.size),
                ("persistentStorage.storageClassName", &storage.storage_class_name),
                ("persistentStorage.mountPath", &storage.mount_path),
            ];
            for (name, value) in parts {
                if value.trim().is_empty() {
                    return Err(RenderError::MissingRequiredField(name));
                }
            }
        }
        Ok(())
    }
}
