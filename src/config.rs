use base64::Engine;
use log::{debug, info};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::context::{Context, ContextError, EnvVar, PersistentStorage, ServiceBind, Topology};

/// Parameters for one manifest, as written in a YAML or JSON file.
///
/// ```yaml
/// metadata_name: web
/// image: org/web:1.0
/// count: 3
/// env: ["PORT=8080"]
/// persistent_storage: "10Gi:/hab/svc/web/data:standard"
/// topology: leader
/// group: prod
/// config: user.toml
/// binds: ["db:database.default"]
/// ```
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct ManifestConfig {
    #[serde(alias = "metadataName")]
    pub metadata_name: String,
    pub image: String,
    #[serde(default = "default_count")]
    pub count: u32,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default, alias = "persistentStorage")]
    pub persistent_storage: Option<String>,
    #[serde(default, alias = "serviceName")]
    pub service_name: Option<String>,
    #[serde(default)]
    pub topology: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    /// Path to a plain-text `user.toml`, relative to the parameter file.
    #[serde(default)]
    pub config: Option<PathBuf>,
    #[serde(default, alias = "ringSecretName")]
    pub ring_secret_name: Option<String>,
    #[serde(default)]
    pub binds: Vec<String>,
}

fn default_count() -> u32 {
    1
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse parameters: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Context(#[from] ContextError),
}

impl ManifestConfig {
    /// Loads parameters from a YAML file. JSON files load too, since JSON is valid YAML.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: ManifestConfig = serde_yaml::from_str(&content)?;
        debug!("Loaded parameters for '{}' from {:?}", config.metadata_name, path);
        Ok(config)
    }

    /// Builds the rendering context. Relative config paths are resolved
    /// against `base_dir`, and the config file is base64-encoded here.
    pub fn into_context(self, base_dir: &Path) -> Result<Context, ConfigError> {
        let service_name = self
            .service_name
            .unwrap_or_else(|| self.metadata_name.clone());
        let mut context = Context::new(self.metadata_name, self.image, service_name)
            .with_count(self.count);

        if let Some(topology) = self.topology {
            context = context.with_topology(topology.parse::<Topology>()?);
        }
        for var in &self.env {
            context = context.with_env(var.parse::<EnvVar>()?);
        }
        if let Some(storage) = self.persistent_storage {
            context = context.with_persistent_storage(storage.parse::<PersistentStorage>()?);
        }
        if let Some(group) = self.group {
            context = context.with_service_group(group);
        }
        if let Some(config_path) = self.config {
            let path = base_dir.join(config_path);
            let raw = std::fs::read(&path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            info!("Encoding user config from {:?}", path);
            context = context.with_config(base64::engine::general_purpose::STANDARD.encode(raw));
        }
        if let Some(ring) = self.ring_secret_name {
            context = context.with_ring_secret_name(ring);
        }
        for bind in &self.binds {
            context = context.with_bind(bind.parse::<ServiceBind>()?);
        }
        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_and_convert() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("user.toml"), "port = 8080\n").unwrap();
        let params = dir.path().join("params.yaml");
        fs::write(
            &params,
            r#"
metadata_name: web
image: org/web:1.0
count: 3
env:
  - PORT=8080
persistent_storage: "10Gi:/hab/svc/web/data:standard"
topology: leader
group: prod
config: user.toml
ring_secret_name: ring-key
binds:
  - db:database.default
  - cache:redis.prod
"#,
        )
        .unwrap();

        let context = ManifestConfig::load(&params)
            .unwrap()
            .into_context(dir.path())
            .unwrap();
        assert_eq!(context.metadata_name, "web");
        assert_eq!(context.service_name, "web");
        assert_eq!(context.count, 3);
        assert_eq!(context.service_topology, Topology::Leader);
        assert_eq!(context.environment, vec![EnvVar::new("PORT", "8080")]);
        assert_eq!(
            context.persistent_storage,
            Some(PersistentStorage::new("10Gi", "standard", "/hab/svc/web/data"))
        );
        assert_eq!(context.service_group.as_deref(), Some("prod"));
        assert_eq!(context.config.as_deref(), Some("cG9ydCA9IDgwODAK"));
        assert_eq!(context.ring_secret_name.as_deref(), Some("ring-key"));
        assert_eq!(
            context.binds,
            vec![
                ServiceBind::new("db", "database", "default"),
                ServiceBind::new("cache", "redis", "prod"),
            ]
        );
    }

    #[test]
    fn test_load_json_with_defaults() {
        let dir = tempdir().unwrap();
        let params = dir.path().join("params.json");
        fs::write(
            &params,
            r#"{"metadataName": "db", "image": "org/db:2", "serviceName": "database"}"#,
        )
        .unwrap();

        let context = ManifestConfig::load(&params)
            .unwrap()
            .into_context(dir.path())
            .unwrap();
        assert_eq!(context.count, 1);
        assert_eq!(context.service_name, "database");
        assert_eq!(context.service_topology, Topology::Standalone);
        assert!(context.config.is_none());
        assert!(context.binds.is_empty());
    }

    #[test]
    fn test_invalid_bind() {
        let config = ManifestConfig {
            metadata_name: "web".to_string(),
            image: "org/web:1.0".to_string(),
            count: 1,
            binds: vec!["uhoh".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            config.into_context(Path::new(".")),
            Err(ConfigError::Context(ContextError::InvalidBind(_)))
        ));
    }

    #[test]
    fn test_missing_config_file() {
        let dir = tempdir().unwrap();
        let config = ManifestConfig {
            metadata_name: "web".to_string(),
            image: "org/web:1.0".to_string(),
            count: 1,
            config: Some(PathBuf::from("missing.toml")),
            ..Default::default()
        };
        assert!(matches!(
            config.into_context(dir.path()),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let dir = tempdir().unwrap();
        let params = dir.path().join("params.yaml");
        fs::write(&params, "metadata_name: web\nimage: x\nreplicas: 2\n").unwrap();
        assert!(matches!(
            ManifestConfig::load(&params),
            Err(ConfigError::Yaml(_))
        ));
    }
}
