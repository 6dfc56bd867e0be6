//! Renders Habitat custom-resource manifests from a small block template.
//!
//! Templates use a Handlebars-like syntax: `{{field}}`, `{{helper field}}`,
//! `{{#if field}}...{{/if}}`, `{{#each list}}...{{/each}}` with `this.<field>`
//! inside loops, `{{! comments }}`, and `~` whitespace control on either side
//! of a tag. Field paths are checked against the [`Context`] schema when the
//! template is compiled.
//!
//! ```
//! use habitat_manifest::{Context, ManifestRenderer, ServiceBind};
//!
//! let renderer = ManifestRenderer::new().unwrap();
//! let context = Context::new("web", "org/web:1.0", "web")
//!     .with_count(3)
//!     .with_bind(ServiceBind::new("db", "database", "default"));
//! let manifest = renderer.render(&context).unwrap();
//! assert!(manifest.contains("count: 3"));
//! ```

pub mod ast;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod helpers;
pub mod manifest;
pub mod parser;

pub use ast::Template;
pub use config::{ConfigError, ManifestConfig};
pub use context::{Context, ContextError, EnvVar, PersistentStorage, ServiceBind, Topology};
pub use engine::TemplateEngine;
pub use error::RenderError;
pub use helpers::{HelperError, HelperFn, HelperRegistry};
pub use manifest::{ManifestRenderer, CONFIG_SECRET_KEY, CONFIG_SECRET_NAME, MANIFEST_TEMPLATE};
