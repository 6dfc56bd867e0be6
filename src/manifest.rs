//! The built-in Habitat manifest template.

use log::debug;

use crate::ast::Template;
use crate::context::Context;
use crate::engine::TemplateEngine;
use crate::error::RenderError;

/// Template for a `habitat.sh/v1beta1` Habitat resource, with an optional
/// Secret document carrying the user config.
pub const MANIFEST_TEMPLATE: &str = include_str!("../templates/habitat.yaml.hbs");

/// Name of the Secret that holds `user.toml` when a config blob is supplied.
pub const CONFIG_SECRET_NAME: &str = "user-toml-secret";

/// Key of the config blob inside the Secret's `data` map.
pub const CONFIG_SECRET_KEY: &str = "user.toml";

/// A compiled manifest template ready to render any number of contexts.
#[derive(Debug, Clone)]
pub struct ManifestRenderer {
    engine: TemplateEngine,
    template: Template,
}

impl ManifestRenderer {
    /// Compiles the built-in template.
    pub fn new() -> Result<Self, RenderError> {
        Self::with_template(MANIFEST_TEMPLATE)
    }

    /// Compiles a replacement template using the default helpers.
    pub fn with_template(source: &str) -> Result<Self, RenderError> {
        Self::with_engine(TemplateEngine::new(), source)
    }

    pub fn with_engine(engine: TemplateEngine, source: &str) -> Result<Self, RenderError> {
        let template = engine.compile(source)?;
        debug!("Manifest template compiled");
        Ok(Self { engine, template })
    }

    pub fn render(&self, context: &Context) -> Result<String, RenderError> {
        self.engine.render(&self.template, context)
    }
}
