use log::debug;
use std::borrow::Cow;
use std::path::Path;

use crate::ast::{Expr, Field, ItemField, Node, Template};
use crate::context::{Context, EnvVar, ServiceBind};
use crate::error::RenderError;
use crate::helpers::{HelperFn, HelperRegistry};
use crate::parser;

/// TemplateEngine compiles template source and renders it against a [`Context`].
///
/// The engine only holds its helper registry, so one instance can be shared
/// across threads and used for any number of templates.
#[derive(Debug, Clone, Default)]
pub struct TemplateEngine {
    helpers: HelperRegistry,
}

impl TemplateEngine {
    /// Creates a new TemplateEngine with the built-in helpers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an engine that resolves helpers from `helpers`.
    pub fn with_helpers(helpers: HelperRegistry) -> Self {
        Self { helpers }
    }

    /// Registers an additional helper. Templates compiled afterwards may call it.
    pub fn register_helper(&mut self, name: impl Into<String>, helper: HelperFn) {
        self.helpers.register(name, helper);
    }

    pub fn helpers(&self) -> &HelperRegistry {
        &self.helpers
    }

    /// Parses template source into a reusable [`Template`].
    pub fn compile(&self, source: &str) -> Result<Template, RenderError> {
        let template = parser::parse(source, &self.helpers)?;
        debug!(
            "Compiled template with {} top-level nodes",
            template.nodes().len()
        );
        Ok(template)
    }

    /// Renders a compiled template. Nothing is returned unless the whole
    /// document rendered.
    pub fn render(&self, template: &Template, context: &Context) -> Result<String, RenderError> {
        context.validate()?;

        let mut renderer = Renderer {
            helpers: &self.helpers,
            context,
            scopes: Vec::new(),
            out: String::new(),
        };
        renderer.nodes(template.nodes())?;
        debug!(
            "Rendered {} bytes for '{}'",
            renderer.out.len(),
            context.metadata_name
        );
        Ok(renderer.out)
    }

    /// Compiles and renders a template string in one step.
    pub fn render_string(&self, source: &str, context: &Context) -> Result<String, RenderError> {
        let template = self.compile(source)?;
        self.render(&template, context)
    }

    /// Renders a template from a file with the given context.
    pub fn render_file(&self, path: &Path, context: &Context) -> Result<String, RenderError> {
        let source = std::fs::read_to_string(path).map_err(|e| RenderError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        self.render_string(&source, context)
    }
}

/// The element bound to `this` inside an `each` block.
#[derive(Debug, Clone, Copy)]
enum Item<'c> {
    Env(&'c EnvVar),
    Bind(&'c ServiceBind),
}

struct Renderer<'e, 'c> {
    helpers: &'e HelperRegistry,
    context: &'c Context,
    scopes: Vec<Item<'c>>,
    out: String,
}

impl<'e, 'c> Renderer<'e, 'c> {
    fn nodes(&mut self, nodes: &[Node]) -> Result<(), RenderError> {
        for node in nodes {
            self.node(node)?;
        }
        Ok(())
    }

    fn node(&mut self, node: &Node) -> Result<(), RenderError> {
        match node {
            Node::Text(text) => self.out.push_str(text),
            Node::Interpolate(expr) => {
                let value = self.scalar(*expr)?;
                self.out.push_str(&value);
            }
            Node::HelperCall { helper, arg } => {
                let func = self.helpers.get(helper).ok_or_else(|| {
                    RenderError::reference(helper.as_str(), "helper is not registered")
                })?;
                let value = self.scalar(*arg)?;
                let result = func(&value).map_err(|e| RenderError::HelperExecution {
                    helper: helper.clone(),
                    message: e.to_string(),
                })?;
                self.out.push_str(&result);
            }
            Node::Conditional { test, body } => {
                if self.is_present(*test)? {
                    self.nodes(body)?;
                }
            }
            Node::Loop { sequence, body } => {
                let context = self.context;
                let items: Vec<Item<'c>> = match sequence {
                    Field::Environment => context.environment.iter().map(Item::Env).collect(),
                    Field::Binds => context.binds.iter().map(Item::Bind).collect(),
                    other => {
                        return Err(RenderError::reference(
                            other.name(),
                            "field is not a sequence",
                        ))
                    }
                };
                for item in items {
                    self.scopes.push(item);
                    let result = self.nodes(body);
                    self.scopes.pop();
                    result?;
                }
            }
        }
        Ok(())
    }

    /// Resolves an expression to text, failing if it is absent.
    fn scalar(&self, expr: Expr) -> Result<Cow<'c, str>, RenderError> {
        let value = match expr {
            Expr::Field(field) => self.field(field)?,
            Expr::Item(item) => Some(Cow::Borrowed(self.item(item)?)),
        };
        value.ok_or_else(|| {
            RenderError::reference(
                expr.to_string(),
                "optional field is absent, guard it with an if block",
            )
        })
    }

    fn is_present(&self, expr: Expr) -> Result<bool, RenderError> {
        let context = self.context;
        let present = match expr {
            Expr::Field(Field::Environment) => !context.environment.is_empty(),
            Expr::Field(Field::Binds) => !context.binds.is_empty(),
            Expr::Field(Field::PersistentStorage) => context.persistent_storage.is_some(),
            Expr::Field(field) => self.field(field)?.is_some(),
            Expr::Item(item) => !self.item(item)?.trim().is_empty(),
        };
        Ok(present)
    }

    /// Looks up a scalar field. Optional fields holding only whitespace are absent.
    fn field(&self, field: Field) -> Result<Option<Cow<'c, str>>, RenderError> {
        let context = self.context;
        let storage = context.persistent_storage.as_ref();
        let value: Option<&'c str> = match field {
            Field::MetadataName => Some(required(&context.metadata_name, "metadataName")?),
            Field::Image => Some(required(&context.image, "image")?),
            Field::ServiceName => Some(required(&context.service_name, "serviceName")?),
            Field::Count => return Ok(Some(Cow::Owned(context.count.to_string()))),
            Field::ServiceTopology => Some(context.service_topology.as_str()),
            Field::StorageSize => storage.map(|s| s.size.as_str()),
            Field::StorageClassName => storage.map(|s| s.storage_class_name.as_str()),
            Field::StorageMountPath => storage.map(|s| s.mount_path.as_str()),
            Field::ServiceGroup => context.service_group.as_deref(),
            Field::Config => context.config.as_deref(),
            Field::RingSecretName => context.ring_secret_name.as_deref(),
            Field::Environment | Field::Binds | Field::PersistentStorage => {
                return Err(RenderError::reference(
                    field.name(),
                    "field is not a scalar",
                ))
            }
        };
        Ok(value.filter(|v| !v.trim().is_empty()).map(Cow::Borrowed))
    }

    fn item(&self, field: ItemField) -> Result<&'c str, RenderError> {
        let current = self.scopes.last().copied().ok_or_else(|| {
            RenderError::reference(field.name(), "'this' is only bound inside each blocks")
        })?;
        let value = match (current, field) {
            (Item::Env(var), ItemField::EnvName) => &var.name,
            (Item::Env(var), ItemField::EnvValue) => &var.value,
            (Item::Bind(bind), ItemField::BindName) => &bind.name,
            (Item::Bind(bind), ItemField::BindService) => &bind.service,
            (Item::Bind(bind), ItemField::BindGroup) => &bind.group,
            _ => {
                return Err(RenderError::reference(
                    field.name(),
                    "field does not exist on the current loop element",
                ))
            }
        };
        Ok(value.as_str())
    }
}

fn required<'c>(value: &'c str, name: &'static str) -> Result<&'c str, RenderError> {
    if value.trim().is_empty() {
        return Err(RenderError::MissingRequiredField(name));
    }
    Ok(value)
}
