use base64::Engine;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Raised by a helper that cannot produce output for its input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct HelperError(pub String);

/// Signature shared by every template helper.
pub type HelperFn = fn(&str) -> Result<String, HelperError>;

/// Name to function mapping consulted by the parser and the renderer.
#[derive(Clone)]
pub struct HelperRegistry {
    helpers: HashMap<String, HelperFn>,
}

impl HelperRegistry {
    /// Creates a registry without any helpers.
    pub fn empty() -> Self {
        Self {
            helpers: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, helper: HelperFn) {
        self.helpers.insert(name.into(), helper);
    }

    pub fn get(&self, name: &str) -> Option<HelperFn> {
        self.helpers.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.helpers.contains_key(name)
    }
}

impl fmt::Debug for HelperRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut names: Vec<&String> = self.helpers.keys().collect();
        names.sort();
        f.debug_struct("HelperRegistry")
            .field("helpers", &names)
            .finish()
    }
}

impl Default for HelperRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("quote", quote);
        registry.register("base64", base64_encode);
        registry
    }
}

/// Wraps a value in a double-quoted scalar.
///
/// JSON string literals are valid YAML double-quoted scalars, so colons,
/// `#`, surrounding whitespace, newlines, reserved words like `true` and the
/// empty string all read back as the original text. Characters that JSON
/// leaves raw but YAML folds as line breaks or refuses outright are escaped
/// as well.
pub fn quote(value: &str) -> Result<String, HelperError> {
    let json = serde_json::to_string(value).map_err(|e| HelperError(e.to_string()))?;
    if !json.chars().any(needs_yaml_escape) {
        return Ok(json);
    }
    let mut quoted = String::with_capacity(json.len() + 8);
    for c in json.chars() {
        if needs_yaml_escape(c) {
            quoted.push_str(&format!("\\u{:04X}", c as u32));
        } else {
            quoted.push(c);
        }
    }
    Ok(quoted)
}

/// NEL, LS and PS are YAML line breaks; DEL, C1 controls, BOM and the
/// non-characters are outside YAML's printable set.
fn needs_yaml_escape(c: char) -> bool {
    matches!(
        c,
        '\u{7f}'..='\u{9f}' | '\u{2028}' | '\u{2029}' | '\u{feff}' | '\u{fffe}' | '\u{ffff}'
    )
}

/// Standard base64 with padding over the UTF-8 bytes of the value.
pub fn base64_encode(value: &str) -> Result<String, HelperError> {
    Ok(base64::engine::general_purpose::STANDARD.encode(value.as_bytes()))
}
