use heck::{ToLowerCamelCase, ToSnakeCase};
use regex::Regex;
use std::sync::OnceLock;

use crate::ast::{Expr, Field, ItemField, Kind, Node, Template};
use crate::error::RenderError;
use crate::helpers::HelperRegistry;

const TAG_OPEN: &str = "{{";
const TAG_CLOSE: &str = "}}";
const TRIM_MARKER: char = '~';

/// The regex pattern for a dotted field path.
const FIELD_PATH: &str = r"^[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*$";

/// Name bound to the current element inside an `each` block.
const LOOP_BINDING: &str = "this";

fn field_path_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(FIELD_PATH).expect("field path pattern is valid"))
}

#[derive(Debug, PartialEq)]
enum Token {
    Text(String),
    Tag {
        body: String,
        trim_before: bool,
        trim_after: bool,
        line: usize,
    },
    Comment {
        trim_before: bool,
        trim_after: bool,
    },
}

impl Token {
    fn trims(&self) -> (bool, bool) {
        match self {
            Token::Text(_) => (false, false),
            Token::Tag {
                trim_before,
                trim_after,
                ..
            }
            | Token::Comment {
                trim_before,
                trim_after,
            } => (*trim_before, *trim_after),
        }
    }
}

/// Splits the source into literal text and `{{ ... }}` tags.
fn tokenize(source: &str) -> Result<Vec<Token>, RenderError> {
    let mut tokens = Vec::new();
    let mut rest = source;
    let mut line = 1;

    while let Some(start) = rest.find(TAG_OPEN) {
        if start > 0 {
            let text = &rest[..start];
            line += text.matches('\n').count();
            tokens.push(Token::Text(text.to_string()));
        }
        let after_open = &rest[start + TAG_OPEN.len()..];
        let trim_before = after_open.starts_with(TRIM_MARKER);
        let inner = if trim_before { &after_open[1..] } else { after_open };

        if let Some(comment) = inner.strip_prefix("!--") {
            let end = find_comment_end(comment)
                .ok_or_else(|| RenderError::syntax(line, "unterminated comment"))?;
            let trim_after = comment[end..].starts_with("--~");
            let close = end + if trim_after { 5 } else { 4 };
            let consumed = rest.len() - comment.len() + close;
            line += rest[start..consumed].matches('\n').count();
            tokens.push(Token::Comment {
                trim_before,
                trim_after,
            });
            rest = &rest[consumed..];
            continue;
        }

        let end = inner
            .find(TAG_CLOSE)
            .ok_or_else(|| RenderError::syntax(line, "unterminated tag, expected '}}'"))?;
        let raw = &inner[..end];
        let trim_after = raw.ends_with(TRIM_MARKER);
        let body = if trim_after { &raw[..raw.len() - 1] } else { raw };
        let consumed = rest.len() - inner.len() + end + TAG_CLOSE.len();
        let tag_line = line;
        line += rest[start..consumed].matches('\n').count();

        if body.trim_start().starts_with('!') {
            tokens.push(Token::Comment {
                trim_before,
                trim_after,
            });
        } else {
            tokens.push(Token::Tag {
                body: body.trim().to_string(),
                trim_before,
                trim_after,
                line: tag_line,
            });
        }
        rest = &rest[consumed..];
    }

    if !rest.is_empty() {
        tokens.push(Token::Text(rest.to_string()));
    }
    Ok(tokens)
}

/// Offset of the `--}}` or `--~}}` that closes a long comment.
fn find_comment_end(comment: &str) -> Option<usize> {
    let plain = comment.find("--}}");
    let trimmed = comment.find("--~}}");
    match (plain, trimmed) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Applies `~` markers to the neighbouring text tokens.
fn apply_whitespace_control(tokens: &mut [Token]) {
    for i in 0..tokens.len() {
        let (trim_before, trim_after) = tokens[i].trims();
        if trim_before && i > 0 {
            if let Token::Text(text) = &mut tokens[i - 1] {
                let trimmed = text.trim_end().len();
                text.truncate(trimmed);
            }
        }
        if trim_after && i + 1 < tokens.len() {
            if let Token::Text(text) = &mut tokens[i + 1] {
                *text = text.trim_start().to_string();
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    If,
    Each,
}

impl BlockKind {
    fn name(&self) -> &'static str {
        match self {
            BlockKind::If => "if",
            BlockKind::Each => "each",
        }
    }
}

struct Frame {
    kind: BlockKind,
    line: usize,
    test: Expr,
    body: Vec<Node>,
}

struct Parser<'a> {
    helpers: &'a HelperRegistry,
    stack: Vec<Frame>,
    root: Vec<Node>,
}

impl<'a> Parser<'a> {
    fn new(helpers: &'a HelperRegistry) -> Self {
        Self {
            helpers,
            stack: Vec::new(),
            root: Vec::new(),
        }
    }

    fn current(&mut self) -> &mut Vec<Node> {
        match self.stack.last_mut() {
            Some(frame) => &mut frame.body,
            None => &mut self.root,
        }
    }

    /// The sequence bound to `this` by the innermost `each` block.
    fn loop_scope(&self) -> Option<Field> {
        self.stack.iter().rev().find_map(|frame| match (frame.kind, frame.test) {
            (BlockKind::Each, Expr::Field(field)) => Some(field),
            _ => None,
        })
    }

    fn push_text(&mut self, text: String) {
        if text.is_empty() {
            return;
        }
        let nodes = self.current();
        if let Some(Node::Text(prev)) = nodes.last_mut() {
            prev.push_str(&text);
        } else {
            nodes.push(Node::Text(text));
        }
    }

    fn tag(&mut self, body: &str, line: usize) -> Result<(), RenderError> {
        if body.is_empty() {
            return Err(RenderError::syntax(line, "empty tag"));
        }
        if let Some(open) = body.strip_prefix('#') {
            return self.open_block(open, line);
        }
        if let Some(close) = body.strip_prefix('/') {
            return self.close_block(close.trim(), line);
        }

        let words: Vec<&str> = body.split_whitespace().collect();
        match words.as_slice() {
            ["else"] => Err(RenderError::syntax(line, "else branches are not supported")),
            [path] => {
                let expr = self.resolve(path, line)?;
                self.require_scalar(expr, path)?;
                self.current().push(Node::Interpolate(expr));
                Ok(())
            }
            [helper, path] => {
                if !self.helpers.contains(helper) {
                    return Err(RenderError::syntax(
                        line,
                        format!("unknown helper '{}'", helper),
                    ));
                }
                let arg = self.resolve(path, line)?;
                self.require_scalar(arg, path)?;
                self.current().push(Node::HelperCall {
                    helper: helper.to_string(),
                    arg,
                });
                Ok(())
            }
            _ => Err(RenderError::syntax(
                line,
                format!("helpers take exactly one argument: '{{{{{}}}}}'", body),
            )),
        }
    }

    fn open_block(&mut self, open: &str, line: usize) -> Result<(), RenderError> {
        let words: Vec<&str> = open.split_whitespace().collect();
        let kind = match words.first() {
            Some(&"if") => BlockKind::If,
            Some(&"each") => BlockKind::Each,
            Some(other) => {
                return Err(RenderError::syntax(
                    line,
                    format!("unknown block '{}'", other),
                ))
            }
            None => return Err(RenderError::syntax(line, "missing block name")),
        };
        if words.len() != 2 {
            return Err(RenderError::syntax(
                line,
                format!("'{}' blocks take exactly one field", kind.name()),
            ));
        }

        let path = words[1];
        let test = self.resolve(path, line)?;
        if kind == BlockKind::Each {
            match test {
                Expr::Field(field) if field.kind() == Kind::Sequence => {}
                _ => {
                    return Err(RenderError::reference(
                        path,
                        "each blocks can only iterate environment or binds",
                    ))
                }
            }
        }
        self.stack.push(Frame {
            kind,
            line,
            test,
            body: Vec::new(),
        });
        Ok(())
    }

    fn close_block(&mut self, name: &str, line: usize) -> Result<(), RenderError> {
        let frame = match self.stack.pop() {
            Some(frame) => frame,
            None => {
                return Err(RenderError::syntax(
                    line,
                    format!("unexpected closing tag '{{{{/{}}}}}'", name),
                ))
            }
        };
        if frame.kind.name() != name {
            return Err(RenderError::syntax(
                line,
                format!(
                    "mismatched closing tag '{{{{/{}}}}}', expected '{{{{/{}}}}}' for the block opened at line {}",
                    name,
                    frame.kind.name(),
                    frame.line
                ),
            ));
        }
        let node = match (frame.kind, frame.test) {
            (BlockKind::If, test) => Node::Conditional {
                test,
                body: frame.body,
            },
            (BlockKind::Each, Expr::Field(sequence)) => Node::Loop {
                sequence,
                body: frame.body,
            },
            (BlockKind::Each, other) => {
                return Err(RenderError::reference(
                    other.to_string(),
                    "each blocks can only iterate environment or binds",
                ))
            }
        };
        self.current().push(node);
        Ok(())
    }

    fn resolve(&self, path: &str, line: usize) -> Result<Expr, RenderError> {
        if !field_path_regex().is_match(path) {
            return Err(RenderError::syntax(
                line,
                format!("malformed field path '{}'", path),
            ));
        }
        let raw: Vec<&str> = path.split('.').collect();
        if let Some(bad) = raw.iter().find(|s| !is_canonical_segment(s)) {
            return Err(RenderError::reference(
                path,
                format!("'{}' is neither snake_case nor camelCase", bad),
            ));
        }
        let segments: Vec<String> = raw.iter().map(|s| s.to_snake_case()).collect();

        if segments[0] == LOOP_BINDING {
            let sequence = self.loop_scope().ok_or_else(|| {
                RenderError::reference(path, "'this' is only bound inside each blocks")
            })?;
            if segments.len() != 2 {
                return Err(RenderError::reference(
                    path,
                    format!("elements of {} are records, use this.<field>", sequence),
                ));
            }
            return ItemField::resolve(sequence, &segments[1])
                .map(Expr::Item)
                .ok_or_else(|| {
                    RenderError::reference(
                        path,
                        format!("elements of {} have no such field", sequence),
                    )
                });
        }

        Field::resolve(&segments)
            .map(Expr::Field)
            .ok_or_else(|| RenderError::reference(path, "no such field in the context"))
    }

    fn require_scalar(&self, expr: Expr, path: &str) -> Result<(), RenderError> {
        match expr {
            Expr::Field(field) if field.kind() != Kind::Scalar => Err(RenderError::reference(
                path,
                "only scalar fields can be written to the output",
            )),
            _ => Ok(()),
        }
    }

    fn finish(mut self) -> Result<Template, RenderError> {
        if let Some(frame) = self.stack.pop() {
            return Err(RenderError::syntax(
                frame.line,
                format!("unterminated '{{{{#{}}}}}' block", frame.kind.name()),
            ));
        }
        Ok(Template::new(self.root))
    }
}

/// A path segment must already be in snake_case or lowerCamelCase, so
/// `IMAGE` or `_image` never alias `image`.
fn is_canonical_segment(segment: &str) -> bool {
    *segment == segment.to_snake_case() || *segment == segment.to_lower_camel_case()
}

/// Parses template source into a [`Template`], checking every field path and
/// helper name against the context schema and `helpers`.
pub fn parse(source: &str, helpers: &HelperRegistry) -> Result<Template, RenderError> {
    let mut tokens = tokenize(source)?;
    apply_whitespace_control(&mut tokens);

    let mut parser = Parser::new(helpers);
    for token in tokens {
        match token {
            Token::Text(text) => parser.push_text(text),
            Token::Tag { body, line, .. } => parser.tag(&body, line)?,
            Token::Comment { .. } => {}
        }
    }
    parser.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_default(source: &str) -> Result<Template, RenderError> {
        parse(source, &HelperRegistry::default())
    }

    fn syntax_line(result: Result<Template, RenderError>) -> usize {
        match result {
            Err(RenderError::TemplateSyntax { line, .. }) => line,
            other => panic!("Expected a syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_tokenize() {
        let tokens = tokenize("a {{~image}}\nb").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Text("a ".to_string()),
                Token::Tag {
                    body: "image".to_string(),
                    trim_before: true,
                    trim_after: false,
                    line: 1,
                },
                Token::Text("\nb".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_nodes() {
        let template =
            parse_default("name: {{metadataName}}\n{{#each binds}}- {{quote this.name}}{{/each}}")
                .unwrap();
        assert_eq!(
            template.nodes(),
            &[
                Node::Text("name: ".to_string()),
                Node::Interpolate(Expr::Field(Field::MetadataName)),
                Node::Text("\n".to_string()),
                Node::Loop {
                    sequence: Field::Binds,
                    body: vec![
                        Node::Text("- ".to_string()),
                        Node::HelperCall {
                            helper: "quote".to_string(),
                            arg: Expr::Item(ItemField::BindName),
                        },
                    ],
                },
            ]
        );
    }

    #[test]
    fn test_whitespace_control_is_applied_at_parse_time() {
        let template = parse_default("a\n  {{~#if config~}}\n  b\n  {{~/if}}\nc").unwrap();
        assert_eq!(
            template.nodes(),
            &[
                Node::Text("a".to_string()),
                Node::Conditional {
                    test: Expr::Field(Field::Config),
                    body: vec![Node::Text("b".to_string())],
                },
                Node::Text("\nc".to_string()),
            ]
        );
    }

    #[test]
    fn test_comments_are_dropped() {
        let template = parse_default("{{! short }}a{{!-- long {{image}} --~}}\n b").unwrap();
        assert_eq!(template.nodes(), &[Node::Text("ab".to_string())]);
    }

    #[test]
    fn test_snake_and_camel_paths_are_equivalent() {
        let camel = parse_default("{{persistentStorage.storageClassName}}").unwrap();
        let snake = parse_default("{{persistent_storage.storage_class_name}}").unwrap();
        assert_eq!(camel, snake);
    }

    #[test]
    fn test_unterminated_tag() {
        assert_eq!(syntax_line(parse_default("a\nb {{image")), 2);
    }

    #[test]
    fn test_unterminated_block() {
        assert_eq!(syntax_line(parse_default("x\n{{#if config}}\nsecret")), 2);
    }

    #[test]
    fn test_mismatched_block() {
        assert_eq!(syntax_line(parse_default("{{#if binds}}\n{{/each}}")), 2);
    }

    #[test]
    fn test_unexpected_closing_tag() {
        assert_eq!(syntax_line(parse_default("{{/if}}")), 1);
    }

    #[test]
    fn test_unknown_helper() {
        assert_eq!(syntax_line(parse_default("{{shout image}}")), 1);
    }

    #[test]
    fn test_unknown_block() {
        assert_eq!(syntax_line(parse_default("{{#with config}}{{/with}}")), 1);
    }

    #[test]
    fn test_malformed_path() {
        assert_eq!(syntax_line(parse_default("{{image..tag}}")), 1);
        assert_eq!(syntax_line(parse_default("{{quote 9lives}}")), 1);
    }

    #[test]
    fn test_empty_tag_and_else() {
        assert_eq!(syntax_line(parse_default("{{ }}")), 1);
        assert_eq!(syntax_line(parse_default("{{#if config}}{{else}}{{/if}}")), 1);
    }

    #[test]
    fn test_unknown_field() {
        assert!(matches!(
            parse_default("{{replicas}}"),
            Err(RenderError::InvalidReference { .. })
        ));
        assert!(matches!(
            parse_default("{{persistentStorage.speed}}"),
            Err(RenderError::InvalidReference { .. })
        ));
        for path in [
            "IMAGE",
            "_image",
            "image_",
            "Metadata__Name",
            "MetadataName",
            "metadata__name",
            "persistentStorage.Size",
            "env",
            "bind",
        ] {
            let source = format!("{{{{{}}}}}", path);
            assert!(
                matches!(
                    parse_default(&source),
                    Err(RenderError::InvalidReference { .. })
                ),
                "{} should not resolve",
                path
            );
        }
    }

    #[test]
    fn test_this_outside_loop() {
        assert!(matches!(
            parse_default("{{this.name}}"),
            Err(RenderError::InvalidReference { .. })
        ));
    }

    #[test]
    fn test_loop_element_fields() {
        assert!(parse_default("{{#each environment}}{{this.value}}{{/each}}").is_ok());
        assert!(matches!(
            parse_default("{{#each environment}}{{this.service}}{{/each}}"),
            Err(RenderError::InvalidReference { .. })
        ));
        assert!(matches!(
            parse_default("{{#each binds}}{{this}}{{/each}}"),
            Err(RenderError::InvalidReference { .. })
        ));
    }

    #[test]
    fn test_each_requires_sequence() {
        assert!(matches!(
            parse_default("{{#each image}}{{/each}}"),
            Err(RenderError::InvalidReference { .. })
        ));
    }

    #[test]
    fn test_interpolation_requires_scalar() {
        assert!(matches!(
            parse_default("{{binds}}"),
            Err(RenderError::InvalidReference { .. })
        ));
        assert!(matches!(
            parse_default("{{quote persistentStorage}}"),
            Err(RenderError::InvalidReference { .. })
        ));
    }
}
