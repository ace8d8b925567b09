//! Text templates rendered against a [`FlowContext`].
//!
//! The syntax is a small subset of Go's `text/template`, which is what flow
//! configs are written in:
//!
//! ```text
//! Hello, {{.Variables.Name}}!            value substitution
//! {{.Text}}                              current payload
//! {{.Memory.goal}}                       field of the memory payload
//! {{.Variables.items.0}}                 array index
//! {{if .Variables.verbose}}...{{else}}...{{end}}
//! {{- .Text -}}                          trim surrounding whitespace
//! {{/* comment */}}
//! ```
//!
//! Grammar (informal):
//! ```text
//! template = (TEXT | action)*
//! action   = "{{" ["- "] body [" -"] "}}"
//! body     = path | "if" path | "else" | "end" | "/*" ... "*/"
//! path     = "." ROOT ("." SEGMENT)*
//! ROOT     = "Text" | "Variables" | "Memory"
//! ```
//!
//! Rendering is pure: the same template and context always give the same
//! bytes. Missing paths are errors when printed and false inside `if`.

use std::fmt;

use crate::context::FlowContext;
use crate::error::TemplateError;

/// A parsed template, reusable across renders.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    source: String,
    nodes: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Value(Path),
    If {
        cond: Path,
        then: Vec<Node>,
        otherwise: Vec<Node>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Root {
    Text,
    Variables,
    Memory,
}

/// A dotted reference into the context, e.g. `.Variables.doc`.
#[derive(Debug, Clone, PartialEq)]
struct Path {
    raw: String,
    root: Root,
    segments: Vec<String>,
}

impl Template {
    /// Parse a template string.
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let tokens = tokenize(source)?;
        let mut cursor = 0;
        let (nodes, terminator) = parse_block(&tokens, &mut cursor)?;
        match terminator {
            Terminator::Eof => Ok(Self {
                source: source.to_string(),
                nodes,
            }),
            Terminator::Else(pos) => Err(syntax(pos, "unexpected {{else}} outside of {{if}}")),
            Terminator::End(pos) => Err(syntax(pos, "unexpected {{end}} outside of {{if}}")),
        }
    }

    /// Render against a context.
    pub fn render(&self, ctx: &FlowContext) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.source.len());
        render_nodes(&self.nodes, ctx, &mut out)?;
        Ok(out)
    }

    /// The original template text.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// True when the template contains no actions at all.
    pub fn is_static(&self) -> bool {
        self.nodes.iter().all(|n| matches!(n, Node::Text(_)))
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Parse and render in one go.
pub fn render(template: &str, ctx: &FlowContext) -> Result<String, TemplateError> {
    Template::parse(template)?.render(ctx)
}

fn syntax(position: usize, message: impl Into<String>) -> TemplateError {
    TemplateError::Syntax {
        position,
        message: message.into(),
    }
}

// ─── Lexer ───────────────────────────────────────────────────────────

#[derive(Debug)]
enum Token {
    Text(String),
    Action { body: String, pos: usize },
}

fn tokenize(src: &str) -> Result<Vec<Token>, TemplateError> {
    let mut tokens = Vec::new();
    // Trim flags per action, applied to neighbouring text afterwards.
    let mut trims: Vec<(usize, bool, bool)> = Vec::new();
    let mut rest = 0;

    while let Some(offset) = src[rest..].find("{{") {
        let open = rest + offset;
        tokens.push(Token::Text(src[rest..open].to_string()));

        let mut body_start = open + 2;
        let trim_left = has_trim_marker(&src[body_start..]);
        if trim_left {
            body_start += 1;
        }

        let after = &src[body_start..];
        let close_rel = if after.trim_start().starts_with("/*") {
            let end_comment = after
                .find("*/")
                .ok_or_else(|| syntax(open, "unclosed comment"))?;
            after[end_comment..]
                .find("}}")
                .map(|i| end_comment + i)
                .ok_or_else(|| syntax(open, "unclosed action"))?
        } else {
            after.find("}}").ok_or_else(|| syntax(open, "unclosed action"))?
        };

        let mut body = &after[..close_rel];
        let trim_right = body.len() >= 2
            && body.ends_with('-')
            && body[..body.len() - 1].ends_with(char::is_whitespace);
        if trim_right {
            body = &body[..body.len() - 1];
        }

        trims.push((tokens.len(), trim_left, trim_right));
        tokens.push(Token::Action {
            body: body.trim().to_string(),
            pos: open,
        });
        rest = body_start + close_rel + 2;
    }
    tokens.push(Token::Text(src[rest..].to_string()));

    for (index, trim_left, trim_right) in trims {
        if trim_left {
            if let Some(Token::Text(text)) = tokens.get_mut(index - 1) {
                let trimmed_len = text.trim_end().len();
                text.truncate(trimmed_len);
            }
        }
        if trim_right {
            if let Some(Token::Text(text)) = tokens.get_mut(index + 1) {
                *text = text.trim_start().to_string();
            }
        }
    }

    tokens.retain(|t| !matches!(t, Token::Text(s) if s.is_empty()));
    Ok(tokens)
}

/// `{{- `: a dash followed by whitespace opens a left-trimming action.
fn has_trim_marker(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next() == Some('-') && chars.next().is_some_and(char::is_whitespace)
}

// ─── Parser ──────────────────────────────────────────────────────────

enum Terminator {
    Eof,
    Else(usize),
    End(usize),
}

fn parse_block(
    tokens: &[Token],
    cursor: &mut usize,
) -> Result<(Vec<Node>, Terminator), TemplateError> {
    let mut nodes = Vec::new();

    while let Some(token) = tokens.get(*cursor) {
        *cursor += 1;
        let (body, pos) = match token {
            Token::Text(text) => {
                nodes.push(Node::Text(text.clone()));
                continue;
            }
            Token::Action { body, pos } => (body.as_str(), *pos),
        };

        if body.starts_with("/*") {
            if !body.ends_with("*/") {
                return Err(syntax(pos, "malformed comment"));
            }
            continue;
        }

        match body {
            "" => return Err(syntax(pos, "empty action")),
            "else" => return Ok((nodes, Terminator::Else(pos))),
            "end" => return Ok((nodes, Terminator::End(pos))),
            _ => {}
        }

        if let Some(cond) = body.strip_prefix("if") {
            if !cond.starts_with(char::is_whitespace) {
                return Err(syntax(pos, format!("unsupported action '{body}'")));
            }
            let cond = parse_path(cond.trim(), pos)?;
            let (then, terminator) = parse_block(tokens, cursor)?;
            let otherwise = match terminator {
                Terminator::End(_) => Vec::new(),
                Terminator::Else(_) => {
                    let (otherwise, terminator) = parse_block(tokens, cursor)?;
                    match terminator {
                        Terminator::End(_) => otherwise,
                        Terminator::Else(p) => return Err(syntax(p, "duplicate {{else}}")),
                        Terminator::Eof => return Err(syntax(pos, "unterminated {{if}}")),
                    }
                }
                Terminator::Eof => return Err(syntax(pos, "unterminated {{if}}")),
            };
            nodes.push(Node::If {
                cond,
                then,
                otherwise,
            });
            continue;
        }

        nodes.push(Node::Value(parse_path(body, pos)?));
    }

    Ok((nodes, Terminator::Eof))
}

fn parse_path(body: &str, pos: usize) -> Result<Path, TemplateError> {
    let Some(dotted) = body.strip_prefix('.') else {
        return Err(syntax(pos, format!("unsupported action '{body}'")));
    };
    if dotted.is_empty() {
        return Err(syntax(pos, "bare '.' is not supported; use .Text, .Variables or .Memory"));
    }
    if dotted.contains(char::is_whitespace) {
        return Err(syntax(pos, format!("unexpected whitespace in '{body}'")));
    }

    let mut parts = dotted.split('.');
    let root = match parts.next() {
        Some("Text") => Root::Text,
        Some("Variables") => Root::Variables,
        Some("Memory") => Root::Memory,
        Some(other) => return Err(syntax(pos, format!("unknown field '{other}'"))),
        None => return Err(syntax(pos, "empty path")),
    };

    let segments: Vec<String> = parts.map(str::to_string).collect();
    if segments.iter().any(String::is_empty) {
        return Err(syntax(pos, format!("empty segment in '{body}'")));
    }
    if root == Root::Text && !segments.is_empty() {
        return Err(syntax(pos, ".Text has no fields"));
    }

    Ok(Path {
        raw: body.to_string(),
        root,
        segments,
    })
}

// ─── Renderer ────────────────────────────────────────────────────────

fn render_nodes(nodes: &[Node], ctx: &FlowContext, out: &mut String) -> Result<(), TemplateError> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Value(path) => write_value(&path.resolve(ctx)?, out),
            Node::If {
                cond,
                then,
                otherwise,
            } => {
                let truthy = cond.resolve(ctx).is_ok_and(|v| is_truthy(&v));
                render_nodes(if truthy { then } else { otherwise }, ctx, out)?;
            }
        }
    }
    Ok(())
}

impl Path {
    fn resolve(&self, ctx: &FlowContext) -> Result<serde_json::Value, TemplateError> {
        let unresolved = || TemplateError::Unresolved {
            path: self.raw.clone(),
        };

        let base = match self.root {
            Root::Text => return Ok(serde_json::Value::String(ctx.text.clone())),
            Root::Memory => &ctx.memory.as_ref().ok_or_else(unresolved)?.value,
            Root::Variables => {
                let Some((first, rest)) = self.segments.split_first() else {
                    // Sorted map keeps the output deterministic.
                    let sorted: serde_json::Map<String, serde_json::Value> = ctx
                        .variables
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    return Ok(serde_json::Value::Object(sorted));
                };
                let value = ctx.variables.get(first).ok_or_else(unresolved)?;
                return walk(value, rest).cloned().ok_or_else(unresolved);
            }
        };

        walk(base, &self.segments).cloned().ok_or_else(unresolved)
    }
}

fn walk<'a>(
    mut current: &'a serde_json::Value,
    segments: &[String],
) -> Option<&'a serde_json::Value> {
    for segment in segments {
        current = match current {
            serde_json::Value::Object(map) => map.get(segment)?,
            serde_json::Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn write_value(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Null => {}
        serde_json::Value::String(s) => out.push_str(s),
        serde_json::Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        serde_json::Value::Number(n) => out.push_str(&n.to_string()),
        other => out.push_str(&other.to_string()),
    }
}

fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|x| x != 0.0),
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Array(items) => !items.is_empty(),
        serde_json::Value::Object(map) => !map.is_empty(),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
