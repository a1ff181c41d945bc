// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Context formatting for configuration strings.
//!
//! Configuration values may reference context fields with `{field}` or
//! `{field:modifier}`, where a modifier may itself contain further fields:
//!
//! ```text
//! pytest {args:tests} --cov={root:uri}
//! {env:PIP_INDEX:{env:UV_INDEX:https://pypi.org/simple}}
//! {verbosity:flag:-1}
//! ```
//!
//! Templates are tokenized once and parsed into a small tree of
//! [`Node`]s before evaluation. There is no escape mechanism, so a literal
//! brace cannot be expressed: `{}` and a lone `}` are grammar errors.

use std::collections::HashMap;
use std::fmt::Write;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::{Error, Result};

#[cfg(test)]
#[path = "./context_test.rs"]
mod context_test;

/// A parsed template fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Literal(String),
    Field(Field),
}

/// A `{name}` or `{name:modifier}` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub modifier: Option<Vec<Node>>,
}

/// A template parsed into nodes, ready for evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    nodes: Vec<Node>,
}

impl Template {
    /// Tokenize and parse a template string.
    pub fn parse(source: &str) -> Result<Self> {
        let tokens = tokenize(source);
        let mut parser = Parser {
            source,
            tokens: &tokens,
            pos: 0,
        };
        let nodes = parser.parse_sequence(false)?;
        Ok(Self { nodes })
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// True if the template contains no fields at all.
    pub fn is_literal(&self) -> bool {
        self.nodes.iter().all(|n| matches!(n, Node::Literal(_)))
    }
}

impl std::fmt::Display for Template {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&render_nodes(&self.nodes))
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Node::Literal(text) => f.write_str(text),
            Node::Field(Field {
                name,
                modifier: None,
            }) => write!(f, "{{{name}}}"),
            Node::Field(Field {
                name,
                modifier: Some(modifier),
            }) => write!(f, "{{{name}:{}}}", render_nodes(modifier)),
        }
    }
}

fn render_nodes(nodes: &[Node]) -> String {
    let mut out = String::new();
    for node in nodes {
        let _ = write!(out, "{node}");
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Text(&'a str),
    Open,
    Close,
    Colon,
}

fn tokenize(source: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut start = 0;
    for (i, c) in source.char_indices() {
        let token = match c {
            '{' => Token::Open,
            '}' => Token::Close,
            ':' => Token::Colon,
            _ => continue,
        };
        if start < i {
            tokens.push(Token::Text(&source[start..i]));
        }
        tokens.push(token);
        start = i + 1;
    }
    if start < source.len() {
        tokens.push(Token::Text(&source[start..]));
    }
    tokens
}

struct Parser<'t, 'a> {
    source: &'a str,
    tokens: &'t [Token<'a>],
    pos: usize,
}

impl<'a> Parser<'_, 'a> {
    fn peek(&self) -> Option<Token<'a>> {
        self.tokens.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<Token<'a>> {
        let token = self.tokens.get(self.pos).copied();
        self.pos += 1;
        token
    }

    fn error(&self, reason: impl Into<String>) -> Error {
        Error::format(self.source, reason)
    }

    /// Parse literals and fields until the end of input or, when nested,
    /// until the `}` that closes the enclosing field (left unconsumed).
    fn parse_sequence(&mut self, nested: bool) -> Result<Vec<Node>> {
        let mut nodes = Vec::new();
        loop {
            match self.peek() {
                None => return Ok(nodes),
                Some(Token::Close) if nested => return Ok(nodes),
                Some(Token::Close) => {
                    return Err(self.error("Single '}' encountered in template"));
                }
                Some(Token::Text(text)) => {
                    push_literal(&mut nodes, text);
                    self.pos += 1;
                }
                Some(Token::Colon) => {
                    push_literal(&mut nodes, ":");
                    self.pos += 1;
                }
                Some(Token::Open) => {
                    self.pos += 1;
                    let field = self.parse_field()?;
                    nodes.push(Node::Field(field));
                }
            }
        }
    }

    fn parse_field(&mut self) -> Result<Field> {
        let name = match self.bump() {
            Some(Token::Text(name)) => name.to_string(),
            None => return Err(self.error("Unclosed '{' in template")),
            Some(_) => {
                return Err(self.error(
                    "Empty field name, literal braces cannot be expressed in a template",
                ));
            }
        };
        match self.bump() {
            Some(Token::Close) => Ok(Field {
                name,
                modifier: None,
            }),
            Some(Token::Colon) => {
                let modifier = self.parse_sequence(true)?;
                match self.bump() {
                    Some(Token::Close) => Ok(Field {
                        name,
                        modifier: Some(modifier),
                    }),
                    _ => Err(self.error("Unclosed '{' in template")),
                }
            }
            Some(Token::Open) => Err(self.error(format!("Unexpected '{{' in field `{name}`"))),
            Some(Token::Text(_)) | None => Err(self.error("Unclosed '{' in template")),
        }
    }
}

fn push_literal(nodes: &mut Vec<Node>, text: &str) {
    if let Some(Node::Literal(last)) = nodes.last_mut() {
        last.push_str(text);
    } else {
        nodes.push(Node::Literal(text.to_string()));
    }
}

/// Split a modifier at its first top-level `:`.
///
/// Colons inside nested fields do not count, so `BAR:{env:BAZ:x}` splits
/// into `BAR` and `{env:BAZ:x}`.
fn split_modifier(nodes: &[Node]) -> (Vec<Node>, Option<Vec<Node>>) {
    for (i, node) in nodes.iter().enumerate() {
        let Node::Literal(text) = node else {
            continue;
        };
        let Some((before, after)) = text.split_once(':') else {
            continue;
        };
        let mut head = nodes[..i].to_vec();
        if !before.is_empty() {
            head.push(Node::Literal(before.to_string()));
        }
        let mut tail = Vec::new();
        if !after.is_empty() {
            tail.push(Node::Literal(after.to_string()));
        }
        tail.extend_from_slice(&nodes[i + 1..]);
        return (head, Some(tail));
    }
    (nodes.to_vec(), None)
}

/// Map a verbosity level to a repeated `-q`/`-v` flag (at most three).
pub fn verbosity_flag(level: i32) -> String {
    let repeat = level.unsigned_abs().min(3) as usize;
    match level.cmp(&0) {
        std::cmp::Ordering::Less => format!("-{}", "q".repeat(repeat)),
        std::cmp::Ordering::Greater => format!("-{}", "v".repeat(repeat)),
        std::cmp::Ordering::Equal => String::new(),
    }
}

/// Join evaluated pieces, trimming the whitespace of literal pieces at
/// either end of the result. Pieces are `(text, is_literal)`.
fn join_trimming_literals(mut pieces: Vec<(String, bool)>) -> String {
    for (text, literal) in pieces.iter_mut() {
        if *literal {
            *text = text.trim_start().to_string();
        }
        if !text.is_empty() {
            break;
        }
    }
    for (text, literal) in pieces.iter_mut().rev() {
        if *literal {
            *text = text.trim_end().to_string();
        }
        if !text.is_empty() {
            break;
        }
    }
    pieces.into_iter().map(|(text, _)| text).collect()
}

#[derive(Clone, Copy)]
struct Arguments<'a> {
    positional: &'a [&'a str],
    named: &'a [(&'a str, &'a str)],
}

impl Arguments<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        match key.parse::<usize>() {
            Ok(index) => self.positional.get(index).copied(),
            Err(_) => self
                .named
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| *value),
        }
    }
}

/// The values available to context fields while formatting.
#[derive(Debug, Clone)]
pub struct FormatContext {
    root: PathBuf,
    home: Option<PathBuf>,
    env_vars: HashMap<String, String>,
    verbosity: i32,
    matrix: IndexMap<String, String>,
    args: Option<String>,
    env_name: Option<String>,
    env_type: Option<String>,
}

impl FormatContext {
    /// Create a context rooted at `root` that reads the process environment.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            home: dirs::home_dir(),
            env_vars: std::env::vars().collect(),
            verbosity: 0,
            matrix: IndexMap::new(),
            args: None,
            env_name: None,
            env_type: None,
        }
    }

    /// Replace the environment variables visible to `{env:...}`.
    pub fn with_env_vars<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env_vars = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    /// Add or replace individual environment variables.
    pub fn with_env_overrides<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env_vars
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn with_home(mut self, home: Option<PathBuf>) -> Self {
        self.home = home;
        self
    }

    pub fn with_verbosity(mut self, verbosity: i32) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn with_matrix(mut self, matrix: IndexMap<String, String>) -> Self {
        self.matrix = matrix;
        self
    }

    /// Set the `{args}` value; empty arguments count as not supplied.
    pub fn with_args(mut self, args: Option<String>) -> Self {
        self.args = args.filter(|a| !a.trim().is_empty());
        self
    }

    pub fn with_environment(mut self, name: impl Into<String>, kind: impl Into<String>) -> Self {
        self.env_name = Some(name.into());
        self.env_type = Some(kind.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn verbosity(&self) -> i32 {
        self.verbosity
    }

    pub fn args(&self) -> Option<&str> {
        self.args.as_deref()
    }

    /// Format a template that uses only well-known fields.
    pub fn format_template(&self, template: &str) -> Result<String> {
        self.format(template, &[], &[])
    }

    /// Format a template, resolving `{N}` from `positional` and `{key}`
    /// from `named` when the name is not a well-known field.
    ///
    /// Whitespace that the template's own text leaves at either end of the
    /// result is trimmed, so an empty trailing field does not leave a
    /// dangling separator behind. Field values are never trimmed.
    pub fn format(
        &self,
        template: &str,
        positional: &[&str],
        named: &[(&str, &str)],
    ) -> Result<String> {
        let template = Template::parse(template)?;
        let args = Arguments { positional, named };
        let mut pieces = Vec::with_capacity(template.nodes().len());
        for node in template.nodes() {
            pieces.push(match node {
                Node::Literal(text) => (text.clone(), true),
                Node::Field(field) => (self.evaluate_field(field, args)?, false),
            });
        }
        Ok(join_trimming_literals(pieces))
    }

    fn evaluate(&self, nodes: &[Node], args: Arguments<'_>) -> Result<String> {
        let mut out = String::new();
        for node in nodes {
            match node {
                Node::Literal(text) => out.push_str(text),
                Node::Field(field) => out.push_str(&self.evaluate_field(field, args)?),
            }
        }
        Ok(out)
    }

    fn evaluate_field(&self, field: &Field, args: Arguments<'_>) -> Result<String> {
        let modifier = field.modifier.as_deref();
        match field.name.as_str() {
            "root" => self.format_path("root", &self.root, modifier, args),
            "home" => {
                let home = self
                    .home
                    .as_deref()
                    .ok_or_else(|| {
                        Error::format("home", "Unable to determine the home directory")
                    })?;
                self.format_path("home", home, modifier, args)
            }
            "/" => self.format_separator("/", std::path::MAIN_SEPARATOR, modifier),
            ";" => self.format_separator(";", PATH_LIST_SEPARATOR, modifier),
            "env" => self.format_env(modifier, args),
            "args" => Ok(self.format_args(modifier)),
            "matrix" => self.format_matrix(modifier, args),
            "verbosity" => self.format_verbosity(modifier, args),
            "env_name" => self.format_known("env_name", self.env_name.as_deref(), modifier),
            "env_type" => self.format_known("env_type", self.env_type.as_deref(), modifier),
            name => {
                let value = args.get(name).ok_or_else(|| {
                    Error::format(name, format!("Unknown context field `{name}`"))
                })?;
                if modifier.is_some() {
                    return Err(Error::format(
                        name,
                        "Modifiers are not supported for substitution fields",
                    ));
                }
                Ok(value.to_string())
            }
        }
    }

    fn format_path(
        &self,
        field: &str,
        path: &Path,
        modifier: Option<&[Node]>,
        args: Arguments<'_>,
    ) -> Result<String> {
        let Some(modifier) = modifier else {
            return Ok(path.display().to_string());
        };
        let spec = self.evaluate(modifier, args)?;
        let mut path = path.to_path_buf();
        let mut modifiers = spec.split(':').peekable();
        while let Some(name) = modifiers.next() {
            match name {
                "real" => {
                    path = dunce::canonicalize(&path).map_err(|err| {
                        Error::format(field, format!("Unable to resolve {}: {err}", path.display()))
                    })?;
                }
                "parent" => {
                    if let Some(parent) = path.parent() {
                        path = parent.to_path_buf();
                    }
                }
                "uri" => {
                    if modifiers.peek().is_some() {
                        return Err(Error::format(
                            field,
                            "The `uri` modifier must be the last path modifier",
                        ));
                    }
                    return url::Url::from_file_path(&path)
                        .map(String::from)
                        .map_err(|()| {
                            Error::format(
                                field,
                                format!("Path is not absolute: {}", path.display()),
                            )
                        });
                }
                other => {
                    return Err(Error::format(field, format!("Unknown path modifier: {other}")));
                }
            }
        }
        Ok(path.display().to_string())
    }

    fn format_separator(
        &self,
        field: &str,
        sep: char,
        modifier: Option<&[Node]>,
    ) -> Result<String> {
        match modifier {
            None => Ok(sep.to_string()),
            Some(_) => Err(Error::format(field, "Separator fields do not support modifiers")),
        }
    }

    fn format_known(
        &self,
        field: &str,
        value: Option<&str>,
        modifier: Option<&[Node]>,
    ) -> Result<String> {
        if modifier.is_some() {
            return Err(Error::format(
                field,
                format!("The `{field}` field does not support modifiers"),
            ));
        }
        value.map(str::to_string).ok_or_else(|| {
            Error::format(
                field,
                format!("The `{field}` field is only available inside an environment"),
            )
        })
    }

    fn format_env(&self, modifier: Option<&[Node]>, args: Arguments<'_>) -> Result<String> {
        let Some(modifier) = modifier else {
            return Err(Error::format("env", "The `env` field requires a modifier"));
        };
        let (name, default) = split_modifier(modifier);
        let name = self.evaluate(&name, args)?;
        if name.is_empty() {
            return Err(Error::format("env", "The `env` field requires a variable name"));
        }
        match (self.env_vars.get(&name), default) {
            (Some(value), _) => Ok(value.clone()),
            (None, Some(default)) => self.evaluate(&default, args),
            (None, None) => Err(Error::format(
                "env",
                format!("Environment variable `{name}` must be set"),
            )),
        }
    }

    /// `{args}` yields the supplied arguments unchanged; the default text is
    /// only used, verbatim, when no arguments were supplied.
    fn format_args(&self, modifier: Option<&[Node]>) -> String {
        match (&self.args, modifier) {
            (Some(args), _) => args.clone(),
            (None, Some(default)) => render_nodes(default),
            (None, None) => String::new(),
        }
    }

    fn format_matrix(&self, modifier: Option<&[Node]>, args: Arguments<'_>) -> Result<String> {
        let Some(modifier) = modifier else {
            return Err(Error::format("matrix", "`matrix` requires a modifier"));
        };
        let (name, default) = split_modifier(modifier);
        let name = self.evaluate(&name, args)?;
        match (self.matrix.get(&name), default) {
            (Some(value), _) => Ok(value.clone()),
            (None, Some(default)) => self.evaluate(&default, args),
            (None, None) => Err(Error::format(
                "matrix",
                format!("Matrix variable `{name}` is not defined, you must set a default"),
            )),
        }
    }

    fn format_verbosity(&self, modifier: Option<&[Node]>, args: Arguments<'_>) -> Result<String> {
        let Some(modifier) = modifier else {
            return Ok(self.verbosity.to_string());
        };
        let spec = self.evaluate(modifier, args)?;
        let (kind, adjustment) = match spec.split_once(':') {
            Some((kind, adjustment)) => (kind, Some(adjustment)),
            None => (spec.as_str(), None),
        };
        match kind {
            "flag" => {
                let adjustment = match adjustment {
                    None => 0,
                    Some(raw) => raw.trim().parse::<i32>().map_err(|_| {
                        Error::format(
                            "verbosity",
                            format!("Verbosity flag adjustment must be an integer: {raw}"),
                        )
                    })?,
                };
                Ok(verbosity_flag(self.verbosity.saturating_add(adjustment)))
            }
            other => Err(Error::format(
                "verbosity",
                format!("Unknown verbosity modifier: {other}"),
            )),
        }
    }
}

#[cfg(windows)]
const PATH_LIST_SEPARATOR: char = ';';
#[cfg(not(windows))]
const PATH_LIST_SEPARATOR: char = ':';
