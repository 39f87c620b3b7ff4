//! WDL document loading.
//!
//! This is not a WDL parser. It recovers just enough structure to submit a
//! workflow: the import graph (so the source can be packaged), the
//! executable (a workflow, or a document's only task), its input
//! declarations, and a digest over every source file.

use std::{
    collections::BTreeMap,
    ffi::OsStr,
    fmt, fs,
    path::{Path, PathBuf},
};

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

static IMPORT: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(?m)^\s*import\s+["']([^"']+)["']"#).expect("valid regex"));
static WORKFLOW: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*workflow\s+([A-Za-z][A-Za-z0-9_]*)\s*\{").expect("valid regex"));
static TASK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*task\s+([A-Za-z][A-Za-z0-9_]*)\s*\{").expect("valid regex"));
static INPUT_SECTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*input\s*\{").expect("valid regex"));

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot resolve import \"{uri}\" from {}", .from.display())]
    ImportNotFound { uri: String, from: PathBuf },

    #[error("import \"{uri}\" in {} points outside the main document's directory", .from.display())]
    ImportOutsideRoot { uri: String, from: PathBuf },

    #[error("main WDL file must have a workflow or a single task: {}", .path.display())]
    NoExecutable { path: PathBuf },

    #[error("{}: {message}", .path.display())]
    Syntax { path: PathBuf, message: String },

    #[error("failed to build workflow archive: {0}")]
    Archive(#[from] zip::result::ZipError),
}

/// Declared type of an input, as far as input coercion cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WdlType {
    Boolean,
    Int,
    Float,
    String,
    File,
    Directory,
    Array { item: Box<WdlType>, non_empty: bool },
    /// Maps, pairs, structs and anything else; values pass through as JSON.
    Other(String),
}

impl WdlType {
    /// Parse a type expression without its trailing `?`.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some(rest) = raw.strip_prefix("Array[") {
            let (inner, non_empty) = match rest.strip_suffix("]+") {
                Some(inner) => (inner, true),
                None => (rest.strip_suffix(']').unwrap_or(rest), false),
            };
            let item = inner.trim().trim_end_matches('?');
            return Self::Array {
                item: Box::new(Self::parse(item)),
                non_empty,
            };
        }
        match raw {
            "Boolean" => Self::Boolean,
            "Int" => Self::Int,
            "Float" => Self::Float,
            "String" => Self::String,
            "File" => Self::File,
            "Directory" => Self::Directory,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn is_path(&self) -> bool {
        matches!(self, Self::File | Self::Directory)
    }
}

impl fmt::Display for WdlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean => f.write_str("Boolean"),
            Self::Int => f.write_str("Int"),
            Self::Float => f.write_str("Float"),
            Self::String => f.write_str("String"),
            Self::File => f.write_str("File"),
            Self::Directory => f.write_str("Directory"),
            Self::Array { item, non_empty } => write!(f, "Array[{item}]{}", if *non_empty { "+" } else { "" }),
            Self::Other(raw) => f.write_str(raw),
        }
    }
}

/// One declaration from an executable's `input` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDecl {
    pub name: String,
    pub ty: WdlType,
    pub optional: bool,
    /// Default expression text, unevaluated.
    pub default: Option<String>,
}

impl InputDecl {
    pub fn is_required(&self) -> bool {
        !self.optional && self.default.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutableKind {
    Workflow,
    Task,
}

/// The workflow (or lone task) a document runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executable {
    pub kind: ExecutableKind,
    pub name: String,
    pub inputs: Vec<InputDecl>,
}

impl Executable {
    pub fn input(&self, name: &str) -> Option<&InputDecl> {
        self.inputs.iter().find(|decl| decl.name == name)
    }

    pub fn available_inputs(&self) -> Vec<&str> {
        self.inputs.iter().map(|decl| decl.name.as_str()).collect()
    }

    pub fn required_inputs(&self) -> Vec<&str> {
        self.inputs
            .iter()
            .filter(|decl| decl.is_required())
            .map(|decl| decl.name.as_str())
            .collect()
    }
}

/// A WDL source file and its path inside the workflow archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub archive_path: String,
    pub disk_path: PathBuf,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct Document {
    pub main: SourceFile,
    /// Transitive imports keyed by archive path.
    pub imports: BTreeMap<String, SourceFile>,
    pub executable: Executable,
    /// SHA-256 hex digest over the main file and every import.
    pub content_digest: String,
}

impl Document {
    /// File name of the main document, which sits at the archive root.
    pub fn main_file_name(&self) -> &str {
        &self.main.archive_path
    }

    /// The main file followed by imports in archive-path order.
    pub fn sources(&self) -> impl Iterator<Item = &SourceFile> {
        std::iter::once(&self.main).chain(self.imports.values())
    }
}

/// Load the document at `path`, resolving imports relative to the importing
/// file first and then against each of `search_paths` in order.
pub fn load(path: &Path, search_paths: &[PathBuf]) -> Result<Document, DocumentError> {
    let text = read_source(path)?;
    let archive_path = path
        .file_name()
        .and_then(OsStr::to_str)
        .ok_or_else(|| DocumentError::Syntax {
            path: path.to_path_buf(),
            message: "document path has no usable file name".into(),
        })?
        .to_string();
    let main = SourceFile {
        archive_path,
        disk_path: path.to_path_buf(),
        text,
    };

    let mut imports = BTreeMap::new();
    collect_imports(&main, &main.archive_path, search_paths, &mut imports)?;
    let executable = parse_executable(&main)?;
    let content_digest = content_digest(std::iter::once(&main).chain(imports.values()));
    debug!(
        "loaded {} ({} imports), {} {} digest={content_digest}",
        main.archive_path,
        imports.len(),
        match executable.kind {
            ExecutableKind::Workflow => "workflow",
            ExecutableKind::Task => "task",
        },
        executable.name
    );

    Ok(Document {
        main,
        imports,
        executable,
        content_digest,
    })
}

fn read_source(path: &Path) -> Result<String, DocumentError> {
    fs::read_to_string(path).map_err(|source| DocumentError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn collect_imports(
    importer: &SourceFile,
    root: &str,
    search_paths: &[PathBuf],
    imports: &mut BTreeMap<String, SourceFile>,
) -> Result<(), DocumentError> {
    let stripped = strip_comments(&importer.text);
    for capture in IMPORT.captures_iter(&stripped) {
        let uri = &capture[1];
        let archive_path = join_archive_path(&importer.archive_path, uri).ok_or_else(|| DocumentError::ImportOutsideRoot {
            uri: uri.to_string(),
            from: importer.disk_path.clone(),
        })?;
        if archive_path == root || imports.contains_key(&archive_path) {
            continue;
        }

        let disk_path = resolve_import(&importer.disk_path, uri, search_paths).ok_or_else(|| DocumentError::ImportNotFound {
            uri: uri.to_string(),
            from: importer.disk_path.clone(),
        })?;
        debug!("import {uri} -> {}", disk_path.display());
        let source = SourceFile {
            text: read_source(&disk_path)?,
            archive_path: archive_path.clone(),
            disk_path,
        };
        imports.insert(archive_path, source.clone());
        collect_imports(&source, root, search_paths, imports)?;
    }
    Ok(())
}

fn resolve_import(importer: &Path, uri: &str, search_paths: &[PathBuf]) -> Option<PathBuf> {
    let relative = importer.parent().map(|dir| dir.join(uri));
    relative
        .into_iter()
        .chain(search_paths.iter().map(|dir| dir.join(uri)))
        .find(|candidate| candidate.is_file())
}

/// Archive path of `uri` imported from a file at `importer`, or `None` when
/// it would climb above the archive root.
fn join_archive_path(importer: &str, uri: &str) -> Option<String> {
    if uri.starts_with('/') || uri.contains("://") {
        return None;
    }
    let mut parts: Vec<&str> = importer.split('/').collect();
    parts.pop();
    for part in uri.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    Some(parts.join("/"))
}

fn content_digest<'a>(sources: impl Iterator<Item = &'a SourceFile>) -> String {
    let mut hasher = Sha256::new();
    for source in sources {
        hasher.update(source.archive_path.as_bytes());
        hasher.update([0]);
        hasher.update(source.text.as_bytes());
        hasher.update([0]);
    }
    hex::encode(hasher.finalize())
}

fn parse_executable(source: &SourceFile) -> Result<Executable, DocumentError> {
    let text = strip_comments(&source.text);
    let (kind, name, open) = if let Some(capture) = WORKFLOW.captures(&text) {
        let whole = capture.get(0).map_or(0, |m| m.end());
        (ExecutableKind::Workflow, capture[1].to_string(), whole - 1)
    } else {
        let tasks: Vec<_> = TASK.captures_iter(&text).collect();
        match tasks.as_slice() {
            [task] => {
                let whole = task.get(0).map_or(0, |m| m.end());
                (ExecutableKind::Task, task[1].to_string(), whole - 1)
            }
            _ => {
                return Err(DocumentError::NoExecutable {
                    path: source.disk_path.clone(),
                });
            }
        }
    };

    let syntax = |message: String| DocumentError::Syntax {
        path: source.disk_path.clone(),
        message,
    };
    let body = block_body(&text, open).ok_or_else(|| syntax(format!("unbalanced braces in {name}")))?;
    let inputs = match INPUT_SECTION.find(body) {
        Some(section) => {
            let block = block_body(body, section.end() - 1).ok_or_else(|| syntax(format!("unbalanced input section in {name}")))?;
            parse_declarations(block).map_err(syntax)?
        }
        None => Vec::new(),
    };
    Ok(Executable { kind, name, inputs })
}

/// Remove `#` comments. Quote tracking resets at each newline because WDL
/// string literals are single-line.
fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut quote: Option<char> = None;
    let mut in_comment = false;
    for ch in text.chars() {
        if ch == '\n' {
            quote = None;
            in_comment = false;
            out.push(ch);
            continue;
        }
        if in_comment {
            continue;
        }
        match (quote, ch) {
            (None, '#') => in_comment = true,
            (None, '"' | '\'') => {
                quote = Some(ch);
                out.push(ch);
            }
            (Some(open), _) if ch == open => {
                quote = None;
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Contents between the brace at `open` and its match.
fn block_body(text: &str, open: usize) -> Option<&str> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (index, ch) in text[open..].char_indices() {
        match (quote, ch) {
            (_, '\n') => quote = None,
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(ch),
            (None, '{') => depth += 1,
            (None, '}') => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[open + 1..open + index]);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_declarations(block: &str) -> Result<Vec<InputDecl>, String> {
    let mut scanner = Scanner { text: block, pos: 0 };
    let mut declarations = Vec::new();
    loop {
        scanner.skip_whitespace();
        if scanner.at_end() {
            return Ok(declarations);
        }
        let type_start = scanner.pos;
        scanner.identifier().ok_or_else(|| scanner.error("expected a type"))?;
        if scanner.peek() == Some('[') {
            scanner.bracketed().ok_or_else(|| scanner.error("unterminated type parameters"))?;
        }
        scanner.eat('+');
        let type_text = &block[type_start..scanner.pos];
        let optional = scanner.eat('?');

        scanner.skip_whitespace();
        let name = scanner.identifier().ok_or_else(|| scanner.error("expected an input name"))?;
        scanner.skip_inline_whitespace();
        let default = if scanner.eat('=') {
            Some(scanner.expression().to_string())
        } else {
            None
        };

        declarations.push(InputDecl {
            name: name.to_string(),
            ty: WdlType::parse(type_text),
            optional,
            default,
        });
    }
}

struct Scanner<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn at_end(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn skip_while(&mut self, predicate: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if !predicate(ch) {
                break;
            }
            self.pos += ch.len_utf8();
        }
        &self.text[start..self.pos]
    }

    fn skip_whitespace(&mut self) {
        self.skip_while(char::is_whitespace);
    }

    fn skip_inline_whitespace(&mut self) {
        self.skip_while(|ch| ch == ' ' || ch == '\t');
    }

    fn identifier(&mut self) -> Option<&'a str> {
        match self.peek() {
            Some(ch) if ch.is_ascii_alphabetic() || ch == '_' => Some(self.skip_while(|ch| ch.is_ascii_alphanumeric() || ch == '_')),
            _ => None,
        }
    }

    /// Consume a `[...]` group including nested brackets.
    fn bracketed(&mut self) -> Option<&'a str> {
        let start = self.pos;
        let mut depth = 0usize;
        while let Some(ch) = self.peek() {
            self.pos += ch.len_utf8();
            match ch {
                '[' => depth += 1,
                ']' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(&self.text[start..self.pos]);
                    }
                }
                _ => {}
            }
        }
        None
    }

    /// An expression runs to the first newline outside brackets and quotes.
    fn expression(&mut self) -> &'a str {
        let start = self.pos;
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        while let Some(ch) = self.peek() {
            match (quote, ch) {
                (None, '\n') if depth == 0 => break,
                (Some(_), '\\') => {
                    self.pos += 1;
                    if let Some(escaped) = self.peek() {
                        self.pos += escaped.len_utf8();
                    }
                    continue;
                }
                (Some(q), c) if c == q => quote = None,
                (Some(_), _) => {}
                (None, '"' | '\'') => quote = Some(ch),
                (None, '[' | '(' | '{') => depth += 1,
                (None, ']' | ')' | '}') => depth = depth.saturating_sub(1),
                _ => {}
            }
            self.pos += ch.len_utf8();
        }
        self.text[start..self.pos].trim()
    }

    fn error(&self, message: &str) -> String {
        let context: String = self.text[self.pos..].chars().take(40).collect();
        format!("{message} in input section near '{}'", context.trim())
    }
}
