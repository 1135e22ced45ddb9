/// Parsed view of a submission's sources: one forest, one root per file
use crate::config::types::{GradeError, Result};
use crate::judge::adapter::{Declaration, LanguageBackend};
use crate::tree::{release_tree_json, Forest, ValueId};
use std::path::{Path, PathBuf};

/// Scalar fields that carry a leaf node's own text in common parser dumps
const LEAF_TEXT_FIELDS: &[&str] = &["src", "text", "val"];

#[derive(Clone, Debug)]
pub struct SourceFile {
    /// Path relative to the working copy
    pub path: PathBuf,
    pub text: String,
    pub root: ValueId,
}

#[derive(Debug, Default)]
pub struct SourceIndex {
    forest: Forest,
    files: Vec<SourceFile>,
    declarations: Vec<Declaration>,
}

impl SourceIndex {
    /// Parse every source file of a working copy through the backend
    pub fn load(backend: &dyn LanguageBackend, workdir: &Path, sources: &[PathBuf]) -> Result<Self> {
        let mut index = Self::default();
        for source in sources {
            index.add_file(backend, workdir, source)?;
        }
        log::debug!(
            "Indexed {} files, {} declarations",
            index.files.len(),
            index.declarations.len()
        );
        Ok(index)
    }

    pub fn add_file(
        &mut self,
        backend: &dyn LanguageBackend,
        workdir: &Path,
        relative: &Path,
    ) -> Result<()> {
        let absolute = workdir.join(relative);
        let text = std::fs::read_to_string(&absolute)?;
        let json = backend.parse_source(&absolute)?;
        let root = self.forest.load_json(&json);
        release_tree_json(json);
        let root = root?;
        for mut declaration in backend.declarations(&self.forest, root, &text) {
            declaration.file = relative.to_path_buf();
            self.declarations.push(declaration);
        }
        self.files.push(SourceFile {
            path: relative.to_path_buf(),
            text,
            root,
        });
        Ok(())
    }

    pub fn forest(&self) -> &Forest {
        &self.forest
    }

    pub fn roots(&self) -> Vec<ValueId> {
        self.files.iter().map(|file| file.root).collect()
    }

    pub fn files(&self) -> &[SourceFile] {
        &self.files
    }

    pub fn declarations(&self) -> &[Declaration] {
        &self.declarations
    }

    /// Find a declaration: without `(` by name only, otherwise by canonical signature
    pub fn lookup(&self, backend: &dyn LanguageBackend, signature: &str) -> Option<&Declaration> {
        if signature.contains('(') {
            let wanted = backend.canonical_signature(signature);
            self.declarations.iter().find(|d| d.signature == wanted)
        } else {
            let name = last_identifier(signature)?;
            self.declarations.iter().find(|d| d.name == name)
        }
    }

    /// Comment out every line of the named declaration, then re-parse the sources.
    ///
    /// Returns false when no declaration has that name.
    pub fn comment_out(
        &mut self,
        backend: &dyn LanguageBackend,
        workdir: &Path,
        name: &str,
    ) -> Result<bool> {
        let Some(declaration) = self.declarations.iter().find(|d| d.name == name).cloned() else {
            return Ok(false);
        };
        let file = self
            .files
            .iter()
            .find(|file| file.path == declaration.file)
            .ok_or_else(|| {
                GradeError::ParseTree(format!("no source file {}", declaration.file.display()))
            })?;
        let rewritten = comment_lines(
            &file.text,
            declaration.range.start,
            declaration.range.end,
            backend.comment_prefix(),
        );
        std::fs::write(workdir.join(&declaration.file), rewritten)?;
        log::info!("Commented out `{}` in {}", name, declaration.file.display());

        let sources: Vec<PathBuf> = self.files.iter().map(|file| file.path.clone()).collect();
        *self = Self::load(backend, workdir, &sources)?;
        Ok(true)
    }
}

/// Prefix every line touched by the byte range `start..end` with `prefix`
pub fn comment_lines(text: &str, start: usize, end: usize, prefix: &str) -> String {
    let mut out = String::with_capacity(text.len() + 64);
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let line_end = offset + line.len();
        let touched = line_end > start && offset < end.max(start + 1);
        if touched {
            out.push_str(prefix);
            out.push(' ');
        }
        out.push_str(line);
        offset = line_end;
    }
    out
}

fn last_identifier(text: &str) -> Option<&str> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|token| !token.is_empty())
        .last()
}

/// Pre-order walk collecting dict nodes whose `kind` is one of `kinds`
pub fn nodes_of_kind(forest: &Forest, root: ValueId, kinds: &[&str]) -> Vec<ValueId> {
    let mut found = Vec::new();
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        if forest.kind(id).is_some_and(|kind| kinds.contains(&kind)) {
            found.push(id);
        }
        let mut children = forest.children(id);
        children.reverse();
        stack.extend(children);
    }
    found
}

/// Own text of a leaf: a `src`/`text`/`val` scalar, else the covered source
pub fn leaf_text(forest: &Forest, id: ValueId, text: &str) -> Option<String> {
    if let Some(own) = forest.as_str(id) {
        return Some(own.to_string());
    }
    LEAF_TEXT_FIELDS
        .iter()
        .find_map(|name| forest.field(id, name).and_then(|f| forest.as_str(f)))
        .map(str::to_string)
        .or_else(|| forest.text(id, text).map(str::to_string))
}

/// Declared name: a `name` field, or the end of the nested `declarator` chain
pub fn declaration_name(forest: &Forest, node: ValueId, text: &str) -> Option<String> {
    if let Some(name) = forest.field(node, "name") {
        return leaf_text(forest, name, text);
    }
    let mut current = forest.field(node, "declarator")?;
    while let Some(next) = forest.field(current, "declarator") {
        current = next;
    }
    leaf_text(forest, current, text)
}

/// Source text from the start of a declaration up to its body
pub fn signature_text(forest: &Forest, node: ValueId, text: &str) -> Option<String> {
    let start = forest.range(node)?.start;
    let body = forest.field(node, "body")?;
    let body_start = match forest.range(body) {
        Some(range) => range.start,
        None => {
            let first = *forest.children(body).first()?;
            forest.range(first)?.start
        }
    };
    text.get(start..body_start).map(str::to_string)
}
