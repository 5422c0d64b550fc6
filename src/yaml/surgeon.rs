//! A hand-rolled, indentation-driven splice engine over YAML source text.
//!
//! This deliberately avoids round-tripping the whole document through a
//! YAML serializer: only the lines touched by an edit are rewritten, so
//! comments, blank lines, key order, and indentation of everything else
//! survive byte-for-byte.

use crate::utils::error::PmtError;
use crate::yaml::ops::{Op, PathSegment, YamlPath};

/// Owns a YAML document's source as lines and applies [`Op`]s to it
/// in place.
pub struct YamlSurgeon {
    lines: Vec<String>,
}

impl YamlSurgeon {
    #[must_use]
    pub fn new(source: &str) -> Self {
        Self {
            lines: source.lines().map(str::to_string).collect(),
        }
    }

    /// Renders the current state back to text, restoring a trailing
    /// newline if the original had one (always, by convention here).
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }

    pub fn apply(&mut self, op: &Op) -> Result<(), PmtError> {
        match op {
            Op::Insert { path, value } => self.insert(path, value),
            Op::Replace { path, value } => self.replace(path, value),
            Op::Remove { path } => self.remove(path),
        }
    }

    fn insert(&mut self, path: &YamlPath, value: &serde_yaml::Value) -> Result<(), PmtError> {
        let (parent_start, parent_end, indent, kind) = self.resolve_parent(path)?;
        match (kind, path.last()) {
            (ContainerKind::Mapping, Some(PathSegment::Key(key))) => {
                if find_mapping_entry(&self.lines, parent_start, parent_end, indent, key).is_some() {
                    return Err(PmtError::YamlSurgeryConflict(format!(
                        "key '{key}' already exists; use replace instead"
                    )));
                }
                let new_lines = render_entry(key, value, indent)?;
                self.splice(parent_end, parent_end, new_lines);
                Ok(())
            }
            (ContainerKind::Sequence, Some(PathSegment::Index(index))) => {
                let entries = sequence_entry_spans(&self.lines, parent_start, parent_end, indent);
                let insert_at = entries.get(*index).map_or(parent_end, |e| e.0);
                let new_lines = render_sequence_item(value, indent)?;
                self.splice(insert_at, insert_at, new_lines);
                Ok(())
            }
            _ => Err(PmtError::YamlSurgeryConflict(
                "insert path must end in a key (mapping) or index (sequence)".to_string(),
            )),
        }
    }

    fn replace(&mut self, path: &YamlPath, value: &serde_yaml::Value) -> Result<(), PmtError> {
        let (start, end, indent, inline_value) = self.resolve_existing(path)?;
        let new_lines = match (inline_value, scalar_repr(value)) {
            (Some((col_start, trailing_comment)), Some(scalar)) => {
                let mut line = self.lines[start][..col_start].to_string();
                line.push_str(&scalar);
                if let Some(comment) = trailing_comment {
                    line.push(' ');
                    line.push_str(&comment);
                }
                vec![line]
            }
            (Some((col_start, _trailing_comment)), None) => {
                // A flow-style or scalar value is being replaced by a
                // mapping/sequence: re-serialize in block style. Any
                // trailing comment on the original line does not survive
                // this conversion (documented limitation).
                let key_prefix = self.lines[start][..col_start - 2].to_string();
                let mut out = vec![format!("{key_prefix}:")];
                out.extend(render_block_only(value, indent + 2)?);
                out
            }
            (None, Some(scalar)) => {
                // The existing entry is a block; the new value collapses
                // it to an inline scalar.
                let trimmed = self.lines[start].trim_end_matches(':');
                vec![format!("{trimmed}: {scalar}")]
            }
            (None, None) => {
                // Both old and new are blocks: keep the key line as-is
                // and re-serialize only the body.
                let mut out = vec![self.lines[start].clone()];
                out.extend(render_block_only(value, indent + 2)?);
                out
            }
        };
        self.splice(start, end, new_lines);
        Ok(())
    }

    fn remove(&mut self, path: &YamlPath) -> Result<(), PmtError> {
        let (start, end, _indent, _inline) = self.resolve_existing(path)?;
        self.splice(start, end, Vec::new());
        Ok(())
    }

    fn splice(&mut self, start: usize, end: usize, replacement: Vec<String>) {
        self.lines.splice(start..end, replacement);
    }

    /// Resolves every segment but the last, returning the span and child
    /// indent of the container the last segment lives (or will live) in.
    fn resolve_parent(&self, path: &YamlPath) -> Result<(usize, usize, usize, ContainerKind), PmtError> {
        if path.is_empty() {
            return Err(PmtError::YamlSurgeryConflict("path must not be empty".to_string()));
        }
        let mut start = 0;
        let mut end = self.lines.len();
        for segment in &path[..path.len() - 1] {
            let (entry_start, entry_end) = descend(&self.lines, start, end, segment)?;
            let (next_start, next_end) = children_range(&self.lines, entry_start, entry_end);
            start = next_start;
            end = next_end;
        }
        let kind = match path.last() {
            Some(PathSegment::Key(_)) => ContainerKind::Mapping,
            Some(PathSegment::Index(_)) => ContainerKind::Sequence,
            None => unreachable!("path is non-empty"),
        };
        let indent = match kind {
            ContainerKind::Mapping => {
                mapping_entry_indent(&self.lines, start, end).unwrap_or_else(|| base_indent(&self.lines, start) + 2)
            }
            ContainerKind::Sequence => {
                sequence_indent(&self.lines, start, end).unwrap_or_else(|| base_indent(&self.lines, start) + 2)
            }
        };
        Ok((start, end, indent, kind))
    }

    /// Resolves the full path to an existing entry, returning its line
    /// span, its indent, and — if the value is inline on its key/item
    /// line — the column the value starts at plus any trailing comment.
    fn resolve_existing(
        &self,
        path: &YamlPath,
    ) -> Result<(usize, usize, usize, Option<(usize, Option<String>)>), PmtError> {
        if path.is_empty() {
            return Err(PmtError::YamlSurgeryConflict("path must not be empty".to_string()));
        }
        let mut start = 0;
        let mut end = self.lines.len();
        let mut result = (0, 0);
        for (i, segment) in path.iter().enumerate() {
            let (entry_start, entry_end) = descend(&self.lines, start, end, segment)?;
            if i + 1 == path.len() {
                result = (entry_start, entry_end);
            } else {
                let (next_start, next_end) = children_range(&self.lines, entry_start, entry_end);
                start = next_start;
                end = next_end;
            }
        }
        let (entry_start, entry_end) = result;
        let indent = effective_indent_and_content(&self.lines[entry_start]).0;
        let inline = inline_value_column(&self.lines[entry_start]);
        Ok((entry_start, entry_end, indent, inline))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContainerKind {
    Mapping,
    Sequence,
}

fn descend(
    lines: &[String],
    start: usize,
    end: usize,
    segment: &PathSegment,
) -> Result<(usize, usize), PmtError> {
    match segment {
        PathSegment::Key(key) => {
            let indent = mapping_entry_indent(lines, start, end)
                .ok_or_else(|| PmtError::YamlSurgeryConflict(format!("no mapping entries found for key '{key}'")))?;
            find_mapping_entry(lines, start, end, indent, key)
                .ok_or_else(|| PmtError::YamlSurgeryConflict(format!("key '{key}' not found")))
        }
        PathSegment::Index(index) => {
            let indent = sequence_indent(lines, start, end)
                .ok_or_else(|| PmtError::YamlSurgeryConflict(format!("no sequence items found for index {index}")))?;
            let entries = sequence_entry_spans(lines, start, end, indent);
            entries
                .get(*index)
                .copied()
                .ok_or_else(|| PmtError::YamlSurgeryConflict(format!("sequence index {index} out of range")))
        }
    }
}

/// The sub-range to search for this entry's children: for a plain
/// `key:` mapping entry, children start on the following line; for a
/// sequence item (`- ...`), the dash line itself may carry the item's
/// first inline key, so it stays in range.
fn children_range(lines: &[String], entry_start: usize, entry_end: usize) -> (usize, usize) {
    if lines[entry_start].trim_start().starts_with('-') {
        (entry_start, entry_end)
    } else {
        (entry_start + 1, entry_end)
    }
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start_matches(' ').len()
}

fn is_blank_or_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.is_empty() || trimmed.starts_with('#')
}

/// The indent of the first non-blank, non-comment line strictly inside
/// `[start, end)` — i.e. the indent at which this container's direct
/// children live.
fn first_entry_indent(lines: &[String], start: usize, end: usize) -> Option<usize> {
    lines[start..end]
        .iter()
        .find(|l| !is_blank_or_comment(l))
        .map(|l| indent_of(l))
}

fn base_indent(lines: &[String], at: usize) -> usize {
    lines.get(at).map(|l| indent_of(l)).unwrap_or(0)
}

/// Finds the `(start, end)` span of the mapping entry `key` among direct
/// children at `indent` within `[start, end)`. The span runs from the
/// `key:` line up to (but excluding) the next sibling at the same indent.
fn find_mapping_entry(
    lines: &[String],
    start: usize,
    end: usize,
    indent: usize,
    key: &str,
) -> Option<(usize, usize)> {
    let prefix = format!("{}{key}:", " ".repeat(indent));
    let mut i = start;
    while i < end {
        let line = &lines[i];
        if indent_of(line) == indent && !is_blank_or_comment(line) {
            if line.starts_with(&prefix) {
                let entry_start = i;
                let entry_end = next_sibling_at(lines, i + 1, end, indent);
                return Some((entry_start, entry_end));
            }
        }
        i += 1;
    }
    None
}

/// Spans for each sequence item (`- ...`) at `indent` within `[start, end)`.
fn sequence_entry_spans(lines: &[String], start: usize, end: usize, indent: usize) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut i = start;
    while i < end {
        let line = &lines[i];
        if indent_of(line) == indent && (line.trim_start().starts_with("- ") || line.trim_start() == "-") {
            let item_start = i;
            let item_end = next_sibling_at(lines, i + 1, end, indent);
            spans.push((item_start, item_end));
            i = item_end;
        } else {
            i += 1;
        }
    }
    spans
}

/// The index of the next line at exactly `indent` (a sibling), or `end`
/// if there is none within the span.
fn next_sibling_at(lines: &[String], from: usize, end: usize, indent: usize) -> usize {
    let mut i = from;
    while i < end {
        let line = &lines[i];
        if !is_blank_or_comment(line) && indent_of(line) <= indent {
            return i;
        }
        i += 1;
    }
    end
}

/// If `line` carries its value inline (`key: value` or `- value`, rather
/// than opening a nested block), returns the column the value starts at
/// and any trailing `# comment`.
fn inline_value_column(line: &str) -> Option<(usize, Option<String>)> {
    let colon = line.find(": ")?;
    let value_start = colon + 2;
    let rest = line.get(value_start..)?;
    if rest.trim().is_empty() {
        return None;
    }
    let (value, comment) = split_trailing_comment(rest);
    if value.trim().is_empty() {
        return None;
    }
    Some((value_start, comment))
}

fn split_trailing_comment(rest: &str) -> (&str, Option<String>) {
    if let Some(hash) = rest.find(" #") {
        (&rest[..hash], Some(rest[hash + 1..].to_string()))
    } else {
        (rest, None)
    }
}

fn scalar_repr(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(scalar_string(s)),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Null => Some("null".to_string()),
        _ => None,
    }
}

fn scalar_string(s: &str) -> String {
    let needs_quoting = s.is_empty()
        || s.contains(": ")
        || s.ends_with(':')
        || s.contains('#')
        || s.starts_with(['"', '\'', '[', '{', '&', '*', '!', '|', '>', '%', '@', '`'])
        || matches!(s, "true" | "false" | "null" | "~")
        || s.parse::<f64>().is_ok();
    if needs_quoting {
        format!("{s:?}")
    } else {
        s.to_string()
    }
}

/// Renders a new `key: value` mapping entry (possibly a block for
/// non-scalar values) at `indent`.
fn render_entry(key: &str, value: &serde_yaml::Value, indent: usize) -> Result<Vec<String>, PmtError> {
    let pad = " ".repeat(indent);
    if let Some(scalar) = scalar_repr(value) {
        Ok(vec![format!("{pad}{key}: {scalar}")])
    } else {
        let mut out = vec![format!("{pad}{key}:")];
        out.extend(render_block_only(value, indent + 2)?);
        Ok(out)
    }
}

/// Renders `- value` (possibly a nested block for mapping/sequence
/// values) at `indent`.
fn render_sequence_item(value: &serde_yaml::Value, indent: usize) -> Result<Vec<String>, PmtError> {
    let pad = " ".repeat(indent);
    if let Some(scalar) = scalar_repr(value) {
        return Ok(vec![format!("{pad}- {scalar}")]);
    }
    let block = render_block_only(value, indent + 2)?;
    let mut out = Vec::with_capacity(block.len());
    let mut iter = block.into_iter();
    if let Some(first) = iter.next() {
        let trimmed = first.trim_start();
        out.push(format!("{pad}- {trimmed}"));
    }
    out.extend(iter);
    Ok(out)
}

/// Serializes `value` as a standalone block at `indent`, for use as the
/// body of a key or a replacement for an existing block node.
fn render_block_only(value: &serde_yaml::Value, indent: usize) -> Result<Vec<String>, PmtError> {
    let serialized = serde_yaml::to_string(value).map_err(|e| PmtError::YamlSurgeryConflict(e.to_string()))?;
    let pad = " ".repeat(indent);
    Ok(serialized
        .trim_start_matches("---\n")
        .trim_end()
        .lines()
        .map(|l| format!("{pad}{l}"))
        .collect())
}
