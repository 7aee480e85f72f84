//! Part-level diff between a candidate archive and its host-repaired
//! counterpart.
//!
//! Compares at the ZIP-entry level (digest equality per part) rather than
//! container bytes, so compression or timestamp churn never shows up as a
//! difference. Changed XML-shaped parts get a unified line diff; nothing
//! is ever reserialized.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use similar::TextDiff;

use crate::scanner::PartMap;

/// Unified-diff context lines.
const DIFF_CONTEXT: usize = 3;
/// Diff snippets are truncated past this many lines.
const MAX_DIFF_LINES: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffStatus {
    Added,
    Removed,
    Changed,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartDiff {
    pub path: String,
    pub status: DiffStatus,
    pub size_before: Option<u64>,
    pub size_after: Option<u64>,
    pub size_delta: Option<i64>,
    pub digest_before: Option<String>,
    pub digest_after: Option<String>,
    /// Unified line diff (context 3) for changed XML-shaped parts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unified_diff: Option<String>,
    /// Full repaired-side text, captured only for changed `.rels` parts
    /// (they are small and recipe assembly may replay them verbatim).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_after: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DiffSummary {
    pub added: usize,
    pub removed: usize,
    pub changed: usize,
    pub unchanged: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiffReport {
    /// Sorted by part path.
    pub parts: Vec<PartDiff>,
}

impl DiffReport {
    pub fn summary(&self) -> DiffSummary {
        let mut out = DiffSummary::default();
        for part in &self.parts {
            match part.status {
                DiffStatus::Added => out.added += 1,
                DiffStatus::Removed => out.removed += 1,
                DiffStatus::Changed => out.changed += 1,
                DiffStatus::Unchanged => out.unchanged += 1,
            }
        }
        out
    }

    pub fn with_status(&self, status: DiffStatus) -> impl Iterator<Item = &PartDiff> {
        self.parts.iter().filter(move |p| p.status == status)
    }

    pub fn changed(&self) -> impl Iterator<Item = &PartDiff> {
        self.with_status(DiffStatus::Changed)
    }

    pub fn removed(&self) -> impl Iterator<Item = &PartDiff> {
        self.with_status(DiffStatus::Removed)
    }

    pub fn added(&self) -> impl Iterator<Item = &PartDiff> {
        self.with_status(DiffStatus::Added)
    }

    pub fn get(&self, path: &str) -> Option<&PartDiff> {
        self.parts.iter().find(|p| p.path == path)
    }
}

fn is_xml_extension(name: &str) -> bool {
    name.ends_with(".xml") || name.ends_with(".rels") || name.ends_with(".vml")
}

fn looks_like_xml(bytes: &[u8]) -> bool {
    let mut i = 0usize;
    if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
        i = 3;
    }
    while i < bytes.len() {
        match bytes[i] {
            b' ' | b'\t' | b'\n' | b'\r' => i += 1,
            b'<' => return true,
            _ => return false,
        }
    }
    false
}

fn unified_diff(before: &[u8], after: &[u8]) -> String {
    let before = String::from_utf8_lossy(before);
    let after = String::from_utf8_lossy(after);
    let diff = TextDiff::from_lines(before.as_ref(), after.as_ref());
    let rendered = diff
        .unified_diff()
        .context_radius(DIFF_CONTEXT)
        .header("candidate", "repaired")
        .to_string();

    let line_count = rendered.lines().count();
    if line_count <= MAX_DIFF_LINES {
        return rendered;
    }
    let mut truncated: Vec<&str> = rendered.lines().take(MAX_DIFF_LINES).collect();
    let marker = format!("... diff truncated at {MAX_DIFF_LINES} lines ...");
    truncated.push(&marker);
    truncated.join("\n")
}

/// Compare `candidate` against `repaired`, part by part.
pub fn diff(candidate: &PartMap, repaired: &PartMap) -> DiffReport {
    let all_paths: BTreeSet<&str> = candidate.names().chain(repaired.names()).collect();

    let mut report = DiffReport::default();
    for path in all_paths {
        let before = candidate.get(path);
        let after = repaired.get(path);

        let entry = match (before, after) {
            (Some(before), None) => PartDiff {
                path: path.to_string(),
                status: DiffStatus::Removed,
                size_before: Some(before.bytes.len() as u64),
                size_after: None,
                size_delta: None,
                digest_before: Some(before.digest_hex()),
                digest_after: None,
                unified_diff: None,
                content_after: None,
            },
            (None, Some(after)) => PartDiff {
                path: path.to_string(),
                status: DiffStatus::Added,
                size_before: None,
                size_after: Some(after.bytes.len() as u64),
                size_delta: None,
                digest_before: None,
                digest_after: Some(after.digest_hex()),
                unified_diff: None,
                content_after: None,
            },
            (Some(before), Some(after)) if before.digest == after.digest => PartDiff {
                path: path.to_string(),
                status: DiffStatus::Unchanged,
                size_before: Some(before.bytes.len() as u64),
                size_after: Some(after.bytes.len() as u64),
                size_delta: Some(0),
                digest_before: Some(before.digest_hex()),
                digest_after: Some(after.digest_hex()),
                unified_diff: None,
                content_after: None,
            },
            (Some(before), Some(after)) => {
                let xml_shaped = is_xml_extension(path)
                    || looks_like_xml(&before.bytes)
                    || looks_like_xml(&after.bytes);
                PartDiff {
                    path: path.to_string(),
                    status: DiffStatus::Changed,
                    size_before: Some(before.bytes.len() as u64),
                    size_after: Some(after.bytes.len() as u64),
                    size_delta: Some(after.bytes.len() as i64 - before.bytes.len() as i64),
                    digest_before: Some(before.digest_hex()),
                    digest_after: Some(after.digest_hex()),
                    unified_diff: xml_shaped.then(|| unified_diff(&before.bytes, &after.bytes)),
                    content_after: path
                        .ends_with(".rels")
                        .then(|| String::from_utf8_lossy(&after.bytes).into_owned()),
                }
            }
            (None, None) => unreachable!("path came from the union of both maps"),
        };
        report.parts.push(entry);
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looks_like_xml_skips_bom_and_whitespace() {
        assert!(looks_like_xml(b"<?xml version=\"1.0\"?><a/>"));
        assert!(looks_like_xml(b"\xEF\xBB\xBF  <a/>"));
        assert!(looks_like_xml(b"\n\t<Relationships/>"));
        assert!(!looks_like_xml(b"PK\x03\x04"));
        assert!(!looks_like_xml(b""));
    }

    #[test]
    fn unified_diff_uses_three_context_lines() {
        let before = b"a\nb\nc\nd\ne\nf\ng\nOLD\nh\ni\nj\nk\nl\n";
        let after = b"a\nb\nc\nd\ne\nf\ng\nNEW\nh\ni\nj\nk\nl\n";
        let diff = unified_diff(before, after);
        assert!(diff.contains("-OLD"));
        assert!(diff.contains("+NEW"));
        // Three lines of context on each side of the change.
        assert!(diff.contains("e\n"));
        assert!(!diff.contains("\na\n"));
    }

    #[test]
    fn unified_diff_is_truncated_past_the_line_cap() {
        let before: String = (0..400).map(|i| format!("line {i}\n")).collect();
        let after: String = (0..400).map(|i| format!("row {i}\n")).collect();
        let diff = unified_diff(before.as_bytes(), after.as_bytes());
        assert!(diff.lines().count() <= MAX_DIFF_LINES + 1);
        assert!(diff.ends_with("... diff truncated at 200 lines ..."));
    }
}
