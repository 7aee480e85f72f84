//! Repair-diff pattern interpreter.
//!
//! Given a [`DiffReport`] between a candidate and its host-repaired
//! counterpart, detect which repair recipe the host applied so the inverse
//! patch can be proposed. Detectors read the unified-diff text only; when
//! a before/after byte pair can be recovered unambiguously it is attached
//! to the pattern as a literal edit, otherwise downstream recipe assembly
//! falls back to `<FILL_IN_*>` placeholders.

use serde::{Deserialize, Serialize};

use crate::a1::Rect;
use crate::diff::{DiffReport, DiffStatus, PartDiff};
use crate::xmlscan::{attr_value, tag_at, tag_opens};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PatternName {
    #[serde(rename = "CALCCHAIN_DROP")]
    CalcChainDrop,
    #[serde(rename = "DXFS_INSERTION")]
    DxfsInsertion,
    #[serde(rename = "CF_DXFID_CLONE")]
    CfDxfidClone,
    #[serde(rename = "SHAREDSTRINGS_REBUILD")]
    SharedStringsRebuild,
    #[serde(rename = "TABLE_STYLE_NORM")]
    TableStyleNorm,
    #[serde(rename = "SHARED_REF_TRIM")]
    SharedRefTrim,
    #[serde(rename = "RELS_CLEANUP")]
    RelsCleanup,
}

impl PatternName {
    pub fn as_str(self) -> &'static str {
        match self {
            PatternName::CalcChainDrop => "CALCCHAIN_DROP",
            PatternName::DxfsInsertion => "DXFS_INSERTION",
            PatternName::CfDxfidClone => "CF_DXFID_CLONE",
            PatternName::SharedStringsRebuild => "SHAREDSTRINGS_REBUILD",
            PatternName::TableStyleNorm => "TABLE_STYLE_NORM",
            PatternName::SharedRefTrim => "SHARED_REF_TRIM",
            PatternName::RelsCleanup => "RELS_CLEANUP",
        }
    }
}

impl std::fmt::Display for PatternName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// An exact byte substitution recovered from the diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiteralEdit {
    pub part: String,
    #[serde(rename = "match")]
    pub match_: String,
    pub replacement: String,
}

/// A full-part replacement recovered from the repaired archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetPartEdit {
    pub part: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pattern {
    pub name: PatternName,
    pub confidence: Confidence,
    pub evidence: Vec<String>,
    pub hint: String,
    pub affected_parts: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub edits: Vec<LiteralEdit>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub set_parts: Vec<SetPartEdit>,
}

impl Pattern {
    fn new(name: PatternName, confidence: Confidence, hint: impl Into<String>) -> Self {
        Self {
            name,
            confidence,
            evidence: Vec::new(),
            hint: hint.into(),
            affected_parts: Vec::new(),
            edits: Vec::new(),
            set_parts: Vec::new(),
        }
    }
}

/// Run the seven detectors in their fixed order.
pub fn classify(diff: &DiffReport) -> Vec<Pattern> {
    [
        detect_calc_chain_drop(diff),
        detect_dxfs_insertion(diff),
        detect_cf_dxfid_clone(diff),
        detect_shared_strings_rebuild(diff),
        detect_table_style_norm(diff),
        detect_shared_ref_trim(diff),
        detect_rels_cleanup(diff),
    ]
    .into_iter()
    .flatten()
    .collect()
}

// Diff-text helpers.

/// Content of `-`/`+` lines, headers and hunk markers stripped.
fn minus_plus_lines(diff: &str) -> (Vec<&str>, Vec<&str>) {
    let mut minus = Vec::new();
    let mut plus = Vec::new();
    for line in diff.lines() {
        if line.starts_with("---") || line.starts_with("+++") || line.starts_with("@@") {
            continue;
        }
        if let Some(rest) = line.strip_prefix('-') {
            minus.push(rest);
        } else if let Some(rest) = line.strip_prefix('+') {
            plus.push(rest);
        }
    }
    (minus, plus)
}

fn changed_with_diff(diff: &DiffReport) -> impl Iterator<Item = (&PartDiff, &str)> {
    diff.parts
        .iter()
        .filter(|p| p.status == DiffStatus::Changed)
        .filter_map(|p| p.unified_diff.as_deref().map(|d| (p, d)))
}

fn is_worksheet(path: &str) -> bool {
    path.starts_with("xl/worksheets/") && path.ends_with(".xml")
}

fn is_table_part(path: &str) -> bool {
    path.starts_with("xl/tables/") && path.ends_with(".xml")
}

/// First `<elem …>` attribute value found across the given lines.
fn first_attr_in_lines(lines: &[&str], elem: &str, attr: &str) -> Option<String> {
    for line in lines {
        for pos in tag_opens(line, elem) {
            if let Some(value) = tag_at(line, pos).and_then(|tag| attr_value(tag, attr)) {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// All `cfRule/@dxfId` values across the given lines, in order.
fn dxf_ids_in_lines(lines: &[&str]) -> Vec<String> {
    let mut out = Vec::new();
    for line in lines {
        for pos in tag_opens(line, "cfRule") {
            if let Some(id) = tag_at(line, pos).and_then(|tag| attr_value(tag, "dxfId")) {
                out.push(id.to_string());
            }
        }
    }
    out
}

/// All shared-formula `(si, ref)` declarations across the given lines.
fn shared_refs_in_lines(lines: &[&str]) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for line in lines {
        for pos in tag_opens(line, "f") {
            let Some(tag) = tag_at(line, pos) else { continue };
            if attr_value(tag, "t") != Some("shared") {
                continue;
            }
            let (Some(si), Some(r)) = (attr_value(tag, "si"), attr_value(tag, "ref")) else {
                continue;
            };
            out.push((si.to_string(), r.to_string()));
        }
    }
    out
}

fn strip_table_style_info(line: &str) -> String {
    if let Some(pos) = tag_opens(line, "tableStyleInfo").into_iter().next() {
        if let Some(tag) = tag_at(line, pos) {
            let mut out = String::with_capacity(line.len() - tag.len());
            out.push_str(&line[..pos]);
            out.push_str(&line[pos + tag.len()..]);
            return out;
        }
    }
    line.to_string()
}

fn count_relationships(lines: &[&str]) -> usize {
    lines
        .iter()
        .map(|line| tag_opens(line, "Relationship").len())
        .sum()
}

// Detectors.

fn detect_calc_chain_drop(diff: &DiffReport) -> Option<Pattern> {
    diff.removed().find(|p| p.path == "xl/calcChain.xml")?;
    let mut pattern = Pattern::new(
        PatternName::CalcChainDrop,
        Confidence::High,
        "delete xl/calcChain.xml; the host rebuilds it on next open",
    );
    pattern.evidence.push("xl/calcChain.xml removed by repair".to_string());
    pattern.affected_parts.push("xl/calcChain.xml".to_string());
    Some(pattern)
}

fn detect_dxfs_insertion(diff: &DiffReport) -> Option<Pattern> {
    let styles = diff
        .get("xl/styles.xml")
        .filter(|p| p.status == DiffStatus::Changed)?;
    let (minus, plus) = minus_plus_lines(styles.unified_diff.as_deref()?);

    let before: usize = first_attr_in_lines(&minus, "dxfs", "count")?.parse().ok()?;
    let after: usize = first_attr_in_lines(&plus, "dxfs", "count")?.parse().ok()?;
    if after <= before {
        return None;
    }

    let mut pattern = Pattern::new(
        PatternName::DxfsInsertion,
        Confidence::High,
        "insert the missing <dxf> entries before </dxfs>, then fix dxfs/@count",
    );
    pattern.evidence.push(format!("dxfs count: {before} -> {after}"));
    pattern.affected_parts.push("xl/styles.xml".to_string());
    Some(pattern)
}

fn detect_cf_dxfid_clone(diff: &DiffReport) -> Option<Pattern> {
    diff.get("xl/styles.xml")
        .filter(|p| p.status == DiffStatus::Changed)?;

    let mut pattern = Pattern::new(
        PatternName::CfDxfidClone,
        Confidence::Medium,
        "rewrite each renumbered cfRule/@dxfId back to an index inside the dxfs pool",
    );

    for (part, text) in changed_with_diff(diff) {
        if !is_worksheet(&part.path) {
            continue;
        }
        let (minus, plus) = minus_plus_lines(text);
        let before_ids = dxf_ids_in_lines(&minus);
        let after_ids = dxf_ids_in_lines(&plus);
        if before_ids.is_empty() && after_ids.is_empty() {
            continue;
        }
        if before_ids == after_ids {
            continue;
        }

        pattern.affected_parts.push(part.path.clone());
        if before_ids.len() == after_ids.len() {
            for (old, new) in before_ids.iter().zip(&after_ids) {
                if old == new {
                    continue;
                }
                pattern
                    .evidence
                    .push(format!("{}: dxfId {old} -> {new}", part.path));
                let edit = LiteralEdit {
                    part: part.path.clone(),
                    match_: format!("dxfId=\"{old}\""),
                    replacement: format!("dxfId=\"{new}\""),
                };
                if !pattern.edits.contains(&edit) {
                    pattern.edits.push(edit);
                }
            }
        } else {
            // Ambiguous pairing; surface the counts and leave the edits to
            // a human.
            pattern.evidence.push(format!(
                "{}: {} dxfId value(s) removed, {} added",
                part.path,
                before_ids.len(),
                after_ids.len()
            ));
        }
    }

    if pattern.affected_parts.is_empty() {
        return None;
    }
    pattern.affected_parts.push("xl/styles.xml".to_string());
    Some(pattern)
}

fn detect_shared_strings_rebuild(diff: &DiffReport) -> Option<Pattern> {
    let shared = diff
        .get("xl/sharedStrings.xml")
        .filter(|p| p.status == DiffStatus::Changed)?;
    let (minus, plus) = minus_plus_lines(shared.unified_diff.as_deref()?);

    let mut evidence = Vec::new();
    for attr in ["count", "uniqueCount"] {
        let before = first_attr_in_lines(&minus, "sst", attr);
        let after = first_attr_in_lines(&plus, "sst", attr);
        if let (Some(before), Some(after)) = (before, after) {
            if before != after {
                evidence.push(format!("sst {attr}: {before} -> {after}"));
            }
        }
    }
    if evidence.is_empty() {
        return None;
    }

    let mut pattern = Pattern::new(
        PatternName::SharedStringsRebuild,
        Confidence::Medium,
        "check the control-character gate, then strip or encode the offending bytes",
    );
    pattern.evidence = evidence;
    pattern.affected_parts.push("xl/sharedStrings.xml".to_string());
    Some(pattern)
}

fn detect_table_style_norm(diff: &DiffReport) -> Option<Pattern> {
    let mut pattern = Pattern::new(
        PatternName::TableStyleNorm,
        Confidence::Low,
        "point tableStyleInfo/@name at a built-in style (e.g. TableStyleMedium9)",
    );

    for (part, text) in changed_with_diff(diff) {
        if !is_table_part(&part.path) {
            continue;
        }
        let (minus, plus) = minus_plus_lines(text);
        if minus.len() != plus.len() || minus.is_empty() {
            continue;
        }
        let mut style_delta = false;
        let mut only_style_delta = true;
        for (old, new) in minus.iter().zip(&plus) {
            if strip_table_style_info(old) != strip_table_style_info(new) {
                only_style_delta = false;
                break;
            }
            if old != new {
                style_delta = true;
            }
        }
        if style_delta && only_style_delta {
            pattern.affected_parts.push(part.path.clone());
            pattern
                .evidence
                .push(format!("{}: only tableStyleInfo attributes changed", part.path));
        }
    }

    if pattern.affected_parts.is_empty() {
        return None;
    }
    Some(pattern)
}

fn detect_shared_ref_trim(diff: &DiffReport) -> Option<Pattern> {
    let mut pattern = Pattern::new(
        PatternName::SharedRefTrim,
        Confidence::Medium,
        "shrink the shared formula ref= to the bounding box of its si= siblings",
    );

    for (part, text) in changed_with_diff(diff) {
        if !is_worksheet(&part.path) {
            continue;
        }
        let (minus, plus) = minus_plus_lines(text);
        let before = shared_refs_in_lines(&minus);
        let after = shared_refs_in_lines(&plus);

        for (si, old_ref) in &before {
            let Some((_, new_ref)) = after.iter().find(|(after_si, _)| after_si == si) else {
                continue;
            };
            let (Some(old_rect), Some(new_rect)) = (Rect::parse(old_ref), Rect::parse(new_ref))
            else {
                continue;
            };
            if !old_rect.strictly_contains(&new_rect) {
                continue;
            }

            if !pattern.affected_parts.contains(&part.path) {
                pattern.affected_parts.push(part.path.clone());
            }
            pattern
                .evidence
                .push(format!("{}: si {si} ref {old_ref} -> {new_ref}", part.path));
            let edit = LiteralEdit {
                part: part.path.clone(),
                match_: format!("ref=\"{old_ref}\""),
                replacement: format!("ref=\"{new_ref}\""),
            };
            if !pattern.edits.contains(&edit) {
                pattern.edits.push(edit);
            }
        }
    }

    if pattern.affected_parts.is_empty() {
        return None;
    }
    Some(pattern)
}

fn detect_rels_cleanup(diff: &DiffReport) -> Option<Pattern> {
    let mut pattern = Pattern::new(
        PatternName::RelsCleanup,
        Confidence::High,
        "replace the .rels part with the repaired content verbatim",
    );

    for (part, text) in changed_with_diff(diff) {
        if !part.path.ends_with(".rels") {
            continue;
        }
        let (minus, plus) = minus_plus_lines(text);
        let before = count_relationships(&minus);
        let after = count_relationships(&plus);
        if after >= before {
            continue;
        }

        pattern.affected_parts.push(part.path.clone());
        pattern
            .evidence
            .push(format!("{}: {before} relationship(s) -> {after}", part.path));
        if let Some(content) = &part.content_after {
            pattern.set_parts.push(SetPartEdit {
                part: part.path.clone(),
                content: content.clone(),
            });
        }
    }

    if pattern.affected_parts.is_empty() {
        return None;
    }
    Some(pattern)
}
