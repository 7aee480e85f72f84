//! Patch recipes: the declarative, JSON-serializable edit plan.
//!
//! A recipe is an ordered list of byte-level operations against named
//! parts. The four operations form a closed union so the patcher can match
//! exhaustively; adding an operation is a compile-time change. Recipes are
//! meant to be hand-editable: values the engine cannot infer are emitted
//! as `<FILL_IN_*>` placeholders, and unknown JSON fields survive a
//! parse/serialize round trip.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::gates::{GateReport, RelsFinding, StylesDxfIssue};
use crate::patterns::{Pattern, PatternName};

pub const SCHEMA_VERSION: &str = "1.0";

pub const FILL_IN_MATCH: &str = "<FILL_IN_MATCH>";
pub const FILL_IN_REPLACEMENT: &str = "<FILL_IN_REPLACEMENT>";
pub const FILL_IN_BLOCK: &str = "<FILL_IN_BLOCK>";

/// Placeholder strings are reserved: an op carrying one in a required
/// field is skipped by the patcher, never searched for literally.
pub fn is_placeholder(value: &str) -> bool {
    value.starts_with("<FILL_IN_") && value.ends_with('>')
}

#[derive(Debug, Error)]
pub enum RecipeError {
    #[error("malformed recipe json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("op {id}: unknown operation '{operation}'")]
    UnknownOperation { id: String, operation: String },
    #[error("op {id}: missing required field '{field}' for {operation}")]
    MissingField {
        id: String,
        operation: &'static str,
        field: &'static str,
    },
    #[error("op {id}: occurrence must be a positive integer")]
    ZeroOccurrence { id: String },
    #[error("op {id}: unknown position '{position}' (expected 'before' or 'after')")]
    UnknownPosition { id: String, position: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsertPosition {
    Before,
    After,
}

/// The operation payload of a [`PatchOp`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchAction {
    DeletePart,
    LiteralReplace {
        match_: String,
        replacement: String,
        /// 1-based, non-overlapping occurrence index.
        occurrence: usize,
    },
    AppendBlock {
        anchor: String,
        block: String,
        position: InsertPosition,
    },
    SetPart {
        content: String,
    },
}

impl PatchAction {
    pub fn operation_name(&self) -> &'static str {
        match self {
            PatchAction::DeletePart => "delete_part",
            PatchAction::LiteralReplace { .. } => "literal_replace",
            PatchAction::AppendBlock { .. } => "append_block",
            PatchAction::SetPart { .. } => "set_part",
        }
    }
}

/// One patch instruction, immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchOp {
    pub id: String,
    pub part: String,
    pub description: String,
    pub action: PatchAction,
    /// Unknown JSON fields, preserved verbatim on round trip.
    pub extra: BTreeMap<String, Value>,
}

impl PatchOp {
    pub fn new(part: impl Into<String>, description: impl Into<String>, action: PatchAction) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            part: part.into(),
            description: description.into(),
            action,
            extra: BTreeMap::new(),
        }
    }
}

/// JSON wire shape shared by serialization and parsing.
#[derive(Debug, Serialize, Deserialize)]
struct RawPatchOp {
    id: String,
    part: String,
    operation: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    description: String,
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    match_: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    replacement: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    occurrence: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    anchor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    block: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    position: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

impl From<&PatchOp> for RawPatchOp {
    fn from(op: &PatchOp) -> Self {
        let mut raw = RawPatchOp {
            id: op.id.clone(),
            part: op.part.clone(),
            operation: op.action.operation_name().to_string(),
            description: op.description.clone(),
            match_: None,
            replacement: None,
            occurrence: None,
            anchor: None,
            block: None,
            position: None,
            content: None,
            extra: op.extra.clone(),
        };
        match &op.action {
            PatchAction::DeletePart => {}
            PatchAction::LiteralReplace {
                match_,
                replacement,
                occurrence,
            } => {
                raw.match_ = Some(match_.clone());
                raw.replacement = Some(replacement.clone());
                raw.occurrence = Some(*occurrence as u64);
            }
            PatchAction::AppendBlock {
                anchor,
                block,
                position,
            } => {
                raw.anchor = Some(anchor.clone());
                raw.block = Some(block.clone());
                raw.position = Some(
                    match position {
                        InsertPosition::Before => "before",
                        InsertPosition::After => "after",
                    }
                    .to_string(),
                );
            }
            PatchAction::SetPart { content } => {
                raw.content = Some(content.clone());
            }
        }
        raw
    }
}

impl TryFrom<RawPatchOp> for PatchOp {
    type Error = RecipeError;

    fn try_from(raw: RawPatchOp) -> Result<Self, RecipeError> {
        fn required(
            value: Option<String>,
            id: &str,
            operation: &'static str,
            field: &'static str,
        ) -> Result<String, RecipeError> {
            value.ok_or_else(|| RecipeError::MissingField {
                id: id.to_string(),
                operation,
                field,
            })
        }

        let action = match raw.operation.as_str() {
            "delete_part" => PatchAction::DeletePart,
            "literal_replace" => {
                let occurrence = raw.occurrence.unwrap_or(1);
                if occurrence == 0 {
                    return Err(RecipeError::ZeroOccurrence { id: raw.id });
                }
                PatchAction::LiteralReplace {
                    match_: required(raw.match_, &raw.id, "literal_replace", "match")?,
                    replacement: raw.replacement.unwrap_or_default(),
                    occurrence: occurrence as usize,
                }
            }
            "append_block" => {
                let position = match raw.position.as_deref() {
                    None | Some("before") => InsertPosition::Before,
                    Some("after") => InsertPosition::After,
                    Some(other) => {
                        return Err(RecipeError::UnknownPosition {
                            id: raw.id,
                            position: other.to_string(),
                        })
                    }
                };
                PatchAction::AppendBlock {
                    anchor: required(raw.anchor, &raw.id, "append_block", "anchor")?,
                    block: required(raw.block, &raw.id, "append_block", "block")?,
                    position,
                }
            }
            "set_part" => PatchAction::SetPart {
                content: required(raw.content, &raw.id, "set_part", "content")?,
            },
            other => {
                return Err(RecipeError::UnknownOperation {
                    id: raw.id,
                    operation: other.to_string(),
                })
            }
        };

        Ok(PatchOp {
            id: raw.id,
            part: raw.part,
            description: raw.description,
            action,
            extra: raw.extra,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RawPatchRecipe {
    schema_version: String,
    id: String,
    created: String,
    source_file: String,
    version: String,
    patches: Vec<RawPatchOp>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

/// An ordered, serializable patch plan for one source workbook.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchRecipe {
    pub schema_version: String,
    pub id: String,
    /// RFC 3339 UTC timestamp with `Z` suffix.
    pub created: String,
    pub source_file: String,
    /// Caller-assigned revision counter, e.g. `"1"`.
    pub version: String,
    pub patches: Vec<PatchOp>,
    pub extra: BTreeMap<String, Value>,
}

impl PatchRecipe {
    pub fn new(source_file: impl Into<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            id: Uuid::new_v4().to_string(),
            created: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            source_file: source_file.into(),
            version: "1".to_string(),
            patches: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    /// Parse and validate recipe JSON. Any invalid op rejects the whole
    /// recipe; nothing is ever applied from a partially-valid plan.
    pub fn from_json(json: &str) -> Result<Self, RecipeError> {
        let raw: RawPatchRecipe = serde_json::from_str(json)?;
        let mut patches = Vec::with_capacity(raw.patches.len());
        for op in raw.patches {
            patches.push(PatchOp::try_from(op)?);
        }
        Ok(Self {
            schema_version: raw.schema_version,
            id: raw.id,
            created: raw.created,
            source_file: raw.source_file,
            version: raw.version,
            patches,
            extra: raw.extra,
        })
    }

    pub fn to_json(&self) -> String {
        let raw = RawPatchRecipe {
            schema_version: self.schema_version.clone(),
            id: self.id.clone(),
            created: self.created.clone(),
            source_file: self.source_file.clone(),
            version: self.version.clone(),
            patches: self.patches.iter().map(RawPatchOp::from).collect(),
            extra: self.extra.clone(),
        };
        serde_json::to_string_pretty(&raw).expect("recipe serialization is infallible")
    }
}

// Builders: gate findings and patterns into ops.

fn strip_line_feeds(value: &str) -> String {
    value
        .replace('\n', "")
        .replace('\r', "")
        .replace("&#10;", "")
        .replace("&#13;", "")
}

/// Conservative ops derivable from a [`GateReport`] alone (no repaired
/// counterpart needed).
pub fn recipe_from_gates(source_file: &str, gates: &GateReport) -> PatchRecipe {
    let mut recipe = PatchRecipe::new(source_file);

    // Invalid calcChain entries: drop the whole part, the host rebuilds it.
    if !gates.calc_chain.is_empty() {
        recipe.patches.push(PatchOp::new(
            "xl/calcChain.xml",
            format!(
                "Drop xl/calcChain.xml ({} invalid entries); the host rebuilds it on next open.",
                gates.calc_chain.len()
            ),
            PatchAction::DeletePart,
        ));
    }

    for issue in &gates.styles_dxf {
        if let StylesDxfIssue::CountMismatch {
            declared, actual, ..
        } = issue
        {
            recipe.patches.push(PatchOp::new(
                "xl/styles.xml",
                format!("Fix dxfs/@count: declared {declared}, actual {actual}."),
                PatchAction::LiteralReplace {
                    match_: format!("count=\"{declared}\""),
                    replacement: format!("count=\"{actual}\""),
                    occurrence: 1,
                },
            ));
            // Only one <dxfs> element per styles part.
            break;
        }
    }

    for hit in &gates.table_column_lf {
        let (match_, replacement) = if hit.exact {
            (
                format!("name=\"{}\"", hit.value),
                format!("name=\"{}\"", strip_line_feeds(&hit.value)),
            )
        } else {
            (FILL_IN_MATCH.to_string(), FILL_IN_REPLACEMENT.to_string())
        };
        recipe.patches.push(PatchOp::new(
            hit.part.clone(),
            "Strip line feeds from tableColumn/@name.",
            PatchAction::LiteralReplace {
                match_,
                replacement,
                occurrence: 1,
            },
        ));
    }

    for finding in &gates.rels_missing {
        let RelsFinding::MissingTarget {
            rels,
            target,
            element,
            ..
        } = finding
        else {
            continue;
        };
        let match_ = element.clone().unwrap_or_else(|| FILL_IN_MATCH.to_string());
        let replacement = if element.is_some() {
            String::new()
        } else {
            FILL_IN_REPLACEMENT.to_string()
        };
        recipe.patches.push(PatchOp::new(
            rels.clone(),
            format!("Remove relationship with missing target {target}."),
            PatchAction::LiteralReplace {
                match_,
                replacement,
                occurrence: 1,
            },
        ));
    }

    recipe
}

/// Ops derived from classified repair patterns. More precise than
/// gate-only recipes because the actual diff backs them.
pub fn recipe_from_patterns(source_file: &str, patterns: &[Pattern]) -> PatchRecipe {
    let mut recipe = PatchRecipe::new(source_file);

    for pattern in patterns {
        match pattern.name {
            PatternName::CalcChainDrop => {
                recipe.patches.push(PatchOp::new(
                    "xl/calcChain.xml",
                    "Repair removed xl/calcChain.xml; drop it up front.",
                    PatchAction::DeletePart,
                ));
            }
            PatternName::DxfsInsertion => {
                recipe.patches.push(PatchOp::new(
                    "xl/styles.xml",
                    format!(
                        "Insert the <dxf> entries the repair added ({}); fill the block from the repaired diff.",
                        pattern.evidence.join("; ")
                    ),
                    PatchAction::AppendBlock {
                        anchor: "</dxfs>".to_string(),
                        block: FILL_IN_BLOCK.to_string(),
                        position: InsertPosition::Before,
                    },
                ));
            }
            PatternName::SharedRefTrim | PatternName::CfDxfidClone => {
                if pattern.edits.is_empty() {
                    for part in &pattern.affected_parts {
                        recipe.patches.push(PatchOp::new(
                            part.clone(),
                            format!(
                                "[{}] Ambiguous diff; set match/replacement from the XML diff by hand.",
                                pattern.name
                            ),
                            PatchAction::LiteralReplace {
                                match_: FILL_IN_MATCH.to_string(),
                                replacement: FILL_IN_REPLACEMENT.to_string(),
                                occurrence: 1,
                            },
                        ));
                    }
                } else {
                    for edit in &pattern.edits {
                        recipe.patches.push(PatchOp::new(
                            edit.part.clone(),
                            format!("[{}] {} -> {}", pattern.name, edit.match_, edit.replacement),
                            PatchAction::LiteralReplace {
                                match_: edit.match_.clone(),
                                replacement: edit.replacement.clone(),
                                occurrence: 1,
                            },
                        ));
                    }
                }
            }
            PatternName::RelsCleanup => {
                for set in &pattern.set_parts {
                    recipe.patches.push(PatchOp::new(
                        set.part.clone(),
                        "Replace relationships with the repaired content verbatim.",
                        PatchAction::SetPart {
                            content: set.content.clone(),
                        },
                    ));
                }
            }
            // Diagnostic-only patterns; no safe byte edit can be derived.
            PatternName::SharedStringsRebuild | PatternName::TableStyleNorm => {}
        }
    }

    recipe
}

fn dedup_key(op: &PatchOp) -> (String, &'static str, Option<String>) {
    let match_ = match &op.action {
        PatchAction::LiteralReplace { match_, .. } => Some(match_.clone()),
        _ => None,
    };
    (op.part.clone(), op.action.operation_name(), match_)
}

/// Merge recipes in order, de-duplicating by (part, operation, match).
pub fn merge_recipes(recipes: &[PatchRecipe]) -> PatchRecipe {
    let mut merged = PatchRecipe::new(
        recipes
            .first()
            .map(|r| r.source_file.as_str())
            .unwrap_or_default(),
    );
    let mut seen: BTreeSet<(String, &'static str, Option<String>)> = BTreeSet::new();
    for recipe in recipes {
        for op in &recipe.patches {
            if seen.insert(dedup_key(op)) {
                merged.patches.push(op.clone());
            }
        }
    }
    merged
}

fn priority(op: &PatchOp) -> u8 {
    match &op.action {
        PatchAction::DeletePart => 0,
        PatchAction::LiteralReplace { match_, .. }
            if op.part == "xl/styles.xml" && match_.starts_with("count=\"") =>
        {
            1
        }
        _ => 2,
    }
}

/// Assemble the final recipe from gate findings and/or classified
/// patterns: structural deletions first, then count repairs, then content
/// edits; duplicates removed.
pub fn build_recipe(
    source_file: &str,
    gates: Option<&GateReport>,
    patterns: Option<&[Pattern]>,
) -> PatchRecipe {
    let mut sources = Vec::new();
    if let Some(gates) = gates {
        sources.push(recipe_from_gates(source_file, gates));
    }
    if let Some(patterns) = patterns {
        sources.push(recipe_from_patterns(source_file, patterns));
    }

    let mut recipe = merge_recipes(&sources);
    recipe.source_file = source_file.to_string();
    recipe.patches.sort_by_key(priority);
    recipe
}
