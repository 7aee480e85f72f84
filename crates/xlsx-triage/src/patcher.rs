//! Patch engine: applies a [`PatchRecipe`] to an archive byte-for-byte.
//!
//! All mutations are splices on the raw part bytes; XML is never parsed
//! on the write path. The whole archive is rewritten so the central
//! directory stays consistent, but untouched parts keep their exact
//! uncompressed bytes and their original compression method (the patch
//! fidelity invariant). Application is all-or-nothing: the first
//! non-skippable failure aborts with no output.

use std::io::{Cursor, Write};

use serde::Serialize;
use thiserror::Error;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::recipe::{is_placeholder, InsertPosition, PatchAction, PatchOp, PatchRecipe};
use crate::scanner::{scan, ArchiveError};
use crate::xmlscan::find_bytes;

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("op {id}: literal_replace occurrence {occurrence} of {match_excerpt:?} not found in {part}")]
    MatchNotFound {
        id: String,
        part: String,
        match_excerpt: String,
        occurrence: usize,
    },
    #[error("op {id}: append_block anchor {anchor_excerpt:?} not found in {part}")]
    AnchorNotFound {
        id: String,
        part: String,
        anchor_excerpt: String,
    },
    #[error("op {id}: part '{part}' not present in archive")]
    PartMissing { id: String, part: String },
    #[error("duplicate zip entry: {0}")]
    DuplicatePart(String),
    #[error(transparent)]
    Archive(ArchiveError),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One operation skipped because a required field was a placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedOp {
    pub id: String,
    pub part: String,
    pub field: &'static str,
    pub description: String,
}

/// Placeholder-bearing ops recorded during [`apply`]; never fatal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SkipLog {
    pub skipped: Vec<SkippedOp>,
}

impl SkipLog {
    pub fn is_empty(&self) -> bool {
        self.skipped.is_empty()
    }

    pub fn len(&self) -> usize {
        self.skipped.len()
    }
}

struct Entry {
    name: String,
    bytes: Vec<u8>,
    compressed: bool,
}

/// The placeholder field of `op`, if any required field carries one.
fn placeholder_field(op: &PatchOp) -> Option<&'static str> {
    match &op.action {
        PatchAction::DeletePart => None,
        PatchAction::LiteralReplace {
            match_,
            replacement,
            ..
        } => {
            if is_placeholder(match_) {
                Some("match")
            } else if is_placeholder(replacement) {
                Some("replacement")
            } else {
                None
            }
        }
        PatchAction::AppendBlock { anchor, block, .. } => {
            if is_placeholder(anchor) {
                Some("anchor")
            } else if is_placeholder(block) {
                Some("block")
            } else {
                None
            }
        }
        PatchAction::SetPart { content } => is_placeholder(content).then_some("content"),
    }
}

/// Offset of the `occurrence`-th (1-based) non-overlapping match.
fn find_nth(haystack: &[u8], needle: &[u8], occurrence: usize) -> Option<usize> {
    let mut from = 0usize;
    let mut found = None;
    for _ in 0..occurrence {
        let pos = find_bytes(haystack, needle, from)?;
        found = Some(pos);
        from = pos + needle.len();
    }
    found
}

fn splice(data: &[u8], at: usize, remove: usize, insert: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() - remove + insert.len());
    out.extend_from_slice(&data[..at]);
    out.extend_from_slice(insert);
    out.extend_from_slice(&data[at + remove..]);
    out
}

fn excerpt(value: &str) -> String {
    const MAX: usize = 80;
    if value.len() > MAX {
        let mut end = MAX;
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &value[..end])
    } else {
        value.to_string()
    }
}

/// Apply `recipe` to `archive`, returning the patched archive bytes and
/// the log of placeholder ops that were skipped.
pub fn apply(archive: &[u8], recipe: &PatchRecipe) -> Result<(Vec<u8>, SkipLog), PatchError> {
    let parts = match scan(archive) {
        Ok(parts) => parts,
        Err(ArchiveError::DuplicatePart(part)) => return Err(PatchError::DuplicatePart(part)),
        Err(err) => return Err(PatchError::Archive(err)),
    };

    let mut entries: Vec<Entry> = parts
        .iter()
        .map(|p| Entry {
            name: p.path.clone(),
            bytes: p.bytes.clone(),
            compressed: p.compressed,
        })
        .collect();

    let mut skip_log = SkipLog::default();

    for op in &recipe.patches {
        if let Some(field) = placeholder_field(op) {
            skip_log.skipped.push(SkippedOp {
                id: op.id.clone(),
                part: op.part.clone(),
                field,
                description: op.description.clone(),
            });
            continue;
        }

        let index = entries.iter().position(|e| e.name == op.part);
        match &op.action {
            PatchAction::DeletePart => {
                let index = index.ok_or_else(|| PatchError::PartMissing {
                    id: op.id.clone(),
                    part: op.part.clone(),
                })?;
                entries.remove(index);
            }
            PatchAction::LiteralReplace {
                match_,
                replacement,
                occurrence,
            } => {
                let index = index.ok_or_else(|| PatchError::PartMissing {
                    id: op.id.clone(),
                    part: op.part.clone(),
                })?;
                let entry = &mut entries[index];
                let at = find_nth(&entry.bytes, match_.as_bytes(), *occurrence).ok_or_else(
                    || PatchError::MatchNotFound {
                        id: op.id.clone(),
                        part: op.part.clone(),
                        match_excerpt: excerpt(match_),
                        occurrence: *occurrence,
                    },
                )?;
                entry.bytes = splice(&entry.bytes, at, match_.len(), replacement.as_bytes());
            }
            PatchAction::AppendBlock {
                anchor,
                block,
                position,
            } => {
                let index = index.ok_or_else(|| PatchError::PartMissing {
                    id: op.id.clone(),
                    part: op.part.clone(),
                })?;
                let entry = &mut entries[index];
                let anchor_at = find_bytes(&entry.bytes, anchor.as_bytes(), 0).ok_or_else(|| {
                    PatchError::AnchorNotFound {
                        id: op.id.clone(),
                        part: op.part.clone(),
                        anchor_excerpt: excerpt(anchor),
                    }
                })?;
                let insert_at = match position {
                    InsertPosition::Before => anchor_at,
                    InsertPosition::After => anchor_at + anchor.len(),
                };
                entry.bytes = splice(&entry.bytes, insert_at, 0, block.as_bytes());
            }
            PatchAction::SetPart { content } => match index {
                Some(index) => entries[index].bytes = content.clone().into_bytes(),
                // New entries are appended after the original ones.
                None => entries.push(Entry {
                    name: op.part.clone(),
                    bytes: content.clone().into_bytes(),
                    compressed: true,
                }),
            },
        }
    }

    let cursor = Cursor::new(Vec::new());
    let mut writer = ZipWriter::new(cursor);
    for entry in &entries {
        let method = if entry.compressed {
            CompressionMethod::Deflated
        } else {
            CompressionMethod::Stored
        };
        let options = FileOptions::<()>::default().compression_method(method);
        writer.start_file(entry.name.as_str(), options)?;
        writer.write_all(&entry.bytes)?;
    }
    let bytes = writer.finish()?.into_inner();

    Ok((bytes, skip_log))
}
