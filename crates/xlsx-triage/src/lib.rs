//! XLSX auto-repair triage tooling.
//!
//! This crate diagnoses why Excel for the web shows the "we repaired your
//! workbook" dialog for a given XLSX package and emits a byte-level patch
//! recipe that removes the trigger. It intentionally operates at the
//! ZIP/Open Packaging Convention layer: workbook "parts" (files within the
//! archive) are inspected and mutated as raw byte sequences, never through
//! an XML parse/emit round trip. Re-serializing XML would introduce
//! whitespace and attribute-order drift the host treats as further
//! corruption, so every mutation in a recipe names an exact byte substring.
//!
//! The pipeline is linear and side-effect free:
//!
//! 1. [`scan`] opens an archive into a [`PartMap`] (bytes + SHA-256 digests).
//! 2. [`gate_check`] runs ten structural hazard checks over the part map.
//! 3. [`diff`] compares a candidate against its host-repaired counterpart.
//! 4. [`classify`] names the repair patterns visible in that diff.
//! 5. [`build_recipe`] turns gate findings and patterns into a
//!    [`PatchRecipe`] of declarative patch operations.
//! 6. [`apply`] rewrites the archive, leaving untouched parts bit-identical.
//!
//! Where a patch cannot be derived safely the recipe carries a
//! `<FILL_IN_*>` placeholder for the caller to complete; the patcher skips
//! such operations instead of guessing.

pub mod a1;
pub mod diff;
pub mod gates;
pub mod opc;
pub mod patcher;
pub mod patterns;
pub mod recipe;
pub mod scanner;
mod xmlscan;

pub use diff::{diff, DiffReport, DiffStatus, DiffSummary, PartDiff};
pub use gates::{gate_check, Finding, GateId, GateReport};
pub use patcher::{apply, PatchError, SkipLog, SkippedOp};
pub use patterns::{classify, Confidence, LiteralEdit, Pattern, PatternName, SetPartEdit};
pub use recipe::{
    build_recipe, is_placeholder, merge_recipes, recipe_from_gates, recipe_from_patterns,
    InsertPosition, PatchAction, PatchOp, PatchRecipe, RecipeError, SCHEMA_VERSION,
};
pub use scanner::{scan, ArchiveError, Part, PartMap};
