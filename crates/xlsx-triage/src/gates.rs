//! Structural gate checks for OOXML / Excel-for-Web compatibility.
//!
//! Ten independent, read-only predicates over a [`PartMap`]. Each check
//! returns a (possibly empty) list of serializable findings; a check that
//! cannot run on a part reports the impediment as a finding instead of
//! failing. Checks never reserialize XML: worksheet scans use literal
//! `</c>` splitter segmentation (no backtracking regex engine anywhere),
//! and the only structural parses are tolerant `roxmltree` reads of
//! `.rels` and `xl/workbook.xml`.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::a1::{CellAddr, Rect};
use crate::opc::resolve_relationship_target;
use crate::scanner::{Part, PartMap};
use crate::xmlscan::{attr_value, find_bytes, is_self_closing, tag_at, tag_opens};

/// Formula substrings the web host refuses to open (future-function and
/// user-defined-function placeholders, plus AGGREGATE).
pub const STOPSHIP_TOKENS: [&str; 4] = ["_xlfn.", "_xludf.", "_xlpm.", "AGGREGATE("];

/// Findings keep at most this many offender samples per gate.
pub const SAMPLE_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateId {
    StopshipTokens,
    CfBrokenRef,
    TableColumnLf,
    CalcChainInvalid,
    SharedRefOob,
    SharedRefBbox,
    StylesDxf,
    XmlWellFormed,
    ControlChars,
    RelsMissing,
}

impl GateId {
    pub const ALL: [GateId; 10] = [
        GateId::StopshipTokens,
        GateId::CfBrokenRef,
        GateId::TableColumnLf,
        GateId::CalcChainInvalid,
        GateId::SharedRefOob,
        GateId::SharedRefBbox,
        GateId::StylesDxf,
        GateId::XmlWellFormed,
        GateId::ControlChars,
        GateId::RelsMissing,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            GateId::StopshipTokens => "stopship_tokens",
            GateId::CfBrokenRef => "cf_broken_ref",
            GateId::TableColumnLf => "table_column_lf",
            GateId::CalcChainInvalid => "calc_chain_invalid",
            GateId::SharedRefOob => "shared_ref_oob",
            GateId::SharedRefBbox => "shared_ref_bbox",
            GateId::StylesDxf => "styles_dxf",
            GateId::XmlWellFormed => "xml_well_formed",
            GateId::ControlChars => "control_chars",
            GateId::RelsMissing => "rels_missing",
        }
    }
}

impl std::fmt::Display for GateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One gate observation: a summary message plus the first
/// [`SAMPLE_LIMIT`] offender objects.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub gate: GateId,
    pub message: String,
    pub sample: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopshipHit {
    pub part: String,
    pub token: String,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CfRefHit {
    pub part: String,
    pub rule_index: usize,
    pub formula: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableColumnLfHit {
    pub part: String,
    pub column_id: Option<String>,
    /// Raw attribute value text (lossy-decoded when the part is not UTF-8).
    pub value: String,
    /// Whether `value` reproduces the attribute bytes exactly, i.e. a
    /// byte-level replacement can be derived from it.
    pub exact: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalcChainReason {
    MissingSheetPart,
    NoFormulaAtTarget,
    UnresolvedSheetIndex,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalcChainHit {
    pub cell: String,
    pub sheet_index: String,
    pub sheet_part: Option<String>,
    pub reason: CalcChainReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedRefOobHit {
    pub part: String,
    pub si: String,
    pub declared_ref: String,
    pub sheet_max_row: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedRefBboxHit {
    pub part: String,
    pub si: String,
    pub declared_ref: String,
    pub actual_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum StylesDxfIssue {
    MissingStyles {
        part: String,
    },
    CountMismatch {
        part: String,
        declared: usize,
        actual: usize,
    },
    DxfIdOutOfRange {
        part: String,
        dxf_id: usize,
        dxf_count: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XmlParseFailure {
    pub part: String,
    pub error: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlCharHit {
    pub part: String,
    pub offset: usize,
    pub code_point: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelsFinding {
    MissingTarget {
        rels: String,
        id: String,
        target: String,
        resolved: String,
        /// Raw `<Relationship .../>` element text when it could be located
        /// byte-exactly, enabling a literal removal patch.
        #[serde(skip_serializing_if = "Option::is_none")]
        element: Option<String>,
    },
    Unreadable {
        rels: String,
        error: String,
    },
}

/// Workbook-view probe (informational, not a gate).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveTabInfo {
    pub active_tab: u32,
    pub sheet_count: usize,
    pub active_sheet_name: Option<String>,
    pub active_sheet_rid: Option<String>,
}

/// The full gate battery result for one candidate.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct GateReport {
    pub stopship: Vec<StopshipHit>,
    pub cf_ref: Vec<CfRefHit>,
    pub table_column_lf: Vec<TableColumnLfHit>,
    pub calc_chain: Vec<CalcChainHit>,
    pub shared_ref_oob: Vec<SharedRefOobHit>,
    pub shared_ref_bbox: Vec<SharedRefBboxHit>,
    pub styles_dxf: Vec<StylesDxfIssue>,
    pub xml_malformed: Vec<XmlParseFailure>,
    pub control_chars: Vec<ControlCharHit>,
    pub rels_missing: Vec<RelsFinding>,
    /// Informational; never affects `pass_all`.
    pub active_tab: Option<ActiveTabInfo>,
}

impl GateReport {
    pub fn pass_all(&self) -> bool {
        self.failing_gates().is_empty()
    }

    /// Gate -> offender count, for gates with at least one offender.
    pub fn failing_gates(&self) -> BTreeMap<GateId, usize> {
        let mut out = BTreeMap::new();
        for gate in GateId::ALL {
            let count = self.offender_count(gate);
            if count > 0 {
                out.insert(gate, count);
            }
        }
        out
    }

    fn offender_count(&self, gate: GateId) -> usize {
        match gate {
            GateId::StopshipTokens => self.stopship.len(),
            GateId::CfBrokenRef => self.cf_ref.len(),
            GateId::TableColumnLf => self.table_column_lf.len(),
            GateId::CalcChainInvalid => self.calc_chain.len(),
            GateId::SharedRefOob => self.shared_ref_oob.len(),
            GateId::SharedRefBbox => self.shared_ref_bbox.len(),
            GateId::StylesDxf => self.styles_dxf.len(),
            GateId::XmlWellFormed => self.xml_malformed.len(),
            GateId::ControlChars => self.control_chars.len(),
            GateId::RelsMissing => self.rels_missing.len(),
        }
    }

    /// Gate -> findings view, each finding carrying at most
    /// [`SAMPLE_LIMIT`] offender samples.
    pub fn findings(&self) -> BTreeMap<GateId, Vec<Finding>> {
        let mut out = BTreeMap::new();
        for gate in GateId::ALL {
            if let Some(finding) = self.finding_for(gate) {
                out.insert(gate, vec![finding]);
            }
        }
        out
    }

    fn finding_for(&self, gate: GateId) -> Option<Finding> {
        fn build<T: Serialize>(gate: GateId, items: &[T], what: &str) -> Option<Finding> {
            if items.is_empty() {
                return None;
            }
            let sample = items
                .iter()
                .take(SAMPLE_LIMIT)
                .map(|item| serde_json::to_value(item).unwrap_or(Value::Null))
                .collect();
            Some(Finding {
                gate,
                message: format!("{} {what}", items.len()),
                sample,
            })
        }

        match gate {
            GateId::StopshipTokens => build(gate, &self.stopship, "stopship token occurrence(s)"),
            GateId::CfBrokenRef => build(gate, &self.cf_ref, "conditional-format rule(s) with #REF!"),
            GateId::TableColumnLf => {
                build(gate, &self.table_column_lf, "table column name(s) containing line feeds")
            }
            GateId::CalcChainInvalid => build(gate, &self.calc_chain, "invalid calcChain entry(s)"),
            GateId::SharedRefOob => {
                build(gate, &self.shared_ref_oob, "shared formula ref(s) past the populated rows")
            }
            GateId::SharedRefBbox => {
                build(gate, &self.shared_ref_bbox, "shared formula bounding box mismatch(es)")
            }
            GateId::StylesDxf => build(gate, &self.styles_dxf, "dxf integrity issue(s)"),
            GateId::XmlWellFormed => build(gate, &self.xml_malformed, "malformed XML part(s)"),
            GateId::ControlChars => build(gate, &self.control_chars, "illegal control character(s)"),
            GateId::RelsMissing => build(gate, &self.rels_missing, "relationship(s) with missing targets"),
        }
    }
}

/// Run the full gate battery.
pub fn gate_check(parts: &PartMap) -> GateReport {
    let (shared_ref_oob, shared_ref_bbox) = check_shared_refs(parts);
    GateReport {
        stopship: check_stopship_tokens(parts),
        cf_ref: check_cf_broken_refs(parts),
        table_column_lf: check_table_column_lf(parts),
        calc_chain: check_calc_chain(parts),
        shared_ref_oob,
        shared_ref_bbox,
        styles_dxf: check_styles_dxf(parts),
        xml_malformed: check_xml_well_formed(parts),
        control_chars: check_control_chars(parts),
        rels_missing: check_rels_targets(parts),
        active_tab: probe_active_tab(parts),
    }
}

// Scan helpers.

fn worksheet_parts(parts: &PartMap) -> Vec<&Part> {
    parts
        .iter()
        .filter(|p| p.path.starts_with("xl/worksheets/") && p.path.ends_with(".xml"))
        .collect()
}

/// Largest row number on any `<c r="…">` in the sheet.
fn max_cell_row(xml: &str) -> u32 {
    let mut max = 0u32;
    for pos in tag_opens(xml, "c") {
        if let Some(tag) = tag_at(xml, pos) {
            if let Some(r) = attr_value(tag, "r") {
                if let Some(addr) = CellAddr::parse(r) {
                    max = max.max(addr.row);
                }
            }
        }
    }
    max
}

/// Yield `(cell_ref, f_open_tag)` for every formula-bearing cell, using
/// `</c>` splitter segmentation: the last `<c …>` open in each chunk is the
/// cell the terminator closes, and its `<f…>` (if any) follows the open tag
/// within the same chunk.
fn for_each_formula_cell(xml: &str, mut f: impl FnMut(&str, &str)) {
    for chunk in xml.split("</c>") {
        let Some(cell_pos) = tag_opens(chunk, "c").into_iter().next_back() else {
            continue;
        };
        let Some(cell_tag) = tag_at(chunk, cell_pos) else {
            continue;
        };
        if is_self_closing(cell_tag) {
            continue;
        }
        let Some(cell_ref) = attr_value(cell_tag, "r") else {
            continue;
        };
        let content_start = cell_pos + cell_tag.len();
        let Some(f_pos) = tag_opens(&chunk[content_start..], "f").into_iter().next() else {
            continue;
        };
        let Some(f_tag) = tag_at(&chunk[content_start..], f_pos) else {
            continue;
        };
        f(cell_ref, f_tag);
    }
}

// Individual gates.

/// G1: stopship token scan over every `*.xml` part (byte offsets recorded).
pub fn check_stopship_tokens(parts: &PartMap) -> Vec<StopshipHit> {
    let mut hits = Vec::new();
    for part in parts.xml_parts() {
        for token in STOPSHIP_TOKENS {
            let mut from = 0usize;
            while let Some(pos) = find_bytes(&part.bytes, token.as_bytes(), from) {
                hits.push(StopshipHit {
                    part: part.path.clone(),
                    token: token.to_string(),
                    offset: pos,
                });
                from = pos + token.len();
            }
        }
    }
    hits
}

/// G2: `#REF!` inside conditional-format rule formulas.
pub fn check_cf_broken_refs(parts: &PartMap) -> Vec<CfRefHit> {
    let mut hits = Vec::new();
    for part in worksheet_parts(parts) {
        let text = part.text_lossy();
        for (rule_index, rule_pos) in tag_opens(&text, "cfRule").into_iter().enumerate() {
            let Some(open_tag) = tag_at(&text, rule_pos) else {
                continue;
            };
            if is_self_closing(open_tag) {
                continue;
            }
            let body_start = rule_pos + open_tag.len();
            let body_end = find_bytes(text.as_bytes(), b"</cfRule>", body_start)
                .unwrap_or(text.len());
            let body = &text[body_start..body_end];

            let mut from = 0usize;
            while let Some(f_start) = find_bytes(body.as_bytes(), b"<formula>", from) {
                let text_start = f_start + "<formula>".len();
                let text_end = find_bytes(body.as_bytes(), b"</formula>", text_start)
                    .unwrap_or(body.len());
                let formula = &body[text_start..text_end];
                if formula.contains("#REF!") {
                    hits.push(CfRefHit {
                        part: part.path.clone(),
                        rule_index,
                        formula: formula.chars().take(120).collect(),
                    });
                }
                from = text_end;
            }
        }
    }
    hits
}

/// G3: line feeds in `tableColumn/@name` (raw U+000A/U+000D or the
/// `&#10;`/`&#13;` numeric references).
pub fn check_table_column_lf(parts: &PartMap) -> Vec<TableColumnLfHit> {
    let mut hits = Vec::new();
    for part in parts.iter() {
        if !(part.path.starts_with("xl/tables/") && part.path.ends_with(".xml")) {
            continue;
        }
        let text = part.text_lossy();
        let exact = !matches!(text, std::borrow::Cow::Owned(_));
        for pos in tag_opens(&text, "tableColumn") {
            let Some(tag) = tag_at(&text, pos) else { continue };
            let Some(value) = attr_value(tag, "name") else { continue };
            let has_lf = value.contains('\n')
                || value.contains('\r')
                || value.contains("&#10;")
                || value.contains("&#13;");
            if has_lf {
                hits.push(TableColumnLfHit {
                    part: part.path.clone(),
                    column_id: attr_value(tag, "id").map(str::to_string),
                    value: value.to_string(),
                    exact,
                });
            }
        }
    }
    hits
}

/// Sheet-index -> worksheet part map built from `xl/workbook.xml` sheetIds
/// and the workbook relationships. Returns `None` when either part is
/// absent or unparsable.
fn sheet_parts_by_id(parts: &PartMap) -> Option<HashMap<String, String>> {
    let workbook = parts.get("xl/workbook.xml")?;
    let rels = parts.get("xl/_rels/workbook.xml.rels")?;

    let workbook_text = workbook.text_lossy();
    let rels_text = rels.text_lossy();
    let workbook_doc = roxmltree::Document::parse(&workbook_text).ok()?;
    let rels_doc = roxmltree::Document::parse(&rels_text).ok()?;

    let mut target_by_rid: HashMap<String, String> = HashMap::new();
    for node in rels_doc
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "Relationship")
    {
        let (Some(id), Some(target)) = (node.attribute("Id"), node.attribute("Target")) else {
            continue;
        };
        target_by_rid.insert(
            id.to_string(),
            resolve_relationship_target("xl/_rels/workbook.xml.rels", target),
        );
    }

    let mut out = HashMap::new();
    for node in workbook_doc
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "sheet")
    {
        let Some(sheet_id) = node.attribute("sheetId") else { continue };
        let rid = node
            .attributes()
            .find(|a| a.name() == "id")
            .map(|a| a.value());
        let Some(rid) = rid else { continue };
        if let Some(target) = target_by_rid.get(rid) {
            out.insert(sheet_id.to_string(), target.clone());
        }
    }
    Some(out)
}

/// G4: calcChain entries pointing at missing sheets or non-formula cells.
pub fn check_calc_chain(parts: &PartMap) -> Vec<CalcChainHit> {
    let Some(calc_chain) = parts.get("xl/calcChain.xml") else {
        return Vec::new();
    };
    let text = calc_chain.text_lossy();

    let mut entries: Vec<(String, String)> = Vec::new();
    for pos in tag_opens(&text, "c") {
        let Some(tag) = tag_at(&text, pos) else { continue };
        let (Some(r), Some(i)) = (attr_value(tag, "r"), attr_value(tag, "i")) else {
            continue;
        };
        entries.push((r.to_string(), i.to_string()));
    }
    if entries.is_empty() {
        return Vec::new();
    }

    let sheet_map = sheet_parts_by_id(parts);

    let mut formula_cache: HashMap<String, Option<HashSet<String>>> = HashMap::new();
    let mut hits = Vec::new();
    for (cell, index) in entries {
        let sheet_part = sheet_map
            .as_ref()
            .and_then(|m| m.get(&index))
            .cloned();
        let Some(sheet_part) = sheet_part else {
            hits.push(CalcChainHit {
                cell,
                sheet_index: index,
                sheet_part: None,
                reason: CalcChainReason::UnresolvedSheetIndex,
            });
            continue;
        };

        let pool = formula_cache.entry(sheet_part.clone()).or_insert_with(|| {
            parts.get(&sheet_part).map(|part| {
                let mut cells = HashSet::new();
                for_each_formula_cell(&part.text_lossy(), |cell_ref, _| {
                    cells.insert(cell_ref.to_string());
                });
                cells
            })
        });

        match pool {
            None => hits.push(CalcChainHit {
                cell,
                sheet_index: index,
                sheet_part: Some(sheet_part),
                reason: CalcChainReason::MissingSheetPart,
            }),
            Some(cells) if !cells.contains(&cell) => hits.push(CalcChainHit {
                cell,
                sheet_index: index,
                sheet_part: Some(sheet_part),
                reason: CalcChainReason::NoFormulaAtTarget,
            }),
            Some(_) => {}
        }
    }
    hits
}

/// G5 + G6: shared-formula declared refs vs populated rows, and declared
/// refs vs the actual bounding box of participating cells. Both come from
/// the same single pass over each worksheet.
pub fn check_shared_refs(parts: &PartMap) -> (Vec<SharedRefOobHit>, Vec<SharedRefBboxHit>) {
    let mut oob = Vec::new();
    let mut bbox = Vec::new();

    for part in worksheet_parts(parts) {
        let text = part.text_lossy();
        let max_row = max_cell_row(&text);

        let mut si_cells: BTreeMap<String, Vec<CellAddr>> = BTreeMap::new();
        let mut si_decl: BTreeMap<String, String> = BTreeMap::new();

        for_each_formula_cell(&text, |cell_ref, f_tag| {
            if attr_value(f_tag, "t") != Some("shared") {
                return;
            }
            let Some(si) = attr_value(f_tag, "si") else { return };
            if let Some(addr) = CellAddr::parse(cell_ref) {
                si_cells.entry(si.to_string()).or_default().push(addr);
            }
            if let Some(decl) = attr_value(f_tag, "ref") {
                si_decl.insert(si.to_string(), decl.to_string());
            }
        });

        for (si, decl) in &si_decl {
            let Some(rect) = Rect::parse(decl) else { continue };
            if rect.end.row > max_row {
                oob.push(SharedRefOobHit {
                    part: part.path.clone(),
                    si: si.clone(),
                    declared_ref: decl.clone(),
                    sheet_max_row: max_row,
                });
            }
        }

        for (si, cells) in &si_cells {
            let Some(decl) = si_decl.get(si) else { continue };
            let Some(declared) = Rect::parse(decl) else { continue };
            let Some(first) = cells.first() else { continue };
            let mut actual = Rect::new(*first, *first);
            for addr in cells {
                actual.start.col = actual.start.col.min(addr.col);
                actual.start.row = actual.start.row.min(addr.row);
                actual.end.col = actual.end.col.max(addr.col);
                actual.end.row = actual.end.row.max(addr.row);
            }
            if actual != declared {
                bbox.push(SharedRefBboxHit {
                    part: part.path.clone(),
                    si: si.clone(),
                    declared_ref: declared.to_string(),
                    actual_ref: actual.to_string(),
                });
            }
        }
    }

    (oob, bbox)
}

fn count_dxf_elements(text: &str) -> usize {
    // `<dxfs` must not count; the boundary check in tag_opens handles it.
    tag_opens(text, "dxf").len()
}

/// G7: `dxfs/@count` vs actual `<dxf>` children, and `cfRule/@dxfId`
/// range checks across worksheets.
pub fn check_styles_dxf(parts: &PartMap) -> Vec<StylesDxfIssue> {
    let Some(styles) = parts.get("xl/styles.xml") else {
        return vec![StylesDxfIssue::MissingStyles {
            part: "xl/styles.xml".to_string(),
        }];
    };

    let mut issues = Vec::new();
    let text = styles.text_lossy();
    let actual = count_dxf_elements(&text);

    let declared = tag_opens(&text, "dxfs")
        .into_iter()
        .next()
        .and_then(|pos| tag_at(&text, pos))
        .and_then(|tag| attr_value(tag, "count"))
        .and_then(|v| v.parse::<usize>().ok());

    if let Some(declared) = declared {
        if declared != actual {
            issues.push(StylesDxfIssue::CountMismatch {
                part: "xl/styles.xml".to_string(),
                declared,
                actual,
            });
        }
    }

    for part in worksheet_parts(parts) {
        let sheet_text = part.text_lossy();
        for pos in tag_opens(&sheet_text, "cfRule") {
            let Some(tag) = tag_at(&sheet_text, pos) else { continue };
            let Some(dxf_id) = attr_value(tag, "dxfId").and_then(|v| v.parse::<usize>().ok())
            else {
                continue;
            };
            if dxf_id >= actual {
                issues.push(StylesDxfIssue::DxfIdOutOfRange {
                    part: part.path.clone(),
                    dxf_id,
                    dxf_count: actual,
                });
            }
        }
    }

    issues
}

/// G8: tolerant structural parse of every `*.xml` part.
pub fn check_xml_well_formed(parts: &PartMap) -> Vec<XmlParseFailure> {
    let mut bad = Vec::new();
    for part in parts.xml_parts() {
        let text = part.text_lossy();
        if let Err(err) = roxmltree::Document::parse(&text) {
            let pos = err.pos();
            bad.push(XmlParseFailure {
                part: part.path.clone(),
                error: err.to_string(),
                line: Some(pos.row),
                column: Some(pos.col),
            });
        }
    }
    bad
}

/// G9: code points below U+0020 other than tab/LF/CR anywhere in an XML
/// part. At most [`SAMPLE_LIMIT`] offenders are recorded per part.
pub fn check_control_chars(parts: &PartMap) -> Vec<ControlCharHit> {
    let mut hits = Vec::new();
    for part in parts.xml_parts() {
        let mut per_part = 0usize;
        for (offset, byte) in part.bytes.iter().enumerate() {
            if *byte < 0x20 && !matches!(byte, 0x09 | 0x0A | 0x0D) {
                hits.push(ControlCharHit {
                    part: part.path.clone(),
                    offset,
                    code_point: u32::from(*byte),
                });
                per_part += 1;
                if per_part >= SAMPLE_LIMIT {
                    break;
                }
            }
        }
    }
    hits
}

/// Locate the raw `<Relationship …/>` element carrying `Id="<id>"`.
fn raw_relationship_element(text: &str, id: &str) -> Option<String> {
    let id_token = format!("Id=\"{id}\"");
    let id_pos = find_bytes(text.as_bytes(), id_token.as_bytes(), 0)?;
    let start = text[..id_pos].rfind("<Relationship")?;
    let tag = tag_at(text, start)?;
    if is_self_closing(tag) {
        return Some(tag.to_string());
    }
    let end = find_bytes(text.as_bytes(), b"</Relationship>", start)?;
    Some(text[start..end + "</Relationship>".len()].to_string())
}

/// G10: relationship targets that resolve to no part in the archive.
pub fn check_rels_targets(parts: &PartMap) -> Vec<RelsFinding> {
    let mut findings = Vec::new();
    for part in parts.iter() {
        if !part.is_rels() {
            continue;
        }
        let text = part.text_lossy();
        let doc = match roxmltree::Document::parse(&text) {
            Ok(doc) => doc,
            Err(err) => {
                findings.push(RelsFinding::Unreadable {
                    rels: part.path.clone(),
                    error: err.to_string(),
                });
                continue;
            }
        };

        for node in doc
            .descendants()
            .filter(|n| n.is_element() && n.tag_name().name() == "Relationship")
        {
            if node
                .attribute("TargetMode")
                .is_some_and(|m| m.eq_ignore_ascii_case("External"))
            {
                continue;
            }
            let (Some(id), Some(target)) = (node.attribute("Id"), node.attribute("Target")) else {
                continue;
            };
            let resolved = resolve_relationship_target(&part.path, target);
            if !parts.contains(&resolved) {
                findings.push(RelsFinding::MissingTarget {
                    rels: part.path.clone(),
                    id: id.to_string(),
                    target: target.to_string(),
                    resolved,
                    element: raw_relationship_element(&text, id),
                });
            }
        }
    }
    findings
}

/// Informational workbook-view probe: which tab is active and whether the
/// index is in range.
pub fn probe_active_tab(parts: &PartMap) -> Option<ActiveTabInfo> {
    let workbook = parts.get("xl/workbook.xml")?;
    let text = workbook.text_lossy();

    let active_tab = tag_opens(&text, "workbookView")
        .into_iter()
        .next()
        .and_then(|pos| tag_at(&text, pos))
        .and_then(|tag| attr_value(tag, "activeTab"))
        .and_then(|v| v.parse::<u32>().ok())?;

    let mut sheets: Vec<(Option<String>, Option<String>)> = Vec::new();
    for pos in tag_opens(&text, "sheet") {
        let Some(tag) = tag_at(&text, pos) else { continue };
        sheets.push((
            attr_value(tag, "name").map(str::to_string),
            attr_value(tag, "r:id").map(str::to_string),
        ));
    }

    let active = sheets.get(active_tab as usize);
    Some(ActiveTabInfo {
        active_tab,
        sheet_count: sheets.len(),
        active_sheet_name: active.and_then(|(name, _)| name.clone()),
        active_sheet_rid: active.and_then(|(_, rid)| rid.clone()),
    })
}
