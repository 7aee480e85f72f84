//! Diff + classifier integration: candidate/repaired archive pairs built
//! in memory, diffed at the part level, and classified into repair
//! patterns; recipes assembled from those patterns must apply cleanly.

use std::collections::BTreeSet;
use std::io::{Cursor, Write};

use pretty_assertions::assert_eq;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use xlsx_triage::recipe::PatchAction;
use xlsx_triage::{
    apply, build_recipe, classify, diff, scan, Confidence, DiffStatus, PatternName,
};

fn make_zip(parts: &[(&str, &str)]) -> Vec<u8> {
    let cursor = Cursor::new(Vec::new());
    let mut zip = ZipWriter::new(cursor);
    let options = FileOptions::<()>::default().compression_method(CompressionMethod::Deflated);
    for (name, content) in parts {
        zip.start_file(*name, options).unwrap();
        zip.write_all(content.as_bytes()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

const WORKBOOK: &str = r#"<?xml version="1.0"?><workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="Sheet1" sheetId="1" r:id="rId1"/></sheets></workbook>"#;

// Seed scenario 6: bit-identical archives diff to all-unchanged.
#[test]
fn identical_archives_diff_empty_and_classify_to_nothing() {
    let parts = [
        ("[Content_Types].xml", "<Types/>"),
        ("xl/workbook.xml", WORKBOOK),
        ("xl/worksheets/sheet1.xml", "<worksheet/>"),
    ];
    let a = make_zip(&parts);
    let b = make_zip(&parts);

    let report = diff(&scan(&a).unwrap(), &scan(&b).unwrap());
    let summary = report.summary();
    assert_eq!(summary.added, 0);
    assert_eq!(summary.removed, 0);
    assert_eq!(summary.changed, 0);
    assert_eq!(summary.unchanged, 3);

    assert!(classify(&report).is_empty());
}

#[test]
fn unchanged_set_is_symmetric() {
    let a = make_zip(&[
        ("xl/workbook.xml", WORKBOOK),
        ("xl/worksheets/sheet1.xml", "<worksheet/>"),
        ("only_in_a.xml", "<a/>"),
    ]);
    let b = make_zip(&[
        ("xl/workbook.xml", WORKBOOK),
        ("xl/worksheets/sheet1.xml", "<worksheet><sheetData/></worksheet>"),
        ("only_in_b.xml", "<b/>"),
    ]);

    let forward = diff(&scan(&a).unwrap(), &scan(&b).unwrap());
    let backward = diff(&scan(&b).unwrap(), &scan(&a).unwrap());

    let unchanged = |report: &xlsx_triage::DiffReport| -> BTreeSet<String> {
        report
            .with_status(DiffStatus::Unchanged)
            .map(|p| p.path.clone())
            .collect()
    };
    assert_eq!(unchanged(&forward), unchanged(&backward));
}

#[test]
fn diff_entries_are_sorted_by_path_with_size_deltas() {
    let a = make_zip(&[
        ("xl/workbook.xml", WORKBOOK),
        ("xl/styles.xml", "<styleSheet>ab</styleSheet>"),
    ]);
    let b = make_zip(&[
        ("xl/workbook.xml", WORKBOOK),
        ("xl/styles.xml", "<styleSheet>abcd</styleSheet>"),
    ]);

    let report = diff(&scan(&a).unwrap(), &scan(&b).unwrap());
    let paths: Vec<&str> = report.parts.iter().map(|p| p.path.as_str()).collect();
    assert_eq!(paths, vec!["xl/styles.xml", "xl/workbook.xml"]);

    let styles = report.get("xl/styles.xml").unwrap();
    assert_eq!(styles.status, DiffStatus::Changed);
    assert_eq!(styles.size_delta, Some(2));
    assert!(styles.unified_diff.is_some());
}

#[test]
fn calc_chain_drop_is_classified_high() {
    let candidate = make_zip(&[
        ("xl/workbook.xml", WORKBOOK),
        ("xl/calcChain.xml", "<calcChain/>"),
    ]);
    let repaired = make_zip(&[("xl/workbook.xml", WORKBOOK)]);

    let patterns = classify(&diff(&scan(&candidate).unwrap(), &scan(&repaired).unwrap()));
    assert_eq!(patterns.len(), 1);
    assert_eq!(patterns[0].name, PatternName::CalcChainDrop);
    assert_eq!(patterns[0].confidence, Confidence::High);
    assert_eq!(patterns[0].affected_parts, vec!["xl/calcChain.xml"]);
}

// Seed scenario 4 (diff side): the repair trimmed a shared formula ref.
#[test]
fn shared_ref_trim_yields_an_exact_literal_replace() {
    let sheet_before = r#"<?xml version="1.0"?><worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData><row r="1"><c r="A1"><f t="shared" ref="A1:A20" si="0">SUM(B1)</f><v>0</v></c></row></sheetData></worksheet>"#;
    let sheet_after = r#"<?xml version="1.0"?><worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData><row r="1"><c r="A1"><f t="shared" ref="A1:A12" si="0">SUM(B1)</f><v>0</v></c></row></sheetData></worksheet>"#;

    let candidate = make_zip(&[
        ("xl/workbook.xml", WORKBOOK),
        ("xl/worksheets/sheet1.xml", sheet_before),
    ]);
    let repaired = make_zip(&[
        ("xl/workbook.xml", WORKBOOK),
        ("xl/worksheets/sheet1.xml", sheet_after),
    ]);

    let patterns = classify(&diff(&scan(&candidate).unwrap(), &scan(&repaired).unwrap()));
    assert_eq!(patterns.len(), 1);
    let pattern = &patterns[0];
    assert_eq!(pattern.name, PatternName::SharedRefTrim);
    assert_eq!(pattern.confidence, Confidence::Medium);
    assert_eq!(pattern.edits.len(), 1);
    assert_eq!(pattern.edits[0].match_, "ref=\"A1:A20\"");
    assert_eq!(pattern.edits[0].replacement, "ref=\"A1:A12\"");

    let recipe = build_recipe("candidate.xlsx", None, Some(&patterns));
    assert_eq!(recipe.patches.len(), 1);
    assert_eq!(
        recipe.patches[0].action,
        PatchAction::LiteralReplace {
            match_: "ref=\"A1:A20\"".to_string(),
            replacement: "ref=\"A1:A12\"".to_string(),
            occurrence: 1,
        }
    );

    let (patched, skip_log) = apply(&candidate, &recipe).unwrap();
    assert!(skip_log.is_empty());
    let patched_parts = scan(&patched).unwrap();
    let sheet = patched_parts.get("xl/worksheets/sheet1.xml").unwrap();
    assert!(sheet.text_lossy().contains("ref=\"A1:A12\""));
    assert!(!sheet.text_lossy().contains("ref=\"A1:A20\""));
}

#[test]
fn ref_growth_is_not_a_trim() {
    let sheet_before = r#"<worksheet><sheetData><row r="1"><c r="A1"><f t="shared" ref="A1:A12" si="0">SUM(B1)</f></c></row></sheetData></worksheet>"#;
    let sheet_after = r#"<worksheet><sheetData><row r="1"><c r="A1"><f t="shared" ref="A1:A20" si="0">SUM(B1)</f></c></row></sheetData></worksheet>"#;

    let candidate = make_zip(&[("xl/worksheets/sheet1.xml", sheet_before)]);
    let repaired = make_zip(&[("xl/worksheets/sheet1.xml", sheet_after)]);

    let patterns = classify(&diff(&scan(&candidate).unwrap(), &scan(&repaired).unwrap()));
    assert!(patterns.iter().all(|p| p.name != PatternName::SharedRefTrim));
}

#[test]
fn dxfs_insertion_is_detected_from_the_count_attribute() {
    let styles_before = r#"<styleSheet><dxfs count="3"><dxf/><dxf/><dxf/></dxfs></styleSheet>"#;
    let styles_after = r#"<styleSheet><dxfs count="4"><dxf/><dxf/><dxf/><dxf/></dxfs></styleSheet>"#;

    let candidate = make_zip(&[("xl/styles.xml", styles_before)]);
    let repaired = make_zip(&[("xl/styles.xml", styles_after)]);

    let patterns = classify(&diff(&scan(&candidate).unwrap(), &scan(&repaired).unwrap()));
    assert_eq!(patterns.len(), 1);
    assert_eq!(patterns[0].name, PatternName::DxfsInsertion);
    assert_eq!(patterns[0].confidence, Confidence::High);
    assert_eq!(patterns[0].evidence, vec!["dxfs count: 3 -> 4"]);

    // The derived op needs a human-supplied <dxf> block.
    let recipe = build_recipe("candidate.xlsx", None, Some(&patterns));
    assert_eq!(recipe.patches.len(), 1);
    let PatchAction::AppendBlock { anchor, block, .. } = &recipe.patches[0].action else {
        panic!("expected append_block");
    };
    assert_eq!(anchor, "</dxfs>");
    assert!(xlsx_triage::is_placeholder(block));
}

#[test]
fn cf_dxfid_renumbering_extracts_paired_edits() {
    let styles_before = r#"<styleSheet><dxfs count="3"><dxf/><dxf/><dxf/></dxfs></styleSheet>"#;
    let styles_after = r#"<styleSheet><dxfs count="3"><dxf/><dxf/><dxf/><x/></dxfs></styleSheet>"#;
    let sheet_before = r#"<worksheet><conditionalFormatting sqref="A1"><cfRule type="cellIs" dxfId="5" priority="1"/></conditionalFormatting></worksheet>"#;
    let sheet_after = r#"<worksheet><conditionalFormatting sqref="A1"><cfRule type="cellIs" dxfId="2" priority="1"/></conditionalFormatting></worksheet>"#;

    let candidate = make_zip(&[
        ("xl/styles.xml", styles_before),
        ("xl/worksheets/sheet1.xml", sheet_before),
    ]);
    let repaired = make_zip(&[
        ("xl/styles.xml", styles_after),
        ("xl/worksheets/sheet1.xml", sheet_after),
    ]);

    let patterns = classify(&diff(&scan(&candidate).unwrap(), &scan(&repaired).unwrap()));
    let clone = patterns
        .iter()
        .find(|p| p.name == PatternName::CfDxfidClone)
        .expect("clone pattern");
    assert_eq!(clone.confidence, Confidence::Medium);
    assert_eq!(clone.edits.len(), 1);
    assert_eq!(clone.edits[0].match_, "dxfId=\"5\"");
    assert_eq!(clone.edits[0].replacement, "dxfId=\"2\"");
}

#[test]
fn rels_cleanup_replays_the_repaired_part_verbatim() {
    let rels_before = r#"<?xml version="1.0"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="t" Target="worksheets/sheet1.xml"/><Relationship Id="rId2" Type="t" Target="orphan.xml"/></Relationships>"#;
    let rels_after = r#"<?xml version="1.0"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="t" Target="worksheets/sheet1.xml"/></Relationships>"#;

    let candidate = make_zip(&[
        ("xl/workbook.xml", WORKBOOK),
        ("xl/_rels/workbook.xml.rels", rels_before),
        ("xl/worksheets/sheet1.xml", "<worksheet/>"),
    ]);
    let repaired = make_zip(&[
        ("xl/workbook.xml", WORKBOOK),
        ("xl/_rels/workbook.xml.rels", rels_after),
        ("xl/worksheets/sheet1.xml", "<worksheet/>"),
    ]);

    let patterns = classify(&diff(&scan(&candidate).unwrap(), &scan(&repaired).unwrap()));
    assert_eq!(patterns.len(), 1);
    let pattern = &patterns[0];
    assert_eq!(pattern.name, PatternName::RelsCleanup);
    assert_eq!(pattern.confidence, Confidence::High);
    assert_eq!(pattern.set_parts.len(), 1);
    assert_eq!(pattern.set_parts[0].content, rels_after);

    let recipe = build_recipe("candidate.xlsx", None, Some(&patterns));
    assert_eq!(recipe.patches.len(), 1);
    let (patched, _) = apply(&candidate, &recipe).unwrap();
    let patched_parts = scan(&patched).unwrap();
    assert_eq!(
        patched_parts.get("xl/_rels/workbook.xml.rels").unwrap().bytes,
        rels_after.as_bytes()
    );
}

#[test]
fn shared_strings_rebuild_needs_a_count_change() {
    let sst_before = r#"<sst count="4" uniqueCount="3"><si><t>a</t></si></sst>"#;
    let sst_after = r#"<sst count="4" uniqueCount="2"><si><t>a</t></si></sst>"#;

    let candidate = make_zip(&[("xl/sharedStrings.xml", sst_before)]);
    let repaired = make_zip(&[("xl/sharedStrings.xml", sst_after)]);

    let patterns = classify(&diff(&scan(&candidate).unwrap(), &scan(&repaired).unwrap()));
    assert_eq!(patterns.len(), 1);
    assert_eq!(patterns[0].name, PatternName::SharedStringsRebuild);
    assert_eq!(patterns[0].evidence, vec!["sst uniqueCount: 3 -> 2"]);
}

#[test]
fn table_style_only_changes_classify_low() {
    let table_before = r#"<table id="1" name="T1" ref="A1:B3"><tableStyleInfo name="Custom" showRowStripes="1"/></table>"#;
    let table_after = r#"<table id="1" name="T1" ref="A1:B3"><tableStyleInfo name="TableStyleMedium9" showRowStripes="1"/></table>"#;

    let candidate = make_zip(&[("xl/tables/table1.xml", table_before)]);
    let repaired = make_zip(&[("xl/tables/table1.xml", table_after)]);

    let patterns = classify(&diff(&scan(&candidate).unwrap(), &scan(&repaired).unwrap()));
    assert_eq!(patterns.len(), 1);
    assert_eq!(patterns[0].name, PatternName::TableStyleNorm);
    assert_eq!(patterns[0].confidence, Confidence::Low);
}

#[test]
fn pattern_order_follows_the_fixed_table() {
    let candidate = make_zip(&[
        ("xl/calcChain.xml", "<calcChain/>"),
        ("xl/styles.xml", r#"<styleSheet><dxfs count="1"><dxf/></dxfs></styleSheet>"#),
    ]);
    let repaired = make_zip(&[(
        "xl/styles.xml",
        r#"<styleSheet><dxfs count="2"><dxf/><dxf/></dxfs></styleSheet>"#,
    )]);

    let patterns = classify(&diff(&scan(&candidate).unwrap(), &scan(&repaired).unwrap()));
    let names: Vec<PatternName> = patterns.iter().map(|p| p.name).collect();
    assert_eq!(
        names,
        vec![PatternName::CalcChainDrop, PatternName::DxfsInsertion]
    );
}
