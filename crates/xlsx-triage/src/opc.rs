//! Open Packaging Convention path plumbing.
//!
//! Part names are ZIP entry names: forward-slash separated, no leading
//! slash. Relationship targets are URIs relative to the *source* part of
//! the `.rels` file that declares them, so resolving a target needs the
//! `.rels` -> source-part mapping as well as `.`/`..` normalization.

/// Normalize an OPC path: forward slashes, no leading `/`, `.`/`..`
/// segments resolved.
pub fn normalize_part_name(part_name: &str) -> String {
    normalize_path(part_name.trim_start_matches('/'))
}

fn normalize_path(path: &str) -> String {
    let normalized = path.replace('\\', "/");
    let mut out: Vec<&str> = Vec::new();
    for segment in normalized.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            _ => out.push(segment),
        }
    }
    out.join("/")
}

/// The `.rels` part that holds relationships for `part` (e.g.
/// `xl/workbook.xml` -> `xl/_rels/workbook.xml.rels`).
pub fn rels_part_for(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file_name)) => format!("{dir}/_rels/{file_name}.rels"),
        None => format!("_rels/{part}.rels"),
    }
}

/// The source part a `.rels` part describes (`xl/_rels/workbook.xml.rels`
/// -> `xl/workbook.xml`). The package-level `_rels/.rels` maps to the
/// package root, returned as an empty string.
pub fn source_part_for_rels(rels_part: &str) -> String {
    if rels_part == "_rels/.rels" {
        return String::new();
    }

    if let Some(rels_file) = rels_part.strip_prefix("_rels/") {
        return normalize_path(rels_file.strip_suffix(".rels").unwrap_or(rels_file));
    }

    if let Some((dir, rels_file)) = rels_part.rsplit_once("/_rels/") {
        let rels_file = rels_file.strip_suffix(".rels").unwrap_or(rels_file);
        if dir.is_empty() {
            return normalize_path(rels_file);
        }
        return normalize_path(&format!("{dir}/{rels_file}"));
    }

    normalize_path(rels_part.strip_suffix(".rels").unwrap_or(rels_part))
}

fn rels_base_dir(rels_part: &str) -> String {
    if rels_part.starts_with("_rels/") {
        return String::new();
    }

    if let Some(pos) = rels_part.rfind("/_rels/") {
        return rels_part[..pos + 1].to_string();
    }

    String::new()
}

/// Resolve a relationship `Target` declared inside `rels_part` to a
/// normalized part name.
///
/// Internal targets may carry a URI fragment (`foo.xml#bar`); OPC part
/// names never do, so the fragment is stripped before resolving. A target
/// of just `#fragment` refers to the relationship source part itself.
pub fn resolve_relationship_target(rels_part: &str, target: &str) -> String {
    let target = target.replace('\\', "/");
    let target = target.split_once('#').map(|(t, _)| t).unwrap_or(&target);
    if target.is_empty() {
        return source_part_for_rels(rels_part);
    }
    if let Some(rest) = target.strip_prefix('/') {
        return normalize_path(rest);
    }

    let base_dir = rels_base_dir(rels_part);
    normalize_path(&format!("{base_dir}{target}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_relative_targets_against_the_rels_source_dir() {
        assert_eq!(
            resolve_relationship_target("xl/_rels/workbook.xml.rels", "worksheets/sheet1.xml"),
            "xl/worksheets/sheet1.xml"
        );
        assert_eq!(
            resolve_relationship_target("_rels/.rels", "xl/workbook.xml"),
            "xl/workbook.xml"
        );
        assert_eq!(
            resolve_relationship_target("xl/_rels/workbook.xml.rels", "../docProps/core.xml"),
            "docProps/core.xml"
        );
    }

    #[test]
    fn strips_uri_fragments_before_resolving() {
        assert_eq!(
            resolve_relationship_target("xl/_rels/workbook.xml.rels", "worksheets/sheet1.xml#frag"),
            "xl/worksheets/sheet1.xml"
        );
        assert_eq!(
            resolve_relationship_target("xl/_rels/workbook.xml.rels", "/xl/media/image1.png#frag"),
            "xl/media/image1.png"
        );
        assert_eq!(
            resolve_relationship_target("xl/_rels/workbook.xml.rels", "#frag"),
            "xl/workbook.xml"
        );
        assert_eq!(resolve_relationship_target("_rels/.rels", "#frag"), "");
    }

    #[test]
    fn maps_rels_parts_back_to_their_source() {
        assert_eq!(
            source_part_for_rels("xl/worksheets/_rels/sheet1.xml.rels"),
            "xl/worksheets/sheet1.xml"
        );
        assert_eq!(source_part_for_rels("_rels/.rels"), "");
        assert_eq!(rels_part_for("xl/workbook.xml"), "xl/_rels/workbook.xml.rels");
    }

    #[test]
    fn normalizes_backslashes_and_dot_segments() {
        assert_eq!(normalize_part_name("/xl\\worksheets/./sheet1.xml"), "xl/worksheets/sheet1.xml");
        assert_eq!(normalize_part_name("xl/a/../styles.xml"), "xl/styles.xml");
    }
}
