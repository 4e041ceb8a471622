//! Office Open XML workbooks.
//!
//! Decoding runs in stages and every failure is tagged with the stage it
//! happened in, so "the file is broken" can be narrowed down to the
//! container, the workbook parts, or a specific sheet.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use dl_common::{DecodeStage, Error, Result};

use super::{rows_to_table, DecodedTable};
use crate::xml::{local_name, XmlEvent, XmlReader};
use crate::zip::ZipArchive;

const WORKBOOK_PART: &str = "xl/workbook.xml";
const WORKBOOK_RELS_PART: &str = "xl/_rels/workbook.xml.rels";
const SHARED_STRINGS_PART: &str = "xl/sharedStrings.xml";

/// Largest addressable row and column in a worksheet.
const MAX_ROWS: usize = 1_048_576;
const MAX_COLUMNS: usize = 16_384;

/// Zero-based column index from cell reference letters: `A` → 0, `AA` → 26.
///
/// Lowercase letters are accepted; anything else is ignored.
pub fn column_letters_to_index(letters: &str) -> usize {
    let index = letters
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .fold(0usize, |acc, c| {
            acc.saturating_mul(26)
                .saturating_add((c.to_ascii_uppercase() as u8 - b'A') as usize + 1)
        });
    index.saturating_sub(1)
}

struct SheetRef {
    name: String,
    rel_id: Option<String>,
}

fn parse_workbook(xml: &str) -> Result<Vec<SheetRef>> {
    let mut sheets = Vec::new();
    for event in XmlReader::new(xml) {
        if let XmlEvent::Start(tag) = event? {
            if tag.is("sheet") {
                let name = tag
                    .attr("name")
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .unwrap_or("Group")
                    .to_string();
                sheets.push(SheetRef {
                    name,
                    rel_id: tag.attr("r:id").map(str::to_string),
                });
            }
        }
    }
    if sheets.is_empty() {
        return Err(Error::MalformedImport("workbook lists no sheets".into()));
    }
    Ok(sheets)
}

fn parse_relationships(xml: &str) -> Result<HashMap<String, String>> {
    let mut targets = HashMap::new();
    for event in XmlReader::new(xml) {
        if let XmlEvent::Start(tag) = event? {
            if tag.is("Relationship") {
                if let (Some(id), Some(target)) = (tag.attr("Id"), tag.attr("Target")) {
                    targets.insert(id.to_string(), target.to_string());
                }
            }
        }
    }
    Ok(targets)
}

/// Each `si` item is the concatenation of all its `t` runs.
fn parse_shared_strings(xml: &str) -> Result<Vec<String>> {
    let mut strings = Vec::new();
    let mut item: Option<String> = None;
    let mut in_text = false;
    for event in XmlReader::new(xml) {
        match event? {
            XmlEvent::Start(tag) => match tag.local_name() {
                "si" if tag.self_closing => strings.push(String::new()),
                "si" => item = Some(String::new()),
                "t" => in_text = !tag.self_closing,
                _ => {}
            },
            XmlEvent::Text(text) => {
                if in_text {
                    if let Some(item) = item.as_mut() {
                        item.push_str(&text);
                    }
                }
            }
            XmlEvent::End(name) => match local_name(name) {
                "si" => strings.extend(item.take()),
                "t" => in_text = false,
                _ => {}
            },
        }
    }
    Ok(strings)
}

#[derive(Default)]
struct CellState {
    col: usize,
    kind: Option<String>,
    value: String,
    inline: String,
}

/// Worksheet XML to a grid of strings, rows and cells placed by reference.
fn parse_sheet_rows(xml: &str, shared: &[String]) -> Result<Vec<Vec<String>>> {
    let mut rows: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    let mut row: Option<(usize, Vec<String>)> = None;
    let mut cell: Option<CellState> = None;
    let mut collecting: Option<&'static str> = None;

    let next_row_index = |rows: &BTreeMap<usize, Vec<String>>| {
        rows.keys().next_back().map_or(1, |last| last + 1)
    };

    for event in XmlReader::new(xml) {
        match event? {
            XmlEvent::Start(tag) => match tag.local_name() {
                "row" => {
                    let index = match tag.attr("r") {
                        Some(r) => r
                            .trim()
                            .parse::<usize>()
                            .ok()
                            .filter(|i| (1..=MAX_ROWS).contains(i))
                            .ok_or_else(|| Error::MalformedImport(format!("invalid row reference {:?}", r)))?,
                        None => next_row_index(&rows),
                    };
                    if tag.self_closing {
                        rows.insert(index, Vec::new());
                    } else {
                        row = Some((index, Vec::new()));
                    }
                }
                "c" => {
                    let Some((_, cells)) = row.as_ref() else {
                        continue;
                    };
                    let letters: String = tag
                        .attr("r")
                        .unwrap_or("")
                        .chars()
                        .filter(|c| !c.is_ascii_digit())
                        .collect();
                    let col = if letters.is_empty() {
                        cells.len()
                    } else {
                        column_letters_to_index(&letters)
                    };
                    if col >= MAX_COLUMNS {
                        return Err(Error::MalformedImport(format!("column {} out of range", letters)));
                    }
                    let state = CellState {
                        col,
                        kind: tag.attr("t").map(str::to_string),
                        ..CellState::default()
                    };
                    if tag.self_closing {
                        place_cell(&mut row, state, shared);
                    } else {
                        cell = Some(state);
                    }
                }
                "v" if cell.is_some() && !tag.self_closing => collecting = Some("v"),
                "t" if cell.is_some() && !tag.self_closing => collecting = Some("t"),
                _ => {}
            },
            XmlEvent::Text(text) => {
                if let (Some(which), Some(state)) = (collecting, cell.as_mut()) {
                    match which {
                        "v" => state.value.push_str(&text),
                        _ => state.inline.push_str(&text),
                    }
                }
            }
            XmlEvent::End(name) => match local_name(name) {
                "v" | "t" => collecting = None,
                "c" => {
                    if let Some(state) = cell.take() {
                        place_cell(&mut row, state, shared);
                    }
                }
                "row" => {
                    if let Some((index, cells)) = row.take() {
                        rows.insert(index, cells);
                    }
                }
                _ => {}
            },
        }
    }

    // Only the spacer and header positions matter; later gaps are blank rows
    // which the row grammar skips anyway.
    let mut grid = Vec::with_capacity(rows.len() + 2);
    for (index, cells) in rows {
        while grid.len() < (index - 1).min(2) {
            grid.push(Vec::new());
        }
        grid.push(cells);
    }
    Ok(grid)
}

fn place_cell(row: &mut Option<(usize, Vec<String>)>, state: CellState, shared: &[String]) {
    let Some((_, cells)) = row.as_mut() else {
        return;
    };
    let text = match state.kind.as_deref() {
        Some("inlineStr") => state.inline,
        Some("s") => state
            .value
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|i| shared.get(i).cloned())
            .unwrap_or_default(),
        _ => state.value,
    };
    if cells.len() <= state.col {
        cells.resize(state.col + 1, String::new());
    }
    cells[state.col] = text;
}

fn resolve_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{}", target),
    }
}

fn read_required(zip: &ZipArchive<'_>, part: &str) -> Result<String> {
    zip.read_text(part)?.ok_or_else(|| Error::MissingRequiredPart {
        part: part.to_string(),
    })
}

/// Decode every sheet of a workbook.
pub fn decode_xlsx(bytes: &[u8]) -> Result<Vec<DecodedTable>> {
    let zip = ZipArchive::parse(bytes).map_err(|e| e.at_stage(DecodeStage::Container))?;

    let workbook_xml =
        read_required(&zip, WORKBOOK_PART).map_err(|e| e.at_stage(DecodeStage::WorkbookParts))?;
    let rels_xml =
        read_required(&zip, WORKBOOK_RELS_PART).map_err(|e| e.at_stage(DecodeStage::WorkbookParts))?;

    let sheets = parse_workbook(&workbook_xml).map_err(|e| e.at_stage(DecodeStage::Workbook))?;
    let targets =
        parse_relationships(&rels_xml).map_err(|e| e.at_stage(DecodeStage::Relationships))?;

    let shared = match zip
        .read_text(SHARED_STRINGS_PART)
        .map_err(|e| e.at_stage(DecodeStage::SharedStrings))?
    {
        Some(xml) => parse_shared_strings(&xml).map_err(|e| e.at_stage(DecodeStage::SharedStrings))?,
        None => Vec::new(),
    };
    debug!(
        sheets = sheets.len(),
        relationships = targets.len(),
        shared_strings = shared.len(),
        "workbook parts read"
    );

    let mut tables = Vec::with_capacity(sheets.len());
    for sheet in sheets {
        let target = sheet
            .rel_id
            .as_deref()
            .and_then(|id| targets.get(id))
            .ok_or_else(|| {
                Error::MalformedRelationship(format!(
                    "sheet {:?} has no relationship target",
                    sheet.name
                ))
                .at_stage(DecodeStage::Relationships)
            })?;
        let path = resolve_target(target);

        let xml = read_required(&zip, &path)
            .map_err(|e| e.at_stage(DecodeStage::SheetLoad(sheet.name.clone())))?;
        let table = parse_sheet_rows(&xml, &shared)
            .and_then(|rows| rows_to_table(&rows, &sheet.name))
            .map_err(|e| e.at_stage(DecodeStage::SheetParse(sheet.name.clone())))?;
        debug!(sheet = %sheet.name, part = %path, rows = table.rows.len(), "sheet decoded");
        tables.push(table);
    }

    if tables.is_empty() {
        return Err(Error::MalformedImport("workbook contains no data".into()));
    }
    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip::{write_stored, ZipEntry};

    const WORKBOOK: &str = r#"<workbook xmlns:r="x"><sheets><sheet name="One" sheetId="1" r:id="rId1"/></sheets></workbook>"#;
    const RELS: &str = r#"<Relationships><Relationship Id="rId1" Target="worksheets/sheet1.xml"/></Relationships>"#;
    const SHEET: &str = r#"<worksheet><sheetData><row r="2"><c r="A2" t="s"><v>0</v></c><c r="C2" t="inlineStr"><is><t>b</t></is></c></row><row r="3"><c r="A3"><v>1.5</v></c><c r="C3"><v>4</v></c></row></sheetData></worksheet>"#;

    fn workbook(parts: &[(&str, &str)]) -> Vec<u8> {
        let entries: Vec<ZipEntry> = parts
            .iter()
            .map(|(name, xml)| ZipEntry::new(*name, xml.as_bytes().to_vec()))
            .collect();
        write_stored(&entries).unwrap()
    }

    #[test]
    fn test_column_letters_to_index() {
        assert_eq!(column_letters_to_index("A"), 0);
        assert_eq!(column_letters_to_index("Z"), 25);
        assert_eq!(column_letters_to_index("AA"), 26);
        assert_eq!(column_letters_to_index("zz"), 701);
        assert_eq!(column_letters_to_index("AAA"), 702);
        assert_eq!(column_letters_to_index(""), 0);
    }

    #[test]
    fn test_decodes_shared_and_inline_strings() {
        let bytes = workbook(&[
            (WORKBOOK_PART, WORKBOOK),
            (WORKBOOK_RELS_PART, RELS),
            (SHARED_STRINGS_PART, "<sst><si><t>ti</t><r><t>me</t></r></si></sst>"),
            ("xl/worksheets/sheet1.xml", SHEET),
        ]);
        let tables = decode_xlsx(&bytes).unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].name, "One");
        assert_eq!(tables[0].labels, vec!["b"]);
        assert_eq!(tables[0].rows[0].time_sec, 1.5);
        assert_eq!(tables[0].rows[0].values, vec![Some(4.0)]);
    }

    #[test]
    fn test_missing_workbook_part() {
        let bytes = workbook(&[(WORKBOOK_RELS_PART, RELS)]);
        let err = decode_xlsx(&bytes).unwrap_err();
        assert_eq!(err.stage(), Some(&DecodeStage::WorkbookParts));
        assert!(matches!(err.root(), Error::MissingRequiredPart { .. }));
    }

    #[test]
    fn test_missing_relationship_and_sheet_part() {
        let no_rel = workbook(&[
            (WORKBOOK_PART, WORKBOOK),
            (WORKBOOK_RELS_PART, "<Relationships/>"),
        ]);
        let err = decode_xlsx(&no_rel).unwrap_err();
        assert!(matches!(err.root(), Error::MalformedRelationship(_)));

        let no_sheet = workbook(&[(WORKBOOK_PART, WORKBOOK), (WORKBOOK_RELS_PART, RELS)]);
        let err = decode_xlsx(&no_sheet).unwrap_err();
        assert_eq!(err.stage(), Some(&DecodeStage::SheetLoad("One".into())));
        assert!(matches!(err.root(), Error::MissingRequiredPart { .. }));
    }

    #[test]
    fn test_sheet_parse_stage_names_the_sheet() {
        let bytes = workbook(&[
            (WORKBOOK_PART, WORKBOOK),
            (WORKBOOK_RELS_PART, RELS),
            ("xl/worksheets/sheet1.xml", "<worksheet><sheetData><row r=\"2\"><c><v>nope</v></c></row></sheetData></worksheet>"),
        ]);
        let err = decode_xlsx(&bytes).unwrap_err();
        assert_eq!(err.stage(), Some(&DecodeStage::SheetParse("One".into())));
    }

    #[test]
    fn test_absolute_targets() {
        assert_eq!(resolve_target("/xl/worksheets/a.xml"), "xl/worksheets/a.xml");
        assert_eq!(resolve_target("worksheets/a.xml"), "xl/worksheets/a.xml");
    }

    #[test]
    fn test_rows_without_reference_follow_previous() {
        let xml = "<sheetData><row/><row><c><v>time</v></c><c><v>a</v></c></row><row><c><v>0</v></c><c><v>1</v></c></row></sheetData>";
        let rows = parse_sheet_rows(xml, &[]).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1], vec!["time".to_string(), "a".to_string()]);
    }
}
