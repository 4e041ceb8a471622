//! XLSX export.
//!
//! Each group becomes one worksheet: row 1 is an empty spacer, row 2 the
//! header (`time` then series labels), then one row per distinct timestamp
//! with elapsed seconds in column A.

use std::collections::BTreeMap;

use chrono::{DateTime, Local, TimeZone};
use serde::Serialize;
use tracing::debug;

use dl_common::{sanitize_text, Result};
use dl_store::Group;

use crate::xml::escape;
use crate::zip::{write_stored, ZipEntry};

/// Excel's sheet name length limit.
const MAX_SHEET_NAME_CHARS: usize = 31;
const FORBIDDEN_SHEET_CHARS: [char; 7] = ['[', ']', '*', '/', '\\', ':', '?'];

/// Prefix of combined multi-group export files.
pub const DEFAULT_COMBINED_PREFIX: &str = "sensor-data";
/// MIME type of the exported workbook.
pub const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

const XML_DECL: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#;
const NS_MAIN: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const NS_REL: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const NS_PACKAGE_REL: &str = "http://schemas.openxmlformats.org/package/2006/relationships";

/// One exported row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableRow {
    pub time_sec: f64,
    pub values: Vec<Option<f64>>,
}

/// A group flattened into a time-ordered table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupTable {
    pub labels: Vec<String>,
    pub rows: Vec<TableRow>,
}

/// Merge a group's series into rows keyed by timestamp.
///
/// Elapsed time is measured from the group's range start (or its earliest
/// sample) and clamped at zero. A series without a sample at a timestamp
/// leaves a blank cell.
pub fn build_group_table(group: &Group) -> GroupTable {
    let labels: Vec<String> = group.series().iter().map(|s| s.label().to_string()).collect();
    let mut by_time: BTreeMap<i64, Vec<Option<f64>>> = BTreeMap::new();
    let mut min_time: Option<i64> = None;

    for (index, series) in group.series().iter().enumerate() {
        for sample in series.samples() {
            if !sample.v.is_finite() {
                continue;
            }
            min_time = Some(min_time.map_or(sample.t, |m| m.min(sample.t)));
            by_time
                .entry(sample.t)
                .or_insert_with(|| vec![None; labels.len()])[index] = Some(sample.v);
        }
    }

    let start = group
        .range()
        .map(|r| r.start)
        .or(min_time)
        .unwrap_or(0);

    let rows = by_time
        .into_iter()
        .map(|(t, values)| TableRow {
            time_sec: (t.saturating_sub(start) as f64 / 1000.0).max(0.0),
            values,
        })
        .collect();

    GroupTable { labels, rows }
}

/// Elapsed seconds as shown in column A: `0s`, `12s`, `1.5s`, `2.25s`.
pub fn format_seconds(sec: f64) -> String {
    if !sec.is_finite() {
        return String::new();
    }
    if sec == 0.0 {
        return "0s".to_string();
    }
    if sec.fract() == 0.0 {
        return format!("{:.0}s", sec);
    }
    let fixed = format!("{:.2}", sec);
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    format!("{}s", trimmed)
}

/// Spreadsheet column letters for a zero-based index: 0 → A, 26 → AA.
pub fn column_name(index: usize) -> String {
    let mut letters = Vec::new();
    let mut num = index + 1;
    while num > 0 {
        let rem = (num - 1) % 26;
        letters.push(b'A' + rem as u8);
        num = (num - 1) / 26;
    }
    letters.reverse();
    String::from_utf8_lossy(&letters).into_owned()
}

/// Worksheet name for a group: sanitized, forbidden characters stripped,
/// at most 31 characters, `Group <index+1>` when nothing is left.
pub fn safe_sheet_name(name: &str, index: usize) -> String {
    let fallback = format!("Group {}", index + 1);
    let cleaned: String = sanitize_text(name)
        .chars()
        .filter(|c| !FORBIDDEN_SHEET_CHARS.contains(c))
        .take(MAX_SHEET_NAME_CHARS)
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        fallback
    } else {
        cleaned.to_string()
    }
}

fn inline_cell(out: &mut String, row: usize, col: usize, text: &str) {
    out.push_str(&format!(
        r#"<c r="{}{}" t="inlineStr"><is><t>{}</t></is></c>"#,
        column_name(col),
        row,
        escape(text)
    ));
}

fn number_cell(out: &mut String, row: usize, col: usize, value: f64) {
    out.push_str(&format!(r#"<c r="{}{}"><v>{}</v></c>"#, column_name(col), row, value));
}

pub fn build_sheet_xml(table: &GroupTable) -> String {
    let mut rows = String::from(r#"<row r="1"/>"#);

    rows.push_str(r#"<row r="2">"#);
    inline_cell(&mut rows, 2, 0, "time");
    for (col, label) in table.labels.iter().enumerate() {
        inline_cell(&mut rows, 2, col + 1, label);
    }
    rows.push_str("</row>");

    for (offset, row) in table.rows.iter().enumerate() {
        let row_index = offset + 3;
        rows.push_str(&format!(r#"<row r="{}">"#, row_index));
        inline_cell(&mut rows, row_index, 0, &format_seconds(row.time_sec));
        for (col, value) in row.values.iter().enumerate() {
            if let Some(value) = value.filter(|v| v.is_finite()) {
                number_cell(&mut rows, row_index, col + 1, value);
            }
        }
        rows.push_str("</row>");
    }

    format!(
        r#"{}<worksheet xmlns="{}"><sheetData>{}</sheetData></worksheet>"#,
        XML_DECL, NS_MAIN, rows
    )
}

pub fn build_workbook_xml(sheet_names: &[String]) -> String {
    let sheets: String = sheet_names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            format!(
                r#"<sheet name="{}" sheetId="{}" r:id="rId{}"/>"#,
                escape(name),
                i + 1,
                i + 1
            )
        })
        .collect();
    format!(
        r#"{}<workbook xmlns="{}" xmlns:r="{}"><sheets>{}</sheets></workbook>"#,
        XML_DECL, NS_MAIN, NS_REL, sheets
    )
}

pub fn build_workbook_rels_xml(sheet_count: usize) -> String {
    let mut rels: String = (1..=sheet_count)
        .map(|n| {
            format!(
                r#"<Relationship Id="rId{}" Type="{}/worksheet" Target="worksheets/sheet{}.xml"/>"#,
                n, NS_REL, n
            )
        })
        .collect();
    rels.push_str(&format!(
        r#"<Relationship Id="rId{}" Type="{}/styles" Target="styles.xml"/>"#,
        sheet_count + 1,
        NS_REL
    ));
    format!(
        r#"{}<Relationships xmlns="{}">{}</Relationships>"#,
        XML_DECL, NS_PACKAGE_REL, rels
    )
}

pub fn build_root_rels_xml() -> String {
    format!(
        r#"{}<Relationships xmlns="{}"><Relationship Id="rId1" Type="{}/officeDocument" Target="xl/workbook.xml"/></Relationships>"#,
        XML_DECL, NS_PACKAGE_REL, NS_REL
    )
}

pub fn build_content_types_xml(sheet_count: usize) -> String {
    let overrides: String = (1..=sheet_count)
        .map(|n| {
            format!(
                r#"<Override PartName="/xl/worksheets/sheet{}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#,
                n
            )
        })
        .collect();
    format!(
        concat!(
            "{}",
            r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">"#,
            r#"<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>"#,
            r#"<Default Extension="xml" ContentType="application/xml"/>"#,
            r#"<Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>"#,
            r#"<Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/>"#,
            "{}</Types>"
        ),
        XML_DECL, overrides
    )
}

pub fn build_styles_xml() -> String {
    format!(
        concat!(
            "{}",
            r#"<styleSheet xmlns="{}">"#,
            r#"<fonts count="1"><font><sz val="11"/><color theme="1"/><name val="Calibri"/><family val="2"/></font></fonts>"#,
            r#"<fills count="1"><fill><patternFill patternType="none"/></fill></fills>"#,
            r#"<borders count="1"><border><left/><right/><top/><bottom/><diagonal/></border></borders>"#,
            r#"<cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs>"#,
            r#"<cellXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/></cellXfs>"#,
            r#"<cellStyles count="1"><cellStyle name="Normal" xfId="0" builtinId="0"/></cellStyles>"#,
            "</styleSheet>"
        ),
        XML_DECL, NS_MAIN
    )
}

/// Build a workbook with one sheet per group, in order.
pub fn build_xlsx(groups: &[&Group]) -> Result<Vec<u8>> {
    let mut names = Vec::with_capacity(groups.len());
    let mut sheets = Vec::with_capacity(groups.len());
    for (index, group) in groups.iter().enumerate() {
        let table = build_group_table(group);
        debug!(
            group = %group.id(),
            rows = table.rows.len(),
            columns = table.labels.len() + 1,
            "sheet built"
        );
        names.push(safe_sheet_name(group.name(), index));
        sheets.push(build_sheet_xml(&table));
    }

    let mut entries = vec![
        ZipEntry::new("[Content_Types].xml", build_content_types_xml(sheets.len())),
        ZipEntry::new("_rels/.rels", build_root_rels_xml()),
        ZipEntry::new("xl/workbook.xml", build_workbook_xml(&names)),
        ZipEntry::new("xl/_rels/workbook.xml.rels", build_workbook_rels_xml(sheets.len())),
        ZipEntry::new("xl/styles.xml", build_styles_xml()),
    ];
    for (index, xml) in sheets.into_iter().enumerate() {
        entries.push(ZipEntry::new(format!("xl/worksheets/sheet{}.xml", index + 1), xml));
    }
    write_stored(&entries)
}

/// `YYYYMMDD-HHMM` in the given time zone.
pub fn date_stamp<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    now.format("%Y%m%d-%H%M").to_string()
}

/// Stamp for the current local time.
pub fn local_date_stamp() -> String {
    date_stamp(&Local::now())
}

/// File name for a single-group export.
pub fn group_export_filename(group_name: &str, index: usize, stamp: &str) -> String {
    format!("{}-{}.xlsx", safe_sheet_name(group_name, index), stamp)
}

/// File name for a combined export of several groups.
pub fn combined_export_filename(prefix: &str, stamp: &str) -> String {
    let prefix = prefix.trim();
    let prefix = if prefix.is_empty() {
        DEFAULT_COMBINED_PREFIX
    } else {
        prefix
    };
    format!("{}-{}.xlsx", prefix, stamp)
}
