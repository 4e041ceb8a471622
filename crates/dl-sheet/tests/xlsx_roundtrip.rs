//! Export/import round trips and cross-checks against an independent ZIP
//! implementation.

use std::io::{Cursor, Read, Write};

use dl_common::{DecodeStage, Error};
use dl_sheet::{build_import_payload, build_xlsx, decode_file, encoder::build_styles_xml};
use dl_store::{Group, TimeSeriesStore};

const T0: i64 = 1_700_000_000_000;

/// A store whose first group holds one series `x` with the given samples.
fn store_with_x(samples: &[(i64, f64)]) -> TimeSeriesStore {
    let mut store = TimeSeriesStore::new();
    let group = store.groups()[0].id().clone();
    let series = store.groups()[0].series()[0].id().clone();
    store.rename_series(&series, "x").unwrap();
    for &(t, v) in samples {
        store.add_point(&group, &series, v, t).unwrap();
    }
    store
}

fn first_group(store: &TimeSeriesStore) -> &Group {
    &store.groups()[0]
}

#[test]
fn exported_sheet_has_expected_rows() {
    let store = store_with_x(&[(T0, 1.0), (T0 + 1000, 2.0)]);
    let bytes = build_xlsx(&[first_group(&store)]).unwrap();

    let mut archive = zip::ZipArchive::new(Cursor::new(&bytes)).unwrap();
    let mut sheet = String::new();
    archive
        .by_name("xl/worksheets/sheet1.xml")
        .unwrap()
        .read_to_string(&mut sheet)
        .unwrap();
    assert!(sheet.contains("<t>time</t>"));
    assert!(sheet.contains("<t>x</t>"));
    assert!(sheet.contains(r#"<c r="A3" t="inlineStr"><is><t>0s</t></is></c><c r="B3"><v>1</v></c>"#));
    assert!(sheet.contains(r#"<c r="A4" t="inlineStr"><is><t>1s</t></is></c><c r="B4"><v>2</v></c>"#));

    let tables = decode_file(&bytes, "export.xlsx").unwrap();
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].labels, vec!["x"]);
    let rows: Vec<(f64, Vec<Option<f64>>)> = tables[0]
        .rows
        .iter()
        .map(|r| (r.time_sec, r.values.clone()))
        .collect();
    assert_eq!(rows, vec![(0.0, vec![Some(1.0)]), (1.0, vec![Some(2.0)])]);
}

#[test]
fn independent_reader_accepts_container() {
    let store = store_with_x(&[(T0, 1.0)]);
    let bytes = build_xlsx(&[first_group(&store)]).unwrap();

    let mut archive = zip::ZipArchive::new(Cursor::new(&bytes)).unwrap();
    let names: Vec<String> = archive.file_names().map(str::to_string).collect();
    for part in [
        "[Content_Types].xml",
        "_rels/.rels",
        "xl/workbook.xml",
        "xl/_rels/workbook.xml.rels",
        "xl/styles.xml",
        "xl/worksheets/sheet1.xml",
    ] {
        assert!(names.iter().any(|n| n == part), "missing {part}");
    }

    // Reading every entry to the end verifies each CRC.
    for index in 0..archive.len() {
        let mut file = archive.by_index(index).unwrap();
        let mut content = Vec::new();
        file.read_to_end(&mut content).unwrap();
        assert_eq!(content.len() as u64, file.size());
    }

    let mut styles = String::new();
    archive
        .by_name("xl/styles.xml")
        .unwrap()
        .read_to_string(&mut styles)
        .unwrap();
    assert_eq!(styles, build_styles_xml());
}

#[test]
fn round_trip_reconstructs_group() {
    let samples = [(T0, 1.0), (T0 + 1000, 2.0), (T0 + 2345, -3.25)];
    let store = store_with_x(&samples);
    let bytes = build_xlsx(&[first_group(&store)]).unwrap();

    let now = T0 + 60_000;
    let tables = decode_file(&bytes, "run.xlsx").unwrap();
    let restored = TimeSeriesStore::from_snapshot(&build_import_payload(&tables, now));

    assert_eq!(restored.groups().len(), 1);
    let series = &restored.groups()[0].series()[0];
    assert_eq!(series.label(), "x");
    assert_eq!(series.samples().len(), 3);

    // Times are re-anchored at `now`; spacing and values survive.
    let shift = now - (T0 + 2345);
    for (sample, &(t, v)) in series.samples().iter().zip(samples.iter()) {
        assert!(((sample.t - shift - t) as f64).abs() <= 10.0);
        assert!((sample.v - v).abs() < 0.01);
    }
}

#[test]
fn labels_from_two_files_stay_unique() {
    let first = store_with_x(&[(T0, 1.0)]);
    let second = store_with_x(&[(T0, 5.0)]);
    let mut tables = decode_file(&build_xlsx(&[first_group(&first)]).unwrap(), "a.xlsx").unwrap();
    tables.extend(decode_file(&build_xlsx(&[first_group(&second)]).unwrap(), "b.xlsx").unwrap());

    let snapshot = build_import_payload(&tables, T0);
    assert_eq!(snapshot.groups.len(), 2);
    assert_eq!(snapshot.groups[0].series[0].label, "x");
    assert_eq!(snapshot.groups[1].series[0].label, "x_1");
    assert_eq!(snapshot.groups[1].name, "Group 1_1");
}

fn deflated_workbook(sheet_xml: &str) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    let parts = [
        (
            "xl/workbook.xml",
            r#"<workbook xmlns:r="r"><sheets><sheet name="Field" sheetId="1" r:id="rId7"/></sheets></workbook>"#.to_string(),
        ),
        (
            "xl/_rels/workbook.xml.rels",
            r#"<Relationships><Relationship Id="rId7" Target="/xl/worksheets/data.xml"/></Relationships>"#.to_string(),
        ),
        (
            "xl/sharedStrings.xml",
            "<sst><si><t>time</t></si><si><t>pressure</t></si></sst>".to_string(),
        ),
        ("xl/worksheets/data.xml", sheet_xml.to_string()),
    ];
    for (name, xml) in parts {
        writer.start_file(name, options).unwrap();
        writer.write_all(xml.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

#[test]
fn deflate_workbook_from_other_writer_decodes() {
    let sheet = concat!(
        r#"<worksheet><sheetData>"#,
        r#"<row r="2"><c r="A2" t="s"><v>0</v></c><c r="B2" t="s"><v>1</v></c></row>"#,
        r#"<row r="3"><c r="A3"><v>0</v></c><c r="B3"><v>1013.25</v></c></row>"#,
        r#"<row r="5"><c r="A5"><v>2.5</v></c><c r="B5"><v>1012</v></c></row>"#,
        r#"</sheetData></worksheet>"#
    );
    let bytes = deflated_workbook(sheet);
    let tables = decode_file(&bytes, "field.xlsx").unwrap();
    assert_eq!(tables[0].name, "Field");
    assert_eq!(tables[0].labels, vec!["pressure"]);
    assert_eq!(tables[0].rows.len(), 2);
    assert_eq!(tables[0].rows[1].time_sec, 2.5);
    assert_eq!(tables[0].rows[1].values, vec![Some(1012.0)]);
}

#[test]
fn failures_carry_their_stage() {
    let bytes = deflated_workbook("<worksheet><sheetData><row r=\"2\"><c><v>x</v></c></row></sheetData></worksheet>");
    let err = decode_file(&bytes, "field.xlsx").unwrap_err();
    assert_eq!(err.stage(), Some(&DecodeStage::SheetParse("Field".into())));
    assert!(matches!(err.root(), Error::MalformedImport(_)));

    let err = decode_file(b"not a zip", "broken.xlsx").unwrap_err();
    assert_eq!(err.stage(), Some(&DecodeStage::Container));
}

#[test]
fn multi_group_export_names_sheets() {
    let mut store = store_with_x(&[(T0, 1.0)]);
    let lab = store.create_group(Some("Lab/2"));
    let series = store.group(&lab).unwrap().series()[0].id().clone();
    store.add_point(&lab, &series, 4.0, T0 + 500).unwrap();

    let groups: Vec<&Group> = store.groups().iter().collect();
    let bytes = build_xlsx(&groups).unwrap();
    let tables = decode_file(&bytes, "all.xlsx").unwrap();
    let names: Vec<&str> = tables.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["Group 1", "Lab2"]);
}
