//! Property-based tests for the spreadsheet codecs.

use dl_sheet::decoder::column_letters_to_index;
use dl_sheet::{build_import_payload, build_xlsx, column_name, decode_file, FileSource};
use dl_store::TimeSeriesStore;
use proptest::prelude::*;

const T0: i64 = 1_700_000_000_000;

proptest! {
    #[test]
    fn column_letters_invert_column_name(index in 0usize..100_000) {
        prop_assert_eq!(column_letters_to_index(&column_name(index)), index);
    }

    #[test]
    fn whole_second_samples_survive_export_and_import(
        values in proptest::collection::vec(-1.0e6f64..1.0e6, 1..40),
    ) {
        let mut store = TimeSeriesStore::new();
        let group = store.groups()[0].id().clone();
        let series = store.groups()[0].series()[0].id().clone();
        store.rename_series(&series, "x").unwrap();
        for (k, v) in values.iter().enumerate() {
            store.add_point(&group, &series, *v, T0 + k as i64 * 1000).unwrap();
        }

        let bytes = build_xlsx(&[&store.groups()[0]]).unwrap();
        let tables = decode_file(&bytes, "export.xlsx").unwrap();
        let now = T0 + (values.len() as i64 - 1) * 1000;
        let restored = TimeSeriesStore::from_snapshot(&build_import_payload(&tables, now));

        let samples = restored.series_by_label("x").unwrap().samples();
        prop_assert_eq!(samples.len(), values.len());
        for (k, (sample, v)) in samples.iter().zip(&values).enumerate() {
            prop_assert_eq!(sample.t, T0 + k as i64 * 1000);
            prop_assert!((sample.v - v).abs() <= 0.01);
        }
    }

    #[test]
    fn csv_import_never_panics(text in "[0-9a-z,;\"\\n\\r .-]{0,200}") {
        let _ = decode_file(text.as_bytes(), "fuzz.csv");
    }
}

#[test]
fn file_source_reads_from_disk() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("bench run.csv");
    std::fs::write(&path, "\ntime,temp\n0s,20\n1s,21\n").unwrap();

    let source = FileSource::read(&path).unwrap();
    assert_eq!(source.name, "bench run.csv");
    let tables = source.decode().unwrap();
    assert_eq!(tables[0].name, "bench run");
    assert_eq!(tables[0].rows.len(), 2);
}
