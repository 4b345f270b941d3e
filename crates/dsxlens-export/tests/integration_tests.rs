//! Integration tests for export parsing and the document store

use dsxlens_export::{parse_documents, DocumentStore, ExportFile, ParseError, PropertyValue, RecordPath};
use pretty_assertions::assert_eq;
use std::path::Path;

fn fixture(name: &str) -> String {
    let path = Path::new("../../fixtures/exports").join(name);
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("failed to read {}: {e}", path.display()))
}

#[test]
fn fixture_file_round_trips_byte_for_byte() {
    for name in ["erp_jobs.dsx", "broken.dsx", "column_definition.dsx"] {
        let text = fixture(name);
        let file = ExportFile::parse(&text);
        assert_eq!(file.to_text(), text, "round trip of {name}");
    }
}

#[test]
fn unmodified_documents_reproduce_their_source() {
    let text = fixture("erp_jobs.dsx");
    for document in parse_documents(&text) {
        let document = document.unwrap();
        assert!(text.contains(document.to_text()));
        assert_eq!(document.source_of(&document.root), document.text.trim_end());

        for (_, record) in document.records() {
            let source = document.source_of(record);
            assert!(source.trim_start().starts_with(&format!("BEGIN {}", record.kind)));
            assert!(source.ends_with(&format!("END {}", record.kind)));
            for property in &record.properties {
                assert!(document.property_source(property).starts_with(&property.name));
            }
        }
    }
}

#[test]
fn erp_jobs_structure() {
    let text = fixture("erp_jobs.dsx");
    let mut stream = parse_documents(&text);
    let jobs: Vec<_> = stream.by_ref().map(Result::unwrap).collect();

    let names: Vec<_> = jobs.iter().map(|j| j.name.as_str()).collect();
    assert_eq!(names, vec!["LOAD_ORDERS", "LOOKUP_CUSTOMERS", "ARCHIVE_ORDERS"]);
    assert_eq!(
        stream.header().and_then(|h| h.value("ServerName")),
        Some(&PropertyValue::String("ETLSRV01".into()))
    );

    let load_orders = &jobs[0];
    let source_stage = load_orders.record_at(&"DSRECORD[1]".parse::<RecordPath>().unwrap()).unwrap();
    assert_eq!(source_stage.identifier(), Some("V0S1"));
    assert_eq!(source_stage.value("Context"), Some(&PropertyValue::Integer(1)));
    assert!(source_stage.value("SelectStatement").unwrap().is_raw());

    let amount = load_orders
        .record_at(&"DSRECORD[1]/DSSUBRECORD[3]".parse::<RecordPath>().unwrap())
        .unwrap();
    assert_eq!(amount.value("Name"), Some(&PropertyValue::String("AMOUNT".into())));
    assert_eq!(amount.value("Scale").and_then(PropertyValue::as_integer), Some(2));

    let root = load_orders.record_at(&"DSRECORD[0]".parse::<RecordPath>().unwrap()).unwrap();
    assert_eq!(root.value("Category"), Some(&PropertyValue::String("\\Jobs\\ERP".into())));
}

#[test]
fn broken_blocks_do_not_stop_the_stream() {
    let text = fixture("broken.dsx");
    let results: Vec<_> = parse_documents(&text).collect();

    assert_eq!(results.len(), 3);
    assert!(matches!(results[0], Err(ParseError::UnterminatedString { line: 8, .. })));
    assert!(matches!(
        &results[1],
        Err(ParseError::MismatchedEnd { expected, found, .. }) if expected == "DSRECORD" && found == "DSSUBRECORD"
    ));
    assert_eq!(results[2].as_ref().unwrap().name, "HEALTHY");
}

#[test]
fn store_loads_fixture_with_errors() {
    let store = DocumentStore::new();
    let outcome = store.load(&fixture("broken.dsx"));

    assert_eq!(outcome.documents.len(), 1);
    assert_eq!(outcome.errors.len(), 2);
    assert!(outcome.header.is_some());
    assert_eq!(store.job_names(), vec!["HEALTHY"]);
}
