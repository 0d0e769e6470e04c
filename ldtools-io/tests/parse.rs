use std::fs;

use ldtools_core::code::CodeStandard;
use ldtools_core::colour::ColourValue;
use ldtools_core::document::{BfcMode, PageType, StepMode};
use ldtools_core::element::{ElementKind, HasColour};
use ldtools_io::{
    DocumentLoader, DocumentSaver, EmitOptions, IoError, LdrFacade, emit_document, emit_element,
    parse_document, parse_document_named, parse_element, parse_page,
};
use serde_json::Value;

const SAMPLE: &str = "0 Sample Model\r\n\
0 Name: sample.ldr\r\n\
0 Author: Jane Builder\r\n\
0 BFC CERTIFY CCW\r\n\
0 !LDTOOLS INLINEONPUBLISH\r\n\
0 // first step\r\n\
1 4 0 -8 0 1 0 0 0 1 0 0 0 1 3001.dat\r\n\
0 BFC INVERTNEXT\r\n\
1 16 10 0 0 0 0 1 0 1 0 -1 0 0 \"my part.dat\"\r\n\
0 STEP\r\n\
0 !LDTOOLS LOCKNEXT\r\n\
0 GHOST 2 24 0 0 0 1.5 0 0\r\n\
0 MLCAD HIDE 3 16 0 0 0 1 0 0 0 0 1\r\n\
0 ROTSTEP 10 20 30 ABS\r\n\
4 0x2FF0000 0 0 0 1 0 0 1 0 1 0 0 1\r\n";

#[test]
fn sample_round_trips_byte_for_byte() {
    let document = parse_document(SAMPLE).unwrap();
    assert_eq!(emit_document(&document, CodeStandard::Full), SAMPLE);
}

#[test]
fn sample_structure() {
    let page = parse_page(SAMPLE).unwrap();
    let header = page.header();
    assert_eq!(header.title, "Sample Model");
    assert_eq!(header.page_type, PageType::Model);
    assert_eq!(header.bfc, BfcMode::CertifiedCounterClockwise);
    assert!(header.inline_on_publish);

    let steps = page.steps();
    assert_eq!(steps.len(), 3);
    assert_eq!(steps[0].len(), 3);
    assert_eq!(steps[1].transform().mode(), StepMode::Absolute);
    assert_eq!(steps[1].transform().angles(), (10.0, 20.0, 30.0));

    let inverted = steps[0].elements()[2].as_reference().unwrap();
    assert!(inverted.invert());
    assert_eq!(inverted.target_name(), "my part.dat");

    let line = &steps[1].elements()[0];
    assert!(line.is_locked() && line.is_ghosted() && line.is_visible());
    assert!(!steps[1].elements()[1].is_visible());

    let quad = &steps[2].elements()[0];
    assert_eq!(quad.colour(), ColourValue::direct(0xFF0000, false));
}

#[test]
fn parsed_page_serializes_to_json() {
    let page = parse_page(SAMPLE).unwrap();
    let value: Value = serde_json::to_value(&page).unwrap();
    assert_eq!(value["header"]["name"], "sample");
    assert_eq!(value["header"]["author"], "Jane Builder");
    assert_eq!(value["steps"].as_array().map(Vec::len), Some(3));
}

#[test]
fn reemitting_a_multi_page_document_is_stable() {
    let text = "0 FILE main.ldr\n\
1 16 0 0 0 1 0 0 0 1 0 0 0 1 s\\sub.dat\n\
0 NOFILE\n\
0 FILE s\\sub.dat\n\
0 !LDRAW_ORG Unofficial_Subpart\n\
0 BFC CERTIFY CW\n\
0 !TEXMAP START SPHERICAL 0 0 0 1 0 0 0 1 0 180 90 earth.png\n\
0 !: 3 16 0 0 0 1 0 0 0 1 0\n\
0 !TEXMAP FALLBACK\n\
3 16 0 0 0 1 0 0 0 1 0\n\
0 !TEXMAP END\n\
0 NOFILE\n";
    let document = parse_document(text).unwrap();
    assert_eq!(document.len(), 2);
    let sub = &document.pages()[1];
    assert_eq!(sub.page_type(), PageType::Subpart);
    assert_eq!(sub.bfc(), BfcMode::CertifiedClockwise);

    let first = emit_document(&document, CodeStandard::Full);
    let second = emit_document(&parse_document(&first).unwrap(), CodeStandard::Full);
    assert_eq!(first, second);
}

#[test]
fn single_elements_round_trip_through_emit() {
    let statements = [
        "0 // plain comment",
        "2 24 0 0 0 1 2 3",
        "3 4 0 0 0 1 0 0 0 0 1",
        "4 0x3112233 0 0 0 1 0 0 1 0 1 0 0 1",
        "5 24 0 0 0 1 0 0 0 1 0 0 -1 0",
        "1 15 1 2 3 0 0 1 0 1 0 -1 0 0 3001.dat",
        "0 BFC CLIP CW",
        "0 !COLOUR Sea_Green CODE 151 VALUE #83B994 EDGE #333333",
    ];
    for statement in statements {
        let element = parse_element(statement).unwrap();
        let code = emit_element(&element, &EmitOptions::default());
        let reparsed = parse_element(&code).unwrap();
        assert_eq!(reparsed, element, "{statement}");
    }
}

#[test]
fn parse_element_rejects_multiple_statements() {
    let error = parse_element("2 24 0 0 0 1 0 0\n2 24 0 0 0 0 1 0\n").unwrap_err();
    assert!(matches!(error, IoError::Syntax { .. }));
}

#[test]
fn facade_saves_and_loads_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("3001.dat");
    let document = parse_document_named("3 16 0 0 0 1 0 0 0 0 1\n", Some("3001.dat")).unwrap();

    let facade = LdrFacade::new();
    facade.save(&document, &path).unwrap();
    let written = fs::read_to_string(&path).unwrap();
    assert!(written.ends_with("3 16 0 0 0 1 0 0 0 0 1\r\n"));

    let loaded = facade.load(&path).unwrap();
    assert_eq!(loaded.path(), Some(path.as_path()));
    assert_eq!(loaded.pages()[0].page_type(), PageType::Part);
    assert!(matches!(
        loaded.pages()[0].steps()[0].elements()[0].kind(),
        ElementKind::Triangle(_)
    ));

    let missing = facade.load(&dir.path().join("missing.dat")).unwrap_err();
    assert!(matches!(missing, IoError::ReadError { .. }));
}
