//! Integration tests: legacy XMP sidecars through the public API.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use rawdev_pipeline::{Engine, EngineError, ErrorKind, FormatError, SourceImage};

fn image() -> SourceImage {
    SourceImage::from_linear(6, 4, 3, vec![0.3; 6 * 4 * 3]).unwrap()
}

fn exposure_hex(engine: &Engine, exposure: f32) -> String {
    let mut record = engine
        .registry()
        .find("exposure")
        .unwrap()
        .default_params()
        .clone();
    record
        .set("exposure", rawdev_pipeline::ParamValue::Float(exposure))
        .unwrap();
    hex::encode(record.as_bytes())
}

fn sidecar(history_end: Option<u32>, entries: &[(u32, &str, bool, &str)]) -> String {
    let end = history_end.map_or_else(String::new, |n| format!(r#" darktable:history_end="{n}""#));
    let items: String = entries
        .iter()
        .map(|(num, op, enabled, params)| {
            format!(
                r#"<rdf:li darktable:num="{num}" darktable:operation="{op}" darktable:enabled="{}" darktable:modversion="7" darktable:params="{params}" darktable:multi_name="" darktable:multi_priority="0"/>"#,
                u8::from(*enabled)
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<x:xmpmeta xmlns:x="adobe:ns:meta/">
 <rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
  <rdf:Description rdf:about="" xmlns:darktable="http://darktable.sf.net/"{end}>
   <darktable:history><rdf:Seq>{items}</rdf:Seq></darktable:history>
  </rdf:Description>
 </rdf:RDF>
</x:xmpmeta>
"#
    )
}

#[test]
fn round_trip_reproduces_state() {
    let engine = Engine::new();
    let image = image();
    let mut original = engine.create_pipeline(&image).unwrap();
    original.set_float("exposure", "exposure", -0.5).unwrap();
    original.enable_module("sharpen", true).unwrap();
    original.set_float("sharpen", "amount", 1.2).unwrap();
    original.set_float("crop", "cx", 0.1).unwrap();
    original.enable_module("colorin", false).unwrap();
    let xml = original.write_xmp().unwrap();

    assert!(xml.starts_with("<?xml"));
    assert!(xml.contains(r#"darktable:multi_priority="0""#));
    // crop is disabled but edited, colorin disabled and edited by that.
    assert!(xml.contains(r#"darktable:operation="crop""#));
    assert!(xml.contains(r#"darktable:operation="colorin""#));
    assert!(!xml.contains(r#"darktable:operation="levels""#));

    let mut restored = engine.create_pipeline(&image).unwrap();
    restored.read_xmp(&xml).unwrap();
    assert_eq!(
        restored.serialize_history().unwrap(),
        original.serialize_history().unwrap()
    );
}

#[test]
fn written_params_are_lowercase_hex() {
    let engine = Engine::new();
    let image = image();
    let mut pipeline = engine.create_pipeline(&image).unwrap();
    pipeline.set_float("exposure", "exposure", 1.0).unwrap();
    let xml = pipeline.write_xmp().unwrap();
    let expected = exposure_hex(&engine, 1.0);
    assert!(xml.contains(&format!(r#"darktable:params="{expected}""#)));
    assert_eq!(expected, expected.to_lowercase());
}

#[test]
fn duplicate_entries_resolve_to_highest_num() {
    let engine = Engine::new();
    let image = image();
    let xml = sidecar(
        None,
        &[
            (3, "exposure", true, &exposure_hex(&engine, 2.0)),
            (1, "exposure", true, &exposure_hex(&engine, 1.0)),
            (2, "exposure", false, &exposure_hex(&engine, 0.5)),
        ],
    );
    let mut pipeline = engine.create_pipeline(&image).unwrap();
    pipeline.read_xmp(&xml).unwrap();
    assert_eq!(pipeline.get_float("exposure", "exposure").unwrap(), 2.0);
    assert!(pipeline.is_module_enabled("exposure").unwrap());
}

#[test]
fn history_end_limits_live_entries() {
    let engine = Engine::new();
    let image = image();
    let xml = sidecar(
        Some(2),
        &[
            (0, "exposure", true, &exposure_hex(&engine, 1.0)),
            (1, "exposure", false, &exposure_hex(&engine, 0.5)),
            (2, "exposure", true, &exposure_hex(&engine, 3.0)),
        ],
    );
    let mut pipeline = engine.create_pipeline(&image).unwrap();
    pipeline.read_xmp(&xml).unwrap();
    assert_eq!(pipeline.get_float("exposure", "exposure").unwrap(), 0.5);
    assert!(!pipeline.is_module_enabled("exposure").unwrap());
}

#[test]
fn unknown_operation_is_skipped() {
    let engine = Engine::new();
    let image = image();
    let xml = sidecar(
        None,
        &[
            (0, "filmicrgb", true, "00112233"),
            (1, "exposure", true, &exposure_hex(&engine, 0.25)),
        ],
    );
    let mut pipeline = engine.create_pipeline(&image).unwrap();
    pipeline.read_xmp(&xml).unwrap();
    assert_eq!(pipeline.get_float("exposure", "exposure").unwrap(), 0.25);
}

#[test]
fn missing_history_and_malformed_xml_differ() {
    let engine = Engine::new();
    let image = image();
    let mut pipeline = engine.create_pipeline(&image).unwrap();

    let no_history = r#"<x:xmpmeta xmlns:x="adobe:ns:meta/"><rdf:RDF><rdf:Description/></rdf:RDF></x:xmpmeta>"#;
    let err = pipeline.read_xmp(no_history).unwrap_err();
    assert!(matches!(err, EngineError::Format(FormatError::MissingHistory)));

    let broken = "<x:xmpmeta><rdf:RDF></x:xmpmeta>";
    let err = pipeline.read_xmp(broken).unwrap_err();
    assert!(matches!(err, EngineError::Format(FormatError::MalformedXml(_))));
    assert_eq!(err.kind(), ErrorKind::Format);
}

#[test]
fn wrong_blob_size_is_format_error() {
    let engine = Engine::new();
    let image = image();
    let mut pipeline = engine.create_pipeline(&image).unwrap();
    let err = pipeline
        .read_xmp(&sidecar(None, &[(0, "exposure", true, "0011")]))
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Format(FormatError::InvalidParams { .. })
    ));
}

#[test]
fn files_round_trip_and_missing_file_is_not_found() {
    let engine = Engine::new();
    let image = image();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("IMG_0001.png.xmp");

    let mut original = engine.create_pipeline(&image).unwrap();
    original.set_float("exposure", "exposure", 0.6).unwrap();
    original.write_xmp_file(&path).unwrap();

    let mut restored = engine.create_pipeline(&image).unwrap();
    restored.read_xmp_file(&path).unwrap();
    assert_eq!(restored.get_float("exposure", "exposure").unwrap(), 0.6);

    let err = restored
        .read_xmp_file(dir.path().join("absent.xmp"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(rawdev_pipeline::last_error().unwrap().contains("absent.xmp"));
}

#[test]
fn non_utf8_sidecar_is_format_error() {
    let engine = Engine::new();
    let image = image();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("garbled.xmp");
    std::fs::write(&path, b"<x:xmpmeta>\xff\xfe</x:xmpmeta>").unwrap();

    let mut pipeline = engine.create_pipeline(&image).unwrap();
    let before = pipeline.serialize_history().unwrap();
    let err = pipeline.read_xmp_file(&path).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Format);
    assert!(matches!(err, EngineError::Format(FormatError::Encoding(_))));
    assert_eq!(pipeline.serialize_history().unwrap(), before);
}
