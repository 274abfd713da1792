//! The legacy XMP sidecar.
//!
//! History lives in a `darktable:history` sequence inside the
//! `rdf:Description` of an XMP packet. Each `rdf:li` is one history step:
//!
//! ```xml
//! <rdf:li darktable:num="0" darktable:operation="exposure"
//!         darktable:enabled="1" darktable:modversion="7"
//!         darktable:params="00000000..." darktable:multi_priority="0"
//!         darktable:multi_name=""/>
//! ```
//!
//! `darktable:history_end` on the description marks how many steps are
//! live; later steps are stale redo state. Steps are replayed in `num`
//! order, so for each operation the live step with the highest `num` is
//! the one that counts.
//!
//! Parameter blobs are the raw little-endian record, hex encoded, or
//! `gz` + two digits + base64 of the zlib-compressed record.

use std::collections::HashMap;
use std::io::Read;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use flate2::read::ZlibDecoder;
use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::errors::IllFormedError;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};

use crate::error::{EngineError, FormatError};
use crate::history::migrate::{Staged, StagedEntry, layout_for, upgrade_record};
use crate::pipeline::Pipeline;
use crate::registry::Registry;

const NS_X: &str = "adobe:ns:meta/";
const NS_RDF: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
const NS_DARKTABLE: &str = "http://darktable.sf.net/";

// ───────────────────────────── reading ─────────────────────────────

/// One `rdf:li` of the history sequence, undecoded.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RawEntry {
    num: i64,
    operation: String,
    enabled: bool,
    modversion: u32,
    params: String,
    multi_priority: i64,
}

/// What the reader found in a sidecar.
#[derive(Debug, Default)]
struct Scan {
    history_end: Option<i64>,
    found_history: bool,
    entries: Vec<RawEntry>,
}

/// Parse and validate a sidecar, migrating every live entry of a known
/// operation.
///
/// # Errors
///
/// [`FormatError::MalformedXml`] for XML that is not well-formed,
/// [`FormatError::MissingHistory`] when there is no history container,
/// [`FormatError::InvalidEntry`] or [`FormatError::InvalidParams`] for
/// broken entries, [`EngineError::Module`] when a migration fails.
pub fn stage(registry: &Registry, xml: &str) -> Result<Staged, EngineError> {
    let scan = scan(xml)?;
    if !scan.found_history {
        return Err(FormatError::MissingHistory.into());
    }

    let mut entries = Vec::new();
    for raw in select(scan.entries, scan.history_end) {
        let Some(index) = registry.index_of(&raw.operation) else {
            tracing::warn!(operation = %raw.operation, "unknown operation in sidecar, skipped");
            continue;
        };
        let descriptor = registry.descriptor(index);
        let layout = layout_for(descriptor, raw.modversion)?;
        let blob = decode_params(&raw.operation, &raw.params)?;
        let params = layout
            .decode(&blob)
            .ok_or_else(|| FormatError::InvalidParams {
                module: raw.operation.clone(),
                reason: format!(
                    "{} bytes, version {} expects {}",
                    blob.len(),
                    raw.modversion,
                    layout.size()
                ),
            })?;
        entries.push(StagedEntry {
            index,
            enabled: Some(raw.enabled),
            params: upgrade_record(descriptor, params)?,
        });
    }
    Ok(Staged {
        entries,
        masks: None,
    })
}

fn scan(xml: &str) -> Result<Scan, FormatError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut scan = Scan::default();
    let mut buf = Vec::new();
    let mut open: Vec<String> = Vec::new();
    let mut history_depth: Option<usize> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                visit(&e, &mut scan, history_depth.is_some())?;
                if e.name().as_ref() == b"darktable:history" {
                    scan.found_history = true;
                    history_depth.get_or_insert(open.len());
                }
                open.push(String::from_utf8_lossy(e.name().as_ref()).into_owned());
            }
            Event::Empty(e) => {
                visit(&e, &mut scan, history_depth.is_some())?;
                if e.name().as_ref() == b"darktable:history" {
                    scan.found_history = true;
                }
            }
            Event::End(_) => {
                open.pop();
                if history_depth == Some(open.len()) {
                    history_depth = None;
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if let Some(name) = open.pop() {
        return Err(quick_xml::Error::IllFormed(IllFormedError::MissingEndTag(name)).into());
    }
    Ok(scan)
}

/// Pick up what an element contributes: `history_end` from a
/// description, one entry from an `rdf:li` inside the history.
fn visit(e: &BytesStart<'_>, scan: &mut Scan, in_history: bool) -> Result<(), FormatError> {
    match e.name().as_ref() {
        b"rdf:Description" => {
            if let Some(end) = attribute(e, b"darktable:history_end")? {
                scan.history_end = Some(parse_int(&end, "darktable:history_end")?);
            }
        }
        b"rdf:li" if in_history => scan.entries.push(entry(e)?),
        _ => {}
    }
    Ok(())
}

fn entry(e: &BytesStart<'_>) -> Result<RawEntry, FormatError> {
    let operation = attribute(e, b"darktable:operation")?
        .ok_or_else(|| FormatError::InvalidEntry("history entry has no operation".into()))?;
    let params = attribute(e, b"darktable:params")?.ok_or_else(|| {
        FormatError::InvalidEntry(format!("history entry for {operation} has no params"))
    })?;
    let num = match attribute(e, b"darktable:num")? {
        Some(v) => parse_int(&v, "darktable:num")?,
        None => 0,
    };
    let enabled = match attribute(e, b"darktable:enabled")? {
        Some(v) => parse_int(&v, "darktable:enabled")? != 0,
        None => true,
    };
    let modversion = match attribute(e, b"darktable:modversion")? {
        Some(v) => u32::try_from(parse_int(&v, "darktable:modversion")?).map_err(|_| {
            FormatError::InvalidEntry(format!("darktable:modversion {v} is out of range"))
        })?,
        None => 0,
    };
    let multi_priority = match attribute(e, b"darktable:multi_priority")? {
        Some(v) => parse_int(&v, "darktable:multi_priority")?,
        None => 0,
    };
    Ok(RawEntry {
        num,
        operation,
        enabled,
        modversion,
        params,
        multi_priority,
    })
}

fn attribute(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, FormatError> {
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.as_ref() == key {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn parse_int(text: &str, what: &str) -> Result<i64, FormatError> {
    text.trim()
        .parse()
        .map_err(|_| FormatError::InvalidEntry(format!("{what} is not an integer: {text:?}")))
}

/// The live entries that count: before `history_end`, single-instance,
/// and the highest `num` per operation. Result is in `num` order.
fn select(mut entries: Vec<RawEntry>, history_end: Option<i64>) -> Vec<RawEntry> {
    entries.sort_by_key(|e| e.num);
    let mut latest: HashMap<String, usize> = HashMap::new();
    let mut picked: Vec<Option<RawEntry>> = Vec::new();
    for entry in entries {
        if history_end.is_some_and(|end| entry.num >= end) {
            continue;
        }
        if entry.multi_priority > 0 {
            tracing::warn!(
                operation = %entry.operation,
                multi_priority = entry.multi_priority,
                "extra module instance in sidecar, skipped"
            );
            continue;
        }
        if let Some(&prev) = latest.get(&entry.operation) {
            picked[prev] = None;
        }
        latest.insert(entry.operation.clone(), picked.len());
        picked.push(Some(entry));
    }
    picked.into_iter().flatten().collect()
}

/// Decode a `darktable:params` value into the raw record bytes.
fn decode_params(module: &str, text: &str) -> Result<Vec<u8>, FormatError> {
    let invalid = |reason: String| FormatError::InvalidParams {
        module: module.to_owned(),
        reason,
    };
    let Some(packed) = text.strip_prefix("gz") else {
        return hex::decode(text.trim()).map_err(|e| invalid(format!("bad hex: {e}")));
    };
    let factor = packed.get(..2).filter(|f| f.bytes().all(|b| b.is_ascii_digit()));
    let Some(factor) = factor else {
        return Err(invalid("compressed blob lacks its two-digit factor".into()));
    };
    let compressed = STANDARD
        .decode(packed[factor.len()..].trim())
        .map_err(|e| invalid(format!("bad base64: {e}")))?;
    let mut blob = Vec::new();
    ZlibDecoder::new(compressed.as_slice())
        .read_to_end(&mut blob)
        .map_err(|e| invalid(format!("bad zlib stream: {e}")))?;
    Ok(blob)
}

// ───────────────────────────── writing ─────────────────────────────

/// The sidecar describing `pipeline`.
///
/// Lists every enabled module and every module that differs from a fresh
/// instance, in chain order.
///
/// # Errors
///
/// [`EngineError::Io`] if the XML writer fails.
pub fn write(pipeline: &Pipeline<'_>) -> Result<String, EngineError> {
    let modules: Vec<_> = pipeline
        .modules()
        .filter(|m| m.enabled() || !m.is_default())
        .collect();
    let history_end = modules.len().to_string();

    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 1);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(write_failed)?;

    let mut meta = BytesStart::new("x:xmpmeta");
    meta.push_attribute(("xmlns:x", NS_X));
    writer.write_event(Event::Start(meta)).map_err(write_failed)?;

    let mut rdf = BytesStart::new("rdf:RDF");
    rdf.push_attribute(("xmlns:rdf", NS_RDF));
    writer.write_event(Event::Start(rdf)).map_err(write_failed)?;

    let mut description = BytesStart::new("rdf:Description");
    description.push_attribute(("rdf:about", ""));
    description.push_attribute(("xmlns:darktable", NS_DARKTABLE));
    description.push_attribute(("darktable:history_end", history_end.as_str()));
    writer
        .write_event(Event::Start(description))
        .map_err(write_failed)?;

    writer
        .write_event(Event::Start(BytesStart::new("darktable:history")))
        .map_err(write_failed)?;
    writer
        .write_event(Event::Start(BytesStart::new("rdf:Seq")))
        .map_err(write_failed)?;
    for (num, module) in modules.iter().enumerate() {
        let num = num.to_string();
        let version = module.version().to_string();
        let params = hex::encode(module.params().as_bytes());
        let mut li = BytesStart::new("rdf:li");
        li.push_attribute(("darktable:num", num.as_str()));
        li.push_attribute(("darktable:operation", module.name()));
        li.push_attribute(("darktable:enabled", if module.enabled() { "1" } else { "0" }));
        li.push_attribute(("darktable:modversion", version.as_str()));
        li.push_attribute(("darktable:params", params.as_str()));
        li.push_attribute(("darktable:multi_priority", "0"));
        li.push_attribute(("darktable:multi_name", ""));
        writer.write_event(Event::Empty(li)).map_err(write_failed)?;
    }
    for name in ["rdf:Seq", "darktable:history", "rdf:Description", "rdf:RDF", "x:xmpmeta"] {
        writer
            .write_event(Event::End(BytesEnd::new(name)))
            .map_err(write_failed)?;
    }

    let mut xml = String::from_utf8(writer.into_inner())
        .map_err(|e| EngineError::Io(std::io::Error::other(e)))?;
    xml.push('\n');
    Ok(xml)
}

fn write_failed(error: impl std::fmt::Display) -> EngineError {
    EngineError::Io(std::io::Error::other(format!("cannot write sidecar: {error}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::ZlibEncoder;

    use super::*;
    use crate::params::ParamValue;

    fn li(num: i64, op: &str, params: &str) -> RawEntry {
        RawEntry {
            num,
            operation: op.into(),
            enabled: true,
            modversion: 7,
            params: params.into(),
            multi_priority: 0,
        }
    }

    #[test]
    fn select_keeps_last_live_entry_per_operation() {
        let entries = vec![li(2, "exposure", "b"), li(0, "exposure", "a"), li(1, "crop", "c")];
        let picked = select(entries.clone(), None);
        let ops: Vec<_> = picked.iter().map(|e| (e.operation.as_str(), e.params.as_str())).collect();
        assert_eq!(ops, [("crop", "c"), ("exposure", "b")]);

        let picked = select(entries, Some(2));
        let ops: Vec<_> = picked.iter().map(|e| e.params.as_str()).collect();
        assert_eq!(ops, ["a", "c"]);
    }

    #[test]
    fn select_skips_extra_instances() {
        let mut extra = li(1, "exposure", "b");
        extra.multi_priority = 1;
        let picked = select(vec![li(0, "exposure", "a"), extra], None);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].params, "a");
    }

    #[test]
    fn hex_and_compressed_blobs_decode() {
        assert_eq!(decode_params("m", "00ff10").unwrap(), [0x00, 0xff, 0x10]);
        assert_eq!(decode_params("m", "00FF10").unwrap(), [0x00, 0xff, 0x10]);

        let raw: Vec<u8> = (0..64).collect();
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&raw).unwrap();
        let packed = format!("gz12{}", STANDARD.encode(enc.finish().unwrap()));
        assert_eq!(decode_params("m", &packed).unwrap(), raw);

        assert!(decode_params("m", "abc").is_err());
        assert!(decode_params("m", "gzxx").is_err());
        assert!(decode_params("m", "gz12!!!").is_err());
    }

    #[test]
    fn missing_history_versus_malformed() {
        let registry = Registry::builtin();
        let err = stage(&registry, r#"<x:xmpmeta xmlns:x="adobe:ns:meta/"/>"#).unwrap_err();
        assert!(matches!(err, EngineError::Format(FormatError::MissingHistory)));

        let err = stage(&registry, "<x:xmpmeta><rdf:RDF></x:xmpmeta>").unwrap_err();
        assert!(matches!(err, EngineError::Format(FormatError::MalformedXml(_))));

        let err = stage(&registry, "<x:xmpmeta><darktable:history>").unwrap_err();
        assert!(matches!(err, EngineError::Format(FormatError::MalformedXml(_))));
    }

    #[test]
    fn entries_outside_history_are_ignored() {
        let registry = Registry::builtin();
        let blob = registry.find("exposure").unwrap().default_params().as_bytes().to_vec();
        let xml = format!(
            r#"<x:xmpmeta><rdf:RDF><rdf:Description>
                 <dc:subject><rdf:Bag><rdf:li>tag</rdf:li></rdf:Bag></dc:subject>
                 <darktable:history><rdf:Seq>
                   <rdf:li darktable:num="0" darktable:operation="exposure"
                           darktable:enabled="0" darktable:modversion="7"
                           darktable:params="{}"/>
                 </rdf:Seq></darktable:history>
               </rdf:Description></rdf:RDF></x:xmpmeta>"#,
            hex::encode(&blob)
        );
        let staged = stage(&registry, &xml).unwrap();
        assert_eq!(staged.entries.len(), 1);
        assert_eq!(staged.entries[0].enabled, Some(false));
        assert_eq!(staged.entries[0].params.as_bytes(), blob.as_slice());
    }

    #[test]
    fn legacy_blob_is_upgraded_and_size_checked() {
        let registry = Registry::builtin();
        let exposure = registry.find("exposure").unwrap();
        let mut old = layout_for(exposure, 5).unwrap().default_record();
        old.set("exposure", ParamValue::Float(0.75)).unwrap();
        let entry = |version: u32, params: &str| {
            format!(
                r#"<rdf:Description><darktable:history><rdf:Seq>
                     <rdf:li darktable:num="0" darktable:operation="exposure"
                             darktable:modversion="{version}" darktable:params="{params}"/>
                   </rdf:Seq></darktable:history></rdf:Description>"#
            )
        };
        let staged = stage(&registry, &entry(5, &hex::encode(old.as_bytes()))).unwrap();
        assert_eq!(staged.entries[0].params.version(), 7);
        assert_eq!(staged.entries[0].params.float("exposure"), 0.75);

        let err = stage(&registry, &entry(7, "00")).unwrap_err();
        assert!(matches!(err, EngineError::Format(FormatError::InvalidParams { .. })));

        let err = stage(&registry, &entry(99, "00")).unwrap_err();
        assert!(matches!(err, EngineError::Module(_)));
    }
}
