mod common;

use std::fs;
use std::sync::Arc;

use common::*;
use isoinspect::{
    BoxParserRegistry, BoxValidator, InMemoryResearchLog, MemoryReader, ParseContext, ParsePipeline,
    PayloadValidationLevel, ResearchLogEntry, ResearchLogError, ResearchLogRecording, ResearchLogWriter,
    ValidationPreset,
};

fn entry(typ: &str, start: u64) -> ResearchLogEntry {
    ResearchLogEntry {
        box_type: typ.to_string(),
        file_path: "clip.mp4".to_string(),
        start_offset: start,
        end_offset: start + 12,
    }
}

fn file_with_unknown_boxes() -> Vec<u8> {
    cat(&[ftyp(), bx(b"zzzz", &[0; 4]), bx(b"qqqq", &[]), bx(b"zzzz", &[0; 4])])
}

#[test]
fn in_memory_log_deduplicates_and_sorts() {
    let log = InMemoryResearchLog::new();
    log.record(entry("zzzz", 40));
    log.record(entry("abcd", 0));
    log.record(entry("zzzz", 40));

    let entries = log.entries();
    assert_eq!(entries, vec![entry("abcd", 0), entry("zzzz", 40)]);
}

#[test]
fn writer_persists_and_reloads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("research-log.json");

    let writer = ResearchLogWriter::open(&path).unwrap();
    writer.record(entry("zzzz", 40));
    writer.record(entry("zzzz", 40));
    writer.record(entry("abcd", 0));

    let on_disk: Vec<ResearchLogEntry> = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    assert_eq!(on_disk, vec![entry("abcd", 0), entry("zzzz", 40)]);

    let reopened = ResearchLogWriter::open(&path).unwrap();
    assert_eq!(reopened.entries().len(), 2);
    reopened.record(entry("abcd", 0));
    assert_eq!(reopened.entries().len(), 2);
}

#[test]
fn writer_rejects_corrupt_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("research-log.json");
    fs::write(&path, "{not json").unwrap();
    assert!(matches!(ResearchLogWriter::open(&path), Err(ResearchLogError::Json(_))));
}

#[test]
fn unknown_boxes_are_recorded_once_per_location() {
    let log = InMemoryResearchLog::shared();
    let pipeline = ParsePipeline::tolerant().with_research_log(log.clone());
    let reader = MemoryReader::new(file_with_unknown_boxes());
    let ctx = ParseContext::new().with_source("clip.mp4");
    let tree = pipeline.parse_tree(&reader, &ctx).unwrap();

    assert_eq!(issues_with(&tree, "VR-006").len(), 3);
    let entries = log.entries();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0], ResearchLogEntry {
        box_type: "qqqq".to_string(),
        file_path: "clip.mp4".to_string(),
        start_offset: 36,
        end_offset: 44,
    });
    assert_eq!(entries[1], entry("zzzz", 24));

    // A second pass over the same file adds nothing.
    pipeline.parse_tree(&reader, &ctx).unwrap();
    assert_eq!(log.entries().len(), 3);
}

#[test]
fn research_log_file_is_written_during_parse() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("research-log.json");
    let writer = Arc::new(ResearchLogWriter::open(&path).unwrap());
    let reader = MemoryReader::new(file_with_unknown_boxes());
    ParsePipeline::tolerant()
        .with_research_log(writer)
        .parse_tree(&reader, &ParseContext::new().with_source("clip.mp4"))
        .unwrap();

    let value: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    assert_eq!(value.as_array().map(Vec::len), Some(3));
    assert_eq!(value[0]["box_type"], "qqqq");
    assert_eq!(value[0]["file_path"], "clip.mp4");
}

#[test]
fn structural_preset_disables_research_and_advisories() {
    let registry = BoxParserRegistry::shared();
    let all = BoxValidator::new(PayloadValidationLevel::Full, registry.clone());
    assert!(all.active_rule_ids().contains(&"VR-006"));

    let structural = BoxValidator::new(PayloadValidationLevel::Full, registry).with_preset(&ValidationPreset::structural());
    let active = structural.active_rule_ids();
    assert!(!active.contains(&"VR-006"));
    assert!(!active.contains(&"E3"));
    assert!(active.contains(&"VR-015"));
    assert_eq!(structural.rule_states().get("VR-006"), Some(&false));
}

#[test]
fn disabled_rule_neither_reports_nor_records() {
    let log = InMemoryResearchLog::shared();
    let pipeline = ParsePipeline::tolerant()
        .with_preset(ValidationPreset::structural())
        .with_research_log(log.clone());
    let tree = pipeline
        .parse_tree(&MemoryReader::new(file_with_unknown_boxes()), &ParseContext::new())
        .unwrap();

    assert!(issues_with(&tree, "VR-006").is_empty());
    assert!(log.entries().is_empty());
}

#[test]
fn individual_rules_can_be_switched_back_on() {
    let mut validator = BoxValidator::new(PayloadValidationLevel::Full, BoxParserRegistry::shared())
        .with_preset(&ValidationPreset::structural());
    validator.set_rule_enabled("VR-006", true);
    assert!(validator.is_rule_enabled("VR-006"));
    assert!(!validator.is_rule_enabled("E3"));
}

#[test]
fn presets_load_from_a_manifest() {
    let json = r#"{"presets": [
        {"id": "quiet", "name": "Quiet", "summary": "No codec checks.",
         "rules": [{"rule_id": "VR-018", "enabled": false}]},
        {"id": "all", "name": "All", "summary": "Defaults."}
    ]}"#;
    let presets = ValidationPreset::from_manifest(json).unwrap();
    assert_eq!(presets.len(), 2);
    assert!(!presets[0].is_rule_enabled("VR-018"));
    assert!(presets[0].is_rule_enabled("VR-015"));
    assert!(presets[1].rules.is_empty());
    assert!(ValidationPreset::from_manifest("{}").is_err());
}

#[test]
fn builtin_presets_have_distinct_ids() {
    let ids: Vec<String> = ValidationPreset::builtin().into_iter().map(|p| p.id).collect();
    assert_eq!(ids, vec!["all-checks", "structural"]);
    assert!(ValidationPreset::all_checks().is_rule_enabled("VR-006"));
}
