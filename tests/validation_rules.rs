mod common;

use common::*;
use isoinspect::validator::{BoxBoundsRule, ContainerTilingRule};
use isoinspect::{
    BoxHeader, FourCC, MemoryReader, ParseEvent, ParseEventKind, Severity, ValidationRule,
};

fn header(typ: &[u8; 4], start: u64, total_size: u64) -> BoxHeader {
    BoxHeader { typ: FourCC(*typ), uuid: None, total_size, header_size: 8, start }
}

fn start_event(h: BoxHeader, depth: usize) -> ParseEvent {
    ParseEvent {
        offset: h.start,
        kind: ParseEventKind::WillStartBox { header: h, depth },
        metadata: None,
        payload: None,
        issues: Vec::new(),
    }
}

fn finish_event(h: BoxHeader, depth: usize) -> ParseEvent {
    ParseEvent {
        offset: h.start,
        kind: ParseEventKind::DidFinishBox { header: h, depth },
        metadata: None,
        payload: None,
        issues: Vec::new(),
    }
}

/// trak with tkhd, optional edts, and mdia(mdhd, hdlr, minf(stbl(children))).
fn trak(tkhd_box: Vec<u8>, edts: Option<Vec<u8>>, mdhd_box: Vec<u8>, stbl_children: &[Vec<u8>]) -> Vec<u8> {
    let stbl = bx(b"stbl", &cat(stbl_children));
    let mdia = bx(b"mdia", &cat(&[mdhd_box, hdlr(b"vide", "Video"), bx(b"minf", &stbl)]));
    let mut parts = vec![tkhd_box];
    parts.extend(edts);
    parts.push(mdia);
    bx(b"trak", &cat(&parts))
}

fn movie(mvhd_box: Vec<u8>, trak_box: Vec<u8>) -> Vec<u8> {
    cat(&[ftyp(), bx(b"moov", &cat(&[mvhd_box, trak_box])), bx(b"mdat", &[0u8; 8])])
}

// ---------- Structural rules ----------

#[test]
fn well_formed_movie_is_clean() {
    let data = movie_with_stbl(&[
        stsd(&[visual_entry(b"avc1", 640, 360, &avcc(4))]),
        stts(&[(4, 100)]),
        stsc(&[(1, 2, 1)]),
        stsz_constant(10, 4),
        stco(&[100, 200]),
    ]);
    let tree = full_validation_tree(data);
    assert!(tree.issues.is_empty(), "unexpected issues: {:?}", tree.issues);
}

#[test]
fn box_bounds_rule_flags_boxes_past_the_data() {
    let reader = MemoryReader::new(vec![0u8; 64]);
    let mut rule = BoxBoundsRule;
    assert!(rule.issues(&start_event(header(b"mdat", 0, 64), 0), &reader).is_empty());

    let issues = rule.issues(&start_event(header(b"mdat", 32, 100), 0), &reader);
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].rule_id, "VR-001");
    assert_eq!(issues[0].severity, Severity::Error);
    assert!(issues[0].message.contains("mdat@32"));
}

#[test]
fn tiling_rule_reports_gaps_and_short_children() {
    let reader = MemoryReader::new(vec![0u8; 200]);
    let mut rule = ContainerTilingRule::default();
    let moov = header(b"moov", 0, 100);
    let mut issues = Vec::new();
    issues.extend(rule.issues(&start_event(moov.clone(), 0), &reader));
    // Gap: first child should start at 8.
    issues.extend(rule.issues(&start_event(header(b"mvhd", 16, 20), 1), &reader));
    issues.extend(rule.issues(&finish_event(header(b"mvhd", 16, 20), 1), &reader));
    issues.extend(rule.issues(&finish_event(moov, 0), &reader));

    assert_eq!(issues.len(), 2, "{issues:?}");
    assert!(issues[0].message.contains("expected a child at offset 8 but found mvhd@16"));
    assert!(issues[1].message.contains("should close at offset 100 but its children end at 36"));
}

#[test]
fn tiling_rule_reports_overlap_and_stack_mismatch() {
    let reader = MemoryReader::new(vec![0u8; 200]);
    let mut rule = ContainerTilingRule::default();
    let moov = header(b"moov", 0, 100);
    let mut issues = Vec::new();
    issues.extend(rule.issues(&start_event(moov.clone(), 0), &reader));
    issues.extend(rule.issues(&start_event(header(b"free", 8, 50), 1), &reader));
    issues.extend(rule.issues(&finish_event(header(b"free", 8, 50), 1), &reader));
    issues.extend(rule.issues(&start_event(header(b"skip", 40, 60), 1), &reader));
    issues.extend(rule.issues(&finish_event(header(b"wide", 40, 60), 1), &reader));

    assert!(issues.iter().any(|i| i.message.contains("overlaps the previous child")));
    assert!(issues.iter().any(|i| i.message.contains("Container stack mismatch")));
    assert!(issues.iter().all(|i| i.rule_id == "VR-002"));
}

#[test]
fn truncated_child_header_breaks_tiling() {
    let moov = bx(b"moov", &cat(&[mvhd(1000, 0), vec![0, 0, 0, 9]]));
    let tree = tolerant_tree(cat(&[ftyp(), moov]));

    let header_issues = issues_with(&tree, "header.truncated_field");
    assert_eq!(header_issues.len(), 1);
    assert_eq!(header_issues[0].affected_node_ids, vec![24]);
    let tiling = issues_with(&tree, "VR-002");
    assert_eq!(tiling.len(), 1);
    assert!(tiling[0].message.contains("moov@24 should close"));
}

#[test]
fn version_and_flags_mismatches() {
    let mut bad_mvhd = mvhd(1000, 0);
    bad_mvhd[11] = 1; // flags low byte
    let mut bad_hdlr = hdlr(b"vide", "Video");
    bad_hdlr[8] = 1; // version
    let tiny_stsd = bx(b"stsd", &[0, 0]);
    let data = cat(&[ftyp(), bx(b"moov", &cat(&[bad_mvhd, bad_hdlr, tiny_stsd]))]);
    let tree = tolerant_tree(data);

    let issues = issues_with(&tree, "VR-003");
    assert_eq!(issues.len(), 3, "{issues:?}");
    assert!(issues.iter().all(|i| i.severity == Severity::Warning));
    assert_eq!(issues[0].message, "mvhd@32 flags mismatch: expected 0x000000 but found 0x000001.");
    assert!(issues[1].message.contains("version mismatch: expected 0 but found 1"));
    assert!(issues[2].message.contains("payload too small for version/flags check"));
}

#[test]
fn media_before_file_type_is_an_error() {
    let data = cat(&[bx(b"mdat", &[1, 2, 3]), ftyp(), bx(b"moov", &mvhd(1000, 0))]);
    let tree = tolerant_tree(data);

    let issues = issues_with(&tree, "VR-004");
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].severity, Severity::Error);
    assert_eq!(issues[0].message, "Encountered mdat@0 before required file type box (ftyp).");
    assert_eq!(issues[0].affected_node_ids, vec![0]);
}

#[test]
fn nested_boxes_before_file_type_are_each_reported() {
    let data = cat(&[bx(b"moov", &bx(b"trak", &[])), ftyp()]);
    let tree = tolerant_tree(data);
    let issues = issues_with(&tree, "VR-004");
    assert_eq!(issues.len(), 2);
    assert!(issues[1].message.contains("trak@8"));
}

#[test]
fn segment_type_satisfies_file_type_requirement() {
    let styp = bx(b"styp", &[b"msdh".as_slice(), &0u32.to_be_bytes(), b"msdh"].concat());
    let data = cat(&[styp, bx(b"moof", &full(b"mfhd", 0, 0, &u32s(&[1]))), bx(b"mdat", &[0; 4])]);
    let tree = tolerant_tree(data);
    assert!(issues_with(&tree, "VR-004").is_empty());
    assert!(issues_with(&tree, "VR-005").is_empty());
}

#[test]
fn media_before_movie_warns_unless_streaming() {
    let progressive = cat(&[ftyp(), bx(b"mdat", &[0; 4]), bx(b"moov", &mvhd(1000, 0))]);
    let tree = tolerant_tree(progressive);
    let issues = issues_with(&tree, "VR-005");
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].severity, Severity::Warning);
    assert!(issues[0].message.starts_with("Movie data box mdat@24 encountered before movie box (moov)"));

    let sidx = full(b"sidx", 0, 0, &[u32s(&[1, 1000, 0, 0]), vec![0, 0, 0, 0]].concat());
    let streaming = cat(&[ftyp(), sidx, bx(b"mdat", &[0; 4]), bx(b"moov", &mvhd(1000, 0))]);
    let tree = tolerant_tree(streaming);
    assert!(issues_with(&tree, "VR-005").is_empty());
    // The late moov after streamed media is still worth an advisory.
    let advisories = issues_with(&tree, "E3");
    assert_eq!(advisories.len(), 1);
    assert!(advisories[0].message.contains("following streaming indicators \"sidx\""));
}

#[test]
fn unknown_boxes_are_informational() {
    let data = cat(&[ftyp(), bx(b"zzzz", &[0; 4])]);
    let tree = tolerant_tree(data);
    let issues = issues_with(&tree, "VR-006");
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].severity, Severity::Info);
    assert!(issues[0].message.contains("Unknown box type zzzz at offset 24"));
}

#[test]
fn top_level_ordering_advisories() {
    let data = cat(&[
        bx(b"free", &[]),
        bx(b"abcd", &[]),
        ftyp(),
        bx(b"wxyz", &[]),
        bx(b"moov", &mvhd(1000, 0)),
    ]);
    let tree = tolerant_tree(data);
    let advisories = issues_with(&tree, "E3");

    assert_eq!(advisories.len(), 2, "{advisories:?}");
    assert!(advisories.iter().all(|i| i.severity == Severity::Info));
    assert!(advisories[0].message.contains("\"abcd\" appeared before the file type box"));
    assert!(advisories[1].message.contains("\"wxyz\" appeared between file type (ftyp) and movie (moov)"));
}

// ---------- Payload rules ----------

#[test]
fn edit_list_matching_headers_is_clean() {
    let edts = bx(b"edts", &elst(&[(1000, 0, 1, 0)]));
    let data = movie(mvhd(1000, 1000), trak(tkhd(1, 1000, 1), Some(edts), mdhd(1000, 1000), &[]));
    let tree = full_validation_tree(data);
    assert!(issues_with(&tree, "VR-014").is_empty(), "{:?}", tree.issues);
}

#[test]
fn edit_list_within_one_tick_is_tolerated() {
    let edts = bx(b"edts", &elst(&[(999, 0, 1, 0)]));
    let data = movie(mvhd(1000, 1000), trak(tkhd(1, 1000, 1), Some(edts), mdhd(1000, 1000), &[]));
    let tree = full_validation_tree(data);
    assert!(issues_with(&tree, "VR-014").is_empty());
}

#[test]
fn edit_list_duration_mismatches() {
    let edts = bx(b"edts", &elst(&[(800, 0, 1, 0)]));
    let data = movie(mvhd(1000, 1000), trak(tkhd(3, 1000, 1), Some(edts), mdhd(48000, 48000), &[]));
    let tree = full_validation_tree(data);
    let issues = issues_with(&tree, "VR-014");

    assert_eq!(issues.len(), 3, "{issues:?}");
    assert!(issues[0].message.contains("Track 3 edit list spans 800 movie ticks but movie header duration is 1000 (short by 200 > 1 tick)"));
    assert!(issues[1].message.contains("track header duration is 1000"));
    assert!(issues[2].message.contains("consumes 38400 media ticks but media duration is 48000"));
    // The media check waits for mdhd but still points at the elst.
    let elst_node = tree.iter().find(|n| &n.header.typ.0 == b"elst").unwrap();
    assert_eq!(issues[2].affected_node_ids, vec![elst_node.id()]);
}

#[test]
fn edit_list_rates_and_disabled_tracks() {
    let edts = bx(b"edts", &elst(&[(500, 0, 1, 5), (500, 0, -1, 0)]));
    // Disabled track: only movie-level and rate checks apply.
    let data = movie(mvhd(1000, 1000), trak(tkhd(1, 5, 0), Some(edts), mdhd(1000, 5), &[]));
    let tree = full_validation_tree(data);
    let issues = issues_with(&tree, "VR-014");

    assert_eq!(issues.len(), 2, "{issues:?}");
    assert!(issues[0].message.contains("media_rate_fraction=5"));
    assert!(issues[1].message.contains("reverse playback"));
}

#[test]
fn chunk_count_mismatch_reports_once() {
    let data = movie_with_stbl(&[
        stsc(&[(1, 10, 1)]),
        stsz_constant(100, 100),
        stco(&[1, 2, 3, 4, 5, 6, 7, 8]),
    ]);
    let tree = full_validation_tree(data);
    let issues = issues_with(&tree, "VR-015");

    assert_eq!(issues.len(), 1, "{issues:?}");
    assert_eq!(issues[0].severity, Severity::Warning);
    assert!(issues[0].message.contains("Track 1 chunk count mismatch"));
    assert!(issues[0].message.contains("implies 10 chunks for 100 samples"));
    let stco_node = tree.iter().find(|n| &n.header.typ.0 == b"stco").unwrap();
    assert_eq!(issues[0].affected_node_ids, vec![stco_node.id()]);
    assert_eq!(issues[0].byte_range, Some(stco_node.header.range()));
}

#[test]
fn correlation_issue_lands_on_the_chunk_offset_node() {
    // stsz arrives last, so the issue is raised while visiting stsz.
    let data = movie_with_stbl(&[stsc(&[(1, 10, 1)]), stco(&[1, 2, 3, 4, 5, 6, 7, 8]), stsz_constant(100, 100)]);
    let tree = full_validation_tree(data);
    assert_eq!(issues_with(&tree, "VR-015").len(), 1);

    let node = |typ: &[u8; 4]| tree.iter().find(|n| &n.header.typ.0 == typ).unwrap();
    assert!(node(b"stco").issues.iter().any(|i| i.code == "VR-015"));
    assert!(node(b"stsz").issues.iter().all(|i| i.code != "VR-015"));
}

#[test]
fn sample_count_mismatch() {
    let data = movie_with_stbl(&[stsc(&[(1, 4, 1)]), stsz_constant(10, 10), stco(&[100, 200, 300])]);
    let tree = full_validation_tree(data);
    let issues = issues_with(&tree, "VR-015");
    assert_eq!(issues.len(), 1);
    assert!(issues[0].message.contains("sample count mismatch"));
    assert!(issues[0].message.contains("expands to 12 samples"));
}

#[test]
fn chunk_offsets_must_increase() {
    let data = movie_with_stbl(&[stsc(&[(1, 1, 1)]), stsz_constant(10, 4), stco(&[100, 200, 500, 300])]);
    let tree = full_validation_tree(data);
    let issues = issues_with(&tree, "VR-015");
    assert_eq!(issues.len(), 1);
    assert!(issues[0].message.contains("is not monotonic: entry 3 (300) does not exceed entry 2 (500)"));
}

#[test]
fn time_to_sample_total_must_match_sample_count() {
    let data = movie_with_stbl(&[stts(&[(9, 100)]), stsc(&[(1, 10, 1)]), stsz_constant(10, 10), stco(&[100])]);
    let tree = full_validation_tree(data);
    let issues = issues_with(&tree, "VR-015");
    assert_eq!(issues.len(), 1);
    assert!(issues[0].message.contains("time-to-sample table sums to 9 samples but sample size table declares 10"));
}

#[test]
fn structure_only_skips_sample_table_rules() {
    let data = movie_with_stbl(&[stsc(&[(1, 10, 1)]), stsz_constant(100, 100), stco(&[1, 2])]);
    let tree = tolerant_tree(data);
    assert!(issues_with(&tree, "VR-015").is_empty());
}

#[test]
fn avc_three_byte_nal_length_is_an_error() {
    let data = movie_with_stbl(&[stsd(&[visual_entry(b"avc1", 640, 360, &avcc(3))])]);
    let tree = full_validation_tree(data);
    let issues = issues_with(&tree, "VR-018");

    assert_eq!(issues.len(), 1, "{issues:?}");
    assert_eq!(issues[0].severity, Severity::Error);
    assert!(issues[0].message.starts_with(
        "Track 1 sample description entry 1 (format avc1) avcC declares 3-byte NAL unit lengths"
    ));
}

#[test]
fn avc_zero_length_parameter_set() {
    let mut p = vec![1, 0x64, 0x00, 0x1f, 0xff, 0xe1];
    p.extend_from_slice(&0u16.to_be_bytes());
    p.push(0);
    let data = movie_with_stbl(&[stsd(&[visual_entry(b"avc1", 640, 360, &bx(b"avcC", &p))])]);
    let tree = full_validation_tree(data);
    let issues = issues_with(&tree, "VR-018");
    assert_eq!(issues.len(), 1);
    assert!(issues[0].message.contains("sequence parameter sets entry #0 has zero length"));
}

#[test]
fn hevc_missing_arrays() {
    let mut p = vec![0u8; 23];
    p[0] = 1;
    p[21] = 0xfc | 0x2; // 3-byte NAL lengths
    p[22] = 1; // one array, none present
    let data = movie_with_stbl(&[stsd(&[visual_entry(b"hvc1", 640, 360, &bx(b"hvcC", &p))])]);
    let tree = full_validation_tree(data);
    let issues = issues_with(&tree, "VR-018");

    assert_eq!(issues.len(), 2, "{issues:?}");
    assert!(issues[0].message.contains("hvcC declares 3-byte NAL unit lengths"));
    assert!(issues[1].message.contains("declares 1 NAL unit arrays but payload ends before array #0"));
}
