mod common;

use common::*;
use isoinspect::payload::{PayloadDetail, TrackFragmentRandomAccessBox, TrackRunBox};
use isoinspect::{BoxNode, ParseTree, Severity};

fn trex(track_id: u32, duration: u32, size: u32) -> Vec<u8> {
    full(b"trex", 0, 0, &u32s(&[track_id, 1, duration, size, 0]))
}

fn mfhd(seq: u32) -> Vec<u8> {
    full(b"mfhd", 0, 0, &u32s(&[seq]))
}

fn tfhd(flags: u32, track_id: u32, extra: &[u8]) -> Vec<u8> {
    let mut p = track_id.to_be_bytes().to_vec();
    p.extend_from_slice(extra);
    full(b"tfhd", 0, flags, &p)
}

fn tfdt(time: u64) -> Vec<u8> {
    full(b"tfdt", 1, 0, &time.to_be_bytes())
}

fn trun(flags: u32, count: u32, data_offset: Option<i32>, per_sample: &[u32]) -> Vec<u8> {
    let mut p = count.to_be_bytes().to_vec();
    if let Some(o) = data_offset {
        p.extend_from_slice(&o.to_be_bytes());
    }
    p.extend_from_slice(&u32s(per_sample));
    full(b"trun", 0, flags, &p)
}

fn moof(seq: u32, trafs: &[Vec<u8>]) -> Vec<u8> {
    let mut parts = vec![mfhd(seq)];
    parts.extend(trafs.iter().map(|t| bx(b"traf", t)));
    bx(b"moof", &cat(&parts))
}

/// ftyp + moov(mvhd, mvex(trex)) + moof + mdat + mfra(tfra, mfro).
/// Returns the file and the moof offset.
fn fragmented_file() -> (Vec<u8>, u64) {
    let head = cat(&[
        ftyp(),
        bx(b"moov", &cat(&[mvhd(1000, 0), bx(b"mvex", &trex(1, 1000, 200))])),
    ]);
    let moof_start = head.len() as u64;

    // moof = 8 + mfhd 16 + traf(8 + tfhd 16 + tfdt 20 + trun 32 + trun 20) = 120
    let traf = cat(&[
        tfhd(0x020000, 1, &[]),
        tfdt(5000),
        trun(0x201, 3, Some(128), &[100, 200, 300]),
        trun(0x100, 1, None, &[500]),
    ]);
    let moof = moof(1, &[traf]);
    assert_eq!(moof.len(), 120);
    let mdat = bx(b"mdat", &[0u8; 800]);

    let mut tfra = u32s(&[1, 0, 1]);
    tfra.extend_from_slice(&5000u32.to_be_bytes());
    tfra.extend_from_slice(&(moof_start as u32).to_be_bytes());
    tfra.extend_from_slice(&[1, 2, 1]);
    let tfra = full(b"tfra", 0, 0, &tfra);
    let mfro = full(b"mfro", 0, 0, &u32s(&[8 + tfra.len() as u32 + 16]));
    let mfra = bx(b"mfra", &cat(&[tfra, mfro]));

    (cat(&[head, moof, mdat, mfra]), moof_start)
}

fn nodes_of<'a>(tree: &'a ParseTree, typ: &[u8; 4]) -> Vec<&'a BoxNode> {
    tree.iter().filter(|n| &n.header.typ.0 == typ).collect()
}

fn run_detail(node: &BoxNode) -> &TrackRunBox {
    match node.payload.as_ref().and_then(|p| p.detail.as_ref()) {
        Some(PayloadDetail::TrackRun(run)) => run,
        _ => panic!("Expected track run detail"),
    }
}

#[test]
fn clean_fragmented_file_has_no_issues() {
    let (data, _) = fragmented_file();
    let tree = full_validation_tree(data);
    assert!(tree.issues.is_empty(), "unexpected issues: {:?}", tree.issues);
    assert_eq!(tree.nodes.len(), 5);
}

#[test]
fn track_runs_resolve_against_fragment_environment() {
    let (data, moof_start) = fragmented_file();
    let tree = full_validation_tree(data);
    let runs = nodes_of(&tree, b"trun");
    assert_eq!(runs.len(), 2);

    let first = run_detail(runs[0]);
    let data_start = moof_start + 128;
    assert_eq!(first.track_id, Some(1));
    assert_eq!(first.run_index, 0);
    assert_eq!(first.first_sample_number, 1);
    assert_eq!(first.start_data_offset, Some(data_start));
    assert_eq!(first.start_decode_time, Some(5000));
    assert_eq!(first.end_decode_time, Some(8000));
    assert_eq!(first.total_size, Some(600));
    assert_eq!(first.entries.len(), 3);
    assert_eq!(first.entries[1].duration, Some(1000));
    assert_eq!(first.entries[1].decode_time, Some(6000));
    assert_eq!(first.entries[1].byte_range, Some(data_start + 100..data_start + 300));
    assert_eq!(runs[0].payload.as_ref().unwrap().value("data_start"), Some(data_start.to_string().as_str()));

    // No data offset: continues where the previous run ended, with trex sizes.
    let second = run_detail(runs[1]);
    assert_eq!(second.run_index, 1);
    assert_eq!(second.first_sample_number, 4);
    assert_eq!(second.start_data_offset, Some(data_start + 600));
    assert_eq!(second.start_decode_time, Some(8000));
    assert_eq!(second.entries[0].size, Some(200));
    assert_eq!(second.entries[0].byte_range, Some(data_start + 600..data_start + 800));
    assert_eq!(second.end_decode_time, Some(8500));
}

#[test]
fn tfra_entries_resolve_to_seen_fragments() {
    let (data, moof_start) = fragmented_file();
    let tree = full_validation_tree(data);
    let tfra = nodes_of(&tree, b"tfra");
    let detail: &TrackFragmentRandomAccessBox = match tfra[0].payload.as_ref().and_then(|p| p.detail.as_ref()) {
        Some(PayloadDetail::TrackFragmentRandomAccess(t)) => t,
        _ => panic!("Expected tfra detail"),
    };

    assert_eq!(detail.entry_count, 1);
    assert_eq!(detail.traf_number_size, 1);
    let entry = &detail.entries[0];
    assert_eq!(entry.moof_offset, moof_start);
    assert_eq!(entry.trun_number, 2);
    let resolved = entry.resolved.as_ref().expect("entry should resolve");
    assert_eq!(resolved.fragment_sequence_number, Some(1));
    assert_eq!(resolved.track_id, Some(1));
    assert_eq!(resolved.run_decode_time, Some(8000));
    assert_eq!(resolved.run_data_offset, Some(moof_start + 128 + 600));
    assert_eq!(resolved.run_sample_count, Some(1));
    assert_eq!(tfra[0].payload.as_ref().unwrap().value("entries[0].fragment_sequence_number"), Some("1"));
}

#[test]
fn explicit_base_data_offset_wins() {
    let traf = cat(&[
        tfhd(0x000001 | 0x000008, 2, &[&7000u64.to_be_bytes()[..], &40u32.to_be_bytes()].concat()),
        trun(0x001, 2, Some(10), &[]),
    ]);
    let data = cat(&[ftyp(), moof(1, &[traf])]);
    let tree = full_validation_tree(data);
    let run = run_detail(nodes_of(&tree, b"trun")[0]);

    assert_eq!(run.track_id, Some(2));
    assert_eq!(run.start_data_offset, Some(7010));
    // Synthesized from the tfhd default duration, no default size.
    assert_eq!(run.entries.len(), 2);
    assert_eq!(run.entries[1].duration, Some(40));
    assert_eq!(run.entries[1].data_offset, None);
    assert_eq!(run.total_duration, Some(80));
    assert_eq!(run.total_size, None);
}

#[test]
fn second_traf_continues_after_previous_traf_data() {
    let traf1 = cat(&[tfhd(0x000008 | 0x000010, 1, &u32s(&[10, 50])), trun(0x001, 2, Some(100), &[])]);
    let traf2 = cat(&[tfhd(0x000008 | 0x000010, 2, &u32s(&[10, 30])), trun(0, 1, None, &[])]);
    let data = cat(&[ftyp(), moof(1, &[traf1, traf2])]);
    let moof_start = ftyp().len() as u64;
    let tree = full_validation_tree(data);
    let runs = nodes_of(&tree, b"trun");

    assert_eq!(run_detail(runs[0]).end_data_offset, Some(moof_start + 200));
    assert_eq!(run_detail(runs[1]).start_data_offset, Some(moof_start + 200));
    assert_eq!(run_detail(runs[1]).track_id, Some(2));
    assert_eq!(run_detail(runs[1]).run_index, 0);
}

#[test]
fn runs_without_durations_are_reported() {
    let traf = cat(&[tfhd(0, 1, &[]), trun(0x200, 2, None, &[10, 20])]);
    let data = cat(&[ftyp(), moof(1, &[traf])]);
    let tree = full_validation_tree(data);

    let issues = issues_with(&tree, "VR-017");
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].severity, Severity::Error);
    assert!(issues[0].message.contains("track 1, run #1, samples 1-2"));
    assert!(issues[0].message.contains("missing sample durations for entries [0, 1]"));
}

#[test]
fn empty_run_is_reported() {
    let traf = cat(&[tfhd(0x000008, 1, &u32s(&[10])), trun(0, 0, None, &[])]);
    let tree = full_validation_tree(cat(&[ftyp(), moof(1, &[traf])]));
    let issues = issues_with(&tree, "VR-017");
    assert_eq!(issues.len(), 1);
    assert!(issues[0].message.contains("declares 0 samples"));
}

#[test]
fn fragment_sequence_numbers_must_increase() {
    let data = cat(&[ftyp(), moof(2, &[]), moof(2, &[]), moof(0, &[])]);
    let tree = full_validation_tree(data);
    let issues = issues_with(&tree, "VR-016");

    assert_eq!(issues.len(), 3);
    assert!(issues[0].message.contains("non-monotonic sequence number 2"));
    assert!(issues.iter().any(|i| i.message.contains("sequence number is zero")));
    assert!(issues.iter().all(|i| i.severity == Severity::Warning));
}

#[test]
fn structure_only_skips_fragment_rules() {
    let data = cat(&[ftyp(), moof(0, &[])]);
    let tree = tolerant_tree(data);
    assert!(issues_with(&tree, "VR-016").is_empty());
    // Decoders still run.
    let mfhd = nodes_of(&tree, b"mfhd")[0];
    assert_eq!(mfhd.payload.as_ref().unwrap().value("sequence_number"), Some("0"));
}
