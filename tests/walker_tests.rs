mod common;

use common::*;
use isoinspect::walker::{
    GUARD_CORRUPTION_BUDGET_EXCEEDED, GUARD_RECURSION_DEPTH_EXCEEDED, GUARD_ZERO_SIZE_LOOP, PAYLOAD_TRUNCATED,
    WalkEvent,
};
use isoinspect::{
    CancellationToken, HeaderError, MemoryReader, NodeStatus, ParseContext, ParseError, ParseEventKind,
    ParseOptions, ParsePipeline, StreamingBoxWalker,
};

fn walk(data: Vec<u8>, options: ParseOptions) -> Vec<WalkEvent> {
    let reader = MemoryReader::new(data);
    StreamingBoxWalker::new(&reader, options, CancellationToken::new())
        .collect::<Result<Vec<_>, _>>()
        .expect("walk should not fail")
}

fn outline(events: &[WalkEvent]) -> Vec<String> {
    events
        .iter()
        .map(|e| {
            let mark = if e.kind.is_start() { "+" } else { "-" };
            format!("{mark}{}@{}", e.kind.header().typ, e.kind.depth())
        })
        .collect()
}

fn tree_with(data: Vec<u8>, options: ParseOptions) -> isoinspect::ParseTree {
    let reader = MemoryReader::new(data);
    ParsePipeline::new(options)
        .parse_tree(&reader, &ParseContext::new())
        .expect("parse should not fail")
}

#[test]
fn start_and_finish_events_pair_up() {
    let moov = bx(b"moov", &cat(&[mvhd(1000, 0), bx(b"trak", &tkhd(1, 0, 1))]));
    let events = walk(cat(&[ftyp(), moov]), ParseOptions::tolerant());

    assert_eq!(
        outline(&events),
        vec![
            "+ftyp@0", "-ftyp@0", "+moov@0", "+mvhd@1", "-mvhd@1", "+trak@1", "+tkhd@2", "-tkhd@2", "-trak@1",
            "-moov@0",
        ]
    );
    assert!(events.iter().all(|e| e.issues.is_empty()));
}

#[test]
fn sample_entries_are_entered_past_their_fixed_fields() {
    let data = movie_with_stbl(&[stsd(&[visual_entry(b"avc1", 640, 360, &avcc(4))])]);
    let events = walk(data, ParseOptions::tolerant());
    let entered: Vec<String> = outline(&events).into_iter().filter(|s| s.starts_with('+')).collect();
    assert!(entered.contains(&"+avc1@6".to_string()), "{entered:?}");
    assert!(entered.contains(&"+avcC@7".to_string()), "{entered:?}");
}

#[test]
fn zero_length_run_stops_the_container_once() {
    let empties: Vec<Vec<u8>> = (0..5).map(|_| bx(b"free", &[])).collect();
    let moov = bx(b"moov", &cat(&[cat(&empties), mvhd(1000, 0)]));
    let tree = tolerant_tree(cat(&[ftyp(), moov]));

    let guard = issues_with(&tree, GUARD_ZERO_SIZE_LOOP);
    assert_eq!(guard.len(), 1);
    assert_eq!(guard[0].affected_node_ids, vec![24]);
    assert_eq!(guard[0].byte_range, Some(48..56));
    let moov = &tree.nodes[1];
    // Two allowed empties plus the one that trips the guard, reported as a leaf.
    assert_eq!(moov.children.len(), 3);
    assert_eq!(moov.children[2].header.start, 48);
    assert!(moov.children[2].children.is_empty());
    assert_eq!(moov.status, NodeStatus::Partial);
}

#[test]
fn zero_length_run_aborts_in_strict_mode() {
    let empties: Vec<Vec<u8>> = (0..3).map(|_| bx(b"free", &[])).collect();
    let data = cat(&[ftyp(), bx(b"moov", &cat(&empties))]);
    match strict_tree(data) {
        Err(ParseError::Guard { code, .. }) => assert_eq!(code, GUARD_ZERO_SIZE_LOOP),
        other => panic!("Expected guard error, got {other:?}"),
    }
}

#[test]
fn two_zero_length_boxes_are_allowed() {
    let data = cat(&[ftyp(), bx(b"moov", &cat(&[bx(b"free", &[]), bx(b"free", &[]), mvhd(1000, 0)]))]);
    let tree = tolerant_tree(data);
    assert!(issues_with(&tree, GUARD_ZERO_SIZE_LOOP).is_empty());
    assert_eq!(tree.nodes[1].children.len(), 3);
}

#[test]
fn recursion_depth_guard_treats_deep_container_as_leaf() {
    let nested = bx(b"moov", &bx(b"trak", &bx(b"mdia", &bx(b"minf", &[]))));
    let options = ParseOptions { max_traversal_depth: 2, ..ParseOptions::tolerant() };
    let tree = tree_with(cat(&[ftyp(), nested]), options);

    let guard = issues_with(&tree, GUARD_RECURSION_DEPTH_EXCEEDED);
    assert_eq!(guard.len(), 1);
    assert_eq!(guard[0].affected_node_ids, vec![40]);
    let mdia = tree.find(40).expect("mdia node");
    assert!(mdia.children.is_empty());
    assert_eq!(mdia.status, NodeStatus::Partial);
}

#[test]
fn frame_issue_cap_drops_excess_issues() {
    let traks: Vec<Vec<u8>> = (0..3).map(|_| bx(b"trak", &[])).collect();
    let data = cat(&[ftyp(), bx(b"moov", &cat(&traks))]);

    let uncapped = ParseOptions { max_traversal_depth: 1, ..ParseOptions::tolerant() };
    let tree = tree_with(data.clone(), uncapped.clone());
    assert_eq!(issues_with(&tree, GUARD_RECURSION_DEPTH_EXCEEDED).len(), 3);

    let capped = ParseOptions { max_issues_per_frame: 1, ..uncapped };
    let tree = tree_with(data, capped);
    assert_eq!(issues_with(&tree, GUARD_RECURSION_DEPTH_EXCEEDED).len(), 1);
    assert_eq!(tree.nodes[1].children.len(), 3);
}

#[test]
fn corruption_budget_stops_traversal() {
    let moov = bx(b"moov", &[0, 0, 0, 4, b'f', b'r', b'e', b'e']);
    let data = cat(&[ftyp(), moov, bx(b"free", &[0; 4])]);
    let options = ParseOptions { max_corruption_events: 0, ..ParseOptions::tolerant() };
    let tree = tree_with(data, options);

    assert_eq!(codes(&tree), vec!["header.invalid_size", GUARD_CORRUPTION_BUDGET_EXCEEDED]);
    assert_eq!(tree.nodes.len(), 2, "the trailing free box must not be visited");
}

#[test]
fn header_failure_inside_container_keeps_siblings_above() {
    let moov = bx(b"moov", &[0, 0, 0, 4, b'f', b'r', b'e', b'e']);
    let data = cat(&[ftyp(), moov, bx(b"free", &[0; 4])]);
    let tree = tolerant_tree(data);

    let invalid = issues_with(&tree, "header.invalid_size");
    assert_eq!(invalid.len(), 1);
    assert_eq!(invalid[0].byte_range, Some(32..40));
    assert_eq!(invalid[0].affected_node_ids, vec![24]);
    assert_eq!(tree.nodes.len(), 3);
    assert_eq!(tree.nodes[1].status, NodeStatus::Corrupted);
    assert_eq!(tree.nodes[2].status, NodeStatus::Valid);
}

fn oversized_mdat() -> Vec<u8> {
    let mut mdat = bx(b"mdat", &[0u8; 8]);
    mdat[..4].copy_from_slice(&100u32.to_be_bytes());
    cat(&[ftyp(), mdat])
}

#[test]
fn oversized_box_aborts_in_strict_mode() {
    match strict_tree(oversized_mdat()) {
        Err(ParseError::Header { offset, source: HeaderError::ExceedsParent { expected_end, parent_end } }) => {
            assert_eq!(offset, 24);
            assert_eq!(expected_end, 124);
            assert_eq!(parent_end, 40);
        }
        other => panic!("Expected ExceedsParent, got {other:?}"),
    }
}

#[test]
fn oversized_box_is_clamped_in_tolerant_mode() {
    let tree = tolerant_tree(oversized_mdat());
    let truncated = issues_with(&tree, PAYLOAD_TRUNCATED);

    assert_eq!(truncated.len(), 1);
    assert_eq!(truncated[0].byte_range, Some(40..124));
    assert_eq!(truncated[0].affected_node_ids, vec![24]);
    let mdat = tree.find(24).expect("mdat node");
    assert_eq!(mdat.header.total_size, 16);
    assert_eq!(mdat.status, NodeStatus::Corrupted);
}

#[test]
fn oversized_child_is_clamped_to_its_parent() {
    let mut free = bx(b"free", &[0u8; 8]);
    free[..4].copy_from_slice(&64u32.to_be_bytes());
    let data = cat(&[ftyp(), bx(b"moov", &free)]);
    let tree = tolerant_tree(data);

    let truncated = issues_with(&tree, PAYLOAD_TRUNCATED);
    assert_eq!(truncated.len(), 1);
    assert_eq!(truncated[0].byte_range, Some(48..96));
    assert_eq!(truncated[0].affected_node_ids, vec![24]);
    assert_eq!(tree.find(32).map(|n| n.header.total_size), Some(16));

    // The overrun belongs to the container that was overrun.
    let moov = tree.find(24).expect("moov node");
    assert_eq!(moov.status, NodeStatus::Corrupted);
    assert!(moov.issues.iter().any(|i| i.code == PAYLOAD_TRUNCATED));
    let free = tree.find(32).expect("free node");
    assert!(free.issues.is_empty());
    assert_eq!(free.status, NodeStatus::Valid);
}

#[test]
fn cancellation_ends_the_session() {
    let token = CancellationToken::new();
    token.cancel();
    let reader = MemoryReader::new(movie_with_stbl(&[]));
    let ctx = ParseContext::new().with_cancellation(token);
    let result = ParsePipeline::tolerant().parse_tree(&reader, &ctx);
    assert!(matches!(result, Err(ParseError::Cancelled)));
}

#[test]
fn walker_is_fused_after_an_error() {
    let reader = MemoryReader::new(oversized_mdat());
    let mut walker = StreamingBoxWalker::new(&reader, ParseOptions::strict(), CancellationToken::new());

    assert!(matches!(walker.next(), Some(Ok(WalkEvent { kind: ParseEventKind::WillStartBox { .. }, .. }))));
    assert!(matches!(walker.next(), Some(Ok(_))));
    assert!(matches!(walker.next(), Some(Err(ParseError::Header { .. }))));
    assert!(walker.next().is_none());
    assert!(walker.next().is_none());
}

#[test]
fn pipeline_events_carry_metadata_and_payloads() {
    let events = collect_events(movie_with_stbl(&[stco(&[100])]), ParseOptions::tolerant());
    let stco = events
        .iter()
        .find(|e| e.kind.is_start() && &e.kind.header().typ.0 == b"stco")
        .expect("stco start event");

    assert_eq!(stco.metadata.as_ref().map(|m| m.name.as_str()), Some("Chunk Offset Box"));
    assert!(stco.payload.is_some());
    let finish = events
        .iter()
        .find(|e| !e.kind.is_start() && &e.kind.header().typ.0 == b"stco")
        .expect("stco finish event");
    assert!(finish.payload.is_none());
}
