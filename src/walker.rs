use std::collections::VecDeque;
use std::ops::Range;

use serde::Serialize;

use crate::boxes::BoxHeader;
use crate::catalog;
use crate::error::{HeaderError, ParseError};
use crate::issues::{ParseIssue, Severity};
use crate::parser::decode_box_header;
use crate::pipeline::{CancellationToken, ParseOptions};
use crate::reader::RandomAccessReader;

pub const HEADER_TRUNCATED_FIELD: &str = "header.truncated_field";
pub const HEADER_INVALID_SIZE: &str = "header.invalid_size";
pub const HEADER_ZERO_SIZE_WITHOUT_PARENT: &str = "header.zero_size_without_parent";
pub const HEADER_EXCEEDS_PARENT: &str = "header.exceeds_parent";
pub const HEADER_OFFSET_OUTSIDE_PARENT: &str = "header.offset_outside_parent";
pub const PAYLOAD_TRUNCATED: &str = "payload.truncated";
pub const GUARD_RECURSION_DEPTH_EXCEEDED: &str = "guard.recursion_depth_exceeded";
pub const GUARD_ZERO_SIZE_LOOP: &str = "guard.zero_size_loop";
pub const GUARD_CORRUPTION_BUDGET_EXCEEDED: &str = "guard.corruption_budget_exceeded";

/// Start or finish of one box. Depth 0 is the top level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ParseEventKind {
    WillStartBox { header: BoxHeader, depth: usize },
    DidFinishBox { header: BoxHeader, depth: usize },
}

impl ParseEventKind {
    pub fn header(&self) -> &BoxHeader {
        match self {
            ParseEventKind::WillStartBox { header, .. } | ParseEventKind::DidFinishBox { header, .. } => header,
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            ParseEventKind::WillStartBox { depth, .. } | ParseEventKind::DidFinishBox { depth, .. } => *depth,
        }
    }

    pub fn is_start(&self) -> bool {
        matches!(self, ParseEventKind::WillStartBox { .. })
    }
}

/// A walker event plus the traversal issues recorded since the previous one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEvent {
    pub kind: ParseEventKind,
    pub issues: Vec<ParseIssue>,
}

#[derive(Debug)]
struct Frame {
    // None for the implicit root frame.
    header: Option<BoxHeader>,
    range: Range<u64>,
    cursor: u64,
    child_depth: usize,
    zero_streak: usize,
    issues_recorded: usize,
    stopped: bool,
}

impl Frame {
    fn node_id(&self) -> Option<u64> {
        self.header.as_ref().map(|h| h.start)
    }
}

/// Single-pass traversal over the box tree.
///
/// Pull-based: each call to `next` decodes at most one header. Containers
/// are entered through an explicit frame stack, so nesting depth never
/// grows the native stack.
pub struct StreamingBoxWalker<'r> {
    reader: &'r dyn RandomAccessReader,
    options: ParseOptions,
    cancellation: CancellationToken,
    frames: Vec<Frame>,
    queue: VecDeque<WalkEvent>,
    pending: Vec<ParseIssue>,
    corruption_events: usize,
    budget_exhausted: bool,
    failed: bool,
}

impl<'r> StreamingBoxWalker<'r> {
    pub fn new(
        reader: &'r dyn RandomAccessReader,
        options: ParseOptions,
        cancellation: CancellationToken,
    ) -> Self {
        let root = Frame {
            header: None,
            range: 0..reader.len(),
            cursor: 0,
            child_depth: 0,
            zero_streak: 0,
            issues_recorded: 0,
            stopped: false,
        };
        Self {
            reader,
            options,
            cancellation,
            frames: vec![root],
            queue: VecDeque::new(),
            pending: Vec::new(),
            corruption_events: 0,
            budget_exhausted: false,
            failed: false,
        }
    }

    pub fn corruption_events(&self) -> usize {
        self.corruption_events
    }

    /// Issues recorded after the last event was emitted.
    pub fn take_pending_issues(&mut self) -> Vec<ParseIssue> {
        std::mem::take(&mut self.pending)
    }

    fn emit(&mut self, kind: ParseEventKind) {
        let issues = std::mem::take(&mut self.pending);
        self.queue.push_back(WalkEvent { kind, issues });
    }

    fn record(&mut self, issue: ParseIssue) {
        let cap = self.options.max_issues_per_frame;
        if let Some(frame) = self.frames.last_mut() {
            if frame.issues_recorded >= cap {
                tracing::debug!(code = %issue.code, "frame issue cap reached, dropping issue");
                return;
            }
            frame.issues_recorded += 1;
        }
        self.pending.push(issue);
    }

    fn record_corruption(&mut self, issue: ParseIssue) {
        tracing::warn!(code = %issue.code, message = %issue.message, "corruption recorded");
        self.record(issue);
        self.corruption_events += 1;
        if !self.budget_exhausted && self.corruption_events > self.options.max_corruption_events {
            self.budget_exhausted = true;
            let message = format!(
                "Corruption budget of {} events exceeded; traversal stopped.",
                self.options.max_corruption_events
            );
            tracing::warn!("{message}");
            self.pending.push(ParseIssue::new(Severity::Error, GUARD_CORRUPTION_BUDGET_EXCEEDED, message));
            for frame in &mut self.frames {
                frame.stopped = true;
            }
        }
    }

    fn stop_current(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            frame.stopped = true;
        }
    }

    fn step(&mut self) -> Result<(), ParseError> {
        if self.cancellation.is_cancelled() {
            return Err(ParseError::Cancelled);
        }
        let Some(frame) = self.frames.last() else {
            return Ok(());
        };
        let offset = frame.cursor;
        let depth = frame.child_depth;
        let frame_end = frame.range.end;
        let parent_id = frame.node_id();
        let parent = frame.header.as_ref().map(|_| frame.range.clone());

        let mut header = match decode_box_header(self.reader, offset, parent) {
            Ok(h) => h,
            Err(HeaderError::Reader(e)) => return Err(ParseError::Reader(e)),
            Err(e) => {
                if self.options.abort_on_structural_error {
                    return Err(ParseError::from_header(offset, e));
                }
                let mut issue = ParseIssue::new(Severity::Error, header_code(&e), header_message(offset, &e))
                    .with_range(offset..frame_end.max(offset));
                if let Some(id) = parent_id {
                    issue = issue.with_node(id);
                }
                self.record_corruption(issue);
                self.stop_current();
                return Ok(());
            }
        };

        if header.end() > frame_end {
            let expected_end = header.end();
            if self.options.abort_on_structural_error {
                return Err(ParseError::Header {
                    offset,
                    source: HeaderError::ExceedsParent { expected_end, parent_end: frame_end },
                });
            }
            if offset + header.header_size > frame_end {
                let e = HeaderError::ExceedsParent { expected_end, parent_end: frame_end };
                let mut issue = ParseIssue::new(Severity::Error, HEADER_EXCEEDS_PARENT, header_message(offset, &e))
                    .with_range(offset..frame_end);
                if let Some(id) = parent_id {
                    issue = issue.with_node(id);
                }
                self.record_corruption(issue);
                self.stop_current();
                return Ok(());
            }
            header.total_size = frame_end - offset;
            let issue = ParseIssue::new(
                Severity::Error,
                PAYLOAD_TRUNCATED,
                format!(
                    "{} at offset {offset} declares end {expected_end} but its parent ends at {frame_end}; clamped.",
                    header.display_type()
                ),
            )
            .with_range(frame_end..expected_end)
            .with_node(parent_id.unwrap_or(header.start));
            self.record_corruption(issue);
        }

        let zero_length = header.total_size == header.header_size;
        let streak = {
            let Some(frame) = self.frames.last_mut() else {
                return Ok(());
            };
            frame.cursor = header.end();
            frame.zero_streak = if zero_length { frame.zero_streak + 1 } else { 0 };
            frame.zero_streak
        };
        // The box that overflows the streak is still reported, as a leaf;
        // scanning of the container stops after it.
        let zero_loop = (streak > self.options.max_zero_length_boxes_per_parent).then(|| {
            format!(
                "More than {} consecutive zero-length boxes; stopped scanning this container at offset {}.",
                self.options.max_zero_length_boxes_per_parent,
                header.end()
            )
        });
        if let Some(message) = &zero_loop {
            tracing::debug!(offset, "zero-size loop guard tripped");
            if self.options.abort_on_structural_error {
                return Err(ParseError::Guard { code: GUARD_ZERO_SIZE_LOOP.to_string(), message: message.clone() });
            }
        }

        let mut recurse = catalog::is_container(header.typ) && !self.budget_exhausted && zero_loop.is_none();
        if recurse && depth >= self.options.max_traversal_depth {
            let message = format!(
                "{} at offset {offset} is nested {depth} levels deep (limit {}); children not visited.",
                header.display_type(),
                self.options.max_traversal_depth
            );
            tracing::debug!(offset, depth, "recursion depth guard tripped");
            if self.options.abort_on_structural_error {
                return Err(ParseError::Guard { code: GUARD_RECURSION_DEPTH_EXCEEDED.to_string(), message });
            }
            let issue = ParseIssue::new(Severity::Error, GUARD_RECURSION_DEPTH_EXCEEDED, message)
                .with_range(header.range())
                .with_node(header.start);
            self.record(issue);
            recurse = false;
        }

        self.emit(ParseEventKind::WillStartBox { header: header.clone(), depth });

        if recurse {
            let payload = header.payload_range();
            let leading = if &header.typ.0 == b"meta" {
                let bytes = self.reader.read_up_to(payload.start, 4)?;
                <[u8; 4]>::try_from(bytes.as_slice()).ok()
            } else {
                None
            };
            let start = (payload.start + catalog::child_offset(&header, leading)).min(payload.end);
            tracing::debug!(typ = %header.display_type(), offset, depth, "entering container");
            self.frames.push(Frame {
                header: Some(header),
                range: start..payload.end,
                cursor: start,
                child_depth: depth + 1,
                zero_streak: 0,
                issues_recorded: 0,
                stopped: false,
            });
        } else {
            let range = header.range();
            self.emit(ParseEventKind::DidFinishBox { header, depth });
            if let Some(message) = zero_loop {
                let mut issue = ParseIssue::new(Severity::Warning, GUARD_ZERO_SIZE_LOOP, message).with_range(range);
                if let Some(id) = parent_id {
                    issue = issue.with_node(id);
                }
                self.record(issue);
                self.stop_current();
            }
        }
        Ok(())
    }
}

impl Iterator for StreamingBoxWalker<'_> {
    type Item = Result<WalkEvent, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(event) = self.queue.pop_front() {
                return Some(Ok(event));
            }
            if self.failed {
                return None;
            }
            let frame = self.frames.last()?;
            if frame.stopped || frame.cursor >= frame.range.end {
                let Some(frame) = self.frames.pop() else {
                    return None;
                };
                if let Some(header) = frame.header {
                    tracing::debug!(typ = %header.display_type(), offset = header.start, "leaving container");
                    self.emit(ParseEventKind::DidFinishBox { header, depth: frame.child_depth - 1 });
                }
                continue;
            }
            if let Err(e) = self.step() {
                self.failed = true;
                self.frames.clear();
                self.queue.clear();
                return Some(Err(e));
            }
        }
    }
}

impl std::iter::FusedIterator for StreamingBoxWalker<'_> {}

fn header_code(e: &HeaderError) -> &'static str {
    match e {
        HeaderError::TruncatedField { .. } => HEADER_TRUNCATED_FIELD,
        HeaderError::InvalidSize { .. } => HEADER_INVALID_SIZE,
        HeaderError::ZeroSizeWithoutParent => HEADER_ZERO_SIZE_WITHOUT_PARENT,
        HeaderError::ExceedsParent { .. } => HEADER_EXCEEDS_PARENT,
        HeaderError::OffsetOutsideParent { .. } | HeaderError::Reader(_) => HEADER_OFFSET_OUTSIDE_PARENT,
    }
}

fn header_message(offset: u64, e: &HeaderError) -> String {
    format!("Box header at offset {offset} could not be decoded: {e}.")
}
