//! Public facade: reader + walker + registry + validator + issue store.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

use crate::catalog::{BoxCatalog, BoxDescriptor};
use crate::environment::{DecodeEnvironment, FragmentEnvironmentCoordinator, MetadataEnvironmentCoordinator};
use crate::error::{ParseError, Result};
use crate::issues::{ParseIssue, ParseIssueStore};
use crate::payload::ParsedBoxPayload;
use crate::reader::RandomAccessReader;
use crate::registry::BoxParserRegistry;
use crate::research::ResearchLogRecording;
use crate::tree::{ParseTree, ParseTreeBuilder};
use crate::validator::{BoxValidator, ValidationPreset, standard_rules, standard_rules_with_research_log};
use crate::walker::{StreamingBoxWalker, WalkEvent};

pub use crate::walker::ParseEventKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadValidationLevel {
    /// Every rule runs.
    Full,
    /// Payload decoders still run; rules that interpret payloads do not.
    StructureOnly,
}

/// Immutable parse configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOptions {
    pub abort_on_structural_error: bool,
    pub max_corruption_events: usize,
    pub payload_validation_level: PayloadValidationLevel,
    pub max_traversal_depth: usize,
    pub max_zero_length_boxes_per_parent: usize,
    pub max_issues_per_frame: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            abort_on_structural_error: true,
            max_corruption_events: 0,
            payload_validation_level: PayloadValidationLevel::Full,
            max_traversal_depth: 64,
            max_zero_length_boxes_per_parent: 2,
            max_issues_per_frame: 256,
        }
    }
}

impl ParseOptions {
    /// Abort on the first structural error and validate payloads fully.
    pub fn strict() -> Self {
        Self::default()
    }

    /// Record structural errors and keep going, up to 500 corruption events.
    pub fn tolerant() -> Self {
        Self {
            abort_on_structural_error: false,
            max_corruption_events: 500,
            payload_validation_level: PayloadValidationLevel::StructureOnly,
            ..Default::default()
        }
    }
}

/// Cooperative cancellation flag, checked once per header decode.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per-session state handed to [`ParsePipeline::events`].
#[derive(Debug, Clone, Default)]
pub struct ParseContext {
    /// Overrides the pipeline's options for this call.
    pub options: Option<ParseOptions>,
    pub issue_store: Arc<ParseIssueStore>,
    pub source: Option<PathBuf>,
    pub cancellation: CancellationToken,
}

impl ParseContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(mut self, options: ParseOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn with_issue_store(mut self, store: Arc<ParseIssueStore>) -> Self {
        self.issue_store = store;
        self
    }

    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }
}

/// One box start or finish, with everything known about the box at that point.
///
/// The payload is only attached to start events.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParseEvent {
    pub kind: ParseEventKind,
    pub offset: u64,
    pub metadata: Option<BoxDescriptor>,
    pub payload: Option<ParsedBoxPayload>,
    pub issues: Vec<ParseIssue>,
}

#[derive(Debug, Clone)]
pub struct ParsePipeline {
    registry: Arc<BoxParserRegistry>,
    catalog: Arc<BoxCatalog>,
    options: ParseOptions,
    preset: Option<ValidationPreset>,
    research_log: Option<Arc<dyn ResearchLogRecording>>,
}

impl ParsePipeline {
    pub fn new(options: ParseOptions) -> Self {
        Self {
            registry: BoxParserRegistry::shared(),
            catalog: BoxCatalog::shared(),
            options,
            preset: None,
            research_log: None,
        }
    }

    pub fn strict() -> Self {
        Self::new(ParseOptions::strict())
    }

    pub fn tolerant() -> Self {
        Self::new(ParseOptions::tolerant())
    }

    pub fn with_registry(mut self, registry: impl Into<Arc<BoxParserRegistry>>) -> Self {
        self.registry = registry.into();
        self
    }

    pub fn with_catalog(mut self, catalog: impl Into<Arc<BoxCatalog>>) -> Self {
        self.catalog = catalog.into();
        self
    }

    /// Rule switches applied to every session's validator.
    pub fn with_preset(mut self, preset: ValidationPreset) -> Self {
        self.preset = Some(preset);
        self
    }

    /// Unknown boxes are recorded here, attributed to the context's source path.
    pub fn with_research_log(mut self, log: Arc<dyn ResearchLogRecording>) -> Self {
        self.research_log = Some(log);
        self
    }

    pub fn options(&self) -> &ParseOptions {
        &self.options
    }

    pub fn registry(&self) -> &Arc<BoxParserRegistry> {
        &self.registry
    }

    /// Single-pass event stream over `reader`. Consuming it drives the walk.
    pub fn events<'r>(&self, reader: &'r dyn RandomAccessReader, ctx: &ParseContext) -> ParseEvents<'r> {
        let options = ctx.options.clone().unwrap_or_else(|| self.options.clone());
        tracing::debug!(
            source = ?ctx.source,
            length = reader.len(),
            abort_on_structural_error = options.abort_on_structural_error,
            "parse session started"
        );
        let rules = match &self.research_log {
            Some(log) => {
                let file_path = ctx.source.as_ref().map(|p| p.display().to_string()).unwrap_or_default();
                standard_rules_with_research_log(self.registry.clone(), log.clone(), file_path)
            }
            None => standard_rules(self.registry.clone()),
        };
        let mut validator = BoxValidator::with_rules(options.payload_validation_level, rules);
        if let Some(preset) = &self.preset {
            validator.apply_preset(preset);
        }
        ParseEvents {
            walker: StreamingBoxWalker::new(reader, options.clone(), ctx.cancellation.clone()),
            reader,
            registry: self.registry.clone(),
            catalog: self.catalog.clone(),
            validator,
            coordinator: FragmentEnvironmentCoordinator::new(),
            metadata: MetadataEnvironmentCoordinator::new(),
            store: ctx.issue_store.clone(),
            emitted: 0,
            done: false,
        }
    }

    /// Drain the event stream into a tree.
    ///
    /// In strict mode a structural error returns `Err` and no partial tree.
    pub fn parse_tree(&self, reader: &dyn RandomAccessReader, ctx: &ParseContext) -> Result<ParseTree> {
        let mut builder = ParseTreeBuilder::new();
        for event in self.events(reader, ctx) {
            builder.consume(&event?);
        }
        Ok(builder.finish(ctx.issue_store.issues()))
    }
}

impl Default for ParsePipeline {
    fn default() -> Self {
        Self::tolerant()
    }
}

/// Pull iterator returned by [`ParsePipeline::events`]. Fused after an error.
pub struct ParseEvents<'r> {
    walker: StreamingBoxWalker<'r>,
    reader: &'r dyn RandomAccessReader,
    registry: Arc<BoxParserRegistry>,
    catalog: Arc<BoxCatalog>,
    validator: BoxValidator,
    coordinator: FragmentEnvironmentCoordinator,
    metadata: MetadataEnvironmentCoordinator,
    store: Arc<ParseIssueStore>,
    emitted: usize,
    done: bool,
}

impl ParseEvents<'_> {
    pub fn issue_store(&self) -> &Arc<ParseIssueStore> {
        &self.store
    }

    fn process(&mut self, walked: WalkEvent) -> Result<ParseEvent> {
        let WalkEvent { kind, issues } = walked;
        let header = kind.header().clone();
        let depth = kind.depth();
        self.store.record_all(issues.iter().cloned(), Some(depth));

        let payload = if kind.is_start() {
            let env = DecodeEnvironment { metadata: self.metadata.environment(), ..self.coordinator.environment() };
            let payload = self.registry.decode(&header, self.reader, &env).map_err(|source| {
                ParseError::Decode { offset: header.start, box_type: header.typ, source }
            })?;
            self.coordinator.will_start(&header, payload.as_ref());
            self.metadata.will_start(&header, payload.as_ref());
            payload
        } else {
            self.coordinator.did_finish(&header);
            self.metadata.did_finish(&header);
            None
        };

        let mut event = ParseEvent {
            kind,
            offset: header.start,
            metadata: self.catalog.descriptor(&header).cloned(),
            payload,
            issues,
        };
        let found: Vec<ParseIssue> = self
            .validator
            .validate(&event, self.reader)
            .into_iter()
            .map(|v| v.into_parse_issue(&header))
            .collect();
        self.store.record_all(found.iter().cloned(), Some(depth));
        event.issues.extend(found);
        Ok(event)
    }

    fn finish(&mut self) {
        self.done = true;
        let leftover = self.walker.take_pending_issues();
        self.store.record_all(leftover, None);
        let metrics = self.store.metrics();
        tracing::info!(
            events = self.emitted,
            errors = metrics.error_count,
            warnings = metrics.warning_count,
            info = metrics.info_count,
            corruption_events = self.walker.corruption_events(),
            "parse session finished"
        );
    }
}

impl Iterator for ParseEvents<'_> {
    type Item = Result<ParseEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.walker.next() {
            None => {
                self.finish();
                None
            }
            Some(Err(e)) => {
                self.done = true;
                tracing::debug!(error = %e, "parse session aborted");
                Some(Err(e))
            }
            Some(Ok(walked)) => match self.process(walked) {
                Ok(event) => {
                    self.emitted += 1;
                    Some(Ok(event))
                }
                Err(e) => {
                    self.done = true;
                    Some(Err(e))
                }
            },
        }
    }
}

impl std::iter::FusedIterator for ParseEvents<'_> {}
