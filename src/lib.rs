pub mod boxes;
pub mod catalog;
pub mod environment;
pub mod error;
pub mod export;
pub mod issues;
pub mod parser;
pub mod payload;
pub mod pipeline;
pub mod reader;
pub mod registry;
pub mod research;
pub mod tree;
pub mod validator;
pub mod walker;

pub use boxes::{BoxHeader, BoxKey, FourCC};
pub use catalog::{BoxCatalog, BoxCategory, BoxDescriptor};
pub use error::{HeaderError, ParseError, ReaderError, ResearchLogError, Result};
pub use export::{JsonTreeExporter, PlaintextIssueSummaryExporter};
pub use issues::{IssueMetrics, ParseIssue, ParseIssueStore, Severity};
pub use parser::{read_box_header, read_full_box_header};
pub use payload::{ParsedBoxPayload, PayloadDetail, PayloadField};
pub use pipeline::{
    CancellationToken, ParseContext, ParseEvent, ParseEventKind, ParseOptions, ParsePipeline,
    PayloadValidationLevel,
};
pub use reader::{ChunkedFileReader, MappedReader, MemoryReader, RandomAccessReader};
pub use registry::{BoxDecoder, BoxParserRegistry, default_registry};
pub use research::{InMemoryResearchLog, ResearchLogEntry, ResearchLogRecording, ResearchLogWriter};
pub use tree::{BoxNode, NodeStatus, ParseTree, ParseTreeBuilder};
pub use validator::{BoxValidator, RuleState, ValidationIssue, ValidationPreset, ValidationRule};
pub use walker::StreamingBoxWalker;
