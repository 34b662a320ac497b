use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{ArgAction, Parser};
use isoinspect::{
    BoxCatalog, BoxNode, ChunkedFileReader, JsonTreeExporter, MappedReader, ParseContext,
    ParseOptions, ParsePipeline, ParseTree, PlaintextIssueSummaryExporter, RandomAccessReader,
    ResearchLogWriter, ValidationPreset, reader::DEFAULT_CHUNK_SIZE,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "ISO base media file inspector")]
struct Args {
    /// MP4/ISOBMFF file path
    path: PathBuf,

    /// Abort on the first structural error (default)
    #[arg(long, conflicts_with = "tolerant")]
    strict: bool,

    /// Record structural damage as issues and keep walking
    #[arg(long)]
    tolerant: bool,

    /// Maximum container nesting depth
    #[arg(long)]
    max_depth: Option<usize>,

    /// Consecutive zero-length boxes allowed under one parent
    #[arg(long)]
    max_zero_length: Option<usize>,

    /// Read-through chunk size in bytes
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Memory-map the file instead of reading it in chunks
    #[arg(long, action = ArgAction::SetTrue)]
    mmap: bool,

    /// Replace the bundled box catalog with this JSON file
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Validation preset: all-checks or structural
    #[arg(long)]
    preset: Option<String>,

    /// Append unknown box types to this JSON research log
    #[arg(long, value_name = "PATH", num_args = 0..=1, default_missing_value = "")]
    research_log: Option<PathBuf>,

    /// Emit the tree as JSON
    #[arg(long, action = ArgAction::SetTrue, conflicts_with = "issues")]
    json: bool,

    /// Print the issue summary instead of the tree
    #[arg(long, action = ArgAction::SetTrue)]
    issues: bool,

    /// Hex dump the payload of the box starting at this offset
    #[arg(long)]
    raw: Option<u64>,

    /// Bytes to show with --raw (0 means the whole payload)
    #[arg(long, default_value_t = 256)]
    bytes: usize,

    /// Debug logging
    #[arg(short, long, action = ArgAction::SetTrue)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut options = if args.tolerant { ParseOptions::tolerant() } else { ParseOptions::strict() };
    if let Some(depth) = args.max_depth {
        options.max_traversal_depth = depth;
    }
    if let Some(n) = args.max_zero_length {
        options.max_zero_length_boxes_per_parent = n;
    }

    let mut pipeline = ParsePipeline::new(options);
    if let Some(path) = &args.catalog {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading catalog {}", path.display()))?;
        let catalog = BoxCatalog::from_json(&json)
            .with_context(|| format!("loading catalog {}", path.display()))?;
        pipeline = pipeline.with_catalog(catalog);
    }

    if let Some(id) = &args.preset {
        let preset = ValidationPreset::builtin()
            .into_iter()
            .find(|p| &p.id == id)
            .with_context(|| format!("unknown preset {id}"))?;
        pipeline = pipeline.with_preset(preset);
    }
    if let Some(path) = &args.research_log {
        // A bare --research-log uses the per-user default location.
        let path = if path.as_os_str().is_empty() {
            ResearchLogWriter::default_path().context("no home directory for the research log")?
        } else {
            path.clone()
        };
        let log = ResearchLogWriter::open(&path)
            .with_context(|| format!("opening research log {}", path.display()))?;
        pipeline = pipeline.with_research_log(Arc::new(log));
    }

    let reader = open_reader(&args)?;
    let ctx = ParseContext::new().with_source(&args.path);
    let tree = pipeline
        .parse_tree(reader.as_ref(), &ctx)
        .with_context(|| format!("parsing {}", args.path.display()))?;

    if args.json {
        let json = JsonTreeExporter::new().with_source(&args.path).export(&tree)?;
        println!("{json}");
    } else if args.issues {
        print!("{}", PlaintextIssueSummaryExporter::new().with_source(&args.path).export(&tree));
    } else {
        for node in &tree.nodes {
            print_node(node, 0);
        }
        let errors = tree.issues.iter().filter(|i| i.is_error()).count();
        if !tree.issues.is_empty() {
            println!("\n{} issue(s), {} error(s); rerun with --issues for details", tree.issues.len(), errors);
        }
    }

    if let Some(offset) = args.raw {
        dump_raw(&tree, reader.as_ref(), offset, args.bytes)?;
    }
    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "isoinspect=debug" } else { "isoinspect=warn" })
    });
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn open_reader(args: &Args) -> anyhow::Result<Box<dyn RandomAccessReader>> {
    if args.mmap {
        let reader = MappedReader::open(&args.path)
            .with_context(|| format!("mapping {}", args.path.display()))?;
        return Ok(Box::new(reader));
    }
    let file = File::open(&args.path).with_context(|| format!("opening {}", args.path.display()))?;
    let reader = ChunkedFileReader::with_chunk_size(file, args.chunk_size)
        .with_context(|| format!("reading {}", args.path.display()))?;
    Ok(Box::new(reader))
}

// ---------- Human-readable tree ----------

fn print_node(node: &BoxNode, depth: usize) {
    let indent = "  ".repeat(depth);
    let hdr = &node.header;
    let name = node.metadata.as_ref().map(|m| m.name.as_str()).unwrap_or("");
    println!(
        "{indent}{:>8} {:>10} {} {}{}",
        format!("{:#x}", hdr.start),
        hdr.total_size,
        hdr.display_type(),
        name,
        match node.status {
            isoinspect::NodeStatus::Valid => String::new(),
            status => format!(" [{status:?}]"),
        }
    );
    if let Some(payload) = &node.payload {
        for field in payload.fields.iter().filter(|f| !f.name.contains('[')) {
            println!("{indent}           {} = {}", field.name, field.value);
        }
    }
    for issue in &node.issues {
        println!("{indent}           ! {} {}: {}", issue.severity, issue.code, issue.message);
    }
    for child in &node.children {
        print_node(child, depth + 1);
    }
}

// ---------- Raw dump ----------

fn dump_raw(tree: &ParseTree, reader: &dyn RandomAccessReader, offset: u64, limit: usize) -> anyhow::Result<()> {
    let node = tree
        .find(offset)
        .with_context(|| format!("no box starts at offset {offset}"))?;
    let range = node.header.payload_range();
    let len = range.end - range.start;
    let take = if limit == 0 { len } else { len.min(limit as u64) };
    let bytes = reader.read(range.start, usize::try_from(take)?)?;
    println!("\n== {} payload ({} of {} bytes)", node.label(), take, len);
    print!("{}", hex_dump(&bytes, range.start));
    Ok(())
}

fn hex_dump(bytes: &[u8], start_offset: u64) -> String {
    let mut out = String::new();
    for (i, chunk) in bytes.chunks(16).enumerate() {
        let offs = start_offset + (i as u64) * 16;
        let hexs: String = chunk.iter().map(|b| format!("{b:02x} ")).collect();
        let ascii: String = chunk
            .iter()
            .map(|&c| if (32..=126).contains(&c) { c as char } else { '.' })
            .collect();
        out.push_str(&format!("{offs:08x}  {hexs:<48}  |{ascii}|\n"));
    }
    out
}
