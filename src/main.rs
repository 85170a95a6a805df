use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use mediadex::analyze::{AnalyzerRegistry, PlainTextConverter};
use mediadex::database::lookup::{self, ArtifactSummary, CatalogStats};
use mediadex::{
    delete_artifact_by_path, dispatch, index_content_root, open_catalog, prune_missing, Catalog,
    ModalitySet, RetryPolicy, RunConfig, SearchReport, SearchRequest,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Local multi-modal content catalog", long_about = None)]
struct Args {
    /// Content root to index
    #[arg(long, default_value = ".")]
    dir: PathBuf,

    /// Catalog database file
    #[arg(long, default_value = "mediadex.db")]
    db: PathBuf,

    /// Path prefix to exclude from indexing and search (repeatable)
    #[arg(long = "exclude")]
    exclude: Vec<PathBuf>,

    /// Skip files larger than this many bytes
    #[arg(long = "max-size")]
    max_size: Option<u64>,

    /// Minimum confidence for reported label matches
    #[arg(long = "min-confidence", default_value_t = 0.3)]
    min_confidence: f64,

    /// Run object detection over images
    #[arg(long)]
    detect: bool,

    /// Run OCR over images
    #[arg(long)]
    ocr: bool,

    /// Generate captions for images
    #[arg(long)]
    describe: bool,

    /// Run face recognition over images
    #[arg(long)]
    faces: bool,

    /// Scan images for QR codes
    #[arg(long)]
    qrcodes: bool,

    /// Extract and index document text
    #[arg(long)]
    documents: bool,

    /// Detector model identifier
    #[arg(long, default_value = "yolov5s")]
    model: String,

    /// Search the catalog; the modality switches narrow the search
    #[arg(long)]
    search: Option<String>,

    /// Treat the whole search string as one literal token
    #[arg(long)]
    exact: bool,

    /// Randomize candidate order during indexing
    #[arg(long)]
    shuffle: bool,

    /// Remove records whose backing file no longer exists
    #[arg(long)]
    prune: bool,

    /// Delete every record for one path
    #[arg(long)]
    delete: Option<PathBuf>,

    /// Show everything recorded about one path
    #[arg(long)]
    show: Option<PathBuf>,

    /// Print per-table row counts
    #[arg(long)]
    stats: bool,

    /// Emit JSON instead of tables
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = build_config(&args);
    if let Err(err) = config.validate() {
        error!(%err, "invalid configuration");
        return ExitCode::from(2);
    }

    match run(&args, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = ?err, "fatal error");
            ExitCode::FAILURE
        }
    }
}

fn build_config(args: &Args) -> RunConfig {
    RunConfig {
        root: args.dir.clone(),
        db_path: args.db.clone(),
        exclusions: args.exclude.clone(),
        max_bytes: args.max_size,
        min_confidence: args.min_confidence,
        model: args.model.clone(),
        shuffle: args.shuffle,
        index: selected_modalities(args),
    }
}

fn selected_modalities(args: &Args) -> ModalitySet {
    ModalitySet {
        labels: args.detect,
        ocr: args.ocr,
        descriptions: args.describe,
        documents: args.documents,
        qr: args.qrcodes,
        people: args.faces,
    }
}

fn run(args: &Args, config: &RunConfig) -> Result<()> {
    let conn = open_catalog(&config.db_path)?;
    let catalog = Catalog::new(conn, RetryPolicy::default());

    let mut acted = false;

    if let Some(path) = &args.delete {
        delete_artifact_by_path(&catalog, path)?;
        info!(path = %path.display(), "catalog records deleted");
        acted = true;
    }

    if args.prune {
        let images = lookup::image_index(catalog.conn())?;
        let documents = lookup::document_paths(catalog.conn())?;
        let pruned = prune_missing(&catalog, &images, &documents)?;
        info!(pruned, "prune complete");
        acted = true;
    }

    if !config.index.is_empty() {
        let registry = AnalyzerRegistry {
            document_converter: Some(Box::new(PlainTextConverter)),
            ..Default::default()
        };
        index_content_root(&catalog, config, &registry)?;
        acted = true;
    }

    if let Some(query) = &args.search {
        let selected = selected_modalities(args);
        let request = SearchRequest {
            query: query.clone(),
            modalities: if selected.is_empty() {
                ModalitySet::all()
            } else {
                selected
            },
            exact: args.exact,
            min_confidence: config.min_confidence,
            exclusions: config.exclusions.clone(),
        };
        let report = dispatch(catalog.conn(), &request)?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_report(&report);
        }
        acted = true;
    }

    if let Some(path) = &args.show {
        match lookup::artifact_summary(catalog.conn(), path, &config.model)? {
            Some(summary) if args.json => {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
            Some(summary) => print_summary(&summary),
            None => println!("no catalog records for {}", path.display()),
        }
        acted = true;
    }

    if args.stats {
        let stats = lookup::catalog_stats(catalog.conn())?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&stats)?);
        } else {
            print_stats(&stats);
        }
        acted = true;
    }

    if !acted {
        warn!("nothing to do; pass a modality switch, --search, --prune, --show or --stats");
    }
    Ok(())
}

fn print_report(report: &SearchReport) {
    for outcome in &report.outcomes {
        println!("{}: {} result(s)", outcome.modality.as_str(), outcome.count);
        for row in &outcome.rows {
            match row.confidence {
                Some(confidence) => {
                    println!("  {:.2}  {}  {}", confidence, row.path, clip(&row.payload, 60))
                }
                None => println!("  {}  {}", row.path, clip(&row.payload, 60)),
            }
        }
    }
}

fn print_summary(summary: &ArtifactSummary) {
    println!("{}", summary.file_path);
    println!("  size:      {} bytes", summary.size);
    println!("  modified:  {}", summary.last_modified);
    if let Some(hash) = &summary.hash_sha256 {
        println!("  sha256:    {hash}");
    }
    if !summary.labels.is_empty() {
        let labels: Vec<String> = summary
            .labels
            .iter()
            .map(|(label, confidence)| format!("{label} ({confidence:.2})"))
            .collect();
        println!("  labels:    {}", labels.join(", "));
    }
    if let Some(current) = summary.labels_current {
        println!("  detection: {}", if current { "current" } else { "stale" });
    }
    if !summary.people.is_empty() {
        println!("  people:    {}", summary.people.join(", "));
    }
    if !summary.qr_payloads.is_empty() {
        println!("  qrcodes:   {}", summary.qr_payloads.join(", "));
    }
    if let Some(text) = &summary.ocr_text {
        println!("  ocr:       {}", clip(text, 60));
    }
    if let Some(text) = &summary.description {
        println!("  caption:   {}", clip(text, 60));
    }
    if summary.has_document {
        println!("  document:  indexed");
    }
}

fn print_stats(stats: &CatalogStats) {
    println!("images:           {}", stats.images);
    println!("detections:       {}", stats.detections);
    println!("empty images:     {}", stats.empty_images);
    println!("ocr results:      {}", stats.ocr_results);
    println!("descriptions:     {}", stats.descriptions);
    println!("persons:          {}", stats.persons);
    println!("person links:     {}", stats.person_links);
    println!("no-face markers:  {}", stats.no_faces);
    println!("qr codes:         {}", stats.qrcodes);
    println!("no-qr markers:    {}", stats.no_qrcodes);
    println!("documents:        {}", stats.documents);
}

fn clip(text: &str, limit: usize) -> String {
    let flat = text.replace(['\n', '\r'], " ");
    if flat.chars().count() <= limit {
        flat
    } else {
        let mut out: String = flat.chars().take(limit).collect();
        out.push_str("...");
        out
    }
}
