//! Fingerprint every image in a directory and verify each result.
//!
//! Run examples:
//! # Fingerprint a folder of renders for user "alice" with 8 threads
//! cargo run --bin batch -- -i renders/ -o marked/ -u alice -t 8
//!
//! # Creator marker, verbose per-file output
//! cargo run --bin batch -- -i renders/ -o marked/ --creator -v

use anyhow::{bail, Result};
use clap::Parser;
use log::warn;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;
use studio_fingerprint::raster::mime_for_path;
use studio_fingerprint::{decode_invisible_watermark, embed_invisible_watermark, Fingerprint};

// ============================================================================
// CLI ARGUMENTS
// ============================================================================

#[derive(Parser, Clone)]
#[command(version, about = "Batch fingerprinting for generated images", long_about = None)]
struct Cli {
    /// Directory of images to fingerprint
    #[arg(short = 'i', long)]
    input_dir: PathBuf,

    /// Directory the fingerprinted PNGs are written to
    #[arg(short = 'o', long)]
    output_dir: PathBuf,

    /// The user the images are attributed to
    #[arg(short = 'u', long, conflicts_with = "creator")]
    user: Option<String>,

    /// Attribute the images to the studio creator
    #[arg(long)]
    creator: bool,

    /// Number of worker threads
    #[arg(short = 't', long, default_value = "4")]
    num_threads: usize,

    /// Enable verbose output
    #[arg(short = 'v', long)]
    verbose: bool,
}

// ============================================================================
// STATISTICS TRACKING
// ============================================================================

#[derive(Debug)]
struct BatchStatistics {
    processed: AtomicUsize,
    verified: AtomicUsize,
    // Image too small to carry the payload; original copied through
    unchanged: AtomicUsize,
    // Fingerprint written but not read back
    mismatched: AtomicUsize,
    failed: AtomicUsize,

    input_bytes: AtomicU64,
    output_bytes: AtomicU64,

    total_time_ms: AtomicU64,
    max_time_ms: AtomicU64,
    failures: Mutex<Vec<String>>,

    start_time: Instant,
}

impl BatchStatistics {
    fn new() -> Self {
        Self {
            processed: AtomicUsize::new(0),
            verified: AtomicUsize::new(0),
            unchanged: AtomicUsize::new(0),
            mismatched: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            input_bytes: AtomicU64::new(0),
            output_bytes: AtomicU64::new(0),
            total_time_ms: AtomicU64::new(0),
            max_time_ms: AtomicU64::new(0),
            failures: Mutex::new(Vec::new()),
            start_time: Instant::now(),
        }
    }

    fn record(&self, outcome: &Outcome, elapsed_ms: u64) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.total_time_ms.fetch_add(elapsed_ms, Ordering::Relaxed);
        self.max_time_ms.fetch_max(elapsed_ms, Ordering::Relaxed);
        match outcome {
            Outcome::Verified { input, output } => {
                self.verified.fetch_add(1, Ordering::Relaxed);
                self.input_bytes.fetch_add(*input, Ordering::Relaxed);
                self.output_bytes.fetch_add(*output, Ordering::Relaxed);
            }
            Outcome::Unchanged => {
                self.unchanged.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::Mismatch(_) => {
                self.mismatched.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn record_failure(&self, path: &Path, reason: String) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut failures) = self.failures.lock() {
            failures.push(format!("{}: {}", path.display(), reason));
        }
    }

    fn print_report(&self) {
        let processed = self.processed.load(Ordering::Relaxed);
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let avg_ms = if processed > 0 {
            self.total_time_ms.load(Ordering::Relaxed) / processed as u64
        } else {
            0
        };

        println!("\n=== BATCH REPORT ===");
        println!("  Processed:        {}", processed);
        println!("  Verified:         {}", self.verified.load(Ordering::Relaxed));
        println!("  Unchanged:        {}", self.unchanged.load(Ordering::Relaxed));
        println!("  Mismatched:       {}", self.mismatched.load(Ordering::Relaxed));
        println!("  Failed:           {}", self.failed.load(Ordering::Relaxed));
        println!(
            "  Bytes in/out:     {} / {}",
            self.input_bytes.load(Ordering::Relaxed),
            self.output_bytes.load(Ordering::Relaxed)
        );
        println!("  Avg / max time:   {} ms / {} ms", avg_ms, self.max_time_ms.load(Ordering::Relaxed));
        if elapsed > 0.0 {
            println!("  Throughput:       {:.2} images/s", processed as f64 / elapsed);
        }

        if let Ok(failures) = self.failures.lock() {
            for failure in failures.iter() {
                println!("  ✗ {}", failure);
            }
        }
    }
}

// ============================================================================
// PER-IMAGE WORK
// ============================================================================

enum Outcome {
    Verified { input: u64, output: u64 },
    Unchanged,
    Mismatch(Option<String>),
}

fn process_image(path: &Path, output_dir: &Path, payload: &str) -> Result<Outcome> {
    let img_data = fs::read(path)?;
    let mime_type = mime_for_path(path);

    let marked = embed_invisible_watermark(&img_data, mime_type, payload)?;
    let out_path = output_path(path, output_dir);

    if marked == img_data {
        fs::write(&out_path, &marked)?;
        return Ok(Outcome::Unchanged);
    }

    let recovered = decode_invisible_watermark(&marked, "image/png")?;
    if recovered.as_deref() != Some(payload) {
        return Ok(Outcome::Mismatch(recovered));
    }

    fs::write(&out_path, &marked)?;
    Ok(Outcome::Verified {
        input: img_data.len() as u64,
        output: marked.len() as u64,
    })
}

fn output_path(path: &Path, output_dir: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    output_dir.join(format!("{}.png", stem))
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && mime_for_path(&path).starts_with("image/") {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

fn run_worker(
    thread_id: usize,
    paths: Vec<PathBuf>,
    output_dir: PathBuf,
    payload: String,
    stats: Arc<BatchStatistics>,
    verbose: bool,
) {
    for path in paths {
        let start_time = Instant::now();
        match process_image(&path, &output_dir, &payload) {
            Ok(outcome) => {
                let elapsed_ms = start_time.elapsed().as_millis() as u64;
                if verbose {
                    let status = match &outcome {
                        Outcome::Verified { .. } => "verified".to_string(),
                        Outcome::Unchanged => "unchanged (too small)".to_string(),
                        Outcome::Mismatch(found) => format!("MISMATCH, read back {:?}", found),
                    };
                    println!("[Thread-{}] {} -> {} ({} ms)", thread_id, path.display(), status, elapsed_ms);
                }
                stats.record(&outcome, elapsed_ms);
            }
            Err(e) => {
                warn!("[Thread-{}] {} failed: {}", thread_id, path.display(), e);
                stats.record_failure(&path, e.to_string());
            }
        }
    }
}

// ============================================================================
// MAIN
// ============================================================================

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let payload = match (&cli.user, cli.creator) {
        (_, true) => Fingerprint::Creator,
        (Some(name), false) => Fingerprint::User(name.clone()),
        (None, false) => bail!("Pass either --user <NAME> or --creator"),
    }
    .payload()
    .to_string();

    let images = list_images(&cli.input_dir)?;
    if images.is_empty() {
        bail!("No images found in '{}'", cli.input_dir.display());
    }
    fs::create_dir_all(&cli.output_dir)?;

    let num_threads = cli.num_threads.clamp(1, images.len());
    println!(
        "Fingerprinting {} images from '{}' with {} threads",
        images.len(),
        cli.input_dir.display(),
        num_threads
    );

    let stats = Arc::new(BatchStatistics::new());

    // Deal the files out round-robin
    let mut shares: Vec<Vec<PathBuf>> = vec![Vec::new(); num_threads];
    for (i, path) in images.into_iter().enumerate() {
        shares[i % num_threads].push(path);
    }

    let mut handles = vec![];
    for (thread_id, paths) in shares.into_iter().enumerate() {
        let stats_clone = Arc::clone(&stats);
        let output_dir = cli.output_dir.clone();
        let payload = payload.clone();
        let verbose = cli.verbose;
        handles.push(thread::spawn(move || {
            run_worker(thread_id, paths, output_dir, payload, stats_clone, verbose)
        }));
    }

    for handle in handles {
        if handle.join().is_err() {
            warn!("Worker thread panicked");
        }
    }

    stats.print_report();

    if stats.failed.load(Ordering::Relaxed) + stats.mismatched.load(Ordering::Relaxed) > 0 {
        bail!("Some images could not be fingerprinted");
    }
    Ok(())
}
