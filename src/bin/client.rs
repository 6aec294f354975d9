use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use studio_fingerprint::fingerprint::{analyze, watermark_or_original};
use studio_fingerprint::raster::mime_for_path;
use studio_fingerprint::service;
use studio_fingerprint::{Analysis, Fingerprint, WatermarkRequest, WatermarkResponse};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Talk to a running watermark server instead of working locally
    #[arg(short, long, global = true)]
    server: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Owner {
    /// The user the image is attributed to
    #[arg(short, long)]
    user: Option<String>,

    /// Attribute the image to the studio creator
    #[arg(long, conflicts_with = "user")]
    creator: bool,
}

impl Owner {
    fn fingerprint(&self) -> Result<Fingerprint> {
        match (&self.user, self.creator) {
            (_, true) => Ok(Fingerprint::Creator),
            (Some(name), false) => Ok(Fingerprint::User(name.clone())),
            (None, false) => bail!("Pass either --user <NAME> or --creator"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Embed an invisible fingerprint into an image
    Embed {
        /// The image to fingerprint
        #[arg(short, long)]
        input: PathBuf,

        /// Where to write the fingerprinted PNG
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        owner: Owner,
    },
    /// Look for a fingerprint in an image
    Inspect {
        /// The image to check
        #[arg(short, long)]
        input: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match &cli.command {
        Commands::Embed {
            input,
            output,
            owner,
        } => handle_embed(cli.server.as_deref(), input, output, owner.fingerprint()?).await,
        Commands::Inspect { input } => handle_inspect(cli.server.as_deref(), input).await,
    }
}

async fn handle_embed(
    server: Option<&str>,
    input: &PathBuf,
    output: &PathBuf,
    fingerprint: Fingerprint,
) -> Result<()> {
    let img_buf = fs::read(input)?;
    let mime_type = mime_for_path(input).to_string();
    println!("Read '{}' ({} bytes, {})", input.display(), img_buf.len(), mime_type);

    let marked = match server {
        Some(addr) => {
            let request = WatermarkRequest::Embed {
                mime_type,
                fingerprint,
            };
            match service::request(addr, &request, &img_buf).await? {
                WatermarkResponse::Image(bytes) => bytes,
                WatermarkResponse::Rejected(reason) => bail!("Server rejected request: {}", reason),
                other => bail!("Unexpected response from server: {:?}", other),
            }
        }
        None => watermark_or_original(&img_buf, &mime_type, &fingerprint),
    };

    if marked == img_buf {
        println!("Image left unchanged (too small to carry the fingerprint, or not decodable)");
    }
    fs::write(output, &marked)?;
    println!("Saved '{}' ({} bytes)", output.display(), marked.len());
    Ok(())
}

async fn handle_inspect(server: Option<&str>, input: &PathBuf) -> Result<()> {
    let img_buf = fs::read(input)?;
    let mime_type = mime_for_path(input).to_string();

    let analysis = match server {
        Some(addr) => {
            let request = WatermarkRequest::Analyze { mime_type };
            match service::request(addr, &request, &img_buf).await? {
                WatermarkResponse::Analysis(analysis) => analysis,
                WatermarkResponse::Rejected(reason) => bail!("Server rejected request: {}", reason),
                other => bail!("Unexpected response from server: {:?}", other),
            }
        }
        None => analyze(&img_buf, &mime_type),
    };

    match &analysis {
        Analysis::Found(payload) if analysis.is_creator() => {
            println!("Watermark found: '{}' (studio creator)", payload)
        }
        Analysis::Found(payload) => println!("Watermark found: '{}'", payload),
        Analysis::NotFound => println!("No watermark found"),
        Analysis::CouldNotAnalyze { reason } => bail!("Could not analyze image: {}", reason),
    }
    Ok(())
}
