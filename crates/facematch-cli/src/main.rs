use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facematch_core::pipeline::DEFAULT_FACE_MARGIN;
use facematch_core::{Embedding, Extraction, FacePipeline};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "facematch", about = "Extract and compare face embeddings from local images")]
struct Cli {
    /// Directory containing det_10g.onnx and facenet_vggface2.onnx
    #[arg(long, global = true, env = "FACEMATCH_MODEL_DIR")]
    model_dir: Option<PathBuf>,

    /// Border around the detected face, in pixels of the 160x160 crop
    #[arg(long, global = true, default_value_t = DEFAULT_FACE_MARGIN)]
    margin: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the embedding of the largest face in an image
    Extract {
        image: PathBuf,
    },
    /// Compare the largest faces of two images
    Compare {
        first: PathBuf,
        second: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let model_dir = cli.model_dir.unwrap_or_else(facematch_core::default_model_dir);
    let mut pipeline = FacePipeline::load(
        &facematch_core::detector_model_path(&model_dir),
        &facematch_core::recognizer_model_path(&model_dir),
    )
    .with_context(|| format!("loading models from {}", model_dir.display()))?
    .with_margin(cli.margin);
    tracing::debug!(model_dir = %model_dir.display(), margin = cli.margin, "models loaded");

    match cli.command {
        Commands::Extract { image } => {
            let embedding = embed(&mut pipeline, &image)?;
            println!("{}", serde_json::json!({ "embedding": embedding.values }));
        }
        Commands::Compare { first, second } => {
            let a = embed(&mut pipeline, &first)?;
            let b = embed(&mut pipeline, &second)?;
            let result = a.similarity(&b).context("comparing embeddings")?;
            println!("{}", serde_json::to_string(&result)?);
        }
    }

    Ok(())
}

fn embed(pipeline: &mut FacePipeline, image: &Path) -> Result<Embedding> {
    if !image.exists() {
        bail!("File not found at {}", image.display());
    }

    let outcome = pipeline
        .extract_path(image)
        .with_context(|| format!("extracting {}", image.display()))?;
    detected(outcome, image)
}

/// Undecodable input reports the same way as a face-free image.
fn detected(outcome: Extraction, image: &Path) -> Result<Embedding> {
    match outcome {
        Extraction::Detected(embedding) => Ok(embedding),
        Extraction::NotDetected => bail!("No face detected in {}", image.display()),
        Extraction::DecodeFailed(reason) => {
            tracing::warn!(image = %image.display(), %reason, "input is not a decodable image");
            bail!("No face detected in {}", image.display())
        }
    }
}
