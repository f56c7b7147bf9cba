use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facegate_engine::{spawn_engine, Config};
use facegate_store::GalleryStore;
use facegate_video::VideoInput;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "facegate", about = "FaceGate attendance CLI")]
struct Cli {
    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register an identity from a capture clip
    Register {
        /// Employee identifier
        #[arg(short, long)]
        employee: String,
        /// Path to the clip (MP4, AVI or WebM)
        video: PathBuf,
    },
    /// Verify a clip against one claimed identity
    Verify {
        /// Employee identifier to verify against
        #[arg(short, long)]
        employee: String,
        /// Path to the clip
        video: PathBuf,
    },
    /// Identify a clip against all enrolled identities
    Identify {
        /// Path to the clip
        video: PathBuf,
    },
    /// List enrolled identities
    List,
    /// Remove an enrolled identity's gallery
    Remove {
        /// Employee identifier to remove
        employee: String,
    },
    /// Show engine health: backend, detectors and gallery count
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    // List and Remove only touch the store; skip model loading for them.
    match &cli.command {
        Commands::List => {
            let store = GalleryStore::new(&config.data_dir);
            let ids = store.list_identities()?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&ids)?);
            } else if ids.is_empty() {
                println!("No identities enrolled");
            } else {
                for id in ids {
                    println!("{id}");
                }
            }
            return Ok(());
        }
        Commands::Remove { employee } => {
            let store = GalleryStore::new(&config.data_dir);
            store.remove(employee)?;
            println!("Removed {employee}");
            return Ok(());
        }
        _ => {}
    }

    let engine = spawn_engine(config).context("engine startup failed")?;

    match cli.command {
        Commands::Register { employee, video } => {
            let outcome = engine
                .register_from_video(employee, VideoInput::from_path(video))
                .await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                println!(
                    "Registered {} with {} embeddings from {} frames (cohesion {:.4})",
                    outcome.employee_id,
                    outcome.embeddings_stored,
                    outcome.frames_processed,
                    outcome.mean_similarity
                );
                println!("Gallery: {}", outcome.gallery_path);
            }
        }
        Commands::Verify { employee, video } => {
            let outcome = engine
                .verify_from_video(employee, VideoInput::from_path(video))
                .await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                println!("{}", outcome.result.message);
            }
            if !outcome.result.matched {
                std::process::exit(1);
            }
        }
        Commands::Identify { video } => {
            let outcome = engine
                .identify_from_video(VideoInput::from_path(video))
                .await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                println!("{}", outcome.result.message);
            }
            if !outcome.result.matched {
                std::process::exit(1);
            }
        }
        Commands::Health => {
            let report = engine.health_check().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "backend: {}\nprimary detector: {}\nenrolled identities: {}",
                    report.backend, report.primary_detector, report.enrolled_identities
                );
            }
        }
        Commands::List | Commands::Remove { .. } => unreachable!("handled above"),
    }

    Ok(())
}
