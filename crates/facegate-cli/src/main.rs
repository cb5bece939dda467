use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facegate_core::{FileOutcome, GalleryIndex, GalleryStore, OnnxExtractor};
use serde_json::Value;
use std::path::{Path, PathBuf};

// `#[zbus::proxy]` generates both `FacegateProxy` (async) and
// `FacegateProxyBlocking`. Only the blocking variant is used here.
#[zbus::proxy(
    interface = "org.facegate.Facegate1",
    default_service = "org.facegate.Facegate1",
    default_path = "/org/facegate/Facegate1"
)]
trait Facegate {
    async fn detect(&self, image: &[u8]) -> zbus::Result<String>;
    async fn upload_person(&self, name: &str, image: &[u8]) -> zbus::Result<String>;
    async fn list_persons(&self) -> zbus::Result<String>;
    async fn delete_person(&self, id: i64) -> zbus::Result<String>;
    async fn reload(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "facegate", about = "Facegate face and object recognition CLI")]
struct Cli {
    /// Talk to the daemon on the system bus instead of the session bus
    #[arg(long, global = true, env = "FACEGATE_SYSTEM_BUS", value_parser = clap::builder::FalseyValueParser::new())]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recognise faces and detect objects in an image
    Detect {
        image: PathBuf,
        /// Print the daemon's raw JSON reply
        #[arg(long)]
        json: bool,
    },
    /// Add an image of a person to the gallery
    Enroll {
        /// Name to file the image under
        #[arg(short, long)]
        name: String,
        image: PathBuf,
    },
    /// List recorded persons
    List,
    /// Remove a person and all their gallery images
    Remove {
        /// Person ID (see `facegate list`)
        id: i64,
    },
    /// Rebuild the daemon's gallery index from disk
    Reload,
    /// Show daemon status
    Status,
    /// Build a gallery index locally and report on every file (bypasses the daemon)
    Scan {
        #[arg(long, env = "FACEGATE_GALLERY_DIR")]
        gallery: Option<PathBuf>,
        #[arg(long, env = "FACEGATE_MODEL_DIR")]
        model_dir: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let system = cli.system;

    match cli.command {
        Commands::Detect { image, json } => {
            let bytes = read_image(&image)?;
            let reply = connect(system)?
                .detect(&bytes)
                .context("facegated: Detect failed")?;
            if json {
                println!("{reply}");
            } else {
                print_detection(&serde_json::from_str(&reply)?);
            }
        }
        Commands::Enroll { name, image } => {
            let bytes = read_image(&image)?;
            let reply: Value = serde_json::from_str(
                &connect(system)?
                    .upload_person(&name, &bytes)
                    .context("facegated: UploadPerson failed")?,
            )?;
            println!("{}", reply["message"].as_str().unwrap_or_default());
            if reply["samples"].as_u64() == Some(0) {
                println!("warning: no face was found in {}", image.display());
            }
        }
        Commands::List => {
            let persons: Value = serde_json::from_str(&connect(system)?.list_persons()?)?;
            match persons.as_array() {
                Some(persons) if !persons.is_empty() => {
                    println!("{:>4}  NAME", "ID");
                    for p in persons {
                        println!("{:>4}  {}", p["id"], p["name"].as_str().unwrap_or_default());
                    }
                }
                _ => println!("No persons enrolled"),
            }
        }
        Commands::Remove { id } => {
            let reply: Value = serde_json::from_str(
                &connect(system)?
                    .delete_person(id)
                    .with_context(|| format!("facegated: DeletePerson({id}) failed"))?,
            )?;
            println!("{}", reply["message"].as_str().unwrap_or_default());
        }
        Commands::Reload => {
            let summary: Value = serde_json::from_str(&connect(system)?.reload()?)?;
            println!(
                "{} files, {} samples, {} identities, {} without faces",
                summary["files"], summary["samples"], summary["identities"], summary["without_faces"]
            );
            for skipped in summary["skipped"].as_array().into_iter().flatten() {
                println!(
                    "skipped {}: {}",
                    skipped["path"].as_str().unwrap_or_default(),
                    skipped["reason"].as_str().unwrap_or_default()
                );
            }
        }
        Commands::Status => {
            let status: Value = serde_json::from_str(&connect(system)?.status()?)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Scan { gallery, model_dir } => {
            let gallery =
                gallery.unwrap_or_else(|| facegate_core::default_data_dir().join("database"));
            let model_dir = model_dir.unwrap_or_else(facegate_core::default_model_dir);
            scan(gallery, model_dir)?;
        }
    }

    Ok(())
}

/// Connect to facegated on the session (or system) bus.
fn connect(system: bool) -> Result<FacegateProxyBlocking<'static>> {
    tracing::debug!(system, "connecting to facegated");
    let builder = if system {
        zbus::blocking::connection::Builder::system()?
    } else {
        zbus::blocking::connection::Builder::session()?
    };
    let conn = builder.build().context("failed to connect to D-Bus")?;
    Ok(FacegateProxyBlocking::new(&conn)?)
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

fn print_detection(reply: &Value) {
    let faces = reply["faces"].as_array().map(Vec::as_slice).unwrap_or_default();
    let objects = reply["objects"].as_array().map(Vec::as_slice).unwrap_or_default();

    if faces.is_empty() {
        println!("no faces");
    }
    for face in faces {
        let distance = face["distance"]
            .as_f64()
            .map(|d| format!("  distance {d:.3}"))
            .unwrap_or_default();
        println!(
            "face   {:<20} {}{}",
            face["name"].as_str().unwrap_or_default(),
            face["bbox"],
            distance
        );
    }
    for object in objects {
        println!(
            "object {:<20} {}  confidence {:.2}",
            object["class"].as_str().unwrap_or_default(),
            object["bbox"],
            object["confidence"].as_f64().unwrap_or_default()
        );
    }
}

fn scan(gallery: PathBuf, model_dir: PathBuf) -> Result<()> {
    let store = GalleryStore::open(&gallery)?;
    let mut extractor = OnnxExtractor::load(&model_dir)
        .with_context(|| format!("loading face models from {}", model_dir.display()))?;

    let (index, report) = GalleryIndex::build(&store, &mut extractor)?;

    for file in &report.files {
        let outcome = match &file.outcome {
            FileOutcome::Loaded { samples } => format!("{samples} face(s)"),
            FileOutcome::NoFace => "no face".to_string(),
            FileOutcome::Skipped { reason } => format!("skipped: {reason}"),
        };
        println!(
            "{:<20} {:<6} {}  {}",
            file.identity,
            file.layout.as_str(),
            file.path.display(),
            outcome
        );
    }

    println!();
    println!("Gallery: {}", store.root().display());
    println!(
        "{} files, {} samples, {} skipped, {} without faces",
        report.files.len(),
        index.len(),
        report.skipped().count(),
        report.without_faces().count()
    );
    for (identity, count) in index.identity_counts() {
        println!("  {identity}: {count}");
    }
    Ok(())
}
