use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use base64::{engine::general_purpose, Engine as _};
use clap::{Parser, Subcommand};
use serde_json::Value;

#[zbus::proxy(
    interface = "io.smartgate.Gate1",
    default_service = "io.smartgate.Gate1",
    default_path = "/io/smartgate/Gate1"
)]
trait Gate {
    fn add_face(&self, img: &str, name: &str) -> zbus::Result<String>;
    fn verify_face(&self, img: &str) -> zbus::Result<String>;
    fn replace_face(&self, id: &str, img: &str, name: &str) -> zbus::Result<String>;
    fn delete_face(&self, id: &str) -> zbus::Result<String>;
    fn sign_in(&self, img: &str) -> zbus::Result<String>;
    fn list_faces(&self) -> zbus::Result<String>;
    fn attendance(&self, face_id: &str) -> zbus::Result<String>;
    fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "smartgate", about = "SmartGate face attendance CLI")]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a new face (refuses if the face is already enrolled)
    Enroll {
        #[arg(short, long)]
        name: String,
        /// Path to a photo of the face
        #[arg(short, long)]
        image: PathBuf,
        /// If the face is already enrolled, update that identity instead
        #[arg(long, conflicts_with = "force")]
        replace: bool,
        /// Enroll even if the face matches an existing identity
        #[arg(long)]
        force: bool,
    },
    /// Check a face against enrolled identities
    Verify {
        #[arg(short, long)]
        image: PathBuf,
    },
    /// Replace the name and face of an enrolled identity
    Replace {
        id: String,
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        image: PathBuf,
    },
    /// Remove an enrolled identity and its attendance history
    Remove { id: String },
    /// Sign in: verify and record attendance
    SignIn {
        #[arg(short, long)]
        image: PathBuf,
    },
    /// List enrolled faces
    List,
    /// Show attendance, for one face or everyone
    Attendance { id: Option<String> },
    /// Show daemon status
    Status,
}

/// Read an image file and encode it as a base64 data URL.
fn load_image(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let mime = match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        _ => "image/jpeg",
    };
    Ok(format!(
        "data:{mime};base64,{}",
        general_purpose::STANDARD.encode(bytes)
    ))
}

/// Pretty-print a daemon reply and map its `success` flag to an exit code.
fn report(raw: &str) -> Result<ExitCode> {
    let value: Value = serde_json::from_str(raw).context("daemon returned invalid JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    let ok = value.get("success").and_then(Value::as_bool).unwrap_or(true);
    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

/// Identity the daemon matched, if the verify reply says so.
fn existing_match(verify_reply: &str) -> Result<Option<(String, String)>> {
    let value: Value = serde_json::from_str(verify_reply).context("daemon returned invalid JSON")?;
    let verified = value.get("success").and_then(Value::as_bool) == Some(true)
        && value.get("verified").and_then(Value::as_bool) == Some(true);
    if !verified {
        return Ok(None);
    }
    let m = &value["match"];
    match (m["id"].as_str(), m["name"].as_str()) {
        (Some(id), Some(name)) => Ok(Some((id.to_string(), name.to_string()))),
        _ => Ok(None),
    }
}

async fn enroll(
    proxy: &GateProxy<'_>,
    name: &str,
    image: &Path,
    replace: bool,
    force: bool,
) -> Result<ExitCode> {
    let img = load_image(image)?;

    if !force {
        let reply = proxy.verify_face(&img).await?;
        if let Some((id, existing)) = existing_match(&reply)? {
            if replace {
                tracing::info!(face_id = %id, "face already enrolled; replacing");
                return report(&proxy.replace_face(&id, &img, name).await?);
            }
            eprintln!(
                "This face is already enrolled as {existing:?} ({id}).\n\
                 Re-run with --replace to update that identity, or --force to enroll anyway."
            );
            return Ok(ExitCode::FAILURE);
        }
    }

    report(&proxy.add_face(&img, name).await?)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = if cli.session {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    };
    let conn = conn.context("connecting to D-Bus")?;
    let proxy = GateProxy::new(&conn)
        .await
        .context("smartgated not reachable")?;

    match cli.command {
        Commands::Enroll {
            name,
            image,
            replace,
            force,
        } => enroll(&proxy, &name, &image, replace, force).await,
        Commands::Verify { image } => report(&proxy.verify_face(&load_image(&image)?).await?),
        Commands::Replace { id, name, image } => {
            report(&proxy.replace_face(&id, &load_image(&image)?, &name).await?)
        }
        Commands::Remove { id } => report(&proxy.delete_face(&id).await?),
        Commands::SignIn { image } => report(&proxy.sign_in(&load_image(&image)?).await?),
        Commands::List => report(&proxy.list_faces().await?),
        Commands::Attendance { id } => {
            report(&proxy.attendance(id.as_deref().unwrap_or("")).await?)
        }
        Commands::Status => report(&proxy.status().await?),
    }
}
