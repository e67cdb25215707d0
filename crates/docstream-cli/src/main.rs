use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use clap::{Parser, Subcommand};
use tracing::info;

use docstream_core::converters::{DocumentFormat, convert_document};
use docstream_core::models::Conversation;
use docstream_core::repositories::{
    ConversationJsonRepository, ConversationRepository, InMemoryConversationRepository,
};
use docstream_core::services::{FileUploadRequest, StreamRelay, UploadService};
use docstream_core::settings::{AppSettings, SettingsJsonRepository, SettingsRepository};

mod chat;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Streaming chat with token-budgeted document ingestion",
    long_about = None
)]
struct Cli {
    /// Settings file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a prompt, with optional attachments, and stream the reply
    Chat(chat::ChatArgs),
    /// Print the text a document would contribute to a prompt
    Convert {
        file: PathBuf,
        /// Override format detection (spreadsheet, csv, pdf, email)
        #[arg(long)]
        format: Option<String>,
    },
    /// Run a file through the upload contract and print the JSON response
    Upload {
        file: PathBuf,
        /// Declared MIME type
        #[arg(long, default_value = "application/octet-stream")]
        mime: String,
        /// Where accepted uploads are stored
        #[arg(long)]
        upload_dir: Option<PathBuf>,
    },
    /// Send a one-token request to check the provider is reachable
    WarmUp {
        #[arg(long)]
        model: Option<String>,
    },
    /// Inspect saved conversations
    History {
        #[command(subcommand)]
        action: HistoryCommand,
    },
}

#[derive(Subcommand)]
enum HistoryCommand {
    /// List saved conversations, newest first
    #[clap(alias = "ls")]
    List,
    /// Print one conversation
    Show { id: String },
    /// Delete one conversation
    #[clap(alias = "rm")]
    Delete { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the streamed reply.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Chat(args) => chat::run(args, settings).await,
        Commands::Convert { file, format } => convert(&file, format.as_deref(), &settings),
        Commands::Upload {
            file,
            mime,
            upload_dir,
        } => upload(&file, mime, upload_dir, &settings).await,
        Commands::WarmUp { model } => warm_up(model, settings).await,
        Commands::History { action } => history(action).await,
    }
}

async fn load_settings(path: Option<&Path>) -> Result<AppSettings> {
    let repository = match path {
        Some(path) => SettingsJsonRepository::with_path(path.to_path_buf()),
        None => SettingsJsonRepository::new().context("Failed to locate settings file")?,
    };
    let settings = repository.load().await.with_context(|| {
        format!(
            "Failed to load settings from {}",
            repository.storage_path().display()
        )
    })?;
    info!(path = %repository.storage_path().display(), "Settings loaded");
    Ok(settings)
}

pub(crate) fn conversation_repository(ephemeral: bool) -> Result<Arc<dyn ConversationRepository>> {
    if ephemeral {
        return Ok(Arc::new(InMemoryConversationRepository::new()));
    }
    let repository =
        ConversationJsonRepository::new().context("Failed to open conversation store")?;
    Ok(Arc::new(repository))
}

fn parse_format(name: &str) -> Result<DocumentFormat> {
    DocumentFormat::from_extension(name)
        .or_else(|| match name.to_ascii_lowercase().as_str() {
            "spreadsheet" | "excel" => Some(DocumentFormat::Spreadsheet),
            "email" | "mail" => Some(DocumentFormat::Email),
            _ => None,
        })
        .ok_or_else(|| anyhow!("Unknown document format '{name}'"))
}

fn convert(file: &Path, format: Option<&str>, settings: &AppSettings) -> Result<()> {
    let format = match format {
        Some(name) => parse_format(name)?,
        None => {
            let name = file.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
            DocumentFormat::detect(&name, "")
                .ok_or_else(|| anyhow!("Cannot tell the document format of {}", file.display()))?
        }
    };

    let conversion = convert_document(format, file, &settings.documents);
    println!("{}", conversion.extracted_text());
    eprintln!(
        "-- {} · ~{} tokens{}",
        format.label(),
        conversion.estimated_tokens,
        if conversion.truncated { " · truncated" } else { "" }
    );
    Ok(())
}

async fn upload(
    file: &Path,
    mime: String,
    upload_dir: Option<PathBuf>,
    settings: &AppSettings,
) -> Result<()> {
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let service = match upload_dir {
        Some(dir) => UploadService::new(dir, settings.documents),
        None => UploadService::with_default_dir(settings.documents)?,
    };

    let request = FileUploadRequest {
        base64data: STANDARD.encode(&bytes),
        file_name: file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        mime_type: mime,
    };
    let response = service.handle(request).await;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn warm_up(model: Option<String>, settings: AppSettings) -> Result<()> {
    let model = model.unwrap_or_else(|| settings.relay.default_model.clone());
    let relay = StreamRelay::new(settings.relay)?;
    match relay.warm_up(&model).await {
        Ok(()) => {
            println!("{model} is ready");
            Ok(())
        }
        Err(e) => Err(anyhow!(e.user_message())),
    }
}

async fn history(action: HistoryCommand) -> Result<()> {
    let repository = conversation_repository(false)?;
    match action {
        HistoryCommand::List => {
            for meta in repository.load_metadata().await? {
                let updated = chrono::DateTime::from_timestamp(meta.updated_at, 0)
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                println!("{}  {}  {}  {}", meta.id, updated, meta.model_id, meta.title);
            }
        }
        HistoryCommand::Show { id } => {
            let data = repository
                .load_one(&id)
                .await?
                .ok_or_else(|| anyhow!("No conversation with id {id}"))?;
            let conversation = Conversation::from_data(data)?;
            println!("# {} ({})", conversation.title(), conversation.model_id());
            for message in conversation.messages() {
                println!("\n[{:?}]\n{}", message.role, message.text());
            }
        }
        HistoryCommand::Delete { id } => {
            repository.delete(&id).await?;
            println!("Deleted {id}");
        }
    }
    Ok(())
}
