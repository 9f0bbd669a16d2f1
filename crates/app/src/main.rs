use anyhow::Context;
use chrono::Local;
use clap::{Args, Parser, Subcommand, ValueEnum};
use medichat_core::{
    build_embedder, discover_pdf_files, AnswerGenerator, ChunkingConfig, Device, Document,
    EmbeddingBackend, EmbeddingConfig, LopdfExtractor, Message, ModelConfig, OpenAiChatModel,
    ProcessingReport, Retriever, Role, Session, SessionError, SessionOptions, SessionState,
    DEFAULT_LOCAL_MODEL,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "medichat", version, about = "Chat with your PDF documents")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// API key for the hosted chat model
    #[arg(long, env = "EURI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Base URL of the OpenAI-compatible chat API
    #[arg(long, env = "MEDICHAT_BASE_URL", default_value = medichat_core::config::DEFAULT_BASE_URL)]
    base_url: String,

    /// Chat model identifier
    #[arg(long, env = "MEDICHAT_MODEL", default_value = medichat_core::config::DEFAULT_MODEL)]
    model: String,

    /// Sampling temperature
    #[arg(long, env = "MEDICHAT_TEMPERATURE", default_value_t = medichat_core::config::DEFAULT_TEMPERATURE)]
    temperature: f32,

    /// Maximum characters per chunk
    #[arg(long, env = "MEDICHAT_CHUNK_SIZE", default_value_t = medichat_core::chunking::DEFAULT_CHUNK_MAX_CHARS)]
    chunk_size: usize,

    /// Characters shared by neighbouring chunks
    #[arg(long, env = "MEDICHAT_CHUNK_OVERLAP", default_value_t = medichat_core::chunking::DEFAULT_CHUNK_OVERLAP_CHARS)]
    chunk_overlap: usize,

    /// Number of passages retrieved per question
    #[arg(long, env = "MEDICHAT_TOP_K", default_value_t = medichat_core::DEFAULT_TOP_K)]
    top_k: usize,

    /// Device for the embedding model (cpu or gpu)
    #[arg(long, env = "MEDICHAT_EMBEDDING_DEVICE", default_value = "cpu")]
    embedding_device: Device,

    /// Embedding backend; remote when --embeddings-url is set, otherwise the
    /// build's default (local model with local-embeddings-fastembed, else ngram)
    #[arg(long, env = "MEDICHAT_EMBEDDING_BACKEND", value_enum)]
    embedding_backend: Option<BackendKind>,

    /// Sentence-embedding model for the local backend
    #[arg(long, env = "MEDICHAT_LOCAL_EMBEDDING_MODEL", default_value = DEFAULT_LOCAL_MODEL)]
    local_embedding_model: String,

    /// OpenAI-compatible embeddings API
    #[arg(long, env = "MEDICHAT_EMBEDDINGS_URL")]
    embeddings_url: Option<String>,

    /// Embedding model served at --embeddings-url
    #[arg(long, env = "MEDICHAT_EMBEDDINGS_MODEL", default_value = "text-embedding-3-small")]
    embeddings_model: String,

    /// Vector size produced by the embedding model; the backend's own when unset
    #[arg(long, env = "MEDICHAT_EMBEDDING_DIMENSIONS")]
    embedding_dimensions: Option<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    Ngram,
    Local,
    Remote,
}

#[derive(Args, Clone)]
struct Uploads {
    /// PDF file to upload (repeatable)
    #[arg(long = "file")]
    files: Vec<PathBuf>,

    /// Folder searched recursively for PDFs
    #[arg(long)]
    folder: Option<PathBuf>,
}

impl Uploads {
    fn paths(&self) -> Vec<PathBuf> {
        let mut paths = self.files.clone();
        paths.extend(self.folder.clone());
        paths
    }
}

#[derive(Subcommand)]
enum Command {
    /// Interactive chat; uploads given here are processed on start.
    Chat {
        #[command(flatten)]
        uploads: Uploads,
    },
    /// Process the uploads and answer a single question.
    Ask {
        #[command(flatten)]
        uploads: Uploads,
        /// Question about the documents
        #[arg(long)]
        question: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut session = build_session(&cli)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        session = %session.id(),
        model = %cli.model,
        "medichat boot"
    );

    match cli.command {
        Command::Chat { uploads } => {
            let staged = load_uploads(&uploads.paths());
            if !staged.is_empty() {
                process(&mut session, staged).await;
            }
            run_chat(&mut session).await?;
        }
        Command::Ask { uploads, question } => {
            let staged = load_uploads(&uploads.paths());
            if staged.is_empty() {
                anyhow::bail!("no readable documents were given, use --file or --folder");
            }
            process(&mut session, staged).await;
            match session.ask(&question).await {
                Ok(_) => render_history(session.messages()),
                Err(error) => {
                    notice(&error.notice());
                    return Err(error).context("question was not answered");
                }
            }
        }
    }

    Ok(())
}

fn embedding_backend(cli: &Cli, api_key: &str) -> anyhow::Result<EmbeddingBackend> {
    let kind = match (cli.embedding_backend, &cli.embeddings_url) {
        (Some(kind), _) => kind,
        (None, Some(_)) => BackendKind::Remote,
        (None, None) => match EmbeddingBackend::default() {
            EmbeddingBackend::Local { .. } => BackendKind::Local,
            _ => BackendKind::Ngram,
        },
    };

    Ok(match kind {
        BackendKind::Ngram => EmbeddingBackend::CharacterNgram,
        BackendKind::Local => EmbeddingBackend::Local {
            model: cli.local_embedding_model.clone(),
        },
        BackendKind::Remote => {
            let base_url = cli
                .embeddings_url
                .clone()
                .context("--embedding-backend remote needs --embeddings-url")?;
            EmbeddingBackend::Remote {
                base_url,
                model: cli.embeddings_model.clone(),
                api_key: Some(api_key.to_string()),
            }
        }
    })
}

fn build_session(cli: &Cli) -> anyhow::Result<Session> {
    anyhow::ensure!(cli.top_k > 0, "--top-k must be at least 1");

    // fails before any document work when the credential is missing
    let model_config = ModelConfig::new(cli.api_key.clone())?
        .with_base_url(&cli.base_url)
        .with_model(&cli.model)
        .with_temperature(cli.temperature)?;

    let backend = embedding_backend(cli, &model_config.api_key)?;
    let embedder = build_embedder(&EmbeddingConfig {
        backend,
        device: cli.embedding_device,
        dimensions: cli.embedding_dimensions,
    })?;

    let options = SessionOptions {
        chunking: ChunkingConfig::new(cli.chunk_size, cli.chunk_overlap)?,
        retriever: Retriever::new(cli.top_k),
        extractor: Arc::new(LopdfExtractor),
        embedder,
    };
    let generator = AnswerGenerator::new(Arc::new(OpenAiChatModel::new(model_config)));

    Ok(Session::new(generator, options))
}

/// Reads every file (folders are searched for PDFs). Unreadable paths are
/// reported and left out.
fn load_uploads(paths: &[PathBuf]) -> Vec<Document> {
    let mut documents = Vec::new();

    for path in paths {
        let files = if path.is_dir() {
            discover_pdf_files(path)
        } else {
            vec![path.clone()]
        };

        if files.is_empty() {
            notice(&format!("No PDF files found in {}", path.display()));
        }

        for file in files {
            match Document::from_path(&file) {
                Ok(document) => documents.push(document),
                Err(error) => {
                    warn!(path = %file.display(), %error, "upload failed");
                    notice(&format!("Could not read {}: {error}", file.display()));
                }
            }
        }
    }

    if !documents.is_empty() {
        println!("📄 {} document(s) uploaded", documents.len());
    }
    documents
}

async fn process(session: &mut Session, documents: Vec<Document>) {
    println!("Processing your documents...");
    match session.process_documents(documents).await {
        Ok(report) => render_report(&report),
        Err(error) => notice(&error.notice()),
    }
}

async fn run_chat(session: &mut Session) -> anyhow::Result<()> {
    println!("Ask about your documents. Type /help for commands.");
    let mut staged: Vec<Document> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        match command {
            "/quit" | "/exit" => break,
            "/help" => print_help(),
            "/upload" => {
                let paths = match split_paths(rest) {
                    Ok(paths) if !paths.is_empty() => paths,
                    Ok(_) => {
                        notice("Usage: /upload <file-or-folder>...");
                        continue;
                    }
                    Err(reason) => {
                        notice(&reason);
                        continue;
                    }
                };
                staged.extend(load_uploads(&paths));
                println!("{} document(s) waiting, type /process to index them", staged.len());
            }
            "/process" => {
                if staged.is_empty() {
                    notice("Upload documents with /upload first.");
                    continue;
                }
                process(session, std::mem::take(&mut staged)).await;
            }
            "/history" => render_history(session.messages()),
            "/reset" => {
                session.reset();
                println!("History cleared.");
            }
            "/status" => render_status(session, staged.len()),
            other if other.starts_with('/') => {
                notice(&format!("Unknown command {other}, type /help for the list."));
            }
            _ => ask(session, line).await,
        }
    }

    Ok(())
}

/// Splits `/upload` arguments like a shell would for paths: whitespace
/// separates, quotes group and a backslash escapes the next character.
fn split_paths(input: &str) -> Result<Vec<PathBuf>, String> {
    let mut paths = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = input.chars();

    while let Some(ch) = chars.next() {
        match (quote, ch) {
            (Some(open), ch) if ch == open => quote = None,
            (Some('"') | None, '\\') => {
                let escaped = chars.next().ok_or("Trailing backslash in /upload")?;
                current.push(escaped);
                in_word = true;
            }
            (Some(_), ch) => current.push(ch),
            (None, '"' | '\'') => {
                quote = Some(ch);
                in_word = true;
            }
            (None, ch) if ch.is_whitespace() => {
                if in_word {
                    paths.push(PathBuf::from(std::mem::take(&mut current)));
                    in_word = false;
                }
            }
            (None, ch) => {
                current.push(ch);
                in_word = true;
            }
        }
    }

    if let Some(open) = quote {
        return Err(format!("Unclosed {open} in /upload"));
    }
    if in_word {
        paths.push(PathBuf::from(current));
    }
    Ok(paths)
}

async fn ask(session: &mut Session, question: &str) {
    println!("🔍 Searching documents...");
    match session.ask(question).await {
        Ok(answer) => render_message(&answer),
        Err(error @ SessionError::NotReady) | Err(error @ SessionError::EmptyQuestion) => {
            println!("[{}] assistant:", Local::now().format("%H:%M"));
            notice(&error.notice());
        }
        Err(error) => notice(&error.notice()),
    }
}

fn render_report(report: &ProcessingReport) {
    println!(
        "✅ Documents processed successfully! {} chunk(s) from {} document(s)",
        report.chunk_count,
        report.indexed_documents.len()
    );
    for skipped in &report.skipped_documents {
        notice(&format!("Skipped {}: {}", skipped.filename, skipped.reason));
    }
}

fn render_status(session: &Session, staged: usize) {
    let state = match session.state() {
        SessionState::Empty => "no documents processed",
        SessionState::Processing => "processing",
        SessionState::Ready => "ready",
    };
    println!(
        "state: {state}, indexed chunks: {}, messages: {}, waiting uploads: {staged}",
        session.chunk_count(),
        session.messages().len()
    );
}

fn render_history(messages: &[Message]) {
    if messages.is_empty() {
        println!("(no messages yet)");
    }
    for message in messages {
        render_message(message);
    }
}

fn render_message(message: &Message) {
    let label = match message.role {
        Role::User => "you",
        Role::Assistant => "assistant",
    };
    println!("[{}] {label}:\n{}\n", message.clock_time(), message.content);
}

fn notice(text: &str) {
    println!("⚠️  {text}");
}

fn print_help() {
    println!(
        "/upload <path>...  stage PDF files or folders\n\
         /process           extract, chunk and index the staged uploads\n\
         /history           show the conversation\n\
         /reset             clear the conversation\n\
         /status            show session state\n\
         /quit              leave\n\
         paths with spaces go in quotes: /upload \"Lab Results.pdf\"\n\
         anything else is sent as a question"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["medichat", "--api-key", "key"];
        argv.extend_from_slice(args);
        argv.push("chat");
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn quoted_upload_paths_keep_spaces() {
        let paths = split_paths(r#""Lab Results.pdf" 'scan 2.pdf' notes.pdf"#).unwrap();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("Lab Results.pdf"),
                PathBuf::from("scan 2.pdf"),
                PathBuf::from("notes.pdf"),
            ]
        );
    }

    #[test]
    fn escaped_space_stays_in_the_path() {
        let paths = split_paths(r"Lab\ Results.pdf  other.pdf").unwrap();
        assert_eq!(
            paths,
            vec![PathBuf::from("Lab Results.pdf"), PathBuf::from("other.pdf")]
        );
    }

    #[test]
    fn unclosed_quote_is_reported() {
        assert!(split_paths(r#""Lab Results.pdf"#).is_err());
        assert!(split_paths("   ").unwrap().is_empty());
    }

    #[test]
    fn dimensions_default_to_the_backend() {
        assert_eq!(cli(&[]).embedding_dimensions, None);
        assert_eq!(
            cli(&["--embedding-dimensions", "384"]).embedding_dimensions,
            Some(384)
        );
    }

    #[test]
    fn embeddings_url_selects_remote_backend() {
        let cli = cli(&["--embeddings-url", "http://localhost:8080/v1"]);
        assert!(matches!(
            embedding_backend(&cli, "key").unwrap(),
            EmbeddingBackend::Remote { .. }
        ));
    }

    #[test]
    fn remote_backend_without_url_is_an_error() {
        let cli = cli(&["--embedding-backend", "remote"]);
        assert!(embedding_backend(&cli, "key").is_err());
    }

    #[test]
    fn ngram_backend_can_be_forced() {
        let cli = cli(&["--embedding-backend", "ngram"]);
        assert_eq!(
            embedding_backend(&cli, "key").unwrap(),
            EmbeddingBackend::CharacterNgram
        );
    }
}
