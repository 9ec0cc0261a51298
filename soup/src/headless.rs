//! Line-oriented session loop.
//!
//! Output protocol:
//! - `[PUZZLE]` the puzzle intro, printed once
//! - `[JUDGE]` the reply to a turn
//! - `[ERROR]` a failed turn that can be retried or rephrased
//! - `[END]` the final status once the session is over

use soup_core::error::UpstreamError;
use soup_core::knowledge::corpus::KnowledgeCorpus;
use soup_core::{
    AnthropicOracle, Collaborators, CorpusBackend, Error, ErrorKind, FileDocumentStore,
    FileSessionStore, GameConfig, KeywordCorpus, PlayerId, PuzzleCatalog, PuzzleId, RemoteCorpus,
    Result, SessionEngine, SessionId, SessionOptions, SessionStatus,
};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

/// Settings read from the environment.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub data_dir: PathBuf,
    pub storage_dir: PathBuf,
    pub puzzle: Option<String>,
    pub player: String,
    pub corpus_url: Option<String>,
    pub resume: Option<String>,
}

impl DriverConfig {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            data_dir: var("SOUP_DATA_DIR").unwrap_or_else(|| "data/puzzles".into()).into(),
            storage_dir: var("SOUP_STORAGE_DIR").unwrap_or_else(|| ".soup".into()).into(),
            puzzle: var("SOUP_PUZZLE"),
            player: var("SOUP_PLAYER").unwrap_or_else(|| "player".into()),
            corpus_url: var("SOUP_CORPUS_URL"),
            resume: var("SOUP_SESSION"),
        }
    }
}

async fn build_engine(config: &DriverConfig) -> Result<SessionEngine> {
    let game = GameConfig::default();
    let catalog = PuzzleCatalog::load_dir(&config.data_dir)
        .await
        .map_err(|e| Error::Config(e.to_string()))?;
    if catalog.is_empty() {
        return Err(Error::Config(format!(
            "no puzzles found under {}",
            config.data_dir.display()
        )));
    }

    let corpus = match &config.corpus_url {
        Some(url) => {
            tracing::info!(url = %url, "using remote knowledge corpus");
            CorpusBackend::Remote(RemoteCorpus::new(url.as_str()).map_err(UpstreamError::from)?)
        }
        None => {
            let keyword = KeywordCorpus::new();
            for puzzle in catalog.iter() {
                keyword
                    .ingest_puzzle(&game.kb_id_prefix, puzzle)
                    .map_err(UpstreamError::from)?;
            }
            CorpusBackend::Keyword(keyword)
        }
    };
    let corpus: Arc<dyn KnowledgeCorpus> = Arc::new(corpus);

    let oracle = AnthropicOracle::from_env().map_err(UpstreamError::from)?;
    let sessions = FileSessionStore::open(config.storage_dir.join("sessions")).await?;
    let documents = FileDocumentStore::open(config.storage_dir.join("memory")).await?;

    SessionEngine::new(
        game,
        catalog,
        Collaborators {
            oracle: Arc::new(oracle),
            corpus,
            sessions: Arc::new(sessions),
            documents: Arc::new(documents),
        },
    )
}

/// Resume `SOUP_SESSION` or start a new session.
async fn open_session(engine: &SessionEngine, config: &DriverConfig) -> Result<SessionId> {
    if let Some(raw) = &config.resume {
        let id: SessionId = raw
            .parse()
            .map_err(|_| Error::Validation(format!("not a session id: {raw}")))?;
        engine.resume_session(id).await?;
        let status = engine.get_session_status(id).await?;
        println!("[PUZZLE] {}", status.title);
        println!("{}", status.statement);
        println!();
        println!("{}", status.render());
        return Ok(id);
    }

    let puzzle = match &config.puzzle {
        Some(id) => PuzzleId::new(id.as_str()),
        None => match engine.puzzles().into_iter().next() {
            Some(p) => p.id,
            None => return Err(Error::Config("puzzle catalog is empty".into())),
        },
    };
    let created = engine
        .create_session(&puzzle, &PlayerId::new(config.player.as_str()), SessionOptions::new())
        .await?;
    println!("[PUZZLE]");
    println!("{}", created.intro);
    Ok(created.session_id)
}

/// Failures that end the run instead of asking for another line.
fn is_fatal(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::Storage | ErrorKind::NotFound | ErrorKind::SchemaMismatch
    )
}

fn print_end(status: &SessionStatus) {
    println!("[END]");
    println!("{}", status.render());
}

/// Run one session to completion or end of input.
pub async fn run(config: DriverConfig) -> Result<()> {
    let engine = build_engine(&config).await?;
    let id = open_session(&engine, &config).await?;
    println!("[SESSION] {id}");
    println!();

    let status = engine.get_session_status(id).await?;
    if status.session.phase().is_terminal() {
        print_end(&status);
        return Ok(());
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                eprintln!("Error reading input: {e}");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match engine.submit_turn(id, line).await {
            Ok(result) => {
                println!("[JUDGE]");
                println!("{}", result.response);
                println!();
                if result.phase.is_terminal() {
                    print_end(&engine.get_session_status(id).await?);
                    return Ok(());
                }
            }
            Err(e) if is_fatal(e.kind()) => return Err(e),
            Err(e) => {
                println!("[ERROR] {e}");
                if e.is_retryable() {
                    println!("(you can try that again)");
                }
                println!();
            }
        }
        stdout.flush().ok();
    }

    tracing::info!(session_id = %id, "input closed; session left open for resume");
    println!("Session {id} saved. Set SOUP_SESSION={id} to continue.");
    Ok(())
}
