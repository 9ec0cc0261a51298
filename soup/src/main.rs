//! Headless driver for the situation puzzle engine.
//!
//! Reads player turns from stdin, one per line, and prints the judge's
//! replies. Configuration comes from the environment (a `.env` file is
//! loaded if present):
//!
//! - `ANTHROPIC_API_KEY`: required
//! - `SOUP_DATA_DIR`: puzzle directory (default `data/puzzles`)
//! - `SOUP_STORAGE_DIR`: sessions and memory (default `.soup`)
//! - `SOUP_PUZZLE`: puzzle id (default: the first puzzle by id)
//! - `SOUP_PLAYER`: player id (default `player`)
//! - `SOUP_CORPUS_URL`: remote knowledge service; the built-in keyword
//!   corpus is used when unset
//! - `SOUP_SESSION`: resume this session instead of starting a new one
//!
//! ```bash
//! SOUP_PUZZLE=hiccups SOUP_PLAYER=alice cargo run -p soup
//! ```

mod headless;

use soup_core::ErrorKind;

#[tokio::main]
async fn main() {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if std::env::var("ANTHROPIC_API_KEY").is_err() {
        eprintln!("Error: ANTHROPIC_API_KEY environment variable not set.");
        eprintln!("Please set it in .env file or with: export ANTHROPIC_API_KEY=your_key_here");
        std::process::exit(ErrorKind::Validation.exit_code());
    }

    let config = headless::DriverConfig::from_env();
    if let Err(e) = headless::run(config).await {
        eprintln!("Error: {e}");
        std::process::exit(e.kind().exit_code());
    }
}
