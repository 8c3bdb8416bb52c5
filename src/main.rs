//! GPT Relay Bot - Entry Point
//!
//! Options:
//! - --json: log JSON lines to stderr instead of ANSI text to stdout
//! - --help / -h: usage and environment variables

use gpt_relay_bot::Config;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Parse args
    let args: Vec<String> = std::env::args().collect();
    let json_logs = args.iter().any(|a| a == "--json");
    let help_mode = args.iter().any(|a| a == "--help" || a == "-h");

    if help_mode {
        println!("GPT Relay Bot v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: gpt-relay-bot [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --json         Log JSON lines to stderr");
        println!("  --help, -h     Show this help");
        println!();
        println!("Environment variables:");
        println!("  TELOXIDE_TOKEN         Telegram bot token (or BOT_TOKEN)");
        println!("  BOT_NAME               Bot username for mentions (default: from getMe)");
        println!("  OPENAI_API_KEY         OpenAI API key");
        println!("  OPENAI_API_BASE        API base URL (default: https://api.openai.com/v1)");
        println!("  DEFAULT_MODEL          Default model (default: gpt-3.5-turbo)");
        println!("  LARGE_CONTEXT_MODEL    Overflow model (default: gpt-3.5-turbo-16k)");
        println!("  LARGE_CONTEXT_LIMIT    Overflow switch ceiling (default: 16000)");
        println!("  TRANSCRIPTION_MODEL    Voice model (default: whisper-1)");
        println!("  SYSTEM_PROMPT          Initial system prompt");
        println!("  HISTORY_TRIM           Max history messages (default: 10)");
        println!("  IDLE_RESET_SECS        Idle context reset (default: 600)");
        println!("  REQUEST_TIMEOUT_SECS   Completion timeout (default: 120)");
        println!("  MAX_VOICE_SECS         Longest voice message (default: 600)");
        return Ok(());
    }

    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    if json_logs {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_ansi(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    info!("GPT Relay Bot v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    gpt_relay_bot::telegram::run_telegram_bot(config).await?;

    Ok(())
}
