//! Consultant Chat - Entry Point
//!
//! Modes:
//! - Default: HTTP server with the SSE chat endpoint
//! - --once / -o "<prompt>": answer one prompt and exit
//!   (in-process, or against a running server with --remote)

use consultant_chat::{App, ChatClient, ChatError, ChatRequestBody, ChatServer, Config};
use futures_util::StreamExt;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn flag_value(args: &[String], names: &[&str]) -> Option<String> {
    args.iter()
        .position(|a| names.contains(&a.as_str()))
        .and_then(|i| args.get(i + 1))
        .cloned()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Parse args
    let args: Vec<String> = std::env::args().collect();
    let help_mode = args.iter().any(|a| a == "--help" || a == "-h");
    let once_prompt = flag_value(&args, &["--once", "-o"]);
    let remote = flag_value(&args, &["--remote", "-r"]);
    let mode = flag_value(&args, &["--mode", "-m"]);
    let session_id = flag_value(&args, &["--session", "-s"]);

    if help_mode {
        println!("Consultant Chat v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: consultant-chat [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --once, -o <PROMPT>   Answer one prompt and exit");
        println!("  --remote, -r <URL>    With --once, ask a running server instead");
        println!("  --mode, -m <MODE>     With --once: standard|realtime|admin|automation");
        println!("  --session, -s <ID>    With --once, session id");
        println!("  --help, -h            Show this help");
        println!();
        println!("Default: Run the chat HTTP server");
        println!();
        println!("Environment variables:");
        println!("  GEMINI_API_KEY        Gemini API key (unset = mock provider)");
        println!("  GEMINI_MODEL          Model name (default: gemini-1.5-flash)");
        println!("  CHAT_MOCK_MODE        Force the mock provider");
        println!("  CHAT_PORT             Server port (default: 3001)");
        println!("  CHAT_DB_PATH          SQLite database path");
        println!("  CHAT_PERSISTENCE      'memory' to skip SQLite");
        println!("  LOG_FORMAT            'json' for JSON logs");
        return Ok(());
    }

    // Setup logging; one-shot mode keeps stdout for the answer
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json_logs {
        tracing::subscriber::set_global_default(builder.with_ansi(false).json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.with_ansi(once_prompt.is_none()).finish())?;
    }

    let Some(prompt) = once_prompt else {
        info!("Consultant Chat v{}", env!("CARGO_PKG_VERSION"));
        let app = Arc::new(App::init(Config::from_env()?)?);
        return ChatServer::new(app).run().await;
    };

    let body = ChatRequestBody {
        mode,
        session_id,
        ..ChatRequestBody::prompt(prompt)
    };

    let mut messages = match remote {
        Some(url) => {
            let client = ChatClient::new(&url, Duration::from_secs(120))?;
            client.send(&body).await?
        }
        None => {
            let config = Config::from_env()?;
            let max_chars = config.max_message_chars;
            let app = App::init(config)?;
            let request = body.into_request(max_chars)?;
            app.chat.stream(request).map(Ok::<_, ChatError>).boxed()
        }
    };

    // Print only the new suffix of each growing chunk
    let mut printed = 0;
    let mut stdout = std::io::stdout();
    while let Some(message) = messages.next().await {
        let message = message?;
        if message.is_error() {
            anyhow::bail!("{}", message.content);
        }
        if let Some(delta) = message.content.get(printed..) {
            write!(stdout, "{}", delta)?;
            stdout.flush()?;
        }
        printed = message.content.len();
        if message.is_complete() {
            break;
        }
    }
    writeln!(stdout)?;
    Ok(())
}
