use std::io::Write;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use maat::agent::{AgentRunner, providers};
use maat::chat::{ChatSession, TurnOutcome};
use maat::commands::{self, Command, CommandSettings};
use maat::config::{self, MaatConfig};
use maat::memory::MemoryEngine;
use maat::memory::dreaming::DreamScheduler;
use maat::types::StreamEvent;

#[derive(Parser)]
#[command(name = "maat")]
#[command(about = "A local conversational agent with episodic, semantic and long-term memory")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive chat session
    Chat,

    /// Run one consolidation cycle now
    Dream {
        /// Look-back window in hours
        #[arg(long)]
        hours: Option<u32>,
    },

    /// Search episodic and semantic memory
    Recall {
        query: String,

        /// Maximum number of hits
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Store a fact regardless of heuristics
    Remember { text: String },

    /// Raise the priority of long-term entries matching a keyword
    Reinforce {
        keyword: String,

        #[arg(short, long)]
        amount: Option<f64>,
    },

    /// Snapshot the long-term store for today
    Backup,

    /// Show row counts per store
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = config::load()?;
    let engine = Arc::new(MemoryEngine::open(
        &config.memory.data_dir,
        config.engine_options(),
    )?);
    let mut settings = CommandSettings::from_config(&config);

    let cmd = match cli.command {
        Commands::Chat => return run_chat(config, engine, settings).await,
        Commands::Dream { hours } => Command::Dream { hours },
        Commands::Recall { query, limit } => {
            if let Some(limit) = limit {
                settings.recall_limit = limit;
            }
            Command::Recall(query)
        }
        Commands::Remember { text } => Command::Remember(text),
        Commands::Reinforce { keyword, amount } => Command::Reinforce { keyword, amount },
        Commands::Backup => Command::Backup,
        Commands::Stats => Command::Stats,
    };

    let out = commands::execute(&cmd, &engine, &settings)?;
    println!("{out}");
    Ok(())
}

async fn run_chat(
    config: MaatConfig,
    engine: Arc<MemoryEngine>,
    settings: CommandSettings,
) -> anyhow::Result<()> {
    let provider = providers::from_config(&config.agent)?;
    let runner = AgentRunner::new(config.agent.system_prompt.clone());

    let scheduler = config.dream.interval().map(|interval| {
        let scheduler = DreamScheduler::new(engine.dreaming(), config.dream.to_params(), interval);
        let token = scheduler.shutdown_token();
        (token, scheduler.start())
    });

    let mut session = ChatSession::new(
        Arc::clone(&engine),
        provider,
        runner,
        settings,
        config.memory.episodic_decay,
    );

    println!("maat v{} (type /help for commands)", env!("CARGO_PKG_VERSION"));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("\n> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };

        // Presentation side: prints streamed text, never touches memory.
        let (tx, mut rx) = mpsc::channel::<StreamEvent>(64);
        let printer = tokio::spawn(async move {
            let mut stdout = std::io::stdout();
            while let Some(event) = rx.recv().await {
                match event {
                    StreamEvent::Text(t) => {
                        let _ = write!(stdout, "{t}");
                        let _ = stdout.flush();
                    }
                    StreamEvent::Error(e) => eprintln!("\n[error] {e}"),
                    StreamEvent::Usage { .. } | StreamEvent::Done => {}
                }
            }
        });

        let outcome = session.handle_line(&line, tx).await;
        let _ = printer.await;

        match outcome {
            TurnOutcome::Exit => break,
            TurnOutcome::Command(out) => {
                if !out.is_empty() {
                    println!("{out}");
                }
            }
            TurnOutcome::Reply { recalled, .. } => {
                println!();
                if recalled > 0 {
                    info!(recalled, "memories injected");
                }
            }
            TurnOutcome::Failed(reason) => eprintln!("[turn failed] {reason}"),
        }
    }

    if let Some((token, handle)) = scheduler {
        token.cancel();
        let _ = handle.await;
    }
    println!("Bye.");
    Ok(())
}
