//! Slash commands available inside `maat chat`.
//!
//! Parsing is pure; [`execute`] runs a command against a [`MemoryEngine`]
//! and renders the result as the text shown to the user.

use chrono::Local;
use std::path::PathBuf;

use crate::config::MaatConfig;
use crate::memory::dreaming::DreamParams;
use crate::memory::text::snippet;
use crate::memory::{MemoryEngine, Result};

/// How many long-term entries `/memory show` narrates.
pub const NARRATIVE_LIMIT: usize = 20;

pub const USAGE: &str = "\
Commands:
  /help                       show this message
  /dream [hours]              consolidate recent conversations now
  /recall <query>             search episodic and semantic memory
  /memory search <query>      search the long-term archive
  /memory show                narrate the latest long-term entries
  /memory last <n>            list the last n episodic turns
  /memory clear               wipe all memory stores
  /remember <text>            keep a fact regardless of heuristics
  /forget <text>              delete matching long-term entries
  /reinforce <keyword> [amt]  raise priority of matching entries
  /weaken [factor]            scale every long-term priority down
  /backup                     snapshot the long-term store for today
  /stats                      row counts per store
  /exit                       leave the chat";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Dream { hours: Option<u32> },
    Recall(String),
    MemorySearch(String),
    MemoryShow,
    MemoryLast(usize),
    MemoryClear,
    Remember(String),
    Forget(String),
    Reinforce { keyword: String, amount: Option<f64> },
    Weaken { factor: Option<f64> },
    Backup,
    Stats,
    Exit,
    /// Recognised as a command but unusable; carries the reason.
    Invalid(String),
}

/// Parse a chat line. Returns `None` for ordinary conversation.
pub fn parse(line: &str) -> Option<Command> {
    let line = line.trim();
    let rest = line.strip_prefix('/')?;
    let (verb, args) = match rest.split_once(char::is_whitespace) {
        Some((v, a)) => (v, a.trim()),
        None => (rest, ""),
    };

    let cmd = match verb.to_lowercase().as_str() {
        "help" | "?" => Command::Help,
        "exit" | "quit" => Command::Exit,
        "stats" => Command::Stats,
        "backup" => Command::Backup,
        "dream" => match args {
            "" => Command::Dream { hours: None },
            h => match h.parse::<u32>() {
                Ok(hours) if hours > 0 => Command::Dream { hours: Some(hours) },
                _ => Command::Invalid(format!("/dream expects a positive number of hours, got '{h}'")),
            },
        },
        "recall" => required(args, "/recall <query>", Command::Recall),
        "remember" => required(args, "/remember <text>", Command::Remember),
        "forget" => required(args, "/forget <text>", Command::Forget),
        "reinforce" => parse_reinforce(args),
        "weaken" => match args {
            "" => Command::Weaken { factor: None },
            f => match parse_factor(f) {
                Some(factor) => Command::Weaken {
                    factor: Some(factor),
                },
                None => Command::Invalid(format!("/weaken expects a non-negative number, got '{f}'")),
            },
        },
        "memory" => parse_memory(args),
        other => Command::Invalid(format!("unknown command '/{other}'")),
    };
    Some(cmd)
}

fn required(args: &str, usage: &str, make: fn(String) -> Command) -> Command {
    if args.is_empty() {
        Command::Invalid(format!("usage: {usage}"))
    } else {
        make(args.to_string())
    }
}

fn parse_factor(s: &str) -> Option<f64> {
    s.parse::<f64>().ok().filter(|f| f.is_finite() && *f >= 0.0)
}

fn parse_reinforce(args: &str) -> Command {
    let mut parts = args.split_whitespace();
    let Some(keyword) = parts.next() else {
        return Command::Invalid("usage: /reinforce <keyword> [amount]".into());
    };
    let amount = match parts.next() {
        None => None,
        Some(a) => match parse_factor(a) {
            Some(amount) => Some(amount),
            None => {
                return Command::Invalid(format!(
                    "/reinforce expects a non-negative amount, got '{a}'"
                ));
            }
        },
    };
    Command::Reinforce {
        keyword: keyword.to_string(),
        amount,
    }
}

fn parse_memory(args: &str) -> Command {
    let (sub, rest) = match args.split_once(char::is_whitespace) {
        Some((s, r)) => (s, r.trim()),
        None => (args, ""),
    };
    match sub.to_lowercase().as_str() {
        "show" => Command::MemoryShow,
        "clear" => Command::MemoryClear,
        "search" => required(rest, "/memory search <query>", Command::MemorySearch),
        "last" => match rest.parse::<usize>() {
            Ok(n) if n > 0 => Command::MemoryLast(n),
            _ => Command::Invalid("usage: /memory last <n>".into()),
        },
        _ => Command::Invalid("usage: /memory search|show|last|clear".into()),
    }
}

/// Values commands fall back on when arguments are omitted.
#[derive(Debug, Clone)]
pub struct CommandSettings {
    pub recall_limit: usize,
    pub reinforce_amount: f64,
    pub weaken_factor: f64,
    pub dream: DreamParams,
    pub backup_dir: PathBuf,
}

impl CommandSettings {
    pub fn from_config(config: &MaatConfig) -> Self {
        Self {
            recall_limit: config.memory.recall_limit,
            reinforce_amount: config.memory.reinforce_amount,
            weaken_factor: config.memory.weaken_factor,
            dream: config.dream.to_params(),
            backup_dir: config.dream.backup_dir_or(&config.memory),
        }
    }
}

/// Run `cmd` and render its output. `Exit` is handled by the caller and
/// renders as an empty string here.
pub fn execute(cmd: &Command, engine: &MemoryEngine, settings: &CommandSettings) -> Result<String> {
    let out = match cmd {
        Command::Help => USAGE.to_string(),
        Command::Exit => String::new(),
        Command::Invalid(reason) => format!("{reason}\n\n{USAGE}"),
        Command::Stats => {
            let s = engine.stats()?;
            format!(
                "episodic: {}\nsemantic: {}\nlong-term: {}",
                s.episodic, s.semantic, s.long_term
            )
        }
        Command::Backup => engine.backup(&settings.backup_dir)?.to_string(),
        Command::Dream { hours } => {
            let mut params = settings.dream;
            if let Some(h) = hours {
                params.hours_back = *h;
            }
            engine.run_consolidation_cycle(&params)?.to_string()
        }
        Command::Recall(query) => {
            let hits = engine.recall(query, settings.recall_limit)?;
            if hits.is_empty() {
                "No memories found.".to_string()
            } else {
                hits.iter()
                    .map(|h| format!("[{}] {}: {}", h.provenance, h.role, h.snippet))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        Command::MemorySearch(query) => {
            let rows = engine.search_long_term(query, settings.recall_limit)?;
            if rows.is_empty() {
                "No memories found.".to_string()
            } else {
                rows.iter()
                    .map(|r| {
                        format!(
                            "[{}] ({}, {:.2}) {}",
                            r.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
                            r.category,
                            r.priority,
                            r.compressed
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        Command::MemoryShow => engine
            .narrative(NARRATIVE_LIMIT)?
            .unwrap_or_else(|| "No memories stored yet.".to_string()),
        Command::MemoryLast(n) => {
            let rows = engine.recent_episodes(*n)?;
            if rows.is_empty() {
                "No memories stored yet.".to_string()
            } else {
                rows.iter()
                    .map(|r| {
                        format!(
                            "[{}] {}: {}",
                            r.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
                            r.role,
                            snippet(&r.text, 120)
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        Command::MemoryClear => {
            engine.clear()?;
            "All memory stores cleared.".to_string()
        }
        Command::Remember(text) => {
            if engine.remember(text)? {
                format!("Remembered: {}", snippet(text, 80))
            } else {
                "Nothing to remember.".to_string()
            }
        }
        Command::Forget(query) => {
            let n = engine.forget(query)?;
            format!("Forgot {n} long-term entries.")
        }
        Command::Reinforce { keyword, amount } => {
            let amount = amount.unwrap_or(settings.reinforce_amount);
            let n = engine.reinforce(keyword, amount)?;
            format!("Reinforced {n} entries matching '{keyword}' (x{amount}).")
        }
        Command::Weaken { factor } => {
            let factor = factor.unwrap_or(settings.weaken_factor);
            let n = engine.weaken_all(factor)?;
            format!("Weakened {n} entries (x{factor}).")
        }
    };
    Ok(out)
}
