use crate::command::parser::{self, ParsedCommand, KNOWN_COMMANDS};
use crate::command::tokenizer::{self, quote_token};
use crate::error::EngineError;
use crate::store::{Dataset, Registry, SetOutcome, ZaddOutcome};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Per-connection state: which dataset (if any) is selected, and whether
/// the connection should be torn down after the current reply. Gating
/// runs through six rules in a fixed order before a command reaches the
/// dataset layer — see `validate` below.
pub struct Session {
    pub id: u64,
    registry: Arc<Registry>,
    dataset: Option<Arc<Dataset>>,
    pub should_close: bool,
    last_snapshot: Instant,
    snapshot_interval: Duration,
}

impl Session {
    pub fn new(registry: Arc<Registry>, snapshot_interval: Duration) -> Self {
        Session {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            registry,
            dataset: None,
            should_close: false,
            last_snapshot: Instant::now(),
            snapshot_interval,
        }
    }

    /// Runs one request line to completion and returns its single-line
    /// reply. Never panics on malformed input — every failure mode is a
    /// typed error turned into a reply line.
    pub async fn handle_line(&mut self, line: &str) -> String {
        let reply = match self.validate(line) {
            Ok((name, parsed)) => self.process(name, parsed).await,
            Err(message) => message,
        };
        self.maybe_snapshot().await;
        reply
    }

    /// Gating rules 1-3: unrecognized command, no dataset selected, parse
    /// failure. Rules 4-5 (duplicate SELECT, DESELECT without SELECT) are
    /// session-state checks that only make sense once we already know
    /// *which* command it is, so they live in `process`.
    fn validate(&self, line: &str) -> Result<(String, ParsedCommand), String> {
        let tokens = match tokenizer::tokenize(line) {
            Ok(t) => t,
            Err(e) => return Err(e.to_string()),
        };
        let Some(first) = tokens.first() else {
            return Err(unrecognized_command_message());
        };
        let name = first.to_uppercase();
        if !KNOWN_COMMANDS.contains(&name.as_str()) {
            return Err(unrecognized_command_message());
        }

        if self.dataset.is_none() && name != "SELECT" && name != "EXIT" {
            return Err("ERR select a database first".to_string());
        }

        match parser::parse(&name, &tokens[1..]) {
            Ok(parsed) => Ok((name, parsed)),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn process(&mut self, _name: String, parsed: ParsedCommand) -> String {
        match parsed {
            ParsedCommand::Select(db_name) => self.cmd_select(db_name).await,
            ParsedCommand::Deselect => self.cmd_deselect().await,
            ParsedCommand::Exit => {
                self.should_close = true;
                String::new()
            }
            ParsedCommand::Get(key) => match self.dataset().get(&key).await {
                Ok(Some(v)) => String::from_utf8_lossy(&v).into_owned(),
                Ok(None) => "(nil)".to_string(),
                Err(e) => format_engine_error(&e),
            },
            ParsedCommand::Set(args) => match self.dataset().set(&args).await {
                SetOutcome::Applied => "OK".to_string(),
                SetOutcome::Aborted => "(nil)".to_string(),
            },
            ParsedCommand::Expire { key, seconds } => {
                if self.dataset().expire(&key, seconds).await {
                    "1".to_string()
                } else {
                    "0".to_string()
                }
            }
            ParsedCommand::Ttl(key) => self.dataset().ttl(&key).await.to_string(),
            ParsedCommand::Del(keys) => {
                self.dataset().del(&keys).await;
                String::new()
            }
            ParsedCommand::Zadd(args) => match self.dataset().zadd(&args).await {
                Ok(ZaddOutcome::Count(n)) => n.to_string(),
                Ok(ZaddOutcome::NewScore(score)) => score.to_string(),
                Ok(ZaddOutcome::Aborted) => "(nil)".to_string(),
                Err(e) => format_engine_error(&e),
            },
            ParsedCommand::Zrank { key, member } => match self.dataset().zrank(&key, &member).await {
                Ok(Some(rank)) => rank.to_string(),
                Ok(None) => "(nil)".to_string(),
                Err(e) => format_engine_error(&e),
            },
            ParsedCommand::Zrange(args) => {
                match self
                    .dataset()
                    .zrange(&args.key, args.start, args.stop, args.with_scores)
                    .await
                {
                    Ok(items) => format_zrange(&items),
                    Err(e) => format_engine_error(&e),
                }
            }
        }
    }

    async fn cmd_select(&mut self, db_name: String) -> String {
        if self.dataset.is_some() {
            return "ERR dataset already selected, cannot use multiple datasets".to_string();
        }
        match self.registry.select(&db_name).await {
            Ok(ds) => {
                info!(session = self.id, dataset = %db_name, "selected dataset");
                self.dataset = Some(ds);
                format!("Loaded Dataset '{db_name}'")
            }
            Err(e) => format_engine_error(&e),
        }
    }

    async fn cmd_deselect(&mut self) -> String {
        if self.dataset.is_none() {
            return "ERR no dataset selected".to_string();
        }
        let ds = self.dataset.take().unwrap();
        ds.snapshot().await;
        String::new()
    }

    async fn maybe_snapshot(&mut self) {
        if let Some(ds) = &self.dataset {
            if self.last_snapshot.elapsed() >= self.snapshot_interval {
                ds.snapshot().await;
                self.last_snapshot = Instant::now();
            }
        }
    }

    fn dataset(&self) -> &Arc<Dataset> {
        self.dataset
            .as_ref()
            .expect("validate() guarantees a dataset is selected for this command")
    }
}

fn unrecognized_command_message() -> String {
    format!(
        "ERR unrecognized command; known commands: {}",
        KNOWN_COMMANDS.join(", ")
    )
}

fn format_engine_error(e: &EngineError) -> String {
    match e {
        EngineError::NotAString(_) | EngineError::NotASortedSet(_) | EngineError::Internal(_) => {
            e.to_string()
        }
        EngineError::Io(_) => format!("Error: {e}"),
    }
}

fn format_zrange(items: &[(Vec<u8>, Option<f64>)]) -> String {
    let mut tokens = Vec::with_capacity(items.len() * 2);
    for (member, score) in items {
        tokens.push(quote_token(&String::from_utf8_lossy(member)));
        if let Some(score) = score {
            tokens.push(score.to_string());
        }
    }
    tokens.join(" ")
}
