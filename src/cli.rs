//! Command line front end

use crate::config::{self, Config};
use crate::db::Database;
use crate::error::{Error, Result, StoreError};
use crate::ingest::Ingestor;
use crate::mail::gmail::{GmailClient, MessageQuery};
use crate::rules::{
    Action, ActionOutcome, CaseSensitivity, LogJournal, Rule, RuleEngine, RuleMatch, RuleStore,
    RunMode, RunOutcome, RunReport, RunRequest,
};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Messages pulled by `fetch` when neither --count nor --since is given
const DEFAULT_FETCH_COUNT: u32 = 10;

#[derive(Parser, Debug)]
#[command(
    name = "inbox-rules",
    version,
    about = "Apply stored mail rules to unread Gmail messages",
    arg_required_else_help = true
)]
pub struct Cli {
    #[arg(long, global = true, help = "SQLite message store (overrides INBOX_RULES_DB)")]
    db: Option<PathBuf>,

    #[arg(long, global = true, help = "Rule file (overrides INBOX_RULES_RULES)")]
    rules: Option<PathBuf>,

    #[arg(long, global = true, help = "Match conditions ignoring letter case")]
    case_insensitive: bool,

    #[arg(long, global = true, value_parser = parse_concurrency, help = "Messages processed at once")]
    concurrency: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Download messages into the local store
    Fetch {
        #[arg(long, conflicts_with = "since")]
        count: Option<u32>,
        /// Only messages received after this date (YYYY-MM-DD)
        #[arg(long)]
        since: Option<NaiveDate>,
    },
    /// Apply rules to unread stored messages
    Apply {
        #[arg(long)]
        json: bool,
    },
    /// Show which rules would fire, without changing anything
    Check {
        #[arg(long)]
        json: bool,
    },
    /// Add a rule matching on the sender address
    AddRule {
        #[arg(long)]
        sender: String,
        /// mark_as_read, mark_as_unread, add_star or move_to_label
        #[arg(long)]
        action: String,
        /// Label name for move_to_label
        #[arg(long)]
        label: Option<String>,
    },
    /// List stored rules
    Rules,
}

fn parse_concurrency(value: &str) -> std::result::Result<usize, String> {
    config::parse_concurrency(value).map_err(|e| e.to_string())
}

impl Cli {
    /// Environment config with command line overrides on top
    fn config(&self) -> Result<Config> {
        let mut config = Config::from_env()?;
        if let Some(db) = &self.db {
            config.db_path = db.clone();
        }
        if let Some(rules) = &self.rules {
            config.rules_path = rules.clone();
        }
        if self.case_insensitive {
            config.case_sensitivity = CaseSensitivity::Insensitive;
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        Ok(config)
    }
}

/// Run one parsed command
pub async fn execute(cli: Cli) -> Result<()> {
    let config = cli.config()?;
    log::debug!("Rules at {:?}, store at {:?}", config.rules_path, config.db_path);

    match cli.command {
        Commands::Fetch { count, since } => {
            let query = match (count, since) {
                (_, Some(date)) => MessageQuery::Since(date),
                (Some(n), None) => MessageQuery::Latest(n),
                (None, None) => MessageQuery::Latest(DEFAULT_FETCH_COUNT),
            };

            let client = gmail_client(&config, config.access_token()?)?;
            let db = open_database(&config.db_path)?;
            let report = Ingestor::new(Arc::new(client), db)
                .with_concurrency(config.concurrency)
                .fetch(&query)
                .await?;

            println!("Stored {} of {} message(s).", report.stored, report.listed);
            for id in &report.skipped {
                eprintln!("warning: could not fetch message {}", id);
            }
        }

        Commands::Apply { json } => {
            let client = gmail_client(&config, config.access_token()?)?;
            let outcome = run_rules(&config, client, RunMode::Apply).await?;
            if let RunOutcome::Applied(report) = outcome {
                print_report(&report, json)?;
            }
        }

        Commands::Check { json } => {
            // preview never reaches the mail service, so no token is needed
            let token = config.access_token.clone().unwrap_or_default();
            let client = gmail_client(&config, &token)?;
            let outcome = run_rules(&config, client, RunMode::Preview).await?;
            if let RunOutcome::Previewed(matches) = outcome {
                print_matches(&matches, json)?;
            }
        }

        Commands::AddRule {
            sender,
            action,
            label,
        } => {
            let action = match label {
                Some(label) => format!("{}:{}", action, label),
                None => action,
            };
            let action: Action = action
                .parse()
                .map_err(Error::Settings)?;
            let rule = Rule::from_sender(sender, action)?;

            let index = RuleStore::new(&config.rules_path).add_rule(rule)?;
            println!("Added rule {} to {}", index, config.rules_path.display());
        }

        Commands::Rules => {
            let rules = RuleStore::new(&config.rules_path).load_or_default()?;
            if rules.is_empty() {
                println!("No rules in {}", config.rules_path.display());
            }
            for (index, rule) in rules.iter().enumerate() {
                let conditions: Vec<String> = rule.conditions().iter().map(|c| c.to_string()).collect();
                let actions: Vec<String> = rule.actions().iter().map(|a| a.to_string()).collect();
                println!(
                    "{}. [{}] {} => {}",
                    index,
                    rule.predicate(),
                    conditions.join(", "),
                    actions.join(", ")
                );
            }
        }
    }

    Ok(())
}

fn gmail_client(config: &Config, token: &str) -> Result<GmailClient> {
    Ok(GmailClient::with_base_url(
        token,
        &config.api_base,
        config.http_timeout,
    )?)
}

fn open_database(path: &Path) -> Result<Database> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            Error::Settings(format!("Failed to create data directory {:?}: {}", parent, e))
        })?;
    }
    Ok(Database::new(path)?)
}

async fn run_rules(config: &Config, client: GmailClient, mode: RunMode) -> Result<RunOutcome> {
    let request = RunRequest {
        rules_path: config.rules_path.clone(),
        mode,
    };
    let db = open_database(&config.db_path)?;
    let engine = RuleEngine::new(Arc::new(client), Arc::new(LogJournal))
        .with_options(config.run_options());

    engine.execute(&request, &db).await
}

fn print_report(report: &RunReport, json: bool) -> Result<()> {
    let summary = report.summary();

    if json {
        let out = serde_json::to_string_pretty(report).map_err(StoreError::from)?;
        println!("{}", out);
    } else {
        for entry in &report.entries {
            let outcome = match &entry.outcome {
                ActionOutcome::Applied => "applied".to_string(),
                ActionOutcome::LabelNotFound => "label not found".to_string(),
                ActionOutcome::RemoteError(detail) => format!("remote error: {}", detail),
            };
            println!(
                "{}  rule {}  {}  {}",
                entry.message_id, entry.rule_index, entry.action, outcome
            );
        }
        println!(
            "Processed {} message(s), {} action(s) applied.",
            summary.messages_processed, summary.applied
        );
    }

    if let Some(warning) = summary.warning() {
        eprintln!("warning: {}", warning);
    }
    Ok(())
}

fn print_matches(matches: &[RuleMatch], json: bool) -> Result<()> {
    if json {
        let out = serde_json::to_string_pretty(matches).map_err(StoreError::from)?;
        println!("{}", out);
        return Ok(());
    }

    if matches.is_empty() {
        println!("No rules match any unread message.");
    }
    for m in matches {
        let actions: Vec<String> = m.actions.iter().map(|a| a.to_string()).collect();
        println!(
            "{}  '{}'  rule {}  {}",
            m.message_id,
            m.subject,
            m.rule_index,
            actions.join(", ")
        );
    }
    Ok(())
}
