//! Command-line front-end.
//!
//! Stands in for the desktop dialog: it composes a request from arguments,
//! submits it through the manager and prints replies as the result sink
//! flushes them.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::manager::Manager;
use crate::sink::{drive, ResultDisplay, ResultSink};
use crate::store::GenerationRecord;
use crate::types::{ChatRequest, Example, Prompt};

#[derive(Debug, Parser)]
#[command(name = "promptforge", version, about = "Generate code from prompts and examples through LLM backends")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List the models of every configured supply
    Models,
    /// List Slack channels, or resolve one by name
    Channels {
        #[arg(long)]
        name: Option<String>,
    },
    /// Show the top-level messages of the configured Slack channel
    History,
    /// Run a generation and stream the replies
    Generate(GenerateArgs),
    /// Compute embeddings for the given texts
    Embed {
        #[arg(long, default_value = "OpenAI")]
        supply: String,
        #[arg(long, default_value = "text-embedding-3-small")]
        model: String,
        #[arg(required = true)]
        input: Vec<String>,
    },
    /// List saved generations, or show one
    Results {
        #[arg(long)]
        show: Option<String>,
    },
}

#[derive(Debug, Args)]
pub struct GenerateArgs {
    #[arg(long, default_value = "Slack")]
    pub supply: String,
    #[arg(long, default_value = "claude")]
    pub model: String,
    /// The prompt text
    #[arg(long)]
    pub prompt: String,
    /// Conversation context sent before the examples
    #[arg(long, default_value = "")]
    pub system: String,
    /// File holding one example; repeat for several
    #[arg(long = "example")]
    pub examples: Vec<PathBuf>,
    /// Description for each example, matched by position
    #[arg(long = "example-desc")]
    pub example_descs: Vec<String>,
    /// Keep reading follow-up prompts from stdin and continue the chat
    #[arg(long)]
    pub interactive: bool,
    /// Only print the backend's cost estimate
    #[arg(long)]
    pub estimate: bool,
}

/// Prints fragments to stdout as they are flushed.
#[derive(Default)]
struct TerminalDisplay {
    shown: usize,
}

impl ResultDisplay for TerminalDisplay {
    fn append(&mut self, fragment: &str) {
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "{}\n", fragment);
        let _ = out.flush();
        self.shown += 1;
    }

    fn complete(&mut self) {
        if self.shown == 0 {
            eprintln!("[No reply]");
        }
    }
}

pub async fn run(cli: Cli, manager: &Manager) -> Result<()> {
    match cli.command {
        Command::Models => {
            let models = manager.get_all_models().await;
            if models.is_empty() {
                println!("No supply is configured. Edit the config file to add credentials.");
            }
            for (supply, names) in models {
                println!("{}:", supply);
                for name in names {
                    println!("  {}", name);
                }
            }
        }
        Command::Channels { name } => {
            let slack = manager.slack().context("Slack is not configured")?;
            match name {
                Some(name) => match slack.find_conversation(&name).await? {
                    Some(id) => println!("{}", id),
                    None => bail!("No channel named '{}'", name),
                },
                None => {
                    for channel in slack.list_channels().await? {
                        println!("{}\t{}", channel.id, channel.name);
                    }
                }
            }
        }
        Command::History => {
            let slack = manager.slack().context("Slack is not configured")?;
            for message in slack.history().await? {
                println!(
                    "[{}] {}: {}",
                    message.ts,
                    message.user.as_deref().unwrap_or("-"),
                    message.text
                );
            }
        }
        Command::Generate(args) => run_generate(manager, args).await?,
        Command::Embed {
            supply,
            model,
            input,
        } => {
            let backend = manager
                .backend(&supply)
                .with_context(|| format!("Cannot find valid api supply name {}", supply))?;
            let vectors = backend.embedding_request(&model, &input).await?;
            for (text, vector) in input.iter().zip(vectors) {
                println!("{}\t{} dims", text, vector.len());
            }
        }
        Command::Results { show } => match show {
            Some(id) => {
                let record = manager.database().load(&id)?;
                println!("{}", serde_json::to_string_pretty(&record)?);
            }
            None => {
                for record in manager.database().list()? {
                    let prompt = record
                        .prompts
                        .last()
                        .map(|p| p.content.as_str())
                        .unwrap_or("");
                    println!(
                        "{}  {}  {}/{}  {}",
                        record.id, record.created_at, record.supply, record.model, prompt
                    );
                }
            }
        },
    }
    Ok(())
}

async fn load_examples(paths: &[PathBuf], descriptions: &[String]) -> Result<Vec<Example>> {
    let mut examples = Vec::with_capacity(paths.len());
    for (index, path) in paths.iter().enumerate() {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read example: {}", path.display()))?;
        let description = descriptions.get(index).cloned().unwrap_or_default();
        examples.push(Example::new(description, content));
    }
    Ok(examples)
}

/// Submit one request and display its replies until the conversation ends.
async fn run_turn(manager: &Manager, supply: &str, request: ChatRequest) -> Vec<String> {
    let replies = manager.chat_request(supply, request);
    let sink = ResultSink::new();
    let mut display = TerminalDisplay::default();
    drive(&sink, replies, &mut display, manager.config().tick_period()).await;
    sink.fragments()
}

async fn run_generate(manager: &Manager, args: GenerateArgs) -> Result<()> {
    let examples = load_examples(&args.examples, &args.example_descs).await?;
    let prompts = vec![Prompt::new(&args.system, &args.prompt)];
    let request = ChatRequest {
        model: args.model.clone(),
        prompts: prompts.clone(),
        examples: examples.clone(),
        new_chat: true,
    };

    if args.estimate {
        let backend = manager
            .backend(&args.supply)
            .with_context(|| format!("Cannot find valid api supply name {}", args.supply))?;
        let estimate = backend.estimate_cost(&request);
        println!(
            "prompt tokens: {}, completion tokens: {}, cost: ${:.4}",
            estimate.prompt_tokens, estimate.completion_tokens, estimate.cost_usd
        );
        return Ok(());
    }

    let mut record = GenerationRecord::new(&args.supply, &args.model, prompts, examples);
    record
        .replies
        .extend(run_turn(manager, &args.supply, request).await);

    if args.interactive {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            eprint!("You > ");
            let Some(line) = lines.next_line().await? else {
                break;
            };
            let input = line.trim().to_string();
            if input.is_empty() {
                continue;
            }
            if matches!(input.as_str(), "quit" | "exit" | "/quit" | "/exit") {
                break;
            }
            let prompt = Prompt::new("", input);
            record.prompts.push(prompt.clone());
            let request = ChatRequest {
                model: args.model.clone(),
                prompts: vec![prompt],
                examples: Vec::new(),
                new_chat: false,
            };
            record
                .replies
                .extend(run_turn(manager, &args.supply, request).await);
        }
    }

    let path = manager.database().save(&record)?;
    eprintln!("[Saved] {}", path.display());
    Ok(())
}
