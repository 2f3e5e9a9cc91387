//! ai-story-cli: generate stories and inspect provider health from the terminal
//!
//! Usage:
//!   ai-story-cli generate --style <text> --tags <a,b,c>   Stream a story to stdout
//!   ai-story-cli status                                  Show provider and circuit status
//!   ai-story-cli health                                  Probe every enabled provider

use ai_story_runtime::{RuntimeConfig, StoryEvent, StoryGenerator};
use anyhow::{bail, Context};
use futures::StreamExt;
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    match args[1].as_str() {
        "generate" => cmd_generate(&args[2..]).await,
        "status" => cmd_status(&args[2..]),
        "health" => cmd_health(&args[2..]).await,
        "version" | "--version" | "-V" => {
            println!("ai-story-cli {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}

fn print_usage() {
    println!(
        r#"ai-story-cli: story generation runtime

USAGE:
    ai-story-cli <COMMAND> [OPTIONS]

COMMANDS:
    generate --style <text> --tags <a,b,c>   Generate a story (1 to 3 tags)
    status                                   Show providers, circuits and recent fallbacks
    health                                   Probe every enabled provider
    version                                  Show version information
    help                                     Show this help message

OPTIONS:
    --config <path>                          YAML configuration file

ENVIRONMENT:
    OPENAI_API_KEY, GEMINI_API_KEY           Provider credentials
    RUST_LOG                                 Log filter (default: info)"#
    );
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn load_config(args: &[String]) -> anyhow::Result<RuntimeConfig> {
    let path = flag_value(args, "--config").map(PathBuf::from);
    RuntimeConfig::load(path.as_deref()).context("failed to load configuration")
}

async fn cmd_generate(args: &[String]) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let style = flag_value(args, "--style").unwrap_or_default();
    let Some(tags) = flag_value(args, "--tags") else {
        bail!("--tags is required");
    };
    let tags: Vec<String> = tags.split(',').map(|t| t.trim().to_string()).collect();

    let generator = StoryGenerator::from_config(&config)?;
    let mut stream = generator.generate_story(style, &tags)?;
    let mut stdout = std::io::stdout();

    while let Some(event) = stream.next().await {
        match event? {
            StoryEvent::Token { text } => {
                print!("{text}");
                stdout.flush()?;
            }
            StoryEvent::Discard { provider } => {
                eprintln!("\n[{provider} failed mid-stream, continuing with next provider]");
            }
            StoryEvent::Retry {
                attempt,
                max_attempts,
                reason,
            } => {
                eprintln!("\n[attempt {attempt}/{max_attempts} rejected: {reason}]");
            }
            StoryEvent::Completed { story } => {
                println!();
                println!();
                println!("=== {} ===", story.title);
                println!(
                    "{} words, {} min read, provider {}, attempt {}",
                    story.word_count, story.read_time_minutes, story.provider, story.attempts
                );
            }
        }
    }
    Ok(())
}

fn cmd_status(args: &[String]) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let generator = StoryGenerator::from_config(&config)?;
    let orchestrator = generator.orchestrator();

    println!("=== Providers ===");
    for status in orchestrator.provider_status() {
        println!(
            "{:<8} priority={} enabled={:<5} circuit={:<9} requests={} failures={} successes={}",
            status.name,
            status.priority,
            status.enabled,
            status.circuit_state.name(),
            status.total_requests,
            status.total_failures,
            status.total_successes,
        );
    }

    let events = orchestrator.recent_fallback_events(20);
    println!("\n=== Recent fallbacks ({}) ===", events.len());
    for event in events {
        println!("{}", serde_json::to_string(&event)?);
    }
    Ok(())
}

async fn cmd_health(args: &[String]) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let generator = StoryGenerator::from_config(&config)?;

    let mut unhealthy = 0;
    for health in generator.orchestrator().health_check_all().await {
        let mark = if health.healthy { "ok" } else { "FAIL" };
        println!("{:<8} {mark}", health.name);
        if !health.healthy {
            unhealthy += 1;
        }
    }
    if unhealthy > 0 {
        std::process::exit(1);
    }
    Ok(())
}
