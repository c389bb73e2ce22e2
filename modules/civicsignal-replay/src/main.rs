use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde_json::{json, Value};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use civicsignal_cluster::Engine;
use civicsignal_common::{load_config, Category, CivicSignalError, EngineConfig, Submission};

#[derive(Parser)]
#[command(
    name = "civicsignal-replay",
    about = "Replay normalized civic reports through the clustering engine"
)]
struct Cli {
    /// Path to engine config TOML. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON-lines file, one normalized submission per line
    #[arg(long, required_unless_present = "print_schema")]
    input: Option<PathBuf>,

    /// Run a pending-pool sweep after the last submission
    #[arg(long)]
    sweep: bool,

    /// Print the N highest-priority open clusters at the end
    #[arg(long)]
    top: Option<usize>,

    /// Print the submission JSON schema and exit
    #[arg(long)]
    print_schema: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries one JSON document per line.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("civicsignal=info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cli.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    if cli.print_schema {
        let schema = schemars::schema_for!(Submission);
        println!("{}", serde_json::to_string_pretty(&schema)?);
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => {
            info!(config = %path.display(), "Loading config");
            load_config(path)?
        }
        None => EngineConfig::default(),
    };
    let engine = Engine::new(config)?;

    let Some(input) = cli.input else {
        bail!("--input is required");
    };
    let content = tokio::fs::read_to_string(&input)
        .await
        .with_context(|| format!("Failed to read input file: {}", input.display()))?;

    let mut accepted = 0usize;
    let mut rejected = 0usize;
    for (i, line) in content.lines().enumerate() {
        let line_no = i + 1;
        if line.trim().is_empty() {
            continue;
        }

        let submission = match parse_submission(line) {
            Ok(s) => s,
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping unreadable record");
                rejected += 1;
                println!("{}", json!({ "line": line_no, "status": "rejected", "reason": format!("{e:#}") }));
                continue;
            }
        };

        match engine.submit(submission).await {
            Ok(outcome) => {
                accepted += 1;
                println!("{}", json!({ "line": line_no, "status": "accepted", "outcome": outcome }));
            }
            Err(CivicSignalError::InputRejected(reason)) => {
                rejected += 1;
                println!(
                    "{}",
                    json!({ "line": line_no, "status": "rejected", "code": reason.code(), "reason": reason.to_string() })
                );
            }
            Err(e) => return Err(e.into()),
        }
    }

    info!(accepted, rejected, pending = engine.pending_len(), "Replay finished");

    if cli.sweep {
        let report = engine.sweep(chrono::Utc::now()).await?;
        println!("{}", json!({ "sweep": report }));
    }

    if let Some(limit) = cli.top {
        for summary in engine.rank(limit) {
            println!("{}", json!({ "ranked": summary }));
        }
    }

    Ok(())
}

/// Parse one JSON line, mapping loose category spellings onto the canonical
/// set. Categories outside it are refused rather than guessed.
fn parse_submission(line: &str) -> Result<Submission> {
    let mut value: Value = serde_json::from_str(line).context("Invalid JSON")?;
    if let Some(raw) = value.get("category").and_then(Value::as_str).map(str::to_string) {
        let Some(category) = Category::from_str_loose(&raw) else {
            bail!("Unsupported category: {raw}");
        };
        value["category"] = serde_json::to_value(category)?;
    }
    serde_json::from_value(value).context("Invalid submission record")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loose_category_is_canonicalized() {
        let line = r#"{"id":"6f1c1c9e-9a0e-4a52-8f59-3c1de2d1a001","content":"got mampet depan sekolah","category":"drainage","location":{"lat":-6.2,"lng":106.8},"gps_accuracy_m":12.0,"submitter_id":"warga-1","trust_weight":1.0,"created_at":"2026-03-01T08:00:00Z"}"#;
        let s = parse_submission(line).unwrap();
        assert_eq!(s.category, Category::WaterDrainage);
        assert!(s.media.is_empty());
    }

    #[test]
    fn non_canonical_category_is_refused() {
        let line = r#"{"content":"puskesmas tutup","category":"HEALTH","location":{"lat":-6.2,"lng":106.8},"gps_accuracy_m":12.0,"submitter_id":"warga-1"}"#;
        let err = parse_submission(line).unwrap_err();
        assert!(err.to_string().contains("Unsupported category"));
    }
}
