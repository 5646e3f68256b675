mod config;
mod telemetry;

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use collector_core::application::CollectionService;
use collector_core::domain::{CollectionResult, ProcessedRecord};
use collector_core::error::{CollectError, SourceError, StoreError};
use collector_core::ports::ReportWriter;
use jsonl_adapter::{write_processed, JsonlDataset, SnapshotFile};
use markdown_adapter::{format_report, MarkdownReportWriter};
use reddit_adapter::{RedditConfig, RedditSession};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{CollectArgs, ConfigError};
use crate::telemetry::LogFormat;

const EXIT_OK: u8 = 0;
const EXIT_FATAL: u8 = 1;
const EXIT_PARTIAL: u8 = 2;

/// CLI tool to collect Reddit posts into an append-only JSON Lines dataset
#[derive(Parser, Debug)]
#[command(name = "reddit-collector", version)]
#[command(about = "Collects Reddit posts into a raw JSON Lines dataset and derives cleaned copies")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Debug logging for the collector crates (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Format of log lines on stderr
    #[arg(long, global = true, value_enum, env = "LOG_FORMAT", default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch posts and append the ones not yet in the dataset
    Collect(CollectArgs),
    /// Write a processed copy of a raw dataset with cleaned text and derived features
    Preprocess(PreprocessArgs),
}

#[derive(Args, Debug)]
struct PreprocessArgs {
    /// Raw dataset to read
    #[arg(short = 'i', long = "input", default_value = config::DEFAULT_OUTPUT)]
    input: PathBuf,

    /// Processed dataset to write (replaced if present)
    #[arg(
        short = 'o',
        long = "output",
        default_value = "data/processed/reddit_posts_master.jsonl"
    )]
    output: PathBuf,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Collect(#[from] CollectError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("could not start Reddit session: {0}")]
    Session(SourceError),
}

fn main() -> ExitCode {
    // A missing .env is fine; values may come from the real environment.
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();
    telemetry::init_logging(cli.log_format, cli.verbose);
    if let Ok(path) = &dotenv {
        debug!(path = %path.display(), "loaded environment file");
    }

    let outcome = match cli.command {
        Command::Collect(args) => run_collect(&args),
        Command::Preprocess(args) => run_preprocess(&args),
    };
    ExitCode::from(finish(outcome))
}

/// Turns a command outcome into the process exit status; errors are fatal.
fn finish(outcome: Result<u8, CliError>) -> u8 {
    match outcome {
        Ok(code) => code,
        Err(err) => {
            error!(error = %err, "run aborted");
            eprintln!("Error: {err}");
            EXIT_FATAL
        }
    }
}

/// 0 when every channel completed, 2 when any was partial or not attempted.
fn collect_exit_code(result: &CollectionResult) -> u8 {
    if result.is_complete() {
        EXIT_OK
    } else {
        EXIT_PARTIAL
    }
}

fn run_collect(args: &CollectArgs) -> Result<u8, CliError> {
    let config = config::load(args)?;
    info!(
        output = %config.output_path.display(),
        channels = config.settings.channels.len(),
        "starting collection"
    );

    let session = RedditSession::new(
        RedditConfig::new(config.credentials.clone())
            .with_requests_per_minute(config.requests_per_minute),
    )
    .map_err(CliError::Session)?;
    let dataset = JsonlDataset::new(&config.output_path);

    let mut service = CollectionService::new(
        Box::new(session),
        Box::new(dataset),
        config.settings.clone(),
    );
    if let Some(dir) = &config.snapshot_dir {
        service = service.with_sink(Box::new(SnapshotFile::new(
            dir,
            config.settings.sort,
            Utc::now(),
        )));
    }

    let result = service.run()?;
    println!("{}", format_report(&result));

    if let Some(path) = &config.report_path {
        let writer = MarkdownReportWriter::new(path);
        match writer.write(&result) {
            Ok(()) => info!(path = %path.display(), "wrote run report"),
            Err(err) => error!(path = %path.display(), error = %err, "could not write run report"),
        }
    }

    for report in result.failed_channels() {
        warn!(channel = %report.channel, status = %report.status, "channel did not finish");
    }
    Ok(collect_exit_code(&result))
}

fn run_preprocess(args: &PreprocessArgs) -> Result<u8, CliError> {
    if args.input == args.output {
        return Err(ConfigError::Invalid {
            field: "output",
            reason: "must differ from the raw input".to_string(),
        }
        .into());
    }

    let records = JsonlDataset::new(&args.input).read_records()?;
    let processed: Vec<ProcessedRecord> = records
        .into_iter()
        .map(ProcessedRecord::from_post)
        .collect();
    let written = write_processed(&args.output, &processed)?;

    info!(
        input = %args.input.display(),
        output = %args.output.display(),
        records = written,
        "processed dataset written"
    );
    println!(
        "Processed {written} records: {} -> {}",
        args.input.display(),
        args.output.display()
    );
    Ok(EXIT_OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use collector_core::domain::{ChannelReport, ChannelStatus, Sort};

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_collect_flags() {
        let cli = Cli::try_parse_from([
            "reddit-collector",
            "collect",
            "--channels",
            "depression,r/psychology",
            "--limit",
            "20",
            "--sort",
            "new",
            "--since",
            "2025-01-01",
            "-v",
        ])
        .unwrap();

        assert!(cli.verbose);
        match cli.command {
            Command::Collect(args) => {
                assert_eq!(args.channels, vec!["depression", "r/psychology"]);
                assert_eq!(args.limit, Some(20));
                assert_eq!(args.sort, Some(Sort::New));
                assert_eq!(args.since.as_deref(), Some("2025-01-01"));
                assert_eq!(args.config, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    fn result_with(status: Option<ChannelStatus>) -> CollectionResult {
        let mut result = CollectionResult::new(Utc::now());
        result.add_channel(ChannelReport::new("depression"));
        if let Some(status) = status {
            let mut report = ChannelReport::new("psychology");
            report.status = status;
            result.add_channel(report);
        }
        result
    }

    #[test]
    fn test_exit_code_complete_run() {
        assert_eq!(collect_exit_code(&result_with(None)), EXIT_OK);
    }

    #[test]
    fn test_exit_code_partial_channel() {
        let result = result_with(Some(ChannelStatus::Partial {
            reason: "r/psychology returned 403 Forbidden".into(),
        }));
        assert_eq!(collect_exit_code(&result), EXIT_PARTIAL);
    }

    #[test]
    fn test_exit_code_not_attempted_channel() {
        let result = result_with(Some(ChannelStatus::NotAttempted {
            reason: "session lost on r/depression".into(),
        }));
        assert_eq!(collect_exit_code(&result), EXIT_PARTIAL);
    }

    #[test]
    fn test_fatal_errors_exit_with_one() {
        assert_eq!(finish(Ok(EXIT_PARTIAL)), EXIT_PARTIAL);
        assert_eq!(
            finish(Err(CliError::Config(ConfigError::Missing("client id")))),
            EXIT_FATAL
        );
        assert_eq!(
            finish(Err(CliError::Collect(CollectError::Authentication(
                "invalid_grant".into()
            )))),
            EXIT_FATAL
        );
    }

    #[test]
    fn test_parse_rejects_unknown_sort() {
        let err = Cli::try_parse_from(["reddit-collector", "collect", "--sort", "best"]);
        assert!(err.is_err());
    }

    #[test]
    fn test_parse_preprocess_defaults() {
        let cli = Cli::try_parse_from(["reddit-collector", "preprocess"]).unwrap();
        match cli.command {
            Command::Preprocess(args) => {
                assert_eq!(args.input, PathBuf::from(config::DEFAULT_OUTPUT));
                assert_eq!(
                    args.output,
                    PathBuf::from("data/processed/reddit_posts_master.jsonl")
                );
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_preprocess_refuses_to_overwrite_input() {
        let args = PreprocessArgs {
            input: PathBuf::from("same.jsonl"),
            output: PathBuf::from("same.jsonl"),
        };
        assert!(matches!(
            run_preprocess(&args),
            Err(CliError::Config(ConfigError::Invalid { field: "output", .. }))
        ));
    }

    #[test]
    fn test_preprocess_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("raw.jsonl");
        let output = dir.path().join("processed").join("out.jsonl");
        std::fs::write(
            &input,
            concat!(
                r#"{"id":"a1","channel":"depression","created_at":1700000000,"title":"Feeling tired","body":"[removed]","score":1,"num_comments":0,"over_18":false,"is_self":true,"collected_at":"2025-05-01T09:00:00Z"}"#,
                "\n"
            ),
        )
        .unwrap();

        run_preprocess(&PreprocessArgs {
            input,
            output: output.clone(),
        })
        .unwrap();

        let text = std::fs::read_to_string(output).unwrap();
        let line: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(line["id"], "a1");
        assert_eq!(line["clean_text"], "feeling tired");
        assert_eq!(line["time"]["year"], 2023);
        assert_eq!(line["engagement"]["score_positive"], true);
    }
}
