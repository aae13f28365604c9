use anyhow::{Context, Result};
use clap::Parser;
use dedupe_lib::engine::{EngineGate, PgEngine};
use dedupe_lib::matching::curator::{classify_pair, summarize_pairs, ZoneSummary};
use dedupe_lib::matching::merge::{merge_with_gate, MergeOutcome};
use dedupe_lib::matching::processor::{find_duplicates_chunked, DetectionRequest};
use dedupe_lib::models::matching::{
    DetectionPhase, DetectionProgress, DetectionResult, MatchZone, PairStatus,
};
use dedupe_lib::utils::cancellation::CancellationToken;
use dedupe_lib::utils::config::MatchingConfig;
use dedupe_lib::utils::db_connect::connect;
use dedupe_lib::utils::env::load_env;
use dedupe_lib::utils::progress_bars::progress_callback::ProgressCallback;
use dedupe_lib::utils::progress_bars::progress_config::ProgressConfig;
use log::{info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Find near-duplicate rows in one column of a table and optionally merge the sure ones.
#[derive(Parser, Debug)]
#[command(name = "dedupe", version)]
struct Args {
    /// Table to scan, optionally schema-qualified
    #[arg(long)]
    table: String,

    /// Schema for unqualified table names
    #[arg(long, default_value = "public")]
    schema: String,

    /// Column whose values are compared
    #[arg(long)]
    column: String,

    /// Blocking strategy: none, first_letter, first_2_chars, phonetic, fingerprint, token_phonetic
    #[arg(long, default_value = "phonetic")]
    strategy: String,

    #[arg(long, default_value_t = 90.0)]
    definite_threshold: f64,

    #[arg(long, default_value_t = 70.0)]
    maybe_threshold: f64,

    /// Column that uniquely identifies rows for deletion
    #[arg(long)]
    key_column: Option<String>,

    /// Delete the non-kept row of every definite pair
    #[arg(long)]
    merge_definite: bool,

    /// Audit entry the merge is recorded under
    #[arg(long, requires = "merge_definite")]
    audit_entry_id: Option<String>,

    /// Include the pair list in the printed summary
    #[arg(long)]
    show_pairs: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunSummary<'a> {
    table: &'a str,
    column: &'a str,
    strategy: &'a str,
    elapsed_secs: f64,
    zones: ZoneSummary,
    #[serde(flatten)]
    result: &'a DetectionResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    merge: Option<MergeOutcome>,
}

fn progress_bar_callback(bar: indicatif::ProgressBar) -> ProgressCallback {
    Arc::new(move |progress: &DetectionProgress| match progress.phase {
        DetectionPhase::Analyzing => bar.set_message("Analyzing blocks..."),
        DetectionPhase::Processing => {
            bar.set_length(progress.total_blocks as u64);
            bar.set_position(progress.current_block.saturating_sub(1) as u64);
            bar.set_message(format!(
                "{} | {} pairs ({} definite, {} maybe)",
                progress.block_key.as_deref().unwrap_or("-"),
                progress.pairs_found,
                progress.definite_count,
                progress.maybe_count
            ));
        }
        DetectionPhase::Complete => {
            bar.set_position(progress.total_blocks as u64);
            bar.finish_with_message(format!("{} pairs found", progress.pairs_found));
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    load_env();
    let args = Args::parse();
    info!("Starting duplicate detection on {}.{}", args.table, args.column);

    let mut config = MatchingConfig::from_env();
    if let Some(key_column) = &args.key_column {
        config.row_key_column = key_column.clone();
    }
    config.log_config();

    let request = DetectionRequest::parse(
        &args.table,
        &args.column,
        &args.strategy,
        args.definite_threshold,
        args.maybe_threshold,
    )?;

    let pool = connect().await.context("Failed to connect to database")?;
    let gate = EngineGate::new(PgEngine::new(pool).with_schema(&args.schema));

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; stopping after the current block");
            ctrl_c_token.cancel();
        }
    });

    let progress_config = ProgressConfig::from_env();
    let bar = progress_config.create_block_bar();
    let start = Instant::now();
    let mut result = find_duplicates_chunked(
        &gate,
        &request,
        &config,
        Some(progress_bar_callback(bar.clone())),
        &cancel,
    )
    .await?;
    if !bar.is_finished() {
        bar.abandon_with_message("stopped");
    }

    let merge = if args.merge_definite && !result.cancelled {
        for pair in result.pairs.iter_mut() {
            if classify_pair(pair, request.definite_threshold, request.maybe_threshold)
                == MatchZone::Definite
            {
                pair.set_status(PairStatus::Merged);
            }
        }
        let outcome = merge_with_gate(
            &gate,
            &request.table,
            &result.pairs,
            &request.column,
            &config.row_key_column,
            args.audit_entry_id.as_deref(),
        )
        .await?;
        Some(outcome)
    } else {
        if args.merge_definite {
            warn!("Run was cancelled; skipping merge");
        }
        None
    };

    let zones = summarize_pairs(&result.pairs, request.definite_threshold, request.maybe_threshold);
    if !args.show_pairs {
        result.pairs.clear();
    }
    let summary = RunSummary {
        table: &request.table,
        column: &request.column,
        strategy: request.strategy.as_str(),
        elapsed_secs: start.elapsed().as_secs_f64(),
        zones,
        result: &result,
        merge,
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).context("Failed to serialize run summary")?
    );
    Ok(())
}
