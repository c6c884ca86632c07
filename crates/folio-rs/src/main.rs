//! Conveyor belt simulator.
//!
//! Opens a synthetic document, drives the belt through a navigation script
//! and prints the belt's state after every step.
//!
//! # Examples
//!
//! ```sh
//! # Unlock steady state, read on, then zoom in
//! folio --windows 100 --script "2,3,4..10,capture=2,font=600"
//!
//! # Slow provider with a broken window, JSON output and captured logs
//! folio --latency-ms 40 --fail 6 --json --logs --script-file walk.txt
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use folio_rs::DEFAULT_BUFFER_SIZE;
use folio_rs::log_capture::LogBuffer;
use folio_rs::prelude::*;
use folio_rs::script::{ScriptStep, load_script, parse_script};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Conveyor belt simulator for long-document content residency.
#[derive(Parser)]
#[command(name = "folio")]
struct Cli {
    /// Windows in the synthetic document.
    #[arg(long, default_value_t = 100)]
    windows: usize,

    /// Window to open the document at.
    #[arg(long, default_value_t = 0)]
    start: usize,

    /// Navigation script, e.g. "2,3,4..9,font=600".
    #[arg(long)]
    script: Option<String>,

    /// Read the navigation script from a file (runs before --script).
    #[arg(long)]
    script_file: Option<PathBuf>,

    /// Resident windows.
    #[arg(long, default_value_t = DEFAULT_BUFFER_SIZE)]
    buffer_size: usize,

    /// Simulated generation latency per window, in milliseconds.
    #[arg(long, default_value_t = 0)]
    latency_ms: u64,

    /// Windows whose generation always fails (comma-separated).
    #[arg(long, value_delimiter = ',')]
    fail: Vec<usize>,

    /// Characters of synthetic content per window.
    #[arg(long, default_value_t = 4000)]
    chars_per_window: usize,

    /// Initial page size of the synthetic layout, in characters.
    #[arg(long, default_value_t = 1000)]
    chars_per_page: usize,

    /// Print snapshots as JSON lines.
    #[arg(long)]
    json: bool,

    /// Print captured log lines after each step.
    #[arg(long)]
    logs: bool,

    /// Capture debug-level logs (implies --logs).
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    let (layer, log_buffer) = BeltTracingLayer::new();
    let layer = if cli.verbose {
        layer.with_min_level(LogLevel::Debug)
    } else {
        layer
    };
    tracing_subscriber::registry().with(layer).init();

    let mut steps = Vec::new();
    if let Some(path) = &cli.script_file {
        steps.extend(load_script(path).map_err(|e| e.to_string())?);
    }
    if let Some(script) = &cli.script {
        steps.extend(parse_script(script).map_err(|e| e.to_string())?);
    }

    let provider = Arc::new(
        SyntheticProvider::new(cli.windows)
            .with_chars_per_window(cli.chars_per_window)
            .with_latency(Duration::from_millis(cli.latency_ms))
            .with_failing(cli.fail.iter().copied()),
    );
    let layout = Arc::new(FixedPageLayout::new(cli.chars_per_window, cli.chars_per_page));
    let config = BeltConfig::default().with_buffer_size(cli.buffer_size);

    let (belt, task) = BeltRuntime::builder(provider)
        .config(config)
        .layout_engine(layout.clone())
        .event_handler(LoggingHandler)
        .spawn()
        .map_err(|e| e.to_string())?;

    let printer = Printer {
        json: cli.json,
        logs: (cli.logs || cli.verbose).then_some(log_buffer),
    };

    let loads = belt
        .initialize(cli.start, cli.windows)
        .await
        .map_err(|e| e.to_string())?;
    let failed = settle(loads).await;
    printer.step("open", &refresh(&belt).await?, &failed)?;

    for step in steps {
        let (label, failed) = match step {
            ScriptStep::Enter(window) => {
                let outcome = belt.enter(window).await.map_err(|e| e.to_string())?;
                let mut label = format!("enter {window}");
                if outcome.ignored {
                    label.push_str(" (ignored: not resident)");
                }
                if let Some((from, to)) = outcome.transition {
                    label.push_str(&format!(" ({from:?} → {to:?})"));
                }
                if let Some(direction) = outcome.blocked {
                    label.push_str(&format!(" ({direction} blocked)"));
                }
                (label, settle(outcome.loads).await)
            }
            ScriptStep::Shift(direction) => {
                let shifted = match direction {
                    ShiftDirection::Forward => belt.shift_forward().await,
                    ShiftDirection::Backward => belt.shift_backward().await,
                };
                match shifted {
                    Ok(shift) => {
                        let load = belt.cache().request_load(shift.inserted);
                        let failed = match load.wait().await {
                            Ok(_) => Vec::new(),
                            Err(e) => vec![e.to_string()],
                        };
                        (
                            format!("shift {direction}: +{} -{}", shift.inserted, shift.evicted),
                            failed,
                        )
                    }
                    // Refused shifts are part of the simulation, not failures.
                    Err(e) => (format!("shift {direction} refused: {e}"), Vec::new()),
                }
            }
            ScriptStep::Font(chars_per_page) => {
                let snapshot = refresh(&belt).await?;
                let active = snapshot.active_window.unwrap_or_default();
                // Keep a captured position; otherwise capture the page on screen.
                let offset = match snapshot.resume {
                    Some(resume) => resume.offset,
                    None => {
                        let page = layout.current_page(active).unwrap_or_default();
                        belt.begin_relayout(page)
                            .await
                            .map_err(|e| e.to_string())?
                    }
                };
                layout.set_chars_per_page(chars_per_page);
                let restored = belt.finish_relayout().await.map_err(|e| e.to_string())?;
                let resumed = restored
                    .iter()
                    .find(|(window, _)| *window == active)
                    .map_or(0, |(_, anchor)| anchor.0);
                (
                    format!(
                        "font {chars_per_page} chars/page: {offset} of window {active} → page {resumed}"
                    ),
                    Vec::new(),
                )
            }
            ScriptStep::Capture(page) => {
                let offset = belt
                    .capture_position(ViewportAnchor(page))
                    .await
                    .map_err(|e| e.to_string())?;
                (format!("capture page {page}: {offset}"), Vec::new())
            }
        };
        printer.step(&label, &refresh(&belt).await?, &failed)?;
    }

    let stats = belt.cache().stats();
    drop(belt);
    let manager = task.await.map_err(|e| e.to_string())?;
    if cli.json {
        let summary = serde_json::json!({ "final": manager.snapshot(), "cache": stats });
        println!("{summary}");
    } else {
        println!(
            "done: {} | loads {} | stale discards {} | hit rate {:.0}%",
            manager.snapshot().summary_line(),
            stats.loads_started,
            stats.stale_discards,
            stats.hit_rate() * 100.0
        );
    }
    Ok(())
}

/// The belt's state once every command sent so far has been applied.
async fn refresh(belt: &BeltHandle) -> Result<BeltSnapshot, String> {
    belt.refresh().await.map_err(|e| e.to_string())
}

/// Wait for `loads`, returning a message per failed window.
async fn settle(loads: BatchLoad) -> Vec<String> {
    loads
        .wait()
        .await
        .into_iter()
        .filter_map(|(_, outcome)| outcome.err().map(|e| e.to_string()))
        .collect()
}

struct Printer {
    json: bool,
    logs: Option<LogBuffer>,
}

impl Printer {
    fn step(&self, label: &str, snapshot: &BeltSnapshot, failed: &[String]) -> Result<(), String> {
        if self.json {
            let line = serde_json::json!({
                "step": label,
                "snapshot": snapshot,
                "failed": failed,
            });
            println!("{}", serde_json::to_string(&line).map_err(|e| e.to_string())?);
        } else {
            println!("{label:<48} {}", snapshot.summary_line());
            for failure in failed {
                println!("    ! {failure}");
            }
        }
        if let Some(buffer) = &self.logs {
            for line in buffer.drain() {
                println!("    {line}");
            }
        }
        Ok(())
    }
}
