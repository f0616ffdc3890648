//! Terminal input and output for an interactive session.

use async_trait::async_trait;
use sleuth_core::SleuthConfig;
use sleuth_core::research::{SessionCallback, SessionPhase, UserInput};
use std::io::{self, BufRead, Write};
use tokio::sync::mpsc;

/// Prints session events to stdout.
pub(crate) struct CliCallback;

#[async_trait]
impl SessionCallback for CliCallback {
    async fn on_assistant_message(&self, message: &str) {
        println!("\n\x1b[33mSleuth:\x1b[0m {message}");
    }

    async fn on_phase_change(&self, phase: SessionPhase) {
        if let Some(status) = phase_status(phase) {
            println!("\x1b[90m  {status}\x1b[0m");
        }
    }

    async fn on_search(&self, query: &str, call_number: usize, budget: usize) {
        println!("\x1b[36m  [search {call_number}/{budget}]\x1b[0m {query}");
    }

    async fn on_reflection(&self, reflection: &str) {
        println!("\x1b[90m  [reflect] {reflection}\x1b[0m");
    }
}

fn phase_status(phase: SessionPhase) -> Option<&'static str> {
    match phase {
        SessionPhase::AwaitingClarification => None,
        SessionPhase::Clarified => Some("Writing research brief..."),
        SessionPhase::Researching => Some("Researching..."),
        SessionPhase::ReportReady => Some("Report ready."),
    }
}

/// Stdin lines delivered over a channel, so a blocked read never holds up
/// cancellation.
pub(crate) struct StdinInput {
    rx: mpsc::Receiver<String>,
}

impl StdinInput {
    pub(crate) fn spawn() -> Self {
        let (tx, rx) = mpsc::channel(16);
        std::thread::spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        });
        Self { rx }
    }
}

#[async_trait]
impl UserInput for StdinInput {
    async fn next_line(&mut self) -> Option<String> {
        print!("\n\x1b[1;34mYou:\x1b[0m ");
        let _ = io::stdout().flush();
        self.rx.recv().await
    }
}

pub(crate) fn print_banner(config: &SleuthConfig) {
    println!("\x1b[1;33m");
    println!(r#"   ____  _            _   _     "#);
    println!(r#"  / ___|| | ___ _   _| |_| |__  "#);
    println!(r#"  \___ \| |/ _ \ | | | __| '_ \ "#);
    println!(r#"   ___) | |  __/ |_| | |_| | | |"#);
    println!(r#"  |____/|_|\___|\__,_|\__|_| |_|"#);
    println!("\x1b[0m");
    println!(
        "  Model: {} | Summaries: {} | Search budget: {}",
        config.llm.model, config.llm.summary_model, config.research.search_budget
    );
    println!("  What would you like researched? Ctrl-D to quit, Ctrl-C to cancel.");
}

pub(crate) fn print_report(report: &str) {
    println!("\n\x1b[1;33m=== Report ===\x1b[0m\n");
    println!("{}", report.trim_end());
}
