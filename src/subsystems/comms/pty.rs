//! PTY (console) comms channel: reads lines from stdin, sends them to the
//! cases subsystem, prints the outcome to stdout.
//!
//! Plain lines are analysed as text. Slash commands:
//!
//! ```text
//! /role patient|doctor
//! /voice <path>            analyse an audio file
//! /image <path>            analyse an image file
//! /review <case_id> approve|reject
//! /similar a,b,c
//! /comorbid <diagnosis>
//! /stats
//! /help
//! ```
//!
//! Runs until the `shutdown` token is cancelled (Ctrl-C) or stdin is closed.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::state::{CommsEvent, CommsState};
use crate::error::AppError;
use crate::external::speech::mime_from_path;
use crate::subsystems::runtime::{Component, ComponentFuture};
use crate::types::{CaseOutcome, DiagnosisResult, IntakeInput, UserRole};

const HELP: &str = "\
Describe your symptoms and press Enter, or use a command:
  /role patient|doctor
  /voice <path>
  /image <path>
  /review <case_id> approve|reject
  /similar <symptom>,<symptom>
  /comorbid <diagnosis>
  /stats";

// ── PtyChannel ───────────────────────────────────────────────────────────────

pub struct PtyChannel {
    channel_id: String,
    state: Arc<CommsState>,
}

impl PtyChannel {
    pub fn new(channel_id: impl Into<String>, state: Arc<CommsState>) -> Self {
        Self { channel_id: channel_id.into(), state }
    }
}

impl Component for PtyChannel {
    fn id(&self) -> &str {
        &self.channel_id
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(run_pty(self.channel_id, self.state, shutdown))
    }
}

// ── Commands ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Analyze(String),
    Role(UserRole),
    Voice(PathBuf),
    Image(PathBuf),
    Review { case_id: Uuid, approve: bool },
    Similar(Vec<String>),
    Comorbid(String),
    Stats,
    Help,
}

fn parse_command(line: &str) -> Result<Command, String> {
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Command::Analyze(line.to_string()));
    };
    let (name, arg) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    let arg = arg.trim();
    match name {
        "role" => arg.parse().map(Command::Role),
        "voice" | "image" if arg.is_empty() => Err(format!("usage: /{name} <path>")),
        "voice" => Ok(Command::Voice(PathBuf::from(arg))),
        "image" => Ok(Command::Image(PathBuf::from(arg))),
        "review" => {
            let mut parts = arg.split_whitespace();
            let case_id = parts
                .next()
                .and_then(|s| Uuid::parse_str(s).ok())
                .ok_or("usage: /review <case_id> approve|reject")?;
            let approve = match parts.next() {
                Some("approve") => true,
                Some("reject") => false,
                _ => return Err("usage: /review <case_id> approve|reject".into()),
            };
            Ok(Command::Review { case_id, approve })
        }
        "similar" => {
            let symptoms: Vec<String> = arg
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            if symptoms.is_empty() {
                Err("usage: /similar <symptom>,<symptom>".into())
            } else {
                Ok(Command::Similar(symptoms))
            }
        }
        "comorbid" if arg.is_empty() => Err("usage: /comorbid <diagnosis>".into()),
        "comorbid" => Ok(Command::Comorbid(arg.to_string())),
        "stats" => Ok(Command::Stats),
        "help" => Ok(Command::Help),
        other => Err(format!("unknown command /{other}; try /help")),
    }
}

// ── Rendering ────────────────────────────────────────────────────────────────

fn render_diagnosis(dx: &DiagnosisResult, out: &mut Vec<String>) {
    out.push(format!("diagnosis: {} ({:.0}%)", dx.primary.condition, dx.primary.confidence * 100.0));
    for d in &dx.differentials {
        out.push(format!("  differential: {} ({:.0}%)", d.condition, d.confidence * 100.0));
    }
    if !dx.recommended_tests.is_empty() {
        out.push(format!("  tests: {}", dx.recommended_tests.join(", ")));
    }
}

fn render_outcome(outcome: &CaseOutcome) -> String {
    let mut out = Vec::new();
    match outcome {
        CaseOutcome::Completed(r) => {
            if r.risk.requires_immediate_attention {
                out.push("!! This may need urgent medical attention.".to_string());
            }
            out.push(format!("case {} completed", r.case_id));
            out.push(format!("risk: {} ({:.2})", r.risk.level, r.risk.score));
            render_diagnosis(&r.diagnosis, &mut out);
            out.push(String::new());
            out.push(r.recommendation.clone());
        }
        CaseOutcome::PendingReview(n) | CaseOutcome::Referred(n) => {
            if n.urgent {
                out.push("!! This may need urgent medical attention.".to_string());
            }
            out.push(format!("case {} {}", n.case_id, outcome.status().replace('_', " ")));
            out.push(n.message.clone());
            if let Some(dx) = &n.diagnosis {
                render_diagnosis(dx, &mut out);
            }
        }
    }
    out.join("\n")
}

// ── run_pty ──────────────────────────────────────────────────────────────────

async fn run_pty(
    channel_id: String,
    state: Arc<CommsState>,
    shutdown: CancellationToken,
) -> Result<(), AppError> {
    info!(%channel_id, "pty channel started");
    state.report_event(CommsEvent::SessionStarted { channel_id: channel_id.clone() });
    let mut role = state.default_role();
    println!("─────────────────────────────────");
    println!(" Medical copilot console  (Ctrl-C to quit)");
    println!("─────────────────────────────────");
    println!("{HELP}");

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    loop {
        print!("[{role}]> ");
        let _ = std::io::stdout().flush();

        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                println!();
                info!("pty channel shutting down");
                break;
            }

            line = lines.next_line() => {
                match line {
                    Err(e) => {
                        warn!("pty read error: {e}");
                        break;
                    }
                    Ok(None) => {
                        info!("pty stdin closed");
                        break;
                    }
                    Ok(Some(input)) => {
                        let input = input.trim();
                        if input.is_empty() { continue; }
                        debug!(chars = input.len(), "pty received line");

                        match parse_command(input) {
                            Err(usage) => println!("{usage}"),
                            Ok(Command::Role(r)) => {
                                role = r;
                                println!("role set to {role}");
                            }
                            Ok(Command::Help) => println!("{HELP}"),
                            Ok(cmd) => println!("{}", execute(&state, role, cmd).await),
                        }
                    }
                }
            }
        }
    }

    state.report_event(CommsEvent::ChannelShutdown { channel_id });
    Ok(())
}

async fn execute(state: &CommsState, role: UserRole, cmd: Command) -> String {
    let result = match cmd {
        Command::Analyze(text) => state.analyze(vec![IntakeInput::Text(text)], role).await.map(|o| render_outcome(&o)),
        Command::Voice(path) => match file_input(&path, true).await {
            Ok(input) => state.analyze(vec![input], role).await.map(|o| render_outcome(&o)),
            Err(e) => return e,
        },
        Command::Image(path) => match file_input(&path, false).await {
            Ok(input) => state.analyze(vec![input], role).await.map(|o| render_outcome(&o)),
            Err(e) => return e,
        },
        Command::Review { case_id, approve } => {
            state.review(case_id, approve, role).await.map(|o| render_outcome(&o))
        }
        Command::Similar(symptoms) => state.similar_cases(symptoms, role, None).await,
        Command::Comorbid(dx) => state.comorbidities(dx, role).await,
        Command::Stats => state.stats(role).await,
        Command::Role(_) | Command::Help => return String::new(),
    };
    result.unwrap_or_else(|e| format!("error: {e}"))
}

async fn file_input(path: &Path, voice: bool) -> Result<IntakeInput, String> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    let mime = mime_from_path(path).to_string();
    let reference = path.display().to_string();
    Ok(if voice {
        IntakeInput::Voice { bytes, mime, reference }
    } else {
        IntakeInput::Image { bytes, mime, reference }
    })
}
