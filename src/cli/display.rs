use console::style;

use crate::checkpoint::CheckpointSummary;
use crate::orchestrator::{EngineEvent, EventKind, RunReport};
use crate::session::SessionSnapshot;
use crate::state::SessionStatus;

pub struct Display;

impl Display {
    pub fn new() -> Self {
        Self
    }

    pub fn print_header(&self, text: &str) {
        println!();
        println!("{}", style(text).bold().cyan());
        println!("{}", style("═".repeat(60)).dim());
    }

    pub fn print_error(&self, message: &str) {
        eprintln!("{} {}", style("error:").bold().red(), message);
    }

    pub fn print_event(&self, event: &EngineEvent) {
        match &event.kind {
            EventKind::PhaseStarted { phase, iteration } => {
                println!(
                    "{} {} {}",
                    style("▶").cyan(),
                    style(phase).bold(),
                    style(format!("(iteration {})", iteration)).dim()
                );
            }
            EventKind::PhaseRetrying { phase, role } => {
                println!(
                    "{} retrying {} after all {} members failed",
                    style("↻").yellow(),
                    phase,
                    role
                );
            }
            EventKind::PhaseDegraded {
                phase,
                failed_members,
            } => {
                println!(
                    "{} {} advancing degraded, failed: {}",
                    style("⚠").yellow(),
                    phase,
                    failed_members.join(", ")
                );
            }
            EventKind::MemberFinished { member, success } => {
                let mark = if *success {
                    style("✔").green()
                } else {
                    style("✗").red()
                };
                println!("  {} {}", mark, member);
            }
            EventKind::CostIncurred {
                member,
                cost,
                session_total,
            } => {
                println!(
                    "  {} {} ${:.4} {}",
                    style("$").dim(),
                    member,
                    cost,
                    style(format!("(total ${:.4})", session_total)).dim()
                );
            }
            EventKind::GroupCancelled { phase } => {
                println!("{} {} cancelled", style("✋").yellow(), phase);
            }
            EventKind::FeedbackInjected { text } => {
                println!("{} feedback: {}", style("✎").cyan(), text);
            }
            EventKind::PlanProposed { steps } => {
                println!("{} plan proposed:", style("☰").cyan());
                for (i, step) in steps.iter().enumerate() {
                    println!("  {}. {}", i + 1, step);
                }
                println!("{}", style("  approve | reject <feedback>").dim());
            }
            EventKind::Paused => println!("{} paused", style("⏸").yellow()),
            EventKind::Resumed => println!("{} resumed", style("▶").green()),
            EventKind::SessionCompleted {
                best_score,
                checkpoint_id,
            } => {
                let score = best_score
                    .map(|s| format!("{:.1}", s))
                    .unwrap_or_else(|| "-".into());
                println!(
                    "{} session completed, best score {} (checkpoint {})",
                    style("✅").green(),
                    score,
                    checkpoint_id
                );
            }
            EventKind::SessionAborted {
                reason,
                checkpoint_id,
            } => {
                println!(
                    "{} session aborted: {} {}",
                    style("❌").red(),
                    reason,
                    style(format!("(resume from {})", checkpoint_id)).dim()
                );
            }
        }
    }

    pub fn print_report(&self, report: &RunReport) {
        self.print_header("Session report");
        println!("Session:     {}", style(&report.session_id).bold());
        println!(
            "Status:      {}",
            self.status_style(report.status).apply_to(report.status)
        );
        println!("Iterations:  {}", report.iterations);
        if let Some(score) = report.best_score {
            println!("Best score:  {:.1}", score);
        }
        if let Some(id) = &report.best_candidate_id {
            println!("Best result: {}", id);
        }
        println!("Total cost:  ${:.4}", report.total_cost);
        for (role, cost) in &report.cost_breakdown {
            println!("  {:<14} ${:.4}", role.to_string(), cost);
        }
        if let Some(checkpoint) = &report.checkpoint_id {
            println!("Checkpoint:  {}", style(checkpoint).dim());
        }
        println!();
    }

    pub fn print_sessions(&self, sessions: &[CheckpointSummary]) {
        if sessions.is_empty() {
            println!("No sessions found.");
            return;
        }
        self.print_header("Sessions");
        for summary in sessions {
            println!(
                "{}  {} / {}  {}",
                style(&summary.session_id).bold(),
                summary.phase,
                summary.status,
                style(&summary.created_at).dim()
            );
        }
        println!();
    }

    pub fn print_session_detail(&self, snapshot: &SessionSnapshot) {
        self.print_header(&format!("Session: {}", snapshot.session.id));
        println!("Request:    {}", style(&snapshot.session.request).bold());
        println!("Phase:      {}", snapshot.session.phase);
        println!(
            "Status:     {}",
            self.status_style(snapshot.session.status)
                .apply_to(snapshot.session.status)
        );
        println!(
            "Iteration:  {}/{}",
            snapshot.session.iteration, snapshot.session.max_iterations
        );
        println!("Mode:       {}", snapshot.session.mode);
        println!("Cost:       ${:.4}", snapshot.session.total_cost);

        if let Some(plan) = snapshot.approved_plan() {
            println!("\n{}", style("Plan").bold());
            for (i, step) in plan.steps.iter().enumerate() {
                println!("  {}. {}", i + 1, step);
            }
        }

        if !snapshot.candidates.is_empty() {
            println!("\n{}", style("Candidates").bold());
            for candidate in &snapshot.candidates {
                let score = snapshot
                    .evaluations
                    .iter()
                    .filter(|e| e.candidate_id == candidate.id)
                    .map(|e| e.final_score())
                    .fold(f64::NEG_INFINITY, f64::max);
                let score = if score.is_finite() {
                    format!("{:.1}", score)
                } else {
                    "-".into()
                };
                println!(
                    "  [{}] {} {}",
                    score,
                    style(&candidate.variant).bold(),
                    style(truncate(&candidate.content, 60)).dim()
                );
            }
        }
        println!();
    }

    fn status_style(&self, status: SessionStatus) -> console::Style {
        match status {
            SessionStatus::Completed => console::Style::new().green(),
            SessionStatus::Aborted => console::Style::new().red(),
            SessionStatus::Paused | SessionStatus::AwaitingInput => console::Style::new().yellow(),
            SessionStatus::Running => console::Style::new().cyan(),
        }
    }
}

impl Default for Display {
    fn default() -> Self {
        Self::new()
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}…", cut)
    }
}
