//! Line-oriented interrupt prompt for interactive sessions.
//!
//! Reads stdin while the engine runs and translates commands into control
//! signals. The engine applies them at its own safe points; nothing here
//! touches session state.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::interrupt::{ControlSignal, InterruptChannel};
use crate::session::ExecutionMode;

const HELP: &str = "commands: pause | resume | skip | approve | reject <feedback> | score <candidate> <value> | stop <feedback> | mode <interactive|autonomous> | max-iter <n> | quit";

pub fn spawn_interrupt_repl(channel: InterruptChannel) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match parse_command(line.trim()) {
                Ok(Some(signal)) => {
                    let quit = signal == ControlSignal::Quit;
                    channel.post(signal);
                    if quit {
                        break;
                    }
                }
                Ok(None) => {}
                Err(message) => println!("{}\n{}", message, HELP),
            }
        }
    })
}

fn parse_command(line: &str) -> Result<Option<ControlSignal>, String> {
    if line.is_empty() {
        return Ok(None);
    }
    let (command, rest) = match line.split_once(' ') {
        Some((c, r)) => (c, r.trim()),
        None => (line, ""),
    };

    match command {
        "pause" => Ok(Some(ControlSignal::Pause)),
        "resume" => Ok(Some(ControlSignal::Resume)),
        "skip" => Ok(Some(ControlSignal::Skip)),
        "quit" | "exit" => Ok(Some(ControlSignal::Quit)),
        "stop" => {
            if rest.is_empty() {
                Err("stop requires feedback text".into())
            } else {
                Ok(Some(ControlSignal::StopWithFeedback(rest.to_string())))
            }
        }
        "approve" => Ok(Some(ControlSignal::ApprovePlan)),
        "reject" => {
            if rest.is_empty() {
                Err("reject requires feedback text".into())
            } else {
                Ok(Some(ControlSignal::RejectPlan(rest.to_string())))
            }
        }
        "score" => match rest.split_once(' ') {
            Some((candidate, value)) => value
                .trim()
                .parse::<f64>()
                .map(|score| {
                    Some(ControlSignal::OverrideScore {
                        candidate_id: candidate.to_string(),
                        score,
                    })
                })
                .map_err(|_| format!("not a score: {}", value.trim())),
            None => Err("score requires a candidate id and a value".into()),
        },
        "mode" => rest
            .parse::<ExecutionMode>()
            .map(|mode| Some(ControlSignal::ChangeMode(mode))),
        "max-iter" => rest
            .parse::<u32>()
            .map(|n| Some(ControlSignal::AdjustMaxIterations(n)))
            .map_err(|_| format!("not a number: {}", rest)),
        other => {
            warn!(command = other, "Unknown interrupt command");
            Err(format!("unknown command: {}", other))
        }
    }
}
