//! Terminal front end: reads commands from stdin while clock events are
//! applied as they arrive.

use crate::aggregate;
use crate::session::{
    Part, PartPhase, PhaseChange, QuestionStatus, SessionController, SessionError, SessionEvent,
    SessionNotice, TestPaper,
};
use crate::timer::{ClockKind, ClockTick};
use crate::AppError;
use std::collections::HashMap;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

const HELP: &str = "commands: record <n> | stop | next | status | submit | exit | help";

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Record(u16),
    Stop,
    Next,
    Status,
    Submit,
    Exit,
    Help,
}

fn parse_input(line: &str) -> Result<Input, String> {
    let mut words = line.split_whitespace();
    let command = words.next().unwrap_or("").to_ascii_lowercase();
    let input = match command.as_str() {
        "record" | "r" => {
            let number = words
                .next()
                .and_then(|n| n.parse::<u16>().ok())
                .ok_or_else(|| "record needs a question number".to_string())?;
            Input::Record(number)
        }
        "stop" | "s" => Input::Stop,
        "next" | "n" => Input::Next,
        "status" => Input::Status,
        "submit" => Input::Submit,
        "exit" | "quit" => Input::Exit,
        "help" | "?" | "" => Input::Help,
        other => return Err(format!("unknown command '{}'", other)),
    };
    Ok(input)
}

/// Prints countdowns at coarse steps instead of every tick.
#[derive(Default)]
struct TickPrinter {
    last: HashMap<ClockKind, u64>,
}

impl TickPrinter {
    fn show(&mut self, tick: &ClockTick) {
        let secs = tick.remaining_display_secs();
        let step = match tick.clock.kind {
            ClockKind::Session => 60,
            ClockKind::Preparation | ClockKind::Recording => 15,
        };
        let due = secs % step == 0 || secs <= 5;
        if !due || self.last.get(&tick.clock.kind) == Some(&secs) {
            return;
        }
        self.last.insert(tick.clock.kind, secs);
        println!("[{} {}:{:02} left]", tick.clock.kind, secs / 60, secs % 60);
    }
}

pub async fn drive(mut controller: SessionController, paper: &TestPaper) -> Result<(), AppError> {
    let Some(mut events) = controller.take_event_receiver() else {
        return Err(AppError::Usage("session events are already being consumed".to_string()));
    };
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticks = TickPrinter::default();
    let phases = tokio::spawn(show_phases(controller.subscribe_phases()));

    let title = if paper.title.is_empty() { &paper.id } else { &paper.title };
    println!("Session {} ({})", controller.session_id(), title);
    println!("{}", HELP);
    show_part(controller.current_part());

    while !controller.is_finished() {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => match parse_input(&line) {
                        Ok(input) => {
                            if let Err(e) = apply(&mut controller, input).await {
                                println!("! {}", e);
                            }
                        }
                        Err(e) => println!("! {}\n{}", e, HELP),
                    },
                    None => {
                        println!("Input closed, abandoning the session");
                        report_ack(controller.exit().await);
                        break;
                    }
                }
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                handle(&mut controller, event, &mut ticks).await;
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Interrupted, abandoning the session");
                report_ack(controller.exit().await);
                break;
            }
        }
    }
    phases.abort();
    Ok(())
}

/// Reports part boundaries while the controller is busy evaluating.
async fn show_phases(mut phases: broadcast::Receiver<PhaseChange>) {
    loop {
        match phases.recv().await {
            Ok(change) => match change.to {
                PartPhase::Evaluating => println!("Evaluating part {}...", change.part),
                PartPhase::Evaluated => println!("Part {} evaluated", change.part),
                _ => {}
            },
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

async fn handle(controller: &mut SessionController, event: SessionEvent, ticks: &mut TickPrinter) {
    match controller.handle_event(event).await {
        Ok(Some(SessionNotice::Tick(tick))) => ticks.show(&tick),
        Ok(Some(SessionNotice::PreparationFinished { part, recording })) => match recording {
            Some(key) => println!("Preparation for part {} is over, recording {} now", part, key),
            None => println!("Preparation for part {} is over", part),
        },
        Ok(Some(SessionNotice::RecordingForceStopped(recording))) => println!(
            "Time is up for {}, recorded {:.1}s",
            recording.question, recording.duration_secs
        ),
        Ok(Some(SessionNotice::Finalized(ack))) => {
            println!("Time is up. Result saved to {}", ack.location);
        }
        Ok(None) => {}
        Err(e) => println!("! {}", e),
    }
}

async fn apply(controller: &mut SessionController, input: Input) -> Result<(), SessionError> {
    match input {
        Input::Record(number) => {
            let key = controller.start_recording(number).await?;
            println!("Recording {} (type 'stop' when done)", key);
        }
        Input::Stop => {
            let recording = controller.stop_recording().await?;
            println!("Saved {:.1}s for {}", recording.duration_secs, recording.question);
        }
        Input::Next => {
            controller.next_part().await?;
            show_part(controller.current_part());
        }
        Input::Status => show_status(controller),
        Input::Submit => {
            println!("Submitting...");
            report_ack(controller.submit().await);
        }
        Input::Exit => report_ack(controller.exit().await),
        Input::Help => println!("{}", HELP),
    }
    Ok(())
}

fn report_ack(outcome: Result<crate::submission::Ack, SessionError>) {
    match outcome {
        Ok(ack) => println!("Result saved to {}", ack.location),
        Err(e) => println!("! {}", e),
    }
}

fn show_part(part: &Part) {
    println!("\n== Part {} ({:?}) ==", part.number, part.mode);
    if let Some(instructions) = &part.instructions {
        println!("{}", instructions);
    }
    if let Some(audio) = &part.audio_prompt {
        println!("(audio prompt: {})", audio);
    }
    if part.mode.has_preparation() && !part.preparation_done {
        println!("Preparation: {}s, recording starts automatically", part.preparation.as_secs());
    }
    for question in &part.questions {
        println!("  [{}] {} ({}s)", question.key.question, question.text, question.budget.as_secs());
    }
}

fn show_status(controller: &SessionController) {
    let progress = controller.progress();
    println!(
        "Part {}/{} ({}), {}s left, submission {:?}",
        progress.part_index + 1,
        progress.part_count,
        progress.phase,
        progress.session_remaining_secs,
        progress.submission
    );
    for q in &progress.questions {
        let band = match (q.status, q.band) {
            (QuestionStatus::Evaluated, Some(band)) => format!(" band {:.1}", aggregate::display_band(band)),
            _ => String::new(),
        };
        println!("  {} {:?}{} ({}s left)", q.key, q.status, band, q.remaining_budget_secs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!(parse_input("record 2").unwrap(), Input::Record(2));
        assert_eq!(parse_input("  R 1 ").unwrap(), Input::Record(1));
        assert_eq!(parse_input("next").unwrap(), Input::Next);
        assert_eq!(parse_input("").unwrap(), Input::Help);
        assert!(parse_input("record").is_err());
        assert!(parse_input("record x").is_err());
        assert!(parse_input("dance").is_err());
    }
}
