//! Interactive terminal session.
//!
//! Typed lines are submitted as text. `/talk` opens a capture: with the console
//! engine the following lines are dictated until `/done`; with a transcription
//! service `/talk <file>` uploads a raw 16-bit mono PCM recording.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use kiska_agent::{Notice, TurnState};
use kiska_core::transcript::{Origin, TranscriptSnapshot};

use crate::session::{CaptureInput, Session};

const HELP: &str = "\
Commands:
  /talk [file]   start speaking (console: type lines, then /done)
  /done          release the talk button
  /reset         clear the conversation
  /state         show whose turn it is
  /help          show this help
  /quit          leave";

enum Line<'a> {
    Text(&'a str),
    Talk(Option<&'a str>),
    Done,
    Reset,
    State,
    Help,
    Quit,
    Unknown(&'a str),
}

fn parse_line(line: &str) -> Line<'_> {
    let line = line.trim();
    let Some(command) = line.strip_prefix('/') else {
        return Line::Text(line);
    };
    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, Some(arg.trim()).filter(|a| !a.is_empty())),
        None => (command, None),
    };
    match name {
        "talk" => Line::Talk(arg),
        "done" => Line::Done,
        "reset" => Line::Reset,
        "state" => Line::State,
        "help" | "?" => Line::Help,
        "quit" | "exit" => Line::Quit,
        _ => Line::Unknown(name),
    }
}

/// Render entries newer than `after`, returning the last sequence shown.
///
/// User entries are only echoed for spoken turns; typed ones are already on screen.
fn render_new(snapshot: &TranscriptSnapshot, after: u64, show_user: bool, name: &str) -> (Vec<String>, u64) {
    let mut last = after;
    let mut out = Vec::new();
    for entry in snapshot.iter().filter(|e| e.sequence > after) {
        last = entry.sequence;
        match entry.origin {
            Origin::User if show_user => out.push(format!("you (voice): {}", entry.text)),
            Origin::User => {}
            Origin::Assistant => out.push(format!("{name}: {}", entry.text)),
        }
    }
    (out, last)
}

/// Poll `ready` until it holds or two seconds pass.
async fn poll_until(mut ready: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if ready() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

pub async fn run(session: Session, name: &str, greet: bool) -> anyhow::Result<()> {
    let handle = session.handle.clone();
    let mut notices = handle.subscribe_notices();
    let mut transcript = handle.watch_transcript();
    let mut shown = transcript
        .borrow_and_update()
        .last()
        .map(|e| e.sequence)
        .unwrap_or(0);
    let mut voice_turn = false;
    let mut dictating = false;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{HELP}\n");
    if greet {
        handle.greet();
    }

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_line(&line) {
                    Line::Text("") => {}
                    Line::Text(text) if dictating => {
                        if let CaptureInput::Dictation(engine) = &session.input {
                            if !engine.dictate(text) {
                                println!("(not listening)");
                                dictating = false;
                            }
                        }
                    }
                    Line::Text(text) => {
                        if handle.state() != TurnState::Idle {
                            println!("(busy: {}, input dropped)", handle.state());
                        }
                        handle.submit_text(text);
                    }
                    Line::Talk(arg) => match &session.input {
                        CaptureInput::Dictation(engine) => {
                            handle.press_talk();
                            if poll_until(|| engine.is_listening()).await {
                                voice_turn = true;
                                dictating = true;
                                println!("(listening; type what you say, then /done)");
                            } else {
                                println!("(cannot listen right now)");
                            }
                        }
                        CaptureInput::Recording(engine) => {
                            let Some(path) = arg else {
                                println!("usage: /talk <raw-pcm-file>");
                                continue;
                            };
                            let audio = match tokio::fs::read(path).await {
                                Ok(audio) => audio,
                                Err(e) => {
                                    println!("cannot read {path}: {e}");
                                    continue;
                                }
                            };
                            handle.press_talk();
                            if poll_until(|| engine.push_audio(&audio)).await {
                                voice_turn = true;
                            } else {
                                println!("(cannot listen right now)");
                            }
                            handle.release_talk();
                        }
                    },
                    Line::Done => {
                        dictating = false;
                        handle.release_talk();
                    }
                    Line::Reset => {
                        dictating = false;
                        handle.reset_session();
                    }
                    Line::State => println!("({})", handle.state()),
                    Line::Help => println!("{HELP}"),
                    Line::Quit => break,
                    Line::Unknown(name) => println!("unknown command /{name}, try /help"),
                }
            }
            changed = transcript.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = transcript.borrow_and_update().clone();
                let (out, last) = render_new(&snapshot, shown, voice_turn, name);
                if snapshot.iter().any(|e| e.sequence > shown && e.origin == Origin::User) {
                    voice_turn = false;
                }
                shown = last;
                for line in out {
                    println!("{line}");
                }
            }
            notice = notices.recv() => match notice {
                Ok(Notice::SignedOut) => {
                    println!("{}", Notice::SignedOut);
                    break;
                }
                Ok(notice) => {
                    if matches!(notice, Notice::CaptureFailed(_) | Notice::CaptureTimedOut | Notice::CaptureUnsupported) {
                        dictating = false;
                        voice_turn = false;
                    }
                    println!("! {notice}");
                }
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    }

    session.close().await;
    Ok(())
}
