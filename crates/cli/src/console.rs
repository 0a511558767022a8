//! Terminal front end: stdin lines become group messages, turn events go
//! to stdout (replies) and stderr (everything else).

use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use kh_agent::{Admission, AgentError, ConversationAgent, InboundMessage, PendingOp, TurnEvent};
use kh_codec::Segment;

const HELP: &str = "commands: /remake, /blocked, /credit, /recall <id>, /save <path>, /load <path>, /quit";

/// Speaker identity for console input.
pub struct Speaker {
    pub name: String,
    pub uid: String,
}

/// Read lines until EOF or `/quit`. Every plain line is recorded as a new
/// message and answered with one turn.
pub async fn chat(agent: Arc<ConversationAgent>, me: Speaker) -> anyhow::Result<()> {
    eprintln!("kohi console, group {}. /help for commands, Ctrl+D to exit", agent.group_id());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut seq: u64 = 0;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(cmd) = line.strip_prefix('/') {
            if !command(&agent, cmd) {
                break;
            }
            continue;
        }

        seq += 1;
        let msg = InboundMessage::new(format!("m{seq}"), &me.name, &me.uid, text_segments(line));
        match agent.add_message(msg).await {
            Admission::Recorded(_) => {}
            Admission::Blocked => {
                eprintln!("(you are blocked)");
                continue;
            }
            Admission::OutOfCredit => {
                eprintln!("(out of credit)");
                continue;
            }
            Admission::Reserved => {
                eprintln!("(uid {} is reserved, pick another with --uid)", me.uid);
                continue;
            }
        }
        eprintln!("[m{seq}]");

        run_turn(&agent, false).await?;
    }
    Ok(())
}

/// Run one turn and print its events. Returns after pending moderation has
/// been settled.
pub async fn run_turn(agent: &Arc<ConversationAgent>, json: bool) -> anyhow::Result<()> {
    let mut rx = match agent.say().await {
        Ok(rx) => rx,
        Err(AgentError::OutOfCredit) => {
            eprintln!("(out of credit)");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    while let Some(event) = rx.recv().await {
        if json {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            print_event(&event);
        }
    }

    for op in agent.settle_pending_ops() {
        if let PendingOp::Ban { user_id, duration } = op {
            eprintln!("(ban requested: user {user_id} for {} s)", duration.as_secs());
        }
    }
    Ok(())
}

fn print_event(event: &TurnEvent) {
    match event {
        TurnEvent::Reply { .. } => {
            if let Some(text) = event.plain_text() {
                for line in text.lines() {
                    println!("kohi> {line}");
                }
            }
        }
        TurnEvent::ToolCall { tool_name, .. } => {
            eprintln!("\x1b[2m[tool: {tool_name}]\x1b[0m");
        }
        TurnEvent::ToolResult {
            tool_name,
            is_error: true,
            content,
            ..
        } => {
            eprintln!("\x1b[2m[{tool_name}: {content}]\x1b[0m");
        }
        TurnEvent::Notice { text } => eprintln!("({text})"),
        TurnEvent::Failed { message } => eprintln!("error: {message}"),
        _ => {}
    }
}

/// Handle a slash command. Returns `false` to leave the console.
fn command(agent: &ConversationAgent, cmd: &str) -> bool {
    let (name, arg) = match cmd.split_once(' ') {
        Some((n, a)) => (n, a.trim()),
        None => (cmd, ""),
    };
    match name {
        "quit" | "exit" => return false,
        "remake" => {
            agent.remake("console command");
            eprintln!("(history cleared)");
        }
        "blocked" => {
            let blocked = agent.block_list().list();
            if blocked.is_empty() {
                eprintln!("(nobody is blocked)");
            }
            for (user, left) in blocked {
                eprintln!("{user}: {} s left", left.as_secs());
            }
        }
        "credit" => eprintln!("credit: {:.4}", agent.credit()),
        "recall" => {
            let done = agent.recall(arg);
            eprintln!("{}", if done { "(recalled)" } else { "(no such message)" });
        }
        "save" | "load" if arg.is_empty() => eprintln!("usage: /{name} <path>"),
        "save" => report(agent.save_records(Path::new(arg))),
        "load" => report(agent.load_records(Path::new(arg))),
        _ => eprintln!("{HELP}"),
    }
    true
}

fn report(result: kh_domain::Result<()>) {
    match result {
        Ok(()) => eprintln!("(ok)"),
        Err(e) => eprintln!("error: {e}"),
    }
}

/// `@123` words become mentions; everything else stays text.
fn text_segments(line: &str) -> Vec<Segment> {
    let mut out: Vec<Segment> = Vec::new();
    let mut pending = String::new();
    for (i, word) in line.split(' ').enumerate() {
        if i > 0 {
            pending.push(' ');
        }
        let uid = word
            .strip_prefix('@')
            .filter(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()));
        match uid {
            Some(uid) => {
                if !pending.is_empty() {
                    out.push(Segment::text(std::mem::take(&mut pending)));
                }
                out.push(Segment::mention(uid));
            }
            None => pending.push_str(word),
        }
    }
    if !pending.is_empty() {
        out.push(Segment::text(pending));
    }
    out
}
