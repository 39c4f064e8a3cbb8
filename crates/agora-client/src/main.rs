//! Terminal front end for the chat engine.
//!
//! Reads commands from stdin and prints session events. Plain lines are sent
//! to the open conversation.
//!
//! ```text
//! /open <user-id> <name>   open a conversation
//! /older                   load older messages
//! /users                   refresh the roster
//! /quit                    log out and exit
//! ```
//!
//! Pass `--json` to print events as JSON lines.

use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};

use agora_client::events::{RosterEntry, ScrollIntent};
use agora_client::{ChatClient, ClientConfig, Peer, SessionEvent};
use agora_shared::{Message, MessageId};

enum Command {
    Open(Peer),
    Older,
    Users,
    Quit,
    Send(String),
}

fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if !line.starts_with('/') {
        return Some(Command::Send(line.to_string()));
    }

    let mut parts = line.splitn(3, char::is_whitespace);
    match parts.next()? {
        "/open" => {
            let id = parts.next()?;
            let name = parts.next().unwrap_or(id).trim();
            Some(Command::Open(Peer::new(id, name)))
        }
        "/older" => Some(Command::Older),
        "/users" => Some(Command::Users),
        "/quit" => Some(Command::Quit),
        other => {
            eprintln!("unknown command {other}");
            None
        }
    }
}

/// Newest message id already printed, so full re-renders only print what
/// is new.
#[derive(Default)]
struct Printed {
    newest: Option<MessageId>,
}

fn print_message(m: &Message) {
    let who = if m.sender_name.is_empty() {
        m.sender_id.as_str()
    } else {
        m.sender_name.as_str()
    };
    println!("[{}] {who}: {}", m.time, m.body);
}

fn render(event: &SessionEvent, printed: &mut Printed) {
    match event {
        SessionEvent::ConversationOpened { peer, chat_id } => {
            printed.newest = None;
            println!("== chat {chat_id} with {} ==", peer.name);
        }
        SessionEvent::MessagesRendered { messages, scroll, .. } => match scroll {
            ScrollIntent::Bottom => {
                for m in messages.iter().filter(|m| Some(m.id) > printed.newest) {
                    print_message(m);
                }
                printed.newest = messages.last().map(|m| m.id).max(printed.newest);
            }
            ScrollIntent::PreserveFromTop { prepended } => {
                println!("-- {prepended} older --");
                messages.iter().take(*prepended).for_each(print_message);
            }
        },
        SessionEvent::LoadingOlder { .. } => println!("... loading older messages"),
        SessionEvent::HistoryError { initial, error, .. } => {
            let which = if *initial { "messages" } else { "older messages" };
            println!("!! failed to load {which}: {error}");
        }
        SessionEvent::TypingShown { name } => println!("{name} is typing..."),
        SessionEvent::TypingHidden => {}
        SessionEvent::Highlighted { user } => println!("* new message from {user}"),
        SessionEvent::RosterUpdated { entries } => print_roster(entries),
        SessionEvent::RosterError { error } => println!("!! roster unavailable: {error}"),
        SessionEvent::InputCleared => {}
        SessionEvent::NavigateToChat { peer } => println!("-> opening chat with {}", peer.name),
        SessionEvent::ConnectionChanged { state } => println!("~ connection {state:?}"),
        SessionEvent::SessionCleared => println!("~ session cleared"),
    }
}

fn print_roster(entries: &[RosterEntry]) {
    if entries.is_empty() {
        println!("(no other users online)");
        return;
    }
    let line: Vec<String> = entries
        .iter()
        .map(|e| {
            let mark = if e.highlighted { "*" } else { "" };
            format!("{mark}{} ({})", e.user.nickname, e.user.id)
        })
        .collect();
    println!("online: {}", line.join(", "));
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    agora_client::init_tracing();
    let json = std::env::args().any(|arg| arg == "--json");

    let config = ClientConfig::from_env();
    tracing::info!(server = %config.server_url, ws = %config.ws_url, "starting");

    let (client, mut events) = ChatClient::new(config);
    let renderer = tokio::spawn(async move {
        let mut printed = Printed::default();
        while let Some(event) = events.recv().await {
            if json {
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => tracing::warn!(error = %e, "failed to encode event"),
                }
            } else {
                render(&event, &mut printed);
            }
        }
    });

    let user = client.login().await.context("login failed")?;
    println!("logged in as {} ({})", user.nickname, user.id);
    let session = client.session().clone();
    session.view_mounted().await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let Some(command) = parse_command(&line) else {
            continue;
        };
        match command {
            Command::Open(peer) => {
                if let Err(e) = session.request_chat(peer).await {
                    eprintln!("could not open chat: {e}");
                }
            }
            Command::Older => match session.check_scroll(0).await {
                Ok(true) => {}
                Ok(false) => println!("(nothing to load right now)"),
                Err(e) => eprintln!("load failed: {e}"),
            },
            Command::Users => {
                if let Err(e) = session.refresh_roster().await {
                    eprintln!("could not load users: {e}");
                }
            }
            Command::Quit => break,
            Command::Send(body) => {
                session.on_input();
                if !session.send_message(&body).await {
                    println!("(not sent: no open conversation or connection)");
                }
            }
        }
    }

    client.logout();
    drop(client);
    drop(session);
    // Let the renderer print the final events.
    let _ = tokio::time::timeout(Duration::from_millis(200), renderer).await;
    Ok(())
}
