use std::{collections::HashSet, sync::Arc, time::Duration};

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use uuid::Uuid;

use crate::{
    cli::{Cli, Command},
    domain::{
        self,
        message::MessageDraft,
        session::Session,
        snapshot::SessionSnapshot,
        status::SessionPhase,
    },
    infra::{self, error::AppError, stubs::StaticAuthProvider},
    realtime,
    usecases::{
        self,
        bootstrap::{self, Bootstrapped},
        context::AppContext,
        coordinator::{Coordinator, SessionFacade},
        resolve_session::InputShape,
    },
};

const CHAT_COMMAND_FAILED: &str = "WOLFPACK_CHAT_COMMAND_FAILED";
const HEARTBEAT_FAILED: &str = "WOLFPACK_HEARTBEAT_FAILED";

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

pub fn run(cli: Cli) -> Result<()> {
    let Bootstrapped {
        context,
        log_guard: _log_guard,
    } = bootstrap::bootstrap(cli.config.as_deref())?;

    tracing::debug!(
        domain = domain::module_name(),
        realtime = realtime::module_name(),
        usecases = usecases::module_name(),
        infra = infra::module_name(),
        "module boundaries loaded"
    );

    match cli.command {
        Command::CheckHandle { handle } => {
            println!("{}", InputShape::classify(&handle).as_label());
            Ok(())
        }
        Command::Chat { session, name } => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(AppError::RuntimeInit)?;
            runtime.block_on(chat(context, session, name))
        }
    }
}

async fn chat(context: AppContext, input: String, name: Option<String>) -> Result<()> {
    seed_session(&context, &input);

    let auth = Arc::new(StaticAuthProvider::signed_in(
        &Uuid::new_v4().to_string(),
        None,
        name.as_deref(),
    ));
    let coordinator = Coordinator::new(
        context.store.clone(),
        auth,
        context.config.core(),
        context.clock.clone(),
    );

    let facade = coordinator.open(&input);
    facade.connect().await?;
    facade.join_session().await?;

    let printer = tokio::spawn(print_transcript(facade.clone()));
    let heartbeat = tokio::spawn(keep_alive(facade.clone()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let input = ChatInput::parse(&line);
        if input == ChatInput::Quit {
            break;
        }
        if let Err(error) = handle_input(&facade, input).await {
            tracing::debug!(code = CHAT_COMMAND_FAILED, error = %error, "chat command failed");
            println!("! {} ({})", error, error.code());
        }
    }

    heartbeat.abort();
    facade.leave_session().await?;
    printer.abort();
    Ok(())
}

/// The demo store starts empty, so a session code typed on the command
/// line is registered before it is resolved.
fn seed_session(context: &AppContext, input: &str) {
    if InputShape::classify(input) == InputShape::Handle {
        context.store.add_session(Session {
            id: Uuid::new_v4().to_string(),
            handle: Some(input.trim().to_owned()),
            is_active: true,
        });
    }
}

async fn handle_input(
    facade: &SessionFacade,
    input: ChatInput,
) -> Result<(), usecases::error::CoordinationError> {
    match input {
        ChatInput::Say(text) => facade.send_message(MessageDraft::text(text)).await.map(|_| ()),
        ChatInput::React { message_id, emoji } => facade.add_reaction(&message_id, &emoji).await,
        ChatInput::Unreact { reaction_id } => facade.remove_reaction(&reaction_id).await,
        ChatInput::Refresh => facade.refresh().await,
        ChatInput::Who => {
            for member in facade.snapshot().members {
                let marker = if member.is_online { "*" } else { " " };
                println!("{marker} {} ({})", member.display_name, member.identity_id);
            }
            Ok(())
        }
        ChatInput::Unknown(command) => {
            println!("? unknown command {command}");
            Ok(())
        }
        ChatInput::Empty | ChatInput::Quit => Ok(()),
    }
}

async fn print_transcript(facade: SessionFacade) {
    let mut snapshots = facade.subscribe();
    let mut transcript = Transcript::default();
    while let Some(snapshot) = snapshots.recv().await {
        for line in transcript.render(&snapshot) {
            println!("{line}");
        }
    }
}

async fn keep_alive(facade: SessionFacade) {
    let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if facade.phase() != SessionPhase::Connected {
            continue;
        }
        if let Err(error) = facade.heartbeat().await {
            tracing::warn!(code = HEARTBEAT_FAILED, error = %error, "heartbeat failed");
        }
    }
}

/// One line typed by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ChatInput {
    Say(String),
    React { message_id: String, emoji: String },
    Unreact { reaction_id: String },
    Refresh,
    Who,
    Quit,
    Empty,
    Unknown(String),
}

impl ChatInput {
    fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        if !line.starts_with('/') {
            return Self::Say(line.to_owned());
        }

        let mut parts = line.split_whitespace();
        let command = parts.next().unwrap_or_default();
        match (command, parts.next(), parts.next()) {
            ("/react", Some(message_id), Some(emoji)) => Self::React {
                message_id: message_id.to_owned(),
                emoji: emoji.to_owned(),
            },
            ("/unreact", Some(reaction_id), None) => Self::Unreact {
                reaction_id: reaction_id.to_owned(),
            },
            ("/refresh", None, None) => Self::Refresh,
            ("/who", None, None) => Self::Who,
            ("/quit", None, None) => Self::Quit,
            _ => Self::Unknown(command.to_owned()),
        }
    }
}

/// Turns successive snapshots into transcript lines, printing each
/// message once and phase or error changes as they happen.
#[derive(Debug, Default)]
struct Transcript {
    seen: HashSet<String>,
    phase: Option<SessionPhase>,
    error_code: Option<String>,
    typing: Vec<String>,
}

impl Transcript {
    fn render(&mut self, snapshot: &SessionSnapshot) -> Vec<String> {
        let mut lines = Vec::new();

        if self.phase != Some(snapshot.phase) {
            self.phase = Some(snapshot.phase);
            lines.push(format!("-- {}", snapshot.phase.as_label()));
        }

        for message in &snapshot.messages {
            if !self.seen.insert(message.id.clone()) {
                continue;
            }
            let flag = if message.flagged { " [flagged]" } else { "" };
            lines.push(format!(
                "[{}] {}: {}{} ({})",
                message.created_at.format("%H:%M"),
                message.display_name,
                message.display_content(),
                flag,
                message.id
            ));
        }

        let typing: Vec<String> = snapshot
            .typing
            .iter()
            .map(|signal| signal.display_name.clone())
            .collect();
        if typing != self.typing {
            if !typing.is_empty() {
                lines.push(format!("~ {} typing", typing.join(", ")));
            }
            self.typing = typing;
        }

        let error_code = snapshot.error.as_ref().map(|error| error.code.clone());
        if error_code != self.error_code {
            if let Some(error) = snapshot.error.as_ref() {
                lines.push(format!("! {}", error.message));
            }
            self.error_code = error_code;
        }

        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::message_at;

    #[test]
    fn parses_chat_commands() {
        assert_eq!(ChatInput::parse("  hello there "), ChatInput::Say("hello there".to_owned()));
        assert_eq!(
            ChatInput::parse("/react m1 🔥"),
            ChatInput::React {
                message_id: "m1".to_owned(),
                emoji: "🔥".to_owned()
            }
        );
        assert_eq!(
            ChatInput::parse("/unreact r1"),
            ChatInput::Unreact {
                reaction_id: "r1".to_owned()
            }
        );
        assert_eq!(ChatInput::parse("/who"), ChatInput::Who);
        assert_eq!(ChatInput::parse("/quit"), ChatInput::Quit);
        assert_eq!(ChatInput::parse(""), ChatInput::Empty);
        assert_eq!(ChatInput::parse("/react m1"), ChatInput::Unknown("/react".to_owned()));
    }

    #[test]
    fn transcript_prints_each_message_once() {
        let mut transcript = Transcript::default();
        let mut snapshot = SessionSnapshot {
            phase: SessionPhase::Connected,
            messages: vec![message_at("m1", "hi", 0)],
            ..SessionSnapshot::default()
        };

        let first = transcript.render(&snapshot);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0], "-- SESSION_CONNECTED");
        assert!(first[1].contains("hi (m1)"));

        snapshot.messages.push(message_at("m2", "again", 5));
        let second = transcript.render(&snapshot);
        assert_eq!(second.len(), 1);
        assert!(second[0].contains("again (m2)"));
    }

    #[test]
    fn codes_are_registered_as_handles() {
        let context = AppContext::new(
            crate::infra::config::AppConfig::default(),
            Arc::new(crate::domain::clock::ManualClock::new(crate::test_support::t0())),
        );

        seed_session(&context, "ROOM42");
        seed_session(&context, "not a code");

        assert_eq!(context.store.session_count(), 1);
    }
}
