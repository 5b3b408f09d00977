use std::sync::Arc;

use clap::Parser;
use relay::cli::{Cli, Commands, SessionCommands};
use relay::commands::session::SessionCommand;
use relay::commands::trace::TraceCommand;
use relay::commands::{AppContext, Command};
use relay_core::runner::SharedStores;
use relay_core::session::{Message, SessionRepository};
use relay_core::storage::KeyValueStore;

fn context(dir: &tempfile::TempDir) -> AppContext {
    let missing_config = dir.path().join("absent.toml");
    AppContext::load(Some(missing_config.as_path()), Some(dir.path().join("data"))).unwrap()
}

fn seed_session(store: Arc<dyn KeyValueStore>, agent_id: &str, session_id: &str) {
    let stores = SharedStores::open(store);
    let mut repository = SessionRepository::new(agent_id, stores.conversations.clone());
    repository.create_session_from_response(
        session_id,
        None,
        vec![Message::user("hello", Some("exec_1".into()))],
    );
}

#[test]
fn parses_send_with_global_flags_after_subcommand() {
    let cli = Cli::try_parse_from([
        "relay",
        "send",
        "--agent",
        "a1",
        "--url",
        "http://localhost:3000/agent",
        "hello there",
        "--data-dir",
        "/tmp/relay",
    ])
    .unwrap();

    assert_eq!(
        cli.data_dir.as_deref(),
        Some(std::path::Path::new("/tmp/relay"))
    );
    match cli.command {
        Commands::Send {
            agent, url, input, ..
        } => {
            assert_eq!(agent, "a1");
            assert_eq!(url.as_deref(), Some("http://localhost:3000/agent"));
            assert_eq!(input, "hello there");
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn session_and_new_flags_conflict() {
    let result = Cli::try_parse_from([
        "relay", "send", "--agent", "a1", "--session", "s1", "--new", "hi",
    ]);
    assert!(result.is_err());
}

#[test]
fn parses_session_delete() {
    let cli = Cli::try_parse_from([
        "relay", "session", "--agent", "a1", "delete", "sess_1", "--force",
    ])
    .unwrap();

    match cli.command {
        Commands::Session {
            agent,
            command: SessionCommands::Delete { session_id, force },
        } => {
            assert_eq!(agent, "a1");
            assert_eq!(session_id, "sess_1");
            assert!(force);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[tokio::test]
async fn session_delete_removes_persisted_session() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(&dir);
    seed_session(ctx.store.clone(), "a1", "sess_1");

    let cmd = SessionCommand {
        agent: "a1".into(),
        command: SessionCommands::Delete {
            session_id: "sess_1".into(),
            force: true,
        },
        context: ctx,
    };
    cmd.execute().await.unwrap();

    let reopened = context(&dir);
    let stores = SharedStores::open(reopened.store.clone());
    let repository = SessionRepository::new("a1", stores.conversations.clone());
    assert!(repository.session("sess_1").is_none());
    assert!(repository.is_temporary());
}

#[tokio::test]
async fn session_show_fails_for_unknown_session() {
    let dir = tempfile::tempdir().unwrap();
    let cmd = SessionCommand {
        agent: "a1".into(),
        command: SessionCommands::Show {
            session_id: "missing".into(),
        },
        context: context(&dir),
    };

    let err = cmd.execute().await.unwrap_err();
    assert!(err.to_string().contains("Session not found"));
}

#[tokio::test]
async fn trace_fails_when_nothing_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let cmd = TraceCommand {
        execution_id: "exec_1".into(),
        json: false,
        context: context(&dir),
    };

    assert!(cmd.execute().await.is_err());
}
