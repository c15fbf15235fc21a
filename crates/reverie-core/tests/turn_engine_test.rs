//! Turn Engine against an in-process chat backend.

use async_trait::async_trait;
use reverie_core::{
    BackendSelection, Character, CharacterRegistry, ChatBackend, ChatRequest, ProviderKind,
    ProviderRouter, ReverieError, ReverieResult, RetryPolicy, Role, SessionStore, TurnEngine,
};
use std::sync::{Arc, Mutex};

struct EchoBackend {
    fail: bool,
    requests: Mutex<Vec<ChatRequest>>,
}

#[async_trait]
impl ChatBackend for EchoBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::LmStudio
    }

    async fn chat(&self, request: &ChatRequest) -> ReverieResult<String> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail {
            return Err(ReverieError::Remote {
                status: 503,
                body: "overloaded".into(),
            });
        }
        let last = request.messages.last().map(|m| m.content.as_str()).unwrap_or("");
        Ok(format!("echo: {last}"))
    }
}

fn alpha() -> Character {
    serde_json::from_value(serde_json::json!({
        "name": "Alpha",
        "system_prompt": "You are Alpha.",
        "appearance_descriptor": "a 25-year-old asian woman",
        "scenario": "start game."
    }))
    .unwrap()
}

fn engine(fail: bool) -> (TurnEngine, Arc<EchoBackend>) {
    let backend = Arc::new(EchoBackend {
        fail,
        requests: Mutex::new(Vec::new()),
    });
    let router = ProviderRouter::new(
        BackendSelection::new(ProviderKind::LmStudio, "local-model"),
        BackendSelection::new(ProviderKind::LmStudio, "local-model"),
    )
    .with_retry(RetryPolicy::none())
    .with_backend(backend.clone());
    let registry = CharacterRegistry::from_records([alpha()]);
    (TurnEngine::new(Arc::new(router), Arc::new(registry)), backend)
}

#[tokio::test]
async fn scenario_seeds_the_first_assistant_message() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path(), "/output");
    let (engine, backend) = engine(false);
    let mut session = store.create("Alpha", "alpha").unwrap();

    let opening = engine.seed_scenario(&mut session).await.unwrap();
    assert_eq!(opening.as_deref(), Some("echo: start game."));
    assert_eq!(session.transcript().len(), 1);
    assert_eq!(session.transcript()[0].role, Role::Assistant);
    assert_eq!(session.last_message_preview(), "echo: start game.");

    let requests = backend.requests.lock().unwrap();
    assert_eq!(requests[0].messages.len(), 1);
    assert_eq!(requests[0].system, "You are Alpha.");
    drop(requests);

    // Only ever seeds an empty transcript.
    assert!(engine.seed_scenario(&mut session).await.unwrap().is_none());
}

#[tokio::test]
async fn turn_appends_user_and_assistant() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path(), "/output");
    let (engine, backend) = engine(false);
    let mut session = store.create("Alpha", "alpha").unwrap();
    engine.seed_scenario(&mut session).await.unwrap();

    let reply = engine.turn(&mut session, "hello").await.unwrap();
    assert_eq!(reply, "echo: hello");
    let roles: Vec<Role> = session.transcript().iter().map(|e| e.role).collect();
    assert_eq!(roles, vec![Role::Assistant, Role::User, Role::Assistant]);

    // History excludes the new user message; it is passed as the current turn.
    let requests = backend.requests.lock().unwrap();
    let last = requests.last().unwrap();
    assert_eq!(last.messages.len(), 2);
    assert_eq!(last.messages[0].content, "echo: start game.");
    assert_eq!(last.messages[1].content, "hello");

    let log = std::fs::read_to_string(session.log_path()).unwrap();
    assert!(log.contains("**User**: hello"));
    assert!(log.contains("**Assistant**: echo: hello"));
}

#[tokio::test]
async fn provider_failure_still_advances_transcript() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path(), "/output");
    let (engine, backend) = engine(true);
    let mut session = store.create("Alpha", "alpha").unwrap();

    let reply = engine.turn(&mut session, "hello").await.unwrap();
    assert!(reply.starts_with("Sorry"));
    assert_eq!(session.transcript().len(), 2);
    assert_eq!(backend.requests.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_character_fails_without_touching_transcript() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path(), "/output");
    let (engine, _) = engine(false);
    let mut session = store.create("Nobody", "nobody").unwrap();
    let err = engine.turn(&mut session, "hello").await.unwrap_err();
    assert!(matches!(err, ReverieError::NotFound(_)));
    assert!(session.transcript().is_empty());
}

#[tokio::test]
async fn reply_is_dropped_when_another_session_took_over() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path(), "/output");
    let (engine, _) = engine(false);
    let mut first = store.create("Alpha", "alpha").unwrap();

    let pending = engine.begin_turn(&mut first, "hello").unwrap();
    assert_eq!(first.transcript().len(), 1);
    let reply = engine.reply(&pending).await;
    assert_eq!(reply, "echo: hello");

    let mut second = store.create("Alpha", "alpha").unwrap();
    assert!(!engine.finish_turn(&mut second, &pending, &reply).unwrap());
    assert!(second.transcript().is_empty());

    assert!(engine.finish_turn(&mut first, &pending, &reply).unwrap());
    let roles: Vec<Role> = first.transcript().iter().map(|e| e.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant]);
}
