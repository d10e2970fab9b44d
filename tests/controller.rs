mod support;

use std::sync::Arc;

use chat_api::StatusCode;
use jarvis_chat::{
    BeginError, ControllerOptions, StreamController, StreamOutcome, StreamPhase, StreamUpdate,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use session_store::{MessageState, Role, SessionStore};
use support::{active_file, FakeChat, Reply};
use tempfile::TempDir;

type Store = SessionStore<Arc<FakeChat>>;

type Controller = StreamController<Arc<FakeChat>>;

async fn setup(fake: &Arc<FakeChat>, options: ControllerOptions) -> (TempDir, Store, Controller) {
    let dir = tempfile::tempdir().expect("tempdir");
    fake.set_sessions(&["s1"]);
    let mut store = SessionStore::open(Arc::clone(fake), active_file(&dir));
    store.init().await.expect("init");
    let controller = StreamController::new(Arc::clone(fake), options);
    (dir, store, controller)
}

fn contents(store: &Store) -> Vec<(Role, String, MessageState)> {
    store
        .messages()
        .iter()
        .map(|message| (message.role, message.content.clone(), message.state))
        .collect()
}

fn no_rehydrate() -> ControllerOptions {
    ControllerOptions {
        rehydrate_on_done: false,
        ..ControllerOptions::default()
    }
}

#[tokio::test]
async fn optimistic_pair_precedes_the_network_and_deltas_accumulate() {
    let fake = FakeChat::signed_in("mette");
    fake.push_reply(Reply::Chunks(vec![
        "data: {\"text\":\"H\"}\n\n",
        "data: {\"te",
        "xt\":\"i\"}\n\ndata: {\"text\":\"!\"}\n\n",
        "data: [DONE]\n\n",
    ]));
    let (_dir, mut store, mut controller) = setup(&fake, no_rehydrate()).await;

    let request = controller.begin(&mut store, "  hello ").expect("begin");
    assert_eq!(
        contents(&store),
        vec![
            (Role::User, "hello".to_string(), MessageState::Pending),
            (Role::Assistant, String::new(), MessageState::Streaming),
        ]
    );
    assert!(fake.calls().is_empty());
    assert_eq!(controller.phase(), StreamPhase::Sending);

    let mut updates = Vec::new();
    let outcome = controller
        .run(&mut store, request, |update| updates.push(update.clone()))
        .await;

    assert_eq!(outcome, StreamOutcome::Done);
    assert_eq!(
        contents(&store),
        vec![
            (Role::User, "hello".to_string(), MessageState::Complete),
            (Role::Assistant, "Hi!".to_string(), MessageState::Complete),
        ]
    );
    let deltas: Vec<_> = updates
        .iter()
        .filter_map(|update| match update {
            StreamUpdate::Delta(text) => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(deltas, vec!["H", "i", "!"]);
    assert_eq!(updates.last(), Some(&StreamUpdate::Phase(StreamPhase::Done)));
    assert_eq!(controller.phase(), StreamPhase::Done);
    assert!(!controller.is_busy());

    let calls = fake.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].session_id, "s1");
    assert_eq!(calls[0].prompt, "hello");
    assert!(!calls[0].correlation_id.is_empty());
}

#[tokio::test]
async fn status_events_never_become_content() {
    let fake = FakeChat::signed_in("mette");
    fake.push_reply(Reply::Chunks(vec![
        "event: status\ndata: thinking\n\n",
        "data: {\"type\":\"token\",\"content\":\"ok\"}\n\n",
        "data: {\"type\":\"done\"}\n\n",
    ]));
    let (_dir, mut store, mut controller) = setup(&fake, no_rehydrate()).await;

    let request = controller.begin(&mut store, "status?").expect("begin");
    let mut statuses = Vec::new();
    let outcome = controller
        .run(&mut store, request, |update| {
            if let StreamUpdate::Status(text) = update {
                statuses.push(text.clone());
            }
        })
        .await;

    assert_eq!(outcome, StreamOutcome::Done);
    assert_eq!(statuses, vec!["thinking".to_string()]);
    assert_eq!(store.messages()[1].content, "ok");
}

#[tokio::test]
async fn cancellation_stops_mutation_without_error_text() {
    let fake = FakeChat::signed_in("mette");
    fake.push_reply(Reply::ChunksThenHang(vec!["data: {\"text\":\"Hal\"}\n\n"]));
    let (_dir, mut store, mut controller) = setup(&fake, ControllerOptions::default()).await;

    let request = controller.begin(&mut store, "long answer please").expect("begin");
    let cancel = request.cancel_handle();
    let outcome = controller
        .run(&mut store, request, |update| {
            if matches!(update, StreamUpdate::Delta(_)) {
                cancel.cancel();
                cancel.cancel();
            }
        })
        .await;

    assert_eq!(outcome, StreamOutcome::Cancelled);
    assert_eq!(controller.phase(), StreamPhase::Cancelled);
    assert_eq!(
        contents(&store),
        vec![
            (Role::User, "long answer please".to_string(), MessageState::Complete),
            (Role::Assistant, "Hal".to_string(), MessageState::Complete),
        ]
    );
    assert!(!store.is_turn_in_flight());
}

#[tokio::test]
async fn error_event_marks_placeholder_and_keeps_log_when_rehydrate_fails() {
    let fake = FakeChat::signed_in("mette");
    fake.push_reply(Reply::Chunks(vec![
        "data: {\"text\":\"par\"}\n\n",
        "event: error\ndata: {\"error\":{\"message\":\"model overloaded\"}}\n\n",
    ]));
    let (_dir, mut store, mut controller) = setup(&fake, ControllerOptions::default()).await;
    fake.fail_message_loads(true);

    let request = controller.begin(&mut store, "hi").expect("begin");
    let outcome = controller.run(&mut store, request, |_| {}).await;

    assert_eq!(
        outcome,
        StreamOutcome::Errored {
            message: "Error: model overloaded".to_string()
        }
    );
    assert_eq!(controller.phase(), StreamPhase::Errored);
    let placeholder = &store.messages()[1];
    assert_eq!(placeholder.content, "Error: model overloaded");
    assert_eq!(placeholder.state, MessageState::Failed);
}

#[tokio::test]
async fn transport_error_is_followed_by_rehydrate() {
    let fake = FakeChat::signed_in("mette");
    fake.push_reply(Reply::Status(StatusCode::BAD_GATEWAY, "upstream down"));
    let (_dir, mut store, mut controller) = setup(&fake, ControllerOptions::default()).await;
    fake.set_messages("s1", &[("user", "hi"), ("assistant", "stored answer")]);

    let request = controller.begin(&mut store, "hi").expect("begin");
    let outcome = controller.run(&mut store, request, |_| {}).await;

    assert_eq!(
        outcome,
        StreamOutcome::Errored {
            message: "Error: upstream down".to_string()
        }
    );
    assert_eq!(
        contents(&store),
        vec![
            (Role::User, "hi".to_string(), MessageState::Persisted),
            (Role::Assistant, "stored answer".to_string(), MessageState::Persisted),
        ]
    );
}

#[tokio::test]
async fn completed_turn_rehydrates_from_server() {
    let fake = FakeChat::signed_in("mette");
    fake.push_reply(Reply::Chunks(vec!["data: {\"text\":\"Hej\"}\n\n"]));
    let (_dir, mut store, mut controller) = setup(&fake, ControllerOptions::default()).await;
    fake.set_messages("s1", &[("user", "hej"), ("assistant", "Hej")]);

    let request = controller.begin(&mut store, "hej").expect("begin");
    let outcome = controller.run(&mut store, request, |_| {}).await;

    assert_eq!(outcome, StreamOutcome::Done);
    assert!(store
        .messages()
        .iter()
        .all(|message| message.state == MessageState::Persisted));
    assert_eq!(store.messages()[0].id, "s1-0");
}

#[tokio::test]
async fn json_completion_finalizes_in_one_step() {
    let fake = FakeChat::signed_in("mette");
    fake.push_reply(Reply::Completion(json!({
        "choices": [{"message": {"role": "assistant", "content": "All at once"}}]
    })));
    let (_dir, mut store, mut controller) = setup(&fake, no_rehydrate()).await;

    let request = controller.begin(&mut store, "batch").expect("begin");
    let mut phases = Vec::new();
    let outcome = controller
        .run(&mut store, request, |update| {
            if let StreamUpdate::Phase(phase) = update {
                phases.push(*phase);
            }
        })
        .await;

    assert_eq!(outcome, StreamOutcome::Done);
    assert_eq!(phases, vec![StreamPhase::Sending, StreamPhase::Done]);
    assert_eq!(store.messages()[1].content, "All at once");
    assert_eq!(store.messages()[1].state, MessageState::Complete);
}

#[tokio::test]
async fn auth_failure_discards_the_optimistic_pair() {
    let fake = FakeChat::signed_in("mette");
    fake.push_reply(Reply::Unauthorized);
    let (_dir, mut store, mut controller) = setup(&fake, ControllerOptions::default()).await;
    fake.set_messages("s1", &[("user", "must not load")]);

    let request = controller.begin(&mut store, "hi").expect("begin");
    let outcome = controller.run(&mut store, request, |_| {}).await;

    assert_eq!(outcome, StreamOutcome::AuthLost);
    assert!(store.messages().is_empty());
    assert!(!store.is_turn_in_flight());
}

#[tokio::test]
async fn begin_rejects_empty_busy_and_sessionless_sends() {
    let fake = FakeChat::signed_in("mette");
    let (_dir, mut store, mut controller) = setup(&fake, no_rehydrate()).await;

    assert_eq!(
        controller.begin(&mut store, "   ").map(|_| ()),
        Err(BeginError::EmptyPrompt)
    );
    assert!(store.messages().is_empty());

    let first = controller.begin(&mut store, "first").expect("begin");
    assert_eq!(
        controller.begin(&mut store, "second").map(|_| ()),
        Err(BeginError::Busy)
    );
    assert_eq!(store.messages().len(), 2);

    controller.teardown(&mut store);
    assert!(first.cancel_handle().is_cancelled());
    assert!(!controller.is_busy());
    assert_eq!(store.messages()[1].state, MessageState::Complete);

    store.reset();
    assert_eq!(
        controller.begin(&mut store, "nobody listening").map(|_| ()),
        Err(BeginError::NoActiveSession)
    );
}
