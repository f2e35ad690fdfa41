//! Restart behavior: pending questions survive process boundaries through the
//! durable store, and stale ones are pruned on the way back in.

mod common;

use common::*;
use parking_lot::Mutex;
use replybot::bot::{Ask, Bot};
use replybot::commands::CommandAccess;
use replybot::handler::CallbackRef;
use replybot::replies::{PendingQuestion, ReplyRegistry, RETENTION_SECS};
use replybot::store::DataStore;
use serde_json::Map;
use std::path::Path;
use std::sync::Arc;

fn build_bot(
    transport: Arc<MockTransport>,
    path: &Path,
    received: Arc<Mutex<Vec<String>>>,
) -> Bot {
    let mut store = DataStore::load(path).unwrap();
    store.set("config.owner", 1, false).unwrap();
    Bot::builder(test_config())
        .transport(transport)
        .store(store)
        .command("remind", "ask for a note", CommandAccess::open(), |ctx, _event| async move {
            ctx.ask(
                Ask::new("What should I remember?")
                    .on_reply(CallbackRef::named("note_received")),
            )
            .await?;
            Ok(())
        })
        .reply_handler("note_received", move |_ctx, answer| {
            let received = received.clone();
            async move {
                received.lock().push(answer.reply_text().to_string());
                Ok(())
            }
        })
        .build()
        .unwrap()
}

#[tokio::test]
async fn question_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.json");
    let received = Arc::new(Mutex::new(Vec::new()));

    // First process: ask the question, then go away.
    {
        let transport = Arc::new(MockTransport::new());
        let bot = build_bot(transport.clone(), &path, received.clone());
        bot.process_update(message_update(1, private_message(7, 2, 10, "/remind")))
            .await;
        assert_eq!(transport.sent_texts(), vec!["What should I remember?"]);
    }

    // Second process: the named callback resolves and the answer lands.
    let transport = Arc::new(MockTransport::new());
    let bot = build_bot(transport, &path, received.clone());
    bot.process_update(message_update(2, private_message(7, 2, 11, "buy milk")))
        .await;

    assert_eq!(*received.lock(), vec!["buy milk"]);

    // Answering consumed the question; nothing is waiting anymore.
    let mut store = DataStore::load(&path).unwrap();
    let restored = ReplyRegistry::restore(&mut store).unwrap();
    assert_eq!(restored.open_questions(7), 0);
}

#[tokio::test]
async fn expired_question_is_not_restored() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.json");

    // Seed a question past the retention window directly through the registry.
    {
        let mut store = DataStore::load(&path).unwrap();
        let mut registry = ReplyRegistry::new();
        registry.open_question(
            7,
            PendingQuestion {
                id: 500,
                question: "stale".to_string(),
                callback: Some(CallbackRef::named("note_received")),
                user: Some(2),
                answers: None,
                multiple: false,
                contact: false,
                extra: Map::new(),
                time: chrono::Utc::now().timestamp() - RETENTION_SECS - 3600,
            },
        );
        registry.persist(&mut store).unwrap();
    }

    let received = Arc::new(Mutex::new(Vec::new()));
    let transport = Arc::new(MockTransport::new());
    let bot = build_bot(transport, &path, received.clone());
    bot.process_update(message_update(1, private_message(7, 2, 10, "too late")))
        .await;

    // The stale question was pruned at restore time, so nothing correlates.
    assert!(received.lock().is_empty());
}
