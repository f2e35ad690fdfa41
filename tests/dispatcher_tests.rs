//! End-to-end dispatch tests against a mock transport.

mod common;

use common::*;
use anyhow::anyhow;
use parking_lot::Mutex;
use replybot::bot::{Ask, AskInline, Bot};
use replybot::commands::CommandAccess;
use replybot::event::AnswerVariant;
use replybot::handler::CallbackRef;
use replybot::store::DataStore;
use replybot::transport::TransportError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn store_with_owner(owner: i64) -> DataStore {
    let mut store = DataStore::in_memory();
    store.set("config.owner", owner, false).unwrap();
    store
}

#[tokio::test]
async fn trust_command_end_to_end() {
    let transport = Arc::new(MockTransport::new());
    let bot = Bot::builder(test_config())
        .transport(transport.clone())
        .store(store_with_owner(1))
        .with_builtin_commands()
        .build()
        .unwrap();

    bot.process_update(message_update(1, private_message(7, 1, 10, "/trust 42")))
        .await;

    let texts = transport.sent_texts();
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("42"));
    assert!(texts[0].contains("trusted"));
    let trusted = bot.with_store(|store| store.get_or("config.trust", Vec::<i64>::new()));
    assert_eq!(trusted, vec![42]);

    // The trusted user now passes the protection rules
    assert!(bot.is_message_allowed(&private_message(7, 42, 11, "hi")));
    assert!(!bot.is_message_allowed(&private_message(7, 43, 12, "hi")));
}

#[tokio::test]
async fn denied_command_is_dropped_silently() {
    let transport = Arc::new(MockTransport::new());
    let bot = Bot::builder(test_config())
        .transport(transport.clone())
        .store(store_with_owner(1))
        .with_builtin_commands()
        .build()
        .unwrap();

    bot.process_update(message_update(1, private_message(7, 5, 10, "/trust 42")))
        .await;

    assert!(transport.sent_texts().is_empty());
    let trusted = bot.with_store(|store| store.get_or("config.trust", Vec::<i64>::new()));
    assert!(trusted.is_empty());
}

#[tokio::test]
async fn first_sender_is_adopted_as_owner() {
    let transport = Arc::new(MockTransport::new());
    let bot = Bot::builder(test_config())
        .transport(transport.clone())
        .store(DataStore::in_memory())
        .with_builtin_commands()
        .build()
        .unwrap();

    bot.process_update(message_update(1, private_message(7, 77, 10, "hello")))
        .await;

    assert_eq!(bot.with_store(|store| store.get_or("config.owner", 0i64)), 77);
    let texts = transport.sent_texts();
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("owner"));

    // A second sender does not displace the owner
    bot.process_update(message_update(2, private_message(7, 78, 11, "hi")))
        .await;
    assert_eq!(bot.with_store(|store| store.get_or("config.owner", 0i64)), 77);
}

#[tokio::test]
async fn legacy_global_admin_setting_is_honored() {
    let transport = Arc::new(MockTransport::new());
    let mut store = DataStore::in_memory();
    store.set("config.globalAdmin", 55, false).unwrap();
    let bot = Bot::builder(test_config())
        .transport(transport.clone())
        .store(store)
        .build()
        .unwrap();

    bot.process_update(message_update(1, private_message(7, 77, 10, "hello")))
        .await;

    assert_eq!(bot.with_store(|store| store.get_or("config.owner", 0i64)), 55);
    // No greeting: the adopted owner is not the sender
    assert!(transport.sent_texts().is_empty());
    // The legacy key is gone once migrated
    assert!(!bot.with_store(|store| store.contains("config.globalAdmin")));
}

#[tokio::test]
async fn edited_messages_are_skipped() {
    let transport = Arc::new(MockTransport::new());
    let bot = Bot::builder(test_config())
        .transport(transport.clone())
        .store(store_with_owner(1))
        .with_builtin_commands()
        .build()
        .unwrap();

    bot.process_update(edited_update(1, private_message(7, 1, 10, "/trust 42")))
        .await;

    assert!(transport.sent_texts().is_empty());
    assert!(bot.with_store(|store| store.get_or("config.trust", Vec::<i64>::new())).is_empty());
}

#[tokio::test]
async fn handler_error_is_reported_to_chat() {
    let transport = Arc::new(MockTransport::new());
    let bot = Bot::builder(test_config())
        .transport(transport.clone())
        .store(store_with_owner(1))
        .command("boom", "always fails", CommandAccess::open(), |_ctx, _event| async {
            Err(anyhow!("kapow"))
        })
        .build()
        .unwrap();

    bot.process_update(message_update(1, private_message(7, 1, 10, "/boom")))
        .await;

    let texts = transport.sent_texts();
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("Error running command"));
    assert!(texts[0].contains("kapow"));
}

#[tokio::test]
async fn question_flow_with_validation_fallthrough() {
    let transport = Arc::new(MockTransport::new());
    let picked = Arc::new(Mutex::new(None::<AnswerVariant>));
    let unhandled = Arc::new(AtomicUsize::new(0));

    let picked_in = picked.clone();
    let unhandled_in = unhandled.clone();
    let bot = Bot::builder(test_config())
        .transport(transport.clone())
        .store(store_with_owner(1))
        .command("pick", "ask a question", CommandAccess::open(), |ctx, _event| async move {
            ctx.ask(
                Ask::new("Pick one")
                    .options(&["yes", "no"])
                    .on_reply(CallbackRef::named("picked")),
            )
            .await?;
            Ok(())
        })
        .reply_handler("picked", move |_ctx, answer| {
            let picked = picked_in.clone();
            async move {
                *picked.lock() = Some(answer.answer_variant());
                Ok(())
            }
        })
        .on_unhandled(move |_ctx, _message| {
            let unhandled = unhandled_in.clone();
            async move {
                unhandled.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .build()
        .unwrap();

    bot.process_update(message_update(1, private_message(7, 2, 10, "/pick")))
        .await;
    assert_eq!(transport.sent_texts(), vec!["Pick one"]);

    // Out-of-options text falls through past the open question
    bot.process_update(message_update(2, private_message(7, 2, 11, "maybe")))
        .await;
    assert!(picked.lock().is_none());
    assert_eq!(unhandled.load(Ordering::SeqCst), 1);

    // A listed option resolves the question
    bot.process_update(message_update(3, private_message(7, 2, 12, "yes")))
        .await;
    assert_eq!(*picked.lock(), Some(AnswerVariant::Index(1)));
    assert_eq!(unhandled.load(Ordering::SeqCst), 1);

    // Single-use question is gone afterwards
    bot.process_update(message_update(4, private_message(7, 2, 13, "no")))
        .await;
    assert_eq!(unhandled.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn multiple_question_collects_answers_without_closing() {
    let transport = Arc::new(MockTransport::new());
    let votes = Arc::new(Mutex::new(Vec::<AnswerVariant>::new()));
    let unhandled = Arc::new(AtomicUsize::new(0));

    let votes_in = votes.clone();
    let unhandled_in = unhandled.clone();
    let bot = Bot::builder(test_config())
        .transport(transport.clone())
        .store(store_with_owner(1))
        .command("vote", "start a vote", CommandAccess::open(), |ctx, _event| async move {
            ctx.ask(
                Ask::new("Cast your votes")
                    .options(&["yes", "no"])
                    .multiple()
                    .on_reply(CallbackRef::named("voted")),
            )
            .await?;
            Ok(())
        })
        .reply_handler("voted", move |_ctx, answer| {
            let votes = votes_in.clone();
            async move {
                votes.lock().push(answer.answer_variant());
                Ok(())
            }
        })
        .on_unhandled(move |_ctx, _message| {
            let unhandled = unhandled_in.clone();
            async move {
                unhandled.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .build()
        .unwrap();

    bot.process_update(message_update(1, private_message(7, 2, 10, "/vote")))
        .await;

    // Every listed option correlates, and the question survives each answer
    bot.process_update(message_update(2, private_message(7, 2, 11, "yes")))
        .await;
    bot.process_update(message_update(3, private_message(7, 2, 12, "no")))
        .await;
    bot.process_update(message_update(4, private_message(7, 2, 13, "yes")))
        .await;
    assert_eq!(
        *votes.lock(),
        vec![AnswerVariant::Index(1), AnswerVariant::Index(2), AnswerVariant::Index(1)]
    );
    assert_eq!(unhandled.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn inline_callback_routing_respects_owner() {
    let transport = Arc::new(MockTransport::new());
    let pressed = Arc::new(Mutex::new(Vec::<String>::new()));

    let pressed_in = pressed.clone();
    let bot = Bot::builder(test_config())
        .transport(transport.clone())
        .store(store_with_owner(1))
        .command("menu", "show a menu", CommandAccess::open(), |ctx, _event| async move {
            ctx.ask_inline(
                AskInline::new("Menu")
                    .row(&[("Alpha", "a"), ("Beta", "b")])
                    .on_press(CallbackRef::named("menu_press")),
            )
            .await?;
            Ok(())
        })
        .inline_handler("menu_press", move |_ctx, answer| {
            let pressed = pressed_in.clone();
            async move {
                pressed.lock().push(answer.data().to_string());
                Ok(())
            }
        })
        .build()
        .unwrap();

    bot.process_update(message_update(1, private_message(7, 2, 10, "/menu")))
        .await;
    let keyboard_message_id = transport.last_sent_message_id();

    // The asker presses a button
    bot.process_update(callback_update(2, 7, keyboard_message_id, 2, "a"))
        .await;
    assert_eq!(*pressed.lock(), vec!["a"]);
    assert_eq!(transport.answered_callbacks.lock().len(), 1);

    // Someone else's press is ignored
    bot.process_update(callback_update(3, 7, keyboard_message_id, 3, "b"))
        .await;
    assert_eq!(*pressed.lock(), vec!["a"]);
    assert_eq!(transport.answered_callbacks.lock().len(), 1);

    // A press on an unregistered message is a no-op
    bot.process_update(callback_update(4, 7, 12345, 2, "a")).await;
    assert_eq!(*pressed.lock(), vec!["a"]);

    // The keyboard is multi-shot
    bot.process_update(callback_update(5, 7, keyboard_message_id, 2, "b"))
        .await;
    assert_eq!(*pressed.lock(), vec!["a", "b"]);
}

#[tokio::test]
async fn handler_acknowledgment_replaces_fallback_ack() {
    let transport = Arc::new(MockTransport::new());
    let bot = Bot::builder(test_config())
        .transport(transport.clone())
        .store(store_with_owner(1))
        .command("confirm", "ask to confirm", CommandAccess::open(), |ctx, _event| async move {
            ctx.ask_inline(
                AskInline::new("Sure?")
                    .row(&[("Yes", "y")])
                    .on_press(CallbackRef::named("confirmed")),
            )
            .await?;
            Ok(())
        })
        .inline_handler("confirmed", |ctx, answer| async move {
            ctx.answer_callback(&answer.query.id, Some("Done"), true).await?;
            Ok(())
        })
        .build()
        .unwrap();

    bot.process_update(message_update(1, private_message(7, 2, 10, "/confirm")))
        .await;
    let keyboard_message_id = transport.last_sent_message_id();

    // The handler's own alert is the only acknowledgment sent
    bot.process_update(callback_update(2, 7, keyboard_message_id, 2, "y"))
        .await;
    assert_eq!(*transport.answered_callbacks.lock(), vec!["cb2"]);
}

#[tokio::test]
async fn pattern_matches_before_command_resolution() {
    let transport = Arc::new(MockTransport::new());
    let captured = Arc::new(Mutex::new(Vec::<String>::new()));

    let captured_in = captured.clone();
    let bot = Bot::builder(test_config())
        .transport(transport.clone())
        .store(store_with_owner(1))
        .pattern(
            r"^ticket (\d+)$",
            "ticket_lookup",
            CommandAccess::open(),
            move |_ctx, m| {
                let captured = captured_in.clone();
                async move {
                    if let Some(id) = m.capture(0) {
                        captured.lock().push(id.to_string());
                    }
                    Ok(())
                }
            },
        )
        .build()
        .unwrap();

    bot.process_update(message_update(1, private_message(7, 2, 10, "ticket 8841")))
        .await;
    assert_eq!(*captured.lock(), vec!["8841"]);

    bot.process_update(message_update(2, private_message(7, 2, 11, "ticket abc")))
        .await;
    assert_eq!(*captured.lock(), vec!["8841"]);
}

#[tokio::test]
async fn command_list_is_scoped_to_caller() {
    let transport = Arc::new(MockTransport::new());
    let bot = Bot::builder(test_config())
        .transport(transport.clone())
        .store(store_with_owner(1))
        .with_builtin_commands()
        .build()
        .unwrap();

    // A regular user sees only open commands
    bot.process_update(message_update(1, private_message(7, 5, 10, "/list")))
        .await;
    // The owner sees administration commands too, via the /start alias
    bot.process_update(message_update(2, private_message(8, 1, 11, "/start")))
        .await;

    let texts = transport.sent_texts();
    assert_eq!(texts.len(), 2);
    assert!(texts[0].contains("/list"));
    assert!(!texts[0].contains("/trust"));
    assert!(texts[1].contains("/trust"));
    // Hidden commands never show up
    assert!(!texts[1].contains("/allow_chat"));
}

#[tokio::test]
async fn polling_stops_after_error_budget() {
    let transport = Arc::new(MockTransport::new());
    transport.fail_fetches_with(TransportError::Fatal("boom".to_string()));
    let mut config = test_config();
    config.max_consecutive_errors = 3;
    let bot = Bot::builder(config)
        .transport(transport.clone())
        .store(store_with_owner(1))
        .build()
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), bot.run_polling())
        .await
        .expect("polling should stop on its own")
        .unwrap();
}

// The mock transport fails fetches without ever yielding, so the polling
// task would starve a single-threaded runtime; give the test body its own
// worker thread.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn conflict_tears_down_webhook() {
    let transport = Arc::new(MockTransport::new());
    transport.fail_fetches_with(TransportError::Conflict("409".to_string()));
    let bot = Bot::builder(test_config())
        .transport(transport.clone())
        .store(store_with_owner(1))
        .build()
        .unwrap();

    let runner = bot.clone();
    let handle = tokio::spawn(async move { runner.run_polling().await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    bot.stop();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("polling should stop")
        .unwrap()
        .unwrap();

    assert!(*transport.webhook_deleted.lock());
}
