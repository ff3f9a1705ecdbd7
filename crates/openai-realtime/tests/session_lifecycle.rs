mod support;

use guesswho_core::{
    Command,
    card::RoundCard,
    energy::EnergyConfig,
    game::{END_GAME, GuessGame, INCREASE_GUESS_COUNT, MAX_GUESSES},
};
use openai_realtime::{
    ConnectionManager, ConnectionState, Diagnostic, EnergySampler, RoundContext,
    connection::START_ABANDONED,
    transport::{AudioFrame, ChannelEvent, ControlChannel},
};
use serde_json::{Value, json};
use std::sync::atomic::Ordering;
use std::time::Duration;
use support::{ANSWER_SDP, Harness, wait_until};
use tokio::sync::mpsc;

fn round() -> (RoundCard, RoundContext) {
    let card = RoundCard::new("Owl", "flying a kite");
    let context = RoundContext::from(&card);
    (card, context)
}

fn function_call(name: &str, call_id: &str, arguments: Value) -> ChannelEvent {
    ChannelEvent::Message(
        json!({
            "type": "response.function_call_arguments.done",
            "call_id": call_id,
            "name": name,
            "arguments": arguments.to_string(),
        })
        .to_string(),
    )
}

fn output_of(event: &Value) -> Value {
    serde_json::from_str(event["item"]["output"].as_str().unwrap()).unwrap()
}

#[tokio::test]
async fn test_open_announces_tools_once() {
    let harness = Harness::default();
    let mut manager = ConnectionManager::new(harness.collaborators());
    let (card, context) = round();
    let game = GuessGame::new(card, None);

    manager.start(&context, game.tools().unwrap()).await.unwrap();
    assert_eq!(manager.state(), ConnectionState::Connecting);
    assert!(!manager.is_connected());

    let transport = harness.factory.last();
    let channel = transport.channel();
    assert_eq!(channel.label(), "oai-events");
    assert_eq!(transport.tracks(), vec!["mic-0"]);
    assert_eq!(transport.answer().as_deref(), Some(ANSWER_SDP));
    assert_eq!(
        harness.tokens.requests.lock().unwrap().clone(),
        vec!["Owl flying a kite"]
    );
    // Nothing goes out before the channel opens.
    assert!(channel.sent().is_empty());

    transport.emit(ChannelEvent::Open).await;
    transport.emit(ChannelEvent::Open).await;
    let mut status = manager.subscribe_status();
    status
        .wait_for(|s| s.is_connected())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(channel.sent_types(), vec!["session.update", "response.create"]);
    let update = &channel.sent()[0];
    let tools = update["session"]["tools"].as_array().unwrap();
    let names: Vec<_> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec![INCREASE_GUESS_COUNT, END_GAME]);
    assert!(tools[0].get("parameters").is_none());
    assert_eq!(tools[1]["parameters"]["properties"]["success"]["type"], "boolean");

    manager.stop().await;
}

#[tokio::test]
async fn test_full_round_ends_with_teardown() {
    let harness = Harness::default();
    let mut manager = ConnectionManager::new(harness.collaborators());
    let (card, context) = round();
    let (command_tx, mut command_rx) = mpsc::channel(16);
    let game = GuessGame::new(card, Some(command_tx));

    manager.start(&context, game.tools().unwrap()).await.unwrap();
    let transport = harness.factory.last();
    let channel = transport.channel();
    transport.emit(ChannelEvent::Open).await;

    for i in 1..=MAX_GUESSES {
        transport
            .emit(function_call(INCREASE_GUESS_COUNT, &format!("call_{i}"), json!({})))
            .await;
    }
    wait_until(|| channel.sent().len() == 2 + 2 * MAX_GUESSES as usize).await;

    let sent = channel.sent();
    for i in 1..=MAX_GUESSES {
        let item = &sent[2 * i as usize];
        assert_eq!(item["type"], "conversation.item.create");
        assert_eq!(item["item"]["call_id"], format!("call_{i}"));
        let output = output_of(item);
        assert_eq!(output["guesses"], i);
        assert_eq!(output["remaining"], MAX_GUESSES - i);
        assert_eq!(sent[2 * i as usize + 1]["type"], "response.create");
    }

    transport
        .emit(function_call(END_GAME, "call_end", json!({ "success": true })))
        .await;
    wait_until(|| channel.sent().len() == 4 + 2 * MAX_GUESSES as usize).await;
    let sent = channel.sent();
    let end = &sent[sent.len() - 2];
    assert_eq!(end["item"]["call_id"], "call_end");
    assert_eq!(output_of(end), json!({ "success": true }));

    // The caller reacts to the game's commands by tearing the session down.
    let mut guesses = 0;
    loop {
        match command_rx.recv().await {
            Some(Command::GuessRecorded { .. }) => guesses += 1,
            Some(Command::EndRound { success }) => {
                assert!(success);
                manager.stop().await;
                break;
            }
            None => panic!("game dropped its command channel"),
        }
    }
    assert_eq!(guesses, MAX_GUESSES);

    assert_eq!(manager.state(), ConnectionState::Closed);
    assert!(!manager.is_connected());
    assert!(channel.is_closed());
    assert!(transport.is_closed());
    assert_eq!(harness.sink.detaches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stop_on_end_round_still_answers_the_call() {
    let harness = Harness::default();
    harness.factory.yield_on_send.store(true, Ordering::SeqCst);
    let mut manager = ConnectionManager::new(harness.collaborators());
    let (card, context) = round();
    let (command_tx, mut command_rx) = mpsc::channel(4);
    let game = GuessGame::new(card, Some(command_tx));

    manager.start(&context, game.tools().unwrap()).await.unwrap();
    let transport = harness.factory.last();
    let channel = transport.channel();
    transport.emit(ChannelEvent::Open).await;
    manager
        .subscribe_status()
        .wait_for(|s| s.is_connected())
        .await
        .unwrap();

    transport
        .emit(function_call(END_GAME, "call_end", json!({ "success": true })))
        .await;
    assert!(matches!(
        command_rx.recv().await,
        Some(Command::EndRound { success: true })
    ));
    // Stop as soon as the game asks for it, while the output may still be in flight.
    manager.stop().await;

    assert_eq!(
        channel.sent_types(),
        vec![
            "session.update",
            "response.create",
            "conversation.item.create",
            "response.create"
        ]
    );
    let sent = channel.sent();
    assert_eq!(sent[2]["item"]["call_id"], "call_end");
    assert_eq!(output_of(&sent[2]), json!({ "success": true }));
    assert!(channel.is_closed());
    assert!(transport.is_closed());
    assert_eq!(manager.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_abandoned_start_releases_transport() {
    let harness = Harness::default();
    harness.tokens.hang.store(true, Ordering::SeqCst);
    let mut manager = ConnectionManager::new(harness.collaborators());
    let (card, context) = round();
    let game = GuessGame::new(card, None);

    let attempt = tokio::time::timeout(
        Duration::from_millis(50),
        manager.start(&context, game.tools().unwrap()),
    )
    .await;
    assert!(attempt.is_err());
    assert_eq!(manager.state(), ConnectionState::Idle);
    assert_eq!(manager.last_error().as_deref(), Some(START_ABANDONED));

    let abandoned = harness.factory.last();
    wait_until(|| abandoned.is_closed() && abandoned.channel().is_closed()).await;

    manager.stop().await;
    assert_eq!(manager.state(), ConnectionState::Idle);

    harness.tokens.hang.store(false, Ordering::SeqCst);
    manager.start(&context, game.tools().unwrap()).await.unwrap();
    assert_eq!(harness.factory.created(), 2);
    assert_eq!(manager.state(), ConnectionState::Connecting);
    manager.stop().await;
}

#[tokio::test]
async fn test_failed_announcement_closes_session() {
    let harness = Harness::default();
    let mut manager = ConnectionManager::new(harness.collaborators());
    let (card, context) = round();
    let game = GuessGame::new(card, None);

    manager.start(&context, game.tools().unwrap()).await.unwrap();
    let transport = harness.factory.last();
    // Sends fail on a closed channel, so the announcement cannot go out.
    transport.channel().close().await;
    transport.emit(ChannelEvent::Open).await;

    manager
        .subscribe_status()
        .wait_for(|s| s.state == ConnectionState::Closed)
        .await
        .unwrap();
    assert!(!manager.is_connected());
    assert!(
        manager
            .last_error()
            .unwrap()
            .starts_with("Failed to announce tool set")
    );

    // The dead session does not block a fresh one.
    manager.start(&context, game.tools().unwrap()).await.unwrap();
    assert_eq!(harness.factory.created(), 2);
    assert!(transport.is_closed());
    assert_eq!(manager.state(), ConnectionState::Connecting);
    manager.stop().await;
}

#[tokio::test]
async fn test_unknown_tool_is_silent_to_the_model() {
    let harness = Harness::default();
    let mut manager = ConnectionManager::new(harness.collaborators());
    let mut diagnostics = manager.diagnostics();
    let (card, context) = round();
    let game = GuessGame::new(card, None);

    manager.start(&context, game.tools().unwrap()).await.unwrap();
    let transport = harness.factory.last();
    let channel = transport.channel();
    transport.emit(ChannelEvent::Open).await;
    transport
        .emit(function_call("revealAnswer", "call_x", json!({})))
        .await;

    let diagnostic = tokio::time::timeout(Duration::from_secs(1), diagnostics.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        diagnostic,
        Diagnostic::UnknownTool {
            name: "revealAnswer".into(),
            call_id: "call_x".into()
        }
    );
    assert_eq!(channel.sent_types(), vec!["session.update", "response.create"]);

    manager.stop().await;
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let harness = Harness::default();
    let mut manager = ConnectionManager::new(harness.collaborators());

    manager.stop().await;
    assert!(!manager.is_connected());

    let (card, context) = round();
    let game = GuessGame::new(card, None);
    manager.start(&context, game.tools().unwrap()).await.unwrap();
    harness.factory.last().emit(ChannelEvent::Open).await;
    manager
        .subscribe_status()
        .wait_for(|s| s.is_connected())
        .await
        .unwrap();

    manager.stop().await;
    assert!(!manager.is_connected());
    manager.stop().await;
    assert!(!manager.is_connected());
    assert_eq!(manager.state(), ConnectionState::Closed);
    assert_eq!(harness.sink.detaches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_start_while_active_is_a_noop() {
    let harness = Harness::default();
    let mut manager = ConnectionManager::new(harness.collaborators());
    let (card, context) = round();
    let game = GuessGame::new(card, None);

    manager.start(&context, game.tools().unwrap()).await.unwrap();
    manager.start(&context, game.tools().unwrap()).await.unwrap();
    assert_eq!(harness.factory.created(), 1);

    harness.factory.last().emit(ChannelEvent::Open).await;
    manager
        .subscribe_status()
        .wait_for(|s| s.is_connected())
        .await
        .unwrap();
    manager.start(&context, game.tools().unwrap()).await.unwrap();
    assert_eq!(harness.factory.created(), 1);
    assert_eq!(harness.negotiator.calls.load(Ordering::SeqCst), 1);

    manager.stop().await;
    manager.start(&context, game.tools().unwrap()).await.unwrap();
    assert_eq!(harness.factory.created(), 2);
    manager.stop().await;
}

#[tokio::test]
async fn test_failed_negotiation_returns_to_idle_and_can_retry() {
    let harness = Harness::default();
    harness.negotiator.fail.store(true, Ordering::SeqCst);
    let mut manager = ConnectionManager::new(harness.collaborators());
    let (card, context) = round();
    let game = GuessGame::new(card, None);

    assert!(manager.start(&context, game.tools().unwrap()).await.is_err());
    assert_eq!(manager.state(), ConnectionState::Idle);
    let error = manager.last_error().unwrap();
    assert!(error.starts_with("Failed to start voice session"));
    assert!(error.contains("503"));
    let failed = harness.factory.last();
    assert!(failed.is_closed());
    assert!(failed.channel().is_closed());

    harness.negotiator.fail.store(false, Ordering::SeqCst);
    manager.start(&context, game.tools().unwrap()).await.unwrap();
    assert_eq!(harness.factory.created(), 2);
    assert_eq!(manager.state(), ConnectionState::Connecting);
    assert!(manager.last_error().is_none());
    manager.stop().await;
}

#[tokio::test]
async fn test_denied_microphone_is_reported() {
    let harness = Harness::default();
    harness.media.deny.store(true, Ordering::SeqCst);
    let mut manager = ConnectionManager::new(harness.collaborators());
    let (card, context) = round();
    let game = GuessGame::new(card, None);

    assert!(manager.start(&context, game.tools().unwrap()).await.is_err());
    assert_eq!(manager.state(), ConnectionState::Idle);
    assert!(manager.last_error().unwrap().contains("Permission denied"));
    assert!(harness.factory.last().is_closed());
    assert_eq!(harness.negotiator.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_remote_audio_reaches_sink_and_sampler() {
    let harness = Harness::default();
    let mut manager = ConnectionManager::new(harness.collaborators());
    let sampler = EnergySampler::new(EnergyConfig::default().with_thresholds(0.0, 1.0))
        .with_tick(Duration::from_millis(5))
        .spawn(manager.subscribe_streams());
    let (card, context) = round();
    let game = GuessGame::new(card, None);

    manager.start(&context, game.tools().unwrap()).await.unwrap();
    let transport = harness.factory.last();
    let frames = transport.attach_remote_audio("remote-audio").await;

    let mut streams = manager.subscribe_streams();
    streams.wait_for(|s| s.is_some()).await.unwrap();
    assert_eq!(harness.sink.attached().as_deref(), Some("remote-audio"));

    let loud: Vec<f32> = (0..256)
        .map(|i| 0.9 * (2.0 * std::f32::consts::PI * 16.0 * i as f32 / 256.0).sin())
        .collect();
    let mut scale = sampler.subscribe();
    let feeder = tokio::spawn(async move {
        loop {
            let _ = frames.send(AudioFrame::new(loud.clone(), 24_000));
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    });
    tokio::time::timeout(Duration::from_secs(2), scale.wait_for(|s| *s > 1.0))
        .await
        .unwrap()
        .unwrap();

    manager.stop().await;
    assert!(manager.subscribe_streams().borrow().is_none());
    assert!(harness.sink.attached().is_none());
    tokio::time::timeout(Duration::from_secs(2), scale.wait_for(|s| *s == 1.0))
        .await
        .unwrap()
        .unwrap();
    feeder.abort();
}
