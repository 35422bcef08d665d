mod common;

use std::{sync::mpsc, thread, time::Duration};

use backend_link::{BackendConfig, ConnectionState, StreamSubscription, SubscriptionOptions};
use ops_core::{ConsoleEvent, EntityReconciler, Topic, WindowLimits};

use common::{read_request, send_event, send_retry, serve, start_event_stream, wait_until};

fn no_reconnect() -> SubscriptionOptions {
    SubscriptionOptions { reconnect: None }
}

#[test]
fn malformed_message_does_not_block_later_ones() {
    let base = serve(1, |mut stream| {
        let request = read_request(&mut stream);
        assert_eq!(request.path, "/realtime/detections");
        start_event_stream(&mut stream);
        send_event(
            &mut stream,
            r#"{"stream_id":"drone-1","cls":"fire","conf":0.9,"bbox":[0.1,0.1,0.2,0.2],"ts":"2024-05-01T10:00:00Z"}"#,
        );
        send_event(&mut stream, "{not json");
        send_event(
            &mut stream,
            r#"{"stream_id":"drone-1","cls":"smoke","conf":0.5,"ts":"2024-05-01T10:00:01Z"}"#,
        );
    });

    let mut subscription =
        StreamSubscription::open(&BackendConfig::new(base), Topic::Detections, no_reconnect())
            .unwrap();
    let mut reconciler = EntityReconciler::new(WindowLimits::default());

    assert!(wait_until(|| {
        subscription.on_event(|event| {
            reconciler.apply(event);
        });
        reconciler.detections().len() == 2
    }));
    let classes: Vec<_> = reconciler
        .detections()
        .iter()
        .map(|d| d.cls.as_str())
        .collect();
    assert_eq!(classes, ["smoke", "fire"]);
    assert_eq!(subscription.delivered(), 2);
}

#[test]
fn status_topic_feeds_mission_lifecycle() {
    let base = serve(1, |mut stream| {
        read_request(&mut stream);
        start_event_stream(&mut stream);
        send_event(
            &mut stream,
            r#"{"type":"mission_enqueued","waypoint":{"id":"m1","lat":45.0,"lon":16.0,"alt":30.0}}"#,
        );
        send_event(&mut stream, r#"{"type":"mission_dispatched","id":"m1"}"#);
        send_event(&mut stream, r#"{"type":"mission_ended","id":"m1","reason":"completed"}"#);
        send_event(&mut stream, r#"{"type":"mission_dispatched","id":"m1"}"#);
    });

    let mut subscription =
        StreamSubscription::open(&BackendConfig::new(base), Topic::Status, no_reconnect())
            .unwrap();
    let mut kinds = Vec::new();
    let mut reconciler = EntityReconciler::new(WindowLimits::default());
    assert!(wait_until(|| {
        subscription.on_event(|event| {
            kinds.push(event.kind());
            reconciler.apply(event);
        });
        kinds.len() == 4
    }));

    let mission = reconciler.mission("m1").unwrap();
    assert_eq!(mission.status.as_str(), "completed");
}

#[test]
fn close_stops_all_further_delivery() {
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let base = serve(1, move |mut stream| {
        read_request(&mut stream);
        start_event_stream(&mut stream);
        send_event(&mut stream, "[INFO] first @ 2024-05-01T10:00:00");
        let _ = release_rx.recv_timeout(Duration::from_secs(5));
        send_event(&mut stream, "[INFO] second @ 2024-05-01T10:00:01");
        thread::sleep(Duration::from_millis(200));
    });

    let mut subscription =
        StreamSubscription::open(&BackendConfig::new(base), Topic::Logs, no_reconnect()).unwrap();
    let mut seen: Vec<ConsoleEvent> = Vec::new();
    assert!(wait_until(|| {
        subscription.on_event(|event| seen.push(event));
        !seen.is_empty()
    }));
    assert_eq!(subscription.state(), ConnectionState::Open);

    subscription.close();
    release_tx.send(()).unwrap();
    thread::sleep(Duration::from_millis(300));

    assert_eq!(subscription.on_event(|event| seen.push(event)), 0);
    assert_eq!(seen.len(), 1);
    assert!(subscription.is_closed());
    assert_eq!(subscription.state(), ConnectionState::Disconnected);
}

#[test]
fn ended_stream_reports_disconnected_without_reconnect() {
    let base = serve(1, |mut stream| {
        read_request(&mut stream);
        start_event_stream(&mut stream);
    });

    let mut subscription =
        StreamSubscription::open(&BackendConfig::new(base), Topic::Events, no_reconnect())
            .unwrap();
    assert!(wait_until(|| {
        subscription.on_event(|_| {});
        subscription.state() == ConnectionState::Disconnected
    }));
}

#[test]
fn reconnects_after_the_stream_drops() {
    let base = serve(2, |mut stream| {
        read_request(&mut stream);
        start_event_stream(&mut stream);
        send_retry(&mut stream, 20);
        send_event(
            &mut stream,
            r#"{"type":"audio_event","id":7,"ts":"2024-05-01T10:00:00Z","sensor_id":"s1","prob_help":0.8,"lat":45.1,"lon":16.2}"#,
        );
    });

    let mut subscription = StreamSubscription::open(
        &BackendConfig::new(base),
        Topic::Events,
        SubscriptionOptions {
            reconnect: Some(Duration::from_secs(30)),
        },
    )
    .unwrap();
    let mut reconciler = EntityReconciler::new(WindowLimits::default());
    assert!(wait_until(|| {
        subscription.on_event(|event| {
            reconciler.apply(event);
        });
        reconciler.audio_events().len() == 2
    }));
    assert_eq!(reconciler.map_events().len(), 2);
}
