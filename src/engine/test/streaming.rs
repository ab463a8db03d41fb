use std::thread;
use std::time::Duration;

use http::StatusCode;

use super::scenario::{blocking_engine, body_of, drain, redirect, response, Call, Scenario, WAIT};
use crate::backend::scripted::{ScriptedResponse, ScriptedTransport};
use crate::event::{Failure, FailureKind, LifecycleEvent};
use crate::request::RequestSpec;
use crate::Config;

fn data(d: &[u8]) -> LifecycleEvent {
    LifecycleEvent::ReadCompleted { data: d.to_vec() }
}

fn is_started(e: &LifecycleEvent, status: u16) -> bool {
    matches!(e, LifecycleEvent::ResponseStarted(r) if r.status == status && !r.is_redirect)
}

#[test]
fn redirect_then_body() {
    let scenario = Scenario::builder()
        .config(Config::new().with_read_size(16))
        .build();
    let (_handle, mut rx) = scenario.started("https://f.test/old");
    let cb = scenario.callback();

    cb.on_redirect_received(redirect(301, "/new"));
    cb.on_response_started(response("https://f.test/new", 200));
    assert_eq!(scenario.last_call(), Some(Call::Read(16)));

    cb.on_read_completed(b"hel".to_vec());
    cb.on_read_completed(b"lo".to_vec());
    cb.on_succeeded();

    let events = drain(&mut rx);
    assert_eq!(events.len(), 4);
    assert!(is_started(&events[0], 200));
    assert_eq!(events[1..], [data(b"hel"), data(b"lo"), LifecycleEvent::Succeeded]);

    assert_eq!(scenario.count(&Call::Read(16)), 3);
    // Success comes from the native side, there is nothing to cancel.
    assert_eq!(scenario.count(&Call::Cancel), 0);
}

#[test]
fn empty_read_is_not_an_event() {
    let scenario = Scenario::builder().build();
    let (_handle, mut rx) = scenario.started("https://f.test/");
    let cb = scenario.callback();

    cb.on_response_started(response("https://f.test/", 200));
    cb.on_read_completed(Vec::new());
    cb.on_read_completed(b"x".to_vec());
    cb.on_succeeded();

    let events = drain(&mut rx);
    assert_eq!(events[1..], [data(b"x"), LifecycleEvent::Succeeded]);
    // The empty read still asked for the next one.
    assert_eq!(
        scenario.count(&Call::Read(Config::new().read_size())),
        3
    );
}

#[test]
fn reads_park_until_consumer_drains() {
    let scenario = Scenario::builder()
        .config(
            Config::new()
                .with_event_buffer_limit(10)
                .with_read_size(4),
        )
        .build();
    let (_handle, mut rx) = scenario.started("https://f.test/");
    let cb = scenario.callback();
    let reads = || scenario.count(&Call::Read(4));

    cb.on_response_started(response("https://f.test/", 200));
    assert_eq!(reads(), 1);

    cb.on_read_completed(vec![1; 4]);
    assert_eq!(reads(), 2);
    cb.on_read_completed(vec![2; 4]);
    assert_eq!(reads(), 3);

    // 12 bytes queued, over the limit.
    cb.on_read_completed(vec![3; 4]);
    assert_eq!(reads(), 3);
    assert_eq!(rx.queued_bytes(), 12);

    assert!(is_started(&rx.recv().unwrap(), 200));
    assert_eq!(reads(), 3);

    assert_eq!(rx.recv(), Some(data(&[1; 4])));
    assert_eq!(reads(), 4);
    assert_eq!(rx.queued_bytes(), 8);
}

#[test]
fn duplicate_response_start_ignored() {
    let scenario = Scenario::builder().build();
    let (_handle, mut rx) = scenario.started("https://f.test/");
    let cb = scenario.callback();

    cb.on_response_started(response("https://f.test/", 200));
    cb.on_response_started(response("https://f.test/", 500));
    cb.on_succeeded();

    let events = drain(&mut rx);
    assert_eq!(events.len(), 2);
    assert!(is_started(&events[0], 200));
}

#[test]
fn callbacks_after_terminal_ignored() {
    let scenario = Scenario::builder().build();
    let (handle, mut rx) = scenario.started("https://f.test/");
    let cb = scenario.callback();

    cb.on_response_started(response("https://f.test/", 200));
    cb.on_succeeded();
    let reads = scenario.count(&Call::Read(Config::new().read_size()));

    cb.on_read_completed(b"late".to_vec());
    cb.on_failed(Failure::transport("late"));
    cb.on_redirect_received(redirect(302, "/late"));

    let events = drain(&mut rx);
    assert_eq!(events.last(), Some(&LifecycleEvent::Succeeded));
    assert_eq!(rx.recv(), None);

    assert!(!handle.is_active());
    assert_eq!(scenario.count(&Call::Read(Config::new().read_size())), reads);
    assert_eq!(scenario.engine.in_flight(), 0);
}

#[test]
fn native_failure() {
    let scenario = Scenario::builder().build();
    let (_handle, mut rx) = scenario.started("https://f.test/");

    scenario
        .callback()
        .on_failed(Failure::transport("connection reset"));

    assert_eq!(
        rx.recv(),
        Some(LifecycleEvent::Failed(Failure::transport("connection reset")))
    );
    assert_eq!(rx.recv(), None);
    assert_eq!(scenario.calls(), [Call::Start]);
}

#[test]
fn native_cancel_is_failure() {
    let scenario = Scenario::builder().build();
    let (_handle, mut rx) = scenario.started("https://f.test/");

    scenario.callback().on_canceled();

    match rx.recv() {
        Some(LifecycleEvent::Failed(f)) => assert_eq!(f.kind, FailureKind::Canceled),
        e => panic!("unexpected {:?}", e),
    }
}

#[test]
fn redirect_after_headers_fails() {
    let scenario = Scenario::builder().build();
    let (_handle, mut rx) = scenario.started("https://f.test/");
    let cb = scenario.callback();

    cb.on_response_started(response("https://f.test/", 200));
    cb.on_redirect_received(redirect(301, "/x"));

    let events = drain(&mut rx);
    match events.last() {
        Some(LifecycleEvent::Failed(f)) => assert_eq!(f.kind, FailureKind::Protocol),
        e => panic!("unexpected {:?}", e),
    }
    assert_eq!(scenario.last_call(), Some(Call::Cancel));
}

#[test]
fn blocking_redirect_then_chunks() {
    let transport = ScriptedTransport::new()
        .route("https://f.test/old", ScriptedResponse::redirect(301, "/new"))
        .route(
            "https://f.test/new",
            ScriptedResponse::ok()
                .header("content-type", "text/plain")
                .chunks(["hel", "lo"]),
        );
    let engine = blocking_engine(&transport, Config::new());

    let spec = RequestSpec::get("https://f.test/old").build().unwrap();
    let (_handle, mut rx) = engine.start(spec);
    let events = drain(&mut rx);

    match &events[0] {
        LifecycleEvent::ResponseStarted(r) => {
            assert_eq!(r.status, StatusCode::OK);
            assert_eq!(r.status_text.as_deref(), Some("OK"));
            assert_eq!(r.headers.get("content-type").unwrap(), "text/plain");
            assert!(!r.is_redirect);
        }
        e => panic!("unexpected {:?}", e),
    }
    assert_eq!(events[1..], [data(b"hel"), data(b"lo"), LifecycleEvent::Succeeded]);

    let received = transport.received();
    assert_eq!(received.len(), 2);
    assert_eq!(received[1].uri, "https://f.test/new");
}

#[test]
fn blocking_body_sizes() {
    let capacity = 1024;

    for size in [0, 1, capacity, capacity * 10] {
        let body: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        let transport = ScriptedTransport::new().route(
            "https://f.test/data",
            ScriptedResponse::ok().body(&body),
        );
        let config = Config::new()
            .with_read_size(capacity)
            .with_pump_chunk_size(capacity);
        let engine = blocking_engine(&transport, config);

        let spec = RequestSpec::get("https://f.test/data").build().unwrap();
        let (_handle, mut rx) = engine.start(spec);
        let events = drain(&mut rx);

        assert!(is_started(&events[0], 200), "size {}", size);
        assert_eq!(events.last(), Some(&LifecycleEvent::Succeeded), "size {}", size);
        assert_eq!(body_of(&events), body, "size {}", size);

        for e in &events {
            if let LifecycleEvent::ReadCompleted { data } = e {
                assert!(!data.is_empty());
                assert!(data.len() <= capacity);
            }
        }
    }
}

#[test]
fn blocking_slow_consumer_bounds_queue() {
    let limit = 2048;
    let read_size = 512;
    let body: Vec<u8> = (0..64 * 1024).map(|i| (i % 13) as u8).collect();

    let transport = ScriptedTransport::new()
        .route("https://f.test/big", ScriptedResponse::ok().body(&body));
    let config = Config::new()
        .with_event_buffer_limit(limit)
        .with_read_size(read_size);
    let engine = blocking_engine(&transport, config);

    let spec = RequestSpec::get("https://f.test/big").build().unwrap();
    let (_handle, mut rx) = engine.start(spec);

    let mut received = Vec::new();
    loop {
        thread::sleep(Duration::from_millis(1));
        assert!(rx.queued_bytes() <= limit + read_size);

        match rx.recv_timeout(WAIT) {
            Some(LifecycleEvent::ReadCompleted { data }) => received.extend(data),
            Some(LifecycleEvent::ResponseStarted(_)) => {}
            Some(LifecycleEvent::Succeeded) => break,
            e => panic!("unexpected {:?}", e),
        }
    }

    assert_eq!(received, body);
}

#[test]
fn blocking_transport_failure() {
    let transport = ScriptedTransport::new()
        .route("https://f.test/", ScriptedResponse::failure("connection refused"));
    let engine = blocking_engine(&transport, Config::new());

    let spec = RequestSpec::get("https://f.test/").build().unwrap();
    let (_handle, mut rx) = engine.start(spec);
    let events = drain(&mut rx);

    assert_eq!(events.len(), 1);
    match &events[0] {
        LifecycleEvent::Failed(f) => {
            assert_eq!(f.kind, FailureKind::Transport);
            assert!(f.message.contains("connection refused"));
        }
        e => panic!("unexpected {:?}", e),
    }
}

#[test]
fn blocking_body_error_mid_stream() {
    let transport = ScriptedTransport::new().route(
        "https://f.test/",
        ScriptedResponse::ok().chunks(["abc"]).body_error("reset by peer"),
    );
    let engine = blocking_engine(&transport, Config::new());

    let spec = RequestSpec::get("https://f.test/").build().unwrap();
    let (_handle, mut rx) = engine.start(spec);
    let events = drain(&mut rx);

    assert_eq!(events.len(), 3);
    assert!(is_started(&events[0], 200));
    assert_eq!(events[1], data(b"abc"));
    assert!(matches!(
        &events[2],
        LifecycleEvent::Failed(f) if f.kind == FailureKind::Transport
    ));
}

#[test]
fn blocking_unrouted_uri() {
    let transport = ScriptedTransport::new();
    let engine = blocking_engine(&transport, Config::new());

    let spec = RequestSpec::get("https://f.test/nowhere").build().unwrap();
    let (_handle, mut rx) = engine.start(spec);

    assert!(matches!(
        drain(&mut rx).as_slice(),
        [LifecycleEvent::Failed(f)] if f.kind == FailureKind::Transport
    ));
}
