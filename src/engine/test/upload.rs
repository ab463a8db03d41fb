use std::sync::mpsc;
use std::thread;

use super::scenario::{blocking_engine, drain, Call, Scenario, WAIT};
use crate::backend::scripted::{ScriptedResponse, ScriptedTransport};
use crate::body::{self, StreamingBody};
use crate::engine::Capabilities;
use crate::event::{FailureKind, LifecycleEvent};
use crate::request::RequestSpec;
use crate::{Config, Error};

fn write_sync(body: &StreamingBody, chunk: &[u8]) -> Result<(), Error> {
    let (tx, rx) = mpsc::channel();
    body.write(chunk.to_vec(), move |r: Result<(), Error>| {
        tx.send(r).ok();
    })?;
    rx.recv_timeout(WAIT).unwrap()
}

fn capability_failure(events: &[LifecycleEvent]) -> bool {
    matches!(
        events,
        [LifecycleEvent::Failed(f)] if f.kind == FailureKind::CapabilityUnavailable
    )
}

#[test]
fn stream_without_capability_fails_before_open() {
    let scenario = Scenario::builder()
        .capabilities(Capabilities {
            streaming_upload: false,
            per_request_callbacks: true,
        })
        .build();

    let (body, source) = body::channel(1024).unwrap();
    let spec = RequestSpec::post("https://f.test/upload")
        .stream(source)
        .build()
        .unwrap();
    let (handle, mut rx) = scenario.start(spec);

    // Queued before start() returned.
    let events: Vec<_> = rx.try_recv().into_iter().collect();
    assert!(capability_failure(&events));
    assert_eq!(rx.recv(), None);

    assert_eq!(scenario.opened(), 0);
    assert!(scenario.calls().is_empty());
    assert!(!handle.is_active());
    assert_eq!(scenario.engine.in_flight(), 0);

    // The source went away with the request.
    assert!(body.is_canceled());
}

#[test]
fn fixed_body_without_streaming_capability() {
    let scenario = Scenario::builder()
        .capabilities(Capabilities {
            streaming_upload: false,
            per_request_callbacks: true,
        })
        .build();

    let spec = RequestSpec::post("https://f.test/upload")
        .body("hello")
        .build()
        .unwrap();
    let (_handle, mut rx) = scenario.start(spec);

    assert_eq!(rx.try_recv(), None);
    assert_eq!(scenario.opened(), 1);
    assert_eq!(scenario.calls(), [Call::Start]);
    assert_eq!(scenario.opened_headers().get("content-length").unwrap(), "5");
}

#[test]
fn no_per_request_callbacks() {
    let scenario = Scenario::builder()
        .capabilities(Capabilities {
            streaming_upload: true,
            per_request_callbacks: false,
        })
        .build();

    let spec = RequestSpec::get("https://f.test/").build().unwrap();
    let (_handle, mut rx) = scenario.start(spec);

    let events: Vec<_> = rx.by_ref().collect();
    assert!(capability_failure(&events));
    assert_eq!(scenario.opened(), 0);
}

#[test]
fn declared_stream_length_is_sent() {
    let scenario = Scenario::builder().build();

    let (_body, source) = body::channel(1024).unwrap();
    let spec = RequestSpec::post("https://f.test/upload")
        .stream(source.with_content_length(10_240))
        .build()
        .unwrap();
    let (_handle, mut rx) = scenario.start(spec);
    assert_eq!(rx.try_recv(), None);

    let headers = scenario.opened_headers();
    assert_eq!(headers.get("content-length").unwrap(), "10240");
}

#[test]
fn declared_stream_content_type_is_sent() {
    let scenario = Scenario::builder()
        .config(Config::new().with_buffer_capacity(2048))
        .build();

    let (body, source) = scenario.engine.body_channel().unwrap();
    assert_eq!(body.capacity(), 2048);

    let spec = RequestSpec::post("https://f.test/upload")
        .stream(source.with_content_type("application/x-ndjson"))
        .build()
        .unwrap();
    let (_handle, mut rx) = scenario.start(spec);
    assert_eq!(rx.try_recv(), None);

    let headers = scenario.opened_headers();
    assert_eq!(headers.get("content-type").unwrap(), "application/x-ndjson");
    assert!(!headers.contains("content-length"));
}

#[test]
fn cancel_aborts_upload() {
    let scenario = Scenario::builder().build();

    let (body, source) = body::channel(1024).unwrap();
    let spec = RequestSpec::post("https://f.test/upload")
        .stream(source)
        .build()
        .unwrap();
    let (handle, mut rx) = scenario.start(spec);
    assert_eq!(rx.try_recv(), None);

    assert!(!body.is_canceled());
    handle.cancel();

    assert!(body.is_canceled());
    assert!(matches!(
        write_sync(&body, b"too late"),
        Err(Error::BodyAborted)
    ));
    assert_eq!(scenario.last_call(), Some(Call::Cancel));
}

#[test]
fn upload_ten_times_capacity() {
    let capacity = 1024;
    let payload: Vec<u8> = (0..capacity * 10).map(|i| (i % 251) as u8).collect();

    let transport = ScriptedTransport::new()
        .route("https://f.test/upload", ScriptedResponse::status(201));
    let engine = blocking_engine(&transport, Config::new());

    let (body, source) = body::channel(capacity).unwrap();
    let spec = RequestSpec::post("https://f.test/upload")
        .stream(source)
        .build()
        .unwrap();
    let (_handle, mut rx) = engine.start(spec);

    let chunks = payload.clone();
    let producer = thread::spawn(move || {
        for chunk in chunks.chunks(700) {
            write_sync(&body, chunk).unwrap();
        }
        body.finish();
        body.is_finished()
    });

    let events = drain(&mut rx);
    assert!(producer.join().unwrap());

    assert!(matches!(
        &events[0],
        LifecycleEvent::ResponseStarted(r) if r.status == 201
    ));
    assert_eq!(events.last(), Some(&LifecycleEvent::Succeeded));

    let received = transport.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].method, "POST");
    assert_eq!(received[0].body, payload);
}

#[test]
fn upload_body_not_replayed_on_303() {
    let transport = ScriptedTransport::new()
        .route("https://f.test/form", ScriptedResponse::redirect(303, "/done"))
        .route("https://f.test/done", ScriptedResponse::ok().body("thanks"));
    let engine = blocking_engine(&transport, Config::new());

    let spec = RequestSpec::post("https://f.test/form")
        .body("a=1")
        .build()
        .unwrap();
    let (_handle, mut rx) = engine.start(spec);
    let events = drain(&mut rx);
    assert_eq!(events.last(), Some(&LifecycleEvent::Succeeded));

    let received = transport.received();
    assert_eq!(received[0].body, b"a=1");
    assert_eq!(received[1].method, "GET");
    assert!(received[1].body.is_empty());
    assert!(!received[1].headers.contains("content-length"));
}
