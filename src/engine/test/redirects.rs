use http::{Method, StatusCode};

use super::scenario::{blocking_engine, drain, redirect, response, Call, Scenario};
use crate::backend::scripted::{ScriptedResponse, ScriptedTransport};
use crate::event::{FailureKind, LifecycleEvent};
use crate::request::RequestSpec;
use crate::Config;

fn scenario(follow: bool, max: u32) -> Scenario {
    Scenario::builder()
        .config(
            Config::new()
                .with_follow_redirects(follow)
                .with_max_redirects(max),
        )
        .build()
}

#[test]
fn three_redirects_with_max_two() {
    let scenario = scenario(true, 2);
    let (handle, mut rx) = scenario.started("https://f.test/a");
    let cb = scenario.callback();

    cb.on_redirect_received(redirect(301, "https://f.test/b"));
    assert_eq!(
        scenario.last_call(),
        Some(Call::Follow(Method::GET, "https://f.test/b".parse().unwrap()))
    );

    cb.on_redirect_received(redirect(301, "https://f.test/c"));
    assert_eq!(
        scenario.last_call(),
        Some(Call::Follow(Method::GET, "https://f.test/c".parse().unwrap()))
    );

    cb.on_redirect_received(redirect(301, "https://f.test/d"));
    assert_eq!(scenario.last_call(), Some(Call::Cancel));
    // The refused third hop is not counted.
    assert_eq!(handle.redirect_count(), 2);
    assert_eq!(handle.final_uri().unwrap(), "https://f.test/c");

    // The native cancel confirmation is not a second terminal event.
    cb.on_canceled();

    assert_eq!(rx.recv(), Some(LifecycleEvent::TooManyRedirects));
    assert_eq!(rx.recv(), None);
    assert_eq!(scenario.engine.in_flight(), 0);
}

#[test]
fn exactly_max_redirects_are_followed() {
    let scenario = scenario(true, 2);
    let (_handle, mut rx) = scenario.started("https://f.test/a");
    let cb = scenario.callback();

    cb.on_redirect_received(redirect(302, "/b"));
    cb.on_redirect_received(redirect(302, "/c"));
    cb.on_response_started(response("https://f.test/c", 200));
    cb.on_read_completed(b"ok".to_vec());
    cb.on_succeeded();

    let events = drain(&mut rx);
    assert_eq!(events.len(), 3);
    assert!(matches!(
        &events[0],
        LifecycleEvent::ResponseStarted(r) if r.status == StatusCode::OK && !r.is_redirect
    ));
    assert_eq!(
        events[1],
        LifecycleEvent::ReadCompleted {
            data: b"ok".to_vec()
        }
    );
    assert_eq!(events[2], LifecycleEvent::Succeeded);
}

#[test]
fn max_zero_refuses_first_redirect() {
    let scenario = scenario(true, 0);
    let (_handle, mut rx) = scenario.started("https://f.test/a");

    scenario.callback().on_redirect_received(redirect(301, "/b"));

    assert_eq!(rx.recv(), Some(LifecycleEvent::TooManyRedirects));
    assert_eq!(scenario.calls(), [Call::Start, Call::Cancel]);
}

#[test]
fn not_following_surfaces_redirect() {
    let scenario = scenario(false, 5);
    let (_handle, mut rx) = scenario.started("https://f.test/a");

    scenario.callback().on_redirect_received(redirect(302, "/b"));

    match rx.recv() {
        Some(LifecycleEvent::ResponseStarted(r)) => {
            assert_eq!(r.status, StatusCode::FOUND);
            assert!(r.is_redirect);
            assert_eq!(r.uri, "https://f.test/a");
            assert_eq!(r.headers.get("location").unwrap(), "/b");
        }
        e => panic!("unexpected {:?}", e),
    }
    assert_eq!(rx.recv(), Some(LifecycleEvent::Succeeded));
    assert_eq!(rx.recv(), None);

    // The transport is canceled rather than following.
    assert_eq!(scenario.calls(), [Call::Start, Call::Cancel]);
}

#[test]
fn post_303_follows_as_get() {
    let scenario = scenario(true, 5);
    let spec = RequestSpec::post("https://f.test/form")
        .body("a=1")
        .build()
        .unwrap();
    let (_handle, mut rx) = scenario.start(spec);
    assert_eq!(rx.try_recv(), None);

    scenario.callback().on_redirect_received(redirect(303, "/done"));

    assert_eq!(
        scenario.last_call(),
        Some(Call::Follow(
            Method::GET,
            "https://f.test/done".parse().unwrap()
        ))
    );
}

#[test]
fn post_307_is_delivered_as_final() {
    let scenario = scenario(true, 5);
    let spec = RequestSpec::post("https://f.test/form")
        .body("a=1")
        .build()
        .unwrap();
    let (_handle, mut rx) = scenario.start(spec);
    assert_eq!(rx.try_recv(), None);

    let cb = scenario.callback();
    cb.on_redirect_received(redirect(307, "/elsewhere"));
    assert_eq!(scenario.last_call(), Some(Call::StopRedirect));

    cb.on_response_started(response("https://f.test/form", 307));
    cb.on_succeeded();

    let events = drain(&mut rx);
    assert!(matches!(
        &events[0],
        LifecycleEvent::ResponseStarted(r) if r.status == 307 && !r.is_redirect
    ));
    assert_eq!(events.last(), Some(&LifecycleEvent::Succeeded));
}

#[test]
fn missing_location_is_final() {
    let scenario = scenario(true, 5);
    let (_handle, _rx) = scenario.started("https://f.test/a");

    let mut info = redirect(301, "/b");
    info.location = None;
    scenario.callback().on_redirect_received(info);

    assert_eq!(scenario.last_call(), Some(Call::StopRedirect));
}

#[test]
fn missing_location_delivered_as_final_response() {
    let scenario = scenario(true, 5);
    let (handle, mut rx) = scenario.started("https://f.test/a");
    let cb = scenario.callback();

    let mut info = redirect(301, "/b");
    info.location = None;
    cb.on_redirect_received(info);
    cb.on_response_started(response("https://f.test/a", 301));
    cb.on_succeeded();

    let events = drain(&mut rx);
    assert_eq!(events.len(), 2);
    match &events[0] {
        LifecycleEvent::ResponseStarted(r) => {
            assert_eq!(r.status, StatusCode::MOVED_PERMANENTLY);
            assert!(!r.is_redirect);
            assert_eq!(r.uri, "https://f.test/a");
        }
        e => panic!("unexpected {:?}", e),
    }
    assert_eq!(events[1], LifecycleEvent::Succeeded);
    assert_eq!(handle.redirect_count(), 0);
}

#[test]
fn blocking_missing_location_is_final() {
    let transport = ScriptedTransport::new()
        .route("https://f.test/moved", ScriptedResponse::status(301).body("x"));
    let engine = blocking_engine(&transport, Config::new());

    let spec = RequestSpec::get("https://f.test/moved").build().unwrap();
    let (_handle, mut rx) = engine.start(spec);
    let events = drain(&mut rx);

    assert_eq!(events.len(), 3);
    assert!(matches!(
        &events[0],
        LifecycleEvent::ResponseStarted(r) if r.status == 301 && !r.is_redirect
    ));
    assert_eq!(
        events[1],
        LifecycleEvent::ReadCompleted {
            data: b"x".to_vec()
        }
    );
    assert_eq!(events[2], LifecycleEvent::Succeeded);
    assert_eq!(transport.received().len(), 1);
}

#[test]
fn two_hops_report_count_and_final_uri() {
    let scenario = scenario(true, 5);
    let (handle, mut rx) = scenario.started("https://f.test/a");
    let cb = scenario.callback();

    assert_eq!(handle.redirect_count(), 0);
    assert_eq!(handle.final_uri().unwrap(), "https://f.test/a");

    cb.on_redirect_received(redirect(302, "/b"));
    cb.on_redirect_received(redirect(302, "/c"));
    cb.on_response_started(response("https://f.test/c", 200));
    cb.on_succeeded();

    let events = drain(&mut rx);
    assert!(matches!(
        &events[0],
        LifecycleEvent::ResponseStarted(r) if r.uri == "https://f.test/c"
    ));
    assert_eq!(events.last(), Some(&LifecycleEvent::Succeeded));

    // Still readable once the request is done.
    assert!(!handle.is_active());
    assert_eq!(handle.redirect_count(), 2);
    assert_eq!(handle.final_uri().unwrap(), "https://f.test/c");
}

#[test]
fn blocking_two_hops_report_count_and_final_uri() {
    let transport = ScriptedTransport::new()
        .route("https://f.test/a", ScriptedResponse::redirect(301, "/b"))
        .route("https://f.test/b", ScriptedResponse::redirect(302, "/c"))
        .route("https://f.test/c", ScriptedResponse::ok().body("end"));
    let engine = blocking_engine(&transport, Config::new());

    let spec = RequestSpec::get("https://f.test/a").build().unwrap();
    let (handle, mut rx) = engine.start(spec);
    let events = drain(&mut rx);

    match &events[0] {
        LifecycleEvent::ResponseStarted(r) => {
            assert_eq!(r.status, StatusCode::OK);
            assert_eq!(r.uri, "https://f.test/c");
        }
        e => panic!("unexpected {:?}", e),
    }
    assert_eq!(events.last(), Some(&LifecycleEvent::Succeeded));

    drop(engine);
    assert_eq!(handle.redirect_count(), 2);
    assert_eq!(handle.final_uri().unwrap(), "https://f.test/c");
}

#[test]
fn malformed_location_fails() {
    let scenario = scenario(true, 5);
    let (_handle, mut rx) = scenario.started("https://f.test/a");

    scenario
        .callback()
        .on_redirect_received(redirect(301, "/with space"));

    match rx.recv() {
        Some(LifecycleEvent::Failed(f)) => assert_eq!(f.kind, FailureKind::Protocol),
        e => panic!("unexpected {:?}", e),
    }
    assert_eq!(scenario.last_call(), Some(Call::Cancel));
}

#[test]
fn relative_location_resolves_against_current_hop() {
    let scenario = scenario(true, 5);
    let (_handle, _rx) = scenario.started("https://f.test/a/b");
    let cb = scenario.callback();

    cb.on_redirect_received(redirect(301, "c/d"));
    cb.on_redirect_received(redirect(301, "../e"));

    assert_eq!(
        scenario.calls(),
        [
            Call::Start,
            Call::Follow(Method::GET, "https://f.test/a/c/d".parse().unwrap()),
            Call::Follow(Method::GET, "https://f.test/a/e".parse().unwrap()),
        ]
    );
}

#[test]
fn authorization_not_forwarded_by_default() {
    let transport = ScriptedTransport::new()
        .route("https://f.test/a", ScriptedResponse::redirect(302, "/b"))
        .route("https://f.test/b", ScriptedResponse::ok().body("done"));
    let engine = blocking_engine(&transport, Config::new());

    let spec = RequestSpec::get("https://f.test/a")
        .header("authorization", "Bearer secret")
        .header("x-trace", "1")
        .build()
        .unwrap();
    let (_handle, mut rx) = engine.start(spec);
    let events = drain(&mut rx);
    assert_eq!(events.last(), Some(&LifecycleEvent::Succeeded));

    let received = transport.received();
    assert_eq!(received.len(), 2);
    assert!(received[0].headers.contains("authorization"));
    assert!(!received[1].headers.contains("authorization"));
    assert!(received[1].headers.contains("x-trace"));
}

#[test]
fn redirect_loop_end_to_end() {
    let transport = ScriptedTransport::new()
        .route("https://f.test/loop", ScriptedResponse::redirect(301, "/loop"));
    let config = Config::new().with_max_redirects(2);
    let engine = blocking_engine(&transport, config.clone());

    let spec = RequestSpec::get("https://f.test/loop")
        .config(&config)
        .build()
        .unwrap();
    let (_handle, mut rx) = engine.start(spec);

    assert_eq!(drain(&mut rx), [LifecycleEvent::TooManyRedirects]);
    // Initial request plus two followed hops.
    assert_eq!(transport.received().len(), 3);
}
