#![no_main]

use std::time::Duration;

use http_bridge::backend::scripted::{ScriptedResponse, ScriptedTransport};
use http_bridge::backend::BlockingClient;
use http_bridge::engine::Engine;
use http_bridge::event::{Event, LifecycleEvent};
use http_bridge::request::RequestSpec;
use http_bridge::Config;
use libfuzzer_sys::fuzz_target;

// Statuses a hop can answer with
const STATUS_CODES: &[u16] = &[
    200, 204, // Success
    301, 302, 303, 304, 307, 308, // Redirects
    404, 500, // Errors
];

// Where a redirect points, relative to /hop/<n>
const LOCATIONS: &[&str] = &["next", "/hop/next", "../hop/next", "", "bad location"];

const HOPS: usize = 8;

fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }

    let follow = data[0] % 4 != 0;
    let max = (data[1] % 6) as u32;
    let read_size = (data[2] as usize % 16) + 1;
    let limit = (data[3] as usize % 32) + 1;
    let mut data = &data[4..];

    let mut transport = ScriptedTransport::new();

    // Each hop n answers either with a redirect to hop n + 1, or with a body.
    for n in 0..HOPS {
        let Some((&b, rest)) = data.split_first() else {
            break;
        };
        data = rest;

        let status = STATUS_CODES[b as usize % STATUS_CODES.len()];
        let location = LOCATIONS[(b as usize / STATUS_CODES.len()) % LOCATIONS.len()];
        let location = location.replace("next", &(n + 1).to_string());

        let mut response = ScriptedResponse::status(status);
        if (300..400).contains(&status) && !location.is_empty() {
            response = response.header("location", &location);
        }

        // Body chunks from the remaining input.
        let take = data.len().min(b as usize % 24);
        let (body, rest) = data.split_at(take);
        data = rest;
        response = response.chunks(body.chunks(3));

        if b % 17 == 0 {
            response = response.body_error("reset");
        }

        transport = transport.route(&format!("https://f.test/hop/{}", n), response);
    }

    let config = Config::new()
        .with_follow_redirects(follow)
        .with_max_redirects(max)
        .with_read_size(read_size)
        .with_event_buffer_limit(limit);

    let engine = Engine::new(BlockingClient::with_config(transport, &config), config.clone());

    let spec = match RequestSpec::get("https://f.test/hop/0").config(&config).build() {
        Ok(v) => v,
        Err(_) => return,
    };

    let (_handle, mut events) = engine.start(spec);

    let mut terminal = 0;
    let mut started = 0;
    while let Some(event) = events.recv_timeout(Duration::from_secs(10)) {
        if let LifecycleEvent::ResponseStarted(_) = event {
            started += 1;
        }
        if event.is_terminal() {
            terminal += 1;
        }
    }

    assert!(events.is_finished(), "timed out waiting for events");
    assert_eq!(terminal, 1);
    assert!(started <= 1);
});
