use std::fmt;
use std::sync::{Arc, Weak};

use http::Uri;
use parking_lot::Mutex;

use super::native::{NativeRequest, RedirectInfo, RequestCallback, ResponseInfo};
use crate::body::UploadAbort;
use crate::event::{EventSink, Failure, FailureKind, LifecycleEvent, ResponseStarted};
use crate::redirect::{resolve_location, RedirectAuthHeaders, RedirectDecision};
use crate::redirect::{RedirectPolicy, RedirectState, RedirectTarget};
use crate::registry::{Handle, Registry};
use crate::Config;

/// Where an exchange is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Idle,
    Started,
    Redirecting,
    HeadersReceived,
    Streaming,
    Succeeded,
    Failed,
    TooManyRedirects,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Phase::Succeeded | Phase::Failed | Phase::TooManyRedirects
        )
    }
}

/// One request from start to its single terminal event.
///
/// All state changes happen under `inner`. Events are sent to the sink under
/// the same lock so they keep their order. Calls into the native request are
/// made only after the lock is released, see [`Action`].
pub(crate) struct Exchange {
    handle: Handle,
    me: Weak<Exchange>,
    sink: Arc<dyn EventSink<LifecycleEvent>>,
    registry: Weak<Registry<Exchange>>,
    read_size: usize,
    auth: RedirectAuthHeaders,
    progress: Arc<Mutex<Progress>>,
    inner: Mutex<Inner>,
}

/// Hops followed and the uri of the latest one. Shared with the request
/// handle, so it stays readable after the exchange is gone.
#[derive(Debug, Clone)]
pub(crate) struct Progress {
    pub redirects: u32,
    pub uri: Uri,
}

struct Inner {
    phase: Phase,
    policy: RedirectPolicy,
    redirects: RedirectState,
    current: RedirectTarget,
    native: Option<Arc<dyn NativeRequest>>,
    upload: Option<UploadAbort>,
    read_pending: bool,
}

/// Work decided under the lock, carried out after it is released.
enum Action {
    Nothing,
    Start(Arc<dyn NativeRequest>),
    Follow(Arc<dyn NativeRequest>, RedirectTarget),
    StopRedirect(Arc<dyn NativeRequest>),
    Read(Arc<dyn NativeRequest>, usize),
    WantRead,
    Release(Released),
}

struct Released {
    native: Option<Arc<dyn NativeRequest>>,
    upload: Option<UploadAbort>,
    cancel_native: bool,
}

impl Exchange {
    pub fn new(
        handle: Handle,
        sink: Arc<dyn EventSink<LifecycleEvent>>,
        registry: Weak<Registry<Exchange>>,
        config: &Config,
        policy: RedirectPolicy,
        current: RedirectTarget,
        upload: Option<UploadAbort>,
    ) -> Arc<Exchange> {
        Arc::new_cyclic(|me| Exchange {
            handle,
            me: me.clone(),
            sink,
            registry,
            read_size: config.read_size(),
            auth: config.redirect_auth_headers(),
            progress: Arc::new(Mutex::new(Progress {
                redirects: 0,
                uri: current.uri.clone(),
            })),
            inner: Mutex::new(Inner {
                phase: Phase::Idle,
                policy,
                redirects: RedirectState::default(),
                current,
                native: None,
                upload,
                read_pending: false,
            }),
        })
    }

    pub fn phase(&self) -> Phase {
        self.inner.lock().phase
    }

    pub fn progress(&self) -> Arc<Mutex<Progress>> {
        self.progress.clone()
    }

    pub fn attach(&self, native: Arc<dyn NativeRequest>) {
        self.inner.lock().native = Some(native);
    }

    /// Issue the native start. Does nothing unless idle.
    pub fn start(&self) {
        let action = {
            let mut inner = self.inner.lock();
            if inner.phase != Phase::Idle {
                debug!("{} start ignored in {:?}", self.handle, inner.phase);
                return;
            }
            self.transition(&mut inner, Phase::Started);
            match inner.native.clone() {
                Some(n) => Action::Start(n),
                None => Action::Nothing,
            }
        };
        self.run(action);
    }

    /// Cancel on behalf of the host. Emits `Failed(Canceled)` unless a
    /// terminal event was already sent.
    pub fn cancel(&self) {
        let action = {
            let mut inner = self.inner.lock();
            if inner.phase.is_terminal() {
                debug!("{} cancel ignored in {:?}", self.handle, inner.phase);
                return;
            }
            let event = LifecycleEvent::Failed(Failure::canceled("request canceled"));
            self.finish(&mut inner, Phase::Failed, Some(event), true)
        };
        self.run(action);
    }

    /// The event consumer disappeared. Cancel without emitting anything.
    pub fn consumer_gone(&self) {
        let action = {
            let mut inner = self.inner.lock();
            if inner.phase.is_terminal() {
                return;
            }
            debug!("{} consumer gone", self.handle);
            self.finish(&mut inner, Phase::Failed, None, true)
        };
        self.run(action);
    }

    fn issue_read(&self) {
        let action = {
            let mut inner = self.inner.lock();

            let readable = matches!(inner.phase, Phase::HeadersReceived | Phase::Streaming);
            if !readable || inner.read_pending {
                return;
            }

            inner.read_pending = true;
            if inner.phase == Phase::HeadersReceived {
                self.transition(&mut inner, Phase::Streaming);
            }

            match inner.native.clone() {
                Some(n) => Action::Read(n, self.read_size),
                None => Action::Nothing,
            }
        };
        self.run(action);
    }

    fn transition(&self, inner: &mut Inner, to: Phase) {
        if inner.phase != to {
            debug!("{} {:?} -> {:?}", self.handle, inner.phase, to);
        }
        inner.phase = to;
    }

    /// Send a non-terminal event. `false` if the consumer is gone.
    fn emit(&self, event: LifecycleEvent) -> bool {
        match self.sink.send(event) {
            Ok(()) => true,
            Err(e) => {
                debug!("{} {}", self.handle, e);
                false
            }
        }
    }

    fn finish(
        &self,
        inner: &mut Inner,
        phase: Phase,
        event: Option<LifecycleEvent>,
        cancel_native: bool,
    ) -> Action {
        if let Some(event) = event {
            if self.sink.send(event).is_err() {
                debug!("{} terminal event not delivered, consumer gone", self.handle);
            }
        }

        self.transition(inner, phase);

        Action::Release(Released {
            native: inner.native.take(),
            upload: inner.upload.take(),
            cancel_native,
        })
    }

    fn run(&self, action: Action) {
        match action {
            Action::Nothing => {}
            Action::Start(native) => native.start(),
            Action::Follow(native, target) => native.follow_redirect(&target),
            Action::StopRedirect(native) => native.stop_redirect(),
            Action::Read(native, max) => native.read(max),
            Action::WantRead => {
                let me = self.me.clone();
                self.sink.request_capacity(Box::new(move || {
                    if let Some(exchange) = me.upgrade() {
                        exchange.issue_read();
                    }
                }));
            }
            Action::Release(released) => {
                if let Some(upload) = released.upload {
                    upload.abort();
                }
                if released.cancel_native {
                    if let Some(native) = released.native {
                        native.cancel();
                    }
                }
                if let Some(registry) = self.registry.upgrade() {
                    registry.remove(self.handle);
                }
            }
        }
    }

    fn on_redirect(&self, inner: &mut Inner, info: RedirectInfo) -> Action {
        if !matches!(inner.phase, Phase::Started | Phase::Redirecting) {
            let failure = Failure::new(
                FailureKind::Protocol,
                format!("redirect received in {:?}", inner.phase),
            );
            return self.finish(inner, Phase::Failed, Some(LifecycleEvent::Failed(failure)), true);
        }

        self.transition(inner, Phase::Redirecting);

        let location = match info.location.as_deref() {
            Some(l) => match resolve_location(&inner.current.uri, l) {
                Ok(uri) => Some(uri),
                Err(e) => {
                    let event = LifecycleEvent::Failed(e.into());
                    return self.finish(inner, Phase::Failed, Some(event), true);
                }
            },
            None => None,
        };

        let policy = inner.policy;
        let decision = policy.decide(&mut inner.redirects, location.as_ref());

        let Some(native) = inner.native.clone() else {
            return Action::Nothing;
        };

        match (decision, location) {
            (RedirectDecision::Follow, Some(location)) => {
                let target =
                    RedirectTarget::for_response(&inner.current, info.status, location, self.auth);

                match target {
                    Some(target) => {
                        debug!(
                            "{} redirect {} of {}: {} {}",
                            self.handle,
                            inner.redirects.count(),
                            policy.max(),
                            target.method,
                            target.uri
                        );
                        {
                            let mut progress = self.progress.lock();
                            progress.redirects += 1;
                            progress.uri = target.uri.clone();
                        }
                        inner.current = target.clone();
                        Action::Follow(native, target)
                    }
                    None => {
                        debug!(
                            "{} {} not replayed for {}, redirect is final",
                            self.handle, inner.current.method, info.status
                        );
                        Action::StopRedirect(native)
                    }
                }
            }

            (RedirectDecision::TooMany, _) => {
                debug!(
                    "{} too many redirects ({} > {})",
                    self.handle,
                    inner.redirects.count(),
                    policy.max()
                );
                self.finish(
                    inner,
                    Phase::TooManyRedirects,
                    Some(LifecycleEvent::TooManyRedirects),
                    true,
                )
            }

            // No usable location. Let the native client deliver the
            // redirect response as it is.
            (_, None) => Action::StopRedirect(native),

            // Not following. Surface the redirect and end here.
            (_, Some(_)) => {
                let started = ResponseStarted {
                    uri: inner.current.uri.clone(),
                    status: info.status,
                    status_text: info.status_text,
                    headers: info.headers,
                    is_redirect: true,
                };

                if !self.emit(LifecycleEvent::ResponseStarted(started)) {
                    return self.finish(inner, Phase::Failed, None, true);
                }

                self.finish(inner, Phase::Succeeded, Some(LifecycleEvent::Succeeded), true)
            }
        }
    }

    fn on_response(&self, inner: &mut Inner, info: ResponseInfo) -> Action {
        match inner.phase {
            Phase::Started | Phase::Redirecting => {}
            Phase::HeadersReceived | Phase::Streaming => {
                warn!("{} duplicate response start ignored", self.handle);
                return Action::Nothing;
            }
            _ => {
                let failure = Failure::new(
                    FailureKind::Protocol,
                    format!("response started in {:?}", inner.phase),
                );
                let event = LifecycleEvent::Failed(failure);
                return self.finish(inner, Phase::Failed, Some(event), true);
            }
        }

        self.transition(inner, Phase::HeadersReceived);

        self.progress.lock().uri = info.uri.clone();

        // Whatever the status, a response the native client delivers is final.
        let started = ResponseStarted {
            uri: info.uri,
            is_redirect: false,
            status: info.status,
            status_text: info.status_text,
            headers: info.headers,
        };

        if !self.emit(LifecycleEvent::ResponseStarted(started)) {
            return self.finish(inner, Phase::Failed, None, true);
        }

        Action::WantRead
    }

    fn on_data(&self, inner: &mut Inner, data: Vec<u8>) -> Action {
        if inner.phase != Phase::Streaming {
            warn!("{} read completed in {:?}", self.handle, inner.phase);
        }

        inner.read_pending = false;

        // An empty read is not an event, just ask again.
        if !data.is_empty() && !self.emit(LifecycleEvent::ReadCompleted { data }) {
            return self.finish(inner, Phase::Failed, None, true);
        }

        Action::WantRead
    }

    /// Lock, skip if terminal, decide, unlock, act.
    fn handle_callback(&self, name: &str, f: impl FnOnce(&Self, &mut Inner) -> Action) {
        let action = {
            let mut inner = self.inner.lock();
            if inner.phase.is_terminal() {
                debug!("{} {} ignored in {:?}", self.handle, name, inner.phase);
                return;
            }
            f(self, &mut inner)
        };
        self.run(action);
    }
}

impl RequestCallback for Exchange {
    fn on_redirect_received(&self, info: RedirectInfo) {
        self.handle_callback("on_redirect_received", |me, inner| {
            me.on_redirect(inner, info)
        });
    }

    fn on_response_started(&self, info: ResponseInfo) {
        self.handle_callback("on_response_started", |me, inner| {
            me.on_response(inner, info)
        });
    }

    fn on_read_completed(&self, data: Vec<u8>) {
        self.handle_callback("on_read_completed", |me, inner| me.on_data(inner, data));
    }

    fn on_succeeded(&self) {
        self.handle_callback("on_succeeded", |me, inner| {
            me.finish(inner, Phase::Succeeded, Some(LifecycleEvent::Succeeded), false)
        });
    }

    fn on_failed(&self, failure: Failure) {
        self.handle_callback("on_failed", |me, inner| {
            let event = LifecycleEvent::Failed(failure);
            me.finish(inner, Phase::Failed, Some(event), false)
        });
    }

    fn on_canceled(&self) {
        self.handle_callback("on_canceled", |me, inner| {
            let event = LifecycleEvent::Failed(Failure::canceled("canceled by native client"));
            me.finish(inner, Phase::Failed, Some(event), false)
        });
    }
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Exchange<{}, {:?}>", self.handle, self.inner.lock().phase)
    }
}
