//! Event delivery: five occurrence kinds, one sink per connection, auto-login on connect.

use std::fmt;

use tracing::{info, warn};

use crate::connection::Outbox;
use crate::wire::Packet;

/// Occurrence kind, without data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    Received,
    Tick,
    Idle,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventKind::Connected => "EV_L_CONNECTED",
            EventKind::Disconnected => "EV_L_DISCONNECTED",
            EventKind::Received => "EV_L_RECEIVED",
            EventKind::Tick => "EV_L_TICK",
            EventKind::Idle => "EV_L_IDLE",
        })
    }
}

/// One occurrence delivered to the sink. `Received` borrows the frame it was decoded from.
#[derive(Debug)]
pub enum Event<'a> {
    /// Link is up; login has already been queued.
    Connected,
    Disconnected,
    /// A checksum-validated packet.
    Received(Packet<'a>),
    /// Once per event-loop iteration.
    Tick,
    /// The iteration's wait elapsed without data.
    Idle,
}

impl Event<'_> {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Connected => EventKind::Connected,
            Event::Disconnected => EventKind::Disconnected,
            Event::Received(_) => EventKind::Received,
            Event::Tick => EventKind::Tick,
            Event::Idle => EventKind::Idle,
        }
    }
}

/// Application callback. `out` queues frames (or a disconnect) behind anything already queued.
pub trait EventSink {
    fn on_event(&mut self, out: &mut Outbox<'_>, event: Event<'_>);
}

impl<F> EventSink for F
where
    F: FnMut(&mut Outbox<'_>, Event<'_>),
{
    fn on_event(&mut self, out: &mut Outbox<'_>, event: Event<'_>) {
        self(out, event)
    }
}

/// Sink that ignores everything. For pull-style use.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn on_event(&mut self, _out: &mut Outbox<'_>, _event: Event<'_>) {}
}

/// Forwards occurrences to the sink in detection order. Intercepts `Connected` to queue the
/// login packet first, once per successful connect.
#[derive(Debug)]
pub struct EventDispatcher<S> {
    sink: S,
    auto_login: bool,
    login_sent: bool,
}

impl<S: EventSink> EventDispatcher<S> {
    pub fn new(sink: S, auto_login: bool) -> Self {
        Self {
            sink,
            auto_login,
            login_sent: false,
        }
    }

    pub fn dispatch(&mut self, out: &mut Outbox<'_>, event: Event<'_>) {
        match event {
            Event::Connected if self.auto_login && !self.login_sent => {
                self.login_sent = true;
                match out.login() {
                    Ok(n) => info!(bytes = n, "login queued"),
                    Err(e) => warn!(error = %e, "can't send login to server"),
                }
            }
            Event::Disconnected => self.login_sent = false,
            _ => {}
        }
        self.sink.on_event(out, event);
    }

    pub fn login_sent(&self) -> bool {
        self.login_sent
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}
