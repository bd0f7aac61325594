use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use animask_contracts::data_url::DataUrl;
use animask_contracts::events::{EventPayload, EventWriter};
use animask_contracts::session::{
    Completion, Effect, Session, SessionEvent, SessionState, Ticket, TicketKind,
};
use serde_json::Value;

use crate::transport::ImageProcessor;

const WORKER_THREAD_NAME: &str = "animask-request";

type CompletionMessage = (Ticket, Result<DataUrl, String>);

/// Owns a [`Session`] and runs the calls it asks for.
///
/// Every request runs on its own worker thread; results come back through a
/// channel and are only applied to the session from the owning thread, in
/// [`SessionDriver::pump`] or [`SessionDriver::wait`].
pub struct SessionDriver {
    session: Session,
    processor: Arc<dyn ImageProcessor>,
    events: EventWriter,
    tx: Sender<CompletionMessage>,
    rx: Receiver<CompletionMessage>,
    in_flight: usize,
}

impl SessionDriver {
    pub fn new(processor: Arc<dyn ImageProcessor>, events: EventWriter) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            session: Session::new(),
            processor,
            events,
            tx,
            rx,
            in_flight: 0,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn processor_name(&self) -> &str {
        self.processor.name()
    }

    /// Swaps the processor used for future requests. Calls already running
    /// finish against the old one.
    pub fn set_processor(&mut self, processor: Arc<dyn ImageProcessor>) {
        self.processor = processor;
    }

    /// Number of worker threads whose result has not been collected yet,
    /// stale ones included.
    pub fn pending(&self) -> usize {
        self.in_flight
    }

    pub fn dispatch(&mut self, event: SessionEvent) -> Effect {
        let action = event_name(&event);
        let before = self.session.state();
        let effect = self.session.dispatch(event);
        if let Effect::Refused(err) = &effect {
            let mut payload = EventPayload::new();
            payload.insert("action".to_string(), Value::from(action));
            payload.insert("reason".to_string(), Value::from(err.to_string()));
            self.log("event_refused", payload);
            return effect;
        }
        self.log_transition(action, before);
        if let Effect::Request(ticket, image) = &effect {
            self.spawn_request(*ticket, image.clone());
        }
        effect
    }

    /// Applies every completion that has already arrived. Returns how many
    /// changed the session.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(message) = self.rx.try_recv() {
            if self.apply(message) == Completion::Applied {
                applied += 1;
            }
        }
        applied
    }

    /// Blocks until one completion arrives or `timeout` elapses, then drains
    /// anything else that is ready. Returns `false` on timeout.
    pub fn wait(&mut self, timeout: Duration) -> bool {
        if self.in_flight == 0 {
            return false;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(message) => {
                self.apply(message);
                self.pump();
                true
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    fn apply(&mut self, (ticket, outcome): CompletionMessage) -> Completion {
        self.in_flight = self.in_flight.saturating_sub(1);
        let before = self.session.state();
        let completion = self.session.complete(ticket, outcome);
        match completion {
            Completion::Applied => self.log_transition(completion_name(ticket.kind), before),
            Completion::Stale => {
                let mut payload = EventPayload::new();
                payload.insert("generation".to_string(), Value::from(ticket.generation));
                payload.insert(
                    "current_generation".to_string(),
                    Value::from(self.session.generation()),
                );
                self.log("completion_stale", payload);
            }
        }
        completion
    }

    fn spawn_request(&mut self, ticket: Ticket, image: DataUrl) {
        let processor = Arc::clone(&self.processor);
        let tx = self.tx.clone();
        let spawned = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                let outcome = processor
                    .process(&image)
                    .map_err(|failure| failure.message);
                let _ = tx.send((ticket, outcome));
            });

        self.in_flight += 1;
        if let Err(err) = spawned {
            eprintln!("animask: request thread spawn failed: {err}");
            let _ = self.tx.send((
                ticket,
                Err(format!("Could not start the processing request: {err}")),
            ));
        }
    }

    fn log_transition(&self, action: &str, before: SessionState) {
        let after = self.session.state();
        let mut payload = EventPayload::new();
        payload.insert("action".to_string(), Value::from(action));
        payload.insert("from".to_string(), Value::from(before.as_str()));
        payload.insert("to".to_string(), Value::from(after.as_str()));
        payload.insert(
            "processed".to_string(),
            Value::from(self.session.processed().len()),
        );
        payload.insert(
            "history".to_string(),
            Value::from(self.session.history().len()),
        );
        if let Some(error) = self.session.error() {
            payload.insert("error".to_string(), Value::from(error));
        }
        self.log("session_transition", payload);
    }

    fn log(&self, event_type: &str, payload: EventPayload) {
        if let Err(err) = self.events.emit(event_type, payload) {
            eprintln!("animask: event log write failed: {err:#}");
        }
    }
}

fn event_name(event: &SessionEvent) -> &'static str {
    match event {
        SessionEvent::Submit(_) => "submit",
        SessionEvent::Retry => "retry",
        SessionEvent::Reset => "reset",
        SessionEvent::LoadFromHistory(_) => "load_from_history",
        SessionEvent::Completed(..) => "completed",
    }
}

fn completion_name(kind: TicketKind) -> &'static str {
    match kind {
        TicketKind::Submit => "submit_completed",
        TicketKind::Retry => "retry_completed",
    }
}
