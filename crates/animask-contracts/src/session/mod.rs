//! Upload → processing → result/error lifecycle for one user session.
//!
//! The session never performs IO. Starting a call hands back a [`Ticket`]
//! and the image to send; whoever runs the call reports back through
//! [`Session::complete`]. Tickets carry the session generation at issue
//! time, so a completion that arrives after a reset, a new submit or a
//! history load is recognised as stale and dropped.

mod history;

use std::fmt;

use crate::data_url::{is_image_mime, DataUrl};

pub use history::{History, HistoryItem, HISTORY_CAPACITY};

pub const INVALID_FILE_MESSAGE: &str = "Please upload a valid image file.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initial,
    Loading,
    Result,
    Error,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Loading => "loading",
            Self::Result => "result",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file handed over by the input boundary (picker, drop, paste).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFile {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl ImageFile {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            bytes,
        }
    }

    pub fn is_image(&self) -> bool {
        is_image_mime(&self.content_type)
    }

    pub fn to_data_url(&self) -> DataUrl {
        DataUrl::from_bytes(self.content_type.trim(), &self.bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketKind {
    Submit,
    Retry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    pub generation: u64,
    pub kind: TicketKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The file was not an image; the session is now in `error`.
    Rejected,
    Started(Ticket, DataUrl),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Applied,
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    HistoryIndexOutOfRange { index: usize, len: usize },
    /// Reset while a call is running; there is no cancellation.
    Busy { state: SessionState, is_retrying: bool },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HistoryIndexOutOfRange { index, len } => {
                write!(f, "history entry {index} does not exist ({len} stored)")
            }
            Self::Busy { .. } => f.write_str("wait for the current request to finish"),
        }
    }
}

impl std::error::Error for SessionError {}

/// User actions and call completions, consumed by [`Session::dispatch`].
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Submit(ImageFile),
    Retry,
    Reset,
    LoadFromHistory(usize),
    Completed(Ticket, Result<DataUrl, String>),
}

/// What the caller has to do after a dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    None,
    Request(Ticket, DataUrl),
    /// The event was refused and nothing changed.
    Refused(SessionError),
}

#[derive(Debug, Clone)]
pub struct Session {
    state: SessionState,
    original: Option<DataUrl>,
    original_mime_type: Option<String>,
    processed: Vec<DataUrl>,
    is_retrying: bool,
    error: Option<String>,
    history: History,
    generation: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: SessionState::Initial,
            original: None,
            original_mime_type: None,
            processed: Vec::new(),
            is_retrying: false,
            error: None,
            history: History::new(),
            generation: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn original(&self) -> Option<&DataUrl> {
        self.original.as_ref()
    }

    pub fn original_mime_type(&self) -> Option<&str> {
        self.original_mime_type.as_deref()
    }

    pub fn processed(&self) -> &[DataUrl] {
        &self.processed
    }

    pub fn is_retrying(&self) -> bool {
        self.is_retrying
    }

    /// The blocking error in `error` state, or the transient message of the
    /// last failed retry while in `result`.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Transient failure of the last retry. Never set outside `result`.
    pub fn notice(&self) -> Option<&str> {
        match self.state {
            SessionState::Result => self.error.as_deref(),
            _ => None,
        }
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn dispatch(&mut self, event: SessionEvent) -> Effect {
        match event {
            SessionEvent::Submit(file) => match self.submit(&file) {
                SubmitOutcome::Started(ticket, image) => Effect::Request(ticket, image),
                SubmitOutcome::Rejected => Effect::None,
            },
            SessionEvent::Retry => match self.retry() {
                Some((ticket, image)) => Effect::Request(ticket, image),
                None => Effect::None,
            },
            SessionEvent::Reset => match self.reset() {
                Ok(()) => Effect::None,
                Err(err) => Effect::Refused(err),
            },
            SessionEvent::LoadFromHistory(index) => match self.load_from_history(index) {
                Ok(()) => Effect::None,
                Err(err) => Effect::Refused(err),
            },
            SessionEvent::Completed(ticket, outcome) => {
                self.complete(ticket, outcome);
                Effect::None
            }
        }
    }

    /// Starts processing `file`. Any previous session is reset first, which
    /// archives a finished result and invalidates whatever call was in flight.
    pub fn submit(&mut self, file: &ImageFile) -> SubmitOutcome {
        self.clear();
        if !file.is_image() {
            self.state = SessionState::Error;
            self.error = Some(INVALID_FILE_MESSAGE.to_string());
            return SubmitOutcome::Rejected;
        }

        let image = file.to_data_url();
        self.original = Some(image.clone());
        self.original_mime_type = Some(file.content_type.trim().to_string());
        self.state = SessionState::Loading;
        SubmitOutcome::Started(
            Ticket {
                generation: self.generation,
                kind: TicketKind::Submit,
            },
            image,
        )
    }

    /// Requests another result for the current original. Returns `None`
    /// (and changes nothing) unless the session shows a result and no retry
    /// is already running.
    pub fn retry(&mut self) -> Option<(Ticket, DataUrl)> {
        if self.state != SessionState::Result || self.is_retrying {
            return None;
        }
        let image = self.original.clone()?;
        self.original_mime_type.as_ref()?;

        self.is_retrying = true;
        self.error = None;
        Some((
            Ticket {
                generation: self.generation,
                kind: TicketKind::Retry,
            },
            image,
        ))
    }

    pub fn complete(&mut self, ticket: Ticket, outcome: Result<DataUrl, String>) -> Completion {
        if ticket.generation != self.generation {
            return Completion::Stale;
        }
        match ticket.kind {
            TicketKind::Submit => {
                if self.state != SessionState::Loading {
                    return Completion::Stale;
                }
                match outcome {
                    Ok(image) => {
                        self.processed = vec![image];
                        self.state = SessionState::Result;
                    }
                    Err(message) => {
                        self.error = Some(message);
                        self.state = SessionState::Error;
                    }
                }
            }
            TicketKind::Retry => {
                if self.state != SessionState::Result || !self.is_retrying {
                    return Completion::Stale;
                }
                match outcome {
                    Ok(image) => self.processed.push(image),
                    Err(message) => self.error = Some(message),
                }
                self.is_retrying = false;
            }
        }
        Completion::Applied
    }

    /// Returns to `initial`. A session that produced at least one result is
    /// archived at the front of the history first. Refused while a submit
    /// or retry is in flight.
    pub fn reset(&mut self) -> Result<(), SessionError> {
        if self.state == SessionState::Loading || self.is_retrying {
            return Err(SessionError::Busy {
                state: self.state,
                is_retrying: self.is_retrying,
            });
        }
        self.clear();
        Ok(())
    }

    /// Unconditional reset, archiving a finished result. Invalidates any
    /// ticket in flight.
    fn clear(&mut self) {
        if let Some(item) = self.archivable() {
            self.history.push_front(item);
        }

        self.generation += 1;
        self.state = SessionState::Initial;
        self.original = None;
        self.original_mime_type = None;
        self.processed.clear();
        self.is_retrying = false;
        self.error = None;
    }

    /// Restores history entry `index` as the current result and removes it
    /// from the history. The current session is reset (and archived) first.
    pub fn load_from_history(&mut self, index: usize) -> Result<(), SessionError> {
        let len = self.history.len();
        let item = self
            .history
            .take(index)
            .ok_or(SessionError::HistoryIndexOutOfRange { index, len })?;

        self.clear();
        self.original = Some(item.original);
        self.original_mime_type = Some(item.mime_type);
        self.processed = item.processed;
        self.state = SessionState::Result;
        Ok(())
    }

    fn archivable(&self) -> Option<HistoryItem> {
        if self.state != SessionState::Result || self.processed.is_empty() {
            return None;
        }
        Some(HistoryItem {
            original: self.original.clone()?,
            mime_type: self.original_mime_type.clone()?,
            processed: self.processed.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_file(tag: &str) -> ImageFile {
        ImageFile::new(format!("{tag}.png"), "image/png", tag.as_bytes().to_vec())
    }

    fn output(tag: &str) -> DataUrl {
        DataUrl::new("image/png", tag)
    }

    fn started(outcome: SubmitOutcome) -> (Ticket, DataUrl) {
        match outcome {
            SubmitOutcome::Started(ticket, image) => (ticket, image),
            SubmitOutcome::Rejected => panic!("submit was rejected"),
        }
    }

    fn session_with_result(tag: &str) -> Session {
        let mut session = Session::new();
        let (ticket, _) = started(session.submit(&png_file(tag)));
        assert_eq!(session.complete(ticket, Ok(output(tag))), Completion::Applied);
        session
    }

    #[test]
    fn submit_then_success_lands_in_result_with_one_image() {
        let mut session = Session::new();
        assert_eq!(session.state(), SessionState::Initial);

        let (ticket, image) = started(session.submit(&png_file("cat")));
        assert_eq!(session.state(), SessionState::Loading);
        assert_eq!(image.mime_type(), "image/png");
        assert_eq!(session.original(), Some(&image));
        assert_eq!(ticket.kind, TicketKind::Submit);

        session.complete(ticket, Ok(output("cat-out")));
        assert_eq!(session.state(), SessionState::Result);
        assert_eq!(session.processed(), &[output("cat-out")]);
        assert_eq!(session.error(), None);
    }

    #[test]
    fn submit_failure_lands_in_error() {
        let mut session = Session::new();
        let (ticket, _) = started(session.submit(&png_file("cat")));
        session.complete(ticket, Err("upstream down".to_string()));
        assert_eq!(session.state(), SessionState::Error);
        assert_eq!(session.error(), Some("upstream down"));
        assert!(session.processed().is_empty());
        assert!(session.original().is_some());
    }

    #[test]
    fn non_image_is_rejected_without_a_request() {
        let mut session = Session::new();
        let file = ImageFile::new("notes.txt", "text/plain", b"hello".to_vec());
        let effect = session.dispatch(SessionEvent::Submit(file));
        assert_eq!(effect, Effect::None);
        assert_eq!(session.state(), SessionState::Error);
        assert_eq!(session.error(), Some(INVALID_FILE_MESSAGE));
    }

    #[test]
    fn retry_success_appends_and_stays_in_result() {
        let mut session = session_with_result("cat");
        let (ticket, image) = session.retry().expect("retry starts");
        assert!(session.is_retrying());
        assert_eq!(Some(&image), session.original());

        session.complete(ticket, Ok(output("second")));
        assert_eq!(session.state(), SessionState::Result);
        assert!(!session.is_retrying());
        assert_eq!(session.processed(), &[output("cat"), output("second")]);
    }

    #[test]
    fn retry_failure_keeps_results_and_sets_notice() {
        let mut session = session_with_result("cat");
        let (ticket, _) = session.retry().expect("retry starts");
        session.complete(ticket, Err("quota".to_string()));

        assert_eq!(session.state(), SessionState::Result);
        assert!(!session.is_retrying());
        assert_eq!(session.processed().len(), 1);
        assert_eq!(session.notice(), Some("quota"));

        let (ticket, _) = session.retry().expect("retry starts again");
        assert_eq!(session.notice(), None);
        session.complete(ticket, Ok(output("ok")));
        assert_eq!(session.processed().len(), 2);
    }

    #[test]
    fn retry_while_retrying_is_ignored() {
        let mut session = session_with_result("cat");
        let first = session.retry();
        assert!(first.is_some());
        let generation = session.generation();

        assert_eq!(session.retry(), None);
        assert_eq!(session.dispatch(SessionEvent::Retry), Effect::None);
        assert!(session.is_retrying());
        assert_eq!(session.generation(), generation);
        assert_eq!(session.processed().len(), 1);
    }

    #[test]
    fn retry_outside_result_is_ignored() {
        let mut session = Session::new();
        assert_eq!(session.retry(), None);
        let _ = session.submit(&png_file("cat"));
        assert_eq!(session.retry(), None);
        assert_eq!(session.state(), SessionState::Loading);
    }

    #[test]
    fn reset_archives_result_into_history() {
        let mut session = session_with_result("cat");
        session.reset().expect("reset");

        assert_eq!(session.state(), SessionState::Initial);
        assert!(session.original().is_none());
        assert!(session.processed().is_empty());
        assert_eq!(session.history().len(), 1);
        let archived = session.history().get(0).expect("archived");
        assert_eq!(archived.mime_type, "image/png");
        assert_eq!(archived.processed, vec![output("cat")]);
    }

    #[test]
    fn reset_from_error_does_not_archive() {
        let mut session = Session::new();
        let (ticket, _) = started(session.submit(&png_file("cat")));
        session.complete(ticket, Err("boom".to_string()));
        session.reset().expect("reset");
        assert_eq!(session.state(), SessionState::Initial);
        assert!(session.history().is_empty());
    }

    #[test]
    fn history_is_capped_and_most_recent_first() {
        let mut session = Session::new();
        for tag in ["a", "b", "c", "d", "e", "f"] {
            let (ticket, _) = started(session.submit(&png_file(tag)));
            session.complete(ticket, Ok(output(tag)));
            session.reset().expect("reset");
            assert!(session.history().len() <= HISTORY_CAPACITY);
        }
        let order: Vec<&str> = session
            .history()
            .iter()
            .map(|item| item.processed[0].payload())
            .collect();
        assert_eq!(order, vec!["f", "e", "d", "c", "b"]);
    }

    #[test]
    fn load_from_history_restores_and_removes_entry() {
        let mut session = Session::new();
        for tag in ["a", "b", "c"] {
            let (ticket, _) = started(session.submit(&png_file(tag)));
            session.complete(ticket, Ok(output(tag)));
            session.reset().expect("reset");
        }
        let wanted = session.history().get(1).cloned().expect("entry");

        session.load_from_history(1).expect("load");
        assert_eq!(session.state(), SessionState::Result);
        assert_eq!(session.processed(), wanted.processed.as_slice());
        assert_eq!(session.original(), Some(&wanted.original));
        let remaining: Vec<&str> = session
            .history()
            .iter()
            .map(|item| item.processed[0].payload())
            .collect();
        assert_eq!(remaining, vec!["c", "a"]);
    }

    #[test]
    fn load_from_history_archives_current_result() {
        let mut session = session_with_result("old");
        session.reset().expect("reset");
        let (ticket, _) = started(session.submit(&png_file("new")));
        session.complete(ticket, Ok(output("new")));

        session.load_from_history(0).expect("load");
        assert_eq!(session.processed(), &[output("old")]);
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.history().get(0).map(|item| item.processed.clone()), Some(vec![output("new")]));
    }

    #[test]
    fn load_from_history_out_of_range_changes_nothing() {
        let mut session = session_with_result("cat");
        let generation = session.generation();
        let err = session.load_from_history(3).unwrap_err();
        assert_eq!(err, SessionError::HistoryIndexOutOfRange { index: 3, len: 0 });
        assert_eq!(session.state(), SessionState::Result);
        assert_eq!(session.generation(), generation);
    }

    #[test]
    fn reset_while_loading_is_refused() {
        let mut session = Session::new();
        let (ticket, _) = started(session.submit(&png_file("cat")));
        let generation = session.generation();

        assert_eq!(
            session.reset(),
            Err(SessionError::Busy {
                state: SessionState::Loading,
                is_retrying: false
            })
        );
        assert_eq!(session.state(), SessionState::Loading);
        assert_eq!(session.generation(), generation);
        assert_eq!(session.complete(ticket, Ok(output("cat"))), Completion::Applied);
        assert_eq!(session.state(), SessionState::Result);
    }

    #[test]
    fn reset_while_retrying_is_refused() {
        let mut session = session_with_result("cat");
        let (retry, _) = session.retry().expect("retry starts");

        let effect = session.dispatch(SessionEvent::Reset);
        assert!(matches!(effect, Effect::Refused(SessionError::Busy { is_retrying: true, .. })));
        assert_eq!(session.state(), SessionState::Result);
        assert!(session.history().is_empty());
        assert!(session.is_retrying());

        assert_eq!(session.complete(retry, Ok(output("second"))), Completion::Applied);
        assert_eq!(session.processed(), &[output("cat"), output("second")]);
        session.reset().expect("reset after retry");
        assert_eq!(session.history().len(), 1);
    }

    #[test]
    fn dispatch_reports_out_of_range_history_load() {
        let mut session = session_with_result("cat");
        assert_eq!(
            session.dispatch(SessionEvent::LoadFromHistory(2)),
            Effect::Refused(SessionError::HistoryIndexOutOfRange { index: 2, len: 0 })
        );
        assert_eq!(session.state(), SessionState::Result);
    }

    #[test]
    fn newer_submit_supersedes_in_flight_call() {
        let mut session = Session::new();
        let (first, _) = started(session.submit(&png_file("one")));
        let (second, _) = started(session.submit(&png_file("two")));

        assert_eq!(session.complete(first, Ok(output("one"))), Completion::Stale);
        assert_eq!(session.state(), SessionState::Loading);
        assert_eq!(session.complete(second, Ok(output("two"))), Completion::Applied);
        assert_eq!(session.processed(), &[output("two")]);
    }

    #[test]
    fn stale_retry_after_history_load_is_dropped() {
        let mut session = session_with_result("a");
        session.reset().expect("reset");
        let (ticket, _) = started(session.submit(&png_file("b")));
        session.complete(ticket, Ok(output("b")));
        let (retry, _) = session.retry().expect("retry");

        session.load_from_history(0).expect("load");
        assert_eq!(session.complete(retry, Ok(output("late"))), Completion::Stale);
        assert_eq!(session.processed(), &[output("a")]);
        assert!(!session.is_retrying());
    }

    #[test]
    fn dispatch_drives_full_cycle() {
        let mut session = Session::new();
        let Effect::Request(ticket, _) = session.dispatch(SessionEvent::Submit(png_file("cat"))) else {
            panic!("expected a request");
        };
        session.dispatch(SessionEvent::Completed(ticket, Ok(output("cat"))));
        let Effect::Request(retry, _) = session.dispatch(SessionEvent::Retry) else {
            panic!("expected a retry request");
        };
        session.dispatch(SessionEvent::Completed(retry, Ok(output("cat-2"))));
        assert_eq!(session.processed().len(), 2);

        session.dispatch(SessionEvent::Reset);
        session.dispatch(SessionEvent::LoadFromHistory(0));
        assert_eq!(session.state(), SessionState::Result);
        assert_eq!(session.processed().len(), 2);
        assert!(session.history().is_empty());
    }
}
