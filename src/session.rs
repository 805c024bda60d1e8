//! per-session conversation state: transcript, input buffer, busy gate.
//!
//! every transition is a `&mut self` call, so the busy check and the busy set
//! happen together and a second submission can never slip in while a turn
//! is outstanding.

use bevy::prelude::*;
use std::ops::Range;

use crate::transcript::{Message, Transcript};

/// assistant text appended when a turn fails for any reason.
pub const CONNECTION_ERROR_TEXT: &str =
    "⚠️ Error: Could not connect to the answering service. Make sure the backend is running.";

/// identifies one accepted submission within a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TurnId(pub(crate) u64);

/// the single outbound call an accepted submission produces.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outbound {
    pub turn: TurnId,
    pub query: String,
}

/// how a turn settled. failures render as `CONNECTION_ERROR_TEXT`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    Answer(String),
    Failure,
}

impl Reply {
    pub fn is_answer(&self) -> bool {
        matches!(self, Reply::Answer(_))
    }

    fn into_content(self) -> String {
        match self {
            Reply::Answer(text) => text,
            Reply::Failure => CONNECTION_ERROR_TEXT.to_string(),
        }
    }
}

/// attach this to an entity to give it a conversation.
#[derive(Component, Debug, Default)]
pub struct ChatSession {
    transcript: Transcript,
    input: String,
    in_flight: Option<TurnId>,
    outbound: Option<Outbound>,
    next_turn: u64,
    announced: usize,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut String {
        &mut self.input
    }

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.input = text.into();
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn in_flight(&self) -> Option<TurnId> {
        self.in_flight
    }

    /// whether `submit_input` would be accepted right now.
    pub fn can_submit(&self) -> bool {
        !self.is_busy() && !self.input.trim().is_empty()
    }

    /// start a turn with `text`. ignored when blank or while busy.
    pub fn submit(&mut self, text: impl Into<String>) {
        let text = text.into();
        if text.trim().is_empty() {
            debug!(target: "bevy_askbot", "submit ignored: blank input");
            return;
        }
        if let Some(turn) = self.in_flight {
            debug!(target: "bevy_askbot", "submit ignored: {:?} still in flight", turn);
            return;
        }

        let turn = TurnId(self.next_turn);
        self.next_turn += 1;
        self.in_flight = Some(turn);
        self.transcript.append(Message::user(text.clone()));
        self.input.clear();
        debug!(target: "bevy_askbot", "submit accepted: {:?} (len={})", turn, text.len());
        self.outbound = Some(Outbound { turn, query: text });
    }

    /// submit whatever is in the input buffer.
    pub fn submit_input(&mut self) {
        let text = self.input.clone();
        self.submit(text);
    }

    pub fn has_outbound(&self) -> bool {
        self.outbound.is_some()
    }

    /// hand the queued call to a dispatcher. yields it at most once.
    pub fn take_outbound(&mut self) -> Option<Outbound> {
        self.outbound.take()
    }

    /// finish `turn`. returns false (and changes nothing) if `turn` is not
    /// the one in flight.
    pub fn settle(&mut self, turn: TurnId, reply: Reply) -> bool {
        if self.in_flight != Some(turn) {
            warn!(
                target: "bevy_askbot",
                "settle ignored: {:?} is not in flight (current={:?})", turn, self.in_flight
            );
            return false;
        }
        self.transcript.append(Message::assistant(reply.into_content()));
        self.in_flight = None;
        true
    }

    /// indices appended since the last call.
    pub(crate) fn take_unannounced(&mut self) -> Range<usize> {
        let start = self.announced;
        self.announced = self.transcript.len();
        start..self.announced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::Role;
    use pretty_assertions::assert_eq;

    fn roles(s: &ChatSession) -> Vec<Role> {
        s.transcript().iter().map(Message::role).collect()
    }

    #[test]
    fn accepted_submit_appends_user_and_clears_input() {
        let mut s = ChatSession::new();
        s.set_input("  hello  ");
        assert!(s.can_submit());
        s.submit_input();

        assert!(s.is_busy());
        assert_eq!(s.input(), "");
        assert_eq!(s.transcript().snapshot(), &[Message::user("  hello  ")]);

        let out = s.take_outbound().expect("outbound queued");
        assert_eq!(out.query, "  hello  ");
        assert_eq!(Some(out.turn), s.in_flight());
        assert!(s.take_outbound().is_none());
    }

    #[test]
    fn blank_submit_is_noop() {
        let mut s = ChatSession::new();
        s.set_input(" \t\n");
        assert!(!s.can_submit());
        s.submit_input();
        s.submit("");

        assert!(!s.is_busy());
        assert!(s.transcript().is_empty());
        assert_eq!(s.input(), " \t\n");
        assert!(!s.has_outbound());
    }

    #[test]
    fn submit_while_busy_is_noop() {
        let mut s = ChatSession::new();
        s.submit("first");
        let first = s.take_outbound().unwrap();

        s.set_input("second");
        assert!(!s.can_submit());
        s.submit_input();

        assert_eq!(s.transcript().len(), 1);
        assert_eq!(s.input(), "second");
        assert!(!s.has_outbound());
        assert_eq!(s.in_flight(), Some(first.turn));
    }

    #[test]
    fn answer_settles_turn() {
        let mut s = ChatSession::new();
        s.submit("hello");
        let out = s.take_outbound().unwrap();

        assert!(s.settle(out.turn, Reply::Answer("X".into())));
        assert!(!s.is_busy());
        assert_eq!(s.transcript().last(), Some(&Message::assistant("X")));
    }

    #[test]
    fn failure_appends_fixed_text() {
        let mut s = ChatSession::new();
        s.submit("hello");
        let out = s.take_outbound().unwrap();

        assert!(s.settle(out.turn, Reply::Failure));
        assert!(!s.is_busy());
        assert_eq!(s.transcript().last(), Some(&Message::assistant(CONNECTION_ERROR_TEXT)));
    }

    #[test]
    fn stale_settlement_is_ignored() {
        let mut s = ChatSession::new();
        s.submit("one");
        let first = s.take_outbound().unwrap();
        assert!(s.settle(first.turn, Reply::Answer("a".into())));

        s.submit("two");
        let second = s.take_outbound().unwrap();
        assert_ne!(first.turn, second.turn);

        assert!(!s.settle(first.turn, Reply::Answer("late".into())));
        assert!(s.is_busy());
        assert_eq!(s.transcript().len(), 3);

        assert!(s.settle(second.turn, Reply::Failure));
        assert!(!s.settle(second.turn, Reply::Answer("dup".into())));
        assert_eq!(s.transcript().len(), 4);
    }

    #[test]
    fn sequential_turns_alternate_roles() {
        let mut s = ChatSession::new();
        for (i, reply) in [Reply::Answer("a".into()), Reply::Failure, Reply::Answer("c".into())]
            .into_iter()
            .enumerate()
        {
            s.submit(format!("q{i}"));
            let out = s.take_outbound().unwrap();
            s.settle(out.turn, reply);
        }
        assert_eq!(
            roles(&s),
            vec![Role::User, Role::Assistant, Role::User, Role::Assistant, Role::User, Role::Assistant]
        );
    }

    #[test]
    fn unannounced_ranges_cover_each_append_once() {
        let mut s = ChatSession::new();
        assert_eq!(s.take_unannounced(), 0..0);
        s.submit("hi");
        assert_eq!(s.take_unannounced(), 0..1);
        let out = s.take_outbound().unwrap();
        s.settle(out.turn, Reply::Failure);
        assert_eq!(s.take_unannounced(), 1..2);
        assert_eq!(s.take_unannounced(), 2..2);
    }
}
