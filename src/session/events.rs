use crate::recording::Recording;
use super::state::PartPhase;
use crate::session::QuestionKey;
use crate::submission::Ack;
use crate::timer::{ClockHandle, ClockTick};
use std::sync::Arc;

/// Raw clock output queued for the controller.
#[derive(Debug, Clone, Copy)]
pub enum SessionEvent {
    Tick(ClockTick),
    Expired(ClockHandle),
}

/// What the controller did in response to an event, for the front end.
#[derive(Debug, Clone)]
pub enum SessionNotice {
    Tick(ClockTick),
    /// Preparation ran out; `recording` is the question whose capture was
    /// started automatically.
    PreparationFinished {
        part: u8,
        recording: Option<QuestionKey>,
    },
    /// The question's budget ran out and its take was closed.
    RecordingForceStopped(Arc<Recording>),
    /// The session clock ran out and the result was stored.
    Finalized(Ack),
}

/// A part moved between phases. Published as it happens, so a front end can
/// show that a part is being evaluated while the controller waits on it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseChange {
    pub part: u8,
    pub from: PartPhase,
    pub to: PartPhase,
}
