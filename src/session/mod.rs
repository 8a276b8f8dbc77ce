mod controller;
mod events;
mod model;
pub mod paper;
mod progress;
mod state;

pub use controller::{SessionController, SessionDeps, SessionError};
pub use events::{PhaseChange, SessionEvent, SessionNotice};
pub use model::{ParseKeyError, Part, Question, QuestionKey, QuestionStatus, MONOLOGUE_QUESTION};
pub use paper::{InteractionMode, TestPaper};
pub use progress::{QuestionProgress, SessionProgress};
pub use state::PartPhase;
