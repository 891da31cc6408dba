//! Adaptive oral-examination ("viva") session engine.
//!
//! A turn-based interview controller: the engine drives a multi-question
//! dialogue between a respondent and an automated question generator /
//! evaluator, tracks progress and scores, and decides when the interview
//! ends. The intelligence provider sits behind the [`examiner`] adapter and
//! can never block or fail a session — outages degrade to deterministic
//! fallbacks.

pub mod engine;
pub mod error;
pub mod examiner;
pub mod ledger;
pub mod openai;
pub mod scoring;
pub mod session;
pub mod store;

pub use engine::{EngineConfig, StartOutcome, SubmitOutcome, VivaEngine};
pub use error::VivaError;
pub use examiner::{Examiner, ExaminerProvider, SubjectContext};
pub use ledger::{Question, Turn, TurnLedger, TurnResponse};
pub use session::{MediaArtifacts, Session, SessionId, SessionKind, SessionState};
pub use store::{MemoryStore, SessionStore};
