use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::VivaError;
use crate::examiner::{QuestionKind, SubjectContext};
use crate::ledger::TurnLedger;
use crate::scoring::ScoreSummary;

/// Identifier of one viva session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    /// A rehearsal run; scored the same way but not the graded record.
    Practice,
    /// The graded examination itself.
    Formal,
}

/// Lifecycle state of a session. Transitions are monotonic:
/// `Scheduled -> InProgress -> Completed`, enforced by the engine.
/// A session that ends early still terminates in `Completed` with whatever
/// scores were recorded; there is no separate failure state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Scheduled,
    InProgress,
    Completed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Scheduled => "scheduled",
            SessionState::InProgress => "in_progress",
            SessionState::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// Media artifacts produced by the (external) media pipeline for a session.
/// Attached after the fact; the engine never blocks on their availability.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaArtifacts {
    pub video_path: Option<String>,
    pub audio_path: Option<String>,
    pub transcript_path: Option<String>,
    pub duration_seconds: Option<u32>,
}

/// One interview instance tied to a respondent and a submission.
///
/// Mutated exclusively through `VivaEngine` operations; the engine serializes
/// writers per session, so this type itself carries no locking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    /// The submission under examination. Referenced, not owned.
    pub submission_id: Uuid,
    /// The student answering questions. Only this actor may start or respond.
    pub respondent_id: Uuid,
    pub kind: SessionKind,
    pub state: SessionState,

    /// Snapshot of the assignment/submission context used to steer question
    /// generation. Captured at creation so the engine never re-reads the
    /// submission store mid-session.
    pub context: SubjectContext,

    pub questions_asked: u32,
    pub questions_answered: u32,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    pub turns: TurnLedger,

    pub scores: ScoreSummary,
    /// Narrative wrap-up generated when the session completes.
    pub summary: Option<String>,

    pub media: MediaArtifacts,
}

impl Session {
    pub fn new(submission_id: Uuid, respondent_id: Uuid, kind: SessionKind, context: SubjectContext) -> Self {
        Self {
            id: SessionId::new(),
            submission_id,
            respondent_id,
            kind,
            state: SessionState::Scheduled,
            context,
            questions_asked: 0,
            questions_answered: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            turns: TurnLedger::new(),
            scores: ScoreSummary::default(),
            summary: None,
            media: MediaArtifacts::default(),
        }
    }

    pub fn ensure_respondent(&self, actor: Uuid) -> Result<(), VivaError> {
        if self.respondent_id == actor {
            Ok(())
        } else {
            Err(VivaError::Forbidden)
        }
    }

    pub fn ensure_state(&self, expected: SessionState) -> Result<(), VivaError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(VivaError::InvalidState {
                expected,
                actual: self.state,
            })
        }
    }

    /// Context for generating the next question: the stored subject snapshot
    /// plus everything the respondent has said so far in this session. The
    /// question kind rotates with the turn count so the interview does not
    /// stay purely conceptual.
    pub fn generation_context(&self) -> SubjectContext {
        let prior_responses = self
            .turns
            .iter()
            .filter_map(|t| t.response.as_ref().and_then(|r| r.text.clone()))
            .collect();
        let question_kind = match self.questions_asked {
            0 => QuestionKind::Conceptual,
            n if n % 2 == 1 => QuestionKind::Application,
            _ => QuestionKind::Analysis,
        };
        SubjectContext {
            prior_responses,
            question_kind,
            ..self.context.clone()
        }
    }

    /// `Scheduled -> InProgress`. Sets `started_at` exactly once.
    pub(crate) fn begin(&mut self, now: DateTime<Utc>) -> Result<(), VivaError> {
        self.ensure_state(SessionState::Scheduled)?;
        self.state = SessionState::InProgress;
        self.started_at = Some(now);
        Ok(())
    }

    /// Terminal transition. Sets `completed_at` exactly once.
    pub(crate) fn finish(&mut self, now: DateTime<Utc>) -> Result<(), VivaError> {
        self.ensure_state(SessionState::InProgress)?;
        self.state = SessionState::Completed;
        self.completed_at = Some(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            SessionKind::Formal,
            SubjectContext::default(),
        )
    }

    #[test]
    fn begin_sets_started_at_once() {
        let mut s = session();
        let now = Utc::now();
        s.begin(now).unwrap();
        assert_eq!(s.state, SessionState::InProgress);
        assert_eq!(s.started_at, Some(now));

        // A second begin is an InvalidState error and leaves the timestamp.
        let err = s.begin(Utc::now()).unwrap_err();
        assert!(matches!(err, VivaError::InvalidState { .. }));
        assert_eq!(s.started_at, Some(now));
    }

    #[test]
    fn finish_requires_in_progress() {
        let mut s = session();
        assert!(matches!(
            s.finish(Utc::now()),
            Err(VivaError::InvalidState { .. })
        ));

        s.begin(Utc::now()).unwrap();
        s.finish(Utc::now()).unwrap();
        assert_eq!(s.state, SessionState::Completed);
        assert!(s.completed_at.is_some());

        // No regressing out of the terminal state.
        assert!(matches!(
            s.finish(Utc::now()),
            Err(VivaError::InvalidState { .. })
        ));
    }

    #[test]
    fn respondent_check() {
        let s = session();
        assert!(s.ensure_respondent(s.respondent_id).is_ok());
        assert!(matches!(
            s.ensure_respondent(Uuid::new_v4()),
            Err(VivaError::Forbidden)
        ));
    }
}
