use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::VivaError;
use crate::examiner::{Examiner, ExaminerProvider, SubjectContext, TURN_MAX_SCORE};
use crate::ledger::{Question, TurnResponse, TurnScores};
use crate::scoring;
use crate::session::{MediaArtifacts, Session, SessionId, SessionKind, SessionState};
use crate::store::SessionStore;

/// Hard floor and ceiling for the per-session question count; deployments
/// configure within this band.
pub const MIN_QUESTIONS: u32 = 3;
pub const MAX_QUESTIONS: u32 = 10;

const DEFAULT_MAX_QUESTIONS: u32 = 5;
const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Questions per session. Clamped to `MIN_QUESTIONS..=MAX_QUESTIONS`.
    pub max_questions: u32,
    /// Upper bound on every single call into the intelligence provider.
    pub provider_timeout: Duration,
}

impl EngineConfig {
    pub fn new(max_questions: u32, provider_timeout: Duration) -> Self {
        Self {
            max_questions: max_questions.clamp(MIN_QUESTIONS, MAX_QUESTIONS),
            provider_timeout,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_questions: DEFAULT_MAX_QUESTIONS,
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }
}

/// Result of starting a session.
#[derive(Debug, Clone, Serialize)]
pub struct StartOutcome {
    pub state: SessionState,
    pub first_question: String,
    pub pending_turn: u32,
    /// True when the first question is the fallback because the provider
    /// was unavailable. The session still starts.
    pub degraded: bool,
}

/// Result of submitting a turn response.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitOutcome {
    pub state: SessionState,
    pub next_question: Option<String>,
    pub pending_turn: Option<u32>,
    pub session_complete: bool,
    pub total_score: Option<f64>,
    pub max_possible_score: Option<f64>,
    /// True when any provider call behind this operation fell back.
    pub degraded: bool,
}

/// The session state machine.
///
/// Owns the session lifecycle: it decides whether to request another
/// question or terminate, applies the turn ledger and the scoring
/// aggregator, and enforces authorization and legality of every transition.
/// All collaborators are constructor-injected; there are no process-wide
/// singletons.
///
/// Mutating operations on one session are serialized through a per-session
/// mutex: `submit_response` reads-then-writes the pending turn and the
/// counters non-atomically, so two concurrent calls could otherwise create
/// two pending turns or double-advance `questions_asked`. Distinct sessions
/// proceed in parallel without coordination. Provider calls inside the
/// critical section are bounded by the configured timeout, so lock hold
/// time is bounded as well.
pub struct VivaEngine<P, S> {
    examiner: Examiner<P>,
    store: S,
    config: EngineConfig,
    locks: Mutex<HashMap<SessionId, Arc<Mutex<()>>>>,
}

impl<P, S> VivaEngine<P, S>
where
    P: ExaminerProvider + Send + Sync,
    S: SessionStore,
{
    pub fn new(provider: P, store: S, config: EngineConfig) -> Self {
        let examiner = Examiner::new(provider, config.provider_timeout);
        Self {
            examiner,
            store,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn session_lock(&self, id: SessionId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(id).or_default().clone()
    }

    /// Creates a `Scheduled` session for a submission. Whether the
    /// submission may be examined at all (submitted vs. draft, practice
    /// before formal) is the persistence layer's concern; the engine only
    /// records the references and the context snapshot.
    pub async fn create_session(
        &self,
        submission_id: Uuid,
        respondent_id: Uuid,
        kind: SessionKind,
        context: SubjectContext,
    ) -> Result<Session, VivaError> {
        let session = Session::new(submission_id, respondent_id, kind, context);
        tracing::info!(session = %session.id, %respondent_id, ?kind, "viva session created");
        self.store.insert(session.clone()).await?;
        Ok(session)
    }

    /// `Scheduled -> InProgress`: issues turn 1. A provider outage degrades
    /// to the fixed fallback question instead of failing the start.
    pub async fn start(&self, id: SessionId, actor: Uuid) -> Result<StartOutcome, VivaError> {
        let lock = self.session_lock(id).await;
        let _guard = lock.lock().await;

        let mut session = self.store.load(id).await?;
        session.ensure_respondent(actor)?;
        let now = Utc::now();
        session.begin(now)?;

        let ctx = session.generation_context();
        let generated = self.examiner.generate_question(&ctx).await;

        let turn = session.turns.append_pending(generated.question, now)?;
        let pending_turn = turn.index;
        let first_question = turn.question.text.clone();
        session.questions_asked = 1;
        let state = session.state;

        tracing::info!(session = %id, degraded = generated.degraded, "viva session started");
        self.store.save(session).await?;

        Ok(StartOutcome {
            state,
            first_question,
            pending_turn,
            degraded: generated.degraded,
        })
    }

    /// Finalizes the pending turn with the response and its evaluation,
    /// then either issues the next question or completes the session.
    pub async fn submit_response(
        &self,
        id: SessionId,
        actor: Uuid,
        response: TurnResponse,
    ) -> Result<SubmitOutcome, VivaError> {
        let lock = self.session_lock(id).await;
        let _guard = lock.lock().await;

        let mut session = self.store.load(id).await?;
        session.ensure_respondent(actor)?;
        session.ensure_state(SessionState::InProgress)?;

        let question = match session.turns.pending()? {
            Some(turn) => turn.question.clone(),
            None => return Err(VivaError::NoPendingTurn),
        };

        let response_text = response.text.clone().unwrap_or_default();
        let ctx = session.generation_context();
        let evaluated = self
            .examiner
            .evaluate_response(&question, &response_text, &ctx)
            .await;
        let eval = &evaluated.evaluation;

        let now = Utc::now();
        let index = session.turns.finalize_pending(
            response,
            TurnScores {
                accuracy: eval.accuracy_score,
                completeness: eval.completeness_score,
                confidence: eval.confidence_score,
                score: eval.overall_score * TURN_MAX_SCORE,
                max_score: TURN_MAX_SCORE,
            },
            Some(eval.feedback.clone()),
            now,
        )?;
        session.questions_answered += 1;
        debug_assert!(session.questions_answered <= session.questions_asked);
        tracing::debug!(session = %id, turn = index, degraded = evaluated.degraded, "turn finalized");

        let mut degraded = evaluated.degraded;

        if session.questions_asked < self.config.max_questions {
            let ctx = session.generation_context();
            let generated = self.examiner.generate_question(&ctx).await;
            degraded |= generated.degraded;

            let turn = session.turns.append_pending(generated.question, now)?;
            let pending_turn = turn.index;
            let next_question = turn.question.text.clone();
            session.questions_asked += 1;

            self.store.save(session).await?;
            return Ok(SubmitOutcome {
                state: SessionState::InProgress,
                next_question: Some(next_question),
                pending_turn: Some(pending_turn),
                session_complete: false,
                total_score: None,
                max_possible_score: None,
                degraded,
            });
        }

        // Limit reached: terminal transition, aggregate and summarize.
        session.finish(now)?;
        session.scores = scoring::aggregate(session.turns.as_slice());
        session.summary = Some(self.examiner.summarize_session(session.turns.as_slice()).await);

        let total_score = session.scores.total_score;
        let max_possible_score = session.scores.max_possible_score;
        tracing::info!(session = %id, ?total_score, "viva session completed");
        self.store.save(session).await?;

        Ok(SubmitOutcome {
            state: SessionState::Completed,
            next_question: None,
            pending_turn: None,
            session_complete: true,
            total_score,
            max_possible_score,
            degraded,
        })
    }

    /// Read-only view for the respondent.
    pub async fn get(&self, id: SessionId, actor: Uuid) -> Result<Session, VivaError> {
        let session = self.store.load(id).await?;
        session.ensure_respondent(actor)?;
        Ok(session)
    }

    /// Read-only view without the respondent check, for an outer
    /// access-control layer that grants examiners visibility through
    /// submission ownership. The returned session carries the respondent
    /// and submission references that check needs.
    pub async fn inspect(&self, id: SessionId) -> Result<Session, VivaError> {
        self.store.load(id).await
    }

    /// Records media artifacts produced by the media pipeline. Legal once
    /// the session has started; never blocks a turn.
    pub async fn attach_media(
        &self,
        id: SessionId,
        actor: Uuid,
        artifacts: MediaArtifacts,
    ) -> Result<(), VivaError> {
        let lock = self.session_lock(id).await;
        let _guard = lock.lock().await;

        let mut session = self.store.load(id).await?;
        session.ensure_respondent(actor)?;
        if session.state == SessionState::Scheduled {
            return Err(VivaError::InvalidState {
                expected: SessionState::InProgress,
                actual: session.state,
            });
        }

        let media = &mut session.media;
        if artifacts.video_path.is_some() {
            media.video_path = artifacts.video_path;
        }
        if artifacts.audio_path.is_some() {
            media.audio_path = artifacts.audio_path;
        }
        if artifacts.transcript_path.is_some() {
            media.transcript_path = artifacts.transcript_path;
        }
        if artifacts.duration_seconds.is_some() {
            media.duration_seconds = artifacts.duration_seconds;
        }
        self.store.save(session).await
    }

    /// Media-pipeline callback: attaches the transcript of a turn's
    /// recorded response after the fact. Scores are untouched.
    pub async fn attach_transcript(
        &self,
        id: SessionId,
        turn_index: u32,
        transcript: String,
    ) -> Result<(), VivaError> {
        let lock = self.session_lock(id).await;
        let _guard = lock.lock().await;

        let mut session = self.store.load(id).await?;
        session.turns.attach_transcript(turn_index, transcript)?;
        self.store.save(session).await
    }

    /// Standalone practice questions for an assignment context; not tied to
    /// a session. Falls back to canned questions when the provider is out.
    pub async fn practice_questions(&self, ctx: &SubjectContext, count: usize) -> Vec<Question> {
        self.examiner.practice_questions(ctx, count).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::examiner::{Evaluation, MockExaminerProvider, FALLBACK_QUESTION_TEXT};
    use crate::store::MemoryStore;

    fn ok_question(text: &str) -> Question {
        Question {
            text: text.to_string(),
            expected_keywords: vec!["concept".into()],
            ..Question::default()
        }
    }

    fn ok_evaluation(overall: f64) -> Evaluation {
        Evaluation {
            accuracy_score: overall,
            completeness_score: overall,
            confidence_score: overall,
            overall_score: overall,
            feedback: "solid".into(),
        }
    }

    fn answer(text: &str) -> TurnResponse {
        TurnResponse {
            text: Some(text.to_string()),
            ..TurnResponse::default()
        }
    }

    /// A provider that always succeeds: fresh question per call, fixed
    /// evaluation, fixed summary.
    fn healthy_provider(overall: f64) -> MockExaminerProvider {
        let mut mock = MockExaminerProvider::new();
        mock.expect_generate_question()
            .returning(|_| Box::pin(async { Ok(ok_question("Explain the concept.")) }));
        mock.expect_evaluate_response()
            .returning(move |_, _, _| Box::pin(async move { Ok(ok_evaluation(overall)) }));
        mock.expect_summarize_session()
            .returning(|_| Box::pin(async { Ok("A confident performance overall.".to_string()) }));
        mock
    }

    async fn engine_with(
        mock: MockExaminerProvider,
        max_questions: u32,
    ) -> (
        VivaEngine<MockExaminerProvider, Arc<MemoryStore>>,
        Session,
        Uuid,
    ) {
        let store = Arc::new(MemoryStore::new());
        let engine = VivaEngine::new(
            mock,
            store,
            EngineConfig::new(max_questions, Duration::from_millis(200)),
        );
        let respondent = Uuid::new_v4();
        let session = engine
            .create_session(
                Uuid::new_v4(),
                respondent,
                SessionKind::Formal,
                SubjectContext::default(),
            )
            .await
            .unwrap();
        (engine, session, respondent)
    }

    #[tokio::test]
    async fn start_issues_first_question() {
        let (engine, session, respondent) = engine_with(healthy_provider(0.8), 5).await;

        let outcome = engine.start(session.id, respondent).await.unwrap();
        assert_eq!(outcome.state, SessionState::InProgress);
        assert_eq!(outcome.pending_turn, 1);
        assert_eq!(outcome.first_question, "Explain the concept.");
        assert!(!outcome.degraded);

        let view = engine.get(session.id, respondent).await.unwrap();
        assert_eq!(view.questions_asked, 1);
        assert_eq!(view.questions_answered, 0);
        assert!(view.started_at.is_some());
    }

    #[tokio::test]
    async fn start_twice_is_invalid_state() {
        let (engine, session, respondent) = engine_with(healthy_provider(0.8), 5).await;
        engine.start(session.id, respondent).await.unwrap();

        let err = engine.start(session.id, respondent).await.unwrap_err();
        assert!(matches!(err, VivaError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn start_checks_existence_and_actor() {
        let (engine, session, _) = engine_with(healthy_provider(0.8), 5).await;

        assert!(matches!(
            engine.start(SessionId::new(), Uuid::new_v4()).await,
            Err(VivaError::NotFound)
        ));
        assert!(matches!(
            engine.start(session.id, Uuid::new_v4()).await,
            Err(VivaError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn start_survives_provider_outage_with_fallback() {
        let mut mock = MockExaminerProvider::new();
        mock.expect_generate_question()
            .returning(|_| Box::pin(async { Err(anyhow::anyhow!("connect refused")) }));
        let (engine, session, respondent) = engine_with(mock, 5).await;

        let outcome = engine.start(session.id, respondent).await.unwrap();
        assert_eq!(outcome.state, SessionState::InProgress);
        assert!(outcome.degraded);
        assert_eq!(outcome.first_question, FALLBACK_QUESTION_TEXT);
    }

    #[tokio::test]
    async fn submit_before_start_is_invalid_state() {
        let (engine, session, respondent) = engine_with(healthy_provider(0.8), 5).await;
        let err = engine
            .submit_response(session.id, respondent, answer("hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, VivaError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn submit_with_nothing_pending_is_no_pending_turn() {
        // Craft an in-progress session whose ledger has no open question.
        let store = Arc::new(MemoryStore::new());
        let respondent = Uuid::new_v4();
        let mut session = Session::new(
            Uuid::new_v4(),
            respondent,
            SessionKind::Formal,
            SubjectContext::default(),
        );
        session.begin(Utc::now()).unwrap();
        let id = session.id;
        store.insert(session).await.unwrap();

        let engine = VivaEngine::new(
            MockExaminerProvider::new(),
            store,
            EngineConfig::default(),
        );
        let err = engine
            .submit_response(id, respondent, answer("hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, VivaError::NoPendingTurn));
    }

    #[tokio::test]
    async fn submit_continues_until_limit_then_completes() {
        let (engine, session, respondent) = engine_with(healthy_provider(0.8), 3).await;
        engine.start(session.id, respondent).await.unwrap();

        // Two intermediate turns: each finalizes one and issues the next.
        for expected_pending in [2u32, 3u32] {
            let outcome = engine
                .submit_response(session.id, respondent, answer("an answer"))
                .await
                .unwrap();
            assert_eq!(outcome.state, SessionState::InProgress);
            assert!(!outcome.session_complete);
            assert_eq!(outcome.pending_turn, Some(expected_pending));
            assert!(outcome.next_question.is_some());

            let view = engine.get(session.id, respondent).await.unwrap();
            assert!(view.questions_answered <= view.questions_asked);
        }

        // Third answer hits the configured maximum.
        let outcome = engine
            .submit_response(session.id, respondent, answer("final answer"))
            .await
            .unwrap();
        assert_eq!(outcome.state, SessionState::Completed);
        assert!(outcome.session_complete);
        assert!(outcome.next_question.is_none());
        // Three turns at overall 0.8 on a 10-point scale.
        assert_eq!(outcome.total_score, Some(24.0));
        assert_eq!(outcome.max_possible_score, Some(30.0));

        let view = engine.get(session.id, respondent).await.unwrap();
        assert_eq!(view.questions_asked, 3);
        assert_eq!(view.questions_answered, 3);
        assert!(view.completed_at.is_some());
        assert_eq!(view.summary.as_deref(), Some("A confident performance overall."));

        // Responding after completion is illegal.
        let err = engine
            .submit_response(session.id, respondent, answer("extra"))
            .await
            .unwrap_err();
        assert!(matches!(err, VivaError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn evaluation_outage_scores_neutral_and_continues() {
        let mut mock = MockExaminerProvider::new();
        mock.expect_generate_question()
            .returning(|_| Box::pin(async { Ok(ok_question("Q?")) }));
        mock.expect_evaluate_response()
            .returning(|_, _, _| Box::pin(async { Err(anyhow::anyhow!("timeout")) }));
        mock.expect_summarize_session()
            .returning(|_| Box::pin(async { Ok("summary".to_string()) }));
        let (engine, session, respondent) = engine_with(mock, 3).await;

        engine.start(session.id, respondent).await.unwrap();
        let outcome = engine
            .submit_response(session.id, respondent, answer("whatever"))
            .await
            .unwrap();
        assert!(outcome.degraded);

        let view = engine.get(session.id, respondent).await.unwrap();
        let turn = view.turns.get(1).unwrap();
        // Neutral 0.7 overall on a 10-point scale.
        assert_eq!(turn.scores.as_ref().unwrap().score, 7.0);
        assert_eq!(view.state, SessionState::InProgress);
    }

    #[tokio::test]
    async fn end_to_end_five_turns_totals_recorded_scores() {
        let (engine, session, respondent) = engine_with(healthy_provider(0.9), 5).await;
        engine.start(session.id, respondent).await.unwrap();

        let mut last = None;
        for _ in 0..5 {
            last = Some(
                engine
                    .submit_response(session.id, respondent, answer("a thorough answer"))
                    .await
                    .unwrap(),
            );
        }
        let last = last.unwrap();
        assert!(last.session_complete);
        assert_eq!(last.state, SessionState::Completed);

        let view = engine.get(session.id, respondent).await.unwrap();
        let recorded: f64 = view
            .turns
            .iter()
            .filter_map(|t| t.scores.as_ref())
            .map(|s| s.score)
            .sum();
        assert_eq!(last.total_score, Some(recorded));
        assert_eq!(last.max_possible_score, Some(50.0));
    }

    #[tokio::test]
    async fn concurrent_submits_never_double_finalize_a_turn() {
        let (engine, session, respondent) = engine_with(healthy_provider(0.8), 5).await;
        engine.start(session.id, respondent).await.unwrap();

        let engine = Arc::new(engine);
        let a = {
            let engine = engine.clone();
            let id = session.id;
            tokio::spawn(async move { engine.submit_response(id, respondent, answer("one")).await })
        };
        let b = {
            let engine = engine.clone();
            let id = session.id;
            tokio::spawn(async move { engine.submit_response(id, respondent, answer("two")).await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let view = engine.get(session.id, respondent).await.unwrap();
        assert_eq!(view.questions_answered, 2);
        assert_eq!(view.questions_asked, 3);

        // Every finalized turn index appears exactly once.
        let mut finalized: Vec<u32> = view
            .turns
            .iter()
            .filter(|t| !t.is_pending())
            .map(|t| t.index)
            .collect();
        finalized.sort_unstable();
        assert_eq!(finalized, vec![1, 2]);
        assert_eq!(view.turns.pending().unwrap().map(|t| t.index), Some(3));
    }

    #[tokio::test]
    async fn attach_media_requires_started_session() {
        let (engine, session, respondent) = engine_with(healthy_provider(0.8), 5).await;

        let media = MediaArtifacts {
            audio_path: Some("media/abc.wav".into()),
            ..MediaArtifacts::default()
        };
        assert!(matches!(
            engine.attach_media(session.id, respondent, media.clone()).await,
            Err(VivaError::InvalidState { .. })
        ));

        engine.start(session.id, respondent).await.unwrap();
        engine
            .attach_media(session.id, respondent, media)
            .await
            .unwrap();
        let view = engine.get(session.id, respondent).await.unwrap();
        assert_eq!(view.media.audio_path.as_deref(), Some("media/abc.wav"));
    }

    #[tokio::test]
    async fn transcript_attaches_after_finalization() {
        let (engine, session, respondent) = engine_with(healthy_provider(0.8), 5).await;
        engine.start(session.id, respondent).await.unwrap();
        engine
            .submit_response(session.id, respondent, answer("spoken answer"))
            .await
            .unwrap();

        engine
            .attach_transcript(session.id, 1, "the spoken answer, transcribed".into())
            .await
            .unwrap();
        let view = engine.get(session.id, respondent).await.unwrap();
        assert_eq!(
            view.turns.get(1).unwrap().transcript.as_deref(),
            Some("the spoken answer, transcribed")
        );
    }
}
