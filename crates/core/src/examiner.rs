use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};

use crate::ledger::{Question, Turn};

/// How hard the provider should push and what flavor of question to ask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionKind {
    Conceptual,
    Application,
    Analysis,
}

/// Context handed to the provider when generating or evaluating. Snapshot of
/// the assignment and the respondent's prior written work, plus what has
/// already been said in this session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectContext {
    pub assignment_context: String,
    pub written_answers: String,
    #[serde(default)]
    pub prior_responses: Vec<String>,
    pub difficulty_level: String,
    pub question_kind: QuestionKind,
}

impl Default for SubjectContext {
    fn default() -> Self {
        Self {
            assignment_context: String::new(),
            written_answers: String::new(),
            prior_responses: Vec::new(),
            difficulty_level: "intermediate".to_string(),
            question_kind: QuestionKind::Conceptual,
        }
    }
}

/// Provider's judgment of one response. All dimensions on a [0,1] scale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub accuracy_score: f64,
    pub completeness_score: f64,
    pub confidence_score: f64,
    pub overall_score: f64,
    pub feedback: String,
}

impl Evaluation {
    fn in_range(&self) -> bool {
        [
            self.accuracy_score,
            self.completeness_score,
            self.confidence_score,
            self.overall_score,
        ]
        .iter()
        .all(|s| (0.0..=1.0).contains(s))
    }
}

/// The contract any question/evaluation intelligence provider must fulfil.
///
/// The engine never talks to a provider directly; it goes through `Examiner`,
/// which bounds each call and substitutes deterministic fallbacks. Keeping
/// this seam a trait lets tests drive the state machine with a `mockall`
/// mock instead of a live API.
#[async_trait]
#[cfg_attr(test, automock)]
pub trait ExaminerProvider {
    async fn generate_question(&self, ctx: &SubjectContext) -> Result<Question>;

    async fn evaluate_response(
        &self,
        question: &Question,
        response: &str,
        ctx: &SubjectContext,
    ) -> Result<Evaluation>;

    /// Narrative wrap-up over the whole session, produced at completion.
    async fn summarize_session(&self, turns: &[Turn]) -> Result<String>;

    /// Standalone practice questions, conceptually similar to the assignment
    /// but not identical to it.
    async fn practice_questions(&self, ctx: &SubjectContext, count: usize) -> Result<Vec<Question>>;
}

/// A generated question plus whether the fallback had to stand in.
#[derive(Debug, Clone)]
pub struct Generated {
    pub question: Question,
    pub degraded: bool,
}

/// An evaluation plus whether the fallback had to stand in.
#[derive(Debug, Clone)]
pub struct Evaluated {
    pub evaluation: Evaluation,
    pub degraded: bool,
}

/// Neutral score substituted when evaluation fails; the respondent is never
/// blocked by a provider outage.
pub const NEUTRAL_SCORE: f64 = 0.7;

/// Points available per turn on the session's raw scale.
pub const TURN_MAX_SCORE: f64 = 10.0;

pub(crate) const FALLBACK_QUESTION_TEXT: &str =
    "Can you explain the main concepts from your assignment in your own words?";

/// Adapter in front of the intelligence provider.
///
/// One bounded attempt per call: the provider result is raced against a
/// timeout, its shape validated (non-empty question text, scores within
/// [0,1]), and any failure — timeout, transport, malformed payload — is
/// absorbed into a deterministic fallback and logged. From the state
/// machine's point of view these methods cannot fail.
pub struct Examiner<P> {
    provider: P,
    timeout: Duration,
}

impl<P: ExaminerProvider + Send + Sync> Examiner<P> {
    pub fn new(provider: P, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    async fn bounded<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T>> + Send,
    ) -> Option<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                tracing::warn!(op, error = %e, "examiner provider failed, using fallback");
                None
            }
            Err(_) => {
                tracing::warn!(op, timeout_ms = self.timeout.as_millis() as u64, "examiner provider timed out, using fallback");
                None
            }
        }
    }

    pub async fn generate_question(&self, ctx: &SubjectContext) -> Generated {
        let result = self
            .bounded("generate_question", self.provider.generate_question(ctx))
            .await
            .filter(|q| {
                let ok = !q.text.trim().is_empty();
                if !ok {
                    tracing::warn!("provider returned a question with empty text, using fallback");
                }
                ok
            });
        match result {
            Some(question) => Generated {
                question,
                degraded: false,
            },
            None => Generated {
                question: Self::fallback_question(),
                degraded: true,
            },
        }
    }

    pub async fn evaluate_response(
        &self,
        question: &Question,
        response: &str,
        ctx: &SubjectContext,
    ) -> Evaluated {
        let result = self
            .bounded(
                "evaluate_response",
                self.provider.evaluate_response(question, response, ctx),
            )
            .await
            .filter(|eval| {
                let ok = eval.in_range();
                if !ok {
                    tracing::warn!("provider returned out-of-range scores, using fallback");
                }
                ok
            });
        match result {
            Some(evaluation) => Evaluated {
                evaluation,
                degraded: false,
            },
            None => Evaluated {
                evaluation: Self::fallback_evaluation(),
                degraded: true,
            },
        }
    }

    pub async fn summarize_session(&self, turns: &[Turn]) -> String {
        self.bounded("summarize_session", self.provider.summarize_session(turns))
            .await
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| {
                "Viva session completed. Manual review recommended for detailed feedback."
                    .to_string()
            })
    }

    pub async fn practice_questions(&self, ctx: &SubjectContext, count: usize) -> Vec<Question> {
        let result = self
            .bounded(
                "practice_questions",
                self.provider.practice_questions(ctx, count),
            )
            .await
            .filter(|qs| qs.len() == count && qs.iter().all(|q| !q.text.trim().is_empty()));
        result.unwrap_or_else(|| {
            (1..=count)
                .map(|i| Question {
                    text: format!("Practice question {i}: explain a key concept from the assignment."),
                    expected_keywords: vec!["concept".into(), "explanation".into()],
                    follow_up_questions: vec!["Can you elaborate?".into()],
                    scoring_criteria: Default::default(),
                })
                .collect()
        })
    }

    fn fallback_question() -> Question {
        Question {
            text: FALLBACK_QUESTION_TEXT.to_string(),
            expected_keywords: vec!["concept".into(), "understanding".into(), "explanation".into()],
            follow_up_questions: vec![
                "Can you provide an example?".into(),
                "How would you apply this?".into(),
            ],
            scoring_criteria: Default::default(),
        }
    }

    fn fallback_evaluation() -> Evaluation {
        Evaluation {
            accuracy_score: NEUTRAL_SCORE,
            completeness_score: NEUTRAL_SCORE,
            confidence_score: NEUTRAL_SCORE,
            overall_score: NEUTRAL_SCORE,
            feedback: "Response received and recorded. Manual review recommended.".to_string(),
        }
    }
}
