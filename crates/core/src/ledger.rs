use std::collections::HashMap;

use chrono::{DateTime, Utc};
use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;
use serde::{Deserialize, Serialize};

use crate::error::VivaError;

/// A generated viva question together with the grading context the provider
/// supplied alongside it. The keywords and rubric are fed back into the
/// evaluation call for the turn this question belongs to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Question {
    #[serde(rename = "question")]
    pub text: String,
    #[serde(default)]
    pub expected_keywords: Vec<String>,
    #[serde(default)]
    pub follow_up_questions: Vec<String>,
    #[serde(default)]
    pub scoring_criteria: HashMap<String, String>,
}

/// Per-turn evaluation scores. The dimension scores are on a [0,1] scale;
/// `score`/`max_score` are the 10-point raw points used for session totals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnScores {
    pub accuracy: f64,
    pub completeness: f64,
    pub confidence: f64,
    pub score: f64,
    pub max_score: f64,
}

/// The respondent's answer payload for one turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnResponse {
    pub text: Option<String>,
    /// Pointer to uploaded audio/video; the media pipeline fills in the
    /// transcript later without blocking the turn.
    pub media_ref: Option<String>,
    pub duration_seconds: Option<f64>,
}

/// One question/response pair within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// 1-based, strictly increasing, no gaps within a session.
    pub index: u32,
    pub question: Question,
    pub response: Option<TurnResponse>,
    /// Transcript of the response media, attached asynchronously by the
    /// media pipeline after the turn is already finalized.
    pub transcript: Option<String>,
    pub scores: Option<TurnScores>,
    pub feedback: Option<String>,
    pub keywords_matched: Vec<String>,
    pub asked_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
}

impl Turn {
    pub fn is_pending(&self) -> bool {
        self.response.is_none()
    }
}

/// Ordered, append-only record of the questions asked and responses received
/// for one session. Append-only until the session ends; finalized turns are
/// immutable apart from the late-arriving transcript.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnLedger {
    turns: Vec<Turn>,
}

impl TurnLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn as_slice(&self) -> &[Turn] {
        &self.turns
    }

    pub fn get(&self, index: u32) -> Option<&Turn> {
        self.turns.iter().find(|t| t.index == index)
    }

    /// Appends a new pending turn for `question`.
    ///
    /// Fails with `Inconsistent` if a pending turn already exists: the
    /// single-pending-turn invariant must hold before the next question is
    /// issued.
    pub fn append_pending(&mut self, question: Question, now: DateTime<Utc>) -> Result<&Turn, VivaError> {
        if self.turns.iter().any(Turn::is_pending) {
            return Err(VivaError::Inconsistent(
                "appending a question while another is still unanswered".into(),
            ));
        }
        let index = self.turns.len() as u32 + 1;
        self.turns.push(Turn {
            index,
            question,
            response: None,
            transcript: None,
            scores: None,
            feedback: None,
            keywords_matched: Vec::new(),
            asked_at: now,
            answered_at: None,
        });
        self.turns
            .last()
            .ok_or_else(|| VivaError::Inconsistent("ledger empty after append".into()))
    }

    /// The single pending turn, if any.
    ///
    /// More than one pending turn should never occur under single-writer
    /// access; when it does, surface it as `Inconsistent` rather than guess.
    pub fn pending(&self) -> Result<Option<&Turn>, VivaError> {
        let mut pending = self.turns.iter().filter(|t| t.is_pending());
        let first = pending.next();
        if pending.next().is_some() {
            return Err(VivaError::Inconsistent(
                "more than one unanswered question in the ledger".into(),
            ));
        }
        Ok(first)
    }

    /// Finalizes the pending turn with the response and its evaluation.
    /// Returns the finalized turn's index. Once finalized a turn is
    /// immutable; a second finalize attempt sees no pending turn.
    pub fn finalize_pending(
        &mut self,
        response: TurnResponse,
        scores: TurnScores,
        feedback: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<u32, VivaError> {
        let index = match self.pending()? {
            Some(turn) => turn.index,
            None => return Err(VivaError::NoPendingTurn),
        };
        let turn = self
            .turns
            .iter_mut()
            .find(|t| t.index == index)
            .ok_or_else(|| VivaError::Inconsistent("pending turn vanished".into()))?;

        turn.keywords_matched = matched_keywords(
            response.text.as_deref().unwrap_or(""),
            &turn.question.expected_keywords,
        );
        turn.response = Some(response);
        turn.scores = Some(scores);
        turn.feedback = feedback;
        turn.answered_at = Some(now);
        Ok(index)
    }

    /// Attaches a late transcript to an already-finalized turn. Scores and
    /// the response payload are untouched.
    pub fn attach_transcript(&mut self, index: u32, transcript: String) -> Result<(), VivaError> {
        let turn = self
            .turns
            .iter_mut()
            .find(|t| t.index == index)
            .ok_or(VivaError::NotFound)?;
        turn.transcript = Some(transcript);
        Ok(())
    }
}

/// Expected keywords the response actually touches, by fuzzy match against
/// the response text. Threshold tuned the same way as subtopic detection.
pub fn matched_keywords(response: &str, expected: &[String]) -> Vec<String> {
    let matcher = SkimMatcherV2::default();
    let response_lower = response.to_lowercase();
    expected
        .iter()
        .filter(|kw| {
            let kw_lower = kw.to_lowercase();
            matcher.fuzzy_match(&response_lower, &kw_lower).unwrap_or(0) > 70
        })
        .cloned()
        .collect()
}
