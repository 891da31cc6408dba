use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::examiner::{Evaluation, ExaminerProvider, SubjectContext};
use crate::ledger::{Question, Turn};

#[derive(Debug, Deserialize)]
struct LlmResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: String,
}

/// Chat-completions client for an OpenAI-compatible endpoint.
///
/// Prompts ask for strict JSON and the responses are deserialized into the
/// engine's own types; anything that fails to parse surfaces as an error,
/// which the `Examiner` adapter turns into a fallback. This client never
/// retries — the adapter contract is one bounded attempt per call.
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
        }
    }

    async fn chat(&self, prompt: String, temperature: f64, json_mode: bool) -> Result<String> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "user", "content": prompt }
            ],
            "temperature": temperature
        });
        if json_mode {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }

        let resp = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .json::<LlmResponse>()
            .await?;

        let answer = resp
            .choices
            .first()
            .ok_or_else(|| anyhow::anyhow!("No response from LLM"))?
            .message
            .content
            .clone();
        Ok(answer)
    }
}

#[async_trait]
impl ExaminerProvider for OpenAiProvider {
    async fn generate_question(&self, ctx: &SubjectContext) -> Result<Question> {
        let prior = if ctx.prior_responses.is_empty() {
            "None".to_string()
        } else {
            ctx.prior_responses.join("\n")
        };
        let prompt = format!(
            r#"You are an examiner in an oral examination (viva). Generate one adaptive question that tests the respondent's understanding. Build on the assignment context and the respondent's prior answers, adapt difficulty to what has been said, and test conceptual understanding rather than memorization.

Assignment Context: {assignment}

Respondent's Written Answers: {written}

Previous Viva Responses: {prior}

Difficulty Level: {difficulty}
Question Type: {kind:?}

Respond STRICTLY as JSON:
{{
    "question": "<the question to ask>",
    "expected_keywords": ["<keyword>", ...],
    "follow_up_questions": ["<follow-up>", ...],
    "scoring_criteria": {{
        "excellent": "<criteria for 90-100%>",
        "good": "<criteria for 70-89%>",
        "satisfactory": "<criteria for 50-69%>",
        "needs_improvement": "<criteria for 0-49%>"
    }}
}}"#,
            assignment = ctx.assignment_context,
            written = ctx.written_answers,
            prior = prior,
            difficulty = ctx.difficulty_level,
            kind = ctx.question_kind,
        );

        let answer = self.chat(prompt, 0.7, true).await?;
        let question: Question = serde_json::from_str(&answer)
            .with_context(|| format!("Failed to parse question from LLM: {answer}"))?;
        Ok(question)
    }

    async fn evaluate_response(
        &self,
        question: &Question,
        response: &str,
        _ctx: &SubjectContext,
    ) -> Result<Evaluation> {
        let prompt = format!(
            r#"You are evaluating a respondent's answer in an oral examination (viva). Score objectively and give constructive feedback.

Question Asked: {question}

Respondent's Answer: {response}

Expected Keywords: {keywords:?}

Scoring Criteria: {criteria}

Respond STRICTLY as JSON, all scores on a 0-1 scale:
{{
    "accuracy_score": <0..1>,
    "completeness_score": <0..1>,
    "confidence_score": <0..1>,
    "overall_score": <0..1>,
    "feedback": "<constructive feedback>"
}}"#,
            question = question.text,
            response = response,
            keywords = question.expected_keywords,
            criteria = serde_json::to_string(&question.scoring_criteria)?,
        );

        let answer = self.chat(prompt, 0.3, true).await?;
        let evaluation: Evaluation = serde_json::from_str(&answer)
            .with_context(|| format!("Failed to parse evaluation from LLM: {answer}"))?;
        Ok(evaluation)
    }

    async fn summarize_session(&self, turns: &[Turn]) -> Result<String> {
        let transcript: Vec<serde_json::Value> = turns
            .iter()
            .map(|t| {
                serde_json::json!({
                    "question": t.question.text,
                    "response": t.response.as_ref().and_then(|r| r.text.clone()),
                    "score": t.scores.as_ref().map(|s| s.score),
                })
            })
            .collect();

        let prompt = format!(
            r#"Summarize this oral-examination session for the respondent. Be encouraging while being honest about performance. Cover: overall assessment, key strengths, areas for improvement, and concrete recommendations for further study.

Session transcript: {transcript}

Respond with the summary text only."#,
            transcript = serde_json::to_string_pretty(&transcript)?,
        );

        let answer = self.chat(prompt, 0.5, false).await?;
        Ok(answer.trim().to_string())
    }

    async fn practice_questions(&self, ctx: &SubjectContext, count: usize) -> Result<Vec<Question>> {
        let prompt = format!(
            r#"Generate {count} practice questions for an upcoming oral examination. They should be conceptually similar to the assignment but NOT identical to it, and should test understanding rather than memorization.

Assignment Context: {assignment}
Difficulty Level: {difficulty}

Respond STRICTLY as JSON:
{{"questions": [{{"question": "...", "expected_keywords": [...], "follow_up_questions": [...], "scoring_criteria": {{...}}}}, ...]}}"#,
            count = count,
            assignment = ctx.assignment_context,
            difficulty = ctx.difficulty_level,
        );

        #[derive(Deserialize)]
        struct PracticeSet {
            questions: Vec<Question>,
        }

        let answer = self.chat(prompt, 0.8, true).await?;
        let set: PracticeSet = serde_json::from_str(&answer)
            .with_context(|| format!("Failed to parse practice questions from LLM: {answer}"))?;
        Ok(set.questions)
    }
}
