use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use subcrawl_core::error::{AppError, VerificationErrorKind};
use subcrawl_core::models::{ApplicationPeriod, Candidate, Verification};
use subcrawl_core::traits::Verifier;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_AI_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_CONTENT_CHARS: usize = 2000;
const TEMPERATURE: f64 = 0.3;

const DEFAULT_SYSTEM_PROMPT: &str = "You verify Korean local-government web pages. Decide whether the page is a \
subsidy or support-program announcement that citizens or businesses can apply to. \
A valid announcement names a support program, who may apply, and an application period; a budget is a strong signal. \
News articles, results notices, meeting minutes and generic guides are NOT valid. \
Normalize dates to YYYY-MM-DD and the budget to an integer amount in KRW (e.g. 12억 원 = 1200000000). \
Use null for anything the page does not state. \
Respond ONLY with JSON matching the requested schema.";

/// JSON Schema the model's answer must satisfy.
fn answer_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "is_valid": { "type": "boolean" },
            "application_start": { "type": ["string", "null"], "description": "YYYY-MM-DD" },
            "application_end": { "type": ["string", "null"], "description": "YYYY-MM-DD" },
            "budget_amount": { "type": ["integer", "null"], "description": "KRW" },
            "confidence": { "type": "number", "description": "0.0 to 1.0" },
            "reasoning": { "type": "string" },
            "matched_criteria": { "type": "array", "items": { "type": "string" } }
        },
        "required": [
            "is_valid",
            "application_start",
            "application_end",
            "budget_amount",
            "confidence",
            "reasoning",
            "matched_criteria"
        ],
        "additionalProperties": false
    })
}

/// OpenAI-compatible chat-completions verifier.
///
/// Sends the candidate's title, raw dates, raw budget text and the first
/// 2000 characters of its body, asks for a structured verdict, and validates
/// the answer against [`answer_schema`] before normalizing it.
///
/// Works with any OpenAI-compatible API, including Gemini via its
/// compatibility layer (`https://generativelanguage.googleapis.com/v1beta/openai`).
#[derive(Clone)]
pub struct OpenAiVerifier {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
    system_prompt: String,
    schema: serde_json::Value,
    validator: Arc<jsonschema::Validator>,
}

impl OpenAiVerifier {
    pub fn new(api_key: &str, model: &str) -> Result<Self, AppError> {
        Self::with_base_url(api_key, model, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: &str, model: &str, base_url: &str) -> Result<Self, AppError> {
        Self::build(api_key, model, base_url, DEFAULT_AI_TIMEOUT)
    }

    pub fn with_timeout(self, timeout: Duration) -> Result<Self, AppError> {
        Self::build(&self.api_key, &self.model, &self.base_url, timeout)
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn default_model() -> &'static str {
        DEFAULT_MODEL
    }

    pub fn default_base_url() -> &'static str {
        DEFAULT_BASE_URL
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build(
        api_key: &str,
        model: &str,
        base_url: &str,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        if api_key.trim().is_empty() {
            return Err(AppError::Config("AI API key must not be empty".into()));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {e}")))?;

        let schema = answer_schema();
        let validator = jsonschema::validator_for(&schema)
            .map_err(|e| AppError::Config(format!("Invalid answer schema: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            timeout,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            schema,
            validator: Arc::new(validator),
        })
    }

    fn request_for(&self, candidate: &Candidate) -> ChatRequest {
        let content: String = candidate.body_text.chars().take(MAX_CONTENT_CHARS).collect();
        let raw_dates = if candidate.raw_dates.is_empty() {
            "(none found)".to_string()
        } else {
            candidate.raw_dates.join(" | ")
        };

        ChatRequest {
            model: self.model.clone(),
            temperature: TEMPERATURE,
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: self.system_prompt.clone(),
                },
                Message {
                    role: "user".to_string(),
                    content: format!(
                        "URL: {}\nTitle: {}\nDates found on page: {}\nBudget text: {}\n\nContent:\n{}",
                        candidate.source_url,
                        candidate.title,
                        raw_dates,
                        candidate.raw_budget_text.as_deref().unwrap_or("(none found)"),
                        content
                    ),
                },
            ],
            response_format: ResponseFormat {
                format_type: "json_schema".to_string(),
                json_schema: JsonSchemaWrapper {
                    name: "announcement_verification".to_string(),
                    strict: true,
                    schema: self.schema.clone(),
                },
            },
        }
    }

    /// Validate and normalize the model's JSON answer.
    fn parse_answer(&self, raw: &str) -> Result<Verification, AppError> {
        let value: serde_json::Value = serde_json::from_str(raw).map_err(|e| {
            malformed(format!(
                "AI returned invalid JSON: {e}. Raw: {}",
                raw.chars().take(200).collect::<String>()
            ))
        })?;

        let errors: Vec<String> = self
            .validator
            .iter_errors(&value)
            .map(|e| format!("{e}"))
            .collect();
        if !errors.is_empty() {
            return Err(malformed(format!(
                "AI answer does not match schema: {}",
                errors.join("; ")
            )));
        }

        let answer: Answer = serde_json::from_value(value)
            .map_err(|e| malformed(format!("AI answer could not be decoded: {e}")))?;

        Ok(Verification {
            is_valid: answer.is_valid,
            normalized_dates: ApplicationPeriod {
                start: answer.application_start.as_deref().and_then(parse_date),
                end: answer.application_end.as_deref().and_then(parse_date),
            },
            normalized_budget: answer.budget_amount.filter(|b| *b >= 0),
            confidence: answer.confidence,
            reasoning: answer.reasoning,
            matched_criteria: answer.matched_criteria,
        }
        .clamp_confidence())
    }
}

// ---- OpenAI API types ----

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    temperature: f64,
    messages: Vec<Message>,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
    json_schema: JsonSchemaWrapper,
}

#[derive(Serialize)]
struct JsonSchemaWrapper {
    name: String,
    strict: bool,
    schema: serde_json::Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[derive(Deserialize)]
struct Answer {
    is_valid: bool,
    application_start: Option<String>,
    application_end: Option<String>,
    budget_amount: Option<i64>,
    confidence: f64,
    reasoning: String,
    matched_criteria: Vec<String>,
}

impl Verifier for OpenAiVerifier {
    async fn verify(&self, candidate: &Candidate) -> Result<Verification, AppError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = self.request_for(candidate);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::verification(
                        VerificationErrorKind::Timeout,
                        format!("AI call timed out after {}s", self.timeout.as_secs()),
                    )
                } else {
                    AppError::verification(
                        VerificationErrorKind::Timeout,
                        format!("AI call failed: {e}"),
                    )
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiError>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("HTTP {status_code}: {body}"));
            return Err(classify_status(status_code, message));
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| malformed(format!("Failed to parse AI response: {e}")))?;

        let content = chat_response
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .ok_or_else(|| malformed("Empty response from AI".to_string()))?;

        let verification = self.parse_answer(content)?;
        tracing::debug!(
            url = %candidate.source_url,
            is_valid = verification.is_valid,
            confidence = verification.confidence,
            "AI verification answered"
        );
        Ok(verification)
    }
}

fn malformed(message: String) -> AppError {
    AppError::verification(VerificationErrorKind::MalformedResponse, message)
}

fn classify_status(status_code: u16, message: String) -> AppError {
    match status_code {
        429 | 503 | 529 => AppError::verification(VerificationErrorKind::RateLimited, message),
        408 | 504 => AppError::verification(VerificationErrorKind::Timeout, message),
        401 | 403 => AppError::Config(format!("AI provider rejected credentials: {message}")),
        _ => malformed(format!("HTTP {status_code}: {message}")),
    }
}

/// Accepts `YYYY-MM-DD`, `YYYY.MM.DD` and `YYYY/MM/DD`; anything else is unknown.
fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    ["%Y-%m-%d", "%Y.%m.%d", "%Y/%m/%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
}
