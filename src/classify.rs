use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};

const GEMINI_MODEL: &str = "gemini-2.5-flash";
const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Outcome of an image plausibility check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject,
}

/// Decides whether an image plausibly shows the given label (a member name)
pub trait ImageClassifier {
    fn classify(&self, image: &[u8], mime_type: &str, label: &str) -> Result<Verdict>;
}

/// The parts of a `generateContent` reply this classifier looks at
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GenerateReply {
    candidates: Vec<Candidate>,
    error: Option<ApiError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CandidateContent {
    parts: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

impl GenerateReply {
    /// Text of the first candidate's first text part
    fn answer(&self) -> Option<&str> {
        self.candidates
            .first()?
            .content
            .parts
            .iter()
            .find_map(|part| part.get("text").and_then(Value::as_str))
    }
}

/// Request body: prompt plus inline image, deterministic and without thinking tokens
fn classify_request(prompt: &str, image: &[u8], mime_type: &str) -> Value {
    json!({
        "contents": [{
            "parts": [
                { "text": prompt },
                { "inline_data": { "mime_type": mime_type, "data": BASE64_STANDARD.encode(image) } }
            ]
        }],
        "generationConfig": {
            "temperature": 0.0,
            "maxOutputTokens": 16,
            "thinkingConfig": { "thinkingBudget": 0 }
        }
    })
}

/// Read the Gemini key from the environment, if one is configured
pub fn api_key_from_env() -> Option<String> {
    std::env::var("GEMINI_API_KEY")
        .or_else(|_| std::env::var("GOOGLE_API_KEY"))
        .ok()
        .filter(|k| !k.trim().is_empty())
}

fn cosplay_prompt(member_name: &str) -> String {
    format!(
        r#"Look at this image. Is this a cosplay of the VTuber "{name}" (from VSPO)?

Strict rules:
- If it is clearly {name}, answer "TRUE".
- If it is a completely different character (e.g. another game, agency or anime character), answer "FALSE".
- If it is text only, a screenshot of a game UI, or goods/merchandise, answer "FALSE".
- Only return "TRUE" or "FALSE"."#,
        name = member_name
    )
}

/// Interpret the model's free-text answer
fn parse_answer(answer: &str) -> Verdict {
    if answer.trim().to_uppercase().contains("TRUE") {
        Verdict::Accept
    } else {
        Verdict::Reject
    }
}

pub struct GeminiClassifier {
    client: reqwest::blocking::Client,
    api_key: String,
    model: String,
}

impl GeminiClassifier {
    pub fn new(api_key: String) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent("Mozilla/5.0 (compatible; CosplayRank/1.0)")
            .build()?;
        let model = std::env::var("GEMINI_MODEL").unwrap_or_else(|_| GEMINI_MODEL.to_string());
        Ok(Self {
            client,
            api_key,
            model,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl ImageClassifier for GeminiClassifier {
    fn classify(&self, image: &[u8], mime_type: &str, label: &str) -> Result<Verdict> {
        let url = format!(
            "{}/{}:generateContent?key={}",
            GEMINI_API_URL, self.model, self.api_key
        );

        let response = self
            .client
            .post(&url)
            .json(&classify_request(&cosplay_prompt(label), image, mime_type))
            .send()
            .context("Failed to send request to Gemini API")?;

        let response_text = response.text().context("Failed to read Gemini response")?;
        let reply: GenerateReply =
            serde_json::from_str(&response_text).context("Failed to parse Gemini response JSON")?;

        if let Some(error) = reply.error {
            bail!("Gemini API error: {}", error.message);
        }
        let text = reply.answer().context("No text in Gemini response")?;

        Ok(parse_answer(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_answer() {
        assert_eq!(parse_answer("TRUE"), Verdict::Accept);
        assert_eq!(parse_answer(" true\n"), Verdict::Accept);
        assert_eq!(parse_answer("FALSE"), Verdict::Reject);
        assert_eq!(parse_answer("I cannot tell"), Verdict::Reject);
    }

    #[test]
    fn test_prompt_names_member() {
        let prompt = cosplay_prompt("花芽すみれ");
        assert!(prompt.contains("\"花芽すみれ\""));
        assert!(prompt.contains("clearly 花芽すみれ"));
    }

    #[test]
    fn test_request_shape() {
        let body = classify_request("is it?", &[0xff, 0xd8], "image/jpeg");
        let parts = &body["contents"][0]["parts"];
        assert_eq!(parts[0]["text"], "is it?");
        assert_eq!(parts[1]["inline_data"]["mime_type"], "image/jpeg");
        assert_eq!(parts[1]["inline_data"]["data"], "/9g=");
        assert_eq!(body["generationConfig"]["thinkingConfig"]["thinkingBudget"], 0);
    }

    #[test]
    fn test_reply_answer() {
        let reply: GenerateReply = serde_json::from_str(
            r#"{"candidates": [{"content": {"parts": [{"thought": true}, {"text": "TRUE"}]}}],
                "usageMetadata": {"promptTokenCount": 300}}"#,
        )
        .unwrap();
        assert_eq!(reply.answer(), Some("TRUE"));

        let error: GenerateReply =
            serde_json::from_str(r#"{"error": {"code": 429, "message": "quota"}}"#).unwrap();
        assert_eq!(error.answer(), None);
        assert_eq!(error.error.unwrap().message, "quota");
    }
}
