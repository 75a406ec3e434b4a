use base64::{engine::general_purpose, Engine as _};
use lambda_http::{http::StatusCode, Body, Response};
use serde::{Deserialize, Serialize};
use std::env;

/// Failure modes of a generation stage. Stages never retry; the UI decides
/// whether the user repeats the action.
#[derive(Debug, thiserror::Error)]
pub enum GenError {
    #[error("model response was not the requested JSON: {0}")]
    Format(String),
    #[error("generation returned no usable result")]
    Empty,
    #[error("generation credentials expired or invalid")]
    CredentialsExpired,
    #[error("generation service error: {0}")]
    Service(String),
    #[error("generation request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Messages the AI endpoint sends when the API key is no longer usable.
/// Matched by substring and re-signaled as a distinct sentinel so the UI can
/// prompt for new credentials instead of showing a generic failure.
pub fn is_credential_error(message: &str) -> bool {
    message.contains("API key expired") || message.contains("API_KEY_INVALID")
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String, // base64
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Part {
        Part {
            text: Some(text.into()),
            inline_data: None,
        }
    }

    pub fn inline_image(mime_type: impl Into<String>, data: impl Into<String>) -> Part {
        Part {
            text: None,
            inline_data: Some(InlineData {
                mime_type: mime_type.into(),
                data: data.into(),
            }),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_modalities: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: Option<String>,
}

/// Thin client for the generative AI REST endpoint. One request per stage,
/// fully awaited; no streaming, no retry.
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    text_model: String,
    image_model: String,
}

impl GeminiClient {
    pub fn from_env() -> GeminiClient {
        let api_key = env::var("GEMINI_API_KEY").expect("GEMINI_API_KEY must be set");
        let base_url = env::var("GEMINI_API_BASE_URL")
            .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".to_string());
        let text_model =
            env::var("GEMINI_TEXT_MODEL").unwrap_or_else(|_| "gemini-2.5-flash".to_string());
        let image_model = env::var("GEMINI_IMAGE_MODEL")
            .unwrap_or_else(|_| "gemini-2.5-flash-image".to_string());

        GeminiClient {
            http: reqwest::Client::new(),
            api_key,
            base_url,
            text_model,
            image_model,
        }
    }

    async fn generate(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, GenError> {
        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, model);

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorEnvelope>(&body)
                .ok()
                .and_then(|envelope| envelope.error)
                .and_then(|error| error.message)
                .unwrap_or(body);
            tracing::error!("Generation service returned {}: {}", status, message);

            if is_credential_error(&message) {
                return Err(GenError::CredentialsExpired);
            }
            return Err(GenError::Service(format!("{}: {}", status, message)));
        }

        Ok(response.json().await?)
    }

    /// Free-form text request (image analysis, descriptions).
    pub async fn generate_text(&self, parts: Vec<Part>) -> Result<String, GenError> {
        let request = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts,
            }],
            generation_config: None,
        };

        let response = self.generate(&self.text_model, &request).await?;
        first_text(&response).ok_or(GenError::Empty)
    }

    /// Structured request: the model is asked for JSON matching `schema` and
    /// the raw JSON text of the first candidate is returned.
    pub async fn generate_json(
        &self,
        parts: Vec<Part>,
        schema: serde_json::Value,
    ) -> Result<String, GenError> {
        let request = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts,
            }],
            generation_config: Some(GenerationConfig {
                response_mime_type: Some("application/json".to_string()),
                response_schema: Some(schema),
                response_modalities: None,
            }),
        };

        let response = self.generate(&self.text_model, &request).await?;
        first_text(&response).ok_or(GenError::Empty)
    }

    /// Image synthesis/editing request; returns the first inline image part.
    pub async fn generate_image(&self, parts: Vec<Part>) -> Result<InlineData, GenError> {
        let request = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts,
            }],
            generation_config: Some(GenerationConfig {
                response_mime_type: None,
                response_schema: None,
                response_modalities: Some(vec!["TEXT".to_string(), "IMAGE".to_string()]),
            }),
        };

        let response = self.generate(&self.image_model, &request).await?;
        first_inline_image(&response).ok_or(GenError::Empty)
    }
}

fn first_text(response: &GenerateContentResponse) -> Option<String> {
    response
        .candidates
        .iter()
        .filter_map(|candidate| candidate.content.as_ref())
        .flat_map(|content| content.parts.iter())
        .find_map(|part| part.text.clone())
}

fn first_inline_image(response: &GenerateContentResponse) -> Option<InlineData> {
    response
        .candidates
        .iter()
        .filter_map(|candidate| candidate.content.as_ref())
        .flat_map(|content| content.parts.iter())
        .find_map(|part| part.inline_data.clone())
}

/// Decode the base64 payload of a generated image.
pub fn decode_image(data_b64: &str) -> Result<Vec<u8>, GenError> {
    general_purpose::STANDARD
        .decode(data_b64)
        .map_err(|e| GenError::Format(format!("invalid base64 image data: {}", e)))
}

/// Map a stage failure onto the HTTP surface. `CredentialsExpired` keeps its
/// own error code so the UI can react to it specifically.
pub fn gen_error_response(err: GenError) -> Result<Response<Body>, lambda_http::Error> {
    let (status, code) = match &err {
        GenError::CredentialsExpired => (StatusCode::UNAUTHORIZED, "CredentialsExpired"),
        GenError::Format(_) => (StatusCode::BAD_GATEWAY, "FormatError"),
        GenError::Empty => (StatusCode::BAD_GATEWAY, "GenerationFailed"),
        GenError::Service(_) | GenError::Http(_) => {
            (StatusCode::BAD_GATEWAY, "GenerationServiceError")
        }
    };

    Ok(Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(
            serde_json::json!({"error": code, "message": err.to_string()})
                .to_string()
                .into(),
        )
        .map_err(Box::new)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_first_text_part() {
        let raw = r#"{
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [{"text": "{\"title\":\"A Brave Hamster\"}"}]
                }
            }]
        }"#;
        let response: GenerateContentResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(
            first_text(&response).unwrap(),
            "{\"title\":\"A Brave Hamster\"}"
        );
        assert!(first_inline_image(&response).is_none());
    }

    #[test]
    fn extracts_inline_image_past_text_parts() {
        let raw = r#"{
            "candidates": [{
                "content": {
                    "parts": [
                        {"text": "Here is your illustration."},
                        {"inlineData": {"mimeType": "image/png", "data": "aGVsbG8="}}
                    ]
                }
            }]
        }"#;
        let response: GenerateContentResponse = serde_json::from_str(raw).unwrap();
        let image = first_inline_image(&response).unwrap();
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(decode_image(&image.data).unwrap(), b"hello");
    }

    #[test]
    fn empty_candidate_list_yields_nothing() {
        let response: GenerateContentResponse = serde_json::from_str("{}").unwrap();
        assert!(first_text(&response).is_none());
        assert!(first_inline_image(&response).is_none());
    }

    #[test]
    fn credential_failures_are_detected_by_substring() {
        assert!(is_credential_error(
            "API key expired. Please renew the API key."
        ));
        assert!(is_credential_error("400: API_KEY_INVALID"));
        assert!(!is_credential_error("Resource has been exhausted"));
        assert!(!is_credential_error("api key expired")); // exact casing only
    }

    #[test]
    fn request_parts_serialize_camel_case() {
        let part = Part::inline_image("image/png", "aGVsbG8=");
        let json = serde_json::to_value(&part).unwrap();
        assert_eq!(json["inlineData"]["mimeType"], "image/png");
        assert!(json.get("text").is_none());
    }

    #[test]
    fn service_error_envelope_parses() {
        let raw = r#"{"error": {"code": 400, "message": "API key expired.", "status": "INVALID_ARGUMENT"}}"#;
        let envelope: ApiErrorEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.error.unwrap().message.unwrap(), "API key expired.");
    }
}
