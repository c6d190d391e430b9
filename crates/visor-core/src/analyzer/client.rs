use base64::Engine;
use reqwest::blocking::Client;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use serde_json::json;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::config::AnalysisConfig;
use crate::error::Error;

/// A frame ready to be sent: its MIME type and base64 body.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub mime_type: &'static str,
    pub data_base64: String,
}

impl EncodedImage {
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let bytes = fs::read(path)?;
        Ok(Self {
            mime_type: mime_type_for(path),
            data_base64: base64::engine::general_purpose::STANDARD.encode(bytes),
        })
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data_base64)
    }
}

pub fn mime_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        _ => "image/jpeg",
    }
}

/// The external vision service: one prompt plus one image in, the response's
/// free-form content text out.
pub trait VisionService {
    fn analyze(&self, prompt: &str, image: &EncodedImage) -> Result<String, Error>;
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// Blocking client for an OpenAI-style chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiVisionClient {
    http: Client,
    endpoint: String,
    model: String,
    max_tokens: u32,
    api_key: String,
}

impl OpenAiVisionClient {
    pub fn new(config: &AnalysisConfig) -> Result<Self, Error> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::InvalidConfig("analysis.api_key is not set".to_string()))?;

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::AnalysisRequestFailed(format!("http client: {}", e)))?;

        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            api_key,
        })
    }
}

impl VisionService for OpenAiVisionClient {
    fn analyze(&self, prompt: &str, image: &EncodedImage) -> Result<String, Error> {
        let payload = json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": prompt},
                    {"type": "image_url", "image_url": {"url": image.data_url()}}
                ]
            }],
            "max_tokens": self.max_tokens,
        });

        let response = self
            .http
            .post(&self.endpoint)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(&payload)
            .send()
            .map_err(|e| Error::AnalysisRequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(Error::AnalysisRequestFailed(format!(
                "unexpected status {}: {}",
                status, body
            )));
        }

        let completion: ChatCompletion = response
            .json()
            .map_err(|e| Error::AnalysisRequestFailed(format!("unreadable response body: {}", e)))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                Error::AnalysisRequestFailed("response contained no message content".to_string())
            })?;
        debug!("Received {} characters from {}", content.len(), self.model);
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_type_by_extension() {
        assert_eq!(mime_type_for(Path::new("a.png")), "image/png");
        assert_eq!(mime_type_for(Path::new("a.PNG")), "image/png");
        assert_eq!(mime_type_for(Path::new("a.jpg")), "image/jpeg");
        assert_eq!(mime_type_for(Path::new("a.jpeg")), "image/jpeg");
    }

    #[test]
    fn test_encoded_image_data_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.jpg");
        fs::write(&path, b"abc").unwrap();
        let image = EncodedImage::from_file(&path).unwrap();
        assert_eq!(image.data_url(), "data:image/jpeg;base64,YWJj");
    }

    #[test]
    fn test_client_requires_api_key() {
        let config = AnalysisConfig::default();
        assert!(matches!(
            OpenAiVisionClient::new(&config),
            Err(Error::InvalidConfig(_))
        ));
    }
}
