use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::{Error, Result};

pub const MYMEMORY_ENDPOINT: &str = "https://api.mymemory.translated.net/get";

/// Longest query, in bytes, the MyMemory free tier accepts. Longer texts are
/// sent in several queries.
pub const MAX_QUERY_BYTES: usize = 500;

/// Translates prompts from a fixed source language into the model's language.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct TranslatorConfig {
    pub endpoint: String,
    pub source_lang: String,
    pub target_lang: String,
    /// Contact address sent as `de`; raises MyMemory's daily quota.
    pub email: Option<String>,
    pub timeout: Duration,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            endpoint: MYMEMORY_ENDPOINT.to_string(),
            source_lang: "vi".to_string(),
            target_lang: "en".to_string(),
            email: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Client for the MyMemory translation REST API.
pub struct MyMemoryTranslator {
    client: reqwest::Client,
    config: TranslatorConfig,
}

impl MyMemoryTranslator {
    pub fn new(config: TranslatorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::translation(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn langpair(&self) -> String {
        format!("{}|{}", self.config.source_lang, self.config.target_lang)
    }

    async fn translate_chunk(&self, text: &str) -> Result<String> {
        let mut query = vec![("q", text.to_string()), ("langpair", self.langpair())];
        if let Some(email) = &self.config.email {
            query.push(("de", email.clone()));
        }

        let response = self
            .client
            .get(&self.config.endpoint)
            .query(&query)
            .send()
            .await
            .map_err(|e| Error::translation(format!("request to translation service failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::translation(format!(
                "translation service returned HTTP {status}"
            )));
        }

        let body: MyMemoryResponse = response
            .json()
            .await
            .map_err(|e| Error::translation(format!("unreadable translation response: {e}")))?;
        body.into_translation()
    }
}

#[async_trait]
impl Translator for MyMemoryTranslator {
    async fn translate(&self, text: &str) -> Result<String> {
        if self.config.source_lang == self.config.target_lang {
            return Ok(text.to_string());
        }

        let chunks = split_query(text, MAX_QUERY_BYTES);
        let mut translated = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            translated.push(self.translate_chunk(chunk).await?);
        }
        let translated = translated.join(" ");
        tracing::debug!(
            source = %text,
            translated = %translated,
            chunks = chunks.len(),
            "translated prompt"
        );
        Ok(translated)
    }
}

/// Splits `text` on whitespace into pieces of at most `max_bytes` bytes.
/// A single word longer than that is cut at character boundaries. Text
/// without any words is kept as one piece.
pub(crate) fn split_query(text: &str, max_bytes: usize) -> Vec<String> {
    if text.len() <= max_bytes || text.split_whitespace().next().is_none() {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let needed = if current.is_empty() { word.len() } else { current.len() + 1 + word.len() };
        if needed <= max_bytes {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
            continue;
        }
        if !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        if word.len() <= max_bytes {
            current.push_str(word);
            continue;
        }
        for c in word.chars() {
            if !current.is_empty() && current.len() + c.len_utf8() > max_bytes {
                chunks.push(std::mem::take(&mut current));
            }
            current.push(c);
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MyMemoryResponse {
    response_data: Option<ResponseData>,
    #[serde(default)]
    response_status: serde_json::Value,
    #[serde(default)]
    response_details: serde_json::Value,
    #[serde(default)]
    matches: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseData {
    #[serde(default)]
    translated_text: Option<String>,
}

impl MyMemoryResponse {
    fn status(&self) -> Option<u64> {
        match &self.response_status {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn first_match(&self) -> Option<String> {
        self.matches
            .as_array()?
            .iter()
            .filter_map(|m| m.get("translation")?.as_str())
            .find(|t| !t.trim().is_empty())
            .map(str::to_string)
    }

    pub(crate) fn into_translation(self) -> Result<String> {
        if self.status() != Some(200) {
            let details = match &self.response_details {
                serde_json::Value::String(s) if !s.is_empty() => s.clone(),
                serde_json::Value::Null => "no details".to_string(),
                other => other.to_string(),
            };
            return Err(Error::translation(format!(
                "translation service reported status {}: {details}",
                self.response_status
            )));
        }

        let direct = self
            .response_data
            .as_ref()
            .and_then(|d| d.translated_text.clone())
            .filter(|t| !t.trim().is_empty());
        direct
            .or_else(|| self.first_match())
            .ok_or_else(|| Error::translation("translation service returned an empty translation"))
    }
}
