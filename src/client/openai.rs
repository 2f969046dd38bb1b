use std::io::{BufRead, BufReader};
use std::time::Duration;

use crate::config::Config;
use crate::error::AppError;
use crate::generation::GenerationRequest;
use crate::log::{LogAggregator, LogSource};

use super::types::{ChatChunk, ChatMessage, ChatRequest};
use super::ChatClient;

pub struct OpenAiClient {
    http: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, AppError> {
        // reqwest's blocking client defaults to a 30s timeout; no limit unless configured.
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        Self::new(
            config.base_url.clone(),
            config.api_key.clone(),
            config.request_timeout(),
        )
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

impl ChatClient for OpenAiClient {
    fn generate(
        &self,
        request: &GenerationRequest,
        log: &LogAggregator,
    ) -> Result<String, AppError> {
        let body = ChatRequest {
            model: &request.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.query,
                },
            ],
            stream: true,
            temperature: 0.0,
        };

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            return Err(AppError::Network(format!("{status}: {detail}")));
        }

        read_stream(BufReader::new(response), log)
    }
}

// Reasoning is echoed to the log only; the returned text is the answer alone.
pub(crate) fn read_stream<R: BufRead>(reader: R, log: &LogAggregator) -> Result<String, AppError> {
    let result = read_events(reader, log);
    log.flush(LogSource::System);
    result
}

fn read_events<R: BufRead>(reader: R, log: &LogAggregator) -> Result<String, AppError> {
    let mut content = String::new();
    let mut thinking = false;
    let mut answering = false;

    for line in reader.lines() {
        let line = line.map_err(|e| AppError::Network(e.to_string()))?;
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data.is_empty() {
            continue;
        }
        if data == "[DONE]" {
            break;
        }

        let chunk: ChatChunk =
            serde_json::from_str(data).map_err(|e| AppError::MalformedResponse(e.to_string()))?;
        for choice in chunk.choices {
            if let Some(reasoning) = choice.delta.reasoning_content.filter(|r| !r.is_empty()) {
                if !thinking {
                    log.system("thinking:");
                    thinking = true;
                }
                log.write(LogSource::System, &reasoning);
            }
            if let Some(text) = choice.delta.content.filter(|c| !c.is_empty()) {
                if !answering {
                    if thinking {
                        log.flush(LogSource::System);
                        log.system("end of thinking");
                    }
                    answering = true;
                }
                log.write(LogSource::System, &text);
                content.push_str(&text);
            }
        }
    }

    Ok(content)
}
