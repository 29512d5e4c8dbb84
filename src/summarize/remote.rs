// src/summarize/remote.rs
//! Remote text-generation backends (OpenAI chat completions, Anthropic messages).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Draft, SummaryRequest, Summarizer};
use crate::error::SummarizerError;

pub const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

fn http_client() -> Result<reqwest::Client, SummarizerError> {
    reqwest::Client::builder()
        .user_agent(crate::ingest::providers::USER_AGENT)
        .connect_timeout(Duration::from_secs(5))
        .timeout(Duration::from_secs(60))
        .build()
        .map_err(|e| SummarizerError::Transport(e.to_string()))
}

fn language_name(code: &str) -> &str {
    match code.to_ascii_lowercase().as_str() {
        "th" => "Thai",
        "en" => "English",
        "de" => "German",
        "ja" => "Japanese",
        _ => code,
    }
}

pub fn system_prompt(req: &SummaryRequest<'_>) -> String {
    let lang = language_name(req.target_language);
    format!(
        "You are a science journalist who summarizes research papers in {lang}.\n\
         Rules: plain language, neutral tone, no hype, no emojis, keep technical terms \
         in English where no common {lang} term exists.\n\
         Answer in exactly this format:\n\
         SUMMARY: <news-style summary of {min}-{max} words>\n\
         TLDR: <at most {n} sentences>",
        min = req.bounds.min,
        max = req.bounds.max,
        n = req.tldr_max_sentences.max(1),
    )
}

pub fn user_prompt(req: &SummaryRequest<'_>) -> String {
    let mut p = format!("Title: {}\n", req.title);
    if !req.authors.is_empty() {
        p.push_str(&format!("Authors: {}\n", req.authors.join(", ")));
    }
    p.push_str(&format!("Abstract: {}\n", req.text));
    if let Some(target) = req.target_words {
        p.push_str(&format!(
            "\nYour previous summary had the wrong length. Aim for about {target} words \
             (between {} and {}).\n",
            req.bounds.min, req.bounds.max
        ));
    }
    p
}

const SUMMARY_LABELS: &[&str] = &["SUMMARY:", "Summary:", "สรุป:"];
const TLDR_LABELS: &[&str] = &["TLDR:", "TL;DR:", "TL;DR :", "tldr:"];

fn strip_label<'a>(line: &'a str, labels: &[&str]) -> Option<&'a str> {
    labels.iter().find_map(|l| line.strip_prefix(l))
}

/// Parse the `SUMMARY:` / `TLDR:` answer. Markdown emphasis is removed; continuation lines
/// are appended to the current field.
pub fn parse_labeled_output(content: &str) -> Result<Draft, SummarizerError> {
    enum Field {
        None,
        Summary,
        Tldr,
    }
    let mut summary = String::new();
    let mut tldr = String::new();
    let mut current = Field::None;

    for raw in content.lines() {
        let line = raw.trim().trim_start_matches(['*', '#', ' ']).replace("**", "");
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = strip_label(line, SUMMARY_LABELS) {
            current = Field::Summary;
            summary.push_str(rest.trim());
        } else if let Some(rest) = strip_label(line, TLDR_LABELS) {
            current = Field::Tldr;
            tldr.push_str(rest.trim());
        } else {
            let target = match current {
                Field::Summary => &mut summary,
                Field::Tldr => &mut tldr,
                Field::None => continue,
            };
            if !target.is_empty() {
                target.push(' ');
            }
            target.push_str(line);
        }
    }

    if summary.trim().is_empty() {
        let preview: String = content.chars().take(80).collect();
        return Err(SummarizerError::MalformedOutput(format!(
            "no SUMMARY section in: {preview}"
        )));
    }
    Ok(Draft {
        summary: summary.trim().to_string(),
        tldr: tldr.trim().to_string(),
    })
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, SummarizerError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status.as_u16() == 429 {
        return Err(SummarizerError::QuotaExceeded);
    }
    let body = resp.text().await.unwrap_or_default();
    let hint: String = body.chars().take(120).collect();
    Err(SummarizerError::Transport(format!("HTTP {status}: {hint}")))
}

/// OpenAI Chat Completions.
pub struct OpenAiSummarizer {
    http: reqwest::Client,
    api_key: String,
    model: String,
    url: String,
}

impl OpenAiSummarizer {
    pub fn new(api_key: String, model: Option<&str>) -> Result<Self, SummarizerError> {
        if api_key.trim().is_empty() {
            return Err(SummarizerError::Transport("OpenAI API key is empty".into()));
        }
        Ok(Self {
            http: http_client()?,
            api_key,
            model: model.unwrap_or("gpt-4o-mini").to_string(),
            url: OPENAI_URL.to_string(),
        })
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn summarize(&self, req: &SummaryRequest<'_>) -> Result<Draft, SummarizerError> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: Option<String>,
        }

        let sys = system_prompt(req);
        let user = user_prompt(req);
        let body = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: &sys,
                },
                Msg {
                    role: "user",
                    content: &user,
                },
            ],
            temperature: 0.3,
            max_tokens: 900,
        };

        let resp = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let parsed: Resp = check_status(resp).await?.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| SummarizerError::MalformedOutput("empty choices".into()))?;
        parse_labeled_output(&content)
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

/// Anthropic Messages API.
pub struct AnthropicSummarizer {
    http: reqwest::Client,
    api_key: String,
    model: String,
    url: String,
}

impl AnthropicSummarizer {
    pub fn new(api_key: String, model: Option<&str>) -> Result<Self, SummarizerError> {
        if api_key.trim().is_empty() {
            return Err(SummarizerError::Transport("Anthropic API key is empty".into()));
        }
        Ok(Self {
            http: http_client()?,
            api_key,
            model: model.unwrap_or("claude-3-haiku-20240307").to_string(),
            url: ANTHROPIC_URL.to_string(),
        })
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }
}

#[async_trait]
impl Summarizer for AnthropicSummarizer {
    async fn summarize(&self, req: &SummaryRequest<'_>) -> Result<Draft, SummarizerError> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            system: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
        }
        #[derive(Deserialize)]
        struct Resp {
            content: Vec<Block>,
        }
        #[derive(Deserialize)]
        struct Block {
            #[serde(rename = "type")]
            kind: String,
            text: Option<String>,
        }

        let sys = system_prompt(req);
        let user = user_prompt(req);
        let body = Req {
            model: &self.model,
            system: &sys,
            messages: vec![Msg {
                role: "user",
                content: &user,
            }],
            temperature: 0.3,
            max_tokens: 900,
        };

        let resp = self
            .http
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;
        let parsed: Resp = check_status(resp).await?.json().await?;
        let content: String = parsed
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text)
            .collect::<Vec<_>>()
            .join("\n");
        parse_labeled_output(&content)
    }

    fn name(&self) -> &'static str {
        "anthropic"
    }
}
