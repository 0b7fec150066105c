//! Optional prompt optimization before dispatch: translation into English
//! and LLM-driven expansion, via an OpenAI-compatible chat endpoint.

use std::time::Duration;

use iproxy_config::PromptOptimizerConfig;
use iproxy_logging::Logger;

const MODULE: &str = "Optimizer";
const CONNECT_TEST_TIMEOUT: Duration = Duration::from_secs(10);
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_TRANSLATE_PROMPT: &str = "You are a translation engine. Translate the user's \
image prompt into natural English. Reply with the translation only, no explanations.";
const DEFAULT_EXPAND_PROMPT: &str = "You are a prompt engineer for image generation. Expand \
the user's prompt with concrete visual detail (subject, style, lighting, composition) while \
preserving its intent. Reply with the expanded prompt only, in plain text.";

/// Which operations to run for one call; resolved from the provider task
/// defaults overlaid on the global optimizer switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct OptimizeFlags {
    pub translate: bool,
    pub expand: bool,
}

#[derive(Clone)]
pub struct PromptOptimizer {
    client: wreq::Client,
    logger: Logger,
}

impl PromptOptimizer {
    pub fn new(logger: Logger) -> Self {
        Self {
            client: wreq::Client::new(),
            logger,
        }
    }

    /// Lenient optimization: every failure falls back to the prompt as it
    /// stood before the failing operation.
    ///
    /// `image_index` makes multi-image expansions independent: each index
    /// asks for its own variation.
    pub async fn optimize(
        &self,
        config: &PromptOptimizerConfig,
        flags: OptimizeFlags,
        prompt: &str,
        image_index: Option<usize>,
    ) -> String {
        let mut current = prompt.to_string();

        if flags.translate && !is_english_like(&current) {
            let input = truncate(&current, config.translate_max_length);
            match self
                .chat(config, translate_system_prompt(config), &input, image_index)
                .await
            {
                Ok(translated) if !translated.trim().is_empty() => {
                    current = translated.trim().to_string();
                }
                Ok(_) => {}
                Err(err) => {
                    self.logger
                        .info(MODULE, format!("translate failed, using original: {err}"));
                }
            }
        }

        if flags.expand {
            let input = truncate(&current, config.expand_max_length);
            match self
                .chat(config, expand_system_prompt(config), &input, image_index)
                .await
            {
                Ok(expanded) if !expanded.trim().is_empty() => {
                    current = strip_markdown(expanded.trim());
                }
                Ok(_) => {}
                Err(err) => {
                    self.logger
                        .info(MODULE, format!("expand failed, using original: {err}"));
                }
            }
        }

        current
    }

    /// Strict mode for the admin test endpoint: surface the error.
    pub async fn test_connection(&self, config: &PromptOptimizerConfig) -> Result<String, String> {
        tokio::time::timeout(
            CONNECT_TEST_TIMEOUT,
            self.chat(config, DEFAULT_TRANSLATE_PROMPT.to_string(), "你好", None),
        )
        .await
        .map_err(|_| "optimizer connection timed out".to_string())?
    }

    /// Strict-mode model listing against the optimizer endpoint.
    pub async fn fetch_models(&self, config: &PromptOptimizerConfig) -> Result<Vec<String>, String> {
        let url = models_url(&config.base_url);
        let response = self
            .request_with_docker_retry(&config.base_url, |base| {
                let request = self.client.get(models_url(base));
                if config.api_key.is_empty() {
                    request
                } else {
                    request.header("Authorization", format!("Bearer {}", config.api_key))
                }
            })
            .await
            .map_err(|err| format!("{err} ({url})"))?;

        if !response.status().is_success() {
            return Err(format!("upstream status {}", response.status().as_u16()));
        }
        let value: serde_json::Value = response.json().await.map_err(|err| err.to_string())?;
        let models = value
            .get("data")
            .and_then(|data| data.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get("id").and_then(|id| id.as_str()))
                    .map(|id| id.to_string())
                    .collect()
            })
            .unwrap_or_default();
        Ok(models)
    }

    async fn chat(
        &self,
        config: &PromptOptimizerConfig,
        mut system_prompt: String,
        input: &str,
        image_index: Option<usize>,
    ) -> Result<String, String> {
        if config.base_url.is_empty() {
            return Err("optimizer base url is not configured".to_string());
        }
        if let Some(index) = image_index {
            system_prompt.push_str(&format!(
                "\nThis is image {} of a multi-image batch; produce an independent variation \
                 that differs from the other images.",
                index + 1
            ));
        }

        let body = serde_json::json!({
            "model": config.model,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": input },
            ],
            "temperature": 0.8,
        });

        let api_key = config.api_key.clone();
        let response = tokio::time::timeout(
            CALL_TIMEOUT,
            self.request_with_docker_retry(&config.base_url, |base| {
                let request = self.client.post(chat_url(base)).json(&body);
                if api_key.is_empty() {
                    request
                } else {
                    request.header("Authorization", format!("Bearer {api_key}"))
                }
            }),
        )
        .await
        .map_err(|_| "optimizer call timed out".to_string())?
        .map_err(|err| err.to_string())?;

        let status = response.status().as_u16();
        let text = response.text().await.map_err(|err| err.to_string())?;
        if !(200..300).contains(&status) {
            return Err(format!("upstream status {status}: {}", truncate(&text, 200)));
        }
        let value: serde_json::Value =
            serde_json::from_str(&text).map_err(|err| err.to_string())?;
        value
            .pointer("/choices/0/message/content")
            .and_then(|content| content.as_str())
            .map(|content| content.to_string())
            .ok_or_else(|| "optimizer response had no content".to_string())
    }

    /// One retry through `host.docker.internal` when a localhost endpoint
    /// refuses the connection (the gateway may be inside a container while
    /// the LLM runs on the host).
    async fn request_with_docker_retry<F>(
        &self,
        base: &str,
        build: F,
    ) -> Result<wreq::Response, String>
    where
        F: Fn(&str) -> wreq::RequestBuilder,
    {
        match build(base).send().await {
            Ok(response) => Ok(response),
            Err(err) => {
                let message = err.to_string();
                if is_connection_refused(&message)
                    && let Some(fallback) = docker_internal_base(base)
                {
                    self.logger.info(
                        MODULE,
                        "localhost refused, retrying via host.docker.internal",
                    );
                    return build(&fallback).send().await.map_err(|e| e.to_string());
                }
                Err(message)
            }
        }
    }
}

fn translate_system_prompt(config: &PromptOptimizerConfig) -> String {
    config
        .translate_prompt
        .clone()
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_TRANSLATE_PROMPT.to_string())
}

fn expand_system_prompt(config: &PromptOptimizerConfig) -> String {
    config
        .expand_prompt
        .clone()
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_EXPAND_PROMPT.to_string())
}

/// English-likeness heuristic: at least 70% of bytes are ASCII.
pub fn is_english_like(text: &str) -> bool {
    if text.is_empty() {
        return true;
    }
    let ascii = text.bytes().filter(|byte| byte.is_ascii()).count();
    ascii * 10 >= text.len() * 7
}

/// Remove Markdown formatting LLMs like to wrap prompts in.
pub fn strip_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        let trimmed = line.trim_start();
        let without_bullet = trimmed
            .strip_prefix("- ")
            .or_else(|| trimmed.strip_prefix("* "))
            .unwrap_or(trimmed);
        let without_heading = without_bullet.trim_start_matches('#').trim_start();
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(without_heading);
    }
    out.replace("**", "")
        .replace("__", "")
        .replace('`', "")
        .trim()
        .to_string()
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}

/// Derive the chat-completions URL from a base that may already include the
/// full path, a `/v1` suffix, or neither.
pub fn chat_url(base: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.ends_with("/v1/chat/completions") {
        base.to_string()
    } else if base.ends_with("/v1") {
        format!("{base}/chat/completions")
    } else {
        format!("{base}/v1/chat/completions")
    }
}

fn models_url(base: &str) -> String {
    let base = base.trim_end_matches('/');
    if let Some(stripped) = base.strip_suffix("/chat/completions") {
        return format!("{stripped}/models");
    }
    if base.ends_with("/v1") {
        format!("{base}/models")
    } else {
        format!("{base}/v1/models")
    }
}

fn is_connection_refused(message: &str) -> bool {
    let lowered = message.to_lowercase();
    lowered.contains("connection refused") || lowered.contains("connect error")
}

fn docker_internal_base(base: &str) -> Option<String> {
    if base.contains("localhost") {
        Some(base.replace("localhost", "host.docker.internal"))
    } else if base.contains("127.0.0.1") {
        Some(base.replace("127.0.0.1", "host.docker.internal"))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn english_heuristic_uses_byte_ratio() {
        assert!(is_english_like("a cat in the rain"));
        assert!(!is_english_like("一只在雨中的猫"));
        assert!(is_english_like(""));
    }

    #[test]
    fn markdown_stripping_removes_emphasis_and_bullets() {
        let input = "## Scene\n**A cat**, `cinematic`\n- soft light\n* rim light";
        let stripped = strip_markdown(input);
        assert_eq!(stripped, "Scene\nA cat, cinematic\nsoft light\nrim light");
    }

    #[test]
    fn chat_url_handles_all_base_shapes() {
        assert_eq!(
            chat_url("http://localhost:8000"),
            "http://localhost:8000/v1/chat/completions"
        );
        assert_eq!(
            chat_url("http://localhost:8000/v1/"),
            "http://localhost:8000/v1/chat/completions"
        );
        assert_eq!(
            chat_url("http://localhost:8000/v1/chat/completions"),
            "http://localhost:8000/v1/chat/completions"
        );
    }

    #[test]
    fn docker_fallback_only_applies_to_loopback() {
        assert_eq!(
            docker_internal_base("http://localhost:11434").as_deref(),
            Some("http://host.docker.internal:11434")
        );
        assert_eq!(
            docker_internal_base("http://127.0.0.1:11434").as_deref(),
            Some("http://host.docker.internal:11434")
        );
        assert!(docker_internal_base("https://api.example.com").is_none());
    }
}
