use crate::document::RuntimeConfig;

/// Apply the environment allowlist on top of the loaded document.
/// Environment beats the document, which beats compiled defaults.
/// Returns true when anything changed.
pub fn apply(config: &mut RuntimeConfig) -> bool {
    apply_from(config, |name| std::env::var(name).ok())
}

pub(crate) fn apply_from<F>(config: &mut RuntimeConfig, get: F) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    let mut changed = false;

    if let Some(port) = get("PORT").and_then(|value| value.trim().parse::<u16>().ok())
        && config.system.port != port
    {
        config.system.port = port;
        changed = true;
    }

    let optimizer = &mut config.prompt_optimizer;
    for (name, field) in [
        ("PROMPT_OPTIMIZER_BASE_URL", &mut optimizer.base_url),
        ("PROMPT_OPTIMIZER_API_KEY", &mut optimizer.api_key),
        ("PROMPT_OPTIMIZER_MODEL", &mut optimizer.model),
    ] {
        if let Some(value) = get(name) {
            let value = value.trim().to_string();
            if !value.is_empty() && *field != value {
                *field = value;
                changed = true;
            }
        }
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_beats_document() {
        let mut config = RuntimeConfig::default();
        config.system.port = 3000;
        let changed = apply_from(&mut config, |name| match name {
            "PORT" => Some("9090".to_string()),
            "PROMPT_OPTIMIZER_MODEL" => Some("gpt-4o-mini".to_string()),
            _ => None,
        });
        assert!(changed);
        assert_eq!(config.system.port, 9090);
        assert_eq!(config.prompt_optimizer.model, "gpt-4o-mini");
    }

    #[test]
    fn absent_env_leaves_document_alone() {
        let mut config = RuntimeConfig::default();
        config.system.port = 8080;
        let changed = apply_from(&mut config, |_| None);
        assert!(!changed);
        assert_eq!(config.system.port, 8080);
    }

    #[test]
    fn malformed_port_is_ignored() {
        let mut config = RuntimeConfig::default();
        let changed = apply_from(&mut config, |name| {
            (name == "PORT").then(|| "not-a-port".to_string())
        });
        assert!(!changed);
        assert_eq!(config.system.port, 3000);
    }
}
