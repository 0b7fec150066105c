//! Weighted cascade plan for backend mode: an ordered list of
//! `(provider, model)` steps the engine executes with fail-over.

use iproxy_common::TaskKind;
use iproxy_config::RuntimeConfig;
use iproxy_provider_core::ProviderRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanStep {
    pub provider: String,
    pub model: Option<String>,
    pub weight: i64,
}

/// Enumerate enabled providers declaring the task capability, resolve each
/// one's effective model, and order by weight (higher first) with ties broken
/// by declaration order.
pub fn build_plan(
    config: &RuntimeConfig,
    registry: &ProviderRegistry,
    task: TaskKind,
    requested_model: Option<&str>,
) -> Vec<PlanStep> {
    let mut steps = Vec::new();
    for provider in registry.iter() {
        let name = provider.name();
        let settings = config.provider(name);
        if let Some(settings) = settings
            && !settings.is_enabled()
        {
            continue;
        }

        let caps = &provider.descriptor().capabilities;
        let supported = match task {
            TaskKind::Text => caps.text_to_image,
            TaskKind::Edit => caps.image_to_image,
            TaskKind::Blend => caps.multi_image_fusion,
        };
        if !supported {
            continue;
        }

        let defaults = config.task_defaults(name, task);
        let model = match requested_model {
            Some(requested) if provider.descriptor().supports_model(requested) => {
                Some(requested.to_string())
            }
            // Redirect candidate: keep the provider with its own model.
            _ => defaults
                .and_then(|d| d.model.clone())
                .or_else(|| Some(provider.descriptor().default_model.to_string())),
        };
        let weight = defaults.and_then(|d| d.weight).unwrap_or(0);
        steps.push(PlanStep {
            provider: name.to_string(),
            model,
            weight,
        });
    }

    // Stable sort preserves declaration order inside equal weights.
    steps.sort_by_key(|step| std::cmp::Reverse(step.weight));
    steps
}

#[cfg(test)]
mod tests {
    use iproxy_config::TaskDefaults;
    use iproxy_provider_impl::builtin_registry;

    use super::*;

    fn config_with_weights(weights: &[(&str, i64)]) -> RuntimeConfig {
        let mut config = RuntimeConfig::default();
        for (provider, weight) in weights {
            let defaults = TaskDefaults {
                weight: Some(*weight),
                ..TaskDefaults::default()
            };
            config
                .providers
                .entry(provider.to_string())
                .or_default()
                .text = Some(defaults);
        }
        config
    }

    #[test]
    fn higher_weight_comes_first() {
        let registry = builtin_registry();
        let config = config_with_weights(&[("Doubao", 10), ("Pollinations", 5)]);
        let plan = build_plan(&config, &registry, TaskKind::Text, None);
        assert!(plan.len() >= 2);
        assert_eq!(plan[0].provider, "Doubao");
        assert_eq!(plan[1].provider, "Pollinations");
    }

    #[test]
    fn ties_follow_declaration_order() {
        let registry = builtin_registry();
        let config = RuntimeConfig::default();
        let plan = build_plan(&config, &registry, TaskKind::Text, None);
        let names: Vec<&str> = plan.iter().map(|step| step.provider.as_str()).collect();
        assert_eq!(
            names,
            vec!["HuggingFace", "ModelScope", "Doubao", "Gitee", "Pollinations"]
        );
    }

    #[test]
    fn disabled_providers_are_skipped() {
        let registry = builtin_registry();
        let mut config = RuntimeConfig::default();
        config
            .providers
            .entry("Doubao".to_string())
            .or_default()
            .enabled = Some(false);
        let plan = build_plan(&config, &registry, TaskKind::Text, None);
        assert!(plan.iter().all(|step| step.provider != "Doubao"));
    }

    #[test]
    fn requested_model_is_honored_where_listed() {
        let registry = builtin_registry();
        let config = config_with_weights(&[("Doubao", 10)]);
        let plan = build_plan(
            &config,
            &registry,
            TaskKind::Text,
            Some("doubao-seedream-4-5-251128"),
        );
        let doubao = plan.iter().find(|step| step.provider == "Doubao").unwrap();
        assert_eq!(
            doubao.model.as_deref(),
            Some("doubao-seedream-4-5-251128")
        );
        // Providers that do not list the model keep their own default.
        let pollinations = plan
            .iter()
            .find(|step| step.provider == "Pollinations")
            .unwrap();
        assert_eq!(pollinations.model.as_deref(), Some("flux"));
    }

    #[test]
    fn blend_plan_only_contains_fusion_capable_providers() {
        let registry = builtin_registry();
        let plan = build_plan(&RuntimeConfig::default(), &registry, TaskKind::Blend, None);
        let names: Vec<&str> = plan.iter().map(|step| step.provider.as_str()).collect();
        assert_eq!(names, vec!["Doubao", "Pollinations"]);
    }
}
