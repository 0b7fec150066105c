//! `/v1/models` listing: the union of every enabled provider's supported
//! models plus the static routing aliases the chat surface accepts.

use iproxy_protocol::openai::models::{ListModelsResponse, Model};

use crate::state::AppState;

/// Aliases that resolve through the weighted router instead of one adapter.
const STATIC_TEXT_MODELS: &[&str] = &["auto"];

pub fn list_models(state: &AppState) -> ListModelsResponse {
    let created = iproxy_common::epoch_ms() / 1000;
    let mut seen = std::collections::HashSet::new();
    let mut models = Vec::new();

    for alias in STATIC_TEXT_MODELS {
        if seen.insert(alias.to_string()) {
            models.push(Model::new(*alias, "iproxy", created));
        }
    }
    for provider in state.registry.iter() {
        if !state.provider_enabled(provider.name()) {
            continue;
        }
        for model in provider.supported_models() {
            if seen.insert(model.clone()) {
                models.push(Model::new(model, provider.name(), created));
            }
        }
    }
    ListModelsResponse::new(models)
}
