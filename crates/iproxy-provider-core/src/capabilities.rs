use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Url,
    B64Json,
}

/// Static capability sheet a provider declares once.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCapabilities {
    pub text_to_image: bool,
    pub image_to_image: bool,
    pub multi_image_fusion: bool,
    pub async_task: bool,
    pub max_input_images: u32,
    pub max_output_images: u32,
    pub max_edit_output_images: u32,
    pub max_blend_output_images: u32,
    /// How many images one upstream call can return. 1 forces the engine to
    /// fan out `n` parallel single-image calls.
    pub max_native_output_images: u32,
    pub output_formats: &'static [OutputFormat],
}

impl ProviderCapabilities {
    pub fn max_for_task(&self, task: iproxy_common::TaskKind) -> u32 {
        match task {
            iproxy_common::TaskKind::Text => self.max_output_images,
            iproxy_common::TaskKind::Edit => self.max_edit_output_images,
            iproxy_common::TaskKind::Blend => self.max_blend_output_images,
        }
    }
}

/// Static identity + defaults for one adapter.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDescriptor {
    pub name: &'static str,
    pub capabilities: ProviderCapabilities,
    pub default_model: &'static str,
    pub default_edit_model: Option<&'static str>,
    pub default_size: &'static str,
    pub models: &'static [&'static str],
    pub edit_models: &'static [&'static str],
}

impl ProviderDescriptor {
    pub fn supports_model(&self, model: &str) -> bool {
        self.models.contains(&model) || self.edit_models.contains(&model)
    }

    pub fn all_models(&self) -> Vec<String> {
        let mut models: Vec<String> = self.models.iter().map(|m| m.to_string()).collect();
        for model in self.edit_models {
            if !models.iter().any(|existing| existing == model) {
                models.push(model.to_string());
            }
        }
        models
    }
}
