use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use time::macros::format_description;

use iproxy_common::BEIJING_OFFSET;
use iproxy_config::S3Config;
use iproxy_image::webp_to_png;
use iproxy_logging::Logger;

use crate::s3::S3Mirror;

const MODULE: &str = "Storage";
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp"];

/// Sidecar content written next to every image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub prompt: String,
    pub model: String,
    pub seed: i64,
    #[serde(default)]
    pub params: JsonValue,
    /// Epoch ms at save time; matches the filename's minute component.
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRecord {
    pub filename: String,
    pub url: String,
    pub metadata: ArtifactMetadata,
}

/// Flat-directory artifact store.
pub struct ArtifactStore {
    dir: PathBuf,
    logger: Logger,
}

impl ArtifactStore {
    pub fn new(dir: PathBuf, logger: Logger) -> Self {
        Self { dir, logger }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write image + sidecar; mirror both to S3 when configured. Returns the
    /// stored filename, or `None` when the local write failed.
    pub async fn save_image(
        &self,
        base64_payload: &str,
        mut metadata: ArtifactMetadata,
        extension: &str,
        index: Option<usize>,
        s3: Option<&S3Config>,
    ) -> Option<String> {
        let mut bytes = match B64.decode(base64_payload.as_bytes()) {
            Ok(bytes) => bytes,
            Err(err) => {
                self.logger
                    .error(MODULE, format!("artifact decode failed: {err}"));
                return None;
            }
        };

        // WebP payloads are normalized to PNG before hitting disk.
        let mut extension = extension.trim_start_matches('.').to_lowercase();
        if extension == "webp" {
            match webp_to_png(&bytes) {
                Ok(png) => {
                    bytes = png;
                    extension = "png".to_string();
                }
                Err(err) => {
                    self.logger
                        .error(MODULE, format!("webp convert failed, keeping webp: {err}"));
                }
            }
        }

        // One clock read: the sidecar timestamp must match the filename's
        // minute component.
        let now = time::OffsetDateTime::now_utc().to_offset(BEIJING_OFFSET);
        metadata.timestamp = (now.unix_timestamp_nanos() / 1_000_000) as i64;
        let filename = build_filename(&now, &metadata.model, &metadata.prompt, metadata.seed, index, &extension);
        let sidecar_name = format!("{filename}.json");

        if let Err(err) = tokio::fs::create_dir_all(&self.dir).await {
            self.logger
                .error(MODULE, format!("storage dir create failed: {err}"));
            return None;
        }
        let sidecar_bytes = match serde_json::to_vec_pretty(&metadata) {
            Ok(bytes) => bytes,
            Err(err) => {
                self.logger
                    .error(MODULE, format!("sidecar serialize failed: {err}"));
                return None;
            }
        };

        if let Err(err) = tokio::fs::write(self.dir.join(&filename), &bytes).await {
            self.logger
                .error(MODULE, format!("artifact write failed: {err}"));
            return None;
        }
        if let Err(err) = tokio::fs::write(self.dir.join(&sidecar_name), &sidecar_bytes).await {
            self.logger
                .error(MODULE, format!("sidecar write failed: {err}"));
        }

        if let Some(mirror) = s3.and_then(S3Mirror::from_config) {
            let content_type = format!("image/{}", if extension == "jpg" { "jpeg" } else { &extension });
            let (image_result, sidecar_result) = tokio::join!(
                mirror.put(&filename, bytes.clone(), &content_type),
                mirror.put(&sidecar_name, sidecar_bytes.clone(), "application/json"),
            );
            for result in [image_result, sidecar_result] {
                if let Err(err) = result {
                    self.logger.error(MODULE, format!("s3 mirror failed: {err}"));
                }
            }
        }

        self.logger
            .debug(MODULE, format!("artifact saved: {filename}"));
        Some(filename)
    }

    /// Scan sidecars and pair each with its image file. Tolerates both the
    /// `<full-name>.<ext>.json` scheme and legacy `<stamp>_<id>.json` next
    /// to `<stamp>_<id>.png`. Sorted newest first.
    pub async fn list_images(&self, public_url: Option<&str>) -> Vec<ArtifactRecord> {
        let mut records = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await else {
            return records;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let sidecar_name = entry.file_name().to_string_lossy().into_owned();
            let Some(base) = sidecar_name.strip_suffix(".json") else {
                continue;
            };
            let Some(image_name) = self.pair_image(base).await else {
                continue;
            };
            let Ok(raw) = tokio::fs::read(entry.path()).await else {
                continue;
            };
            let Ok(metadata) = serde_json::from_slice::<ArtifactMetadata>(&raw) else {
                continue;
            };
            let url = match public_url {
                Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), image_name),
                None => format!("/storage/{image_name}"),
            };
            records.push(ArtifactRecord {
                filename: image_name,
                url,
                metadata,
            });
        }
        records.sort_by(|a, b| b.metadata.timestamp.cmp(&a.metadata.timestamp));
        records
    }

    async fn pair_image(&self, base: &str) -> Option<String> {
        // New scheme: the sidecar basename already carries the extension.
        if IMAGE_EXTENSIONS
            .iter()
            .any(|ext| base.to_lowercase().ends_with(&format!(".{ext}")))
        {
            if tokio::fs::try_exists(self.dir.join(base)).await.unwrap_or(false) {
                return Some(base.to_string());
            }
            return None;
        }
        // Legacy scheme: `<stamp>_<id>.json` next to `<stamp>_<id>.<ext>`.
        for ext in IMAGE_EXTENSIONS {
            let candidate = format!("{base}.{ext}");
            if tokio::fs::try_exists(self.dir.join(&candidate))
                .await
                .unwrap_or(false)
            {
                return Some(candidate);
            }
        }
        None
    }

    /// Best-effort delete of images and their sidecars; S3 copies removed
    /// when configured. Absent files count as removed.
    pub async fn delete_images(
        &self,
        filenames: &[String],
        s3: Option<&S3Config>,
    ) -> Vec<String> {
        let mirror = s3.and_then(S3Mirror::from_config);
        let mut removed = Vec::new();
        for filename in filenames {
            // Containment: never step outside the storage dir.
            if filename.contains('/') || filename.contains("..") {
                continue;
            }
            let _ = tokio::fs::remove_file(self.dir.join(filename)).await;
            let sidecar = format!("{filename}.json");
            if tokio::fs::remove_file(self.dir.join(&sidecar)).await.is_err() {
                // Legacy sidecar shares the basename without the extension.
                if let Some(stem) = filename.rsplit_once('.').map(|(stem, _)| stem) {
                    let _ = tokio::fs::remove_file(self.dir.join(format!("{stem}.json"))).await;
                }
            }
            if let Some(mirror) = &mirror {
                let _ = mirror.delete(filename).await;
                let _ = mirror.delete(&sidecar).await;
            }
            removed.push(filename.clone());
        }
        removed
    }
}

/// `YYYY-MM-DD HH-mm <modelTail>-<promptSlug20>-<seed>.<ext>`
fn build_filename(
    now: &time::OffsetDateTime,
    model: &str,
    prompt: &str,
    seed: i64,
    index: Option<usize>,
    extension: &str,
) -> String {
    let fmt = format_description!("[year]-[month]-[day] [hour]-[minute]");
    let stamp = now.format(&fmt).unwrap_or_default();
    let model_tail = slug(model.rsplit('/').next().unwrap_or(model), 40);
    let prompt_slug = slug(prompt, 20);
    match index {
        Some(index) => format!("{stamp} {model_tail}-{prompt_slug}-{seed}-{index}.{extension}"),
        None => format!("{stamp} {model_tail}-{prompt_slug}-{seed}.{extension}"),
    }
}

fn slug(value: &str, max_chars: usize) -> String {
    value
        .chars()
        .take(max_chars)
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_grammar() {
        let now = time::macros::datetime!(2026-03-01 14:30:00 +8:00);
        let name = build_filename(
            &now,
            "black-forest-labs/FLUX.1-schnell",
            "a cat riding a bike through town",
            42,
            None,
            "png",
        );
        assert!(name.starts_with("2026-03-01 14-30 "));
        assert!(name.ends_with("-42.png"));
        assert!(name.contains("FLUX-1-schnell"));
        assert!(name.contains("a-cat-riding-a-bike-"));
    }

    #[test]
    fn slug_replaces_non_alphanumerics_and_truncates() {
        assert_eq!(slug("hello, world! 123", 20), "hello--world--123");
        assert_eq!(slug("abcdefghijklmnopqrstuvwxyz", 20).len(), 20);
    }
}
