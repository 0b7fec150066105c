use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;

use iproxy_logging::{LogLevel, Logger};
use iproxy_storage::{ArtifactMetadata, ArtifactStore};

fn metadata(prompt: &str) -> ArtifactMetadata {
    ArtifactMetadata {
        prompt: prompt.to_string(),
        model: "test/model-x".to_string(),
        seed: 7,
        params: serde_json::json!({"task": "text"}),
        timestamp: 0,
    }
}

fn tiny_png_b64() -> String {
    let img = image::RgbaImage::from_pixel(2, 2, image::Rgba([0, 128, 255, 255]));
    let mut out = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    B64.encode(out.into_inner())
}

fn tiny_webp_b64() -> String {
    let img = image::RgbaImage::from_pixel(2, 2, image::Rgba([255, 0, 0, 255]));
    let mut out = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut out, image::ImageFormat::WebP)
        .unwrap();
    B64.encode(out.into_inner())
}

#[tokio::test]
async fn save_writes_image_and_matching_sidecar() {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::new(dir.path().to_path_buf(), Logger::silent(LogLevel::Error));

    let filename = store
        .save_image(&tiny_png_b64(), metadata("a red cat"), "png", None, None)
        .await
        .unwrap();
    assert!(filename.ends_with(".png"));
    assert!(dir.path().join(&filename).exists());

    let sidecar = dir.path().join(format!("{filename}.json"));
    let raw = std::fs::read(sidecar).unwrap();
    let parsed: ArtifactMetadata = serde_json::from_slice(&raw).unwrap();
    assert_eq!(parsed.prompt, "a red cat");
    assert!(parsed.timestamp > 0);
}

#[tokio::test]
async fn webp_payloads_land_as_png() {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::new(dir.path().to_path_buf(), Logger::silent(LogLevel::Error));

    let filename = store
        .save_image(&tiny_webp_b64(), metadata("winter scene"), "webp", None, None)
        .await
        .unwrap();
    assert!(filename.ends_with(".png"));

    let bytes = std::fs::read(dir.path().join(&filename)).unwrap();
    assert_eq!(
        iproxy_image::ImageFormat::detect(&bytes),
        Some(iproxy_image::ImageFormat::Png)
    );
}

#[tokio::test]
async fn listing_pairs_sidecars_and_sorts_newest_first() {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::new(dir.path().to_path_buf(), Logger::silent(LogLevel::Error));

    let first = store
        .save_image(&tiny_png_b64(), metadata("first"), "png", Some(0), None)
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = store
        .save_image(&tiny_png_b64(), metadata("second"), "png", Some(1), None)
        .await
        .unwrap();

    // Orphan sidecar without an image file must not appear.
    std::fs::write(dir.path().join("orphan.png.json"), b"{}").unwrap();

    let records = store.list_images(None).await;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].filename, second);
    assert_eq!(records[1].filename, first);
    assert!(records[0].url.starts_with("/storage/"));
}

#[tokio::test]
async fn legacy_pairs_are_recognized() {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::new(dir.path().to_path_buf(), Logger::silent(LogLevel::Error));

    let image = B64.decode(tiny_png_b64()).unwrap();
    std::fs::write(dir.path().join("1700000000000_abc.png"), &image).unwrap();
    std::fs::write(
        dir.path().join("1700000000000_abc.json"),
        serde_json::to_vec(&metadata("legacy")).unwrap(),
    )
    .unwrap();

    let records = store.list_images(Some("https://cdn.example")).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].filename, "1700000000000_abc.png");
    assert_eq!(records[0].url, "https://cdn.example/1700000000000_abc.png");
}

#[tokio::test]
async fn delete_removes_both_files_and_tolerates_absence() {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::new(dir.path().to_path_buf(), Logger::silent(LogLevel::Error));

    let filename = store
        .save_image(&tiny_png_b64(), metadata("to delete"), "png", None, None)
        .await
        .unwrap();

    let removed = store
        .delete_images(&[filename.clone(), "missing.png".to_string()], None)
        .await;
    assert_eq!(removed.len(), 2);
    assert!(!dir.path().join(&filename).exists());
    assert!(!dir.path().join(format!("{filename}.json")).exists());
}
