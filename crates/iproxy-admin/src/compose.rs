use std::path::Path;

use iproxy_logging::Logger;

/// Best-effort rewrite of the `docker-compose.yml` port mapping when the
/// admin changes the gateway port, so the next container start matches.
pub(crate) async fn rewrite_compose_port(
    compose_path: &Path,
    old_port: u16,
    new_port: u16,
    logger: &Logger,
) {
    if old_port == new_port {
        return;
    }
    let Ok(content) = tokio::fs::read_to_string(compose_path).await else {
        return;
    };
    let old_mapping = format!("\"{old_port}:{old_port}\"");
    let new_mapping = format!("\"{new_port}:{new_port}\"");
    if !content.contains(&old_mapping) {
        return;
    }
    let rewritten = content.replace(&old_mapping, &new_mapping);
    match tokio::fs::write(compose_path, rewritten).await {
        Ok(()) => logger.info(
            "Admin",
            format!("docker-compose.yml port updated to {new_port}"),
        ),
        Err(err) => logger.error("Admin", format!("docker-compose.yml rewrite failed: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iproxy_logging::LogLevel;

    #[tokio::test]
    async fn port_mapping_line_is_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docker-compose.yml");
        std::fs::write(
            &path,
            "services:\n  iproxy:\n    ports:\n      - \"3000:3000\"\n",
        )
        .unwrap();

        rewrite_compose_port(&path, 3000, 8080, &Logger::silent(LogLevel::Error)).await;
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"8080:8080\""));
        assert!(!content.contains("3000"));
    }

    #[tokio::test]
    async fn absent_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docker-compose.yml");
        rewrite_compose_port(&path, 3000, 8080, &Logger::silent(LogLevel::Error)).await;
        assert!(!path.exists());
    }
}
