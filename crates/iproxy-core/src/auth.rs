use std::sync::Arc;

use iproxy_common::{ErrorKind, GatewayError};
use iproxy_config::RuntimeConfig;
use iproxy_provider_core::{ImageProvider, ProviderRegistry};

/// Which path a request takes after credential classification.
pub enum AuthMode {
    /// The bearer is a recognized provider credential; forward with it.
    Relay {
        provider: Arc<dyn ImageProvider>,
        credential: String,
    },
    /// Operator traffic; the gateway picks providers and credentials.
    Backend,
}

/// Stages 1–2 of the pipeline: mode gate, then credential classification.
pub fn classify_caller(
    config: &RuntimeConfig,
    registry: &ProviderRegistry,
    bearer: Option<&str>,
) -> Result<AuthMode, GatewayError> {
    let modes = config.system.modes;
    if !modes.relay && !modes.backend {
        return Err(GatewayError::simple(
            ErrorKind::ServiceDisabled,
            "service not started",
        ));
    }

    if let Some(credential) = bearer
        && let Some(provider) = registry.detect_provider(credential)
    {
        if !modes.relay {
            return Err(GatewayError::simple(
                ErrorKind::Forbidden,
                "relay mode is disabled",
            ));
        }
        return Ok(AuthMode::Relay {
            provider,
            credential: credential.to_string(),
        });
    }

    if !modes.backend {
        return Err(GatewayError::unauthorized());
    }
    if let Some(expected) = config.system.global_access_key.as_deref()
        && !expected.is_empty()
    {
        match bearer {
            Some(token) if token == expected => {}
            _ => return Err(GatewayError::unauthorized()),
        }
    }
    Ok(AuthMode::Backend)
}

#[cfg(test)]
mod tests {
    use iproxy_provider_impl::builtin_registry;

    use super::*;

    fn config(relay: bool, backend: bool, key: Option<&str>) -> RuntimeConfig {
        let mut config = RuntimeConfig::default();
        config.system.modes.relay = relay;
        config.system.modes.backend = backend;
        config.system.global_access_key = key.map(|k| k.to_string());
        config
    }

    #[test]
    fn both_modes_off_is_service_disabled() {
        let registry = builtin_registry();
        let err = classify_caller(&config(false, false, None), &registry, Some("hf_x"))
            .err()
            .unwrap();
        assert_eq!(err.kind, ErrorKind::ServiceDisabled);
    }

    #[test]
    fn detected_credential_requires_relay_mode() {
        let registry = builtin_registry();
        let mode = classify_caller(&config(true, false, None), &registry, Some("hf_token"));
        assert!(matches!(mode, Ok(AuthMode::Relay { .. })));

        let err = classify_caller(&config(false, true, None), &registry, Some("hf_token"))
            .err()
            .unwrap();
        assert_eq!(err.kind, ErrorKind::Forbidden);
    }

    #[test]
    fn backend_checks_global_access_key() {
        let registry = builtin_registry();

        let err = classify_caller(&config(false, true, Some("S")), &registry, Some("X"))
            .err()
            .unwrap();
        assert_eq!(err.kind, ErrorKind::Unauthorized);

        let mode = classify_caller(&config(false, true, Some("S")), &registry, Some("S"));
        assert!(matches!(mode, Ok(AuthMode::Backend)));

        // No key configured: any bearer (or none) is admitted.
        let mode = classify_caller(&config(false, true, None), &registry, None);
        assert!(matches!(mode, Ok(AuthMode::Backend)));
    }

    #[test]
    fn backend_mode_off_rejects_unknown_bearers() {
        let registry = builtin_registry();
        let err = classify_caller(&config(true, false, None), &registry, Some("unknown"))
            .err()
            .unwrap();
        assert_eq!(err.kind, ErrorKind::Unauthorized);
    }
}
