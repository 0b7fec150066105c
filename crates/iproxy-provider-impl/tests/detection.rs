use iproxy_provider_impl::builtin_registry;

#[test]
fn credential_shapes_map_to_their_providers() {
    let registry = builtin_registry();

    let cases = [
        ("hf_abcdefghijklmnop", "HuggingFace"),
        ("ms-0f31a2bc-77aa-4f21-9c1b-aaaa00bb11cc", "ModelScope"),
        ("0a1b2c3d-4e5f-6071-8293-a4b5c6d7e8f9", "Doubao"),
        (
            "N0QHXPDL8S1M2K3J4H5G6F7D8S9A0PLMOKNIJB",
            "Gitee",
        ),
        ("pk_abcdef123456", "Pollinations"),
        ("sk_abcdef123456", "Pollinations"),
    ];
    for (credential, expected) in cases {
        let detected = registry
            .detect_provider(credential)
            .unwrap_or_else(|| panic!("no provider for {credential}"));
        assert_eq!(detected.name(), expected, "credential {credential}");
    }

    assert!(registry.detect_provider("short").is_none());
    assert!(!registry.is_recognized_api_key("sk-openai-style-key"));
}

#[test]
fn ambiguous_hex_shapes_resolve_deterministically() {
    let registry = builtin_registry();

    // Canonical UUID: hyphens rule out the Gitee shape entirely.
    let detected = registry
        .detect_provider("0a1b2c3d-4e5f-6071-8293-a4b5c6d7e8f9")
        .unwrap();
    assert_eq!(detected.name(), "Doubao");

    // Bare 32-hex falls through to the broad Gitee alphanumeric shape.
    let detected = registry
        .detect_provider("0a1b2c3d4e5f60718293a4b5c6d7e8f9")
        .unwrap();
    assert_eq!(detected.name(), "Gitee");
}

#[test]
fn model_lookup_finds_unique_owner() {
    let registry = builtin_registry();
    let provider = registry
        .provider_by_model("doubao-seedream-4-5-251128", |_| true)
        .unwrap();
    assert_eq!(provider.name(), "Doubao");

    let provider = registry.provider_by_model("z-image-turbo", |_| true).unwrap();
    assert_eq!(provider.name(), "HuggingFace");

    assert!(registry.provider_by_model("no-such-model", |_| true).is_none());
}
