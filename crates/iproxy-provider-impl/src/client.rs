use std::sync::OnceLock;

static SHARED_CLIENT: OnceLock<wreq::Client> = OnceLock::new();

/// One shared HTTP client for all upstream calls. Per-call deadlines come
/// from `GenerateOptions::timeout`, not the client.
pub fn shared_client() -> &'static wreq::Client {
    SHARED_CLIENT.get_or_init(wreq::Client::new)
}
