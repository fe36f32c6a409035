use std::time::Duration;

use reqwest::Client;

const DISABLE_SYSTEM_PROXY_ENV: &str = "CHATRELAY_DISABLE_SYSTEM_PROXY";

/// Billing calls must not materially add to perceived latency, so the
/// default timeout is short.
pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

pub(crate) fn build_http_client(timeout: Duration) -> Client {
    let mut builder = Client::builder().timeout(timeout);
    if should_disable_system_proxy() {
        builder = builder.no_proxy();
    }
    builder.build().expect("Failed to build reqwest client")
}

fn should_disable_system_proxy() -> bool {
    if std::env::var_os(DISABLE_SYSTEM_PROXY_ENV).is_some() {
        return true;
    }

    cfg!(test)
}
