//! The reqwest client used by HTTP embedding backends.

use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Large embedding batches against a cold model can take minutes.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const MAX_REDIRECTS: usize = 10;

/// Client with trawl's user agent, rustls and the timeouts above.
#[must_use]
pub fn default_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(concat!("trawl/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .build()
        .expect("static reqwest configuration is valid")
}
