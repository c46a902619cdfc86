use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use log::{debug, info};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use tokio::time::timeout;

use crate::config::{AppCredentials, HarvesterConfig};
use crate::credentials::AccessToken;

use super::framing::decode_stream;
use super::oauth::{Nonce, authorization_header};
use super::source::{EventStream, StreamConnector};

/// Keep-alives arrive every ~30s; three missed ones means the
/// connection is dead even if the socket is still open.
const STALL_TIMEOUT: Duration = Duration::from_secs(90);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Bound on the wait for response headers; the body is covered by
/// `STALL_TIMEOUT` once they arrive.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Location-filtered statuses stream.
///
/// One HTTP client is shared by every worker; each `connect` opens an
/// independent long-lived request.
pub struct FilterStream {
    client: reqwest::Client,
    endpoint: String,
    app: AppCredentials,
    response_timeout: Duration,
}

impl FilterStream {
    pub fn new(endpoint: impl Into<String>, app: AppCredentials) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("geotweet-harvester/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            app,
            response_timeout: RESPONSE_TIMEOUT,
        })
    }

    #[cfg(test)]
    fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }
}

#[async_trait::async_trait]
impl StreamConnector for FilterStream {
    fn name(&self) -> &'static str {
        "statuses/filter"
    }

    async fn connect(
        &self,
        config: &HarvesterConfig,
        token: &AccessToken,
    ) -> anyhow::Result<EventStream> {
        let locations = config.bounding_box.to_locations();
        let params = vec![("locations".to_string(), locations.clone())];

        let auth = authorization_header(
            "POST",
            &self.endpoint,
            &params,
            &self.app,
            token,
            &Nonce::fresh(),
        )?;

        debug!("[{}] opening {} locations={}", config.label, self.endpoint, locations);

        let request = self
            .client
            .post(&self.endpoint)
            .header(AUTHORIZATION, auth)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(format!("locations={}", urlencoding::encode(&locations)))
            .send();

        let response = timeout(self.response_timeout, request)
            .await
            .map_err(|_| {
                anyhow!(
                    "[{}] no response within {:?}",
                    config.label,
                    self.response_timeout
                )
            })?
            .with_context(|| format!("[{}] stream request failed", config.label))?;

        let status = response.status();
        if !status.is_success() {
            let body = timeout(self.response_timeout, response.text())
                .await
                .ok()
                .and_then(Result::ok)
                .unwrap_or_default();
            bail!(
                "[{}] stream rejected with {}: {}",
                config.label,
                status,
                body.trim()
            );
        }

        info!("[{}] stream connected ({})", config.label, status);

        Ok(decode_stream(response.bytes_stream(), STALL_TIMEOUT))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use rustls::crypto::{CryptoProvider, ring};
    use tokio::net::TcpListener;

    use super::*;
    use crate::testing::{app, harvester, token};

    #[tokio::test]
    async fn silent_server_times_out_before_headers() {
        let _ = CryptoProvider::install_default(ring::default_provider());

        // accepts connections, reads nothing, answers nothing
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let stream = FilterStream::new(format!("http://{addr}/stream.json"), app())
            .unwrap()
            .with_response_timeout(Duration::from_millis(200));

        let started = Instant::now();
        let result = tokio::time::timeout(
            Duration::from_secs(10),
            stream.connect(&harvester(1), &token()),
        )
        .await
        .expect("connect must give up on its own");

        let err = result.err().unwrap();
        assert!(err.to_string().contains("no response"), "{err:#}");
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
