use std::fmt;
use std::time::Duration;

use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE, RETRY_AFTER, USER_AGENT};
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, error};

use super::{Request, Response, Sender, TransportError};
use crate::config::Config;

const RATE_LIMITS_HEADER: &str = "x-sentry-rate-limits";
const SENTRY_ERROR_HEADER: &str = "x-sentry-error";
const AUTH_HEADER: &str = "x-sentry-auth";

#[must_use]
pub fn get_client(config: &Config) -> reqwest::Client {
    match build_client(config) {
        Ok(client) => client,
        Err(e) => {
            error!(
                "TRANSPORT | Unable to parse proxy configuration: {}, no proxy will be used",
                e
            );
            reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(config.connect_timeout))
                .timeout(Duration::from_secs(config.timeout))
                .build()
                .unwrap_or_default()
        }
    }
}

fn build_client(config: &Config) -> Result<reqwest::Client, reqwest::Error> {
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(config.connect_timeout))
        .timeout(Duration::from_secs(config.timeout));
    // Covers SENTRY_HTTPS_PROXY and HTTPS_PROXY
    if let Some(https_uri) = &config.https_proxy {
        let proxy = reqwest::Proxy::https(https_uri.clone())?;
        client.proxy(proxy).build()
    } else {
        client.build()
    }
}

/// Blocking sender: drives an async `reqwest` client on a private runtime so
/// callers on plain threads can wait for the response.
pub struct HttpSender {
    client: reqwest::Client,
    runtime: Option<Runtime>,
}

impl fmt::Debug for HttpSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpSender")
            .field("runtime", &self.runtime.is_some())
            .finish_non_exhaustive()
    }
}

impl HttpSender {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("pigeon-http")
            .enable_all()
            .build();
        let runtime = match runtime {
            Ok(runtime) => Some(runtime),
            Err(e) => {
                error!("TRANSPORT | Failed to start HTTP runtime, envelopes will be dropped: {e}");
                None
            }
        };
        HttpSender {
            client: get_client(config),
            runtime,
        }
    }

    async fn post(client: reqwest::Client, request: Request) -> Result<Response, TransportError> {
        let mut req = client
            .post(&request.url)
            .header(AUTH_HEADER, request.auth)
            .header(USER_AGENT, request.user_agent)
            .header(CONTENT_TYPE, "application/x-sentry-envelope");
        if let Some(encoding) = request.content_encoding {
            req = req.header(CONTENT_ENCODING, encoding);
        }

        let resp = req
            .body(request.body)
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let header = |name: &str| {
            resp.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let response = Response {
            status: resp.status().as_u16(),
            rate_limits: header(RATE_LIMITS_HEADER),
            retry_after: header(RETRY_AFTER.as_str()),
            sentry_error: header(SENTRY_ERROR_HEADER),
        };
        // Drain the body so the connection can be reused.
        let _ = resp.bytes().await;
        debug!("TRANSPORT | Collector responded with {}", response.status);
        Ok(response)
    }
}

impl Sender for HttpSender {
    fn send(&self, request: Request) -> Result<Response, TransportError> {
        let Some(runtime) = self.runtime.as_ref() else {
            return Err(TransportError::Request("HTTP runtime unavailable".to_string()));
        };
        let future = Self::post(self.client.clone(), request);
        if Handle::try_current().is_ok() {
            // block_on cannot nest inside another runtime's thread
            std::thread::scope(|scope| {
                scope
                    .spawn(|| runtime.block_on(future))
                    .join()
                    .unwrap_or_else(|_| {
                        Err(TransportError::Request("HTTP send thread panicked".to_string()))
                    })
            })
        } else {
            runtime.block_on(future)
        }
    }
}

impl Drop for HttpSender {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
