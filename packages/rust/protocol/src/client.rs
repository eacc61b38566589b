//! HTTP transport for service calls.

use std::time::Duration;

use assetmirror_shared::{MirrorError, Result, Session};
use futures::TryStreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response};
use tracing::debug;
use url::Url;

use crate::parser::RecordStream;
use crate::records::QueryPage;
use crate::request::ServiceRequest;

/// User-Agent string for service requests.
const USER_AGENT: &str = concat!("assetmirror/", env!("CARGO_PKG_VERSION"));

/// Posts [`ServiceRequest`]s to a single endpoint.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    http: Client,
    endpoint: Url,
}

impl ServiceClient {
    /// Build a client; `timeout` bounds each call including the body read.
    pub fn new(endpoint: Url, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| MirrorError::transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, endpoint })
    }

    /// The endpoint every request is posted to.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Call a service and return the body as text.
    pub async fn call_text(
        &self,
        request: &ServiceRequest,
        session: Option<&Session>,
    ) -> Result<String> {
        let response = self.send(request, session).await?;
        response.text().await.map_err(|e| {
            MirrorError::transport(format!("{}: body read failed: {e}", request.service()))
        })
    }

    /// Call a service and parse the body incrementally.
    pub async fn stream(
        &self,
        request: &ServiceRequest,
        session: Option<&Session>,
        capture_raw: bool,
    ) -> Result<RecordStream> {
        let response = self.send(request, session).await?;
        let body = response.bytes_stream().map_err(std::io::Error::other);
        Ok(RecordStream::new(Box::pin(body), capture_raw))
    }

    /// Call a service and collect every record of the response.
    pub async fn query(
        &self,
        request: &ServiceRequest,
        session: Option<&Session>,
        capture_raw: bool,
    ) -> Result<QueryPage> {
        self.stream(request, session, capture_raw)
            .await?
            .collect_page()
            .await
    }

    async fn send(&self, request: &ServiceRequest, session: Option<&Session>) -> Result<Response> {
        let body = request.to_xml(session)?;
        debug!(service = request.service(), endpoint = %self.endpoint, "calling service");

        let response = self
            .http
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/xml")
            .body(body)
            .send()
            .await
            .map_err(|e| MirrorError::transport(format!("{}: {e}", request.service())))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MirrorError::http_status(
                status.as_u16(),
                format!("{}: HTTP {status}", request.service()),
            ));
        }

        Ok(response)
    }
}
