//! Paginated namespace enumeration.

use assetmirror_protocol::{
    AssetRecord, DirectoryRecord, QueryPage, SERVICE_QUERY, ServiceClient, ServiceRequest,
};
use assetmirror_shared::{NamespacePath, Result, Session};
use tracing::{debug, instrument, warn};

/// Paging parameters for [`Enumerator`].
#[derive(Debug, Clone, Copy)]
pub struct EnumerateOptions {
    /// Records requested per page.
    pub page_size: usize,
    /// Stop once this many records have been requested. `None` pages until exhaustion.
    pub max_results: Option<usize>,
}

impl Default for EnumerateOptions {
    fn default() -> Self {
        Self {
            page_size: 10_000,
            max_results: None,
        }
    }
}

/// Aggregate of every page of one namespace query.
#[derive(Debug, Clone, Default)]
pub struct Enumeration {
    /// Asset records, page order then document order.
    pub assets: Vec<AssetRecord>,
    /// Directory records, page order then document order.
    pub directories: Vec<DirectoryRecord>,
    /// `directory` elements without a usable name.
    pub unnamed_directories: usize,
    /// Number of query calls issued.
    pub pages: usize,
}

/// Issues `asset.query` pages for a namespace until the result set is exhausted.
pub struct Enumerator<'a> {
    client: &'a ServiceClient,
    options: EnumerateOptions,
}

impl<'a> Enumerator<'a> {
    /// Create an enumerator over `client`.
    pub fn new(client: &'a ServiceClient, options: EnumerateOptions) -> Self {
        Self { client, options }
    }

    /// Collect every asset and directory matching `namespace >= '<namespace>'`.
    ///
    /// Paging stops when a page returns fewer assets than the page size, when
    /// the reply cursor reports nothing remaining, or when `max_results`
    /// records have been requested. A page that starts with the same asset as
    /// the page before it means the server ignored `idx`; it is dropped and
    /// paging stops.
    #[instrument(skip_all, fields(namespace = %namespace))]
    pub async fn enumerate(
        &self,
        namespace: &NamespacePath,
        session: &Session,
    ) -> Result<Enumeration> {
        let page_size = self.options.page_size.max(1);
        let mut result = Enumeration::default();
        let mut requested = 0usize;
        let mut page_index = 0usize;
        let mut previous_first: Option<String> = None;

        loop {
            if let Some(ceiling) = self.options.max_results {
                if requested >= ceiling {
                    debug!(ceiling, "result ceiling reached");
                    break;
                }
            }

            let request = page_request(namespace, page_size, page_index);
            let page: QueryPage = self.client.query(&request, Some(session), false).await?;
            let first = page.assets.first().and_then(|a| a.id()).map(str::to_string);
            if first.is_some() && first == previous_first {
                warn!(
                    page = page_index + 1,
                    "page repeats the previous one, server ignores paging; stopping"
                );
                result.pages += 1;
                break;
            }
            let returned = page.assets.len();
            let exhausted = returned < page_size || page.cursor.remaining == Some(0);

            debug!(
                page = page_index + 1,
                assets = returned,
                directories = page.directories.len(),
                "enumeration page received"
            );

            result.assets.extend(page.assets);
            result.directories.extend(page.directories);
            result.unnamed_directories += page.unnamed_directories;
            result.pages += 1;
            requested += page_size;
            page_index += 1;
            previous_first = first;

            if exhausted {
                break;
            }
        }

        Ok(result)
    }
}

/// Build the query for the page at `page_index` (0-based).
fn page_request(namespace: &NamespacePath, page_size: usize, page_index: usize) -> ServiceRequest {
    let idx = 1 + page_index * page_size;
    ServiceRequest::new(SERVICE_QUERY)
        .arg("where", namespace_filter(namespace))
        .arg("action", "get-meta")
        .arg("size", page_size.to_string())
        .arg("idx", idx.to_string())
}

/// Lexicographic lower-bound filter: the namespace itself and everything ordered after it.
fn namespace_filter(namespace: &NamespacePath) -> String {
    format!("namespace>='{}'", namespace.as_str().replace('\'', "\\'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use url::Url;

    fn reply(assets: &[&str], directories: &[&str]) -> String {
        let mut body = String::from("<response><reply type=\"result\"><result>");
        for id in assets {
            body.push_str(&format!("<asset id=\"{id}\"><path>file-{id}</path></asset>"));
        }
        for name in directories {
            body.push_str(&format!("<directory name=\"{name}\"/>"));
        }
        body.push_str("</result></reply></response>");
        body
    }

    fn client_for(server: &wiremock::MockServer) -> ServiceClient {
        ServiceClient::new(Url::parse(&server.uri()).unwrap(), Duration::from_secs(5)).unwrap()
    }

    async fn query_calls(server: &wiremock::MockServer) -> Vec<String> {
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|r| String::from_utf8_lossy(&r.body).into_owned())
            .filter(|body| body.contains("asset.query"))
            .collect()
    }

    #[test]
    fn first_page_request_shape() {
        let request = page_request(&NamespacePath::new("proj"), 10_000, 0);
        assert_eq!(request.service(), "asset.query");
        assert_eq!(request.arg_value("where"), Some("namespace>='proj'"));
        assert_eq!(request.arg_value("action"), Some("get-meta"));
        assert_eq!(request.arg_value("size"), Some("10000"));
        assert_eq!(request.arg_value("idx"), Some("1"));

        let third = page_request(&NamespacePath::new("proj"), 2, 2);
        assert_eq!(third.arg_value("idx"), Some("5"));
    }

    #[tokio::test]
    async fn short_result_needs_one_call() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(
                wiremock::ResponseTemplate::new(200).set_body_string(reply(&["1", "2"], &["sub"])),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        let enumerator = Enumerator::new(&client, EnumerateOptions::default());
        let result = enumerator
            .enumerate(&NamespacePath::new("proj"), &Session::new("t"))
            .await
            .unwrap();

        assert_eq!(result.pages, 1);
        assert_eq!(result.assets.len(), 2);
        assert_eq!(result.directories[0].name, "sub");
        assert_eq!(query_calls(&server).await.len(), 1);
    }

    #[tokio::test]
    async fn pages_until_short_page_in_order() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::body_string_contains("<idx>1</idx>"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(reply(&["a", "b"], &["d1"])))
            .mount(&server)
            .await;
        wiremock::Mock::given(wiremock::matchers::body_string_contains("<idx>3</idx>"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(reply(&["c", "d"], &[])))
            .mount(&server)
            .await;
        wiremock::Mock::given(wiremock::matchers::body_string_contains("<idx>5</idx>"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(reply(&["e"], &["d2"])))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let options = EnumerateOptions {
            page_size: 2,
            max_results: None,
        };
        let result = Enumerator::new(&client, options)
            .enumerate(&NamespacePath::new("proj"), &Session::new("t"))
            .await
            .unwrap();

        let ids: Vec<&str> = result.assets.iter().filter_map(|a| a.id()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d", "e"]);
        let dirs: Vec<&str> = result.directories.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(dirs, vec!["d1", "d2"]);
        assert_eq!(result.pages, 3);
    }

    #[tokio::test]
    async fn ceiling_caps_requests() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(reply(&["x", "y"], &[])))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let options = EnumerateOptions {
            page_size: 2,
            max_results: Some(4),
        };
        let result = Enumerator::new(&client, options)
            .enumerate(&NamespacePath::new("proj"), &Session::new("t"))
            .await
            .unwrap();

        assert_eq!(result.pages, 2);
        assert_eq!(result.assets.len(), 4);
    }

    #[tokio::test]
    async fn cursor_remaining_zero_stops_paging() {
        let server = wiremock::MockServer::start().await;
        let body = "<response><reply><result>\
            <asset id=\"1\"><path>a</path></asset><asset id=\"2\"><path>b</path></asset>\
            <cursor><total>2</total><remaining>0</remaining></cursor>\
            </result></reply></response>";
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let options = EnumerateOptions {
            page_size: 2,
            max_results: None,
        };
        let result = Enumerator::new(&client, options)
            .enumerate(&NamespacePath::new("proj"), &Session::new("t"))
            .await
            .unwrap();

        assert_eq!(result.pages, 1);
        assert_eq!(query_calls(&server).await.len(), 1);
    }

    #[tokio::test]
    async fn repeated_page_stops_paging() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(reply(&["x", "y"], &["d"])))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let options = EnumerateOptions {
            page_size: 2,
            max_results: None,
        };
        let result = Enumerator::new(&client, options)
            .enumerate(&NamespacePath::new("proj"), &Session::new("t"))
            .await
            .unwrap();

        assert_eq!(result.pages, 2);
        let ids: Vec<&str> = result.assets.iter().filter_map(|a| a.id()).collect();
        assert_eq!(ids, vec!["x", "y"]);
        assert_eq!(result.directories.len(), 1);
        assert_eq!(query_calls(&server).await.len(), 2);
    }

    #[tokio::test]
    async fn page_failure_propagates() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = Enumerator::new(&client, EnumerateOptions::default())
            .enumerate(&NamespacePath::new("proj"), &Session::new("t"))
            .await
            .unwrap_err();
        assert!(err.is_recoverable());
    }
}
