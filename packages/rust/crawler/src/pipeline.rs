//! End-to-end mirror run: log on, walk the tree, report.

use std::sync::Arc;

use assetmirror_protocol::{ServiceClient, authenticate};
use assetmirror_shared::{MirrorConfig, MirrorError, Result};
use assetmirror_storage::SnapshotStore;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::engine::{Mirror, MirrorOptions};
use crate::report::{MirrorReport, ProgressReporter};

/// Run a full mirror from a resolved configuration.
///
/// 1. Build the service client (per-call timeout)
/// 2. Authenticate; failure here aborts the run
/// 3. Walk the base namespace until done, `cancel` fires or the run deadline passes
///
/// Only configuration, authentication and early cancellation are errors.
/// Everything after logon is reported in the returned [`MirrorReport`].
#[instrument(skip_all, fields(endpoint = %config.endpoint, namespace = %config.base_namespace))]
pub async fn run_mirror(
    config: &MirrorConfig,
    cancel: CancellationToken,
    progress: Arc<dyn ProgressReporter>,
) -> Result<MirrorReport> {
    let client = ServiceClient::new(config.endpoint.clone(), config.request_timeout)?;

    let session = tokio::select! {
        _ = cancel.cancelled() => return Err(MirrorError::Cancelled),
        session = authenticate(&client, &config.credentials) => session?,
    };

    let run_token = cancel.child_token();
    let deadline = config.run_timeout.map(|timeout| {
        let token = run_token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            warn!(timeout_secs = timeout.as_secs(), "run deadline reached, cancelling");
            token.cancel();
        })
    });

    let mirror = Mirror::new(
        client,
        SnapshotStore::new(&config.output_root),
        MirrorOptions::from_config(config),
    )
    .with_cancellation(run_token)
    .with_progress(progress);

    let report = mirror.run(&session, &config.base_namespace).await;

    if let Some(handle) = deadline {
        handle.abort();
    }

    info!(
        failures = report.failures(),
        cancelled = report.cancelled,
        "run finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    use assetmirror_shared::{Credentials, NamespacePath};
    use url::Url;
    use uuid::Uuid;

    use crate::report::SilentProgress;

    const LOGON: &str =
        "<response><reply type=\"result\"><result><session>tok-9</session></result></reply></response>";

    fn config_for(server: &wiremock::MockServer, output_root: PathBuf) -> MirrorConfig {
        MirrorConfig {
            endpoint: Url::parse(&server.uri()).unwrap(),
            credentials: Credentials {
                domain: "local".into(),
                user: "alice".into(),
                password: "secret".into(),
            },
            base_namespace: NamespacePath::new("proj"),
            output_root,
            page_size: 100,
            max_results: None,
            max_depth: 8,
            concurrency: 2,
            separate_metadata_fetch: false,
            record_elements: false,
            request_timeout: Duration::from_secs(5),
            run_timeout: None,
        }
    }

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("am_pipeline_{}", Uuid::now_v7()))
    }

    #[tokio::test]
    async fn logs_on_and_mirrors_with_session() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::body_string_contains("system.logon"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(LOGON))
            .expect(1)
            .mount(&server)
            .await;
        wiremock::Mock::given(wiremock::matchers::body_string_contains("asset.query"))
            .and(wiremock::matchers::body_string_contains(r#"session="tok-9""#))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(
                r#"<response><reply><result><asset id="1"><path>a.txt</path></asset></result></reply></response>"#,
            ))
            .mount(&server)
            .await;
        wiremock::Mock::given(wiremock::matchers::body_string_contains("asset.get"))
            .and(wiremock::matchers::body_string_contains(r#"session="tok-9""#))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(
                r#"<response><reply><result><asset id="1"><path>a.txt</path></asset></result></reply></response>"#,
            ))
            .mount(&server)
            .await;

        let root = temp_root();
        let config = config_for(&server, root.clone());
        let report = run_mirror(&config, CancellationToken::new(), Arc::new(SilentProgress))
            .await
            .unwrap();

        assert_eq!(report.assets_fetched, 1);
        assert!(report.is_complete());
        assert!(root.join("proj").join("a.txt-1.content.xml").is_file());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn rejected_logon_aborts_run() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let root = temp_root();
        let config = config_for(&server, root.clone());
        let err = run_mirror(&config, CancellationToken::new(), Arc::new(SilentProgress))
            .await
            .unwrap_err();

        assert!(matches!(err, MirrorError::Authentication { .. }));
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn deadline_cancels_slow_run() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::body_string_contains("system.logon"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(LOGON))
            .mount(&server)
            .await;
        wiremock::Mock::given(wiremock::matchers::body_string_contains("asset.query"))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .set_body_string("<response><reply><result/></reply></response>")
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let root = temp_root();
        let mut config = config_for(&server, root.clone());
        config.run_timeout = Some(Duration::from_millis(200));

        let caller = CancellationToken::new();
        let report = run_mirror(&config, caller.clone(), Arc::new(SilentProgress))
            .await
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.namespaces_visited, 0);
        assert!(!caller.is_cancelled());

        let _ = std::fs::remove_dir_all(&root);
    }
}
