//! Recursive retrieval orchestrator.
//!
//! [`Mirror`] walks a namespace subtree depth-first: enumerate the namespace,
//! mirror every asset together with its nested child assets, then descend into
//! each sub-namespace. Per-asset and per-namespace failures are recorded in the
//! [`MirrorReport`] and never abort the run.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use assetmirror_protocol::{AssetRecord, ChildRef, QueryPage, SERVICE_GET, ServiceClient, ServiceRequest};
use assetmirror_shared::{
    MirrorConfig, MirrorError, NamespacePath, Result, Session, SnapshotKind, local_relative_path,
};
use assetmirror_storage::{SnapshotStore, WriteOutcome};
use chrono::Utc;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span, info, info_span, instrument, warn};

use crate::enumerate::{EnumerateOptions, Enumerator};
use crate::report::{MirrorReport, ProgressReporter, SilentProgress};

// ---------------------------------------------------------------------------
// MirrorOptions
// ---------------------------------------------------------------------------

/// Traversal settings for a [`Mirror`].
#[derive(Debug, Clone, Copy)]
pub struct MirrorOptions {
    pub enumerate: EnumerateOptions,
    /// Deepest namespace level and deepest child-asset level entered.
    pub max_depth: u32,
    /// In-flight service calls; 1 keeps the walk strictly sequential.
    pub concurrency: usize,
    /// Produce the metadata snapshot from its own retrieval.
    pub separate_metadata_fetch: bool,
    /// Dump each asset element as JSON under `json/`: enumerated assets from
    /// the query page, child assets from their own retrieval reply.
    pub record_elements: bool,
}

impl Default for MirrorOptions {
    fn default() -> Self {
        Self {
            enumerate: EnumerateOptions::default(),
            max_depth: 64,
            concurrency: 1,
            separate_metadata_fetch: false,
            record_elements: false,
        }
    }
}

impl MirrorOptions {
    pub fn from_config(config: &MirrorConfig) -> Self {
        Self {
            enumerate: EnumerateOptions {
                page_size: config.page_size,
                max_results: config.max_results,
            },
            max_depth: config.max_depth,
            concurrency: config.concurrency.max(1) as usize,
            separate_metadata_fetch: config.separate_metadata_fetch,
            record_elements: config.record_elements,
        }
    }
}

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

/// A successful asset retrieval.
struct Retrieval {
    raw: String,
    /// The retrieved asset element, when the reply held one.
    element: Option<AssetRecord>,
    children: Vec<ChildRef>,
    via_fallback: bool,
}

impl Retrieval {
    fn from_page(page: QueryPage, via_fallback: bool) -> Self {
        let raw = page.raw.unwrap_or_default();
        let element = page.assets.into_iter().next();
        let children = element
            .as_ref()
            .map(|asset| asset.children().collect())
            .unwrap_or_default();
        Self {
            raw,
            element,
            children,
            via_fallback,
        }
    }
}

struct RunState {
    assets: HashSet<String>,
    namespaces: HashSet<String>,
    report: MirrorReport,
}

/// Shared by every recursive call of one run.
struct RunContext<'s> {
    session: &'s Session,
    permits: Semaphore,
    state: Mutex<RunState>,
}

impl<'s> RunContext<'s> {
    fn new(session: &'s Session, concurrency: usize) -> Self {
        Self {
            session,
            permits: Semaphore::new(concurrency.max(1)),
            state: Mutex::new(RunState {
                assets: HashSet::new(),
                namespaces: HashSet::new(),
                report: MirrorReport::start(),
            }),
        }
    }

    async fn update(&self, f: impl FnOnce(&mut MirrorReport)) {
        f(&mut self.state.lock().await.report);
    }

    /// Marks `id` as taken; false if some other call already owns it.
    async fn claim_asset(&self, id: &str) -> bool {
        self.state.lock().await.assets.insert(id.to_string())
    }

    async fn claim_namespace(&self, namespace: &NamespacePath) -> bool {
        self.state
            .lock()
            .await
            .namespaces
            .insert(namespace.as_str().to_string())
    }
}

// ---------------------------------------------------------------------------
// Mirror
// ---------------------------------------------------------------------------

/// Mirrors a remote namespace tree into a [`SnapshotStore`].
pub struct Mirror {
    client: ServiceClient,
    store: SnapshotStore,
    options: MirrorOptions,
    cancel: CancellationToken,
    progress: Arc<dyn ProgressReporter>,
}

impl Mirror {
    pub fn new(client: ServiceClient, store: SnapshotStore, options: MirrorOptions) -> Self {
        Self {
            client,
            store,
            options,
            cancel: CancellationToken::new(),
            progress: Arc::new(SilentProgress),
        }
    }

    /// Stop the walk when `token` is cancelled. Work already persisted stays.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Mirror `base` and everything below it.
    ///
    /// The base namespace lands at its own relative path under the output
    /// root (`proj/sub` mirrors into `<root>/proj/sub`). Always returns a
    /// report; failures are counted in it.
    #[instrument(skip_all, fields(namespace = %base))]
    pub async fn run(&self, session: &Session, base: &NamespacePath) -> MirrorReport {
        let ctx = RunContext::new(session, self.options.concurrency);

        info!(
            max_depth = self.options.max_depth,
            concurrency = self.options.concurrency,
            output_root = %self.store.root().display(),
            "starting mirror"
        );

        self.mirror_namespace(&ctx, base.clone(), base.local_path(), 0)
            .await;

        let mut report = ctx.state.into_inner().report;
        report.cancelled = self.cancel.is_cancelled();
        report.finished_at = Some(Utc::now());

        info!(
            namespaces = report.namespaces_visited,
            assets_fetched = report.assets_fetched,
            assets_failed = report.assets_failed,
            snapshots_written = report.snapshots_written,
            snapshots_unchanged = report.snapshots_unchanged,
            cancelled = report.cancelled,
            "mirror completed"
        );

        self.progress.done(&report);
        report
    }

    fn mirror_namespace<'a>(
        &'a self,
        ctx: &'a RunContext<'a>,
        namespace: NamespacePath,
        local: PathBuf,
        depth: u32,
    ) -> BoxFuture<'a, ()> {
        let span = info_span!("namespace", namespace = %namespace, depth);
        async move {
            if self.cancel.is_cancelled() {
                return;
            }
            if depth > self.options.max_depth {
                warn!("depth limit reached, namespace not entered");
                ctx.update(|r| r.depth_limited += 1).await;
                return;
            }
            if !ctx.claim_namespace(&namespace).await {
                debug!("namespace already mirrored");
                ctx.update(|r| r.duplicates_skipped += 1).await;
                return;
            }

            self.progress.namespace_started(&namespace);

            if let Err(e) = self.store.ensure_dir(&local).await {
                warn!(error = %e, "cannot create output directory");
                ctx.update(|r| {
                    r.namespaces_failed += 1;
                    r.record_error(namespace.as_str(), &e);
                })
                .await;
                return;
            }

            let enumerator = Enumerator::new(&self.client, self.options.enumerate);
            let enumeration = match self
                .throttled(ctx, enumerator.enumerate(&namespace, ctx.session))
                .await
            {
                Ok(enumeration) => enumeration,
                Err(MirrorError::Cancelled) => return,
                Err(e) => {
                    warn!(error = %e, "namespace enumeration failed");
                    ctx.update(|r| {
                        r.namespaces_failed += 1;
                        r.record_error(namespace.as_str(), &e);
                    })
                    .await;
                    return;
                }
            };

            info!(
                assets = enumeration.assets.len(),
                directories = enumeration.directories.len(),
                pages = enumeration.pages,
                "namespace enumerated"
            );
            ctx.update(|r| {
                r.namespaces_visited += 1;
                r.records_skipped += enumeration.unnamed_directories;
            })
            .await;

            let mut assets = Vec::with_capacity(enumeration.assets.len());
            for asset in &enumeration.assets {
                let (id, name) = match asset_target(asset) {
                    Ok(target) => target,
                    Err(e) => {
                        warn!(error = %e, "skipping asset record");
                        ctx.update(|r| {
                            r.records_skipped += 1;
                            r.record_error(namespace.as_str(), &e);
                        })
                        .await;
                        continue;
                    }
                };
                if self.options.record_elements {
                    self.record_element(ctx, asset, &name).await;
                }
                assets.push((id, local.join(name)));
            }

            futures::stream::iter(assets)
                .for_each_concurrent(self.options.concurrency, |(id, path)| {
                    self.fetch_asset(ctx, id, path, 0)
                })
                .await;

            let mut subdirs = Vec::with_capacity(enumeration.directories.len());
            for directory in &enumeration.directories {
                match local_relative_path(&directory.name) {
                    Some(name) => subdirs.push((namespace.child(&directory.name), local.join(name))),
                    None => {
                        let e = MirrorError::malformed(format!(
                            "directory name {:?} has no usable path segment",
                            directory.name
                        ));
                        warn!(error = %e, "skipping directory record");
                        ctx.update(|r| {
                            r.records_skipped += 1;
                            r.record_error(namespace.as_str(), &e);
                        })
                        .await;
                    }
                }
            }

            futures::stream::iter(subdirs)
                .for_each_concurrent(self.options.concurrency, |(child, path)| {
                    self.mirror_namespace(ctx, child, path, depth + 1)
                })
                .await;
        }
        .instrument(span)
        .boxed()
    }

    /// Retrieve one asset, persist its snapshots, then walk its child assets.
    fn fetch_asset<'a>(
        &'a self,
        ctx: &'a RunContext<'a>,
        id: String,
        path: PathBuf,
        depth: u32,
    ) -> BoxFuture<'a, ()> {
        let span = debug_span!("asset", id = %id, depth);
        async move {
            if self.cancel.is_cancelled() {
                return;
            }
            if depth > self.options.max_depth {
                warn!(path = %path.display(), "depth limit reached, child asset not fetched");
                ctx.update(|r| r.depth_limited += 1).await;
                return;
            }
            if !ctx.claim_asset(&id).await {
                debug!("asset already mirrored");
                ctx.update(|r| r.duplicates_skipped += 1).await;
                return;
            }

            let content = match self.retrieve(ctx, &id).await {
                Ok(retrieval) => retrieval,
                Err(MirrorError::Cancelled) => return,
                Err(e) => {
                    warn!(error = %e, "asset skipped, primary and fallback retrieval failed");
                    ctx.update(|r| {
                        r.assets_failed += 1;
                        r.record_error(&id, &e);
                    })
                    .await;
                    return;
                }
            };

            let metadata = if self.options.separate_metadata_fetch {
                match self.retrieve(ctx, &id).await {
                    Ok(retrieval) => Some(retrieval),
                    Err(MirrorError::Cancelled) => return,
                    Err(e) => {
                        warn!(error = %e, "metadata retrieval failed");
                        ctx.update(|r| r.record_error(format!("{id} (metadata)"), &e))
                            .await;
                        None
                    }
                }
            } else {
                None
            };

            let metadata_body = match (&metadata, self.options.separate_metadata_fetch) {
                (Some(meta), _) => Some(meta.raw.as_str()),
                (None, false) => Some(content.raw.as_str()),
                (None, true) => None,
            };

            let outcomes = match self.persist(&path, &id, &content.raw, metadata_body).await {
                Ok(outcomes) => outcomes,
                Err(e) => {
                    warn!(error = %e, "failed to write snapshot");
                    ctx.update(|r| {
                        r.assets_failed += 1;
                        r.record_error(path.display().to_string(), &e);
                    })
                    .await;
                    return;
                }
            };

            let fetched = {
                let mut state = ctx.state.lock().await;
                let report = &mut state.report;
                report.assets_fetched += 1;
                if content.via_fallback {
                    report.assets_via_fallback += 1;
                }
                for outcome in &outcomes {
                    if outcome.wrote() {
                        report.snapshots_written += 1;
                    } else {
                        report.snapshots_unchanged += 1;
                    }
                }
                report.assets_fetched
            };
            self.progress.asset_mirrored(&id, &path, fetched);
            if self.options.record_elements && depth > 0 {
                if let (Some(element), Some(name)) = (&content.element, path.file_name()) {
                    self.record_element(ctx, element, Path::new(name)).await;
                }
            }
            debug!(path = %path.display(), fallback = content.via_fallback, "asset mirrored");

            let children = child_targets(&content, metadata.as_ref(), &path);
            futures::stream::iter(children)
                .for_each_concurrent(self.options.concurrency, |(child, child_path)| {
                    self.fetch_asset(ctx, child, child_path, depth + 1)
                })
                .await;
        }
        .instrument(span)
        .boxed()
    }

    /// Primary retrieval, then the explicit content view when the primary
    /// call fails recoverably.
    async fn retrieve(&self, ctx: &RunContext<'_>, id: &str) -> Result<Retrieval> {
        let primary = ServiceRequest::new(SERVICE_GET).arg("id", id);
        let first = self
            .throttled(ctx, self.client.query(&primary, Some(ctx.session), true))
            .await;

        match first {
            Ok(page) => Ok(Retrieval::from_page(page, false)),
            Err(e) if e.is_recoverable() => {
                warn!(id, error = %e, "primary retrieval failed, trying content view");
                let fallback = primary.arg("view", "content");
                let page = self
                    .throttled(ctx, self.client.query(&fallback, Some(ctx.session), true))
                    .await?;
                Ok(Retrieval::from_page(page, true))
            }
            Err(e) => Err(e),
        }
    }

    /// Run a service call under the concurrency limit, aborting on cancellation.
    async fn throttled<T>(
        &self,
        ctx: &RunContext<'_>,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let _permit = tokio::select! {
            _ = self.cancel.cancelled() => return Err(MirrorError::Cancelled),
            permit = ctx.permits.acquire() => permit.map_err(|_| MirrorError::Cancelled)?,
        };
        tokio::select! {
            _ = self.cancel.cancelled() => Err(MirrorError::Cancelled),
            result = call => result,
        }
    }

    async fn persist(
        &self,
        path: &Path,
        id: &str,
        content: &str,
        metadata: Option<&str>,
    ) -> Result<Vec<WriteOutcome>> {
        let mut outcomes = Vec::with_capacity(2);
        outcomes.push(
            self.store
                .write_snapshot(path, id, SnapshotKind::Content, content.as_bytes())
                .await?,
        );
        if let Some(metadata) = metadata {
            outcomes.push(
                self.store
                    .write_snapshot(path, id, SnapshotKind::Metadata, metadata.as_bytes())
                    .await?,
            );
        }
        Ok(outcomes)
    }

    async fn record_element(&self, ctx: &RunContext<'_>, asset: &AssetRecord, name: &Path) {
        let mut file = Path::new("json").join(name).into_os_string();
        file.push(".asset-element.json");
        let file = PathBuf::from(file);

        if let Err(e) = self.store.write_json(&file, asset).await {
            warn!(path = %file.display(), error = %e, "failed to write asset element");
            ctx.update(|r| r.record_error(file.display().to_string(), &e))
                .await;
        }
    }
}

/// Id and local name of an enumerated asset.
fn asset_target(asset: &AssetRecord) -> Result<(String, PathBuf)> {
    let id = asset
        .id()
        .ok_or_else(|| MirrorError::malformed("asset record without id"))?;
    let name = asset
        .display_name()
        .and_then(local_relative_path)
        .ok_or_else(|| MirrorError::malformed(format!("asset {id} has no usable path")))?;
    Ok((id.to_string(), name))
}

/// Child references of both retrievals, content first, each id once, placed
/// under the parent asset's local path.
fn child_targets(
    content: &Retrieval,
    metadata: Option<&Retrieval>,
    parent: &Path,
) -> Vec<(String, PathBuf)> {
    let mut seen = HashSet::new();
    content
        .children
        .iter()
        .chain(metadata.into_iter().flat_map(|m| m.children.iter()))
        .filter(|child| seen.insert(child.id.as_str()))
        .map(|child| {
            let name = local_relative_path(&child.display_name)
                .unwrap_or_else(|| PathBuf::from(&child.id));
            (child.id.clone(), parent.join(name))
        })
        .collect()
}
