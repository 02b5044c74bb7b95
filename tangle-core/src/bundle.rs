//! Component Bundles
//!
//! Components that are not part of the imported document can be shipped in
//! bundles: JSON arrays of component documents fetched on demand. The graph
//! metadata key `"bundles"` maps each bundle to the components it provides
//! and the bundles it depends on.
//!
//! # Fetching
//!
//! [`BundleLoader`] fetches each bundle at most once at a time. Concurrent
//! requests for the same bundle share one in-flight future and all resolve
//! when it completes. Successful results stay cached; failures are dropped
//! so a later request retries.
//!
//! Dependencies of a requested bundle are prefetched in the background when
//! a tokio runtime is available. Prefetch failures are only logged.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use reqwest::{Client as HttpClient, StatusCode};
use tracing::{debug, warn};

use crate::error::{BundleError, Error};
use crate::graph::{NodeKind, ScopeId};
use crate::model::ComponentDocument;
use crate::runtime::ExecutionContext;

/// Result of one bundle fetch.
pub type BundleResult = Result<Vec<ComponentDocument>, BundleError>;

/// Future returned by a [`BundleFetcher`].
pub type BundleFuture = BoxFuture<'static, BundleResult>;

/// Source of bundle contents.
pub trait BundleFetcher: Send + Sync {
    fn fetch(&self, bundle: &str) -> BundleFuture;
}

/// Fetches `GET {base_url}/bundles/{name}.json`.
#[derive(Debug, Clone)]
pub struct HttpBundleFetcher {
    base_url: String,
    http: HttpClient,
}

impl HttpBundleFetcher {
    /// Create a fetcher for `base_url` with a 30 second request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(base_url: impl Into<String>) -> Result<Self, BundleError> {
        Self::with_timeout(base_url, Duration::from_secs(30))
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BundleError> {
        let base_url = base_url.into();
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| BundleError::Transport {
                bundle: String::new(),
                message: err.to_string(),
            })?;
        Ok(Self { base_url, http })
    }

    fn url(&self, bundle: &str) -> String {
        format!("{}/bundles/{}.json", self.base_url.trim_end_matches('/'), bundle)
    }
}

impl BundleFetcher for HttpBundleFetcher {
    fn fetch(&self, bundle: &str) -> BundleFuture {
        let http = self.http.clone();
        let url = self.url(bundle);
        let bundle = bundle.to_string();
        async move {
            let transport = |err: reqwest::Error| BundleError::Transport {
                bundle: bundle.clone(),
                message: err.to_string(),
            };
            let response = http.get(&url).send().await.map_err(transport)?;
            if response.status() == StatusCode::NOT_FOUND {
                return Err(BundleError::NotFound(bundle.clone()));
            }
            let response = response.error_for_status().map_err(transport)?;
            response
                .json::<Vec<ComponentDocument>>()
                .await
                .map_err(|err| BundleError::Decode {
                    bundle: bundle.clone(),
                    message: err.to_string(),
                })
        }
        .boxed()
    }
}

struct LoaderInner {
    fetcher: Arc<dyn BundleFetcher>,
    fetches: DashMap<String, Shared<BundleFuture>>,
}

/// De-duplicating, caching bundle loader. Clones share state.
#[derive(Clone)]
pub struct BundleLoader {
    inner: Arc<LoaderInner>,
}

impl BundleLoader {
    pub fn new(fetcher: impl BundleFetcher + 'static) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                fetcher: Arc::new(fetcher),
                fetches: DashMap::new(),
            }),
        }
    }

    /// Loader fetching over HTTP from `base_url`.
    pub fn http(base_url: impl Into<String>) -> Result<Self, BundleError> {
        Ok(Self::new(HttpBundleFetcher::new(base_url)?))
    }

    /// Components of `bundle`, fetching it unless it is cached or already
    /// being fetched.
    pub async fn load(&self, bundle: &str) -> BundleResult {
        let fetch = self
            .inner
            .fetches
            .entry(bundle.to_string())
            .or_insert_with(|| {
                debug!(bundle, "fetching bundle");
                self.inner.fetcher.fetch(bundle).shared()
            })
            .clone();

        let result = fetch.clone().await;
        if let Err(err) = &result {
            warn!(bundle, error = %err, "bundle fetch failed");
            self.inner.fetches.remove_if(bundle, |_, current| current.ptr_eq(&fetch));
        }
        result
    }

    /// Whether `bundle` has been fetched successfully.
    pub fn is_loaded(&self, bundle: &str) -> bool {
        self.inner
            .fetches
            .get(bundle)
            .is_some_and(|fetch| matches!(fetch.peek(), Some(Ok(_))))
    }

    /// Start fetching `bundles` in the background.
    ///
    /// Does nothing outside a tokio runtime.
    pub fn prefetch(&self, bundles: impl IntoIterator<Item = String>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        for bundle in bundles {
            if self.inner.fetches.contains_key(&bundle) {
                continue;
            }
            let loader = self.clone();
            handle.spawn(async move {
                if loader.load(&bundle).await.is_ok() {
                    debug!(bundle = %bundle, "prefetched bundle");
                }
            });
        }
    }
}

impl std::fmt::Debug for BundleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleLoader")
            .field("bundles", &self.inner.fetches.len())
            .finish()
    }
}

impl ExecutionContext {
    /// Make `component` available, fetching the bundle the manifest lists
    /// for it if the graph does not have it yet.
    pub async fn resolve_component(&mut self, component: &str) -> Result<(), Error> {
        if self.graph.has_component(component) {
            return Ok(());
        }
        let unknown = || BundleError::UnknownComponent(component.to_string());
        let loader = self.bundles.clone().ok_or_else(unknown)?;
        let bundle = self.graph.bundle_for_component(component).ok_or_else(unknown)?;

        let dependencies = self
            .graph
            .bundle_manifest()
            .get(&bundle)
            .map(|entry| entry.dependencies.clone())
            .unwrap_or_default();
        loader.prefetch(dependencies);

        let docs = loader.load(&bundle).await?;
        let installed = self.graph.install_components(docs)?;
        debug!(bundle = %bundle, installed = installed.len(), "installed bundle components");

        if !self.graph.has_component(component) {
            return Err(unknown().into());
        }
        Ok(())
    }

    /// Resolve `component` and every component it instantiates, then create
    /// a top-level scope for it.
    pub async fn instantiate(&mut self, component: &str) -> Result<ScopeId, Error> {
        let mut pending = vec![component.to_string()];
        let mut seen = Vec::new();
        while let Some(name) = pending.pop() {
            if seen.contains(&name) {
                continue;
            }
            self.resolve_component(&name).await?;
            if let Some(record) = self.graph.component(&name) {
                for node in record.nodes() {
                    let ty = &node.type_name;
                    let is_component = !self.registry.contains(ty) && NodeKind::placeholder(ty).is_none();
                    let resolvable = self.graph.has_component(ty) || self.graph.bundle_for_component(ty).is_some();
                    if is_component && resolvable && !seen.contains(ty) {
                        pending.push(ty.clone());
                    }
                }
            }
            seen.push(name);
        }
        Ok(self.create_root_scope(component)?)
    }
}
