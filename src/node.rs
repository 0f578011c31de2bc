use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};

use crate::cache::{Cache, CacheStorage};
use crate::core::{Dynamic, TargetValue, basename, normalize, unmask};
use crate::engine::Session;
use crate::error::{BuildStepError, NodeError};
use crate::eval::{JsonModuleEvaluator, ModuleEvaluator};
use crate::naming::{LevelPaths, NamingSchemes};
use crate::shared::SharedResources;
use crate::store::{NodeRegistry, TargetStore};

/// Opaque state shared between a node and its collaborators during a build.
#[derive(Default)]
pub struct BuildState {
    items: Mutex<HashMap<String, Dynamic>>,
}

impl BuildState {
    pub fn insert<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        items.insert(key.into(), Arc::new(value));
    }

    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        items
            .get(key)
            .cloned()
            .and_then(|item| item.downcast::<T>().ok())
    }

    pub fn remove(&self, key: &str) -> bool {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        items.remove(key).is_some()
    }
}

/// A directory-scoped unit of the build graph.
///
/// The node is the surface techs talk to while they build: they publish
/// target values into it, read values published by other techs or nodes,
/// and reach the node's cache, naming schemes and shared resources. Nodes
/// are always handled through an `Arc` since techs keep a reference for the
/// duration of their build.
pub struct Node {
    path: String,
    root: Utf8PathBuf,
    dir: Utf8PathBuf,
    target_name: String,
    languages: RwLock<Vec<String>>,
    cache: Cache,
    store: TargetStore,
    registry: NodeRegistry,
    schemes: RwLock<NamingSchemes>,
    build_state: BuildState,
    shared: SharedResources,
    session: RwLock<Arc<Session>>,
    pub(crate) runs: Arc<tokio::sync::Mutex<()>>,
    pub(crate) evaluator: Arc<dyn ModuleEvaluator>,
    pub(crate) deadline: Option<Duration>,
    span: tracing::Span,
}

impl Node {
    /// Starts configuring a node for the build-relative `path`.
    pub fn config(path: impl Into<String>) -> NodeConfig {
        NodeConfig::new(path)
    }

    /// Build-relative path of this node.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn root_dir(&self) -> &Utf8Path {
        &self.root
    }

    /// Absolute directory of this node.
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    pub fn languages(&self) -> Vec<String> {
        self.languages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_languages(&self, languages: Vec<String>) {
        *self.languages.write().unwrap_or_else(PoisonError::into_inner) = languages;
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn build_state(&self) -> &BuildState {
        &self.build_state
    }

    pub fn shared_resources(&self) -> &SharedResources {
        &self.shared
    }

    // ******************************
    // *           Paths            *
    // ******************************

    /// Resolves `file` against the node directory.
    pub fn resolve_path(&self, file: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        normalize(&self.dir.join(file))
    }

    /// Resolves `file` against the directory of another node.
    pub fn resolve_node_path(&self, node_path: &str, file: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        normalize(&self.root.join(node_path).join(file))
    }

    /// Path of `file` relative to the node directory, always starting with a dot.
    pub fn relative_path(&self, file: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        let relative = relative(&self.dir, &normalize(file.as_ref()));
        if relative.as_str().starts_with('.') {
            relative
        } else {
            Utf8Path::new(".").join(relative)
        }
    }

    /// Public URL of `file`, relative to the build root and prefixed with
    /// `www_root` (defaults to `/`).
    pub fn www_root_path(&self, file: impl AsRef<Utf8Path>, www_root: Option<&str>) -> String {
        let relative = relative(&self.root, &normalize(file.as_ref()));
        let relative = relative
            .components()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join("/");

        format!("{}{}", www_root.unwrap_or("/"), relative)
    }

    pub fn unmask_target_name(&self, target: &str) -> String {
        unmask(target, &self.target_name)
    }

    pub fn unmask_node_target_name(&self, node_path: &str, target: &str) -> String {
        unmask(target, basename(node_path))
    }

    /// Node basename, optionally followed by `.suffix`.
    pub fn target_name(&self, suffix: Option<&str>) -> String {
        match suffix {
            Some(suffix) if !suffix.is_empty() => format!("{}.{}", self.target_name, suffix),
            _ => self.target_name.clone(),
        }
    }

    // ******************************
    // *        Target data         *
    // ******************************

    /// Publishes a value for a target of this node.
    pub fn provide_tech_data(&self, target: &str, value: impl Into<TargetValue>) {
        let target = self.unmask_target_name(target);
        tracing::debug!(parent: &self.span, name = %target, "provided tech data");
        self.store.provide(target, value.into());
    }

    /// Publishes a value attributed to another node. The mask is expanded
    /// against the basename of `node_path`.
    pub fn provide_node_tech_data(
        &self,
        node_path: &str,
        target: &str,
        value: impl Into<TargetValue>,
    ) {
        tracing::debug!(parent: &self.span, node = node_path, name = target, "provided node tech data");
        self.registry.publish(node_path, target, value.into());
    }

    /// Reads values published with [`Node::provide_tech_data`], aligned with
    /// `targets`. Never waits for anything to be built.
    pub fn tech_data<S: AsRef<str>>(&self, targets: &[S]) -> Vec<Option<TargetValue>> {
        targets
            .iter()
            .map(|target| self.store.read(&self.unmask_target_name(target.as_ref())))
            .collect()
    }

    /// Same as [`Node::tech_data`]. Absent values are reported as `None`.
    pub fn require_sources<S: AsRef<str>>(&self, targets: &[S]) -> Vec<Option<TargetValue>> {
        self.tech_data(targets)
    }

    /// Looks up values other techs published for other nodes, mirroring the
    /// shape of `sources`. Nothing is built; absent values are `None`.
    pub fn require_node_sources<K, S>(
        &self,
        sources: impl IntoIterator<Item = (K, Vec<S>)>,
    ) -> BTreeMap<String, Vec<Option<TargetValue>>>
    where
        K: Into<String>,
        S: AsRef<str>,
    {
        sources
            .into_iter()
            .map(|(node_path, targets)| {
                let node_path = node_path.into();
                let values = targets
                    .iter()
                    .map(|target| self.registry.lookup(&node_path, target.as_ref()))
                    .collect();
                (node_path, values)
            })
            .collect()
    }

    /// Value that went through the completion path for `target`, if any.
    pub fn resolved_target(&self, target: &str) -> Option<TargetValue> {
        self.store.read_resolved(&self.unmask_target_name(target))
    }

    // ******************************
    // *         Completion         *
    // ******************************

    /// Records the value of a built target and settles the current build
    /// session if it is still pending.
    pub fn resolve_target(&self, target: &str, value: impl Into<TargetValue>) {
        let target = self.unmask_target_name(target);
        let value = value.into();

        self.store.resolve(target.clone(), value.clone());

        let settled = self.current_session().publish(value);
        tracing::debug!(parent: &self.span, name = %target, settled, "resolved target");
    }

    /// Fails the current build session if it is still pending.
    pub fn reject_target(&self, target: &str, error: impl Into<anyhow::Error>) {
        let error = BuildStepError::new(error);
        tracing::warn!(parent: &self.span, name = target, error = %error, "rejected target");
        self.current_session().fail(error);
    }

    /// Notes that `target` was found up to date and did not need a rebuild.
    pub fn is_valid_target(&self, target: &str) {
        tracing::info!(parent: &self.span, name = target, "target is valid");
    }

    /// Every value resolved during the current build session, in order.
    pub fn published_values(&self) -> Vec<TargetValue> {
        self.current_session().history()
    }

    pub(crate) fn current_session(&self) -> Arc<Session> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn begin_session(&self) -> Arc<Session> {
        let session = Arc::new(Session::new());
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = session.clone();
        session
    }

    // ******************************
    // *   Cache & naming schemes   *
    // ******************************

    /// The node cache, or one of its named partitions.
    pub fn cache(&self, sub_cache: Option<&str>) -> Cache {
        match sub_cache {
            Some(name) => self.cache.sub_cache(name),
            None => self.cache.clone(),
        }
    }

    pub fn provide_level_naming_scheme<S>(&self, levels: impl LevelPaths, scheme: S) -> &Self
    where
        S: Any + Send + Sync,
    {
        self.schemes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(levels, scheme);
        self
    }

    pub fn level_naming_scheme(&self, level: impl AsRef<Utf8Path>) -> Option<Dynamic> {
        self.naming_schemes().get(level).cloned()
    }

    pub fn naming_schemes(&self) -> RwLockReadGuard<'_, NamingSchemes> {
        self.schemes.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("path", &self.path)
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

/// Path leading from `base` to `path`, both expected to be normalized.
fn relative(base: &Utf8Path, path: &Utf8Path) -> Utf8PathBuf {
    let base: Vec<_> = base.components().collect();
    let path: Vec<_> = path.components().collect();

    let common = base
        .iter()
        .zip(&path)
        .take_while(|(a, b)| a == b)
        .count();

    let mut acc = Utf8PathBuf::new();
    for _ in common..base.len() {
        acc.push("..");
    }
    for component in &path[common..] {
        acc.push(component.as_str());
    }

    acc
}

/// A builder for [`Node`].
pub struct NodeConfig {
    path: String,
    root: Option<Utf8PathBuf>,
    registry: Option<NodeRegistry>,
    storage: Option<CacheStorage>,
    evaluator: Option<Arc<dyn ModuleEvaluator>>,
    shared: Option<SharedResources>,
    languages: Vec<String>,
    deadline: Option<Duration>,
}

impl NodeConfig {
    fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            root: None,
            registry: None,
            storage: None,
            evaluator: None,
            shared: None,
            languages: Vec::new(),
            deadline: None,
        }
    }

    /// Absolute build root. Defaults to the current working directory.
    pub fn root(mut self, root: impl Into<Utf8PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Registry receiving values published for other nodes. Nodes of one
    /// build should share it; by default every node gets its own.
    pub fn registry(mut self, registry: NodeRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn cache_storage(mut self, storage: CacheStorage) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn evaluator(mut self, evaluator: impl ModuleEvaluator + 'static) -> Self {
        self.evaluator = Some(Arc::new(evaluator));
        self
    }

    pub fn shared_resources(mut self, shared: SharedResources) -> Self {
        self.shared = Some(shared);
        self
    }

    pub fn languages(mut self, languages: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.languages = languages.into_iter().map(Into::into).collect();
        self
    }

    /// Upper bound on how long runners wait for a tech to settle its
    /// targets. Unbounded by default.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn finish(self) -> Result<Arc<Node>, NodeError> {
        let root = match self.root {
            Some(root) => root,
            None => Utf8PathBuf::try_from(std::env::current_dir()?)?,
        };

        let dir = normalize(&root.join(&self.path));
        let target_name = basename(&self.path).to_string();
        let span = tracing::info_span!("node", path = %self.path);

        Ok(Arc::new(Node {
            cache: Cache::new(self.storage.unwrap_or_default(), self.path.clone()),
            schemes: RwLock::new(NamingSchemes::new(dir.clone())),
            path: self.path,
            root,
            dir,
            target_name,
            languages: RwLock::new(self.languages),
            store: TargetStore::default(),
            registry: self.registry.unwrap_or_default(),
            build_state: BuildState::default(),
            shared: self.shared.unwrap_or_default(),
            session: RwLock::new(Arc::new(Session::new())),
            runs: Arc::new(tokio::sync::Mutex::new(())),
            evaluator: self
                .evaluator
                .unwrap_or_else(|| Arc::new(JsonModuleEvaluator)),
            deadline: self.deadline,
            span,
        }))
    }
}
