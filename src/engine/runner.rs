use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::OwnedMutexGuard;
use tracing::Instrument;

use crate::Node;
use crate::core::TargetValue;
use crate::engine::Session;
use crate::error::{BuildStepError, NodeError};
use crate::tech::{Tech, TechOptions};

/// A tech which finished its `build` within a fresh session.
///
/// Holds the node's run turn until dropped, so no other runner can replace
/// the session while this one is still being awaited.
struct Built<T> {
    tech: T,
    session: Arc<Session>,
    span: tracing::Span,
    _turn: OwnedMutexGuard<()>,
}

impl Node {
    /// Instantiates `T`, waits for the node's previous run to finish, opens
    /// a new build session and drives the tech's build to completion.
    async fn build_tech<T: Tech>(
        self: &Arc<Self>,
        options: TechOptions,
        variant: &'static str,
    ) -> Result<Built<T>, NodeError> {
        let mut tech = T::new(options);
        let span = tracing::info_span!(parent: self.span(), "tech", name = tech.name(), variant);

        let turn = self.runs.clone().lock_owned().await;
        let session = self.begin_session();
        tech.init(self.clone());

        let result = tech.build().instrument(span.clone()).await;

        if let Err(err) = result {
            let err = BuildStepError::from(err);
            tracing::warn!(parent: &span, error = %err, "build failed");
            session.fail(err.clone());
            return Err(err.into());
        }

        Ok(Built {
            tech,
            session,
            span,
            _turn: turn,
        })
    }

    /// Fails with the session's rejection, if the tech already reported one.
    fn check_rejection(built: &Built<impl Tech>) -> Result<(), NodeError> {
        match built.session.outcome() {
            Some(Err(err)) => Err(err.into()),
            _ => Ok(()),
        }
    }

    /// Waits for the first settlement of the session's completion signal.
    async fn await_signal(
        &self,
        built: &Built<impl Tech>,
    ) -> Result<TargetValue, NodeError> {
        let outcome = match self.deadline {
            Some(after) => tokio::time::timeout(after, built.session.settled())
                .await
                .map_err(|_| {
                    tracing::error!(parent: &built.span, ?after, "tech did not settle in time");
                    NodeError::Timeout {
                        tech: built.tech.name().to_string(),
                        after,
                    }
                })??,
            None => built.session.settled().await?,
        };

        Ok(outcome?)
    }

    /// Runs a tech and waits for the first target it resolves or rejects.
    ///
    /// Runs on one node never overlap: a second runner call waits until the
    /// first one returns. A tech must not start another run on its own node
    /// from within `build`.
    pub async fn run_tech<T: Tech>(
        self: &Arc<Self>,
        options: TechOptions,
    ) -> Result<TargetValue, NodeError> {
        let built = self.build_tech::<T>(options, "wait").await?;
        self.await_signal(&built).await
    }

    /// Runs a tech and collects the resolved value of every target it
    /// declares. Targets that were never resolved map to `None`.
    pub async fn run_tech_and_get_results<T: Tech>(
        self: &Arc<Self>,
        options: TechOptions,
    ) -> Result<BTreeMap<String, Option<TargetValue>>, NodeError> {
        let built = self.build_tech::<T>(options, "collect").await?;

        Self::check_rejection(&built)?;
        tracing::debug!(parent: &built.span, count = built.session.len(), "collected results");

        let results = built
            .tech
            .targets()
            .into_iter()
            .map(|target| {
                let value = self.resolved_target(&target);
                (target, value)
            })
            .collect();

        Ok(results)
    }

    /// Runs a tech and reads every declared target from disk as text.
    pub async fn run_tech_and_get_content<T: Tech>(
        self: &Arc<Self>,
        options: TechOptions,
    ) -> Result<Vec<String>, NodeError> {
        let built = self.build_tech::<T>(options, "content").await?;
        let targets = built.tech.targets();

        if targets.is_empty() {
            Self::check_rejection(&built)?;
            return Ok(Vec::new());
        }

        self.await_signal(&built).await?;

        let mut contents = Vec::with_capacity(targets.len());
        for target in targets {
            let path = self.resolve_path(self.unmask_target_name(&target));
            let text = tokio::fs::read_to_string(&path)
                .await
                .map_err(|source| NodeError::FileRead { path, source })?;
            contents.push(text);
        }

        Ok(contents)
    }

    /// Runs a tech and evaluates every declared target as a module, passing
    /// the `context` option to the evaluator.
    pub async fn run_tech_and_require<T: Tech>(
        self: &Arc<Self>,
        options: TechOptions,
    ) -> Result<Vec<TargetValue>, NodeError> {
        let context = options.context().cloned();
        let built = self.build_tech::<T>(options, "require").await?;
        let targets = built.tech.targets();

        if targets.is_empty() {
            Self::check_rejection(&built)?;
            return Ok(Vec::new());
        }

        self.await_signal(&built).await?;

        let mut modules = Vec::with_capacity(targets.len());
        for target in targets {
            let path = self.resolve_path(self.unmask_target_name(&target));
            let module = self
                .evaluator
                .evaluate(&path, context.as_ref())
                .await
                .map_err(|source| NodeError::ModuleEvaluation { path, source })?;
            modules.push(module);
        }

        Ok(modules)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use camino::Utf8PathBuf;
    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::eval::ModuleEvaluator;

    #[derive(Deserialize, Default)]
    #[serde(default)]
    struct Opts {
        target: String,
        value: String,
        write: bool,
    }

    /// Provides and resolves a single target, optionally writing it to disk.
    struct Echo {
        opts: Opts,
        node: Option<Arc<Node>>,
    }

    #[async_trait]
    impl Tech for Echo {
        fn new(options: TechOptions) -> Self {
            Self {
                opts: options.parse().unwrap_or_default(),
                node: None,
            }
        }

        fn init(&mut self, node: Arc<Node>) {
            self.node = Some(node);
        }

        async fn build(&mut self) -> anyhow::Result<()> {
            let node = self.node.as_ref().unwrap();
            let target = node.unmask_target_name(&self.opts.target);

            if self.opts.write {
                tokio::fs::write(node.resolve_path(&target), &self.opts.value).await?;
            }

            node.provide_tech_data(&target, self.opts.value.as_str());
            node.resolve_target(&target, self.opts.value.as_str());
            Ok(())
        }

        fn targets(&self) -> Vec<String> {
            vec![self.opts.target.clone()]
        }
    }

    /// Rejects without ever resolving.
    struct Boom {
        node: Option<Arc<Node>>,
    }

    #[async_trait]
    impl Tech for Boom {
        fn new(_: TechOptions) -> Self {
            Self { node: None }
        }

        fn init(&mut self, node: Arc<Node>) {
            self.node = Some(node);
        }

        async fn build(&mut self) -> anyhow::Result<()> {
            let node = self.node.as_ref().unwrap();
            node.reject_target("out.js", anyhow::anyhow!("boom"));
            Ok(())
        }

        fn targets(&self) -> Vec<String> {
            vec!["out.js".into()]
        }
    }

    /// Resolves several targets, declares one more that it never builds.
    struct Many {
        node: Option<Arc<Node>>,
    }

    #[async_trait]
    impl Tech for Many {
        fn new(_: TechOptions) -> Self {
            Self { node: None }
        }

        fn init(&mut self, node: Arc<Node>) {
            self.node = Some(node);
        }

        async fn build(&mut self) -> anyhow::Result<()> {
            let node = self.node.as_ref().unwrap();
            node.resolve_target("a.js", "a");
            tokio::task::yield_now().await;
            node.resolve_target("b.js", "b");
            Ok(())
        }

        fn targets(&self) -> Vec<String> {
            vec!["a.js".into(), "b.js".into(), "c.js".into()]
        }
    }

    /// Builds successfully but never settles anything.
    struct Stuck;

    #[async_trait]
    impl Tech for Stuck {
        fn new(_: TechOptions) -> Self {
            Stuck
        }

        fn init(&mut self, _: Arc<Node>) {}

        async fn build(&mut self) -> anyhow::Result<()> {
            Ok(())
        }

        fn targets(&self) -> Vec<String> {
            vec!["never.js".into()]
        }
    }

    /// Declares nothing and does nothing.
    struct Nothing;

    #[async_trait]
    impl Tech for Nothing {
        fn new(_: TechOptions) -> Self {
            Nothing
        }

        fn init(&mut self, _: Arc<Node>) {}

        async fn build(&mut self) -> anyhow::Result<()> {
            Ok(())
        }

        fn targets(&self) -> Vec<String> {
            vec![]
        }
    }

    /// Fails from `build` itself.
    struct Broken;

    #[async_trait]
    impl Tech for Broken {
        fn new(_: TechOptions) -> Self {
            Broken
        }

        fn init(&mut self, _: Arc<Node>) {}

        async fn build(&mut self) -> anyhow::Result<()> {
            anyhow::bail!("compiler crashed")
        }

        fn targets(&self) -> Vec<String> {
            vec!["out.js".into()]
        }
    }

    /// Resolves a single target after sleeping for `delay` milliseconds.
    struct Slow {
        delay: u64,
        value: String,
        node: Option<Arc<Node>>,
    }

    #[async_trait]
    impl Tech for Slow {
        fn new(options: TechOptions) -> Self {
            Self {
                delay: options.get("delay").and_then(|v| v.as_u64()).unwrap_or(0),
                value: options.get("value").and_then(|v| v.as_str()).unwrap_or("").into(),
                node: None,
            }
        }

        fn init(&mut self, node: Arc<Node>) {
            self.node = Some(node);
        }

        async fn build(&mut self) -> anyhow::Result<()> {
            let node = self.node.clone().unwrap();
            let value = self.value.clone();
            let delay = Duration::from_millis(self.delay);

            // settles from a detached task, after `build` has returned
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                node.resolve_target(&value, value.as_str());
            });
            Ok(())
        }

        fn targets(&self) -> Vec<String> {
            vec![self.value.clone()]
        }
    }

    /// Declares nothing but still reports a failure.
    struct Refuse {
        node: Option<Arc<Node>>,
    }

    #[async_trait]
    impl Tech for Refuse {
        fn new(_: TechOptions) -> Self {
            Self { node: None }
        }

        fn init(&mut self, node: Arc<Node>) {
            self.node = Some(node);
        }

        async fn build(&mut self) -> anyhow::Result<()> {
            let node = self.node.as_ref().unwrap();
            node.reject_target("out.js", anyhow::anyhow!("boom"));
            Ok(())
        }

        fn targets(&self) -> Vec<String> {
            vec![]
        }
    }

    fn echo(target: &str, value: &str) -> TechOptions {
        TechOptions::new()
            .with("target", target)
            .with("value", value)
    }

    fn temp_node(dir: &tempfile::TempDir) -> Arc<Node> {
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        std::fs::create_dir_all(root.join("pages/index")).unwrap();
        Node::config("pages/index").root(root).finish().unwrap()
    }

    fn node() -> Arc<Node> {
        Node::config("pages/index").root("/project").finish().unwrap()
    }

    #[tokio::test]
    async fn test_run_and_wait_returns_first_value() {
        let node = node();
        let value = node.run_tech::<Many>(TechOptions::new()).await.unwrap();

        assert_eq!(value, TargetValue::from("a"));
        assert_eq!(
            node.published_values(),
            vec![TargetValue::from("a"), TargetValue::from("b")]
        );
    }

    #[tokio::test]
    async fn test_run_and_wait_rejects() {
        let node = node();
        let err = node.run_tech::<Boom>(TechOptions::new()).await.unwrap_err();

        assert!(matches!(err, NodeError::BuildStep(_)));
        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test]
    async fn test_build_error_propagates() {
        let node = node();
        let err = node.run_tech::<Broken>(TechOptions::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "compiler crashed");

        let err = node
            .run_tech_and_get_results::<Broken>(TechOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::BuildStep(_)));
    }

    #[tokio::test]
    async fn test_run_and_collect() {
        let node = node();
        let results = node
            .run_tech_and_get_results::<Echo>(echo("out.js", "42"))
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results["out.js"], Some(TargetValue::from("42")));
    }

    #[tokio::test]
    async fn test_run_and_collect_missing_targets() {
        let node = node();
        let results = node
            .run_tech_and_get_results::<Many>(TechOptions::new())
            .await
            .unwrap();

        assert_eq!(results["a.js"], Some(TargetValue::from("a")));
        assert_eq!(results["b.js"], Some(TargetValue::from("b")));
        assert_eq!(results["c.js"], None);
    }

    #[tokio::test]
    async fn test_run_and_collect_surfaces_rejection() {
        let node = node();
        let err = node
            .run_tech_and_get_results::<Boom>(TechOptions::new())
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test]
    async fn test_sessions_are_fresh_per_run() {
        let node = node();

        let first = node.run_tech::<Echo>(echo("a.js", "1")).await.unwrap();
        let second = node.run_tech::<Echo>(echo("b.js", "2")).await.unwrap();

        assert_eq!(first, TargetValue::from("1"));
        assert_eq!(second, TargetValue::from("2"));
        assert_eq!(node.published_values(), vec![TargetValue::from("2")]);

        // resolved values outlive the session that produced them
        assert_eq!(node.resolved_target("a.js"), Some(TargetValue::from("1")));
    }

    #[tokio::test]
    async fn test_masked_targets_resolve_unmasked() {
        let node = node();
        let results = node
            .run_tech_and_get_results::<Echo>(echo("?.js", "x"))
            .await
            .unwrap();

        assert_eq!(results["?.js"], Some(TargetValue::from("x")));
        assert_eq!(node.tech_data(&["index.js"]), vec![Some(TargetValue::from("x"))]);
    }

    #[tokio::test]
    async fn test_run_and_read_content() {
        let dir = tempfile::tempdir().unwrap();
        let node = temp_node(&dir);

        let options = echo("?.css", "body{}").with("write", true);
        let contents = node.run_tech_and_get_content::<Echo>(options).await.unwrap();

        assert_eq!(contents, vec!["body{}".to_string()]);
    }

    #[tokio::test]
    async fn test_run_and_read_content_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let node = temp_node(&dir);

        let err = node
            .run_tech_and_get_content::<Echo>(echo("?.css", "body{}"))
            .await
            .unwrap_err();

        match err {
            NodeError::FileRead { path, .. } => assert!(path.ends_with("index.css")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_run_and_require_json() {
        let dir = tempfile::tempdir().unwrap();
        let node = temp_node(&dir);

        let options = echo("?.json", r#"{"deps":["a"]}"#).with("write", true);
        let modules = node.run_tech_and_require::<Echo>(options).await.unwrap();

        assert_eq!(modules, vec![TargetValue::Data(json!({ "deps": ["a"] }))]);
    }

    #[tokio::test]
    async fn test_run_and_require_evaluation_error() {
        let dir = tempfile::tempdir().unwrap();
        let node = temp_node(&dir);

        let options = echo("?.json", "not json").with("write", true);
        let err = node.run_tech_and_require::<Echo>(options).await.unwrap_err();

        assert!(matches!(err, NodeError::ModuleEvaluation { .. }));
    }

    #[tokio::test]
    async fn test_run_and_require_passes_context() {
        struct ContextEcho;

        #[async_trait]
        impl ModuleEvaluator for ContextEcho {
            async fn evaluate(
                &self,
                path: &camino::Utf8Path,
                context: Option<&serde_json::Value>,
            ) -> anyhow::Result<TargetValue> {
                Ok(TargetValue::Data(json!({
                    "file": path.file_name(),
                    "context": context,
                })))
            }
        }

        let node = Node::config("pages/index")
            .root("/project")
            .evaluator(ContextEcho)
            .finish()
            .unwrap();

        let options = echo("?.js", "").with("context", json!({ "lang": "en" }));
        let modules = node.run_tech_and_require::<Echo>(options).await.unwrap();

        assert_eq!(
            modules,
            vec![TargetValue::Data(json!({
                "file": "index.js",
                "context": { "lang": "en" },
            }))]
        );
    }

    #[tokio::test]
    async fn test_zero_targets() {
        let node = node();

        let results = node
            .run_tech_and_get_results::<Nothing>(TechOptions::new())
            .await
            .unwrap();
        assert!(results.is_empty());

        let contents = node
            .run_tech_and_get_content::<Nothing>(TechOptions::new())
            .await
            .unwrap();
        assert!(contents.is_empty());

        let modules = node
            .run_tech_and_require::<Nothing>(TechOptions::new())
            .await
            .unwrap();
        assert!(modules.is_empty());
    }

    #[tokio::test]
    async fn test_zero_targets_surface_rejection() {
        let node = node();

        let err = node
            .run_tech_and_get_content::<Refuse>(TechOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::BuildStep(_)));
        assert_eq!(err.to_string(), "boom");

        let err = node
            .run_tech_and_require::<Refuse>(TechOptions::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_runs_keep_their_results() {
        let node = node();

        let slow = |delay: u64, value: &str| {
            TechOptions::new().with("delay", delay).with("value", value)
        };

        let (a, b) = tokio::time::timeout(Duration::from_secs(60), async {
            tokio::join!(
                node.run_tech::<Slow>(slow(10, "a")),
                node.run_tech::<Slow>(slow(20, "b")),
            )
        })
        .await
        .unwrap();

        assert_eq!(a.unwrap(), TargetValue::from("a"));
        assert_eq!(b.unwrap(), TargetValue::from("b"));
        assert_eq!(node.published_values(), vec![TargetValue::from("b")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline() {
        let node = Node::config("pages/index")
            .root("/project")
            .deadline(Duration::from_secs(5))
            .finish()
            .unwrap();

        let err = node.run_tech::<Stuck>(TechOptions::new()).await.unwrap_err();
        assert!(matches!(err, NodeError::Timeout { after, .. } if after == Duration::from_secs(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_without_deadline_stays_pending() {
        let node = node();
        let pending = tokio::time::timeout(
            Duration::from_secs(60),
            node.run_tech::<Stuck>(TechOptions::new()),
        )
        .await;

        assert!(pending.is_err());
    }
}
