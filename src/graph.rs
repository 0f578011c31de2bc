//! Capabilities a node needs once it is wired into a build graph.
//!
//! The core [`Node`] only knows how to run techs and exchange their
//! results. Registering targets, cleaning them and taking part in the
//! graph are supplied by concrete node types implementing [`GraphNode`],
//! usually by wrapping a core node. The core node itself implements the
//! trait by reporting every operation as unimplemented.

use async_trait::async_trait;
use camino::Utf8PathBuf;

use crate::Node;
use crate::core::Dynamic;
use crate::error::NodeError;
use crate::tech::Tech;

#[async_trait]
pub trait GraphNode: Send + Sync {
    /// Names of the techs attached to this node.
    fn techs(&self) -> Result<Vec<String>, NodeError>;

    fn set_techs(&self, techs: Vec<Box<dyn Tech>>) -> Result<(), NodeError>;

    fn set_targets_to_build(&self, targets: Vec<String>) -> Result<(), NodeError>;

    fn set_targets_to_clean(&self, targets: Vec<String>) -> Result<(), NodeError>;

    fn set_build_graph(&self, graph: Dynamic) -> Result<(), NodeError>;

    fn has_registered_target(&self, target: &str) -> Result<bool, NodeError>;

    async fn load_techs(&self) -> Result<(), NodeError>;

    async fn clean_target_file(&self, target: &str) -> Result<(), NodeError>;

    async fn create_tmp_file_for_target(&self, target: &str) -> Result<Utf8PathBuf, NodeError>;

    async fn clean_targets(&self, targets: &[String]) -> Result<(), NodeError>;

    async fn build(&self, targets: &[String]) -> Result<(), NodeError>;

    async fn clean(&self, targets: &[String]) -> Result<(), NodeError>;

    fn destruct(&self) -> Result<(), NodeError>;
}

#[async_trait]
impl GraphNode for Node {
    fn techs(&self) -> Result<Vec<String>, NodeError> {
        Err(NodeError::Unimplemented("techs"))
    }

    fn set_techs(&self, _: Vec<Box<dyn Tech>>) -> Result<(), NodeError> {
        Err(NodeError::Unimplemented("set_techs"))
    }

    fn set_targets_to_build(&self, _: Vec<String>) -> Result<(), NodeError> {
        Err(NodeError::Unimplemented("set_targets_to_build"))
    }

    fn set_targets_to_clean(&self, _: Vec<String>) -> Result<(), NodeError> {
        Err(NodeError::Unimplemented("set_targets_to_clean"))
    }

    fn set_build_graph(&self, _: Dynamic) -> Result<(), NodeError> {
        Err(NodeError::Unimplemented("set_build_graph"))
    }

    fn has_registered_target(&self, _: &str) -> Result<bool, NodeError> {
        Err(NodeError::Unimplemented("has_registered_target"))
    }

    async fn load_techs(&self) -> Result<(), NodeError> {
        Err(NodeError::Unimplemented("load_techs"))
    }

    async fn clean_target_file(&self, _: &str) -> Result<(), NodeError> {
        Err(NodeError::Unimplemented("clean_target_file"))
    }

    async fn create_tmp_file_for_target(&self, _: &str) -> Result<Utf8PathBuf, NodeError> {
        Err(NodeError::Unimplemented("create_tmp_file_for_target"))
    }

    async fn clean_targets(&self, _: &[String]) -> Result<(), NodeError> {
        Err(NodeError::Unimplemented("clean_targets"))
    }

    async fn build(&self, _: &[String]) -> Result<(), NodeError> {
        Err(NodeError::Unimplemented("build"))
    }

    async fn clean(&self, _: &[String]) -> Result<(), NodeError> {
        Err(NodeError::Unimplemented("clean"))
    }

    fn destruct(&self) -> Result<(), NodeError> {
        Err(NodeError::Unimplemented("destruct"))
    }
}
