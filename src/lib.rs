#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod cache;
mod core;
mod engine;
mod error;
mod eval;
mod graph;
#[cfg(feature = "logging")]
pub mod logging;
mod naming;
mod node;
mod shared;
mod store;
mod tech;

pub use crate::cache::{Cache, CacheStorage};
pub use crate::core::{Dynamic, MASK, TargetValue};
pub use crate::error::*;
pub use crate::eval::{JsonModuleEvaluator, ModuleEvaluator};
pub use crate::graph::GraphNode;
pub use crate::naming::{LevelPaths, NamingSchemes};
pub use crate::node::{BuildState, Node, NodeConfig};
pub use crate::shared::SharedResources;
pub use crate::store::NodeRegistry;
pub use crate::tech::{CONTEXT_KEY, Tech, TechOptions};

/// Re-exported so tech implementations can use the same attribute macro.
pub use async_trait::async_trait;
