use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};

use crate::core::{Dynamic, normalize};

/// One or many level paths accepted by [`NamingSchemes::register`].
pub trait LevelPaths {
    fn into_paths(self) -> Vec<Utf8PathBuf>;
}

impl LevelPaths for &str {
    fn into_paths(self) -> Vec<Utf8PathBuf> {
        vec![self.into()]
    }
}

impl LevelPaths for &Utf8Path {
    fn into_paths(self) -> Vec<Utf8PathBuf> {
        vec![self.to_owned()]
    }
}

impl LevelPaths for Utf8PathBuf {
    fn into_paths(self) -> Vec<Utf8PathBuf> {
        vec![self]
    }
}

impl<P: Into<Utf8PathBuf>> LevelPaths for Vec<P> {
    fn into_paths(self) -> Vec<Utf8PathBuf> {
        self.into_iter().map(Into::into).collect()
    }
}

impl<P: Into<Utf8PathBuf>, const N: usize> LevelPaths for [P; N] {
    fn into_paths(self) -> Vec<Utf8PathBuf> {
        self.into_iter().map(Into::into).collect()
    }
}

/// Maps absolute level directories to naming-convention resolvers.
///
/// Resolvers are opaque to the node; collaborators downcast them back with
/// [`NamingSchemes::get_as`]. Lookups are exact: a scheme registered for
/// `/blocks` is not visible for `/blocks/common`.
#[derive(Default)]
pub struct NamingSchemes {
    dir: Utf8PathBuf,
    schemes: HashMap<Utf8PathBuf, Dynamic>,
}

impl NamingSchemes {
    /// Creates a registry resolving relative levels against `dir`.
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            schemes: HashMap::new(),
        }
    }

    pub fn register<S>(&mut self, levels: impl LevelPaths, scheme: S) -> &mut Self
    where
        S: Any + Send + Sync,
    {
        self.register_dynamic(levels, Arc::new(scheme))
    }

    pub fn register_dynamic(&mut self, levels: impl LevelPaths, scheme: Dynamic) -> &mut Self {
        for level in levels.into_paths() {
            let level = if level.is_absolute() {
                normalize(&level)
            } else {
                normalize(&self.dir.join(level))
            };

            tracing::debug!("registered naming scheme for level {}", level);
            self.schemes.insert(level, scheme.clone());
        }

        self
    }

    pub fn get(&self, level: impl AsRef<Utf8Path>) -> Option<&Dynamic> {
        self.schemes.get(level.as_ref())
    }

    pub fn get_as<S: Any + Send + Sync>(&self, level: impl AsRef<Utf8Path>) -> Option<Arc<S>> {
        self.get(level)
            .cloned()
            .and_then(|scheme| scheme.downcast::<S>().ok())
    }

    pub fn len(&self) -> usize {
        self.schemes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemes.is_empty()
    }
}

impl std::fmt::Debug for NamingSchemes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamingSchemes")
            .field("dir", &self.dir)
            .field("levels", &self.schemes.keys().collect::<Vec<_>>())
            .finish()
    }
}
