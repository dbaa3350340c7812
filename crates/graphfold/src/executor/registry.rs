//! Named registry of graph-execution engine factories.
//!
//! Engine crates register factories at startup; callers then pick one by name, or fall back to
//! whatever was registered under [`DEFAULT_EXECUTOR`]. The registry is an ordinary value, so
//! registration (which needs `&mut`) is finished before it is shared for lookups.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use thiserror::Error;
use tracing::{debug, info};

use super::{ExecutorFactory, GraphExecutor};
use crate::env;
use crate::ir::Graph;
use crate::Symbol;

/// Reserved name resolved when nothing was selected explicitly.
pub const DEFAULT_EXECUTOR: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Startup configuration fault: no engine was linked in under the default name.
    #[error("no executor is registered under the default name `{DEFAULT_EXECUTOR}`")]
    NoDefault,
    #[error("no executor is registered under `{0}`")]
    UnknownExecutor(Symbol),
}

#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    factories: BTreeMap<Symbol, ExecutorFactory>,
    active: Option<Symbol>,
}

impl fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("executors", &self.factories.keys().collect::<Vec<_>>())
            .field("active", &self.active)
            .finish()
    }
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` under `name`. A later registration under the same name wins.
    pub fn register<F>(&mut self, name: impl Into<Symbol>, factory: F)
    where
        F: Fn(Graph) -> Result<Box<dyn GraphExecutor>> + Send + Sync + 'static,
    {
        self.register_factory(name, Arc::new(factory));
    }

    /// Registers an already shared factory, e.g. one installed under several names.
    pub fn register_factory(&mut self, name: impl Into<Symbol>, factory: ExecutorFactory) {
        let name = name.into();
        if self.factories.insert(name.clone(), factory).is_some() {
            debug!(executor = %name, "replaced previously registered executor factory");
        }
    }

    pub fn get(&self, name: &str) -> Option<&ExecutorFactory> {
        self.factories.get(name)
    }

    /// Factory registered under [`DEFAULT_EXECUTOR`].
    pub fn default_factory(&self) -> Result<&ExecutorFactory, RegistryError> {
        self.factories
            .get(DEFAULT_EXECUTOR)
            .ok_or(RegistryError::NoDefault)
    }

    /// Selects the engine used by [`ExecutorRegistry::create`]. The name is resolved lazily.
    pub fn set_active(&mut self, name: impl Into<Symbol>) {
        self.active = Some(name.into());
    }

    /// Explicitly selected name, or the default name when none was selected.
    pub fn active_name(&self) -> Symbol {
        self.active
            .clone()
            .unwrap_or_else(|| Symbol::from(DEFAULT_EXECUTOR))
    }

    pub fn active_factory(&self) -> Result<&ExecutorFactory, RegistryError> {
        match &self.active {
            Some(name) => self
                .factories
                .get(name)
                .ok_or_else(|| RegistryError::UnknownExecutor(name.clone())),
            None => self.default_factory(),
        }
    }

    /// Builds an engine for `graph` with the active factory.
    pub fn create(&self, graph: Graph) -> Result<Box<dyn GraphExecutor>> {
        let factory = self.active_factory()?;
        factory(graph)
    }

    /// Builds an engine for `graph` with the factory registered under `name`.
    pub fn create_named(&self, name: &str, graph: Graph) -> Result<Box<dyn GraphExecutor>> {
        let factory = self
            .get(name)
            .ok_or_else(|| RegistryError::UnknownExecutor(Symbol::from(name)))?;
        factory(graph)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<Symbol> {
        self.factories.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Applies `GRAPHFOLD_EXECUTOR` when it is set; returns the selected name.
    pub fn select_from_env(&mut self) -> Option<Symbol> {
        let name = env::executor_override()?;
        info!(executor = %name, "executor selected from GRAPHFOLD_EXECUTOR");
        self.set_active(name.clone());
        Some(name)
    }
}
