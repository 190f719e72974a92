//! Named helper functions for the view layer.
//!
//! Helpers are registered once while the app is assembled and are read-only afterwards;
//! every request reaches the same table through [`Context::helpers`](crate::Context::helpers).

use crate::error::{BoxError, BuildError};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub type HelperFn = dyn Fn(&[Value]) -> Result<Value, BoxError> + Send + Sync;

#[derive(Clone, Default)]
pub struct Helpers {
    table: HashMap<String, Arc<HelperFn>>,
}

impl Helpers {
    pub fn builder() -> HelpersBuilder {
        HelpersBuilder::new()
    }

    pub fn get(&self, name: &str) -> Option<&HelperFn> {
        self.table.get(name).map(Arc::as_ref)
    }

    /// Calls the helper `name`; `None` when no such helper exists.
    pub fn call(&self, name: &str, args: &[Value]) -> Option<Result<Value, BoxError>> {
        self.get(name).map(|helper| helper(args))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl fmt::Debug for Helpers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.table.keys().collect();
        names.sort();
        f.debug_struct("Helpers").field("names", &names).finish()
    }
}

pub struct HelpersBuilder {
    table: HashMap<String, Arc<HelperFn>>,
}

impl fmt::Debug for HelpersBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HelpersBuilder").field("len", &self.table.len()).finish()
    }
}

impl HelpersBuilder {
    fn new() -> Self {
        Self { table: HashMap::new() }
    }

    pub fn register<F>(mut self, name: impl Into<String>, f: F) -> Result<Self, BuildError>
    where
        F: Fn(&[Value]) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.table.contains_key(&name) {
            return Err(BuildError::DuplicateHelper { name });
        }
        self.table.insert(name, Arc::new(f));
        Ok(self)
    }

    pub fn build(self) -> Helpers {
        Helpers { table: self.table }
    }
}
