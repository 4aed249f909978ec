//! Prefix-tree router.
//!
//! # Matching
//! ```text
//! /users/:id/files/*
//!   └── "users" (literal)
//!         └── :id (parameter, captured)
//!               └── "files" (literal)
//!                     └── * (wildcard, one segment, not captured)
//! ```
//!
//! At every level the literal child is tried first, then the parameter child,
//! then the wildcard child. A node has at most one parameter child and one
//! wildcard child, so the order is always the same. Matching is greedy: once
//! a child is taken the router does not come back to try a sibling.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::dispatch::Context;

pub const PARAM_MARKER: char = ':';
pub const WILDCARD: &str = "*";

/// Request handler. Mutates the response fields of the context and never
/// writes to the network itself. May suspend.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, ctx: &mut Context) -> anyhow::Result<()>;
}

/// Handler backed by a synchronous closure.
pub struct FnHandler<F>(F);

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: Fn(&mut Context) -> anyhow::Result<()> + Send + Sync,
{
    async fn call(&self, ctx: &mut Context) -> anyhow::Result<()> {
        (self.0)(ctx)
    }
}

/// Wraps a synchronous closure as a [`Handler`].
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(&mut Context) -> anyhow::Result<()> + Send + Sync,
{
    FnHandler(f)
}

#[derive(Default)]
struct Node {
    literals: HashMap<String, Node>,
    param: Option<(String, Box<Node>)>,
    wildcard: Option<Box<Node>>,
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl Node {
    fn child_for(&mut self, segment: &str) -> &mut Node {
        if let Some(name) = segment.strip_prefix(PARAM_MARKER) {
            let (bound, child) = self
                .param
                .get_or_insert_with(|| (name.to_string(), Box::default()));
            if bound != name {
                debug!(existing = %bound, requested = name, "Reusing parameter node under its first name");
            }
            child
        } else if segment == WILDCARD {
            self.wildcard.get_or_insert_with(Box::default)
        } else {
            self.literals.entry(segment.to_string()).or_default()
        }
    }

    fn next<'a>(&'a self, segment: &str, params: &mut Vec<String>) -> Option<&'a Node> {
        if let Some(child) = self.literals.get(segment) {
            return Some(child);
        }
        if let Some((_, child)) = &self.param {
            params.push(segment.to_string());
            return Some(child);
        }
        self.wildcard.as_deref()
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

#[derive(Default)]
pub struct Router {
    root: Node,
    routes: Vec<(String, String)>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `method` at `path`.
    ///
    /// Empty segments are discarded, so leading, trailing and doubled
    /// separators are tolerated. Registering the same method and path again
    /// replaces the previous handler.
    pub fn insert(&mut self, method: &str, path: &str, handler: Arc<dyn Handler>) {
        let mut node = &mut self.root;
        for segment in segments(path) {
            node = node.child_for(segment);
        }

        if node.handlers.insert(method.to_string(), handler).is_some() {
            debug!(method, path, "Route re-registered, previous handler replaced");
        } else {
            self.routes.push((method.to_string(), path.to_string()));
        }
    }

    /// Finds the handler for `method` at `path`, appending captured parameter
    /// values to `params` in left-to-right order.
    ///
    /// On a miss `params` is restored to its length on entry.
    pub fn lookup(&self, method: &str, path: &str, params: &mut Vec<String>) -> Option<Arc<dyn Handler>> {
        let mark = params.len();
        let found = self.walk(path, params).and_then(|node| node.handlers.get(method).cloned());
        if found.is_none() {
            params.truncate(mark);
        }
        found
    }

    fn walk(&self, path: &str, params: &mut Vec<String>) -> Option<&Node> {
        let mut node = &self.root;
        for segment in segments(path) {
            node = node.next(segment, params)?;
        }
        Some(node)
    }

    /// Registered (method, pattern) pairs in registration order.
    pub fn routes(&self) -> &[(String, String)] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
