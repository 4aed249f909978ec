//! Plugins bundle services and hooks and register them on an engine.

use std::any::Any;
use std::sync::Arc;

use crate::dispatch::engine::Engine;
use crate::dispatch::hooks::{Hook, Stage};

pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, engine: &Engine);
}

/// A plugin assembled from named services and stage hooks.
///
/// ```ignore
/// let plugin = Bundle::new("request-id")
///     .service("ids", IdGenerator::default())
///     .hook(Stage::RequestReceived, AssignRequestId);
/// engine.register_plugin(&plugin);
/// ```
pub struct Bundle {
    name: String,
    services: Vec<(String, Arc<dyn Any + Send + Sync>)>,
    hooks: Vec<(Stage, Arc<dyn Hook>)>,
}

impl Bundle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            services: Vec::new(),
            hooks: Vec::new(),
        }
    }

    pub fn service<T>(mut self, name: impl Into<String>, service: T) -> Self
    where
        T: Any + Send + Sync,
    {
        self.services.push((name.into(), Arc::new(service)));
        self
    }

    pub fn hook(mut self, stage: Stage, hook: impl Hook + 'static) -> Self {
        self.hooks.push((stage, Arc::new(hook)));
        self
    }
}

impl Plugin for Bundle {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, engine: &Engine) {
        for (name, service) in &self.services {
            engine.register_service_arc(name.clone(), Arc::clone(service));
        }
        for (stage, hook) in &self.hooks {
            engine.hooks().register(*stage, Arc::clone(hook));
        }
    }
}
