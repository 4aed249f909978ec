//! Ordered, named extension points.
//!
//! Three stages run during every request:
//!
//! ```text
//! request-received ──▶ (router + handler) ──▶ response-ready
//!         │                    │                    │
//!         └────────────── fault-raised ◀────────────┘
//! ```
//!
//! Hooks receive the request's shared `&mut Context`, so two hooks can never
//! run at the same time for one request. The two execution modes differ in
//! what happens when a hook fails:
//!
//! - [`HookPipeline::execute`] isolates each hook. A failure is handed to the
//!   fault stage and the remaining hooks of the stage still run.
//! - [`HookPipeline::execute_inline`] waits for each hook in turn and stops at
//!   the first failure, returning it to the caller.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{trace, warn};

use crate::dispatch::context::Context;

/// Pipeline stage a hook is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    RequestReceived,
    ResponseReady,
    FaultRaised,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::RequestReceived, Stage::ResponseReady, Stage::FaultRaised];

    /// Parses a stage name. Both the dashed names and the `onRequest` style
    /// aliases are accepted.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "request-received" | "onRequest" => Some(Stage::RequestReceived),
            "response-ready" | "onResponse" => Some(Stage::ResponseReady),
            "fault-raised" | "onError" => Some(Stage::FaultRaised),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::RequestReceived => "request-received",
            Stage::ResponseReady => "response-ready",
            Stage::FaultRaised => "fault-raised",
        }
    }

    fn index(self) -> usize {
        match self {
            Stage::RequestReceived => 0,
            Stage::ResponseReady => 1,
            Stage::FaultRaised => 2,
        }
    }
}

/// How the dispatch core runs hook stages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookMode {
    /// Per-hook fault isolation, failures routed to the fault stage.
    #[default]
    Isolated,
    /// Wait for each hook, first failure aborts the request pipeline.
    Inline,
}

/// Extension function invoked at a pipeline stage. May suspend.
#[async_trait]
pub trait Hook: Send + Sync {
    async fn call(&self, ctx: &mut Context) -> anyhow::Result<()>;
}

/// Hook backed by a synchronous closure.
pub struct FnHook<F>(F);

#[async_trait]
impl<F> Hook for FnHook<F>
where
    F: Fn(&mut Context) -> anyhow::Result<()> + Send + Sync,
{
    async fn call(&self, ctx: &mut Context) -> anyhow::Result<()> {
        (self.0)(ctx)
    }
}

/// Wraps a synchronous closure as a [`Hook`].
pub fn hook_fn<F>(f: F) -> FnHook<F>
where
    F: Fn(&mut Context) -> anyhow::Result<()> + Send + Sync,
{
    FnHook(f)
}

#[derive(Default)]
pub struct HookPipeline {
    stages: RwLock<[Vec<Arc<dyn Hook>>; 3]>,
}

impl HookPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `hook` to `stage`.
    pub fn register(&self, stage: Stage, hook: Arc<dyn Hook>) {
        self.stages.write()[stage.index()].push(hook);
    }

    /// Appends `hook` to the stage called `name`. Unknown names are ignored.
    pub fn register_named(&self, name: &str, hook: Arc<dyn Hook>) -> bool {
        match Stage::from_name(name) {
            Some(stage) => {
                self.register(stage, hook);
                true
            }
            None => {
                warn!(stage = name, "Ignoring hook for unknown stage");
                false
            }
        }
    }

    pub fn len(&self, stage: Stage) -> usize {
        self.stages.read()[stage.index()].len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.read().iter().all(Vec::is_empty)
    }

    fn snapshot(&self, stage: Stage) -> Vec<Arc<dyn Hook>> {
        self.stages.read()[stage.index()].clone()
    }

    /// Runs every hook of `stage` in order, isolating failures.
    ///
    /// A hook failing outside the fault stage triggers an immediate
    /// fault-stage pass that sees the error in `ctx.fault`; the previous fault
    /// is restored afterwards. Failures inside the fault stage are logged.
    pub async fn execute(&self, stage: Stage, ctx: &mut Context) {
        for hook in self.snapshot(stage) {
            let Err(err) = hook.call(ctx).await else {
                continue;
            };

            if stage == Stage::FaultRaised {
                warn!(error = %err, "Fault hook failed");
                continue;
            }

            trace!(stage = stage.as_str(), error = %err, "Hook failed, raising fault");
            let previous = ctx.fault.replace(err);
            self.raise(ctx).await;
            ctx.fault = previous;
        }
    }

    /// Runs the fault stage once; its own failures are never redirected.
    pub async fn raise(&self, ctx: &mut Context) {
        for hook in self.snapshot(Stage::FaultRaised) {
            if let Err(err) = hook.call(ctx).await {
                warn!(error = %err, "Fault hook failed");
            }
        }
    }

    /// Runs every hook of `stage` strictly in order, stopping at the first
    /// failure and returning it.
    pub async fn execute_inline(&self, stage: Stage, ctx: &mut Context) -> anyhow::Result<()> {
        for hook in self.snapshot(stage) {
            hook.call(ctx).await?;
        }
        Ok(())
    }
}
