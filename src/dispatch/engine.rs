use std::any::Any;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::anyhow;
use futures::FutureExt;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace};

use crate::config::EngineConfig;
use crate::dispatch::breaker::CircuitBreaker;
use crate::dispatch::context::{ConnectionInfo, Context, Inbound, Protocol, ResponseSink};
use crate::dispatch::hooks::{Hook, HookMode, HookPipeline, Stage, hook_fn};
use crate::dispatch::plugin::Plugin;
use crate::dispatch::pool::ContextPool;
use crate::error::DispatchError;
use crate::router::{Handler, Router, handler_fn};
use crate::server::{Adapter, ListenOptions, WriteBack};

const COMPLETION_CHANNEL: usize = 256;

/// Summary published after every completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub protocol: Protocol,
    pub method: Option<String>,
    pub path: Option<String>,
    pub status: u16,
    pub faulted: bool,
}

impl Completion {
    fn of(ctx: &Context) -> Option<Self> {
        Some(Self {
            protocol: ctx.protocol?,
            method: ctx.method.clone(),
            path: ctx.path.clone(),
            status: ctx.status,
            faulted: ctx.fault.is_some(),
        })
    }
}

/// The dispatch core.
///
/// Owns the router, hook pipeline, context pool, circuit breaker and the
/// service and protocol registries. Every adapter funnels its requests
/// through [`Engine::handle_request`].
///
/// # Request Pipeline
/// ```text
/// shutting down? ─▶ breaker check ─▶ acquire context ─▶ request-received hooks
///     ─▶ route lookup ─▶ handler (fault boundary) ─▶ response-ready hooks
///     ─▶ completion notification ─▶ release context
/// ```
pub struct Engine {
    router: RwLock<Router>,
    hooks: HookPipeline,
    pool: ContextPool,
    breaker: CircuitBreaker,
    hook_mode: HookMode,
    services: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,
    protocols: RwLock<HashMap<String, Arc<dyn Adapter>>>,
    shutting_down: AtomicBool,
    write_back: AtomicBool,
    completions: broadcast::Sender<Completion>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

impl Engine {
    pub fn new(config: &EngineConfig) -> Self {
        let (completions, _) = broadcast::channel(COMPLETION_CHANNEL);
        Self {
            router: RwLock::new(Router::new()),
            hooks: HookPipeline::new(),
            pool: ContextPool::with_options(
                config.pool.capacity,
                config.pool.prefill,
                config.pool.buffer_size,
            ),
            breaker: CircuitBreaker::new(config.breaker.threshold, config.breaker.cooldown()),
            hook_mode: config.hook_mode,
            services: RwLock::new(HashMap::new()),
            protocols: RwLock::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
            write_back: AtomicBool::new(false),
            completions,
        }
    }

    pub fn route(&self, method: &str, path: &str, handler: impl Handler + 'static) {
        self.router.write().insert(method, path, Arc::new(handler));
    }

    /// Registers a synchronous closure as the handler for `method` and `path`.
    pub fn route_fn<F>(&self, method: &str, path: &str, f: F)
    where
        F: Fn(&mut Context) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.route(method, path, handler_fn(f));
    }

    pub fn hook(&self, stage: Stage, hook: impl Hook + 'static) {
        self.hooks.register(stage, Arc::new(hook));
    }

    pub fn hook_fn<F>(&self, stage: Stage, f: F)
    where
        F: Fn(&mut Context) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.hook(stage, hook_fn(f));
    }

    /// Registers `hook` under a stage name. Unknown names are ignored and
    /// `false` is returned.
    pub fn hook_named(&self, stage: &str, hook: impl Hook + 'static) -> bool {
        self.hooks.register_named(stage, Arc::new(hook))
    }

    pub fn register_service<T>(&self, name: impl Into<String>, service: T)
    where
        T: Any + Send + Sync,
    {
        self.register_service_arc(name, Arc::new(service));
    }

    pub fn register_service_arc(&self, name: impl Into<String>, service: Arc<dyn Any + Send + Sync>) {
        self.services.write().insert(name.into(), service);
    }

    /// Looks up a service by name, returning `None` when it is missing or of
    /// another type.
    pub fn service<T>(&self, name: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let service = self.services.read().get(name).cloned()?;
        service.downcast::<T>().ok()
    }

    pub fn register_protocol(&self, name: impl Into<String>, adapter: Arc<dyn Adapter>) {
        self.protocols.write().insert(name.into(), adapter);
    }

    pub fn register_plugin(&self, plugin: &dyn Plugin) {
        debug!(plugin = plugin.name(), "Applying plugin");
        plugin.apply(self);
    }

    /// Starts the adapter registered as `protocol` on `port`.
    pub async fn listen(
        self: &Arc<Self>,
        protocol: &str,
        port: u16,
        options: &ListenOptions,
    ) -> anyhow::Result<SocketAddr> {
        let adapter = self
            .protocols
            .read()
            .get(protocol)
            .cloned()
            .ok_or_else(|| anyhow!("Protocol {protocol} not registered"))?;

        adapter.listen(Arc::clone(self), port, options).await
    }

    /// Installs the response-ready hook that hands each context to its sink.
    /// Only the first call registers it.
    pub fn install_write_back(&self) {
        if !self.write_back.swap(true, Ordering::SeqCst) {
            self.hook(Stage::ResponseReady, WriteBack);
        }
    }

    /// Receives a [`Completion`] for every request that finishes the pipeline.
    pub fn subscribe(&self) -> broadcast::Receiver<Completion> {
        self.completions.subscribe()
    }

    pub fn router(&self) -> &RwLock<Router> {
        &self.router
    }

    pub fn hooks(&self) -> &HookPipeline {
        &self.hooks
    }

    pub fn pool(&self) -> &ContextPool {
        &self.pool
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn hook_mode(&self) -> HookMode {
        self.hook_mode
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Single entry point for every adapter.
    ///
    /// Returns `Ok(())` for requests that completed or were dropped because
    /// the engine is shutting down. A breaker rejection or an abandoned request
    /// is reported to the adapter, which decides what, if anything, goes back
    /// on the wire.
    pub async fn handle_request(
        &self,
        protocol: Protocol,
        request: Inbound,
        sink: Option<Arc<dyn ResponseSink>>,
        connection: Option<ConnectionInfo>,
    ) -> Result<(), DispatchError> {
        if self.is_shutting_down() {
            trace!(%protocol, "Dropping request during shutdown");
            return Ok(());
        }

        self.breaker.check()?;

        let Ok(mut ctx) = self.pool.acquire() else {
            trace!(%protocol, "Dropping request, context pool closed");
            return Ok(());
        };

        ctx.protocol = Some(protocol);
        ctx.sink = sink;
        ctx.connection = connection;
        ctx.push = request.push;
        ctx.body = request.body;

        if protocol.is_header_bearing() {
            ctx.method = request.method;
            ctx.path = request.path;
            ctx.headers = request.headers;
        }

        let outcome = AssertUnwindSafe(self.run_pipeline(&mut ctx))
            .catch_unwind()
            .await;

        let err = match outcome {
            Ok(Ok(())) => {
                self.pool.release(ctx);
                return Ok(());
            }
            Ok(Err(err)) => err,
            Err(panic) => anyhow!("panic in request pipeline: {}", panic_message(panic.as_ref())),
        };

        error!(%protocol, error = %err, "Request handling error");
        self.breaker.record_failure();
        Err(DispatchError::Pipeline(err))
    }

    async fn run_pipeline(&self, ctx: &mut Context) -> anyhow::Result<()> {
        self.run_stage(Stage::RequestReceived, ctx).await?;

        if ctx.method.is_some() && ctx.path.is_some() {
            self.dispatch(ctx).await?;
        }

        self.run_stage(Stage::ResponseReady, ctx).await?;

        if let Some(completion) = Completion::of(ctx) {
            // No subscribers is not an error.
            let _ = self.completions.send(completion);
        }
        Ok(())
    }

    async fn run_stage(&self, stage: Stage, ctx: &mut Context) -> anyhow::Result<()> {
        match self.hook_mode {
            HookMode::Isolated => {
                self.hooks.execute(stage, ctx).await;
                Ok(())
            }
            HookMode::Inline => self.hooks.execute_inline(stage, ctx).await,
        }
    }

    async fn dispatch(&self, ctx: &mut Context) -> anyhow::Result<()> {
        let handler = {
            let Context {
                method,
                path,
                params,
                query,
                ..
            } = &mut *ctx;
            let (Some(method), Some(target)) = (method.as_deref(), path.as_deref()) else {
                return Ok(());
            };

            let (route, raw_query) = match target.split_once('?') {
                Some((route, raw_query)) => (route, Some(raw_query)),
                None => (target, None),
            };
            if let Some(raw_query) = raw_query {
                query.extend(url::form_urlencoded::parse(raw_query.as_bytes()).into_owned());
            }

            self.router.read().lookup(method, route, params)
        };

        let Some(handler) = handler else {
            ctx.status = 404;
            return Ok(());
        };

        let outcome = AssertUnwindSafe(handler.call(ctx)).catch_unwind().await;
        let fault = match outcome {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(err)) => err,
            Err(panic) => anyhow!("handler panicked: {}", panic_message(panic.as_ref())),
        };

        debug!(
            method = ctx.method.as_deref().unwrap_or_default(),
            path = ctx.path.as_deref().unwrap_or_default(),
            error = %fault,
            "Handler fault"
        );
        ctx.fault = Some(fault);
        self.run_fault_stage(ctx).await
    }

    async fn run_fault_stage(&self, ctx: &mut Context) -> anyhow::Result<()> {
        match self.hook_mode {
            HookMode::Isolated => {
                self.hooks.raise(ctx).await;
                Ok(())
            }
            HookMode::Inline => self.hooks.execute_inline(Stage::FaultRaised, ctx).await,
        }
    }

    /// Stops accepting work: later requests are dropped, every registered
    /// adapter is closed and the context pool is closed. Idempotent.
    pub fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down gracefully");

        let adapters: Vec<(String, Arc<dyn Adapter>)> = self
            .protocols
            .read()
            .iter()
            .map(|(name, adapter)| (name.clone(), Arc::clone(adapter)))
            .collect();

        for (name, adapter) in adapters {
            debug!(protocol = %name, "Closing adapter");
            adapter.close();
        }

        self.pool.close();
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
