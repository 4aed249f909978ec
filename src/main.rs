use std::sync::Arc;

use junction::config::ListenerConfig;
use junction::http::Http1Adapter;
use junction::http2::Http2Adapter;
use junction::server::ListenOptions;
use junction::tcp::TcpAdapter;
use junction::udp::UdpAdapter;
use junction::websocket::WebSocketAdapter;
use junction::{Config, Engine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Config::load()?;

    let engine = Arc::new(Engine::new(&cfg.engine));
    engine.register_protocol("http", Arc::new(Http1Adapter::new()));
    engine.register_protocol("http2", Arc::new(Http2Adapter::new()));
    engine.register_protocol("tcp", Arc::new(TcpAdapter::new()));
    engine.register_protocol("udp", Arc::new(UdpAdapter::new()));
    engine.register_protocol("ws", Arc::new(WebSocketAdapter::new()));

    engine.route_fn("GET", "/health", |ctx| {
        ctx.set_body("ok");
        Ok(())
    });

    let listeners = if cfg.listeners.is_empty() {
        tracing::warn!("No listeners configured, serving HTTP on 8080");
        vec![ListenerConfig {
            protocol: "http".to_string(),
            port: 8080,
            options: ListenOptions::default(),
        }]
    } else {
        cfg.listeners
    };

    for listener in &listeners {
        engine
            .listen(&listener.protocol, listener.port, &listener.options)
            .await?;
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    engine.shutdown();

    Ok(())
}
