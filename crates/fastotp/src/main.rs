//! FastOTP - Entry point.

use fastotp::{
    api::{create_router_with_rate_limit, RateLimitState},
    build_state, delivery,
    payments::Gateways,
    spawn_sweeper, Config, Store, Sweeper, SystemClock,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level));
    let registry = tracing_subscriber::registry().with(filter);
    if config.log.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    info!("Starting FastOTP");
    if config.otp.expose_code {
        warn!("otp.expose_code is enabled; plaintext codes are returned to API callers");
    }

    // Initialize storage
    let store = if config.storage.persist {
        match Store::open(config.storage.path.clone(), &config.otp.secret).await {
            Ok(store) => store,
            Err(e) => {
                error!("Failed to open store at {:?}: {}", config.storage.path, e);
                std::process::exit(1);
            }
        }
    } else {
        info!("Persistence disabled, using in-memory storage");
        Store::memory()
    };
    let store = Arc::new(store);

    // Gateways
    let delivery = match delivery::from_config(&config.delivery) {
        Ok(d) => d,
        Err(e) => {
            error!("Failed to create delivery gateway: {}", e);
            std::process::exit(1);
        }
    };
    let gateways = match Gateways::from_config(&config.payments) {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create payment gateways: {}", e);
            std::process::exit(1);
        }
    };

    let state = build_state(&config, store, delivery, gateways, Arc::new(SystemClock));

    let sweeper = Sweeper::new(
        state.engine.clone(),
        state.reconciler.clone(),
        config.sweep.interval,
        config.payments.pending_ttl,
    );
    let sweeper_handle = spawn_sweeper(sweeper);

    let rate_limit = RateLimitState::new(config.rate_limit.global_per_minute);
    let app = create_router_with_rate_limit(state, rate_limit);

    // Bind to address
    let addr = SocketAddr::new(
        config
            .server
            .listen_addr
            .parse()
            .unwrap_or([0, 0, 0, 0].into()),
        config.server.port,
    );

    info!("Listening on {}", addr);

    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    // Run server until Ctrl-C
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
        })
        .await;

    sweeper_handle.abort();
    if let Err(e) = result {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}
