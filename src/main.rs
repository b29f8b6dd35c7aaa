use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use stint_api::{
    build_router,
    config::AppConfig,
    database::{connection::get_db_client, indexes::ensure_indexes, MongoStore},
    services::{
        clock::SystemClock,
        flutterwave_service::FlutterwaveService,
        gateway::CompositeGateway,
        mpesa_service::MpesaService,
        notifier::MongoNotifier,
        sweeper::spawn_sweeper,
        Marketplace,
    },
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stint_api=info,tower_http=info")),
        )
        .init();

    let config = AppConfig::from_env().context("loading configuration")?;
    tracing::debug!("⚙️ {}", config.get_config_info());
    let db = get_db_client(&config).await.context("connecting to MongoDB")?;
    if let Err(e) = ensure_indexes(&db).await {
        tracing::warn!("⚠️ Could not create indexes: {}", e);
    }

    let (gateway, flutterwave) = initialize_gateway(&config).await?;
    let market = Arc::new(Marketplace::new(
        Arc::new(MongoStore::new(db.clone())),
        Arc::new(gateway),
        Arc::new(MongoNotifier::new(&db)),
        Arc::new(SystemClock),
        config.policy.clone(),
    ));
    spawn_sweeper(market.clone());

    let mut app_state = AppState::new(market, &config.jwt_secret).with_db(db);
    if let Some(flutterwave) = flutterwave {
        app_state = app_state.with_flutterwave(flutterwave);
    }

    let app = build_router(app_state);
    start_server(app, &config).await
}

async fn initialize_gateway(
    config: &AppConfig,
) -> anyhow::Result<(CompositeGateway, Option<Arc<FlutterwaveService>>)> {
    let timeout = config.policy.gateway_timeout();
    let mut gateway = CompositeGateway::new();

    match &config.mpesa {
        Some(mpesa_config) => {
            tracing::info!("🔧 Attempting to initialize M-Pesa service...");
            tracing::info!("📱 Short code: {}", mpesa_config.short_code);
            let mpesa_service = Arc::new(MpesaService::new(mpesa_config.clone(), timeout)?);

            // Verify credentials up front; a failure leaves M-Pesa disabled.
            match mpesa_service.get_access_token().await {
                Ok(_) => {
                    tracing::info!("✅ M-Pesa access token obtained");
                    gateway = gateway.with_mpesa(mpesa_service);
                }
                Err(e) => {
                    tracing::error!("❌ Failed to get M-Pesa access token: {}", e);
                    tracing::warn!("M-Pesa payments will be disabled");
                }
            }
        }
        None => tracing::warn!("M-Pesa is not configured; mobile money payments are disabled"),
    }

    let flutterwave = match &config.flutterwave {
        Some(card_config) => {
            let service = Arc::new(FlutterwaveService::new(card_config.clone(), timeout)?);
            gateway = gateway.with_card(service.clone());
            tracing::info!("✅ Card payments enabled");
            Some(service)
        }
        None => {
            tracing::warn!("Flutterwave is not configured; card payments are disabled");
            None
        }
    };

    Ok((gateway, flutterwave))
}

async fn start_server(app: axum::Router, config: &AppConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", config.host, config.port))?;

    tracing::info!("🚀 Server starting on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
