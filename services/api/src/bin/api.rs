//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{CloudMediaRelay, ImgurHost, OpenAiChatAdapter, PgStore, TalksAdapter},
    config::Config,
    error::ApiError,
    web::{
        auth::{login_handler, logout_handler, signup_handler},
        character_setting_handler, chat_history_handler, choose_partner_handler,
        generate_partner_image_handler, get_image_url_handler, idle_video_handler,
        middleware::require_auth,
        reply_message_handler, rest::ApiDoc, state::AppState, upload_image_handler,
        user_status_handler,
    },
};
use async_openai::{config::OpenAIConfig, Client};
use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use companion_core::conversation::ConversationManager;
use companion_core::ports::AssetStore;
use companion_core::provisioning::PartnerProvisioner;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let pg_store = PgStore::new(db_pool);
    info!("Running database migrations...");
    pg_store.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Service Adapters ---
    let openai_config = OpenAIConfig::new().with_api_key(
        config
            .openai_api_key
            .as_ref()
            .ok_or_else(|| ApiError::Internal("OPENAI_API_KEY is required".to_string()))?,
    );
    let openai_client = Client::with_config(openai_config);
    let chat_adapter = OpenAiChatAdapter::new(openai_client, config.chat_model.clone());

    let http_client = reqwest::Client::new();
    let talks_adapter = TalksAdapter::new(
        http_client.clone(),
        config.talks_api_url.clone(),
        config.talks_api_key.clone(),
    );
    let media_relay = CloudMediaRelay::new(
        http_client.clone(),
        config.media_upload_url.clone(),
        config.media_cloud_name.clone(),
        config.media_upload_preset.clone(),
    );
    let image_host = ImgurHost::new(
        http_client,
        config.image_host_url.clone(),
        config.image_host_client_id.clone(),
    );

    // --- 4. Build the Core Managers & Shared AppState ---
    let store: Arc<dyn AssetStore> = Arc::new(pg_store);
    let conversations = ConversationManager::new(store.clone(), Arc::new(chat_adapter));

    let shutdown = CancellationToken::new();
    let provisioner = Arc::new(PartnerProvisioner::new(
        store.clone(),
        Arc::new(talks_adapter),
        Arc::new(media_relay),
        Arc::new(image_host),
        conversations.clone(),
        config.poll_policy(),
        shutdown.clone(),
    ));

    let app_state = AppState {
        config: config.clone(),
        store,
        conversations,
        provisioner,
    };

    // In-flight provisioning polls abort promptly when the process stops.
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received.");
            signal_token.cancel();
        }
    });

    let cors = CorsLayer::new()
        .allow_origin("http://localhost:3000".parse::<HeaderValue>().unwrap())
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // --- 5. Create the Web Router ---
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/auth/signup", post(signup_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/logout", post(logout_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/user/status", get(user_status_handler))
        .route("/partner", post(choose_partner_handler))
        .route("/partner/generateImage", post(generate_partner_image_handler))
        .route("/partner/image", post(upload_image_handler))
        .route("/partner/characterSetting", post(character_setting_handler))
        .route("/chat", post(reply_message_handler))
        .route("/chat/imageURL", get(get_image_url_handler))
        .route("/chat/idleVideo", get(idle_video_handler))
        .route("/chat/history", get(chat_history_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    // Combine API routes
    let api_router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024))
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    Ok(())
}
