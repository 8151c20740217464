use axum::{
    Router, routing::{get, post, put},
};
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    trace::TraceLayer,
};
use tracing::info;
use crate::api::handler::{
    AppState, bulk_create_accounts, create_rule, delete_rule, get_accounts, get_due_rules,
    health_check, list_user_rules, refresh_accounts, update_rule,
};

pub async fn create_app(state: AppState) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    let app = Router::new()
        // Public health check endpoint
        .route("/health", get(health_check))

        .nest("/api/v1",
            Router::new()
                // Account snapshot endpoints
                .route("/sections/:section_idx/accounts", get(get_accounts))
                .route("/sections/:section_idx/accounts/refresh", post(refresh_accounts))
                .route("/accounts/bulk", post(bulk_create_accounts))

                // Recurring rule endpoints
                .route("/schedule/due", get(get_due_rules))
                .route("/rules", post(create_rule))
                .route("/users/:user_idx/rules", get(list_user_rules))
                .route(
                    "/users/:user_idx/rules/:rule_idx",
                    put(update_rule).delete(delete_rule),
                )
        )
        .layer(CompressionLayer::new())
        .layer(CorsLayer::very_permissive())
        // Add request tracing
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

pub async fn run_server(
    app: Router,
    bind_address: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app).await?;
    Ok(())
}
