use tracing::info;

#[tokio::main]
async fn main() -> Result<(), mock_oidc::MockError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let addr = std::env::var("MOCK_OIDC_ADDR").unwrap_or_else(|_| "127.0.0.1:4000".to_string());
    let issuer =
        std::env::var("MOCK_OIDC_ISSUER").unwrap_or_else(|_| "http://localhost:4000".to_string());

    let app = mock_oidc::router(issuer.clone())?;
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(address = %addr, issuer = %issuer, "mock OIDC provider listening");
    axum::serve(listener, app).await?;
    Ok(())
}
