use std::net::SocketAddr;
use std::sync::Arc;

use diesel::{pg::PgConnection, Connection};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use dotenv::dotenv;
use log::info;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use govdata_worker_lib::{
    cli::parse_args,
    config::Config,
    db::build_db_pool,
    import_service::{ImportConfig, ImportService},
    logging::init_logging,
    registry_client::{
        congress::CongressClient, default_rate_limiter, federal_register::FederalRegisterClient,
        legislators::LegislatorsClient,
    },
    server::setup_server_with_addr,
    state::AppState,
};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

/// Gracefully shuts down the worker when a SIGTERM or SIGINT arrives.
async fn handle_shutdown_signals(state: Arc<AppState>) {
    let mut sigterm =
        signal(SignalKind::terminate()).expect("failed to register SIGTERM signal handler");
    let mut sigint =
        signal(SignalKind::interrupt()).expect("failed to register SIGINT signal handler");

    tokio::select! {
        _ = sigterm.recv() => {
            info!("SIGTERM received, shutting down.");
        }
        _ = sigint.recv() => {
            info!("SIGINT received, shutting down.");
        }
    }

    state.shutdown_token.cancel();
}

fn run_initial_migrations(
    connection: &mut impl MigrationHarness<diesel::pg::Pg>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    connection.run_pending_migrations(MIGRATIONS)?;
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenv().ok();

    let args = parse_args();
    let logging_context = init_logging("govdata_worker", "serve", &args.log_level);
    let run_span = tracing::info_span!(
        "worker_run",
        service = %logging_context.service,
        environment = %logging_context.environment,
        run_id = %logging_context.run_id
    );
    let _run_guard = run_span.enter();

    let config = Config::from_env().expect("DATABASE_URL must be set");

    if !args.skip_migrations {
        let mut temp_conn = PgConnection::establish(&config.db_url)
            .expect("could not connect to postgres for migrations");
        run_initial_migrations(&mut temp_conn).expect("database migrations failed");
    }

    let pool = build_db_pool(&config.db_url)
        .await
        .expect("could not initialize DB pool");

    let import_service = Arc::new(ImportService::new(pool.clone(), ImportConfig::default()));
    let congress = CongressClient::new(
        config.congress_api_url.clone(),
        config.congress_api_key.clone(),
        default_rate_limiter(),
    );
    let federal_register = FederalRegisterClient::new(
        config.federal_register_api_url.clone(),
        default_rate_limiter(),
    );
    let legislators =
        LegislatorsClient::new(config.legislators_repo_url.clone(), default_rate_limiter());

    let state = Arc::new(AppState::new(
        pool,
        CancellationToken::new(),
        import_service,
        congress,
        federal_register,
        legislators,
    ));

    let shutdown_handle = tokio::spawn(handle_shutdown_signals(state.clone()));

    let addr: SocketAddr = args.bind.parse().expect("invalid --bind address");
    let server_handle = setup_server_with_addr(state.clone(), addr)
        .await
        .expect("failed to bind admin server");
    info!("admin server listening on {addr}");

    shutdown_handle.await.expect("shutdown handler panicked");
    let _ = server_handle.await;
}
