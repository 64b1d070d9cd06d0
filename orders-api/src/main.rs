use std::process::ExitCode;

use axum::Router;
use database::{MongoConnector, SidecarFile};
use lifecycle::ShutdownCoordinator;
use tracing::{info, warn};

use orders_api::bootstrap::{self, BootstrapError};
use orders_api::config::ServiceEnvironment;
use orders_api::router::{self, AppState};
use orders_api::{logging, SERVICE_NAME};

#[tokio::main]
async fn main() -> ExitCode {
    let env = match ServiceEnvironment::load() {
        Ok(env) => env,
        Err(e) => {
            logging::init("info", false);
            bootstrap::report_fatal(&BootstrapError::from(e));
            return ExitCode::FAILURE;
        }
    };
    logging::init(&env.log_level, env.is_local());

    match run(env).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            bootstrap::report_fatal(&e);
            ExitCode::FAILURE
        }
    }
}

async fn run(env: ServiceEnvironment) -> Result<(), BootstrapError> {
    if env.disable_auth {
        warn!("authentication is disabled, this must never happen outside development");
    }

    let coordinator = ShutdownCoordinator::builder(SERVICE_NAME)
        .with_global_shutdown_timeout(env.shutdown_timeout)
        .build();
    let metrics = env
        .export_prometheus
        .then(router::setup_metrics_recorder)
        .transpose()?;

    let source = SidecarFile::new(&env.secret_path);
    let db = bootstrap::connect_database(&env, &source, MongoConnector).await?;

    let listener = match bootstrap::bind(&env).await {
        Ok(listener) => listener,
        Err(e) => {
            if let Err(disconnect) = db.disconnect().await {
                warn!("{disconnect}");
            }
            return Err(e);
        }
    };

    let app = router::router(AppState::new(db.clone(), &coordinator), Router::new(), metrics);
    let report = bootstrap::run_until_shutdown(&env, listener, app, db, coordinator).await?;

    // Hook failures are already logged; they do not change the exit code.
    info!(
        trigger = %report.trigger,
        clean = report.is_clean(),
        "exiting"
    );
    Ok(())
}
