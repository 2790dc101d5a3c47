use std::{process, sync::Arc};

use designmypdf::{
    application::{
        background::BackgroundTasks,
        error::AppError,
        export::Rasterizer,
        pipeline::{GenerationPipeline, PipelineConfig, PipelineDeps},
        publish::ObjectStorage,
        render::{HandlebarsEngine, TemplateEngine},
        repos::{AccessKeysRepo, GenerationLogsRepo, TemplatesRepo},
    },
    cache::CacheConfig,
    config,
    infra::{
        chromium::ChromiumRasterizer,
        db::PostgresRepositories,
        error::InfraError,
        http::{self, HttpState},
        storage::{FilesystemObjectStorage, HttpObjectStorage},
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Migrate(_) => run_migrate(settings).await,
    }
}

async fn run_migrate(settings: config::Settings) -> Result<(), AppError> {
    init_repositories(&settings).await?;
    info!(target = "designmypdf::migrate", "Migrations applied");
    Ok(())
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let tasks = BackgroundTasks::new();

    let (storage, files) = build_storage(&settings.storage)?;
    let keys: Arc<dyn AccessKeysRepo> = repositories.clone();
    let templates: Arc<dyn TemplatesRepo> = repositories.clone();
    let logs: Arc<dyn GenerationLogsRepo> = repositories.clone();
    let engine: Arc<dyn TemplateEngine> = Arc::new(HandlebarsEngine::new());
    let rasterizer: Arc<dyn Rasterizer> = Arc::new(ChromiumRasterizer::new(
        settings.rasterizer.chromium_path.clone(),
    ));

    let pipeline = GenerationPipeline::new(
        PipelineDeps {
            keys,
            templates,
            logs,
            engine,
            rasterizer,
            storage,
        },
        pipeline_config(&settings),
        tasks.clone(),
    );

    let state = HttpState {
        pipeline: Arc::new(pipeline),
        db: Some(repositories),
        files,
        max_body_bytes: settings.pipeline.max_body_bytes,
    };

    let result = serve_http(&settings, state).await;

    info!(
        target = "designmypdf::shutdown",
        in_flight = tasks.in_flight(),
        "Draining background tasks"
    );
    tasks.shutdown(settings.server.graceful_shutdown).await;

    result
}

fn pipeline_config(settings: &config::Settings) -> PipelineConfig {
    PipelineConfig {
        render_timeout: settings.pipeline.render_timeout,
        export_timeout: settings.pipeline.export_timeout,
        request_deadline: settings.pipeline.request_deadline,
        cleanup_delay: settings.pipeline.cleanup_delay,
        work_dir: settings.pipeline.work_dir.clone(),
        cache: CacheConfig::from(&settings.cache),
    }
}

type StorageParts = (
    Arc<dyn ObjectStorage>,
    Option<Arc<FilesystemObjectStorage>>,
);

fn build_storage(storage: &config::StorageSettings) -> Result<StorageParts, AppError> {
    match storage {
        config::StorageSettings::Filesystem {
            root,
            public_base_url,
        } => {
            let files = Arc::new(
                FilesystemObjectStorage::new(root.clone(), public_base_url.clone())
                    .map_err(|err| AppError::from(InfraError::from(err)))?,
            );
            let storage: Arc<dyn ObjectStorage> = files.clone();
            Ok((storage, Some(files)))
        }
        config::StorageSettings::Http {
            endpoint,
            bucket,
            token,
            public_base_url,
        } => {
            let client =
                HttpObjectStorage::new(endpoint, bucket, token.clone(), public_base_url.clone())
                    .map_err(|err| AppError::from(InfraError::configuration(err.to_string())))?;
            Ok((Arc::new(client), None))
        }
    }
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    let pool = PostgresRepositories::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    Ok(Arc::new(PostgresRepositories::new(pool)))
}

async fn serve_http(settings: &config::Settings, state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "designmypdf::serve",
        addr = %settings.server.addr,
        "Listening"
    );

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(
            target = "designmypdf::shutdown",
            error = %err,
            "Failed to listen for shutdown signal"
        );
        std::future::pending::<()>().await;
    }
    info!(target = "designmypdf::shutdown", "Shutdown signal received");
}
