mod error;
mod routes;
mod state;

use anyhow::Context;
use clap::Parser;
use emotion_monitor_core::classifier::{FixedEmotionClassifier, SharedClassifier};
use emotion_monitor_core::config::{
    parse_listen_addr, resolve_optional_string, resolve_scratch_dir, upload_limit_bytes,
    AnalysisConfig, DecoderKind, Env, SegmentLength, ServiceConfig, StdEnv, StoreLocation,
    DEFAULT_DATABASE_URL, DEFAULT_LISTEN_ADDR, DEFAULT_MAX_UPLOAD_MB, DEFAULT_MODEL_PATH,
    DEFAULT_SEGMENT_SECS, ENV_DATABASE_URL, ENV_DECODER, ENV_LISTEN_ADDR, ENV_MODEL_PATH,
    ENV_SCALER_PATH,
};
use emotion_monitor_core::decode::Decoder;
use emotion_monitor_core::pipeline::{EmotionPipeline, PipelineConfig};
use emotion_monitor_core::scaler::{FittedScaler, ScalerMode};
use emotion_monitor_core::store::Store;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "emotion-monitor")]
#[command(about = "Speech emotion analysis service with patient records")]
struct Args {
    #[arg(long, env = ENV_LISTEN_ADDR, default_value = DEFAULT_LISTEN_ADDR)]
    listen: String,

    #[arg(long, env = ENV_DATABASE_URL, default_value = DEFAULT_DATABASE_URL)]
    database_url: String,

    #[arg(long, env = ENV_MODEL_PATH, default_value = DEFAULT_MODEL_PATH)]
    model_path: PathBuf,

    /// JSON file with a fitted `{mean, scale}`; per-segment scaling when absent.
    #[arg(long)]
    scaler_path: Option<String>,

    #[arg(long)]
    scratch_dir: Option<String>,

    #[arg(long, env = ENV_DECODER, default_value = "symphonia")]
    decoder: String,

    #[arg(long, default_value_t = DEFAULT_SEGMENT_SECS)]
    segment_secs: f32,

    #[arg(long, default_value_t = DEFAULT_MAX_UPLOAD_MB)]
    max_upload_mb: usize,

    /// Score every row with a uniform distribution instead of loading the model.
    #[arg(long, default_value_t = false)]
    dry_run_classifier: bool,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level)?;

    let env = StdEnv;
    let cfg = build_config(args, &env)?;

    tracing::info!(
        listen = %cfg.listen,
        store = %cfg.store,
        decoder = ?cfg.decoder,
        segment_secs = cfg.analysis.segment.secs,
        scratch_dir = %cfg.scratch_dir.display(),
        "config loaded"
    );

    run_server(cfg).await
}

async fn run_server(cfg: ServiceConfig) -> anyhow::Result<()> {
    let store = Store::open(cfg.store.clone())
        .with_context(|| format!("failed to open database {}", cfg.store))?;

    let pipeline = EmotionPipeline::new(
        Decoder::from_kind(cfg.decoder, cfg.analysis.sample_rate)
            .context("failed to set up audio decoder")?,
        load_classifier(&cfg)?,
        load_scaler(&cfg)?,
        PipelineConfig::from_service(&cfg),
    );

    let app = routes::router(state::AppState::new(store, pipeline), cfg.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(cfg.listen)
        .await
        .with_context(|| format!("failed to bind {}", cfg.listen))?;
    let local_addr = listener
        .local_addr()
        .context("failed to read local listener address")?;

    tracing::info!(address = %local_addr, "serving");
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("shut down");
    Ok(())
}

fn load_classifier(cfg: &ServiceConfig) -> anyhow::Result<SharedClassifier> {
    if cfg.dry_run_classifier {
        tracing::warn!("dry-run classifier enabled; predictions are a uniform distribution");
        return Ok(Arc::new(FixedEmotionClassifier::uniform()));
    }

    load_model(&cfg.model_path)
}

#[cfg(feature = "onnx")]
fn load_model(path: &Path) -> anyhow::Result<SharedClassifier> {
    let classifier = emotion_monitor_core::classifier::OnnxEmotionClassifier::load(path)
        .context("failed to load emotion model")?;
    Ok(Arc::new(classifier))
}

#[cfg(not(feature = "onnx"))]
fn load_model(path: &Path) -> anyhow::Result<SharedClassifier> {
    anyhow::bail!(
        "built without the onnx feature; cannot load {} (use --dry-run-classifier)",
        path.display()
    )
}

fn load_scaler(cfg: &ServiceConfig) -> anyhow::Result<ScalerMode> {
    match &cfg.scaler_path {
        Some(path) => {
            let scaler = FittedScaler::load(path)
                .with_context(|| format!("failed to load scaler {}", path.display()))?;
            tracing::info!(path = %path.display(), "using fitted scaler");
            Ok(ScalerMode::Fitted(scaler))
        }
        None => Ok(ScalerMode::PerSegment),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(
            level
                .parse()
                .with_context(|| format!("invalid --log-level: {level}"))?,
        )
        .from_env_lossy();

    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

fn build_config(args: Args, env: &impl Env) -> anyhow::Result<ServiceConfig> {
    let listen = parse_listen_addr(&args.listen)?;
    let store = StoreLocation::parse(&args.database_url)?;
    let decoder: DecoderKind = args.decoder.parse()?;
    let segment = SegmentLength::new(args.segment_secs)?;
    let max_upload_bytes = upload_limit_bytes(args.max_upload_mb)?;

    let scaler_path =
        resolve_optional_string(args.scaler_path, ENV_SCALER_PATH, env).map(PathBuf::from);
    let scratch_dir = resolve_scratch_dir(args.scratch_dir, env);

    Ok(ServiceConfig {
        listen,
        store,
        model_path: args.model_path,
        scaler_path,
        scratch_dir,
        decoder,
        analysis: AnalysisConfig {
            segment,
            ..AnalysisConfig::default()
        },
        max_upload_bytes,
        dry_run_classifier: args.dry_run_classifier,
    })
}
