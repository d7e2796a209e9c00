use std::{backtrace::Backtrace, panic, process::ExitCode, sync::Arc};

use kube::{config::KubeConfigOptions, Client, Config as KubeConfig};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use kubepulse::{
    cloud::{CloudMetadataCache, ProviderRegistry},
    config::Config,
    live::{LiveState, LiveViewEngine},
    log,
    mirror::ObjectMirror,
    orchestrator::Orchestrator,
    source::{cluster_info, KubeLister, KubeUsageLister, MirrorLister},
    ui::{spawn_input_thread, TerminalRenderer},
    Error, Result,
};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "kubepulse failed");
            eprintln!("kubepulse: {e}");
            ExitCode::FAILURE
        }
    }
}

#[tracing::instrument]
async fn connect(context: Option<String>) -> Result<(Client, String)> {
    let options = KubeConfigOptions {
        context,
        cluster: None,
        user: None,
    };
    let config = KubeConfig::from_kubeconfig(&options)
        .await
        .map_err(|e| Error::config(format!("kubeconfig: {e}")))?;
    let host = config.cluster_url.to_string();
    let client = Client::try_from(config)?;
    Ok((client, host))
}

async fn run() -> Result<()> {
    let config = Config::load()?;
    log::setup_logger(&config.log_dir())?;

    let default = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let bt = Backtrace::force_capture();
        error!(target: "panic", "panic: {panic_info}\n\nBacktrace:\n{bt}");
        default(panic_info);
    }));

    let (client, host) = connect(config.context.clone()).await?;
    let cluster = cluster_info(&client, host).await;
    info!(host = %cluster.host, version = %cluster.version, "connected");

    let mirror = Arc::new(ObjectMirror::new(config.sync_timeout()));
    if let Err(e) = mirror.start(client.clone()).await {
        warn!(error = %e, "mirror unavailable, listing from the API on every refresh");
    }

    let objects = Arc::new(MirrorLister::new(mirror.clone(), KubeLister::new(client.clone())));
    let usage = Arc::new(KubeUsageLister::new(client));

    let registry = Arc::new(ProviderRegistry::new());
    let cache = match config.cache_path() {
        Some(path) => CloudMetadataCache::with_persistence(config.cache.ttl(), registry, path),
        None => CloudMetadataCache::new(config.cache.ttl(), registry),
    };
    let orchestrator = Orchestrator::new(objects, usage, cluster, config.max_concurrent())
        .with_cloud_cache(Arc::new(cache));

    let mut state = LiveState::new(
        config.refresh_interval(),
        config.node_limit,
        config.pod_limit,
        config.max_concurrent(),
    );
    state.sort = config.sort;
    state.toggles = config.toggles;

    let renderer = TerminalRenderer::stdout()?;
    let (tx, rx) = mpsc::channel(32);
    // Exits on quit or once the engine drops the receiver.
    let _input = spawn_input_thread(tx);

    let state = LiveViewEngine::new(orchestrator, renderer, state)
        .with_mirror(mirror)
        .run(rx)
        .await?;
    info!(view = %state.mode, sort = %state.sort, "exiting");
    Ok(())
}
