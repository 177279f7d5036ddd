mod bridge;
mod routes;

use crate::bridge::{BridgeConfig, HostBridge};
use crate::routes::AppState;
use clap::Parser;
use crayon_core::host_ipc::DEFAULT_MAX_FRAME_BYTES;
use crayon_engine::{ColorEngine, EngineConfig};
use crayon_storage::{MemorySettingsStore, SettingsPersistence, SettingsStore, StorageError};
use std::{
    fs::OpenOptions,
    io::{self, Write},
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

const DEFAULT_HUB_ADDR: &str = "127.0.0.1:47170";

#[derive(Clone, Debug)]
struct Config {
    addr: String,
    db_path: Option<PathBuf>,
    engine_config_path: Option<PathBuf>,
    debug: bool,
    log_dir: String,
    request_timeout: Duration,
    write_timeout: Duration,
}

#[derive(Parser, Debug)]
#[command(name = "crayon-hub")]
struct Args {
    #[arg(long, default_value = "")]
    addr: String,
    /// SQLite file for settings; settings stay in memory when unset.
    #[arg(long, default_value = "")]
    db: String,
    /// TOML file with engine tuning (poll interval, batch sizes, pending limits).
    #[arg(long, default_value = "")]
    config: String,
    #[arg(long, default_value_t = false)]
    debug: bool,
    #[arg(long, default_value = "")]
    log_dir: String,
    #[arg(long, default_value_t = 5)]
    request_timeout: u64,
    #[arg(long, default_value_t = 2)]
    write_timeout: u64,
}

#[tokio::main]
async fn main() {
    let config = load_config(Args::parse());
    let _log_guard = init_logging(&config);
    let addr: SocketAddr = match config.addr.parse() {
        Ok(value) => value,
        Err(err) => {
            error!(event = "invalid_addr", error = %err, addr = %config.addr);
            return;
        }
    };
    if !addr.ip().is_loopback() {
        error!(event = "invalid_addr", addr = %config.addr, reason = "not_loopback");
        return;
    }

    let engine_config = match load_engine_config(&config) {
        Ok(value) => value,
        Err(err) => {
            error!(event = "config_error", error = %err);
            return;
        }
    };
    let store = match open_store(&config) {
        Ok(value) => value,
        Err(err) => {
            error!(event = "store_error", error = %err);
            return;
        }
    };

    let bridge = Arc::new(HostBridge::new(BridgeConfig {
        request_timeout: config.request_timeout,
        write_timeout: config.write_timeout,
        max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        ..BridgeConfig::default()
    }));
    let engine = Arc::new(ColorEngine::new(
        engine_config,
        bridge.clone(),
        bridge.clone(),
        store,
    ));
    engine.warm_up().await;
    engine.start();

    let app = routes::router(AppState {
        engine: engine.clone(),
        bridge,
    });

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(value) => value,
        Err(err) => {
            error!(event = "hub_error", error = %err);
            engine.stop();
            return;
        }
    };

    info!(
        event = "hub_start",
        addr = %config.addr,
        poll_interval_ms = engine.config().poll_interval_ms
    );

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    if let Err(err) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    {
        error!(event = "hub_error", error = %err);
    }

    engine.stop();
    info!(event = "hub_stop");
}

fn load_config(args: Args) -> Config {
    let addr = resolve_addr(&args.addr);
    let debug = args.debug || env_true("CRAYON_HUB_DEBUG");
    Config {
        addr,
        db_path: resolve_path(&args.db, "CRAYON_DB"),
        engine_config_path: resolve_path(&args.config, "CRAYON_CONFIG"),
        debug,
        log_dir: resolve_log_dir(&args.log_dir),
        request_timeout: Duration::from_secs(args.request_timeout.max(1)),
        write_timeout: Duration::from_secs(args.write_timeout.max(1)),
    }
}

fn load_engine_config(config: &Config) -> Result<EngineConfig, crayon_engine::ConfigError> {
    match &config.engine_config_path {
        Some(path) => {
            let loaded = EngineConfig::load(path)?;
            info!(event = "engine_config_loaded", path = %path.display());
            Ok(loaded)
        }
        None => Ok(EngineConfig::default()),
    }
}

fn open_store(config: &Config) -> Result<Arc<dyn SettingsPersistence>, StorageError> {
    match &config.db_path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    if let Err(err) = std::fs::create_dir_all(parent) {
                        warn!(event = "store_dir_error", path = %parent.display(), error = %err);
                    }
                }
            }
            let store = SettingsStore::open(path)?;
            info!(event = "store_open", path = %path.display());
            Ok(Arc::new(store))
        }
        None => {
            warn!(event = "store_in_memory", reason = "no_db_path");
            Ok(Arc::new(MemorySettingsStore::new()))
        }
    }
}

fn init_logging(config: &Config) -> Option<LogGuard> {
    let level = if config.debug {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("CRAYON_LOG_LEVEL") {
        level
    } else {
        "info".to_string()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let writer = match open_log_file(&config.log_dir) {
        Ok(log_guard) => log_guard,
        Err(err) => {
            eprintln!("log_file_error: {err}");
            LogGuard { file: None }
        }
    };
    let file = writer.file.clone();
    let make_writer = BoxMakeWriter::new(move || MultiWriter::new(file.clone()));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(writer)
}

struct LogGuard {
    file: Option<Arc<Mutex<std::fs::File>>>,
}

struct MultiWriter {
    stdout: io::Stdout,
    file: Option<Arc<Mutex<std::fs::File>>>,
}

impl MultiWriter {
    fn new(file: Option<Arc<Mutex<std::fs::File>>>) -> Self {
        Self {
            stdout: io::stdout(),
            file,
        }
    }
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = self.stdout.write_all(buf);
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.write_all(buf);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.stdout.flush();
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
        Ok(())
    }
}

fn open_log_file(log_dir: &str) -> io::Result<LogGuard> {
    if log_dir.trim().is_empty() {
        return Ok(LogGuard { file: None });
    }
    let dir = PathBuf::from(log_dir);
    if std::fs::create_dir_all(&dir).is_err() {
        return Ok(LogGuard { file: None });
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("crayon-hub.log"))?;
    Ok(LogGuard {
        file: Some(Arc::new(Mutex::new(file))),
    })
}

fn env_true(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => parse_flag(&value),
        Err(_) => false,
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn first_non_empty(flag: &str, env_value: Option<String>) -> Option<String> {
    if !flag.trim().is_empty() {
        return Some(flag.to_string());
    }
    env_value.filter(|value| !value.trim().is_empty())
}

fn resolve_addr(addr_flag: &str) -> String {
    first_non_empty(addr_flag, std::env::var("CRAYON_HUB_ADDR").ok())
        .unwrap_or_else(|| DEFAULT_HUB_ADDR.to_string())
}

fn resolve_path(flag: &str, env_key: &str) -> Option<PathBuf> {
    first_non_empty(flag, std::env::var(env_key).ok()).map(PathBuf::from)
}

fn resolve_log_dir(log_dir_flag: &str) -> String {
    first_non_empty(log_dir_flag, std::env::var("CRAYON_LOG_DIR").ok())
        .unwrap_or_else(|| ".crayon/logs".to_string())
}
