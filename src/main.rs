use crucible::config::Config;
use crucible::server;
use crucible::store::{Paths, Registry};
use std::path::PathBuf;
use std::sync::Arc;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = Config::from_args(&args);

    let paths = Paths {
        database_dir: PathBuf::from(&config.database_path),
        log_dir: PathBuf::from(&config.log_path),
    };
    let registry = Arc::new(Registry::new(paths, config.aof_persistence, config.rdb_persistence));

    server::run_server(&config.bind, config.port, registry, config.snapshot_interval()).await
}
