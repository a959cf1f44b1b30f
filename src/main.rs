mod cli;
use cli::{parse_cli_mode, run};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_logging();

    let mode = match parse_cli_mode() {
        Ok(mode) => mode,
        Err(err) => {
            eprintln!("Error: {}", err);
            println!("{}", cli::USAGE);
            return Ok(());
        }
    };

    if let Err(e) = run(mode).await {
        eprintln!("Error: {:#}", e);
        tracing::error!("agenda-sync failed: {:#}", e);
    }

    Ok(())
}

fn setup_logging() {
    let log_dir = agenda_sync::storage::Config::config_dir();

    std::fs::create_dir_all(&log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(log_dir, "agenda-sync.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_ansi(false)
        .with_target(false)
        .init();

    std::mem::forget(_guard);

    tracing::info!("agenda-sync started");
}
