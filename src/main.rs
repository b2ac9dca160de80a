use std::process::ExitCode;

use cycletrace::{Coordinator, PipelineError, Settings};
use tokio_util::sync::CancellationToken;
use tracing::Level;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    let mut args = std::env::args().skip(1);
    let Some(source) = args.next() else {
        eprintln!("usage: cycletrace <video path or url> [config override]");
        return ExitCode::from(1);
    };
    let config_override = args.next();

    match run(&source, config_override.as_deref()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::from(e.exit_code().clamp(0, 255) as u8)
        }
    }
}

async fn run(source: &str, config_override: Option<&str>) -> Result<(), PipelineError> {
    let settings = Settings::new(config_override)?;

    let cancel = CancellationToken::new();
    let coordinator = Coordinator::builder(settings)
        .cancel_token(cancel.clone())
        .build()?;

    // Ctrl-C unwinds the run at the next suspension point.
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling run");
            cancel.cancel();
        }
    });

    let result = coordinator.run(source).await?;

    tracing::info!(
        "{}: {} cycles from {} frames ({} events)",
        result.source_id,
        result.cycles.len(),
        result.frames_extracted,
        result.events_count
    );
    println!("{}", result.report.as_text());
    Ok(())
}
