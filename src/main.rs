use color_eyre::eyre::{bail, Result};
use crm_import::{
    ContactStatus, ImportClient, ImportConfig, ImportFailure, ImportRun, ImportStatus,
    ImportTracker, ProgressEvent,
};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("crm_import=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_event(event: &ProgressEvent) {
    match event.status {
        ImportStatus::Started => println!("Import started"),
        ImportStatus::Progress => {
            let percent = event
                .percent()
                .map(|p| format!("{:>3}%", p))
                .unwrap_or_else(|| "  ?%".to_string());
            let contact = event
                .current_contact
                .as_ref()
                .map(|c| {
                    let label = match c.status {
                        ContactStatus::Processing => "processing",
                        ContactStatus::Created => "created",
                        ContactStatus::Skipped => "skipped",
                    };
                    format!("  {} ({})", c.name, label)
                })
                .unwrap_or_default();
            println!(
                "{} {}/{} created={} skipped={}{}",
                percent, event.processed, event.total, event.created, event.skipped, contact
            );
        }
        ImportStatus::Completed => println!("Import completed"),
        ImportStatus::Error => {}
    }
}

/// Pull events until the run ends or Ctrl+C is pressed.
async fn consume(
    run: &mut ImportRun,
    tracker: &mut ImportTracker,
    config: &ImportConfig,
) -> Result<()> {
    loop {
        let next = tokio::select! {
            next = run.next_event_timeout(config.idle_timeout) => next,
            _ = tokio::signal::ctrl_c() => {
                run.close();
                bail!("Import cancelled; the server may still be importing");
            }
        };

        match next {
            Ok(Some(event)) => {
                print_event(&event);
                tracker.apply(&event);
            }
            Ok(None) => break,
            Err(e) => {
                tracker.record_transport_failure(&e);
                tracing::error!(code = e.error_code(), error = %e, "Import stream failed");
                bail!("{}", e.user_message());
            }
        }
    }

    if !tracker.is_finished() {
        tracker.record_interrupted();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    if std::env::args().any(|a| a == "--version" || a == "-V") {
        println!("crm-import {}", VERSION);
        return Ok(());
    }

    init_tracing();

    let config = ImportConfig::from_env();
    let client = ImportClient::new(config.clone());
    let mut run = client.start().await;
    let mut tracker = ImportTracker::new();

    consume(&mut run, &mut tracker, &config).await?;

    let outcome = tracker.outcome();
    let elapsed = tracker
        .elapsed()
        .map(|d| format!("{:.1}s", d.num_milliseconds() as f64 / 1000.0))
        .unwrap_or_default();

    match outcome.failure {
        None => {
            println!(
                "Imported {} of {} contacts ({} created, {} skipped) in {}",
                outcome.processed, outcome.total, outcome.created, outcome.skipped, elapsed
            );
            Ok(())
        }
        Some(ImportFailure::Server(message)) => bail!("Import failed: {}", message),
        Some(failure) => bail!("{}", failure.message()),
    }
}
