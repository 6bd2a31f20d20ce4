use anyhow::Context;
use env_logger::Env;
use leadscout::{
    configuration::get_configuration,
    domain::progress::RunEvent,
    export::{write_csv, write_report},
    services::RunRequest,
    startup::build,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let configuration = get_configuration().context("Failed to read configuration.")?;
    let pipeline = build(&configuration).await?;

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, finishing in-flight work");
            ctrl_c_cancel.cancel();
        }
    });

    let (event_sender, event_receiver) = mpsc::unbounded_channel::<RunEvent>();
    let event_logger = tokio::spawn(log_events(event_receiver));

    let request = RunRequest::from(&configuration.run);
    let result = pipeline.run(request.clone(), event_sender, cancel).await;
    let _ = event_logger.await;
    let report = result?;

    let run = &configuration.run;
    let mut leads = report.new_leads;
    if run.export_known {
        leads.extend(report.updated_leads);
    }
    write_csv(&run.output, &leads, run.append)?;
    write_report(&request, &report.summary, &run.output)?;

    log::info!(
        "Run finished ({}): {}",
        report.stage,
        serde_json::to_string(&report.summary)?
    );
    Ok(())
}

async fn log_events(mut events: mpsc::UnboundedReceiver<RunEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            RunEvent::Progress(progress) => log::debug!(
                "{} {}/{} {}",
                progress.stage,
                progress.items_done,
                progress.items_total,
                progress.current_item.unwrap_or_default()
            ),
            RunEvent::TaskFailed {
                task,
                attempts,
                reason,
            } => log::warn!("Search '{}' gave up after {} attempts: {}", task, attempts, reason),
            RunEvent::Fatal(message) => log::error!("Run aborted: {}", message),
            RunEvent::Summary(summary) => log::info!(
                "{} new leads, {} stored or updated, {} failed searches, {} failed enrichments",
                summary.new_leads,
                summary.total_leads,
                summary.failed_tasks,
                summary.failed_enrichments
            ),
        }
    }
}
