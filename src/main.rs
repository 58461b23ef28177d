use anyhow::{Context, Result};
use parlance::{SessionBuilder, SessionConfig, SessionReport, SessionStatus};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the UI stream, logs go to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parlance=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--list-devices") {
        list_devices();
        return Ok(());
    }

    let config = match args.first() {
        Some(path) => SessionConfig::load(path).with_context(|| format!("failed to load {}", path))?,
        None => SessionConfig::default(),
    }
    .with_env_overrides();

    info!("Starting Parlance conversation session");
    let mut handle = SessionBuilder::new(config)
        .start()
        .await
        .context("failed to start session")?;

    let mut ui = handle.ui_receiver().context("UI stream already taken")?;
    let printer = tokio::spawn(async move {
        while let Some(message) = ui.recv().await {
            match serde_json::to_string(&message) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!(error = %e, "failed to encode UI message"),
            }
        }
    });

    let mut status = handle.status_changes();
    let ended_on_its_own = tokio::select! {
        _ = tokio::signal::ctrl_c() => false,
        _ = status.wait_for(|s| *s != SessionStatus::Active) => true,
    };

    let report = if ended_on_its_own {
        handle.wait().await?
    } else {
        info!("Stopping session, press Ctrl-C again to force");
        tokio::spawn(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Forced exit");
                std::process::exit(130);
            }
        });
        handle.stop().await?
    };

    let _ = printer.await;
    print_summary(&report);
    Ok(())
}

fn print_summary(report: &SessionReport) {
    info!(
        session_id = %report.session.id,
        status = report.session.status.as_str(),
        utterances = report.session.utterances.len(),
        overall = report.final_scores.overall,
        model_refreshes = report.model_refresh_attempts,
        barge_ins = report.barge_ins,
        "Session summary"
    );
}

#[cfg(feature = "audio-io")]
fn list_devices() {
    let print = |title: &str, devices: Vec<parlance::audio::AudioDeviceInfo>| {
        println!("{}:", title);
        for device in devices {
            let marker = if device.is_default { " (default)" } else { "" };
            println!("  [{}] {}{}", device.index, device.name, marker);
        }
    };
    print("Input devices", parlance::audio::input_devices());
    print("Output devices", parlance::audio::output_devices());
}

#[cfg(not(feature = "audio-io"))]
fn list_devices() {
    println!("Built without audio-io; no devices available");
}
