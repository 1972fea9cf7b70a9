//! audiosync - measure the lag between local playback and a remote stream.
//!
//! Captures whatever the desktop is playing from the default sink's
//! monitor, decodes the given URL in parallel, and reports how far the
//! remote stream trails (or leads) the local one. Exit code 0 means the
//! interval ladder ran to a decision - matched or not; exit code 1 means
//! setup failed or a stream backend died mid-run.

use anyhow::Context;
use clap::Parser;

use audiosync_core::{
    IntervalLadder, MIN_CONFIDENCE, RunOutcome, SAMPLE_RATE, Session, SyncConfig,
};
use audiosync_io::{DecodeSource, MonitorSource};

#[derive(Parser)]
#[command(name = "audiosync")]
#[command(author, version, about = "Measure the lag of a remote stream against local playback", long_about = None)]
struct Cli {
    /// Media URL to fetch and align against local playback
    url: String,

    /// Confidence a correlation peak must reach to accept a lag estimate
    #[arg(long, default_value_t = MIN_CONFIDENCE)]
    min_confidence: f32,

    /// First correlation interval in seconds; later intervals are its
    /// multiples
    #[arg(long, default_value_t = 3)]
    base_interval: u32,

    /// Number of escalating intervals to try before giving up
    #[arg(long, default_value_t = 5)]
    steps: usize,

    /// Monitor source to capture (defaults to the default sink's monitor)
    #[arg(long)]
    device: Option<String>,

    /// Decode command template; `{url}` is replaced by the stream URL and
    /// stdout must carry raw f32le mono at 48 kHz
    #[arg(long)]
    decoder: Option<String>,
}

fn main() -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();

    let ladder = IntervalLadder::from_base(
        cli.base_interval as usize * SAMPLE_RATE as usize,
        cli.steps,
    )
    .context("invalid interval ladder")?;
    let mut config = SyncConfig::with_ladder(ladder);
    config.min_confidence = cli.min_confidence;

    let capture = MonitorSource::connect(cli.device.as_deref())
        .context("could not open the playback monitor")?;
    let download = match &cli.decoder {
        Some(template) => spawn_custom_decoder(template, &cli.url)?,
        None => DecodeSource::spawn(&cli.url).context("could not start the decoder")?,
    };

    let session = Session::new(config);
    let stop = session.stop_handle();
    ctrlc::set_handler(move || {
        tracing::info!("interrupt received, stopping");
        stop.stop();
    })
    .context("failed to install the interrupt handler")?;

    let report = session
        .run(capture, download)
        .context("failed to start the run")?;

    for channel in &report.stalled {
        tracing::warn!(%channel, "producer did not exit in time; its backend may leak");
    }

    match report.outcome {
        RunOutcome::Matched { lag, confidence } => {
            println!(
                "RESULT: lag={:.3}, confidence={confidence:.3}",
                lag_millis(lag)
            );
            Ok(())
        }
        RunOutcome::NoMatch => {
            println!("RESULT: no-match");
            Ok(())
        }
        RunOutcome::Failed { channel, reason } => {
            anyhow::bail!("{channel} stream failed: {reason}")
        }
    }
}

/// Lag in milliseconds at the build-time sample rate. Internal bookkeeping
/// is in samples; milliseconds only exist on this output line.
fn lag_millis(lag_samples: i64) -> f64 {
    lag_samples as f64 * 1000.0 / f64::from(SAMPLE_RATE)
}

/// Split a `--decoder` template into a command, substituting `{url}`.
fn spawn_custom_decoder(template: &str, url: &str) -> anyhow::Result<DecodeSource> {
    let words: Vec<String> = template
        .split_whitespace()
        .map(|word| word.replace("{url}", url))
        .collect();
    let (program, args) = words
        .split_first()
        .ok_or_else(|| anyhow::anyhow!("--decoder template is empty"))?;
    DecodeSource::with_command(program, args)
        .with_context(|| format!("could not start the decoder '{program}'"))
}
