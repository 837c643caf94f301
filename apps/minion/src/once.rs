//! Single-shot diagnostic run of one probe.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use probemesh::{execute_probe, Probe, ProbeContext};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Probing;

pub struct OnceReport {
    pub success: bool,
    pub dump_path: PathBuf,
}

fn dump_file_name(probe: &str, success: bool) -> String {
    let outcome = if success { "success" } else { "fail" };
    let at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    format!("probe-{probe}-{outcome}-{at}.txt")
}

/// Run `probe` once regardless of its schedule and dump the full context
/// into `output_dir`, whatever the outcome.
pub async fn run_once(probe: &Probe, probing: &Probing, output_dir: &Path) -> anyhow::Result<OnceReport> {
    let options = probing.execute_options().ignore_schedule(true);
    let mut ctx = ProbeContext::new();

    let success = match execute_probe(&CancellationToken::new(), probe, &mut ctx, &options).await {
        Ok(_) => {
            info!(probe = %probe.name, "probe succeeded");
            true
        }
        Err(err) => {
            error!(probe = %probe.name, error = %err, "probe failed");
            false
        }
    };

    let dump_path = output_dir.join(dump_file_name(&probe.name, success));
    tokio::fs::write(&dump_path, ctx.to_table(false))
        .await
        .with_context(|| format!("failed to write context dump {}", dump_path.display()))?;
    info!(path = %dump_path.display(), "context dump written");

    Ok(OnceReport { success, dump_path })
}
