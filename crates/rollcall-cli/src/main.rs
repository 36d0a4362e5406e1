use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, TimeZone, Utc};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance administration CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll an identity from a face image, or refresh an existing one
    Enroll {
        /// Identity to create or refresh (e.g. an employee id)
        identity_id: String,
        /// Path to the enrollment image
        image: PathBuf,
        /// Human-readable name; defaults to the identity id on first enroll
        #[arg(short, long)]
        name: Option<String>,
        /// Operator recorded in the audit trail
        #[arg(long)]
        actor: Option<String>,
    },
    /// Identify a probe image and record an IN/OUT attendance event
    Mark {
        /// Path to the probe image
        image: PathBuf,
        /// Capture device id recorded with the event
        #[arg(short, long, default_value = "cli")]
        device: String,
        /// Event direction
        #[arg(short, long, value_parser = ["in", "out"], default_value = "in")]
        mode: String,
        /// Identity the device believes it saw; never biases the match
        #[arg(long)]
        hint: Option<String>,
    },
    /// Make an identity visible to the matcher again
    Enable {
        identity_id: String,
        /// Operator recorded in the audit trail
        #[arg(long)]
        actor: Option<String>,
    },
    /// Hide an identity from the matcher without deleting its history
    Disable {
        identity_id: String,
        /// Operator recorded in the audit trail
        #[arg(long)]
        actor: Option<String>,
    },
    /// Look up which identity enrolled the image with this fingerprint
    Lookup {
        /// SHA-256 image fingerprint, lowercase hex
        fingerprint: String,
    },
    /// Download an archived enrollment image
    FetchImage {
        /// SHA-256 image fingerprint, lowercase hex
        fingerprint: String,
        /// Where to write the image
        #[arg(short, long)]
        out: PathBuf,
    },
    /// List all identities, active and inactive
    List,
    /// Attendance events in a time window, newest first
    Report {
        /// Window start (RFC 3339); defaults to the start of this month
        #[arg(long)]
        from: Option<DateTime<Utc>>,
        /// Window end (RFC 3339, exclusive); defaults to now
        #[arg(long)]
        to: Option<DateTime<Utc>>,
    },
    /// Show daemon status
    Status,
}

// D-Bus proxy — `#[zbus::proxy]` generates both `AttendanceProxy` (async)
// and `AttendanceProxyBlocking`. The CLI runs on tokio, so only the async
// variant is used here.
#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    async fn enroll(
        &self,
        identity_id: &str,
        image: &[u8],
        display_name: &str,
        actor: &str,
    ) -> zbus::Result<String>;

    async fn record_attendance(
        &self,
        image: &[u8],
        device_id: &str,
        mode: &str,
        claimed_identity: &str,
    ) -> zbus::Result<String>;

    async fn set_active(&self, identity_id: &str, active: bool, actor: &str)
        -> zbus::Result<bool>;

    async fn lookup_by_fingerprint(&self, fingerprint: &str) -> zbus::Result<String>;

    async fn fetch_image(&self, fingerprint: &str) -> zbus::Result<Vec<u8>>;

    async fn list_identities(&self) -> zbus::Result<String>;

    async fn attendance_report(&self, from: &str, to: &str) -> zbus::Result<String>;

    async fn status(&self) -> zbus::Result<String>;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let proxy = connect().await?;

    match cli.command {
        Commands::Enroll {
            identity_id,
            image,
            name,
            actor,
        } => {
            let bytes = read_image(&image)?;
            let reply = proxy
                .enroll(
                    &identity_id,
                    &bytes,
                    name.as_deref().unwrap_or(""),
                    actor.as_deref().unwrap_or(""),
                )
                .await?;
            print_json(&reply)?;
        }
        Commands::Mark {
            image,
            device,
            mode,
            hint,
        } => {
            let bytes = read_image(&image)?;
            let reply = proxy
                .record_attendance(&bytes, &device, &mode, hint.as_deref().unwrap_or(""))
                .await?;
            print_json(&reply)?;
        }
        Commands::Enable { identity_id, actor } => {
            let changed = proxy
                .set_active(&identity_id, true, actor.as_deref().unwrap_or(""))
                .await?;
            println!(
                "{identity_id}: {}",
                if changed { "enabled" } else { "already enabled" }
            );
        }
        Commands::Disable { identity_id, actor } => {
            let changed = proxy
                .set_active(&identity_id, false, actor.as_deref().unwrap_or(""))
                .await?;
            println!(
                "{identity_id}: {}",
                if changed { "disabled" } else { "already disabled" }
            );
        }
        Commands::Lookup { fingerprint } => {
            let reply = proxy.lookup_by_fingerprint(&fingerprint).await?;
            print_json(&reply)?;
        }
        Commands::FetchImage { fingerprint, out } => {
            let bytes = proxy.fetch_image(&fingerprint).await?;
            std::fs::write(&out, &bytes).with_context(|| format!("write {}", out.display()))?;
            println!("wrote {} bytes to {}", bytes.len(), out.display());
        }
        Commands::List => {
            let reply = proxy.list_identities().await?;
            print_json(&reply)?;
        }
        Commands::Report { from, to } => {
            let (from, to) = report_window(from, to, Utc::now());
            let reply = proxy
                .attendance_report(&from.to_rfc3339(), &to.to_rfc3339())
                .await?;
            print_json(&reply)?;
        }
        Commands::Status => {
            let reply = proxy.status().await?;
            print_json(&reply)?;
        }
    }

    Ok(())
}

async fn connect() -> Result<AttendanceProxy<'static>> {
    let conn = zbus::Connection::system()
        .await
        .context("connect to system bus")?;
    AttendanceProxy::new(&conn)
        .await
        .context("reach rollcalld on org.rollcall.Attendance1")
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("read image {}", path.display()))
}

/// Re-print the daemon's compact JSON replies with indentation.
fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(raw).context("parse daemon reply")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

/// Default report window is the current calendar month up to now.
fn report_window(
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let month_start = Utc
        .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now);
    (from.unwrap_or(month_start), to.unwrap_or(now))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_window_defaults_to_current_month() {
        let now = Utc.with_ymd_and_hms(2026, 3, 17, 14, 30, 0).unwrap();
        let (from, to) = report_window(None, None, now);
        assert_eq!(from, Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap());
        assert_eq!(to, now);
    }

    #[test]
    fn test_report_window_keeps_explicit_bounds() {
        let now = Utc.with_ymd_and_hms(2026, 3, 17, 14, 30, 0).unwrap();
        let from = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        assert_eq!(report_window(Some(from), Some(to), now), (from, to));
    }
}
