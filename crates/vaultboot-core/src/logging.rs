//! Logger bootstrap for the Vaultboot binaries.
//!
//! The initramfs console is the primary output surface, so records default
//! to plain single-line text. Structured JSON, for shipping boot logs off
//! the box, is opt-in via `VAULTBOOT_LOG_FORMAT=json`.

use env_logger::Env;
use serde_json::json;
use std::env;
use std::io::Write;
use std::sync::OnceLock;

static INIT: OnceLock<()> = OnceLock::new();

const FORMAT_ENV: &str = "VAULTBOOT_LOG_FORMAT";
const LEVEL_ENV: &str = "VAULTBOOT_LOG_LEVEL";

/// Output shape for log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Plain,
    Json,
}

impl LogFormat {
    /// Only `json` (any case) selects JSON; everything else stays plain so
    /// a typo cannot garble the console mid-boot.
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Plain
        }
    }

    fn from_env() -> Self {
        match env::var(FORMAT_ENV) {
            Ok(value) => Self::parse(&value),
            Err(_) => LogFormat::Plain,
        }
    }
}

/// Initialize the global logger. The first caller wins; subsequent calls
/// are no-ops. `RUST_LOG` takes precedence over `VAULTBOOT_LOG_LEVEL`,
/// which takes precedence over the `default_level` argument.
pub fn init(default_level: &str) {
    let _ = INIT.get_or_init(|| configure(default_level));
}

fn configure(default_level: &str) {
    let default_level = env::var(LEVEL_ENV).unwrap_or_else(|_| default_level.to_string());
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", &default_level);
    }

    let mut builder = env_logger::Builder::from_env(Env::default());
    match LogFormat::from_env() {
        LogFormat::Plain => {
            builder.format(|buf, record| {
                writeln!(
                    buf,
                    "{} {:<5} {} {}",
                    buf.timestamp(),
                    record.level(),
                    record.target(),
                    record.args()
                )
            });
        }
        LogFormat::Json => {
            builder.format(|buf, record| {
                let payload = json!({
                    "timestamp": buf.timestamp().to_string(),
                    "level": record.level().to_string().to_lowercase(),
                    "target": record.target(),
                    "message": record.args().to_string(),
                });
                writeln!(buf, "{payload}")
            });
        }
    }

    if let Err(err) = builder.try_init() {
        eprintln!("failed to initialize logger: {err}");
    }
}
