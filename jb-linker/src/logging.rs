use owo_colors::OwoColorize;
use std::sync::OnceLock;
use supports_color::Stream;
use tracing_subscriber::EnvFilter;

static ANSI_ENABLED: OnceLock<bool> = OnceLock::new();

/// Environment variable checked before `RUST_LOG`.
pub const LOG_ENV: &str = "JB_LOG";

pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    let ansi = detect_ansi();
    let _ = ANSI_ENABLED.set(ansi);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_ansi(ansi)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|err| std::io::Error::other(err.to_string()))?;
    Ok(())
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn category_linker() -> String {
    if ansi_enabled() {
        format!("{}", "LINKER".bright_cyan().bold())
    } else {
        "LINKER".to_string()
    }
}

pub fn category_emulation() -> String {
    if ansi_enabled() {
        format!("{}", "EMULATION".bright_green().bold())
    } else {
        "EMULATION".to_string()
    }
}

pub fn category_resolver() -> String {
    if ansi_enabled() {
        format!("{}", "RESOLVER".bright_magenta().bold())
    } else {
        "RESOLVER".to_string()
    }
}

fn ansi_enabled() -> bool {
    *ANSI_ENABLED.get_or_init(detect_ansi)
}

fn detect_ansi() -> bool {
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }

    if std::env::var_os("FORCE_COLOR").is_some() {
        return true;
    }

    supports_color::on_cached(Stream::Stderr).is_some()
}
