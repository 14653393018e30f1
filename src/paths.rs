use std::path::PathBuf;
use std::sync::OnceLock;

static VECTOR_HOME: OnceLock<PathBuf> = OnceLock::new();

/// Returns the Vector home directory (`~/.vector/`).
/// Supports `$VECTOR_HOME` env override. Cached via `OnceLock`.
pub fn vector_home() -> &'static PathBuf {
    VECTOR_HOME.get_or_init(|| {
        if let Ok(val) = std::env::var("VECTOR_HOME") {
            let p = PathBuf::from(val);
            if !p.as_os_str().is_empty() {
                return p;
            }
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".vector")
    })
}

/// `~/.vector/logs/`
pub fn logs_dir() -> PathBuf {
    vector_home().join("logs")
}

/// `~/.vector/credentials.json`
pub fn credentials_file() -> PathBuf {
    vector_home().join("credentials.json")
}
