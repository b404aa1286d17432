//! Process settings from the environment (`.env` is loaded by the binary first).

use std::path::PathBuf;

pub const DEFAULT_ADDR: &str = "postgresql://root@localhost:26257/company_sqlx?sslmode=disable";
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:6543";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    /// Database URL (`ADDR`).
    pub database_url: String,
    /// HTTP bind address (`LISTEN_ADDR`).
    pub listen_addr: String,
    /// Optional directory with a schema override (`SCHEMA_PATH`).
    pub schema_path: Option<PathBuf>,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |k: &str| lookup(k).filter(|v| !v.trim().is_empty());
        Settings {
            database_url: non_empty("ADDR").unwrap_or_else(|| DEFAULT_ADDR.into()),
            listen_addr: non_empty("LISTEN_ADDR").unwrap_or_else(|| DEFAULT_LISTEN_ADDR.into()),
            schema_path: non_empty("SCHEMA_PATH").map(PathBuf::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_when_unset() {
        let s = Settings::from_lookup(|_| None);
        assert_eq!(s.database_url, DEFAULT_ADDR);
        assert_eq!(s.listen_addr, DEFAULT_LISTEN_ADDR);
        assert!(s.schema_path.is_none());
    }

    #[test]
    fn reads_overrides_and_ignores_blank() {
        let env: HashMap<&str, &str> = [
            ("ADDR", "postgresql://root@db:26257/company_x?sslmode=disable"),
            ("LISTEN_ADDR", "  "),
            ("SCHEMA_PATH", "/etc/company/schema"),
        ]
        .into_iter()
        .collect();
        let s = Settings::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(s.database_url, "postgresql://root@db:26257/company_x?sslmode=disable");
        assert_eq!(s.listen_addr, DEFAULT_LISTEN_ADDR);
        assert_eq!(s.schema_path, Some(PathBuf::from("/etc/company/schema")));
    }
}
