//! Server version, as reported by `SELECT version()`.

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flavor {
    CockroachDb,
    Postgres,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Version { major, minor, patch }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServerVersion {
    pub flavor: Flavor,
    pub version: Version,
}

fn cockroach_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^CockroachDB \w+ v(\d+)\.(\d+)\.(\d+)").expect("valid regex"))
}

fn postgres_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^PostgreSQL (\d+)(?:\.(\d+))?(?:\.(\d+))?").expect("valid regex"))
}

impl ServerVersion {
    pub fn parse(text: &str) -> Option<Self> {
        let (flavor, caps) = if let Some(caps) = cockroach_re().captures(text) {
            (Flavor::CockroachDb, caps)
        } else {
            (Flavor::Postgres, postgres_re().captures(text)?)
        };
        let part = |i: usize| caps.get(i).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        Some(ServerVersion {
            flavor,
            version: Version::new(part(1), part(2), part(3)),
        })
    }

    /// Minimum versions are CockroachDB releases; other servers always qualify.
    pub fn satisfies(&self, min: Version) -> bool {
        match self.flavor {
            Flavor::CockroachDb => self.version >= min,
            Flavor::Postgres => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cockroach() {
        let v = ServerVersion::parse("CockroachDB CCL v23.1.11 (x86_64-pc-linux-gnu, built 2023/09/27 01:53:43, go1.19.10)")
            .unwrap();
        assert_eq!(v.flavor, Flavor::CockroachDb);
        assert_eq!(v.version, Version::new(23, 1, 11));
        assert!(v.satisfies(Version::new(20, 2, 0)));
    }

    #[test]
    fn old_cockroach_is_below_minimum() {
        let v = ServerVersion::parse("CockroachDB OSS v20.1.8 (x86_64-unknown-linux-gnu)").unwrap();
        assert!(!v.satisfies(Version::new(20, 2, 0)));
        assert!(v.satisfies(Version::new(20, 1, 8)));
    }

    #[test]
    fn parses_postgres() {
        let v = ServerVersion::parse("PostgreSQL 15.4 on x86_64-pc-linux-gnu, compiled by gcc").unwrap();
        assert_eq!(v.flavor, Flavor::Postgres);
        assert_eq!(v.version, Version::new(15, 4, 0));
        assert!(v.satisfies(Version::new(99, 0, 0)));
    }

    #[test]
    fn rejects_unknown() {
        assert!(ServerVersion::parse("MySQL 8.0").is_none());
        assert_eq!(Version::new(20, 2, 0).to_string(), "v20.2.0");
    }
}
