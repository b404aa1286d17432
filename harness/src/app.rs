//! Applications under test: one binding per language/ORM pair.

use crate::model::DecimalWire;
use crate::process::LaunchCommand;
use crate::schema::ExpectedSchema;
use crate::version::Version;
use std::path::{Path, PathBuf};

/// Repository root holding the bindings, `<root>/<language>/<orm>`.
pub fn workspace_root() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    manifest.parent().unwrap_or(manifest).to_path_buf()
}

/// `CARGO_TARGET_DIR` (relative to the workspace root) when set, `<workspace>/target` otherwise.
pub fn target_dir() -> PathBuf {
    let root = workspace_root();
    std::env::var_os("CARGO_TARGET_DIR")
        .filter(|dir| !dir.is_empty())
        .map(|dir| root.join(dir))
        .unwrap_or_else(|| root.join("target"))
}

/// `BINDINGS_ROOT` when set, the workspace root otherwise.
pub fn bindings_root() -> PathBuf {
    std::env::var_os("BINDINGS_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(workspace_root)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Launcher {
    /// `make start -C <dir> ADDR=<url>`
    Make,
    /// Built once with `cargo build --release -p <package>`, then the release binary is
    /// launched directly with the database URL in `ADDR`.
    Cargo { package: String },
}

#[derive(Clone, Debug)]
pub struct Application {
    pub language: String,
    pub orm: String,
    pub launcher: Launcher,
    /// URL scheme the binding's driver expects in `ADDR`.
    pub url_scheme: String,
    pub min_version: Option<Version>,
    pub schema: ExpectedSchema,
    pub decimal_wire: DecimalWire,
    /// Also run the exact-decimal and error-status checks.
    pub strict: bool,
}

impl Application {
    pub fn new(language: &str, orm: &str) -> Self {
        Application {
            language: language.to_string(),
            orm: orm.to_string(),
            launcher: Launcher::Make,
            url_scheme: "postgresql".to_string(),
            min_version: None,
            schema: ExpectedSchema::standard(),
            decimal_wire: DecimalWire::Number,
            strict: false,
        }
    }

    pub fn name(&self) -> String {
        format!("{}/{}", self.language, self.orm)
    }

    pub fn dir(&self, root: &Path) -> PathBuf {
        root.join(&self.language).join(&self.orm)
    }

    pub fn db_name(&self) -> String {
        format!("company_{}", self.orm)
    }

    pub fn launch_command(&self, root: &Path, db_url: &str, port: u16) -> LaunchCommand {
        match &self.launcher {
            Launcher::Make => LaunchCommand::new("make")
                .arg("start")
                .arg("-C")
                .arg(self.dir(root).to_string_lossy())
                .arg(format!("ADDR={db_url}")),
            Launcher::Cargo { package } => {
                LaunchCommand::new(target_dir().join("release").join(package).to_string_lossy())
                    .env("ADDR", db_url)
                    .env("LISTEN_ADDR", format!("0.0.0.0:{port}"))
                    .current_dir(workspace_root())
            }
        }
    }

    /// Compilation that must finish before `launch_command` can start within the health ceiling.
    pub fn build_command(&self) -> Option<LaunchCommand> {
        match &self.launcher {
            Launcher::Make => None,
            Launcher::Cargo { package } => Some(
                LaunchCommand::new("cargo")
                    .args(["build", "--release", "-p", package.as_str()])
                    .current_dir(workspace_root()),
            ),
        }
    }

    fn with_schema(mut self, schema: ExpectedSchema) -> Self {
        self.schema = schema;
        self
    }

    fn with_scheme(mut self, scheme: &str) -> Self {
        self.url_scheme = scheme.to_string();
        self
    }

    fn with_wire(mut self, wire: DecimalWire) -> Self {
        self.decimal_wire = wire;
        self
    }

    fn with_min_version(mut self, min: Version) -> Self {
        self.min_version = Some(min);
        self
    }
}

const V20_2: Version = Version::new(20, 2, 0);

/// Every known binding.
pub fn registry() -> Vec<Application> {
    vec![
        Application::new("go", "gopg").with_wire(DecimalWire::String),
        Application::new("go", "gorm"),
        Application::new("java", "hibernate").with_schema(ExpectedSchema::hibernate()),
        Application::new("java", "jooq"),
        Application::new("node", "sequelize").with_min_version(V20_2),
        Application::new("python", "django")
            .with_schema(ExpectedSchema::django())
            .with_scheme("cockroachdb")
            .with_min_version(V20_2),
        Application::new("ruby", "activerecord")
            .with_schema(ExpectedSchema::active_record())
            .with_scheme("cockroachdb")
            .with_min_version(V20_2),
        Application::new("ruby", "ar4")
            .with_schema(ExpectedSchema::active_record())
            .with_scheme("cockroachdb"),
        rust_sqlx(),
    ]
}

/// The in-repo binding, served by the `company-api` package.
pub fn rust_sqlx() -> Application {
    Application {
        launcher: Launcher::Cargo {
            package: "company-api".to_string(),
        },
        decimal_wire: DecimalWire::String,
        strict: true,
        ..Application::new("rust", "sqlx")
    }
}

pub fn find(name: &str) -> Option<Application> {
    registry().into_iter().find(|app| app.name() == name)
}
