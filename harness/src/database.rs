//! Test database provisioning: a throwaway CockroachDB node, optionally fronted by a tenant
//! SQL server and a SQL proxy, or an externally managed server.

use crate::app::Application;
use crate::error::HarnessError;
use crate::process::{pick_free_port, ChildProcess, LaunchCommand};
use crate::schema::quote_ident;
use crate::version::ServerVersion;
use crate::wait::{poll_until, Attempt, PollPolicy};
use reqwest::Url;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Connection, PgConnection};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

const TENANT_ID: u32 = 2;
const PASSWORD_USER: &str = "testuser";
const PASSWORD: &str = "testpass";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthMode {
    Insecure,
    Password,
    ClientCert,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Topology {
    Single,
    Tenant,
    TenantWithProxy,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub auth: AuthMode,
    pub topology: Topology,
    /// Use this server instead of spawning one; auth and topology are then ignored.
    pub external_url: Option<String>,
    pub cockroach_binary: PathBuf,
    pub startup: PollPolicy,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            auth: AuthMode::Insecure,
            topology: Topology::Single,
            external_url: None,
            cockroach_binary: PathBuf::from("cockroach"),
            startup: PollPolicy::fixed(Duration::from_millis(250), Duration::from_secs(60))
                .with_backoff(Duration::from_secs(2)),
        }
    }
}

impl DatabaseConfig {
    /// Defaults overridden by `COCKROACH_BINARY` and `DATABASE_URL`.
    pub fn from_env() -> Self {
        let mut config = DatabaseConfig::default();
        if let Some(bin) = std::env::var_os("COCKROACH_BINARY") {
            config.cockroach_binary = PathBuf::from(bin);
        }
        config.external_url = std::env::var("DATABASE_URL").ok().filter(|u| !u.is_empty());
        config
    }

    pub fn with_auth(mut self, auth: AuthMode) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.topology == Topology::TenantWithProxy && self.auth != AuthMode::Password {
            return Err(HarnessError::Config(format!(
                "the SQL proxy requires password authentication, got {:?}",
                self.auth
            )));
        }
        if let Some(url) = &self.external_url {
            Url::parse(url).map_err(|e| HarnessError::Config(format!("invalid DATABASE_URL: {e}")))?;
        }
        Ok(())
    }

    fn secure(&self) -> bool {
        self.auth != AuthMode::Insecure
    }
}

/// Connection details for one application's database.
pub struct DatabaseSetup {
    pub pool: PgPool,
    /// URL handed to the application, in the scheme its driver expects.
    pub app_url: Url,
    pub version: ServerVersion,
}

pub struct TestDatabase {
    /// URL clients connect with, pointing at `defaultdb`.
    client_url: Url,
    processes: Vec<ChildProcess>,
    _store: Option<TempDir>,
}

impl TestDatabase {
    pub async fn start(config: &DatabaseConfig) -> Result<Self, HarnessError> {
        config.validate()?;
        if let Some(url) = &config.external_url {
            let client_url = Url::parse(url).map_err(|e| HarnessError::Config(e.to_string()))?;
            let mut db = TestDatabase {
                client_url: client_url.clone(),
                processes: Vec::new(),
                _store: None,
            };
            db.wait_for_sql(&client_url, &config.startup).await?;
            tracing::info!(url = %redact(&db.client_url), "using external database");
            return Ok(db);
        }

        let store = tempfile::Builder::new().prefix("company-harness-").tempdir()?;
        let root = store.path().to_path_buf();
        let certs = root.join("certs");
        let logs = root.join("logs");
        let mut db = TestDatabase {
            client_url: Url::parse("postgresql://localhost")
                .map_err(|e| HarnessError::Config(e.to_string()))?,
            processes: Vec::new(),
            _store: Some(store),
        };

        if config.secure() {
            generate_certs(&config.cockroach_binary, &certs, config.topology != Topology::Single).await?;
        }

        let sql_port = pick_free_port()?;
        let http_port = pick_free_port()?;
        let mut node = LaunchCommand::new(config.cockroach_binary.to_string_lossy())
            .arg("start-single-node")
            .arg(format!("--store={}", root.join("node").display()))
            .arg(format!("--listen-addr=127.0.0.1:{sql_port}"))
            .arg(format!("--http-addr=127.0.0.1:{http_port}"));
        node = security_flags(node, config.secure(), &certs);
        db.processes.push(ChildProcess::spawn("cockroach", &node, &logs, 1)?);
        let node_url = root_url(sql_port, config.secure(), &certs)?;
        db.wait_for_sql(&node_url, &config.startup).await?;
        tracing::info!(port = sql_port, "cockroach node ready");

        let mut sql_url = node_url.clone();
        if config.topology != Topology::Single {
            let tenant_port = db.start_tenant(config, &root, &certs, sql_port).await?;
            sql_url = root_url(tenant_port, config.secure(), &certs)?;
            db.wait_for_sql(&sql_url, &config.startup).await?;
            tracing::info!(port = tenant_port, tenant = TENANT_ID, "tenant SQL server ready");
        }

        db.client_url = sql_url.clone();
        if config.auth == AuthMode::Password {
            create_password_user(&sql_url).await?;
            db.client_url = password_url(&sql_url)?;
        }

        if config.topology == Topology::TenantWithProxy {
            let proxy_port = db.start_proxy(config, &logs, sql_url.port().unwrap_or(26257))?;
            let mut url = password_url(&sql_url)?;
            url.set_port(Some(proxy_port))
                .map_err(|_| HarnessError::Config("cannot set proxy port".into()))?;
            url.set_query(Some(&format!("sslmode=require&options=--cluster=tenant-cluster-{TENANT_ID}")));
            db.client_url = url;
        }

        let client_url = db.client_url.clone();
        db.wait_for_sql(&client_url, &config.startup).await?;
        tracing::info!(url = %redact(&db.client_url), "database ready");
        Ok(db)
    }

    async fn start_tenant(
        &mut self,
        config: &DatabaseConfig,
        root: &Path,
        certs: &Path,
        kv_port: u16,
    ) -> Result<u16, HarnessError> {
        let host_url = root_url(kv_port, config.secure(), certs)?;
        let mut conn = PgConnection::connect(host_url.as_str()).await?;
        sqlx::query(&format!("SELECT crdb_internal.create_tenant({TENANT_ID})"))
            .execute(&mut conn)
            .await?;
        conn.close().await?;

        let sql_port = pick_free_port()?;
        let http_port = pick_free_port()?;
        let mut tenant = LaunchCommand::new(config.cockroach_binary.to_string_lossy())
            .args(["mt", "start-sql"])
            .arg(format!("--tenant-id={TENANT_ID}"))
            .arg(format!("--kv-addrs=127.0.0.1:{kv_port}"))
            .arg(format!("--sql-addr=127.0.0.1:{sql_port}"))
            .arg(format!("--http-addr=127.0.0.1:{http_port}"))
            .arg(format!("--store={}", root.join("tenant").display()));
        tenant = security_flags(tenant, config.secure(), certs);
        self.processes
            .push(ChildProcess::spawn("cockroach-tenant", &tenant, &root.join("logs"), 1)?);
        Ok(sql_port)
    }

    fn start_proxy(&mut self, config: &DatabaseConfig, logs: &Path, backend_port: u16) -> Result<u16, HarnessError> {
        let port = pick_free_port()?;
        let metrics_port = pick_free_port()?;
        let proxy = LaunchCommand::new(config.cockroach_binary.to_string_lossy())
            .args(["mt", "start-proxy"])
            .arg(format!("--listen-addr=127.0.0.1:{port}"))
            .arg(format!("--listen-metrics=127.0.0.1:{metrics_port}"))
            .arg(format!("--routing-rule=127.0.0.1:{backend_port}"))
            .args(["--listen-cert=*", "--listen-key=*", "--skip-verify"]);
        self.processes.push(ChildProcess::spawn("cockroach-proxy", &proxy, logs, 1)?);
        Ok(port)
    }

    async fn wait_for_sql(&mut self, url: &Url, policy: &PollPolicy) -> Result<(), HarnessError> {
        let what = format!("SQL connectivity at {}", redact(url));
        let processes = &mut self.processes;
        poll_until(policy, &what, || {
            let alive: Result<(), HarnessError> = processes.iter_mut().try_for_each(ChildProcess::check_running);
            let url = url.clone();
            async move {
                alive?;
                Ok(match PgConnection::connect(url.as_str()).await {
                    Ok(conn) => {
                        let _ = conn.close().await;
                        Attempt::Ready(())
                    }
                    Err(e) => Attempt::Retry(e.to_string()),
                })
            }
        })
        .await
    }

    pub fn client_url(&self) -> &Url {
        &self.client_url
    }

    /// Create the application's database and connect to it.
    pub async fn setup_database(&self, app: &Application) -> Result<DatabaseSetup, HarnessError> {
        let db_name = app.db_name();
        let mut admin = PgConnection::connect(self.client_url.as_str()).await?;
        create_database_if_missing(&mut admin, &db_name).await?;
        let version_text: String = sqlx::query_scalar("SELECT version()").fetch_one(&mut admin).await?;
        admin.close().await?;
        let version = ServerVersion::parse(&version_text)
            .ok_or_else(|| HarnessError::Config(format!("unrecognized server version {version_text:?}")))?;

        let db_url = with_database(&self.client_url, &db_name);
        let pool = PgPoolOptions::new().max_connections(5).connect(db_url.as_str()).await?;
        let app_url = with_scheme(&db_url, &app.url_scheme)?;
        tracing::info!(database = %db_name, version = %version_text, "database set up");
        Ok(DatabaseSetup { pool, app_url, version })
    }

    pub async fn stop(&mut self) {
        while let Some(mut process) = self.processes.pop() {
            process.kill_group();
            if let Err(e) = process.wait(Duration::from_secs(10)).await {
                tracing::warn!(error = %e, "database process did not exit");
            }
        }
    }
}

/// Works on both PostgreSQL and CockroachDB; PostgreSQL has no `CREATE DATABASE IF NOT EXISTS`.
/// Returns whether the database was created.
pub async fn create_database_if_missing(conn: &mut PgConnection, name: &str) -> Result<bool, HarnessError> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(name)
        .fetch_one(&mut *conn)
        .await?;
    if exists {
        return Ok(false);
    }
    sqlx::query(&format!("CREATE DATABASE {}", quote_ident(name)))
        .execute(&mut *conn)
        .await?;
    Ok(true)
}

fn security_flags(cmd: LaunchCommand, secure: bool, certs: &Path) -> LaunchCommand {
    if secure {
        cmd.arg(format!("--certs-dir={}", certs.display()))
    } else {
        cmd.arg("--insecure")
    }
}

async fn run_tool(binary: &Path, args: &[String]) -> Result<(), HarnessError> {
    let output = tokio::process::Command::new(binary)
        .args(args)
        .output()
        .await
        .map_err(|source| HarnessError::Spawn {
            command: format!("{} {}", binary.display(), args.join(" ")),
            source,
        })?;
    if !output.status.success() {
        return Err(HarnessError::EarlyExit {
            name: format!("{} {}", binary.display(), args.join(" ")),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(())
}

async fn generate_certs(binary: &Path, certs: &Path, tenant: bool) -> Result<(), HarnessError> {
    tokio::fs::create_dir_all(certs).await?;
    let certs_dir = format!("--certs-dir={}", certs.display());
    let ca_key = format!("--ca-key={}", certs.join("ca.key").display());
    let mut steps: Vec<Vec<String>> = vec![
        vec!["cert".into(), "create-ca".into()],
        vec!["cert".into(), "create-node".into(), "127.0.0.1".into(), "localhost".into()],
        vec!["cert".into(), "create-client".into(), "root".into(), "--also-generate-pkcs8-key".into()],
    ];
    if tenant {
        steps.push(vec!["mt".into(), "cert".into(), "create-tenant-client".into(), TENANT_ID.to_string()]);
    }
    for mut step in steps {
        step.push(certs_dir.clone());
        step.push(ca_key.clone());
        run_tool(binary, &step).await?;
    }
    tracing::debug!(dir = %certs.display(), "certificates generated");
    Ok(())
}

async fn create_password_user(root_url: &Url) -> Result<(), HarnessError> {
    let mut conn = PgConnection::connect(root_url.as_str()).await?;
    sqlx::query(&format!(
        "CREATE USER IF NOT EXISTS {PASSWORD_USER} WITH PASSWORD '{PASSWORD}'"
    ))
    .execute(&mut conn)
    .await?;
    sqlx::query(&format!("GRANT admin TO {PASSWORD_USER}"))
        .execute(&mut conn)
        .await?;
    conn.close().await?;
    Ok(())
}

fn root_url(port: u16, secure: bool, certs: &Path) -> Result<Url, HarnessError> {
    let text = if secure {
        format!(
            "postgresql://root@127.0.0.1:{port}/defaultdb?sslmode=verify-full&sslrootcert={}&sslcert={}&sslkey={}",
            certs.join("ca.crt").display(),
            certs.join("client.root.crt").display(),
            certs.join("client.root.key").display(),
        )
    } else {
        format!("postgresql://root@127.0.0.1:{port}/defaultdb?sslmode=disable")
    };
    Url::parse(&text).map_err(|e| HarnessError::Config(format!("bad database url {text}: {e}")))
}

/// The same endpoint, authenticating with the password user and only the CA certificate.
fn password_url(root_url: &Url) -> Result<Url, HarnessError> {
    let mut url = root_url.clone();
    url.set_username(PASSWORD_USER)
        .and_then(|_| url.set_password(Some(PASSWORD)))
        .map_err(|_| HarnessError::Config("cannot set credentials".into()))?;
    let query: Vec<(String, String)> = root_url
        .query_pairs()
        .filter(|(k, _)| k != "sslcert" && k != "sslkey")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.query_pairs_mut().clear().extend_pairs(query);
    Ok(url)
}

pub fn with_database(url: &Url, database: &str) -> Url {
    let mut url = url.clone();
    url.set_path(&format!("/{database}"));
    url
}

pub fn with_scheme(url: &Url, scheme: &str) -> Result<Url, HarnessError> {
    let rest = &url.as_str()[url.scheme().len()..];
    Url::parse(&format!("{scheme}{rest}")).map_err(|e| HarnessError::Config(format!("cannot use scheme {scheme}: {e}")))
}

fn redact(url: &Url) -> String {
    let mut url = url.clone();
    if url.password().is_some() {
        let _ = url.set_password(Some("***"));
    }
    url.to_string()
}
