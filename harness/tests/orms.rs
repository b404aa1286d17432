//! End-to-end suites. They need a `cockroach` binary (or `DATABASE_URL`) and the binding's
//! toolchain, so they only run on request: `cargo test -p company-harness -- --ignored`.

use company_harness::{
    find, init_tracing, run_suite, rust_sqlx, Application, AuthMode, DatabaseConfig, HarnessError, LaunchSettings,
    SuiteOutcome, Topology,
};

async fn run(app: Application, db_config: DatabaseConfig) {
    dotenvy::dotenv().ok();
    init_tracing();
    let settings = LaunchSettings::from_env().expect("launch settings");
    match run_suite(&app, &db_config, &settings).await {
        Ok(SuiteOutcome::Passed) => {}
        Ok(SuiteOutcome::Skipped(reason)) => eprintln!("skipped {}: {reason}", app.name()),
        Err(e) => panic!("{} failed: {e}", app.name()),
    }
}

async fn run_named(name: &str) {
    let app = find(name).unwrap_or_else(|| panic!("unknown application {name}"));
    run(app, DatabaseConfig::from_env()).await;
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "needs cockroach and the Rust toolchain"]
async fn rust_sqlx_insecure() {
    run(rust_sqlx(), DatabaseConfig::from_env()).await;
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "needs cockroach and the Rust toolchain"]
async fn rust_sqlx_client_cert() {
    run(rust_sqlx(), DatabaseConfig::from_env().with_auth(AuthMode::ClientCert)).await;
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "needs cockroach and the Rust toolchain"]
async fn rust_sqlx_password_tenant() {
    let config = DatabaseConfig::from_env()
        .with_auth(AuthMode::Password)
        .with_topology(Topology::Tenant);
    run(rust_sqlx(), config).await;
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "needs cockroach and the Rust toolchain"]
async fn rust_sqlx_behind_proxy() {
    let config = DatabaseConfig::from_env()
        .with_auth(AuthMode::Password)
        .with_topology(Topology::TenantWithProxy);
    run(rust_sqlx(), config).await;
}

#[tokio::test]
async fn proxy_without_password_is_rejected_before_provisioning() {
    let config = DatabaseConfig::default()
        .with_auth(AuthMode::ClientCert)
        .with_topology(Topology::TenantWithProxy);
    let err = run_suite(&rust_sqlx(), &config, &LaunchSettings::default())
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::Config(_)), "got {err}");
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "needs cockroach, make and Go"]
async fn go_gorm() {
    run_named("go/gorm").await;
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "needs cockroach, make and Go"]
async fn go_gopg() {
    run_named("go/gopg").await;
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "needs cockroach, make and a JDK"]
async fn java_hibernate() {
    run_named("java/hibernate").await;
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "needs cockroach, make and a JDK"]
async fn java_jooq() {
    run_named("java/jooq").await;
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "needs cockroach, make and Node.js"]
async fn node_sequelize() {
    run_named("node/sequelize").await;
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "needs cockroach, make and Python"]
async fn python_django() {
    run_named("python/django").await;
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "needs cockroach, make and Ruby"]
async fn ruby_activerecord() {
    run_named("ruby/activerecord").await;
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "needs cockroach, make and Ruby"]
async fn ruby_ar4() {
    run_named("ruby/ar4").await;
}
