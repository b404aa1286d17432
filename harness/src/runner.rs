//! One full suite: provision, launch, first run, relaunch, second run, teardown.

use crate::app::{bindings_root, Application};
use crate::database::{DatabaseConfig, TestDatabase};
use crate::driver::TestDriver;
use crate::error::HarnessError;
use crate::process::{AppProcess, LaunchSettings};
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SuiteOutcome {
    Passed,
    Skipped(String),
}

pub async fn run_suite(
    app: &Application,
    db_config: &DatabaseConfig,
    settings: &LaunchSettings,
) -> Result<SuiteOutcome, HarnessError> {
    let name = app.name();
    tracing::info!(app = %name, auth = ?db_config.auth, topology = ?db_config.topology, "suite starting");
    let mut db = TestDatabase::start(db_config).await?;
    let result = run_against(app, &db, settings).await;
    db.stop().await;
    match &result {
        Ok(SuiteOutcome::Passed) => tracing::info!(app = %name, "suite passed"),
        Ok(SuiteOutcome::Skipped(reason)) => tracing::warn!(app = %name, %reason, "suite skipped"),
        Err(e) => tracing::error!(app = %name, error = %e, "suite failed"),
    }
    result
}

async fn run_against(
    app: &Application,
    db: &TestDatabase,
    settings: &LaunchSettings,
) -> Result<SuiteOutcome, HarnessError> {
    let setup = db.setup_database(app).await?;
    if let Some(min) = app.min_version {
        if !setup.version.satisfies(min) {
            setup.pool.close().await;
            return Ok(SuiteOutcome::Skipped(format!(
                "{} requires CockroachDB {min}, server is {}",
                app.name(),
                setup.version.version
            )));
        }
    }

    if let Some(build) = app.build_command() {
        if let Err(e) = build.run_to_completion().await {
            setup.pool.close().await;
            return Err(e);
        }
    }
    let command = app.launch_command(&bindings_root(), setup.app_url.as_str(), settings.app_port);
    let mut process = AppProcess::launch(&app.name(), command, settings.clone()).await?;
    let driver = TestDriver::new(setup.pool.clone(), Arc::new(app.clone()), process.api().clone());

    let result = async {
        driver.first_run().await?;
        process.restart().await?;
        driver.second_run().await
    }
    .await;

    if let Err(e) = process.kill().await {
        tracing::warn!(error = %e, "stopping application");
    }
    setup.pool.close().await;
    result.map(|()| SuiteOutcome::Passed)
}
