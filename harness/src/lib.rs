//! Conformance harness for the company REST API bindings.
//!
//! A suite provisions a database, launches a binding as a subprocess, and checks both the
//! HTTP API and the schema the binding generated, before and after a restart.

pub mod api;
pub mod app;
pub mod database;
pub mod driver;
pub mod error;
pub mod model;
pub mod process;
pub mod runner;
pub mod schema;
pub mod version;
pub mod wait;

pub use api::ApiClient;
pub use app::{find, registry, rust_sqlx, Application, Launcher};
pub use database::{AuthMode, DatabaseConfig, DatabaseSetup, TestDatabase, Topology};
pub use driver::TestDriver;
pub use error::HarnessError;
pub use process::{AppProcess, LaunchCommand, LaunchSettings, LifecycleState};
pub use runner::{run_suite, SuiteOutcome};
pub use schema::ExpectedSchema;
pub use version::{ServerVersion, Version};
pub use wait::PollPolicy;

/// Tracing for test binaries, honoring `RUST_LOG`. Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("company_harness=info")),
        )
        .with_test_writer()
        .try_init();
}
