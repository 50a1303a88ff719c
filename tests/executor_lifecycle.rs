#![cfg(unix)]
//! Drives a real `pg_ctl`-managed server through its lifecycle.

use color_eyre::eyre::{Result, ensure};
use pg_test_fixtures::test_support::{capture_warn_logs, utf8_tempdir};
use pg_test_fixtures::{
    DEFAULT_PG_CTL, ExecutorState, MIN_SUPPORTED_VERSION, PortAllocator, PortSpec,
    PostgresExecutor, ServerProcessConfig, resolve_executable,
};
use rstest::rstest;

#[path = "support/pg_fixtures.rs"]
mod pg_fixtures;

use pg_fixtures::{announce_skip, skip_reason};

fn executor_in(root: &camino::Utf8Path) -> Result<Option<PostgresExecutor>> {
    let executable = match resolve_executable(None, camino::Utf8Path::new(DEFAULT_PG_CTL)) {
        Ok(path) => path,
        Err(err) => {
            announce_skip(&skip_reason(err)?);
            return Ok(None);
        }
    };
    let claim = PortAllocator::new(root.join("ports")).allocate(&PortSpec::Any)?;
    let port = claim.port();
    let config = ServerProcessConfig::builder(
        executable,
        root.join(format!("data-{port}")),
        root.join(format!("postgresql.{port}.log")),
    )
    .port(port)
    .unix_socket_dir(Some(root.to_path_buf()))
    .build();
    Ok(Some(PostgresExecutor::new(config)))
}

/// Starts the executor, turning environment failures into a skip.
fn start_or_skip(executor: &mut PostgresExecutor) -> Result<bool> {
    match executor.start() {
        Ok(()) => Ok(true),
        Err(err) => {
            announce_skip(&skip_reason(err)?);
            Ok(false)
        }
    }
}

#[rstest]
fn server_starts_reports_its_version_and_stops() -> Result<()> {
    let (_guard, root) = utf8_tempdir()?;
    let Some(mut executor) = executor_in(&root)? else {
        return Ok(());
    };
    if !start_or_skip(&mut executor)? {
        return Ok(());
    }

    ensure!(executor.state() == ExecutorState::Running);
    ensure!(executor.running());
    let version = executor
        .server_version()
        .ok_or_else(|| color_eyre::eyre::eyre!("version not recorded"))?;
    ensure!(version >= MIN_SUPPORTED_VERSION);
    ensure!(executor.version()?.major() == version.major());

    executor.stop()?;
    ensure!(!executor.running());
    executor.stop()?;
    ensure!(executor.state() == ExecutorState::Stopped);
    Ok(())
}

#[rstest]
fn dropping_a_running_executor_cleans_up_quietly() -> Result<()> {
    let (_guard, root) = utf8_tempdir()?;
    let Some(mut executor) = executor_in(&root)? else {
        return Ok(());
    };
    if !start_or_skip(&mut executor)? {
        return Ok(());
    }
    let data_dir = executor.config().data_dir().to_path_buf();
    ensure!(data_dir.join("PG_VERSION").exists());

    let (warnings, ()) = capture_warn_logs(|| drop(executor));
    ensure!(warnings.is_empty(), "unexpected warnings: {warnings:?}");
    ensure!(!data_dir.exists());
    Ok(())
}

#[tokio::test]
async fn async_lifecycle_matches_the_blocking_one() -> Result<()> {
    let (_guard, root) = utf8_tempdir()?;
    let Some(mut executor) = executor_in(&root)? else {
        return Ok(());
    };
    if let Err(err) = executor.start_async().await {
        announce_skip(&skip_reason(err)?);
        return Ok(());
    }
    ensure!(executor.running_async().await);
    executor.stop_async().await?;
    ensure!(!executor.running_async().await);
    Ok(())
}
