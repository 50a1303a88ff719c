//! Lifecycle tests driven by a scripted `pg_ctl` and a static probe.

use std::time::Duration;

use camino::Utf8PathBuf;
use color_eyre::eyre::{Result, ensure, eyre};
use rstest::rstest;

use super::*;
use crate::test_support::utf8_tempdir;

fn config_for(root: &Utf8Path, executable: Utf8PathBuf, timeout: Duration) -> ServerProcessConfig {
    ServerProcessConfig::builder(
        executable,
        root.join("data-5433"),
        root.join("postgresql.5433.log"),
    )
    .port(5433)
    .start_timeout(timeout)
    .build()
}

#[test]
fn builder_defaults_match_documented_values() {
    let config = ServerProcessConfig::builder("/bin/pg_ctl", "/tmp/d", "/tmp/l").build();
    assert_eq!(config.host(), "127.0.0.1");
    assert_eq!(config.port(), 5432);
    assert_eq!(config.user(), "postgres");
    assert_eq!(config.dbname(), "tests");
    assert_eq!(config.template_dbname(), "tests_tmpl");
    assert_eq!(config.start_timeout(), DEFAULT_START_TIMEOUT);
    assert!(config.waits_for_start());
    assert!(config.password().is_none());
}

#[test]
fn debug_output_redacts_the_password() {
    let config = ServerProcessConfig::builder("/bin/pg_ctl", "/tmp/d", "/tmp/l")
        .password(Some("hunter2".to_owned()))
        .build();
    let rendered = format!("{config:?}");
    assert!(!rendered.contains("hunter2"));
    assert!(rendered.contains("<redacted>"));
}

#[rstest]
#[case(ExecutorState::Stopped, "stopped")]
#[case(ExecutorState::Starting, "starting")]
#[case(ExecutorState::Running, "running")]
#[case(ExecutorState::Stopping, "stopping")]
fn state_labels(#[case] state: ExecutorState, #[case] label: &str) {
    assert_eq!(state.to_string(), label);
}

#[test]
fn stopping_a_fresh_executor_is_a_no_op() -> Result<()> {
    let (_guard, root) = utf8_tempdir()?;
    let config = config_for(&root, root.join("missing-pg_ctl"), Duration::from_secs(1));
    let mut executor = PostgresExecutor::with_probe(config, StaticProbe::unreachable());
    executor.stop()?;
    executor.stop()?;
    ensure!(executor.state() == ExecutorState::Stopped);
    Ok(())
}

#[test]
fn missing_control_tool_is_reported() -> Result<()> {
    let (_guard, root) = utf8_tempdir()?;
    let config = config_for(&root, root.join("missing-pg_ctl"), Duration::from_secs(1));
    let mut executor = PostgresExecutor::with_probe(config, StaticProbe::unreachable());
    let err = executor
        .start()
        .err()
        .ok_or_else(|| eyre!("start should fail without pg_ctl"))?;
    ensure!(err.kind() == FixtureErrorKind::ExecutableMissing, "{err}");
    ensure!(executor.state() == ExecutorState::Stopped);
    Ok(())
}

#[cfg(unix)]
mod scripted {
    use super::*;
    use crate::test_support::{StartBehaviour, capture_warn_logs, fake_pg_ctl};

    #[test]
    fn start_and_stop_cycle_through_states() -> Result<()> {
        let (_guard, root) = utf8_tempdir()?;
        let pg_ctl = fake_pg_ctl(&root, "16.2", StartBehaviour::Ready)?;
        let config = config_for(&root, pg_ctl, Duration::from_secs(5));
        let mut executor =
            PostgresExecutor::with_probe(config, StaticProbe::reporting(PgVersion::new(16, 2)));

        ensure!(executor.version()? == PgVersion::new(16, 2));
        executor.start()?;
        ensure!(executor.state() == ExecutorState::Running);
        ensure!(executor.server_version() == Some(PgVersion::new(16, 2)));
        ensure!(executor.running());
        ensure!(executor.command_line().contains("start -D"));
        ensure!(path_exists(&root.join("data-5433/PG_VERSION")));

        executor.stop()?;
        ensure!(executor.state() == ExecutorState::Stopped);
        ensure!(!executor.running());
        executor.stop()?;
        Ok(())
    }

    #[test]
    fn starting_twice_keeps_the_running_server() -> Result<()> {
        let (_guard, root) = utf8_tempdir()?;
        let pg_ctl = fake_pg_ctl(&root, "15.4", StartBehaviour::Ready)?;
        let config = config_for(&root, pg_ctl, Duration::from_secs(5));
        let mut executor =
            PostgresExecutor::with_probe(config, StaticProbe::reporting(PgVersion::new(15, 4)));
        executor.start()?;
        executor.start()?;
        ensure!(executor.state() == ExecutorState::Running);
        executor.stop()?;
        Ok(())
    }

    #[test]
    fn old_binaries_are_rejected_before_launch() -> Result<()> {
        let (_guard, root) = utf8_tempdir()?;
        let pg_ctl = fake_pg_ctl(&root, "9.6.24", StartBehaviour::Ready)?;
        let config = config_for(&root, pg_ctl, Duration::from_secs(5));
        let mut executor =
            PostgresExecutor::with_probe(config, StaticProbe::reporting(PgVersion::new(9, 6)));

        let err = executor
            .start()
            .err()
            .ok_or_else(|| eyre!("9.6 must be rejected"))?;
        ensure!(err.kind() == FixtureErrorKind::UnsupportedVersion, "{err}");
        ensure!(!executor.running());
        ensure!(executor.state() == ExecutorState::Stopped);
        Ok(())
    }

    #[test]
    fn old_servers_are_stopped_after_the_version_query() -> Result<()> {
        let (_guard, root) = utf8_tempdir()?;
        let pg_ctl = fake_pg_ctl(&root, "16.2", StartBehaviour::Ready)?;
        let config = config_for(&root, pg_ctl, Duration::from_secs(5));
        let mut executor =
            PostgresExecutor::with_probe(config, StaticProbe::reporting(PgVersion::new(9, 5)));

        let err = executor
            .start()
            .err()
            .ok_or_else(|| eyre!("a 9.5 server must be rejected"))?;
        ensure!(err.kind() == FixtureErrorKind::UnsupportedVersion, "{err}");
        ensure!(!executor.running());
        Ok(())
    }

    #[test]
    fn unreachable_server_times_out_and_is_torn_down() -> Result<()> {
        let (_guard, root) = utf8_tempdir()?;
        let pg_ctl = fake_pg_ctl(&root, "16.2", StartBehaviour::Ready)?;
        let config = config_for(&root, pg_ctl, Duration::from_millis(300));
        let mut executor = PostgresExecutor::with_probe(config, StaticProbe::unreachable());

        let started = std::time::Instant::now();
        let err = executor
            .start()
            .err()
            .ok_or_else(|| eyre!("probe never answers"))?;
        ensure!(err.kind() == FixtureErrorKind::StartupTimeout, "{err}");
        ensure!(err.to_string().contains("5433"));
        ensure!(started.elapsed() < Duration::from_secs(5));
        ensure!(!executor.running());
        Ok(())
    }

    #[test]
    fn silent_log_keeps_waiting_for_readiness() -> Result<()> {
        let (_guard, root) = utf8_tempdir()?;
        let pg_ctl = fake_pg_ctl(&root, "16.2", StartBehaviour::Silent)?;
        let config = config_for(&root, pg_ctl, Duration::from_millis(300));
        let mut executor =
            PostgresExecutor::with_probe(config, StaticProbe::reporting(PgVersion::new(16, 2)));

        let err = executor
            .start()
            .err()
            .ok_or_else(|| eyre!("readiness is never logged"))?;
        ensure!(err.kind() == FixtureErrorKind::StartupTimeout, "{err}");
        ensure!(err.to_string().contains("does not report readiness"));
        Ok(())
    }

    #[test]
    fn failed_launch_surfaces_the_log_tail() -> Result<()> {
        let (_guard, root) = utf8_tempdir()?;
        let pg_ctl = fake_pg_ctl(&root, "16.2", StartBehaviour::Fail)?;
        let config = config_for(&root, pg_ctl, Duration::from_secs(5));
        let mut executor =
            PostgresExecutor::with_probe(config, StaticProbe::reporting(PgVersion::new(16, 2)));

        let err = executor
            .start()
            .err()
            .ok_or_else(|| eyre!("launch fails"))?;
        ensure!(err.to_string().contains("Address already in use"), "{err}");
        ensure!(executor.state() == ExecutorState::Stopped);
        Ok(())
    }

    #[test]
    fn drop_stops_the_server_and_removes_the_data_directory() -> Result<()> {
        let (_guard, root) = utf8_tempdir()?;
        let pg_ctl = fake_pg_ctl(&root, "16.2", StartBehaviour::Ready)?;
        let config = config_for(&root, pg_ctl, Duration::from_secs(5));
        let data_dir = config.data_dir().to_path_buf();
        let mut executor =
            PostgresExecutor::with_probe(config, StaticProbe::reporting(PgVersion::new(16, 2)));
        executor.start()?;

        let (logs, ()) = capture_warn_logs(|| drop(executor));
        ensure!(logs.is_empty(), "unexpected warnings: {logs:?}");
        ensure!(!path_exists(&data_dir));
        Ok(())
    }

    #[test]
    fn password_initdb_cleans_up_its_password_file() -> Result<()> {
        let (_guard, root) = utf8_tempdir()?;
        let pg_ctl = fake_pg_ctl(&root, "16.2", StartBehaviour::Ready)?;
        let config = ServerProcessConfig::builder(
            pg_ctl,
            root.join("data-5433"),
            root.join("postgresql.5433.log"),
        )
        .password(Some("s3cret".to_owned()))
        .build();
        let mut executor =
            PostgresExecutor::with_probe(config, StaticProbe::reporting(PgVersion::new(16, 2)));
        executor.init_directory()?;
        ensure!(path_exists(&root.join("data-5433/PG_VERSION")));
        ensure!(!path_exists(&root.join("data-5433.pwfile")));
        executor.remove_directory()?;
        ensure!(!path_exists(&root.join("data-5433")));
        Ok(())
    }

    #[tokio::test]
    async fn async_lifecycle_matches_blocking_semantics() -> Result<()> {
        let (_guard, root) = utf8_tempdir()?;
        let pg_ctl = fake_pg_ctl(&root, "17.0", StartBehaviour::Ready)?;
        let config = config_for(&root, pg_ctl, Duration::from_secs(5));
        let mut executor =
            PostgresExecutor::with_probe(config, StaticProbe::reporting(PgVersion::new(17, 0)));

        ensure!(executor.version_async().await? == PgVersion::new(17, 0));
        executor.start_async().await?;
        ensure!(executor.running_async().await);
        executor.stop_async().await?;
        executor.stop_async().await?;
        ensure!(!executor.running_async().await);
        ensure!(executor.state() == ExecutorState::Stopped);
        Ok(())
    }

    #[tokio::test]
    async fn async_unreachable_server_times_out() -> Result<()> {
        let (_guard, root) = utf8_tempdir()?;
        let pg_ctl = fake_pg_ctl(&root, "16.2", StartBehaviour::Ready)?;
        let config = config_for(&root, pg_ctl, Duration::from_millis(300));
        let mut executor = PostgresExecutor::with_probe(config, StaticProbe::unreachable());
        let err = executor
            .start_async()
            .await
            .err()
            .ok_or_else(|| eyre!("probe never answers"))?;
        ensure!(err.kind() == FixtureErrorKind::StartupTimeout, "{err}");
        ensure!(!executor.running_async().await);
        Ok(())
    }
}
