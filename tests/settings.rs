//! Reads fixture settings from `POSTGRESQL_*` environment variables.

use std::time::Duration;

use color_eyre::eyre::{Result, ensure};
use pg_test_fixtures::{FixtureErrorKind, FixtureSettings, LoadDirective, PgFixtureCfg, PortSpec};
use rstest::rstest;
use serial_test::serial;
use temp_env::with_vars;

const VARIABLES: [&str; 17] = [
    "POSTGRESQL_EXEC",
    "POSTGRESQL_HOST",
    "POSTGRESQL_PORT",
    "POSTGRESQL_PORT_SEARCH_COUNT",
    "POSTGRESQL_USER",
    "POSTGRESQL_PASSWORD",
    "POSTGRESQL_OPTIONS",
    "POSTGRESQL_STARTPARAMS",
    "POSTGRESQL_UNIXSOCKETDIR",
    "POSTGRESQL_DBNAME",
    "POSTGRESQL_LOAD",
    "POSTGRESQL_POSTGRES_OPTIONS",
    "POSTGRESQL_DROP_TEST_DATABASE",
    "POSTGRESQL_START_TIMEOUT_SECS",
    "POSTGRESQL_CONNECTION_TIMEOUT_SECS",
    "POSTGRESQL_WORKER_ID",
    "POSTGRESQL_RUN_DIR",
];

/// Runs `action` with only `overrides` set among the fixture variables.
fn with_fixture_env<R>(overrides: &[(&str, &str)], action: impl FnOnce() -> R) -> R {
    let vars: Vec<(&str, Option<&str>)> = VARIABLES
        .iter()
        .map(|name| {
            let value = overrides
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| *value);
            (*name, value)
        })
        .collect();
    with_vars(vars, action)
}

fn settings_from_env() -> Result<FixtureSettings> {
    Ok(PgFixtureCfg::load()?.to_settings()?)
}

#[rstest]
#[serial]
fn unset_environment_yields_defaults() -> Result<()> {
    let settings = with_fixture_env(&[], settings_from_env)?;
    let defaults = FixtureSettings::default();
    ensure!(settings.port == PortSpec::Default);
    ensure!(settings.user == defaults.user);
    ensure!(settings.dbname == defaults.dbname);
    ensure!(settings.load.is_empty());
    ensure!(settings.worker_id.is_none());
    ensure!(settings.host == defaults.host);
    ensure!(settings.password.is_none());
    ensure!(settings.unix_socket_dir == defaults.unix_socket_dir);
    ensure!(settings.run_dir.is_none());
    Ok(())
}

#[rstest]
#[serial]
fn numeric_values_load_into_text_settings() -> Result<()> {
    let settings = with_fixture_env(
        &[
            ("POSTGRESQL_PORT", "5432"),
            ("POSTGRESQL_PASSWORD", "12345"),
            ("POSTGRESQL_WORKER_ID", "3"),
        ],
        settings_from_env,
    )?;
    ensure!(settings.port == PortSpec::Fixed(5432));
    ensure!(settings.password.as_deref() == Some("12345"));
    ensure!(settings.worker_dbname() == "tests3");
    Ok(())
}

#[rstest]
#[serial]
fn environment_overrides_are_applied() -> Result<()> {
    let settings = with_fixture_env(
        &[
            ("POSTGRESQL_PORT", "20000-20010,20100"),
            ("POSTGRESQL_USER", "app"),
            ("POSTGRESQL_DBNAME", "orders"),
            ("POSTGRESQL_LOAD", "schema.sql, fixtures:seed"),
            ("POSTGRESQL_WORKER_ID", "gw2"),
            ("POSTGRESQL_START_TIMEOUT_SECS", "15"),
            ("POSTGRESQL_DROP_TEST_DATABASE", "true"),
            ("POSTGRESQL_PORT_SEARCH_COUNT", "9"),
        ],
        settings_from_env,
    )?;
    ensure!(settings.port.admits(20_005));
    ensure!(settings.port.admits(20_100));
    ensure!(!settings.port.admits(20_050));
    ensure!(settings.user == "app");
    ensure!(settings.worker_dbname() == "ordersgw2");
    ensure!(settings.start_timeout == Duration::from_secs(15));
    ensure!(settings.drop_test_database);
    ensure!(settings.port_search_count == 9);
    ensure!(matches!(
        settings.load.as_slice(),
        [LoadDirective::ScriptFile(_), LoadDirective::SymbolRef { .. }]
    ));
    Ok(())
}

#[rstest]
#[case::reversed_range("POSTGRESQL_PORT", "9000-8000")]
#[case::bare_word_loader("POSTGRESQL_LOAD", "seed")]
#[case::zero_timeout("POSTGRESQL_START_TIMEOUT_SECS", "0")]
#[serial]
fn invalid_values_are_configuration_errors(
    #[case] name: &str,
    #[case] value: &str,
) -> Result<()> {
    let outcome = with_fixture_env(&[(name, value)], || {
        PgFixtureCfg::load().and_then(|cfg| cfg.to_settings())
    });
    let err = pg_test_fixtures::FixtureError::from(
        outcome.err().ok_or_else(|| color_eyre::eyre::eyre!("{name}={value} must be rejected"))?,
    );
    ensure!(err.kind() == FixtureErrorKind::InvalidConfig);
    Ok(())
}
