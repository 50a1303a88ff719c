#![cfg(unix)]
//! Database creation, cloning, and destruction against a live server.

use color_eyre::eyre::{Result, ensure, eyre};
use pg_test_fixtures::{
    DatabaseJanitor, FixtureErrorKind, IsolationLevel, JanitorTarget, LoadDirective,
    LoaderRegistry, ProcessFixture,
};
use postgres::NoTls;
use rstest::{fixture, rstest};
use tempfile::TempDir;

#[path = "support/pg_fixtures.rs"]
mod pg_fixtures;

use pg_fixtures::{SEEDED_ROWS, isolated_settings, load_four_rows, start_or_skip};

/// A running server, or `None` when PostgreSQL is unavailable here.
struct Server {
    _run_dir: TempDir,
    fixture: Option<ProcessFixture>,
}

#[fixture]
fn server() -> Server {
    let (run_dir, settings) = isolated_settings().expect("run directory");
    let fixture = start_or_skip(&settings, &LoaderRegistry::default()).expect("server start");
    Server {
        _run_dir: run_dir,
        fixture,
    }
}

fn janitor(
    server: &ProcessFixture,
    dbname: Option<&str>,
    template: Option<&str>,
) -> Result<DatabaseJanitor> {
    let endpoint = server.endpoint();
    let target = JanitorTarget::from_names(dbname, template)?;
    Ok(
        DatabaseJanitor::new(endpoint.params().clone(), target, endpoint.version())
            .with_connection_timeout(endpoint.connection_timeout()),
    )
}

fn count_items(janitor: &DatabaseJanitor) -> Result<i64> {
    let mut client = janitor.managed_params().postgres_config(None).connect(NoTls)?;
    let row = client.query_one("SELECT count(*) FROM items", &[])?;
    Ok(row.try_get(0)?)
}

#[rstest]
fn init_then_drop_leaves_nothing_behind(server: Server) -> Result<()> {
    let Some(fixture) = server.fixture.as_ref() else {
        return Ok(());
    };
    let plain = janitor(fixture, Some("janitor_plain"), None)?;
    plain.init()?;
    ensure!(plain.exists()?);
    plain.drop_database()?;
    ensure!(!plain.exists()?);
    Ok(())
}

#[rstest]
fn creating_an_existing_database_fails(server: Server) -> Result<()> {
    let Some(fixture) = server.fixture.as_ref() else {
        return Ok(());
    };
    let plain = janitor(fixture, Some("janitor_twice"), None)?;
    plain.init()?;
    let err = plain
        .init()
        .err()
        .ok_or_else(|| eyre!("second CREATE DATABASE must fail"))?;
    ensure!(err.kind() == FixtureErrorKind::Driver, "{err}");
    plain.drop_database()?;
    Ok(())
}

#[rstest]
fn clones_are_independent_snapshots_of_the_template(server: Server) -> Result<()> {
    let Some(fixture) = server.fixture.as_ref() else {
        return Ok(());
    };
    let mut registry = LoaderRegistry::default();
    registry.register("seed", "four_rows", load_four_rows);

    let template = janitor(fixture, None, Some("janitor_seed_tmpl"))?;
    template.init()?;
    template.load(&"seed:four_rows".parse::<LoadDirective>()?, &registry)?;

    let first = janitor(fixture, Some("janitor_clone_a"), Some("janitor_seed_tmpl"))?;
    first.init()?;
    let mut client = first.managed_params().postgres_config(None).connect(NoTls)?;
    client.batch_execute("DELETE FROM items WHERE id > 1")?;
    drop(client);
    ensure!(count_items(&first)? == 1);

    let second = janitor(fixture, Some("janitor_clone_b"), Some("janitor_seed_tmpl"))?;
    second.init()?;
    ensure!(count_items(&second)? == SEEDED_ROWS);

    first.drop_database()?;
    second.drop_database()?;
    template.drop_database()?;
    ensure!(!template.exists()?);
    Ok(())
}

#[rstest]
fn drop_terminates_lingering_connections(server: Server) -> Result<()> {
    let Some(fixture) = server.fixture.as_ref() else {
        return Ok(());
    };
    let plain = janitor(fixture, Some("janitor_busy"), None)?;
    plain.init()?;
    let mut lingering = plain.managed_params().postgres_config(None).connect(NoTls)?;
    lingering.batch_execute("SELECT 1")?;

    plain.drop_database()?;
    ensure!(!plain.exists()?);
    ensure!(lingering.batch_execute("SELECT 1").is_err());
    Ok(())
}

#[rstest]
fn isolation_level_applies_to_admin_sessions(server: Server) -> Result<()> {
    let Some(fixture) = server.fixture.as_ref() else {
        return Ok(());
    };
    let plain = janitor(fixture, Some("janitor_isolated"), None)?
        .with_isolation_level(IsolationLevel::Serializable);
    let mut cursor = plain.cursor("postgres")?;
    let row = cursor.query_one("SHOW default_transaction_isolation", &[])?;
    let level: String = row.try_get(0)?;
    ensure!(level == "serializable", "got {level}");
    Ok(())
}

#[rstest]
fn drop_stale_removes_leftovers_only_when_present(server: Server) -> Result<()> {
    let Some(fixture) = server.fixture.as_ref() else {
        return Ok(());
    };
    let plain = janitor(fixture, Some("janitor_stale"), None)?;
    plain.drop_stale()?;
    plain.init()?;
    plain.drop_stale()?;
    ensure!(!plain.exists()?);
    Ok(())
}

#[rstest]
fn async_janitor_matches_blocking_semantics(server: Server) -> Result<()> {
    let Some(fixture) = server.fixture.as_ref() else {
        return Ok(());
    };
    let plain = janitor(fixture, Some("janitor_async"), None)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        plain.init_async().await?;
        ensure!(plain.exists_async().await?);
        plain.drop_database_async().await?;
        ensure!(!plain.exists_async().await?);
        Ok(())
    })
}
