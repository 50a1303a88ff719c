//! Starts a throwaway PostgreSQL server through `pg_ctl`, creates and drops a
//! test database, and stops the server again.
//!
//! Configuration is read from `POSTGRESQL_*` environment variables parsed by
//! [`OrthoConfig`](https://github.com/leynos/ortho-config). The binary exits
//! with status code `0` when the local installation works with the fixtures
//! and `1` otherwise.

fn main() -> color_eyre::eyre::Result<()> {
    pg_test_fixtures::run().map_err(|err| color_eyre::eyre::eyre!(err))?;
    Ok(())
}
