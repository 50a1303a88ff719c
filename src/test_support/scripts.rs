//! Scripted stand-ins for PostgreSQL command-line tools.
//!
//! The scripted `pg_ctl` understands the subset of subcommands the executor
//! issues and keeps its "server" state in the data directory, so lifecycle
//! tests run without a PostgreSQL installation.

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::Result;

use crate::fs::{ensure_dir_exists, set_permissions, write_file};

/// How the scripted `pg_ctl start` behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartBehaviour {
    /// Marks the server as running and logs the readiness line.
    #[default]
    Ready,
    /// Marks the server as running but never logs readiness.
    Silent,
    /// Exits non-zero after printing a fatal message.
    Fail,
}

/// Writes an executable shell script named `name` under `dir`.
///
/// # Errors
/// Returns an error when the file cannot be written or made executable.
pub fn write_script(dir: &Utf8Path, name: &str, body: &str) -> Result<Utf8PathBuf> {
    ensure_dir_exists(dir)?;
    let path = dir.join(name);
    write_file(&path, body)?;
    set_permissions(&path, 0o755)?;
    Ok(path)
}

fn start_branch(behaviour: StartBehaviour) -> &'static str {
    match behaviour {
        StartBehaviour::Ready => {
            "touch \"$datadir/postmaster.pid\"\n    \
             echo \"LOG:  database system is ready to accept connections\" >> \"$logfile\""
        }
        StartBehaviour::Silent => "touch \"$datadir/postmaster.pid\"",
        StartBehaviour::Fail => {
            "echo \"FATAL:  could not bind IPv4 address: Address already in use\" >> \"$logfile\"\n    \
             exit 1"
        }
    }
}

/// Writes a scripted `pg_ctl` that reports `version` from `--version`.
///
/// # Errors
/// Returns an error when the script cannot be written.
pub fn fake_pg_ctl(dir: &Utf8Path, version: &str, behaviour: StartBehaviour) -> Result<Utf8PathBuf> {
    let body = format!(
        r#"#!/bin/sh
cmd="$1"
shift
datadir=""
logfile=""
while [ $# -gt 0 ]; do
  case "$1" in
    -D) datadir="$2"; shift 2 ;;
    -l) logfile="$2"; shift 2 ;;
    -o|-m|-t) shift 2 ;;
    *) shift ;;
  esac
done
case "$cmd" in
  --version)
    echo "pg_ctl (PostgreSQL) {version}"
    ;;
  initdb)
    mkdir -p "$datadir" && echo "{version}" > "$datadir/PG_VERSION"
    ;;
  start)
    {start}
    ;;
  status)
    if [ -f "$datadir/postmaster.pid" ]; then echo "pg_ctl: server is running"; exit 0; fi
    echo "pg_ctl: no server running"
    exit 3
    ;;
  stop)
    if [ -f "$datadir/postmaster.pid" ]; then rm -f "$datadir/postmaster.pid"; echo "server stopped"; exit 0; fi
    echo "pg_ctl: PID file \"$datadir/postmaster.pid\" does not exist" >&2
    exit 1
    ;;
  *)
    echo "unsupported subcommand $cmd" >&2
    exit 2
    ;;
esac
"#,
        start = start_branch(behaviour),
    );
    write_script(dir, "pg_ctl", &body)
}
