//! Administrative SQL issued by the janitor, and the ordered plans built
//! from it.

use crate::connection::escape_identifier;

use super::JanitorTarget;

/// Terminates every backend connected to the database bound to `$1`.
pub const TERMINATE_BACKENDS_SQL: &str = "SELECT pg_terminate_backend(pg_stat_activity.pid) \
     FROM pg_stat_activity WHERE pg_stat_activity.datname = $1;";

/// Checks whether the database bound to `$1` exists.
pub const DATABASE_EXISTS_SQL: &str = "SELECT 1 FROM pg_database WHERE datname = $1;";

/// One administrative step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminStatement {
    /// A complete statement without parameters.
    Execute(String),
    /// [`TERMINATE_BACKENDS_SQL`] bound to the named database.
    TerminateBackends(String),
}

impl AdminStatement {
    /// Returns the SQL text sent to the server.
    #[must_use]
    pub fn sql(&self) -> &str {
        match self {
            Self::Execute(sql) => sql,
            Self::TerminateBackends(_) => TERMINATE_BACKENDS_SQL,
        }
    }
}

fn quoted(name: &str) -> String {
    format!("\"{}\"", escape_identifier(name))
}

fn create_template(name: &str) -> AdminStatement {
    AdminStatement::Execute(format!(
        "CREATE DATABASE {} WITH is_template = true;",
        quoted(name)
    ))
}

fn create_plain(name: &str) -> AdminStatement {
    AdminStatement::Execute(format!("CREATE DATABASE {};", quoted(name)))
}

fn create_from_template(name: &str, template: &str) -> AdminStatement {
    AdminStatement::Execute(format!(
        "CREATE DATABASE {} TEMPLATE {};",
        quoted(name),
        quoted(template)
    ))
}

fn disallow_connections(name: &str) -> AdminStatement {
    AdminStatement::Execute(format!(
        "ALTER DATABASE {} with allow_connections false;",
        quoted(name)
    ))
}

fn clear_template_flag(name: &str) -> AdminStatement {
    AdminStatement::Execute(format!(
        "ALTER DATABASE {} with is_template false;",
        quoted(name)
    ))
}

fn drop_if_exists(name: &str) -> AdminStatement {
    AdminStatement::Execute(format!("DROP DATABASE IF EXISTS {};", quoted(name)))
}

/// Statements that create the database `target` manages.
#[must_use]
pub fn init_plan(target: &JanitorTarget) -> Vec<AdminStatement> {
    match target {
        JanitorTarget::Template(name) => vec![create_template(name)],
        JanitorTarget::Plain(name) => vec![create_plain(name)],
        // Cloning fails while anyone is connected to the template.
        JanitorTarget::Clone { name, template } => vec![
            AdminStatement::TerminateBackends(template.clone()),
            create_from_template(name, template),
        ],
    }
}

/// Statements that remove the database `target` manages, in the only order
/// that works against a busy server.
#[must_use]
pub fn drop_plan(target: &JanitorTarget) -> Vec<AdminStatement> {
    let name = target.managed_name();
    let mut plan = vec![
        disallow_connections(name),
        AdminStatement::TerminateBackends(name.to_owned()),
    ];
    if target.is_template() {
        plan.push(clear_template_flag(name));
    }
    plan.push(drop_if_exists(name));
    plan
}
