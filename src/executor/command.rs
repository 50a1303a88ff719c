//! Control-tool command construction.
//!
//! Every `pg_ctl` invocation is described by a [`ControlCommand`]: discrete
//! argv entries for spawning, plus a rendered, shell-safe string for logs.
//! A single template serves every platform; only [`quote_path`] knows about
//! platform quoting rules.

use std::borrow::Cow;
use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};

use super::ServerProcessConfig;

/// Quoting and locale conventions of the platform a command targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetOs {
    /// Linux and other POSIX systems.
    Unix,
    /// macOS, which quotes like POSIX but lacks a `C.UTF-8` locale.
    MacOs,
    /// Windows, which parses command lines with `CommandLineToArgvW` rules.
    Windows,
}

impl TargetOs {
    /// Returns the platform this binary was compiled for.
    #[must_use]
    pub const fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::MacOs
        } else {
            Self::Unix
        }
    }

    /// Locale exported as `LC_ALL`, `LC_CTYPE`, and `LANG` for server
    /// processes.
    #[must_use]
    pub const fn locale(self) -> &'static str {
        match self {
            Self::Unix => "C.UTF-8",
            Self::MacOs => "en_US.UTF-8",
            Self::Windows => "C",
        }
    }
}

fn needs_quoting(value: &str, os: TargetOs) -> bool {
    value.is_empty()
        || value.chars().any(|ch| {
            ch.is_whitespace()
                || matches!(
                    ch,
                    '"' | '\'' | '$' | '`' | '&' | '|' | ';' | '<' | '>' | '(' | ')' | '*' | '?'
                        | '[' | ']' | '{' | '}' | '!' | '#' | '~' | '%' | '^'
                )
                || (ch == '\\' && os != TargetOs::Windows)
        })
}

/// Double-quotes `value` when it contains whitespace, quotes, or shell
/// metacharacters, escaping according to `os`.
///
/// POSIX targets escape `\`, `"`, `$`, and `` ` `` with a backslash. Windows
/// follows `CommandLineToArgvW`: backslashes are literal unless they precede a
/// quote, in which case they are doubled.
///
/// # Examples
/// ```
/// use pg_test_fixtures::{TargetOs, quote_path};
///
/// assert_eq!(quote_path("/tmp/data", TargetOs::Unix), "/tmp/data");
/// assert_eq!(quote_path("/tmp/my data", TargetOs::Unix), "\"/tmp/my data\"");
/// assert_eq!(
///     quote_path(r"C:\Program Files\pg", TargetOs::Windows),
///     r#""C:\Program Files\pg""#
/// );
/// ```
#[must_use]
pub fn quote_path(value: &str, os: TargetOs) -> Cow<'_, str> {
    if !needs_quoting(value, os) {
        return Cow::Borrowed(value);
    }
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    match os {
        TargetOs::Unix | TargetOs::MacOs => {
            for ch in value.chars() {
                if matches!(ch, '\\' | '"' | '$' | '`') {
                    quoted.push('\\');
                }
                quoted.push(ch);
            }
        }
        TargetOs::Windows => {
            let mut backslashes = 0_usize;
            for ch in value.chars() {
                match ch {
                    '\\' => backslashes += 1,
                    '"' => {
                        quoted.extend(std::iter::repeat_n('\\', backslashes * 2 + 1));
                        quoted.push('"');
                        backslashes = 0;
                    }
                    other => {
                        quoted.extend(std::iter::repeat_n('\\', backslashes));
                        quoted.push(other);
                        backslashes = 0;
                    }
                }
            }
            quoted.extend(std::iter::repeat_n('\\', backslashes * 2));
        }
    }
    quoted.push('"');
    Cow::Owned(quoted)
}

/// A fully resolved `pg_ctl` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlCommand {
    program: Utf8PathBuf,
    args: Vec<String>,
    env: Vec<(String, String)>,
}

impl ControlCommand {
    fn new(program: &Utf8Path, os: TargetOs) -> Self {
        let locale = os.locale();
        Self {
            program: program.to_path_buf(),
            args: Vec::new(),
            env: ["LC_ALL", "LC_CTYPE", "LANG"]
                .into_iter()
                .map(|key| (key.to_owned(), locale.to_owned()))
                .collect(),
        }
    }

    fn arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(value.into());
        self
    }

    #[cfg(test)]
    pub(crate) fn for_program(program: &str, os: TargetOs) -> Self {
        Self::new(Utf8Path::new(program), os)
    }

    #[cfg(test)]
    pub(crate) fn with_args<const N: usize>(self, args: [&str; N]) -> Self {
        args.into_iter().fold(self, |command, arg| command.arg(arg))
    }

    /// Returns the executable path.
    #[must_use]
    pub fn program(&self) -> &Utf8Path {
        &self.program
    }

    /// Returns the discrete arguments passed to the executable.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Returns the environment overrides applied to the process.
    #[must_use]
    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    /// Renders the command line for logs, quoting each component for `os`.
    #[must_use]
    pub fn render(&self, os: TargetOs) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(|part| quote_path(part, os))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Builds a standard library command ready to spawn.
    #[must_use]
    pub fn to_command(&self) -> Command {
        let mut command = Command::new(self.program.as_std_path());
        command.args(&self.args);
        command.envs(self.env.iter().map(|(key, value)| (key.as_str(), value.as_str())));
        command
    }
}

/// Renders the value passed to the server through `pg_ctl -o`.
#[must_use]
pub fn server_options(config: &ServerProcessConfig, os: TargetOs) -> String {
    let mut options = format!(
        "-F -p {} -c log_destination=stderr -c logging_collector=off",
        config.port
    );
    if let Some(dir) = &config.unix_socket_dir {
        options.push_str(" -c unix_socket_directories=");
        options.push_str(&quote_path(dir.as_str(), os));
    }
    let extra = config.postgres_options.trim();
    if !extra.is_empty() {
        options.push(' ');
        options.push_str(extra);
    }
    options
}

/// `pg_ctl start -D <datadir> -o "<options>" -l <logfile> <startparams>`.
#[must_use]
pub fn start_command(config: &ServerProcessConfig, os: TargetOs) -> ControlCommand {
    let mut command = ControlCommand::new(&config.executable, os)
        .arg("start")
        .arg("-D")
        .arg(config.data_dir.as_str())
        .arg("-o")
        .arg(server_options(config, os))
        .arg("-l")
        .arg(config.log_file.as_str());
    for param in config.startparams.split_whitespace() {
        command = command.arg(param);
    }
    command
}

/// `pg_ctl stop -D <datadir> -m f`.
#[must_use]
pub fn stop_command(config: &ServerProcessConfig, os: TargetOs) -> ControlCommand {
    ControlCommand::new(&config.executable, os)
        .arg("stop")
        .arg("-D")
        .arg(config.data_dir.as_str())
        .arg("-m")
        .arg("f")
}

/// `pg_ctl status -D <datadir>`.
#[must_use]
pub fn status_command(config: &ServerProcessConfig, os: TargetOs) -> ControlCommand {
    ControlCommand::new(&config.executable, os)
        .arg("status")
        .arg("-D")
        .arg(config.data_dir.as_str())
}

/// `pg_ctl --version`.
#[must_use]
pub fn version_command(executable: &Utf8Path, os: TargetOs) -> ControlCommand {
    ControlCommand::new(executable, os).arg("--version")
}

/// `pg_ctl initdb -D <datadir> -o "--username=<user> --auth=<method>"`.
///
/// When `password_file` is provided the cluster uses `md5` authentication
/// and the superuser password is read from that file.
#[must_use]
pub fn initdb_command(
    config: &ServerProcessConfig,
    password_file: Option<&Utf8Path>,
    os: TargetOs,
) -> ControlCommand {
    let user = quote_path(&config.user, os);
    let initdb_options = password_file.map_or_else(
        || format!("--username={user} --auth=trust"),
        |file| {
            format!(
                "--username={user} --auth=md5 --pwfile={}",
                quote_path(file.as_str(), os)
            )
        },
    );
    ControlCommand::new(&config.executable, os)
        .arg("initdb")
        .arg("-D")
        .arg(config.data_dir.as_str())
        .arg("-o")
        .arg(initdb_options)
}
