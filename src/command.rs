//! Immutable command descriptions and per-call execution options.
//!
//! A [`Command`] is built once and rendered against a concrete host at
//! execution time; host-specific environment fragments are spliced in by
//! [`Command::render`] without mutating the command itself.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};

use shell_escape::unix::escape;

use crate::host::Host;

/// Instruction to run on a host: a template plus structured decorations.
///
/// Rendering order is fixed: environment assignments, template, boolean
/// flags, `--key=value` options, then positional arguments.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Command {
    template: String,
    flags: Vec<String>,
    options: BTreeMap<String, String>,
    args: Vec<String>,
    env: BTreeMap<String, String>,
}

impl Command {
    /// Creates a command from a bare template line.
    #[must_use]
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into().trim().to_owned(),
            ..Self::default()
        }
    }

    /// Starts a builder for a decorated command.
    #[must_use]
    pub fn builder(template: impl Into<String>) -> CommandBuilder {
        CommandBuilder::new(template)
    }

    /// Template line the command was created from.
    #[must_use]
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Renders the literal command line for `host`.
    ///
    /// Host environment fragments come first, overridden by the command's
    /// own environment on key conflicts. The command is never mutated.
    #[must_use]
    pub fn render(&self, host: &Host) -> String {
        let mut env = host.config().env.clone();
        for (key, value) in &self.env {
            env.insert(key.clone(), value.clone());
        }

        let mut parts = Vec::new();
        for (key, value) in &env {
            parts.push(format!("{key}={}", escape(Cow::from(value.as_str()))));
        }
        parts.push(self.template.clone());
        parts.extend(self.flags.iter().cloned());
        for (key, value) in &self.options {
            parts.push(format!("--{key}={}", escape(Cow::from(value.as_str()))));
        }
        for arg in &self.args {
            parts.push(escape(Cow::from(arg.as_str())).into_owned());
        }
        parts.join(" ")
    }
}

/// Builder for [`Command`]; the built value is immutable.
#[derive(Clone, Debug, Default)]
pub struct CommandBuilder {
    command: Command,
}

impl CommandBuilder {
    fn new(template: impl Into<String>) -> Self {
        Self {
            command: Command::new(template),
        }
    }

    /// Appends a boolean flag rendered verbatim (for example `--verbose`).
    #[must_use]
    pub fn flag(mut self, flag: impl Into<String>) -> Self {
        self.command.flags.push(flag.into());
        self
    }

    /// Sets a `--key=value` option.
    #[must_use]
    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.command.options.insert(key.into(), value.into());
        self
    }

    /// Appends a positional argument, escaped at render time.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.command.args.push(arg.into());
        self
    }

    /// Sets an environment variable spliced ahead of the template.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.command.env.insert(key.into(), value.into());
        self
    }

    /// Finishes the builder.
    #[must_use]
    pub fn build(self) -> Command {
        self.command
    }
}

/// Per-call execution options.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExecOptions {
    /// Exit codes that do not raise a command failure. Defaults to `{0}`.
    pub acceptable_exit_codes: BTreeSet<i32>,
    /// Accept any exit code; the caller inspects the result instead.
    pub accept_all_exit_codes: bool,
    /// Skip reporting the result to the observability sink.
    pub silent: bool,
    /// Request a pseudo-terminal for the remote session.
    pub pty: bool,
    /// Bytes piped to remote stdin before end-of-input is signalled.
    pub stdin: Option<Vec<u8>>,
    /// Return an empty successful result without any I/O.
    pub dry_run: bool,
    /// Dispatch a list target concurrently, one task per host.
    pub run_in_parallel: bool,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            acceptable_exit_codes: BTreeSet::from([0]),
            accept_all_exit_codes: false,
            silent: false,
            pty: false,
            stdin: None,
            dry_run: false,
            run_in_parallel: false,
        }
    }
}

impl ExecOptions {
    /// Replaces the acceptable exit-code set.
    #[must_use]
    pub fn with_acceptable_exit_codes(mut self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.acceptable_exit_codes = codes.into_iter().collect();
        self
    }

    /// Accepts any exit code silently.
    #[must_use]
    pub const fn with_accept_all_exit_codes(mut self, accept: bool) -> Self {
        self.accept_all_exit_codes = accept;
        self
    }

    /// Suppresses the observability sink for this call.
    #[must_use]
    pub const fn with_silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    /// Requests a pseudo-terminal.
    #[must_use]
    pub const fn with_pty(mut self, pty: bool) -> Self {
        self.pty = pty;
        self
    }

    /// Pipes `stdin` to the remote process before signalling end-of-input.
    #[must_use]
    pub fn with_stdin(mut self, stdin: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }

    /// Skips all I/O and returns an empty successful result.
    #[must_use]
    pub const fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Runs list targets concurrently.
    #[must_use]
    pub const fn with_run_in_parallel(mut self, parallel: bool) -> Self {
        self.run_in_parallel = parallel;
        self
    }
}
