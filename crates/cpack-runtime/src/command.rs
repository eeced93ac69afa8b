use crate::RuntimeError;
use std::io;
use std::path::Path;
use std::process::{Command, Output};
use tracing::debug;

/// A prepared external tool invocation.
pub(crate) struct Tool<'a> {
    program: &'a str,
    args: Vec<String>,
    cwd: Option<&'a Path>,
    envs: Vec<(&'static str, String)>,
}

impl<'a> Tool<'a> {
    pub(crate) fn new(program: &'a str) -> Self {
        Self {
            program,
            args: Vec::new(),
            cwd: None,
            envs: Vec::new(),
        }
    }

    #[must_use]
    pub(crate) fn arg(mut self, arg: impl AsRef<std::ffi::OsStr>) -> Self {
        self.args.push(arg.as_ref().to_string_lossy().into_owned());
        self
    }

    #[must_use]
    pub(crate) fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        for a in args {
            self.args.push(a.as_ref().to_string_lossy().into_owned());
        }
        self
    }

    #[must_use]
    pub(crate) fn cwd(mut self, dir: &'a Path) -> Self {
        self.cwd = Some(dir);
        self
    }

    #[must_use]
    pub(crate) fn env(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.envs.push((key, value.into()));
        self
    }

    fn display(&self) -> String {
        let mut s = self.program.to_owned();
        for a in &self.args {
            s.push(' ');
            s.push_str(a);
        }
        s
    }

    /// Run and capture output, whatever the exit status.
    pub(crate) fn output(&self) -> Result<Output, RuntimeError> {
        debug!("running `{}`", self.display());
        let mut cmd = Command::new(self.program);
        cmd.args(&self.args);
        if let Some(dir) = self.cwd {
            cmd.current_dir(dir);
        }
        for (k, v) in &self.envs {
            cmd.env(k, v);
        }
        cmd.output().map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                RuntimeError::ToolMissing(self.program.to_owned())
            } else {
                RuntimeError::Io(e)
            }
        })
    }

    /// Run and return trimmed stdout; a non-zero exit is an error.
    pub(crate) fn run(&self) -> Result<String, RuntimeError> {
        let output = self.output()?;
        if !output.status.success() {
            return Err(RuntimeError::CommandFailed {
                command: self.display(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }

    /// Whether the command exits successfully. Missing tools count as failure.
    pub(crate) fn succeeds(&self) -> bool {
        self.output().is_ok_and(|o| o.status.success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_tool_is_reported_by_name() {
        let err = Tool::new("cpack-definitely-not-a-real-tool")
            .arg("--version")
            .run()
            .unwrap_err();
        assert!(matches!(err, RuntimeError::ToolMissing(ref t) if t == "cpack-definitely-not-a-real-tool"));
    }

    #[test]
    fn display_includes_arguments() {
        let tool = Tool::new("git").args(["rev-parse", "HEAD"]);
        assert_eq!(tool.display(), "git rev-parse HEAD");
    }
}
