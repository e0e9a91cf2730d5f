use std::collections::HashMap;
use std::path::PathBuf;

use tokio::process::Command;

/// How to start the helper process for one generation request. The prompt
/// is appended as the final argument.
#[derive(Debug, Clone)]
pub struct HelperLaunch {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

impl HelperLaunch {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn command(&self, prompt: &str) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(prompt)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());
        for (key, value) in &self.env {
            command.env(key, value);
        }
        command
    }

    /// Program and arguments for log lines, each rendered as a quoted
    /// string so embedded spaces stay visible.
    pub fn display(&self) -> String {
        std::iter::once(self.program.to_string_lossy().into_owned())
            .chain(self.args.iter().cloned())
            .map(|part| format!("{part:?}"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_quotes_every_part() {
        let launch = HelperLaunch::new("/usr/bin/sandbox-builder")
            .arg("generate-in-sandbox")
            .arg("it's \"new\"");
        assert_eq!(
            launch.display(),
            r#""/usr/bin/sandbox-builder" "generate-in-sandbox" "it's \"new\"""#
        );
    }
}
