// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use itertools::Itertools;
use std::process::Command;

/// A comparable, printable description of a command to be executed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Input {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
}

impl Input {
    pub fn new<S: AsRef<str>>(program: S, args: Vec<S>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: args.into_iter().map(|s| s.as_ref().to_string()).collect(),
            envs: vec![],
        }
    }

    /// Short-hand for a whitespace-separated string, which can be provided
    /// "like a shell command".
    pub fn shell<S: AsRef<str>>(input: S) -> Self {
        let mut args = input.as_ref().split_whitespace();

        Self::new(
            args.next().expect("Needs at least a program"),
            args.collect(),
        )
    }

    /// The final path component of the program, which is what tests usually
    /// want to match on.
    pub fn program_name(&self) -> &str {
        self.program.rsplit('/').next().unwrap_or(&self.program)
    }
}

impl std::fmt::Display for Input {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

fn os_str_to_string(s: &std::ffi::OsStr) -> String {
    s.to_string_lossy().to_string()
}

impl From<&Command> for Input {
    fn from(command: &Command) -> Self {
        Self {
            program: os_str_to_string(command.get_program()),
            args: command.get_args().map(os_str_to_string).collect(),
            envs: command
                .get_envs()
                .map(|(k, v)| {
                    (
                        os_str_to_string(k),
                        os_str_to_string(v.unwrap_or_default()),
                    )
                })
                .collect(),
        }
    }
}

/// Renders the environment of a command for debug logging, hiding values
/// since they may carry credentials.
pub fn env_keys(input: &Input) -> String {
    input.envs.iter().map(|(k, _)| k.as_str()).join(" ")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_input_from_command() {
        let mut command = Command::new("/snap/bin/psql");
        command.args(["-d", "postgres"]).env("PGPASSWORD", "secret");
        let input = Input::from(&command);
        assert_eq!(input.program_name(), "psql");
        assert_eq!(input.to_string(), "/snap/bin/psql -d postgres");
        assert_eq!(input, {
            let mut expected = Input::shell("/snap/bin/psql -d postgres");
            expected.envs =
                vec![("PGPASSWORD".to_string(), "secret".to_string())];
            expected
        });
        assert_eq!(env_keys(&input), "PGPASSWORD");
    }
}
