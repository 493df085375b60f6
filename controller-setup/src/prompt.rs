// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Operator interaction: the console abstraction and prompting on top of it.

use indicatif::ProgressDrawTarget;
use std::io::{self, BufRead, IsTerminal, Write};

/// The operator's terminal.
///
/// Everything user-facing goes through this so tests can script answers and
/// inspect output.
pub trait Console: Send + Sync {
    /// Shows `prompt` and reads one line, without its terminator. Returns
    /// `None` at end of input.
    fn read_line(&self, prompt: &str) -> io::Result<Option<String>>;

    /// Prints a line to standard output.
    fn print(&self, msg: &str);

    /// Prints a line to standard error.
    fn eprint(&self, msg: &str);

    /// Writes to standard output without a line terminator.
    fn write_inline(&self, text: &str);

    fn is_terminal(&self) -> bool;

    /// Where progress spinners are drawn.
    fn progress_target(&self) -> ProgressDrawTarget;
}

pub struct TerminalConsole;

impl Console for TerminalConsole {
    fn read_line(&self, prompt: &str) -> io::Result<Option<String>> {
        let mut stdout = io::stdout().lock();
        stdout.write_all(prompt.as_bytes())?;
        stdout.flush()?;
        drop(stdout);

        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    fn print(&self, msg: &str) {
        println!("{msg}");
    }

    fn eprint(&self, msg: &str) {
        eprintln!("{msg}");
    }

    fn write_inline(&self, text: &str) {
        let mut stdout = io::stdout().lock();
        // Progress output is best effort.
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }

    fn is_terminal(&self) -> bool {
        io::stdout().is_terminal()
    }

    fn progress_target(&self) -> ProgressDrawTarget {
        ProgressDrawTarget::stdout()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("no answer given for {0:?}")]
    NoInput(String),

    #[error("failed to read answer for {prompt:?}")]
    Read {
        prompt: String,
        #[source]
        err: io::Error,
    },
}

const HELP: &str = "help";

fn read_answer(
    console: &dyn Console,
    prompt: &str,
) -> Result<String, PromptError> {
    match console.read_line(prompt) {
        Ok(Some(line)) => Ok(line.trim().to_string()),
        Ok(None) => Err(PromptError::NoInput(prompt.trim().to_string())),
        Err(err) => {
            Err(PromptError::Read { prompt: prompt.trim().to_string(), err })
        }
    }
}

/// Asks for a value until a non-empty one is given.
///
/// An empty answer takes `default` when there is one. Answering `help`
/// prints `help_text` and asks again.
pub fn required_prompt(
    console: &dyn Console,
    title: &str,
    help_text: Option<&str>,
    default: Option<&str>,
) -> Result<String, PromptError> {
    let prompt = match default {
        Some(default) => format!("{title} [default={default}]: "),
        None => format!("{title}: "),
    };
    loop {
        let mut answer = read_answer(console, &prompt)?;
        if answer.is_empty() {
            if let Some(default) = default {
                answer = default.to_string();
            }
        }
        if answer == HELP {
            if let Some(help_text) = help_text {
                console.print(help_text);
            }
            continue;
        }
        if !answer.is_empty() {
            return Ok(answer);
        }
    }
}

/// Asks `prompt` until the answer is one of `choices`.
///
/// An empty answer takes `default`. Answering `help` prints `help_text` and
/// asks again.
pub fn prompt_for_choices<'a>(
    console: &dyn Console,
    prompt: &str,
    choices: &[&'a str],
    default: &'a str,
    help_text: Option<&str>,
) -> Result<&'a str, PromptError> {
    loop {
        let answer = read_answer(console, prompt)?.to_lowercase();
        if answer.is_empty() {
            return Ok(default);
        }
        if let Some(choice) = choices.iter().copied().find(|c| *c == answer) {
            return Ok(choice);
        }
        if answer == HELP {
            if let Some(help_text) = help_text {
                console.print(help_text);
            }
            continue;
        }
        console.print(&format!(
            "Invalid choice. Choose one of: {}",
            choices.join(", ")
        ));
    }
}

/// Asks a yes/no question whose default is "no". Answering `help` prints
/// `help_text` and asks again.
pub fn confirm(
    console: &dyn Console,
    question: &str,
    help_text: &str,
) -> Result<bool, PromptError> {
    let prompt = format!("{question} (yes/no) [default=no]? ");
    let answer = prompt_for_choices(
        console,
        &prompt,
        &["yes", "no"],
        "no",
        Some(help_text),
    )?;
    Ok(answer == "yes")
}
