//! Interactive terminal prompts.

use std::io::{self, BufRead, Write};

use mockall::automock;

/// Source of interactive answers.
#[automock]
pub trait Prompter {
    /// Asks a question and returns the answer, without its line ending.
    fn read_line(&self, prompt: &str) -> io::Result<String>;
    /// Asks for a secret without echoing it.
    fn read_password(&self, prompt: &str) -> io::Result<String>;
}

/// [`Prompter`] reading from the controlling terminal.
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn read_line(&self, prompt: &str) -> io::Result<String> {
        let mut stdout = io::stdout();
        write!(stdout, "{}", prompt)?;
        stdout.flush()?;

        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        Ok(answer.trim_end_matches(['\r', '\n']).to_owned())
    }

    fn read_password(&self, prompt: &str) -> io::Result<String> {
        rpassword::prompt_password(prompt)
    }
}
