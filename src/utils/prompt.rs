use anyhow::{Context, Result};
use std::io::{self, BufRead, Write};

/// Answers a yes/no question before something destructive happens.
pub trait Confirm {
    fn confirm(&self, question: &str) -> Result<bool>;
}

/// Asks on the terminal. Only the literal answer `yes` counts.
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&self, question: &str) -> Result<bool> {
        let stdin = io::stdin();
        let stdout = io::stdout();
        ask_exact(question, &mut stdin.lock(), &mut stdout.lock())
            .context("Failed to read confirmation from the terminal")
    }
}

/// Fixed answer.
#[cfg(test)]
pub struct Canned(pub bool);

#[cfg(test)]
impl Confirm for Canned {
    fn confirm(&self, _question: &str) -> Result<bool> {
        Ok(self.0)
    }
}

pub fn ask_exact<R: BufRead, W: Write>(question: &str, input: &mut R, output: &mut W) -> io::Result<bool> {
    write!(output, "{}\nType 'yes' to continue: ", question)?;
    output.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(answer.trim() == "yes")
}
