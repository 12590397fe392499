//! ui::prompts
//!
//! Interactive prompts.
//!
//! Prompts only appear in interactive mode. Non-interactive runs take the
//! default answer, so scripted invocations never hang on stdin.

use std::io::{BufRead, Write};

use thiserror::Error;

/// Errors from prompts.
#[derive(Debug, Error)]
pub enum PromptError {
    #[error("prompt cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(String),
}

/// Ask a yes/no question.
///
/// Non-interactive mode returns `default` without prompting. An empty
/// answer takes the default; EOF cancels.
pub fn confirm(message: &str, default: bool, interactive: bool) -> Result<bool, PromptError> {
    if !interactive {
        return Ok(default);
    }

    let hint = if default { "[Y/n]" } else { "[y/N]" };
    loop {
        print!("{message} {hint} ");
        std::io::stdout()
            .flush()
            .map_err(|e| PromptError::Io(e.to_string()))?;

        let mut line = String::new();
        let read = std::io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|e| PromptError::Io(e.to_string()))?;
        if read == 0 {
            return Err(PromptError::Cancelled);
        }

        match line.trim().to_lowercase().as_str() {
            "" => return Ok(default),
            "y" | "yes" => return Ok(true),
            "n" | "no" => return Ok(false),
            _ => println!("Please answer 'y' or 'n'."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_interactive_takes_default() {
        assert!(confirm("proceed?", true, false).unwrap());
        assert!(!confirm("proceed?", false, false).unwrap());
    }
}
