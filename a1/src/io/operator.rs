//! Operator decisions requested by the loop (continue after an interrupt).

use std::io::{BufRead, Write};

use anyhow::{Context, Result};

/// Answers continue/stop prompts after an interrupt.
pub trait Operator {
    fn confirm_continue(&self) -> Result<bool>;
}

/// Asks on the terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinOperator;

impl Operator for StdinOperator {
    fn confirm_continue(&self) -> Result<bool> {
        let mut stdout = std::io::stdout();
        write!(stdout, "Continue? (y/n) ").context("write prompt")?;
        stdout.flush().context("flush stdout")?;
        let mut answer = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut answer)
            .context("read answer")?;
        Ok(parse_answer(&answer))
    }
}

/// Never continues; used when nobody is attached to a terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeclineOperator;

impl Operator for DeclineOperator {
    fn confirm_continue(&self) -> Result<bool> {
        Ok(false)
    }
}

fn parse_answer(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
