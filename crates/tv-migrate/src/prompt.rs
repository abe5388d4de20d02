use std::io::{self, BufRead, Write};
use tv_core::{Confirm, MigrateError};

/// Asks on the terminal.
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm_insert(&self, _target: &str) -> tv_core::Result<bool> {
        ask(
            &mut io::stdin().lock(),
            &mut io::stdout(),
            "Confirm data insertion (y/n): ",
        )
    }

    fn confirm_large_result(&self, found: usize) -> tv_core::Result<bool> {
        ask(
            &mut io::stdin().lock(),
            &mut io::stdout(),
            &format!("WARNING: found {found} rows, continue? (y/n): "),
        )
    }
}

/// Repeat `question` until the answer is `y` or `n`.
fn ask(input: &mut impl BufRead, output: &mut impl Write, question: &str) -> tv_core::Result<bool> {
    let mut line = String::new();
    loop {
        write!(output, "{question}")?;
        output.flush()?;
        line.clear();
        if input.read_line(&mut line)? == 0 {
            return Err(MigrateError::Aborted("no answer on stdin".into()));
        }
        match line.trim() {
            "y" => return Ok(true),
            "n" => return Ok(false),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reasks_until_yes_or_no() {
        let mut out = Vec::new();
        let answer = ask(&mut Cursor::new("maybe\n\nn\n"), &mut out, "Confirm data insertion (y/n): ").unwrap();
        assert!(!answer);
        assert_eq!(
            String::from_utf8(out).unwrap().matches("Confirm data insertion").count(),
            3
        );
        assert!(ask(&mut Cursor::new(" y \n"), &mut Vec::new(), "? ").unwrap());
    }

    #[test]
    fn closed_stdin_aborts() {
        let err = ask(&mut Cursor::new("yes\n"), &mut Vec::new(), "? ").unwrap_err();
        assert!(matches!(err, MigrateError::Aborted(_)));
    }
}
