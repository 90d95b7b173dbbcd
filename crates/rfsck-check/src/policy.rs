//! Repair decision policy.
//!
//! Every prompt in the checker funnels through [`DecisionPolicy::ask`],
//! so the run mode is consulted in exactly one place. Preen mode is the
//! one mode that can refuse to decide at all: [`DecisionPolicy::preen_halt`]
//! turns a too-severe defect into a fatal error telling the operator to
//! rerun by hand.

use rfsck_error::{FsckError, Result};
use std::io::{BufRead, Write};

/// How repair questions get answered for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Ask the operator on the terminal.
    Interactive,
    /// Unattended boot-time mode: take every default silently, bail out
    /// on anything that needs judgment.
    Preen,
    /// Answer yes to everything, echoing the question.
    AssumeYes,
    /// Answer no to everything, echoing the question. Implies the image
    /// is opened read-only.
    AssumeNo,
}

impl RunMode {
    /// Whether this mode reads answers from a terminal.
    #[must_use]
    pub fn interactive(self) -> bool {
        matches!(self, Self::Interactive)
    }
}

/// Answers repair questions according to the run mode.
#[derive(Debug)]
pub struct DecisionPolicy {
    mode: RunMode,
}

impl DecisionPolicy {
    #[must_use]
    pub fn new(mode: RunMode) -> Self {
        Self { mode }
    }

    #[must_use]
    pub fn mode(&self) -> RunMode {
        self.mode
    }

    /// Answer `question` (no trailing punctuation) with `default_answer`
    /// as the suggested choice.
    ///
    /// Preen answers silently; the assume modes echo the question and
    /// their forced answer so a transcript still shows what happened;
    /// interactive mode prompts on the terminal.
    pub fn ask(&self, question: &str, default_answer: bool) -> Result<bool> {
        match self.mode {
            RunMode::Preen => Ok(default_answer),
            RunMode::AssumeYes => {
                println!("{question}? yes");
                Ok(true)
            }
            RunMode::AssumeNo => {
                println!("{question}? no");
                Ok(false)
            }
            RunMode::Interactive => {
                let stdin = std::io::stdin();
                let mut lines = stdin.lock();
                self.ask_terminal(question, default_answer, &mut lines, &mut std::io::stdout())
            }
        }
    }

    /// Terminal prompt loop, separated from the stdin handles so tests
    /// can drive it with buffers.
    fn ask_terminal(
        &self,
        question: &str,
        default_answer: bool,
        input: &mut dyn BufRead,
        output: &mut dyn Write,
    ) -> Result<bool> {
        let choices = if default_answer { "<y>|n" } else { "y|<n>" };
        loop {
            write!(output, "{question} ({choices})? ")?;
            output.flush()?;
            let mut line = String::new();
            if input.read_line(&mut line)? == 0 {
                // Terminal went away mid-question.
                return Err(FsckError::NeedTerminal);
            }
            match line.trim() {
                "" => return Ok(default_answer),
                "y" | "Y" | "yes" => return Ok(true),
                "n" | "N" | "no" => return Ok(false),
                _ => writeln!(output, "please answer y or n")?,
            }
        }
    }

    /// In preen mode, refuse to proceed past a defect that needs human
    /// judgment. All other modes continue to the prompt.
    pub fn preen_halt(&self, device_name: &str) -> Result<()> {
        if self.mode == RunMode::Preen {
            return Err(FsckError::ManualIntervention {
                device: device_name.to_string(),
            });
        }
        Ok(())
    }
}
