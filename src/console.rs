//! Operator I/O used by the bootstrapper: hidden password entry plus the short
//! status and rejection messages printed along the way.

use std::collections::VecDeque;
use std::io;

use rpassword::prompt_password;

pub trait Console {
    /// Reads one line without echoing it back to the terminal.
    fn read_hidden(&mut self, prompt: &str) -> io::Result<String>;

    /// Informational message (instructions, progress).
    fn notice(&mut self, message: &str);

    /// Rejection or failure message.
    fn alert(&mut self, message: &str);
}

/// The interactive terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalConsole;

impl Console for TerminalConsole {
    fn read_hidden(&mut self, prompt: &str) -> io::Result<String> {
        prompt_password(prompt)
    }

    fn notice(&mut self, message: &str) {
        println!("{message}");
    }

    fn alert(&mut self, message: &str) {
        eprintln!("{message}");
    }
}

/// Answers prompts from a fixed queue and records everything shown. Once the
/// queue is drained every read fails with `UnexpectedEof`, the same as a closed
/// stdin.
#[derive(Debug, Default)]
pub struct ScriptedConsole {
    answers: VecDeque<String>,
    pub prompts: Vec<String>,
    pub notices: Vec<String>,
    pub alerts: Vec<String>,
}

impl ScriptedConsole {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn remaining(&self) -> usize {
        self.answers.len()
    }
}

impl Console for ScriptedConsole {
    fn read_hidden(&mut self, prompt: &str) -> io::Result<String> {
        self.prompts.push(prompt.to_string());
        self.answers
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "no scripted answer left"))
    }

    fn notice(&mut self, message: &str) {
        self.notices.push(message.to_string());
    }

    fn alert(&mut self, message: &str) {
        self.alerts.push(message.to_string());
    }
}

impl<C: Console + ?Sized> Console for &mut C {
    fn read_hidden(&mut self, prompt: &str) -> io::Result<String> {
        (**self).read_hidden(prompt)
    }

    fn notice(&mut self, message: &str) {
        (**self).notice(message)
    }

    fn alert(&mut self, message: &str) {
        (**self).alert(message)
    }
}
