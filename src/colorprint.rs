use std::env;
use std::io::{self, IsTerminal};

/// ANSI styling for terminal output. Styling is off when stdout is not a
/// terminal or `NO_COLOR` is set, so piped output stays plain.
#[derive(Debug, Clone, Copy)]
pub struct Bcolors {
    enabled: bool,
}

impl Default for Bcolors {
    fn default() -> Self {
        Self::new()
    }
}

impl Bcolors {
    pub fn new() -> Self {
        let enabled = io::stdout().is_terminal() && env::var_os("NO_COLOR").is_none();
        Bcolors { enabled }
    }

    pub fn plain() -> Self {
        Bcolors { enabled: false }
    }

    fn paint(&self, code: &str, text: &str) -> String {
        if self.enabled {
            format!("\x1b[{code}m{text}\x1b[0m")
        } else {
            text.to_string()
        }
    }

    pub fn header(&self, text: &str) -> String {
        self.paint("95", text)
    }

    pub fn okblue(&self, text: &str) -> String {
        self.paint("94", text)
    }

    pub fn okgreen(&self, text: &str) -> String {
        self.paint("92", text)
    }

    pub fn warning(&self, text: &str) -> String {
        self.paint("93", text)
    }

    pub fn fail(&self, text: &str) -> String {
        self.paint("91", text)
    }

    pub fn bold(&self, text: &str) -> String {
        self.paint("1", text)
    }

    pub fn dim(&self, text: &str) -> String {
        self.paint("2", text)
    }
}
