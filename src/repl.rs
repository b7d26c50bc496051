use std::{thread, time::Duration};

use tracing::{info, warn};

use crate::{
    config::{BlockDetection, ShellConfig},
    console::{LineEvent, LineSource},
    diagnostics::{Diagnostic, Result, Status},
    runtime::{Completeness, Evaluation, Host},
};

const CONTINUATION_MARKER: char = '\\';

const BANNER: &str = "\
moondash Lua shell
Type 'help' for commands, 'quit' to exit REPL
";

const HELP: &str = "\
Commands:
  help      - Show this help
  quit      - Exit REPL
  heap()    - Show engine memory use
  restart() - Restart the device

Lua modules:
  display   - RGB display functions
  touch     - Touch panel
  i2c       - Two-wire bus
  wifi      - Wireless station
  http      - HTTP client
  sys       - System functions

End a line with \\ to continue it; an empty line runs a pending block.
";

/// Decides when interactive input spans several lines.
pub trait BlockDetector {
    /// Whether `line`, entered at the primary prompt, starts a block that
    /// needs more lines.
    fn opens_block(&self, host: &Host, line: &str) -> bool;
    /// Whether the accumulated `buffer`, whose last line is `line`, is ready
    /// to run.
    fn closes_block(&self, host: &Host, buffer: &str, line: &str) -> bool;
}

/// Keyword heuristic: a line whose block openers outnumber its closers
/// opens a block, and any line with a closer ends it. Keywords inside
/// strings or comments are counted too.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordScan;

impl KeywordScan {
    fn words(line: &str) -> impl Iterator<Item = &str> {
        line.split(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
            .filter(|word| !word.is_empty())
    }

    /// Openers minus closers. `do` after `for` or `while` belongs to that loop.
    fn depth(line: &str) -> i32 {
        let mut depth = 0;
        let mut loop_header = false;
        for word in Self::words(line) {
            match word {
                "function" | "if" | "repeat" => depth += 1,
                "for" | "while" => {
                    depth += 1;
                    loop_header = true;
                }
                "do" if loop_header => loop_header = false,
                "do" => depth += 1,
                "end" | "until" => depth -= 1,
                _ => {}
            }
        }
        depth
    }
}

impl BlockDetector for KeywordScan {
    fn opens_block(&self, _: &Host, line: &str) -> bool {
        Self::depth(line) > 0
    }

    fn closes_block(&self, _: &Host, _: &str, line: &str) -> bool {
        Self::words(line).any(|word| word == "end" || word == "until")
    }
}

/// Asks the engine whether the input so far compiles or merely ends early.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineProbe;

impl BlockDetector for EngineProbe {
    fn opens_block(&self, host: &Host, line: &str) -> bool {
        host.is_complete(line) == Completeness::Incomplete
    }

    fn closes_block(&self, host: &Host, buffer: &str, _: &str) -> bool {
        host.is_complete(buffer) != Completeness::Incomplete
    }
}

pub fn detector(kind: BlockDetection) -> Box<dyn BlockDetector> {
    match kind {
        BlockDetection::Probe => Box::new(EngineProbe),
        BlockDetection::Keywords => Box::new(KeywordScan),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    SingleLine,
    Continuation,
}

/// Per-shell input state.
#[derive(Debug, Default)]
pub struct Session {
    mode: Mode,
    buffer: String,
}

impl Session {
    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    fn reset(&mut self) {
        self.mode = Mode::SingleLine;
        self.buffer.clear();
    }
}

/// Why the shell loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellExit {
    /// The operator typed `quit`.
    Quit,
    /// The input source closed.
    Closed,
    /// A script called `restart()`.
    Restart,
}

pub struct Shell<'h> {
    host: &'h Host,
    config: ShellConfig,
    detector: Box<dyn BlockDetector>,
    session: Session,
}

impl<'h> Shell<'h> {
    pub fn new(host: &'h Host, config: &ShellConfig) -> Self {
        Self {
            host,
            config: config.clone(),
            detector: detector(config.block_detection),
            session: Session::default(),
        }
    }

    pub fn with_detector(mut self, detector: Box<dyn BlockDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn prompt(&self) -> &str {
        match self.session.mode {
            Mode::SingleLine => &self.config.prompt,
            Mode::Continuation => &self.config.continuation_prompt,
        }
    }

    pub fn run(&mut self, input: &mut dyn LineSource) -> Result<ShellExit> {
        if self.config.banner {
            self.host.console().emit(BANNER)?;
        }
        info!("shell started");
        loop {
            let prompt = self.prompt().to_string();
            match input.read_line(&prompt)? {
                LineEvent::Line(line) => {
                    if let Some(exit) = self.handle_line(&line)? {
                        info!(?exit, "shell finished");
                        return Ok(exit);
                    }
                }
                LineEvent::Pending if self.config.exit_on_eof => return Ok(ShellExit::Closed),
                LineEvent::Pending => thread::sleep(Duration::from_millis(self.config.idle_poll_ms)),
                LineEvent::Interrupted => {
                    if self.session.mode == Mode::Continuation {
                        self.host.console().line("(block discarded)")?;
                    }
                    self.session.reset();
                }
                LineEvent::Closed => return Ok(ShellExit::Closed),
            }
        }
    }

    /// Processes one input line. Returns `Some` when the shell should stop.
    pub fn handle_line(&mut self, line: &str) -> Result<Option<ShellExit>> {
        match self.session.mode {
            Mode::SingleLine => self.single_line(line),
            Mode::Continuation => self.continuation(line),
        }
    }

    fn single_line(&mut self, line: &str) -> Result<Option<ShellExit>> {
        let console = self.host.console();
        let trimmed = line.trim();
        match trimmed {
            "" => return Ok(None),
            "quit" => {
                console.line("Exiting REPL...")?;
                return Ok(Some(ShellExit::Quit));
            }
            "help" => {
                console.emit(HELP)?;
                return Ok(None);
            }
            _ => {}
        }

        if let Some(head) = trimmed.strip_suffix(CONTINUATION_MARKER) {
            self.session.mode = Mode::Continuation;
            self.append(head);
            return Ok(None);
        }
        if self.detector.opens_block(self.host, trimmed) {
            self.session.mode = Mode::Continuation;
            self.append(trimmed);
            return Ok(None);
        }

        match self.host.evaluate(trimmed) {
            Evaluation::Values(values) => {
                for value in values {
                    console.line(&value)?;
                }
                self.after_unit(Ok(()))
            }
            Evaluation::NotAnExpression => {
                let status = self.host.execute_source("stdin", trimmed);
                self.after_unit(status)
            }
            Evaluation::Failed(diag) => self.after_unit(Err(diag)),
        }
    }

    fn continuation(&mut self, line: &str) -> Result<Option<ShellExit>> {
        let line = line.trim_end();
        if line.trim().is_empty() {
            return self.run_buffer();
        }
        if let Some(head) = line.strip_suffix(CONTINUATION_MARKER) {
            self.append(head);
            return Ok(None);
        }
        self.append(line);
        if self
            .detector
            .closes_block(self.host, &self.session.buffer, line)
        {
            return self.run_buffer();
        }
        Ok(None)
    }

    fn append(&mut self, line: &str) {
        if self.session.buffer.len() + line.len() + 1 > self.config.buffer_capacity {
            warn!(
                capacity = self.config.buffer_capacity,
                "input buffer full, line dropped"
            );
            return;
        }
        self.session.buffer.push_str(line);
        self.session.buffer.push('\n');
    }

    fn run_buffer(&mut self) -> Result<Option<ShellExit>> {
        let source = std::mem::take(&mut self.session.buffer);
        self.session.reset();
        if source.trim().is_empty() {
            return Ok(None);
        }
        let status = self.host.execute_source("stdin", &source);
        self.after_unit(status)
    }

    fn after_unit(&self, status: Status) -> Result<Option<ShellExit>> {
        if self.host.restart_requested() {
            self.host.console().line("Restarting...")?;
            return Ok(Some(ShellExit::Restart));
        }
        if let Err(diag) = status {
            self.report(&diag)?;
        }
        Ok(None)
    }

    fn report(&self, diag: &Diagnostic) -> Result<()> {
        self.host
            .console()
            .line(&format!("{}: {}", diag.kind.label(), diag.message))?;
        Ok(())
    }
}
