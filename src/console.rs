//! Operator console: the shared output stream and the line sources the shell
//! reads from.

use std::{
    cell::RefCell,
    io::{self, ErrorKind, Read, Write},
    rc::Rc,
};

use rustyline::{DefaultEditor, error::ReadlineError};

use crate::config::ShellConfig;

const BACKSPACE: u8 = 0x08;
const DELETE: u8 = 0x7f;

/// Console output shared between the shell and the engine's `print`.
#[derive(Clone)]
pub struct ConsoleOut {
    inner: Rc<RefCell<Box<dyn Write>>>,
}

impl ConsoleOut {
    pub fn new(writer: impl Write + 'static) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Box::new(writer))),
        }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Writes `text` and flushes so prompts appear before input is read.
    pub fn emit(&self, text: &str) -> io::Result<()> {
        let mut out = self.inner.borrow_mut();
        out.write_all(text.as_bytes())?;
        out.flush()
    }

    pub fn line(&self, text: &str) -> io::Result<()> {
        let mut out = self.inner.borrow_mut();
        out.write_all(text.as_bytes())?;
        out.write_all(b"\n")?;
        out.flush()
    }
}

/// In-memory console sink. Clones share the same buffer.
#[derive(Clone, Default)]
pub struct Capture {
    buffer: Rc<RefCell<Vec<u8>>>,
}

impl Capture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.borrow()).into_owned()
    }

    pub fn clear(&self) {
        self.buffer.borrow_mut().clear();
    }
}

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    Line(String),
    /// No input available yet; the caller should yield and try again.
    Pending,
    /// The operator interrupted the current entry (Ctrl-C).
    Interrupted,
    /// The input source is gone for good.
    Closed,
}

pub trait LineSource {
    fn read_line(&mut self, prompt: &str) -> io::Result<LineEvent>;
}

/// Byte-oriented console with serial-terminal semantics.
///
/// A line ends at `\n` or `\r` (a `\n` right after `\r` is swallowed),
/// backspace and delete erase, and only printable ASCII is kept. A partial
/// line survives end-of-stream, so a later call continues it without
/// re-printing the prompt. With `exit_on_eof` set, end-of-stream ends the
/// partial line instead.
pub struct RawConsole<R> {
    input: R,
    out: ConsoleOut,
    echo: bool,
    exit_on_eof: bool,
    capacity: usize,
    pending: String,
    prompted: bool,
    after_cr: bool,
}

impl<R: Read> RawConsole<R> {
    pub fn new(input: R, out: ConsoleOut, config: &ShellConfig) -> Self {
        Self {
            input,
            out,
            echo: config.echo,
            exit_on_eof: config.exit_on_eof,
            capacity: config.line_capacity.max(2),
            pending: String::new(),
            prompted: false,
            after_cr: false,
        }
    }

    fn finish_line(&mut self) -> io::Result<LineEvent> {
        if self.echo {
            self.out.emit("\n")?;
        }
        self.prompted = false;
        Ok(LineEvent::Line(std::mem::take(&mut self.pending)))
    }
}

impl<R: Read> LineSource for RawConsole<R> {
    fn read_line(&mut self, prompt: &str) -> io::Result<LineEvent> {
        if !self.prompted {
            self.out.emit(prompt)?;
            self.prompted = true;
        }
        let mut byte = [0u8; 1];
        loop {
            // One slot is reserved for the terminator, as on the device.
            if self.pending.len() >= self.capacity - 1 {
                return self.finish_line();
            }
            match self.input.read(&mut byte) {
                Ok(0) if self.exit_on_eof && !self.pending.is_empty() => {
                    return self.finish_line();
                }
                Ok(0) => return Ok(LineEvent::Pending),
                Ok(_) => {}
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(LineEvent::Pending),
                Err(err) => return Err(err),
            }
            let after_cr = std::mem::replace(&mut self.after_cr, false);
            match byte[0] {
                b'\n' if after_cr => continue,
                b'\r' => {
                    self.after_cr = true;
                    return self.finish_line();
                }
                b'\n' => return self.finish_line(),
                BACKSPACE | DELETE => {
                    if self.pending.pop().is_some() && self.echo {
                        self.out.emit("\x08 \x08")?;
                    }
                }
                ch @ 0x20..=0x7e => {
                    self.pending.push(ch as char);
                    if self.echo {
                        self.out.emit(&(ch as char).to_string())?;
                    }
                }
                _ => {}
            }
        }
    }
}

/// Line editor for interactive terminals.
pub struct EditorConsole {
    editor: DefaultEditor,
}

impl EditorConsole {
    pub fn new() -> io::Result<Self> {
        let editor = DefaultEditor::new().map_err(|err| io::Error::new(ErrorKind::Other, err))?;
        Ok(Self { editor })
    }
}

impl LineSource for EditorConsole {
    fn read_line(&mut self, prompt: &str) -> io::Result<LineEvent> {
        match self.editor.readline(prompt) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    self.editor.add_history_entry(line.as_str()).ok();
                }
                Ok(LineEvent::Line(line))
            }
            Err(ReadlineError::Interrupted) => Ok(LineEvent::Interrupted),
            Err(ReadlineError::Eof) => Ok(LineEvent::Closed),
            Err(err) => Err(io::Error::new(ErrorKind::Other, err)),
        }
    }
}
