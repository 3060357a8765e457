use crate::error::{Position, ReaderError};
use std::collections::VecDeque;
use std::io::BufRead;

/// A character source with pushback.
///
/// Characters handed back with [`PushbackStream::unread`] are replayed in LIFO
/// order before the underlying source is consulted again.
pub trait PushbackStream {
    /// Returns the next character, or `None` at end of stream.
    fn read_char(&mut self) -> Result<Option<char>, ReaderError>;

    /// Pushes `ch` back so the next `read_char` returns it.
    fn unread(&mut self, ch: char);

    fn current_line(&self) -> u32;

    fn current_column(&self) -> u32;

    /// Whether line/column reflect real source positions. The reader only
    /// attaches position metadata for positioned streams.
    fn is_positioned(&self) -> bool {
        false
    }

    /// File name reported in `:file` metadata and error locations.
    fn source_name(&self) -> Option<&str> {
        None
    }

    fn position(&self) -> Position {
        Position::new(self.current_line(), self.current_column())
    }
}

/// Stream over an in-memory string.
///
/// The line is always `1`; the column is the running character offset minus
/// whatever is waiting in the pushback buffer.
#[derive(Debug, Clone)]
pub struct StringPushbackStream {
    chars: Vec<char>,
    index: usize,
    buffer: Vec<char>,
}

impl StringPushbackStream {
    pub fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            index: 0,
            buffer: Vec::new(),
        }
    }
}

impl PushbackStream for StringPushbackStream {
    fn read_char(&mut self) -> Result<Option<char>, ReaderError> {
        if let Some(ch) = self.buffer.pop() {
            return Ok(Some(ch));
        }
        let ch = self.chars.get(self.index).copied();
        if ch.is_some() {
            self.index += 1;
        }
        Ok(ch)
    }

    fn unread(&mut self, ch: char) {
        self.buffer.push(ch);
    }

    fn current_line(&self) -> u32 {
        1
    }

    fn current_column(&self) -> u32 {
        self.index.saturating_sub(self.buffer.len()) as u32
    }
}

const POSITION_HISTORY: usize = 32;

/// Stream over any buffered reader, tracking the 1-based line and the column
/// of the next character to be read.
pub struct LineNumberingPushbackStream<R> {
    reader: R,
    name: Option<String>,
    pending: VecDeque<char>,
    buffer: Vec<char>,
    line: u32,
    column: u32,
    history: VecDeque<(u32, u32)>,
    exhausted: bool,
}

impl<R: BufRead> LineNumberingPushbackStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            name: None,
            pending: VecDeque::new(),
            buffer: Vec::new(),
            line: 1,
            column: 1,
            history: VecDeque::with_capacity(POSITION_HISTORY),
            exhausted: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    fn fill(&mut self) -> Result<(), ReaderError> {
        if self.exhausted || !self.pending.is_empty() {
            return Ok(());
        }
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            self.exhausted = true;
        } else {
            self.pending.extend(line.chars());
        }
        Ok(())
    }

    fn advance_position(&mut self, ch: char) {
        if self.history.len() == POSITION_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back((self.line, self.column));
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
    }
}

impl<R: BufRead> PushbackStream for LineNumberingPushbackStream<R> {
    fn read_char(&mut self) -> Result<Option<char>, ReaderError> {
        let ch = match self.buffer.pop() {
            Some(ch) => Some(ch),
            None => {
                self.fill()?;
                self.pending.pop_front()
            }
        };
        if let Some(ch) = ch {
            self.advance_position(ch);
        }
        Ok(ch)
    }

    fn unread(&mut self, ch: char) {
        self.buffer.push(ch);
        match self.history.pop_back() {
            Some((line, column)) => {
                self.line = line;
                self.column = column;
            }
            None if ch == '\n' => {
                self.line = self.line.saturating_sub(1).max(1);
            }
            None => {
                self.column = self.column.saturating_sub(1).max(1);
            }
        }
    }

    fn current_line(&self) -> u32 {
        self.line
    }

    fn current_column(&self) -> u32 {
        self.column
    }

    fn is_positioned(&self) -> bool {
        true
    }

    fn source_name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}
