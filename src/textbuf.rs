//! Circular script byte buffer with refill-on-boundary reading.
//!
//! The buffer is split into two halves. Reading proceeds through one half
//! while the other holds the most recently read bytes, so ungetting up to
//! `HALF_LEN - 1` bytes back, plus whatever has been read inside the
//! current half, is always safe. When the read position reaches the call
//! position the source is asked to fill the half being entered and the
//! call position advances by one half.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Half-buffer length in bytes.
pub const HALF_LEN: usize = 4096;
/// Total buffer length in bytes.
pub const BUF_LEN: usize = HALF_LEN * 2;
/// Marker byte stored just past the last valid byte. Below any printable byte.
pub const END_MARKER: u8 = 0x07;

/// Source status after the most recent refill.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Status {
    #[default]
    Ok,
    End,
    Error,
}

/// Fills half-buffers on demand. The buffer owns no I/O knowledge;
/// implementations wrap a file or an in-memory string.
pub trait Refill {
    /// Fill `half` from the source. Returns the number of bytes written;
    /// fewer than `half.len()` means the source is exhausted.
    fn refill(&mut self, half: &mut [u8]) -> io::Result<usize>;
}

/// Script file source.
pub struct FileSource {
    file: File,
}

impl Refill for FileSource {
    fn refill(&mut self, half: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < half.len() {
            let n = self.file.read(&mut half[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }
}

/// In-memory script source.
pub struct StringSource {
    bytes: Vec<u8>,
    pos: usize,
}

impl Refill for StringSource {
    fn refill(&mut self, half: &mut [u8]) -> io::Result<usize> {
        let n = half.len().min(self.bytes.len() - self.pos);
        half[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Circular byte buffer over a `Refill` source.
pub struct TextBuf {
    buf: Box<[u8; BUF_LEN]>,
    read_pos: usize,
    call_pos: usize,
    end_pos: Option<usize>,
    status: Status,
    label: String,
    source: Option<Box<dyn Refill>>,
}

impl TextBuf {
    fn new(label: String, source: Box<dyn Refill>) -> Self {
        Self {
            buf: Box::new([0; BUF_LEN]),
            read_pos: 0,
            call_pos: 0,
            end_pos: None,
            status: Status::Ok,
            label,
            source: Some(source),
        }
    }

    /// Open a script file for reading.
    pub fn open_file(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(
            path.display().to_string(),
            Box::new(FileSource { file }),
        ))
    }

    /// Open an in-memory script. `label` names it in diagnostics.
    pub fn open_string(label: &str, text: &str) -> Self {
        Self::new(
            label.to_string(),
            Box::new(StringSource {
                bytes: text.as_bytes().to_vec(),
                pos: 0,
            }),
        )
    }

    /// Close the source. Further reads yield the end marker.
    pub fn close(&mut self) {
        self.source = None;
        if self.end_pos.is_none() {
            self.buf[self.read_pos] = END_MARKER;
            self.end_pos = Some(self.read_pos);
            self.status = Status::End;
        }
    }

    /// Rewind the read head to the start of the buffered data. Only
    /// meaningful while the first half has not been refilled over.
    pub fn reset(&mut self) {
        self.read_pos = 0;
    }

    /// Diagnostic label of the source.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Current read position inside the circular buffer. Only differences
    /// modulo `BUF_LEN` are meaningful.
    pub fn tell(&self) -> usize {
        self.read_pos
    }

    /// Source status. `Error` means a refill failed.
    pub fn status(&self) -> Status {
        self.status
    }

    /// Whether the next read yields the end marker.
    pub fn at_eof(&self) -> bool {
        match self.end_pos {
            Some(end) => self.read_pos == end || self.read_pos == (end + 1) % BUF_LEN,
            None => false,
        }
    }

    /// Whether the read head has consumed the end marker.
    pub fn after_eof(&self) -> bool {
        match self.end_pos {
            Some(end) => self.read_pos == (end + 1) % BUF_LEN,
            None => false,
        }
    }

    fn fill(&mut self) {
        let start = self.call_pos;
        let half = &mut self.buf[start..start + HALF_LEN];
        let result = match self.source.as_mut() {
            Some(source) => source.refill(half),
            None => Ok(0),
        };
        match result {
            Ok(n) if n == HALF_LEN => {
                self.call_pos = (self.call_pos + HALF_LEN) % BUF_LEN;
            }
            Ok(n) => {
                self.buf[start + n] = END_MARKER;
                self.end_pos = Some(start + n);
                self.status = Status::End;
            }
            Err(_) => {
                self.buf[start] = END_MARKER;
                self.end_pos = Some(start);
                self.status = Status::Error;
            }
        }
    }

    /// Read one byte, or the end marker at and past the end of input.
    pub fn get_char(&mut self) -> u8 {
        if let Some(end) = self.end_pos {
            let after = (end + 1) % BUF_LEN;
            if self.read_pos == after {
                return END_MARKER;
            }
            if self.read_pos == end {
                self.read_pos = after;
                return END_MARKER;
            }
        }
        if self.read_pos == self.call_pos && self.end_pos.is_none() {
            self.fill();
            if let Some(end) = self.end_pos {
                if self.read_pos == end {
                    self.read_pos = (end + 1) % BUF_LEN;
                    return END_MARKER;
                }
            }
        }
        let c = self.buf[self.read_pos];
        self.read_pos = (self.read_pos + 1) % BUF_LEN;
        c
    }

    /// Read one byte without advancing.
    pub fn peek_char(&mut self) -> u8 {
        let saved = self.read_pos;
        let c = self.get_char();
        self.read_pos = saved;
        c
    }

    /// Step the read head back one byte.
    pub fn unget_char(&mut self) {
        self.read_pos = (self.read_pos + BUF_LEN - 1) % BUF_LEN;
    }

    /// Step the read head back `n` bytes. Safe for `n` up to `HALF_LEN - 1`
    /// plus the bytes already read inside the current half.
    pub fn unget_n(&mut self, n: usize) {
        debug_assert!(n < BUF_LEN);
        self.read_pos = (self.read_pos + BUF_LEN - n % BUF_LEN) % BUF_LEN;
    }

    /// Read one byte and keep it only if it equals `c`.
    pub fn try_char(&mut self, c: u8) -> bool {
        if self.peek_char() == c {
            self.get_char();
            true
        } else {
            false
        }
    }

    /// Collect bytes matching `filter`, up to `max_len`. Bytes past the
    /// limit are consumed and discarded; the second value is then true.
    pub fn get_string(&mut self, filter: impl Fn(u8) -> bool, max_len: usize) -> (Vec<u8>, bool) {
        let mut out = Vec::new();
        let mut truncated = false;
        loop {
            let c = self.get_char();
            if c == END_MARKER && self.at_eof() {
                self.unget_char();
                break;
            }
            if !filter(c) {
                self.unget_char();
                break;
            }
            if out.len() < max_len {
                out.push(c);
            } else {
                truncated = true;
            }
        }
        (out, truncated)
    }

    /// Parse an integer in locale-independent decimal. On overflow the
    /// value saturates and the flag is set. Ungets everything and returns
    /// `None` when no digits follow.
    pub fn get_int(&mut self, allow_sign: bool) -> Option<(i64, bool)> {
        let mut negative = false;
        let mut consumed = 0usize;
        if allow_sign {
            let c = self.peek_char();
            if c == b'-' || c == b'+' {
                negative = c == b'-';
                self.get_char();
                consumed += 1;
            }
        }
        let (digits, _) = self.get_string(|c| c.is_ascii_digit(), 20);
        if digits.is_empty() {
            self.unget_n(consumed);
            return None;
        }
        let mut value: i64 = 0;
        let mut overflow = false;
        for &d in &digits {
            let d = (d - b'0') as i64;
            value = match value.checked_mul(10).and_then(|v| {
                if negative {
                    v.checked_sub(d)
                } else {
                    v.checked_add(d)
                }
            }) {
                Some(v) => v,
                None => {
                    overflow = true;
                    if negative {
                        i64::MIN
                    } else {
                        i64::MAX
                    }
                }
            };
        }
        Some((value, overflow))
    }

    /// Parse a decimal number (`digits`, `.digits`, or `digits.digits`),
    /// locale-independent. Ungets everything and returns `None` when no
    /// number follows.
    pub fn get_double(&mut self, allow_sign: bool) -> Option<f64> {
        let mut text = String::new();
        if allow_sign {
            let c = self.peek_char();
            if c == b'-' || c == b'+' {
                self.get_char();
                text.push(c as char);
            }
        }
        let (int_part, _) = self.get_string(|c| c.is_ascii_digit(), 64);
        for &d in &int_part {
            text.push(d as char);
        }
        let mut frac_len = 0usize;
        if self.try_char(b'.') {
            let (frac_part, _) = self.get_string(|c| c.is_ascii_digit(), 64);
            frac_len = frac_part.len();
            if frac_len == 0 {
                self.unget_char();
            } else {
                text.push('.');
                for &d in &frac_part {
                    text.push(d as char);
                }
            }
        }
        if int_part.is_empty() && frac_len == 0 {
            self.unget_n(text.len());
            return None;
        }
        text.parse::<f64>().ok()
    }

    /// Skip bytes while `pred` holds.
    pub fn skip_while(&mut self, pred: impl Fn(u8) -> bool) {
        loop {
            let c = self.get_char();
            if c == END_MARKER && self.at_eof() {
                self.unget_char();
                return;
            }
            if !pred(c) {
                self.unget_char();
                return;
            }
        }
    }

    /// Skip the rest of the line, consuming the line break.
    pub fn skip_line(&mut self) {
        loop {
            let c = self.get_char();
            if c == END_MARKER && self.at_eof() {
                self.unget_char();
                return;
            }
            if c == b'\n' {
                self.try_char(b'\r');
                return;
            }
            if c == b'\r' {
                self.try_char(b'\n');
                return;
            }
        }
    }

    /// Skip spaces and tabs.
    pub fn skip_space(&mut self) {
        self.skip_while(|c| c == b' ' || c == b'\t');
    }
}
