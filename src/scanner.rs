//! Character-level scanner over the circular script buffer.
//!
//! Raw bytes pass through a per-instance table of filter functions which
//! collapse whitespace into single SPACE/LNBRK tokens, strip comments,
//! warn on invalid bytes, and map the buffer's end marker to EOF. Each
//! emitted token records a scan frame; a circular history of frames
//! supports multi-level ungetting by rewinding the buffer and replaying
//! the deterministic filters.

use funutd::Rnd;

use crate::math::PI;
use crate::symtab::{SymData, SymTab};
use crate::textbuf::{self, Status, TextBuf, BUF_LEN};

/// Token for a collapsed run of spaces and tabs.
pub const SCAN_SPACE: u8 = b' ';
/// Token for a line break of any style.
pub const SCAN_LNBRK: u8 = b'\n';
/// Token for end of input.
pub const SCAN_EOF: u8 = 0xFF;

/// Unget history depth.
pub const HISTORY_LEN: usize = 64;
/// Symbols longer than this are truncated with a warning.
pub const SYMBOL_MAX: usize = 79;

/// Frame flag: token is a SPACE.
pub const SF_SPACE: u8 = 1 << 0;
/// Frame flag: token is a LNBRK.
pub const SF_LNBRK: u8 = 1 << 1;

/// Character filter. Returns the token byte to emit, or 0 to skip.
pub type ScanFilter = fn(&mut Scanner, u8) -> u8;

/// Callback resolving named numeric constants (pitch notes, channel
/// labels) at the current scan position.
pub type NumConstFn = fn(&mut Scanner, &mut SymTab) -> Option<f64>;

/// Whitespace handling for `get_char`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WsLevel {
    /// Emit SPACE and LNBRK tokens.
    All,
    /// Drop them.
    None,
}

/// Position and content of one emitted token.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScanFrame {
    /// 1-based line of the token.
    pub line: u32,
    /// 1-based column of the token.
    pub col: u32,
    /// Token byte.
    pub byte: u8,
    /// SF_* flags.
    pub flags: u8,
    raw_len: u32,
    pre_line: u32,
    pre_col: u32,
}

pub struct Scanner {
    buf: TextBuf,
    filters: [ScanFilter; 128],
    ws_level: WsLevel,
    line: u32,
    col: u32,
    step_raw: u32,
    consumed: u64,
    furthest: u64,
    history: [ScanFrame; HISTORY_LEN],
    hist_pos: usize,
    hist_len: usize,
    errors: u32,
    warnings: u32,
    rnd: Rnd,
}

fn default_filters() -> [ScanFilter; 128] {
    let mut t: [ScanFilter; 128] = [filter_invalid; 128];
    for c in 0x20..0x7f {
        t[c] = filter_accept;
    }
    t[textbuf::END_MARKER as usize] = filter_end;
    t[b' ' as usize] = filter_space;
    t[b'\t' as usize] = filter_space;
    t[b'\n' as usize] = filter_lnbrk;
    t[b'\r' as usize] = filter_lnbrk;
    t[b'#' as usize] = filter_linecomment;
    t[b'/' as usize] = filter_slash;
    t
}

fn filter_accept(_s: &mut Scanner, c: u8) -> u8 {
    c
}

fn filter_invalid(s: &mut Scanner, c: u8) -> u8 {
    if s.fresh() {
        s.warning(&format!("invalid character 0x{c:02X} skipped"));
    }
    0
}

fn filter_end(s: &mut Scanner, c: u8) -> u8 {
    if s.buf.at_eof() {
        if s.buf.status() == Status::Error && s.fresh() {
            s.error("error reading script");
        }
        return SCAN_EOF;
    }
    filter_invalid(s, c)
}

fn filter_space(s: &mut Scanner, _c: u8) -> u8 {
    loop {
        if s.buf.at_eof() {
            break;
        }
        let c = s.bgetc();
        if c != b' ' && c != b'\t' {
            s.bungetc();
            break;
        }
    }
    SCAN_SPACE
}

fn filter_lnbrk(s: &mut Scanner, c: u8) -> u8 {
    let pair = if c == b'\n' { b'\r' } else { b'\n' };
    if !s.buf.at_eof() && s.buf.try_char(pair) {
        s.account(1);
    }
    s.line += 1;
    s.col = 1;
    SCAN_LNBRK
}

fn filter_linecomment(s: &mut Scanner, _c: u8) -> u8 {
    loop {
        if s.buf.at_eof() {
            break;
        }
        let c = s.bgetc();
        if c == b'\n' || c == b'\r' {
            s.bungetc();
            break;
        }
    }
    0
}

fn filter_blockcomment(s: &mut Scanner, _c: u8) -> u8 {
    loop {
        if s.buf.at_eof() {
            if s.fresh() {
                s.error("unterminated block comment at end of script");
            }
            break;
        }
        let c = s.bgetc();
        if c == b'\n' || c == b'\r' {
            let pair = if c == b'\n' { b'\r' } else { b'\n' };
            if s.buf.try_char(pair) {
                s.account(1);
            }
            s.line += 1;
            s.col = 1;
        } else if c == b'*' && !s.buf.at_eof() && s.buf.peek_char() == b'/' {
            s.bgetc();
            break;
        }
    }
    0
}

fn filter_slash(s: &mut Scanner, c: u8) -> u8 {
    if s.buf.at_eof() {
        return c;
    }
    if s.buf.try_char(b'/') {
        s.account(1);
        return filter_linecomment(s, c);
    }
    if s.buf.try_char(b'*') {
        s.account(1);
        return filter_blockcomment(s, c);
    }
    c
}

impl Scanner {
    pub fn new(buf: TextBuf) -> Self {
        Self {
            buf,
            filters: default_filters(),
            ws_level: WsLevel::None,
            line: 1,
            col: 1,
            step_raw: 0,
            consumed: 0,
            furthest: 0,
            history: [ScanFrame::default(); HISTORY_LEN],
            hist_pos: 0,
            hist_len: 0,
            errors: 0,
            warnings: 0,
            rnd: Rnd::from_u64(0x736f6e6f67656e),
        }
    }

    /// Replace one filter table entry. Bytes >= 128 route to entry 0.
    pub fn set_filter(&mut self, byte: u8, filter: ScanFilter) {
        self.filters[(byte & 0x7f) as usize] = filter;
    }

    /// Diagnostic label of the script source.
    pub fn label(&self) -> &str {
        self.buf.label()
    }

    /// Set whitespace handling, returning the previous level.
    pub fn set_ws_level(&mut self, level: WsLevel) -> WsLevel {
        std::mem::replace(&mut self.ws_level, level)
    }

    fn bgetc(&mut self) -> u8 {
        let before = self.buf.tell();
        let c = self.buf.get_char();
        let moved = (self.buf.tell() + BUF_LEN - before) % BUF_LEN;
        if moved > 0 {
            self.step_raw += 1;
            self.consumed += 1;
            if c != textbuf::END_MARKER {
                self.col += 1;
            }
        }
        c
    }

    fn bungetc(&mut self) {
        self.buf.unget_char();
        self.step_raw -= 1;
        self.consumed -= 1;
        self.col -= 1;
    }

    fn account(&mut self, n: u32) {
        self.step_raw += n;
        self.consumed += n as u64;
    }

    /// Whether the current byte has not been scanned before. Used to
    /// avoid duplicate diagnostics when ungot spans are rescanned.
    fn fresh(&mut self) -> bool {
        if self.consumed > self.furthest {
            self.furthest = self.consumed;
            true
        } else {
            false
        }
    }

    fn push_frame(&mut self, frame: ScanFrame) {
        self.history[self.hist_pos] = frame;
        self.hist_pos = (self.hist_pos + 1) % HISTORY_LEN;
        if self.hist_len < HISTORY_LEN {
            self.hist_len += 1;
        }
    }

    fn last_frame_mut(&mut self) -> &mut ScanFrame {
        debug_assert!(self.hist_len > 0);
        let idx = (self.hist_pos + HISTORY_LEN - 1) % HISTORY_LEN;
        &mut self.history[idx]
    }

    /// Frame of the most recently emitted token.
    pub fn pos(&self) -> ScanFrame {
        if self.hist_len == 0 {
            ScanFrame {
                line: self.line,
                col: self.col,
                ..ScanFrame::default()
            }
        } else {
            self.history[(self.hist_pos + HISTORY_LEN - 1) % HISTORY_LEN]
        }
    }

    /// Read the next token byte, filters applied.
    pub fn get_char(&mut self) -> u8 {
        let pre_line = self.line;
        let pre_col = self.col;
        self.step_raw = 0;
        loop {
            let tok_line = self.line;
            let tok_col = self.col;
            let raw = self.bgetc();
            let filter = self.filters[if raw < 128 { raw as usize } else { 0 }];
            let c = filter(self, raw);
            if c == 0 {
                continue;
            }
            let flags = match c {
                SCAN_SPACE => SF_SPACE,
                SCAN_LNBRK => SF_LNBRK,
                _ => 0,
            };
            if flags != 0 && self.ws_level == WsLevel::None {
                continue;
            }
            self.push_frame(ScanFrame {
                line: tok_line,
                col: tok_col,
                byte: c,
                flags,
                raw_len: self.step_raw,
                pre_line,
                pre_col,
            });
            return c;
        }
    }

    /// Read the next token byte, skipping SPACE and LNBRK runs.
    pub fn get_char_no_space(&mut self) -> u8 {
        loop {
            let c = self.get_char();
            if c != SCAN_SPACE && c != SCAN_LNBRK {
                return c;
            }
        }
    }

    /// Unget the most recent token. Returns its frame, usable with
    /// `warning_at` and `error_at`.
    pub fn unget_char(&mut self) -> ScanFrame {
        debug_assert!(self.hist_len > 0, "unget without history");
        self.hist_pos = (self.hist_pos + HISTORY_LEN - 1) % HISTORY_LEN;
        self.hist_len -= 1;
        let frame = self.history[self.hist_pos];
        self.buf.unget_n(frame.raw_len as usize);
        self.consumed -= frame.raw_len as u64;
        self.line = frame.pre_line;
        self.col = frame.pre_col;
        frame
    }

    /// Read one token and keep it only if it equals `want`.
    pub fn try_char(&mut self, want: u8) -> bool {
        if self.get_char() == want {
            true
        } else {
            self.unget_char();
            false
        }
    }

    /// Like `try_char`, with SPACE and LNBRK skipped first.
    pub fn try_char_no_space(&mut self, want: u8) -> bool {
        if self.get_char_no_space() == want {
            true
        } else {
            self.unget_char();
            false
        }
    }

    /// Whether the read head has reached end of input.
    pub fn at_eof(&self) -> bool {
        self.buf.at_eof()
    }

    fn report(&self, severity: &str, line: u32, col: u32, msg: &str) {
        eprintln!("{}:{}:{}: {}: {}", self.buf.label(), line, col, severity, msg);
    }

    /// Print a warning at the current position. Warnings never fail the
    /// script.
    pub fn warning(&mut self, msg: &str) {
        self.warnings += 1;
        self.report("warning", self.line, self.col, msg);
    }

    /// Print a warning at a previously recorded frame.
    pub fn warning_at(&mut self, frame: ScanFrame, msg: &str) {
        self.warnings += 1;
        self.report("warning", frame.line, frame.col, msg);
    }

    /// Print an error at the current position and record that the script
    /// failed.
    pub fn error(&mut self, msg: &str) {
        self.errors += 1;
        self.report("error", self.line, self.col, msg);
    }

    /// Print an error at a previously recorded frame.
    pub fn error_at(&mut self, frame: ScanFrame, msg: &str) {
        self.errors += 1;
        self.report("error", frame.line, frame.col, msg);
    }

    /// Number of errors produced so far.
    pub fn error_count(&self) -> u32 {
        self.errors
    }

    /// Number of warnings produced so far.
    pub fn warning_count(&self) -> u32 {
        self.warnings
    }

    /// Scan an identifier (`[A-Za-z_][A-Za-z0-9_]*`) into the symbol
    /// table. Names longer than `SYMBOL_MAX` are truncated with a warning.
    pub fn get_symbol(&mut self, symtab: &mut SymTab) -> Option<crate::symtab::SymId> {
        let c = self.get_char_no_space();
        if !(c.is_ascii_alphabetic() || c == b'_') {
            self.unget_char();
            return None;
        }
        let before = self.buf.tell();
        let (rest, truncated) = self
            .buf
            .get_string(|b| b.is_ascii_alphanumeric() || b == b'_', SYMBOL_MAX - 1);
        let moved = (self.buf.tell() + BUF_LEN - before) % BUF_LEN;
        self.account(moved as u32);
        self.col += moved as u32;
        {
            let frame = self.last_frame_mut();
            frame.raw_len += moved as u32;
        }
        if truncated {
            self.warning(&format!("limiting symbol name to {SYMBOL_MAX} characters"));
        }
        let mut name = String::with_capacity(rest.len() + 1);
        name.push(c as char);
        for &b in &rest {
            name.push(b as char);
        }
        Some(symtab.intern(&name))
    }

    // Consumed bytes belong to no scan frame; the expression as a whole
    // is not ungettable, which no caller needs.
    fn scan_number_raw(&mut self, allow_sign: bool) -> Option<f64> {
        let before = self.buf.tell();
        let value = self.buf.get_double(allow_sign);
        let moved = (self.buf.tell() + BUF_LEN - before) % BUF_LEN;
        self.account(moved as u32);
        self.col += moved as u32;
        value
    }

    /// Scan a plain unsigned integer. Reports overflow.
    pub fn get_uint(&mut self) -> Option<u32> {
        let before = self.buf.tell();
        let (value, overflow) = self.buf.get_int(false)?;
        let moved = (self.buf.tell() + BUF_LEN - before) % BUF_LEN;
        self.account(moved as u32);
        self.col += moved as u32;
        if overflow || value > u32::MAX as i64 {
            self.warning("number too large, clamped");
            return Some(u32::MAX);
        }
        Some(value as u32)
    }

    /// Scan a number expression. Handles `+ - * / %` (left-associative),
    /// `^` (right-associative), parentheses, unary sign, math functions,
    /// `$name` variables, and `numconst` named values. Whitespace ends
    /// the expression outside parentheses. Non-finite results are
    /// rejected with an error.
    pub fn get_num(&mut self, symtab: &mut SymTab, numconst: Option<NumConstFn>) -> Option<f64> {
        let prev = self.set_ws_level(WsLevel::All);
        let result = self.parse_expr(symtab, numconst, 0, 0);
        self.set_ws_level(prev);
        let value = result?;
        if !value.is_finite() {
            self.error("discarding infinite number in expression");
            return None;
        }
        Some(value)
    }

    fn parse_expr(
        &mut self,
        symtab: &mut SymTab,
        numconst: Option<NumConstFn>,
        min_prec: u8,
        depth: u32,
    ) -> Option<f64> {
        let mut lhs = self.parse_atom(symtab, numconst, depth)?;
        loop {
            let c = if depth > 0 {
                self.get_char_no_space()
            } else {
                self.get_char()
            };
            let (prec, right_assoc) = match c {
                b'+' | b'-' => (1u8, false),
                b'*' | b'/' | b'%' => (2, false),
                b'^' => (3, true),
                _ => {
                    self.unget_char();
                    break;
                }
            };
            if prec < min_prec {
                self.unget_char();
                break;
            }
            let next_min = if right_assoc { prec } else { prec + 1 };
            let rhs = self.parse_expr(symtab, numconst, next_min, depth)?;
            lhs = match c {
                b'+' => lhs + rhs,
                b'-' => lhs - rhs,
                b'*' => lhs * rhs,
                b'/' => lhs / rhs,
                b'%' => lhs % rhs,
                _ => lhs.powf(rhs),
            };
            if lhs.is_nan() {
                self.error("discarding expression with NaN result");
                return None;
            }
        }
        Some(lhs)
    }

    fn parse_atom(
        &mut self,
        symtab: &mut SymTab,
        numconst: Option<NumConstFn>,
        depth: u32,
    ) -> Option<f64> {
        let c = self.get_char_no_space();
        match c {
            b'(' => {
                let value = self.parse_expr(symtab, numconst, 0, depth + 1)?;
                if !self.try_char_no_space(b')') {
                    self.error("missing ')' in expression");
                    return None;
                }
                Some(value)
            }
            b'+' => self.parse_atom(symtab, numconst, depth),
            b'-' => Some(-self.parse_atom(symtab, numconst, depth)?),
            b'$' => {
                let frame = self.pos();
                let Some(sym) = self.get_symbol(symtab) else {
                    self.error("'$' without variable name");
                    return None;
                };
                match symtab.data(sym) {
                    SymData::Num(v) => Some(v),
                    SymData::Obj(_) => {
                        let name = symtab.name(sym).to_string();
                        self.error_at(frame, &format!("variable '${name}' is not a number"));
                        None
                    }
                    SymData::None => {
                        let name = symtab.name(sym).to_string();
                        self.error_at(frame, &format!("undefined variable '${name}'"));
                        None
                    }
                }
            }
            _ if c.is_ascii_digit() || c == b'.' => {
                self.unget_char();
                match self.scan_number_raw(false) {
                    Some(v) => {
                        // The ungotten frame was replaced by the raw scan;
                        // restore bookkeeping with a synthetic frame.
                        Some(v)
                    }
                    None => {
                        self.error("expected number");
                        None
                    }
                }
            }
            _ if c.is_ascii_uppercase() => {
                // Named constant, or not part of the expression at all
                // (the callback ungets whatever it tried).
                self.unget_char();
                let numconst = numconst?;
                numconst(self, symtab)
            }
            _ if c.is_ascii_lowercase() => {
                let frame = self.pos();
                self.unget_char();
                let sym = self.get_symbol(symtab)?;
                let name = symtab.name(sym).to_string();
                self.parse_mathsym(symtab, numconst, depth, frame, &name)
            }
            _ => {
                self.unget_char();
                None
            }
        }
    }

    fn parse_mathsym(
        &mut self,
        symtab: &mut SymTab,
        numconst: Option<NumConstFn>,
        depth: u32,
        frame: ScanFrame,
        name: &str,
    ) -> Option<f64> {
        enum MathSym {
            Const(f64),
            Unary(fn(f64) -> f64),
            Rand,
            Seed,
        }
        let sym = match name {
            "pi" => MathSym::Const(PI),
            "abs" => MathSym::Unary(f64::abs),
            "cos" => MathSym::Unary(f64::cos),
            "exp" => MathSym::Unary(f64::exp),
            "log" => MathSym::Unary(f64::ln),
            "rint" => MathSym::Unary(f64::round_ties_even),
            "sin" => MathSym::Unary(f64::sin),
            "sqrt" => MathSym::Unary(f64::sqrt),
            "mf" => MathSym::Const(crate::lang::MID_FREQ),
            "rand" => MathSym::Rand,
            "seed" => MathSym::Seed,
            _ => {
                // Not a math name. Unget the symbol; the named-constant
                // callback may claim it (subnote-prefixed pitch notes
                // start lowercase), otherwise it is not part of the
                // expression.
                self.unget_char();
                if let Some(numconst) = numconst {
                    if let Some(v) = numconst(self, symtab) {
                        return Some(v);
                    }
                }
                return None;
            }
        };
        match sym {
            MathSym::Const(v) => Some(v),
            MathSym::Unary(f) => {
                if !self.try_char_no_space(b'(') {
                    self.error_at(frame, &format!("'{name}' requires an argument list"));
                    return None;
                }
                let arg = self.parse_expr(symtab, numconst, 0, depth + 1)?;
                if !self.try_char_no_space(b')') {
                    self.error("missing ')' after function argument");
                    return None;
                }
                Some(f(arg))
            }
            MathSym::Rand => {
                self.expect_empty_parens(name, frame)?;
                Some(self.rnd.f64())
            }
            MathSym::Seed => {
                if !self.try_char_no_space(b'(') {
                    self.error_at(frame, &format!("'{name}' requires an argument list"));
                    return None;
                }
                let arg = self.parse_expr(symtab, numconst, 0, depth + 1)?;
                if !self.try_char_no_space(b')') {
                    self.error("missing ')' after function argument");
                    return None;
                }
                self.rnd = Rnd::from_u64(arg.to_bits());
                Some(0.0)
            }
        }
    }

    fn expect_empty_parens(&mut self, name: &str, frame: ScanFrame) -> Option<()> {
        if !self.try_char_no_space(b'(') || !self.try_char_no_space(b')') {
            self.error_at(frame, &format!("'{name}' takes an empty argument list"));
            return None;
        }
        Some(())
    }
}
