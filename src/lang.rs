//! Script language parser.
//!
//! Parses scripts into a list of events with nested operator updates and
//! typed modulator lists, which the program build consumes. Diagnostics
//! go through the scanner and are counted; a script with errors does not
//! produce output.

use std::path::Path;

use crate::line::{
    Line, Shape, LINE_GOAL, LINE_GOAL_RATIO, LINE_SHAPE, LINE_STATE, LINE_STATE_RATIO, LINE_TIME,
};
use crate::noise::Noise;
use crate::scanner::{Scanner, WsLevel, SCAN_EOF};
use crate::symtab::{SymData, SymTab};
use crate::textbuf::TextBuf;
use crate::wave::Wave;

/// Operator time used when a script leaves one unset and no duration
/// group provides one.
pub const DEFAULT_TIME_MS: u32 = 1000;
/// Marker for an infinite operator time. Only valid on nested operators.
pub const TIME_INF: u32 = u32::MAX;

/// Mid frequency of the audible range; scales frequency-amplified phase
/// modulation depth.
pub const MID_FREQ: f64 = 632.45532;

/// What a modulator list modulates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UseType {
    /// Frequency value modulation.
    Fm,
    /// Relative-frequency value modulation.
    RateFm,
    /// Phase modulation.
    Pm,
    /// Frequency-amplified phase modulation.
    FreqPm,
    /// Amplitude value modulation.
    Am,
    /// Ring amplitude modulation.
    RingAm,
}

/// What kind of signal an object produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjKind {
    Osc,
    Noise,
}

/// Per-object constants assigned at first definition.
#[derive(Clone, Copy, Debug)]
pub struct ScriptObj {
    pub kind: ObjKind,
    /// 0 for carriers, modulator nesting level otherwise.
    pub nest_level: u8,
}

/// A typed modulator list carried by an operator update.
#[derive(Clone, Debug)]
pub struct ScriptList {
    pub use_type: UseType,
    pub ops: Vec<u32>,
}

/// One operator update. Unset fields leave previous state untouched.
#[derive(Clone, Debug, Default)]
pub struct ScriptOp {
    pub obj: u32,
    pub new_obj: bool,
    pub wave: Option<Wave>,
    pub noise: Option<Noise>,
    pub time_ms: Option<u32>,
    pub silence_ms: u32,
    pub freq: Option<Line>,
    pub freq2: Option<Line>,
    pub amp: Option<Line>,
    pub amp2: Option<Line>,
    pub pan: Option<Line>,
    pub phase: Option<f64>,
    pub mods: Vec<ScriptList>,
}

/// A compositive step forked off an event: updates applied when the
/// previous step of the same object ends.
#[derive(Clone, Debug, Default)]
pub struct ScriptStep {
    pub ops: Vec<ScriptOp>,
}

/// One script event: updates at one script time position.
#[derive(Clone, Debug, Default)]
pub struct ScriptEv {
    /// Wait from the previous event's position, in ms.
    pub wait_ms: u32,
    /// Object whose voice the event belongs to.
    pub root_obj: u32,
    pub ops: Vec<ScriptOp>,
    pub steps: Vec<ScriptStep>,
    /// A `|` boundary closes the duration group after this event.
    pub group_end: bool,
}

/// Parsed script.
#[derive(Debug, Default)]
pub struct Script {
    pub name: String,
    pub objects: Vec<ScriptObj>,
    pub events: Vec<ScriptEv>,
    pub warnings: u32,
}

#[derive(thiserror::Error, Debug)]
pub enum ScriptError {
    #[error("{name}: {count} error(s); script discarded")]
    Parse { name: String, count: u32 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Script {
    pub fn parse_file(path: &Path) -> Result<Script, ScriptError> {
        let buf = TextBuf::open_file(path)?;
        parse(Scanner::new(buf))
    }

    pub fn parse_string(label: &str, text: &str) -> Result<Script, ScriptError> {
        let buf = TextBuf::open_string(label, text);
        parse(Scanner::new(buf))
    }
}

fn parse(sc: Scanner) -> Result<Script, ScriptError> {
    let name = sc.label().to_string();
    let mut p = Parser {
        sc,
        st: SymTab::new(),
        objects: Vec::new(),
        events: Vec::new(),
        next_wait_ms: 0,
        quit: false,
    };
    p.parse_level(0);
    let count = p.sc.error_count();
    if count > 0 {
        return Err(ScriptError::Parse { name, count });
    }
    Ok(Script {
        name,
        objects: p.objects,
        events: p.events,
        warnings: p.sc.warning_count(),
    })
}

struct Parser {
    sc: Scanner,
    st: SymTab,
    objects: Vec<ScriptObj>,
    events: Vec<ScriptEv>,
    next_wait_ms: u32,
    quit: bool,
}

/// Named numeric constant context for expressions.
#[derive(Clone, Copy, PartialEq, Eq)]
enum ConstCtx {
    /// No named constants.
    Plain,
    /// Pitch notes.
    Note,
    /// Channel labels C/L/R.
    Chan,
}

impl Parser {
    fn parse_level(&mut self, nest: u32) {
        loop {
            if self.quit {
                return;
            }
            let c = self.sc.get_char_no_space();
            match c {
                SCAN_EOF => {
                    if nest > 0 {
                        self.sc.error("missing '>' before end of script");
                    }
                    return;
                }
                b'W' | b'N' => {
                    if let Some(op) = self.parse_new_object(c, 0) {
                        self.push_event(op);
                    }
                }
                c if c.is_ascii_uppercase() => {
                    if c == b'Q' {
                        self.quit = true;
                        return;
                    }
                    self.sc.error(&format!(
                        "'{}' is a reserved object type",
                        c as char
                    ));
                }
                b'\'' => self.parse_assign(),
                b'@' => self.parse_reference(),
                b'|' => match self.events.last_mut() {
                    Some(ev) => ev.group_end = true,
                    None => self.sc.warning("'|' before any sound"),
                },
                b'/' => self.parse_delay(),
                b';' => self.parse_step(),
                b'<' => self.parse_level(nest + 1),
                b'>' => {
                    if nest > 0 {
                        return;
                    }
                    self.sc.error("'>' without opening '<'");
                }
                _ => {
                    self.sc
                        .error(&format!("misplaced token '{}'", c as char));
                }
            }
        }
    }

    /// Parse an object introducer and subname into a fresh update with
    /// parameter defaults. Parameters are parsed by the caller.
    fn parse_new_object(&mut self, intro: u8, nest_level: u8) -> Option<ScriptOp> {
        let obj = self.objects.len() as u32;
        let mut op = ScriptOp {
            obj,
            new_obj: true,
            time_ms: None,
            silence_ms: 0,
            ..ScriptOp::default()
        };
        let kind = match intro {
            b'W' => {
                let Some(sym) = self.sc.get_symbol(&mut self.st) else {
                    self.sc.error("'W' without wave type");
                    return None;
                };
                let name = self.st.name(sym).to_string();
                let Some(wave) = Wave::from_name(&name) else {
                    self.sc.error(&format!("unknown wave type '{name}'"));
                    return None;
                };
                op.wave = Some(wave);
                ObjKind::Osc
            }
            _ => {
                let Some(sym) = self.sc.get_symbol(&mut self.st) else {
                    self.sc.error("'N' without noise type");
                    return None;
                };
                let name = self.st.name(sym).to_string();
                let Some(noise) = Noise::from_name(&name) else {
                    self.sc.error(&format!("unknown noise type '{name}'"));
                    return None;
                };
                op.noise = Some(noise);
                ObjKind::Noise
            }
        };
        // Parameter defaults for a fresh object.
        let mut freq = Line::with_state(if nest_level > 0 { 1.0 } else { 440.0 });
        if nest_level > 0 {
            freq.flags |= LINE_STATE_RATIO;
        }
        op.freq = Some(freq);
        op.amp = Some(Line::with_state(1.0));
        if nest_level == 0 {
            op.pan = Some(Line::with_state(0.0));
        }
        op.phase = Some(0.0);
        self.objects.push(ScriptObj { kind, nest_level });
        Some(op)
    }

    fn obj_kind(&self, obj: u32) -> ObjKind {
        self.objects[obj as usize].kind
    }

    /// Open a new event for a freshly defined root object and parse its
    /// parameters.
    fn push_event(&mut self, mut op: ScriptOp) {
        let mut ev = ScriptEv {
            wait_ms: std::mem::take(&mut self.next_wait_ms),
            root_obj: op.obj,
            ..ScriptEv::default()
        };
        let mut ops = Vec::new();
        self.parse_params(&mut ops, &mut op, 0);
        ops.push(op);
        ev.ops = ops;
        self.events.push(ev);
    }

    /// Parameter list of an operator. Nested definitions inside modulator
    /// lists are appended to `ev_ops`.
    fn parse_params(&mut self, ev_ops: &mut Vec<ScriptOp>, op: &mut ScriptOp, nest_level: u8) {
        let is_mod = nest_level > 0;
        loop {
            let c = self.sc.get_char_no_space();
            match c {
                b'a' => {
                    self.parse_line_param(
                        ev_ops,
                        op,
                        ParamKind::Amp,
                        nest_level,
                        ConstCtx::Plain,
                        false,
                    );
                }
                b'c' => {
                    if is_mod {
                        self.sc
                            .error("channel mix is only valid for carriers");
                    }
                    self.parse_line_param(
                        ev_ops,
                        op,
                        ParamKind::Pan,
                        nest_level,
                        ConstCtx::Chan,
                        false,
                    );
                }
                b'f' => {
                    self.parse_line_param(
                        ev_ops,
                        op,
                        ParamKind::Freq,
                        nest_level,
                        ConstCtx::Note,
                        false,
                    );
                }
                b'r' => {
                    if !is_mod {
                        self.sc
                            .error("relative frequency is only valid for modulators");
                    }
                    self.parse_line_param(
                        ev_ops,
                        op,
                        ParamKind::Freq,
                        nest_level,
                        ConstCtx::Plain,
                        true,
                    );
                }
                b'p' => self.parse_phase_param(ev_ops, op, nest_level),
                b't' => self.parse_time_param(op, is_mod),
                b's' => {
                    match self.get_num(ConstCtx::Plain) {
                        Some(v) if v >= 0.0 => op.silence_ms = (v * 1000.0).round() as u32,
                        Some(_) => self.sc.error("discarding negative silence time"),
                        None => self.sc.error("'s' without time value"),
                    };
                }
                b'w' => {
                    if self.obj_kind(op.obj) != ObjKind::Osc {
                        self.sc.error("'w' is only valid for wave oscillators");
                    }
                    match self.sc.get_symbol(&mut self.st) {
                        Some(sym) => {
                            let name = self.st.name(sym).to_string();
                            match Wave::from_name(&name) {
                                Some(wave) => op.wave = Some(wave),
                                None => {
                                    self.sc.error(&format!("unknown wave type '{name}'"))
                                }
                            }
                        }
                        None => self.sc.error("'w' without wave type"),
                    }
                }
                _ => {
                    self.sc.unget_char();
                    return;
                }
            }
        }
    }

    fn parse_time_param(&mut self, op: &mut ScriptOp, is_mod: bool) {
        if self.sc.try_char(b'i') {
            if !is_mod {
                // Checked again at build; report early with position.
                self.sc
                    .error("infinite time is only valid for nested operators");
            }
            op.time_ms = Some(TIME_INF);
            return;
        }
        match self.get_num(ConstCtx::Plain) {
            Some(v) if v >= 0.0 => op.time_ms = Some((v * 1000.0).round() as u32),
            Some(_) => self.sc.error("discarding negative time value"),
            None => self.sc.error("'t' without time value"),
        }
    }

    fn parse_phase_param(&mut self, ev_ops: &mut Vec<ScriptOp>, op: &mut ScriptOp, nest_level: u8) {
        loop {
            if self.sc.try_char_no_space(b'[') {
                let list = self.parse_list(ev_ops, UseType::Pm, nest_level, b']');
                op.mods.push(list);
            } else if self.sc.try_char_no_space(b'!') {
                if !self.sc.try_char_no_space(b'{') {
                    self.sc.error("'!' without '{' modulator list");
                    continue;
                }
                let list = self.parse_list(ev_ops, UseType::Pm, nest_level, b'}');
                op.mods.push(list);
            } else if self.sc.try_char_no_space(b'.') {
                if !self.sc.try_char(b'f') {
                    self.sc.error("unknown phase sub-parameter");
                    continue;
                }
                if self.sc.try_char_no_space(b'[') {
                    let list = self.parse_list(ev_ops, UseType::FreqPm, nest_level, b']');
                    op.mods.push(list);
                } else {
                    self.sc.error("'p.f' without '[' modulator list");
                }
            } else if let Some(v) = self.get_num(ConstCtx::Plain) {
                op.phase = Some(v.rem_euclid(1.0));
            } else {
                return;
            }
        }
    }

    fn parse_line_param(
        &mut self,
        ev_ops: &mut Vec<ScriptOp>,
        op: &mut ScriptOp,
        kind: ParamKind,
        nest_level: u8,
        cctx: ConstCtx,
        ratio: bool,
    ) {
        loop {
            if self.sc.try_char_no_space(b'{') {
                let line = line_of(op, kind, false);
                self.parse_ramp(line, cctx, ratio);
            } else if self.sc.try_char_no_space(b'[') {
                let list = self.parse_list(ev_ops, kind.main_use(), nest_level, b']');
                if kind == ParamKind::Pan {
                    self.sc.error("channel mix has no modulator list");
                } else {
                    op.mods.push(list);
                }
            } else if self.sc.try_char_no_space(b'!') {
                if !self.sc.try_char_no_space(b'{') {
                    self.sc.error("'!' without '{' modulator list");
                    continue;
                }
                let list = self.parse_list(ev_ops, kind.main_use(), nest_level, b'}');
                if kind == ParamKind::Pan {
                    self.sc.error("channel mix has no modulator list");
                } else {
                    op.mods.push(list);
                }
            } else if self.sc.try_char_no_space(b'.') {
                match (kind, self.sc.get_char()) {
                    (ParamKind::Freq, b'r') | (ParamKind::Amp, b'r') => {
                        self.parse_secondary(ev_ops, op, kind, nest_level, cctx, ratio);
                    }
                    _ => {
                        self.sc.error("unknown sub-parameter");
                        return;
                    }
                }
            } else if let Some(v) = self.get_num(cctx) {
                let line = line_of(op, kind, false);
                line.v0 = v;
                line.flags |= LINE_STATE;
                if ratio {
                    line.flags |= LINE_STATE_RATIO;
                } else {
                    line.flags &= !LINE_STATE_RATIO;
                }
            } else {
                return;
            }
        }
    }

    /// Secondary ramp (`f.r` FM depth, `a.r` ring-AM depth) and its lists.
    fn parse_secondary(
        &mut self,
        ev_ops: &mut Vec<ScriptOp>,
        op: &mut ScriptOp,
        kind: ParamKind,
        nest_level: u8,
        cctx: ConstCtx,
        ratio: bool,
    ) {
        loop {
            if self.sc.try_char_no_space(b'{') {
                let line = line_of(op, kind, true);
                self.parse_ramp(line, cctx, ratio);
            } else if self.sc.try_char_no_space(b'[') {
                let use_type = kind.secondary_use();
                let list = self.parse_list(ev_ops, use_type, nest_level, b']');
                op.mods.push(list);
            } else if let Some(v) = self.get_num(cctx) {
                let line = line_of(op, kind, true);
                line.v0 = v;
                line.flags |= LINE_STATE;
                if ratio {
                    line.flags |= LINE_STATE_RATIO;
                }
            } else {
                return;
            }
        }
    }

    /// Ramp block `{ v... g... t... s... }`.
    fn parse_ramp(&mut self, line: &mut Line, cctx: ConstCtx, ratio: bool) {
        // Borrowing dance: collect into a local, then merge flags.
        let mut l = *line;
        loop {
            let c = self.sc.get_char_no_space();
            match c {
                b'v' => match self.get_num(cctx) {
                    Some(v) => {
                        l.v0 = v;
                        l.flags |= LINE_STATE;
                        if ratio {
                            l.flags |= LINE_STATE_RATIO;
                        }
                    }
                    None => self.sc.error("'v' without value"),
                },
                b'g' => match self.get_num(cctx) {
                    Some(v) => {
                        l.vt = v;
                        l.flags |= LINE_GOAL;
                        if ratio {
                            l.flags |= LINE_GOAL_RATIO;
                        }
                    }
                    None => self.sc.error("'g' without value"),
                },
                b't' => match self.get_num(ConstCtx::Plain) {
                    Some(v) if v >= 0.0 => {
                        l.time_ms = (v * 1000.0).round() as u32;
                        l.flags |= LINE_TIME;
                    }
                    Some(_) => self.sc.error("discarding negative time value"),
                    None => self.sc.error("'t' without time value"),
                },
                b's' => match self.sc.get_symbol(&mut self.st) {
                    Some(sym) => {
                        let name = self.st.name(sym).to_string();
                        match Shape::from_name(&name) {
                            Some(shape) => {
                                l.shape = shape;
                                l.flags |= LINE_SHAPE;
                            }
                            None => self.sc.error(&format!("unknown line shape '{name}'")),
                        }
                    }
                    None => self.sc.error("'s' without line shape"),
                },
                b'}' => break,
                SCAN_EOF => {
                    self.sc.error("unclosed '{' ramp");
                    break;
                }
                _ => self
                    .sc
                    .error(&format!("misplaced '{}' in ramp", c as char)),
            }
        }
        *line = l;
    }

    /// Modulator list body up to `close`. Members are new object
    /// definitions; each becomes an update in the current event.
    fn parse_list(
        &mut self,
        ev_ops: &mut Vec<ScriptOp>,
        use_type: UseType,
        nest_level: u8,
        close: u8,
    ) -> ScriptList {
        let mut list = ScriptList {
            use_type,
            ops: Vec::new(),
        };
        if nest_level == u8::MAX {
            self.sc.error("modulator nesting too deep");
            return list;
        }
        loop {
            let c = self.sc.get_char_no_space();
            match c {
                b'W' | b'N' => {
                    if let Some(mut op) = self.parse_new_object(c, nest_level + 1) {
                        self.parse_params(ev_ops, &mut op, nest_level + 1);
                        list.ops.push(op.obj);
                        ev_ops.push(op);
                    }
                }
                c if c == close => break,
                SCAN_EOF => {
                    self.sc.error("unclosed modulator list");
                    break;
                }
                _ => self.sc.error(&format!(
                    "expected modulator definition, found '{}'",
                    c as char
                )),
            }
        }
        list
    }

    /// `'name`: numeric variable assignment, or object label when an
    /// object definition follows.
    fn parse_assign(&mut self) {
        let Some(sym) = self.sc.get_symbol(&mut self.st) else {
            self.sc.error("''' without name");
            return;
        };
        let c = self.sc.get_char_no_space();
        if c == b'W' || c == b'N' {
            if let Some(op) = self.parse_new_object(c, 0) {
                self.st.bind(sym, SymData::Obj(op.obj));
                self.push_event(op);
            }
            return;
        }
        self.sc.unget_char();
        match self.get_num(ConstCtx::Plain) {
            Some(v) => self.st.bind(sym, SymData::Num(v)),
            None => self.sc.error("''' assignment without value"),
        }
    }

    /// `@name`: re-open a labeled object for updates in a new event.
    fn parse_reference(&mut self) {
        let frame = self.sc.pos();
        let Some(sym) = self.sc.get_symbol(&mut self.st) else {
            self.sc.error("'@' without name");
            return;
        };
        let obj = match self.st.data(sym) {
            SymData::Obj(obj) => obj,
            SymData::Num(_) => {
                let name = self.st.name(sym).to_string();
                self.sc
                    .error_at(frame, &format!("variable '{name}' is not an object"));
                return;
            }
            SymData::None => {
                let name = self.st.name(sym).to_string();
                self.sc
                    .error_at(frame, &format!("undefined variable '{name}'"));
                return;
            }
        };
        let nest_level = self.objects[obj as usize].nest_level;
        let mut ev = ScriptEv {
            wait_ms: std::mem::take(&mut self.next_wait_ms),
            root_obj: obj,
            ..ScriptEv::default()
        };
        let mut ops = std::mem::take(&mut ev.ops);
        let mut op = ScriptOp {
            obj,
            ..ScriptOp::default()
        };
        self.parse_params(&mut ops, &mut op, nest_level);
        ops.push(op);
        ev.ops = ops;
        self.events.push(ev);
    }

    /// `/NUM` waits NUM seconds; `/t` waits the previous root's time.
    fn parse_delay(&mut self) {
        if self.sc.try_char(b't') {
            let ms = self
                .events
                .last()
                .and_then(|ev| ev.ops.last())
                .and_then(|op| op.time_ms)
                .unwrap_or(DEFAULT_TIME_MS);
            if ms == TIME_INF {
                self.sc.error("'/t' after infinite time");
                return;
            }
            self.next_wait_ms += ms;
            return;
        }
        match self.get_num(ConstCtx::Plain) {
            Some(v) if v >= 0.0 => self.next_wait_ms += (v * 1000.0).round() as u32,
            Some(_) => self.sc.error("discarding negative delay"),
            None => self.sc.error("'/' without delay time"),
        }
    }

    /// `;`: compositive step continuing the previous event's root object.
    fn parse_step(&mut self) {
        let Some(last) = self.events.last() else {
            self.sc.error("';' before any sound");
            return;
        };
        let root_obj = last.root_obj;
        let nest_level = self.objects[root_obj as usize].nest_level;
        let mut step = ScriptStep::default();
        let mut op = ScriptOp {
            obj: root_obj,
            ..ScriptOp::default()
        };
        let mut ops = std::mem::take(&mut step.ops);
        self.parse_params(&mut ops, &mut op, nest_level);
        ops.push(op);
        step.ops = ops;
        self.events.last_mut().unwrap().steps.push(step);
    }

    fn get_num(&mut self, cctx: ConstCtx) -> Option<f64> {
        let numconst = match cctx {
            ConstCtx::Plain => None,
            ConstCtx::Note => Some(numconst_note as crate::scanner::NumConstFn),
            ConstCtx::Chan => Some(numconst_chan as crate::scanner::NumConstFn),
        };
        self.sc.get_num(&mut self.st, numconst)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ParamKind {
    Amp,
    Freq,
    Pan,
}

fn line_of(op: &mut ScriptOp, kind: ParamKind, secondary: bool) -> &mut Line {
    let slot = match (kind, secondary) {
        (ParamKind::Freq, false) => &mut op.freq,
        (ParamKind::Freq, true) => &mut op.freq2,
        (ParamKind::Amp, false) => &mut op.amp,
        (ParamKind::Amp, true) => &mut op.amp2,
        (ParamKind::Pan, _) => &mut op.pan,
    };
    slot.get_or_insert_with(Line::default)
}

impl ParamKind {
    fn main_use(self) -> UseType {
        match self {
            ParamKind::Amp => UseType::Am,
            ParamKind::Freq => UseType::Fm,
            // Pan has no modulator list; the caller rejects it.
            ParamKind::Pan => UseType::Am,
        }
    }

    fn secondary_use(self) -> UseType {
        match self {
            ParamKind::Amp => UseType::RingAm,
            ParamKind::Freq => UseType::RateFm,
            ParamKind::Pan => UseType::Am,
        }
    }
}

/// Pitch notes: `[subnote][A-G][s|f][octave]`, justly intoned C scale
/// with A4 = 440 Hz. A lowercase subnote letter picks an intermediate
/// step toward the next scale degree.
fn numconst_note(sc: &mut Scanner, _st: &mut SymTab) -> Option<f64> {
    // Ratios of C D E F G A B relative to C.
    const RATIOS: [f64; 8] = [
        1.0,
        9.0 / 8.0,
        5.0 / 4.0,
        4.0 / 3.0,
        3.0 / 2.0,
        5.0 / 3.0,
        15.0 / 8.0,
        2.0,
    ];
    const C4: f64 = 440.0 * 3.0 / 5.0;
    let prev = sc.set_ws_level(WsLevel::All);
    let result = (|| {
        let mut c = sc.get_char();
        let mut consumed = 1u32;
        let mut subnote = None;
        if c.is_ascii_lowercase() {
            match note_index(c.to_ascii_uppercase()) {
                Some(idx) => {
                    subnote = Some(idx);
                    c = sc.get_char();
                    consumed += 1;
                }
                None => {
                    sc.unget_char();
                    return None;
                }
            }
        }
        let Some(note) = note_index(c) else {
            for _ in 0..consumed {
                sc.unget_char();
            }
            return None;
        };
        let mut ratio = RATIOS[note];
        let next_ratio = RATIOS[note + 1];
        if sc.try_char(b's') {
            ratio *= 25.0 / 24.0;
        } else if sc.try_char(b'f') {
            ratio /= 25.0 / 24.0;
        }
        let octave = sc.get_uint().unwrap_or(4);
        if let Some(sub) = subnote {
            // Geometric interpolation toward the next scale degree.
            let t = (sub as f64 + 1.0) / 8.0;
            ratio *= (next_ratio / ratio).powf(t);
        }
        Some(C4 * ratio * (octave as f64 - 4.0).exp2())
    })();
    sc.set_ws_level(prev);
    result
}

fn note_index(c: u8) -> Option<usize> {
    Some(match c {
        b'C' => 0,
        b'D' => 1,
        b'E' => 2,
        b'F' => 3,
        b'G' => 4,
        b'A' => 5,
        b'B' => 6,
        _ => return None,
    })
}

/// Channel labels: C center, L left, R right.
fn numconst_chan(sc: &mut Scanner, _st: &mut SymTab) -> Option<f64> {
    let c = sc.get_char();
    match c {
        b'C' => Some(0.0),
        b'L' => Some(-1.0),
        b'R' => Some(1.0),
        _ => {
            sc.unget_char();
            None
        }
    }
}
