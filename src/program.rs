//! Compiled program model and build passes.
//!
//! The build walks parsed script events, resolves operator times
//! (duration groups, compositive steps, nested inheritance), flattens
//! forked steps into the main event list by absolute time, allocates
//! voices with recycling, validates graph limits, and applies carrier
//! amplitude downscaling.

use std::collections::HashMap;

use tinyvec::TinyVec;

use crate::lang::{ObjKind, Script, ScriptOp, UseType, DEFAULT_TIME_MS, TIME_INF};
use crate::line::{Line, LINE_GOAL};
use crate::noise::Noise;
use crate::wave::Wave;

/// Dense operator id.
pub type OpId = u32;
/// Immutable modulator id list.
pub type OpIds = TinyVec<[OpId; 4]>;

pub const OPP_TIME: u32 = 1 << 0;
pub const OPP_SILENCE: u32 = 1 << 1;
pub const OPP_WAVE: u32 = 1 << 2;
pub const OPP_NOISE: u32 = 1 << 3;
pub const OPP_FREQ: u32 = 1 << 4;
pub const OPP_FREQ2: u32 = 1 << 5;
pub const OPP_AMP: u32 = 1 << 6;
pub const OPP_AMP2: u32 = 1 << 7;
pub const OPP_PAN: u32 = 1 << 8;
pub const OPP_PHASE: u32 = 1 << 9;

/// Largest voice count.
pub const VOICE_MAX: u32 = 65535;
/// Largest modulation graph depth.
pub const DEPTH_MAX: u32 = 255;

/// One compiled operator update.
#[derive(Clone, Debug, Default)]
pub struct OpData {
    pub op: OpId,
    pub params: u32,
    pub time_ms: u32,
    pub silence_ms: u32,
    pub wave: Wave,
    pub noise: Noise,
    pub freq: Line,
    pub freq2: Line,
    pub amp: Line,
    pub amp2: Line,
    pub pan: Line,
    pub phase: f64,
    pub fmods: Option<OpIds>,
    pub rfmods: Option<OpIds>,
    pub pmods: Option<OpIds>,
    pub fpmods: Option<OpIds>,
    pub amods: Option<OpIds>,
    pub ramods: Option<OpIds>,
}

/// Voice update: a refreshed carrier graph.
#[derive(Clone, Debug, Default)]
pub struct VoData {
    pub carriers: OpIds,
}

/// One compiled event.
#[derive(Clone, Debug, Default)]
pub struct Event {
    /// Wait from the previous event, in ms.
    pub wait_ms: u32,
    pub voice: u16,
    pub vo_data: Option<VoData>,
    pub ops: Vec<OpData>,
}

/// Static per-operator info.
#[derive(Clone, Copy, Debug)]
pub struct OpInfo {
    pub kind: ObjKind,
    pub nest_level: u8,
}

/// A compiled program, ready for rendering at any sample rate.
#[derive(Debug, Default)]
pub struct Program {
    pub name: String,
    pub events: Vec<Event>,
    pub ops: Vec<OpInfo>,
    pub vo_count: u16,
    pub op_nest_depth: u8,
    pub duration_ms: u64,
}

#[derive(thiserror::Error, Debug)]
pub enum BuildError {
    #[error("{0}: too many voices (max {VOICE_MAX})")]
    TooManyVoices(String),
    #[error("{0}: too many operators")]
    TooManyOperators(String),
    #[error("{0}: modulator nesting exceeds {DEPTH_MAX} levels")]
    NestTooDeep(String),
    #[error("{0}: noise type '{1}' is reserved and not implemented")]
    ReservedNoise(String, &'static str),
    #[error("{0}: infinite time on a top-level operator")]
    InfiniteTime(String),
}

// Flattened event under construction.
struct BuildEv {
    abs_ms: u64,
    root_obj: u32,
    new_root: bool,
    ops: Vec<ScriptOp>,
}

impl Program {
    pub fn build(script: &Script) -> Result<Program, BuildError> {
        let name = script.name.clone();
        if script.objects.len() as u64 > i32::MAX as u64 {
            return Err(BuildError::TooManyOperators(name));
        }

        let mut events = script.events.clone();
        resolve_times(&mut events, &script.objects, &name)?;
        let bevs = flatten(&events);

        // Voice allocation with recycling. An object's voice binding is
        // sticky; a voice is reused for a new root only when every object
        // bound to it has no further events and its sound has ended.
        let mut last_ref: HashMap<u32, usize> = HashMap::new();
        for (i, bev) in bevs.iter().enumerate() {
            for op in &bev.ops {
                last_ref.insert(op.obj, i);
            }
            last_ref.insert(bev.root_obj, i);
        }
        let mut obj_voice: HashMap<u32, u16> = HashMap::new();
        let mut voice_end: Vec<u64> = Vec::new();
        let mut voice_last_ref: Vec<usize> = Vec::new();
        let mut voice_of = Vec::with_capacity(bevs.len());
        for (i, bev) in bevs.iter().enumerate() {
            let v = match obj_voice.get(&bev.root_obj) {
                Some(&v) => v,
                None => {
                    let recycled = (0..voice_end.len()).find(|&v| {
                        voice_last_ref[v] < i && voice_end[v] <= bev.abs_ms
                    });
                    let v = match recycled {
                        Some(v) => v as u32,
                        None => {
                            let v = voice_end.len() as u32;
                            if v >= VOICE_MAX {
                                return Err(BuildError::TooManyVoices(name.clone()));
                            }
                            voice_end.push(0);
                            voice_last_ref.push(0);
                            v
                        }
                    };
                    obj_voice.insert(bev.root_obj, v as u16);
                    v as u16
                }
            };
            let dur = event_duration(bev);
            voice_end[v as usize] = voice_end[v as usize].max(bev.abs_ms + dur);
            voice_last_ref[v as usize] =
                voice_last_ref[v as usize].max(last_ref[&bev.root_obj]);
            voice_of.push(v);
        }
        let vo_count = voice_end.len() as u16;

        // Graph computation and conversion.
        let mut shadow: Vec<[OpIds; 6]> = vec![Default::default(); script.objects.len()];
        let mut depth_max = 0u32;
        let mut out_events = Vec::with_capacity(bevs.len());
        let mut prev_abs = 0u64;
        let mut duration_ms = 0u64;
        for (i, bev) in bevs.iter().enumerate() {
            let mut ev = Event {
                wait_ms: (bev.abs_ms - prev_abs) as u32,
                voice: voice_of[i],
                vo_data: None,
                ops: Vec::with_capacity(bev.ops.len()),
            };
            prev_abs = bev.abs_ms;
            let mut graph_dirty = bev.new_root;
            for sop in &bev.ops {
                if let Some(noise) = sop.noise {
                    if !noise.implemented() {
                        return Err(BuildError::ReservedNoise(name.clone(), noise.name()));
                    }
                }
                let od = convert_op(sop);
                let lists = &mut shadow[sop.obj as usize];
                for (i, slot) in [
                    &od.fmods, &od.rfmods, &od.pmods, &od.fpmods, &od.amods, &od.ramods,
                ]
                .into_iter()
                .enumerate()
                {
                    if let Some(ids) = slot {
                        lists[i] = ids.clone();
                        graph_dirty = true;
                    }
                }
                ev.ops.push(od);
            }
            if graph_dirty {
                let carriers: OpIds = [bev.root_obj].into_iter().collect();
                let depth = graph_depth(&shadow, &carriers);
                if depth > DEPTH_MAX {
                    return Err(BuildError::NestTooDeep(name.clone()));
                }
                depth_max = depth_max.max(depth);
                ev.vo_data = Some(VoData { carriers });
            }
            duration_ms = duration_ms.max(bev.abs_ms + event_duration(bev));
            out_events.push(ev);
        }

        // Scale carrier amplitudes so polyphony does not clip.
        if vo_count > 1 {
            let scale = 1.0 / vo_count as f64;
            for ev in &mut out_events {
                for od in &mut ev.ops {
                    if script.objects[od.op as usize].nest_level == 0 {
                        scale_line(&mut od.amp, scale);
                        scale_line(&mut od.amp2, scale);
                    }
                }
            }
        }

        let ops = script
            .objects
            .iter()
            .map(|o| OpInfo {
                kind: o.kind,
                nest_level: o.nest_level,
            })
            .collect();
        log::debug!(
            "built '{}': {} event(s), {} voice(s), depth {}, {} ms",
            name,
            out_events.len(),
            vo_count,
            depth_max,
            duration_ms
        );
        Ok(Program {
            name,
            events: out_events,
            ops,
            vo_count,
            op_nest_depth: depth_max as u8,
            duration_ms,
        })
    }

    /// Debug listing of events and operator updates.
    pub fn print(&self) {
        println!(
            "'{}': {} ms, {} voice(s), {} operator(s), depth {}",
            self.name,
            self.duration_ms,
            self.vo_count,
            self.ops.len(),
            self.op_nest_depth
        );
        let mut abs = 0u64;
        for (i, ev) in self.events.iter().enumerate() {
            abs += ev.wait_ms as u64;
            println!("ev {} (@ {} ms): vo {}", i, abs, ev.voice);
            for od in &ev.ops {
                let mut fields = String::new();
                if od.params & OPP_TIME != 0 {
                    if od.time_ms == TIME_INF {
                        fields.push_str(" t=inf");
                    } else {
                        fields.push_str(&format!(" t={}ms", od.time_ms));
                    }
                }
                if od.params & OPP_FREQ != 0 {
                    fields.push_str(&format!(" f={}", line_str(&od.freq)));
                }
                if od.params & OPP_AMP != 0 {
                    fields.push_str(&format!(" a={}", line_str(&od.amp)));
                }
                if od.params & OPP_PAN != 0 {
                    fields.push_str(&format!(" c={}", line_str(&od.pan)));
                }
                if od.params & OPP_WAVE != 0 {
                    fields.push_str(&format!(" w={}", od.wave.name()));
                }
                for (label, ids) in [
                    ("f", &od.fmods),
                    ("f.r", &od.rfmods),
                    ("p", &od.pmods),
                    ("p.f", &od.fpmods),
                    ("a", &od.amods),
                    ("a.r", &od.ramods),
                ] {
                    if let Some(ids) = ids {
                        let ids: Vec<String> =
                            ids.iter().map(|id| id.to_string()).collect();
                        fields.push_str(&format!(" {}[{}]", label, ids.join(" ")));
                    }
                }
                println!("  op {}{}", od.op, fields);
            }
        }
    }
}

fn line_str(line: &Line) -> String {
    if line.is_set(LINE_GOAL) {
        format!("{} -> {}({})", line.v0, line.vt, line.shape.name())
    } else {
        format!("{}", line.v0)
    }
}

fn scale_line(line: &mut Line, scale: f64) {
    line.v0 *= scale;
    line.vt *= scale;
}

// Resolve operator times in place: duration groups for top-level events,
// step chains, then nested inheritance.
fn resolve_times(
    events: &mut [crate::lang::ScriptEv],
    objects: &[crate::lang::ScriptObj],
    name: &str,
) -> Result<(), BuildError> {
    // Duration groups: contiguous top-level runs resolve jointly to the
    // longest set time.
    let mut start = 0;
    while start < events.len() {
        let mut end = start;
        while end < events.len() && !events[end].group_end {
            end += 1;
        }
        let end = (end + 1).min(events.len());
        let mut gmax: Option<u32> = None;
        for ev in &events[start..end] {
            if let Some(t) = root_update(ev).and_then(|op| op.time_ms) {
                if t != TIME_INF {
                    gmax = Some(gmax.map_or(t, |m| m.max(t)));
                }
            }
        }
        let fallback = gmax.unwrap_or(DEFAULT_TIME_MS);
        for ev in &mut events[start..end] {
            let root_obj = ev.root_obj;
            if let Some(op) = ev
                .ops
                .iter_mut()
                .rev()
                .find(|op| op.obj == root_obj)
            {
                if op.new_obj && op.time_ms.is_none() {
                    op.time_ms = Some(fallback);
                }
            }
        }
        start = end;
    }

    for ev in events.iter_mut() {
        // Step chain: unset step times inherit the previous step.
        let mut prev = root_update(ev)
            .and_then(|op| op.time_ms)
            .unwrap_or(DEFAULT_TIME_MS);
        let root_obj = ev.root_obj;
        for step in &mut ev.steps {
            if let Some(op) = step
                .ops
                .iter_mut()
                .rev()
                .find(|op| op.obj == root_obj)
            {
                if op.time_ms.is_none() {
                    op.time_ms = Some(prev);
                }
                prev = op.time_ms.unwrap();
            }
        }
        // Nested modulators inherit their parent's time. Parents appear
        // at lower nest levels; resolve level by level.
        resolve_nested(&mut ev.ops, objects);
        for step in &mut ev.steps {
            resolve_nested(&mut step.ops, objects);
        }
    }

    // Infinite time is only meaningful on nested operators.
    for ev in events.iter() {
        for op in ev.ops.iter().chain(ev.steps.iter().flat_map(|s| s.ops.iter())) {
            if op.time_ms == Some(TIME_INF) && objects[op.obj as usize].nest_level == 0 {
                return Err(BuildError::InfiniteTime(name.to_string()));
            }
        }
    }
    Ok(())
}

fn resolve_nested(ops: &mut [ScriptOp], objects: &[crate::lang::ScriptObj]) {
    // Known time per object, extended as levels resolve downward.
    let mut times: HashMap<u32, u32> = HashMap::new();
    for op in ops.iter() {
        if let Some(t) = op.time_ms {
            times.insert(op.obj, t);
        }
    }
    for level in 0..=u8::MAX as u16 {
        let mut assigns: Vec<(u32, u32)> = Vec::new();
        for op in ops.iter() {
            if objects[op.obj as usize].nest_level as u16 != level {
                continue;
            }
            let parent_time = times.get(&op.obj).copied().unwrap_or(DEFAULT_TIME_MS);
            for list in &op.mods {
                for &child in &list.ops {
                    assigns.push((child, parent_time));
                }
            }
        }
        if assigns.is_empty() {
            continue;
        }
        for (child, parent_time) in assigns {
            for op in ops.iter_mut() {
                if op.obj == child && op.new_obj && op.time_ms.is_none() {
                    op.time_ms = Some(parent_time);
                }
            }
            times.entry(child).or_insert(parent_time);
        }
    }
}

fn root_update(ev: &crate::lang::ScriptEv) -> Option<&ScriptOp> {
    ev.ops.iter().rev().find(|op| op.obj == ev.root_obj)
}

fn op_duration(op: &ScriptOp) -> u64 {
    let t = match op.time_ms {
        Some(TIME_INF) | None => 0,
        Some(t) => t,
    };
    op.silence_ms as u64 + t as u64
}

fn event_duration(bev: &BuildEv) -> u64 {
    bev.ops
        .iter()
        .filter(|op| op.obj == bev.root_obj)
        .map(op_duration)
        .sum()
}

// Flatten events and their forked steps into one list ordered by
// absolute time, ties keeping source order. `|` boundaries sequence the
// following event after the longest sound of the closed group.
fn flatten(events: &[crate::lang::ScriptEv]) -> Vec<BuildEv> {
    let mut bevs: Vec<(u64, usize, BuildEv)> = Vec::new();
    let mut seq = 0usize;
    let mut abs = 0u64;
    let mut floor: Option<u64> = None;
    let mut group_end_max = 0u64;
    for ev in events {
        let start = match floor.take() {
            Some(f) => f + ev.wait_ms as u64,
            None => abs + ev.wait_ms as u64,
        };
        abs = start;
        let root = root_update(ev);
        let root_dur = root.map(op_duration).unwrap_or(0);
        bevs.push((
            start,
            seq,
            BuildEv {
                abs_ms: start,
                root_obj: ev.root_obj,
                new_root: root.map(|op| op.new_obj).unwrap_or(false),
                ops: ev.ops.clone(),
            },
        ));
        seq += 1;
        let mut step_abs = start + root_dur;
        let mut total_end = start + root_dur;
        for step in &ev.steps {
            bevs.push((
                step_abs,
                seq,
                BuildEv {
                    abs_ms: step_abs,
                    root_obj: ev.root_obj,
                    new_root: false,
                    ops: step.ops.clone(),
                },
            ));
            seq += 1;
            let dur: u64 = step
                .ops
                .iter()
                .filter(|op| op.obj == ev.root_obj)
                .map(op_duration)
                .sum();
            step_abs += dur;
            total_end = step_abs;
        }
        group_end_max = group_end_max.max(total_end);
        if ev.group_end {
            floor = Some(group_end_max);
            group_end_max = 0;
        }
    }
    bevs.sort_by_key(|(abs, seq, _)| (*abs, *seq));
    bevs.into_iter()
        .map(|(abs, _, mut bev)| {
            bev.abs_ms = abs;
            bev
        })
        .collect()
}

fn convert_op(sop: &ScriptOp) -> OpData {
    let mut od = OpData {
        op: sop.obj,
        ..OpData::default()
    };
    if let Some(t) = sop.time_ms {
        od.params |= OPP_TIME;
        od.time_ms = t;
    }
    if sop.silence_ms > 0 {
        od.params |= OPP_SILENCE;
        od.silence_ms = sop.silence_ms;
    }
    if let Some(w) = sop.wave {
        od.params |= OPP_WAVE;
        od.wave = w;
    }
    if let Some(n) = sop.noise {
        od.params |= OPP_NOISE;
        od.noise = n;
    }
    if let Some(l) = sop.freq {
        od.params |= OPP_FREQ;
        od.freq = l;
    }
    if let Some(l) = sop.freq2 {
        od.params |= OPP_FREQ2;
        od.freq2 = l;
    }
    if let Some(l) = sop.amp {
        od.params |= OPP_AMP;
        od.amp = l;
    }
    if let Some(l) = sop.amp2 {
        od.params |= OPP_AMP2;
        od.amp2 = l;
    }
    if let Some(l) = sop.pan {
        od.params |= OPP_PAN;
        od.pan = l;
    }
    if let Some(p) = sop.phase {
        od.params |= OPP_PHASE;
        od.phase = p;
    }
    for list in &sop.mods {
        let ids: OpIds = list.ops.iter().copied().collect();
        match list.use_type {
            UseType::Fm => od.fmods = Some(ids),
            UseType::RateFm => od.rfmods = Some(ids),
            UseType::Pm => od.pmods = Some(ids),
            UseType::FreqPm => od.fpmods = Some(ids),
            UseType::Am => od.amods = Some(ids),
            UseType::RingAm => od.ramods = Some(ids),
        }
    }
    od
}

// Depth of the modulation graph from `carriers` over the shadow lists.
// Lists only reference newly defined operators, so the graph is acyclic.
fn graph_depth(shadow: &[[OpIds; 6]], carriers: &OpIds) -> u32 {
    fn visit(shadow: &[[OpIds; 6]], op: OpId, level: u32, max: &mut u32) {
        *max = (*max).max(level);
        if level > DEPTH_MAX {
            return;
        }
        for list in &shadow[op as usize] {
            for &child in list.iter() {
                visit(shadow, child, level + 1, max);
            }
        }
    }
    let mut max = 0;
    for &c in carriers.iter() {
        visit(shadow, c, 0, &mut max);
    }
    max
}
