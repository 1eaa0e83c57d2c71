//! Renderer: event scheduler, modulation graph evaluator, output mixer.
//!
//! The renderer is block-oriented and single-threaded. `render` advances
//! the compiled event list against the sample clock, applying parameter
//! updates between blocks, and evaluates each active voice's modulation
//! graph recursively over scratch buffers sized by graph depth. Voice
//! blocks are panned and summed with i32 intermediates, saturated to
//! i16 frames.

use crate::lang::{ObjKind, MID_FREQ, TIME_INF};
use crate::line::{Line, LINE_GOAL_RATIO, LINE_STATE_RATIO};
use crate::math::{ms_to_samples, saturate_i16};
use crate::noise::NoiseGen;
use crate::osc::Osc;
use crate::program::{
    OpIds, Program, OPP_AMP, OPP_AMP2, OPP_FREQ, OPP_FREQ2, OPP_NOISE, OPP_PAN, OPP_PHASE,
    OPP_SILENCE, OPP_TIME, OPP_WAVE,
};
use crate::wave::Wave;

/// Samples per render block.
pub const BLOCK: usize = 256;

/// Scale of audio-path samples: int16 full scale.
const AMP_SCALE: f32 = 32767.0;

type Buf = [f32; BLOCK];

#[derive(Clone, Debug)]
struct OperatorNode {
    kind: ObjKind,
    carrier: bool,
    wave: Wave,
    osc: Osc,
    noise: NoiseGen,
    time: u32,
    silence: u32,
    inf_time: bool,
    freq: Line,
    freq2: Line,
    amp: Line,
    amp2: Line,
    pan: Line,
    freq2_touched: bool,
    amp2_touched: bool,
    fmods: OpIds,
    rfmods: OpIds,
    pmods: OpIds,
    fpmods: OpIds,
    amods: OpIds,
    ramods: OpIds,
}

#[derive(Clone, Debug, Default)]
struct VoiceNode {
    duration: u32,
    active: bool,
    carriers: OpIds,
}

// Event with its wait scaled to samples.
#[derive(Clone, Debug)]
struct REvent {
    wait: u32,
    voice: u16,
    carriers: Option<OpIds>,
    ops: Vec<crate::program::OpData>,
}

/// Block renderer for one compiled program at a fixed sample rate.
pub struct Renderer {
    srate: u32,
    mono: bool,
    events: Vec<REvent>,
    event_i: usize,
    event_wait: u32,
    delay_offs: u32,
    voices: Vec<VoiceNode>,
    ops: Vec<OperatorNode>,
    bufs: Vec<Buf>,
    pan_buf: Buf,
    mix: [[i32; BLOCK]; 2],
    samples_done: u64,
    // Nominal program end; cycle-trimmed tails pad out to it with
    // silence so the rendered length matches the schedule.
    end_at: u64,
}

impl Renderer {
    pub fn new(prog: &Program, srate: u32, mono: bool) -> Self {
        let ops = prog
            .ops
            .iter()
            .enumerate()
            .map(|(i, info)| OperatorNode {
                kind: info.kind,
                carrier: info.nest_level == 0,
                wave: Wave::Sin,
                osc: Osc::new(srate),
                noise: NoiseGen::new(crate::math::hash32(i as u32)),
                time: 0,
                silence: 0,
                inf_time: false,
                freq: Line::default(),
                freq2: Line::default(),
                amp: Line::default(),
                amp2: Line::default(),
                pan: Line::default(),
                freq2_touched: false,
                amp2_touched: false,
                fmods: OpIds::default(),
                rfmods: OpIds::default(),
                pmods: OpIds::default(),
                fpmods: OpIds::default(),
                amods: OpIds::default(),
                ramods: OpIds::default(),
            })
            .collect();
        let events: Vec<REvent> = prog
            .events
            .iter()
            .map(|ev| REvent {
                wait: ms_to_samples(ev.wait_ms, srate),
                voice: ev.voice,
                carriers: ev.vo_data.as_ref().map(|vd| vd.carriers.clone()),
                ops: ev.ops.clone(),
            })
            .collect();
        let event_wait = events.first().map_or(0, |ev| ev.wait);
        let buf_count = 4 * (prog.op_nest_depth as usize + 1) + 4;
        Renderer {
            srate,
            mono,
            events,
            event_i: 0,
            event_wait,
            delay_offs: 0,
            voices: vec![VoiceNode::default(); prog.vo_count as usize],
            ops,
            bufs: vec![[0.0; BLOCK]; buf_count],
            pan_buf: [0.0; BLOCK],
            mix: [[0; BLOCK]; 2],
            samples_done: 0,
            end_at: prog.duration_ms * srate as u64 / 1000,
        }
    }

    /// Output channel count (2 for stereo, 1 for mono).
    pub fn channels(&self) -> usize {
        if self.mono {
            1
        } else {
            2
        }
    }

    fn any_voice_active(&self) -> bool {
        self.voices.iter().any(|v| v.active)
    }

    // Apply events[event_i] and schedule the next wait. Updates to an
    // operator land before any sample of the block they begin.
    fn apply_next_event(&mut self) {
        let ev = &self.events[self.event_i];
        let srate = self.srate;
        for od in &ev.ops {
            let op = &mut self.ops[od.op as usize];
            if od.params & OPP_WAVE != 0 {
                op.wave = od.wave;
            }
            if od.params & OPP_NOISE != 0 {
                // Only white noise survives the build; the seed stays.
            }
            if od.params & OPP_SILENCE != 0 {
                op.silence = ms_to_samples(od.silence_ms, srate);
            }
            if od.params & OPP_TIME != 0 {
                if od.time_ms == TIME_INF {
                    op.inf_time = true;
                    op.time = u32::MAX;
                } else {
                    op.inf_time = false;
                    op.time = ms_to_samples(od.time_ms, srate);
                }
            }
            if od.params & OPP_FREQ != 0 {
                op.freq.merge(&od.freq, srate);
                if !op.freq2_touched {
                    op.freq2.merge(&od.freq, srate);
                }
            }
            if od.params & OPP_FREQ2 != 0 {
                op.freq2_touched = true;
                op.freq2.merge(&od.freq2, srate);
            }
            if od.params & OPP_AMP != 0 {
                op.amp.merge(&od.amp, srate);
                if !op.amp2_touched {
                    op.amp2.merge(&od.amp, srate);
                }
            }
            if od.params & OPP_AMP2 != 0 {
                op.amp2_touched = true;
                op.amp2.merge(&od.amp2, srate);
            }
            if od.params & OPP_PAN != 0 {
                op.pan.merge(&od.pan, srate);
            }
            if od.params & OPP_PHASE != 0 {
                op.osc.set_phase_frac(od.phase);
            }
            if let Some(ids) = &od.fmods {
                op.fmods = ids.clone();
            }
            if let Some(ids) = &od.rfmods {
                op.rfmods = ids.clone();
            }
            if let Some(ids) = &od.pmods {
                op.pmods = ids.clone();
            }
            if let Some(ids) = &od.fpmods {
                op.fpmods = ids.clone();
            }
            if let Some(ids) = &od.amods {
                op.amods = ids.clone();
            }
            if let Some(ids) = &od.ramods {
                op.ramods = ids.clone();
            }
            // Cycle-end trim: end carrier oscillators at a whole cycle,
            // suppressing the edge click, and let the next gap absorb
            // the trimmed samples.
            if od.params & OPP_TIME != 0
                && op.carrier
                && op.kind == ObjKind::Osc
                && !op.inf_time
                && op.time > 0
            {
                let offs = op.osc.cycle_offs(op.freq.v0, op.time);
                op.time -= offs;
                self.delay_offs = if self.delay_offs == 0 {
                    offs
                } else {
                    self.delay_offs.min(offs)
                };
            }
        }
        if let Some(carriers) = &ev.carriers {
            self.voices[ev.voice as usize].carriers = carriers.clone();
        }
        let voice = ev.voice as usize;
        let carriers = self.voices[voice].carriers.clone();
        let mut duration = 0u32;
        for &c in carriers.iter() {
            let op = &self.ops[c as usize];
            if !op.inf_time {
                duration = duration.max(op.silence.saturating_add(op.time));
            }
        }
        let vn = &mut self.voices[voice];
        vn.duration = duration;
        vn.active = duration > 0;
        self.event_i += 1;
        if self.event_i < self.events.len() {
            let wait = self.events[self.event_i].wait;
            if wait > 0 {
                // The next gap absorbs the trimmed samples so the next
                // sound begins where the trimmed one ends.
                self.event_wait = wait.saturating_sub(std::mem::take(&mut self.delay_offs));
            } else {
                self.event_wait = 0;
            }
        }
    }

    fn run_block(&mut self, n: usize) {
        self.mix[0][..n].fill(0);
        self.mix[1][..n].fill(0);
        for v in 0..self.voices.len() {
            if !self.voices[v].active {
                continue;
            }
            let len = n.min(self.voices[v].duration as usize);
            if len == 0 {
                self.voices[v].active = false;
                continue;
            }
            let carriers = self.voices[v].carriers.clone();
            for &c in carriers.iter() {
                run_op(&mut self.ops, &mut self.bufs, len, c as usize, None, false, false);
                let pan = &mut self.ops[c as usize].pan;
                pan.run(&mut self.pan_buf[..len], None);
                // Gains are normalized so a centered voice reaches full
                // scale in both channels; the mono downmix halves their
                // sum back to full scale.
                for i in 0..len {
                    let s = self.bufs[0][i];
                    let pan = self.pan_buf[i];
                    self.mix[0][i] += (s * (1.0 - pan)).round_ties_even() as i32;
                    self.mix[1][i] += (s * (1.0 + pan)).round_ties_even() as i32;
                }
            }
            let vn = &mut self.voices[v];
            vn.duration -= len as u32;
            if vn.duration == 0 {
                vn.active = false;
            }
        }
    }

    /// Render up to `out.len() / channels` frames of interleaved i16.
    /// Returns frames produced and whether the program has finished.
    pub fn render(&mut self, out: &mut [i16]) -> (usize, bool) {
        let channels = self.channels();
        let max_frames = out.len() / channels;
        let mut produced = 0usize;
        while produced < max_frames {
            while self.event_i < self.events.len() && self.event_wait == 0 {
                self.apply_next_event();
            }
            let idle = self.event_i >= self.events.len() && !self.any_voice_active();
            if idle && self.samples_done >= self.end_at {
                return (produced, true);
            }
            let mut n = (max_frames - produced).min(BLOCK);
            if self.event_i < self.events.len() {
                n = n.min(self.event_wait as usize);
            } else if idle {
                n = n.min((self.end_at - self.samples_done) as usize);
            }
            self.run_block(n);
            if self.mono {
                for i in 0..n {
                    let m = (self.mix[0][i] + self.mix[1][i]) / 2;
                    out[produced + i] = saturate_i16(m);
                }
            } else {
                for i in 0..n {
                    out[(produced + i) * 2] = saturate_i16(self.mix[0][i]);
                    out[(produced + i) * 2 + 1] = saturate_i16(self.mix[1][i]);
                }
            }
            produced += n;
            self.samples_done += n as u64;
            if self.event_i < self.events.len() {
                self.event_wait -= n as u32;
            }
        }
        let done = self.event_i >= self.events.len()
            && !self.any_voice_active()
            && self.samples_done >= self.end_at;
        (produced, done)
    }
}

#[inline]
fn is_ratio(line: &Line) -> bool {
    line.flags & (LINE_STATE_RATIO | LINE_GOAL_RATIO) != 0
}

// Run the modulator list `ids`, combining members into the list output
// buffer: audio members add, envelope members multiply.
fn run_list(
    ops: &mut [OperatorNode],
    bufs: &mut [Buf],
    len: usize,
    ids: &OpIds,
    parent_freq: Option<&[f32]>,
    wave_env: bool,
    mut acc: bool,
) -> bool {
    for &id in ids.iter() {
        run_op(ops, bufs, len, id as usize, parent_freq, wave_env, acc);
        acc = true;
    }
    acc
}

// Evaluate one operator for `len` samples of the current block.
//
// Audio mode produces an int16-scaled signal in the level's output
// buffer; envelope mode produces values in 0...1. With `acc`, audio
// accumulates and envelopes multiply into an already-filled buffer.
fn run_op(
    ops: &mut [OperatorNode],
    bufs: &mut [Buf],
    len: usize,
    op_i: usize,
    parent_freq: Option<&[f32]>,
    wave_env: bool,
    acc: bool,
) {
    let (cur, rest) = bufs.split_at_mut(4);
    let [out, freqb, ampb, tmpb] = cur else {
        unreachable!("scratch pool under-allocated");
    };
    if !acc {
        out[..len].fill(0.0);
    }
    // Silence prelude and time bookkeeping.
    let (skip, used) = {
        let op = &mut ops[op_i];
        let skip = (op.silence as usize).min(len);
        op.silence -= skip as u32;
        let avail = len - skip;
        let used = if op.inf_time {
            avail
        } else {
            (op.time as usize).min(avail)
        };
        if !op.inf_time {
            op.time -= used as u32;
        }
        (skip, used)
    };
    if used == 0 {
        return;
    }
    let span = skip..skip + used;

    // Frequency, scaled by the parent's when marked a ratio.
    {
        let op = &mut ops[op_i];
        let mul = if is_ratio(&op.freq) {
            parent_freq.map(|f| &f[span.clone()])
        } else {
            None
        };
        op.freq.run(&mut freqb[span.clone()], mul);
    }

    // Frequency modulation: envelopes sweep between the base and the
    // dynamic frequency.
    let fmods = ops[op_i].fmods.clone();
    let rfmods = ops[op_i].rfmods.clone();
    if !fmods.is_empty() || !rfmods.is_empty() {
        {
            let fslice = &freqb[span.clone()];
            let filled = run_list(ops, rest, used, &fmods, Some(fslice), true, false);
            run_list(ops, rest, used, &rfmods, Some(fslice), true, filled);
        }
        {
            let op = &mut ops[op_i];
            let mul = if is_ratio(&op.freq2) {
                parent_freq.map(|f| &f[span.clone()])
            } else {
                None
            };
            op.freq2.run(&mut tmpb[span.clone()], mul);
        }
        for i in 0..used {
            let j = skip + i;
            freqb[j] += (tmpb[j] - freqb[j]) * rest[0][i];
        }
    }

    // Amplitude, with value-range and ring modulation envelopes.
    {
        let op = &mut ops[op_i];
        op.amp.run(&mut ampb[span.clone()], None);
    }
    let amods = ops[op_i].amods.clone();
    let ramods = ops[op_i].ramods.clone();
    if !amods.is_empty() || !ramods.is_empty() {
        {
            let fslice = &freqb[span.clone()];
            let filled = run_list(ops, rest, used, &amods, Some(fslice), true, false);
            run_list(ops, rest, used, &ramods, Some(fslice), true, filled);
        }
        {
            let op = &mut ops[op_i];
            op.amp2.run(&mut tmpb[span.clone()], None);
        }
        for i in 0..used {
            let j = skip + i;
            ampb[j] += (tmpb[j] - ampb[j]) * rest[0][i];
        }
    }

    // Phase modulation: plain offsets plus frequency-amplified offsets.
    let pmods = ops[op_i].pmods.clone();
    let fpmods = ops[op_i].fpmods.clone();
    let mut pm = false;
    if !pmods.is_empty() {
        let fslice = &freqb[span.clone()];
        run_list(ops, rest, used, &pmods, Some(fslice), false, false);
        tmpb[span.clone()].copy_from_slice(&rest[0][..used]);
        pm = true;
    }
    if !fpmods.is_empty() {
        let fslice = &freqb[span.clone()];
        run_list(ops, rest, used, &fpmods, Some(fslice), false, false);
        if !pm {
            tmpb[span.clone()].fill(0.0);
            pm = true;
        }
        for i in 0..used {
            let j = skip + i;
            tmpb[j] += rest[0][i] * (freqb[j] / MID_FREQ as f32);
        }
    }

    // Sample generation.
    let op = &mut ops[op_i];
    match op.kind {
        ObjKind::Osc => {
            let table = op.wave.table();
            for j in span {
                let inc = op.osc.phase_inc(freqb[j] as f64);
                let offs = if pm { tmpb[j] as i32 } else { 0 };
                let s = op.osc.step(table, inc, offs);
                mix_sample(out, j, s, ampb[j], wave_env, acc);
            }
        }
        ObjKind::Noise => {
            for j in span {
                let s = op.noise.next();
                mix_sample(out, j, s, ampb[j], wave_env, acc);
            }
        }
    }
}

#[inline]
fn mix_sample(out: &mut Buf, j: usize, s: f32, amp: f32, wave_env: bool, acc: bool) {
    if wave_env {
        let v = (s + 1.0) * 0.5 * amp;
        if acc {
            out[j] *= v;
        } else {
            out[j] = v;
        }
    } else {
        let v = (s * amp * AMP_SCALE).round_ties_even();
        if acc {
            out[j] += v;
        } else {
            out[j] = v;
        }
    }
}
