//! End-to-end program build and render scenarios.

use sonogen::lang::Script;
use sonogen::program::Program;
use sonogen::render::Renderer;

const SR: u32 = 48000;

fn program(src: &str) -> Program {
    let script = Script::parse_string("<test>", src).expect("parse");
    Program::build(&script).expect("build")
}

fn render_mono(prog: &Program, srate: u32) -> Vec<i16> {
    let mut renderer = Renderer::new(prog, srate, true);
    let mut out = vec![0i16; 1024];
    let mut all = Vec::new();
    loop {
        let (frames, done) = renderer.render(&mut out);
        all.extend_from_slice(&out[..frames]);
        if done {
            break;
        }
        assert!(frames > 0, "renderer stalled");
    }
    all
}

fn rms(buf: &[i16]) -> f64 {
    let sum: f64 = buf.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / buf.len() as f64).sqrt()
}

fn sign_changes(buf: &[i16]) -> usize {
    buf.windows(2)
        .filter(|w| (w[0] >= 0) != (w[1] >= 0))
        .count()
}

#[test]
fn empty_script_renders_nothing() {
    let prog = program("");
    assert!(prog.events.is_empty());
    let mut renderer = Renderer::new(&prog, SR, true);
    let mut out = vec![0i16; 64];
    let (frames, done) = renderer.render(&mut out);
    assert_eq!(frames, 0);
    assert!(done);
}

#[test]
fn sine_second_has_expected_length_and_level() {
    let prog = program("Wsin f440 t1 a0.5");
    let out = render_mono(&prog, SR);
    assert_eq!(out.len(), SR as usize);
    let expect = 0.5 / std::f64::consts::SQRT_2 * 32767.0;
    let got = rms(&out);
    assert!(
        (got - expect).abs() < expect * 0.01,
        "rms {got} vs {expect}"
    );
    // Around 440 Hz there are two sign changes per cycle.
    let crossings = sign_changes(&out);
    assert!(
        (860..=900).contains(&crossings),
        "crossings {crossings}"
    );
}

#[test]
fn phase_modulation_adds_sidebands() {
    let prog = program("Wsin f440 t1 a1 p[Wsin f220 t1 a0.1]");
    assert_eq!(prog.vo_count, 1);
    assert_eq!(prog.ops.len(), 2);
    let out = render_mono(&prog, SR);
    assert_eq!(out.len(), SR as usize);
    let plain = render_mono(&program("Wsin f440 t1 a1"), SR);
    // Modulated output diverges from the pure carrier.
    let diff = out
        .iter()
        .zip(plain.iter())
        .filter(|(a, b)| a != b)
        .count();
    assert!(diff > SR as usize / 10, "only {diff} samples differ");
    assert!(rms(&out) > 1000.0);
}

#[test]
fn duration_group_sequences_carriers() {
    let prog = program("Wsin f440 t0.5 | Wsin f550 t0.5");
    assert_eq!(prog.duration_ms, 1000);
    let out = render_mono(&prog, SR);
    assert_eq!(out.len(), SR as usize);
    let half = SR as usize / 2;
    // Two sign changes per cycle: 440 Hz then 550 Hz.
    let first = sign_changes(&out[..half]);
    let second = sign_changes(&out[half..]);
    assert!((430..=452).contains(&first), "first half {first}");
    assert!((540..=562).contains(&second), "second half {second}");
}

#[test]
fn compositive_step_extends_one_operator() {
    let prog = program("Wsin f440 t1 ; f880");
    assert_eq!(prog.events.len(), 2);
    assert_eq!(prog.ops.len(), 1);
    assert_eq!(prog.vo_count, 1);
    // The step inherits the parent's time.
    assert_eq!(prog.duration_ms, 2000);
    let out = render_mono(&prog, SR);
    assert_eq!(out.len(), 2 * SR as usize);
    let first = sign_changes(&out[..SR as usize]);
    let second = sign_changes(&out[SR as usize..]);
    assert!((860..=900).contains(&first), "first second {first}");
    assert!((1740..=1790).contains(&second), "second second {second}");
}

#[test]
fn negative_time_fails_parse() {
    assert!(Script::parse_string("<test>", "Wsin f440 t-1").is_err());
}

#[test]
fn rendering_is_deterministic() {
    let src = "Wsin f440 t0.25 a0.6 p[Wsin f110 t0.25 a0.3] | Nwh t0.1 a0.2";
    let a = render_mono(&program(src), SR);
    let b = render_mono(&program(src), SR);
    assert_eq!(a, b);
}

#[test]
fn simultaneous_events_apply_in_source_order() {
    let prog = program("Wsin f440 t1 Wsin f550 t1");
    assert_eq!(prog.events.len(), 2);
    assert_eq!(prog.events[0].voice, 0);
    assert_eq!(prog.events[1].voice, 1);
    assert_eq!(prog.events[1].wait_ms, 0);
}

#[test]
fn voices_recycle_after_their_duration() {
    // Overlapping sounds need two voices.
    let prog = program("Wsin f440 t0.5 Wsin f550 t0.5");
    assert_eq!(prog.vo_count, 2);
    // A carrier starting at the previous one's end reuses its voice.
    let prog = program("Wsin f440 t0.5 | Wsin f550 t0.5");
    assert_eq!(prog.vo_count, 1);
}

#[test]
fn polyphony_scales_carrier_amplitude() {
    let prog = program("Wsin f440 t1 a1 Wsin f660 t1 a1");
    assert_eq!(prog.vo_count, 2);
    for ev in &prog.events {
        for od in &ev.ops {
            assert_eq!(od.amp.v0, 0.5);
        }
    }
}

#[test]
fn reserved_noise_fails_build() {
    let script = Script::parse_string("<test>", "Npk t1").expect("parse");
    assert!(Program::build(&script).is_err());
}

#[test]
fn infinite_time_only_for_nested() {
    assert!(Script::parse_string("<test>", "Wsin f440 ti").is_err());
    let script =
        Script::parse_string("<test>", "Wsin f440 t1 p[Wsin f110 ti a0.1]").expect("parse");
    assert!(Program::build(&script).is_ok());
}

#[test]
fn modulated_frequency_ratio_follows_carrier() {
    // A 2:1 ratio modulator on a 200 Hz carrier builds and renders.
    let src = "Wsin f200 t0.25 a0.8 p[Wsin r2 t0.25 a0.2]";
    let prog = program(src);
    assert_eq!(prog.ops.len(), 2);
    let out = render_mono(&prog, SR);
    assert!(rms(&out) > 1000.0);
}

#[test]
fn labels_and_references_update_operators() {
    let src = "'osc Wsin f440 t1 a0.5 | @osc f880 t0.5";
    let prog = program(src);
    assert_eq!(prog.ops.len(), 1);
    assert_eq!(prog.events.len(), 2);
    assert_eq!(prog.duration_ms, 1500);
}

#[test]
fn variables_feed_expressions() {
    let src = "'base 220 Wsin f$base*2 t0.5";
    let prog = program(src);
    let out = render_mono(&prog, SR);
    let crossings = sign_changes(&out);
    // 440 Hz for half a second.
    assert!((430..=452).contains(&crossings), "crossings {crossings}");
}

#[test]
fn quit_stops_the_script() {
    let prog = program("Wsin f440 t0.5 Q Wsin f880 t9");
    assert_eq!(prog.vo_count, 1);
    assert_eq!(prog.duration_ms, 500);
}

#[test]
fn silence_prelude_delays_the_sound() {
    let prog = program("Wsin f440 t0.2 s0.1 a0.8");
    assert_eq!(prog.duration_ms, 300);
    let out = render_mono(&prog, SR);
    assert_eq!(out.len(), 3 * SR as usize / 10);
    let prelude = SR as usize / 10;
    assert!(out[..prelude].iter().all(|&s| s == 0));
    assert!(out[prelude..].iter().any(|&s| s != 0));
}

#[test]
fn frequency_ramp_sweeps() {
    let prog = program("Wsin f{v220 g880 t0.5 slin} t0.5");
    let out = render_mono(&prog, SR);
    assert_eq!(out.len(), SR as usize / 2);
    // Mean frequency of a linear 220 -> 880 sweep is 550 Hz.
    let crossings = sign_changes(&out);
    assert!((520..=580).contains(&crossings), "crossings {crossings}");
    // The first quarter is slower than the last quarter.
    let q = out.len() / 4;
    assert!(sign_changes(&out[..q]) < sign_changes(&out[out.len() - q..]));
}

#[test]
fn dynamic_frequency_modulation_renders() {
    let src = "Wsin f440 t0.25 f.r880 f[Wsin r4 t0.25]";
    let prog = program(src);
    assert_eq!(prog.ops.len(), 2);
    let out = render_mono(&prog, SR);
    let plain = render_mono(&program("Wsin f440 t0.25"), SR);
    assert_eq!(out.len(), plain.len());
    assert!(out.iter().zip(plain.iter()).any(|(a, b)| a != b));
    assert!(rms(&out) > 1000.0);
}

#[test]
fn ring_amplitude_modulation_renders() {
    let src = "Wsin f440 t0.25 a0.8 a.r0.1 a[Wsin r2 t0.25]";
    let prog = program(src);
    let out = render_mono(&prog, SR);
    // The amplitude envelope wobbles between 0.8 and 0.1.
    let peak = out.iter().map(|&s| (s as i32).abs()).max().unwrap();
    assert!(peak > 15000, "peak {peak}");
    assert!(rms(&out) < 0.8 / std::f64::consts::SQRT_2 * 32767.0);
}

#[test]
fn nesting_scope_parses_transparently() {
    let prog = program("<Wsin f440 t0.5 | Wsin f550 t0.5>");
    assert_eq!(prog.events.len(), 2);
    assert_eq!(prog.duration_ms, 1000);
}

#[test]
fn stereo_center_pan_is_symmetric() {
    let prog = program("Wsin f440 t0.1 a0.5");
    let mut renderer = Renderer::new(&prog, SR, false);
    let mut out = vec![0i16; 2048];
    let mut l = Vec::new();
    let mut r = Vec::new();
    loop {
        let (frames, done) = renderer.render(&mut out);
        for i in 0..frames {
            l.push(out[i * 2]);
            r.push(out[i * 2 + 1]);
        }
        if done {
            break;
        }
    }
    assert_eq!(l, r);
    assert_eq!(l.len(), SR as usize / 10);
}
