//! Line shape properties.

use sonogen::line::{fill, Line, Shape, LINE_GOAL, LINE_TIME};

fn filled(shape: Shape, v0: f64, vt: f64, time: u32) -> Vec<f32> {
    let mut buf = vec![0.0f32; time as usize + 1];
    fill(shape, &mut buf, v0, vt, 0, time, None);
    buf
}

#[test]
fn hor_holds_start_value() {
    let buf = filled(Shape::Hor, 3.5, 99.0, 64);
    assert!(buf.iter().all(|&v| v == 3.5));
}

#[test]
fn lin_hits_goal_exactly() {
    let buf = filled(Shape::Lin, 100.0, 200.0, 128);
    assert_eq!(buf[0], 100.0);
    assert_eq!(buf[128], 200.0);
    // Midpoint of a linear ramp.
    assert!((buf[64] - 150.0).abs() < 1.0e-4);
}

#[test]
fn curved_shapes_hit_endpoints() {
    for shape in [Shape::Sin, Shape::Xpe, Shape::Lge, Shape::Exp, Shape::Log] {
        let buf = filled(shape, 10.0, 50.0, 256);
        assert!((buf[0] - 10.0).abs() < 1.0e-3, "{shape:?} start {}", buf[0]);
        assert!((buf[256] - 50.0).abs() < 1.0e-3, "{shape:?} end {}", buf[256]);
    }
}

#[test]
fn curved_shapes_are_monotonic() {
    for shape in [Shape::Sin, Shape::Xpe, Shape::Lge] {
        let buf = filled(shape, 0.0, 1.0, 512);
        for w in buf.windows(2) {
            assert!(w[1] >= w[0] - 1.0e-6, "{shape:?} not rising");
        }
        let buf = filled(shape, 1.0, 0.0, 512);
        for w in buf.windows(2) {
            assert!(w[1] <= w[0] + 1.0e-6, "{shape:?} not falling");
        }
    }
}

#[test]
fn exp_and_log_pick_sides() {
    // Falling exp saturates toward the goal like xpe.
    let exp = filled(Shape::Exp, 1.0, 0.0, 128);
    let xpe = filled(Shape::Xpe, 1.0, 0.0, 128);
    assert_eq!(exp, xpe);
    // Rising exp charges like lge.
    let exp = filled(Shape::Exp, 0.0, 1.0, 128);
    let lge = filled(Shape::Lge, 0.0, 1.0, 128);
    assert_eq!(exp, lge);
    // log mirrors the choice.
    let log = filled(Shape::Log, 0.0, 1.0, 128);
    let xpe = filled(Shape::Xpe, 0.0, 1.0, 128);
    assert_eq!(log, xpe);
}

#[test]
fn mulbuf_scales_elementwise() {
    let mul: Vec<f32> = (0..8).map(|i| i as f32).collect();
    let mut buf = vec![0.0f32; 8];
    fill(Shape::Hor, &mut buf, 2.0, 0.0, 0, 0, Some(&mul));
    for i in 0..8 {
        assert_eq!(buf[i], 2.0 * i as f32);
    }
}

#[test]
fn get_fills_only_to_goal() {
    let mut line = Line::with_state(0.0);
    let update = Line {
        vt: 8.0,
        time_ms: 8,
        flags: LINE_GOAL | LINE_TIME,
        ..Line::default()
    };
    line.merge(&update, 1000);
    let mut buf = [0.0f32; 16];
    assert_eq!(line.get(&mut buf, None), 8);
    // Goal reached but not promoted by get.
    assert!(line.active());
    assert_eq!(line.get(&mut buf, None), 0);
}

#[test]
fn run_fills_tail_with_promoted_state() {
    let mut line = Line::with_state(0.0);
    let update = Line {
        vt: 4.0,
        time_ms: 4,
        flags: LINE_GOAL | LINE_TIME,
        ..Line::default()
    };
    line.merge(&update, 1000);
    let mut buf = [0.0f32; 12];
    assert!(!line.run(&mut buf, None));
    assert_eq!(line.v0, 4.0);
    for i in 4..12 {
        assert_eq!(buf[i], 4.0);
    }
    // A later run keeps producing the held value.
    let mut buf2 = [9.0f32; 4];
    assert!(!line.run(&mut buf2, None));
    assert!(buf2.iter().all(|&v| v == 4.0));
}

#[test]
fn skip_advances_like_run() {
    let mut a = Line::with_state(0.0);
    let mut b = Line::with_state(0.0);
    let update = Line {
        vt: 10.0,
        time_ms: 100,
        flags: LINE_GOAL | LINE_TIME,
        ..Line::default()
    };
    a.merge(&update, 1000);
    b.merge(&update, 1000);
    let mut buf = [0.0f32; 30];
    a.run(&mut buf, None);
    assert!(b.skip(30));
    let mut abuf = [0.0f32; 8];
    let mut bbuf = [0.0f32; 8];
    a.run(&mut abuf, None);
    b.run(&mut bbuf, None);
    assert_eq!(abuf, bbuf);
}
