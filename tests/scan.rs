//! Text buffer and scanner properties.

use sonogen::scanner::{Scanner, WsLevel, SCAN_EOF, SCAN_LNBRK, SCAN_SPACE};
use sonogen::symtab::{SymData, SymTab};
use sonogen::textbuf::{Status, TextBuf, END_MARKER, HALF_LEN};

fn scanner(text: &str) -> Scanner {
    Scanner::new(TextBuf::open_string("<test>", text))
}

#[test]
fn buffer_reads_across_refills() {
    // Longer than both halves to force wraparound refills.
    let text: String = (0..3 * HALF_LEN)
        .map(|i| (b'a' + (i % 26) as u8) as char)
        .collect();
    let mut buf = TextBuf::open_string("<test>", &text);
    for (i, expect) in text.bytes().enumerate() {
        let c = buf.get_char();
        assert_eq!(c, expect, "byte {i}");
    }
    assert_eq!(buf.get_char(), END_MARKER);
    assert_eq!(buf.status(), Status::End);
    assert!(buf.after_eof());
    // Reads stay at the marker.
    assert_eq!(buf.get_char(), END_MARKER);
    assert_eq!(buf.get_char(), END_MARKER);
}

#[test]
fn buffer_unget_across_half_boundary() {
    let text: String = (0..HALF_LEN + 100)
        .map(|i| (b'0' + (i % 10) as u8) as char)
        .collect();
    let bytes = text.as_bytes();
    let mut buf = TextBuf::open_string("<test>", &text);
    for _ in 0..HALF_LEN + 50 {
        buf.get_char();
    }
    buf.unget_n(100);
    for i in 0..100 {
        assert_eq!(buf.get_char(), bytes[HALF_LEN + 50 - 100 + i]);
    }
}

#[test]
fn buffer_numbers() {
    let mut buf = TextBuf::open_string("<test>", "123 -45 3.25 .5 2. x");
    assert_eq!(buf.get_int(false), Some((123, false)));
    buf.skip_space();
    assert_eq!(buf.get_int(true), Some((-45, false)));
    buf.skip_space();
    assert_eq!(buf.get_double(false), Some(3.25));
    buf.skip_space();
    assert_eq!(buf.get_double(false), Some(0.5));
    buf.skip_space();
    // "2." parses the integer part; the dot stays.
    assert_eq!(buf.get_double(false), Some(2.0));
    assert_eq!(buf.get_char(), b'.');
    buf.skip_space();
    assert_eq!(buf.get_int(false), None);
    assert_eq!(buf.get_char(), b'x');
}

#[test]
fn buffer_int_overflow() {
    let mut buf = TextBuf::open_string("<test>", "99999999999999999999999");
    let (v, overflow) = buf.get_int(false).unwrap();
    assert!(overflow);
    assert_eq!(v, i64::MAX);
}

#[test]
fn buffer_try_char_and_skip_line() {
    let mut buf = TextBuf::open_string("<test>", "ab\ncd");
    assert!(!buf.try_char(b'b'));
    assert!(buf.try_char(b'a'));
    buf.skip_line();
    assert_eq!(buf.get_char(), b'c');
}

#[test]
fn buffer_close_and_reset() {
    // Larger than one half so the source is still open after a refill.
    let text = "a".repeat(2 * HALF_LEN);
    let mut buf = TextBuf::open_string("<test>", &text);
    assert_eq!(buf.get_char(), b'a');
    buf.close();
    assert_eq!(buf.get_char(), END_MARKER);
    assert_eq!(buf.status(), Status::End);

    let mut buf = TextBuf::open_string("<test>", "xy");
    assert_eq!(buf.get_char(), b'x');
    buf.reset();
    assert_eq!(buf.get_char(), b'x');
    assert_eq!(buf.get_char(), b'y');
    assert_eq!(buf.get_char(), END_MARKER);
}

#[test]
fn scanner_filter_table_is_per_instance() {
    // Disable '#' comments: '#' becomes an ordinary token byte.
    fn accept(_sc: &mut Scanner, c: u8) -> u8 {
        c
    }
    let mut sc = scanner("a#b");
    sc.set_filter(b'#', accept);
    assert_eq!(sc.get_char(), b'a');
    assert_eq!(sc.get_char(), b'#');
    assert_eq!(sc.get_char(), b'b');
}

#[test]
fn scanner_filters_whitespace_and_comments() {
    let mut sc = scanner("ab  cd\t#x\ny/*z\nw*/e f//c\ng");
    sc.set_ws_level(WsLevel::All);
    let expect = [
        b'a', b'b', SCAN_SPACE, b'c', b'd', SCAN_SPACE, SCAN_LNBRK, b'y', b'e', SCAN_SPACE,
        b'f', SCAN_LNBRK, b'g', SCAN_EOF,
    ];
    for (i, &want) in expect.iter().enumerate() {
        assert_eq!(sc.get_char(), want, "token {i}");
    }
    // Block comment line breaks counted: 'g' sits on line 4.
    assert_eq!(sc.pos().line, 4);
    assert_eq!(sc.error_count(), 0);
}

#[test]
fn scanner_drops_whitespace_at_level_none() {
    let mut sc = scanner("a b\nc # comment\nd");
    let expect = [b'a', b'b', b'c', b'd', SCAN_EOF];
    for &want in &expect {
        assert_eq!(sc.get_char(), want);
    }
}

#[test]
fn scanner_unget_replays_same_tokens() {
    let text = "ab cd#comment\nef gh ij";
    for k in 1..=8usize {
        let mut sc = scanner(text);
        let mut seen = Vec::new();
        for _ in 0..10 {
            seen.push(sc.get_char());
        }
        for _ in 0..k {
            sc.unget_char();
        }
        for i in 0..k {
            assert_eq!(sc.get_char(), seen[10 - k + i], "k={k} i={i}");
        }
    }
}

#[test]
fn scanner_eof_and_reads_past_end() {
    let mut sc = scanner("x");
    assert_eq!(sc.get_char(), b'x');
    assert_eq!(sc.get_char(), SCAN_EOF);
    assert_eq!(sc.get_char(), SCAN_EOF);
    assert!(sc.at_eof());
}

#[test]
fn scanner_symbols() {
    let mut st = SymTab::new();
    let mut sc = scanner("alpha _x9 3no");
    let a = sc.get_symbol(&mut st).unwrap();
    assert_eq!(st.name(a), "alpha");
    let b = sc.get_symbol(&mut st).unwrap();
    assert_eq!(st.name(b), "_x9");
    assert!(sc.get_symbol(&mut st).is_none());
}

#[test]
fn scanner_symbol_truncation_warns() {
    let long: String = "a".repeat(200);
    let mut st = SymTab::new();
    let mut sc = scanner(&long);
    let sym = sc.get_symbol(&mut st).unwrap();
    assert_eq!(st.name(sym).len(), 79);
    assert_eq!(sc.warning_count(), 1);
    assert_eq!(sc.get_char(), SCAN_EOF);
}

#[test]
fn expressions_follow_precedence() {
    let mut st = SymTab::new();
    assert_eq!(scanner("2+3*4").get_num(&mut st, None), Some(14.0));
    assert_eq!(scanner("2-3-4").get_num(&mut st, None), Some(-5.0));
    assert_eq!(scanner("2^3^2").get_num(&mut st, None), Some(512.0));
    assert_eq!(scanner("(1+2)*3").get_num(&mut st, None), Some(9.0));
    assert_eq!(scanner("-5+2").get_num(&mut st, None), Some(-3.0));
    assert_eq!(scanner("10%3").get_num(&mut st, None), Some(1.0));
    assert_eq!(scanner("7/2").get_num(&mut st, None), Some(3.5));
}

#[test]
fn expressions_stop_at_whitespace_outside_parens() {
    let mut st = SymTab::new();
    let mut sc = scanner("440 +220");
    assert_eq!(sc.get_num(&mut st, None), Some(440.0));
    assert_eq!(sc.get_char(), b'+');
    let mut sc = scanner("(440 + 220)*2");
    assert_eq!(sc.get_num(&mut st, None), Some(1320.0));
}

#[test]
fn expression_functions_and_variables() {
    let mut st = SymTab::new();
    assert_eq!(scanner("sqrt(16)").get_num(&mut st, None), Some(4.0));
    assert_eq!(scanner("abs(0-3)").get_num(&mut st, None), Some(3.0));
    let v = scanner("sin(0)").get_num(&mut st, None).unwrap();
    assert!(v.abs() < 1.0e-12);
    let pi = scanner("pi").get_num(&mut st, None).unwrap();
    assert!((pi - std::f64::consts::PI).abs() < 1.0e-12);

    let x = st.intern("x");
    st.bind(x, SymData::Num(2.5));
    assert_eq!(scanner("$x*2").get_num(&mut st, None), Some(5.0));

    let mut sc = scanner("$missing");
    assert_eq!(sc.get_num(&mut st, None), None);
    assert_eq!(sc.error_count(), 1);
}

#[test]
fn expression_rand_is_seeded_deterministically() {
    let mut st = SymTab::new();
    let a = scanner("seed(7)+rand()").get_num(&mut st, None).unwrap();
    let b = scanner("seed(7)+rand()").get_num(&mut st, None).unwrap();
    assert_eq!(a, b);
    let c = scanner("seed(8)+rand()").get_num(&mut st, None).unwrap();
    assert_ne!(a, c);
}

#[test]
fn non_finite_expressions_are_rejected() {
    let mut st = SymTab::new();
    let mut sc = scanner("1/0");
    assert_eq!(sc.get_num(&mut st, None), None);
    assert_eq!(sc.error_count(), 1);
    let mut sc = scanner("0/0");
    assert_eq!(sc.get_num(&mut st, None), None);
    assert!(sc.error_count() >= 1);
}

#[test]
fn invalid_bytes_warn_once() {
    let mut sc = scanner("a\u{1}b");
    assert_eq!(sc.get_char(), b'a');
    assert_eq!(sc.get_char(), b'b');
    assert_eq!(sc.warning_count(), 1);
    // Unget over the invalid byte and rescan: no duplicate warning.
    sc.unget_char();
    assert_eq!(sc.get_char(), b'b');
    assert_eq!(sc.warning_count(), 1);
}

#[test]
fn unterminated_block_comment_is_an_error() {
    let mut sc = scanner("a/*never closed");
    assert_eq!(sc.get_char(), b'a');
    assert_eq!(sc.get_char(), SCAN_EOF);
    assert_eq!(sc.error_count(), 1);
}
