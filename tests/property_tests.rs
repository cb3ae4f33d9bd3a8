//! Property tests for the codec, the alarm classifier, version ordering and
//! link-session exclusivity.

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use aquamon::codec::{is_valid_reading, parse_numeric, LineDecoder};
use aquamon::control::alarm::{classify, AlarmLevel};
use aquamon::error::TransportError;
use aquamon::link::{Exchange, LinkSession, Transport};
use aquamon::update::version;
use proptest::prelude::*;

// ── Reading validity ──────────────────────────────────────────

proptest! {
    #[test]
    fn signed_decimals_are_valid(
        sign in prop_oneof![Just(""), Just("-"), Just("+")],
        int in 0u32..100_000,
        frac in proptest::option::of(0u32..10_000),
        unit in prop_oneof![Just(""), Just("mmWG"), Just("ppm"), Just("C")],
    ) {
        let raw = match frac {
            Some(f) => format!("{sign}{int}.{f}{unit}"),
            None => format!("{sign}{int}{unit}"),
        };
        prop_assert!(is_valid_reading(&raw), "{raw:?} should be valid");
        let value = parse_numeric(&raw).unwrap();
        prop_assert_eq!(value < 0.0, sign == "-" && value != 0.0);
    }

    #[test]
    fn more_than_one_point_is_invalid(
        parts in proptest::collection::vec(0u32..1000, 3..6),
    ) {
        let raw = parts.iter().map(u32::to_string).collect::<Vec<_>>().join(".");
        prop_assert!(!is_valid_reading(&raw));
        prop_assert_eq!(parse_numeric(&raw), None);
    }

    #[test]
    fn parse_never_panics(raw in ".{0,40}") {
        if let Some(v) = parse_numeric(&raw) {
            prop_assert!(v.is_finite());
        }
    }
}

// ── Line framing ──────────────────────────────────────────────

fn drain(decoder: &mut LineDecoder) -> Vec<Vec<u8>> {
    std::iter::from_fn(|| decoder.next_line()).collect()
}

proptest! {
    /// Splitting the byte stream at arbitrary points yields the same lines.
    #[test]
    fn chunking_does_not_change_lines(
        data in proptest::collection::vec(prop_oneof![Just(b'\n'), Just(b'\r'), 0x20u8..0x7f], 0..600),
        cuts in proptest::collection::vec(0usize..600, 0..8),
    ) {
        let mut whole = LineDecoder::new();
        whole.feed(&data);

        let mut cuts: Vec<usize> = cuts.into_iter().map(|c| c.min(data.len())).collect();
        cuts.sort_unstable();
        let mut chunked = LineDecoder::new();
        let mut start = 0;
        for cut in cuts.into_iter().chain(std::iter::once(data.len())) {
            chunked.feed(&data[start..cut]);
            start = cut;
        }

        prop_assert_eq!(drain(&mut whole), drain(&mut chunked));
        prop_assert_eq!(whole.buffered(), chunked.buffered());
    }

    #[test]
    fn lines_never_carry_terminators(
        data in proptest::collection::vec(any::<u8>(), 0..1200),
    ) {
        let mut decoder = LineDecoder::new();
        decoder.feed(&data);
        for line in drain(&mut decoder) {
            prop_assert!(!line.contains(&b'\n') && !line.contains(&b'\r'));
            prop_assert!(line.len() <= 256);
        }
    }
}

// ── Alarm classification ──────────────────────────────────────

fn rank(level: AlarmLevel) -> u8 {
    match level {
        AlarmLevel::Normal => 0,
        AlarmLevel::Approaching => 1,
        AlarmLevel::Critical => 2,
    }
}

proptest! {
    #[test]
    fn inside_the_margins_is_normal(
        min in -100.0f64..100.0,
        width in 2.0f64..100.0,
        margin_frac in 0.0f64..0.45,
        t in 0.01f64..0.99,
    ) {
        let max = min + width;
        let margin = width * margin_frac;
        let lo = min + margin;
        let hi = max - margin;
        let value = lo + (hi - lo) * t;
        prop_assume!(value > lo && value < hi);
        prop_assert_eq!(classify(value, min, max, margin), AlarmLevel::Normal);
    }

    /// Moving away from the band centre never lowers the severity.
    #[test]
    fn severity_grows_towards_the_bounds(
        min in -100.0f64..100.0,
        width in 1.0f64..100.0,
        margin_frac in 0.0f64..0.5,
        a in 0.0f64..1.5,
        b in 0.0f64..1.5,
    ) {
        let max = min + width;
        let margin = width * margin_frac;
        let centre = min + width / 2.0;
        let (near, far) = if a <= b { (a, b) } else { (b, a) };
        let half = width / 2.0;
        for dir in [-1.0, 1.0] {
            let l_near = classify(centre + dir * near * half, min, max, margin);
            let l_far = classify(centre + dir * far * half, min, max, margin);
            prop_assert!(rank(l_near) <= rank(l_far));
        }
    }
}

// ── Version ordering ──────────────────────────────────────────

fn dotted() -> impl Strategy<Value = String> {
    proptest::collection::vec(0u64..50, 1..5)
        .prop_map(|parts| parts.iter().map(u64::to_string).collect::<Vec<_>>().join("."))
}

proptest! {
    #[test]
    fn version_compare_is_a_total_order(a in dotted(), b in dotted()) {
        prop_assert_eq!(version::compare(&a, &a), CmpOrdering::Equal);
        prop_assert_eq!(version::compare(&a, &b), version::compare(&b, &a).reverse());
    }

    #[test]
    fn trailing_zeros_do_not_matter(a in dotted(), zeros in 1usize..4) {
        let padded = format!("{a}{}", ".0".repeat(zeros));
        prop_assert_eq!(version::compare(&a, &padded), CmpOrdering::Equal);
    }
}

// ── Session exclusivity ───────────────────────────────────────

/// Counts overlapping exchanges; each write parks briefly so overlap would
/// be observed if the session lock did not serialise callers.
struct OverlapCounter {
    in_flight: Arc<AtomicUsize>,
    max_seen: Arc<AtomicUsize>,
    pending: Option<String>,
}

impl Transport for OverlapCounter {
    fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
        thread::sleep(Duration::from_micros(200));
        self.pending = Some(format!("echo {line}"));
        Ok(())
    }

    fn read_line(&mut self, _timeout: Duration) -> Result<Option<String>, TransportError> {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(self.pending.take())
    }

    fn discard_pending(&mut self) -> Result<usize, TransportError> {
        Ok(0)
    }

    fn label(&self) -> String {
        "overlap-counter".into()
    }

    fn serial_path(&self) -> Option<&str> {
        None
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn exchanges_never_overlap(threads in 2usize..6, per_thread in 1usize..12) {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let session = Arc::new(LinkSession::new(()));
        session.attach(
            Box::new(OverlapCounter {
                in_flight: Arc::clone(&in_flight),
                max_seen: Arc::clone(&max_seen),
                pending: None,
            }),
            |_, _| {},
        );

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let session = Arc::clone(&session);
                thread::spawn(move || {
                    (0..per_thread)
                        .map(|i| {
                            let line = format!("T{t}-{i}");
                            let reply = session.exchange(&line, Exchange::new(Duration::from_millis(5)));
                            reply.ok().flatten() == Some(format!("echo {line}"))
                        })
                        .all(|ok| ok)
                })
            })
            .collect();
        for handle in handles {
            prop_assert!(handle.join().unwrap(), "a reply went to the wrong caller");
        }
        prop_assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        prop_assert_eq!(session.counters().exchanges, (threads * per_thread) as u64);
    }
}
