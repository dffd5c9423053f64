use proptest::prelude::*;
use sensorflow::source::{ChannelKind, RateReconciler, RateStrategy, ReconcilerConfig};

fn reconciler(strategy: RateStrategy, rate: f64, stride: u32) -> RateReconciler {
    RateReconciler::new(ReconcilerConfig {
        rate,
        strategy,
        stride,
        average: true,
        channels: vec![ChannelKind::Value],
    })
}

/// Strictly increasing sample times built from positive gaps.
fn times_from_gaps(start: f64, gaps: &[f64]) -> Vec<f64> {
    let mut t = start;
    let mut times = Vec::with_capacity(gaps.len() + 1);
    times.push(t);
    for gap in gaps {
        t += gap;
        times.push(t);
    }
    times
}

proptest! {
    #[test]
    fn test_request_stride_keeps_every_nth_raw_sample(
        count in 0usize..200,
        stride in 1u32..8,
    ) {
        let mut r = reconciler(RateStrategy::Request, 0.01, stride);
        let mut written = Vec::new();
        for i in 0..count {
            for out in r.push(&[Some(i as f64)], i as f64 * 0.001) {
                written.push(out);
            }
        }

        let n = stride as usize;
        prop_assert_eq!(written.len(), count / n);
        for (k, sample) in written.iter().enumerate() {
            let raw = (k + 1) * n - 1;
            prop_assert_eq!(sample.values[0], Some(raw as f64));
            prop_assert_eq!(sample.time, raw as f64 * 0.001);
        }
    }

    #[test]
    fn test_generate_emits_on_an_even_grid(
        gaps in prop::collection::vec(0.0005f64..0.05, 1..150),
    ) {
        let rate = 0.01;
        let mut r = reconciler(RateStrategy::Generate, rate, 1);
        let mut times = Vec::new();
        for (i, t) in times_from_gaps(1.0, &gaps).into_iter().enumerate() {
            for out in r.push(&[Some(i as f64)], t) {
                times.push(out.time);
            }
        }

        for pair in times.windows(2) {
            prop_assert!(pair[1] > pair[0]);
            prop_assert!((pair[1] - pair[0] - rate).abs() < 1e-9);
        }
    }

    #[test]
    fn test_auto_after_promotion_matches_generate(
        first_gaps in prop::collection::vec(0.0005f64..0.008, 2..=2),
        gaps in prop::collection::vec(0.0005f64..0.03, 0..100),
    ) {
        let rate = 0.01;
        let mut all_gaps = first_gaps;
        all_gaps.extend(gaps);
        let times = times_from_gaps(0.0, &all_gaps);

        let mut auto = reconciler(RateStrategy::Auto, rate, 1);
        let mut auto_out = Vec::new();
        for (i, &t) in times.iter().enumerate() {
            auto_out.extend(auto.push(&[Some(i as f64)], t));
        }
        prop_assert_eq!(auto.strategy(), RateStrategy::Generate);

        let mut generate = reconciler(RateStrategy::Generate, rate, 1);
        let mut generate_out = Vec::new();
        for (i, &t) in times.iter().enumerate().skip(2) {
            generate_out.extend(generate.push(&[Some(i as f64)], t));
        }

        // The two samples before promotion pass through untouched.
        prop_assert_eq!(auto_out.len(), generate_out.len() + 2);
        prop_assert_eq!(auto_out[0].time, times[0]);
        prop_assert_eq!(auto_out[1].time, times[1]);
        prop_assert_eq!(&auto_out[2..], &generate_out[..]);
    }

    #[test]
    fn test_limit_never_exceeds_one_output_per_interval(
        gaps in prop::collection::vec(0.0001f64..0.02, 1..300),
    ) {
        let rate = 0.05;
        let times = times_from_gaps(0.0, &gaps);
        let span = times[times.len() - 1] - times[0];

        let mut r = reconciler(RateStrategy::Limit, rate, 1);
        let mut written = Vec::new();
        for (i, &t) in times.iter().enumerate() {
            written.extend(r.push(&[Some(i as f64)], t));
        }

        prop_assert!(written.len() as f64 <= span / rate + 1e-9);
        for pair in written.windows(2) {
            prop_assert!(pair[1].time >= pair[0].time);
        }
    }
}

#[test]
fn test_generate_repeats_last_average_across_silence() {
    let mut r = reconciler(RateStrategy::Generate, 0.25, 1);
    assert!(r.push(&[Some(1.0)], 0.0).is_empty());
    assert!(r.push(&[Some(3.0)], 0.125).is_empty());

    let out = r.push(&[Some(10.0)], 1.0);
    let values: Vec<_> = out.iter().map(|s| s.values[0]).collect();
    let times: Vec<_> = out.iter().map(|s| s.time).collect();
    assert_eq!(values, vec![Some(2.0); 4]);
    assert_eq!(times, vec![0.25, 0.5, 0.75, 1.0]);
}

#[test]
fn test_tick_flushes_silent_intervals() {
    let mut r = reconciler(RateStrategy::Generate, 0.25, 1);
    r.push(&[Some(4.0)], 0.0);
    assert!(r.tick(0.3).is_empty());

    let out = r.tick(0.5);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].time, 0.25);
    assert_eq!(out[0].values, vec![Some(4.0)]);
}
