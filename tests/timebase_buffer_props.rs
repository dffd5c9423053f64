use proptest::prelude::*;
use sensorflow::{BufferCapacity, BufferDescriptor, SharedBuffer, TimeBase};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_experiment_time_skips_pauses(
        start in 0.0f64..1000.0,
        segments in prop::collection::vec((0.01f64..10.0, 0.01f64..10.0), 1..10),
    ) {
        let mut tb = TimeBase::new();
        tb.start(start);

        let mut event = start;
        let mut active = 0.0;
        let mut paused = 0.0;
        for (run, pause) in &segments {
            // Within a segment translation is a pure shift.
            let a = tb.translate(event + run * 0.25);
            let b = tb.translate(event + run * 0.75);
            prop_assert!(b > a);
            prop_assert!((a - (active + run * 0.25)).abs() < 1e-6);

            event += run;
            active += run;
            tb.pause(event);
            prop_assert!(tb.is_paused());

            event += pause;
            paused += pause;
            tb.mark_pause_resume(event);
            prop_assert!(!tb.is_paused());
            prop_assert!((tb.last_anchor_time() - active).abs() < 1e-6);
        }

        prop_assert!((tb.total_pause_gap() - paused).abs() < 1e-6);
        prop_assert!((tb.translate(event + 1.0) - (active + 1.0)).abs() < 1e-6);
        prop_assert!(!tb.accepts(active - 0.5));
    }

    #[test]
    fn test_bounded_buffer_keeps_most_recent(
        limit in 1usize..20,
        values in prop::collection::vec(-1e6f64..1e6, 0..100),
    ) {
        let buffer = SharedBuffer::in_memory("x", BufferCapacity::Bounded(limit));
        for chunk in values.chunks(7) {
            buffer.append_all(chunk).unwrap();
        }

        let keep = values.len().min(limit);
        prop_assert_eq!(buffer.to_array(), values[values.len() - keep..].to_vec());
        prop_assert_eq!(buffer.is_full(), values.len() >= limit);
        prop_assert_eq!(buffer.last(), values.last().copied());
    }

    #[test]
    fn test_hybrid_buffer_preserves_order_across_spill(
        limit in 1usize..16,
        values in prop::collection::vec(-1e6f64..1e6, 0..120),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let buffer = SharedBuffer::from_descriptor(
            &BufferDescriptor::new("x", BufferCapacity::Hybrid(limit)),
            dir.path(),
        )
        .unwrap();
        for chunk in values.chunks(5) {
            buffer.append_all(chunk).unwrap();
        }

        prop_assert_eq!(buffer.len(), values.len());
        prop_assert!(buffer.memory_len() <= limit);
        prop_assert_eq!(buffer.to_array(), values.clone());

        let recent = buffer.recent(limit);
        let keep = values.len().min(limit);
        prop_assert_eq!(recent, values[values.len() - keep..].to_vec());
    }
}
