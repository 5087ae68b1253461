use lattice_types::*;
use std::time::Duration;

fn report(iterations: usize, total_time: Duration) -> LatencyReport {
    LatencyReport {
        run_id: RunId::new(),
        request_batch_size: 8,
        beam_width: 1,
        head_num: 12,
        size_per_head: 64,
        total_output_len: 32,
        decoder_layers: 12,
        vocab_size: 50304,
        tensor_para_size: 2,
        pipeline_para_size: 2,
        iterations,
        total_time,
        measured_at: chrono::Utc::now(),
    }
}

#[test]
fn latency_is_averaged_per_iteration() {
    let r = report(4, Duration::from_millis(100));
    assert!((r.mean_latency_ms() - 25.0).abs() < 1e-9);
    assert!((r.tokens_per_second() - 8.0 * 32.0 * 4.0 / 0.1).abs() < 1e-6);
    assert!(r.to_string().contains("decoding-time 25.00 ms"));
}

#[test]
fn zero_iterations_reports_zero() {
    let r = report(0, Duration::ZERO);
    assert_eq!(r.mean_latency_ms(), 0.0);
    assert_eq!(r.tokens_per_second(), 0.0);
}

#[test]
fn memory_usage_utilization() {
    let m = MemoryUsage {
        used_bytes: 40,
        peak_bytes: 60,
        active_allocations: 2,
        total_bytes: Some(100),
    };
    assert!((m.utilization_percent() - 40.0).abs() < 1e-3);
    assert_eq!(MemoryUsage::default().utilization_percent(), 0.0);
}
