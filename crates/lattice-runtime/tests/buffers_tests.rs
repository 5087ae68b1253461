use lattice_interfaces::DeviceContext;
use lattice_runtime::{CpuDevice, GenerationBuffers};
use lattice_types::{LatticeError, RequestBatch};

const END_ID: i32 = 50256;

#[test]
fn unconditional_request_has_no_inputs() {
    let device = CpuDevice::new(0);
    let batch = RequestBatch::unconditional(2, 1);
    let mut buffers = GenerationBuffers::allocate(&device, &batch, 8, 16).unwrap();

    assert_eq!(buffers.total_output_len(), 8);
    assert!(!buffers.has_inputs());
    assert_eq!(buffers.output_ids().len(), 2 * 8);
    assert_eq!(buffers.parent_ids().len(), 8 * 2);
    assert_eq!(buffers.sequence_lengths().len(), 2);
    assert_eq!(buffers.scores().len(), 8 * 2);

    let (inputs, _) = buffers.split_io();
    assert!(inputs.input_ids.is_none());
    assert!(inputs.input_lengths.is_none());
    assert_eq!(inputs.max_output_seq_len, 8);
}

#[test]
fn conditional_request_uploads_start_tokens() {
    let device = CpuDevice::new(0);
    let batch = RequestBatch::from_sequences(&[vec![1, 2, 3], vec![4]], 2, 2, END_ID);
    let buffers = GenerationBuffers::allocate(&device, &batch, 5, 32).unwrap();

    assert_eq!(buffers.total_output_len(), 8);
    assert_eq!(buffers.input_ids().unwrap().as_slice(), batch.start_ids.as_slice());
    assert_eq!(buffers.input_lengths().unwrap().as_slice(), &[3, 3, 1, 1]);
    assert_eq!(buffers.output_ids().len(), 4 * 8);
    assert_eq!(buffers.scores().len(), 5 * 4);
}

#[test]
fn total_output_len_bounded_by_max_seq_len() {
    let device = CpuDevice::new(0);
    let batch = RequestBatch::from_sequences(&[vec![1, 2, 3, 4]], 1, 1, END_ID);

    let err = GenerationBuffers::allocate(&device, &batch, 13, 16).unwrap_err();
    assert!(err.is_configuration());
    assert!(err.to_string().contains("= 17 should be <= max_seq_len (16)"));
    // Nothing was allocated before the check failed.
    assert_eq!(device.memory_usage().used_bytes, 0);

    assert!(GenerationBuffers::allocate(&device, &batch, 12, 16).is_ok());
}

#[test]
fn dropping_buffers_releases_device_memory() {
    let device = CpuDevice::new(1);
    let batch = RequestBatch::from_sequences(&[vec![7, 8]], 1, 1, END_ID);
    let buffers = GenerationBuffers::allocate(&device, &batch, 2, 8).unwrap();

    let usage = device.memory_usage();
    assert_eq!(usage.used_bytes, buffers.size_bytes());
    assert_eq!(usage.active_allocations, 6);

    drop(buffers);
    let usage = device.memory_usage();
    assert_eq!(usage.used_bytes, 0);
    assert_eq!(usage.active_allocations, 0);
}

#[test]
fn allocation_failure_surfaces_as_device_error() {
    let device = CpuDevice::with_capacity(0, 64);
    let batch = RequestBatch::unconditional(4, 4);
    let err = GenerationBuffers::allocate(&device, &batch, 16, 16).unwrap_err();
    assert!(matches!(err, LatticeError::Device { .. }));
    assert_eq!(device.memory_usage().used_bytes, 0);
}

#[tokio::test]
async fn output_ids_download_synchronizes() {
    let device = CpuDevice::new(0);
    let batch = RequestBatch::unconditional(1, 2);
    let mut buffers = GenerationBuffers::allocate(&device, &batch, 3, 3).unwrap();
    {
        let (_, mut outputs) = buffers.split_io();
        outputs.output_ids.copy_from_host(&[1, 2, 3, 4, 5, 6]).unwrap();
    }
    let host = buffers.output_ids_host(&device).await.unwrap();
    assert_eq!(host, vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(device.synchronize_count(), 1);
}
