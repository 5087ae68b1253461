use lattice_types::*;

const END: TokenId = GPT2_SENTINEL_TOKEN;

#[test]
fn rows_are_padded_and_expanded_per_beam() {
    let rows = vec![vec![1, 2, 3], vec![4]];
    let batch = RequestBatch::from_sequences(&rows, 2, 2, END);

    assert_eq!(batch.max_input_len, 3);
    assert_eq!(batch.num_sequences(), 4);
    assert_eq!(
        batch.start_ids,
        vec![1, 2, 3, 1, 2, 3, 4, END, END, 4, END, END]
    );
    assert_eq!(batch.start_lengths, vec![3, 3, 1, 1]);
    batch.validate().unwrap();
}

#[test]
fn missing_rows_are_filled_with_end_tokens() {
    let rows = vec![vec![7, 8]];
    let batch = RequestBatch::from_sequences(&rows, 3, 1, END);

    assert_eq!(batch.start_ids, vec![7, 8, END, END, END, END]);
    assert_eq!(batch.start_lengths, vec![2, 2, 2]);
    batch.validate().unwrap();
}

#[test]
fn extra_rows_are_not_part_of_the_batch() {
    let rows = vec![vec![1], vec![2, 2, 2, 2], vec![3]];
    let batch = RequestBatch::from_sequences(&rows, 1, 1, END);
    assert_eq!(batch.max_input_len, 1);
    assert_eq!(batch.start_ids, vec![1]);
}

#[test]
fn empty_rows_mean_unconditional() {
    let batch = RequestBatch::from_sequences(&[], 4, 2, END);
    assert!(batch.is_unconditional());
    assert!(batch.start_ids.is_empty());
    assert!(batch.start_lengths.is_empty());
    assert_eq!(batch.total_output_len(8), 8);
    batch.validate().unwrap();
}

#[test]
fn total_output_len_adds_prompt() {
    let batch = RequestBatch::from_sequences(&[vec![1, 2, 3, 4]], 1, 1, END);
    assert_eq!(batch.total_output_len(28), 32);
}

#[test]
fn validate_catches_inconsistent_vectors() {
    let mut batch = RequestBatch::from_sequences(&[vec![1, 2]], 1, 1, END);
    batch.start_ids.pop();
    assert!(batch.validate().is_err());

    let mut batch = RequestBatch::from_sequences(&[vec![1, 2]], 1, 1, END);
    batch.start_lengths[0] = 5;
    assert!(batch.validate().is_err());

    assert!(RequestBatch::unconditional(0, 1).validate().is_err());
}
