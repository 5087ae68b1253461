use lattice_types::*;

#[test]
fn coordinator_is_rank_zero() {
    assert!(GlobalRank::new(0).is_coordinator());
    assert!(!GlobalRank::new(3).is_coordinator());
    assert_eq!(GlobalRank::from(2).to_string(), "P2");
}

#[test]
fn comm_unique_ids_are_random_and_roundtrip_bytes() {
    let a = CommUniqueId::random();
    let b = CommUniqueId::random();
    assert_ne!(a, b);
    assert_eq!(a.as_bytes().len(), COMM_UNIQUE_ID_BYTES);

    let back = CommUniqueId::from_bytes(a.as_bytes()).unwrap();
    assert_eq!(a, back);
    assert!(CommUniqueId::from_bytes(&[0u8; 7]).is_none());
    assert_eq!(a.to_string().len(), 12);
}

#[test]
fn comm_unique_id_displays_hex_prefix() {
    let mut bytes = [0u8; COMM_UNIQUE_ID_BYTES];
    bytes[..7].copy_from_slice(&[0x00, 0x0f, 0xa0, 0xff, 0x12, 0x34, 0x56]);
    let id = CommUniqueId::from_bytes(&bytes).unwrap();
    assert_eq!(id.to_string(), "000fa0ff1234");
    assert_eq!(format!("{:?}", id), "CommUniqueId(000fa0ff1234..)");
}

#[test]
fn run_ids_are_unique() {
    assert_ne!(RunId::new(), RunId::new());
}
