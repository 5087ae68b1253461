use lattice_types::*;

#[test]
fn error_classes_drive_fatality() {
    let e = LatticeError::config("bad");
    assert_eq!(e.class(), ErrorClass::Configuration);
    assert!(e.is_fatal());
    assert!(e.is_configuration());

    let e = LatticeError::topology("grid");
    assert!(e.is_configuration());

    let e = LatticeError::communication("bcast failed");
    assert_eq!(e.class(), ErrorClass::Communication);
    assert!(e.is_fatal());
    assert!(!e.is_configuration());

    let e = LatticeError::engine("forward failed");
    assert_eq!(e.class(), ErrorClass::Execution);
    assert!(e.is_fatal());

    let e = LatticeError::io("cannot open out");
    assert_eq!(e.class(), ErrorClass::Io);
    assert!(!e.is_fatal());
}

#[test]
fn error_conversions() {
    let io_err: LatticeError = std::io::Error::new(std::io::ErrorKind::Other, "io").into();
    match io_err {
        LatticeError::IO { .. } => {}
        _ => panic!("wrong kind"),
    }

    let ser_err: LatticeError = serde_json::from_str::<serde_json::Value>("{")
        .unwrap_err()
        .into();
    match ser_err {
        LatticeError::Serialization { .. } => {}
        _ => panic!("wrong kind"),
    }
}

#[test]
fn error_messages_carry_context() {
    let e = LatticeError::topology(
        "tensor_para_size (2) * pipeline_para_size (2) != world_size (3)",
    );
    assert_eq!(
        e.to_string(),
        "Topology error: tensor_para_size (2) * pipeline_para_size (2) != world_size (3)"
    );
}
