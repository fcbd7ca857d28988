use karabo_data::{binary, Container, Value};

#[test]
fn mixed_container_round_trips_through_the_wire() {
    let mut inner = Container::new();
    inner.set("temperature", 21.5_f64).unwrap();
    inner.set("label", "bay-3").unwrap();

    let mut root = Container::new();
    root.set("enabled", true).unwrap();
    root.set("count", 7_i32).unwrap();
    root.set("readings", vec![1.0_f64, 2.5, 3.75]).unwrap();
    root.set("sensor", inner).unwrap();
    root.set_attribute("count", "unit", "items");

    let buffer_set = binary::encode(&root).unwrap();
    let flat = buffer_set.to_contiguous();
    let (decoded, consumed) = binary::decode(&flat).unwrap();
    assert_eq!(consumed, flat.len());

    assert_eq!(decoded.get("enabled"), Some(&Value::Bool(true)));
    assert_eq!(decoded.get("count"), Some(&Value::Int32(7)));
    assert_eq!(decoded.attributes("count").and_then(|a| a.get("unit")), Some(&Value::String("items".to_string())));

    let sensor = decoded.get("sensor").and_then(Value::as_container).expect("nested container survives round-trip");
    assert_eq!(sensor.get("label"), Some(&Value::String("bay-3".to_string())));
}

#[test]
fn byte_array_segments_survive_scatter_gather() {
    let payload: Vec<u8> = (0..4096).map(|i| (i % 256) as u8).collect();
    let mut root = Container::new();
    root.set("waveform", karabo_data::ByteArray::from_shared(std::sync::Arc::new(payload.clone()))).unwrap();
    root.set("scan_id", 99_u32).unwrap();

    let buffer_set = binary::encode(&root).unwrap();
    assert!(buffer_set.segment_count() >= 2, "a byte array should land in its own borrowed segment");

    let decoded = binary::decode_buffer_set(&buffer_set).unwrap();
    let waveform = decoded.get("waveform").and_then(Value::as_byte_array).expect("byte array round-trips");
    assert_eq!(waveform.as_slice(), payload.as_slice());
    assert_eq!(decoded.get("scan_id"), Some(&Value::UInt32(99)));
}

#[test]
fn dotted_path_access_reaches_into_nested_containers() {
    let mut leaf = Container::new();
    leaf.set("interval", 300_u32).unwrap();

    let mut root = Container::new();
    root.set("topologyCheck", leaf).unwrap();

    assert_eq!(root.get_path("topologyCheck.interval"), Some(&Value::UInt32(300)));
    assert_eq!(root.get_path("topologyCheck.missing"), None);
    assert_eq!(root.get_path("missing.interval"), None);
}
