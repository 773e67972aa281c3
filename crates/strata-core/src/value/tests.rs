use crate::value::{Float32, Float64, Value, ValueKind};

#[test]
fn float_negative_zero_is_canonical() {
    let pos = Float64::try_new(0.0).unwrap();
    let neg = Float64::try_new(-0.0).unwrap();

    assert_eq!(pos, neg);
    assert_eq!(pos.get().to_bits(), neg.get().to_bits());
}

#[test]
fn float_rejects_non_finite() {
    assert!(Float32::try_new(f32::NAN).is_none());
    assert!(Float32::try_new(f32::INFINITY).is_none());
    assert!(Float64::try_new(f64::NEG_INFINITY).is_none());
    assert!(Float64::try_new(1.5).is_some());
}

#[test]
fn widening_integer_reads() {
    assert_eq!(Value::I8(-3).as_i64(), Some(-3));
    assert_eq!(Value::I32(7).as_i64(), Some(7));
    assert_eq!(Value::U16(9).as_u64(), Some(9));
    assert_eq!(Value::U64(u64::MAX).as_u64(), Some(u64::MAX));

    // no silent cross-signedness reads
    assert_eq!(Value::U32(1).as_i64(), None);
    assert_eq!(Value::I32(1).as_u64(), None);
}

#[test]
fn kind_tags_round_trip() {
    for kind in [
        ValueKind::Null,
        ValueKind::Bool,
        ValueKind::I64,
        ValueKind::F64,
        ValueKind::Text,
        ValueKind::Bytes,
        ValueKind::Timestamp,
        ValueKind::Nested,
        ValueKind::List,
        ValueKind::Dynamic,
    ] {
        assert_eq!(ValueKind::from_u8(kind.to_u8()), Some(kind));
    }
}

#[test]
fn indexable_excludes_approximate_and_structured_kinds() {
    assert!(ValueKind::I32.is_indexable());
    assert!(ValueKind::Text.is_indexable());

    assert!(!ValueKind::F32.is_indexable());
    assert!(!ValueKind::F64.is_indexable());
    assert!(!ValueKind::Bytes.is_indexable());
    assert!(!ValueKind::Nested.is_indexable());
    assert!(!ValueKind::List.is_indexable());
}

#[test]
fn cross_kind_ordering_is_total_and_stable() {
    let mut values = vec![
        Value::Text("z".to_string()),
        Value::I32(1),
        Value::Null,
        Value::Bool(true),
        Value::I32(-5),
    ];

    values.sort();
    let once = values.clone();
    values.sort();

    assert_eq!(values, once);
    assert_eq!(values[0], Value::Null);
    assert_eq!(values[1], Value::Bool(true));
    assert_eq!(values[2], Value::I32(-5));
    assert_eq!(values[3], Value::I32(1));
}

#[test]
fn deep_clone_detaches_lists() {
    let original = Value::List(vec![Value::I32(1), Value::List(vec![Value::I32(2)])]);
    let copy = original.deep_clone();

    assert_eq!(copy, original);
}

#[test]
fn option_conversion_maps_none_to_null() {
    assert_eq!(Value::from(None::<i32>), Value::Null);
    assert_eq!(Value::from(Some(3_i32)), Value::I32(3));
}
