//! Records encoded as response bins decode back to the same bin map.

use meridian_core::Value;
use meridian_proto::{Message, MessageBuilder};
use proptest::prelude::*;
use std::collections::HashMap;

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::Int),
        any::<bool>().prop_map(Value::Bool),
        (-1.0e9f64..1.0e9).prop_map(Value::Float),
        "[a-z0-9 ]{0,16}".prop_map(Value::String),
        proptest::collection::vec(any::<u8>(), 0..16).prop_map(Value::Blob),
    ]
}

fn value() -> impl Strategy<Value = Value> {
    prop_oneof![
        4 => scalar(),
        1 => proptest::collection::vec(scalar(), 0..4).prop_map(Value::List),
        1 => proptest::collection::vec(("[a-z]{1,4}", scalar()), 0..4).prop_map(|pairs| {
            Value::Map(pairs.into_iter().map(|(k, v)| (Value::String(k), v)).collect())
        }),
    ]
}

proptest! {
    #[test]
    fn prop_bins_round_trip(bins in proptest::collection::hash_map("[a-z]{1,8}", value(), 0..8)) {
        let mut b = MessageBuilder::new();
        b.header.generation = 3;
        for (name, v) in &bins {
            b.bin(name, v).unwrap();
        }
        let body = b.finish_message();
        let (msg, end) = Message::decode(&body, 0).unwrap();
        prop_assert_eq!(end, body.len());

        let record = msg.record(false).unwrap();
        prop_assert_eq!(record.generation, 3);
        let expected: HashMap<String, Value> = bins.clone();
        prop_assert_eq!(record.bins, expected);
    }

    #[test]
    fn prop_repeated_bins_merge_in_op_order(values in proptest::collection::vec(any::<i64>(), 2..6)) {
        let mut b = MessageBuilder::new();
        for v in &values {
            b.bin("ops", &Value::Int(*v)).unwrap();
        }
        let (msg, _) = Message::decode(&b.finish_message(), 0).unwrap();
        let record = msg.record(true).unwrap();
        let expected = Value::List(values.iter().map(|v| Value::Int(*v)).collect());
        prop_assert_eq!(record.get("ops"), Some(&expected));
    }
}
