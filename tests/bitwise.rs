//! Bit-level fields: bitwise/bytewise wrappers, bit integers, flags and
//! padding measured in bits.

use construe::{
    bits_swapped, bitwise, bytewise, mapping, padding, u16_be, BitsInteger, Codec, Container, Flag,
    Struct, Value,
};
use pretty_assertions::assert_eq;

fn field<'a>(value: &'a Value, name: &str) -> &'a Value {
    value
        .as_struct()
        .and_then(|c| c.get(name))
        .unwrap_or_else(|| panic!("missing field {}", name))
}

#[test]
fn test_flags_padding_and_code() {
    let codec = Codec::new(bitwise(
        Struct::new(vec![
            Flag.named("urgent"),
            Flag.named("ack"),
            padding(2u64),
            BitsInteger::new(4).named("code"),
        ])
        .into(),
    ));
    assert_eq!(codec.static_size().expect("size"), 1);
    let parsed = codec.parse(&[0xc5]).expect("parse").expect("value");
    assert_eq!(field(&parsed, "urgent"), &Value::Bool(true));
    assert_eq!(field(&parsed, "ack"), &Value::Bool(true));
    assert_eq!(field(&parsed, "code"), &Value::U64(5));

    let input = Value::from(
        Container::new()
            .with("urgent", false)
            .with("ack", true)
            .with("code", 9u8),
    );
    assert_eq!(codec.build(&input).expect("build"), vec![0x49]);
}

#[test]
fn test_signed_nibbles() {
    let codec = Codec::new(bitwise(
        Struct::new(vec![
            BitsInteger::new(4).signed().named("a"),
            BitsInteger::new(4).named("b"),
        ])
        .into(),
    ));
    let parsed = codec.parse(&[0xf3]).expect("parse").expect("value");
    assert_eq!(field(&parsed, "a"), &Value::I64(-1));
    assert_eq!(field(&parsed, "b"), &Value::U64(3));
    assert_eq!(codec.build(&parsed).expect("build"), vec![0xf3]);
}

#[test]
fn test_swapped_bits_integer() {
    let codec = Codec::new(bitwise(BitsInteger::new(16).swapped().into()));
    assert_eq!(codec.parse(&[0x01, 0x02]).expect("parse"), Some(Value::U64(0x0201)));
    assert_eq!(codec.build(&Value::U64(0x0201)).expect("build"), vec![0x01, 0x02]);
}

#[test]
fn test_bytewise_field_inside_bit_struct() {
    let codec = Codec::new(bitwise(
        Struct::new(vec![
            BitsInteger::new(4).named("hi"),
            BitsInteger::new(4).named("lo"),
            bytewise(u16_be()).named("word"),
        ])
        .into(),
    ));
    assert_eq!(codec.static_size().expect("size"), 3);
    let data = [0x12, 0x00, 0x07];
    let parsed = codec.parse(&data).expect("parse").expect("value");
    assert_eq!(field(&parsed, "hi"), &Value::U64(1));
    assert_eq!(field(&parsed, "lo"), &Value::U64(2));
    assert_eq!(field(&parsed, "word"), &Value::U16(7));
    assert_eq!(codec.build(&parsed).expect("build"), data.to_vec());
}

#[test]
fn test_mapped_bit_field() {
    let codec = Codec::new(bitwise(
        Struct::new(vec![
            mapping(
                BitsInteger::new(2).into(),
                vec![
                    (Value::from("low"), Value::U64(0)),
                    (Value::from("mid"), Value::U64(1)),
                    (Value::from("high"), Value::U64(2)),
                ],
            )
            .named("priority"),
            padding(6u64),
        ])
        .into(),
    ));
    let parsed = codec.parse(&[0x80]).expect("parse").expect("value");
    assert_eq!(field(&parsed, "priority"), &Value::from("high"));
    let input = Value::from(Container::new().with("priority", "mid"));
    assert_eq!(codec.build(&input).expect("build"), vec![0x40]);
}

#[test]
fn test_bits_swapped_reverses_each_byte() {
    let codec = Codec::new(bitwise(bits_swapped(BitsInteger::new(8).into())));
    assert_eq!(codec.parse(&[0x01]).expect("parse"), Some(Value::U64(0x80)));
    assert_eq!(codec.build(&Value::U64(0x80)).expect("build"), vec![0x01]);
}

#[test]
fn test_bit_integer_range_is_checked() {
    let codec = Codec::new(bitwise(
        Struct::new(vec![BitsInteger::new(3).named("a"), padding(5u64)]).into(),
    ));
    assert!(codec
        .build(&Value::from(Container::new().with("a", 8u8)))
        .is_err());
    assert_eq!(
        codec.build(&Value::from(Container::new().with("a", 7u8))).expect("build"),
        vec![0xe0]
    );
}
