//! Preprocessing: deferred rebuilds and offset/size assignment before building.

use construe::{
    if_, u16_le, u32_le, u8, Array, Codec, Container, Expr, GreedyRange, Pointer, Rebuild, RepeatUntil,
    Struct, Switch, Value,
};
use pretty_assertions::assert_eq;

fn expr(source: &str) -> Expr {
    Expr::parse(source).expect("expression")
}

fn struct_of(value: &Value) -> &Container {
    value.as_struct().expect("struct value")
}

const TWELVE_FOURS: [u8; 12] = [4, 0, 0, 0, 4, 0, 0, 0, 4, 0, 0, 0];

fn chained_schema() -> Codec {
    let schema = Struct::new(vec![
        u32_le().named("foo"),
        Struct::new(vec![
            Rebuild::new(u32_le(), expr("this.baz")).named("bar"),
            Rebuild::new(u32_le(), expr("this._.foo")).named("baz"),
        ])
        .named("anon"),
    ]);
    Codec::new(schema.into())
}

#[test]
fn test_preprocess_rebuild_chained() {
    let codec = chained_schema();
    let value = Value::from(Container::new().with("foo", 4u32));
    let (preprocessed, meta) = codec.preprocess(value).expect("preprocess");
    let built = codec.build(&preprocessed).expect("build");
    assert_eq!(built, TWELVE_FOURS.to_vec());
    assert_eq!(meta.size, built.len() as u64);
}

#[test]
fn test_preprocess_int() {
    let codec = Codec::new(u32_le());
    let (value, meta) = codec.preprocess(Value::U32(4)).expect("preprocess");
    assert_eq!(value, Value::U32(4));
    assert_eq!((meta.offset, meta.size, meta.end_offset), (0, 4, 4));
}

#[test]
fn test_preprocess_struct_records_nested_layout() {
    let codec = chained_schema();
    let value = Value::from(Container::new().with("foo", 4u32));
    let (preprocessed, meta) = codec.preprocess(value).expect("preprocess");
    assert_eq!((meta.offset, meta.size), (0, 12));
    let top = struct_of(&preprocessed);
    let anon = top.meta("anon").expect("anon meta");
    assert_eq!((anon.offset, anon.size, anon.end_offset), (4, 8, 12));
    let inner = struct_of(top.get("anon").expect("anon"));
    assert_eq!(inner.meta("bar").map(|m| m.size), Some(4));
    assert_eq!(inner.meta("baz").map(|m| m.size), Some(4));
    assert_eq!(inner.meta("baz").map(|m| m.offset), Some(8));
    assert_eq!(codec.build(&preprocessed).expect("build"), TWELVE_FOURS.to_vec());
}

#[test]
fn test_preprocess_array() {
    let codec = Codec::new(Array::new(3u64, u32_le()).into());
    let value = Value::from(vec![Value::U32(4), Value::U32(4), Value::U32(4)]);
    let (preprocessed, meta) = codec.preprocess(value).expect("preprocess");
    let list = preprocessed.as_list().expect("list");
    for i in 0..3 {
        let m = list.meta(i).expect("element meta");
        assert_eq!((m.offset, m.size, m.end_offset), (4 * i as u64, 4, 4 * i as u64 + 4));
    }
    assert_eq!((meta.size, meta.end_offset), (12, 12));
    assert_eq!(codec.build(&preprocessed).expect("build"), TWELVE_FOURS.to_vec());
}

#[test]
fn test_preprocess_repeat_until() {
    let schema = Struct::new(vec![
        u32_le().named("foo"),
        RepeatUntil::new(|obj, _, _| Ok(obj.loose_eq(&Value::U32(4))), u32_le()).named("bar"),
    ]);
    let codec = Codec::new(schema.into());
    let value = Value::from(
        Container::new()
            .with("foo", 1u32)
            .with("bar", vec![Value::U32(2), Value::U32(3), Value::U32(4)]),
    );
    let (preprocessed, meta) = codec.preprocess(value).expect("preprocess");
    let top = struct_of(&preprocessed);
    let foo = top.meta("foo").expect("foo meta");
    assert_eq!((foo.offset, foo.size, foo.end_offset), (0, 4, 4));
    let bar = top.get("bar").and_then(Value::as_list).expect("bar");
    let offsets: Vec<u64> = (0..3).map(|i| bar.meta(i).map(|m| m.offset).unwrap_or(99)).collect();
    assert_eq!(offsets, vec![4, 8, 12]);
    assert_eq!(bar.meta(2).map(|m| m.end_offset), Some(16));
    assert_eq!((meta.size, meta.end_offset), (16, 16));
    assert_eq!(
        codec.build(&preprocessed).expect("build"),
        vec![1, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0, 4, 0, 0, 0]
    );
}

#[test]
fn test_preprocess_greedy_range() {
    let codec = Codec::new(GreedyRange::new(u32_le()).into());
    let value: Value = (1u32..=4).map(Value::U32).collect::<Vec<_>>().into();
    let (preprocessed, meta) = codec.preprocess(value).expect("preprocess");
    let list = preprocessed.as_list().expect("list");
    assert_eq!(list.meta(3).map(|m| (m.offset, m.end_offset)), Some((12, 16)));
    assert_eq!(meta.size, 16);
    assert_eq!(
        codec.build(&preprocessed).expect("build"),
        vec![1, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0, 4, 0, 0, 0]
    );
}

#[test]
fn test_preprocess_rebuild_forward_reference() {
    let schema = Struct::new(vec![
        u32_le().named("foo"),
        Rebuild::new(u32_le(), expr("this.baz")).named("bar"),
        Rebuild::new(u32_le(), expr("this.foo")).named("baz"),
    ]);
    let codec = Codec::new(schema.into());
    let (preprocessed, meta) = codec
        .preprocess(Value::from(Container::new().with("foo", 4u32)))
        .expect("preprocess");
    assert_eq!((meta.offset, meta.size, meta.end_offset), (0, 12, 12));
    assert_eq!(codec.build(&preprocessed).expect("build"), TWELVE_FOURS.to_vec());
}

#[test]
fn test_preprocess_pointer_size() {
    let schema = Struct::new(vec![
        Array::new(4u64, u32_le()).named("foo"),
        Pointer::new(2u64, u32_le()).named("bar"),
        Array::new(4u64, u32_le()).named("baz"),
    ]);
    let codec = Codec::new(schema.into());
    let value = Value::from(
        Container::new()
            .with("foo", (1u32..=4).map(Value::U32).collect::<Vec<_>>())
            .with("bar", 2u32)
            .with("baz", (5u32..=8).map(Value::U32).collect::<Vec<_>>()),
    );
    let (preprocessed, meta) = codec.preprocess(value).expect("preprocess");
    let bar = struct_of(&preprocessed).meta("bar").expect("bar meta");
    assert_eq!(bar.pointer_size, 4);
    assert_eq!(bar.size, 0);
    assert_eq!(meta.size, 32);
    let built = codec.build(&preprocessed).expect("build");
    assert_eq!(built.len(), 32);
    assert_eq!(&built[2..6], &[2, 0, 0, 0]);
}

#[test]
fn test_preprocess_switch_on_rebuilt_key() {
    let schema = Struct::new(vec![
        Rebuild::new(u8(), expr("this._switch_id_data")).named("type"),
        Switch::new(
            expr("this.type"),
            vec![
                (Value::U8(1), Struct::new(vec![u32_le().named("value")]).named("b32bit")),
                (Value::U8(2), Struct::new(vec![u16_le().named("value")]).named("b16bit")),
                (
                    Value::U8(3),
                    Struct::new(vec![u32_le().named("a"), u32_le().named("b")]).named("test"),
                ),
            ],
        )
        .named("data"),
    ]);
    let codec = Codec::new(schema.into());
    let value = Value::from(
        Container::new()
            .with("_switch_id_data", 1u8)
            .with("data", Container::new().with("value", 256u32)),
    );
    let (preprocessed, meta) = codec.preprocess(value).expect("preprocess");
    assert_eq!((meta.offset, meta.size, meta.end_offset), (0, 5, 5));
    assert_eq!(codec.build(&preprocessed).expect("build"), vec![1, 0, 1, 0, 0]);
}

#[test]
fn test_preprocess_if_then_else_nested() {
    let schema = Struct::new(vec![
        u32_le().named("foo"),
        if_(
            expr("this.foo == 4"),
            Struct::new(vec![
                u32_le().named("bar"),
                if_(expr("this.bar == 4"), Struct::new(vec![u32_le().named("baz")]).into()).named("test"),
            ])
            .into(),
        )
        .named("asd"),
    ]);
    let codec = Codec::new(schema.into());
    let value = Value::from(
        Container::new().with("foo", 4u32).with(
            "asd",
            Container::new()
                .with("bar", 4u32)
                .with("test", Container::new().with("baz", 4u32)),
        ),
    );
    let (preprocessed, meta) = codec.preprocess(value).expect("preprocess");
    let built = codec.build(&preprocessed).expect("build");
    assert_eq!(built, TWELVE_FOURS.to_vec());
    assert_eq!(meta.size, built.len() as u64);
}
