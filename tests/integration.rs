//! Integration tests: round trips through whole schemas, positioning nodes,
//! sizing fallbacks, hooks and file entry points.

use construe::context::{RunState, DEFAULT_MAX_EVAL_DEPTH};
use construe::{
    if_, padding, u16_be, u16_le, u32_le, u8, Aligned, Array, Codec, CodecError, CodecOptions, Const,
    Construct, Container, Context, Expr, FixedSized, Flag, Flow, FocusedSeq, GreedyBytes, GreedyRange,
    Lazy, LazyBound, Mode, Node, Padded, Peek, Pointer, Prefixed, PrefixedArray, RawCopy, Rebuild,
    RepeatUntil, Sequence, Struct, Switch, Union, UnionSelector, Value,
};
use pretty_assertions::assert_eq;
use std::io::Cursor;

fn expr(source: &str) -> Expr {
    Expr::parse(source).expect("expression")
}

fn field<'a>(value: &'a Value, name: &str) -> &'a Value {
    value
        .as_struct()
        .and_then(|c| c.get(name))
        .unwrap_or_else(|| panic!("missing field {}", name))
}

fn counted_items() -> Codec {
    let schema = Struct::new(vec![
        Rebuild::new(u8(), expr("len(this.items)")).named("count"),
        Array::new(Expr::this("count"), u8()).named("items"),
    ]);
    Codec::new(schema.into())
}

#[test]
fn test_rebuild_count_round_trip() {
    let codec = counted_items();
    let parsed = codec.parse(&[3, 1, 2, 3]).expect("parse").expect("value");
    assert_eq!(field(&parsed, "count"), &Value::U8(3));
    assert_eq!(
        field(&parsed, "items"),
        &Value::from(vec![Value::U8(1), Value::U8(2), Value::U8(3)])
    );

    let input = Value::from(Container::new().with("items", vec![Value::U8(1), Value::U8(2), Value::U8(3)]));
    assert_eq!(codec.build(&input).expect("build"), vec![3, 1, 2, 3]);
    assert_eq!(codec.size(&input).expect("size"), 4);
}

#[test]
fn test_rebuild_ignores_stale_count() {
    let codec = counted_items();
    let input = Value::from(
        Container::new()
            .with("count", 9u8)
            .with("items", vec![Value::U8(5)]),
    );
    assert_eq!(codec.build(&input).expect("build"), vec![1, 5]);
}

#[test]
fn test_union_commits_to_selected_alternative() {
    let schema = Struct::new(vec![
        Union::new(
            0usize,
            vec![
                construe::Bytes::new(8u64).named("raw"),
                Struct::new(vec![u32_le().named("a"), u32_le().named("b")]).named("ints"),
            ],
        )
        .named("u"),
        u8().named("tail"),
    ]);
    let codec = Codec::new(schema.into());
    let data = [1, 0, 0, 0, 2, 0, 0, 0, 0xff];
    let parsed = codec.parse(&data).expect("parse").expect("value");
    let union = field(&parsed, "u");
    assert_eq!(field(union, "raw"), &Value::Bytes(data[..8].to_vec()));
    assert_eq!(field(field(union, "ints"), "b"), &Value::U32(2));
    assert_eq!(field(&parsed, "tail"), &Value::U8(0xff));

    let input = Value::from(
        Container::new()
            .with("u", Container::new().with("ints", Container::new().with("a", 1u32).with("b", 2u32)))
            .with("tail", 0xffu8),
    );
    assert_eq!(codec.build(&input).expect("build"), data.to_vec());
}

#[test]
fn test_greedy_range_rolls_back_partial_element() {
    let schema = Struct::new(vec![
        GreedyRange::new(u16_le()).named("items"),
        GreedyBytes.named("rest"),
    ]);
    let codec = Codec::new(schema.into());
    let parsed = codec.parse(&[1, 0, 2, 0, 3]).expect("parse").expect("value");
    assert_eq!(field(&parsed, "items"), &Value::from(vec![Value::U16(1), Value::U16(2)]));
    assert_eq!(field(&parsed, "rest"), &Value::Bytes(vec![3]));
}

#[test]
fn test_pointer_restores_stream_position() {
    let schema = Struct::new(vec![
        Pointer::new(4u64, u8()).named("far"),
        Pointer::new(-1i64, u8()).named("last"),
        u8().named("first"),
    ]);
    let codec = Codec::new(schema.into());
    let parsed = codec.parse(&[7, 0, 0, 0, 9, 6]).expect("parse").expect("value");
    assert_eq!(field(&parsed, "far"), &Value::U8(9));
    assert_eq!(field(&parsed, "last"), &Value::U8(6));
    assert_eq!(field(&parsed, "first"), &Value::U8(7));
}

#[test]
fn test_peek_does_not_consume() {
    let schema = Struct::new(vec![
        Peek::new(u16_le()).named("peeked"),
        u8().named("a"),
        u8().named("b"),
        Peek::new(u8()).named("beyond"),
    ]);
    let codec = Codec::new(schema.into());
    let parsed = codec.parse(&[1, 2]).expect("parse").expect("value");
    assert_eq!(field(&parsed, "peeked"), &Value::U16(0x0201));
    assert_eq!(field(&parsed, "b"), &Value::U8(2));
    assert_eq!(field(&parsed, "beyond"), &Value::None);
}

#[test]
fn test_size_prefers_static_then_value() {
    let fixed = Codec::new(Struct::new(vec![u16_be().named("a"), Array::new(3u64, u8()).named("b")]).into());
    assert_eq!(fixed.static_size().expect("static size"), 5);

    let dynamic = Codec::new(Struct::new(vec![u8().named("a"), GreedyBytes.named("b")]).into());
    let err = dynamic.static_size().unwrap_err();
    assert!(err.is_sizeof());
    let value = Value::from(Container::new().with("a", 1u8).with("b", vec![0u8; 6]));
    assert_eq!(dynamic.size(&value).expect("size"), 7);
}

#[test]
fn test_size_reads_sibling_length() {
    let schema = Struct::new(vec![
        u8().named("n"),
        construe::Bytes::new(Expr::this("n")).named("data"),
    ]);
    let codec = Codec::new(schema.into());
    assert!(codec.static_size().unwrap_err().is_sizeof());
    let value = Value::from(Container::new().with("n", 3u8).with("data", vec![1u8, 2, 3]));
    assert_eq!(codec.size(&value).expect("size"), 4);
}

#[test]
fn test_hook_cancels_parse() {
    let schema = Struct::new(vec![
        u8().named("kind").with_hook(|v, _| {
            Ok(if v.loose_eq(&Value::U8(0)) {
                Flow::Cancel
            } else {
                Flow::Continue(())
            })
        }),
        u8().named("body"),
    ]);
    let codec = Codec::new(schema.into());
    assert_eq!(codec.parse(&[0, 1]).expect("parse"), None);
    assert!(codec.parse(&[1, 1]).expect("parse").is_some());
}

fn linked_list() -> Node {
    Struct::new(vec![
        u8().named("value"),
        Flag.named("more"),
        if_(Expr::this("more"), LazyBound::new(linked_list).into()).named("next"),
    ])
    .into()
}

#[test]
fn test_lazy_bound_recursive_schema() {
    let codec = Codec::new(linked_list());
    let data = [1, 1, 2, 1, 3, 0];
    let parsed = codec.parse(&data).expect("parse").expect("value");
    let third = field(field(&parsed, "next"), "next");
    assert_eq!(field(third, "value"), &Value::U8(3));
    assert_eq!(field(third, "next"), &Value::None);
    assert_eq!(codec.build(&parsed).expect("build"), data.to_vec());
}

#[test]
fn test_lazy_defers_decoding() {
    let schema = Struct::new(vec![
        Lazy::new(Prefixed::new(u8(), GreedyBytes.into()).into()).named("blob"),
        u8().named("after"),
    ]);
    let codec = Codec::new(schema.into());
    let data = [2, 9, 9, 5];
    let parsed = codec.parse(&data).expect("parse").expect("value");
    assert_eq!(field(&parsed, "after"), &Value::U8(5));
    let Value::Lazy(blob) = field(&parsed, "blob") else {
        panic!("expected a lazy value");
    };
    assert_eq!(blob.offset(), 0);
    assert_eq!(blob.force().expect("force"), Value::Bytes(vec![9, 9]));
    assert_eq!(codec.build(&parsed).expect("build"), data.to_vec());
}

#[test]
fn test_sequence_focused_and_prefixed_arrays() {
    let seq = Codec::new(Sequence::new(vec![u8(), u16_be()]).into());
    let parsed = seq.parse(&[1, 0, 2]).expect("parse").expect("value");
    assert_eq!(parsed, Value::from(vec![Value::U8(1), Value::U16(2)]));
    assert_eq!(seq.build(&parsed).expect("build"), vec![1, 0, 2]);

    let focused = Codec::new(FocusedSeq::new("x", vec![Const::bytes(&[0xaa]).into(), u8().named("x")]).into());
    assert_eq!(focused.parse(&[0xaa, 5]).expect("parse"), Some(Value::U8(5)));
    assert_eq!(focused.build(&Value::U8(5)).expect("build"), vec![0xaa, 5]);

    let prefixed = Codec::new(PrefixedArray::new(u8(), u16_be()).into());
    let parsed = prefixed.parse(&[2, 0, 1, 0, 2]).expect("parse").expect("value");
    assert_eq!(parsed, Value::from(vec![Value::U16(1), Value::U16(2)]));
    assert_eq!(prefixed.build(&parsed).expect("build"), vec![2, 0, 1, 0, 2]);
}

#[test]
fn test_switch_with_default() {
    let schema = Struct::new(vec![
        u8().named("kind"),
        Switch::new(Expr::this("kind"), vec![(Value::U8(1), u8())])
            .default(u16_be())
            .named("body"),
    ]);
    let codec = Codec::new(schema.into());
    let parsed = codec.parse(&[1, 7]).expect("parse").expect("value");
    assert_eq!(field(&parsed, "body"), &Value::U8(7));
    let parsed = codec.parse(&[2, 0, 7]).expect("parse").expect("value");
    assert_eq!(field(&parsed, "body"), &Value::U16(7));
    assert_eq!(codec.build(&parsed).expect("build"), vec![2, 0, 7]);
}

#[test]
fn test_errors_carry_field_path() {
    let schema = Struct::new(vec![u8().named("a"), Struct::new(vec![u16_le().named("b")]).named("inner")]);
    let codec = Codec::new(schema.into());
    let err = codec.parse(&[1, 2]).unwrap_err();
    assert!(matches!(err, CodecError::Stream { .. }));
    assert_eq!(err.path(), Some("(parsing) -> inner -> b"));

    let err = codec
        .build(&Value::from(Container::new().with("a", 1u8)))
        .unwrap_err();
    assert!(matches!(err, CodecError::Format { .. }));
    assert_eq!(err.path(), Some("(building) -> inner -> b"));

    let raw = Codec::new(Struct::new(vec![u8().named("a"), u8().named("b")]).into()).with_options(
        CodecOptions {
            preprocess_before_build: false,
            ..Default::default()
        },
    );
    let err = raw.build(&Value::from(Container::new().with("a", 1u8))).unwrap_err();
    assert!(matches!(err, CodecError::MissingKey { .. }));
}

#[test]
fn test_file_round_trip() {
    let codec = counted_items();
    let file = tempfile::NamedTempFile::new().expect("temp file");
    let input = Value::from(Container::new().with("items", vec![Value::U8(4), Value::U8(5)]));
    codec.build_file(&input, file.path()).expect("build file");
    assert_eq!(std::fs::read(file.path()).expect("read back"), vec![2, 4, 5]);
    let parsed = codec.parse_file(file.path()).expect("parse file").expect("value");
    assert_eq!(field(&parsed, "items"), field(&input, "items"));
}

fn without_preprocess(codec: Codec) -> Codec {
    codec.with_options(CodecOptions {
        preprocess_before_build: false,
        ..Default::default()
    })
}

#[test]
fn test_array_build_wrong_length() {
    let codec = Codec::new(Array::new(2u64, u8()).into());
    let err = codec.build(&Value::from(vec![Value::U8(1)])).unwrap_err();
    assert!(matches!(err, CodecError::Range { .. }), "{}", err);
    assert_eq!(codec.build(&Value::from(vec![Value::U8(1), Value::U8(2)])).expect("build"), vec![1, 2]);
}

fn until_zero() -> RepeatUntil {
    RepeatUntil::new(|v, _, _| Ok(v.as_u64() == Some(0)), u8())
}

#[test]
fn test_repeat_until_predicate_on_build() {
    let codec = Codec::new(until_zero().into());
    assert_eq!(
        codec.parse(&[3, 0, 9]).expect("parse"),
        Some(Value::from(vec![Value::U8(3), Value::U8(0)]))
    );
    let unterminated = Value::from(vec![Value::U8(1), Value::U8(2)]);
    let err = codec.build(&unterminated).unwrap_err();
    assert!(matches!(err, CodecError::Repeat { .. }), "{}", err);
    let early = Value::from(vec![Value::U8(1), Value::U8(0), Value::U8(5)]);
    assert_eq!(codec.build(&early).expect("build"), vec![1, 0]);

    let unchecked = Codec::new(until_zero().check_predicate(false).into());
    assert_eq!(unchecked.build(&unterminated).expect("build"), vec![1, 2]);
}

fn two_views(selector: impl Into<UnionSelector>) -> Codec {
    let schema = Struct::new(vec![
        u8().named("sel"),
        Union::new(selector, vec![u16_le().named("wide"), u8().named("narrow")]).named("u"),
        GreedyBytes.named("rest"),
    ]);
    Codec::new(schema.into())
}

#[test]
fn test_union_selectors() {
    let data = [1, 0x34, 0x12, 0xee];

    let parsed = two_views(UnionSelector::None).parse(&data).expect("parse").expect("value");
    assert_eq!(field(field(&parsed, "u"), "wide"), &Value::U16(0x1234));
    assert_eq!(field(field(&parsed, "u"), "narrow"), &Value::U8(0x34));
    assert_eq!(field(&parsed, "rest"), &Value::Bytes(vec![0x34, 0x12, 0xee]));

    let parsed = two_views("narrow").parse(&data).expect("parse").expect("value");
    assert_eq!(field(&parsed, "rest"), &Value::Bytes(vec![0x12, 0xee]));

    let by_expr = two_views(Expr::this("_.sel"));
    let parsed = by_expr.parse(&data).expect("parse").expect("value");
    assert_eq!(field(&parsed, "rest"), &Value::Bytes(vec![0x12, 0xee]));
    let parsed = by_expr.parse(&[0, 0x34, 0x12, 0xee]).expect("parse").expect("value");
    assert_eq!(field(&parsed, "rest"), &Value::Bytes(vec![0xee]));

    let parsed = two_views(Expr::constant("wide")).parse(&data).expect("parse").expect("value");
    assert_eq!(field(&parsed, "rest"), &Value::Bytes(vec![0xee]));

    let err = two_views("missing").parse(&data).unwrap_err();
    assert!(matches!(err, CodecError::Union { .. }), "{}", err);
}

#[test]
fn test_union_failed_alternative_rewinds() {
    let node: Node = Union::new(0usize, vec![u8().named("a"), u32_le().named("b")]).into();
    let mut stream = Cursor::new(vec![9u8, 1, 2]);
    stream.set_position(1);
    let mut ctx = Context::root(RunState::new(Mode::Parsing, Container::new(), DEFAULT_MAX_EVAL_DEPTH));
    let err = node.parse(&mut stream, &mut ctx, "(union)").unwrap_err();
    assert!(matches!(err, CodecError::Stream { .. }), "{}", err);
    assert_eq!(stream.position(), 1);
}

#[test]
fn test_union_build_needs_matching_key() {
    let codec = without_preprocess(two_views(0usize));
    let input = Value::from(
        Container::new()
            .with("sel", 0u8)
            .with("u", Container::new().with("other", 1u8))
            .with("rest", Vec::<u8>::new()),
    );
    let err = codec.build(&input).unwrap_err();
    assert!(matches!(err, CodecError::Union { .. }), "{}", err);

    let input = Value::from(
        Container::new()
            .with("sel", 1u8)
            .with("u", Container::new().with("narrow", 7u8))
            .with("rest", Vec::<u8>::new()),
    );
    assert_eq!(codec.build(&input).expect("build"), vec![1, 7]);
}

#[test]
fn test_anonymous_fields_reorder_freely() {
    let data = [1, 0xaa, 0xbb, 2, 0];
    let one = Codec::new(Struct::new(vec![u8().named("a"), padding(1u64), u8(), u16_le().named("b")]).into());
    let other = Codec::new(Struct::new(vec![u8().named("a"), u8(), padding(1u64), u16_le().named("b")]).into());
    let one = one.parse(&data).expect("parse").expect("value");
    let other = other.parse(&data).expect("parse").expect("value");
    for name in ["a", "b"] {
        assert_eq!(field(&one, name), field(&other, name));
    }
    assert_eq!(field(&one, "b"), &Value::U16(2));
}

#[test]
fn test_static_size_matches_built_length() {
    let cases: Vec<(Node, Value)> = vec![
        (
            Struct::new(vec![u8().named("a"), u16_le().named("b"), padding(3u64)]).into(),
            Value::from(Container::new().with("a", 1u8).with("b", 2u16)),
        ),
        (
            Array::new(3u64, u32_le()).into(),
            Value::from(vec![Value::U32(1), Value::U32(2), Value::U32(3)]),
        ),
        (Sequence::new(vec![u8(), u16_be()]).into(), Value::from(vec![Value::U8(1), Value::U16(2)])),
        (Aligned::new(4u64, u16_le()).into(), Value::U16(1)),
        (FixedSized::new(5u64, GreedyBytes.into()).into(), Value::Bytes(vec![1, 2])),
        (Padded::new(4u64, u8()).into(), Value::U8(9)),
        (Const::bytes(b"AB").into(), Value::None),
        (
            RawCopy::new(u16_le()).into(),
            Value::from(Container::new().with("value", 3u16)),
        ),
    ];
    for (node, value) in cases {
        let codec = Codec::new(node);
        let expected = codec.static_size().expect("static size");
        let built = codec.build(&value).expect("build");
        assert_eq!(built.len() as u64, expected, "{:?}", codec.schema());
    }
}
