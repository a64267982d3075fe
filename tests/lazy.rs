//! Lazy values, late-bound recursion and size arithmetic at the edges:
//! forced values see real stream offsets, recursive schemas construct
//! without resolving themselves, and oversized counts fail as size errors.

use construe::context::{RunState, DEFAULT_MAX_EVAL_DEPTH};
use construe::{
    if_, u16_le, u64_le, u8, Array, Codec, Computed, Construct, Container, Context, Expr, Flag, GreedyBytes,
    Lazy, LazyBound, Mode, Node, Pointer, Prefixed, PrefixedArray, Struct, Tell, Value,
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

fn parsing_context() -> Context<'static> {
    Context::root(RunState::new(Mode::Parsing, Container::new(), DEFAULT_MAX_EVAL_DEPTH))
}

fn head_first() -> Node {
    Struct::new(vec![
        if_(expr("this._.more"), LazyBound::new(head_first).into()).named("next"),
        Flag.named("more"),
    ])
    .into()
}

#[test]
fn test_recursive_field_declared_first() {
    let codec = Codec::new(Struct::new(vec![Flag.named("more"), head_first().named("list")]).into());
    let parsed = codec.parse(&[0, 1]).expect("parse").expect("value");
    assert_eq!(field(field(&parsed, "list"), "next"), &Value::None);
    assert_eq!(field(field(&parsed, "list"), "more"), &Value::Bool(true));
    assert_eq!(codec.build(&parsed).expect("build"), vec![0, 1]);
}

fn countdown() -> Node {
    Struct::new(vec![
        Computed::new(expr("this._.depth - 1")).named("depth"),
        if_(expr("this.depth > 0"), LazyBound::new(countdown).into()).named("inner"),
        u8().named("v"),
    ])
    .into()
}

#[test]
fn test_recursion_depth_from_parent() {
    let codec = Codec::new(Struct::new(vec![u8().named("depth"), countdown().named("tree")]).into());
    let parsed = codec.parse(&[2, 7, 8]).expect("parse").expect("value");
    let tree = field(&parsed, "tree");
    assert_eq!(field(tree, "v"), &Value::U8(8));
    assert_eq!(field(field(tree, "inner"), "v"), &Value::U8(7));
    assert_eq!(field(field(tree, "inner"), "inner"), &Value::None);
}

#[test]
fn test_forced_lazy_sees_stream_offsets() {
    let schema = Struct::new(vec![
        u8().named("x"),
        u8().named("y"),
        Lazy::new(
            Struct::new(vec![
                Tell.named("pos"),
                u8().named("z"),
                Pointer::new(0u64, u8()).named("first"),
            ])
            .into(),
        )
        .named("lazy"),
    ]);
    let codec = Codec::new(schema.into());
    let parsed = codec.parse(&[10, 20, 30]).expect("parse").expect("value");
    let Value::Lazy(lazy) = field(&parsed, "lazy") else {
        panic!("expected a lazy value");
    };
    assert_eq!(lazy.offset(), 2);
    assert_eq!(lazy.bytes(), &[30]);
    let forced = lazy.force().expect("force");
    assert_eq!(field(&forced, "pos"), &Value::U64(2));
    assert_eq!(field(&forced, "z"), &Value::U8(30));
    assert_eq!(field(&forced, "first"), &Value::U8(10));
}

#[test]
fn test_lazy_count_overflow_is_size_error() {
    let codec = Codec::new(Lazy::new(PrefixedArray::new(u64_le(), u16_le()).into()).into());
    let err = codec.parse(&[0xff; 8]).unwrap_err();
    assert!(err.is_sizeof(), "{}", err);
}

#[test]
fn test_static_size_overflow_is_size_error() {
    let codec = Codec::new(Array::new(Expr::this("n"), u16_le()).into()).with_param("n", u64::MAX);
    let err = codec.static_size().unwrap_err();
    assert!(err.is_sizeof(), "{}", err);
}

#[test]
fn test_failed_lazy_restores_position() {
    let node: Node = Lazy::new(Prefixed::new(u8(), GreedyBytes.into()).into()).into();
    let mut stream = Cursor::new(vec![1u8, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]);
    stream.set_position(1);
    let mut ctx = parsing_context();
    assert!(node.parse(&mut stream, &mut ctx, "(lazy)").is_err());
    assert_eq!(stream.position(), 1);

    let overflowing: Node = Lazy::new(PrefixedArray::new(u64_le(), u16_le()).into()).into();
    let mut ctx = parsing_context();
    assert!(overflowing.parse(&mut stream, &mut ctx, "(lazy)").is_err());
    assert_eq!(stream.position(), 1);
}
