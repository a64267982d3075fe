//! Schema fuzz target: parse arbitrary bytes against a fixed schema with
//! counts, switches, pointers and bit fields. Parsing must not panic;
//! whatever parses must build back without panicking either.
//! Build with: cargo fuzz run parse_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fn schema() -> construe::Codec {
    use construe::{
        bitwise, u16_le, u32_le, u8, Array, BitsInteger, Bytes, Codec, Expr, GreedyBytes, Pointer,
        Struct, Switch, Value,
    };
    let header = bitwise(
        Struct::new(vec![
            BitsInteger::new(3).named("kind"),
            BitsInteger::new(5).signed().named("delta"),
        ])
        .into(),
    );
    Codec::new(
        Struct::new(vec![
            header.named("header"),
            u8().named("count"),
            Array::new(Expr::this("count"), u16_le()).named("items"),
            Switch::new(
                Expr::this("header.kind"),
                vec![
                    (Value::U64(1), u32_le()),
                    (Value::U64(2), Bytes::new(Expr::this("count")).into()),
                ],
            )
            .named("body"),
            Pointer::new(Expr::this("count"), u8()).named("peek"),
            GreedyBytes.named("rest"),
        ])
        .into(),
    )
}

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let codec = schema();
    if let Ok(Some(value)) = codec.parse(data) {
        let _ = codec.build(&value);
    }
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run parse_fuzz");
}
