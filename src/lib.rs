//! # construe: declarative binary formats
//!
//! A schema is a tree of [`Node`]s. The same tree parses bytes into
//! [`Value`]s, builds values back into bytes, and computes sizes, so a
//! format is described once and used in both directions.
//!
//! ## Node families
//!
//! - **Leaves**: fixed-width numbers (`u8`, `u16_le`, `f64_be`, ...),
//!   [`BitsInteger`], [`Bytes`], [`GreedyBytes`], [`Flag`], [`Const`]
//! - **Context-only**: [`Computed`], [`Rebuild`], [`Defaulted`], [`Check`],
//!   [`Index`], [`Tell`], [`Pass`], [`Terminated`], [`ErrorField`], [`StopIf`]
//! - **Structural**: [`Struct`], [`Sequence`], [`FocusedSeq`]
//! - **Repetition**: [`Array`], [`GreedyRange`], [`RepeatUntil`], [`PrefixedArray`]
//! - **Choice**: [`IfThenElse`], [`Switch`], [`Union`]
//! - **Positioning**: [`Pointer`], [`Area`], [`Peek`], [`Lazy`], [`LazyBound`]
//! - **Regions and transforms**: [`Prefixed`], [`FixedSized`], [`Padded`],
//!   [`Aligned`], [`NullTerminated`], [`NullStripped`], [`OffsettedEnd`],
//!   [`Transformed`], [`Restreamed`], [`bitwise`], [`byte_swapped`]
//! - **Adapters**: [`Adapted`], [`mapping`], [`ExprAdapter`], [`ExprValidator`],
//!   [`RawCopy`]
//!
//! Fields refer to each other through context expressions, written either
//! as closures or as text:
//!
//! ```text
//! this.count            sibling field
//! this._.header.kind    field of the enclosing structure
//! len(this.items)       element count
//! offset(this.body)     position recorded by the size-assignment pass
//! ```
//!
//! ## Example
//!
//! ```
//! use construe::{u8, Codec, Expr, Rebuild, Struct};
//!
//! let schema = Struct::new(vec![
//!     Rebuild::new(u8(), Expr::parse("len(this.items)").unwrap()).named("count"),
//!     u8().repeat(Expr::this("count")).named("items"),
//! ]);
//! let codec = Codec::new(schema.into());
//! let value = codec.parse(&[2, 7, 9]).unwrap().unwrap();
//! assert_eq!(codec.build(&value).unwrap(), vec![2, 7, 9]);
//! ```

pub mod adapter;
pub mod arrays;
pub mod ast;
pub mod codec;
pub mod context;
pub mod dispatch;
pub mod dump;
pub mod expr;
pub mod lazy;
pub mod leaf;
pub mod node;
pub mod parser;
pub mod pointer;
pub mod stream;
pub mod structs;
pub mod transform;
pub mod tunnel;
pub mod value;

pub use adapter::{mapping, none_of, one_of, Adapted, Adapter, ExprAdapter, ExprValidator, Mapping, RawCopy};
pub use arrays::{Array, GreedyRange, PrefixedArray, RepeatUntil};
pub use codec::{Codec, CodecError, CodecOptions, Result};
pub use context::{Context, Mode};
pub use dispatch::{if_, IfThenElse, Switch, Union, UnionSelector};
pub use dump::{dump, DumpOptions};
pub use expr::Expr;
pub use lazy::{Lazy, LazyBound, LazyValue};
pub use leaf::{
    f32_be, f32_le, f64_be, f64_le, i16_be, i16_le, i32_be, i32_le, i64_be, i64_le, i8, u16_be,
    u16_le, u32_be, u32_le, u64_be, u64_le, u8, BitsInteger, Bytes, Check, Computed, Const,
    Defaulted, Endianness, ErrorField, Flag, FormatField, GreedyBytes, Index, NumberKind, Pass,
    Rebuild, StopIf, Tell, Terminated,
};
pub use node::{Construct, Flow, Node};
pub use pointer::{Area, Peek, Pointer};
pub use stream::{ReadStream, WriteStream};
pub use structs::{FocusedSeq, Sequence, Struct};
pub use transform::{bits_swapped, bitwise, byte_swapped, bytewise, Restreamed, Transformed};
pub use tunnel::{
    aligned_struct, padding, Aligned, FixedSized, NullStripped, NullTerminated, OffsettedEnd, Padded, Prefixed,
};
pub use value::{Container, ListContainer, MetaInformation, Value};
