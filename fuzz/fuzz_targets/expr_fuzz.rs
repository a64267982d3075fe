//! Expression fuzz target: feed arbitrary text to the expression parser.
//! Parsing must not panic; it returns Ok(Expr) or an Expression error.
//! Build with: cargo fuzz run expr_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let s = match std::str::from_utf8(data) {
        Ok(x) => x,
        Err(_) => return,
    };
    let _ = construe::Expr::parse(s);
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run expr_fuzz");
}
