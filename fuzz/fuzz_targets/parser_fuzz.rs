//! Schema fuzz target: feed arbitrary text through the whole pipeline.
//! Generation must not panic; every input ends in a plan or a `SchemaError`.
//! Build with: cargo fuzz run parser_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let s = match std::str::from_utf8(data) {
        Ok(x) => x,
        Err(_) => return,
    };
    for variant in [modemgen::ProtocolVariant::Tlv, modemgen::ProtocolVariant::Fixed] {
        let _ = modemgen::generate(s, &modemgen::Options::new(variant));
    }
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run parser_fuzz");
}
