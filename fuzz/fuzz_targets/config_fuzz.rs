//! Config fuzz target: feed arbitrary bytes to the previews parser, then to
//! the expression evaluator and, for any accepted rule, the decoder.
//! None of them may panic.
//! Build with: cargo fuzz run config_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let report = logpreview::parse(data);
    let text = String::from_utf8_lossy(data);
    let _ = logpreview::expr::evaluate_text(&text, &logpreview::Values::new());
    for rule in &report.rules {
        let _ = logpreview::decode_line(rule, &text);
    }
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run config_fuzz");
}
