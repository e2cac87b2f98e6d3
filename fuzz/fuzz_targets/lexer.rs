#![no_main]
use libfuzzer_sys::fuzz_target;
use vetpdf_pdf::lexer::Lexer;

fuzz_target!(|data: &[u8]| {
    let mut lexer = Lexer::new(data, 4096);
    loop {
        let before = lexer.position();
        if lexer.next_token().is_eof() {
            break;
        }
        assert!(lexer.position() > before, "lexer stalled at {before}");
    }
});
