//! Fuzz target: `LineDecoder::feed` and the reply parsers
//!
//! Feeds arbitrary bytes through the line decoder, then runs every
//! complete line through the reply parsers.  None of them may panic, and
//! no line may exceed the decoder's length cap.
//!
//! cargo fuzz run fuzz_line_decoder

#![no_main]

use aquamon::codec::{self, LineDecoder};
use aquamon::config::EndpointId;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut decoder = LineDecoder::new();
    for chunk in data.chunks(7) {
        decoder.feed(chunk);
    }

    while let Some(line) = decoder.next_line() {
        assert!(line.len() <= 256, "line exceeds MAX_LINE_LEN");
        let text = String::from_utf8_lossy(&line);
        if let Some(v) = codec::parse_numeric(&text) {
            assert!(v.is_finite());
            assert!(codec::is_valid_reading(&text));
        }
        let _ = codec::decode_reply(&text);
        let _ = codec::parse_firmware(&text, EndpointId('A'));
        let _ = codec::parse_update_status(&text);
        let _ = codec::parse_tds_config(&text);
    }

    // After a reset the decoder holds nothing.
    decoder.reset();
    assert_eq!(decoder.buffered(), 0);
});
