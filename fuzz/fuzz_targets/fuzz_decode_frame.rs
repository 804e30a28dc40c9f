#![no_main]

use daisy_proto::{decode_envelope, decode_frame, encode_frame, MAX_FRAME_BYTES};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Anything that decodes must re-encode within the frame limit and decode to the same value.
    if let Ok(envelope) = decode_frame(data) {
        let frame = encode_frame(&envelope).expect("decoded envelope re-encodes");
        assert_eq!(decode_frame(&frame).expect("re-encoded frame decodes"), envelope);
    }

    if data.len() <= MAX_FRAME_BYTES {
        let _ = decode_envelope(data);
    }
});
