#![no_main]

mod utils;

use daisy_proto::protolist;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some(text) = utils::truncate_utf8(data) else {
        return;
    };

    if let Ok(modules) = protolist::parse(text) {
        let records = protolist::descriptor_records(&modules);
        for record in &records {
            assert!(record.id > 0, "parser accepted non-positive id {}", record.id);
        }
    }
});
