#![no_main]

use ijwhost::image::VTableFixup;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(fixups) = VTableFixup::read_all(data) {
        for fixup in &fixups {
            let _ = fixup.slot_rvas().count();
        }
    }
});
