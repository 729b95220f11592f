#![no_main]

use ijwhost::image::MixedModeImage;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = MixedModeImage::from_mem(data.to_vec());
});
