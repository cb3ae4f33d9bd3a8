//! Fuzz target: update manifest parsing
//!
//! cargo fuzz run fuzz_manifest

#![no_main]

use aquamon::update::manifest::parse_release;
use aquamon::update::version;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(release) = parse_release(data, "aquamon") {
        assert!(!release.latest_version.is_empty());
        assert!(!release.files.is_empty());
        for file in &release.files {
            assert_eq!(file.sha256, file.sha256.to_ascii_lowercase());
        }
        let _ = version::compare(&release.latest_version, "0.0.0");
    }
});
