#![no_main]

use libfuzzer_sys::fuzz_target;
use snapshot::css::{BuildCache, adapt_css_for_replay};

fuzz_target!(|data: &[u8]| {
    let Ok(css) = std::str::from_utf8(data) else {
        return;
    };
    let mut cache = BuildCache::new();
    let first = adapt_css_for_replay(css, &mut cache);
    let second = adapt_css_for_replay(css, &mut cache);
    assert_eq!(first, second);
    assert_eq!(cache.len(), 1);
    if !css.contains(":hover") && !css.contains("-device-") {
        assert_eq!(first, css);
    }
});
