use std::sync::Once;

use hostbuf::{BackingId, BufferValue};

/// Initialize test logging once. `RUST_LOG=trace` shows grant/release
/// traffic from the arbitration layer.
pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// A typed-view value over `backing` with u32 elements.
#[allow(dead_code)]
pub fn u32_view(backing: BackingId, byte_offset: usize, byte_length: usize) -> BufferValue {
    BufferValue::TypedView {
        backing,
        byte_offset,
        byte_length,
        stride: 4,
    }
}
