//! Branch-weight hints for the dispatch hot path.

#[cold]
fn off_path() {
    std::hint::black_box(())
}

/// Hint that `b` is almost always `true`.
#[inline]
pub(crate) fn likely(b: bool) -> bool {
    if !b {
        off_path();
    }
    b
}

/// Hint that `b` is almost always `false`.
#[inline]
pub(crate) fn unlikely(b: bool) -> bool {
    if b {
        off_path();
    }
    b
}
