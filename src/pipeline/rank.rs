//! Brightness ranking

use crate::capture::Frame;

/// Number of frames on a contact sheet.
pub const TOP_K: usize = 9;

/// Pick the `k` brightest frames, brightest first.
///
/// Equal scores keep capture order, so the result is deterministic for a
/// given snapshot. Returns `None` when fewer than `k` frames are available.
pub fn select_top_k(frames: &[Frame], k: usize) -> Option<Vec<Frame>> {
    if frames.len() < k {
        return None;
    }

    let mut scored: Vec<(u64, &Frame)> = frames.iter().map(|f| (f.brightness(), f)).collect();
    // Stable sort: ties stay in capture order
    scored.sort_by(|a, b| b.0.cmp(&a.0));

    Some(scored.into_iter().take(k).map(|(_, f)| f.clone()).collect())
}
