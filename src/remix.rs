//! In-place channel count conversion for interleaved canonical frames.

/// Convert `frames` interleaved frames from `in_channels` to `out_channels` in place.
///
/// Extra output channels are zero filled; surplus input channels are dropped. `buffer` must
/// hold at least `frames * max(in_channels, out_channels)` samples.
pub fn remix(buffer: &mut [i64], in_channels: usize, out_channels: usize, frames: usize) {
    if in_channels == out_channels || frames == 0 {
        return;
    }
    debug_assert!(buffer.len() >= frames * in_channels.max(out_channels));

    if out_channels > in_channels {
        // backwards so unread source frames are never overwritten
        for frame in (0..frames).rev() {
            let src = frame * in_channels;
            let dst = frame * out_channels;
            buffer.copy_within(src..src + in_channels, dst);
            buffer[dst + in_channels..dst + out_channels].fill(0);
        }
    } else {
        for frame in 0..frames {
            let src = frame * in_channels;
            let dst = frame * out_channels;
            buffer.copy_within(src..src + out_channels, dst);
        }
    }
}
