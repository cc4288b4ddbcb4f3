// crates/swiftclip-media/src/helpers/seek.rs
//
// Every demuxer seek goes through here so the soft-fail policy lives in one
// place.
//
// Background:
//   On Windows `avformat_seek_file` returns EPERM when called on a
//   freshly-opened context with max_ts = 0, and some containers refuse random
//   access altogether. A failed seek leaves the demuxer where it was; both
//   callers cope with that (the decoder's window filter drops pre-roll, the
//   copier re-bases on whatever video sample comes first), so failure is a
//   warning rather than an error.
//
// Seeks are always backward (`..=ts`): they land on the sync sample at or
// before the target, never after it.

use ffmpeg_the_third as ffmpeg;
use tracing::warn;

/// Seek `ictx` so the next packet is the sync sample at or before `target_us`.
///
/// `fresh` = nothing has been read since the context was opened; a seek to
/// 0 is then skipped because the demuxer is already there.
///
/// Returns `false` when the demuxer refused the seek.
pub fn seek_to_us(
    ictx:      &mut ffmpeg::format::context::Input,
    target_us: i64,
    fresh:     bool,
    label:     &str,
) -> bool {
    let ts = target_us.max(0);
    if ts == 0 && fresh {
        return true;
    }

    // AV_TIME_BASE is 1/1_000_000, so µs go straight through.
    match ictx.seek(ts, ..=ts) {
        Ok(()) => true,
        Err(e) => {
            warn!(label, target_us = ts, "seek failed, continuing from current position: {e}");
            false
        }
    }
}
