// crates/swiftclip-media/src/helpers/planes.rs
//
// Row copies between packed byte buffers and strided ffmpeg frame planes.
//
// ffmpeg frame rows may carry padding (stride ≥ row_bytes); the rest of the
// pipeline works on packed RGBA (`RgbaImage`), so every frame crossing the
// boundary goes through one of these.

use ffmpeg_the_third::util::frame::video::Video as VideoFrame;

/// Copy `rows` rows of `row_bytes` out of a strided plane.
pub fn destripe(src: &[u8], stride: usize, row_bytes: usize, rows: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(row_bytes * rows);
    for row in 0..rows {
        let start = row * stride;
        out.extend_from_slice(&src[start..start + row_bytes]);
    }
    out
}

/// Inverse of `destripe`: write packed rows into a strided plane.
pub fn restripe(packed: &[u8], dst: &mut [u8], stride: usize, row_bytes: usize, rows: usize) {
    for row in 0..rows {
        dst[row * stride..row * stride + row_bytes]
            .copy_from_slice(&packed[row * row_bytes..row * row_bytes + row_bytes]);
    }
}

/// Packed RGBA bytes from plane 0 of an RGBA frame.
pub fn pack_rgba(frame: &VideoFrame, width: u32, height: u32) -> Vec<u8> {
    destripe(frame.data(0), frame.stride(0), width as usize * 4, height as usize)
}

/// Fill plane 0 of an RGBA frame from packed bytes.
pub fn unpack_rgba(packed: &[u8], frame: &mut VideoFrame, width: u32, height: u32) {
    let stride = frame.stride(0);
    restripe(packed, frame.data_mut(0), stride, width as usize * 4, height as usize);
}
