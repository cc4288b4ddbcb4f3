// crates/swiftclip-core/src/helpers/geometry.rs
//
// 4×4 matrices for the texture-coordinate and position transforms handed to
// the GPU.
//
// Storage is column-major (element [c * 4 + r]) so the array can be uploaded
// to a WGSL `mat4x4<f32>` uniform unchanged.
//
// Texture space convention used throughout the engine:
//   (0,0) = top-left of the displayed frame, (1,1) = bottom-right.
// Crop rectangles are expressed in the same space, so a crop of
// (0.1, 0.1, 0.8, 0.8) keeps the centre 80 % of the picture.

use std::ops::Mul;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mat4(pub [f32; 16]);

impl Mat4 {
    pub const IDENTITY: Mat4 = Mat4([
        1.0, 0.0, 0.0, 0.0,
        0.0, 1.0, 0.0, 0.0,
        0.0, 0.0, 1.0, 0.0,
        0.0, 0.0, 0.0, 1.0,
    ]);

    pub fn translation(x: f32, y: f32, z: f32) -> Self {
        let mut m = Self::IDENTITY;
        m.0[12] = x;
        m.0[13] = y;
        m.0[14] = z;
        m
    }

    pub fn scaling(x: f32, y: f32, z: f32) -> Self {
        let mut m = Self::IDENTITY;
        m.0[0]  = x;
        m.0[5]  = y;
        m.0[10] = z;
        m
    }

    /// Rotation of texture space by a multiple of 90° about the frame centre.
    ///
    /// `degrees` is the container's display rotation (clockwise). Any value
    /// that is not a multiple of 90 is treated as 0; containers only ever
    /// carry quarter turns.
    pub fn orientation(degrees: i32) -> Self {
        let (c, s) = match degrees.rem_euclid(360) {
            90  => (0.0, 1.0),
            180 => (-1.0, 0.0),
            270 => (0.0, -1.0),
            _   => return Self::IDENTITY,
        };
        let mut rot = Self::IDENTITY;
        rot.0[0] = c;
        rot.0[1] = s;
        rot.0[4] = -s;
        rot.0[5] = c;
        Self::translation(0.5, 0.5, 0.0) * rot * Self::translation(-0.5, -0.5, 0.0)
    }

    /// Texture-space crop: `translate(x, y) × scale(w, h)`.
    ///
    /// ```
    /// use swiftclip_core::helpers::geometry::Mat4;
    /// let m = Mat4::crop(0.25, 0.5, 0.5, 0.5);
    /// assert_eq!(m.transform_point(0.0, 0.0), (0.25, 0.5));
    /// assert_eq!(m.transform_point(1.0, 1.0), (0.75, 1.0));
    /// ```
    pub fn crop(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self::translation(x, y, 0.0) * Self::scaling(w, h, 1.0)
    }

    /// Apply to the point `(x, y, 0, 1)` and return the projected `(x, y)`.
    pub fn transform_point(&self, x: f32, y: f32) -> (f32, f32) {
        let m = &self.0;
        let px = m[0] * x + m[4] * y + m[12];
        let py = m[1] * x + m[5] * y + m[13];
        let pw = m[3] * x + m[7] * y + m[15];
        if pw != 0.0 && pw != 1.0 { (px / pw, py / pw) } else { (px, py) }
    }

    /// Columns as nested arrays, the layout `bytemuck` uploads for `mat4x4<f32>`.
    pub fn to_cols_array_2d(&self) -> [[f32; 4]; 4] {
        let m = &self.0;
        [
            [m[0],  m[1],  m[2],  m[3]],
            [m[4],  m[5],  m[6],  m[7]],
            [m[8],  m[9],  m[10], m[11]],
            [m[12], m[13], m[14], m[15]],
        ]
    }
}

impl Default for Mat4 {
    fn default() -> Self { Self::IDENTITY }
}

impl Mul for Mat4 {
    type Output = Mat4;

    fn mul(self, rhs: Mat4) -> Mat4 {
        let a = &self.0;
        let b = &rhs.0;
        let mut out = [0.0f32; 16];
        for c in 0..4 {
            for r in 0..4 {
                out[c * 4 + r] = (0..4).map(|k| a[k * 4 + r] * b[c * 4 + k]).sum();
            }
        }
        Mat4(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: (f32, f32), b: (f32, f32)) -> bool {
        (a.0 - b.0).abs() < 1e-5 && (a.1 - b.1).abs() < 1e-5
    }

    #[test]
    fn identity_is_neutral() {
        let m = Mat4::crop(0.1, 0.2, 0.3, 0.4);
        assert_eq!(Mat4::IDENTITY * m, m);
        assert_eq!(m * Mat4::IDENTITY, m);
    }

    #[test]
    fn orientation_then_crop_applies_crop_first() {
        // Crop picks the top-left quarter; a 180° orientation then maps it to
        // the bottom-right quarter of the stored image.
        let st = Mat4::orientation(180) * Mat4::crop(0.0, 0.0, 0.5, 0.5);
        assert!(close(st.transform_point(0.0, 0.0), (1.0, 1.0)));
        assert!(close(st.transform_point(1.0, 1.0), (0.5, 0.5)));
    }

    #[test]
    fn quarter_turn_keeps_centre_fixed() {
        let m = Mat4::orientation(90);
        assert!(close(m.transform_point(0.5, 0.5), (0.5, 0.5)));
        assert!(close(m.transform_point(1.0, 0.5), (0.5, 1.0)));
        assert_eq!(Mat4::orientation(45), Mat4::IDENTITY);
    }
}
