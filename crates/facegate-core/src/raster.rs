//! Small raster helpers shared by the detection and embedding paths.

/// ITU-R BT.601 luma weights, fixed-point (sum = 256).
const LUMA_R: u32 = 77;
const LUMA_G: u32 = 150;
const LUMA_B: u32 = 29;

/// Convert a packed RGB buffer to 8-bit grayscale.
pub fn rgb_to_gray(rgb: &[u8], width: u32, height: u32) -> Vec<u8> {
    let n = (width * height) as usize;
    let mut gray = Vec::with_capacity(n);
    for px in rgb.chunks_exact(3).take(n) {
        let y = (LUMA_R * px[0] as u32 + LUMA_G * px[1] as u32 + LUMA_B * px[2] as u32) >> 8;
        gray.push(y as u8);
    }
    gray
}

/// Bilinear resize of a packed RGB buffer.
///
/// Uses pixel-center sampling for sub-pixel accuracy, matching the
/// letterbox path of the detector.
pub fn resize_rgb(
    rgb: &[u8],
    src_w: usize,
    src_h: usize,
    dst_w: usize,
    dst_h: usize,
) -> Vec<u8> {
    if src_w == 0 || src_h == 0 || dst_w == 0 || dst_h == 0 {
        return vec![0u8; dst_w * dst_h * 3];
    }

    let scale_x = src_w as f32 / dst_w as f32;
    let scale_y = src_h as f32 / dst_h as f32;
    let mut out = vec![0u8; dst_w * dst_h * 3];

    for y in 0..dst_h {
        let src_y = (y as f32 + 0.5) * scale_y - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, src_h as i32 - 1) as usize;
        let y1 = (y0 + 1).min(src_h - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for x in 0..dst_w {
            let src_x = (x as f32 + 0.5) * scale_x - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, src_w as i32 - 1) as usize;
            let x1 = (x0 + 1).min(src_w - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            for c in 0..3 {
                let tl = rgb[(y0 * src_w + x0) * 3 + c] as f32;
                let tr = rgb[(y0 * src_w + x1) * 3 + c] as f32;
                let bl = rgb[(y1 * src_w + x0) * 3 + c] as f32;
                let br = rgb[(y1 * src_w + x1) * 3 + c] as f32;

                let val = tl * (1.0 - fx) * (1.0 - fy)
                    + tr * fx * (1.0 - fy)
                    + bl * (1.0 - fx) * fy
                    + br * fx * fy;

                out[(y * dst_w + x) * 3 + c] = val.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    out
}
