//! Decoded video frames and per-frame sharpness measurement.

use facegate_core::raster;

/// One decoded frame: tightly-packed RGB24 plus its index in the clip.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    index: usize,
}

impl VideoFrame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, index: usize) -> Self {
        debug_assert_eq!(data.len(), (width * height * 3) as usize);
        Self {
            data,
            width,
            height,
            index,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Position of this frame in decode order, starting at 0.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn to_gray(&self) -> Vec<u8> {
        raster::rgb_to_gray(&self.data, self.width, self.height)
    }

    /// Sharpness as the variance of the 4-neighbor Laplacian over the
    /// grayscale frame. Flat frames score 0; motion blur scores low.
    pub fn sharpness(&self) -> f32 {
        laplacian_variance(&self.to_gray(), self.width as usize, self.height as usize)
    }
}

/// Variance of the Laplacian response over interior pixels.
pub(crate) fn laplacian_variance(gray: &[u8], width: usize, height: usize) -> f32 {
    if width < 3 || height < 3 {
        return 0.0;
    }

    let n = ((width - 2) * (height - 2)) as f64;
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let c = gray[y * width + x] as f64;
            let lap = 4.0 * c
                - gray[(y - 1) * width + x] as f64
                - gray[(y + 1) * width + x] as f64
                - gray[y * width + x - 1] as f64
                - gray[y * width + x + 1] as f64;
            sum += lap;
            sum_sq += lap * lap;
        }
    }

    let mean = sum / n;
    ((sum_sq / n) - mean * mean).max(0.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_frame_zero_sharpness() {
        let frame = VideoFrame::new(vec![100u8; 32 * 32 * 3], 32, 32, 0);
        assert_eq!(frame.sharpness(), 0.0);
    }

    #[test]
    fn test_checkerboard_sharper_than_gradient() {
        let w = 32usize;
        let mut checker = vec![0u8; w * w * 3];
        let mut gradient = vec![0u8; w * w * 3];
        for y in 0..w {
            for x in 0..w {
                let c = if (x + y) % 2 == 0 { 255 } else { 0 };
                let g = (x * 255 / w) as u8;
                for ch in 0..3 {
                    checker[(y * w + x) * 3 + ch] = c;
                    gradient[(y * w + x) * 3 + ch] = g;
                }
            }
        }
        let sharp = VideoFrame::new(checker, w as u32, w as u32, 0).sharpness();
        let soft = VideoFrame::new(gradient, w as u32, w as u32, 1).sharpness();
        assert!(sharp > soft);
        assert!(soft >= 0.0);
    }

    #[test]
    fn test_laplacian_tiny_frame() {
        assert_eq!(laplacian_variance(&[0, 0, 0, 0], 2, 2), 0.0);
    }

    #[test]
    fn test_to_gray_length() {
        let frame = VideoFrame::new(vec![50u8; 8 * 4 * 3], 8, 4, 0);
        assert_eq!(frame.to_gray().len(), 32);
    }
}
