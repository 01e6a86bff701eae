use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};
use ndarray::{ArrayView3, Axis};

use super::bounding_box::BoundingBox;

/// A single camera frame: contiguous 8-bit pixels in row-major order.
///
/// Pixel format conversion happens at the frame source boundary; the
/// decision engine only needs cropping and brightness statistics.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
    index: usize,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, channels: u8, index: usize) -> Self {
        debug_assert_eq!(
            data.len(),
            (width as usize) * (height as usize) * (channels as usize),
            "data length must equal width * height * channels"
        );
        Self {
            data,
            width,
            height,
            channels,
            index,
        }
    }

    /// Uniform frame filled with `value`, mostly useful for sources that
    /// only replay metadata.
    pub fn filled(width: u32, height: u32, channels: u8, value: u8, index: usize) -> Self {
        let len = (width as usize) * (height as usize) * (channels as usize);
        Self::new(vec![value; len], width, height, channels, index)
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

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn as_ndarray(&self) -> Option<ArrayView3<'_, u8>> {
        ArrayView3::from_shape(
            (
                self.height as usize,
                self.width as usize,
                self.channels as usize,
            ),
            &self.data,
        )
        .ok()
    }

    /// Mean luma in `[0, 255]`. Multi-channel frames use Rec. 601 weights
    /// over the first three channels.
    pub fn mean_luma(&self) -> f64 {
        let Some(pixels) = self.as_ndarray() else {
            return 0.0;
        };
        let count = (self.width as usize) * (self.height as usize);
        if count == 0 {
            return 0.0;
        }

        let rgb = self.channels >= 3;
        let total: f64 = pixels
            .lanes(Axis(2))
            .into_iter()
            .map(|px| {
                if rgb {
                    0.299 * px[0] as f64 + 0.587 * px[1] as f64 + 0.114 * px[2] as f64
                } else {
                    px[0] as f64
                }
            })
            .sum();
        total / count as f64
    }

    /// Square crop centered on `bbox`, clamped to frame bounds and resized
    /// to `size` x `size`. Returns `None` when the clamped crop is empty.
    pub fn face_crop(&self, bbox: &BoundingBox, size: u32) -> Option<Frame> {
        let src = self.as_ndarray()?;
        let fw = self.width as i64;
        let fh = self.height as i64;

        let (cx, cy) = bbox.center();
        let half = (bbox.width().max(bbox.height()) / 2.0).round() as i64;
        let (cx, cy) = (cx.round() as i64, cy.round() as i64);

        let x1 = (cx - half).clamp(0, fw) as usize;
        let y1 = (cy - half).clamp(0, fh) as usize;
        let x2 = (cx + half).clamp(0, fw) as usize;
        let y2 = (cy + half).clamp(0, fh) as usize;
        if x2 <= x1 || y2 <= y1 {
            return None;
        }

        let crop_w = (x2 - x1) as u32;
        let crop_h = (y2 - y1) as u32;
        let channels = self.channels as usize;
        let mut data = Vec::with_capacity((crop_w * crop_h) as usize * channels);
        for row in y1..y2 {
            for col in x1..x2 {
                for c in 0..channels {
                    data.push(src[[row, col, c]]);
                }
            }
        }

        Some(resize(data, crop_w, crop_h, self.channels, size, self.index))
    }
}

fn resize(data: Vec<u8>, width: u32, height: u32, channels: u8, size: u32, index: usize) -> Frame {
    if size == 0 || (width == size && height == size) {
        return Frame::new(data, width, height, channels, index);
    }
    match channels {
        3 => match RgbImage::from_raw(width, height, data) {
            Some(img) => {
                let out = imageops::resize(&img, size, size, FilterType::Triangle);
                Frame::new(out.into_raw(), size, size, 3, index)
            }
            None => Frame::filled(size, size, 3, 0, index),
        },
        1 => match GrayImage::from_raw(width, height, data) {
            Some(img) => {
                let out = imageops::resize(&img, size, size, FilterType::Triangle);
                Frame::new(out.into_raw(), size, size, 1, index)
            }
            None => Frame::filled(size, size, 1, 0, index),
        },
        _ => Frame::new(data, width, height, channels, index),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_construction_and_accessors() {
        let data = vec![0u8; 12];
        let frame = Frame::new(data.clone(), 2, 2, 3, 5);
        assert_eq!(frame.width(), 2);
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.channels(), 3);
        assert_eq!(frame.index(), 5);
        assert_eq!(frame.data(), &data[..]);
    }

    #[test]
    #[should_panic(expected = "data length must equal width * height * channels")]
    fn test_mismatched_data_length_panics_in_debug() {
        Frame::new(vec![0u8; 10], 2, 2, 3, 0);
    }

    #[test]
    fn test_mean_luma_of_uniform_rgb_frame() {
        let frame = Frame::filled(4, 4, 3, 100, 0);
        assert_relative_eq!(frame.mean_luma(), 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_mean_luma_of_grayscale_frame() {
        let frame = Frame::new(vec![0, 255, 0, 255], 2, 2, 1, 0);
        assert_relative_eq!(frame.mean_luma(), 127.5);
    }

    #[test]
    fn test_face_crop_is_resized_to_requested_size() {
        let frame = Frame::filled(200, 100, 3, 50, 3);
        let crop = frame
            .face_crop(&BoundingBox::new(40.0, 20.0, 100.0, 80.0, 0.9), 112)
            .unwrap();
        assert_eq!(crop.width(), 112);
        assert_eq!(crop.height(), 112);
        assert_eq!(crop.index(), 3);
        assert!(crop.data().iter().all(|v| (49..=51).contains(v)));
    }

    #[test]
    fn test_face_crop_clamps_at_frame_edge() {
        let frame = Frame::filled(100, 100, 3, 10, 0);
        let crop = frame
            .face_crop(&BoundingBox::new(-20.0, -20.0, 20.0, 20.0, 0.9), 0)
            .unwrap();
        assert_eq!(crop.width(), 20);
        assert_eq!(crop.height(), 20);
    }

    #[test]
    fn test_face_crop_outside_frame_is_none() {
        let frame = Frame::filled(100, 100, 3, 10, 0);
        assert!(frame
            .face_crop(&BoundingBox::new(200.0, 200.0, 260.0, 260.0, 0.9), 112)
            .is_none());
    }
}
