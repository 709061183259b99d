use image::error::{ImageError, UnsupportedErrorKind};
use image::RgbImage;
use ndarray::Array4;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const INPUT_SIZE: usize = 224;
pub const INPUT_SHAPE: [usize; 4] = [1, INPUT_SIZE, INPUT_SIZE, 3];

#[derive(Debug, thiserror::Error)]
pub enum PreprocessError {
    #[error("Could not decode image: {0}")]
    Decode(String),
    #[error("Unsupported channel layout: {0}")]
    UnsupportedChannel(String),
}

impl From<ImageError> for PreprocessError {
    fn from(err: ImageError) -> Self {
        match &err {
            ImageError::Unsupported(unsupported)
                if matches!(unsupported.kind(), UnsupportedErrorKind::Color(_)) =>
            {
                PreprocessError::UnsupportedChannel(err.to_string())
            }
            _ => PreprocessError::Decode(err.to_string()),
        }
    }
}

/// Batched, channel-last `f32` image in `[0, 1]`.
///
/// Tensors produced by an [`ImagePreprocessor`] are counted while alive and the
/// count is released on drop, whichever path the tensor leaves by.
#[derive(Debug)]
pub struct ImageTensor {
    data: Array4<f32>,
    live: Option<Arc<AtomicUsize>>,
}

impl ImageTensor {
    pub fn from_array(data: Array4<f32>) -> Self {
        Self { data, live: None }
    }

    pub fn zeros(shape: [usize; 4]) -> Self {
        Self::from_array(Array4::zeros(shape))
    }

    fn tracked(data: Array4<f32>, live: &Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self {
            data,
            live: Some(live.clone()),
        }
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn as_slice(&self) -> Option<&[f32]> {
        self.data.as_slice()
    }

    pub fn data(&self) -> &Array4<f32> {
        &self.data
    }
}

impl Drop for ImageTensor {
    fn drop(&mut self) {
        if let Some(live) = self.live.take() {
            live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[derive(Clone, Default)]
pub struct ImagePreprocessor {
    live: Arc<AtomicUsize>,
}

impl ImagePreprocessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tensors from this preprocessor that have not been dropped yet.
    pub fn live_tensors(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn preprocess(&self, bytes: &[u8]) -> Result<ImageTensor, PreprocessError> {
        let rgb = {
            let decoded = image::load_from_memory(bytes)?;
            decoded.to_rgb8()
        };
        if rgb.width() == 0 || rgb.height() == 0 {
            return Err(PreprocessError::Decode("image has no pixels".into()));
        }

        let data = resize_bilinear_normalized(&rgb, INPUT_SIZE, INPUT_SIZE);
        drop(rgb);
        Ok(ImageTensor::tracked(data, &self.live))
    }
}

/// Bilinear resize with corner-aligned sampling (`src = dst * in / out`, edges
/// clamped), writing `value / 255` straight into a `[1, out_h, out_w, 3]` array.
fn resize_bilinear_normalized(rgb: &RgbImage, out_h: usize, out_w: usize) -> Array4<f32> {
    let in_w = rgb.width() as usize;
    let in_h = rgb.height() as usize;
    let raw = rgb.as_raw();
    let pixel = |y: usize, x: usize, c: usize| raw[(y * in_w + x) * 3 + c] as f32;

    let h_scale = in_h as f32 / out_h as f32;
    let w_scale = in_w as f32 / out_w as f32;
    let mut out = Array4::<f32>::zeros((1, out_h, out_w, 3));

    for y in 0..out_h {
        let src_y = y as f32 * h_scale;
        let top = (src_y.floor() as usize).min(in_h - 1);
        let bottom = (top + 1).min(in_h - 1);
        let dy = src_y - top as f32;

        for x in 0..out_w {
            let src_x = x as f32 * w_scale;
            let left = (src_x.floor() as usize).min(in_w - 1);
            let right = (left + 1).min(in_w - 1);
            let dx = src_x - left as f32;

            for c in 0..3 {
                let top_value = pixel(top, left, c) + (pixel(top, right, c) - pixel(top, left, c)) * dx;
                let bottom_value =
                    pixel(bottom, left, c) + (pixel(bottom, right, c) - pixel(bottom, left, c)) * dx;
                out[[0, y, x, c]] = (top_value + (bottom_value - top_value) * dy) / 255.0;
            }
        }
    }
    out
}
