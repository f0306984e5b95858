//! Conversions between 8-bit spectrogram images and diffusion tensors.
//!
//! ```text
//! image -> tensor:  x = p / 255 * 2 - 1
//! tensor -> image:  p = round(clamp(x / 2 + 0.5, 0, 1) * 255)
//! ```
//!
//! Tensors are `[1, C, H, W]` with `H` = mel rows and `W` = frame columns.
//! Only channel 0 is written back to the image.

use candle_core::{DType, Device, IndexOp, Tensor};
use image::GrayImage;

use crate::{Error, Result};

/// Normalize an image to a `[1, channels, H, W]` tensor in `[-1, 1]`.
///
/// Multi-channel models receive the same plane on every channel.
pub fn image_to_tensor(image: &GrayImage, channels: usize, device: &Device) -> Result<Tensor> {
    let (width, height) = image.dimensions();
    let plane: Vec<f32> = image
        .as_raw()
        .iter()
        .map(|&p| p as f32 / 255.0 * 2.0 - 1.0)
        .collect();
    let plane = Tensor::from_vec(plane, (1, 1, height as usize, width as usize), device)?;
    if channels == 1 {
        Ok(plane)
    } else {
        Ok(plane.repeat((1, channels, 1, 1))?)
    }
}

/// Denormalize channel 0 of a `[1, C, H, W]` tensor to an 8-bit image.
pub fn tensor_to_image(tensor: &Tensor) -> Result<GrayImage> {
    let (_, _, height, width) = tensor.dims4()?;
    let plane = tensor
        .i((0, 0))?
        .to_dtype(DType::F32)?
        .to_device(&Device::Cpu)?
        .flatten_all()?
        .to_vec1::<f32>()?;
    let pixels = plane.into_iter().map(to_pixel).collect();
    GrayImage::from_raw(width as u32, height as u32, pixels)
        .ok_or_else(|| Error::Image(format!("cannot build {width}x{height} image")))
}

fn to_pixel(x: f32) -> u8 {
    ((x / 2.0 + 0.5).clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Load a grayscale spectrogram image from disk (any format `image` reads).
pub fn read_image(path: impl AsRef<std::path::Path>) -> Result<GrayImage> {
    Ok(image::open(path)?.to_luma8())
}

/// Write a spectrogram image; format follows the extension.
pub fn write_image(path: impl AsRef<std::path::Path>, image: &GrayImage) -> Result<()> {
    image.save(path)?;
    Ok(())
}
