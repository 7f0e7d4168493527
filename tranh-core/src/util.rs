use anyhow::Result;
use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::{DType, Device, Tensor};
use image::imageops::FilterType;
use image::{GrayImage, RgbImage};

use crate::DeviceMap;

pub fn select_best_device(device_map: DeviceMap) -> Result<Device> {
    match device_map {
        DeviceMap::ForceCpu => Ok(Device::Cpu),
        DeviceMap::Ordinal(ordinal) if cuda_is_available() => Ok(Device::new_cuda(ordinal)?),
        DeviceMap::Ordinal(ordinal) if metal_is_available() => Ok(Device::new_metal(ordinal)?),
        DeviceMap::Ordinal(_) => {
            #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
            {
                tracing::warn!("running on CPU, to run on GPU(metal) build with `--features metal`");
            }
            #[cfg(not(all(target_os = "macos", target_arch = "aarch64")))]
            {
                tracing::warn!("running on CPU, to run on GPU build with `--features cuda`");
            }
            Ok(Device::Cpu)
        }
    }
}

/// Decodes uploaded bytes into a three-channel image, dropping any alpha.
pub fn decode_image(bytes: &[u8]) -> crate::Result<RgbImage> {
    let image = image::load_from_memory(bytes)
        .map_err(|e| crate::Error::validation(format!("not a decodable image: {e}")))?;
    Ok(image.to_rgb8())
}

/// Converts a tensor with shape (3, height, width) and dtype u8 into an RGB image.
pub fn tensor_to_image(img: &Tensor) -> Result<RgbImage> {
    let (channels, height, width) = img.dims3()?;
    if channels != 3 {
        anyhow::bail!("tensor_to_image expects an image with 3 channels, got {channels}");
    }
    let img = img.permute((1, 2, 0))?.flatten_all()?;
    let pixels = img.to_vec1::<u8>()?;
    RgbImage::from_raw(width as u32, height as u32, pixels)
        .ok_or_else(|| anyhow::anyhow!("error converting tensor to image buffer"))
}

/// Resizes `img` to exactly `width`x`height` and converts it into a
/// (1, 3, height, width) f32 tensor scaled to [-1, 1], the VAE's input range.
pub fn image_to_tensor(img: &RgbImage, width: usize, height: usize, device: &Device) -> Result<Tensor> {
    let resized = image::imageops::resize(img, width as u32, height as u32, FilterType::CatmullRom);
    let tensor = Tensor::from_vec(resized.into_raw(), (height, width, 3), &Device::Cpu)?
        .permute((2, 0, 1))?
        .to_dtype(DType::F32)?
        .affine(2. / 255., -1.)?
        .unsqueeze(0)?
        .to_device(device)?;
    Ok(tensor)
}

/// Downsamples a mask image to latent resolution. Pixels whose luminance is
/// at least half intensity become 1.0 (regenerate), everything else 0.0 (keep).
pub fn latent_mask(mask: &RgbImage, latent_width: usize, latent_height: usize) -> Vec<f32> {
    let luma: GrayImage = image::DynamicImage::ImageRgb8(mask.clone()).to_luma8();
    let resized = image::imageops::resize(
        &luma,
        latent_width as u32,
        latent_height as u32,
        FilterType::Triangle,
    );
    resized
        .into_raw()
        .into_iter()
        .map(|v| if v >= 128 { 1.0 } else { 0.0 })
        .collect()
}

/// Latent mask as a (1, 1, h, w) tensor, ready to broadcast over latent channels.
pub fn latent_mask_tensor(
    mask: &RgbImage,
    latent_width: usize,
    latent_height: usize,
    device: &Device,
    dtype: DType,
) -> Result<Tensor> {
    let values = latent_mask(mask, latent_width, latent_height);
    let tensor = Tensor::from_vec(values, (1, 1, latent_height, latent_width), device)?
        .to_dtype(dtype)?;
    Ok(tensor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::io::Cursor;

    #[test]
    fn decode_rejects_garbage() {
        let err = decode_image(b"definitely not a png").unwrap_err();
        assert!(matches!(err, crate::Error::Validation(_)));
    }

    #[test]
    fn decode_drops_alpha() {
        let rgba = image::RgbaImage::from_pixel(3, 2, image::Rgba([10, 20, 30, 0]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgba8(rgba)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        let decoded = decode_image(&bytes).unwrap();
        assert_eq!(decoded.dimensions(), (3, 2));
        assert_eq!(decoded.get_pixel(0, 0), &Rgb([10, 20, 30]));
    }

    #[test]
    fn image_tensor_shape_and_range() {
        let img = RgbImage::from_pixel(5, 7, Rgb([255, 0, 255]));
        let tensor = image_to_tensor(&img, 16, 8, &Device::Cpu).unwrap();
        assert_eq!(tensor.dims(), &[1, 3, 8, 16]);
        let values = tensor.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(values.iter().all(|v| (*v - 1.0).abs() < 1e-5 || (*v + 1.0).abs() < 1e-5));
    }

    #[test]
    fn tensor_round_trips_to_image() {
        let data: Vec<u8> = (0..3 * 2 * 4).map(|v| v as u8).collect();
        let tensor = Tensor::from_vec(data, (3, 2, 4), &Device::Cpu).unwrap();
        let img = tensor_to_image(&tensor).unwrap();
        assert_eq!(img.dimensions(), (4, 2));
        // channel-major input: pixel (0,0) takes element 0 of each channel plane
        assert_eq!(img.get_pixel(0, 0), &Rgb([0, 8, 16]));
    }

    #[test]
    fn tensor_to_image_rejects_wrong_channel_count() {
        let tensor = Tensor::zeros((4, 2, 2), DType::U8, &Device::Cpu).unwrap();
        assert!(tensor_to_image(&tensor).is_err());
    }

    #[test]
    fn mask_thresholds_white_as_regenerate() {
        let mut mask = RgbImage::from_pixel(16, 16, Rgb([0, 0, 0]));
        for y in 0..16 {
            for x in 8..16 {
                mask.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        let latent = latent_mask(&mask, 2, 2);
        assert_eq!(latent, vec![0.0, 1.0, 0.0, 1.0]);
    }
}
