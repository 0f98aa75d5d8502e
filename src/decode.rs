//! Decoding images into surface-sized RGBA8 buffers.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use fast_image_resize as fir;
use image::RgbaImage;
use tracing::debug;

use crate::error::DecodeFailure;
use crate::events::{DecodedImage, SurfaceSize};

/// Turns a file into pixels. Runs on the blocking pool, never on the manager task.
pub trait Decode: Send + Sync + 'static {
    fn decode(&self, path: &Path, surface: SurfaceSize) -> Result<DecodedImage, DecodeFailure>;
}

/// [`Decode`] backed by the `image` crate: EXIF orientation, then a fit
/// inside the surface preserving aspect ratio.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageDecoder;

impl Decode for ImageDecoder {
    fn decode(&self, path: &Path, surface: SurfaceSize) -> Result<DecodedImage, DecodeFailure> {
        let prepare = || -> Result<RgbaImage> {
            let img = decode_rgba8_apply_exif(path)?;
            let (w, h) = fit_within(img.width(), img.height(), surface);
            resize_rgba(&img, w, h)
        };
        let img = prepare().map_err(|err| DecodeFailure::new(path, format!("{err:#}")))?;
        let (width, height) = img.dimensions();
        debug!(path = %path.display(), width, height, "decoded");
        Ok(DecodedImage {
            path: path.to_path_buf(),
            width,
            height,
            pixels: img.into_raw(),
        })
    }
}

/// Largest size with the image's aspect ratio that fits inside `surface`.
pub fn fit_within(width: u32, height: u32, surface: SurfaceSize) -> (u32, u32) {
    if width == 0 || height == 0 || surface.width == 0 || surface.height == 0 {
        return (width.max(1), height.max(1));
    }
    let image_ratio = f64::from(width) / f64::from(height);
    let surface_ratio = f64::from(surface.width) / f64::from(surface.height);
    let (w, h) = if image_ratio > surface_ratio {
        let w = surface.width;
        (w, (f64::from(w) / image_ratio).round() as u32)
    } else {
        let h = surface.height;
        ((f64::from(h) * image_ratio).round() as u32, h)
    };
    (w.max(1), h.max(1))
}

fn decode_rgba8_apply_exif(path: &Path) -> Result<RgbaImage> {
    let img = image::ImageReader::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?
        .with_guessed_format()?
        .decode()
        .context("unsupported or corrupt image data")?;
    let mut img = img.to_rgba8();

    match read_orientation(path).unwrap_or(1) {
        2 => img = image::imageops::flip_horizontal(&img),
        3 => img = image::imageops::rotate180(&img),
        4 => img = image::imageops::flip_vertical(&img),
        5 => img = image::imageops::flip_horizontal(&image::imageops::rotate90(&img)),
        6 => img = image::imageops::rotate90(&img),
        7 => img = image::imageops::flip_horizontal(&image::imageops::rotate270(&img)),
        8 => img = image::imageops::rotate270(&img),
        _ => {}
    }
    Ok(img)
}

fn read_orientation(path: &Path) -> Option<u16> {
    let file = File::open(path).ok()?;
    let mut buf = BufReader::new(file);
    let exif = exif::Reader::new().read_from_container(&mut buf).ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    field.value.get_uint(0).map(|v| v as u16)
}

fn resize_rgba(source: &RgbaImage, target_w: u32, target_h: u32) -> Result<RgbaImage> {
    if target_w == 0 || target_h == 0 {
        bail!("resize dimensions must be positive");
    }
    if source.width() == target_w && source.height() == target_h {
        return Ok(source.clone());
    }

    let src_view = fir::images::ImageRef::new(
        source.width(),
        source.height(),
        source.as_raw(),
        fir::PixelType::U8x4,
    )
    .context("failed to create source view for resize")?;
    let mut dst_image = fir::images::Image::new(target_w, target_h, fir::PixelType::U8x4);
    let options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::CatmullRom));
    let mut resizer = fir::Resizer::new();
    resizer
        .resize(&src_view, &mut dst_image, Some(&options))
        .context("resize failed")?;
    RgbaImage::from_raw(target_w, target_h, dst_image.into_vec())
        .ok_or_else(|| anyhow!("failed to construct resized RGBA image"))
}
