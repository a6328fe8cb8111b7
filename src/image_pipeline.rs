//! Artwork decoding, scaling, and cover styling.
//!
//! Everything here is the opaque "render" primitive the resolution pipeline
//! calls: given a file (or bytes) and a target edge, produce a display-ready
//! image or a decode error.

use std::fs;
use std::path::Path;

use image::{imageops::FilterType, DynamicImage, GenericImageView, Rgba, RgbaImage};
use zune_core::{colorspace::ColorSpace, options::DecoderOptions};
use zune_jpeg::JpegDecoder;

use crate::config::CoverStyle;

/// Edge of thumbnails produced for remotely fetched covers.
pub const REMOTE_THUMB_EDGE_PX: u32 = 148;

const BORDER_PX: u32 = 1;
const BORDER_COLOR: Rgba<u8> = Rgba([40, 40, 40, 255]);

pub const IMAGE_EXTENSIONS: [&str; 9] = [
    "jpg", "jpeg", "png", "gif", "bmp", "webp", "tif", "tiff", "ico",
];

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|supported| ext.eq_ignore_ascii_case(supported))
        })
        .unwrap_or(false)
}

fn looks_like_jpeg(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0xff && bytes[1] == 0xd8
}

fn decode_jpeg_non_strict(bytes: &[u8]) -> Option<DynamicImage> {
    if !looks_like_jpeg(bytes) {
        return None;
    }

    let options = DecoderOptions::new_cmd()
        .set_strict_mode(false)
        .jpeg_set_out_colorspace(ColorSpace::RGBA);
    let mut decoder = JpegDecoder::new_with_options(bytes, options);
    let pixels = decoder.decode().ok()?;
    let (width, height) = decoder.dimensions()?;
    let image = RgbaImage::from_raw(width as u32, height as u32, pixels)?;
    Some(DynamicImage::ImageRgba8(image))
}

/// Decodes in-memory image data, retrying sloppy JPEGs with a lenient decoder.
pub fn decode_image_bytes(bytes: &[u8]) -> Result<DynamicImage, String> {
    match image::load_from_memory(bytes) {
        Ok(decoded) => Ok(decoded),
        Err(primary) => decode_jpeg_non_strict(bytes)
            .ok_or_else(|| format!("Unable to decode image data: {primary}")),
    }
}

pub fn decode_image(path: &Path) -> Result<DynamicImage, String> {
    if let Ok(decoded) = image::open(path) {
        return Ok(decoded);
    }
    let bytes = fs::read(path)
        .map_err(|err| format!("Unable to read image {}: {}", path.display(), err))?;
    decode_image_bytes(&bytes)
        .map_err(|err| format!("Unable to load image {}: {}", path.display(), err))
}

fn fit_to_max_edge(width: u32, height: u32, max_edge: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (1, 1);
    }
    let clamped = max_edge.max(1);
    if width >= height {
        let scaled_height =
            ((u64::from(height) * u64::from(clamped)) + (u64::from(width) / 2)) / u64::from(width);
        (clamped, scaled_height.max(1) as u32)
    } else {
        let scaled_width =
            ((u64::from(width) * u64::from(clamped)) + (u64::from(height) / 2)) / u64::from(height);
        (scaled_width.max(1) as u32, clamped)
    }
}

/// Scales `decoded` so its longer edge equals `edge`, preserving aspect ratio.
pub fn scale_to_edge(decoded: DynamicImage, edge: u32) -> DynamicImage {
    let (width, height) = decoded.dimensions();
    let (target_width, target_height) = fit_to_max_edge(width, height, edge);
    if (target_width, target_height) == (width, height) {
        return decoded;
    }
    decoded.resize_exact(target_width, target_height, FilterType::Lanczos3)
}

fn add_border(image: &DynamicImage) -> RgbaImage {
    let (width, height) = image.dimensions();
    let mut bordered = RgbaImage::from_pixel(
        width + BORDER_PX * 2,
        height + BORDER_PX * 2,
        BORDER_COLOR,
    );
    image::imageops::overlay(
        &mut bordered,
        &image.to_rgba8(),
        i64::from(BORDER_PX),
        i64::from(BORDER_PX),
    );
    bordered
}

fn pad_to_square(image: RgbaImage, edge: u32) -> RgbaImage {
    let (width, height) = image.dimensions();
    if width == edge && height == edge {
        return image;
    }
    let mut canvas = RgbaImage::from_pixel(edge, edge, Rgba([0, 0, 0, 0]));
    let x = i64::from(edge.saturating_sub(width) / 2);
    let y = i64::from(edge.saturating_sub(height) / 2);
    image::imageops::overlay(&mut canvas, &image, x, y);
    canvas
}

/// Applies the configured cosmetic treatment to an already scaled cover.
pub fn style_cover(scaled: DynamicImage, style: CoverStyle, edge: u32) -> DynamicImage {
    match style {
        CoverStyle::Plain => scaled,
        CoverStyle::Bordered => {
            let bordered = add_border(&scaled);
            DynamicImage::ImageRgba8(pad_to_square(bordered, edge + BORDER_PX * 2))
        }
    }
}

/// Decodes `path`, scales it into an `edge`x`edge` box and styles it.
pub fn render(path: &Path, edge: u32, style: CoverStyle) -> Result<DynamicImage, String> {
    let decoded = decode_image(path)?;
    Ok(style_cover(scale_to_edge(decoded, edge), style, edge))
}

pub fn render_bytes(bytes: &[u8], edge: u32, style: CoverStyle) -> Result<DynamicImage, String> {
    let decoded = decode_image_bytes(bytes)?;
    Ok(style_cover(scale_to_edge(decoded, edge), style, edge))
}

/// Deletes a file that failed to decode, keeping zero-byte "no artwork" markers.
///
/// Returns `true` when the file was removed.
pub fn discard_corrupt_image(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(metadata) if metadata.len() == 0 => false,
        Ok(_) => fs::remove_file(path).is_ok(),
        Err(_) => false,
    }
}
