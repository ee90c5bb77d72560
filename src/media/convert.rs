// SPDX-License-Identifier: MPL-2.0

//! CPU pixel conversions and the software crop/scale kernel
//!
//! All images are tightly packed (stride == width). Color math is BT.601
//! limited range in 7-bit fixed point.

use super::frame::{PixelFormat, SoftwareImage};
use super::zoom::CropRect;
use crate::errors::FrameError;
use image::RgbImage;

/// Convert between the two planar layouts (no-op copy if already `target`)
pub fn to_format(image: &SoftwareImage, target: PixelFormat) -> SoftwareImage {
    match (image.format(), target) {
        (PixelFormat::Nv12, PixelFormat::I420) => nv12_to_i420(image),
        (PixelFormat::I420, PixelFormat::Nv12) => i420_to_nv12(image),
        _ => image.clone(),
    }
}

fn nv12_to_i420(image: &SoftwareImage) -> SoftwareImage {
    let chroma = image.chroma();
    let quarter = chroma.len() / 2;
    let mut data = Vec::with_capacity(image.data().len());
    data.extend_from_slice(image.y());
    data.extend(chroma.iter().step_by(2));
    data.extend(chroma.iter().skip(1).step_by(2));
    debug_assert_eq!(data.len(), image.y().len() + 2 * quarter);
    rebuild(PixelFormat::I420, image, data)
}

fn i420_to_nv12(image: &SoftwareImage) -> SoftwareImage {
    let chroma = image.chroma();
    let (u, v) = chroma.split_at(chroma.len() / 2);
    let mut data = Vec::with_capacity(image.data().len());
    data.extend_from_slice(image.y());
    for (u, v) in u.iter().zip(v) {
        data.push(*u);
        data.push(*v);
    }
    rebuild(PixelFormat::Nv12, image, data)
}

fn rebuild(format: PixelFormat, like: &SoftwareImage, data: Vec<u8>) -> SoftwareImage {
    // Same dimensions and same total size, so the layout is always valid
    match SoftwareImage::new(format, like.width(), like.height(), data) {
        Ok(image) => image,
        Err(_) => like.clone(),
    }
}

/// Packed YUYV 4:2:2 to NV12; chroma of each row pair is averaged
pub fn yuyv_to_nv12(data: &[u8], width: u32, height: u32) -> Result<SoftwareImage, FrameError> {
    let (w, h) = (width as usize, height as usize);
    let expected = w * h * 2;
    if data.len() < expected {
        return Err(FrameError::InvalidLayout {
            expected,
            actual: data.len(),
        });
    }

    let mut out = vec![0u8; PixelFormat::Nv12.frame_size(width, height)];
    let (y_plane, uv_plane) = out.split_at_mut(w * h);

    for row in 0..h {
        let src = &data[row * w * 2..(row + 1) * w * 2];
        for x in 0..w {
            y_plane[row * w + x] = src[x * 2];
        }
    }

    for pair in 0..h / 2 {
        let top = &data[pair * 2 * w * 2..];
        let bottom = &data[(pair * 2 + 1) * w * 2..];
        for cx in 0..w / 2 {
            let base = cx * 4;
            let u = (top[base + 1] as u16 + bottom[base + 1] as u16 + 1) / 2;
            let v = (top[base + 3] as u16 + bottom[base + 3] as u16 + 1) / 2;
            uv_plane[pair * w + cx * 2] = u as u8;
            uv_plane[pair * w + cx * 2 + 1] = v as u8;
        }
    }

    SoftwareImage::new(PixelFormat::Nv12, width, height, out)
}

/// RGB to NV12, chroma sampled from the top-left pixel of each 2x2 block
pub fn rgb_to_nv12(rgb: &RgbImage) -> Result<SoftwareImage, FrameError> {
    let (width, height) = (rgb.width() & !1, rgb.height() & !1);
    let (w, h) = (width as usize, height as usize);
    let mut out = vec![0u8; PixelFormat::Nv12.frame_size(width, height)];
    let (y_plane, uv_plane) = out.split_at_mut(w * h);

    for y in 0..h {
        for x in 0..w {
            let p = rgb.get_pixel(x as u32, y as u32).0;
            let (r, g, b) = (p[0] as i32, p[1] as i32, p[2] as i32);
            y_plane[y * w + x] = (((66 * r + 129 * g + 25 * b + 128) >> 8) + 16).clamp(0, 255) as u8;

            if y % 2 == 0 && x % 2 == 0 {
                let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
                let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
                let idx = (y / 2) * w + x;
                uv_plane[idx] = u.clamp(0, 255) as u8;
                uv_plane[idx + 1] = v.clamp(0, 255) as u8;
            }
        }
    }

    SoftwareImage::new(PixelFormat::Nv12, width, height, out)
}

/// NV12 (or I420) to RGB for still encoding
pub fn to_rgb(image: &SoftwareImage) -> Result<RgbImage, String> {
    let nv12 = to_format(image, PixelFormat::Nv12);
    let width = nv12.width() as usize;
    let height = nv12.height() as usize;
    let y_plane = nv12.y();
    let uv_plane = nv12.chroma();

    let mut rgb_data = vec![0u8; width * height * 3];

    for y_idx in 0..height {
        let uv_row_start = (y_idx / 2) * width;
        let rgb_row_start = y_idx * width * 3;

        for x_idx in (0..width).step_by(2) {
            let uv_offset = uv_row_start + x_idx;
            let u = uv_plane[uv_offset] as i32 - 128;
            let v = uv_plane[uv_offset + 1] as i32 - 128;

            let r_v = (179 * v) >> 7;
            let g_uv = ((44 * u) >> 7) + ((91 * v) >> 7);
            let b_u = (227 * u) >> 7;

            for dx in 0..2 {
                let luma = ((y_plane[y_idx * width + x_idx + dx] as i32 - 16) * 149) >> 7;
                let out = rgb_row_start + (x_idx + dx) * 3;
                rgb_data[out] = (luma + r_v).clamp(0, 255) as u8;
                rgb_data[out + 1] = (luma - g_uv).clamp(0, 255) as u8;
                rgb_data[out + 2] = (luma + b_u).clamp(0, 255) as u8;
            }
        }
    }

    RgbImage::from_raw(width as u32, height as u32, rgb_data)
        .ok_or_else(|| "Failed to create RGB image from buffer".to_string())
}

/// Crop `rect` out of an NV12 image and point-sample it to `out_w` x `out_h`
pub fn crop_scale_nv12(
    image: &SoftwareImage,
    rect: CropRect,
    out_w: u32,
    out_h: u32,
) -> Result<SoftwareImage, FrameError> {
    let src = to_format(image, PixelFormat::Nv12);
    let src_w = src.width() as usize;
    let (ow, oh) = (out_w as usize, out_h as usize);
    let (cx, cy) = (rect.x as usize, rect.y as usize);
    let (cw, ch) = (rect.width as usize, rect.height as usize);

    let mut out = vec![0u8; PixelFormat::Nv12.frame_size(out_w, out_h)];
    let (y_out, uv_out) = out.split_at_mut(ow * oh);

    let x_map: Vec<usize> = (0..ow).map(|x| cx + x * cw / ow).collect();
    for y in 0..oh {
        let sy = cy + y * ch / oh;
        let src_row = &src.y()[sy * src_w..(sy + 1) * src_w];
        let dst_row = &mut y_out[y * ow..(y + 1) * ow];
        for (dst, &sx) in dst_row.iter_mut().zip(&x_map) {
            *dst = src_row[sx];
        }
    }

    let (cw2, ch2) = (cw / 2, ch / 2);
    let (ow2, oh2) = (ow / 2, oh / 2);
    let src_uv = src.chroma();
    for y in 0..oh2 {
        let sy = cy / 2 + y * ch2 / oh2;
        for x in 0..ow2 {
            let sx = cx / 2 + x * cw2 / ow2;
            let s = sy * src_w + sx * 2;
            let d = y * ow + x * 2;
            uv_out[d] = src_uv[s];
            uv_out[d + 1] = src_uv[s + 1];
        }
    }

    SoftwareImage::new(PixelFormat::Nv12, out_w, out_h, out)
}
