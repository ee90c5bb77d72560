// SPDX-License-Identifier: MPL-2.0

//! Reference-counted video frames
//!
//! A [`FrameBuffer`] is a cheap handle: cloning it creates another reference
//! to the same pixel storage, never a pixel copy. Timestamps and time base
//! belong to the handle, so each holder may retime its own reference.
//!
//! Pixel storage is only ever mutated through [`FrameBuffer::make_writable`],
//! which detaches the handle onto a private copy whenever another holder can
//! still observe the storage.

use super::hw::{HardwareSurface, HwFramesRef, SurfaceMemory};
use super::timebase::Rational;
use crate::errors::FrameError;
use std::fmt;
use std::sync::Arc;

/// Software pixel layouts understood by the media path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Y plane followed by interleaved UV at half resolution
    Nv12,
    /// Y, U and V planes, chroma at half resolution
    I420,
}

impl PixelFormat {
    /// Total buffer size of a tightly packed frame
    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        let luma = width as usize * height as usize;
        match self {
            PixelFormat::Nv12 | PixelFormat::I420 => luma + luma / 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PixelFormat::Nv12 => "NV12",
            PixelFormat::I420 => "I420",
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Format tag of a frame: CPU memory or opaque device memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    Software(PixelFormat),
    Hardware { sw_format: PixelFormat },
}

/// Tightly packed planar image in CPU memory
#[derive(Clone, PartialEq, Eq)]
pub struct SoftwareImage {
    format: PixelFormat,
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl SoftwareImage {
    /// Wrap pixel data, validating dimensions and size
    pub fn new(format: PixelFormat, width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameError> {
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(FrameError::InvalidDimensions { width, height });
        }
        let expected = format.frame_size(width, height);
        if data.len() != expected {
            return Err(FrameError::InvalidLayout {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            format,
            width,
            height,
            data,
        })
    }

    /// Mid-gray NV12/I420 image of the given size
    pub fn blank(format: PixelFormat, width: u32, height: u32) -> Result<Self, FrameError> {
        let luma = width as usize * height as usize;
        let mut data = vec![128u8; format.frame_size(width, height)];
        data[..luma].fill(16);
        Self::new(format, width, height, data)
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    fn luma_len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Luma plane
    pub fn y(&self) -> &[u8] {
        &self.data[..self.luma_len()]
    }

    /// Chroma data following the luma plane (UV interleaved for NV12,
    /// U then V for I420)
    pub fn chroma(&self) -> &[u8] {
        &self.data[self.luma_len()..]
    }

    /// Luma and chroma planes for in-place writes
    pub fn planes_mut(&mut self) -> (&mut [u8], &mut [u8]) {
        let luma = self.luma_len();
        self.data.split_at_mut(luma)
    }
}

impl fmt::Debug for SoftwareImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareImage")
            .field("format", &self.format)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

#[derive(Debug)]
enum FrameStorage {
    Software(SoftwareImage),
    Hardware(HardwareSurface),
}

/// Shared handle to one decoded video frame
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    storage: Arc<FrameStorage>,
    pts: i64,
    time_base: Rational,
}

impl FrameBuffer {
    pub fn from_software(image: SoftwareImage, pts: i64, time_base: Rational) -> Self {
        Self {
            storage: Arc::new(FrameStorage::Software(image)),
            pts,
            time_base,
        }
    }

    pub fn from_hardware(surface: HardwareSurface, pts: i64, time_base: Rational) -> Self {
        Self {
            storage: Arc::new(FrameStorage::Hardware(surface)),
            pts,
            time_base,
        }
    }

    pub fn width(&self) -> u32 {
        match &*self.storage {
            FrameStorage::Software(image) => image.width,
            FrameStorage::Hardware(surface) => surface.width(),
        }
    }

    pub fn height(&self) -> u32 {
        match &*self.storage {
            FrameStorage::Software(image) => image.height,
            FrameStorage::Hardware(surface) => surface.height(),
        }
    }

    pub fn format(&self) -> FrameFormat {
        match &*self.storage {
            FrameStorage::Software(image) => FrameFormat::Software(image.format),
            FrameStorage::Hardware(surface) => FrameFormat::Hardware {
                sw_format: surface.frames.sw_format,
            },
        }
    }

    pub fn is_hardware(&self) -> bool {
        matches!(&*self.storage, FrameStorage::Hardware(_))
    }

    /// Presentation timestamp in [`Self::time_base`] ticks
    pub fn pts(&self) -> i64 {
        self.pts
    }

    pub fn set_pts(&mut self, pts: i64) {
        self.pts = pts;
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn set_time_base(&mut self, time_base: Rational) {
        self.time_base = time_base;
    }

    /// Rescale the timestamp into another time base
    pub fn retime(&mut self, time_base: Rational) {
        self.pts = Rational::rescale(self.pts, self.time_base, time_base);
        self.time_base = time_base;
    }

    /// Number of handles currently sharing this frame's storage
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.storage)
    }

    /// Whether both handles point at the same pixel storage
    pub fn shares_storage_with(&self, other: &FrameBuffer) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }

    pub fn software(&self) -> Option<&SoftwareImage> {
        match &*self.storage {
            FrameStorage::Software(image) => Some(image),
            FrameStorage::Hardware(_) => None,
        }
    }

    pub fn hardware(&self) -> Option<&HardwareSurface> {
        match &*self.storage {
            FrameStorage::Software(_) => None,
            FrameStorage::Hardware(surface) => Some(surface),
        }
    }

    /// Frame pool of a hardware frame
    pub fn hw_frames(&self) -> Option<&HwFramesRef> {
        self.hardware().map(|surface| &surface.frames)
    }

    /// Exclusive access to the pixels, detaching from other holders first.
    ///
    /// Shared software storage is deep-copied so no other holder ever sees
    /// the write. Emulated hardware surfaces are treated the same way; real
    /// device memory is not CPU writable.
    pub fn make_writable(&mut self) -> Result<&mut SoftwareImage, FrameError> {
        if Arc::get_mut(&mut self.storage).is_none() {
            let private = match &*self.storage {
                FrameStorage::Software(image) => FrameStorage::Software(image.clone()),
                FrameStorage::Hardware(surface) => match &surface.memory {
                    SurfaceMemory::Emulated(image) => FrameStorage::Hardware(HardwareSurface {
                        frames: Arc::clone(&surface.frames),
                        memory: SurfaceMemory::Emulated(image.clone()),
                    }),
                    SurfaceMemory::DmaBuf { .. } => return Err(FrameError::NotCpuAccessible),
                },
            };
            self.storage = Arc::new(private);
        }

        match Arc::get_mut(&mut self.storage) {
            Some(FrameStorage::Software(image)) => Ok(image),
            Some(FrameStorage::Hardware(HardwareSurface {
                memory: SurfaceMemory::Emulated(image),
                ..
            })) => Ok(image),
            _ => Err(FrameError::NotCpuAccessible),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray(width: u32, height: u32) -> FrameBuffer {
        let image = SoftwareImage::blank(PixelFormat::Nv12, width, height).unwrap();
        FrameBuffer::from_software(image, 0, Rational::MICROS)
    }

    #[test]
    fn test_clone_shares_storage() {
        let a = gray(16, 8);
        let b = a.clone();
        assert!(a.shares_storage_with(&b));
        assert_eq!(a.ref_count(), 2);
        drop(b);
        assert_eq!(a.ref_count(), 1);
    }

    #[test]
    fn test_write_detaches_shared_frame() {
        let original = gray(16, 8);
        let mut copy = original.clone();

        copy.make_writable().unwrap().data_mut()[0] = 235;

        assert!(!copy.shares_storage_with(&original));
        assert_eq!(original.software().unwrap().data()[0], 16);
        assert_eq!(copy.software().unwrap().data()[0], 235);
    }

    #[test]
    fn test_write_in_place_when_unique() {
        let mut frame = gray(16, 8);
        let before = frame.software().unwrap().data().as_ptr();
        let after = frame.make_writable().unwrap().data().as_ptr();
        assert_eq!(before, after);
    }

    #[test]
    fn test_layout_validation() {
        let err = SoftwareImage::new(PixelFormat::Nv12, 16, 8, vec![0; 10]).unwrap_err();
        assert_eq!(
            err,
            FrameError::InvalidLayout {
                expected: 192,
                actual: 10
            }
        );
        assert!(SoftwareImage::new(PixelFormat::Nv12, 15, 8, vec![0; 180]).is_err());
    }

    #[test]
    fn test_timestamp_is_per_handle() {
        let mut a = gray(16, 8);
        a.set_pts(1_000_000);
        let mut b = a.clone();
        b.retime(Rational::new(1, 1000));
        assert_eq!(b.pts(), 1000);
        assert_eq!(a.pts(), 1_000_000);
    }
}
