//! Host-side float images: the destination of cube readbacks, the source of
//! environment-map faces, and the encoding/persistence paths.

use crate::error::Error;
use rayon::prelude::*;
use serde::Serialize;
use std::{
    io::Write,
    path::{Path, PathBuf},
    thread::JoinHandle,
};

/// How the six cube faces are packed into one flattened 2-D image on
/// retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlattenLayout {
    /// 3×2 tight packing, faces in order front/back/right/left/up/down,
    /// row-major.
    Grid,
    /// 4×3 cross matching a physical cube unfolding.
    Unfolded,
}

impl FlattenLayout {
    /// Size of the flattened image in face tiles (columns, rows).
    pub fn tiles(&self) -> (u32, u32) {
        match self {
            FlattenLayout::Grid => (3, 2),
            FlattenLayout::Unfolded => (4, 3),
        }
    }

    /// Pixel offset of face `face` (0 = front, 1 = back, 2 = right,
    /// 3 = left, 4 = up, 5 = down) inside the flattened image, for faces of
    /// size `w`×`h`.
    pub fn face_offset(&self, face: u32, w: u32, h: u32) -> (u32, u32) {
        debug_assert!(face < 6);
        match self {
            FlattenLayout::Grid => ((face % 3) * w, (face / 3) * h),
            FlattenLayout::Unfolded => match face {
                0 => (2 * w, h),
                1 => (0, h),
                2 => (w, 0),
                3 => (w, 2 * h),
                4 => (w, h),
                _ => (3 * w, h),
            },
        }
    }
}

/// On-disk encoding of a [`HostImage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFormat {
    /// Tonemapped 8-bit RGBA PNG.
    Png,
    /// Radiance HDR (RGB, alpha dropped).
    Hdr,
    /// JSON object with dimensions and the raw float pixels.
    Json,
    /// Raw little-endian f32 pixel data, no header.
    Data,
}

impl StoreFormat {
    pub fn from_name(name: &str) -> Result<Self, Error> {
        match name {
            "png" => Ok(StoreFormat::Png),
            "hdr" => Ok(StoreFormat::Hdr),
            "json" => Ok(StoreFormat::Json),
            "data" => Ok(StoreFormat::Data),
            other => Err(Error::config(format!("unknown image format '{other}'"))),
        }
    }
}

/// A 4-channel 32-bit float image owned by the host.
#[derive(Debug, Clone, Serialize)]
pub struct HostImage {
    pub width: u32,
    pub height: u32,
    /// RGBA pixels, row-major, `4 * width * height` floats.
    pub pixels: Vec<f32>,
}

impl HostImage {
    /// Creates a zero-initialized image.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0.0; (width * height * 4) as usize],
        }
    }

    /// Wraps existing pixel data. The vector length must be
    /// `4 * width * height`.
    pub fn from_pixels(width: u32, height: u32, pixels: Vec<f32>) -> Self {
        assert_eq!(pixels.len(), (width * height * 4) as usize);
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Loads an image file and converts it to float RGBA.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let img = image::open(path)?.to_rgba32f();
        let (width, height) = (img.width(), img.height());
        Ok(Self {
            width,
            height,
            pixels: img.into_raw(),
        })
    }

    pub fn byte_size(&self) -> usize { self.pixels.len() * std::mem::size_of::<f32>() }

    /// Copies the tile at pixel offset `(ox, oy)` of size `w`×`h` out of
    /// this image.
    pub fn extract(&self, ox: u32, oy: u32, w: u32, h: u32) -> HostImage {
        assert!(ox + w <= self.width && oy + h <= self.height);
        let mut out = HostImage::new(w, h);
        for row in 0..h {
            let src = (((oy + row) * self.width + ox) * 4) as usize;
            let dst = (row * w * 4) as usize;
            out.pixels[dst..dst + (w * 4) as usize]
                .copy_from_slice(&self.pixels[src..src + (w * 4) as usize]);
        }
        out
    }

    /// Pastes `tile` into this image at pixel offset `(ox, oy)`.
    pub fn paste(&mut self, tile: &HostImage, ox: u32, oy: u32) {
        assert!(ox + tile.width <= self.width && oy + tile.height <= self.height);
        for row in 0..tile.height {
            let dst = (((oy + row) * self.width + ox) * 4) as usize;
            let src = (row * tile.width * 4) as usize;
            self.pixels[dst..dst + (tile.width * 4) as usize]
                .copy_from_slice(&tile.pixels[src..src + (tile.width * 4) as usize]);
        }
    }

    /// Encodes and writes the image. Blocking.
    pub fn write_to_file(&self, path: &Path, format: StoreFormat) -> Result<(), Error> {
        match format {
            StoreFormat::Png => {
                let bytes: Vec<u8> = self
                    .pixels
                    .par_iter()
                    .map(|v| (v.clamp(0.0, 1.0) * 255.0) as u8)
                    .collect();
                let buf =
                    image::RgbaImage::from_raw(self.width, self.height, bytes).ok_or_else(|| {
                        Error::ImageSave {
                            path: path.to_path_buf(),
                            reason: "pixel buffer does not match image dimensions".into(),
                        }
                    })?;
                buf.save(path)?;
            }
            StoreFormat::Hdr => {
                let rgb: Vec<image::Rgb<f32>> = self
                    .pixels
                    .par_chunks_exact(4)
                    .map(|px| image::Rgb([px[0], px[1], px[2]]))
                    .collect();
                let file = std::fs::File::create(path)?;
                let encoder = image::codecs::hdr::HdrEncoder::new(std::io::BufWriter::new(file));
                encoder
                    .encode(&rgb, self.width as usize, self.height as usize)
                    .map_err(Error::Image)?;
            }
            StoreFormat::Json => {
                let file = std::fs::File::create(path)?;
                serde_json::to_writer(std::io::BufWriter::new(file), self)?;
            }
            StoreFormat::Data => {
                let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
                file.write_all(bytemuck::cast_slice(&self.pixels))?;
            }
        }
        Ok(())
    }

    /// Hands the encode + write to a background thread, consuming the image.
    /// The returned handle yields the path on success; failures surface at
    /// join time.
    pub fn write_async(self, path: PathBuf, format: StoreFormat) -> JoinHandle<Result<PathBuf, Error>> {
        std::thread::spawn(move || {
            self.write_to_file(&path, format)?;
            Ok(path)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_offsets_are_row_major_3x2() {
        let l = FlattenLayout::Grid;
        assert_eq!(l.face_offset(0, 8, 8), (0, 0));
        assert_eq!(l.face_offset(1, 8, 8), (8, 0));
        assert_eq!(l.face_offset(2, 8, 8), (16, 0));
        assert_eq!(l.face_offset(3, 8, 8), (0, 8));
        assert_eq!(l.face_offset(4, 8, 8), (8, 8));
        assert_eq!(l.face_offset(5, 8, 8), (16, 8));
    }

    #[test]
    fn unfolded_offsets_do_not_overlap_and_fit_4x3() {
        let l = FlattenLayout::Unfolded;
        let (w, h) = (4u32, 4u32);
        let (tx, ty) = l.tiles();
        let mut seen = std::collections::HashSet::new();
        for face in 0..6 {
            let (ox, oy) = l.face_offset(face, w, h);
            assert!(ox + w <= tx * w && oy + h <= ty * h, "face {face} out of bounds");
            assert_eq!(ox % w, 0);
            assert_eq!(oy % h, 0);
            assert!(seen.insert((ox, oy)), "face {face} overlaps another face");
        }
    }

    fn test_face(w: u32, h: u32, seed: f32) -> HostImage {
        let pixels = (0..w * h * 4).map(|i| seed + i as f32).collect();
        HostImage::from_pixels(w, h, pixels)
    }

    #[test]
    fn grid_pack_round_trips_each_face() {
        let (w, h) = (4u32, 4u32);
        let faces: Vec<HostImage> = (0..6).map(|f| test_face(w, h, 1000.0 * f as f32)).collect();

        let layout = FlattenLayout::Grid;
        let (tx, ty) = layout.tiles();
        let mut flat = HostImage::new(tx * w, ty * h);
        for (i, face) in faces.iter().enumerate() {
            let (ox, oy) = layout.face_offset(i as u32, w, h);
            flat.paste(face, ox, oy);
        }

        for (i, face) in faces.iter().enumerate() {
            let (ox, oy) = layout.face_offset(i as u32, w, h);
            let out = flat.extract(ox, oy, w, h);
            assert_eq!(out.pixels, face.pixels, "face {i} did not round-trip");
        }
    }

    #[test]
    fn data_format_writes_raw_floats() {
        let img = test_face(2, 2, 0.0);
        let dir = std::env::temp_dir().join("cubevis_img_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("face.data");
        img.write_to_file(&path, StoreFormat::Data).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), img.byte_size());
        let floats: &[f32] = bytemuck::cast_slice(&bytes);
        assert_eq!(floats, img.pixels.as_slice());
    }

    #[test]
    fn async_save_reports_path_at_join() {
        let img = test_face(2, 2, 7.0);
        let dir = std::env::temp_dir().join("cubevis_img_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("face.json");
        let handle = img.write_async(path.clone(), StoreFormat::Json);
        let saved = handle.join().expect("save thread panicked").unwrap();
        assert_eq!(saved, path);
        assert!(path.exists());
    }
}
