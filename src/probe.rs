//! Header-level image integrity probe.
//!
//! Files carrying an image extension are opened and their header decoded;
//! anything that does not yield real dimensions is rejected before storage.

use std::io::{BufRead, BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use flate2::read::ZlibDecoder;
use image::{ImageDecoder, ImageReader};

/// Extensions whose content must pass [`probe_image`] before being stored.
pub const IMAGE_EXTENSIONS: [&str; 6] = ["gif", "jpg", "jpeg", "bmp", "png", "swf"];

/// Container format recognised by the probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// Shockwave Flash movie.
    Swf,
    /// Any raster format decodable by the `image` crate.
    Raster(image::ImageFormat),
}

/// Header facts extracted from an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Detected container format.
    pub kind: ImageKind,
    /// Bits per channel, when the format has the notion.
    pub bits: Option<u8>,
}

impl ImageInfo {
    /// Applies the integrity rule for a file with extension `ext`.
    ///
    /// Dimensions must be non-zero, and `.gif` files must report a bit depth.
    pub fn passes_for_extension(&self, ext: &str) -> bool {
        if self.width == 0 || self.height == 0 {
            return false;
        }
        !(ext.eq_ignore_ascii_case("gif") && self.bits.is_none())
    }
}

/// Returns `true` when files with this extension go through the probe.
pub fn is_image_extension(ext: &str) -> bool {
    IMAGE_EXTENSIONS
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(ext))
}

/// Probes an image held in memory.
pub fn probe_bytes(data: &[u8]) -> Option<ImageInfo> {
    probe_image(Cursor::new(data))
}

/// Probes an image file on disk. Only the header is read.
pub fn probe_file(path: &Path) -> Option<ImageInfo> {
    let file = std::fs::File::open(path).ok()?;
    probe_image(BufReader::new(file))
}

/// Probes any seekable reader; `None` when the content is not a usable image.
pub fn probe_image<R: BufRead + Seek>(mut reader: R) -> Option<ImageInfo> {
    let mut signature = [0u8; 3];
    reader.read_exact(&mut signature).ok()?;
    match &signature {
        b"FWS" | b"CWS" => return probe_swf(reader, signature[0] == b'C'),
        _ => {}
    }
    reader.seek(SeekFrom::Start(0)).ok()?;

    let image_reader = ImageReader::new(reader).with_guessed_format().ok()?;
    let format = image_reader.format()?;
    let decoder = image_reader.into_decoder().ok()?;
    let (width, height) = decoder.dimensions();
    let color = decoder.color_type();
    let channels = u16::from(color.channel_count());
    let bits = (channels > 0)
        .then(|| color.bits_per_pixel() / channels)
        .and_then(|bits| u8::try_from(bits).ok())
        .filter(|bits| *bits > 0);

    Some(ImageInfo {
        width,
        height,
        kind: ImageKind::Raster(format),
        bits,
    })
}

/// Reads the frame RECT of an SWF header (the reader sits after the signature).
fn probe_swf<R: Read>(mut reader: R, compressed: bool) -> Option<ImageInfo> {
    // version byte + little-endian file length
    let mut preamble = [0u8; 5];
    reader.read_exact(&mut preamble).ok()?;

    // A RECT is at most 5 + 4 * 31 bits = 17 bytes.
    let mut rect = Vec::with_capacity(17);
    if compressed {
        ZlibDecoder::new(reader).take(17).read_to_end(&mut rect).ok()?;
    } else {
        reader.take(17).read_to_end(&mut rect).ok()?;
    }

    let mut bits = BitReader::new(&rect);
    let nbits = bits.read(5)?;
    let x_min = bits.read_signed(nbits)?;
    let x_max = bits.read_signed(nbits)?;
    let y_min = bits.read_signed(nbits)?;
    let y_max = bits.read_signed(nbits)?;

    // SWF coordinates are in twips.
    let width = u32::try_from((x_max - x_min) / 20).ok()?;
    let height = u32::try_from((y_max - y_min) / 20).ok()?;

    Some(ImageInfo {
        width,
        height,
        kind: ImageKind::Swf,
        bits: None,
    })
}

struct BitReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    fn read(&mut self, count: u32) -> Option<u32> {
        let mut value = 0u32;
        for _ in 0..count {
            let byte = *self.data.get(self.position / 8)?;
            let bit = (byte >> (7 - self.position % 8)) & 1;
            value = (value << 1) | u32::from(bit);
            self.position += 1;
        }
        Some(value)
    }

    fn read_signed(&mut self, count: u32) -> Option<i64> {
        if count == 0 {
            return Some(0);
        }
        let raw = i64::from(self.read(count)?);
        let sign = 1i64 << (count - 1);
        Some(if raw & sign != 0 { raw - (sign << 1) } else { raw })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_reader_decodes_signed_fields() {
        // 0b101_11 -> 3 bits "101" = -3, then 2 bits "11" = -1
        let mut bits = BitReader::new(&[0b1011_1000]);
        assert_eq!(bits.read_signed(3), Some(-3));
        assert_eq!(bits.read_signed(2), Some(-1));
    }

    #[test]
    fn garbage_is_not_an_image() {
        assert_eq!(probe_bytes(b"definitely not pixels"), None);
        assert_eq!(probe_bytes(b""), None);
    }

    #[test]
    fn gif_rule_requires_bit_depth() {
        let info = ImageInfo {
            width: 10,
            height: 10,
            kind: ImageKind::Swf,
            bits: None,
        };
        assert!(info.passes_for_extension("swf"));
        assert!(!info.passes_for_extension("GIF"));
    }
}
