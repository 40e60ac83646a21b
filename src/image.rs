use std::{
    fs,
    io::{self, Write},
    path::Path,
};

use ndarray::Array3;

/// An 8-bit RGB image stored as `(height, width, channel)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pixels: Array3<u8>,
}

impl Image {
    pub fn new(pixels: Array3<u8>) -> Self {
        debug_assert_eq!(pixels.shape()[2], 3);
        Self { pixels }
    }

    /// Returns a black `width` x `height` image.
    pub fn black(width: usize, height: usize) -> Self {
        Self::new(Array3::zeros((height, width, 3)))
    }

    pub fn width(&self) -> usize {
        self.pixels.shape()[1]
    }

    pub fn height(&self) -> usize {
        self.pixels.shape()[0]
    }

    pub fn pixels(&self) -> &Array3<u8> {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut Array3<u8> {
        &mut self.pixels
    }
}

/// Reads conditioning images and writes rendered samples.
pub trait ImageIo {
    fn read(&self, path: &Path) -> io::Result<Image>;

    fn write(&self, path: &Path, image: &Image) -> io::Result<()>;

    /// File extension used for written samples, without the dot.
    fn extension(&self) -> &str;
}

/// Binary netpbm (`P6`) images.
#[derive(Debug, Default, Clone, Copy)]
pub struct PpmImageIo;

impl ImageIo for PpmImageIo {
    fn read(&self, path: &Path) -> io::Result<Image> {
        decode_ppm(&fs::read(path)?)
    }

    fn write(&self, path: &Path, image: &Image) -> io::Result<()> {
        let mut out = Vec::with_capacity(image.pixels.len() + 16);
        write!(out, "P6\n{} {}\n255\n", image.width(), image.height())?;
        out.extend(image.pixels.iter());
        fs::write(path, out)
    }

    fn extension(&self) -> &str {
        "ppm"
    }
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

fn decode_ppm(bytes: &[u8]) -> io::Result<Image> {
    let mut pos = 0;
    let mut fields = [0usize; 3];

    if !bytes.starts_with(b"P6") {
        return Err(invalid("not a binary PPM (P6) image"));
    }
    pos += 2;

    for field in &mut fields {
        // Skip whitespace and `#` comments between header fields.
        loop {
            match bytes.get(pos) {
                Some(b) if b.is_ascii_whitespace() => pos += 1,
                Some(b'#') => {
                    while bytes.get(pos).is_some_and(|&b| b != b'\n') {
                        pos += 1;
                    }
                }
                _ => break,
            }
        }

        let start = pos;
        while bytes.get(pos).is_some_and(u8::is_ascii_digit) {
            pos += 1;
        }

        *field = std::str::from_utf8(&bytes[start..pos])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| invalid("malformed PPM header"))?;
    }

    let [width, height, max] = fields;
    if max != 255 {
        return Err(invalid(format!("unsupported PPM max value {max}")));
    }

    // Exactly one whitespace byte separates the header from the raster.
    pos += 1;
    let end = width
        .checked_mul(height)
        .and_then(|n| n.checked_mul(3))
        .and_then(|n| n.checked_add(pos))
        .ok_or_else(|| invalid("PPM dimensions overflow"))?;
    let raster = bytes
        .get(pos..end)
        .ok_or_else(|| invalid("truncated PPM raster"))?;

    let pixels = Array3::from_shape_vec((height, width, 3), raster.to_vec())
        .map_err(|e| invalid(e.to_string()))?;

    Ok(Image::new(pixels))
}
