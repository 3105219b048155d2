use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use frameloop::{Frame, SessionId};
use image::RgbaImage;

/**
    Write the frame as a PNG named after the player, returning its path.
*/
pub fn save_png(dir: &Path, id: SessionId, frame: &Frame) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("cannot create snapshot dir '{}'", dir.display()))?;

    let image = RgbaImage::from_raw(frame.width, frame.height, frame.to_rgba())
        .context("frame buffer does not match its dimensions")?;

    let path = dir.join(format!("player-{:02}.png", id.get()));
    image
        .save(&path)
        .with_context(|| format!("cannot write '{}'", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use frameloop::PixelFormat;

    use super::*;

    #[test]
    fn writes_a_readable_png() {
        let dir = tempfile::tempdir().unwrap();
        let mut frame = Frame::alloc(4, 3, PixelFormat::Bgra).unwrap();
        // Blue in BGRA order.
        for pixel in frame.data.chunks_exact_mut(4) {
            pixel.copy_from_slice(&[255, 0, 0, 255]);
        }

        let path = save_png(&dir.path().join("shots"), SessionId::new(7), &frame).unwrap();
        assert!(path.ends_with("player-07.png"));

        let image = image::open(&path).unwrap().to_rgba8();
        assert_eq!(image.dimensions(), (4, 3));
        assert_eq!(image.get_pixel(2, 1).0, [0, 0, 255, 255]);
    }
}
