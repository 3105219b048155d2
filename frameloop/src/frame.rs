use crate::PixelFormat;

/**
    A decoded, converted frame ready for display.

    Rows are tightly packed: `stride == width * bytes_per_pixel`, so `data`
    holds exactly `height * stride` bytes.
*/
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Interleaved pixel data
    pub data: Vec<u8>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Packed pixel format of `data`
    pub format: PixelFormat,
    /// Position of this frame in its session, starting at zero
    pub sequence: u64,
}

impl Frame {
    /**
        Allocate a zeroed frame buffer.

        Returns `None` if `format` is not a packed format.
    */
    pub fn alloc(width: u32, height: u32, format: PixelFormat) -> Option<Self> {
        let bpp = format.bytes_per_pixel()?;
        Some(Self {
            data: vec![0; width as usize * height as usize * bpp],
            width,
            height,
            format,
            sequence: 0,
        })
    }

    /// Bytes per row.
    pub fn stride(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel().unwrap_or(0)
    }

    /// Byte size the buffer must have for its dimensions and format.
    pub fn expected_len(&self) -> usize {
        self.stride() * self.height as usize
    }

    /// One row of pixel data.
    pub fn row(&self, y: u32) -> &[u8] {
        let stride = self.stride();
        let start = y as usize * stride;
        &self.data[start..start + stride]
    }

    /**
        Mutable row access for decode services writing into the buffer.
    */
    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let stride = self.stride();
        let start = y as usize * stride;
        &mut self.data[start..start + stride]
    }

    /**
        Copy `height` rows from a strided source plane into this frame.

        Decoders and scalers usually pad their rows; `src_stride` is the
        padded length, of which only `self.stride()` bytes per row are kept.
        Returns false, leaving the frame untouched, if `src` is too short to
        hold every row.
    */
    #[must_use]
    pub fn copy_from_strided(&mut self, src: &[u8], src_stride: usize) -> bool {
        let stride = self.stride();
        let rows = self.height as usize;
        if rows == 0 || stride == 0 {
            return true;
        }
        if src_stride < stride || (rows - 1) * src_stride + stride > src.len() {
            return false;
        }
        for (y, row) in self.data.chunks_exact_mut(stride).take(rows).enumerate() {
            let start = y * src_stride;
            row.copy_from_slice(&src[start..start + stride]);
        }
        true
    }

    /**
        The pixel at (x, y) as RGBA, whatever the packed format.
    */
    pub fn rgba_at(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offsets = self.format.channel_offsets()?;
        let bpp = self.format.bytes_per_pixel()?;
        let px = &self.row(y)[x as usize * bpp..(x as usize + 1) * bpp];
        let pick = |o: Option<usize>, default| o.map_or(default, |i| px[i]);
        Some([
            pick(offsets[0], 0),
            pick(offsets[1], 0),
            pick(offsets[2], 0),
            pick(offsets[3], 255),
        ])
    }

    /**
        Convert to a tightly packed RGBA buffer (for image encoders).
    */
    pub fn to_rgba(&self) -> Vec<u8> {
        if self.format == PixelFormat::Rgba {
            return self.data.clone();
        }
        let mut out = Vec::with_capacity(self.width as usize * self.height as usize * 4);
        for y in 0..self.height {
            for x in 0..self.width {
                out.extend_from_slice(&self.rgba_at(x, y).unwrap_or([0, 0, 0, 255]));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_sizes_buffer() {
        let frame = Frame::alloc(64, 64, PixelFormat::Rgba).unwrap();
        assert_eq!(frame.data.len(), 64 * 64 * 4);
        assert_eq!(frame.stride(), 256);
        assert_eq!(frame.expected_len(), frame.data.len());

        let rgb = Frame::alloc(10, 3, PixelFormat::Rgb24).unwrap();
        assert_eq!(rgb.data.len(), 90);

        assert!(Frame::alloc(64, 64, PixelFormat::Yuv420p).is_none());
    }

    #[test]
    fn copy_from_strided_drops_padding() {
        let mut frame = Frame::alloc(2, 2, PixelFormat::Rgb24).unwrap();
        // 6 bytes of pixels + 2 bytes padding per row
        let src = [1, 2, 3, 4, 5, 6, 0, 0, 7, 8, 9, 10, 11, 12, 0, 0];
        assert!(frame.copy_from_strided(&src, 8));
        assert_eq!(frame.data, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
        assert_eq!(frame.row(1), &[7, 8, 9, 10, 11, 12]);

        // the last row needs no padding
        let mut frame = Frame::alloc(2, 2, PixelFormat::Rgb24).unwrap();
        assert!(frame.copy_from_strided(&src[..14], 8));
        assert_eq!(frame.row(1), &[7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn short_source_plane_is_rejected() {
        let mut frame = Frame::alloc(2, 2, PixelFormat::Rgb24).unwrap();
        let src = [1, 2, 3, 4, 5, 6, 0, 0, 7, 8, 9];
        assert!(!frame.copy_from_strided(&src, 8));
        assert_eq!(frame.data, vec![0; 12]);

        // a stride narrower than a row cannot be right either
        let src = [1; 12];
        assert!(!frame.copy_from_strided(&src, 4));
        assert_eq!(frame.data, vec![0; 12]);
    }

    #[test]
    fn rgba_conversion_reorders_channels() {
        let mut frame = Frame::alloc(1, 1, PixelFormat::Bgra).unwrap();
        frame.data.copy_from_slice(&[30, 20, 10, 255]);
        assert_eq!(frame.rgba_at(0, 0), Some([10, 20, 30, 255]));
        assert_eq!(frame.to_rgba(), vec![10, 20, 30, 255]);
        assert_eq!(frame.rgba_at(1, 0), None);

        let mut rgb = Frame::alloc(1, 1, PixelFormat::Bgr24).unwrap();
        rgb.row_mut(0).copy_from_slice(&[3, 2, 1]);
        assert_eq!(rgb.to_rgba(), vec![1, 2, 3, 255]);
    }
}
