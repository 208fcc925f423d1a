/*!
Image frame data.

A frame is the row-major pixel payload of one acquired image, each pixel a
little-endian signed 32-bit integer, together with the dimensions announced
in its header.
*/

/// Bytes per pixel in a frame payload
pub const BYTES_PER_PIXEL: usize = 4;

/// One acquired image as transferred by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFrame {
    height: i32,
    width: i32,
    data: Vec<u8>,
}

impl ImageFrame {
    pub fn new(height: i32, width: i32, data: Vec<u8>) -> Self {
        Self {
            height,
            width,
            data,
        }
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    /// Raw payload bytes exactly as received
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Decoded pixel values in payload order
    pub fn pixels(&self) -> impl Iterator<Item = i32> + '_ {
        self.data
            .chunks_exact(BYTES_PER_PIXEL)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
    }

    /// Pixel rows as announced by the header dimensions
    ///
    /// Rows that the payload does not fully cover are not yielded.
    pub fn rows(&self) -> impl Iterator<Item = Vec<i32>> + '_ {
        let width = usize::try_from(self.width).unwrap_or(0);
        let height = usize::try_from(self.height).unwrap_or(0);
        // chunks_exact panics on zero; a zero-width frame yields no rows
        let row_bytes = (width * BYTES_PER_PIXEL).max(1);
        self.data
            .chunks_exact(row_bytes)
            .take(if width == 0 { 0 } else { height })
            .map(|row| {
                row.chunks_exact(BYTES_PER_PIXEL)
                    .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_of(height: i32, width: i32, pixels: &[i32]) -> ImageFrame {
        let data = pixels.iter().flat_map(|p| p.to_le_bytes()).collect();
        ImageFrame::new(height, width, data)
    }

    #[test]
    fn test_pixels_decode_little_endian() {
        let frame = frame_of(1, 3, &[1, -1, 65536]);
        assert_eq!(frame.pixels().collect::<Vec<_>>(), vec![1, -1, 65536]);
        assert_eq!(frame.len(), 12);
    }

    #[test]
    fn test_rows_follow_dimensions() {
        let frame = frame_of(2, 3, &[1, 2, 3, 4, 5, 6]);
        let rows: Vec<_> = frame.rows().collect();
        assert_eq!(rows, vec![vec![1, 2, 3], vec![4, 5, 6]]);
    }

    #[test]
    fn test_rows_short_payload_and_degenerate_dims() {
        let frame = frame_of(3, 2, &[1, 2, 3]);
        assert_eq!(frame.rows().count(), 1);

        let frame = frame_of(2, 0, &[1, 2]);
        assert_eq!(frame.rows().count(), 0);

        let frame = ImageFrame::new(-1, -1, Vec::new());
        assert!(frame.is_empty());
        assert_eq!(frame.rows().count(), 0);
    }
}
