use bytes::Bytes;

/// Still-image encoding of an extracted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageEncoding {
    Jpeg,
    Png,
}

impl ImageEncoding {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageEncoding::Jpeg => "image/jpeg",
            ImageEncoding::Png => "image/png",
        }
    }
}

/// A decoded still drawn from the source video. Immutable once extracted.
///
/// `index` is the position in the sampled sequence (contiguous from 0);
/// `timestamp` is seconds from the start of the video, derived from the
/// native frame position so sampling stride does not distort it.
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: usize,
    pub timestamp: f64,
    pub image: Bytes,
    pub encoding: ImageEncoding,
}

impl Frame {
    pub fn new(index: usize, timestamp: f64, image: Bytes, encoding: ImageEncoding) -> Self {
        Self {
            index,
            timestamp,
            image,
            encoding,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cloning_a_frame_shares_the_image_buffer() {
        let frame = Frame::new(0, 0.0, Bytes::from_static(b"\xff\xd8\xff"), ImageEncoding::Jpeg);
        let copy = frame.clone();
        // Bytes clones are reference-counted views over the same allocation.
        assert_eq!(frame.image.as_ptr(), copy.image.as_ptr());
    }

    #[test]
    fn mime_types_match_encodings() {
        assert_eq!(ImageEncoding::Jpeg.mime_type(), "image/jpeg");
        assert_eq!(ImageEncoding::Png.mime_type(), "image/png");
    }
}
