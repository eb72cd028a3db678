use bytes::Bytes;

/// Maximum frames a single envelope may carry.
pub const MAX_ENVELOPE_FRAMES: usize = 64;

/// One logical message: an ordered sequence of opaque frames.
///
/// The envelope layer assigns no meaning to frame contents; higher layers
/// decide which frame is routing metadata, command or payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    frames: Vec<Bytes>,
}

impl Envelope {
    /// Build an envelope from its frames.
    pub fn from_frames(frames: Vec<Bytes>) -> Self {
        Self { frames }
    }

    /// Build a single-frame envelope.
    pub fn single(payload: impl Into<Bytes>) -> Self {
        Self {
            frames: vec![payload.into()],
        }
    }

    /// Number of frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// True if the envelope carries no frames.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Borrow all frames in order.
    pub fn frames(&self) -> &[Bytes] {
        &self.frames
    }

    /// Borrow a frame by index.
    pub fn frame(&self, index: usize) -> Option<&Bytes> {
        self.frames.get(index)
    }

    /// Consume the envelope and return its frames.
    pub fn into_frames(self) -> Vec<Bytes> {
        self.frames
    }

    /// Total payload bytes across all frames.
    pub fn payload_size(&self) -> usize {
        self.frames.iter().map(Bytes::len).sum()
    }
}

impl From<Vec<Bytes>> for Envelope {
    fn from(frames: Vec<Bytes>) -> Self {
        Self::from_frames(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors() {
        let env = Envelope::from_frames(vec![Bytes::from_static(b"a"), Bytes::from_static(b"bc")]);
        assert_eq!(env.len(), 2);
        assert!(!env.is_empty());
        assert_eq!(env.frame(0).unwrap().as_ref(), b"a");
        assert_eq!(env.frame(1).unwrap().as_ref(), b"bc");
        assert!(env.frame(2).is_none());
        assert_eq!(env.payload_size(), 3);
    }

    #[test]
    fn single_frame() {
        let env = Envelope::single("ping");
        assert_eq!(env.len(), 1);
        assert_eq!(env.frame(0).unwrap().as_ref(), b"ping");
    }

    #[test]
    fn into_frames_preserves_order() {
        let frames = vec![
            Bytes::from_static(b"one"),
            Bytes::from_static(b"two"),
            Bytes::from_static(b"three"),
        ];
        let env = Envelope::from_frames(frames.clone());
        assert_eq!(env.into_frames(), frames);
    }
}
