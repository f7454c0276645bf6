//! Re-readable request body.

use std::io::{self, Read};

use bytes::Bytes;

/// An owned request body with a read offset.
///
/// Request scrubbers always see bodies of this type, so they can rewrite
/// `data` directly. Reading advances `read_offset`; [`Body::rewind`] makes
/// the same bytes readable again for the real send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Body {
    pub data: Vec<u8>,
    pub read_offset: usize,
}

impl Body {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            read_offset: 0,
        }
    }

    /// Drain a one-shot stream into memory.
    pub fn from_reader<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Ok(Self::new(data))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Replace the contents and reset the read offset.
    pub fn set_data(&mut self, data: impl Into<Vec<u8>>) {
        self.data = data.into();
        self.read_offset = 0;
    }

    pub fn rewind(&mut self) {
        self.read_offset = 0;
    }

    /// Fresh copy of the contents with the offset at zero.
    pub fn duplicate(&self) -> Self {
        Self::new(self.data.clone())
    }
}

impl Read for Body {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let start = self.read_offset.min(self.data.len());
        let remaining = &self.data[start..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.read_offset = start + n;
        Ok(n)
    }
}

impl From<Vec<u8>> for Body {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl From<&[u8]> for Body {
    fn from(data: &[u8]) -> Self {
        Self::new(data)
    }
}

impl From<&str> for Body {
    fn from(data: &str) -> Self {
        Self::new(data.as_bytes())
    }
}

impl From<String> for Body {
    fn from(data: String) -> Self {
        Self::new(data.into_bytes())
    }
}

impl From<Bytes> for Body {
    fn from(data: Bytes) -> Self {
        Self::new(data.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_advances_offset_until_exhausted() {
        let mut body = Body::new("test data");

        let mut buf = [0u8; 5];
        assert_eq!(body.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"test ");
        assert_eq!(body.read_offset, 5);

        let mut buf = [0u8; 10];
        let n = body.read(&mut buf).unwrap();
        assert_eq!(n, 4);
        assert_eq!(&buf[..n], b"data");
        assert_eq!(body.read_offset, 9);

        assert_eq!(body.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn rewind_allows_second_read() {
        let mut body = Body::new("payload");
        let mut first = String::new();
        body.read_to_string(&mut first).unwrap();

        body.rewind();
        let mut second = String::new();
        body.read_to_string(&mut second).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn set_data_resets_offset() {
        let mut body = Body::new("my Secret");
        let mut sink = Vec::new();
        body.read_to_end(&mut sink).unwrap();

        body.set_data("redacted");
        assert_eq!(body.read_offset, 0);
        assert_eq!(body.len(), 8);
    }

    #[test]
    fn from_reader_surfaces_read_errors() {
        struct Failing;
        impl Read for Failing {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::Other, "MY ERROR"))
            }
        }
        let err = Body::from_reader(Failing).unwrap_err();
        assert!(err.to_string().contains("MY ERROR"));
    }
}
