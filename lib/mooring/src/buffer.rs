use slice_deque::SliceDeque;
use std::io;

type ByteDeque = SliceDeque<u8>;

/// Outcome of a single ingress pass.
#[derive(Debug, Eq, PartialEq)]
pub struct Ingress {
    /// Bytes pulled off the reader.
    pub received: usize,
    /// The reader signalled end-of-stream.
    pub closed: bool,
}

/// A buffered FIFO byte queue. Bytes are appended at the tail (either copied
/// in or read off a transport) and consumed from the head once a parser has
/// claimed them.
pub struct Buffer {
    data: ByteDeque,
    soft_limit: usize,
}

impl Buffer {
    #[inline]
    pub fn new(soft_limit: usize) -> Buffer {
        let mut data = ByteDeque::new();
        data.reserve(soft_limit);
        Buffer { data, soft_limit }
    }

    /// The number of bytes in the buffer.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true in case the buffer is empty, false otherwise.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True while the buffered byte count stays under the soft limit. Used
    /// as the accept signal on the write side.
    #[inline]
    pub fn has_capacity(&self) -> bool {
        self.data.len() < self.soft_limit
    }

    /// Borrow the buffered bytes without consuming them. Parsers peek,
    /// decide whether a full unit is present, and only then `consume`.
    #[inline]
    pub fn peek(&self) -> &[u8] {
        self.data.as_slice()
    }

    /// Drop `count` bytes off the head after a parser has claimed them.
    #[inline]
    pub fn consume(&mut self, count: usize) {
        debug_assert!(count <= self.data.len());
        unsafe { self.data.move_head(count as isize) }
    }

    /// Append bytes at the tail.
    #[inline]
    pub fn extend(&mut self, bytes: &[u8]) {
        self.data.reserve(bytes.len());
        unsafe {
            self.data.tail_head_slice()[..bytes.len()].copy_from_slice(bytes);
            self.data.move_tail(bytes.len() as isize);
        }
    }

    #[inline]
    pub fn clear(&mut self) {
        let len = self.len() as isize;
        unsafe { self.data.move_head(len) };
    }

    /// Write the contents of the buffer to the supplied writer, advancing
    /// the head past everything the writer took.
    #[inline]
    pub fn egress<W: io::Write>(&mut self, mut writer: W) -> io::Result<usize> {
        let orig_len = self.data.len();

        while !self.data.is_empty() {
            let write_count = writer.write(&self.data)?;

            if write_count == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }

            self.consume(write_count);
        }

        Ok(orig_len)
    }

    /// Read data from the supplied reader until it blocks, closes, or the
    /// soft limit is reached. A closed reader is reported rather than folded
    /// into the byte count so the caller can tell EOF from a quiet line.
    #[inline]
    pub fn ingress<R: io::Read>(&mut self, mut reader: R) -> io::Result<Ingress> {
        let mut received = 0;

        while self.data.len() < self.soft_limit {
            self.data.reserve(4096);

            unsafe {
                let read_count = match reader.read(self.data.tail_head_slice()) {
                    Ok(count) => count,
                    Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                        return Ok(Ingress { received, closed: false });
                    }
                    Err(err) => return Err(err),
                };

                if read_count == 0 {
                    return Ok(Ingress { received, closed: true });
                }

                received += read_count;
                self.data.move_tail(read_count as isize);
            }
        }

        Ok(Ingress { received, closed: false })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::min;
    use std::io::Cursor;

    struct MockChannel {
        data: Vec<u8>,
        cursor: usize,
        chunk: usize,
        max_size: usize,
    }

    impl MockChannel {
        pub fn new(data: Vec<u8>, chunk: usize, max_size: usize) -> MockChannel {
            MockChannel {
                data,
                cursor: 0,
                chunk,
                max_size,
            }
        }
    }

    impl io::Read for MockChannel {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.cursor == self.data.len() {
                return Err(io::ErrorKind::WouldBlock.into());
            }

            let offset = min(min(self.chunk, buf.len()), self.data.len() - self.cursor);
            buf[..offset].copy_from_slice(&self.data[self.cursor..(self.cursor + offset)]);
            self.cursor += offset;
            Ok(offset)
        }
    }

    impl io::Write for MockChannel {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.data.len() == self.max_size {
                return Err(io::ErrorKind::WouldBlock.into());
            }

            let count = min(self.chunk, buf.len());
            self.data.extend(&buf[..count]);

            Ok(count)
        }

        fn flush(&mut self) -> io::Result<()> {
            unimplemented!()
        }
    }

    #[test]
    fn test_ingress_until_blocked() {
        let mock_data: Vec<_> = (0..2048).map(|item| item as u8).collect();
        let mut channel = MockChannel::new(mock_data.clone(), 500, mock_data.len());

        let mut buffer = Buffer::new(65536);
        let result = buffer.ingress(&mut channel).unwrap();

        assert_eq!(
            result,
            Ingress {
                received: mock_data.len(),
                closed: false
            }
        );
        assert_eq!(buffer.peek(), &mock_data[..]);
    }

    #[test]
    fn test_ingress_reports_eof() {
        let mut buffer = Buffer::new(65536);

        let result = buffer.ingress(Cursor::new(vec![1, 2, 3])).unwrap();

        assert_eq!(result, Ingress { received: 3, closed: true });
        assert_eq!(buffer.peek(), &[1, 2, 3]);
    }

    #[test]
    fn test_ingress_stops_at_soft_limit() {
        let mock_data = vec![7u8; 4096];
        let mut channel = MockChannel::new(mock_data, 4096, 4096);

        let mut buffer = Buffer::new(1024);
        let result = buffer.ingress(&mut channel).unwrap();

        assert!(!result.closed);
        assert!(buffer.len() >= 1024);
        assert!(!buffer.has_capacity());
    }

    #[test]
    fn test_peek_consume() {
        let mut buffer = Buffer::new(65536);
        buffer.extend(&[1, 2, 3, 4, 5]);

        assert_eq!(buffer.peek(), &[1, 2, 3, 4, 5]);

        buffer.consume(2);

        assert_eq!(buffer.peek(), &[3, 4, 5]);
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_egress_roundtrip() {
        let mut channel = MockChannel::new(Vec::new(), 500, 4096);
        let mut buffer = Buffer::new(65536);
        let payload: Vec<_> = (0..1500).map(|item| item as u8).collect();

        buffer.extend(&payload);
        let sent = buffer.egress(&mut channel).unwrap();

        assert_eq!(sent, payload.len());
        assert!(buffer.is_empty());
        assert_eq!(channel.data, payload);
    }

    #[test]
    fn test_egress_error_on_zero_write() {
        let mut zero_vec = vec![];
        let mut buffer = Buffer::new(65536);
        buffer.extend(&[1]);

        let result = buffer.egress(&mut zero_vec[..]);

        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::WriteZero);
    }

    #[test]
    fn test_egress_stops_on_wouldblock() {
        let mut channel = MockChannel::new(Vec::new(), 100, 100);
        let mut buffer = Buffer::new(65536);
        buffer.extend(&vec![9u8; 300]);

        let result = buffer.egress(&mut channel);

        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::WouldBlock);
        assert_eq!(buffer.len(), 200);
    }

    #[test]
    fn test_clear() {
        let mut buffer = Buffer::new(65536);
        buffer.extend(&[1, 2, 3]);

        buffer.clear();

        assert!(buffer.is_empty());
    }
}
