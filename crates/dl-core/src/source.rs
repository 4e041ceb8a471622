//! Live data sources.
//!
//! A source yields text lines as they arrive (a serial port, a socket, a
//! pipe). `Session::pump` drains one into the store.

use std::collections::VecDeque;
use std::io::{self, BufRead};

use tracing::warn;

/// A stream of text lines. `None` means the source is exhausted.
pub trait LiveDataSource {
    fn next_line(&mut self) -> Option<String>;
}

impl LiveDataSource for VecDeque<String> {
    fn next_line(&mut self) -> Option<String> {
        self.pop_front()
    }
}

/// Adapts any [`BufRead`] (stdin, a file, a socket) into a line source.
///
/// Lines are split on `\n` with a trailing `\r` removed. Invalid UTF-8 is
/// replaced rather than rejected. A read error ends the stream and is kept
/// for [`LineSource::take_error`].
#[derive(Debug)]
pub struct LineSource<R> {
    reader: R,
    lines_read: u64,
    error: Option<io::Error>,
}

impl<R: BufRead> LineSource<R> {
    pub fn new(reader: R) -> Self {
        LineSource {
            reader,
            lines_read: 0,
            error: None,
        }
    }

    pub fn lines_read(&self) -> u64 {
        self.lines_read
    }

    /// The read error that ended the stream, if any.
    pub fn take_error(&mut self) -> Option<io::Error> {
        self.error.take()
    }
}

impl<R: BufRead> LiveDataSource for LineSource<R> {
    fn next_line(&mut self) -> Option<String> {
        if self.error.is_some() {
            return None;
        }
        let mut buf = Vec::new();
        match self.reader.read_until(b'\n', &mut buf) {
            Ok(0) => None,
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                }
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
                self.lines_read += 1;
                Some(String::from_utf8_lossy(&buf).into_owned())
            }
            Err(e) => {
                warn!(error = %e, lines = self.lines_read, "line source read failed");
                self.error = Some(e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};

    fn drain(source: &mut impl LiveDataSource) -> Vec<String> {
        std::iter::from_fn(|| source.next_line()).collect()
    }

    #[test]
    fn test_line_source_splits_and_strips_crlf() {
        let mut source = LineSource::new(Cursor::new(b"1;2\r\ntemp/3\n\nlast".to_vec()));
        assert_eq!(drain(&mut source), vec!["1;2", "temp/3", "", "last"]);
        assert_eq!(source.lines_read(), 4);
        assert!(source.take_error().is_none());
    }

    #[test]
    fn test_line_source_replaces_invalid_utf8() {
        let mut source = LineSource::new(Cursor::new(b"a\xffb\n".to_vec()));
        assert_eq!(drain(&mut source), vec!["a\u{fffd}b"]);
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "port closed"))
        }
    }

    #[test]
    fn test_line_source_keeps_read_error() {
        let mut source = LineSource::new(io::BufReader::new(FailingReader));
        assert!(source.next_line().is_none());
        assert!(source.next_line().is_none());
        let err = source.take_error().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_queue_source() {
        let mut queue: VecDeque<String> = ["1".to_string(), "2".to_string()].into();
        assert_eq!(drain(&mut queue), vec!["1", "2"]);
    }
}
