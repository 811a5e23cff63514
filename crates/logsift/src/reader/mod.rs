//! Line reader: a file as a finite, lazy sequence of `LineRecord`s.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use crate::artifact::FileDescriptor;

/// Longest line kept; the remainder of a longer line is discarded.
pub const MAX_LINE_SIZE: usize = 1_048_576; // 1MB

const READ_BUFFER: usize = 64 * 1024;

/// One physical line with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct LineRecord {
    pub file: Arc<FileDescriptor>,
    /// 1-based
    pub line_number: u64,
    pub text: String,
    /// Invalid UTF-8 was replaced
    pub lossy: bool,
}

pub struct LineReader<R = BufReader<File>> {
    file: Arc<FileDescriptor>,
    inner: R,
    buf: Vec<u8>,
    line_number: u64,
    lossy_lines: u64,
    truncated_lines: u64,
    error: Option<io::Error>,
    done: bool,
}

impl LineReader<BufReader<File>> {
    /// Open `file` under the log set `root`.
    pub fn open(file: Arc<FileDescriptor>, root: &Path) -> io::Result<Self> {
        let handle = File::open(root.join(&file.file_path))?;
        Ok(Self::from_reader(
            file,
            BufReader::with_capacity(READ_BUFFER, handle),
        ))
    }
}

impl<R: BufRead> LineReader<R> {
    pub fn from_reader(file: Arc<FileDescriptor>, inner: R) -> Self {
        Self {
            file,
            inner,
            buf: Vec::new(),
            line_number: 0,
            lossy_lines: 0,
            truncated_lines: 0,
            error: None,
            done: false,
        }
    }

    pub fn lossy_lines(&self) -> u64 {
        self.lossy_lines
    }

    pub fn truncated_lines(&self) -> u64 {
        self.truncated_lines
    }

    /// The I/O error that ended the sequence early, if any.
    pub fn take_error(&mut self) -> Option<io::Error> {
        self.error.take()
    }

    /// Read one line into `buf` without the terminator, keeping at most
    /// `MAX_LINE_SIZE` bytes. Returns `Ok(None)` at end of input.
    fn read_bounded(&mut self) -> io::Result<Option<bool>> {
        self.buf.clear();
        let mut truncated = false;
        let mut saw_any = false;

        loop {
            let available = match self.inner.fill_buf() {
                Ok(available) => available,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if available.is_empty() {
                return Ok(saw_any.then_some(truncated));
            }
            saw_any = true;

            let (chunk, consumed, complete) = match available.iter().position(|b| *b == b'\n') {
                Some(i) => (&available[..i], i + 1, true),
                None => (available, available.len(), false),
            };

            let room = MAX_LINE_SIZE.saturating_sub(self.buf.len());
            if chunk.len() > room {
                truncated = true;
            }
            self.buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
            self.inner.consume(consumed);

            if complete {
                return Ok(Some(truncated));
            }
        }
    }
}

impl<R: BufRead> Iterator for LineReader<R> {
    type Item = LineRecord;

    fn next(&mut self) -> Option<LineRecord> {
        if self.done {
            return None;
        }

        let truncated = match self.read_bounded() {
            Ok(Some(truncated)) => truncated,
            Ok(None) => {
                self.done = true;
                return None;
            }
            Err(e) => {
                self.done = true;
                self.error = Some(e);
                return None;
            }
        };

        self.line_number += 1;
        if truncated {
            self.truncated_lines += 1;
        }
        if self.buf.last() == Some(&b'\r') {
            self.buf.pop();
        }

        let mut bytes = self.buf.as_slice();
        if self.line_number == 1 {
            bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        }

        let (text, lossy) = match std::str::from_utf8(bytes) {
            Ok(text) => (text.to_string(), false),
            Err(_) => (String::from_utf8_lossy(bytes).into_owned(), true),
        };
        if lossy {
            self.lossy_lines += 1;
        }

        Some(LineRecord {
            file: Arc::clone(&self.file),
            line_number: self.line_number,
            text,
            lossy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};

    fn descriptor() -> Arc<FileDescriptor> {
        Arc::new(FileDescriptor::new("a.log", "worker0/a.log", "worker0"))
    }

    fn lines(input: &[u8]) -> Vec<LineRecord> {
        LineReader::from_reader(descriptor(), Cursor::new(input.to_vec())).collect()
    }

    #[test]
    fn test_numbers_and_terminators() {
        let out = lines(b"one\r\ntwo\n\nfour");
        let texts: Vec<_> = out.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two", "", "four"]);
        let numbers: Vec<_> = out.iter().map(|l| l.line_number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);
        assert_eq!(out[0].file.file_path, "worker0/a.log");
    }

    #[test]
    fn test_empty_input() {
        assert!(lines(b"").is_empty());
        assert_eq!(lines(b"\n").len(), 1);
    }

    #[test]
    fn test_lossy_utf8_counted() {
        let mut reader =
            LineReader::from_reader(descriptor(), Cursor::new(b"ok\nbad \xFF\xFE\n".to_vec()));
        let first = reader.next().unwrap();
        let second = reader.next().unwrap();
        assert!(!first.lossy);
        assert!(second.lossy);
        assert!(second.text.starts_with("bad "));
        assert!(reader.next().is_none());
        assert_eq!(reader.lossy_lines(), 1);
    }

    #[test]
    fn test_bom_stripped() {
        let out = lines(b"\xEF\xBB\xBFfirst\nsecond");
        assert_eq!(out[0].text, "first");
        assert!(!out[0].lossy);
    }

    #[test]
    fn test_long_line_truncated() {
        let mut input = vec![b'a'; MAX_LINE_SIZE + 10];
        input.extend_from_slice(b"\nnext\n");
        let mut reader = LineReader::from_reader(
            descriptor(),
            BufReader::with_capacity(4096, Cursor::new(input)),
        );
        let long = reader.next().unwrap();
        assert_eq!(long.text.len(), MAX_LINE_SIZE);
        assert_eq!(reader.next().unwrap().text, "next");
        assert_eq!(reader.truncated_lines(), 1);
    }

    struct FailAfter {
        data: Cursor<Vec<u8>>,
    }

    impl Read for FailAfter {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.data.read(buf)? {
                0 => Err(io::Error::other("device gone")),
                n => Ok(n),
            }
        }
    }

    #[test]
    fn test_mid_file_error_ends_sequence() {
        let source = FailAfter {
            data: Cursor::new(b"one\ntwo".to_vec()),
        };
        let mut reader = LineReader::from_reader(descriptor(), BufReader::new(source));
        assert_eq!(reader.next().unwrap().text, "one");
        assert!(reader.next().is_none());
        assert!(reader.next().is_none());
        assert_eq!(reader.take_error().unwrap().to_string(), "device gone");
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(LineReader::open(descriptor(), dir.path()).is_err());
    }
}
