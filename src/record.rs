//! Normalised line records from matrix, trace and position stream files.
//!
//! All three input formats share one line discipline: `#` comments, blank
//! lines, collapsed whitespace, `:` sugar and double-quoted strings. The
//! [`RecordReader`](RecordReader) applies it while scanning, so the parsers
//! above it only ever see clean, tokenisable records.

use std::io::{self, ErrorKind, Read};
use std::path::{Path, PathBuf};

use log::warn;

/// Maximum size of one record in bytes, terminator included.
pub(crate) const MAX_RECORD_SIZE: usize = 2048;

/// Byte-at-a-time access over a [`Read`](Read), refilled in small chunks.
struct ByteSource<R>
where
    R: Read,
{
    reader: R,
    chunk: [u8; 32],
    len: usize,
    pos: usize,
}

impl<R> ByteSource<R>
where
    R: Read,
{
    fn new(reader: R) -> ByteSource<R> {
        ByteSource {
            reader,
            chunk: [0; 32],
            len: 0,
            pos: 0,
        }
    }

    /// Next byte of the stream, or `None` at EOF. Retries interrupted reads.
    fn next_byte(&mut self) -> io::Result<Option<u8>> {
        loop {
            if self.pos < self.len {
                let byte = self.chunk[self.pos];
                self.pos += 1;
                return Ok(Some(byte));
            }
            match self.reader.read(&mut self.chunk) {
                Ok(0) => return Ok(None),
                Ok(n) => {
                    self.len = n;
                    self.pos = 0;
                }
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

/// Reads one normalised record at a time from a text stream.
///
/// Normalisation while scanning a physical line:
///
/// - a `#` outside quotes starts a comment that runs to the end of the line;
/// - outside quotes, any whitespace run collapses to a single space and a
///   leading space is suppressed;
/// - a `:` outside quotes is dropped entirely;
/// - `"` toggles the in-string state; the quotes themselves and everything
///   between them are kept verbatim. The state resets between records.
///
/// Lines that normalise to empty are skipped, so
/// [`read_record`](Self::read_record) returns `None` only at EOF.
pub(crate) struct RecordReader<R>
where
    R: Read,
{
    source: ByteSource<R>,
    path: PathBuf,
}

impl<R> RecordReader<R>
where
    R: Read,
{
    /// `path` is only used to label diagnostics; `reader` is the data.
    pub fn new(reader: R, path: impl Into<PathBuf>) -> RecordReader<R> {
        RecordReader {
            source: ByteSource::new(reader),
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the next non-empty record, or `None` at EOF.
    ///
    /// A record longer than `MAX_RECORD_SIZE - 1` bytes is truncated with a
    /// warning; the cut-off tail is left in the stream and surfaces as the
    /// following record.
    pub fn read_record(&mut self) -> io::Result<Option<String>> {
        let mut buf: Vec<u8> = Vec::new();
        let mut eof = false;

        while buf.is_empty() && !eof {
            let mut was_space = true;
            let mut in_string = false;

            while buf.len() < MAX_RECORD_SIZE - 1 {
                let c = match self.source.next_byte()? {
                    None => {
                        eof = true;
                        break;
                    }
                    Some(b'\n') => break,
                    Some(c) => c,
                };
                if c == b'#' && !in_string {
                    self.skip_line()?;
                    break;
                }
                if c.is_ascii_whitespace() && !in_string {
                    if was_space {
                        continue;
                    }
                    was_space = true;
                    buf.push(b' ');
                    continue;
                }
                was_space = false;
                if c == b':' && !in_string {
                    continue;
                }
                if c == b'"' {
                    in_string = !in_string;
                }
                buf.push(c);
            }

            if buf.len() >= MAX_RECORD_SIZE - 1 {
                warn!(
                    "{}: truncated record after {} bytes",
                    self.path.display(),
                    MAX_RECORD_SIZE - 1
                );
                break;
            }
        }

        if buf.is_empty() {
            Ok(None)
        } else {
            Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
        }
    }

    /// Consume the rest of the current physical line.
    fn skip_line(&mut self) -> io::Result<()> {
        while let Some(c) = self.source.next_byte()? {
            if c == b'\n' {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(input: &str) -> Vec<String> {
        let mut reader = RecordReader::new(input.as_bytes(), "test");
        let mut out = vec![];
        while let Some(record) = reader.read_record().unwrap() {
            out.push(record);
        }
        out
    }

    #[test]
    fn empty_input() {
        assert!(records("").is_empty());
        assert!(records("\n\n  \n\t\n").is_empty());
    }

    #[test]
    fn collapses_whitespace_and_elides_colons() {
        assert_eq!(records("0  1 :\t30"), ["0 1  30"]);
        assert_eq!(records("  a\t\tb  "), ["a b "]);
    }

    #[test]
    fn skips_comment_lines() {
        assert_eq!(records("# a comment\nx\n#another\ny"), ["x", "y"]);
    }

    #[test]
    fn trailing_comment_ends_the_record() {
        assert_eq!(records("a b # tail\nnext"), ["a b ", "next"]);
    }

    #[test]
    fn quoted_text_is_verbatim() {
        assert_eq!(
            records("0 1 \"a  b#:\" tail"),
            ["0 1 \"a  b#:\" tail"]
        );
    }

    #[test]
    fn quote_state_resets_between_records() {
        // The first record ends with its quote unbalanced; the second must
        // still be normalised as ordinary text.
        assert_eq!(records("\"abc\nd  e"), ["\"abc", "d e"]);
    }

    #[test]
    fn record_without_trailing_newline() {
        assert_eq!(records("abc"), ["abc"]);
    }

    #[test]
    fn long_record_is_truncated_and_the_tail_kept() {
        let line = "a".repeat(3000);
        let out = records(&line);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].len(), MAX_RECORD_SIZE - 1);
        assert_eq!(out[1].len(), 3000 - (MAX_RECORD_SIZE - 1));
    }
}
