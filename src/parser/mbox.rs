//! Streaming MBOX reader.
//!
//! Reads line by line through a large buffer and hands each message to a
//! callback, so archives of any size are processed in constant memory.
//! Tolerant of malformed input.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{MailRankError, Result};

/// Size of the internal read buffer.
const READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Messages larger than this are truncated (64 MB).
const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Report progress every 4 MB.
const PROGRESS_INTERVAL: u64 = 4 * 1024 * 1024;

/// Streaming MBOX parser.
///
/// Tolerates:
///
/// - Mixed `\n` and `\r\n` line endings
/// - `From ` lines not preceded by a blank line (logs a warning)
/// - A truncated last message
/// - A UTF-8 BOM at the start of the file
pub struct MboxParser {
    path: PathBuf,
    file_size: u64,
}

impl MboxParser {
    /// Create a parser for the given file. Does not validate the format.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = std::fs::metadata(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MailRankError::SourceNotFound(path.clone())
            } else {
                MailRankError::io(&path, e)
            }
        })?;
        Ok(Self {
            path,
            file_size: metadata.len(),
        })
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Walk the file, calling `on_message(sequence, raw_bytes)` for every message.
    ///
    /// `sequence` starts at 1. The callback returns `false` to stop early.
    /// `progress` receives `(bytes_read, file_size)`. Returns the number of
    /// messages delivered.
    pub fn parse(
        &self,
        on_message: &mut dyn FnMut(u64, &[u8]) -> bool,
        progress: Option<&dyn Fn(u64, u64)>,
    ) -> Result<u64> {
        if self.file_size == 0 {
            return Ok(0);
        }

        let file = File::open(&self.path).map_err(|e| MailRankError::io(&self.path, e))?;
        let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);

        let mut count: u64 = 0;
        let mut message: Vec<u8> = Vec::with_capacity(64 * 1024);
        let mut line: Vec<u8> = Vec::with_capacity(4096);
        let mut bytes_read: u64 = 0;
        let mut last_progress: u64 = 0;
        let mut prev_blank = true;
        let mut truncated = false;

        loop {
            line.clear();
            let n = reader
                .read_until(b'\n', &mut line)
                .map_err(|e| MailRankError::io(&self.path, e))?;
            if n == 0 {
                break;
            }

            if is_mbox_separator(&line) {
                if !prev_blank && bytes_read > 0 {
                    warn!(
                        offset = bytes_read,
                        "Found 'From ' separator without preceding blank line"
                    );
                }
                if !message.is_empty() {
                    count += 1;
                    if !on_message(count, &message) {
                        return Ok(count);
                    }
                }
                message.clear();
                truncated = false;
            }

            if message.len() + line.len() <= MAX_MESSAGE_SIZE {
                message.extend_from_slice(&line);
            } else if !truncated {
                warn!(
                    message = count + 1,
                    max_size = MAX_MESSAGE_SIZE,
                    "Message exceeds maximum size, truncating"
                );
                truncated = true;
            }

            prev_blank = is_blank_line(&line);
            bytes_read += n as u64;

            if let Some(cb) = progress {
                if bytes_read - last_progress >= PROGRESS_INTERVAL {
                    cb(bytes_read, self.file_size);
                    last_progress = bytes_read;
                }
            }
        }

        // Flush last message
        if !message.is_empty() {
            count += 1;
            on_message(count, &message);
        }

        if let Some(cb) = progress {
            cb(self.file_size, self.file_size);
        }

        Ok(count)
    }
}

/// Check whether a line is an MBOX separator (`From ` at the start).
fn is_mbox_separator(line: &[u8]) -> bool {
    line.strip_prefix(&[0xEF, 0xBB, 0xBF])
        .unwrap_or(line)
        .starts_with(b"From ")
}

/// Check whether a line is blank (empty or only whitespace / CR / LF).
fn is_blank_line(line: &[u8]) -> bool {
    line.iter()
        .all(|&b| b == b'\n' || b == b'\r' || b == b' ' || b == b'\t')
}

/// Whether the file at `path` starts like an MBOX.
pub fn looks_like_mbox(path: &Path) -> bool {
    use std::io::Read;
    let mut head = [0u8; 8];
    match File::open(path).and_then(|mut f| f.read(&mut head)) {
        Ok(n) => is_mbox_separator(&head[..n]),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &[u8] = b"From a@x.com Thu Jan 01 00:00:00 2024\n\
Subject: one\n\
\n\
first body\n\
>From the escaped line\n\
\n\
From b@x.com Thu Jan 01 00:00:00 2024\r\n\
Subject: two\r\n\
\r\n\
second body\r\n";

    fn write_temp(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(bytes).unwrap();
        f
    }

    #[test]
    fn test_is_mbox_separator() {
        assert!(is_mbox_separator(b"From user@example.com Thu Jan 01 00:00:00 2024\n"));
        assert!(!is_mbox_separator(b"from user@example.com\n"));
        assert!(!is_mbox_separator(b">From user@example.com\n"));
        assert!(!is_mbox_separator(b"Subject: From here\n"));
        let mut bom = vec![0xEF, 0xBB, 0xBF];
        bom.extend_from_slice(b"From x\n");
        assert!(is_mbox_separator(&bom));
    }

    #[test]
    fn test_is_blank_line() {
        assert!(is_blank_line(b"\n"));
        assert!(is_blank_line(b"\r\n"));
        assert!(!is_blank_line(b"hello\n"));
    }

    #[test]
    fn test_splits_messages() {
        let file = write_temp(SAMPLE);
        let parser = MboxParser::new(file.path()).unwrap();
        let mut seen: Vec<(u64, String)> = Vec::new();
        let count = parser
            .parse(
                &mut |seq, raw| {
                    seen.push((seq, String::from_utf8_lossy(raw).into_owned()));
                    true
                },
                None,
            )
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(seen[0].0, 1);
        assert!(seen[0].1.contains("Subject: one"));
        assert!(seen[0].1.contains(">From the escaped line"));
        assert!(seen[1].1.contains("second body"));
    }

    #[test]
    fn test_stop_early() {
        let file = write_temp(SAMPLE);
        let parser = MboxParser::new(file.path()).unwrap();
        let count = parser.parse(&mut |_, _| false, None).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_empty_file() {
        let file = write_temp(b"");
        let parser = MboxParser::new(file.path()).unwrap();
        assert_eq!(parser.parse(&mut |_, _| true, None).unwrap(), 0);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            MboxParser::new("/definitely/not/here.mbox"),
            Err(MailRankError::SourceNotFound(_))
        ));
    }

    #[test]
    fn test_final_progress_is_file_size() {
        let file = write_temp(SAMPLE);
        let parser = MboxParser::new(file.path()).unwrap();
        let last = std::cell::Cell::new((0, 0));
        parser
            .parse(&mut |_, _| true, Some(&|done, total| last.set((done, total))))
            .unwrap();
        assert_eq!(last.get(), (SAMPLE.len() as u64, SAMPLE.len() as u64));
    }

    #[test]
    fn test_looks_like_mbox() {
        assert!(looks_like_mbox(write_temp(SAMPLE).path()));
        assert!(!looks_like_mbox(write_temp(b"Subject: x\n\n").path()));
    }
}
