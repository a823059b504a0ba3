//! Reading and writing the original text file as lines.
//!
//! Lines are split on `\n`; a final newline does not start another line.
//! NUL bytes become `\n` so they survive in data blocks.

use crate::error::Result;
use crate::types::LineNr;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Split file contents into lines
pub fn split_lines(bytes: &[u8]) -> Vec<Vec<u8>> {
    if bytes.is_empty() {
        return Vec::new();
    }
    let body = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    body.split(|&b| b == b'\n')
        .map(|line| line.iter().map(|&b| if b == 0 { b'\n' } else { b }).collect())
        .collect()
}

/// Read a file as lines
pub fn read_lines(path: &Path) -> Result<Vec<Vec<u8>>> {
    let bytes = fs::read(path)?;
    Ok(split_lines(&bytes))
}

/// Write lines, each followed by a newline. Stored newlines go back to NUL.
pub fn write_lines<W: Write>(out: W, lines: &[Vec<u8>]) -> Result<()> {
    let mut out = BufWriter::new(out);
    for line in lines {
        let text: Vec<u8> = line.iter().map(|&b| if b == b'\n' { 0 } else { b }).collect();
        out.write_all(&text)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

/// The original file, read on first use
#[derive(Debug)]
pub struct OriginalText {
    path: PathBuf,
    lines: Option<Vec<Vec<u8>>>,
}

impl OriginalText {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lines: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `count` lines starting at line `first` (1-based), or `None` when
    /// the file cannot be read or is too short
    pub fn lines(&mut self, first: LineNr, count: usize) -> Option<&[Vec<u8>]> {
        if self.lines.is_none() {
            match read_lines(&self.path) {
                Ok(lines) => {
                    debug!(path = %self.path.display(), lines = lines.len(), "read original file");
                    self.lines = Some(lines);
                }
                Err(e) => {
                    debug!(path = %self.path.display(), error = %e, "cannot read original file");
                    self.lines = Some(Vec::new());
                }
            }
        }
        let lines = self.lines.as_deref()?;
        let start = first.checked_sub(1)?;
        lines.get(start..start.checked_add(count)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_split_lines() {
        assert!(split_lines(b"").is_empty());
        assert_eq!(split_lines(b"a\nb\n"), vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(split_lines(b"a\nb"), vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(split_lines(b"\n"), vec![Vec::<u8>::new()]);
        assert_eq!(split_lines(b"x\0y\n"), vec![b"x\ny".to_vec()]);
    }

    #[test]
    fn test_write_lines() -> Result<()> {
        let mut out = Vec::new();
        write_lines(&mut out, &[b"a".to_vec(), b"b\nc".to_vec()])?;
        assert_eq!(out, b"a\nb\0c\n");
        Ok(())
    }

    #[test]
    fn test_original_ranges() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.txt");
        fs::write(&path, "1\n2\n3\n4\n")?;
        let mut orig = OriginalText::new(&path);
        assert_eq!(orig.lines(2, 2).unwrap(), &[b"2".to_vec(), b"3".to_vec()]);
        assert!(orig.lines(4, 2).is_none());
        assert!(orig.lines(0, 1).is_none());

        let mut missing = OriginalText::new(dir.path().join("none"));
        assert!(missing.lines(1, 1).is_none());
        Ok(())
    }
}
