//! Channel list handling: the streamers file and interactive selection.

use std::io::{BufRead, Write};
use std::path::Path;

use tracing::debug;

use crate::{Error, Result};

/// Read channel names from a file, one per line. Blank lines are ignored.
pub fn read_streamers(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Err(Error::config(format!(
            "streamers file '{}' not found",
            path.display()
        )));
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::io_path("reading streamers file", path, e))?;
    let streamers = parse_streamers(&content);
    if streamers.is_empty() {
        return Err(Error::config(format!(
            "streamers file '{}' is empty",
            path.display()
        )));
    }
    Ok(streamers)
}

fn parse_streamers(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Pick the channel to watch when none was given explicitly.
///
/// A single entry is used directly; several are offered as a numbered menu.
pub fn select_streamer<R: BufRead, W: Write>(
    streamers: &[String],
    input: &mut R,
    output: &mut W,
) -> Result<String> {
    if let [only] = streamers {
        debug!(channel = %only, "Using the only entry in the streamers file");
        return Ok(only.clone());
    }
    prompt(streamers, input, output)
        .map_err(|e| Error::io_path("reading channel selection from", Path::new("<stdin>"), e))
}

fn prompt<R: BufRead, W: Write>(
    streamers: &[String],
    input: &mut R,
    output: &mut W,
) -> std::io::Result<String> {
    writeln!(output, "Available streamers:")?;
    for (i, s) in streamers.iter().enumerate() {
        writeln!(output, "{}. {}", i + 1, s)?;
    }

    let mut line = String::new();
    loop {
        write!(output, "Enter the number of the streamer to record: ")?;
        output.flush()?;

        line.clear();
        if input.read_line(&mut line)? == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "no selection made",
            ));
        }
        match line.trim().parse::<usize>() {
            Ok(n) if (1..=streamers.len()).contains(&n) => return Ok(streamers[n - 1].clone()),
            Ok(_) => writeln!(output, "Please enter a number between 1 and {}.", streamers.len())?,
            Err(_) => writeln!(output, "Please enter a valid number.")?,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn list(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_skips_blank_lines() {
        assert_eq!(parse_streamers("alice\n\n  bob  \r\n\n"), list(&["alice", "bob"]));
    }

    #[test]
    fn missing_and_empty_files_are_errors() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("streamers.txt");
        assert!(matches!(read_streamers(&path), Err(Error::Configuration(_))));

        std::fs::write(&path, "\n  \n").unwrap();
        let err = read_streamers(&path).unwrap_err();
        assert!(err.to_string().contains("is empty"));

        std::fs::write(&path, "alice\n").unwrap();
        assert_eq!(read_streamers(&path).unwrap(), list(&["alice"]));
    }

    #[test]
    fn single_entry_is_used() {
        let mut out = Vec::new();
        let got = select_streamer(&list(&["a"]), &mut Cursor::new(""), &mut out).unwrap();
        assert_eq!(got, "a");
        assert!(out.is_empty());
    }

    #[test]
    fn prompt_reprompts_until_valid() {
        let mut out = Vec::new();
        let mut input = Cursor::new("x\n9\n2\n");
        let got = select_streamer(&list(&["a", "b", "c"]), &mut input, &mut out).unwrap();
        assert_eq!(got, "b");

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("1. a\n2. b\n3. c\n"));
        assert!(text.contains("Please enter a valid number."));
        assert!(text.contains("between 1 and 3"));
    }

    #[test]
    fn eof_is_an_error() {
        let mut out = Vec::new();
        let err = select_streamer(&list(&["a", "b"]), &mut Cursor::new(""), &mut out);
        assert!(matches!(err, Err(Error::Io { .. })));
    }
}
