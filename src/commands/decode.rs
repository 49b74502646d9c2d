// ABOUTME: `decode` command - turns sink lines back into structured records
// ABOUTME: Prints one JSON object per line with the message unescaped

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use crate::tail::parse_line;

/// Decode every line of the sink file at `path` and print it to stdout as JSON.
///
/// Returns the number of decoded lines.
pub fn decode(path: &Path) -> Result<usize> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    decode_to(path, &mut out)
}

/// Like [`decode`], writing to `out`. Stops at the first malformed line.
pub fn decode_to<W: Write>(path: &Path, out: &mut W) -> Result<usize> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let mut count = 0;

    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {:?}", path))?;
        let parsed = parse_line(&line)
            .with_context(|| format!("{}:{}: malformed line", path.display(), index + 1))?;
        serde_json::to_writer(&mut *out, &parsed).context("Failed to encode record")?;
        writeln!(out)?;
        count += 1;
    }

    Ok(count)
}
