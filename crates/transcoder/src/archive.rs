//! Batch download archives.

use std::collections::HashSet;
use std::io::{Seek, Write};
use std::path::Path;

use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::TranscodeError;
use crate::batch::BatchResult;

/// Streaming archive sink: add entries one by one, then finalize.
pub trait ArchiveWriter {
    type Output;

    fn add_entry(&mut self, path: &Path, name: &str) -> Result<(), TranscodeError>;

    fn finalize(self) -> Result<Self::Output, TranscodeError>
    where
        Self: Sized;
}

/// ZIP archive over any seekable writer.
pub struct ZipArchiveWriter<W: Write + Seek> {
    zip: ZipWriter<W>,
}

impl<W: Write + Seek> ZipArchiveWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            zip: ZipWriter::new(inner),
        }
    }
}

impl<W: Write + Seek> ArchiveWriter for ZipArchiveWriter<W> {
    type Output = W;

    fn add_entry(&mut self, path: &Path, name: &str) -> Result<(), TranscodeError> {
        // Converted media is already compressed.
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Stored)
            .large_file(true);
        self.zip.start_file(name, options)?;
        let mut file = std::fs::File::open(path)?;
        std::io::copy(&mut file, &mut self.zip)?;
        Ok(())
    }

    fn finalize(self) -> Result<W, TranscodeError> {
        Ok(self.zip.finish()?)
    }
}

/// Entry name for an output: the uploaded name's stem with the output's
/// extension, e.g. `holiday.mov` + `output_1_0.mp4` -> `holiday.mp4`.
pub fn entry_name(original_file: &str, output_file: &str) -> String {
    let stem = Path::new(original_file)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "output".to_string());

    match Path::new(output_file).extension() {
        Some(ext) => format!("{stem}.{}", ext.to_string_lossy()),
        None => stem,
    }
}

fn unique_name(name: String, taken: &mut HashSet<String>) -> String {
    if taken.insert(name.clone()) {
        return name;
    }
    let path = Path::new(&name);
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let ext = path.extension().map(|e| format!(".{}", e.to_string_lossy())).unwrap_or_default();
    let mut n = 1;
    loop {
        let candidate = format!("{stem}_{n}{ext}");
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// Write every successful output of a batch into `writer`, skipping failed
/// entries. Returns the number of entries written.
pub fn write_batch_archive<A: ArchiveWriter>(
    writer: &mut A,
    result: &BatchResult,
    output_dir: &Path,
) -> Result<usize, TranscodeError> {
    let mut taken = HashSet::new();
    let mut written = 0;

    for entry in result.entries() {
        let Some(output_file) = entry.output_file.as_deref().filter(|_| entry.success) else {
            continue;
        };

        let path = output_dir.join(output_file);
        if !path.is_file() {
            warn!(path = %path.display(), "batch output missing on disk, skipping");
            continue;
        }

        let name = unique_name(entry_name(&entry.original_file, output_file), &mut taken);
        debug!(name, path = %path.display(), "adding archive entry");
        writer.add_entry(&path, &name)?;
        written += 1;
    }

    Ok(written)
}
