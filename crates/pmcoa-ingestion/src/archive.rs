//! Lazy extraction of article payloads from tar archives.
//!
//! PMC Open Access bulk packages are gzipped tarballs with one JATS XML file
//! per article. Entries are decoded one at a time so memory stays bounded by
//! the largest single article, regardless of archive size.

use crate::error::ArchiveError;
use crate::models::RawDocument;
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

type ArchiveSource = Box<dyn Read + Send>;

/// Upper bound on the buffer reserved up front for one entry.
const MAX_PREALLOC: u64 = 1 << 20;

/// Single-pass reader over one archive. Open a fresh reader per archive.
pub struct ArchiveReader {
    path: PathBuf,
    archive: tar::Archive<ArchiveSource>,
    consumed: bool,
}

impl ArchiveReader {
    /// Open `path`, decompressing on the fly when it ends in `.gz` or `.tgz`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| ArchiveError::Open {
            path: path.clone(),
            source,
        })?;

        let reader = BufReader::new(file);
        let source: ArchiveSource = if is_gzip(&path) {
            Box::new(GzDecoder::new(reader))
        } else {
            Box::new(reader)
        };

        debug!(archive = %path.display(), "Opened archive");
        Ok(Self {
            path,
            archive: tar::Archive::new(source),
            consumed: false,
        })
    }

    /// Iterate decoded regular-file entries in archive order.
    ///
    /// Can be called once. A decode failure is yielded as an error and ends
    /// the sequence.
    pub fn documents(&mut self) -> Result<Documents<'_>, ArchiveError> {
        if self.consumed {
            return Err(ArchiveError::AlreadyConsumed(self.path.clone()));
        }
        self.consumed = true;

        let entries = self.archive.entries().map_err(|source| ArchiveError::Read {
            path: self.path.clone(),
            source,
        })?;

        Ok(Documents {
            path: &self.path,
            entries,
            done: false,
        })
    }
}

/// Iterator returned by [`ArchiveReader::documents`].
pub struct Documents<'a> {
    path: &'a Path,
    entries: tar::Entries<'a, ArchiveSource>,
    done: bool,
}

impl Iterator for Documents<'_> {
    type Item = Result<RawDocument, ArchiveError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            let result = match self.entries.next()? {
                Ok(entry) => self.decode(entry),
                Err(source) => Err(ArchiveError::Read {
                    path: self.path.to_path_buf(),
                    source,
                }),
            };

            match result {
                Ok(Some(doc)) => return Some(Ok(doc)),
                Ok(None) => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

impl Documents<'_> {
    fn decode(
        &self,
        mut entry: tar::Entry<'_, ArchiveSource>,
    ) -> Result<Option<RawDocument>, ArchiveError> {
        let name = entry
            .path()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();

        if !entry.header().entry_type().is_file() {
            trace!(entry = %name, "Skipping non-file entry");
            return Ok(None);
        }

        // The header size is untrusted; it only bounds the initial buffer.
        let declared = entry.size();
        let mut bytes = Vec::with_capacity(declared.min(MAX_PREALLOC) as usize);
        entry
            .read_to_end(&mut bytes)
            .map_err(|source| ArchiveError::Read {
                path: self.path.to_path_buf(),
                source,
            })?;

        if (bytes.len() as u64) < declared {
            return Err(ArchiveError::Read {
                path: self.path.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("entry {name} declares {declared} bytes, found {}", bytes.len()),
                ),
            });
        }

        let text = String::from_utf8(bytes).map_err(|_| ArchiveError::Decode {
            path: self.path.to_path_buf(),
            entry: name.clone(),
        })?;

        Ok(Some(RawDocument { entry: name, text }))
    }
}

fn is_gzip(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("gz") | Some("tgz")
    )
}

/// Regular files in `dir` matching the glob `pattern`, sorted by path.
pub fn discover_archives(dir: impl AsRef<Path>, pattern: &str) -> Result<Vec<PathBuf>, ArchiveError> {
    let full = dir.as_ref().join(pattern);
    let full = full.to_string_lossy();

    let paths = glob::glob(&full).map_err(|e| ArchiveError::Pattern {
        pattern: full.to_string(),
        message: e.to_string(),
    })?;

    let mut archives = Vec::new();
    for entry in paths {
        match entry {
            Ok(path) if path.is_file() => archives.push(path),
            Ok(_) => {}
            Err(e) => warn!(path = %e.path().display(), "Unreadable path while globbing: {}", e.error()),
        }
    }
    archives.sort();
    Ok(archives)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn append_file<W: std::io::Write>(builder: &mut tar::Builder<W>, name: &str, data: &[u8]) {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        builder.append_data(&mut header, name, data).unwrap();
    }

    fn append_dir<W: std::io::Write>(builder: &mut tar::Builder<W>, name: &str) {
        let mut header = tar::Header::new_gnu();
        header.set_size(0);
        header.set_mode(0o755);
        header.set_entry_type(tar::EntryType::Directory);
        header.set_cksum();
        builder.append_data(&mut header, name, std::io::empty()).unwrap();
    }

    fn write_targz(path: &Path, build: impl FnOnce(&mut tar::Builder<GzEncoder<File>>)) {
        let file = File::create(path).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::fast()));
        build(&mut builder);
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn test_reads_files_in_order_and_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("comm_use.A-B.xml.tar.gz");
        write_targz(&path, |b| {
            append_dir(b, "Cell_Rep/");
            append_file(b, "Cell_Rep/a.nxml", b"<article>a</article>");
            append_file(b, "Cell_Rep/b.nxml", "<article>\u{e9}</article>".as_bytes());
        });

        let mut reader = ArchiveReader::open(&path).unwrap();
        let docs: Vec<_> = reader.documents().unwrap().collect::<Result<_, _>>().unwrap();

        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].entry, "Cell_Rep/a.nxml");
        assert_eq!(docs[1].text, "<article>\u{e9}</article>");
    }

    #[test]
    fn test_reader_is_single_pass() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("one.tar.gz");
        write_targz(&path, |b| append_file(b, "x.nxml", b"x"));

        let mut reader = ArchiveReader::open(&path).unwrap();
        assert_eq!(reader.documents().unwrap().count(), 1);
        assert!(matches!(reader.documents(), Err(ArchiveError::AlreadyConsumed(_))));
    }

    #[test]
    fn test_invalid_utf8_ends_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.tar.gz");
        write_targz(&path, |b| {
            append_file(b, "ok.nxml", b"fine");
            append_file(b, "bad.nxml", &[0xff, 0xfe, 0x00]);
            append_file(b, "never.nxml", b"unreached");
        });

        let mut reader = ArchiveReader::open(&path).unwrap();
        let results: Vec<_> = reader.documents().unwrap().collect();

        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        match &results[1] {
            Err(ArchiveError::Decode { entry, .. }) => assert_eq!(entry, "bad.nxml"),
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[test]
    fn test_oversized_header_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lying.tar");

        let mut header = tar::Header::new_gnu();
        header.set_path("huge.nxml").unwrap();
        header.set_size(1 << 50);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();

        let mut raw = header.as_bytes().to_vec();
        raw.extend_from_slice(b"<article/>");
        std::fs::write(&path, raw).unwrap();

        let mut reader = ArchiveReader::open(&path).unwrap();
        let results: Vec<_> = reader.documents().unwrap().collect();
        assert!(matches!(results.last(), Some(Err(ArchiveError::Read { .. }))));
        assert!(results.iter().all(Result::is_err));
    }

    #[test]
    fn test_plain_tar_is_supported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.tar");
        let mut builder = tar::Builder::new(File::create(&path).unwrap());
        append_file(&mut builder, "p.nxml", b"plain");
        builder.into_inner().unwrap();

        let mut reader = ArchiveReader::open(&path).unwrap();
        let docs: Vec<_> = reader.documents().unwrap().filter_map(Result::ok).collect();
        assert_eq!(docs[0].text, "plain");
    }

    #[test]
    fn test_discover_archives_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.xml.tar.gz", "a.xml.tar.gz", "notes.txt"] {
            File::create(dir.path().join(name)).unwrap();
        }
        std::fs::create_dir(dir.path().join("c.tar.gz")).unwrap();

        let found = discover_archives(dir.path(), "*tar.gz").unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.xml.tar.gz", "b.xml.tar.gz"]);
    }

    #[test]
    fn test_missing_archive_is_open_error() {
        let err = ArchiveReader::open("/definitely/not/here.tar.gz").err().unwrap();
        assert!(matches!(err, ArchiveError::Open { .. }));
    }
}
