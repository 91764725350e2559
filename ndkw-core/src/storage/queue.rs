use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::codec;
use crate::models::error::CaptureError;
use crate::models::session::{QueueEntry, QueuedRecording, RecordSession, SessionSnapshot};

/// Directory of finalized `.ndkw` sessions, one file per session id.
///
/// Files are written under a temporary name in the same directory and renamed
/// into place, so readers never observe a partially written session.
#[derive(Debug, Clone)]
pub struct QueueDirectory {
    root: PathBuf,
}

impl QueueDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure_exists(&self) -> Result<(), CaptureError> {
        fs::create_dir_all(&self.root).map_err(|e| CaptureError::storage("failed to create queue directory", e))
    }

    pub fn path_for(&self, id: Uuid) -> PathBuf {
        self.root.join(format!("{}.{}", id, codec::FILE_EXTENSION))
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.path_for(id).is_file()
    }

    /// Encode `snapshot` into the queue. The file appears atomically.
    pub fn persist(&self, snapshot: &mut SessionSnapshot) -> Result<QueuedRecording, CaptureError> {
        self.ensure_exists()?;

        let staging = tempfile::Builder::new()
            .prefix(".")
            .suffix(".ndkw.tmp")
            .tempfile_in(&self.root)
            .map_err(|e| CaptureError::storage("failed to create staging file", e))?;

        let mut writer = BufWriter::new(staging);
        codec::write_snapshot(snapshot, codec::latest_version(), &mut writer)?;
        let staging = writer
            .into_inner()
            .map_err(|e| CaptureError::storage("failed to flush session", e.error()))?;
        staging
            .as_file()
            .sync_all()
            .map_err(|e| CaptureError::storage("failed to sync session", e))?;

        let file_path = self.path_for(snapshot.metadata.id);
        staging
            .persist(&file_path)
            .map_err(|e| CaptureError::storage("failed to move session into queue", e.error))?;

        let checksum = sha256_file(&file_path)?;
        log::info!("Queued session {} ({})", snapshot.metadata.id, file_path.display());

        Ok(QueuedRecording {
            metadata: snapshot.metadata.clone(),
            file_path,
            checksum,
        })
    }

    /// Every readable session, oldest first. Unreadable files are skipped.
    pub fn entries(&self) -> Result<Vec<QueueEntry>, CaptureError> {
        let dir = match fs::read_dir(&self.root) {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CaptureError::storage("failed to list queue directory", e)),
        };

        let mut entries = Vec::new();
        for item in dir {
            let path = match item {
                Ok(item) => item.path(),
                Err(e) => {
                    log::warn!("Skipping unreadable queue entry: {}", e);
                    continue;
                }
            };
            if path.extension().and_then(|ext| ext.to_str()) != Some(codec::FILE_EXTENSION) || !path.is_file() {
                continue;
            }
            match read_entry(&path) {
                Ok(entry) => entries.push(entry),
                Err(e) => log::warn!("Skipping {}: {}", path.display(), e),
            }
        }

        entries.sort_by(|a, b| a.metadata.created_at.cmp(&b.metadata.created_at));
        Ok(entries)
    }

    /// Load a queued session including wave data.
    pub fn read_session(&self, id: Uuid) -> Result<RecordSession, CaptureError> {
        let file = File::open(self.path_for(id)).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => CaptureError::QueueItemNotFound(id),
            _ => CaptureError::storage("failed to open queued session", e),
        })?;
        Ok(codec::read_session(&mut BufReader::new(file))?)
    }

    pub fn remove(&self, id: Uuid) -> Result<(), CaptureError> {
        fs::remove_file(self.path_for(id)).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => CaptureError::QueueItemNotFound(id),
            _ => CaptureError::storage("failed to delete queued session", e),
        })
    }

    /// Remove several sessions. Nothing is deleted unless every id exists.
    /// Repeated ids are removed once.
    pub fn remove_all(&self, ids: &[Uuid]) -> Result<(), CaptureError> {
        let mut seen = HashSet::with_capacity(ids.len());
        let unique: Vec<Uuid> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();

        if let Some(missing) = unique.iter().find(|id| !self.contains(**id)) {
            return Err(CaptureError::QueueItemNotFound(*missing));
        }
        for id in unique {
            self.remove(id)?;
        }
        Ok(())
    }
}

fn read_entry(path: &Path) -> Result<QueueEntry, CaptureError> {
    let file = File::open(path).map_err(|e| CaptureError::storage("failed to open", e))?;
    let metadata = codec::read_metadata(&mut BufReader::new(file))?;
    Ok(QueueEntry {
        metadata,
        file_path: path.to_path_buf(),
    })
}

/// Compute SHA-256 hex digest of a file.
pub fn sha256_file(path: &Path) -> Result<String, CaptureError> {
    let mut file =
        File::open(path).map_err(|e| CaptureError::storage("failed to read file for checksum", e))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(|e| CaptureError::storage("failed to hash file", e))?;
    hasher.flush().map_err(|e| CaptureError::storage("failed to hash file", e))?;
    Ok(hex_encode(&hasher.finalize()))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    use chrono::{TimeZone, Utc};

    use crate::models::device::{Device, DeviceKind};
    use crate::models::session::{DeviceSessionFile, RecordSessionMetadata};

    fn snapshot(created_millis: i64, payload: &[u8]) -> SessionSnapshot {
        let device = Device::new("mic", "Microphone", DeviceKind::Input);
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(payload).unwrap();
        SessionSnapshot {
            metadata: RecordSessionMetadata {
                id: Uuid::new_v4(),
                created_at: Utc.timestamp_millis_opt(created_millis).unwrap(),
                total_duration: Duration::from_millis(10),
                devices: vec![device.clone()],
            },
            files: vec![DeviceSessionFile {
                device,
                file,
                length: payload.len() as u64,
            }],
        }
    }

    #[test]
    fn persist_then_list_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let queue = QueueDirectory::new(dir.path().join("Queued"));

        let mut newer = snapshot(2_000, b"newer");
        let mut older = snapshot(1_000, b"older payload");
        let queued_newer = queue.persist(&mut newer).unwrap();
        let queued_older = queue.persist(&mut older).unwrap();

        assert_eq!(queued_newer.file_path, queue.path_for(newer.metadata.id));
        assert_eq!(queued_newer.checksum.len(), 64);
        assert_eq!(queued_older.checksum, sha256_file(&queued_older.file_path).unwrap());

        let entries = queue.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].metadata, older.metadata);
        assert_eq!(entries[1].metadata, newer.metadata);

        let session = queue.read_session(older.metadata.id).unwrap();
        assert_eq!(session.device_sessions[0].wave_data, b"older payload".to_vec());
    }

    #[test]
    fn no_staging_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let queue = QueueDirectory::new(dir.path());
        queue.persist(&mut snapshot(0, b"abc")).unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with(".ndkw"));
    }

    #[test]
    fn unreadable_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let queue = QueueDirectory::new(dir.path());
        queue.persist(&mut snapshot(0, b"ok")).unwrap();
        fs::write(dir.path().join("garbage.ndkw"), b"not a session").unwrap();
        fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        assert_eq!(queue.entries().unwrap().len(), 1);
    }

    #[test]
    fn missing_directory_lists_empty() {
        let dir = tempfile::tempdir().unwrap();
        let queue = QueueDirectory::new(dir.path().join("absent"));
        assert!(queue.entries().unwrap().is_empty());
    }

    #[test]
    fn remove_all_is_all_or_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let queue = QueueDirectory::new(dir.path());
        let mut first = snapshot(0, b"1");
        let mut second = snapshot(1, b"2");
        queue.persist(&mut first).unwrap();
        queue.persist(&mut second).unwrap();

        let unknown = Uuid::new_v4();
        let err = queue
            .remove_all(&[first.metadata.id, unknown])
            .unwrap_err();
        assert_eq!(err, CaptureError::QueueItemNotFound(unknown));
        assert!(queue.contains(first.metadata.id));

        queue.remove_all(&[first.metadata.id, second.metadata.id]).unwrap();
        assert!(queue.entries().unwrap().is_empty());
        assert_eq!(
            queue.remove(first.metadata.id),
            Err(CaptureError::QueueItemNotFound(first.metadata.id))
        );
    }

    #[test]
    fn remove_all_tolerates_repeated_ids() {
        let dir = tempfile::tempdir().unwrap();
        let queue = QueueDirectory::new(dir.path());
        let mut only = snapshot(0, b"1");
        queue.persist(&mut only).unwrap();
        let id = only.metadata.id;

        queue.remove_all(&[id, id]).unwrap();
        assert!(!queue.contains(id));
        assert!(queue.entries().unwrap().is_empty());
    }

    #[test]
    fn hex_encode_lowercase() {
        assert_eq!(hex_encode(&[0x00, 0xab, 0x7f]), "00ab7f");
    }
}
