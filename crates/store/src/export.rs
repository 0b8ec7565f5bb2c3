//! Aggregate export: pack a run's or session's directory into a zip
//! archive with POSIX paths.

use std::io::{Cursor, Write};
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use tether_domain::{Error, Result};

use crate::store::Store;

impl Store {
    /// Zip the run directory: `run.json`, `events.ndjson`, artifacts.
    pub fn export_run(&self, run_id: &str) -> Result<Vec<u8>> {
        self.get_run(run_id)?;
        zip_directory(&self.run_dir(run_id))
    }

    /// Zip the session directory: `session.json`, `events.ndjson`,
    /// attachments, artifacts.
    pub fn export_session(&self, session_id: &str) -> Result<Vec<u8>> {
        self.get_session(session_id)?;
        zip_directory(&self.session_dir(session_id))
    }
}

fn zip_directory(dir: &Path) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let opts = SimpleFileOptions::default();

    for entry in walkdir::WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let rel = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| Error::Storage(format!("export path: {e}")))?;
        let name = rel.to_string_lossy().replace('\\', "/");
        let bytes = std::fs::read(entry.path())?;

        writer
            .start_file(name.as_str(), opts)
            .map_err(|e| Error::Storage(format!("zip entry {name}: {e}")))?;
        writer.write_all(&bytes)?;
    }

    let cursor = writer
        .finish()
        .map_err(|e| Error::Storage(format!("zip finish: {e}")))?;
    Ok(cursor.into_inner())
}
