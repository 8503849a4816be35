use std::path::{Path, PathBuf};
use tracing::warn;

use crate::core::backup::RunManifest;
use crate::core::state::sync_dir;

/// Move a successful attempt from `staging` into `<root>/<id>/<date>/`.
///
/// A new dated directory is assembled in staging and renamed into place in
/// one step, so readers see both files or neither.
///
/// An existing dated directory (a second run that day) cannot take two files
/// in a single rename. Both are first moved in under hidden `.partial` names,
/// which is the step that can fail and roll back. The archive is then revealed
/// and the manifest last, so there is a short window in which the archive is
/// visible without its manifest. Readers must treat the manifest as the commit
/// marker for its archive.
pub fn promote(root: &Path, date: &str, staging: &Path, manifest: &RunManifest) -> std::io::Result<()> {
    let db_dir = root.join(&manifest.database_identifier);
    let dated = db_dir.join(date);
    let archive = manifest.archive_name();
    let manifest_name = manifest.file_name();

    std::fs::create_dir_all(&db_dir)?;

    if !dated.exists() {
        let assembled = staging.join(date);
        std::fs::create_dir(&assembled)?;
        std::fs::rename(staging.join(&archive), assembled.join(&archive))?;
        std::fs::rename(staging.join(&manifest_name), assembled.join(&manifest_name))?;
        sync_dir(&assembled)?;
        std::fs::rename(&assembled, &dated)?;
        return sync_dir(&db_dir);
    }

    let hidden_archive = hidden(&dated, &archive);
    let hidden_manifest = hidden(&dated, &manifest_name);
    std::fs::rename(staging.join(&archive), &hidden_archive)?;
    if let Err(e) = std::fs::rename(staging.join(&manifest_name), &hidden_manifest) {
        roll_back(&[&hidden_archive]);
        return Err(e);
    }

    let placed_archive = dated.join(&archive);
    if let Err(e) = std::fs::rename(&hidden_archive, &placed_archive) {
        roll_back(&[&hidden_archive, &hidden_manifest]);
        return Err(e);
    }
    if let Err(e) = std::fs::rename(&hidden_manifest, dated.join(&manifest_name)) {
        roll_back(&[&placed_archive, &hidden_manifest]);
        return Err(e);
    }
    sync_dir(&dated)
}

fn hidden(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!(".{}.partial", name))
}

fn roll_back(paths: &[&Path]) {
    for path in paths {
        if let Err(e) = std::fs::remove_file(path) {
            warn!("Failed to roll back {} after a failed promotion: {}", path.display(), e);
        }
    }
}
