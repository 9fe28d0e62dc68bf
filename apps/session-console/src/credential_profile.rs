//! Remembered, non-secret credential fields.

use std::{
    fs,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

/// Fields worth prefilling on the next launch.
///
/// The application secret and challenge answers are never stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialProfile {
    pub application_id: String,
    pub phone_number: String,
}

/// `Ok(None)` when no profile has been saved yet.
pub fn load_profile(path: &Path) -> Result<Option<CredentialProfile>, String> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(format!(
                "cannot read credential profile {}: {err}",
                path.display()
            ));
        }
    };

    let profile = serde_json::from_str::<CredentialProfile>(&raw).map_err(|err| {
        format!(
            "credential profile {} is not valid JSON: {err}",
            path.display()
        )
    })?;
    Ok(Some(profile))
}

/// Write `profile` next to `path` first, then move it into place.
///
/// A crash mid-write leaves the previous profile readable.
pub fn save_profile(path: &Path, profile: &CredentialProfile) -> Result<(), String> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)
        .map_err(|err| format!("cannot create profile dir {}: {err}", dir.display()))?;

    let body = serde_json::to_vec_pretty(profile)
        .map_err(|err| format!("cannot encode credential profile: {err}"))?;
    let staged = staging_path(dir, path);
    if let Err(err) = fs::write(&staged, body) {
        return Err(format!("cannot stage profile {}: {err}", staged.display()));
    }

    move_into_place(&staged, path).inspect_err(|_| {
        let _ = fs::remove_file(&staged);
    })
}

/// Rename over `target`; on platforms that refuse, drop `target` and rename again.
fn move_into_place(staged: &Path, target: &Path) -> Result<(), String> {
    let first = match fs::rename(staged, target) {
        Ok(()) => return Ok(()),
        Err(err) => err,
    };

    match fs::remove_file(target) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(format!(
                "cannot replace profile {} ({first}): {err}",
                target.display()
            ));
        }
    }
    fs::rename(staged, target)
        .map_err(|err| format!("cannot move profile into {}: {err}", target.display()))
}

fn staging_path(dir: &Path, target: &Path) -> PathBuf {
    let stem = target
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("profile.json");
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_nanos());
    dir.join(format!("{stem}.{}-{stamp}.partial", std::process::id()))
}
