use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use fs4::tokio::AsyncFileExt;
use tokio::{
    fs::{self, File},
    io::{self, AsyncWriteExt},
};

/// `path` with `suffix` appended to the file name, `storage.json` -> `storage.json.lock`.
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Opens the lock file guarding `path`. The data file itself is replaced on every write, so
/// locks are taken on a sibling that never moves.
pub async fn open_lock(path: &Path) -> Result<File, io::Error> {
    File::options()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(with_suffix(path, ".lock"))
        .await
}

/// `None` if the file doesn't exist.
pub async fn read_if_exists(path: &Path) -> Result<Option<String>, io::Error> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Reads the whole file under a shared lock, so a concurrent writer can't swap it under us.
pub async fn read_locked(path: &Path) -> Result<Option<String>, io::Error> {
    let lock = open_lock(path).await?;
    lock.lock_shared()?;
    let result = read_if_exists(path).await;
    lock.unlock_async().await?;
    result
}

/// Writes `content` into a sibling temp file, syncs it and renames it over `path`. A crash at
/// any point leaves either the old or the new content in place, never a mix of both.
pub async fn replace_atomically(path: &Path, content: &[u8]) -> Result<(), io::Error> {
    let temp = with_suffix(path, ".tmp");
    let mut file = File::create(&temp).await?;
    file.write_all(content).await?;
    file.flush().await?;
    file.sync_data().await?;
    drop(file);
    fs::rename(&temp, path).await
}

/// Moves `path` to `path` + `suffix`, replacing an earlier copy.
pub async fn set_aside(path: &Path, suffix: &str) -> Result<PathBuf, io::Error> {
    let target = with_suffix(path, suffix);
    fs::rename(path, &target).await?;
    Ok(target)
}
