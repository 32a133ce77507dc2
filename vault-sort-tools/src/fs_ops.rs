//! Moves that never replace an existing entry.

use crate::error::ToolError;
use crate::sandbox::naming::candidate_name;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const MAX_PLACEMENT_ATTEMPTS: usize = 10_000;

/// Moves `src` into `dest_dir` under the first free variant of `name`.
///
/// The free-name check and the placement are one atomic filesystem call, so
/// an entry created concurrently at the candidate path is skipped, never
/// overwritten.
pub fn move_no_clobber(src: &Path, dest_dir: &Path, name: &str) -> Result<PathBuf, ToolError> {
    let meta = match fs::symlink_metadata(src) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ToolError::SourceVanished(src.to_path_buf()))
        }
        Err(e) => return Err(ToolError::from_io("stat source", e)),
    };

    for attempt in 0..MAX_PLACEMENT_ATTEMPTS {
        let candidate = dest_dir.join(candidate_name(name, attempt));
        match place(src, &candidate, meta.is_dir()) {
            Ok(()) => {
                debug!("Placed {} at {}", src.display(), candidate.display());
                return Ok(candidate);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) if fs::symlink_metadata(src).is_err() => {
                debug!("Source disappeared during move: {}", e);
                return Err(ToolError::SourceVanished(src.to_path_buf()));
            }
            Err(e) => return Err(ToolError::from_io("move", e)),
        }
    }

    Err(ToolError::DestinationUnavailable(format!(
        "No free name for {} in {}",
        name,
        dest_dir.display()
    )))
}

/// Moves `src` to exactly `dst`, failing with `AlreadyExists` if `dst` is taken.
pub fn move_exact(src: &Path, dst: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(src)?;
    place(src, dst, meta.is_dir())
}

fn place(src: &Path, dst: &Path, is_dir: bool) -> io::Result<()> {
    if is_dir {
        place_dir(src, dst)
    } else {
        place_file(src, dst)
    }
}

fn place_file(src: &Path, dst: &Path) -> io::Result<()> {
    match fs::hard_link(src, dst) {
        Ok(()) => {
            if let Err(e) = fs::remove_file(src) {
                let _ = fs::remove_file(dst);
                return Err(e);
            }
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(e),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(e),
        // Cross-device or no hard link support
        Err(_) => copy_then_remove(src, dst),
    }
}

fn copy_then_remove(src: &Path, dst: &Path) -> io::Result<()> {
    let mut out = OpenOptions::new().write(true).create_new(true).open(dst)?;
    let copied = File::open(src)
        .and_then(|mut input| io::copy(&mut input, &mut out))
        .and_then(|_| out.sync_all());
    if let Err(e) = copied {
        drop(out);
        let _ = fs::remove_file(dst);
        return Err(e);
    }
    if let Ok(meta) = fs::metadata(src) {
        let _ = fs::set_permissions(dst, meta.permissions());
    }
    if let Err(e) = fs::remove_file(src) {
        let _ = fs::remove_file(dst);
        return Err(e);
    }
    Ok(())
}

#[cfg(unix)]
fn place_dir(src: &Path, dst: &Path) -> io::Result<()> {
    // Reserve the name first; rename may then replace only this empty dir
    fs::create_dir(dst)?;
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(EXDEV) => copy_dir_then_remove(src, dst),
        Err(e) => {
            let _ = fs::remove_dir(dst);
            Err(e)
        }
    }
}

#[cfg(unix)]
const EXDEV: i32 = 18;

/// Fills the reserved, empty `dst` with a copy of `src` and then deletes
/// `src`. A failed copy removes everything written under `dst`.
#[cfg(unix)]
fn copy_dir_then_remove(src: &Path, dst: &Path) -> io::Result<()> {
    if let Err(e) = copy_tree(src, dst) {
        let _ = fs::remove_dir_all(dst);
        return Err(e);
    }
    if let Err(e) = fs::remove_dir_all(src) {
        // The copy is complete; a partial source is left for the next run
        warn!(
            "Copied {} to {} but could not remove the source: {}",
            src.display(),
            dst.display(),
            e
        );
    }
    Ok(())
}

#[cfg(unix)]
fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            fs::create_dir(&to)?;
            copy_tree(&from, &to)?;
        } else if file_type.is_symlink() {
            std::os::unix::fs::symlink(fs::read_link(&from)?, &to)?;
        } else {
            fs::copy(&from, &to)?;
        }
    }
    if let Ok(meta) = fs::metadata(src) {
        let _ = fs::set_permissions(dst, meta.permissions());
    }
    Ok(())
}

#[cfg(not(unix))]
fn place_dir(src: &Path, dst: &Path) -> io::Result<()> {
    if fs::symlink_metadata(dst).is_ok() {
        return Err(io::Error::new(ErrorKind::AlreadyExists, "destination exists"));
    }
    fs::rename(src, dst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_move_suffixes_on_collision() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("dest");
        fs::create_dir(&dest).unwrap();
        fs::write(dest.join("a.txt"), "old").unwrap();
        let src = temp.path().join("a.txt");
        fs::write(&src, "new").unwrap();

        let placed = move_no_clobber(&src, &dest, "a.txt").unwrap();
        assert_eq!(placed, dest.join("a (1).txt"));
        assert_eq!(fs::read_to_string(dest.join("a.txt")).unwrap(), "old");
        assert_eq!(fs::read_to_string(&placed).unwrap(), "new");
        assert!(!src.exists());
    }

    #[test]
    fn test_dir_move_keeps_subtree() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("Show");
        fs::create_dir_all(src.join("S01")).unwrap();
        fs::write(src.join("S01/e1.mkv"), "v").unwrap();
        let dest = temp.path().join("Media");
        fs::create_dir_all(dest.join("Show")).unwrap();

        let placed = move_no_clobber(&src, &dest, "Show").unwrap();
        assert_eq!(placed, dest.join("Show (1)"));
        assert!(placed.join("S01/e1.mkv").is_file());
        assert!(dest.join("Show").is_dir());
        assert!(!src.exists());
    }

    #[test]
    fn test_vanished_source() {
        let temp = TempDir::new().unwrap();
        let err = move_no_clobber(&temp.path().join("nope"), temp.path(), "nope").unwrap_err();
        assert!(matches!(err, ToolError::SourceVanished(_)));
    }

    #[test]
    fn test_move_exact_refuses_existing() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a"), "1").unwrap();
        fs::write(temp.path().join("b"), "2").unwrap();

        let err = move_exact(&temp.path().join("a"), &temp.path().join("b")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(fs::read_to_string(temp.path().join("b")).unwrap(), "2");
    }

    #[cfg(unix)]
    fn album(root: &Path) -> PathBuf {
        let src = root.join("Album");
        fs::create_dir_all(src.join("Disc 1")).unwrap();
        fs::write(src.join("Disc 1/01.flac"), "track").unwrap();
        fs::write(src.join("cover.jpg"), "img").unwrap();
        std::os::unix::fs::symlink("cover.jpg", src.join("folder.jpg")).unwrap();
        src
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_fallback_fills_reserved_dir() {
        let temp = TempDir::new().unwrap();
        let src = album(temp.path());
        let dst = temp.path().join("Music/Album");
        fs::create_dir_all(&dst).unwrap();

        copy_dir_then_remove(&src, &dst).unwrap();
        assert_eq!(fs::read_to_string(dst.join("Disc 1/01.flac")).unwrap(), "track");
        assert_eq!(fs::read_link(dst.join("folder.jpg")).unwrap(), Path::new("cover.jpg"));
        assert!(!src.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_fallback_rolls_back_on_failure() {
        let temp = TempDir::new().unwrap();
        let src = album(temp.path());
        let dst = temp.path().join("Music/Album");
        fs::create_dir_all(&dst).unwrap();
        // A name already present under dst makes the copy fail midway
        fs::create_dir(dst.join("Disc 1")).unwrap();

        assert!(copy_dir_then_remove(&src, &dst).is_err());
        assert!(!dst.exists());
        assert!(src.join("Disc 1/01.flac").is_file());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_dir_move_across_devices() {
        use std::os::unix::fs::MetadataExt;

        let shm = Path::new("/dev/shm");
        if !shm.is_dir() {
            return;
        }
        let Ok(other) = TempDir::new_in(shm) else {
            return;
        };
        let temp = TempDir::new().unwrap();
        let same_device = fs::metadata(temp.path()).unwrap().dev()
            == fs::metadata(other.path()).unwrap().dev();
        if same_device {
            return;
        }

        let src = album(temp.path());
        let placed = move_no_clobber(&src, other.path(), "Album").unwrap();
        assert_eq!(placed, other.path().join("Album"));
        assert!(placed.join("Disc 1/01.flac").is_file());
        assert!(placed.join("cover.jpg").is_file());
        assert!(!src.exists());
    }
}
