//! Per-platform filesystem pieces of the unpack pipeline.

use std::io;
use std::path::Path;

use crate::toc::WinMode;

#[cfg(unix)]
pub(crate) fn make_symlink(target: &Path, at: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, at)
}

#[cfg(windows)]
pub(crate) fn make_symlink(target: &Path, at: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, at)
}

#[cfg(not(any(unix, windows)))]
pub(crate) fn make_symlink(_target: &Path, _at: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symlinks are not supported on this platform",
    ))
}

/// Apply Windows attribute bits to an unpacked file. Anywhere else this
/// is a no-op.
#[cfg(not(windows))]
pub(crate) fn set_platform_attributes(_path: &Path, _mode: Option<WinMode>) -> io::Result<()> {
    Ok(())
}

#[cfg(windows)]
pub(crate) fn set_platform_attributes(path: &Path, mode: Option<WinMode>) -> io::Result<()> {
    use std::os::windows::ffi::OsStrExt;

    // see GetFileAttributes for the values
    const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
    const FILE_ATTRIBUTE_SYSTEM: u32 = 0x4;

    #[link(name = "kernel32")]
    extern "system" {
        fn SetFileAttributesW(file_name: *const u16, attributes: u32) -> i32;
    }

    let Some(mode) = mode else {
        return Ok(());
    };

    let mut attrs = 0u32;
    if mode.hidden {
        attrs |= FILE_ATTRIBUTE_HIDDEN;
    }
    if mode.system {
        attrs |= FILE_ATTRIBUTE_SYSTEM;
    }
    if attrs == 0 {
        return Ok(());
    }

    let wide: Vec<u16> = path.as_os_str().encode_wide().chain(Some(0)).collect();
    // SAFETY: `wide` is NUL terminated and outlives the call.
    let ok = unsafe { SetFileAttributesW(wide.as_ptr(), attrs) };
    if ok == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
