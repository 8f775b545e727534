//! Streaming unpack of an opened archive into a directory tree.
//!
//! One traversal walks the TOC in depth-first order. It alone advances
//! the shared data source, so every file body is copied on the calling
//! thread; everything that does not touch the source (chmod, platform
//! attribute bits, symlink creation, closing) is pushed onto short-lived
//! background tasks so the next file's copy never waits on it. Background
//! failures flow over a channel and come back as one aggregate error
//! after every task has joined. Directory creation failures and data
//! stream failures are fatal and stop the traversal.
//!
//! When a read-ahead budget is configured, a producer task drains the
//! decoder into a bounded chunk pipe, decoupling filesystem latency from
//! decompression throughput.

use std::fs::{self, File};
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use log::{debug, error};

use crate::buf::flush_buf;
use crate::error::ArchiveError;
use crate::open::{finish, OpenedArchive, State, Verification};
use crate::platform::{make_symlink, set_platform_attributes};
use crate::toc::{EntryKind, FileEntry, Toc};

const COPY_BUF_SIZE: usize = 32 * 1024;
const PIPE_CHUNK_SIZE: usize = 64 * 1024;

/// Cooperative cancellation handle, observed between entries during the
/// traversal. Cancelling stops new work from being scheduled; work
/// already in flight is waited for.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

impl<R: Read + Seek> OpenedArchive<R> {
    /// Unpack the entire archive under `root`.
    ///
    /// `root` must not exist yet, or must be an empty directory. An
    /// archive can be unpacked once; afterwards it counts as closed. On
    /// success the checksum layer is the last thing closed, so a `Late`
    /// verification failure surfaces here.
    pub fn unpack_to(&mut self, cancel: &CancelToken, root: &Path) -> Result<(), ArchiveError>
    where
        R: Send,
    {
        if self.state != State::Open {
            return Err(ArchiveError::DoubleUnpack);
        }
        self.state = State::Unpacked;
        let Some(data) = self.data.take() else {
            return Err(ArchiveError::DoubleUnpack);
        };

        let root = std::path::absolute(root).map_err(|e| ArchiveError::FileIo {
            op: "resolving",
            path: root.to_path_buf(),
            source: e,
        })?;
        ensure_root(&root)?;
        debug!("unpacking to {root:?}");

        let toc = &self.toc;
        let buffer_size = self.opts.unpack_buffer_size;
        let (err_tx, err_rx) = unbounded::<ArchiveError>();

        let (walked, data) = if buffer_size > 0 {
            thread::scope(|s| {
                let (tx, rx) = bounded((buffer_size / PIPE_CHUNK_SIZE).max(1));
                let mut data = data;
                let producer = s.spawn(move || {
                    pump(&mut data, tx);
                    data
                });

                let mut reader = PipeReader {
                    rx,
                    out_buf: Vec::new(),
                    done: false,
                };
                let walked = traverse(s, toc, &mut reader, &root, cancel, &err_tx);

                // unhook the pipe so the producer stops and returns the
                // decoder, whether or not it reached the end of the block
                drop(reader);
                let data = match producer.join() {
                    Ok(data) => data,
                    Err(panic) => std::panic::resume_unwind(panic),
                };
                (walked, data)
            })
        } else {
            let mut data = data;
            let walked = thread::scope(|s| traverse(s, toc, &mut data, &root, cancel, &err_tx));
            (walked, data)
        };

        // every background task has joined; collect what they sent
        drop(err_tx);
        let errors: Vec<ArchiveError> = err_rx.into_iter().collect();

        match walked {
            Err(fatal) => {
                let _ = finish(data, false);
                Err(fatal)
            }
            Ok(()) if !errors.is_empty() => {
                for e in &errors {
                    error!("unpacking to {root:?}: {e}");
                }
                let _ = finish(data, false);
                Err(ArchiveError::Unpack(errors))
            }
            Ok(()) => finish(data, self.opts.verification == Verification::Late),
        }
    }
}

/// The target must be absent (it gets created) or an empty directory.
fn ensure_root(root: &Path) -> Result<(), ArchiveError> {
    match fs::metadata(root) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(root).map_err(|e| ArchiveError::FatalMkdir {
                path: root.to_path_buf(),
                source: e,
            })
        }
        Err(e) => Err(ArchiveError::FileIo {
            op: "statting",
            path: root.to_path_buf(),
            source: e,
        }),
        Ok(meta) if !meta.is_dir() => Err(ArchiveError::NotEmpty(root.to_path_buf())),
        Ok(_) => {
            let mut entries = fs::read_dir(root).map_err(|e| ArchiveError::FileIo {
                op: "listing",
                path: root.to_path_buf(),
                source: e,
            })?;
            if entries.next().is_some() {
                return Err(ArchiveError::NotEmpty(root.to_path_buf()));
            }
            Ok(())
        }
    }
}

/// Producer half of the read-ahead pipe: drain `source` into the channel
/// until EoF, a read error, or the consumer hangs up.
fn pump<R: Read>(source: &mut R, tx: Sender<io::Result<Vec<u8>>>) {
    let mut buf = vec![0u8; PIPE_CHUNK_SIZE];
    loop {
        match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(Ok(buf[..n].to_vec())).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let _ = tx.send(Err(e));
                break;
            }
        }
    }
}

/// Consumer half of the read-ahead pipe.
struct PipeReader {
    rx: Receiver<io::Result<Vec<u8>>>,
    out_buf: Vec<u8>,
    done: bool,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.out_buf.is_empty() {
            if self.done {
                return Ok(0);
            }
            match self.rx.recv() {
                Ok(Ok(chunk)) => self.out_buf = chunk,
                Ok(Err(e)) => {
                    self.done = true;
                    return Err(e);
                }
                // producer gone means end of stream
                Err(_) => {
                    self.done = true;
                    return Ok(0);
                }
            }
        }
        Ok(flush_buf(&mut self.out_buf, buf))
    }
}

/// Walk the TOC creating directories, scheduling symlinks, and copying
/// file bodies from `data` in order. Returns the traversal's own fatal
/// error, if any; per-file failures go to `err_tx`.
fn traverse<'scope, 'env>(
    s: &'scope thread::Scope<'scope, 'env>,
    toc: &Toc,
    data: &mut dyn Read,
    root: &Path,
    cancel: &CancelToken,
    err_tx: &Sender<ArchiveError>,
) -> Result<(), ArchiveError> {
    let mut copy_buf = vec![0u8; COPY_BUF_SIZE];

    toc.walk(|path, entry| {
        if cancel.is_cancelled() {
            return Err(ArchiveError::Cancelled);
        }

        let rel: PathBuf = path.iter().collect();
        let abs = root.join(&rel);

        match &entry.kind {
            EntryKind::Tree(_) => {
                // a missing directory breaks every entry below it
                fs::create_dir(&abs).map_err(|e| ArchiveError::FatalMkdir {
                    path: rel.clone(),
                    source: e,
                })?;
            }

            EntryKind::Symlink(link) => {
                let target: PathBuf = link.target.iter().collect();
                let tx = err_tx.clone();
                s.spawn(move || {
                    if let Err(e) = make_symlink(&target, &abs) {
                        let _ = tx.send(ArchiveError::FileIo {
                            op: "writing symlink",
                            path: rel,
                            source: e,
                        });
                    }
                });
            }

            EntryKind::File(file) => {
                let out = match File::create(&abs) {
                    Ok(out) => out,
                    Err(e) => {
                        let _ = err_tx.send(ArchiveError::FileIo {
                            op: "creating file",
                            path: rel.clone(),
                            source: e,
                        });
                        // the body still has to leave the stream, or every
                        // file after this one would read the wrong bytes
                        discard_body(&mut *data, file.size, &rel, &mut copy_buf)?;
                        return Ok(());
                    }
                };

                // the copy must happen here: only the traversal advances
                // the shared data source in the right order
                let copied = copy_exact(&mut *data, &mut &out, file.size, &mut copy_buf)
                    .map_err(|e| ArchiveError::FileIo {
                        op: "writing file",
                        path: rel.clone(),
                        source: e,
                    })?;
                if copied != file.size {
                    return Err(ArchiveError::ShortRead {
                        wanted: file.size,
                        got: copied,
                    });
                }

                let tx = err_tx.clone();
                let file = *file;
                s.spawn(move || {
                    if let Err(e) = finish_file(out, &abs, &rel, &file) {
                        let _ = tx.send(e);
                    }
                });
            }
        }
        Ok(())
    })
}

/// Copy up to `size` bytes from `data` into `out` with a fixed buffer,
/// returning how many actually arrived.
fn copy_exact(
    data: &mut dyn Read,
    out: &mut dyn Write,
    size: u64,
    buf: &mut [u8],
) -> io::Result<u64> {
    let mut left = size;
    while left > 0 {
        let want = u64::min(left, buf.len() as u64) as usize;
        let n = match data.read(&mut buf[..want]) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        out.write_all(&buf[..n])?;
        left -= n as u64;
    }
    Ok(size - left)
}

fn discard_body(
    data: &mut dyn Read,
    size: u64,
    rel: &Path,
    buf: &mut [u8],
) -> Result<(), ArchiveError> {
    let copied = copy_exact(data, &mut io::sink(), size, buf).map_err(|e| ArchiveError::FileIo {
        op: "discarding file",
        path: rel.to_path_buf(),
        source: e,
    })?;
    if copied != size {
        return Err(ArchiveError::ShortRead {
            wanted: size,
            got: copied,
        });
    }
    Ok(())
}

/// Post-processing that does not touch the shared data source: mode bits,
/// platform attributes, close.
fn finish_file(out: File, abs: &Path, rel: &Path, file: &FileEntry) -> Result<(), ArchiveError> {
    let meta = out.metadata().map_err(|e| ArchiveError::FileIo {
        op: "statting file",
        path: rel.to_path_buf(),
        source: e,
    })?;
    let mut perms = meta.permissions();

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut mode = perms.mode();
        if file.posix_mode.is_some_and(|m| m.executable) {
            mode |= 0o111; // ugo+x
        }
        if file.common_mode.is_some_and(|m| m.readonly) {
            mode &= !0o222; // ugo-w
        }
        perms.set_mode(mode);
    }
    #[cfg(not(unix))]
    {
        if file.common_mode.is_some_and(|m| m.readonly) {
            perms.set_readonly(true);
        }
    }

    out.set_permissions(perms).map_err(|e| ArchiveError::FileIo {
        op: "setting mode",
        path: rel.to_path_buf(),
        source: e,
    })?;

    set_platform_attributes(abs, file.win_mode).map_err(|e| ArchiveError::FileIo {
        op: "setting platform attributes",
        path: rel.to_path_buf(),
        source: e,
    })?;

    drop(out);
    Ok(())
}
