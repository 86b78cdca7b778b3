//! Job execution against the filesystem abstraction.
//!
//! Everything here is synchronous: workers only block on filesystem
//! I/O and on the cooperative cancellation check between work units
//! (one file copied, one entry deleted).

use std::io::{Read, Write};

use tokio_util::sync::CancellationToken;

use wharf_protocol::types::{Job, JobKind};
use wharf_vfs::{join, Vfs, VfsError};

/// Result of executing one job.
#[derive(Debug)]
pub(crate) enum Outcome {
    Completed,
    Cancelled,
    Failed(String),
}

enum Abort {
    Cancelled,
    Vfs(VfsError),
}

impl From<VfsError> for Abort {
    fn from(e: VfsError) -> Self {
        Self::Vfs(e)
    }
}

/// Executes `job` to completion, cancellation or failure.
///
/// `progress` is called with a 0-100 percentage after each completed
/// work unit. Partial output is left in place on cancellation.
pub(crate) fn execute(
    job: &Job,
    vfs: &dyn Vfs,
    cancel: &CancellationToken,
    copy_buffer: usize,
    progress: &mut dyn FnMut(u8),
) -> Outcome {
    let result = match job.kind {
        JobKind::Copy => run_copy(job, vfs, cancel, copy_buffer, progress),
        JobKind::Move => run_move(job, vfs, cancel, copy_buffer, progress),
        JobKind::Delete => run_delete(job, vfs, cancel, progress),
    };
    match result {
        Ok(()) => Outcome::Completed,
        Err(Abort::Cancelled) => Outcome::Cancelled,
        Err(Abort::Vfs(e)) => Outcome::Failed(e.to_string()),
    }
}

fn run_copy(
    job: &Job,
    vfs: &dyn Vfs,
    cancel: &CancellationToken,
    copy_buffer: usize,
    progress: &mut dyn FnMut(u8),
) -> Result<(), Abort> {
    let dest = job.dest_path.as_deref().unwrap_or_default();
    let totals = scan(vfs, &job.source_path)?;
    let mut copied = 0u64;
    copy_tree(
        vfs,
        &job.source_path,
        dest,
        copy_buffer,
        cancel,
        &mut copied,
        totals.bytes,
        progress,
    )?;
    progress(100);
    Ok(())
}

fn run_move(
    job: &Job,
    vfs: &dyn Vfs,
    cancel: &CancellationToken,
    copy_buffer: usize,
    progress: &mut dyn FnMut(u8),
) -> Result<(), Abort> {
    let dest = job.dest_path.as_deref().unwrap_or_default();
    if vfs.same_mount(&job.source_path, dest) {
        // Atomic within one mount.
        if let Some((parent, _)) = dest.rsplit_once('/') {
            if !parent.is_empty() {
                vfs.create_dir_all(parent)?;
            }
        }
        vfs.rename(&job.source_path, dest)?;
        progress(100);
        return Ok(());
    }

    // Crossing a mount boundary: copy, then delete the source. Never
    // assume a cross-device rename exists.
    run_copy(job, vfs, cancel, copy_buffer, progress)?;
    remove_tree(vfs, &job.source_path, cancel, &mut |_| {})?;
    Ok(())
}

fn run_delete(
    job: &Job,
    vfs: &dyn Vfs,
    cancel: &CancellationToken,
    progress: &mut dyn FnMut(u8),
) -> Result<(), Abort> {
    let totals = scan(vfs, &job.source_path)?;
    let mut deleted = 0u64;
    remove_tree(vfs, &job.source_path, cancel, &mut |n| {
        deleted += n;
        progress(percent(deleted, totals.entries));
    })?;
    progress(100);
    Ok(())
}

struct ScanTotals {
    /// File bytes only; directories contribute 0.
    bytes: u64,
    /// Every file and directory in the tree, the root included.
    entries: u64,
}

fn scan(vfs: &dyn Vfs, path: &str) -> Result<ScanTotals, VfsError> {
    let meta = vfs.metadata(path)?;
    if !meta.is_dir {
        return Ok(ScanTotals {
            bytes: meta.len,
            entries: 1,
        });
    }
    let mut totals = ScanTotals { bytes: 0, entries: 1 };
    for entry in vfs.read_dir(path)? {
        let child = scan(vfs, &join(path, &entry.name))?;
        totals.bytes += child.bytes;
        totals.entries += child.entries;
    }
    Ok(totals)
}

fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done * 100) / total).min(100) as u8
}

#[allow(clippy::too_many_arguments)]
fn copy_tree(
    vfs: &dyn Vfs,
    src: &str,
    dst: &str,
    copy_buffer: usize,
    cancel: &CancellationToken,
    copied: &mut u64,
    total_bytes: u64,
    progress: &mut dyn FnMut(u8),
) -> Result<(), Abort> {
    let meta = vfs.metadata(src)?;
    if !meta.is_dir {
        if cancel.is_cancelled() {
            return Err(Abort::Cancelled);
        }
        *copied += copy_file(vfs, src, dst, copy_buffer)?;
        progress(percent(*copied, total_bytes));
        return Ok(());
    }

    vfs.create_dir_all(dst)?;
    for entry in vfs.read_dir(src)? {
        let child_src = join(src, &entry.name);
        let child_dst = join(dst, &entry.name);
        if entry.is_dir {
            copy_tree(
                vfs, &child_src, &child_dst, copy_buffer, cancel, copied, total_bytes, progress,
            )?;
        } else {
            if cancel.is_cancelled() {
                return Err(Abort::Cancelled);
            }
            *copied += copy_file(vfs, &child_src, &child_dst, copy_buffer)?;
            progress(percent(*copied, total_bytes));
        }
    }
    Ok(())
}

/// Copies one file through a fixed-size buffer; returns bytes copied.
fn copy_file(vfs: &dyn Vfs, src: &str, dst: &str, copy_buffer: usize) -> Result<u64, VfsError> {
    if let Some((parent, _)) = dst.rsplit_once('/') {
        if !parent.is_empty() {
            vfs.create_dir_all(parent)?;
        }
    }
    let mut reader = vfs.read(src)?;
    let mut writer = vfs.create(dst)?;
    let mut buf = vec![0u8; copy_buffer];
    let mut copied = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n])?;
        copied += n as u64;
    }
    writer.flush()?;
    Ok(copied)
}

/// Removes a tree depth-first, reporting removed-entry counts through
/// `on_removed`. The cancellation flag is checked between entries.
fn remove_tree(
    vfs: &dyn Vfs,
    path: &str,
    cancel: &CancellationToken,
    on_removed: &mut dyn FnMut(u64),
) -> Result<(), Abort> {
    if cancel.is_cancelled() {
        return Err(Abort::Cancelled);
    }
    let meta = vfs.metadata(path)?;
    if !meta.is_dir {
        vfs.remove_file(path)?;
        on_removed(1);
        return Ok(());
    }
    for entry in vfs.read_dir(path)? {
        remove_tree(vfs, &join(path, &entry.name), cancel, on_removed)?;
    }
    vfs.remove_dir(path)?;
    on_removed(1);
    Ok(())
}
