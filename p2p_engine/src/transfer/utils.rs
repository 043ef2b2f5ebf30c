use crate::transfer::constants::MAX_FILENAME_LENGTH;
use std::path::Path;
use tokio::fs::{DirBuilder, File, OpenOptions};

/// Open a file with secure permissions (0o600 on Unix) for writing
pub async fn open_secure_file(path: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    options.open(path).await
}

/// Blocking counterpart of [`open_secure_file`] for the codec pool
pub fn create_secure_file_sync(path: &Path) -> std::io::Result<std::fs::File> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    options.open(path)
}

/// Create `dir` and its parents accessible to the owner only (0o700 on Unix).
///
/// An existing directory with wider permissions is tightened; that fails
/// with `PermissionDenied` when another user owns it.
pub async fn ensure_private_dir(dir: &Path) -> std::io::Result<()> {
    let mut builder = DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o700);
    builder.create(dir).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = tokio::fs::metadata(dir).await?.permissions().mode();
        if mode & 0o077 != 0 {
            tokio::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)).await?;
        }
    }

    Ok(())
}

/// Format transfer speed from bytes and elapsed time
pub fn format_transfer_speed(bytes_transferred: u64, elapsed_secs: f64) -> String {
    if elapsed_secs <= 0.0 {
        return "Starting...".to_string();
    }

    format_speed_mbps(bytes_transferred as f64 / elapsed_secs / 1_000_000.0)
}

/// Format a rate given in MB/s (10^6 bytes per second)
pub fn format_speed_mbps(speed_mbps: f64) -> String {
    if speed_mbps > 1.0 {
        format!("{:.2} MB/s", speed_mbps)
    } else if speed_mbps > 0.001 {
        format!("{:.1} KB/s", speed_mbps * 1_000.0)
    } else {
        format!("{:.0} B/s", speed_mbps * 1_000_000.0)
    }
}

/// Display name sent on the wire: the last path component, never the full path
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unknown_file".to_string())
}

/// Sanitize a received file name so it can only land inside the destination directory
pub fn sanitize_file_name(file_name: &str) -> String {
    // Only the last component survives, whichever separator the peer used
    let file_name = file_name
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or("");

    let mut clean_name: String = file_name.chars().filter(|c| !c.is_control()).collect();

    // See: https://learn.microsoft.com/en-us/windows/win32/fileio/naming-a-file
    let reserved_names = [
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7",
        "COM8", "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    if reserved_names
        .iter()
        .any(|&r| clean_name.eq_ignore_ascii_case(r))
    {
        return "unknown_file".to_string();
    }

    if clean_name == ".." || clean_name == "." || clean_name.trim().is_empty() {
        return "unknown_file".to_string();
    }

    if clean_name.len() > MAX_FILENAME_LENGTH {
        clean_name = truncate_keeping_extension(&clean_name);
    }

    clean_name
}

fn truncate_keeping_extension(name: &str) -> String {
    let ext_start = name.rfind('.').filter(|&idx| idx > 0 && name.len() - idx < 20);

    match ext_start {
        Some(idx) => {
            let ext = &name[idx..];
            let mut base = name[..idx].to_string();
            truncate_on_char_boundary(&mut base, MAX_FILENAME_LENGTH - ext.len());
            base.push_str(ext);
            base
        }
        None => {
            let mut base = name.to_string();
            truncate_on_char_boundary(&mut base, MAX_FILENAME_LENGTH);
            base
        }
    }
}

fn truncate_on_char_boundary(s: &mut String, max_len: usize) {
    let mut cutoff = max_len.min(s.len());
    while !s.is_char_boundary(cutoff) {
        cutoff -= 1;
    }
    s.truncate(cutoff);
}
