use std::{fs, io, path::Path};

use hostbench_runtime::OutboundResponse;

/// Writes a faked body where a streaming request asked for it.
///
/// Parent directories are created. An existing read-only target is refused
/// rather than overwritten.
pub fn stream_to_file(
    mut response: OutboundResponse,
    path: &Path,
) -> io::Result<OutboundResponse> {
    if let Ok(metadata) = fs::metadata(path) {
        if metadata.permissions().readonly() {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{} is read-only", path.display()),
            ));
        }
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    fs::write(path, response.body.as_bytes())?;
    response.body.clear();
    response.filename = Some(path.to_path_buf());
    Ok(response)
}
