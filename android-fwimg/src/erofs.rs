//! EROFS images, through erofs-utils' `dump.erofs`.

use crate::error::{Error, Result};
use crate::exec::CommandRunner;
use std::fs;
use std::path::Path;
use tracing::info;

const DUMP_EROFS: &str = "dump.erofs";

/// Extracts every file in `image` into `out_dir`.
pub fn extract(runner: &dyn CommandRunner, image: &Path, out_dir: &Path) -> Result<()> {
    fs::create_dir_all(out_dir).map_err(|e| Error::file(out_dir, e))?;
    let argv = vec![
        DUMP_EROFS.to_string(),
        "-x".to_string(),
        "-o".to_string(),
        out_dir.to_string_lossy().into_owned(),
        image.to_string_lossy().into_owned(),
    ];
    runner.execute(&argv)?.check(DUMP_EROFS)?;
    info!(image = %image.display(), out_dir = %out_dir.display(), "extracted EROFS image");
    Ok(())
}

/// Lists the files in `image`.
pub fn list(runner: &dyn CommandRunner, image: &Path) -> Result<Vec<String>> {
    let argv = vec![
        DUMP_EROFS.to_string(),
        "-l".to_string(),
        image.to_string_lossy().into_owned(),
    ];
    let output = runner.execute(&argv)?.check(DUMP_EROFS)?;
    Ok(output
        .stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect())
}
