//! Dumping partitions from a rooted device over adb.

use crate::error::{Error, Result};
use crate::exec::CommandRunner;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const ADB: &str = "adb";
const REMOTE_TMP: &str = "/data/local/tmp";

/// Partition names end up inside a remote shell command.
fn validate_partition_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if !valid {
        return Err(Error::invalid(format!("invalid partition name '{name}'")));
    }
    Ok(())
}

fn su(command: String) -> Vec<String> {
    vec![
        ADB.to_string(),
        "shell".to_string(),
        "su".to_string(),
        "-c".to_string(),
        command,
    ]
}

/// Copies `/dev/block/by-name/<partition>` to `<out_dir>/<partition>.img`.
///
/// The image is staged in `/data/local/tmp` on the device and removed from
/// there afterwards, even when pulling it fails.
pub fn dump(runner: &dyn CommandRunner, partition: &str, out_dir: &Path) -> Result<PathBuf> {
    validate_partition_name(partition)?;
    fs::create_dir_all(out_dir).map_err(|e| Error::file(out_dir, e))?;

    let remote = format!("{REMOTE_TMP}/{partition}.img");
    let local = out_dir.join(format!("{partition}.img"));

    runner
        .execute(&su(format!("dd if=/dev/block/by-name/{partition} of={remote}")))?
        .check(ADB)?;

    let pull = vec![
        ADB.to_string(),
        "pull".to_string(),
        remote.clone(),
        local.to_string_lossy().into_owned(),
    ];
    let pulled = runner.execute(&pull).and_then(|output| output.check(ADB));

    let cleanup = runner
        .execute(&su(format!("rm {remote}")))
        .and_then(|output| output.check(ADB));
    if let Err(err) = cleanup {
        warn!(%remote, %err, "failed to remove staged image from device");
    }

    pulled?;
    info!(partition, path = %local.display(), "dumped partition");
    Ok(local)
}
