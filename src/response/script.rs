//! External response hook

use anyhow::Context;
use std::path::Path;
use std::process::Stdio;
use tracing::info;

/// Launch `script` with the suspicious file as its only argument.
///
/// The hook runs detached; its exit status is never collected by the
/// caller.
pub fn invoke_response_script(script: &Path, suspicious: &Path) -> anyhow::Result<Option<u32>> {
    let child = tokio::process::Command::new(script)
        .arg(suspicious)
        .stdin(Stdio::null())
        .spawn()
        .with_context(|| format!("failed to launch response script {:?}", script))?;

    let pid = child.id();
    info!(script = ?script, pid, "Launched response script for {:?}", suspicious);

    Ok(pid)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_script_receives_path() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let script = dir.path().join("hook.sh");
        std::fs::write(
            &script,
            format!("#!/bin/sh\necho \"$1\" > {}\n", out.display()),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        invoke_response_script(&script, Path::new("/data/a.bin")).unwrap();

        let mut written = String::new();
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if let Ok(s) = std::fs::read_to_string(&out) {
                if s.ends_with('\n') {
                    written = s;
                    break;
                }
            }
        }
        assert_eq!(written.trim(), "/data/a.bin");
    }

    #[tokio::test]
    async fn test_missing_script_is_an_error() {
        let dir = tempdir().unwrap();
        let result = invoke_response_script(&dir.path().join("nope"), Path::new("/data/a.bin"));
        assert!(result.is_err());
    }
}
