//! Workspace Manager — owns the lifecycle of the per-execution host
//! directory that gets bind-mounted into a sandbox.
//!
//! Lifecycle invariant: create -> populate -> use -> destroy, on every
//! exit path including errors. Callers are expected to pair
//! [`create`] with [`destroy`], typically via a guard at the call site
//! in the orchestrator (a `Drop` impl here would need async cleanup,
//! which `Drop` cannot do, so destruction stays explicit and the
//! orchestrator is responsible for calling it even on the error path).

use std::path::{Path, PathBuf};

use tokio::fs;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use crate::error::Result;
use crate::types::{ExecutionId, Workspace};

/// Root directory under which per-execution workspaces are created.
/// `WORKSPACE_ROOT`, default `/tmp/sandkeep`.
pub fn workspace_root() -> PathBuf {
    std::env::var("WORKSPACE_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp/sandkeep"))
}

/// Create a fresh, empty workspace directory for `execution_id` under
/// `root`. The directory is created with `0700` permissions on unix so
/// only the process (and anything running as the same uid inside the
/// bind-mounted container) can read it.
pub async fn create(root: &Path, execution_id: &ExecutionId) -> Result<PathBuf> {
    let dir = root.join(format!("code_exec_{execution_id}"));
    fs::create_dir_all(&dir).await?;

    #[cfg(unix)]
    {
        let perms = std::fs::Permissions::from_mode(0o700);
        fs::set_permissions(&dir, perms).await?;
    }

    Ok(dir)
}

/// Write the sanitized source into the workspace under `filename`,
/// returning the full path written.
pub async fn write_source(dir: &Path, filename: &str, sanitized_source: &str) -> Result<PathBuf> {
    let path = dir.join(filename);
    fs::write(&path, sanitized_source).await?;
    Ok(path)
}

/// Write stdin into the workspace as `input.txt`, returning the full
/// path written, if any stdin was supplied.
pub async fn write_stdin(dir: &Path, stdin: Option<&str>) -> Result<Option<PathBuf>> {
    let Some(stdin) = stdin else {
        return Ok(None);
    };
    let path = dir.join("input.txt");
    fs::write(&path, stdin).await?;
    Ok(Some(path))
}

/// Populate a new workspace for `execution_id`: create the directory,
/// write the source under `filename`, and write stdin if present.
pub async fn populate(
    root: &Path,
    execution_id: &ExecutionId,
    filename: &str,
    sanitized_source: &str,
    stdin: Option<&str>,
) -> Result<Workspace> {
    let dir = create(root, execution_id).await?;
    let source_path = write_source(&dir, filename, sanitized_source).await?;
    let stdin_path = write_stdin(&dir, stdin).await?;

    Ok(Workspace {
        id: execution_id.clone(),
        dir,
        source_path,
        stdin_path,
    })
}

/// Remove the workspace directory and everything under it. Idempotent:
/// a missing directory is not an error, since destroy may race with a
/// prior partial cleanup on the error path.
pub async fn destroy(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[tokio::test]
    async fn populate_and_destroy_round_trip() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let execution_id = "exec_test_0000000000000000".to_string();

        let ws = populate(
            tmp.path(),
            &execution_id,
            "main.py",
            "print(1)",
            Some("hello"),
        )
        .await
        .expect("populate");

        assert!(ws.dir.exists());
        assert_eq!(
            fs::read_to_string(&ws.source_path).await.unwrap(),
            "print(1)"
        );
        assert_eq!(
            fs::read_to_string(ws.stdin_path.as_ref().unwrap())
                .await
                .unwrap(),
            "hello"
        );

        destroy(&ws.dir).await.expect("destroy");
        assert!(!ws.dir.exists());
    }

    #[tokio::test]
    async fn populate_without_stdin_skips_stdin_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let execution_id = "exec_test_0000000000000001".to_string();

        let ws = populate(tmp.path(), &execution_id, "main.py", "print(1)", None)
            .await
            .expect("populate");

        assert!(ws.stdin_path.is_none());
        destroy(&ws.dir).await.expect("destroy");
    }

    #[tokio::test]
    async fn destroy_is_idempotent() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let missing = tmp.path().join("never-created");
        destroy(&missing).await.expect("destroy on missing dir is a no-op");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn created_directory_is_private() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let execution_id = "exec_test_0000000000000002".to_string();
        let dir = create(tmp.path(), &execution_id).await.expect("create");

        let mode = fs::metadata(&dir).await.unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o700);
    }
}
