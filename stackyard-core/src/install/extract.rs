//! 安装包分发：压缩包解压、平台安装包、裸可执行文件。

use super::*;
use std::path::PathBuf;
use tokio::process::Command;

/// How an artifact is installed, decided by its file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ArtifactKind {
    Zip,
    Tar,
    Msi,
    Pkg,
    Executable,
}

impl ArtifactKind {
    pub(super) fn detect(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if name.ends_with(".zip") {
            ArtifactKind::Zip
        } else if name.ends_with(".tar") || name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            ArtifactKind::Tar
        } else if name.ends_with(".msi") {
            ArtifactKind::Msi
        } else if name.ends_with(".pkg") {
            ArtifactKind::Pkg
        } else {
            ArtifactKind::Executable
        }
    }
}

/// Unpack or run `artifact` so the service ends up under `target`.
pub(super) async fn unpack(artifact: &Path, target: &Path) -> Result<()> {
    tokio::fs::create_dir_all(target).await?;
    let kind = ArtifactKind::detect(artifact);
    debug!(artifact = %artifact.display(), ?kind, "installing artifact");
    match kind {
        ArtifactKind::Zip => {
            let (artifact, target) = (artifact.to_path_buf(), target.to_path_buf());
            tokio::task::spawn_blocking(move || extract_zip(&artifact, &target))
                .await
                .map_err(|e| ServiceError::Other(format!("spawn_blocking failed: {}", e)))?
        }
        ArtifactKind::Tar => {
            run_tool(
                Command::new("tar")
                    .arg("-xf")
                    .arg(artifact)
                    .arg("-C")
                    .arg(target),
            )
            .await
        }
        ArtifactKind::Msi => {
            run_tool(
                Command::new("msiexec")
                    .arg("/i")
                    .arg(artifact)
                    .args(["/quiet", "/norestart"]),
            )
            .await
        }
        ArtifactKind::Pkg => {
            run_tool(
                Command::new("installer")
                    .arg("-pkg")
                    .arg(artifact)
                    .args(["-target", "CurrentUserHomeDirectory"]),
            )
            .await
        }
        ArtifactKind::Executable => {
            let mut cmd = Command::new(artifact);
            if cfg!(windows) {
                cmd.arg("/S").arg(format!("/D={}", target.display()));
            }
            run_tool(cmd.current_dir(target)).await
        }
    }
}

fn extract_zip(artifact: &Path, target: &Path) -> Result<()> {
    let file = std::fs::File::open(artifact)?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| ServiceError::Install(format!("bad zip: {e}")))?;
    archive
        .extract(target)
        .map_err(|e| ServiceError::Install(format!("extract failed: {e}")))?;
    info!(entries = archive.len(), target = %target.display(), "zip extracted");
    Ok(())
}

/// 运行外部安装工具；超时由调用方控制，future 被丢弃时子进程一并结束。
async fn run_tool(cmd: &mut Command) -> Result<()> {
    let program = cmd.as_std().get_program().to_string_lossy().into_owned();
    let out = cmd
        .stdin(std::process::Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| ServiceError::Install(format!("{program}: {e}")))?;
    if !out.status.success() {
        return Err(ServiceError::Install(format!(
            "{program} exited with {}: {}",
            out.status,
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }
    Ok(())
}

const SEARCH_DEPTH: usize = 4;

/// Find `file_name` under `root`, breadth first.
pub(super) fn find_executable(root: &Path, file_name: &str) -> Option<PathBuf> {
    let mut level = vec![root.to_path_buf()];
    for _ in 0..=SEARCH_DEPTH {
        let mut next = Vec::new();
        for dir in level {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    next.push(path);
                } else if entry.file_name().to_string_lossy() == file_name {
                    return Some(path);
                }
            }
        }
        if next.is_empty() {
            break;
        }
        level = next;
    }
    None
}

/// Install root for an executable: its directory, or the parent of `bin/`.
pub(super) fn install_root(exe: &Path) -> Option<PathBuf> {
    let dir = exe.parent()?;
    if dir.file_name().is_some_and(|n| n == "bin") {
        dir.parent().map(Path::to_path_buf)
    } else {
        Some(dir.to_path_buf())
    }
}
