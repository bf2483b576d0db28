//! Artifact download with progress events.

use super::*;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use url::Url;

/// 内置下载地址（definition 未配置 download_url 时使用）
fn builtin_url(name: &str) -> Option<&'static str> {
    match name {
        "apache" => Some("https://www.apachelounge.com/download/VS17/binaries/httpd-2.4.65-250724-Win64-VS17.zip"),
        "nginx" => Some("https://nginx.org/download/nginx-1.24.0.zip"),
        "mysql" => Some("https://dev.mysql.com/get/Downloads/MySQLInstaller/mysql-installer-community-8.0.35.0.msi"),
        "redis" => Some("https://github.com/microsoftarchive/redis/releases/download/win-3.0.504/Redis-x64-3.0.504.msi"),
        _ => None,
    }
}

pub(super) fn download_url(def: &ServiceDefinition) -> Option<String> {
    def.download_url
        .clone()
        .filter(|u| !u.is_empty())
        .or_else(|| builtin_url(&def.name).map(str::to_string))
}

/// Last non-empty path segment of the URL, or `<name>.download`.
pub(super) fn artifact_file_name(name: &str, url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("{name}.download"))
}

impl InstallationCoordinator {
    /// Download the service's artifact into `<home>/downloads`.
    ///
    /// The `message` of a successful result is the artifact path.
    #[instrument(skip(self))]
    pub async fn download(&self, name: &str) -> Result<OperationResult> {
        let def = self.registry.get(name).await?;
        if self.registry.is_installed(&def) {
            return Ok(OperationResult::ok(format!("{name} is already installed")));
        }
        let Some(url) = download_url(&def) else {
            return Ok(OperationResult::failed(format!("no download url for {name}")));
        };

        let downloads = self.registry.paths().downloads_dir();
        let target = downloads.join(artifact_file_name(name, &url));
        let part = downloads.join(format!(
            "{}.part",
            target.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
        ));

        info!(service = %name, url = %url, "downloading");
        let result = timeout(self.config.download_timeout, self.fetch(name, &url, &part, &target)).await;
        match result {
            Ok(Ok(())) => {
                info!(service = %name, path = %target.display(), "download complete");
                Ok(OperationResult::ok(target.display().to_string()))
            }
            failed => {
                let _ = tokio::fs::remove_file(&part).await;
                let err = match failed {
                    Ok(Err(e)) => e,
                    _ => ServiceError::Timeout(format!("download of {name}")),
                };
                warn!(service = %name, error = %err, "download failed");
                Ok(OperationResult::failed(err.to_string()))
            }
        }
    }

    async fn fetch(&self, name: &str, url: &str, part: &Path, target: &Path) -> Result<()> {
        if let Some(dir) = part.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ServiceError::Download(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ServiceError::Download(format!("HTTP {status} for {url}")));
        }

        let total = resp.content_length().unwrap_or(0);
        let mut file = tokio::fs::File::create(part).await?;
        let mut stream = resp.bytes_stream();
        let mut downloaded: u64 = 0;
        let mut last_percentage = None;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ServiceError::Download(e.to_string()))?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;

            let progress = DownloadProgress::new(downloaded, total);
            if last_percentage != Some(progress.percentage) {
                last_percentage = Some(progress.percentage);
                self.events.emit(ServiceEvent::DownloadProgress {
                    name: name.to_string(),
                    progress,
                });
            }
        }
        file.flush().await?;
        drop(file);

        tokio::fs::rename(part, target).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_comes_from_url_path() {
        assert_eq!(
            artifact_file_name("nginx", "https://nginx.org/download/nginx-1.24.0.zip"),
            "nginx-1.24.0.zip"
        );
        assert_eq!(
            artifact_file_name("x", "http://127.0.0.1:9/pkg.tar.gz?sig=1"),
            "pkg.tar.gz"
        );
        assert_eq!(artifact_file_name("x", "http://127.0.0.1:9/"), "x.download");
        assert_eq!(artifact_file_name("x", "not a url"), "x.download");
    }

    #[test]
    fn configured_url_wins_over_builtin() {
        let mut def = ServiceDefinition::new("nginx", "nginx");
        assert!(download_url(&def).unwrap().contains("nginx-1.24.0"));
        def.download_url = Some("http://mirror.local/nginx.zip".into());
        assert_eq!(download_url(&def).unwrap(), "http://mirror.local/nginx.zip");
        assert!(download_url(&ServiceDefinition::new("memcached", "memcached")).is_none());
    }
}
