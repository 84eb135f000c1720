use async_process::Command;
use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::{ExtractMode, ExtractedInfo, MediaExtractor, ResolveError};

/// Extractor respaldado por el binario de yt-dlp
pub struct YtDlpExtractor {
    binary: String,
    // Limitar procesos concurrentes para evitar rate limiting
    rate_limiter: Semaphore,
}

impl YtDlpExtractor {
    pub fn new(binary: impl Into<String>, concurrency: usize) -> Self {
        Self {
            binary: binary.into(),
            rate_limiter: Semaphore::new(concurrency.max(1)),
        }
    }

    /// Verifica que yt-dlp esté disponible y retorna su versión
    pub async fn verify(&self) -> Result<String, ResolveError> {
        let output = Command::new(&self.binary).arg("--version").output().await?;
        if !output.status.success() {
            return Err(ResolveError::Extractor(format!(
                "{} --version exited with {}",
                self.binary, output.status
            )));
        }
        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!("✅ yt-dlp versión: {}", version);
        Ok(version)
    }
}

/// Argumentos de yt-dlp para cada modo de extracción
fn arguments(locator: &str, mode: ExtractMode) -> Vec<String> {
    let mut args: Vec<String> = ["--dump-single-json", "--no-warnings", "--skip-download"]
        .into_iter()
        .map(String::from)
        .collect();

    match mode {
        ExtractMode::Single => {
            args.extend(["--no-playlist", "-f", "bestaudio/best"].map(String::from));
            args.push(locator.to_string());
        }
        ExtractMode::Collection { max_items } => {
            args.extend(
                [
                    "--flat-playlist",
                    "--yes-playlist",
                    "--default-search",
                    "auto",
                    "-f",
                    "bestaudio/best",
                ]
                .map(String::from),
            );
            args.push("--playlist-items".to_string());
            args.push(format!("1-{}", max_items.max(1)));
            args.push(locator.to_string());
        }
        ExtractMode::Search { limit } => {
            args.push("--flat-playlist".to_string());
            args.push(format!("ytsearch{}:{}", limit.max(1), locator));
        }
    }

    args
}

#[async_trait]
impl MediaExtractor for YtDlpExtractor {
    async fn extract(&self, locator: &str, mode: ExtractMode) -> Result<ExtractedInfo, ResolveError> {
        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|e| ResolveError::Extractor(e.to_string()))?;

        debug!("📊 yt-dlp {:?}: {}", mode, locator);

        let output = Command::new(&self.binary)
            .args(arguments(locator, mode))
            .output()
            .await?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!("yt-dlp error para {}: {}", locator, error);
            return Err(ResolveError::Extractor(error));
        }

        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn single_mode_asks_for_audio_only() {
        let args = arguments("https://youtu.be/a", ExtractMode::Single);
        assert!(args.contains(&"--no-playlist".to_string()));
        assert!(args.contains(&"bestaudio/best".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("https://youtu.be/a"));
    }

    #[test]
    fn collection_mode_caps_items() {
        let args = arguments("https://youtube.com/playlist?list=PL", ExtractMode::Collection { max_items: 101 });
        let at = args.iter().position(|a| a == "--playlist-items").unwrap();
        assert_eq!(args[at + 1], "1-101");
        assert!(args.contains(&"--flat-playlist".to_string()));
    }

    #[test]
    fn search_mode_builds_ytsearch_query() {
        let args = arguments("lofi beats", ExtractMode::Search { limit: 5 });
        assert_eq!(args.last().map(String::as_str), Some("ytsearch5:lofi beats"));
    }

    #[test]
    fn parses_flat_playlist_output() {
        let json = r#"{
            "_type": "playlist",
            "title": "Mix",
            "webpage_url": "https://www.youtube.com/playlist?list=PL",
            "entries": [
                {"_type": "url", "ie_key": "Youtube", "url": "https://www.youtube.com/watch?v=a", "title": "A", "duration": 200.0},
                {"_type": "url", "ie_key": "Youtube", "url": "https://www.youtube.com/watch?v=b", "title": "B", "duration": null}
            ]
        }"#;
        let info: ExtractedInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.kind.as_deref(), Some("playlist"));
        let entries = info.entries.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].duration, None);
    }
}
