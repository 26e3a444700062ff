use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Context;
use log::{info, warn};

const ATTEMPTS: u32 = 3;

static CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .user_agent("mcward-daemon")
        .timeout(Duration::from_secs(15 * 60))
        .build()
        .expect("failed to build http client")
});

/// Fetches `url` into `path`, retrying with backoff and writing through a
/// temp-file rename so a partial download never lands at the final path.
pub async fn fetch_to_path(url: &str, path: &Path) -> anyhow::Result<()> {
    info!("downloading {url}");

    let mut last_err = None;
    for attempt in 1..=ATTEMPTS {
        match fetch(url).await {
            Ok(bytes) => {
                let tmp_path = path.with_extension("part");
                tokio::fs::write(&tmp_path, &bytes)
                    .await
                    .with_context(|| format!("writing {}", tmp_path.display()))?;
                tokio::fs::rename(&tmp_path, path)
                    .await
                    .with_context(|| format!("installing {}", path.display()))?;
                return Ok(());
            }
            Err(err) => {
                warn!("download attempt {attempt}/{ATTEMPTS} for {url} failed: {err:#}");
                last_err = Some(err);
                if attempt < ATTEMPTS {
                    tokio::time::sleep(Duration::from_millis(
                        500_u64.saturating_mul(2_u64.pow(attempt - 1)),
                    ))
                    .await;
                }
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("download failed")))
}

async fn fetch(url: &str) -> anyhow::Result<Vec<u8>> {
    let response = CLIENT
        .get(url)
        .send()
        .await
        .context("sending request")?
        .error_for_status()
        .context("server rejected request")?;
    let body = response.bytes().await.context("reading response body")?;
    Ok(body.to_vec())
}
