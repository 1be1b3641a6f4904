//! Downloads a voice message from an allow-listed media host.

use std::io::Write;
use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use log::debug;
use reqwest::{redirect, Client, Response, Url};

use super::error::TranscribeError;
use super::workspace::Workspace;

/// Media hosts the fetcher may contact. Keeping this list closed stops the
/// pipeline from being driven as a general-purpose downloader.
const TRUSTED_HOSTS: &[&str] = &["cdn.discordapp.com", "media.discordapp.net"];

/// Redirect hops followed before giving up.
const MAX_REDIRECTS: u32 = 5;

/// Download `url` into a fresh scratch file and return its path.
///
/// The URL is validated (scheme + host) before any network or filesystem side
/// effect, and so is every redirect target. A partial file never survives a
/// failed download.
pub async fn fetch(url: &str, workspace: &Workspace) -> Result<PathBuf, TranscribeError> {
    let mut target = validate(url)?;

    // Redirects are followed by hand so each hop is re-validated before it is
    // contacted.
    let client = Client::builder().redirect(redirect::Policy::none()).build()?;

    let mut hops = 0u32;
    let response = loop {
        debug!("[fetch] GET {}", target);
        let response = client.get(target.clone()).send().await?;
        let status = response.status();

        if status.is_redirection() {
            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok());
            target = next_hop(&target, location, hops)?;
            hops += 1;
            continue;
        }
        if !status.is_success() {
            return Err(TranscribeError::DownloadFailed(status.as_u16()));
        }
        break response;
    };

    let path = workspace.scratch_path(extension_of(&target));
    match stream_to_file(response, &path).await {
        Ok(bytes) => {
            debug!("[fetch] wrote {} bytes to {}", bytes, path.display());
            Ok(path)
        }
        Err(err) => {
            // No orphaned partial downloads: the scratch file goes away
            // before the error surfaces.
            let _ = std::fs::remove_file(&path);
            Err(err)
        }
    }
}

fn validate(url: &str) -> Result<Url, TranscribeError> {
    let parsed = Url::parse(url).map_err(|_| TranscribeError::InvalidUrl(url.to_string()))?;
    if parsed.scheme() != "https" {
        return Err(TranscribeError::InvalidUrl(url.to_string()));
    }
    let host = parsed.host_str().unwrap_or("");
    if !TRUSTED_HOSTS.contains(&host) {
        return Err(TranscribeError::UntrustedHost(host.to_string()));
    }
    Ok(parsed)
}

/// Resolve one redirect. `hops` counts the redirects already taken.
fn next_hop(current: &Url, location: Option<&str>, hops: u32) -> Result<Url, TranscribeError> {
    if hops >= MAX_REDIRECTS {
        return Err(TranscribeError::TooManyRedirects(MAX_REDIRECTS));
    }
    let location = location.ok_or(TranscribeError::MissingRedirectTarget)?;
    // Location may be relative; resolve it against the current URL first.
    let next = current
        .join(location)
        .map_err(|_| TranscribeError::InvalidUrl(location.to_string()))?;
    validate(next.as_str())
}

/// Extension carried over from the URL path so the converter sees what the
/// CDN served. Voice messages are ogg when the path does not say.
fn extension_of(url: &Url) -> &str {
    url.path_segments()
        .and_then(|segments| segments.last())
        .and_then(|name| name.rsplit_once('.').map(|(_, ext)| ext))
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or("ogg")
}

async fn stream_to_file(response: Response, path: &Path) -> Result<u64, TranscribeError> {
    let mut file = std::fs::File::create(path)?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let bytes = chunk?;
        file.write_all(&bytes)?;
        written += bytes.len() as u64;
    }
    file.flush()?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_https_schemes() {
        let err = validate("http://cdn.discordapp.com/a.ogg").unwrap_err();
        assert!(matches!(err, TranscribeError::InvalidUrl(_)));

        let err = validate("ftp://cdn.discordapp.com/a.ogg").unwrap_err();
        assert!(matches!(err, TranscribeError::InvalidUrl(_)));
    }

    #[test]
    fn rejects_untrusted_hosts() {
        let err = validate("https://evil.example.com/a.ogg").unwrap_err();
        match err {
            TranscribeError::UntrustedHost(host) => assert_eq!(host, "evil.example.com"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn accepts_trusted_hosts() {
        assert!(validate("https://cdn.discordapp.com/attachments/a.ogg").is_ok());
        assert!(validate("https://media.discordapp.net/a.ogg").is_ok());
    }

    #[tokio::test]
    async fn invalid_url_fails_before_any_side_effect() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::ensure_at(root.path().join("scratch")).unwrap();

        let err = fetch("http://cdn.discordapp.com/a.ogg", &ws).await.unwrap_err();
        assert!(matches!(err, TranscribeError::InvalidUrl(_)));

        let leftovers = std::fs::read_dir(ws.dir()).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn untrusted_host_fails_before_any_side_effect() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::ensure_at(root.path().join("scratch")).unwrap();

        let err = fetch("https://evil.example.com/a.ogg", &ws).await.unwrap_err();
        assert!(matches!(err, TranscribeError::UntrustedHost(_)));
        assert_eq!(std::fs::read_dir(ws.dir()).unwrap().count(), 0);
    }

    #[test]
    fn redirect_chains_are_bounded() {
        let base = Url::parse("https://cdn.discordapp.com/a.ogg").unwrap();
        let mut current = base.clone();
        for hops in 0..MAX_REDIRECTS {
            current = next_hop(&current, Some("https://cdn.discordapp.com/b.ogg"), hops).unwrap();
        }
        let err = next_hop(&current, Some("https://cdn.discordapp.com/c.ogg"), MAX_REDIRECTS)
            .unwrap_err();
        assert!(matches!(err, TranscribeError::TooManyRedirects(_)));
    }

    #[test]
    fn redirect_without_location_fails() {
        let base = Url::parse("https://cdn.discordapp.com/a.ogg").unwrap();
        let err = next_hop(&base, None, 0).unwrap_err();
        assert!(matches!(err, TranscribeError::MissingRedirectTarget));
    }

    #[test]
    fn redirect_targets_are_revalidated() {
        let base = Url::parse("https://cdn.discordapp.com/a.ogg").unwrap();

        let err = next_hop(&base, Some("https://evil.example.com/a.ogg"), 0).unwrap_err();
        assert!(matches!(err, TranscribeError::UntrustedHost(_)));

        let err = next_hop(&base, Some("http://cdn.discordapp.com/a.ogg"), 0).unwrap_err();
        assert!(matches!(err, TranscribeError::InvalidUrl(_)));
    }

    #[test]
    fn relative_redirects_resolve_against_the_current_url() {
        let base = Url::parse("https://cdn.discordapp.com/attachments/a.ogg").unwrap();
        let next = next_hop(&base, Some("/attachments/b.ogg"), 0).unwrap();
        assert_eq!(next.as_str(), "https://cdn.discordapp.com/attachments/b.ogg");
    }

    #[test]
    fn extension_follows_the_url_path() {
        let url = Url::parse("https://cdn.discordapp.com/a/b/voice-message.ogg").unwrap();
        assert_eq!(extension_of(&url), "ogg");

        let url = Url::parse("https://cdn.discordapp.com/a/b/clip.mp3").unwrap();
        assert_eq!(extension_of(&url), "mp3");

        let url = Url::parse("https://cdn.discordapp.com/a/b/no-extension").unwrap();
        assert_eq!(extension_of(&url), "ogg");
    }
}
