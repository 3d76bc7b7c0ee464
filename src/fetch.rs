use std::fs;
use std::io::{self, Write};
use std::thread;
use std::time::Duration;

use camino::Utf8Path;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::redirect::Policy;

use crate::error::PrepError;
use crate::fs_util::Filesystem;

pub trait DatasetFetcher: Send + Sync {
    /// Downloads `url` to `destination`. Nothing is left at `destination` unless
    /// the whole body arrived.
    fn fetch(&self, url: &str, destination: &Utf8Path) -> Result<(), PrepError>;
}

#[derive(Debug, Clone, Copy)]
pub struct FetchSettings {
    pub retries: usize,
    pub timeout: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            retries: 3,
            timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    retries: usize,
}

impl HttpFetcher {
    pub fn new(settings: FetchSettings) -> Result<Self, PrepError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("bench-prep/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| PrepError::FetchHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .redirect(Policy::limited(10))
            .timeout(settings.timeout)
            .build()
            .map_err(|err| PrepError::FetchHttp(err.to_string()))?;
        Ok(Self {
            client,
            retries: settings.retries,
        })
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<Response, PrepError>
    where
        F: FnMut() -> RequestBuilder,
    {
        const BASE_DELAY_MS: u64 = 500;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < self.retries && is_retryable_status(status) {
                        attempt += 1;
                        tracing::warn!(status, attempt, "dataset endpoint busy, retrying");
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * attempt as u64));
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < self.retries && is_retryable_error(&err) {
                        attempt += 1;
                        tracing::warn!(error = %err, attempt, "dataset download failed, retrying");
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * attempt as u64));
                        continue;
                    }
                    return Err(PrepError::FetchHttp(err.to_string()));
                }
            }
        }
    }
}

impl DatasetFetcher for HttpFetcher {
    fn fetch(&self, url: &str, destination: &Utf8Path) -> Result<(), PrepError> {
        let mut response = self.send_with_retries(|| self.client.get(url))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "dataset request failed".to_string());
            return Err(PrepError::FetchStatus { status, message });
        }

        let parent = match destination.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent,
            _ => Utf8Path::new("."),
        };
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| PrepError::Filesystem(err.to_string()))?;
        let file_name = destination.file_name().unwrap_or("download");
        let mut temp = tempfile::Builder::new()
            .prefix(&format!(".{file_name}."))
            .suffix(".part")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| PrepError::Filesystem(err.to_string()))?;
        let written = io::copy(&mut response, temp.as_file_mut())
            .map_err(|err| PrepError::FetchHttp(err.to_string()))?;
        temp.as_file_mut()
            .flush()
            .map_err(|err| PrepError::Filesystem(err.to_string()))?;
        temp.persist(destination.as_std_path())
            .map_err(|err| PrepError::Filesystem(err.to_string()))?;
        tracing::info!(url, destination = %destination, bytes = written, "dataset downloaded");
        Ok(())
    }
}

/// Makes sure the default input exists, downloading it when it does not.
pub fn ensure_input(
    fs: &dyn Filesystem,
    input: &Utf8Path,
    url: Option<&str>,
    fetcher: &dyn DatasetFetcher,
) -> Result<(), PrepError> {
    if fs.exists(input) {
        return Ok(());
    }
    let Some(url) = url else {
        return Err(PrepError::MissingSource(input.to_path_buf()));
    };
    tracing::info!(url, input = %input, "input missing, downloading dataset");
    fetcher.fetch(url, input)
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
