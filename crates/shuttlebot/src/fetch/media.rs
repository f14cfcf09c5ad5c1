use crate::prelude::*;
use crate::util::process;
use crate::{fatal, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;

/// Metadata of a downloaded video. Any of the fields may be missing if
/// the prober couldn't figure it out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct MediaProbe {
    /// Duration in whole seconds
    pub(crate) duration: Option<u32>,
    pub(crate) width: Option<u32>,
    pub(crate) height: Option<u32>,
}

/// Downloads and inspects remote videos
#[async_trait]
pub(crate) trait MediaFetcher: Send + Sync {
    /// Downloads the video from `url` and stores it at `output`
    async fn download(&self, url: &str, output: &Path) -> Result;

    async fn probe(&self, file: &Path) -> Result<MediaProbe>;
}

/// [`MediaFetcher`] that delegates to external programs, e.g. `yt-dlp`
/// for downloading and `ffprobe` for probing.
pub(crate) struct ExternalMediaFetcher {
    pub(crate) downloader: String,
    pub(crate) prober: String,

    /// Extra arguments appended to the downloader invocation
    pub(crate) vformat: Vec<String>,
}

impl ExternalMediaFetcher {
    fn download_args<'a>(&'a self, url: &'a str, output: &'a str) -> Vec<&'a str> {
        ["-o", output, url]
            .into_iter()
            .chain(self.vformat.iter().map(String::as_str))
            .collect()
    }
}

#[async_trait]
impl MediaFetcher for ExternalMediaFetcher {
    #[instrument(skip_all, fields(url = %url, output = %output.display()))]
    async fn download(&self, url: &str, output: &Path) -> Result {
        let output_arg = output.to_string_lossy();
        let args = self.download_args(url, &output_arg);

        process::run(&self.downloader, &args)
            .with_duration_log("Downloading video")
            .await?;

        // The downloader may decide on a different container if the requested
        // format isn't available, and we can't guess the file name then
        if !output.exists() {
            return Err(fatal!(
                "{} finished successfully, but there is no file at {}",
                self.downloader,
                output.display(),
            ));
        }

        Ok(())
    }

    #[instrument(skip_all, fields(file = %file.display()))]
    async fn probe(&self, file: &Path) -> Result<MediaProbe> {
        let file_arg = file.to_string_lossy().into_owned();

        #[rustfmt::skip]
        let args = [
            "-v", "error",
            "-select_streams", "v:0",
            "-show_entries", "stream=width,height:format=duration",
            "-of", "json",
            file_arg.as_str(),
        ];

        let output: ProbeOutput = process::run_json(&self.prober, &args).await?;
        let probe = output.into_probe();

        debug!(?probe, "Probed video");

        Ok(probe)
    }
}

/// Subset of `ffprobe -of json` output that we care about
#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Deserialize)]
struct ProbeFormat {
    /// Seconds with a fractional part, e.g. `"212.091"`
    duration: Option<String>,
}

impl ProbeOutput {
    fn into_probe(self) -> MediaProbe {
        let stream = self.streams.into_iter().next();

        let duration = self
            .format
            .and_then(|format| format.duration)
            .and_then(|duration| duration.trim().parse::<f64>().ok())
            .filter(|duration| duration.is_finite() && *duration >= 0.0)
            .map(|duration| duration.round() as u32);

        MediaProbe {
            duration,
            width: stream.as_ref().and_then(|stream| stream.width),
            height: stream.as_ref().and_then(|stream| stream.height),
        }
    }
}
