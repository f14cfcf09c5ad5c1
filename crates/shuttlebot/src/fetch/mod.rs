//! Fetching of remote videos on demand of the chat members

mod media;
mod url;

use media::{ExternalMediaFetcher, MediaFetcher, MediaProbe};
use url::recognize;

use crate::error::IoError;
use crate::forward::SortedSet;
use crate::prelude::*;
use crate::tg::{ChatClient, VideoPayload};
use crate::{err, Error, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use teloxide::types::{ChatId, UserId};
use tokio::sync::{oneshot, Semaphore};

/// Dimensions sent to Telegram when the prober couldn't figure them out
const FALLBACK_WIDTH: u32 = 640;
const FALLBACK_HEIGHT: u32 = 360;

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub(crate) struct Config {
    /// IDs of the users allowed to use the fetch command
    #[serde(default)]
    pub(crate) users: Vec<u64>,

    /// Bot command that triggers the fetch
    #[serde(default = "default_command")]
    pub(crate) command: String,

    #[serde(default = "default_downloader")]
    pub(crate) downloader: String,

    /// Not invoked directly, but the downloader needs it to merge video
    /// and audio streams
    #[serde(default = "default_merger")]
    pub(crate) merger: String,

    #[serde(default = "default_prober")]
    pub(crate) prober: String,

    /// Extra arguments appended to the downloader invocation
    #[serde(default)]
    pub(crate) vformat: Vec<String>,

    /// Directory where the videos are downloaded to
    #[serde(default = "default_folder")]
    pub(crate) folder: PathBuf,

    /// Max number of fetches running at the same time
    #[serde(default = "default_parallel")]
    pub(crate) parallel: usize,

    /// Max duration of the download in seconds
    pub(crate) timeout: Option<u64>,

    /// Fail the fetch if the video couldn't be probed
    #[serde(default)]
    pub(crate) probe_required: bool,
}

fn default_command() -> String {
    "/fetch".to_owned()
}

fn default_downloader() -> String {
    "yt-dlp".to_owned()
}

fn default_merger() -> String {
    "ffmpeg".to_owned()
}

fn default_prober() -> String {
    "ffprobe".to_owned()
}

fn default_folder() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_parallel() -> usize {
    1
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FetchRequest {
    pub(crate) url: String,
    pub(crate) requesting_chat: ChatId,
    pub(crate) requesting_user: UserId,

    /// Name to tag the user with in the reply
    pub(crate) requester_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FetchOutcome {
    Delivered,
    RejectedUnrecognizedUrl,
    DownloadFailed(String),
    ProbeFailed(String),
    SendFailed(String),
}

impl FetchOutcome {
    /// One-line message for the requester
    pub(crate) fn reply_text(&self, request: &FetchRequest) -> String {
        let FetchRequest {
            url,
            requester_name,
            ..
        } = request;

        match self {
            Self::Delivered => format!("Fetched {url} @{requester_name}"),
            Self::RejectedUnrecognizedUrl => format!("Unknown url format @{requester_name}"),
            Self::DownloadFailed(reason) | Self::ProbeFailed(reason) | Self::SendFailed(reason) => {
                format!("{reason} @{requester_name}")
            }
        }
    }
}

/// Parameters of the pipeline that don't depend on the external programs
pub(crate) struct Settings {
    pub(crate) users: SortedSet<u64>,
    pub(crate) command: String,

    /// Must be an absolute path
    pub(crate) folder: PathBuf,
    pub(crate) parallel: usize,
    pub(crate) timeout: Option<Duration>,
    pub(crate) probe_required: bool,
}

/// Runs fetch requests in the background. Cheap to clone.
#[derive(Clone)]
pub(crate) struct FetchDispatcher {
    imp: Arc<DispatcherImp>,
}

struct DispatcherImp {
    settings: Settings,
    fetcher: Arc<dyn MediaFetcher>,
    client: Arc<dyn ChatClient>,
    permits: Semaphore,
}

impl FetchDispatcher {
    /// Enables the fetch capability only if all the required programs are
    /// installed. This check is done only once at startup.
    pub(crate) fn detect(config: Config, client: Arc<dyn ChatClient>) -> Result<Option<Self>> {
        let missing: Vec<_> = [&config.downloader, &config.merger, &config.prober]
            .into_iter()
            .filter(|program| {
                which::which(program)
                    .map(|path| {
                        debug!(
                            program = program.as_str(),
                            path = %path.display(),
                            "Found program"
                        );
                    })
                    .is_err()
            })
            .collect();

        if !missing.is_empty() {
            warn!(
                ?missing,
                "Fetch capability is disabled, because some of the required programs \
                are not installed"
            );
            return Ok(None);
        }

        let folder = prepare_folder(&config.folder)?;

        let settings = Settings {
            users: SortedSet::new(config.users),
            command: config.command,
            folder,
            parallel: config.parallel,
            timeout: config.timeout.map(Duration::from_secs),
            probe_required: config.probe_required,
        };

        info!(
            command = settings.command.as_str(),
            folder = %settings.folder.display(),
            users = settings.users.len(),
            "Fetch capability is enabled"
        );

        let fetcher = ExternalMediaFetcher {
            downloader: config.downloader,
            prober: config.prober,
            vformat: config.vformat,
        };

        Ok(Some(Self::new(settings, Arc::new(fetcher), client)))
    }

    pub(crate) fn new(
        settings: Settings,
        fetcher: Arc<dyn MediaFetcher>,
        client: Arc<dyn ChatClient>,
    ) -> Self {
        let permits = Semaphore::new(settings.parallel.max(1));
        Self {
            imp: Arc::new(DispatcherImp {
                settings,
                fetcher,
                client,
                permits,
            }),
        }
    }

    pub(crate) fn command(&self) -> &str {
        &self.imp.settings.command
    }

    pub(crate) fn permits_user(&self, user: UserId) -> bool {
        self.imp.settings.users.contains(&user.0)
    }

    /// Starts the fetch in a separate task. The only outcome of the fetch
    /// is delivered via the returned channel.
    pub(crate) fn submit(&self, request: FetchRequest) -> oneshot::Receiver<FetchOutcome> {
        let (sender, receiver) = oneshot::channel();

        let span = info_span!(
            "fetch",
            url = request.url.as_str(),
            chat = %request.requesting_chat,
            user = %request.requesting_user,
        );

        let this = self.clone();
        tokio::spawn(
            async move {
                let outcome = this.run(&request).await;
                info!(?outcome, "Fetch finished");

                // The receiver may be gone if the bot is shutting down
                let _ = sender.send(outcome);
            }
            .instrument(span),
        );

        receiver
    }

    pub(crate) async fn run(&self, request: &FetchRequest) -> FetchOutcome {
        let Some(video_id) = recognize(&request.url) else {
            debug!("Rejecting unrecognized URL");
            return FetchOutcome::RejectedUnrecognizedUrl;
        };

        let imp = &self.imp;

        let _permit = match imp.permits.acquire().await {
            Ok(permit) => permit,
            Err(err) => return FetchOutcome::DownloadFailed(err.to_string()),
        };

        // Each fetch gets its own directory, so concurrent downloads of the
        // same video don't clash. The directory is removed when dropped.
        let dir = match tempfile::Builder::new()
            .prefix(&format!("{video_id}-"))
            .tempdir_in(&imp.settings.folder)
        {
            Ok(dir) => dir,
            Err(source) => {
                let err = err!(IoError::CreateDownloadDir {
                    folder: imp.settings.folder.clone(),
                    source,
                });
                return FetchOutcome::DownloadFailed(failure_reason(&err));
            }
        };

        let output = dir.path().join(format!("{}.webm", video_id.as_str()));

        if let Err(err) = self.download(&request.url, &output).await {
            warn!(err = tracing_err(&err), id = err.id(), "Failed to download video");
            return FetchOutcome::DownloadFailed(failure_reason(&err));
        }

        let probe = match imp.fetcher.probe(&output).await {
            Ok(probe) => probe,
            Err(err) if imp.settings.probe_required => {
                warn!(err = tracing_err(&err), id = err.id(), "Failed to probe video");
                return FetchOutcome::ProbeFailed(failure_reason(&err));
            }
            Err(err) => {
                warn!(
                    err = tracing_err(&err),
                    "Failed to probe video, sending it without metadata"
                );
                MediaProbe::default()
            }
        };

        let video = VideoPayload {
            path: output,
            width: probe.width.unwrap_or(FALLBACK_WIDTH),
            height: probe.height.unwrap_or(FALLBACK_HEIGHT),
            duration: probe.duration,
        };

        info!(?video, "Sending video");

        match imp.client.post_video(request.requesting_chat, video).await {
            Ok(message_id) => {
                info!(message_id = message_id.0, "Sent video");
                FetchOutcome::Delivered
            }
            Err(err) => {
                warn!(err = tracing_err(&err), id = err.id(), "Failed to send video");
                FetchOutcome::SendFailed(failure_reason(&err))
            }
        }
    }

    async fn download(&self, url: &str, output: &std::path::Path) -> Result {
        let download = self.imp.fetcher.download(url, output);

        let Some(timeout) = self.imp.settings.timeout else {
            return download.await;
        };

        tokio::time::timeout(timeout, download)
            .await
            .unwrap_or_else(|_| Err(crate::fatal!("Download timed out after {timeout:?}")))
    }
}

fn failure_reason(err: &Error) -> String {
    err.display_chain().to_string()
}

fn prepare_folder(folder: &std::path::Path) -> Result<PathBuf> {
    let create_dir_err = |source: std::io::Error| {
        err!(IoError::CreateDownloadDir {
            folder: folder.to_owned(),
            source,
        })
    };

    fs_err::create_dir_all(folder).map_err(create_dir_err)?;

    // The downloader gets absolute output paths only
    fs_err::canonicalize(folder).map_err(create_dir_err)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::fatal;
    use crate::tg::client::tests::{MockClient, Sent};
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockFetcher {
        fail_download: bool,
        fail_probe: bool,

        /// How long each download takes
        delay: Option<Duration>,

        downloads: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        outputs: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl MediaFetcher for MockFetcher {
        async fn download(&self, _url: &str, output: &Path) -> Result {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            self.outputs.lock().unwrap().push(output.to_owned());

            let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail_download {
                return Err(fatal!("downloader exited with 1"));
            }
            fs_err::write(output, b"video")?;
            Ok(())
        }

        async fn probe(&self, _file: &Path) -> Result<MediaProbe> {
            if self.fail_probe {
                return Err(fatal!("no duration in the output"));
            }
            Ok(MediaProbe {
                duration: Some(42),
                width: Some(1280),
                height: None,
            })
        }
    }

    struct Fixture {
        dispatcher: FetchDispatcher,
        fetcher: Arc<MockFetcher>,
        client: Arc<MockClient>,
        _folder: tempfile::TempDir,
    }

    fn fixture(fetcher: MockFetcher, client: MockClient, probe_required: bool) -> Fixture {
        fixture_with(fetcher, client, |settings| {
            settings.probe_required = probe_required;
        })
    }

    fn fixture_with(
        fetcher: MockFetcher,
        client: MockClient,
        configure: impl FnOnce(&mut Settings),
    ) -> Fixture {
        let folder = tempfile::tempdir().unwrap();
        let mut settings = Settings {
            users: SortedSet::new(vec![5]),
            command: "/fetch".to_owned(),
            folder: folder.path().to_owned(),
            parallel: 1,
            timeout: None,
            probe_required: false,
        };
        configure(&mut settings);
        let fetcher = Arc::new(fetcher);
        let client = Arc::new(client);
        Fixture {
            dispatcher: FetchDispatcher::new(settings, fetcher.clone(), client.clone()),
            fetcher,
            client,
            _folder: folder,
        }
    }

    /// Dispatcher for the tests that don't get to the download stage
    pub(crate) fn dispatcher_with_client(client: Arc<dyn ChatClient>) -> FetchDispatcher {
        let settings = Settings {
            users: SortedSet::new(vec![5]),
            command: "/fetch".to_owned(),
            folder: std::env::temp_dir(),
            parallel: 1,
            timeout: None,
            probe_required: false,
        };
        FetchDispatcher::new(settings, Arc::new(MockFetcher::default()), client)
    }

    fn request(url: &str) -> FetchRequest {
        FetchRequest {
            url: url.to_owned(),
            requesting_chat: ChatId(-100),
            requesting_user: UserId(5),
            requester_name: "veetaha".to_owned(),
        }
    }

    #[tokio::test]
    async fn unrecognized_url_spawns_nothing() {
        let fx = fixture(MockFetcher::default(), MockClient::default(), false);

        let outcome = fx.dispatcher.run(&request("https://example.com/video")).await;

        assert_eq!(outcome, FetchOutcome::RejectedUnrecognizedUrl);
        assert_eq!(fx.fetcher.downloads.load(Ordering::SeqCst), 0);
        assert!(fx.client.sent().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn delivered_through_the_channel() {
        let fx = fixture(MockFetcher::default(), MockClient::default(), false);

        let outcome = fx
            .dispatcher
            .submit(request("https://youtu.be/XXXX"))
            .await
            .unwrap();

        assert_eq!(outcome, FetchOutcome::Delivered);

        let output = fx.fetcher.outputs.lock().unwrap()[0].clone();
        assert!(output.is_absolute());
        assert_eq!(output.file_name().unwrap(), "XXXX.webm");

        assert_eq!(
            fx.client.sent(),
            [Sent::Video {
                to: ChatId(-100),
                video: VideoPayload {
                    path: output.clone(),
                    width: 1280,
                    height: FALLBACK_HEIGHT,
                    duration: Some(42),
                },
            }]
        );

        // The per-fetch directory is cleaned up after sending
        assert!(!output.parent().unwrap().exists());
    }

    #[tokio::test]
    async fn download_failure() {
        let fetcher = MockFetcher {
            fail_download: true,
            ..Default::default()
        };
        let fx = fixture(fetcher, MockClient::default(), false);

        let outcome = fx.dispatcher.run(&request("https://youtu.be/XXXX")).await;

        assert_matches!(outcome, FetchOutcome::DownloadFailed(reason) if reason.contains("downloader exited with 1"));
        assert!(fx.client.sent().is_empty());
    }

    #[tokio::test]
    async fn probe_failure_is_not_fatal_by_default() {
        let fetcher = MockFetcher {
            fail_probe: true,
            ..Default::default()
        };
        let fx = fixture(fetcher, MockClient::default(), false);

        let outcome = fx.dispatcher.run(&request("https://youtu.be/XXXX")).await;

        assert_eq!(outcome, FetchOutcome::Delivered);
        assert_matches!(
            fx.client.sent().as_slice(),
            [Sent::Video { video, .. }] if video.duration.is_none()
                && video.width == FALLBACK_WIDTH
                && video.height == FALLBACK_HEIGHT
        );
    }

    #[tokio::test]
    async fn probe_failure_when_probe_is_required() {
        let fetcher = MockFetcher {
            fail_probe: true,
            ..Default::default()
        };
        let fx = fixture(fetcher, MockClient::default(), true);

        let outcome = fx.dispatcher.run(&request("https://youtu.be/XXXX")).await;

        assert_matches!(outcome, FetchOutcome::ProbeFailed(reason) if reason.contains("no duration"));
        assert!(fx.client.sent().is_empty());
    }

    #[tokio::test]
    async fn download_timeout() {
        let fetcher = MockFetcher {
            delay: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        let fx = fixture_with(fetcher, MockClient::default(), |settings| {
            settings.timeout = Some(Duration::from_millis(10));
        });

        let outcome = fx.dispatcher.run(&request("https://youtu.be/XXXX")).await;

        assert_matches!(outcome, FetchOutcome::DownloadFailed(reason) if reason.contains("timed out after 10ms"));
        assert!(fx.client.sent().is_empty());
    }

    /// Submits two fetches at once and returns the max number of downloads
    /// that were running at the same time
    async fn max_concurrent_downloads(parallel: usize) -> usize {
        let fetcher = MockFetcher {
            delay: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let fx = fixture_with(fetcher, MockClient::default(), |settings| {
            settings.parallel = parallel;
        });

        let first = fx.dispatcher.submit(request("https://youtu.be/XXXX"));
        let second = fx.dispatcher.submit(request("https://youtu.be/YYYY"));

        assert_eq!(first.await.unwrap(), FetchOutcome::Delivered);
        assert_eq!(second.await.unwrap(), FetchOutcome::Delivered);
        assert_eq!(fx.client.sent().len(), 2);

        fx.fetcher.max_in_flight.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn single_permit_serializes_fetches() {
        assert_eq!(max_concurrent_downloads(1).await, 1);
    }

    #[tokio::test]
    async fn several_permits_run_fetches_concurrently() {
        assert_eq!(max_concurrent_downloads(2).await, 2);
    }

    #[test]
    fn missing_program_disables_the_capability() {
        let root = tempfile::tempdir().unwrap();
        let folder = root.path().join("downloads");

        let config = Config {
            users: vec![5],
            command: default_command(),
            downloader: "shuttlebot-definitely-missing-downloader".to_owned(),
            merger: default_merger(),
            prober: default_prober(),
            vformat: vec![],
            folder: folder.clone(),
            parallel: 1,
            timeout: None,
            probe_required: false,
        };

        let dispatcher = FetchDispatcher::detect(config, Arc::new(MockClient::default())).unwrap();

        assert!(dispatcher.is_none());
        // Nothing is prepared for a disabled capability
        assert!(!folder.exists());
    }

    #[tokio::test]
    async fn send_failure() {
        let client = MockClient::failing([ChatId(-100)]);
        let fx = fixture(MockFetcher::default(), client, false);

        let outcome = fx.dispatcher.run(&request("https://youtu.be/XXXX")).await;

        assert_matches!(outcome, FetchOutcome::SendFailed(reason) if reason.contains("unavailable"));
    }

    #[test]
    fn reply_texts() {
        let request = request("https://youtu.be/XXXX");
        let reply = |outcome: FetchOutcome| outcome.reply_text(&request);

        assert_eq!(
            reply(FetchOutcome::Delivered),
            "Fetched https://youtu.be/XXXX @veetaha"
        );
        assert_eq!(
            reply(FetchOutcome::RejectedUnrecognizedUrl),
            "Unknown url format @veetaha"
        );
        assert_eq!(
            reply(FetchOutcome::SendFailed("boom".to_owned())),
            "boom @veetaha"
        );
    }

    #[test]
    fn allow_list() {
        let fx = fixture(MockFetcher::default(), MockClient::default(), false);
        assert!(fx.dispatcher.permits_user(UserId(5)));
        assert!(!fx.dispatcher.permits_user(UserId(6)));
        assert_eq!(fx.dispatcher.command(), "/fetch");
    }
}
