use std::fmt;

/// Canonical identifier of a video on the supported hosting
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct VideoId(String);

impl VideoId {
    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Utility macro for trying several regexes in order
macro_rules! parse_with_regexes {
    ($str:ident, $($regex:literal),* $(,)?) => {
        None$(.or_else(|| ::lazy_regex::regex_captures!($regex, $str)))*
    }
}

/// Extracts the video ID from short (`youtu.be/<id>`) and long
/// (`youtube.com/watch?v=<id>`) links. Returns `None` for any other input.
pub(crate) fn recognize(url: &str) -> Option<VideoId> {
    let (_, id) = parse_with_regexes!(
        url,
        r"^(?:https?://)?(?:www\.)?youtu\.be/([A-Za-z0-9_-]+)",
        r"^(?:https?://)?(?:www\.|m\.|music\.)?youtube\.com/watch\?(?:[^#]*&)?v=([A-Za-z0-9_-]+)",
    )?;

    Some(VideoId(id.to_owned()))
}
