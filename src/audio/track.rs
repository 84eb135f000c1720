use serenity::model::id::UserId;
use std::{fmt, time::Duration};

/// Estado del locator de stream de un track
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamLocator {
    /// Only the request URL is known; must be resolved before playback.
    Unresolved,
    /// Time-limited address the transport can read audio from.
    Resolved { url: String },
}

/// Representa un track en la cola de un guild
///
/// Identity is the request URL: two tracks are equal when they were requested
/// from the same locator, whatever their current stream URL is.
#[derive(Debug, Clone)]
pub struct Track {
    request_url: String,
    stream: StreamLocator,
    title: String,
    duration: Option<Duration>,
    thumbnail: Option<String>,
    extractor: Option<String>,
    playlist_url: Option<String>,
    requester: Option<UserId>,
}

impl Track {
    pub fn new(request_url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            request_url: request_url.into(),
            stream: StreamLocator::Unresolved,
            title: title.into(),
            duration: None,
            thumbnail: None,
            extractor: None,
            playlist_url: None,
            requester: None,
        }
    }

    // Getters
    pub fn request_url(&self) -> &str {
        &self.request_url
    }
    pub fn title(&self) -> &str {
        &self.title
    }
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }
    pub fn thumbnail(&self) -> Option<&str> {
        self.thumbnail.as_deref()
    }
    pub fn extractor(&self) -> Option<&str> {
        self.extractor.as_deref()
    }
    pub fn playlist_url(&self) -> Option<&str> {
        self.playlist_url.as_deref()
    }
    pub fn requester(&self) -> Option<UserId> {
        self.requester
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.stream, StreamLocator::Resolved { .. })
    }

    // Builders
    pub fn with_stream_url(mut self, url: impl Into<String>) -> Self {
        self.set_stream_url(url);
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        self.thumbnail = Some(thumbnail.into());
        self
    }

    pub fn with_extractor(mut self, extractor: impl Into<String>) -> Self {
        self.extractor = Some(extractor.into());
        self
    }

    pub fn with_playlist_url(mut self, playlist_url: impl Into<String>) -> Self {
        self.playlist_url = Some(playlist_url.into());
        self
    }

    pub fn with_requester(mut self, requester: UserId) -> Self {
        self.requester = Some(requester);
        self
    }

    // Mutación in-place (refresh)
    pub fn set_stream_url(&mut self, url: impl Into<String>) {
        self.stream = StreamLocator::Resolved { url: url.into() };
    }

    /// Merges metadata from a fresh extraction, keeping known values when the
    /// new extraction omits them.
    pub fn merge_metadata(
        &mut self,
        title: Option<String>,
        duration: Option<Duration>,
        thumbnail: Option<String>,
        extractor: Option<String>,
    ) {
        if let Some(title) = title {
            self.title = title;
        }
        self.duration = duration.or(self.duration);
        self.thumbnail = thumbnail.or(self.thumbnail.take());
        self.extractor = extractor.or(self.extractor.take());
    }

    /// The only way to obtain something the voice transport accepts.
    /// Unresolved tracks yield `None`.
    pub fn playable(&self) -> Option<Playable> {
        match &self.stream {
            StreamLocator::Resolved { url } => Some(Playable {
                stream_url: url.clone(),
                title: self.title.clone(),
            }),
            StreamLocator::Unresolved => None,
        }
    }

    /// Línea corta para listados: "Title (3:25)"
    pub fn label(&self) -> String {
        match self.duration {
            Some(duration) => format!("{} ({})", self.title, format_length(duration)),
            None => self.title.clone(),
        }
    }
}

impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        self.request_url == other.request_url
    }
}

impl Eq for Track {}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.requester {
            Some(user) => write!(f, "{} requested by <@{}>", self.title, user),
            None => write!(f, "{} requested by Unknown", self.title),
        }
    }
}

/// A resolved stream handed to the voice transport.
#[derive(Debug, Clone)]
pub struct Playable {
    stream_url: String,
    title: String,
}

impl Playable {
    pub fn stream_url(&self) -> &str {
        &self.stream_url
    }
    pub fn title(&self) -> &str {
        &self.title
    }
}

/// Formatea duración como m:ss o h:mm:ss
pub fn format_length(duration: Duration) -> String {
    let total = duration.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}
