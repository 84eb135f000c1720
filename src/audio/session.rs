use parking_lot::{Mutex, RwLock};
use serenity::model::id::{GuildId, UserId};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    outcome::{Outcome, OutcomeKind},
    shared::{SharedList, SharedMap},
    track::{format_length, Track},
};
use crate::{
    sources::{is_http_url, is_stale_locator_error, ResolveError, TrackResolver},
    voice::{Completion, VoiceConnection, VoiceError},
};

/// Máximo de líneas en el listado de la cola
const QUEUE_LISTING_LIMIT: usize = 20;

/// Estado observable de la sesión
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
    /// Paused with an empty queue, right after `stop`.
    Stopped,
}

/// Evento enviado desde el contexto del transporte de voz
#[derive(Debug)]
pub enum PlaybackEvent {
    Finished {
        generation: u64,
        error: Option<String>,
    },
}

#[derive(Debug, Default)]
struct PlayerState {
    active: Option<Track>,
    paused: bool,
    looping: bool,
    /// Bumped on every playback start and on every forced halt. A completion
    /// carrying an older value belongs to a transmission nobody owns anymore.
    generation: u64,
}

/// Sesión de reproducción de un guild
///
/// Owns the queue, the active track and the pause/loop flags. Completions from
/// the voice transport never touch this state directly: they are sent over a
/// channel and handled by the session's event loop on the tokio runtime.
pub struct PlaybackSession {
    guild_id: GuildId,
    connection: RwLock<Arc<dyn VoiceConnection>>,
    resolver: Arc<TrackResolver>,
    queue: SharedList<Track>,
    state: Mutex<PlayerState>,
    candidates: SharedMap<UserId, Vec<Track>>,
    // Solo un advance a la vez: la resolución suspende entre pop y play
    advance_gate: tokio::sync::Mutex<()>,
    events_tx: flume::Sender<PlaybackEvent>,
    events_rx: flume::Receiver<PlaybackEvent>,
}

impl PlaybackSession {
    pub fn new(
        guild_id: GuildId,
        connection: Arc<dyn VoiceConnection>,
        resolver: Arc<TrackResolver>,
    ) -> Self {
        let (events_tx, events_rx) = flume::unbounded();
        Self {
            guild_id,
            connection: RwLock::new(connection),
            resolver,
            queue: SharedList::new(),
            state: Mutex::new(PlayerState::default()),
            candidates: SharedMap::new(),
            advance_gate: tokio::sync::Mutex::new(()),
            events_tx,
            events_rx,
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn connection(&self) -> Arc<dyn VoiceConnection> {
        self.connection.read().clone()
    }

    /// Reemplaza la conexión tras un nuevo join
    pub fn replace_connection(&self, connection: Arc<dyn VoiceConnection>) {
        *self.connection.write() = connection;
    }

    /// Starts the task that turns transport completions back into session work.
    ///
    /// The task holds only a weak reference and ends once the session is gone.
    pub fn spawn_event_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let session: Weak<Self> = Arc::downgrade(self);
        let events = self.events_rx.clone();
        let guild_id = self.guild_id;

        tokio::spawn(async move {
            while let Ok(event) = events.recv_async().await {
                let Some(session) = session.upgrade() else {
                    break;
                };
                session.handle_event(event).await;
            }
            debug!("🔚 Event loop finished for guild {}", guild_id);
        })
    }

    pub fn state(&self) -> PlaybackState {
        let queue_empty = self.queue.is_empty();
        let state = self.state.lock();
        match (&state.active, state.paused) {
            (Some(_), false) => PlaybackState::Playing,
            (Some(_), true) => PlaybackState::Paused,
            (None, true) if queue_empty => PlaybackState::Stopped,
            (None, _) => PlaybackState::Idle,
        }
    }

    pub fn active(&self) -> Option<Track> {
        self.state.lock().active.clone()
    }

    pub fn queued(&self) -> Vec<Track> {
        self.queue.snapshot()
    }

    pub fn is_looping(&self) -> bool {
        self.state.lock().looping
    }

    /// Play request from the command front-end: a URL is resolved and queued,
    /// anything else is searched and listed as candidates.
    pub async fn play(&self, request: &str, requester: Option<UserId>) -> Outcome {
        let request = request.trim();
        if request.is_empty() {
            return Outcome::info("Nothing to play.");
        }
        if !is_http_url(request) {
            return self.search(request, requester).await;
        }

        let resolution = match self.resolver.resolve(request, requester).await {
            Ok(resolution) => resolution,
            Err(e) => {
                warn!("❌ Guild {}: could not resolve {}: {}", self.guild_id, request, e);
                return Outcome::failed("No tracks found.");
            }
        };

        let mut outcome = match resolution.tracks.as_slice() {
            [single] => Outcome::done(format!("Added to queue: {}", single.label())),
            tracks => Outcome::done(format!("Added {} tracks to queue.", tracks.len())),
        };
        if resolution.truncated {
            outcome = outcome.and_then_line(format!(
                "Playlist too long, only the first {} tracks were added.",
                resolution.tracks.len()
            ));
        }
        if resolution.skipped > 0 {
            outcome = outcome.and_then_line(format!(
                "Skipped {} unavailable entries.",
                resolution.skipped
            ));
        }

        let total = self.queue.extend(resolution.tracks);
        debug!("📋 Guild {}: queue length {}", self.guild_id, total);

        let started = self.resume().await;
        with_follow_up(outcome, started)
    }

    /// Lista candidatos de búsqueda para que el usuario elija con `pick`
    pub async fn search(&self, query: &str, requester: Option<UserId>) -> Outcome {
        let candidates = match self.resolver.search(query, requester).await {
            Ok(candidates) => candidates,
            Err(ResolveError::NothingFound(_)) => return Outcome::failed("No tracks found."),
            Err(e) => {
                warn!("❌ Guild {}: search failed for {}: {}", self.guild_id, query, e);
                return Outcome::failed("No tracks found.");
            }
        };

        let mut outcome = Outcome::done(format!("Results for \"{}\":", query));
        for (index, track) in candidates.iter().enumerate() {
            outcome = outcome.and_then_line(format!("{}. {}", index + 1, track.label()));
        }
        outcome = outcome.and_then_line("Use `pick <n>` to choose one.");

        if let Some(user) = requester {
            self.candidates.set(user, candidates);
        }
        outcome
    }

    /// Encola el candidato `index` (1-based) de la última búsqueda del usuario
    pub async fn choose(&self, requester: UserId, index: usize) -> Outcome {
        let Some(candidates) = self.candidates.get(&requester) else {
            return Outcome::info("No search results to pick from. Use `play <query>` first.");
        };
        let Some(track) = index.checked_sub(1).and_then(|i| candidates.get(i)).cloned() else {
            return Outcome::info(format!("Pick a number between 1 and {}.", candidates.len()));
        };
        self.candidates.delete(&requester);

        let label = track.label();
        self.queue.append(track);
        let started = self.resume().await;
        with_follow_up(Outcome::done(format!("Added to queue: {}", label)), started)
    }

    /// Appends a track; starts playback when idle and not explicitly paused.
    pub async fn enqueue(&self, track: Track) -> Outcome {
        let label = track.label();
        self.queue.append(track);
        let outcome = Outcome::done(format!("Added to queue: {}", label));

        let idle = {
            let state = self.state.lock();
            state.active.is_none() && !state.paused
        };
        if idle {
            let started = self.advance().await;
            return with_follow_up(outcome, started);
        }
        outcome
    }

    /// Pops the head of the queue and starts transmitting it.
    ///
    /// Unresolved tracks are resolved here; a track that fails to resolve is
    /// dropped and the next one is tried.
    pub async fn advance(&self) -> Outcome {
        let _gate = self.advance_gate.lock().await;

        if self.queue.is_empty() {
            return Outcome::info("Queue is empty.");
        }
        let connection = self.connection();
        if !connection.is_connected().await {
            return Outcome::failed("Not connected to a voice channel.");
        }
        let has_active = self.state.lock().active.is_some();
        if has_active || connection.is_playing().await {
            return Outcome::info("Already playing.");
        }

        while let Some(mut track) = self.queue.pop_front() {
            if !track.is_resolved() {
                if let Err(e) = self.resolver.resolve_track(&mut track).await {
                    warn!(
                        "⚠️ Guild {}: skipping {} ({}): {}",
                        self.guild_id,
                        track.title(),
                        track.request_url(),
                        e
                    );
                    continue;
                }
            }
            return self.start(connection.as_ref(), track).await;
        }

        Outcome::failed("No track to play.")
    }

    /// Inicia la transmisión; refresca el stream una sola vez si parece expirado
    async fn start(&self, connection: &dyn VoiceConnection, mut track: Track) -> Outcome {
        let mut refreshed = false;

        loop {
            let generation = self.begin_playback(&track);
            let Some(playable) = track.playable() else {
                break;
            };

            let result = connection.play(playable, self.continuation(generation)).await;
            if self.superseded(generation) {
                // stop/disconnect ran while the transport was still starting
                if result.is_ok() {
                    if let Err(e) = connection.stop().await {
                        warn!("❌ Guild {}: stop after start failed: {}", self.guild_id, e);
                    }
                }
                info!("⏹️ Guild {}: {} stopped while starting", self.guild_id, track.title());
                return Outcome::info("Playback was stopped before it started.");
            }

            match result {
                Ok(()) => {
                    info!("▶️ Guild {}: now playing {}", self.guild_id, track.title());
                    return Outcome::done(format!("Now playing: {}", track.label()));
                }
                Err(e) if !refreshed && is_stale_start(&e) => {
                    warn!(
                        "🔄 Guild {}: stream for {} looks expired: {}",
                        self.guild_id,
                        track.title(),
                        e
                    );
                    refreshed = true;
                    match self.resolver.refresh_stream_locator(&track).await {
                        Some(url) => track.set_stream_url(url),
                        None => break,
                    }
                }
                Err(e) => {
                    warn!("❌ Guild {}: failed to play {}: {}", self.guild_id, track.title(), e);
                    break;
                }
            }
        }

        self.abort_playback();
        Outcome::failed("Failed to play track.")
    }

    fn begin_playback(&self, track: &Track) -> u64 {
        let mut state = self.state.lock();
        state.generation += 1;
        state.active = Some(track.clone());
        state.generation
    }

    fn superseded(&self, generation: u64) -> bool {
        self.state.lock().generation != generation
    }

    fn abort_playback(&self) {
        let mut state = self.state.lock();
        state.generation += 1;
        state.active = None;
    }

    /// Continuation handed to the transport. Runs on the transport's context
    /// and only posts an event.
    fn continuation(&self, generation: u64) -> Completion {
        let events = self.events_tx.clone();
        let guild_id = self.guild_id;
        Completion::new(move |error| {
            if events
                .send(PlaybackEvent::Finished { generation, error })
                .is_err()
            {
                debug!("Guild {}: session gone, completion dropped", guild_id);
            }
        })
    }

    async fn handle_event(&self, event: PlaybackEvent) {
        let PlaybackEvent::Finished { generation, error } = event;

        let (finished, looping, paused) = {
            let mut state = self.state.lock();
            if state.generation != generation {
                debug!(
                    "Guild {}: ignoring completion of generation {} (current {})",
                    self.guild_id, generation, state.generation
                );
                return;
            }
            (state.active.take(), state.looping, state.paused)
        };

        if let Some(error) = error {
            warn!("❌ Guild {}: transmission ended with error: {}", self.guild_id, error);
        }
        if let Some(track) = finished {
            debug!("⏹️ Guild {}: finished {}", self.guild_id, track.title());
            if looping {
                self.queue.append(track);
            }
        }

        if !paused && !self.queue.is_empty() {
            let outcome = self.advance().await;
            if outcome.is_failure() {
                warn!("⚠️ Guild {}: {}", self.guild_id, outcome.message);
            }
        }
    }

    /// Drains pending completions inline.
    #[cfg(test)]
    pub(crate) async fn pump_events(&self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event).await;
        }
    }

    pub async fn pause(&self) -> Outcome {
        let (title, paused) = {
            let state = self.state.lock();
            match &state.active {
                Some(track) => (track.title().to_string(), state.paused),
                None => return Outcome::info("Player is not playing."),
            }
        };
        if paused {
            return Outcome::info(format!("Already paused: {}", title));
        }

        if let Err(e) = self.connection().pause().await {
            warn!("❌ Guild {}: pause failed: {}", self.guild_id, e);
            return Outcome::failed("Failed to pause.");
        }
        self.state.lock().paused = true;
        info!("⏸️ Guild {}: paused {}", self.guild_id, title);
        Outcome::done(format!("Paused: {}", title))
    }

    /// Clears the pause flag and resumes the active track, or starts the queue
    /// when nothing is active.
    pub async fn resume(&self) -> Outcome {
        let (title, paused) = {
            let mut state = self.state.lock();
            let paused = std::mem::replace(&mut state.paused, false);
            (state.active.as_ref().map(|t| t.title().to_string()), paused)
        };

        match title {
            Some(title) if paused => {
                if let Err(e) = self.connection().resume().await {
                    warn!("❌ Guild {}: resume failed: {}", self.guild_id, e);
                    self.state.lock().paused = true;
                    return Outcome::failed("Failed to resume.");
                }
                info!("▶️ Guild {}: resumed {}", self.guild_id, title);
                Outcome::done(format!("Resumed: {}", title))
            }
            Some(title) => Outcome::info(format!("Already playing: {}", title)),
            None if self.queue.is_empty() => Outcome::info("Nothing to resume."),
            None => self.advance().await,
        }
    }

    /// Halts transmission, empties the queue and leaves the session paused.
    pub async fn stop(&self) -> Outcome {
        if self.state.lock().active.is_none() {
            return Outcome::info("Player is not playing.");
        }
        self.halt();

        if let Err(e) = self.connection().stop().await {
            warn!("❌ Guild {}: stop failed: {}", self.guild_id, e);
        }
        info!("⏹️ Guild {}: stopped", self.guild_id);
        Outcome::done("Stopped playback and cleared the queue.")
    }

    fn halt(&self) -> usize {
        {
            let mut state = self.state.lock();
            state.generation += 1;
            state.active = None;
            state.paused = true;
        }
        self.queue.clear()
    }

    /// Skips the active track plus extra items: `count > 1` takes `count - 1`
    /// from the head, a negative count takes `|count|` from the tail.
    ///
    /// Waits for a start in progress. Nothing changes unless the transport
    /// accepted the stop.
    pub async fn skip(&self, count: Option<i64>) -> Outcome {
        let gate = self.advance_gate.lock().await;

        let Some(current) = self.active().map(|t| t.title().to_string()) else {
            return Outcome::info("Player is not playing.");
        };

        if let Err(e) = self.connection().stop().await {
            warn!("❌ Guild {}: skip failed: {}", self.guild_id, e);
            return Outcome::failed("Failed to skip.");
        }

        self.state.lock().paused = false;
        let removed = match count {
            Some(n) if n > 1 => self.queue.drain_front((n - 1) as usize),
            Some(n) if n < 0 => self.queue.drain_back(n.unsigned_abs() as usize),
            _ => Vec::new(),
        };
        drop(gate);

        // La continuación pudo ejecutarse con la sesión aún en pausa
        let idle = self.state.lock().active.is_none();
        if idle && !self.queue.is_empty() {
            let outcome = self.advance().await;
            if outcome.is_failure() {
                warn!("⚠️ Guild {}: {}", self.guild_id, outcome.message);
            }
        }

        info!("⏭️ Guild {}: skipped {} tracks", self.guild_id, removed.len() + 1);
        removed.iter().fold(
            Outcome::done(format!("Skipped: {}", current)),
            |outcome, track| outcome.and_then_line(format!("Skipped: {}", track.title())),
        )
    }

    pub fn set_loop(&self, enabled: bool) -> Outcome {
        self.state.lock().looping = enabled;
        info!("🔁 Guild {}: looping {}", self.guild_id, enabled);
        if enabled {
            Outcome::done("Looping is enabled.")
        } else {
            Outcome::done("Looping is disabled.")
        }
    }

    pub fn clear(&self) -> Outcome {
        match self.queue.clear() {
            0 => Outcome::info("Queue is already empty."),
            removed => {
                debug!("🗑️ Guild {}: cleared {} tracks", self.guild_id, removed);
                Outcome::done("Queue cleared.")
            }
        }
    }

    pub fn queue_listing(&self) -> Outcome {
        let queued = self.queue.snapshot();
        if queued.is_empty() {
            return Outcome::info("Queue is empty.");
        }

        let mut outcome = Outcome::done(format!("Queue ({} tracks):", queued.len()));
        for (index, track) in queued.iter().take(QUEUE_LISTING_LIMIT).enumerate() {
            outcome = outcome.and_then_line(format!("{}. {}", index + 1, track.label()));
        }
        if queued.len() > QUEUE_LISTING_LIMIT {
            outcome = outcome.and_then_line(format!(
                "... and {} more",
                queued.len() - QUEUE_LISTING_LIMIT
            ));
        }
        outcome
    }

    pub async fn status(&self) -> Outcome {
        let (active, paused, looping) = {
            let state = self.state.lock();
            (state.active.clone(), state.paused, state.looping)
        };
        let Some(track) = active else {
            return Outcome::info("Nothing is playing.");
        };

        let mut outcome = Outcome::done(format!("Now playing: {}", track));
        let position = self.connection().position().await;
        match (position, track.duration()) {
            (Some(position), Some(length)) => {
                outcome = outcome.and_then_line(format!(
                    "Position: {} / {}",
                    format_length(position),
                    format_length(length)
                ));
            }
            (None, Some(length)) => {
                outcome = outcome.and_then_line(format!("Length: {}", format_length(length)));
            }
            (Some(position), None) => {
                outcome = outcome.and_then_line(format!("Position: {}", format_length(position)));
            }
            (None, None) => {}
        }
        if let Some(playlist) = track.playlist_url() {
            outcome = outcome.and_then_line(format!("Playlist: {}", playlist));
        }
        if let Some(source) = track.extractor() {
            outcome = outcome.and_then_line(format!("Source: {}", source));
        }
        if let Some(thumbnail) = track.thumbnail() {
            outcome = outcome.and_then_line(format!("Thumbnail: {}", thumbnail));
        }
        if paused {
            outcome = outcome.and_then_line("Paused.");
        }
        if looping {
            outcome = outcome.and_then_line("Looping is enabled.");
        }
        outcome.and_then_line(format!("Up next: {} tracks", self.queue.len()))
    }

    /// Stops everything and releases the voice connection.
    pub async fn disconnect(&self) -> Outcome {
        let cleared = self.halt();
        self.candidates.clear();

        if let Err(e) = self.connection().disconnect().await {
            warn!("❌ Guild {}: disconnect failed: {}", self.guild_id, e);
            return Outcome::failed(format!("Failed to disconnect: {}", e));
        }
        info!("👋 Guild {}: disconnected ({} tracks dropped)", self.guild_id, cleared);
        Outcome::done("Disconnected.")
    }
}

fn is_stale_start(error: &VoiceError) -> bool {
    matches!(error, VoiceError::Start(message) if is_stale_locator_error(message))
}

/// Agrega el resultado de arrancar la reproducción cuando aporta algo
fn with_follow_up(outcome: Outcome, started: Outcome) -> Outcome {
    match started.kind {
        OutcomeKind::Info => outcome,
        _ => outcome.and_then_line(started.to_string()),
    }
}
