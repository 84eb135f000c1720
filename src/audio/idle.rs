//! Idle reaper.
//!
//! A periodic sweep that walks every guild with an idle timer. Guilds whose
//! connection is transmitting get their budget reset; the rest lose one tick
//! worth of budget and are disconnected once it runs out. The sweep polls the
//! transport instead of listening to session events.

use async_trait::async_trait;
use serenity::model::id::GuildId;
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, info, warn};

use super::{registry::SessionRegistry, shared::SharedMap};
use crate::voice::VoiceConnection;

pub const IDLE_NOTICE: &str = "Disconnected because of idling.";

/// Destino de texto para el aviso de desconexión
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdleNotifier: Send + Sync {
    async fn notify(&self, message: &str) -> anyhow::Result<()>;
}

#[derive(Clone)]
struct IdleTimer {
    remaining: Duration,
    connection: Arc<dyn VoiceConnection>,
    notifier: Arc<dyn IdleNotifier>,
}

pub struct IdleReaper {
    timers: SharedMap<GuildId, IdleTimer>,
    registry: Arc<SessionRegistry>,
    idle_timeout: Duration,
    interval: Duration,
}

impl IdleReaper {
    pub fn new(registry: Arc<SessionRegistry>, idle_timeout: Duration, interval: Duration) -> Self {
        Self {
            timers: SharedMap::new(),
            registry,
            idle_timeout,
            interval,
        }
    }

    /// Creates the guild's timer or resets it to the full budget. The notifier
    /// of an existing timer is kept.
    pub fn init_idle_state_for_client(
        &self,
        guild_id: GuildId,
        connection: Arc<dyn VoiceConnection>,
        notifier: Arc<dyn IdleNotifier>,
    ) {
        let budget = self.idle_timeout;
        let fresh = connection.clone();
        let reset = self.timers.update(&guild_id, move |timer| {
            timer.remaining = budget;
            timer.connection = fresh;
        });

        if reset.is_none() {
            self.timers.set(
                guild_id,
                IdleTimer {
                    remaining: budget,
                    connection,
                    notifier,
                },
            );
            debug!("⏲️ Idle timer started for guild {}", guild_id);
        }
    }

    pub fn deinit_idle_state_of_client(&self, guild_id: GuildId) {
        if self.timers.delete(&guild_id).is_some() {
            debug!("⏲️ Idle timer removed for guild {}", guild_id);
        }
    }

    pub fn is_tracked(&self, guild_id: GuildId) -> bool {
        self.timers.contains_key(&guild_id)
    }

    pub fn remaining(&self, guild_id: GuildId) -> Option<Duration> {
        self.timers.get(&guild_id).map(|timer| timer.remaining)
    }

    /// One tick. Returns the guilds evicted by it.
    pub async fn sweep(&self) -> Vec<GuildId> {
        let mut expired = Vec::new();

        for (guild_id, timer) in self.timers.entries() {
            if !timer.connection.is_connected().await {
                debug!("🔌 Guild {}: voice link gone", guild_id);
                expired.push(guild_id);
                continue;
            }

            if timer.connection.is_playing().await {
                let budget = self.idle_timeout;
                self.timers.update(&guild_id, |t| t.remaining = budget);
                continue;
            }

            let step = self.interval;
            let remaining = self.timers.update(&guild_id, |t| {
                t.remaining = t.remaining.saturating_sub(step);
                t.remaining
            });
            if remaining == Some(Duration::ZERO) {
                expired.push(guild_id);
            }
        }

        futures::future::join_all(expired.iter().map(|guild_id| self.evict(*guild_id))).await;
        expired
    }

    async fn evict(&self, guild_id: GuildId) {
        let Some(timer) = self.timers.delete(&guild_id) else {
            return;
        };
        info!("💤 Guild {}: idle budget exhausted, disconnecting", guild_id);

        match self.registry.remove(guild_id).await {
            Some(outcome) if outcome.is_failure() => {
                warn!("⚠️ Guild {}: {}", guild_id, outcome.message);
            }
            Some(_) => {}
            None => {
                if let Err(e) = timer.connection.disconnect().await {
                    warn!("⚠️ Guild {}: disconnect failed: {}", guild_id, e);
                }
            }
        }

        if let Err(e) = timer.notifier.notify(IDLE_NOTICE).await {
            error!("❌ Guild {}: could not send idle notice: {:?}", guild_id, e);
        }
    }

    /// Sweeps forever at the configured interval.
    pub async fn run(self: Arc<Self>) {
        info!(
            "⏲️ Idle reaper started (timeout {}, every {})",
            humantime::format_duration(self.idle_timeout),
            humantime::format_duration(self.interval)
        );
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let evicted = self.sweep().await;
            if !evicted.is_empty() {
                debug!("💤 Evicted {} idle guilds", evicted.len());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::testing::FakeConnection;
    use pretty_assertions::assert_eq;

    const TICK: Duration = Duration::from_secs(10);

    fn reaper(timeout: Duration) -> IdleReaper {
        IdleReaper::new(Arc::new(SessionRegistry::new()), timeout, TICK)
    }

    fn notifier_expecting(times: usize) -> Arc<MockIdleNotifier> {
        let mut notifier = MockIdleNotifier::new();
        notifier
            .expect_notify()
            .withf(|message| message == IDLE_NOTICE)
            .times(times)
            .returning(|_| Ok(()));
        Arc::new(notifier)
    }

    #[tokio::test]
    async fn idle_guild_is_evicted_exactly_once() {
        let reaper = reaper(TICK * 3);
        let conn = FakeConnection::connected();
        let guild = GuildId::new(1);
        reaper.init_idle_state_for_client(guild, conn.clone(), notifier_expecting(1));

        assert!(reaper.sweep().await.is_empty());
        assert!(reaper.sweep().await.is_empty());
        assert_eq!(reaper.remaining(guild), Some(TICK));
        assert_eq!(reaper.sweep().await, vec![guild]);

        assert!(!reaper.is_tracked(guild));
        assert_eq!(conn.disconnects(), 1);

        for _ in 0..5 {
            assert!(reaper.sweep().await.is_empty());
        }
        assert_eq!(conn.disconnects(), 1);
    }

    #[tokio::test]
    async fn transmitting_guild_is_never_evicted() {
        let reaper = reaper(TICK * 2);
        let conn = FakeConnection::connected();
        conn.set_busy(true);
        let guild = GuildId::new(2);
        reaper.init_idle_state_for_client(guild, conn.clone(), notifier_expecting(0));

        for _ in 0..50 {
            assert!(reaper.sweep().await.is_empty());
        }
        assert_eq!(reaper.remaining(guild), Some(TICK * 2));
        assert_eq!(conn.disconnects(), 0);
    }

    #[tokio::test]
    async fn lost_connection_is_evicted_on_next_tick() {
        let reaper = reaper(TICK * 30);
        let conn = FakeConnection::connected();
        let guild = GuildId::new(3);
        reaper.init_idle_state_for_client(guild, conn.clone(), notifier_expecting(1));

        conn.drop_link();
        assert_eq!(reaper.sweep().await, vec![guild]);
        assert!(!reaper.is_tracked(guild));
    }

    #[tokio::test]
    async fn activity_resets_the_budget() {
        let reaper = reaper(TICK * 3);
        let conn = FakeConnection::connected();
        let guild = GuildId::new(4);
        reaper.init_idle_state_for_client(guild, conn.clone(), notifier_expecting(0));

        reaper.sweep().await;
        reaper.sweep().await;
        conn.set_busy(true);
        reaper.sweep().await;
        conn.set_busy(false);
        reaper.sweep().await;
        assert_eq!(reaper.remaining(guild), Some(TICK * 2));

        reaper.init_idle_state_for_client(guild, conn.clone(), notifier_expecting(0));
        assert_eq!(reaper.remaining(guild), Some(TICK * 3));
    }

    #[tokio::test]
    async fn deinit_stops_tracking() {
        let reaper = reaper(TICK);
        let conn = FakeConnection::connected();
        let guild = GuildId::new(5);
        reaper.init_idle_state_for_client(guild, conn.clone(), notifier_expecting(0));
        reaper.deinit_idle_state_of_client(guild);

        assert!(reaper.sweep().await.is_empty());
        assert_eq!(conn.disconnects(), 0);
    }

    #[tokio::test]
    async fn failing_notice_does_not_affect_other_guilds() {
        let reaper = reaper(TICK);
        let first = FakeConnection::connected();
        let second = FakeConnection::connected();

        let mut broken = MockIdleNotifier::new();
        broken
            .expect_notify()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("missing permissions")));
        reaper.init_idle_state_for_client(GuildId::new(6), first.clone(), Arc::new(broken));
        reaper.init_idle_state_for_client(GuildId::new(7), second.clone(), notifier_expecting(1));

        let mut evicted = reaper.sweep().await;
        evicted.sort();
        assert_eq!(evicted, vec![GuildId::new(6), GuildId::new(7)]);
        assert_eq!(first.disconnects(), 1);
        assert_eq!(second.disconnects(), 1);
    }
}
