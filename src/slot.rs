//! Handle slots: a live handle plus the bookkeeping the pool needs for it

use std::time::Duration;

use tokio::time::Instant;

use crate::manager::Manager;

/// One pooled handle, its birth instant and the drain epoch it belongs to.
#[derive(Debug)]
pub(crate) struct Slot<H> {
    id: u64,
    handle: H,
    born: Instant,
    epoch: u64,
}

impl<H> Slot<H> {
    pub fn new(id: u64, handle: H, born: Instant, epoch: u64) -> Self {
        Self {
            id,
            handle,
            born,
            epoch,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn born(&self) -> Instant {
        self.born
    }

    /// Drain epoch the slot was counted under. A slot from an older epoch
    /// is no longer tracked by the accountant.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.born)
    }

    pub fn is_expired(&self, now: Instant, max_lifetime: Option<Duration>) -> bool {
        match max_lifetime {
            Some(limit) => self.age(now) > limit,
            None => false,
        }
    }

    pub fn handle(&self) -> &H {
        &self.handle
    }

    pub fn handle_mut(&mut self) -> &mut H {
        &mut self.handle
    }

    /// Consume the slot and close its handle through the manager.
    pub fn close<M>(self, manager: &M) -> Result<(), M::Error>
    where
        M: Manager<Handle = H>,
    {
        manager.close(self.handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_expiry_boundary() {
        let slot = Slot::new(1, "conn", Instant::now(), 0);
        let limit = Some(Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(!slot.is_expired(Instant::now(), limit));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(slot.is_expired(Instant::now(), limit));
        assert!(!slot.is_expired(Instant::now(), None));
    }

    #[tokio::test(start_paused = true)]
    async fn test_age_never_negative() {
        let later = Instant::now() + Duration::from_secs(5);
        let slot = Slot::new(7, (), later, 3);
        assert_eq!(slot.age(Instant::now()), Duration::ZERO);
        assert_eq!(slot.epoch(), 3);
        assert_eq!(slot.id(), 7);
    }
}
