//! Per-chunk access state machine.
//!
//! Each chunk ID is in one of four states:
//!
//! - absent: nobody uses the chunk (no entry in the map);
//! - open: one or more readers hold it;
//! - writing: exactly one writer holds it, with no readers;
//! - deleting: the chunk is being removed and refuses every acquisition.
//!
//! All states live in one mutex-guarded map and every state change wakes all
//! waiters, which then re-check their own key. Shutdown and cancellation are
//! observed in the same wait loop.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use common::Cx;
use tokio::sync::Notify;

use crate::error::{Error, Result};
use crate::model::Id;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AccessState {
    pub(crate) readers: usize,
    pub(crate) writing: bool,
    pub(crate) deleting: bool,
}

impl AccessState {
    fn is_idle(&self) -> bool {
        self.readers == 0 && !self.writing && !self.deleting
    }
}

#[derive(Debug, Default)]
struct Inner {
    closed: bool,
    states: HashMap<Id, AccessState>,
}

#[derive(Debug, Default)]
pub struct ChunkAccessor {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl ChunkAccessor {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Shared acquisition. Waits while the chunk is being written.
    pub async fn acquire_read(&self, cx: &Cx, id: Id) -> Result<()> {
        self.acquire(cx, id, |state| {
            if state.writing {
                return false;
            }
            state.readers += 1;
            true
        })
        .await
    }

    /// Exclusive acquisition. Waits until no reader or writer holds the chunk.
    pub async fn acquire_write(&self, cx: &Cx, id: Id) -> Result<()> {
        self.acquire(cx, id, |state| {
            if state.writing || state.readers > 0 {
                return false;
            }
            state.writing = true;
            true
        })
        .await
    }

    async fn acquire<F>(&self, cx: &Cx, id: Id, mut try_take: F) -> Result<()>
    where
        F: FnMut(&mut AccessState) -> bool,
    {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.lock();
                if inner.closed {
                    return Err(Error::Closed);
                }
                let state = inner.states.entry(id).or_default();
                if state.deleting {
                    return Err(Error::NotExist(format!("chunk {id} is being deleted")));
                }
                if try_take(state) {
                    return Ok(());
                }
            }

            tokio::select! {
                _ = &mut notified => {}
                err = cx.done() => return Err(err.into()),
            }
        }
    }

    pub fn release_read(&self, id: Id) {
        self.update(id, |state| state.readers = state.readers.saturating_sub(1));
    }

    pub fn release_write(&self, id: Id) {
        self.update(id, |state| state.writing = false);
    }

    /// Marks an unused chunk as being deleted. Returns `false`, changing
    /// nothing, when the chunk is held, already being deleted, or the
    /// accessor is shut down.
    pub fn mark_deleting(&self, id: Id) -> bool {
        let mut inner = self.lock();
        if inner.closed {
            return false;
        }
        let state = inner.states.entry(id).or_default();
        if !state.is_idle() {
            return false;
        }
        state.deleting = true;
        true
    }

    /// Ends a deletion started with [`mark_deleting`](Self::mark_deleting).
    pub fn release_deleting(&self, id: Id) {
        self.update(id, |state| state.deleting = false);
    }

    /// Shuts the accessor down. Blocked and future acquisitions fail with
    /// [`Error::Closed`]; releases keep working so outstanding holders can
    /// finish.
    pub fn shutdown(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    #[cfg(test)]
    pub(crate) fn state(&self, id: Id) -> Option<AccessState> {
        self.lock().states.get(&id).copied()
    }

    fn update(&self, id: Id, f: impl FnOnce(&mut AccessState)) {
        {
            let mut inner = self.lock();
            if let Some(state) = inner.states.get_mut(&id) {
                f(state);
                if state.is_idle() {
                    inner.states.remove(&id);
                }
            }
        }
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::time::Duration;

    use ulid::Ulid;

    use super::*;

    fn chunk_id() -> Id {
        Ulid::new()
    }

    fn short_cx() -> Cx {
        Cx::background().with_timeout(Duration::from_millis(30))
    }

    #[tokio::test]
    async fn should_mark_deleting_only_idle_chunks() {
        // given
        let accessor = ChunkAccessor::new();
        let id = chunk_id();

        // when/then
        assert!(accessor.mark_deleting(id));
        assert!(!accessor.mark_deleting(id));
        accessor.release_deleting(id);
        assert_eq!(accessor.state(id), None);

        accessor.acquire_read(&Cx::background(), id).await.unwrap();
        assert!(!accessor.mark_deleting(id));
        accessor.release_read(id);
        assert!(accessor.mark_deleting(id));
        accessor.release_deleting(id);

        accessor.shutdown();
        assert!(!accessor.mark_deleting(id));
    }

    #[tokio::test]
    async fn should_refuse_acquisition_of_deleting_chunk() {
        // given
        let accessor = ChunkAccessor::new();
        let id = chunk_id();
        assert!(accessor.mark_deleting(id));

        // when
        let read = accessor.acquire_read(&Cx::background(), id).await;
        let write = accessor.acquire_write(&Cx::background(), id).await;

        // then
        assert!(matches!(read, Err(Error::NotExist(_))));
        assert!(matches!(write, Err(Error::NotExist(_))));
    }

    #[tokio::test]
    async fn should_block_reader_while_writing() {
        // given
        let accessor = ChunkAccessor::new();
        let id = chunk_id();
        accessor.acquire_write(&Cx::background(), id).await.unwrap();

        // when
        let result = accessor.acquire_read(&short_cx(), id).await;

        // then
        assert_eq!(result, Err(Error::DeadlineExceeded));
        accessor.release_write(id);
        accessor.acquire_read(&short_cx(), id).await.unwrap();
    }

    #[tokio::test]
    async fn should_block_writer_while_reading() {
        // given
        let accessor = ChunkAccessor::new();
        let id = chunk_id();
        accessor.acquire_read(&Cx::background(), id).await.unwrap();
        accessor.acquire_read(&Cx::background(), id).await.unwrap();

        // when
        let blocked = accessor.acquire_write(&short_cx(), id).await;
        accessor.release_read(id);
        let still_blocked = accessor.acquire_write(&short_cx(), id).await;
        accessor.release_read(id);
        let granted = accessor.acquire_write(&short_cx(), id).await;

        // then
        assert_eq!(blocked, Err(Error::DeadlineExceeded));
        assert_eq!(still_blocked, Err(Error::DeadlineExceeded));
        assert_eq!(granted, Ok(()));
        assert_eq!(
            accessor.state(id),
            Some(AccessState {
                readers: 0,
                writing: true,
                deleting: false
            })
        );
    }

    #[tokio::test]
    async fn should_return_canceled_when_context_is_canceled() {
        // given
        let accessor = Arc::new(ChunkAccessor::new());
        let id = chunk_id();
        accessor.acquire_write(&Cx::background(), id).await.unwrap();
        let cx = Cx::background();

        // when
        let waiter = {
            let accessor = accessor.clone();
            let cx = cx.clone();
            tokio::spawn(async move { accessor.acquire_write(&cx, id).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        cx.cancel();

        // then
        assert_eq!(waiter.await.unwrap(), Err(Error::Canceled));
    }

    #[tokio::test]
    async fn should_wake_waiting_reader_when_writer_releases() {
        // given
        let accessor = Arc::new(ChunkAccessor::new());
        let id = chunk_id();
        accessor.acquire_write(&Cx::background(), id).await.unwrap();
        let waiter = {
            let accessor = accessor.clone();
            tokio::spawn(async move { accessor.acquire_read(&Cx::background(), id).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        // when
        accessor.release_write(id);

        // then
        assert_eq!(waiter.await.unwrap(), Ok(()));
        assert_eq!(accessor.state(id).map(|s| s.readers), Some(1));
    }

    #[tokio::test]
    async fn should_fail_blocked_and_new_calls_after_shutdown() {
        // given
        let accessor = Arc::new(ChunkAccessor::new());
        let id = chunk_id();
        accessor.acquire_write(&Cx::background(), id).await.unwrap();
        let waiter = {
            let accessor = accessor.clone();
            tokio::spawn(async move { accessor.acquire_read(&Cx::background(), id).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        // when
        accessor.shutdown();

        // then
        assert_eq!(waiter.await.unwrap(), Err(Error::Closed));
        assert_eq!(
            accessor.acquire_read(&Cx::background(), chunk_id()).await,
            Err(Error::Closed)
        );
        assert_eq!(
            accessor.acquire_write(&Cx::background(), chunk_id()).await,
            Err(Error::Closed)
        );
        // outstanding holders still release
        accessor.release_write(id);
        assert_eq!(accessor.state(id), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn should_never_mix_writer_with_readers() {
        // given
        let accessor = Arc::new(ChunkAccessor::new());
        let id = chunk_id();
        // positive: active readers, -1: active writer
        let holders = Arc::new(AtomicI32::new(0));

        // when
        let mut tasks = Vec::new();
        for i in 0..64 {
            let accessor = accessor.clone();
            let holders = holders.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..20 {
                    if i % 4 == 0 {
                        accessor.acquire_write(&Cx::background(), id).await.unwrap();
                        let prev = holders.swap(-1, Ordering::SeqCst);
                        assert_eq!(prev, 0, "writer entered while held");
                        tokio::task::yield_now().await;
                        holders.store(0, Ordering::SeqCst);
                        accessor.release_write(id);
                    } else {
                        accessor.acquire_read(&Cx::background(), id).await.unwrap();
                        let prev = holders.fetch_add(1, Ordering::SeqCst);
                        assert!(prev >= 0, "reader entered while writing");
                        tokio::task::yield_now().await;
                        holders.fetch_sub(1, Ordering::SeqCst);
                        accessor.release_read(id);
                    }
                }
            }));
        }

        // then
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(accessor.state(id), None);
    }
}
