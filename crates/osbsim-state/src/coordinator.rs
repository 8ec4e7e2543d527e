//! Reader/writer coordinator guarding a resource table.
//!
//! Any number of readers may hold the coordinator at once. The first reader
//! to arrive takes the single exclusivity token on behalf of all readers and
//! the last one to leave gives it back; a writer takes the token directly.
//! Readers are preferred: a writer waiting for the token never delays a
//! reader arriving while other readers are active.
//!
//! The token lives under a short `std::sync::Mutex` that is never held across
//! an `.await`. Waiters park on a `tokio::sync::Notify` that fires whenever
//! the token becomes free.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tracing::trace;

/// Who currently holds the exclusivity token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Free,
    Readers(usize),
    Writer,
}

pub struct Coordinator {
    token: Mutex<Token>,
    released: Notify,
}

/// Shared access; dropping it ends the read.
#[must_use = "the read ends as soon as the guard is dropped"]
pub struct ReadGuard<'a> {
    coordinator: &'a Coordinator,
}

/// Exclusive access; dropping it releases the write.
#[must_use = "the write is released as soon as the guard is dropped"]
pub struct WriteGuard<'a> {
    coordinator: &'a Coordinator,
}

impl Coordinator {
    pub fn new() -> Self {
        Self {
            token: Mutex::new(Token::Free),
            released: Notify::new(),
        }
    }

    /// Wait until no writer holds the token, then join the active readers.
    pub async fn begin_read(&self) -> ReadGuard<'_> {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            // Register before checking so a release between the check and
            // the await is not missed.
            released.as_mut().enable();
            if let Some(guard) = self.try_begin_read() {
                return guard;
            }
            released.await;
        }
    }

    pub fn try_begin_read(&self) -> Option<ReadGuard<'_>> {
        let mut token = self.lock_token();
        match *token {
            Token::Free => *token = Token::Readers(1),
            Token::Readers(n) => *token = Token::Readers(n + 1),
            Token::Writer => return None,
        }
        Some(ReadGuard { coordinator: self })
    }

    /// Wait until the token is free, then hold it exclusively.
    pub async fn acquire_write(&self) -> WriteGuard<'_> {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();
            if let Some(guard) = self.try_acquire_write() {
                return guard;
            }
            released.await;
        }
    }

    pub fn try_acquire_write(&self) -> Option<WriteGuard<'_>> {
        let mut token = self.lock_token();
        if *token != Token::Free {
            return None;
        }
        *token = Token::Writer;
        Some(WriteGuard { coordinator: self })
    }

    /// Number of readers currently inside.
    pub fn active_readers(&self) -> usize {
        match *self.lock_token() {
            Token::Readers(n) => n,
            _ => 0,
        }
    }

    pub fn is_write_locked(&self) -> bool {
        *self.lock_token() == Token::Writer
    }

    fn end_read(&self) {
        let mut token = self.lock_token();
        match *token {
            Token::Readers(1) => {
                *token = Token::Free;
                drop(token);
                trace!("last reader left, token released");
                self.released.notify_waiters();
            }
            Token::Readers(n) => *token = Token::Readers(n - 1),
            // Guards are only minted while the token is held in read mode.
            Token::Free | Token::Writer => {}
        }
    }

    fn release_write(&self) {
        let mut token = self.lock_token();
        *token = Token::Free;
        drop(token);
        self.released.notify_waiters();
    }

    fn lock_token(&self) -> MutexGuard<'_, Token> {
        // The critical sections cannot panic, so a poisoned lock still holds
        // a consistent token.
        self.token.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.end_read();
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.release_write();
    }
}
