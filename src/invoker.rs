//! Handler invocation with optional per-session serialization.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use crate::binder::Args;
use crate::config::Configuration;
use crate::error::Error;
use crate::registry::MethodEntry;

/// Mutexes keyed by session identity.
///
/// Entries are created on first use and removed again once no call holds or
/// waits for them, so the table only grows with the number of sessions that
/// currently have calls in flight.
#[derive(Debug, Default)]
pub(crate) struct SessionLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SessionLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn acquire(self: &Arc<Self>, session: &str) -> SessionGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(session.to_string()).or_default())
        };

        let guard = Arc::clone(&lock).lock_owned().await;
        debug!("Acquired session lock for {}", session);

        SessionGuard {
            guard: Some(guard),
            lock,
            session: session.to_string(),
            owner: Arc::clone(self),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Held for the duration of one locked call. Dropping it releases the lock on
/// every exit path, including cancellation of the surrounding future.
pub(crate) struct SessionGuard {
    guard: Option<OwnedMutexGuard<()>>,
    lock: Arc<AsyncMutex<()>>,
    session: String,
    owner: Arc<SessionLocks>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut locks = self.owner.locks.lock().unwrap_or_else(|e| e.into_inner());
        // One reference in the table, one here: nobody else is waiting.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.session);
        }
    }
}

/// Run the handler of `entry` with bound arguments.
///
/// A panic inside the handler is reported as [`Error::Panic`].
pub(crate) async fn invoke(
    entry: &MethodEntry,
    args: Args,
    config: &Configuration,
    locks: &Arc<SessionLocks>,
) -> Result<Value, Error> {
    let lock_requested = entry.descriptor.requires_session_lock || config.synchronize_on_session;
    let _guard = match args.context().session() {
        Some(session) if lock_requested => Some(locks.acquire(session).await),
        _ => None,
    };

    let future = (entry.handler)(args);
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(Error::Panic(panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn same_session_waits_and_table_is_pruned() {
        let locks = Arc::new(SessionLocks::new());

        let first = locks.acquire("s-1").await;
        let waiting = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _second = locks.acquire("s-1").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());
        assert_eq!(locks.len(), 1);

        drop(first);
        waiting.await.unwrap();
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn different_sessions_do_not_block_each_other() {
        let locks = Arc::new(SessionLocks::new());
        let _a = locks.acquire("a").await;
        let b = tokio::time::timeout(Duration::from_millis(50), locks.acquire("b")).await;
        assert!(b.is_ok());
    }

    #[test]
    fn panic_payloads_become_messages() {
        assert_eq!(panic_message(&"boom"), "boom");
        assert_eq!(panic_message(&String::from("bang")), "bang");
        assert_eq!(panic_message(&42_u8), "unknown panic");
    }
}
