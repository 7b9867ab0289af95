//! Request contexts: cancellation plus the session a request runs for.
//!
//! A context is cancelled by dropping the sending half of its `done` channel,
//! so any thread can wait for cancellation inside a `select!` next to its
//! other channel operations. Cancelling a context cancels every context
//! derived from it.

use std::sync::{Arc, Weak};

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// returned by operations that observed a cancelled context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("context cancelled")]
pub struct Cancelled;

/// the user a request runs for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user: String,
    pub host: String,
}

impl Session {
    pub fn new(user: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            host: host.into(),
        }
    }
}

struct ContextInner {
    cancelled: AtomicBool,
    done_tx: Mutex<Option<Sender<()>>>,
    done_rx: Receiver<()>,
    children: Mutex<Vec<Weak<ContextInner>>>,
}

impl ContextInner {
    fn new() -> Arc<Self> {
        let (tx, rx) = bounded(0);
        Arc::new(Self {
            cancelled: AtomicBool::new(false),
            done_tx: Mutex::new(Some(tx)),
            done_rx: rx,
            children: Mutex::new(Vec::new()),
        })
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.done_tx.lock().take();

        let children = std::mem::take(&mut *self.children.lock());
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel();
        }
    }
}

#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
    session: Option<Arc<Session>>,
}

impl Context {
    /// a root context that is never cancelled on its own
    pub fn background() -> Self {
        Self {
            inner: ContextInner::new(),
            session: None,
        }
    }

    pub fn with_session(mut self, session: Session) -> Self {
        self.session = Some(Arc::new(session));
        self
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_deref()
    }

    /// Derive a child context plus the handle that cancels it.
    pub fn with_cancel(&self) -> (Context, CancelHandle) {
        let child = ContextInner::new();
        {
            let mut children = self.inner.children.lock();
            children.retain(|c| c.strong_count() > 0);
            children.push(Arc::downgrade(&child));
        }
        if self.is_cancelled() {
            child.cancel();
        }

        let ctx = Context {
            inner: Arc::clone(&child),
            session: self.session.clone(),
        };
        (ctx, CancelHandle { inner: child })
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Disconnects once the context is cancelled; never delivers a message.
    pub fn done(&self) -> &Receiver<()> {
        &self.inner.done_rx
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.is_cancelled())
            .field("session", &self.session)
            .finish()
    }
}

/// Cancels the context it was created with. Cancelling twice is a no-op.
#[derive(Clone)]
pub struct CancelHandle {
    inner: Arc<ContextInner>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.inner.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::select;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_background_is_live() {
        let ctx = Context::background();
        assert!(ctx.check().is_ok());
        assert!(ctx.done().try_recv().is_err());
        assert!(!ctx.done().try_recv().unwrap_err().is_disconnected());
    }

    #[test]
    fn test_cancel_propagates_to_children() {
        let root = Context::background().with_session(Session::new("root", "localhost"));
        let (parent, parent_cancel) = root.with_cancel();
        let (child, _child_cancel) = parent.with_cancel();
        assert_eq!(child.session().map(|s| s.user.as_str()), Some("root"));

        parent_cancel.cancel();
        parent_cancel.cancel();

        assert_eq!(parent.check(), Err(Cancelled));
        assert_eq!(child.check(), Err(Cancelled));
        assert!(root.check().is_ok());
        assert!(child.done().recv().is_err());
    }

    #[test]
    fn test_child_of_cancelled_context_starts_cancelled() {
        let (parent, cancel) = Context::background().with_cancel();
        cancel.cancel();
        let (child, _) = parent.with_cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn test_done_wakes_blocked_select() {
        let (ctx, cancel) = Context::background().with_cancel();
        let (_tx, rx) = bounded::<u32>(0);

        let waiter = thread::spawn(move || {
            select! {
                recv(ctx.done()) -> _ => true,
                recv(rx) -> _ => false,
            }
        });
        thread::sleep(Duration::from_millis(20));
        cancel.cancel();
        assert!(waiter.join().unwrap());
    }
}
