//! Observer attachment with scoped release.
//!
//! Every probe and every playback output gets a fresh observer set.  `attach`
//! hands back two halves:
//!
//! ```text
//!   Attachment  kept by the coordinator; dropping it detaches the set
//!   Emitter     given to the output/probe; forwards events into the core
//!                 loop tagged with the owner's generation, until detached
//! ```
//!
//! [`Scope`] ties an `Attachment` to the handle it observes so that dropping
//! the scope always detaches first and releases second.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::core::CoreEvent;

/// An event that belongs to one of a fixed set of kinds.
pub trait Observed: Send + 'static {
    type Kind: Copy + PartialEq + Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

/// Something that holds resources until told to let go.  Must be safe to
/// call once after the observers are already detached.
pub trait Release {
    fn release(&mut self);
}

pub struct Emitter<E: Observed> {
    generation: u64,
    attached: Arc<AtomicBool>,
    kinds: Arc<[E::Kind]>,
    tx: mpsc::UnboundedSender<CoreEvent>,
    wrap: fn(u64, E) -> CoreEvent,
}

impl<E: Observed> Clone for Emitter<E> {
    fn clone(&self) -> Self {
        Self {
            generation: self.generation,
            attached: Arc::clone(&self.attached),
            kinds: Arc::clone(&self.kinds),
            tx: self.tx.clone(),
            wrap: self.wrap,
        }
    }
}

impl<E: Observed> Emitter<E> {
    /// Deliver `event` if the set is still attached and observes its kind.
    /// Returns whether it was delivered.
    pub fn emit(&self, event: E) -> bool {
        if !self.attached.load(Ordering::Acquire) {
            return false;
        }
        if !self.kinds.contains(&event.kind()) {
            return false;
        }
        self.tx.send((self.wrap)(self.generation, event)).is_ok()
    }

    #[cfg(test)]
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Detachment token for one observer set.
pub struct Attachment {
    generation: u64,
    attached: Arc<AtomicBool>,
    observers: usize,
}

impl Attachment {
    pub fn detach(&self) {
        if self.attached.swap(false, Ordering::AcqRel) {
            debug!(
                "observers: detached {} for generation {}",
                self.observers, self.generation
            );
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        self.detach();
    }
}

pub fn attach<E: Observed>(
    generation: u64,
    kinds: &[E::Kind],
    tx: mpsc::UnboundedSender<CoreEvent>,
    wrap: fn(u64, E) -> CoreEvent,
) -> (Attachment, Emitter<E>) {
    let attached = Arc::new(AtomicBool::new(true));
    let attachment = Attachment {
        generation,
        attached: Arc::clone(&attached),
        observers: kinds.len(),
    };
    let emitter = Emitter {
        generation,
        attached,
        kinds: kinds.into(),
        tx,
        wrap,
    };
    (attachment, emitter)
}

/// A handle together with the observers attached to it.
pub struct Scope<H: Release + ?Sized> {
    attachment: Attachment,
    handle: Box<H>,
}

impl<H: Release + ?Sized> Scope<H> {
    pub fn new(attachment: Attachment, handle: Box<H>) -> Self {
        Self { attachment, handle }
    }

    pub fn generation(&self) -> u64 {
        self.attachment.generation()
    }

    pub fn handle(&self) -> &H {
        &self.handle
    }

    pub fn handle_mut(&mut self) -> &mut H {
        &mut self.handle
    }
}

impl<H: Release + ?Sized> Drop for Scope<H> {
    fn drop(&mut self) {
        self.attachment.detach();
        self.handle.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug)]
    enum Ping {
        A,
        B,
    }

    impl Observed for Ping {
        type Kind = u8;

        fn kind(&self) -> u8 {
            match self {
                Ping::A => 0,
                Ping::B => 1,
            }
        }
    }

    fn wrap(generation: u64, _p: Ping) -> CoreEvent {
        CoreEvent::Connectivity {
            online: generation % 2 == 0,
        }
    }

    #[test]
    fn test_emit_respects_kinds_and_detach() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (attachment, emitter) = attach::<Ping>(4, &[0], tx, wrap);

        assert!(emitter.emit(Ping::A));
        assert!(!emitter.emit(Ping::B));
        assert!(matches!(
            rx.try_recv(),
            Ok(CoreEvent::Connectivity { online: true })
        ));

        drop(attachment);
        assert!(!emitter.is_attached());
        assert!(!emitter.clone().emit(Ping::A));
        assert!(rx.try_recv().is_err());
    }

    struct Recorder(Arc<Mutex<Vec<&'static str>>>, Arc<AtomicBool>);

    impl Release for Recorder {
        fn release(&mut self) {
            // observers must already be gone when the handle is released
            let step = if self.1.load(Ordering::Acquire) {
                "release-while-attached"
            } else {
                "release"
            };
            self.0.lock().unwrap().push(step);
        }
    }

    #[test]
    fn test_scope_detaches_before_release() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (attachment, emitter) = attach::<Ping>(1, &[0, 1], tx, wrap);
        let log = Arc::new(Mutex::new(Vec::new()));
        let handle: Box<dyn Release> =
            Box::new(Recorder(Arc::clone(&log), Arc::clone(&emitter.attached)));

        let scope = Scope::new(attachment, handle);
        assert_eq!(scope.generation(), 1);
        drop(scope);

        assert_eq!(*log.lock().unwrap(), ["release"]);
        assert!(!emitter.emit(Ping::A));
    }
}
