//! The active-writer slot.
//!
//! A single slot names the writer that implicit function emission should
//! route to. The build pipeline is single-threaded by contract, so the
//! slot is thread-local; opening writer scopes from multiple threads
//! gives each thread an independent slot rather than undefined behavior.
//!
//! The slot follows stack discipline: [`activate`] and [`deactivate`]
//! hand back a [`Saved`] token that must be passed to [`restore`] exactly
//! once. [`crate::writer::WriterScope`] owns the token and restores it on
//! every exit path, so scopes nest LIFO.

use std::cell::RefCell;
use std::rc::Rc;

use crate::writer::Writer;

/// Shared handle to a writer registered in the slot.
pub type ActiveWriter = Rc<RefCell<Writer>>;

thread_local! {
    static CURRENT: RefCell<Option<ActiveWriter>> = RefCell::new(None);
}

/// Whatever occupied the slot before a scope opened. Must be handed back
/// to [`restore`] exactly once.
#[must_use = "the previous writer must be restored when the scope closes"]
pub struct Saved(Option<ActiveWriter>);

/// Swaps `writer` into the slot, returning the previous occupant.
pub fn activate(writer: ActiveWriter) -> Saved {
    CURRENT.with(|slot| Saved(slot.borrow_mut().replace(writer)))
}

/// Forces the slot empty, returning the previous occupant. Used by the
/// null writer to disable output regardless of nesting.
pub fn deactivate() -> Saved {
    CURRENT.with(|slot| Saved(slot.borrow_mut().take()))
}

/// Puts the saved occupant back.
pub fn restore(saved: Saved) {
    CURRENT.with(|slot| *slot.borrow_mut() = saved.0);
}

/// The currently active writer, if any. Read-only lookup for
/// collaborators that need an implicit output target.
pub fn active() -> Option<ActiveWriter> {
    CURRENT.with(|slot| slot.borrow().clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy() -> ActiveWriter {
        Rc::new(RefCell::new(Writer::null()))
    }

    #[test]
    fn activate_restore_is_lifo() {
        assert!(active().is_none());
        let outer = dummy();
        let saved_outer = activate(Rc::clone(&outer));
        assert!(Rc::ptr_eq(&active().unwrap(), &outer));

        let inner = dummy();
        let saved_inner = activate(Rc::clone(&inner));
        assert!(Rc::ptr_eq(&active().unwrap(), &inner));

        restore(saved_inner);
        assert!(Rc::ptr_eq(&active().unwrap(), &outer));
        restore(saved_outer);
        assert!(active().is_none());
    }

    #[test]
    fn deactivate_empties_the_slot() {
        let writer = dummy();
        let saved = activate(Rc::clone(&writer));
        let saved_inner = deactivate();
        assert!(active().is_none());
        restore(saved_inner);
        assert!(Rc::ptr_eq(&active().unwrap(), &writer));
        restore(saved);
    }
}
