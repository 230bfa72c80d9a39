//! Session table
//!
//! NIST 800-53: AC-10 (Concurrent Session Control)
//! Implementation: a fixed number of slots, each binding one username to a
//! cipher context and the per-session path state. Sessions are keyed by
//! username, not by connection: every connection that selects the same user
//! shares one [`Session`].
//!
//! Slot lifetime is tracked by [`SessionHandle`]. Cloning a handle increments
//! the slot's reference count and dropping it decrements the count; a slot
//! whose count reaches zero is free to be rebound. Rebinding drops the old
//! cipher context.

use crate::cipher::CipherContext;
use crate::users::UserDirectory;
use crate::{Error, Result};
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

/// Default number of session slots
pub const DEFAULT_MAX_SESSIONS: usize = 10;

/// Path bookkeeping shared by every connection bound to a session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathState {
    /// Canonical path of the last GET target
    pub current_path: String,
    /// Whether `current_path` passed the access check for the request in flight
    pub validated: bool,
}

/// Server-side binding of a username to its cipher and path state
pub struct Session {
    username: String,
    cipher: Option<CipherContext>,
    state: Mutex<PathState>,
}

impl Session {
    fn new(username: &str, cipher: Option<CipherContext>) -> Self {
        Self {
            username: username.to_string(),
            cipher,
            state: Mutex::new(PathState::default()),
        }
    }

    /// User this session is bound to
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Cipher context, absent when the user has no key
    pub fn cipher(&self) -> Option<&CipherContext> {
        self.cipher.as_ref()
    }

    /// Key size announced to clients (0 without a cipher)
    pub fn key_size(&self) -> usize {
        self.cipher.as_ref().map_or(0, CipherContext::key_size)
    }

    /// Replace the current path and clear the validation flag
    pub fn set_current_path(&self, path: String) {
        let mut state = self.lock_state();
        state.current_path = path;
        state.validated = false;
    }

    /// Last path stored by GET
    pub fn current_path(&self) -> String {
        self.lock_state().current_path.clone()
    }

    /// Record that the current path passed containment checks
    pub fn mark_validated(&self) {
        self.lock_state().validated = true;
    }

    /// Clear the validation flag after a transfer
    pub fn reset_validation(&self) {
        self.lock_state().validated = false;
    }

    /// Whether the current path passed containment checks
    pub fn is_path_validated(&self) -> bool {
        self.lock_state().validated
    }

    /// Snapshot of the path state
    pub fn path_state(&self) -> PathState {
        self.lock_state().clone()
    }

    // Each accessor locks on its own; callers get no atomicity across calls.
    fn lock_state(&self) -> MutexGuard<'_, PathState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("username", &self.username)
            .field("cipher", &self.cipher)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct Slot {
    ref_count: usize,
    session: Option<Arc<Session>>,
}

struct Inner {
    users: Arc<dyn UserDirectory>,
    slots: Mutex<Vec<Slot>>,
}

impl Inner {
    fn lock_slots(&self) -> MutexGuard<'_, Vec<Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fixed-capacity table of username-scoped sessions
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Create a manager with `capacity` slots
    pub fn new(users: Arc<dyn UserDirectory>, capacity: usize) -> Self {
        let slots = (0..capacity).map(|_| Slot::default()).collect();
        Self {
            inner: Arc::new(Inner {
                users,
                slots: Mutex::new(slots),
            }),
        }
    }

    /// Bind to the live session for `username`, creating one if needed
    ///
    /// A new binding gets a fresh cipher context (and so a fresh IV) built
    /// from the user's key.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownUser`] if `username` is not in the directory
    /// - [`Error::CapacityExhausted`] if every slot is in use
    pub fn acquire(&self, username: &str) -> Result<SessionHandle> {
        let mut slots = self.inner.lock_slots();

        let shared = slots.iter_mut().enumerate().find_map(|(index, slot)| {
            let session = slot.session.as_ref().filter(|_| slot.ref_count > 0)?;
            if session.username != username {
                return None;
            }
            let session = Arc::clone(session);
            slot.ref_count += 1;
            Some((index, session, slot.ref_count))
        });

        if let Some((index, session, ref_count)) = shared {
            drop(slots);
            debug!(
                event = "session_shared",
                username,
                slot = index,
                ref_count,
                "Joined existing session"
            );
            return Ok(self.handle(index, session));
        }

        let Some(user) = self.inner.users.by_name(username) else {
            return Err(Error::UnknownUser(username.to_string()));
        };

        let capacity = slots.len();
        let free = slots.iter().position(|slot| slot.ref_count == 0);
        let Some(index) = free else {
            drop(slots);
            warn!(
                event = "session_capacity_exhausted",
                username,
                capacity,
                "No free session slot"
            );
            return Err(Error::CapacityExhausted(capacity));
        };

        let (cipher, cipher_error) = if user.has_key() {
            match CipherContext::new(user.key(), None) {
                Ok(cipher) => (Some(cipher), None),
                Err(e) => (None, Some(e)),
            }
        } else {
            (None, None)
        };

        let session = Arc::new(Session::new(username, cipher));
        let slot = &mut slots[index];
        slot.session = Some(Arc::clone(&session));
        slot.ref_count = 1;
        drop(slots);

        if let Some(e) = cipher_error {
            error!(
                event = "cipher_creation_failed",
                username,
                error = %e,
                "Failed to create cipher context"
            );
        }
        info!(
            event = "session_created",
            username,
            slot = index,
            key_size = session.key_size(),
            "Bound session slot"
        );

        Ok(self.handle(index, session))
    }

    fn handle(&self, slot: usize, session: Arc<Session>) -> SessionHandle {
        SessionHandle {
            inner: Arc::clone(&self.inner),
            slot,
            session,
        }
    }

    /// Release a handle (same as dropping it)
    pub fn release(&self, handle: SessionHandle) {
        drop(handle);
    }

    /// Reference count of the live session bound to `username`
    pub fn ref_count(&self, username: &str) -> usize {
        self.inner
            .lock_slots()
            .iter()
            .filter(|slot| slot.ref_count > 0)
            .find(|slot| {
                slot.session
                    .as_ref()
                    .is_some_and(|s| s.username == username)
            })
            .map_or(0, |slot| slot.ref_count)
    }

    /// Number of slots currently held
    pub fn active_sessions(&self) -> usize {
        self.inner
            .lock_slots()
            .iter()
            .filter(|slot| slot.ref_count > 0)
            .count()
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.inner.lock_slots().len()
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("capacity", &self.capacity())
            .field("active", &self.active_sessions())
            .finish()
    }
}

/// Counted reference to a bound session
pub struct SessionHandle {
    inner: Arc<Inner>,
    slot: usize,
    session: Arc<Session>,
}

impl SessionHandle {
    /// Shared pointer to the session, independent of this handle's count
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

impl Deref for SessionHandle {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl Clone for SessionHandle {
    fn clone(&self) -> Self {
        let mut slots = self.inner.lock_slots();
        if let Some(slot) = slots.get_mut(self.slot) {
            slot.ref_count += 1;
        }
        Self {
            inner: Arc::clone(&self.inner),
            slot: self.slot,
            session: Arc::clone(&self.session),
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        let mut slots = self.inner.lock_slots();
        let remaining = slots.get_mut(self.slot).map(|slot| {
            slot.ref_count = slot.ref_count.saturating_sub(1);
            slot.ref_count
        });
        drop(slots);

        debug!(
            event = "session_released",
            username = %self.session.username,
            slot = self.slot,
            ref_count = ?remaining,
            "Released session handle"
        );
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("slot", &self.slot)
            .field("session", &self.session)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::{UserRecord, UserStore};

    fn manager(capacity: usize, names: &[&str]) -> SessionManager {
        let users = names
            .iter()
            .enumerate()
            .map(|(i, name)| UserRecord::new(*name, &[i as u8 + 1; 32]))
            .collect();
        SessionManager::new(Arc::new(UserStore::new(users)), capacity)
    }

    #[test]
    fn test_same_username_shares_session() {
        let sessions = manager(2, &["alice", "bob"]);

        let first = sessions.acquire("alice").unwrap();
        let second = sessions.acquire("alice").unwrap();

        assert!(Arc::ptr_eq(first.session(), second.session()));
        assert_eq!(sessions.ref_count("alice"), 2);
        assert_eq!(sessions.active_sessions(), 1);

        sessions.release(first);
        assert_eq!(sessions.ref_count("alice"), 1);
        drop(second);
        assert_eq!(sessions.ref_count("alice"), 0);
        assert_eq!(sessions.active_sessions(), 0);
    }

    #[test]
    fn test_released_slot_reusable_by_other_user() {
        let sessions = manager(1, &["alice", "bob"]);

        let a1 = sessions.acquire("alice").unwrap();
        let a2 = sessions.acquire("alice").unwrap();
        assert!(matches!(sessions.acquire("bob"), Err(Error::CapacityExhausted(1))));

        drop(a1);
        assert!(sessions.acquire("bob").is_err());
        drop(a2);

        let bob = sessions.acquire("bob").unwrap();
        assert_eq!(bob.username(), "bob");
    }

    #[test]
    fn test_capacity_limit_enforced() {
        let names: Vec<String> = (0..11).map(|i| format!("user{i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        // UserStore keeps at most ten users, so use a directory holding all eleven
        let users: Vec<UserRecord> = refs.iter().map(|n| UserRecord::new(*n, &[1; 32])).collect();
        struct All(Vec<UserRecord>);
        impl UserDirectory for All {
            fn users(&self) -> &[UserRecord] {
                &self.0
            }
        }
        let sessions = SessionManager::new(Arc::new(All(users)), DEFAULT_MAX_SESSIONS);

        let mut held: Vec<SessionHandle> = refs[..10]
            .iter()
            .map(|name| sessions.acquire(name).unwrap())
            .collect();

        assert!(matches!(
            sessions.acquire("user10"),
            Err(Error::CapacityExhausted(10))
        ));

        // An existing binding can still be shared at capacity
        let extra = sessions.acquire("user3").unwrap();
        assert_eq!(sessions.ref_count("user3"), 2);
        drop(extra);

        held.remove(0);
        assert!(sessions.acquire("user10").is_ok());
    }

    #[test]
    fn test_unknown_user_rejected() {
        let sessions = manager(2, &["alice"]);
        assert!(matches!(sessions.acquire("mallory"), Err(Error::UnknownUser(_))));
        assert_eq!(sessions.active_sessions(), 0);
    }

    #[test]
    fn test_clone_increments_and_drop_decrements() {
        let sessions = manager(2, &["alice"]);
        let handle = sessions.acquire("alice").unwrap();
        let cloned = handle.clone();
        assert_eq!(sessions.ref_count("alice"), 2);
        drop(handle);
        assert_eq!(sessions.ref_count("alice"), 1);
        drop(cloned);
        assert_eq!(sessions.ref_count("alice"), 0);
    }

    #[test]
    fn test_rebinding_creates_fresh_state() {
        let sessions = manager(1, &["alice", "bob"]);

        let alice = sessions.acquire("alice").unwrap();
        alice.set_current_path("/srv/share/a.txt".to_string());
        alice.mark_validated();
        let alice_iv = *alice.cipher().unwrap().iv();
        drop(alice);

        let bob = sessions.acquire("bob").unwrap();
        assert_eq!(bob.path_state(), PathState::default());
        assert_ne!(*bob.cipher().unwrap().iv(), alice_iv);
        drop(bob);

        // A released session is not resurrected for the same user either
        let alice = sessions.acquire("alice").unwrap();
        assert!(!alice.is_path_validated());
        assert!(alice.current_path().is_empty());
    }

    #[test]
    fn test_user_without_key_has_no_cipher() {
        let users = UserStore::new(vec![UserRecord::new("guest", &[])]);
        let sessions = SessionManager::new(Arc::new(users), 1);
        let guest = sessions.acquire("guest").unwrap();
        assert!(guest.cipher().is_none());
        assert_eq!(guest.key_size(), 0);
    }

    #[test]
    fn test_path_state_shared_between_handles() {
        let sessions = manager(2, &["alice"]);
        let first = sessions.acquire("alice").unwrap();
        let second = sessions.acquire("alice").unwrap();

        first.set_current_path("/srv/share/report.pdf".to_string());
        second.mark_validated();

        assert_eq!(second.current_path(), "/srv/share/report.pdf");
        assert!(first.is_path_validated());
        first.reset_validation();
        assert!(!second.is_path_validated());
    }

    #[test]
    fn test_concurrent_acquire_release() {
        let sessions = manager(3, &["alice", "bob", "carol"]);
        let mut threads = Vec::new();
        for i in 0..12 {
            let sessions = sessions.clone();
            threads.push(std::thread::spawn(move || {
                let name = ["alice", "bob", "carol"][i % 3];
                for _ in 0..100 {
                    let handle = sessions.acquire(name).unwrap();
                    assert_eq!(handle.username(), name);
                }
            }));
        }
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(sessions.active_sessions(), 0);
    }
}
