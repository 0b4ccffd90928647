use crate::session::{Session, SessionCode, SessionError};
use gambit_engine::GameRules;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

pub const CODE_LEN: usize = 6;
/// Upper-case letters and digits without the easily confused `0 O 1 I`.
pub const CODE_ALPHABET: &str = "ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

pub fn is_valid_code(value: &str) -> bool {
    value.len() == CODE_LEN && value.chars().all(|ch| CODE_ALPHABET.contains(ch))
}

/// Codes are shown upper-case but accepted in any case.
pub fn normalize_code(value: &str) -> SessionCode {
    value.trim().to_ascii_uppercase()
}

/// Live sessions of one game kind, keyed by code.
#[derive(Debug)]
pub struct SessionRegistry<R: GameRules> {
    sessions: RwLock<HashMap<SessionCode, Arc<Session<R>>>>,
    rng: Mutex<ChaCha8Rng>,
}

impl<R: GameRules> SessionRegistry<R> {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_rng(&mut rand::rng()),
        };
        Self {
            sessions: RwLock::new(HashMap::new()),
            rng: Mutex::new(rng),
        }
    }

    /// Insert a session built around a fresh unique code. Code choice and
    /// insertion happen under one write lock.
    pub fn create(
        &self,
        build: impl FnOnce(SessionCode) -> Session<R>,
    ) -> Result<Arc<Session<R>>, SessionError> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| SessionError::StoragePoisoned)?;
        let code = loop {
            let candidate = self.generate_code();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
            tracing::debug!(code = %candidate, "session code collision, retrying");
        };
        let session = Arc::new(build(code.clone()));
        sessions.insert(code, Arc::clone(&session));
        Ok(session)
    }

    pub fn get(&self, code: &str) -> Result<Arc<Session<R>>, SessionError> {
        let code = normalize_code(code);
        let sessions = self
            .sessions
            .read()
            .map_err(|_| SessionError::StoragePoisoned)?;
        sessions
            .get(&code)
            .cloned()
            .ok_or(SessionError::NotFound(code))
    }

    pub fn remove(&self, code: &str) -> Result<Option<Arc<Session<R>>>, SessionError> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| SessionError::StoragePoisoned)?;
        Ok(sessions.remove(&normalize_code(code)))
    }

    /// Sessions ordered by creation time. The registry lock is released
    /// before the caller touches any session lock.
    pub fn list(&self) -> Vec<Arc<Session<R>>> {
        let mut list: Vec<_> = match self.sessions.read() {
            Ok(guard) => guard.values().cloned().collect(),
            Err(_) => Vec::new(),
        };
        list.sort_by_key(|session| session.created_at);
        list
    }

    pub fn len(&self) -> usize {
        match self.sessions.read() {
            Ok(guard) => guard.len(),
            Err(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn generate_code(&self) -> SessionCode {
        let alphabet = CODE_ALPHABET.as_bytes();
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        (0..CODE_LEN)
            .map(|_| alphabet[rng.random_range(0..alphabet.len())] as char)
            .collect()
    }
}
