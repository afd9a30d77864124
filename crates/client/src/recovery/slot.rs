use std::collections::HashSet;
use std::sync::Mutex;

use super::link::RecoveryTokens;

#[derive(Default)]
struct SlotState {
    current: Option<RecoveryTokens>,
    /// Access tokens already taken in this process.
    spent: HashSet<String>,
}

/// Single-slot, consume-once store for captured recovery tokens.
///
/// Lives as long as the "tab" (the process), never on disk. A token that has
/// been taken once can never be put back, so replaying the same link or
/// reloading after consumption finds an empty slot.
#[derive(Default)]
pub struct TokenSlot {
    state: Mutex<SlotState>,
}

impl TokenSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `tokens`, replacing anything not yet taken. Returns false when
    /// this access token was already consumed.
    pub fn put(&self, tokens: RecoveryTokens) -> bool {
        let mut state = self.lock();
        if state.spent.contains(&tokens.access_token) {
            return false;
        }
        state.current = Some(tokens);
        true
    }

    /// Empties the slot and marks its token as spent.
    pub fn take(&self) -> Option<RecoveryTokens> {
        let mut state = self.lock();
        let tokens = state.current.take()?;
        state.spent.insert(tokens.access_token.clone());
        Some(tokens)
    }

    pub fn is_empty(&self) -> bool {
        self.lock().current.is_none()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}
