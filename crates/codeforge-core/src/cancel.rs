// Cancellation controller
//
// One reusable token per in-flight top-level operation. `cancel` aborts
// and discards the current token so a repeated cancel is a no-op; the
// next `get_or_create` after a cancel mints a fresh token.

use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct CancellationController {
    current: Mutex<Option<CancellationToken>>,
}

impl CancellationController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current non-aborted token, creating one if needed
    pub fn get_or_create(&self) -> CancellationToken {
        let mut guard = self.current.lock().expect("cancel lock poisoned");
        match guard.as_ref() {
            Some(token) if !token.is_cancelled() => token.clone(),
            _ => {
                let token = CancellationToken::new();
                *guard = Some(token.clone());
                token
            }
        }
    }

    /// Abort the current operation. No-op when nothing is in flight.
    pub fn cancel(&self) {
        let mut guard = self.current.lock().expect("cancel lock poisoned");
        if let Some(token) = guard.take() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_create_reuses_live_token() {
        let controller = CancellationController::new();
        let a = controller.get_or_create();
        let b = controller.get_or_create();
        // Same underlying token: cancelling one cancels the other
        controller.cancel();
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
    }

    #[test]
    fn test_cancel_twice_is_noop() {
        let controller = CancellationController::new();
        let token = controller.get_or_create();
        controller.cancel();
        controller.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_fresh_token_after_cancel() {
        let controller = CancellationController::new();
        let first = controller.get_or_create();
        controller.cancel();
        let second = controller.get_or_create();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
    }
}
