//! Photo library authorization

use crate::completion::completion;
use crate::publish::PhotoStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Authorization state reported by the photo store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationStatus {
    Authorized,
    Limited,
    Denied,
    Restricted,
    NotDetermined,
}

impl AuthorizationStatus {
    pub fn is_granted(&self) -> bool {
        matches!(self, AuthorizationStatus::Authorized | AuthorizationStatus::Limited)
    }

    pub fn description(&self) -> &str {
        match self {
            AuthorizationStatus::Authorized => "Authorized",
            AuthorizationStatus::Limited => "Limited access",
            AuthorizationStatus::Denied => "Denied",
            AuthorizationStatus::Restricted => "Restricted",
            AuthorizationStatus::NotDetermined => "Not determined",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    Granted,
    Denied,
}

pub struct PermissionGate {
    store: Arc<dyn PhotoStore>,
}

impl PermissionGate {
    pub fn new(store: Arc<dyn PhotoStore>) -> Self {
        Self { store }
    }

    /// Resolve immediately from a decided status; otherwise prompt once and
    /// wait for the answer. No retries.
    pub async fn authorize(&self) -> Authorization {
        let status = self.store.authorization_status();
        debug!("Photo library status: {}", status.description());

        let status = match status {
            AuthorizationStatus::NotDetermined => {
                let (done, pending) = completion();
                self.store.request_authorization(done);
                // A prompt that never answers counts as a refusal.
                let answer = pending.wait().await.unwrap_or(AuthorizationStatus::Denied);
                info!("Photo library prompt answered: {}", answer.description());
                answer
            }
            decided => decided,
        };

        if status.is_granted() {
            Authorization::Granted
        } else {
            Authorization::Denied
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::Completion;
    use crate::error::MediaError;
    use crate::publish::{AssetCreationRequest, AssetId};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct PromptStore {
        status: AuthorizationStatus,
        answer: Option<AuthorizationStatus>,
        prompts: AtomicUsize,
    }

    impl PhotoStore for PromptStore {
        fn authorization_status(&self) -> AuthorizationStatus {
            self.status
        }

        fn request_authorization(&self, done: Completion<AuthorizationStatus>) {
            self.prompts.fetch_add(1, Ordering::SeqCst);
            if let Some(answer) = self.answer {
                // Platforms have been seen to fire the callback twice.
                done.complete(answer);
                done.complete(AuthorizationStatus::Denied);
            }
        }

        fn perform_changes(&self, _request: AssetCreationRequest, done: Completion<Result<AssetId, MediaError>>) {
            done.complete(Err(MediaError::StoreRejected("read-only".into())));
        }
    }

    fn gate(status: AuthorizationStatus, answer: Option<AuthorizationStatus>) -> (PermissionGate, Arc<PromptStore>) {
        let store = Arc::new(PromptStore { status, answer, prompts: AtomicUsize::new(0) });
        (PermissionGate::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_decided_status_skips_prompt() {
        for (status, expected) in [
            (AuthorizationStatus::Authorized, Authorization::Granted),
            (AuthorizationStatus::Limited, Authorization::Granted),
            (AuthorizationStatus::Denied, Authorization::Denied),
            (AuthorizationStatus::Restricted, Authorization::Denied),
        ] {
            let (gate, store) = gate(status, Some(AuthorizationStatus::Authorized));
            assert_eq!(gate.authorize().await, expected);
            assert_eq!(store.prompts.load(Ordering::SeqCst), 0);
        }
    }

    #[tokio::test]
    async fn test_undetermined_prompts_once() {
        let (gate, store) = gate(AuthorizationStatus::NotDetermined, Some(AuthorizationStatus::Authorized));
        assert_eq!(gate.authorize().await, Authorization::Granted);
        assert_eq!(store.prompts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unanswered_prompt_is_denied() {
        let (gate, _) = gate(AuthorizationStatus::NotDetermined, None);
        assert_eq!(gate.authorize().await, Authorization::Denied);
    }
}
