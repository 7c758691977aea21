//! Identity lookup used to label remote streams.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::models::UserId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub user_id: UserId,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// Profile lookup seam; the surrounding application owns user accounts.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn lookup(&self, user_id: &UserId) -> Option<UserProfile>;
}

/// Fixed in-memory directory. Unknown users resolve to `None`; callers
/// fall back to the raw id.
#[derive(Default)]
pub struct StaticDirectory {
    profiles: HashMap<UserId, UserProfile>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<UserId>, display_name: impl Into<String>) -> Self {
        let user_id = user_id.into();
        self.profiles.insert(
            user_id.clone(),
            UserProfile {
                user_id,
                display_name: display_name.into(),
                avatar_url: None,
            },
        );
        self
    }
}

#[async_trait]
impl UserDirectory for StaticDirectory {
    async fn lookup(&self, user_id: &UserId) -> Option<UserProfile> {
        self.profiles.get(user_id).cloned()
    }
}
