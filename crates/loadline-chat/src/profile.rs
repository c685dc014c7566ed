use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use loadline_backend::Backend;
use loadline_types::api::ProfileUpdate;
use loadline_types::models::Profile;

use crate::error::{ChatError, Result};

/// Read and edit the signed-in user's profile.
#[derive(Clone)]
pub struct ProfileService {
    backend: Arc<dyn Backend>,
}

impl ProfileService {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Profile>> {
        Ok(self.backend.profile(id).await?)
    }

    pub async fn current(&self) -> Result<Profile> {
        let session = self.backend.session().await?.ok_or(ChatError::NotSignedIn)?;
        self.get(session.user.id).await?.ok_or(ChatError::NotSignedIn)
    }

    /// Apply `update` to the signed-in user's profile. `is_admin` is not
    /// part of the update and never changes here.
    pub async fn update(&self, update: &ProfileUpdate) -> Result<Profile> {
        let session = self.backend.session().await?.ok_or(ChatError::NotSignedIn)?;
        if update.is_empty() {
            return self.get(session.user.id).await?.ok_or(ChatError::NotSignedIn);
        }
        let profile = self.backend.update_profile(session.user.id, update).await?;
        info!(user_id = %profile.id, "Profile updated");
        Ok(profile)
    }
}
