use serde::Serialize;
use serde_json::Value;

use agora_shared::protocol::AccountRecord;
use agora_shared::{paths, UserPub};

use crate::error::{ClientError, Result};
use crate::live::LiveView;
use crate::servers::{avatar_view, check_avatar};
use crate::session::Session;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserInfo {
    #[serde(rename = "pub")]
    pub pub_key: UserPub,
    pub alias: String,
}

impl Session {
    /// Set my picture. Written to my profile and to the public
    /// `avatars/<pub>` mirror other users read.
    pub fn set_profile_avatar(&self, data_url: &str) -> Result<()> {
        let me = self.me()?;
        check_avatar(data_url)?;
        let value = Value::String(data_url.to_string());
        self.graph.put(&paths::profile_avatar(&me), value.clone());
        self.graph.put(&paths::avatar(&me), value);
        Ok(())
    }

    /// Pictures published by `user`.
    pub fn listen_avatar(&self, user: &UserPub) -> Result<LiveView<String>> {
        self.me()?;
        Ok(self.watch(avatar_view(&self.graph, &paths::avatar(user))))
    }

    pub fn listen_my_avatar(&self) -> Result<LiveView<String>> {
        let me = self.me()?;
        Ok(self.watch(avatar_view(&self.graph, &paths::profile_avatar(&me))))
    }

    /// Resolve the alias registered for `user`.
    pub async fn lookup_user(&self, user: &UserPub) -> Result<UserInfo> {
        self.me()?;
        let account = self
            .read::<AccountRecord>(&paths::user(user), self.config.lookup_timeout)
            .await
            .ok_or_else(|| ClientError::LookupTimeout(format!("user {}", user.short())))?;
        Ok(UserInfo {
            pub_key: *user,
            alias: account.alias,
        })
    }
}
