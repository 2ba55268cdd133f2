//! Authorization decisions for token mutations
//!
//! The real policy engine is a deployment concern; this service answers the
//! three questions the mutation pipelines ask from a configured set of
//! administrator principals plus owner identity.

use std::collections::HashSet;

use crate::Config;

#[derive(Clone)]
pub(crate) struct Service {
    admins: HashSet<String>,
}

impl Service {
    pub(crate) fn load(config: &Config) -> Self {
        Self {
            admins: config.admins.iter().cloned().collect(),
        }
    }

    pub(crate) fn is_admin(&self, user: &str) -> bool {
        self.admins.contains(user)
    }

    /// May `user` manage (update, transfer, delete) a token currently owned
    /// by `owner`?
    pub(crate) fn can_manage_token(
        &self,
        user: &str,
        _token: &str,
        owner: Option<&str>,
    ) -> bool {
        self.is_admin(user) || owner.is_some_and(|owner| owner == user)
    }

    /// May `user` perform administrative writes (system metadata, hard
    /// deletes) on a token?
    pub(crate) fn can_administer_token(
        &self,
        user: &str,
        _token: &str,
    ) -> bool {
        self.is_admin(user)
    }

    /// May `user` create services that run as `target`?
    pub(crate) fn can_run_as(&self, user: &str, target: &str) -> bool {
        user == target || self.is_admin(user)
    }
}
