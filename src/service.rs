pub(crate) mod authz;
pub(crate) mod globals;
pub(crate) mod sending;
pub(crate) mod tokens;
pub(crate) mod validation;

use crate::{Config, KeyValueDatabase, Result};

pub(crate) struct Services {
    pub(crate) globals: globals::Service,
    pub(crate) authz: authz::Service,
    pub(crate) tokens: tokens::Service,
    pub(crate) sending: sending::Service,
}

impl Services {
    pub(crate) fn build(
        db: &'static KeyValueDatabase,
        config: Config,
    ) -> Result<Self> {
        let authz = authz::Service::load(&config);
        let validator = validation::Service::load(&config);
        let tokens =
            tokens::Service::load(db, &config, authz.clone(), validator);
        let sending = sending::Service::load(&config)?;
        let globals = globals::Service::load(config);

        Ok(Self {
            globals,
            authz,
            tokens,
            sending,
        })
    }
}
