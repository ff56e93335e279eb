//! # Process Setup
//!
//! `setup_database` wires a pool, an optional startup check, and the shutdown
//! hook into one owned `Database`. There is no hidden global: the caller keeps
//! the `Database` and hands out clients from it.

use crate::client::{ClientOptions, KVClient};
use crate::config::ClientConfig;
use crate::error::ClientResult;
use crate::pool::ConnectionPool;
use crate::shutdown::{HookOptions, ShutdownHook};

/// Opens the pool for `config.addr` and prepares it for use.
///
/// With `verify_on_setup`, one PING is issued so an unreachable store is
/// reported here instead of on the first operation. With `shutdown_hook`,
/// termination signals close the pool.
pub fn setup_database(config: ClientConfig) -> ClientResult<Database> {
    let pool = ConnectionPool::open(&config)?;
    Database::with_pool(pool, &config)
}

/// Owner of the shared pool and its shutdown hook.
#[derive(Debug)]
pub struct Database {
    pool: ConnectionPool,
    options: ClientOptions,
    hook: Option<ShutdownHook>,
}

impl Database {
    /// Builds a database handle around an existing pool.
    ///
    /// On failure the pool is closed before the error is returned.
    pub fn with_pool(pool: ConnectionPool, config: &ClientConfig) -> ClientResult<Self> {
        let options = ClientOptions::from_config(config);

        if config.verify_on_setup {
            if let Err(err) = KVClient::from_pool(pool.clone(), options).ping() {
                pool.close();
                return Err(err);
            }
        }

        let hook = if config.shutdown_hook {
            let hook_options = HookOptions {
                listen_signals: true,
                exit_on_signal: config.exit_on_signal,
            };
            match ShutdownHook::install(pool.clone(), hook_options) {
                Ok(hook) => Some(hook),
                Err(err) => {
                    pool.close();
                    return Err(err);
                }
            }
        } else {
            None
        };

        Ok(Database { pool, options, hook })
    }

    /// Returns a lightweight client bound to the shared pool.
    pub fn client(&self) -> KVClient {
        KVClient::from_pool(self.pool.clone(), self.options)
    }

    /// The shared pool.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// The shutdown hook, when one was installed.
    pub fn shutdown_hook(&self) -> Option<&ShutdownHook> {
        self.hook.as_ref()
    }

    /// Stops the hook and closes the pool. Idempotent.
    pub fn close(&self) {
        if let Some(hook) = &self.hook {
            hook.cancel();
        }
        self.pool.close();
    }
}
