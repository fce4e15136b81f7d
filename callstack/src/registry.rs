use alloc::{boxed::Box, sync::Arc};

use tracing::info;

use crate::{
    unwind::Unwinders, CallstackConfig, CallstackField, CallstackMode, Context, CtxField, Error,
    SymbolLookup, UserNesting,
};

/// Adds callstack contexts to event contexts.
///
/// Unwind routines are resolved on first use and kept for later registrations.
///
/// The userspace walk guard is handed in by the caller: there must be one per process,
/// shared by every registrar, as an event fired from a walk may carry fields of any of them.
pub struct Callstacks<S> {
    config: CallstackConfig,
    symbols: S,
    unwinders: Unwinders,
    user_nesting: Arc<UserNesting>,
}

impl<S: SymbolLookup> Callstacks<S> {
    /// `user_nesting` covers at least `config.possible_cpus` CPUs.
    pub fn new(config: CallstackConfig, symbols: S, user_nesting: Arc<UserNesting>) -> Self {
        Self { config, symbols, unwinders: Unwinders::default(), user_nesting }
    }

    pub fn config(&self) -> &CallstackConfig {
        &self.config
    }

    /// Adds the `mode` callstack field to `ctx`.
    ///
    /// On error `ctx` is left untouched.
    pub fn register(&mut self, ctx: &mut Context, mode: CallstackMode) -> Result<(), Error> {
        if mode == CallstackMode::User && !self.config.user_callstack {
            return Err(Error::Unsupported(mode));
        }
        let capturer = self.unwinders.resolve(mode, &self.symbols)?;

        let name = mode.ctx_name();
        if ctx.contains(name) {
            return Err(Error::AlreadyRegistered(name));
        }
        let field = CallstackField::new(capturer, &self.config, self.user_nesting.clone())?;
        let event_field = field.event_field();
        ctx.append(CtxField { event_field, ops: Box::new(field) })
            .map_err(|_| Error::AlreadyRegistered(name))?;

        info!("Added {name} context");
        Ok(())
    }
}

impl<S> core::fmt::Debug for Callstacks<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Callstacks")
            .field("config", &self.config)
            .field("unwinders", &self.unwinders)
            .finish()
    }
}
