//! Engine initialisation and handle lifetime.
//!
//! # Design
//! `EngineRuntime` wraps one engine instance with the two pieces of shared
//! state every transfer needs: an initialisation gate and the lock that
//! serialises handle creation and destruction. Share a single runtime per
//! engine per process (behind an `Arc`); perform never takes either lock, so
//! independent transfers still run in parallel.
//!
//! `HandleGuard` owns one live handle. Dropping it destroys the handle and
//! then unbinds it from the registry, so release happens exactly once on
//! every exit path and callbacks fired during destruction still resolve
//! their context. Callers keep the context alive until the guard is gone.

use parking_lot::Mutex;

use crate::engine::{EngineCode, EngineHandle, EngineOption, HandleId, InfoKey, NativeEngine};
use crate::error::TransportError;
use crate::registry;

pub struct EngineRuntime<E> {
    engine: E,
    initialized: Mutex<bool>,
    handle_lock: Mutex<()>,
}

impl<E: NativeEngine> EngineRuntime<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            initialized: Mutex::new(false),
            handle_lock: Mutex::new(()),
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Run the engine's global init once. Concurrent callers wait on the same
    /// attempt. A failure is reported to the caller that hit it and the next
    /// caller tries again; a success is never repeated.
    pub fn ensure_initialized(&self) -> Result<(), TransportError> {
        let mut initialized = self.initialized.lock();
        if *initialized {
            return Ok(());
        }
        match self.engine.global_init() {
            Ok(()) => {
                *initialized = true;
                tracing::debug!("native engine initialised");
                Ok(())
            }
            Err(code) => {
                let message = self.engine.describe(code);
                tracing::error!(%code, %message, "native engine initialisation failed");
                Err(TransportError::GlobalInitFailed { code, message })
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        *self.initialized.lock()
    }

    /// Create a handle under the handle lock.
    pub fn open_handle(&self) -> Result<HandleGuard<'_, E>, TransportError> {
        let handle = {
            let _serial = self.handle_lock.lock();
            self.engine.create_handle()
        };
        match handle {
            Some(handle) => Ok(HandleGuard {
                runtime: self,
                handle,
            }),
            None => {
                tracing::error!("native engine refused to create a handle");
                Err(TransportError::HandleCreationFailed)
            }
        }
    }
}

/// Exclusive owner of one live engine handle.
pub struct HandleGuard<'r, E: NativeEngine> {
    runtime: &'r EngineRuntime<E>,
    handle: EngineHandle,
}

impl<E: NativeEngine> HandleGuard<'_, E> {
    pub fn id(&self) -> HandleId {
        self.handle.id()
    }

    pub fn set_option(&self, option: EngineOption<'_>) -> Result<(), EngineCode> {
        // SAFETY: the guard owns a handle that stays live until drop.
        unsafe { self.runtime.engine.set_option(self.handle, option) }
    }

    pub fn perform(&self) -> Result<(), EngineCode> {
        // SAFETY: live handle; `&self` on a non-`Sync` guard rules out a
        // concurrent perform on the same handle.
        unsafe { self.runtime.engine.perform(self.handle) }
    }

    pub fn info(&self, key: InfoKey) -> Result<i64, EngineCode> {
        // SAFETY: live handle.
        unsafe { self.runtime.engine.get_info(self.handle, key) }
    }
}

impl<E: NativeEngine> Drop for HandleGuard<'_, E> {
    fn drop(&mut self) {
        // Unbind under the same lock: once it is released the address may be
        // handed out again by the next `create_handle`.
        let _serial = self.runtime.handle_lock.lock();
        // SAFETY: the handle is live and this is its only release.
        unsafe { self.runtime.engine.destroy_handle(self.handle) };
        registry::global().unbind(self.handle.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::{ScriptedEngine, TransferScript};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn init_runs_once_across_threads() {
        let runtime = Arc::new(EngineRuntime::new(ScriptedEngine::new(|_| {
            TransferScript::ok(200, "")
        })));
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let runtime = Arc::clone(&runtime);
                thread::spawn(move || runtime.ensure_initialized().unwrap())
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(runtime.engine().init_calls(), 1);
        assert!(runtime.is_initialized());
    }

    #[test]
    fn failed_init_is_retried() {
        let engine = ScriptedEngine::new(|_| TransferScript::ok(200, "")).fail_init_times(1);
        let runtime = EngineRuntime::new(engine);
        let err = runtime.ensure_initialized().unwrap_err();
        assert!(matches!(err, TransportError::GlobalInitFailed { .. }));
        assert!(!runtime.is_initialized());

        runtime.ensure_initialized().unwrap();
        runtime.ensure_initialized().unwrap();
        assert_eq!(runtime.engine().init_calls(), 2);
    }

    #[test]
    fn guard_destroys_handle_once_and_unbinds() {
        let runtime = EngineRuntime::new(ScriptedEngine::new(|_| TransferScript::ok(200, "")));
        let context = Arc::new(crate::context::TransferContext::new(
            5,
            crate::context::ContextOptions::default(),
        ));
        let id = {
            let guard = runtime.open_handle().unwrap();
            registry::global().bind(guard.id(), &context);
            assert!(registry::global().contains(guard.id()));
            guard.id()
        };
        assert!(!registry::global().contains(id));
        assert_eq!(runtime.engine().created(), 1);
        assert_eq!(runtime.engine().destroyed(), 1);
        assert_eq!(runtime.engine().live_handles(), 0);
    }

    #[test]
    fn refused_handle_is_reported() {
        let engine = ScriptedEngine::new(|_| TransferScript::ok(200, "")).refuse_handles();
        let runtime = EngineRuntime::new(engine);
        assert!(matches!(
            runtime.open_handle(),
            Err(TransportError::HandleCreationFailed)
        ));
        assert_eq!(runtime.engine().destroyed(), 0);
    }
}
