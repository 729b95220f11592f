//! Scriptable execution host shared by the integration tests.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use ijwhost::prelude::*;
use parking_lot::Mutex;

/// Managed entry point of the `NativeEntryPoint` export, returns 100.
pub extern "C" fn native_entry_point() -> i32 {
    100
}

/// Managed entry point taking arguments.
pub extern "C" fn managed_add(a: i32, b: i32) -> i32 {
    a + b
}

pub fn target_of_entry_point() -> Target {
    Target::from_address(native_entry_point as extern "C" fn() -> i32 as usize).unwrap()
}

pub fn target_of_add() -> Target {
    Target::from_address(managed_add as extern "C" fn(i32, i32) -> i32 as usize).unwrap()
}

/// Calls a target as `extern "C" fn() -> i32`.
pub fn call_entry_point(target: Target) -> i32 {
    let entry = unsafe { target.as_fn::<extern "C" fn() -> i32>() };
    entry()
}

type ResolveHook = Arc<dyn Fn(&ResolveRequest) + Send + Sync>;

#[derive(Default)]
pub struct TestHost {
    bring_ups: AtomicUsize,
    resolves: AtomicUsize,
    failing_bring_ups: AtomicUsize,
    failing_resolves: AtomicUsize,
    bring_up_delay: Mutex<Option<Duration>>,
    resolve_delay: Mutex<Option<Duration>>,
    targets: Mutex<HashMap<SlotId, Target>>,
    per_slot: Mutex<HashMap<(ModuleIdentity, SlotId), usize>>,
    on_resolve: Mutex<Option<ResolveHook>>,
}

impl TestHost {
    pub fn new() -> Arc<TestHost> {
        Arc::new(TestHost::default())
    }

    pub fn fail_next_bring_ups(&self, count: usize) {
        self.failing_bring_ups.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_resolves(&self, count: usize) {
        self.failing_resolves.store(count, Ordering::SeqCst);
    }

    pub fn delay_bring_up(&self, delay: Duration) {
        *self.bring_up_delay.lock() = Some(delay);
    }

    pub fn delay_resolve(&self, delay: Duration) {
        *self.resolve_delay.lock() = Some(delay);
    }

    pub fn map(&self, slot: SlotId, target: Target) {
        self.targets.lock().insert(slot, target);
    }

    /// Runs `hook` inside every resolve, before the target is produced.
    pub fn on_resolve(&self, hook: impl Fn(&ResolveRequest) + Send + Sync + 'static) {
        *self.on_resolve.lock() = Some(Arc::new(hook));
    }

    pub fn bring_ups(&self) -> usize {
        self.bring_ups.load(Ordering::SeqCst)
    }

    pub fn resolves(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }

    pub fn resolves_of(&self, module: ModuleIdentity, slot: SlotId) -> usize {
        self.per_slot
            .lock()
            .get(&(module, slot))
            .copied()
            .unwrap_or(0)
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

impl ExecutionHost for TestHost {
    fn ensure_started(&self) -> std::result::Result<HostHandle, HostError> {
        self.bring_ups.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = *self.bring_up_delay.lock() {
            std::thread::sleep(delay);
        }
        if Self::take(&self.failing_bring_ups) {
            return Err(HostError::new("hostfxr could not be loaded"));
        }
        Ok(HostHandle::from_raw(0x1).unwrap())
    }

    fn resolve(
        &self,
        _host: HostHandle,
        request: &ResolveRequest,
    ) -> std::result::Result<Target, HostError> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        *self
            .per_slot
            .lock()
            .entry((request.module, request.slot))
            .or_insert(0) += 1;

        // Clone the hook out so it runs without the mutex held
        let hook = self.on_resolve.lock().clone();
        if let Some(hook) = hook {
            hook(request);
        }

        if let Some(delay) = *self.resolve_delay.lock() {
            std::thread::sleep(delay);
        }
        if Self::take(&self.failing_resolves) {
            return Err(HostError::new("method not found"));
        }

        Ok(self
            .targets
            .lock()
            .get(&request.slot)
            .copied()
            .unwrap_or_else(target_of_entry_point))
    }
}
