//! State that survives deep sleep
//!
//! One [`RetainedState`] value holds everything the device remembers between
//! wakes. Phases build a full replacement and hand it to a [`RetainedStore`],
//! which commits it whole behind a validity marker.

use core::sync::atomic::{compiler_fence, Ordering};

use heapless::String as HString;

use crate::activity::ActivitySummary;
use crate::calendar;
use crate::environment::EnvironmentReport;

pub const TOKEN_CAPACITY: usize = 255;

/// A cached token is only trusted while it has this much life left
pub const CREDENTIAL_MARGIN_SECS: u64 = 300;

/// Marks a completely written [`RetainedCell`]
pub const RETAINED_MAGIC: u32 = 0x57A4_F00D;

/// Short-lived bearer token from the credential exchange
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CachedCredential {
    /// Empty means no credential
    pub token: HString<TOKEN_CAPACITY>,
    pub expires_at: u64,
}

impl CachedCredential {
    pub const fn empty() -> Self {
        Self {
            token: HString::new(),
            expires_at: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.token.is_empty()
    }

    /// True iff a token is held and `now < expires_at - 300 s`.
    ///
    /// An unsynchronized clock cannot vouch for anything, so an implausible
    /// `now` never trusts the cache.
    pub fn is_trusted(&self, now: u64) -> bool {
        !self.is_empty()
            && calendar::is_plausible(now)
            && now.saturating_add(CREDENTIAL_MARGIN_SECS) < self.expires_at
    }
}

/// Last successfully fetched aggregate
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CachedResult {
    #[default]
    Empty,
    Activity(ActivitySummary),
    Environment(EnvironmentReport),
}

impl CachedResult {
    pub fn is_empty(&self) -> bool {
        matches!(self, CachedResult::Empty)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RetainedState {
    /// Every power-on, monotonic
    pub boot_count: u32,
    /// Consecutive power-ons without a recognized wake trigger
    pub rapid_boot_count: u32,
    /// Last successful data fetch, 0 = never
    pub last_sync_epoch: u64,
    pub last_clock_sync_epoch: u64,
    pub cached_credential: CachedCredential,
    pub cached_result: CachedResult,
    pub setup_screen_shown: bool,
    /// The current wake was caused by the user button
    pub manual_wake: bool,
}

impl RetainedState {
    pub const fn new() -> Self {
        Self {
            boot_count: 0,
            rapid_boot_count: 0,
            last_sync_epoch: 0,
            last_clock_sync_epoch: 0,
            cached_credential: CachedCredential::empty(),
            cached_result: CachedResult::Empty,
            setup_screen_shown: false,
            manual_wake: false,
        }
    }

    pub fn has_synced(&self) -> bool {
        self.last_sync_epoch != 0
    }
}

/// Backing storage for [`RetainedState`]
pub trait RetainedStore {
    /// The last committed state, or `None` after a cold start or wipe
    fn load(&mut self) -> Option<RetainedState>;

    /// Replace the stored state as a whole
    fn commit(&mut self, state: &RetainedState);

    /// Forget everything
    fn wipe(&mut self);
}

/// A [`RetainedState`] slot guarded by a magic number.
///
/// Place one in memory that survives deep sleep. The marker is cleared before
/// the state is overwritten and set again afterwards, so a reset mid-commit
/// reads back as empty instead of half-written.
#[repr(C)]
pub struct RetainedCell {
    magic: u32,
    state: RetainedState,
}

impl RetainedCell {
    pub const fn new() -> Self {
        Self {
            magic: 0,
            state: RetainedState::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic == RETAINED_MAGIC
    }
}

impl Default for RetainedCell {
    fn default() -> Self {
        Self::new()
    }
}

impl RetainedStore for RetainedCell {
    fn load(&mut self) -> Option<RetainedState> {
        self.is_valid().then(|| self.state.clone())
    }

    fn commit(&mut self, state: &RetainedState) {
        self.magic = 0;
        compiler_fence(Ordering::SeqCst);
        self.state.clone_from(state);
        compiler_fence(Ordering::SeqCst);
        self.magic = RETAINED_MAGIC;
    }

    fn wipe(&mut self) {
        self.magic = 0;
        compiler_fence(Ordering::SeqCst);
        self.state = RetainedState::new();
    }
}

impl<S: RetainedStore + ?Sized> RetainedStore for &mut S {
    fn load(&mut self) -> Option<RetainedState> {
        (**self).load()
    }

    fn commit(&mut self, state: &RetainedState) {
        (**self).commit(state)
    }

    fn wipe(&mut self) {
        (**self).wipe()
    }
}
