//! Refetch decision planner.
//!
//! Every refetch (on mount, user-triggered, or passive) walks the same
//! decision in two halves around the resolver's prepass:
//!
//! 1. [`plan_prepass`] - before the prepass: should the freshness flag be
//!    forced on, should the prepass run at all, and should the last good
//!    selections be restored first.
//! 2. [`decide`] - after the prepass: stop, join the running fetch, take
//!    the running fetch over, or start a new one.
//!
//! Both halves are pure so the ordering rules can be tested without a
//! resolver or a runtime.

/// What triggered a refetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefetchRequest {
    /// Bypass the cache and always fetch.
    pub ignore_cache: bool,
    /// Skip the prepass and trust the current selections.
    pub soft: bool,
}

impl RefetchRequest {
    /// Initial decision when a session mounts.
    pub fn mount() -> Self {
        Self {
            ignore_cache: false,
            soft: false,
        }
    }

    /// A user-triggered refetch.
    pub fn imperative(ignore_cache: bool) -> Self {
        Self {
            ignore_cache,
            soft: false,
        }
    }

    /// A passive trigger (interval, reconnect, visibility).
    pub fn passive() -> Self {
        Self {
            ignore_cache: false,
            soft: true,
        }
    }
}

/// Inputs gathered before the prepass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrepassInput {
    /// The request being handled.
    pub request: RefetchRequest,
    /// The resolver's cache differs from the one the session last used.
    pub cache_changed: bool,
    /// The cache policy never marks entries stale.
    pub never_expires: bool,
}

/// Plan for the part of the refetch before the prepass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrepassPlan {
    /// Set the freshness flag unconditionally.
    pub force_fetch: bool,
    /// Run the prepass (and the restore step before it).
    pub run_prepass: bool,
}

impl PrepassPlan {
    /// Whether the last successful selections should be restored, given
    /// whether the live collection is currently empty.
    ///
    /// Restoring only into an empty collection means partial selections
    /// recorded since the last refetch win over the snapshot.
    pub fn should_restore(&self, selections_empty: bool) -> bool {
        self.run_prepass && selections_empty
    }
}

/// Plan the steps that happen before the prepass.
pub fn plan_prepass(input: PrepassInput) -> PrepassPlan {
    PrepassPlan {
        force_fetch: input.request.ignore_cache || input.cache_changed,
        run_prepass: !(input.request.soft && input.never_expires),
    }
}

/// Outcome of the refetch decision after the prepass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefetchDecision {
    /// No selections to fetch.
    NothingSelected,
    /// Cached data is good enough.
    UpToDate {
        /// Clear the live selections. Only allowed while no fetch is in flight.
        clear_selections: bool,
    },
    /// A fetch is already in flight; wait for it instead of starting another.
    Join,
    /// A fetch is in flight against a cache the session no longer uses.
    /// Re-acquire the fetch mutex and fetch again; waiters of the old fetch
    /// settle with the new one.
    Supersede,
    /// Acquire the fetch mutex and start a fetch.
    Fetch,
}

/// Inputs gathered after the prepass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecideInput {
    /// The resolver has selections to fetch.
    pub has_selections: bool,
    /// The resolver's freshness flag.
    pub should_fetch: bool,
    /// The fetch mutex is held.
    pub fetch_in_flight: bool,
    /// The resolver switched caches since the session last looked.
    pub cache_changed: bool,
}

/// Decide what to do once the prepass has refreshed the freshness flag.
pub fn decide(input: DecideInput) -> RefetchDecision {
    let DecideInput {
        has_selections,
        should_fetch,
        fetch_in_flight,
        cache_changed,
    } = input;
    if !has_selections {
        return RefetchDecision::NothingSelected;
    }
    if !should_fetch {
        return RefetchDecision::UpToDate {
            clear_selections: !fetch_in_flight,
        };
    }
    match (fetch_in_flight, cache_changed) {
        (false, _) => RefetchDecision::Fetch,
        (true, false) => RefetchDecision::Join,
        (true, true) => RefetchDecision::Supersede,
    }
}
