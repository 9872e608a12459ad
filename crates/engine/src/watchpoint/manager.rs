// VMDB - Managed VM Debugger
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Watchpoint manager
//!
//! Client watchpoints are kept ordered by start address and never overlap;
//! system watchpoints live in a separate set. Both count toward the platform's
//! watchpoint capacity.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    io,
    sync::Arc,
};

use eyre::eyre;
use itertools::Itertools;
use parking_lot::{Mutex, RwLock};
use rpds::VectorSync;
use tracing::{debug, info, warn};
use vmdb_common::{Address, MemoryRegion, ObjectRef, PlatformConfig};

use super::{
    ObjectSlice, ObjectTracking, Watchpoint, WatchpointId, WatchpointKind, WatchpointSettings,
    WatchpointVariant,
};
use crate::{
    realization::{self, HeapContext},
    ControlError, ControlEvent, ControlResult, EventBus, HeapInspector, TargetProcess, VmLockGuard,
};

/// The mutable state behind a [`WatchpointManager`].
#[derive(Debug, Default)]
pub(crate) struct WatchpointTable {
    pub(crate) arena: HashMap<WatchpointId, Watchpoint>,
    pub(crate) clients: BTreeMap<Address, WatchpointId>,
    pub(crate) systems: BTreeSet<WatchpointId>,
}

impl WatchpointTable {
    pub(crate) fn get(&self, id: WatchpointId) -> ControlResult<&Watchpoint> {
        self.arena.get(&id).ok_or_else(|| ControlError::AlreadyRemoved(format!("watchpoint {id}")))
    }

    pub(crate) fn get_mut(&mut self, id: WatchpointId) -> ControlResult<&mut Watchpoint> {
        self.arena
            .get_mut(&id)
            .ok_or_else(|| ControlError::AlreadyRemoved(format!("watchpoint {id}")))
    }

    /// Fail unless `id` may be changed directly by its creator.
    ///
    /// Relocation trackers belong to the object watchpoint they follow.
    pub(crate) fn get_controlled(&self, id: WatchpointId) -> ControlResult<&Watchpoint> {
        let watchpoint = self.get(id)?;
        if let WatchpointVariant::Relocation { primary } = &watchpoint.variant {
            return Err(ControlError::ManagedWatchpoint(format!(
                "relocation tracker {id} of watchpoint {primary}"
            )));
        }
        Ok(watchpoint)
    }

    /// Reject `region` if it starts at, or overlaps, a client watchpoint.
    ///
    /// Clients are never empty and never overlap each other, so only the
    /// neighbours in address order need checking.
    pub(crate) fn check_conflict(&self, region: MemoryRegion) -> ControlResult<()> {
        let region_of = |id: &WatchpointId| self.arena.get(id).map(|wp| wp.region);
        let conflict = |existing| ControlError::DuplicateWatchpoint { requested: region, existing };

        if let Some(existing) = self.clients.get(&region.start()).and_then(region_of) {
            return Err(conflict(existing));
        }
        let before = self.clients.range(..region.start()).next_back().and_then(|(_, id)| region_of(id));
        let after = self.clients.range(region.start()..).next().and_then(|(_, id)| region_of(id));
        match before.into_iter().chain(after).find(|existing| existing.overlaps(&region)) {
            Some(existing) => Err(conflict(existing)),
            None => Ok(()),
        }
    }

    fn index(&mut self, watchpoint: &Watchpoint) {
        match watchpoint.kind {
            WatchpointKind::Client => {
                self.clients.insert(watchpoint.region.start(), watchpoint.id);
            }
            WatchpointKind::System => {
                self.systems.insert(watchpoint.id);
            }
        }
    }

    fn unindex(&mut self, watchpoint: &Watchpoint) {
        match watchpoint.kind {
            WatchpointKind::Client => {
                self.clients.remove(&watchpoint.region.start());
            }
            WatchpointKind::System => {
                self.systems.remove(&watchpoint.id);
            }
        }
    }

    /// Insert a new watchpoint and install it if appropriate.
    ///
    /// Checks the region is well formed, then capacity, then (client watchpoints
    /// only) duplicate start and overlap. Nothing is left behind on failure.
    pub(crate) fn install(
        &mut self,
        ctx: &HeapContext<'_>,
        watchpoint: Watchpoint,
    ) -> ControlResult<WatchpointId> {
        if !watchpoint.region.is_well_formed() {
            return Err(ControlError::InvalidRegion(watchpoint.region));
        }
        let capacity = ctx.platform.watchpoint_capacity;
        if self.arena.len() >= capacity {
            return Err(ControlError::TooManyWatchpoints { capacity });
        }
        if watchpoint.kind == WatchpointKind::Client {
            self.check_conflict(watchpoint.region)?;
        }

        let id = watchpoint.id;
        let activate = watchpoint.wants_activation(ctx.heap.is_collecting());
        self.index(&watchpoint);
        self.arena.insert(id, watchpoint);
        if activate {
            if let Err(err) = self.activate(ctx, id) {
                self.detach(id);
                return Err(err);
            }
        }
        debug!(%id, "installed watchpoint");
        Ok(id)
    }

    pub(crate) fn activate(&mut self, ctx: &HeapContext<'_>, id: WatchpointId) -> ControlResult<()> {
        let watchpoint = self.get_mut(id)?;
        if watchpoint.active {
            return Err(ControlError::AlreadyActive(format!("watchpoint {id}")));
        }
        if !ctx.process.activate_watchpoint(watchpoint.region, watchpoint.settings)? {
            return Err(eyre!("platform refused watchpoint {id} at {}", watchpoint.region).into());
        }
        watchpoint.active = true;
        Ok(())
    }

    pub(crate) fn deactivate(&mut self, ctx: &HeapContext<'_>, id: WatchpointId) -> ControlResult<()> {
        let watchpoint = self.get_mut(id)?;
        if !watchpoint.active {
            return Err(ControlError::NotActive(format!("watchpoint {id}")));
        }
        if !ctx.process.deactivate_watchpoint(watchpoint.region)? {
            warn!(%id, region = %watchpoint.region, "no watchpoint was installed in the debuggee");
        }
        watchpoint.active = false;
        Ok(())
    }

    /// Drop a watchpoint from every index and mark it dead. Debuggee state is untouched.
    pub(crate) fn detach(&mut self, id: WatchpointId) -> Option<Watchpoint> {
        let mut watchpoint = self.arena.remove(&id)?;
        self.unindex(&watchpoint);
        watchpoint.alive = false;
        watchpoint.active = false;
        Some(watchpoint)
    }

    /// Uninstall and drop a watchpoint, together with its relocation tracker.
    pub(crate) fn remove_entry(
        &mut self,
        ctx: &HeapContext<'_>,
        id: WatchpointId,
    ) -> ControlResult<Watchpoint> {
        let watchpoint = self.get(id)?;
        let variant = watchpoint.variant.clone();
        if watchpoint.active {
            self.deactivate(ctx, id)?;
        }
        match variant {
            WatchpointVariant::Object(ObjectTracking { relocation: Some(tracker), .. }) => {
                if self.arena.contains_key(&tracker) {
                    if let Err(err) = self.remove_entry(ctx, tracker) {
                        warn!(%id, %tracker, error = %err, "failed to remove relocation tracker");
                    }
                }
            }
            WatchpointVariant::Relocation { primary } => {
                if let Some(tracking) =
                    self.arena.get_mut(&primary).and_then(Watchpoint::object_tracking_mut)
                {
                    if tracking.relocation == Some(id) {
                        tracking.relocation = None;
                    }
                }
            }
            _ => {}
        }
        self.detach(id).ok_or_else(|| ControlError::AlreadyRemoved(format!("watchpoint {id}")))
    }

    /// Reinstall after a settings change so the debuggee sees the new settings.
    pub(crate) fn reset(&mut self, ctx: &HeapContext<'_>, id: WatchpointId) -> ControlResult<()> {
        if self.get(id)?.active {
            self.deactivate(ctx, id)?;
        }
        if self.get(id)?.wants_activation(ctx.heap.is_collecting()) {
            self.activate(ctx, id)?;
        }
        Ok(())
    }

    /// Move a watchpoint to `new_start`, keeping its size and settings.
    ///
    /// Either the move completes or the watchpoint stays installed where it was.
    pub(crate) fn relocate(
        &mut self,
        ctx: &HeapContext<'_>,
        id: WatchpointId,
        new_start: Address,
    ) -> ControlResult<()> {
        let watchpoint = self.get(id)?;
        let old = watchpoint.region;
        let kind = watchpoint.kind;
        let was_active = watchpoint.active;
        let region = old.with_start(new_start);
        if region == old {
            return Ok(());
        }
        if !region.is_well_formed() {
            return Err(ControlError::InvalidRegion(region));
        }

        if kind == WatchpointKind::Client {
            self.clients.remove(&old.start());
            if let Err(err) = self.check_conflict(region) {
                self.clients.insert(old.start(), id);
                return Err(err);
            }
        }
        if was_active {
            if let Err(err) = self.deactivate(ctx, id) {
                if kind == WatchpointKind::Client {
                    self.clients.insert(old.start(), id);
                }
                return Err(err);
            }
        }

        self.get_mut(id)?.region = region;
        if kind == WatchpointKind::Client {
            self.clients.insert(region.start(), id);
        }
        if was_active && self.get(id)?.wants_activation(ctx.heap.is_collecting()) {
            if let Err(err) = self.activate(ctx, id) {
                self.get_mut(id)?.region = old;
                if kind == WatchpointKind::Client {
                    self.clients.remove(&region.start());
                    self.clients.insert(old.start(), id);
                }
                if let Err(restore) = self.activate(ctx, id) {
                    warn!(%id, region = %old, error = %restore, "failed to reinstall watchpoint after failed move");
                }
                return Err(err);
            }
        }
        debug!(%id, from = %old, to = %region, "relocated watchpoint");
        Ok(())
    }

    /// Client watchpoint whose region contains `address`.
    pub(crate) fn client_containing(&self, address: Address) -> Option<WatchpointId> {
        self.clients
            .range(..=address)
            .next_back()
            .map(|(_, id)| *id)
            .filter(|id| self.arena.get(id).is_some_and(|wp| wp.region.contains(address)))
    }

    /// System watchpoint whose region contains `address`.
    pub(crate) fn system_containing(&self, address: Address) -> Option<WatchpointId> {
        self.systems
            .iter()
            .copied()
            .find(|id| self.arena.get(id).is_some_and(|wp| wp.region.contains(address)))
    }

    fn has_clients(&self) -> bool {
        !self.clients.is_empty()
    }

    fn snapshot(&self) -> WatchpointSnapshot {
        let mut snapshot = WatchpointSnapshot::default();
        for id in self.clients.values() {
            if let Some(watchpoint) = self.arena.get(id) {
                snapshot.client.push_back_mut(watchpoint.clone());
            }
        }
        for id in &self.systems {
            if let Some(watchpoint) = self.arena.get(id) {
                snapshot.system.push_back_mut(watchpoint.clone());
            }
        }
        snapshot
    }
}

/// Immutable view of all watchpoints at one point in time.
#[derive(Debug, Clone)]
pub struct WatchpointSnapshot {
    client: VectorSync<Watchpoint>,
    system: VectorSync<Watchpoint>,
}

impl Default for WatchpointSnapshot {
    fn default() -> Self {
        Self { client: VectorSync::new_sync(), system: VectorSync::new_sync() }
    }
}

impl WatchpointSnapshot {
    /// Client watchpoints ordered by start address.
    pub fn client(&self) -> &VectorSync<Watchpoint> {
        &self.client
    }

    /// System watchpoints.
    pub fn system(&self) -> &VectorSync<Watchpoint> {
        &self.system
    }

    /// Look up a watchpoint of either kind.
    pub fn get(&self, id: WatchpointId) -> Option<&Watchpoint> {
        self.iter().find(|wp| wp.id == id)
    }

    /// Client then system watchpoints.
    pub fn iter(&self) -> impl Iterator<Item = &Watchpoint> {
        self.client.iter().chain(self.system.iter())
    }

    /// Total number of watchpoints, which is what the platform capacity limits.
    pub fn len(&self) -> usize {
        self.client.len() + self.system.len()
    }

    /// Whether there are no watchpoints.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of a watchpoint trap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchpointHit {
    /// The watchpoint that trapped.
    pub watchpoint: WatchpointId,
    /// The accessed address.
    pub address: Address,
    /// Whether to report the stop to the client.
    pub halt: bool,
}

/// Thread-safe owner of all watchpoints of one debuggee.
pub struct WatchpointManager {
    process: Arc<dyn TargetProcess>,
    heap: Arc<dyn HeapInspector>,
    platform: PlatformConfig,
    table: Mutex<WatchpointTable>,
    snapshot: RwLock<WatchpointSnapshot>,
    events: EventBus,
}

impl WatchpointManager {
    /// Create a manager with no watchpoints.
    pub fn new(
        process: Arc<dyn TargetProcess>,
        heap: Arc<dyn HeapInspector>,
        platform: PlatformConfig,
        events: EventBus,
    ) -> Self {
        Self {
            process,
            heap,
            platform,
            table: Mutex::new(WatchpointTable::default()),
            snapshot: RwLock::new(WatchpointSnapshot::default()),
            events,
        }
    }

    /// Maximum number of watchpoints, client and system together.
    pub fn capacity(&self) -> usize {
        self.platform.watchpoint_capacity
    }

    fn context(&self) -> HeapContext<'_> {
        HeapContext { process: self.process.as_ref(), heap: self.heap.as_ref(), platform: &self.platform }
    }

    fn mutate<R>(
        &self,
        f: impl FnOnce(&mut WatchpointTable, &HeapContext<'_>) -> ControlResult<(R, bool)>,
    ) -> ControlResult<R> {
        let _vm = VmLockGuard::try_acquire(self.process.as_ref())?;
        self.apply(f)
    }

    fn mutate_stopped<R>(
        &self,
        f: impl FnOnce(&mut WatchpointTable, &HeapContext<'_>) -> ControlResult<(R, bool)>,
    ) -> ControlResult<R> {
        let _vm = VmLockGuard::acquire(self.process.as_ref());
        self.apply(f)
    }

    fn apply<R>(
        &self,
        f: impl FnOnce(&mut WatchpointTable, &HeapContext<'_>) -> ControlResult<(R, bool)>,
    ) -> ControlResult<R> {
        let ctx = self.context();
        let (result, notify) = {
            let mut table = self.table.lock();
            let outcome = f(&mut table, &ctx);
            *self.snapshot.write() = table.snapshot();
            outcome?
        };
        if notify {
            self.events.publish(ControlEvent::WatchpointsChanged);
        }
        Ok(result)
    }

    /// Create a watchpoint on a fixed region.
    pub fn create_region_watchpoint(
        &self,
        region: MemoryRegion,
        settings: WatchpointSettings,
        kind: WatchpointKind,
    ) -> ControlResult<WatchpointId> {
        self.mutate(|table, ctx| {
            let description = match kind {
                WatchpointKind::Client => "Client-specified watchpoint",
                WatchpointKind::System => "System watchpoint",
            };
            let watchpoint = Watchpoint::new(
                kind,
                description.to_string(),
                region,
                settings,
                WatchpointVariant::Region,
            );
            let id = table.install(ctx, watchpoint)?;
            info!(%id, %region, %settings, "created watchpoint");
            Ok((id, kind == WatchpointKind::Client))
        })
    }

    /// Create a client watchpoint on part of a heap object that follows the object
    /// when the collector moves it.
    ///
    /// The object must not be known dead or already forwarded.
    pub fn create_object_watchpoint(
        &self,
        object: ObjectRef,
        slice: ObjectSlice,
        settings: WatchpointSettings,
    ) -> ControlResult<WatchpointId> {
        self.mutate(|table, ctx| {
            let status = ctx.heap.object_status(object);
            if !status.is_not_dead() {
                return Err(ControlError::ObjectNotLive { object, status });
            }
            let origin = ctx.heap.object_origin(object)?;
            let size = match &slice {
                ObjectSlice::Whole => ctx.heap.object_size(object)?,
                other => other.size(0),
            };
            let tracking = ObjectTracking::new(object, slice);
            let region = MemoryRegion::new(origin.plus(tracking.offset_from_origin()), size);
            let watchpoint = Watchpoint::new(
                WatchpointKind::Client,
                format!("Watchpoint on {tracking}"),
                region,
                settings,
                WatchpointVariant::Object(tracking),
            );

            let id = table.install(ctx, watchpoint)?;
            if let Err(err) = realization::install_relocation_tracker(table, ctx, id, origin) {
                if let Err(rollback) = table.remove_entry(ctx, id) {
                    warn!(%id, error = %rollback, "failed to roll back object watchpoint");
                }
                return Err(err);
            }
            info!(%id, %object, %region, %settings, "created object watchpoint");
            Ok((id, true))
        })
    }

    fn update_settings(
        &self,
        id: WatchpointId,
        update: impl FnOnce(&mut WatchpointSettings),
    ) -> ControlResult<()> {
        self.mutate(|table, ctx| {
            table.get_controlled(id)?;
            let watchpoint = table.get_mut(id)?;
            let old = watchpoint.settings;
            update(&mut watchpoint.settings);
            let notify = watchpoint.kind == WatchpointKind::Client;
            if watchpoint.settings == old {
                return Ok(((), false));
            }
            if let Err(err) = table.reset(ctx, id) {
                table.get_mut(id)?.settings = old;
                if let Err(restore) = table.reset(ctx, id) {
                    warn!(%id, error = %restore, "failed to restore watchpoint after settings change");
                }
                return Err(err);
            }
            debug!(%id, from = %old, to = %table.get(id)?.settings, "watchpoint settings changed");
            Ok(((), notify))
        })
    }

    /// Replace all four settings at once.
    pub fn set_settings(&self, id: WatchpointId, settings: WatchpointSettings) -> ControlResult<()> {
        self.update_settings(id, |current| *current = settings)
    }

    /// Trap on reads or not.
    pub fn set_trap_on_read(&self, id: WatchpointId, trap: bool) -> ControlResult<()> {
        self.update_settings(id, |settings| settings.trap_on_read = trap)
    }

    /// Trap on writes or not.
    pub fn set_trap_on_write(&self, id: WatchpointId, trap: bool) -> ControlResult<()> {
        self.update_settings(id, |settings| settings.trap_on_write = trap)
    }

    /// Trap on instruction fetch or not.
    pub fn set_trap_on_exec(&self, id: WatchpointId, trap: bool) -> ControlResult<()> {
        self.update_settings(id, |settings| settings.trap_on_exec = trap)
    }

    /// Keep the watchpoint installed during collection or not.
    ///
    /// Enabling this mid-collection installs a watchpoint that was suppressed.
    pub fn set_enabled_during_gc(&self, id: WatchpointId, enabled: bool) -> ControlResult<()> {
        self.update_settings(id, |settings| settings.enabled_during_gc = enabled)
    }

    /// Move a watchpoint to a new start address, keeping its size and settings.
    pub fn relocate(&self, id: WatchpointId, new_start: Address) -> ControlResult<()> {
        self.mutate(|table, ctx| {
            table.get_controlled(id)?;
            table.relocate(ctx, id, new_start)?;
            Ok(((), table.get(id)?.kind == WatchpointKind::Client))
        })
    }

    /// Remove a watchpoint, uninstalling it first. Returns the now dead entity.
    ///
    /// Relocation trackers go away with the watchpoint they follow and cannot be
    /// removed on their own.
    pub fn remove(&self, id: WatchpointId) -> ControlResult<Watchpoint> {
        self.mutate(|table, ctx| {
            table.get_controlled(id)?;
            let removed = table.remove_entry(ctx, id)?;
            info!(watchpoint = %removed, "removed watchpoint");
            let notify = removed.kind == WatchpointKind::Client;
            Ok((removed, notify))
        })
    }

    /// Handle a thread stopped by a watchpoint trap on `address`.
    ///
    /// Relocation trackers are consulted first and never halt. A watchpoint
    /// that is not enabled during collection is uninstalled until the
    /// collection completes and its trap is ignored.
    pub fn watchpoint_hit(&self, address: Address) -> ControlResult<Option<WatchpointHit>> {
        self.mutate_stopped(|table, ctx| {
            let Some(id) = table.system_containing(address).or_else(|| table.client_containing(address))
            else {
                debug!(%address, "watchpoint trap with no watchpoint");
                return Ok((None, false));
            };
            let watchpoint = table.get(id)?;
            let variant = watchpoint.variant.clone();
            let enabled_during_gc = watchpoint.settings.enabled_during_gc;

            let (halt, notify) = match variant {
                WatchpointVariant::Relocation { primary } => {
                    (false, realization::follow_relocation(table, ctx, id, primary))
                }
                _ if ctx.heap.is_collecting() && !enabled_during_gc => {
                    table.deactivate(ctx, id)?;
                    debug!(%id, "suppressed watchpoint for the rest of the collection");
                    (false, false)
                }
                _ => (true, false),
            };
            Ok((Some(WatchpointHit { watchpoint: id, address, halt }), notify))
        })
    }

    /// Bring every watchpoint up to date after a garbage collection.
    ///
    /// Must complete before the debuggee resumes.
    pub fn on_gc_completed(&self) -> ControlResult<()> {
        if self.table.lock().arena.is_empty() {
            return Ok(());
        }
        self.mutate_stopped(|table, ctx| Ok(((), realization::revalidate_after_gc(table, ctx))))
    }

    /// Forget every watchpoint without touching the debuggee.
    pub fn on_process_terminated(&self) {
        let had_clients = {
            let mut table = self.table.lock();
            let had_clients = table.has_clients();
            *table = WatchpointTable::default();
            *self.snapshot.write() = WatchpointSnapshot::default();
            had_clients
        };
        info!("process terminated, all watchpoints cleared");
        if had_clients {
            self.events.publish(ControlEvent::WatchpointsChanged);
        }
    }

    /// Current immutable snapshot.
    pub fn snapshot(&self) -> WatchpointSnapshot {
        self.snapshot.read().clone()
    }

    /// Client watchpoints ordered by start address.
    pub fn client_watchpoints(&self) -> VectorSync<Watchpoint> {
        self.snapshot.read().client.clone()
    }

    /// System watchpoints.
    pub fn system_watchpoints(&self) -> VectorSync<Watchpoint> {
        self.snapshot.read().system.clone()
    }

    /// A watchpoint by id, as of the latest snapshot.
    pub fn watchpoint(&self, id: WatchpointId) -> Option<Watchpoint> {
        self.snapshot.read().get(id).cloned()
    }

    /// Client watchpoints overlapping `region`.
    pub fn find_watchpoints(&self, region: MemoryRegion) -> Vec<Watchpoint> {
        self.snapshot.read().client.iter().filter(|wp| wp.region.overlaps(&region)).cloned().collect()
    }

    /// The client watchpoint covering `address`, if any.
    pub fn find_client_watchpoint_containing(&self, address: Address) -> Option<Watchpoint> {
        self.snapshot.read().client.iter().find(|wp| wp.region.contains(address)).cloned()
    }

    /// The system watchpoint covering `address`, if any.
    pub fn find_system_watchpoint(&self, address: Address) -> Option<Watchpoint> {
        self.snapshot.read().system.iter().find(|wp| wp.region.contains(address)).cloned()
    }

    /// Current debuggee bytes under a watchpoint.
    pub fn read_watchpoint_memory(&self, id: WatchpointId) -> ControlResult<Vec<u8>> {
        let region = self
            .watchpoint(id)
            .map(|wp| wp.region)
            .ok_or_else(|| ControlError::AlreadyRemoved(format!("watchpoint {id}")))?;
        let _vm = VmLockGuard::try_acquire(self.process.as_ref())?;
        Ok(self.process.read_bytes(region.start(), region.size() as usize)?)
    }

    /// Write a human-readable listing of all watchpoints.
    pub fn write_summary(&self, out: &mut dyn io::Write) -> io::Result<()> {
        let snapshot = self.snapshot();
        writeln!(out, "Watchpoints ({} of {}):", snapshot.len(), self.capacity())?;
        if !snapshot.is_empty() {
            writeln!(out, "{}", snapshot.iter().map(|wp| format!("  {wp}")).join("\n"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with(regions: &[(u64, u64)]) -> WatchpointTable {
        let mut table = WatchpointTable::default();
        for (start, size) in regions {
            let watchpoint = Watchpoint::new(
                WatchpointKind::Client,
                "test".into(),
                MemoryRegion::new(Address::new(*start), *size),
                WatchpointSettings::default(),
                WatchpointVariant::Region,
            );
            table.index(&watchpoint);
            table.arena.insert(watchpoint.id, watchpoint);
        }
        table
    }

    #[test]
    fn test_conflict_checks_neighbours() {
        let table = table_with(&[(0x1000, 8), (0x1008, 8)]);

        let straddle = MemoryRegion::new(Address::new(0x1004), 8);
        assert!(matches!(
            table.check_conflict(straddle),
            Err(ControlError::DuplicateWatchpoint { existing, .. }) if existing.start() == Address::new(0x1000)
        ));

        let same_start = MemoryRegion::new(Address::new(0x1008), 1);
        assert!(table.check_conflict(same_start).is_err());

        assert!(table.check_conflict(MemoryRegion::new(Address::new(0x1010), 8)).is_ok());
        assert!(table.check_conflict(MemoryRegion::new(Address::new(0xff8), 8)).is_ok());
    }

    #[test]
    fn test_client_containing() {
        let table = table_with(&[(0x1000, 8), (0x2000, 4)]);
        assert!(table.client_containing(Address::new(0x1007)).is_some());
        assert!(table.client_containing(Address::new(0x1008)).is_none());
        assert!(table.client_containing(Address::new(0x2003)).is_some());
        assert!(table.client_containing(Address::new(0xfff)).is_none());
    }

    #[test]
    fn test_detach_marks_dead() {
        let mut table = table_with(&[(0x1000, 8)]);
        let id = *table.clients.values().next().unwrap();
        let removed = table.detach(id).unwrap();
        assert!(!removed.is_alive());
        assert!(table.clients.is_empty());
        assert!(matches!(table.get(id), Err(ControlError::AlreadyRemoved(_))));
    }
}
