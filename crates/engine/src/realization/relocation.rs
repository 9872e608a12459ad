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

use itertools::Itertools;
use tracing::{debug, info, warn};
use vmdb_common::{Address, MemoryRegion, ObjectStatus, PlatformConfig};

use crate::{
    ControlResult, HeapInspector, TargetProcess, Watchpoint, WatchpointId, WatchpointKind,
    WatchpointSettings, WatchpointTable, WatchpointVariant,
};

/// Collaborators needed to keep watchpoints in step with the heap.
pub(crate) struct HeapContext<'a> {
    pub(crate) process: &'a dyn TargetProcess,
    pub(crate) heap: &'a dyn HeapInspector,
    pub(crate) platform: &'a PlatformConfig,
}

/// Watch the forwarding-pointer slot of the object tracked by `primary`, whose
/// origin is currently `origin`.
///
/// The tracker is a system watchpoint but still counts toward capacity.
pub(crate) fn install_relocation_tracker(
    table: &mut WatchpointTable,
    ctx: &HeapContext<'_>,
    primary: WatchpointId,
    origin: Address,
) -> ControlResult<WatchpointId> {
    let object = table.get(primary)?.object_tracking().map(|tracking| tracking.object());
    let description = match object {
        Some(object) => format!("Relocation tracker for {object}"),
        None => format!("Relocation tracker for watchpoint {primary}"),
    };
    let slot = MemoryRegion::new(
        origin.plus(ctx.heap.forwarding_pointer_offset()),
        ctx.platform.word_size,
    );
    let tracker = Watchpoint::new(
        WatchpointKind::System,
        description,
        slot,
        WatchpointSettings::RELOCATION,
        WatchpointVariant::Relocation { primary },
    );
    let id = table.install(ctx, tracker)?;
    if let Some(tracking) = table.get_mut(primary)?.object_tracking_mut() {
        tracking.relocation = Some(id);
    }
    debug!(%primary, tracker = %id, %slot, "watching forwarding pointer");
    Ok(id)
}

/// The collector wrote to a tracked object's forwarding-pointer slot.
///
/// If the object has moved, move `primary` along with it and re-arm the tracker
/// at the new origin. Returns whether a client-visible region changed. Never
/// fails: inconsistencies are logged and debugging carries on.
pub(crate) fn follow_relocation(
    table: &mut WatchpointTable,
    ctx: &HeapContext<'_>,
    tracker: WatchpointId,
    primary: WatchpointId,
) -> bool {
    let Some((object, offset, kind)) = table.arena.get(&primary).and_then(|wp| {
        wp.object_tracking().map(|tracking| (tracking.object(), tracking.offset_from_origin(), wp.kind))
    }) else {
        warn!(%tracker, %primary, "relocation tracker without an object watchpoint");
        return false;
    };
    let Some(slot) = table.arena.get(&tracker).map(|wp| wp.region.start()) else {
        return false;
    };
    let old_origin = slot.minus(ctx.heap.forwarding_pointer_offset());

    let new_origin = match ctx.heap.forwarding_address(old_origin) {
        Ok(Some(new_origin)) => new_origin,
        Ok(None) => {
            debug!(%object, %old_origin, "forwarding slot written but object not forwarded (IGNORED)");
            return false;
        }
        Err(err) => {
            warn!(%object, %old_origin, error = %err, "cannot resolve forwarded object");
            return false;
        }
    };

    let moved = match table.relocate(ctx, primary, new_origin.plus(offset)) {
        Ok(()) => true,
        Err(err) => {
            warn!(%primary, %object, %new_origin, error = %err, "relocation failure: watchpoint left behind");
            false
        }
    };
    if let Err(err) = table.remove_entry(ctx, tracker) {
        warn!(%tracker, error = %err, "failed to remove stale relocation tracker");
    }
    if let Err(err) = install_relocation_tracker(table, ctx, primary, new_origin) {
        warn!(%primary, %object, error = %err, "object watchpoint no longer tracks relocation");
    }
    if moved {
        info!(%primary, %object, from = %old_origin, to = %new_origin, "watchpoint followed relocated object");
    }
    moved && kind == WatchpointKind::Client
}

/// Re-check every object watchpoint once a collection has finished, then
/// reinstall watchpoints suppressed during the collection.
///
/// A watchpoint on a collected object becomes a plain region watchpoint on the
/// object's last known memory. Returns whether client-visible state changed.
pub(crate) fn revalidate_after_gc(table: &mut WatchpointTable, ctx: &HeapContext<'_>) -> bool {
    let objects: Vec<WatchpointId> = table
        .arena
        .values()
        .filter(|wp| wp.object_tracking().is_some())
        .map(|wp| wp.id)
        .sorted()
        .collect();

    let mut changed = false;
    for id in objects {
        let Some(watchpoint) = table.arena.get(&id) else { continue };
        let Some(tracking) = watchpoint.object_tracking() else { continue };
        let object = tracking.object();
        let offset = tracking.offset_from_origin();
        let (kind, region, settings) = (watchpoint.kind, watchpoint.region, watchpoint.settings);
        let description = watchpoint.description.clone();

        match ctx.heap.object_status(object) {
            ObjectStatus::Dead => {
                if let Err(err) = table.remove_entry(ctx, id) {
                    warn!(%id, %object, error = %err, "failed to remove watchpoint on collected object");
                    continue;
                }
                changed |= kind == WatchpointKind::Client;
                let replacement = Watchpoint::new(
                    kind,
                    format!("{description} (object collected)"),
                    region,
                    settings,
                    WatchpointVariant::Region,
                );
                match table.install(ctx, replacement) {
                    Ok(replacement) => {
                        info!(%id, %object, %replacement, %region, "object collected, kept watching its memory");
                    }
                    Err(err) => warn!(%id, %object, %region, error = %err, "cannot replace watchpoint on collected object"),
                }
            }
            status => match ctx.heap.object_origin(object) {
                Ok(origin) if origin.plus(offset) == region.start() => {}
                Ok(origin) => warn!(
                    %id,
                    %object,
                    %status,
                    expected = %origin.plus(offset),
                    actual = %region.start(),
                    "relocation failure: watchpoint does not follow its object"
                ),
                Err(err) => warn!(%id, %object, %status, error = %err, "cannot locate watched object"),
            },
        }
    }

    let suppressed: Vec<WatchpointId> = table
        .arena
        .values()
        .filter(|wp| wp.wants_activation(false))
        .map(|wp| wp.id)
        .sorted()
        .collect();
    for id in suppressed {
        if let Err(err) = table.activate(ctx, id) {
            warn!(%id, error = %err, "failed to reinstall watchpoint after collection");
        }
    }
    changed
}
