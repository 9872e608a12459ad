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

use tracing::info;
use vmdb_common::{Address, MemoryRegion, ObjectRef, ObjectStatus};
use vmdb_engine::{
    test_utils::SimulatedVm, ControlError, ControlEvent, ObjectSlice, WatchpointKind,
    WatchpointSettings, WatchpointVariant,
};

const WRITE: WatchpointSettings = WatchpointSettings::new(false, true, false, false);
const WRITE_DURING_GC: WatchpointSettings = WatchpointSettings::new(false, true, false, true);

fn region(start: u64, size: u64) -> MemoryRegion {
    MemoryRegion::new(Address::new(start), size)
}

fn count_field() -> ObjectSlice {
    ObjectSlice::Field { name: "count".into(), offset: 16, size: 8 }
}

#[test]
fn test_adjacent_regions_and_overlap() {
    vmdb_common::logging::ensure_test_logging(None);
    info!("Running test");
    let vm = SimulatedVm::new();
    let plane = SimulatedVm::control_plane(&vm).unwrap();
    let watchpoints = plane.watchpoints();

    watchpoints.create_region_watchpoint(region(0x1000, 8), WRITE, WatchpointKind::Client).unwrap();
    watchpoints.create_region_watchpoint(region(0x1008, 8), WRITE, WatchpointKind::Client).unwrap();
    let err = watchpoints
        .create_region_watchpoint(region(0x1004, 8), WRITE, WatchpointKind::Client)
        .unwrap_err();
    assert!(matches!(err, ControlError::DuplicateWatchpoint { .. }));
    assert!(err.is_recoverable());

    assert_eq!(vm.installed_watchpoints(), vec![region(0x1000, 8), region(0x1008, 8)]);
    let starts: Vec<_> = watchpoints.client_watchpoints().iter().map(|wp| wp.region().start()).collect();
    assert_eq!(starts, vec![Address::new(0x1000), Address::new(0x1008)]);
}

#[test]
fn test_system_watchpoints_skip_overlap_check() {
    vmdb_common::logging::ensure_test_logging(None);
    info!("Running test");
    let vm = SimulatedVm::new();
    let plane = SimulatedVm::control_plane(&vm).unwrap();
    let watchpoints = plane.watchpoints();

    watchpoints.create_region_watchpoint(region(0x1000, 16), WRITE, WatchpointKind::Client).unwrap();
    let system = watchpoints
        .create_region_watchpoint(region(0x1004, 4), WatchpointSettings::new(true, false, false, false), WatchpointKind::System)
        .unwrap();
    assert_eq!(watchpoints.find_system_watchpoint(Address::new(0x1005)).unwrap().id(), system);
    assert_eq!(watchpoints.system_watchpoints().len(), 1);
}

#[test]
fn test_capacity_counts_every_watchpoint() {
    vmdb_common::logging::ensure_test_logging(None);
    info!("Running test");
    let vm = SimulatedVm::new();
    let plane = SimulatedVm::control_plane(&vm).unwrap();
    let watchpoints = plane.watchpoints();
    assert_eq!(watchpoints.capacity(), 4);

    for start in [0x1000u64, 0x2000, 0x3000] {
        watchpoints.create_region_watchpoint(region(start, 8), WRITE, WatchpointKind::Client).unwrap();
    }
    watchpoints.create_region_watchpoint(region(0x9000, 8), WRITE, WatchpointKind::System).unwrap();
    assert!(matches!(
        watchpoints.create_region_watchpoint(region(0x4000, 8), WRITE, WatchpointKind::Client),
        Err(ControlError::TooManyWatchpoints { capacity: 4 })
    ));
    assert_eq!(watchpoints.snapshot().len(), 4);
}

#[test]
fn test_settings_change_reinstalls() {
    vmdb_common::logging::ensure_test_logging(None);
    info!("Running test");
    let vm = SimulatedVm::new();
    let plane = SimulatedVm::control_plane(&vm).unwrap();
    let watchpoints = plane.watchpoints();
    let id = watchpoints.create_region_watchpoint(region(0x1000, 8), WRITE, WatchpointKind::Client).unwrap();

    watchpoints.set_trap_on_read(id, true).unwrap();
    let expected = WatchpointSettings::new(true, true, false, false);
    assert_eq!(watchpoints.watchpoint(id).unwrap().settings(), expected);
    assert_eq!(vm.installed_settings(region(0x1000, 8)), Some(expected));

    // Turning every trap off leaves the watchpoint disabled and uninstalled.
    watchpoints.set_settings(id, WatchpointSettings::default()).unwrap();
    let wp = watchpoints.watchpoint(id).unwrap();
    assert!(!wp.is_enabled());
    assert!(!wp.is_active());
    assert!(vm.installed_watchpoints().is_empty());

    watchpoints.set_trap_on_exec(id, true).unwrap();
    assert!(watchpoints.watchpoint(id).unwrap().is_active());
}

#[test]
fn test_refused_settings_change_rolls_back() {
    vmdb_common::logging::ensure_test_logging(None);
    info!("Running test");
    let vm = SimulatedVm::new();
    let plane = SimulatedVm::control_plane(&vm).unwrap();
    let watchpoints = plane.watchpoints();
    let id = watchpoints.create_region_watchpoint(region(0x1000, 8), WRITE, WatchpointKind::Client).unwrap();

    vm.refuse_watchpoints(true);
    assert!(matches!(watchpoints.set_trap_on_write(id, false), Ok(())));
    assert!(matches!(watchpoints.set_trap_on_read(id, true), Err(ControlError::Process(_))));
    assert_eq!(watchpoints.watchpoint(id).unwrap().settings(), WatchpointSettings::default());
    vm.refuse_watchpoints(false);
}

#[test]
fn test_refused_creation_leaves_nothing() {
    vmdb_common::logging::ensure_test_logging(None);
    info!("Running test");
    let vm = SimulatedVm::new();
    let plane = SimulatedVm::control_plane(&vm).unwrap();
    let watchpoints = plane.watchpoints();

    vm.refuse_watchpoints(true);
    assert!(watchpoints.create_region_watchpoint(region(0x1000, 8), WRITE, WatchpointKind::Client).is_err());
    assert!(watchpoints.snapshot().is_empty());
    vm.refuse_watchpoints(false);
    watchpoints.create_region_watchpoint(region(0x1000, 8), WRITE, WatchpointKind::Client).unwrap();
}

#[test]
fn test_trigger_during_gc_is_suppressed() {
    vmdb_common::logging::ensure_test_logging(None);
    info!("Running test");
    let vm = SimulatedVm::new();
    let plane = SimulatedVm::control_plane(&vm).unwrap();
    let watchpoints = plane.watchpoints();
    let quiet = watchpoints.create_region_watchpoint(region(0x1000, 8), WRITE, WatchpointKind::Client).unwrap();
    let loud = watchpoints
        .create_region_watchpoint(region(0x2000, 8), WRITE_DURING_GC, WatchpointKind::Client)
        .unwrap();

    vm.set_collecting(true);
    let hit = plane.watchpoint_hit(Address::new(0x1004)).unwrap().unwrap();
    assert_eq!(hit.watchpoint, quiet);
    assert!(!hit.halt);
    assert!(!watchpoints.watchpoint(quiet).unwrap().is_active());
    assert_eq!(vm.installed_watchpoints(), vec![region(0x2000, 8)]);

    let hit = plane.watchpoint_hit(Address::new(0x2000)).unwrap().unwrap();
    assert_eq!(hit.watchpoint, loud);
    assert!(hit.halt);

    vm.set_collecting(false);
    plane.on_gc_completed().unwrap();
    assert!(watchpoints.watchpoint(quiet).unwrap().is_active());
    assert!(plane.watchpoint_hit(Address::new(0x1000)).unwrap().unwrap().halt);

    assert!(plane.watchpoint_hit(Address::new(0x3000)).unwrap().is_none());
}

#[test]
fn test_enable_during_gc_mid_collection() {
    vmdb_common::logging::ensure_test_logging(None);
    info!("Running test");
    let vm = SimulatedVm::new();
    let plane = SimulatedVm::control_plane(&vm).unwrap();
    let watchpoints = plane.watchpoints();

    vm.set_collecting(true);
    let id = watchpoints.create_region_watchpoint(region(0x1000, 8), WRITE, WatchpointKind::Client).unwrap();
    assert!(!watchpoints.watchpoint(id).unwrap().is_active());

    watchpoints.set_enabled_during_gc(id, true).unwrap();
    assert!(watchpoints.watchpoint(id).unwrap().is_active());
    vm.set_collecting(false);
}

#[test]
fn test_relocate_keeps_size_and_settings() {
    vmdb_common::logging::ensure_test_logging(None);
    info!("Running test");
    let vm = SimulatedVm::new();
    let plane = SimulatedVm::control_plane(&vm).unwrap();
    let watchpoints = plane.watchpoints();
    let id = watchpoints.create_region_watchpoint(region(0x1000, 8), WRITE, WatchpointKind::Client).unwrap();
    watchpoints.create_region_watchpoint(region(0x4000, 8), WRITE, WatchpointKind::Client).unwrap();

    watchpoints.relocate(id, Address::new(0x3000)).unwrap();
    let wp = watchpoints.watchpoint(id).unwrap();
    assert_eq!(wp.region(), region(0x3000, 8));
    assert_eq!(wp.settings(), WRITE);
    assert!(wp.is_active());
    assert_eq!(vm.installed_watchpoints(), vec![region(0x3000, 8), region(0x4000, 8)]);

    assert!(matches!(
        watchpoints.relocate(id, Address::new(0x3ffc)),
        Err(ControlError::DuplicateWatchpoint { .. })
    ));
    assert_eq!(watchpoints.watchpoint(id).unwrap().region(), region(0x3000, 8));
}

#[test]
fn test_failed_move_stays_installed_in_place() {
    vmdb_common::logging::ensure_test_logging(None);
    info!("Running test");
    let vm = SimulatedVm::new();
    let plane = SimulatedVm::control_plane(&vm).unwrap();
    let watchpoints = plane.watchpoints();
    let id = watchpoints.create_region_watchpoint(region(0x1000, 8), WRITE, WatchpointKind::Client).unwrap();
    // The platform already holds a watchpoint on the destination and refuses a second one.
    watchpoints.create_region_watchpoint(region(0x3000, 8), WRITE, WatchpointKind::System).unwrap();

    assert!(matches!(watchpoints.relocate(id, Address::new(0x3000)), Err(ControlError::Process(_))));
    let wp = watchpoints.watchpoint(id).unwrap();
    assert_eq!(wp.region(), region(0x1000, 8));
    assert!(wp.is_active());
    assert_eq!(vm.installed_watchpoints(), vec![region(0x1000, 8), region(0x3000, 8)]);
    assert_eq!(watchpoints.find_client_watchpoint_containing(Address::new(0x1004)).unwrap().id(), id);
    assert!(watchpoints.find_client_watchpoint_containing(Address::new(0x3004)).is_none());

    watchpoints.relocate(id, Address::new(0x5000)).unwrap();
    assert_eq!(vm.installed_watchpoints(), vec![region(0x3000, 8), region(0x5000, 8)]);
}

#[test]
fn test_empty_and_wrapping_regions_are_rejected() {
    vmdb_common::logging::ensure_test_logging(None);
    info!("Running test");
    let vm = SimulatedVm::new();
    let plane = SimulatedVm::control_plane(&vm).unwrap();
    let watchpoints = plane.watchpoints();
    let id = watchpoints.create_region_watchpoint(region(0x1000, 8), WRITE, WatchpointKind::Client).unwrap();

    let err = watchpoints
        .create_region_watchpoint(region(0x1004, 0), WRITE, WatchpointKind::Client)
        .unwrap_err();
    assert!(matches!(err, ControlError::InvalidRegion(r) if r == region(0x1004, 0)));
    assert!(err.is_recoverable());
    // An empty region must not hide the overlap between its neighbours.
    assert!(matches!(
        watchpoints.create_region_watchpoint(region(0x1006, 8), WRITE, WatchpointKind::Client),
        Err(ControlError::DuplicateWatchpoint { .. })
    ));

    for kind in [WatchpointKind::Client, WatchpointKind::System] {
        assert!(matches!(
            watchpoints.create_region_watchpoint(region(u64::MAX - 3, 8), WRITE, kind),
            Err(ControlError::InvalidRegion(_))
        ));
    }
    assert!(matches!(
        watchpoints.relocate(id, Address::new(u64::MAX - 3)),
        Err(ControlError::InvalidRegion(_))
    ));
    assert_eq!(watchpoints.watchpoint(id).unwrap().region(), region(0x1000, 8));
    assert_eq!(watchpoints.snapshot().len(), 1);
    assert_eq!(vm.installed_watchpoints(), vec![region(0x1000, 8)]);
}

#[test]
fn test_remove() {
    vmdb_common::logging::ensure_test_logging(None);
    info!("Running test");
    let vm = SimulatedVm::new();
    let plane = SimulatedVm::control_plane(&vm).unwrap();
    let watchpoints = plane.watchpoints();
    let mut events = plane.subscribe();
    let id = watchpoints.create_region_watchpoint(region(0x1000, 8), WRITE, WatchpointKind::Client).unwrap();
    assert_eq!(events.try_recv().unwrap(), ControlEvent::WatchpointsChanged);

    let removed = watchpoints.remove(id).unwrap();
    assert!(!removed.is_alive());
    assert!(!removed.is_enabled());
    assert!(vm.installed_watchpoints().is_empty());
    assert_eq!(events.try_recv().unwrap(), ControlEvent::WatchpointsChanged);

    assert!(matches!(watchpoints.remove(id), Err(ControlError::AlreadyRemoved(_))));
    assert!(matches!(watchpoints.set_trap_on_read(id, true), Err(ControlError::AlreadyRemoved(_))));
    assert!(events.try_recv().is_err());
}

#[test]
fn test_queries_and_memory() {
    vmdb_common::logging::ensure_test_logging(None);
    info!("Running test");
    let vm = SimulatedVm::new();
    vm.poke(Address::new(0x1000), &[1, 2, 3, 4, 5, 6, 7, 8]);
    let plane = SimulatedVm::control_plane(&vm).unwrap();
    let watchpoints = plane.watchpoints();
    let a = watchpoints.create_region_watchpoint(region(0x1000, 8), WRITE, WatchpointKind::Client).unwrap();
    let b = watchpoints.create_region_watchpoint(region(0x1008, 8), WRITE, WatchpointKind::Client).unwrap();

    let found: Vec<_> = watchpoints.find_watchpoints(region(0x1004, 8)).iter().map(|wp| wp.id()).collect();
    assert_eq!(found, vec![a, b]);
    assert_eq!(watchpoints.find_client_watchpoint_containing(Address::new(0x100f)).unwrap().id(), b);
    assert!(watchpoints.find_client_watchpoint_containing(Address::new(0x1010)).is_none());
    assert!(watchpoints.find_system_watchpoint(Address::new(0x1000)).is_none());

    assert_eq!(watchpoints.read_watchpoint_memory(a).unwrap(), vec![1, 2, 3, 4, 5, 6, 7, 8]);
}

#[test]
fn test_object_watchpoint_tracks_forwarding_slot() {
    vmdb_common::logging::ensure_test_logging(None);
    info!("Running test");
    let vm = SimulatedVm::new();
    let object = ObjectRef::new(1);
    vm.add_object(object, Address::new(0x20000), 32);
    let plane = SimulatedVm::control_plane(&vm).unwrap();
    let watchpoints = plane.watchpoints();

    let id = watchpoints.create_object_watchpoint(object, count_field(), WRITE).unwrap();
    let wp = watchpoints.watchpoint(id).unwrap();
    assert_eq!(wp.kind(), WatchpointKind::Client);
    assert_eq!(wp.region(), region(0x20010, 8));
    let tracking = wp.object_tracking().unwrap();
    assert_eq!(tracking.object(), object);
    assert_eq!(tracking.offset_from_origin(), 16);

    let tracker = watchpoints.watchpoint(tracking.relocation_watchpoint().unwrap()).unwrap();
    assert_eq!(tracker.kind(), WatchpointKind::System);
    assert_eq!(tracker.region(), region(0x20000, 8));
    assert_eq!(tracker.settings(), WatchpointSettings::RELOCATION);
    assert!(tracker.is_active());
    assert_eq!(tracker.variant(), &WatchpointVariant::Relocation { primary: id });
    assert_eq!(watchpoints.snapshot().len(), 2);
}

#[test]
fn test_relocation_tracker_is_not_directly_controlled() {
    vmdb_common::logging::ensure_test_logging(None);
    info!("Running test");
    let vm = SimulatedVm::new();
    let object = ObjectRef::new(1);
    vm.add_object(object, Address::new(0x20000), 32);
    let plane = SimulatedVm::control_plane(&vm).unwrap();
    let watchpoints = plane.watchpoints();
    let id = watchpoints.create_object_watchpoint(object, count_field(), WRITE).unwrap();
    let tracker = watchpoints.watchpoint(id).unwrap().object_tracking().unwrap().relocation_watchpoint().unwrap();

    let err = watchpoints.remove(tracker).unwrap_err();
    assert!(matches!(err, ControlError::ManagedWatchpoint(_)));
    assert!(!err.is_recoverable());
    assert!(matches!(watchpoints.set_trap_on_read(tracker, true), Err(ControlError::ManagedWatchpoint(_))));
    assert!(matches!(
        watchpoints.set_enabled_during_gc(tracker, false),
        Err(ControlError::ManagedWatchpoint(_))
    ));
    assert!(matches!(
        watchpoints.relocate(tracker, Address::new(0x30000)),
        Err(ControlError::ManagedWatchpoint(_))
    ));

    let wp = watchpoints.watchpoint(tracker).unwrap();
    assert_eq!(wp.region(), region(0x20000, 8));
    assert_eq!(wp.settings(), WatchpointSettings::RELOCATION);
    assert!(wp.is_active());
    let primary = watchpoints.watchpoint(id).unwrap();
    assert_eq!(primary.object_tracking().unwrap().relocation_watchpoint(), Some(tracker));

    watchpoints.remove(id).unwrap();
    assert!(watchpoints.watchpoint(tracker).is_none());
}

#[test]
fn test_object_slices() {
    vmdb_common::logging::ensure_test_logging(None);
    info!("Running test");
    let vm = SimulatedVm::new();
    let array = ObjectRef::new(2);
    vm.add_object(array, Address::new(0x40000), 64);
    let plane = SimulatedVm::control_plane(&vm).unwrap();
    let watchpoints = plane.watchpoints();

    let element = watchpoints
        .create_object_watchpoint(
            array,
            ObjectSlice::ArrayElement { index: 2, base_offset: 16, element_width: 4 },
            WRITE,
        )
        .unwrap();
    assert_eq!(watchpoints.watchpoint(element).unwrap().region(), region(0x40018, 4));
    watchpoints.remove(element).unwrap();

    let whole = watchpoints.create_object_watchpoint(array, ObjectSlice::Whole, WRITE).unwrap();
    assert_eq!(watchpoints.watchpoint(whole).unwrap().region(), region(0x40000, 64));
}

#[test]
fn test_object_watchpoint_requires_live_object() {
    vmdb_common::logging::ensure_test_logging(None);
    info!("Running test");
    let vm = SimulatedVm::new();
    let object = ObjectRef::new(3);
    vm.add_object(object, Address::new(0x20000), 32);
    let plane = SimulatedVm::control_plane(&vm).unwrap();
    let watchpoints = plane.watchpoints();

    for status in [ObjectStatus::Dead, ObjectStatus::Forwarded] {
        vm.set_object_status(object, status);
        let err = watchpoints.create_object_watchpoint(object, count_field(), WRITE).unwrap_err();
        assert!(matches!(err, ControlError::ObjectNotLive { status: s, .. } if s == status));
    }
    assert!(watchpoints.snapshot().is_empty());
}

#[test]
fn test_object_watchpoint_rolls_back_without_room_for_tracker() {
    vmdb_common::logging::ensure_test_logging(None);
    info!("Running test");
    let vm = SimulatedVm::new();
    let object = ObjectRef::new(4);
    vm.add_object(object, Address::new(0x20000), 32);
    let plane = SimulatedVm::control_plane(&vm).unwrap();
    let watchpoints = plane.watchpoints();
    for start in [0x1000u64, 0x2000, 0x3000] {
        watchpoints.create_region_watchpoint(region(start, 8), WRITE, WatchpointKind::Client).unwrap();
    }

    assert!(matches!(
        watchpoints.create_object_watchpoint(object, count_field(), WRITE),
        Err(ControlError::TooManyWatchpoints { .. })
    ));
    assert_eq!(watchpoints.snapshot().len(), 3);
    assert_eq!(vm.installed_watchpoints().len(), 3);
}

#[test]
fn test_removing_object_watchpoint_removes_tracker() {
    vmdb_common::logging::ensure_test_logging(None);
    info!("Running test");
    let vm = SimulatedVm::new();
    let object = ObjectRef::new(5);
    vm.add_object(object, Address::new(0x20000), 32);
    let plane = SimulatedVm::control_plane(&vm).unwrap();
    let watchpoints = plane.watchpoints();

    let id = watchpoints.create_object_watchpoint(object, count_field(), WRITE).unwrap();
    watchpoints.remove(id).unwrap();
    assert!(watchpoints.snapshot().is_empty());
    assert!(vm.installed_watchpoints().is_empty());
}

#[test]
fn test_object_watchpoint_follows_relocation() {
    vmdb_common::logging::ensure_test_logging(None);
    info!("Running test");
    let vm = SimulatedVm::new();
    let object = ObjectRef::new(6);
    vm.add_object(object, Address::new(0x20000), 32);
    let plane = SimulatedVm::control_plane(&vm).unwrap();
    let watchpoints = plane.watchpoints();
    let id = watchpoints.create_object_watchpoint(object, count_field(), WRITE).unwrap();
    let old_tracker = watchpoints.watchpoint(id).unwrap().object_tracking().unwrap().relocation_watchpoint().unwrap();
    let mut events = plane.subscribe();

    // Spurious wake: nothing forwarded yet.
    let hit = plane.watchpoint_hit(Address::new(0x20000)).unwrap().unwrap();
    assert_eq!(hit.watchpoint, old_tracker);
    assert!(!hit.halt);
    assert_eq!(watchpoints.watchpoint(id).unwrap().region(), region(0x20010, 8));
    assert!(events.try_recv().is_err());

    vm.set_collecting(true);
    vm.move_object(object, Address::new(0x28000));
    let hit = plane.watchpoint_hit(Address::new(0x20000)).unwrap().unwrap();
    assert!(!hit.halt);
    vm.set_collecting(false);

    let wp = watchpoints.watchpoint(id).unwrap();
    assert_eq!(wp.region(), region(0x28010, 8));
    assert_eq!(wp.settings(), WRITE);
    let new_tracker = wp.object_tracking().unwrap().relocation_watchpoint().unwrap();
    assert_ne!(new_tracker, old_tracker);
    assert!(watchpoints.watchpoint(old_tracker).is_none());
    assert_eq!(watchpoints.watchpoint(new_tracker).unwrap().region(), region(0x28000, 8));
    assert_eq!(events.try_recv().unwrap(), ControlEvent::WatchpointsChanged);

    plane.on_gc_completed().unwrap();
    assert!(watchpoints.watchpoint(id).unwrap().is_active());
    assert_eq!(vm.installed_watchpoints(), vec![region(0x28000, 8), region(0x28010, 8)]);
}

#[test]
fn test_collected_object_leaves_region_watchpoint() {
    vmdb_common::logging::ensure_test_logging(None);
    info!("Running test");
    let vm = SimulatedVm::new();
    let object = ObjectRef::new(7);
    vm.add_object(object, Address::new(0x20000), 32);
    let plane = SimulatedVm::control_plane(&vm).unwrap();
    let watchpoints = plane.watchpoints();
    let id = watchpoints.create_object_watchpoint(object, count_field(), WRITE).unwrap();
    let mut events = plane.subscribe();

    vm.set_object_status(object, ObjectStatus::Dead);
    plane.on_gc_completed().unwrap();

    assert!(watchpoints.watchpoint(id).is_none());
    assert!(watchpoints.system_watchpoints().is_empty());
    let clients = watchpoints.client_watchpoints();
    assert_eq!(clients.len(), 1);
    let replacement = clients.first().unwrap();
    assert_eq!(replacement.region(), region(0x20010, 8));
    assert_eq!(replacement.settings(), WRITE);
    assert_eq!(replacement.variant(), &WatchpointVariant::Region);
    assert!(replacement.is_active());
    assert_eq!(events.try_recv().unwrap(), ControlEvent::WatchpointsChanged);
}

#[test]
fn test_live_object_survives_gc_unchanged() {
    vmdb_common::logging::ensure_test_logging(None);
    info!("Running test");
    let vm = SimulatedVm::new();
    let object = ObjectRef::new(8);
    vm.add_object(object, Address::new(0x20000), 32);
    let plane = SimulatedVm::control_plane(&vm).unwrap();
    let watchpoints = plane.watchpoints();
    let id = watchpoints.create_object_watchpoint(object, count_field(), WRITE).unwrap();
    let mut events = plane.subscribe();

    plane.on_gc_completed().unwrap();
    assert_eq!(watchpoints.watchpoint(id).unwrap().region(), region(0x20010, 8));
    assert!(events.try_recv().is_err());
}
