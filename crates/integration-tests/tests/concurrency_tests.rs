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

//! Concurrency integration tests for the VMDB control plane
//!
//! These tests verify that:
//! - Readers on other threads only ever observe consistent snapshots
//! - Mutations fail fast with `VmBusy` while another thread holds the VM lock
//! - The VM lock is reentrant for the thread that holds it

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Barrier,
    },
    thread,
};

use vmdb_common::{Address, CodeLocation};
use vmdb_engine::{
    BreakpointKind, ControlError, TargetProcess, VmLockGuard, WatchpointKind, WatchpointSettings,
};
use vmdb_integration_tests::test_utils::{fixtures::region, init, Session};
use tracing::info;

const WRITE: WatchpointSettings = WatchpointSettings::new(false, true, false, false);

#[test]
fn test_readers_see_consistent_snapshots() {
    init::init_test_environment();
    info!("Testing snapshot reads racing with mutations");
    let session = Session::start().expect("session starts");
    let capacity = session.plane.watchpoints().capacity();
    let done = AtomicBool::new(false);

    thread::scope(|scope| {
        for _ in 0..3 {
            scope.spawn(|| {
                while !done.load(Ordering::SeqCst) {
                    let watchpoints = session.plane.watchpoints().snapshot();
                    assert!(watchpoints.len() <= capacity);
                    let clients: Vec<_> = watchpoints.client().iter().map(|wp| wp.region()).collect();
                    for pair in clients.windows(2) {
                        assert!(pair[0].end() <= pair[1].start(), "{} overlaps {}", pair[0], pair[1]);
                    }

                    let breakpoints = session.plane.breakpoints().snapshot();
                    let mut addresses: Vec<_> = breakpoints
                        .iter()
                        .filter_map(|bp| bp.as_target().map(|target| target.address()))
                        .collect();
                    let total = addresses.len();
                    addresses.sort();
                    addresses.dedup();
                    assert_eq!(addresses.len(), total);
                }
            });
        }

        let watchpoints = session.plane.watchpoints();
        let breakpoints = session.plane.breakpoints();
        for round in 0..200u64 {
            let base = 0x1000 + (round % 4) * 4;
            // Overlapping requests are expected to fail and must leave no trace.
            let ids: Vec<_> = (0..4u64)
                .filter_map(|i| {
                    watchpoints
                        .create_region_watchpoint(region(base + i * 6, 8), WRITE, WatchpointKind::Client)
                        .ok()
                })
                .collect();
            let bp = breakpoints
                .create_breakpoint(CodeLocation::machine(0x9000 + round), BreakpointKind::Client)
                .expect("breakpoint created");
            assert!(matches!(
                breakpoints.create_breakpoint(CodeLocation::machine(0x9000 + round), BreakpointKind::Client),
                Err(ControlError::DuplicateBreakpoint(_))
            ));
            for id in ids {
                watchpoints.remove(id).expect("watchpoint removed");
            }
            breakpoints.remove(bp).expect("breakpoint removed");
        }
        done.store(true, Ordering::SeqCst);
    });

    assert!(session.plane.watchpoints().snapshot().is_empty());
    assert!(session.plane.breakpoints().snapshot().is_empty());
    assert!(session.vm.installed_watchpoints().is_empty());
}

#[test]
fn test_mutation_fails_fast_while_lock_is_held_elsewhere() {
    init::init_test_environment();
    info!("Testing VmBusy while another thread holds the VM lock");
    let session = Session::start().expect("session starts");
    let locked = Barrier::new(2);
    let checked = Barrier::new(2);

    thread::scope(|scope| {
        scope.spawn(|| {
            let process: &dyn TargetProcess = session.vm.as_ref();
            let _guard = VmLockGuard::acquire(process);
            locked.wait();
            checked.wait();
        });

        locked.wait();
        let err = session
            .plane
            .breakpoints()
            .create_breakpoint(CodeLocation::machine(0x4000u64), BreakpointKind::Client)
            .unwrap_err();
        assert!(matches!(err, ControlError::VmBusy));
        assert!(err.is_recoverable());
        assert!(matches!(
            session.plane.watchpoints().create_region_watchpoint(region(0x1000, 8), WRITE, WatchpointKind::Client),
            Err(ControlError::VmBusy)
        ));
        // Reads never wait for the lock.
        assert!(session.plane.breakpoints().snapshot().is_empty());
        checked.wait();
    });

    session
        .plane
        .breakpoints()
        .create_breakpoint(CodeLocation::machine(0x4000u64), BreakpointKind::Client)
        .expect("lock released");
}

#[test]
fn test_lock_is_reentrant_for_its_holder() {
    init::init_test_environment();
    info!("Testing nested mutation under a held VM lock");
    let session = Session::start().expect("session starts");
    let process: &dyn TargetProcess = session.vm.as_ref();
    let guard = VmLockGuard::acquire(process);
    let id = session
        .plane
        .breakpoints()
        .create_breakpoint(CodeLocation::machine(0x5000u64), BreakpointKind::Client)
        .expect("nested acquisition succeeds");
    assert!(process.is_locked_by_current());
    drop(guard);
    assert!(!process.is_locked_by_current());
    assert_eq!(session.plane.breakpoints().find_breakpoint(Address::new(0x5000)).unwrap().id(), id);
}

#[test]
fn test_stop_handling_waits_for_lock() {
    init::init_test_environment();
    info!("Testing that stop handling blocks instead of failing");
    let session = Session::start().expect("session starts");
    let id = session
        .plane
        .watchpoints()
        .create_region_watchpoint(region(0x2000, 8), WRITE, WatchpointKind::Client)
        .expect("watchpoint created");
    let locked = Barrier::new(2);
    let released = AtomicBool::new(false);

    thread::scope(|scope| {
        scope.spawn(|| {
            let process: &dyn TargetProcess = session.vm.as_ref();
            let guard = VmLockGuard::acquire(process);
            locked.wait();
            thread::sleep(std::time::Duration::from_millis(50));
            released.store(true, Ordering::SeqCst);
            drop(guard);
        });

        locked.wait();
        let hit = session.access(Address::new(0x2004)).expect("hit handled").expect("known watchpoint");
        assert!(released.load(Ordering::SeqCst));
        assert_eq!(hit.watchpoint, id);
        assert!(hit.halt);
    });
}
