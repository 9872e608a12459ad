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

//! Breakpoint manager
//!
//! Owns the breakpoint arena. Every mutation runs under the VM lock and the
//! table mutex, then republishes an immutable snapshot for readers and, when
//! the change is visible to the client, a [`ControlEvent::BreakpointsChanged`].

use std::{
    collections::{BTreeMap, HashMap},
    io,
    sync::Arc,
};

use itertools::Itertools;
use parking_lot::{Mutex, RwLock};
use rpds::VectorSync;
use tracing::{debug, info, warn};
use vmdb_common::{Address, BreakpointConfig, CodeLocation, Compilation, PlatformConfig};

use super::{
    evaluate_condition, Breakpoint, BreakpointDetail, BreakpointId, BreakpointKind, BreakpointRole,
    BytecodeBreakpoint, MethodPosition, TargetBreakpoint,
};
use crate::{
    realization::{self, CodeContext},
    CompilationResolver, ControlError, ControlEvent, ControlResult, EventBus, TargetProcess,
    ThreadContext, TrapConditionContext, VmLockGuard,
};

/// Parameters of a target breakpoint about to be inserted.
pub(crate) struct NewTarget {
    pub(crate) kind: BreakpointKind,
    pub(crate) address: Address,
    pub(crate) owner: Option<BreakpointId>,
    pub(crate) description: String,
    pub(crate) original_bytes: Option<Vec<u8>>,
    pub(crate) role: BreakpointRole,
}

/// The mutable arena behind a [`BreakpointManager`].
///
/// An address may carry one client breakpoint, one transient breakpoint and
/// one system breakpoint per owner. They share a single physical trap.
#[derive(Debug, Default)]
pub(crate) struct BreakpointTable {
    pub(crate) arena: HashMap<BreakpointId, Breakpoint>,
    pub(crate) by_address: BTreeMap<Address, Vec<BreakpointId>>,
    pub(crate) client_bytecodes: BTreeMap<MethodPosition, BreakpointId>,
    pub(crate) system_bytecodes: BTreeMap<MethodPosition, BreakpointId>,
    pub(crate) compiler_hooks: Vec<BreakpointId>,
}

impl BreakpointTable {
    pub(crate) fn get(&self, id: BreakpointId) -> ControlResult<&Breakpoint> {
        self.arena.get(&id).ok_or_else(|| ControlError::AlreadyRemoved(format!("breakpoint {id}")))
    }

    pub(crate) fn get_mut(&mut self, id: BreakpointId) -> ControlResult<&mut Breakpoint> {
        self.arena
            .get_mut(&id)
            .ok_or_else(|| ControlError::AlreadyRemoved(format!("breakpoint {id}")))
    }

    pub(crate) fn has_bytecode_breakpoints(&self) -> bool {
        !self.client_bytecodes.is_empty() || !self.system_bytecodes.is_empty()
    }

    pub(crate) fn bytecode_ids(&self) -> impl Iterator<Item = BreakpointId> + '_ {
        self.client_bytecodes.values().chain(self.system_bytecodes.values()).copied()
    }

    /// Target breakpoints at `address`, client first, then system, then transient.
    pub(crate) fn targets_at(&self, address: Address) -> Vec<&Breakpoint> {
        self.by_address
            .get(&address)
            .into_iter()
            .flatten()
            .filter_map(|id| self.arena.get(id))
            .sorted_by_key(|bp| bp.kind)
            .collect()
    }

    /// The target breakpoint of `kind` created for `owner` at `address`.
    pub(crate) fn find_at(
        &self,
        address: Address,
        kind: BreakpointKind,
        owner: Option<BreakpointId>,
    ) -> Option<BreakpointId> {
        self.targets_at(address)
            .into_iter()
            .find(|bp| bp.kind == kind && bp.owner == owner)
            .map(|bp| bp.id)
    }

    /// Every target breakpoint id in address order.
    pub(crate) fn target_ids(&self) -> impl Iterator<Item = BreakpointId> + '_ {
        self.by_address.values().flatten().copied()
    }

    fn target(&self, id: BreakpointId) -> ControlResult<&TargetBreakpoint> {
        self.get(id)?.as_target().ok_or_else(|| {
            ControlError::InvalidLocation(format!("bytecode breakpoint {id} cannot be patched directly"))
        })
    }

    fn target_mut(&mut self, id: BreakpointId) -> ControlResult<&mut TargetBreakpoint> {
        self.get_mut(id)?.as_target_mut().ok_or_else(|| {
            ControlError::InvalidLocation(format!("bytecode breakpoint {id} cannot be patched directly"))
        })
    }

    /// Whether a breakpoint other than `id` keeps the trap at `address` patched.
    fn trap_held_by_other(&self, address: Address, id: BreakpointId) -> bool {
        self.by_address.get(&address).into_iter().flatten().any(|other| {
            *other != id && self.arena.get(other).is_some_and(Breakpoint::is_active)
        })
    }

    /// Patch a target breakpoint's trap, or join the trap already present at its address.
    pub(crate) fn activate_target(&mut self, ctx: &CodeContext<'_>, id: BreakpointId) -> ControlResult<()> {
        let address = self.target(id)?.address();
        let shared = self.trap_held_by_other(address, id);
        let target = self.target_mut(id)?;
        if shared {
            target.share_patch()
        } else {
            target.activate(ctx.process, &ctx.platform.trap_instruction)
        }
    }

    /// Let go of a target breakpoint's trap, restoring the code once nobody else needs it.
    pub(crate) fn deactivate_target(
        &mut self,
        ctx: &CodeContext<'_>,
        id: BreakpointId,
    ) -> ControlResult<()> {
        let address = self.target(id)?.address();
        let shared = self.trap_held_by_other(address, id);
        let target = self.target_mut(id)?;
        if shared {
            target.release_patch()
        } else {
            target.deactivate(ctx.process)
        }
    }

    /// Create a target breakpoint, capturing the code under it unless supplied.
    ///
    /// A breakpoint joining an occupied address inherits the original code its
    /// neighbours captured, since memory may already hold the trap.
    pub(crate) fn insert_target(
        &mut self,
        ctx: &CodeContext<'_>,
        new: NewTarget,
    ) -> ControlResult<BreakpointId> {
        if self.find_at(new.address, new.kind, new.owner).is_some() {
            return Err(ControlError::DuplicateBreakpoint(CodeLocation::Machine(new.address)));
        }
        let original_bytes = new.original_bytes.or_else(|| {
            self.targets_at(new.address)
                .into_iter()
                .find_map(|bp| bp.as_target().and_then(TargetBreakpoint::original_bytes))
                .map(<[u8]>::to_vec)
        });
        let mut target = TargetBreakpoint::new(new.address, original_bytes);
        target.capture_original(ctx.process, ctx.platform.trap_instruction.len())?;

        let id = BreakpointId::next();
        let breakpoint = Breakpoint {
            id,
            kind: new.kind,
            location: CodeLocation::Machine(new.address),
            owner: new.owner,
            description: new.description,
            enabled: true,
            condition: None,
            role: new.role,
            detail: BreakpointDetail::Target(target),
        };
        debug!(%breakpoint, "created target breakpoint");

        if let Some(owner) = new.owner.and_then(|owner| self.arena.get_mut(&owner)) {
            if let Some(bytecode) = owner.as_bytecode_mut() {
                bytecode.add_target(id);
            }
        }
        self.by_address.entry(new.address).or_default().push(id);
        self.arena.insert(id, breakpoint);
        Ok(id)
    }

    /// Remove a target breakpoint, letting go of its trap first if it is patched in.
    pub(crate) fn remove_target(
        &mut self,
        ctx: &CodeContext<'_>,
        id: BreakpointId,
    ) -> ControlResult<Breakpoint> {
        if self.target(id)?.is_active() {
            self.deactivate_target(ctx, id)?;
        }
        self.detach_target(id)
            .ok_or_else(|| ControlError::AlreadyRemoved(format!("breakpoint {id}")))
    }

    /// Drop a target breakpoint from every index without touching debuggee memory.
    pub(crate) fn detach_target(&mut self, id: BreakpointId) -> Option<Breakpoint> {
        let mut breakpoint = self.arena.remove(&id)?;
        if let Some(target) = breakpoint.as_target_mut() {
            let address = target.address();
            if let Some(ids) = self.by_address.get_mut(&address) {
                ids.retain(|other| *other != id);
                if ids.is_empty() {
                    self.by_address.remove(&address);
                }
            }
            target.abandon();
        }
        self.compiler_hooks.retain(|hook| *hook != id);
        if let Some(owner) = breakpoint.owner.and_then(|owner| self.arena.get_mut(&owner)) {
            if let Some(bytecode) = owner.as_bytecode_mut() {
                bytecode.remove_target(id);
            }
        }
        debug!(%breakpoint, "removed target breakpoint");
        Some(breakpoint)
    }

    fn snapshot(&self) -> BreakpointSnapshot {
        let mut snapshot = BreakpointSnapshot::default();
        for id in self.target_ids() {
            let Some(breakpoint) = self.arena.get(&id) else { continue };
            let list = match breakpoint.kind {
                BreakpointKind::Client => &mut snapshot.client,
                BreakpointKind::System => &mut snapshot.system,
                BreakpointKind::Transient => &mut snapshot.transient,
            };
            list.push_back_mut(breakpoint.clone());
        }
        for id in self.client_bytecodes.values() {
            if let Some(breakpoint) = self.arena.get(id) {
                snapshot.client.push_back_mut(breakpoint.clone());
            }
        }
        for id in self.system_bytecodes.values() {
            if let Some(breakpoint) = self.arena.get(id) {
                snapshot.system.push_back_mut(breakpoint.clone());
            }
        }
        snapshot
    }
}

/// Immutable view of all breakpoints at one point in time.
///
/// Cloning is cheap; a held snapshot never changes.
#[derive(Debug, Clone)]
pub struct BreakpointSnapshot {
    client: VectorSync<Breakpoint>,
    system: VectorSync<Breakpoint>,
    transient: VectorSync<Breakpoint>,
}

impl Default for BreakpointSnapshot {
    fn default() -> Self {
        Self {
            client: VectorSync::new_sync(),
            system: VectorSync::new_sync(),
            transient: VectorSync::new_sync(),
        }
    }
}

impl BreakpointSnapshot {
    /// Client breakpoints: target breakpoints by address, then bytecode breakpoints by position.
    pub fn client(&self) -> &VectorSync<Breakpoint> {
        &self.client
    }

    /// System breakpoints, including realizations of bytecode breakpoints.
    pub fn system(&self) -> &VectorSync<Breakpoint> {
        &self.system
    }

    /// Transient breakpoints.
    pub fn transient(&self) -> &VectorSync<Breakpoint> {
        &self.transient
    }

    /// Look up a breakpoint of any kind.
    pub fn get(&self, id: BreakpointId) -> Option<&Breakpoint> {
        self.iter().find(|bp| bp.id == id)
    }

    /// The target breakpoint at `address`, preferring client over system over transient.
    pub fn find(&self, address: Address) -> Option<&Breakpoint> {
        let at = |bp: &&Breakpoint| bp.as_target().is_some_and(|t| t.address() == address);
        self.client
            .iter()
            .find(at)
            .or_else(|| self.system.iter().find(at))
            .or_else(|| self.transient.iter().find(at))
    }

    /// All breakpoints: client, then system, then transient.
    pub fn iter(&self) -> impl Iterator<Item = &Breakpoint> {
        self.client.iter().chain(self.system.iter()).chain(self.transient.iter())
    }

    /// Total number of breakpoints.
    pub fn len(&self) -> usize {
        self.client.len() + self.system.len() + self.transient.len()
    }

    /// Whether there are no breakpoints at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of a breakpoint trap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakpointHit {
    /// The breakpoint that trapped.
    pub breakpoint: BreakpointId,
    /// Stop address after trap adjustment.
    pub address: Address,
    /// Whether to report the stop to the client; `false` means resume silently.
    pub halt: bool,
}

/// Thread-safe owner of all breakpoints of one debuggee.
pub struct BreakpointManager {
    process: Arc<dyn TargetProcess>,
    compilations: Arc<dyn CompilationResolver>,
    platform: PlatformConfig,
    policy: BreakpointConfig,
    table: Mutex<BreakpointTable>,
    snapshot: RwLock<BreakpointSnapshot>,
    events: EventBus,
}

impl BreakpointManager {
    /// Create a manager with no breakpoints.
    pub fn new(
        process: Arc<dyn TargetProcess>,
        compilations: Arc<dyn CompilationResolver>,
        platform: PlatformConfig,
        policy: BreakpointConfig,
        events: EventBus,
    ) -> Self {
        Self {
            process,
            compilations,
            platform,
            policy,
            table: Mutex::new(BreakpointTable::default()),
            snapshot: RwLock::new(BreakpointSnapshot::default()),
            events,
        }
    }

    fn context(&self) -> CodeContext<'_> {
        CodeContext {
            process: self.process.as_ref(),
            compilations: self.compilations.as_ref(),
            platform: &self.platform,
        }
    }

    /// Run a mutation under the VM lock (non-blocking) and the table lock.
    ///
    /// The closure returns its result plus whether the client should be notified.
    fn mutate<R>(
        &self,
        f: impl FnOnce(&mut BreakpointTable, &CodeContext<'_>) -> ControlResult<(R, bool)>,
    ) -> ControlResult<R> {
        let _vm = VmLockGuard::try_acquire(self.process.as_ref())?;
        self.apply(f)
    }

    /// Same as [`Self::mutate`], for trap and event paths where the debuggee is stopped.
    fn mutate_stopped<R>(
        &self,
        f: impl FnOnce(&mut BreakpointTable, &CodeContext<'_>) -> ControlResult<(R, bool)>,
    ) -> ControlResult<R> {
        let _vm = VmLockGuard::acquire(self.process.as_ref());
        self.apply(f)
    }

    fn apply<R>(
        &self,
        f: impl FnOnce(&mut BreakpointTable, &CodeContext<'_>) -> ControlResult<(R, bool)>,
    ) -> ControlResult<R> {
        let ctx = self.context();
        let (result, notify) = {
            let mut table = self.table.lock();
            let outcome = f(&mut table, &ctx);
            *self.snapshot.write() = table.snapshot();
            outcome?
        };
        if notify {
            self.events.publish(ControlEvent::BreakpointsChanged);
        }
        Ok(result)
    }

    // ----- creation -----

    /// Create a breakpoint at `location`.
    ///
    /// Machine locations yield target breakpoints; bytecode locations yield
    /// bytecode breakpoints, which are enabled immediately and realized in
    /// every existing compilation of the method.
    pub fn create_breakpoint(
        &self,
        location: CodeLocation,
        kind: BreakpointKind,
    ) -> ControlResult<BreakpointId> {
        match location {
            CodeLocation::Machine(address) => self.create_target_breakpoint(address, kind, None),
            CodeLocation::Bytecode { method, bci } => {
                self.create_bytecode_breakpoint(MethodPosition { method, bci }, kind)
            }
        }
    }

    /// Create a target breakpoint, optionally with the original code already known.
    pub fn create_target_breakpoint(
        &self,
        address: Address,
        kind: BreakpointKind,
        original_bytes: Option<Vec<u8>>,
    ) -> ControlResult<BreakpointId> {
        self.mutate(|table, ctx| {
            let description = match kind {
                BreakpointKind::Client => "Client-specified breakpoint",
                BreakpointKind::System => "System breakpoint",
                BreakpointKind::Transient => "Transient breakpoint",
            };
            let id = table.insert_target(
                ctx,
                NewTarget {
                    kind,
                    address,
                    owner: None,
                    description: description.to_string(),
                    original_bytes,
                    role: BreakpointRole::User,
                },
            )?;
            if kind == BreakpointKind::Client {
                info!(%id, %address, "created client breakpoint");
            }
            Ok((id, kind == BreakpointKind::Client))
        })
    }

    fn create_bytecode_breakpoint(
        &self,
        position: MethodPosition,
        kind: BreakpointKind,
    ) -> ControlResult<BreakpointId> {
        if kind == BreakpointKind::Transient {
            return Err(ControlError::InvalidLocation(format!(
                "transient breakpoints need a machine address, got {position}"
            )));
        }
        let policy = &self.policy;
        self.mutate(|table, ctx| {
            let existing = match kind {
                BreakpointKind::Client => table.client_bytecodes.get(&position),
                _ => table.system_bytecodes.get(&position),
            };
            if existing.is_some() {
                return Err(ControlError::DuplicateBreakpoint(CodeLocation::bytecode(
                    position.method.clone(),
                    position.bci,
                )));
            }

            if !table.has_bytecode_breakpoints() {
                realization::install_compiler_hooks(table, ctx, policy);
            }

            let id = BreakpointId::next();
            let breakpoint = Breakpoint {
                id,
                kind,
                location: CodeLocation::bytecode(position.method.clone(), position.bci),
                owner: None,
                description: match kind {
                    BreakpointKind::Client => "Client-specified bytecode breakpoint".to_string(),
                    _ => "System bytecode breakpoint".to_string(),
                },
                enabled: false,
                condition: None,
                role: BreakpointRole::User,
                detail: BreakpointDetail::Bytecode(BytecodeBreakpoint::new(position.clone())),
            };
            table.arena.insert(id, breakpoint);
            match kind {
                BreakpointKind::Client => table.client_bytecodes.insert(position.clone(), id),
                _ => table.system_bytecodes.insert(position.clone(), id),
            };

            // Created as a disabled template, then enabled, which realizes it.
            table.get_mut(id)?.enabled = true;
            let realized = realization::realize_all(table, ctx, id);
            info!(%id, %position, realized, "created bytecode breakpoint");

            realization::publish_breakpoint_holders(table, ctx);
            Ok((id, kind == BreakpointKind::Client))
        })
    }

    /// Return the client breakpoint at `location`, creating it if needed.
    pub fn make_client_breakpoint(&self, location: CodeLocation) -> ControlResult<BreakpointId> {
        let existing = {
            let table = self.table.lock();
            match &location {
                CodeLocation::Machine(address) => {
                    table.find_at(*address, BreakpointKind::Client, None)
                }
                CodeLocation::Bytecode { method, bci } => table
                    .client_bytecodes
                    .get(&MethodPosition { method: method.clone(), bci: *bci })
                    .copied(),
            }
        };
        match existing {
            Some(id) => Ok(id),
            None => self.create_breakpoint(location, BreakpointKind::Client),
        }
    }

    /// Return the transient breakpoint at `address`, creating it if needed.
    ///
    /// Breakpoints of other kinds at the address are left alone; a disabled or
    /// conditional client breakpoint must not decide whether a run-to-here stops.
    pub fn make_transient_breakpoint(&self, address: Address) -> ControlResult<BreakpointId> {
        let existing = self.table.lock().find_at(address, BreakpointKind::Transient, None);
        match existing {
            Some(id) => Ok(id),
            None => self.create_target_breakpoint(address, BreakpointKind::Transient, None),
        }
    }

    // ----- lifecycle -----

    /// Enable or disable a breakpoint.
    ///
    /// Disabling a target breakpoint restores its original code if patched.
    /// Enabling a bytecode breakpoint realizes it in every known compilation;
    /// disabling removes all of its realizations.
    pub fn set_enabled(&self, id: BreakpointId, enabled: bool) -> ControlResult<()> {
        self.mutate(|table, ctx| {
            let breakpoint = table.get(id)?;
            if breakpoint.kind == BreakpointKind::Transient {
                return Err(ControlError::UnsupportedOperationOnTransient("setEnabled"));
            }
            let notify = breakpoint.kind == BreakpointKind::Client;
            if breakpoint.enabled == enabled {
                return Ok(((), false));
            }

            if breakpoint.as_target().is_some() {
                if !enabled && breakpoint.is_active() {
                    table.deactivate_target(ctx, id)?;
                }
                table.get_mut(id)?.set_enabled_flag(enabled)?;
            } else if enabled {
                table.get_mut(id)?.set_enabled_flag(true)?;
                realization::realize_all(table, ctx, id);
            } else {
                realization::derealize(table, ctx, id)?;
                table.get_mut(id)?.set_enabled_flag(false)?;
            }
            debug!(%id, enabled, "breakpoint enablement changed");
            Ok(((), notify))
        })
    }

    /// Set or clear (`None`) a breakpoint's condition.
    ///
    /// A bytecode breakpoint's condition also gates all of its realizations.
    pub fn set_condition(&self, id: BreakpointId, condition: Option<&str>) -> ControlResult<()> {
        self.mutate(|table, _| {
            let breakpoint = table.get_mut(id)?;
            breakpoint.set_condition_text(condition)?;
            Ok(((), breakpoint.kind == BreakpointKind::Client))
        })
    }

    /// Remove a breakpoint.
    ///
    /// Fails with [`ControlError::AlreadyRemoved`] if it no longer exists.
    pub fn remove(&self, id: BreakpointId) -> ControlResult<()> {
        self.mutate(|table, ctx| {
            let breakpoint = table.get(id)?;
            let notify = breakpoint.kind == BreakpointKind::Client;
            let kind = breakpoint.kind;
            let enabled = breakpoint.enabled;
            match breakpoint.as_bytecode().map(|bytecode| bytecode.position().clone()) {
                None => {
                    table.remove_target(ctx, id)?;
                }
                Some(position) => {
                    if enabled {
                        realization::derealize(table, ctx, id)?;
                    }
                    match kind {
                        BreakpointKind::Client => table.client_bytecodes.remove(&position),
                        _ => table.system_bytecodes.remove(&position),
                    };
                    table.arena.remove(&id);
                    if !table.has_bytecode_breakpoints() {
                        realization::remove_compiler_hooks(table, ctx);
                    }
                    realization::publish_breakpoint_holders(table, ctx);
                }
            }
            info!(%id, "removed breakpoint");
            Ok(((), notify))
        })
    }

    /// Patch a target breakpoint's trap into the debuggee.
    pub fn activate(&self, id: BreakpointId) -> ControlResult<()> {
        self.mutate(|table, ctx| {
            table.activate_target(ctx, id)?;
            Ok(((), false))
        })
    }

    /// Restore a target breakpoint's original code.
    pub fn deactivate(&self, id: BreakpointId) -> ControlResult<()> {
        self.mutate(|table, ctx| {
            table.deactivate_target(ctx, id)?;
            Ok(((), false))
        })
    }

    /// Patch (before resuming) or restore (after stopping) every enabled target breakpoint.
    ///
    /// On failure, breakpoints already switched by this call are switched back.
    pub fn set_active_all(&self, active: bool) -> ControlResult<()> {
        self.mutate(|table, ctx| set_active_where(table, ctx, active, |_| true).map(|()| ((), false)))
    }

    /// Like [`Self::set_active_all`], restricted to system and transient breakpoints.
    pub fn set_active_non_client(&self, active: bool) -> ControlResult<()> {
        self.mutate(|table, ctx| {
            set_active_where(table, ctx, active, |bp| bp.kind != BreakpointKind::Client)
                .map(|()| ((), false))
        })
    }

    /// Remove every transient breakpoint; called once per resume cycle.
    pub fn remove_transient_breakpoints(&self) -> ControlResult<usize> {
        self.mutate(|table, ctx| {
            let transients: Vec<_> = table
                .arena
                .values()
                .filter(|bp| bp.kind == BreakpointKind::Transient)
                .map(|bp| bp.id)
                .collect();
            for id in &transients {
                table.remove_target(ctx, *id)?;
            }
            if !transients.is_empty() {
                debug!(count = transients.len(), "removed transient breakpoints");
            }
            Ok((transients.len(), false))
        })
    }

    // ----- traps and events -----

    /// Address the thread stopped at, correcting for platforms that report the
    /// instruction pointer past the trap.
    pub fn trap_address(&self, thread: &dyn ThreadContext) -> Address {
        thread.instruction_pointer().minus(self.platform.trap_pc_adjustment)
    }

    /// The breakpoint at `address`, registering a transient one if the debuggee's
    /// code holds a trap there that nobody set (e.g. compiled into the image).
    pub fn find_or_discover(&self, address: Address) -> ControlResult<Option<BreakpointId>> {
        self.mutate_stopped(|table, ctx| {
            Ok((discover(table, ctx, address)?.first().copied(), false))
        })
    }

    /// Handle a thread stopped at a breakpoint trap.
    ///
    /// Returns `None` when no breakpoint accounts for the stop.
    pub fn breakpoint_hit(&self, thread: &dyn ThreadContext) -> ControlResult<Option<BreakpointHit>> {
        let address = self.trap_address(thread);
        let word_size = self.platform.word_size;
        self.mutate_stopped(|table, ctx| {
            let ids = discover(table, ctx, address)?;
            let Some(&first) = ids.first() else {
                debug!(%address, "trap with no breakpoint");
                return Ok((None, false));
            };
            let context = TrapConditionContext::new(thread, ctx.process, word_size);
            let mut reported = first;
            let mut halt = false;
            for id in ids {
                let Some(breakpoint) = table.arena.get(&id).filter(|bp| bp.is_enabled()) else {
                    continue;
                };
                let role = breakpoint.role;
                match role {
                    BreakpointRole::User => {
                        if halt {
                            continue;
                        }
                        let condition = match breakpoint.owner.and_then(|owner| table.arena.get(&owner)) {
                            Some(owner) => owner.condition.as_ref(),
                            None => breakpoint.condition.as_ref(),
                        };
                        if evaluate_condition(breakpoint, condition, &context) {
                            halt = true;
                            reported = id;
                        }
                    }
                    BreakpointRole::CompilationCompletedHook => {
                        match ctx.compilations.completed_compilation(thread) {
                            Ok(Some(compilation)) => {
                                realization::on_compilation_completed(table, ctx, &compilation);
                            }
                            Ok(None) => debug!("compilation hook hit without a completed compilation"),
                            Err(err) => warn!(error = %err, "cannot read completed compilation"),
                        }
                    }
                    BreakpointRole::CompilationStartedHook => {}
                }
            }
            Ok((Some(BreakpointHit { breakpoint: reported, address, halt }), false))
        })
    }

    /// Realize pending bytecode breakpoints in a newly completed compilation.
    pub fn on_compilation_completed(&self, compilation: &Compilation) -> ControlResult<usize> {
        self.mutate_stopped(|table, ctx| {
            Ok((realization::on_compilation_completed(table, ctx, compilation), false))
        })
    }

    /// Drop every target breakpoint inside a compilation whose code was reclaimed.
    pub fn on_compilation_evicted(&self, compilation: &Compilation) -> ControlResult<usize> {
        let evicted = self.mutate_stopped(|table, _| {
            let evicted = realization::evict_compilation(table, compilation);
            let client_removed = evicted.iter().any(|e| e.kind == BreakpointKind::Client);
            Ok((evicted, client_removed))
        })?;
        for eviction in &evicted {
            if let Some(owner) = eviction.owner {
                self.events.publish(ControlEvent::CompilationEvicted {
                    breakpoint: owner,
                    compilation: compilation.id,
                });
            }
        }
        Ok(evicted.len())
    }

    /// Forget every breakpoint without touching memory; the process is gone.
    pub fn on_process_terminated(&self) {
        let had_client = {
            let mut table = self.table.lock();
            let had_client = !table.client_bytecodes.is_empty()
                || table.arena.values().any(|bp| bp.kind == BreakpointKind::Client);
            *table = BreakpointTable::default();
            *self.snapshot.write() = BreakpointSnapshot::default();
            had_client
        };
        info!("process terminated, all breakpoints cleared");
        if had_client {
            self.events.publish(ControlEvent::BreakpointsChanged);
        }
    }

    // ----- readers -----

    /// Current immutable snapshot.
    pub fn snapshot(&self) -> BreakpointSnapshot {
        self.snapshot.read().clone()
    }

    /// Client breakpoints in address/position order.
    pub fn client_breakpoints(&self) -> VectorSync<Breakpoint> {
        self.snapshot.read().client.clone()
    }

    /// System breakpoints.
    pub fn system_breakpoints(&self) -> VectorSync<Breakpoint> {
        self.snapshot.read().system.clone()
    }

    /// Transient breakpoints.
    pub fn transient_breakpoints(&self) -> VectorSync<Breakpoint> {
        self.snapshot.read().transient.clone()
    }

    /// A breakpoint by id, as of the latest snapshot.
    pub fn breakpoint(&self, id: BreakpointId) -> Option<Breakpoint> {
        self.snapshot.read().get(id).cloned()
    }

    /// The target breakpoint at `address`, preferring client over system over transient.
    pub fn find_breakpoint(&self, address: Address) -> Option<Breakpoint> {
        self.snapshot.read().find(address).cloned()
    }

    /// Write a human-readable listing of all breakpoints.
    pub fn write_summary(&self, out: &mut dyn io::Write) -> io::Result<()> {
        let snapshot = self.snapshot();
        for (title, list) in [
            ("Client", &snapshot.client),
            ("System", &snapshot.system),
            ("Transient", &snapshot.transient),
        ] {
            writeln!(out, "{title} breakpoints ({}):", list.len())?;
            if !list.is_empty() {
                writeln!(out, "{}", list.iter().map(|bp| format!("  {bp}")).join("\n"))?;
            }
        }
        Ok(())
    }
}

fn set_active_where(
    table: &mut BreakpointTable,
    ctx: &CodeContext<'_>,
    active: bool,
    filter: impl Fn(&Breakpoint) -> bool,
) -> ControlResult<()> {
    let candidates: Vec<BreakpointId> = table
        .target_ids()
        .filter_map(|id| table.arena.get(&id))
        .filter(|bp| bp.is_enabled() && bp.is_active() != active && filter(bp))
        .map(|bp| bp.id)
        .collect();

    let switch = |table: &mut BreakpointTable, id: BreakpointId, active: bool| {
        if active {
            table.activate_target(ctx, id)
        } else {
            table.deactivate_target(ctx, id)
        }
    };
    let mut switched = Vec::with_capacity(candidates.len());
    for id in candidates {
        if let Err(err) = switch(table, id, active) {
            // Undo newest first so a shared trap is restored by its last holder.
            for done in switched.into_iter().rev() {
                if let Err(undo_err) = switch(table, done, !active) {
                    warn!(breakpoint = %done, error = %undo_err, "failed to roll back breakpoint activation");
                }
            }
            return Err(err);
        }
        switched.push(id);
    }
    Ok(())
}

/// Breakpoints at `address` in reporting order, registering a transient one if
/// the debuggee's code holds a trap there that nobody set.
fn discover(
    table: &mut BreakpointTable,
    ctx: &CodeContext<'_>,
    address: Address,
) -> ControlResult<Vec<BreakpointId>> {
    let known: Vec<BreakpointId> = table.targets_at(address).into_iter().map(|bp| bp.id).collect();
    if !known.is_empty() {
        return Ok(known);
    }
    let trap = &ctx.platform.trap_instruction;
    let code = match ctx.process.read_bytes(address, trap.len()) {
        Ok(code) => code,
        Err(err) => {
            debug!(%address, error = %err, "cannot read code at trap address");
            return Ok(Vec::new());
        }
    };
    if &code != trap {
        return Ok(Vec::new());
    }

    let id = BreakpointId::next();
    let breakpoint = Breakpoint {
        id,
        kind: BreakpointKind::Transient,
        location: CodeLocation::Machine(address),
        owner: None,
        description: "Trap instruction found in debuggee code".to_string(),
        enabled: true,
        condition: None,
        role: BreakpointRole::User,
        detail: BreakpointDetail::Target(TargetBreakpoint::already_patched(address, trap)),
    };
    info!(%address, "discovered unregistered trap instruction");
    table.by_address.entry(address).or_default().push(id);
    table.arena.insert(id, breakpoint);
    Ok(vec![id])
}
