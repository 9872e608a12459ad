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
use tracing::{debug, warn};
use vmdb_common::{BreakpointConfig, Compilation, PlatformConfig};

use crate::{
    Breakpoint, BreakpointId, BreakpointKind, BreakpointRole, BreakpointTable, CompilationResolver,
    ControlResult, MethodPosition, NewTarget, TargetProcess,
};

/// Collaborators needed to touch code in the debuggee.
pub(crate) struct CodeContext<'a> {
    pub(crate) process: &'a dyn TargetProcess,
    pub(crate) compilations: &'a dyn CompilationResolver,
    pub(crate) platform: &'a PlatformConfig,
}

/// A target breakpoint dropped because its compilation left the code cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Eviction {
    pub(crate) target: BreakpointId,
    pub(crate) owner: Option<BreakpointId>,
    pub(crate) kind: BreakpointKind,
}

fn position_of(table: &BreakpointTable, owner: BreakpointId) -> Option<MethodPosition> {
    table.arena.get(&owner).and_then(Breakpoint::as_bytecode).map(|bytecode| bytecode.position().clone())
}

/// Install one system target breakpoint per machine address `owner` maps to in
/// `compilation`. Returns how many were installed.
///
/// Breakpoints of other kinds or owners at the same address do not prevent a
/// realization; they share the trap. Failures are logged and skipped so one bad
/// compilation never blocks the rest.
pub(crate) fn realize_in_compilation(
    table: &mut BreakpointTable,
    ctx: &CodeContext<'_>,
    owner: BreakpointId,
    compilation: &Compilation,
) -> usize {
    let Some(position) = position_of(table, owner) else { return 0 };
    if position.method != compilation.method {
        return 0;
    }

    let addresses = match ctx.compilations.machine_addresses(compilation, position.bci) {
        Ok(addresses) => addresses,
        Err(err) => {
            warn!(%position, compilation = %compilation.id, error = %err, "cannot map bytecode position");
            return 0;
        }
    };
    if addresses.is_empty() {
        debug!(%position, compilation = %compilation.id, "no machine code for position, leaving unrealized");
        return 0;
    }

    let mut installed = 0;
    for address in addresses {
        if !compilation.contains(address) {
            warn!(%position, %address, code = %compilation.code, "mapped address outside compilation, skipping");
            continue;
        }
        if table.find_at(address, BreakpointKind::System, Some(owner)).is_some() {
            debug!(%position, %address, "already realized at address, skipping");
            continue;
        }
        let new = NewTarget {
            kind: BreakpointKind::System,
            address,
            owner: Some(owner),
            description: format!("For bytecode breakpoint {position}"),
            original_bytes: None,
            role: BreakpointRole::User,
        };
        match table.insert_target(ctx, new) {
            Ok(_) => installed += 1,
            Err(err) => warn!(%position, %address, error = %err, "failed to realize bytecode breakpoint"),
        }
    }
    installed
}

/// Realize `owner` in every compilation of its method currently in the code cache.
pub(crate) fn realize_all(
    table: &mut BreakpointTable,
    ctx: &CodeContext<'_>,
    owner: BreakpointId,
) -> usize {
    let Some(position) = position_of(table, owner) else { return 0 };
    let compilations = match ctx.compilations.compilations(&position.method) {
        Ok(compilations) => compilations,
        Err(err) => {
            warn!(%position, error = %err, "cannot list compilations");
            return 0;
        }
    };
    compilations
        .iter()
        .map(|compilation| realize_in_compilation(table, ctx, owner, compilation))
        .sum()
}

/// Remove every realization of `owner`, restoring the code under each.
///
/// If restoring one fails, the realizations not yet removed are kept and the
/// error is returned.
pub(crate) fn derealize(
    table: &mut BreakpointTable,
    ctx: &CodeContext<'_>,
    owner: BreakpointId,
) -> ControlResult<()> {
    let Some(bytecode) = table.arena.get_mut(&owner).and_then(Breakpoint::as_bytecode_mut) else {
        return Ok(());
    };
    let mut remaining = bytecode.take_targets().into_iter();
    while let Some(target) = remaining.next() {
        if !table.arena.contains_key(&target) {
            continue;
        }
        if let Err(err) = table.remove_target(ctx, target) {
            if let Some(bytecode) = table.arena.get_mut(&owner).and_then(Breakpoint::as_bytecode_mut) {
                bytecode.add_target(target);
                remaining.for_each(|rest| bytecode.add_target(rest));
            }
            return Err(err);
        }
    }
    Ok(())
}

/// Realize every enabled bytecode breakpoint on the compiled method.
pub(crate) fn on_compilation_completed(
    table: &mut BreakpointTable,
    ctx: &CodeContext<'_>,
    compilation: &Compilation,
) -> usize {
    let owners: Vec<BreakpointId> = table
        .bytecode_ids()
        .filter(|id| {
            table.arena.get(id).is_some_and(|bp| {
                bp.enabled && bp.location.method() == Some(&compilation.method)
            })
        })
        .collect();
    let realized: usize =
        owners.into_iter().map(|owner| realize_in_compilation(table, ctx, owner, compilation)).sum();
    debug!(compilation = %compilation.id, method = %compilation.method, realized, "compilation completed");
    realized
}

/// Forget every target breakpoint inside an evicted compilation.
///
/// The code is gone, so nothing is written back to memory.
pub(crate) fn evict_compilation(table: &mut BreakpointTable, compilation: &Compilation) -> Vec<Eviction> {
    let code = compilation.code;
    if code.size() == 0 || code.end() < code.start() {
        return Vec::new();
    }
    let doomed: Vec<BreakpointId> = table
        .by_address
        .range(code.start()..code.end())
        .flat_map(|(_, ids)| ids.iter().copied())
        .collect();

    let evicted: Vec<Eviction> = doomed
        .into_iter()
        .filter_map(|id| table.detach_target(id))
        .map(|bp| Eviction { target: bp.id, owner: bp.owner, kind: bp.kind })
        .collect();
    if !evicted.is_empty() {
        debug!(compilation = %compilation.id, count = evicted.len(), "evicted target breakpoints");
    }
    evicted
}

/// Arm the compiler hooks that report compilation progress.
pub(crate) fn install_compiler_hooks(
    table: &mut BreakpointTable,
    ctx: &CodeContext<'_>,
    policy: &BreakpointConfig,
) {
    let mut hooks = vec![(
        ctx.compilations.compilation_completed_hook(),
        BreakpointRole::CompilationCompletedHook,
        "System trap for compilation end",
    )];
    if policy.compilation_started_hook {
        hooks.push((
            ctx.compilations.compilation_started_hook(),
            BreakpointRole::CompilationStartedHook,
            "System trap for compilation start",
        ));
    }

    for (address, role, description) in hooks {
        let Some(address) = address else {
            warn!(?role, "compiler exposes no hook address");
            continue;
        };
        let new = NewTarget {
            kind: BreakpointKind::System,
            address,
            owner: None,
            description: description.to_string(),
            original_bytes: None,
            role,
        };
        match table.insert_target(ctx, new) {
            Ok(id) => {
                debug!(%id, %address, ?role, "armed compiler hook");
                table.compiler_hooks.push(id);
            }
            Err(err) => warn!(%address, ?role, error = %err, "failed to arm compiler hook"),
        }
    }
}

/// Disarm the compiler hooks once no bytecode breakpoint remains.
pub(crate) fn remove_compiler_hooks(table: &mut BreakpointTable, ctx: &CodeContext<'_>) {
    for id in std::mem::take(&mut table.compiler_hooks) {
        if let Err(err) = table.remove_target(ctx, id) {
            warn!(%id, error = %err, "failed to disarm compiler hook");
        }
    }
}

/// Tell the debuggee which types currently hold bytecode breakpoints.
pub(crate) fn publish_breakpoint_holders(table: &BreakpointTable, ctx: &CodeContext<'_>) {
    let holders: Vec<String> = table
        .bytecode_ids()
        .filter_map(|id| table.arena.get(&id))
        .filter_map(|bp| bp.location.method())
        .map(|method| method.holder.clone())
        .sorted()
        .dedup()
        .collect();
    if let Err(err) = ctx.compilations.publish_breakpoint_holders(&holders) {
        warn!(error = %err, "failed to publish breakpoint holders");
    }
}
