//! Break / resume / step-N state machine.
//!
//! The controller only tracks state; `Session` owns the emulation loop and
//! asks it at every instruction boundary whether to keep going.

use crate::error::{HookError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Upper bound on exec breakpoints held at once
pub const MAX_BREAKPOINTS: usize = 1024;

/// Why execution is broken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakReason {
    /// Host called `break_execution`
    Explicit,
    /// Exec breakpoint reached
    Breakpoint,
    /// `run_until` count consumed
    CountReached,
    /// A script callback asked for a break
    Script,
    /// Break requested from another thread
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    Running,
    Broken(BreakReason),
    /// Terminal for the whole emulation session
    Stopped(i32),
}

/// Unit for `run_until`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecuteCountType {
    CpuCycles,
    PpuCycles,
    CpuInstructions,
}

#[derive(Debug, Clone, Copy)]
struct CountBudget {
    unit: ExecuteCountType,
    remaining: u64,
}

#[derive(Debug)]
pub struct ExecutionController {
    state: ExecState,
    breakpoints: BTreeSet<u16>,
    max_breakpoints: usize,
    budget: Option<CountBudget>,
    /// Breakpoint address to step over once after resuming on it
    step_over: Option<u16>,
}

impl ExecutionController {
    pub fn new(max_breakpoints: usize) -> Self {
        Self {
            state: ExecState::Running,
            breakpoints: BTreeSet::new(),
            max_breakpoints,
            budget: None,
            step_over: None,
        }
    }

    pub fn state(&self) -> ExecState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == ExecState::Running
    }

    pub fn is_broken(&self) -> bool {
        matches!(self.state, ExecState::Broken(_))
    }

    pub fn ensure_not_stopped(&self) -> Result<()> {
        match self.state {
            ExecState::Stopped(code) => Err(HookError::Stopped(code)),
            _ => Ok(()),
        }
    }

    /// Running -> Broken. Returns false when nothing changed.
    pub fn break_execution(&mut self, reason: BreakReason) -> bool {
        if self.state != ExecState::Running {
            return false;
        }
        log::debug!("execution broken: {:?}", reason);
        self.state = ExecState::Broken(reason);
        self.budget = None;
        true
    }

    /// Broken -> Running. A no-op while running or stopped.
    pub fn resume(&mut self) -> bool {
        match self.state {
            ExecState::Broken(_) => {
                log::debug!("execution resumed");
                self.state = ExecState::Running;
                true
            }
            _ => false,
        }
    }

    /// Enter the terminal state. Returns false if already stopped.
    pub fn stop(&mut self, exit_code: i32) -> bool {
        if let ExecState::Stopped(_) = self.state {
            return false;
        }
        log::info!("emulation stopped with exit code {}", exit_code);
        self.state = ExecState::Stopped(exit_code);
        self.budget = None;
        true
    }

    /// Returns Ok(false) if the breakpoint already existed.
    pub fn add_breakpoint(&mut self, address: u16) -> Result<bool> {
        if self.breakpoints.contains(&address) {
            return Ok(false);
        }
        if self.breakpoints.len() >= self.max_breakpoints {
            return Err(HookError::TooManyBreakpoints(self.max_breakpoints));
        }
        Ok(self.breakpoints.insert(address))
    }

    pub fn remove_breakpoint(&mut self, address: u16) -> bool {
        self.breakpoints.remove(&address)
    }

    pub fn breakpoints(&self) -> impl Iterator<Item = u16> + '_ {
        self.breakpoints.iter().copied()
    }

    /// Checked before the instruction at `pc` executes. A breakpoint that
    /// just caused a break is stepped over once.
    pub fn hit_breakpoint(&mut self, pc: u16) -> bool {
        if let Some(skip) = self.step_over.take() {
            if skip == pc {
                return false;
            }
        }
        if self.breakpoints.contains(&pc) {
            self.step_over = Some(pc);
            return true;
        }
        false
    }

    /// Arm a count budget for `run_until`.
    pub fn arm(&mut self, count: u64, unit: ExecuteCountType) {
        self.budget = Some(CountBudget {
            unit,
            remaining: count,
        });
    }

    pub fn budget_remaining(&self) -> Option<(ExecuteCountType, u64)> {
        self.budget.map(|b| (b.unit, b.remaining))
    }

    /// A zero budget is already exhausted before anything runs.
    pub fn budget_exhausted(&self) -> bool {
        matches!(self.budget, Some(b) if b.remaining == 0)
    }

    /// Charge one completed instruction against the budget. Returns true
    /// when the budget is consumed; budgets are only checked between
    /// instructions, so a cycle budget may overshoot by one instruction.
    pub fn account(&mut self, cpu_cycles: u32) -> bool {
        let Some(budget) = self.budget.as_mut() else {
            return false;
        };
        let spent = match budget.unit {
            ExecuteCountType::CpuInstructions => 1,
            ExecuteCountType::CpuCycles => cpu_cycles as u64,
            ExecuteCountType::PpuCycles => cpu_cycles as u64 * 3,
        };
        budget.remaining = budget.remaining.saturating_sub(spent);
        if budget.remaining == 0 {
            self.budget = None;
            return true;
        }
        false
    }
}

impl Default for ExecutionController {
    fn default() -> Self {
        Self::new(MAX_BREAKPOINTS)
    }
}
