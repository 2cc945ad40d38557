//! Power controller
//!
//! Maintains the Active/Standby/Off tier partition per CPU family and
//! issues the sleep-state transitions behind it. Every transition follows
//! the flag-plus-callback discipline: issue `set_machine_state`, mark the
//! machine `changing_state`, return; the dispatcher clears the flag when
//! `StateChangeComplete` arrives. Nothing here waits.

use tracing::{debug, info};

use stratus_core::{Cluster, CpuFamily, MachineId, Result, SchedulerError, SleepState, Tier};

use crate::capacity::compare_machines;
use crate::fleet::FleetModel;

/// Tier manager for the fleet.
#[derive(Debug, Default)]
pub struct PowerController {
    /// Tier promotions issued (toward Active).
    pub promotions: u64,
    /// Tier demotions issued (toward Off).
    pub demotions: u64,
}

impl PowerController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the initial tiered split per family: the top slice by
    /// efficiency stays Active, the next goes to Standby (S2), the rest to
    /// Off (S5). Machines are assumed to boot in S0, so only the Standby
    /// and Off partitions get state changes.
    pub fn apply_initial_split<C: Cluster + ?Sized>(
        &mut self,
        fleet: &mut FleetModel,
        cluster: &mut C,
    ) -> Result<()> {
        let cfg = fleet.config().clone();
        for family in CpuFamily::ALL {
            let mut ids: Vec<MachineId> = {
                let mut members: Vec<_> = fleet.machines_of_family(family).collect();
                members.sort_by(|a, b| compare_machines(a, b));
                members.iter().map(|m| m.id).collect()
            };
            if ids.is_empty() {
                continue;
            }
            let n = ids.len();
            let standby = (n as f64 * cfg.initial_standby_fraction).floor() as usize;
            let off = (n as f64 * cfg.initial_off_fraction).floor() as usize;
            let active = n.saturating_sub(standby + off).max(1);

            let rest = ids.split_off(active.min(n));
            let standby = standby.min(rest.len());
            info!(
                family = %family,
                total = n,
                active = n - rest.len(),
                standby,
                off = rest.len() - standby,
                "applying initial tier split"
            );
            for id in ids {
                fleet.set_tier(id, Tier::Active)?;
            }
            for (i, id) in rest.into_iter().enumerate() {
                if i < standby {
                    self.transition(fleet, cluster, id, Tier::Standby)?;
                } else {
                    self.transition(fleet, cluster, id, Tier::Off)?;
                }
            }
        }
        Ok(())
    }

    /// Highest-ranked machine of the family in the given tier with no
    /// state change in flight.
    pub fn best_in_tier(
        &self,
        fleet: &FleetModel,
        family: CpuFamily,
        tier: Tier,
    ) -> Option<MachineId> {
        let mut members: Vec<_> = fleet
            .machines_of_family(family)
            .filter(|m| m.tier == tier && !m.changing_state)
            .collect();
        members.sort_by(|a, b| compare_machines(a, b));
        members.first().map(|m| m.id)
    }

    /// Standby -> Active (S0). Used when placement runs out of active
    /// capacity. Tier moves optimistically; the retry queue holds the work
    /// until `StateChangeComplete`. Also tops the Standby tier back up
    /// from Off so the next wake-up has somewhere to go.
    pub fn promote_to_active<C: Cluster + ?Sized>(
        &mut self,
        fleet: &mut FleetModel,
        cluster: &mut C,
        machine: MachineId,
    ) -> Result<()> {
        let family = fleet.machine(machine)?.cpu;
        self.transition(fleet, cluster, machine, Tier::Active)?;
        self.promotions += 1;
        self.ensure_standby_reserve(fleet, cluster, family)?;
        Ok(())
    }

    /// Off -> Standby (S2).
    pub fn promote_to_standby<C: Cluster + ?Sized>(
        &mut self,
        fleet: &mut FleetModel,
        cluster: &mut C,
        machine: MachineId,
    ) -> Result<()> {
        self.transition(fleet, cluster, machine, Tier::Standby)?;
        self.promotions += 1;
        Ok(())
    }

    /// Active -> Standby (S2). Conservative: only empty machines with no
    /// inbound migrations and no state change in flight.
    pub fn demote_to_standby<C: Cluster + ?Sized>(
        &mut self,
        fleet: &mut FleetModel,
        cluster: &mut C,
        machine: MachineId,
    ) -> Result<()> {
        self.check_demotable(fleet, machine)?;
        self.transition(fleet, cluster, machine, Tier::Standby)?;
        self.demotions += 1;
        Ok(())
    }

    /// Standby -> Off (S5). Same guards as demotion to Standby.
    pub fn demote_to_off<C: Cluster + ?Sized>(
        &mut self,
        fleet: &mut FleetModel,
        cluster: &mut C,
        machine: MachineId,
    ) -> Result<()> {
        self.check_demotable(fleet, machine)?;
        self.transition(fleet, cluster, machine, Tier::Off)?;
        self.demotions += 1;
        Ok(())
    }

    /// Demote an idle Active machine to Standby if every guard passes.
    /// Returns whether a demotion was issued.
    pub fn try_demote_idle<C: Cluster + ?Sized>(
        &mut self,
        fleet: &mut FleetModel,
        cluster: &mut C,
        machine: MachineId,
    ) -> bool {
        let demotable = fleet
            .machine(machine)
            .map(|m| m.tier == Tier::Active)
            .unwrap_or(false)
            && self.check_demotable(fleet, machine).is_ok();
        if !demotable {
            return false;
        }
        match self.demote_to_standby(fleet, cluster, machine) {
            Ok(()) => true,
            Err(err) => {
                debug!(%machine, %err, "idle demotion not issued");
                false
            }
        }
    }

    /// Promote Off machines until the family's Standby tier reaches the
    /// configured reserve.
    pub fn ensure_standby_reserve<C: Cluster + ?Sized>(
        &mut self,
        fleet: &mut FleetModel,
        cluster: &mut C,
        family: CpuFamily,
    ) -> Result<()> {
        let reserve = fleet.config().standby_reserve;
        loop {
            let standby = fleet
                .machines_of_family(family)
                .filter(|m| m.tier == Tier::Standby)
                .count();
            if standby >= reserve {
                return Ok(());
            }
            let Some(next) = self.best_in_tier(fleet, family, Tier::Off) else {
                return Ok(());
            };
            self.promote_to_standby(fleet, cluster, next)?;
        }
    }

    fn check_demotable(&self, fleet: &FleetModel, machine: MachineId) -> Result<()> {
        let m = fleet.machine(machine)?;
        if m.vm_count() > 0 {
            return Err(SchedulerError::capacity(machine, "machine still owns vms"));
        }
        if m.has_inbound_migrations() {
            return Err(SchedulerError::capacity(
                machine,
                "migrations targeting machine",
            ));
        }
        if m.changing_state {
            return Err(SchedulerError::MachineChangingState(machine));
        }
        if fleet.has_outbound_migrations(machine) {
            return Err(SchedulerError::capacity(
                machine,
                "migrations still leaving machine",
            ));
        }
        Ok(())
    }

    /// Issue the state change for a tier move and update the model.
    fn transition<C: Cluster + ?Sized>(
        &mut self,
        fleet: &mut FleetModel,
        cluster: &mut C,
        machine: MachineId,
        tier: Tier,
    ) -> Result<()> {
        {
            let m = fleet.machine(machine)?;
            if m.changing_state {
                return Err(SchedulerError::MachineChangingState(machine));
            }
            if m.tier == tier {
                return Ok(());
            }
        }
        let state: SleepState = tier.target_state();
        cluster.set_machine_state(machine, state)?;
        fleet.mark_state_changing(machine)?;
        fleet.set_tier(machine, tier)?;
        debug!(%machine, ?tier, ?state, "tier transition issued");
        Ok(())
    }
}
