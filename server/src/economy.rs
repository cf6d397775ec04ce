//! Time-based economy engine
//!
//! Stockpiles are settled lazily: nothing runs on a timer, and production is
//! credited whenever a player-initiated command needs fresh balances. A
//! settlement computes `rate(kind) * stage * elapsed_seconds` per building
//! since the player's `last_update`, credits the totals, and advances
//! `last_update` to the settlement instant, so settling twice at the same
//! instant credits nothing the second time.
//!
//! A pending upgrade whose completion time has passed is folded into the same
//! pass: the elapsed interval is split at the completion instant, accruing at
//! the old stage before it and at the new stage after it, and the stage
//! advance is committed atomically with the credit.

use log::debug;
use shared::catalog::BuildingKind;
use shared::Resources;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::locks::PlayerLocks;
use crate::store::{BuildingRecord, Store, StoreError};

/// Current unix time in whole seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs() as i64
}

/// Domain failures surfaced to the session as one-line rejections.
#[derive(Debug, Error)]
pub enum EconomyError {
    #[error("unknown building type `{0}`")]
    UnknownBuilding(String),
    #[error("slot {0} already has a building")]
    SlotOccupied(i64),
    #[error("slot {0} is empty")]
    SlotEmpty(i64),
    #[error("building is at its maximum stage")]
    StageCap,
    #[error("an upgrade is already in progress")]
    UpgradePending,
    #[error("insufficient resources")]
    Insufficient,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Production of one building over `[from, to]` at a fixed stage. Elapsed
/// time is clamped so a backdated clock can never debit a stockpile.
pub fn production_between(kind: BuildingKind, stage: u32, from: i64, to: i64) -> Resources {
    let elapsed = (to - from).max(0);
    kind.spec().output_at(stage).scaled(elapsed)
}

/// Outcome of one accrual pass over a player's buildings.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Accrual {
    pub produced: Resources,
    /// Upgrades that completed during the interval: (building id, new stage).
    pub completions: Vec<(i64, u32)>,
}

/// Computes production since `from` across all buildings, splitting each
/// completed upgrade's interval at its completion instant.
pub fn accrue(buildings: &[BuildingRecord], from: i64, now: i64) -> Accrual {
    let mut accrual = Accrual::default();

    for building in buildings {
        match building.upgrade_end_time {
            Some(end) if end <= now => {
                let boundary = end.clamp(from, now);
                accrual.produced += production_between(building.kind, building.stage, from, boundary);
                accrual.produced +=
                    production_between(building.kind, building.stage + 1, boundary, now);
                accrual.completions.push((building.id, building.stage + 1));
            }
            _ => {
                // Still upgrading (or idle): the current stage keeps producing.
                accrual.produced += production_between(building.kind, building.stage, from, now);
            }
        }
    }

    accrual
}

/// Orchestrates settlements and resource-affecting mutations. Every public
/// operation takes the player's lock for its whole read-modify-write span.
#[derive(Clone)]
pub struct Economy {
    store: Store,
    locks: PlayerLocks,
}

impl Economy {
    pub fn new(store: Store, locks: PlayerLocks) -> Self {
        Self { store, locks }
    }

    /// Settles production accrued since the player's last update and returns
    /// the fresh balances.
    pub async fn settle(&self, player_id: i64, now: i64) -> Result<Resources, EconomyError> {
        let _guard = self.locks.acquire(player_id).await;
        self.settle_locked(player_id, now).await
    }

    async fn settle_locked(&self, player_id: i64, now: i64) -> Result<Resources, EconomyError> {
        let player = self.store.player(player_id).await?;
        let buildings = self.store.buildings(player_id).await?;

        let accrual = accrue(&buildings, player.last_update, now);
        let balances = self
            .store
            .settle(player_id, accrual.produced, &accrual.completions, now)
            .await?;

        if !accrual.produced.is_zero() || !accrual.completions.is_empty() {
            debug!(
                "Settled player {}: +{:?}, {} upgrade(s) completed",
                player_id,
                accrual.produced,
                accrual.completions.len()
            );
        }
        Ok(balances)
    }

    /// Applies an explicit delta on top of a settlement, rejecting any
    /// outcome that would drive a balance negative.
    pub async fn apply_deltas(
        &self,
        player_id: i64,
        delta: Resources,
        now: i64,
    ) -> Result<Resources, EconomyError> {
        let _guard = self.locks.acquire(player_id).await;
        self.settle_locked(player_id, now).await?;
        self.spend(player_id, delta, now).await
    }

    async fn spend(
        &self,
        player_id: i64,
        delta: Resources,
        now: i64,
    ) -> Result<Resources, EconomyError> {
        self.store
            .settle(player_id, delta, &[], now)
            .await
            .map_err(|e| match e {
                StoreError::NegativeBalance => EconomyError::Insufficient,
                other => other.into(),
            })
    }

    /// Places a new building in an empty slot: charges the base cost and
    /// schedules construction. Returns the completion time.
    pub async fn place(
        &self,
        player_id: i64,
        slot_id: i64,
        kind_tag: &str,
        now: i64,
    ) -> Result<i64, EconomyError> {
        let kind = parse_kind(kind_tag)?;
        let _guard = self.locks.acquire(player_id).await;
        self.settle_locked(player_id, now).await?;

        if self.store.building_at(player_id, slot_id).await?.is_some() {
            return Err(EconomyError::SlotOccupied(slot_id));
        }

        let spec = kind.spec();
        self.spend(player_id, steel_cost(spec.cost_at(0)), now).await?;

        let end_time = now + spec.build_time_at(0);
        self.store
            .upsert_building(player_id, slot_id, kind, 0, Some(end_time))
            .await?;
        Ok(end_time)
    }

    /// Starts the next-stage upgrade for the building in `slot_id`: charges
    /// the stage cost and schedules completion. Returns the completion time.
    pub async fn start_upgrade(
        &self,
        player_id: i64,
        slot_id: i64,
        now: i64,
    ) -> Result<i64, EconomyError> {
        let _guard = self.locks.acquire(player_id).await;
        self.settle_locked(player_id, now).await?;

        let building = self
            .store
            .building_at(player_id, slot_id)
            .await?
            .ok_or(EconomyError::SlotEmpty(slot_id))?;

        // The settlement above completed anything due, so a remaining
        // end time is strictly in the future.
        if building.upgrade_end_time.is_some() {
            return Err(EconomyError::UpgradePending);
        }
        let spec = building.kind.spec();
        if building.stage >= spec.max_stage {
            return Err(EconomyError::StageCap);
        }

        self.spend(player_id, steel_cost(spec.cost_at(building.stage)), now)
            .await?;

        let end_time = now + spec.build_time_at(building.stage);
        self.store.schedule_upgrade(building.id, end_time).await?;
        Ok(end_time)
    }

    /// Tears down whatever occupies `slot_id`. No refund.
    pub async fn demolish(&self, player_id: i64, slot_id: i64, now: i64) -> Result<(), EconomyError> {
        let _guard = self.locks.acquire(player_id).await;
        self.settle_locked(player_id, now).await?;

        if self.store.remove_building(player_id, slot_id).await? {
            Ok(())
        } else {
            Err(EconomyError::SlotEmpty(slot_id))
        }
    }

    /// Raw slot upsert for the legacy `add_building` command: the client
    /// dictates the stage and nothing is charged. Production accrued before
    /// the change is settled at the old stage first. Stage 0 clears the slot.
    pub async fn upsert_raw(
        &self,
        player_id: i64,
        slot_id: i64,
        kind_tag: &str,
        stage: u32,
        now: i64,
    ) -> Result<(), EconomyError> {
        let kind = parse_kind(kind_tag)?;
        let _guard = self.locks.acquire(player_id).await;
        self.settle_locked(player_id, now).await?;

        if stage == 0 {
            self.store.remove_building(player_id, slot_id).await?;
            return Ok(());
        }
        if stage > kind.spec().max_stage {
            return Err(EconomyError::StageCap);
        }

        self.store
            .upsert_building(player_id, slot_id, kind, stage, None)
            .await?;
        Ok(())
    }
}

fn parse_kind(tag: &str) -> Result<BuildingKind, EconomyError> {
    BuildingKind::from_str(tag).map_err(|e| EconomyError::UnknownBuilding(e.0))
}

fn steel_cost(amount: i64) -> Resources {
    Resources::new(0, -amount, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn fixture() -> (Economy, Store, i64) {
        let store = Store::connect("sqlite::memory:").await.unwrap();
        store.init_schema().await.unwrap();
        let pid = store
            .create_player("testuser", "testpass", Resources::starting(), 1_000)
            .await
            .unwrap();
        let economy = Economy::new(store.clone(), PlayerLocks::new());
        (economy, store, pid)
    }

    #[test]
    fn test_production_between_is_linear() {
        // rate 5, stage 2, 10 seconds -> 100 food
        let produced = production_between(BuildingKind::Plantation, 2, 100, 110);
        assert_eq!(produced, Resources::new(100, 0, 0));
    }

    #[test]
    fn test_production_clamps_negative_elapsed() {
        let produced = production_between(BuildingKind::Plantation, 2, 110, 100);
        assert!(produced.is_zero());
    }

    #[test]
    fn test_accrue_splits_at_upgrade_boundary() {
        let building = BuildingRecord {
            id: 7,
            player_id: 1,
            slot_id: 1,
            kind: BuildingKind::Plantation,
            stage: 2,
            upgrade_end_time: Some(1_005),
        };

        // 5 s at stage 2 (50 food), then 5 s at stage 3 (75 food).
        let accrual = accrue(&[building], 1_000, 1_010);
        assert_eq!(accrual.produced, Resources::new(125, 0, 0));
        assert_eq!(accrual.completions, vec![(7, 3)]);
    }

    #[test]
    fn test_accrue_pending_upgrade_not_yet_due() {
        let building = BuildingRecord {
            id: 7,
            player_id: 1,
            slot_id: 1,
            kind: BuildingKind::Plantation,
            stage: 2,
            upgrade_end_time: Some(2_000),
        };

        let accrual = accrue(&[building], 1_000, 1_010);
        assert_eq!(accrual.produced, Resources::new(100, 0, 0));
        assert!(accrual.completions.is_empty());
    }

    #[test]
    fn test_accrue_initial_construction_produces_nothing_before_completion() {
        let building = BuildingRecord {
            id: 3,
            player_id: 1,
            slot_id: 4,
            kind: BuildingKind::AbyssalOreRefinery,
            stage: 0,
            upgrade_end_time: Some(1_004),
        };

        // Stage 0 yields nothing; from completion on it runs at stage 1.
        let accrual = accrue(&[building], 1_000, 1_010);
        assert_eq!(accrual.produced, Resources::new(0, 90, 0));
        assert_eq!(accrual.completions, vec![(3, 1)]);
    }

    #[test]
    fn test_accrue_sums_across_buildings() {
        let make = |id, slot, kind, stage| BuildingRecord {
            id,
            player_id: 1,
            slot_id: slot,
            kind,
            stage,
            upgrade_end_time: None,
        };
        let buildings = [
            make(1, 1, BuildingKind::Plantation, 2),
            make(2, 2, BuildingKind::AbyssalOreRefinery, 1),
            make(3, 3, BuildingKind::Cabins, 4),
        ];

        let accrual = accrue(&buildings, 0, 10);
        assert_eq!(accrual.produced, Resources::new(100, 150, 0));
    }

    #[tokio::test]
    async fn test_settle_credits_and_is_idempotent() {
        let (economy, store, pid) = fixture().await;
        store
            .upsert_building(pid, 1, BuildingKind::Plantation, 2, None)
            .await
            .unwrap();

        let balances = economy.settle(pid, 1_010).await.unwrap();
        assert_eq!(balances.food, 10_000 + 100);

        // Same instant again: zero additional credit.
        let balances = economy.settle(pid, 1_010).await.unwrap();
        assert_eq!(balances.food, 10_100);

        // One more second accrues exactly one second of production.
        let balances = economy.settle(pid, 1_011).await.unwrap();
        assert_eq!(balances.food, 10_110);
    }

    #[tokio::test]
    async fn test_settle_completes_due_upgrade() {
        let (economy, store, pid) = fixture().await;
        store
            .upsert_building(pid, 1, BuildingKind::Plantation, 2, Some(1_005))
            .await
            .unwrap();

        let balances = economy.settle(pid, 1_010).await.unwrap();
        assert_eq!(balances.food, 10_000 + 125);

        let building = store.building_at(pid, 1).await.unwrap().unwrap();
        assert_eq!(building.stage, 3);
        assert_eq!(building.upgrade_end_time, None);
    }

    #[tokio::test]
    async fn test_concurrent_settles_lose_nothing() {
        let (economy, store, pid) = fixture().await;
        store
            .upsert_building(pid, 1, BuildingKind::Plantation, 2, Some(1_005))
            .await
            .unwrap();

        // Two sessions settle the same player at the same instant: one
        // completes the upgrade and credits the split interval, the other
        // must see zero elapsed time and credit nothing extra.
        let a = tokio::spawn({
            let economy = economy.clone();
            async move { economy.settle(pid, 1_010).await }
        });
        let b = tokio::spawn({
            let economy = economy.clone();
            async move { economy.settle(pid, 1_010).await }
        });
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let player = store.player(pid).await.unwrap();
        assert_eq!(player.resources.food, 10_000 + 125);
        let building = store.building_at(pid, 1).await.unwrap().unwrap();
        assert_eq!(building.stage, 3);
    }

    #[tokio::test]
    async fn test_apply_deltas_rejects_overdraft() {
        let (economy, store, pid) = fixture().await;

        let err = economy
            .apply_deltas(pid, Resources::new(0, -10_001, 0), 1_001)
            .await
            .unwrap_err();
        assert!(matches!(err, EconomyError::Insufficient));

        let player = store.player(pid).await.unwrap();
        assert_eq!(player.resources.steel, 10_000);
    }

    #[tokio::test]
    async fn test_place_charges_and_schedules() {
        let (economy, store, pid) = fixture().await;

        let end = economy.place(pid, 3, "plantation", 2_000).await.unwrap();
        assert_eq!(end, 2_000 + 30);

        let player = store.player(pid).await.unwrap();
        assert_eq!(player.resources.steel, 10_000 - 20);

        let building = store.building_at(pid, 3).await.unwrap().unwrap();
        assert_eq!(building.stage, 0);
        assert_eq!(building.upgrade_end_time, Some(end));

        let err = economy.place(pid, 3, "cabins", 2_001).await.unwrap_err();
        assert!(matches!(err, EconomyError::SlotOccupied(3)));
        let err = economy.place(pid, 4, "monorail", 2_001).await.unwrap_err();
        assert!(matches!(err, EconomyError::UnknownBuilding(_)));
    }

    #[tokio::test]
    async fn test_upgrade_charges_growing_cost() {
        let (economy, store, pid) = fixture().await;
        store
            .upsert_building(pid, 1, BuildingKind::Plantation, 2, None)
            .await
            .unwrap();

        let end = economy.start_upgrade(pid, 1, 2_000).await.unwrap();
        // stage 2 -> 3: time 30 * 1.5^2 = 67.5, rounded to 68
        assert_eq!(end, 2_000 + 68);

        let player = store.player(pid).await.unwrap();
        // cost 20 * 1.5^2 = 45 steel; the settlement only credits food
        assert_eq!(player.resources.steel, 10_000 - 45);
        assert_eq!(player.resources.food, 10_000 + 10_000); // 1000 s at stage 2

        let err = economy.start_upgrade(pid, 1, 2_001).await.unwrap_err();
        assert!(matches!(err, EconomyError::UpgradePending));
    }

    #[tokio::test]
    async fn test_upgrade_respects_stage_cap() {
        let (economy, store, pid) = fixture().await;
        store
            .upsert_building(pid, 1, BuildingKind::DefensiveDome, 3, None)
            .await
            .unwrap();

        let err = economy.start_upgrade(pid, 1, 2_000).await.unwrap_err();
        assert!(matches!(err, EconomyError::StageCap));
    }

    #[tokio::test]
    async fn test_upgrade_rejected_when_unaffordable() {
        let (economy, store, _) = fixture().await;
        let poor = store
            .create_player("pauper", "x", Resources::new(0, 10, 0), 1_000)
            .await
            .unwrap();
        store
            .upsert_building(poor, 1, BuildingKind::DefensiveDome, 1, None)
            .await
            .unwrap();

        // Dome stage 1 -> 2 costs 150 steel; only 10 available.
        let err = economy.start_upgrade(poor, 1, 1_001).await.unwrap_err();
        assert!(matches!(err, EconomyError::Insufficient));
        let building = store.building_at(poor, 1).await.unwrap().unwrap();
        assert_eq!(building.upgrade_end_time, None);
    }

    #[tokio::test]
    async fn test_demolish_empties_slot() {
        let (economy, store, pid) = fixture().await;
        store
            .upsert_building(pid, 2, BuildingKind::Barracks, 1, None)
            .await
            .unwrap();

        economy.demolish(pid, 2, 1_001).await.unwrap();
        assert!(store.building_at(pid, 2).await.unwrap().is_none());

        let err = economy.demolish(pid, 2, 1_002).await.unwrap_err();
        assert!(matches!(err, EconomyError::SlotEmpty(2)));
    }

    #[tokio::test]
    async fn test_upsert_raw_settles_old_stage_first() {
        let (economy, store, pid) = fixture().await;
        store
            .upsert_building(pid, 1, BuildingKind::Plantation, 2, None)
            .await
            .unwrap();

        // 10 s at stage 2 settle before the client bumps the stage to 5.
        economy
            .upsert_raw(pid, 1, "plantation", 5, 1_010)
            .await
            .unwrap();

        let player = store.player(pid).await.unwrap();
        assert_eq!(player.resources.food, 10_000 + 100);
        let building = store.building_at(pid, 1).await.unwrap().unwrap();
        assert_eq!(building.stage, 5);
    }

    #[tokio::test]
    async fn test_upsert_raw_stage_zero_clears_slot() {
        let (economy, store, pid) = fixture().await;
        store
            .upsert_building(pid, 1, BuildingKind::Plantation, 2, None)
            .await
            .unwrap();

        economy
            .upsert_raw(pid, 1, "plantation", 0, 1_001)
            .await
            .unwrap();
        assert!(store.building_at(pid, 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_raw_rejects_over_cap_stage() {
        let (economy, _, pid) = fixture().await;
        let err = economy
            .upsert_raw(pid, 1, "defensivedome", 4, 1_001)
            .await
            .unwrap_err();
        assert!(matches!(err, EconomyError::StageCap));
    }
}
