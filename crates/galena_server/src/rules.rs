use std::sync::Arc;

use galena_shared::block::{is_liquid, liquid_can_displace, BlockId};
use galena_shared::coords::{DOWN, HORIZONTAL_DIRECTIONS};

use crate::physics::{Cell, PhysicsArgs, PhysicsRule, RuleTable, TickContext};

/// Ticks an opened door stays open before reverting.
pub const DOOR_CLOSE_DELAY: u16 = 20;

/// Mist rolls against this chance (in 255ths) every few ticks.
pub const MIST_DISSIPATE_CHANCE: u8 = 64;
pub const MIST_DISSIPATE_DELAY: u16 = 4;

/// Source and flowing liquids fill the cell below first, then sideways.
struct LiquidSpread {
    flowing: BlockId,
}

impl PhysicsRule for LiquidSpread {
    fn evaluate(&self, cell: Cell, ctx: &mut TickContext<'_>) {
        let below = cell.pos + DOWN;
        if let Some(block) = ctx.block_at(below) {
            if liquid_can_displace(block) {
                ctx.schedule_update(below, self.flowing);
                return;
            }
        }

        for dir in HORIZONTAL_DIRECTIONS {
            let side = cell.pos + dir;
            if let Some(block) = ctx.block_at(side) {
                if liquid_can_displace(block) {
                    ctx.schedule_update(side, self.flowing);
                }
            }
        }
    }
}

/// Sand and gravel drop through air, mist and liquids.
struct PowderFall;

fn powder_can_fall_into(block: BlockId) -> bool {
    liquid_can_displace(block) || is_liquid(block)
}

impl PhysicsRule for PowderFall {
    fn evaluate(&self, cell: Cell, ctx: &mut TickContext<'_>) {
        let below = cell.pos + DOWN;
        if let Some(block) = ctx.block_at(below) {
            if powder_can_fall_into(block) {
                ctx.schedule_update(below, cell.block);
                ctx.schedule_update(cell.pos, BlockId::AIR);
            }
        }
    }
}

/// An opened door arms a countdown on first evaluation and reverts to its
/// closed form once the countdown has elapsed.
struct DoorRevert;

impl PhysicsRule for DoorRevert {
    fn evaluate(&self, cell: Cell, ctx: &mut TickContext<'_>) {
        if cell.args.revert_to == BlockId::AIR {
            ctx.schedule_check(
                cell.pos,
                PhysicsArgs {
                    delay: DOOR_CLOSE_DELAY,
                    dissipate_chance: 0,
                    revert_to: BlockId::DOOR_CLOSED,
                },
            );
        } else {
            ctx.schedule_update(cell.pos, cell.args.revert_to);
        }
    }
}

/// Mist fades out probabilistically instead of on a fixed schedule.
struct MistDissipate;

impl PhysicsRule for MistDissipate {
    fn evaluate(&self, cell: Cell, ctx: &mut TickContext<'_>) {
        if cell.args.dissipate_chance == 0 {
            ctx.schedule_check(
                cell.pos,
                PhysicsArgs {
                    delay: MIST_DISSIPATE_DELAY,
                    dissipate_chance: MIST_DISSIPATE_CHANCE,
                    revert_to: BlockId::AIR,
                },
            );
        } else if ctx.roll(cell.args.dissipate_chance) {
            ctx.schedule_update(cell.pos, BlockId::AIR);
        } else {
            ctx.schedule_check(cell.pos, cell.args);
        }
    }
}

/// The stock rule set every level gets unless a caller substitutes its
/// own table.
pub fn default_rules() -> RuleTable {
    let mut table = RuleTable::default();

    let water: Arc<dyn PhysicsRule> = Arc::new(LiquidSpread {
        flowing: BlockId::WATER_FLOWING,
    });
    table.register(BlockId::WATER_SOURCE, water.clone());
    table.register(BlockId::WATER_FLOWING, water);

    let lava: Arc<dyn PhysicsRule> = Arc::new(LiquidSpread {
        flowing: BlockId::LAVA_FLOWING,
    });
    table.register(BlockId::LAVA_SOURCE, lava.clone());
    table.register(BlockId::LAVA_FLOWING, lava);

    let powder: Arc<dyn PhysicsRule> = Arc::new(PowderFall);
    table.register(BlockId::SAND, powder.clone());
    table.register(BlockId::GRAVEL, powder);

    table.register(BlockId::DOOR_OPEN, Arc::new(DoorRevert));
    table.register(BlockId::MIST, Arc::new(MistDissipate));

    table
}

#[cfg(test)]
mod tests {
    use glam::IVec3;

    use galena_shared::block::BlockId;
    use galena_shared::coords::Dims;
    use galena_shared::grid::WorldGrid;

    use super::default_rules;
    use crate::physics::{Cell, PhysicsArgs, TickContext};

    fn grid_with(center: IVec3, block: BlockId) -> (WorldGrid, u32) {
        let mut grid = WorldGrid::new(Dims::new(8, 8, 8).expect("valid dims"));
        let index = grid.dims().index_of(center).expect("in bounds");
        grid.set(index, block);
        (grid, index)
    }

    fn evaluate(grid: &WorldGrid, index: u32, args: PhysicsArgs) -> TickContext<'_> {
        let rules = default_rules();
        let block = grid.get(index);
        let rule = rules.get(block).expect("rule registered");
        let mut ctx = TickContext::new(grid);
        rule.evaluate(
            Cell {
                index,
                pos: grid.dims().pos_of(index),
                block,
                args,
            },
            &mut ctx,
        );
        ctx
    }

    #[test]
    fn water_flows_down_into_air_first() {
        let pos = IVec3::new(4, 4, 4);
        let (grid, index) = grid_with(pos, BlockId::WATER_SOURCE);

        let ctx = evaluate(&grid, index, PhysicsArgs::default());
        let updates = ctx.scheduled_updates();
        assert_eq!(updates.len(), 1);
        let below = grid.dims().index_of(pos + IVec3::new(0, -1, 0)).expect("below");
        assert_eq!(updates[0].index, below);
        assert_eq!(updates[0].block, BlockId::WATER_FLOWING);
    }

    #[test]
    fn water_spreads_sideways_when_resting_on_solid_ground() {
        let pos = IVec3::new(4, 4, 4);
        let (mut grid, index) = grid_with(pos, BlockId::WATER_SOURCE);
        let below = grid.dims().index_of(pos + IVec3::new(0, -1, 0)).expect("below");
        grid.set(below, BlockId::STONE);

        let ctx = evaluate(&grid, index, PhysicsArgs::default());
        assert_eq!(ctx.scheduled_updates().len(), 4);
        assert!(ctx
            .scheduled_updates()
            .iter()
            .all(|update| update.block == BlockId::WATER_FLOWING));
    }

    #[test]
    fn sand_falls_and_vacates_its_cell() {
        let pos = IVec3::new(2, 5, 2);
        let (grid, index) = grid_with(pos, BlockId::SAND);

        let ctx = evaluate(&grid, index, PhysicsArgs::default());
        let updates = ctx.scheduled_updates();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].block, BlockId::SAND);
        assert_eq!(updates[1].index, index);
        assert_eq!(updates[1].block, BlockId::AIR);
    }

    #[test]
    fn sand_on_solid_ground_stays_put() {
        let pos = IVec3::new(2, 0, 2);
        let (grid, index) = grid_with(pos, BlockId::SAND);

        let ctx = evaluate(&grid, index, PhysicsArgs::default());
        assert!(ctx.scheduled_updates().is_empty());
    }

    #[test]
    fn open_door_arms_a_countdown_then_reverts() {
        let pos = IVec3::new(3, 3, 3);
        let (grid, index) = grid_with(pos, BlockId::DOOR_OPEN);

        // First evaluation arms the delayed re-check.
        let ctx = evaluate(&grid, index, PhysicsArgs::default());
        assert!(ctx.scheduled_updates().is_empty());
        let checks = ctx.scheduled_checks();
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].args.revert_to, BlockId::DOOR_CLOSED);
        assert!(checks[0].args.delay > 0);

        // Re-evaluation with the armed args produces the revert.
        let ctx = evaluate(&grid, index, checks[0].args);
        let updates = ctx.scheduled_updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].block, BlockId::DOOR_CLOSED);
    }

    #[test]
    fn mist_eventually_dissipates() {
        let pos = IVec3::new(1, 1, 1);
        let (grid, index) = grid_with(pos, BlockId::MIST);

        let armed = {
            let ctx = evaluate(&grid, index, PhysicsArgs::default());
            assert_eq!(ctx.scheduled_checks().len(), 1);
            ctx.scheduled_checks()[0].args
        };
        assert!(armed.dissipate_chance > 0);

        // The roll is random; it either dissipates now or re-arms.
        for _ in 0..1000 {
            let ctx = evaluate(&grid, index, armed);
            if let Some(update) = ctx.scheduled_updates().first() {
                assert_eq!(update.block, BlockId::AIR);
                return;
            }
            assert_eq!(ctx.scheduled_checks().len(), 1);
        }
        panic!("mist never dissipated in 1000 rolls");
    }
}
