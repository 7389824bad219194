use astral_core::ServerTime;
use astral_data::CorrectTbl;

use crate::ActiveEntity;

/// Knockback resistance regenerates at 15 per second of real time.
const KNOCKBACK_REGEN_PER_MICRO: f64 = 0.015 / 1000.0;

impl ActiveEntity {
    pub fn knockback_resist(&self) -> f32 {
        self.lock().knockback_resist
    }

    /// Brings the knockback value up to date for `now`. Reaching the
    /// maximum clears the countdown tick.
    pub fn refresh_knockback(&self, now: ServerTime) {
        let mut state = self.lock();
        let kb_max = f32::from(
            state
                .correct_values
                .get(&CorrectTbl::KnockbackResist)
                .copied()
                .unwrap_or(0),
        );

        let kb = state.knockback_resist;
        if kb < kb_max {
            let elapsed = now.since(state.knockback_ticks);
            let mut kb = kb + (elapsed as f64 * KNOCKBACK_REGEN_PER_MICRO) as f32;
            kb = kb.clamp(0.0, kb_max);

            state.knockback_resist = kb;
            if kb == kb_max {
                state.knockback_ticks = ServerTime::ZERO;
            }
        }
    }

    /// Refreshes, then consumes knockback resistance. Returns the value
    /// after the decrease, floored at zero.
    pub fn update_knockback(&self, now: ServerTime, decrease: f32) -> f32 {
        self.refresh_knockback(now);

        let mut state = self.lock();
        let mut kb = state.knockback_resist;
        if kb > 0.0 {
            kb = (kb - decrease).max(0.0);
            state.knockback_resist = kb;
            state.knockback_ticks = now;
        }

        kb
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use astral_core::EntityId;

    use super::*;
    use crate::EntityKind;

    fn entity_with_kb(kb: f32, max: i16) -> ActiveEntity {
        let e = ActiveEntity::new(EntityId(1), EntityKind::Character);
        let mut state = e.lock();
        state.knockback_resist = kb;
        state.knockback_ticks = ServerTime::ZERO;
        state.correct_values.insert(CorrectTbl::KnockbackResist, max);
        drop(state);
        e
    }

    #[test]
    fn regenerates_at_fifteen_per_second() {
        let e = entity_with_kb(10.0, 100);
        e.refresh_knockback(ServerTime(1_000_000));
        assert_relative_eq!(e.knockback_resist(), 25.0);
    }

    #[test]
    fn clamps_at_max_and_clears_ticks() {
        let e = entity_with_kb(10.0, 100);
        e.refresh_knockback(ServerTime(6_000_000));
        assert_eq!(e.knockback_resist(), 100.0);
        assert_eq!(e.lock().knockback_ticks, ServerTime::ZERO);

        // Refreshing at max is a no-op.
        e.refresh_knockback(ServerTime(7_000_000));
        assert_eq!(e.knockback_resist(), 100.0);
    }

    #[test]
    fn update_consumes_and_records_tick() {
        let e = entity_with_kb(50.0, 100);
        let left = e.update_knockback(ServerTime(1_000_000), 40.0);
        // 50 + 15 regen - 40.
        assert_relative_eq!(left, 25.0);
        assert_eq!(e.lock().knockback_ticks, ServerTime(1_000_000));

        // Draining below zero floors at zero.
        let left = e.update_knockback(ServerTime(1_000_000), 500.0);
        assert_eq!(left, 0.0);
    }
}
