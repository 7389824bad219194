use astral_core::ServerTime;
use glam::Vec2;

use crate::ActiveEntity;

/// How long a plain move or rotate takes to arrive.
const MOVE_ARRIVAL_MICROS: u64 = 500_000;

impl ActiveEntity {
    /// Sets the destination from the current position. Dead entities do not
    /// move.
    pub fn move_to(&self, x: f32, y: f32, now: ServerTime) {
        let mut state = self.lock();
        if !state.alive {
            return;
        }

        let m = &mut state.motion;
        m.origin_x = m.current_x;
        m.origin_y = m.current_y;
        m.origin_rotation = m.current_rotation;
        m.origin_ticks = now;

        m.destination_x = x;
        m.destination_y = y;
        m.destination_ticks = now.plus_micros(MOVE_ARRIVAL_MICROS);
    }

    /// Moves a fixed distance directly toward or away from a target point,
    /// arriving at `end_time`.
    pub fn move_relative(
        &self,
        target_x: f32,
        target_y: f32,
        distance: f32,
        away: bool,
        now: ServerTime,
        end_time: ServerTime,
    ) {
        let mut state = self.lock();
        let m = &mut state.motion;
        let (x, y) = (m.current_x, m.current_y);

        let (dest_x, dest_y) = if target_x != x || target_y != y {
            let toward = Vec2::new(target_x - x, target_y - y).normalize();
            let offset = toward * distance;
            if away {
                (x - offset.x, y - offset.y)
            } else {
                (x + offset.x, y + offset.y)
            }
        } else {
            // Target is the current position; there is no direction to move.
            return;
        };

        m.origin_x = x;
        m.origin_y = y;
        m.origin_ticks = now;

        m.destination_x = dest_x;
        m.destination_y = dest_y;
        m.destination_ticks = end_time;
    }

    /// Sets the destination rotation from the current one. Dead entities do
    /// not rotate.
    pub fn rotate(&self, rotation: f32, now: ServerTime) {
        let mut state = self.lock();
        if !state.alive {
            return;
        }

        let m = &mut state.motion;
        m.origin_x = m.current_x;
        m.origin_y = m.current_y;
        m.origin_rotation = m.current_rotation;
        m.origin_ticks = now;

        m.destination_rotation = correct_rotation(rotation);
        m.destination_ticks = now.plus_micros(MOVE_ARRIVAL_MICROS);
    }

    /// Freezes the entity at its current position.
    pub fn stop(&self, now: ServerTime) {
        let mut state = self.lock();
        stop_motion(&mut state.motion, now);
    }

    pub fn is_moving(&self) -> bool {
        let state = self.lock();
        let m = &state.motion;
        m.current_x != m.destination_x || m.current_y != m.destination_y
    }

    pub fn is_rotating(&self) -> bool {
        let state = self.lock();
        let m = &state.motion;
        m.current_rotation != m.destination_rotation
    }

    /// Current (x, y, rotation) as of the last refresh.
    pub fn position(&self) -> (f32, f32, f32) {
        let state = self.lock();
        let m = &state.motion;
        (m.current_x, m.current_y, m.current_rotation)
    }

    /// Snaps the entity to a position, used at zone entry.
    pub fn place_at(&self, x: f32, y: f32, rotation: f32, now: ServerTime) {
        let mut state = self.lock();
        let m = &mut state.motion;
        m.current_x = x;
        m.current_y = y;
        m.current_rotation = rotation;
        drop(state);
        self.stop(now);
    }

    /// Distance from the current position to a point.
    pub fn distance(&self, x: f32, y: f32, squared: bool) -> f32 {
        let state = self.lock();
        let m = &state.motion;
        let d_squared = (m.current_x - x).powi(2) + (m.current_y - y).powi(2);
        if squared {
            d_squared
        } else {
            d_squared.sqrt()
        }
    }

    /// Interpolates the current position for `now`.
    ///
    /// Refreshing twice with the same `now` is a no-op: the result is a
    /// pure function of origin, destination, and time.
    pub fn refresh_current_position(&self, now: ServerTime) {
        let mut state = self.lock();
        if now == state.last_refresh {
            return;
        }
        state.last_refresh = now;

        let m = &mut state.motion;
        let x_diff = m.current_x != m.destination_x;
        let y_diff = m.current_y != m.destination_y;
        let rot_diff = m.current_rotation != m.destination_rotation;

        if !x_diff && !y_diff && !rot_diff {
            // Already up to date.
            return;
        }

        if now >= m.destination_ticks {
            m.current_x = m.destination_x;
            m.current_y = m.destination_y;
            m.current_rotation = m.destination_rotation;
            return;
        }

        let elapsed = now.since(m.origin_ticks);
        let total = m.destination_ticks.since(m.origin_ticks);
        if total == 0 {
            m.current_x = m.destination_x;
            m.current_y = m.destination_y;
            m.current_rotation = m.destination_rotation;
            return;
        }

        let prog = elapsed as f64 / total as f64;
        if x_diff || y_diff {
            m.current_x = (m.origin_x as f64 + prog * (m.destination_x - m.origin_x) as f64) as f32;
            m.current_y = (m.origin_y as f64 + prog * (m.destination_y - m.origin_y) as f64) as f32;
        }

        if rot_diff {
            // Bias both endpoints by pi so the interpolation runs over
            // 0..2pi instead of crossing the -pi/+pi seam.
            let origin_rot = m.origin_rotation + 3.14;
            let dest_rot = m.destination_rotation + 3.14;

            let new_rot = (origin_rot as f64 + prog * (dest_rot - origin_rot) as f64) as f32;
            m.current_rotation = correct_rotation(new_rot);
        }
    }
}

/// Collapses origin and destination into the current position. Shared with
/// the HP path, which stops an entity on death while already holding the
/// state lock.
pub(crate) fn stop_motion(m: &mut crate::Motion, now: ServerTime) {
    m.destination_x = m.current_x;
    m.destination_y = m.current_y;
    m.destination_rotation = m.current_rotation;
    m.destination_ticks = now;
    m.origin_x = m.current_x;
    m.origin_y = m.current_y;
    m.origin_rotation = m.current_rotation;
    m.origin_ticks = now;
}

/// Maps rotations just outside the client's accepted range back into it.
///
/// The thresholds are the client's own tolerance of +-3.16, not exactly pi.
/// Callers only ever hand in small excursions past the seam; large inputs
/// are not corrected to an equivalent angle.
pub fn correct_rotation(rot: f32) -> f32 {
    if rot > 3.16 {
        rot - 6.32
    } else if rot < -3.16 {
        -rot - 3.16
    } else {
        rot
    }
}

#[cfg(test)]
mod tests {
    use approx::{assert_relative_eq, assert_ulps_eq};
    use astral_core::EntityId;

    use super::*;
    use crate::EntityKind;

    fn entity() -> ActiveEntity {
        ActiveEntity::new(EntityId(1), EntityKind::Character)
    }

    #[test]
    fn move_interpolates_and_clamps() {
        let e = entity();
        e.move_to(1000.0, 0.0, ServerTime(0));

        e.refresh_current_position(ServerTime(250_000));
        let (x, _, _) = e.position();
        assert_relative_eq!(x, 500.0, epsilon = 0.1);

        e.refresh_current_position(ServerTime(500_000));
        let (x, y, _) = e.position();
        assert_eq!((x, y), (1000.0, 0.0));
        assert!(!e.is_moving());
    }

    #[test]
    fn refresh_is_idempotent_for_same_now() {
        let e = entity();
        e.move_to(100.0, 0.0, ServerTime(0));

        e.refresh_current_position(ServerTime(100_000));
        let first = e.position();
        e.refresh_current_position(ServerTime(100_000));
        assert_eq!(e.position(), first);
    }

    #[test]
    fn staged_refresh_matches_single_refresh() {
        let make = || {
            let e = entity();
            e.move_to(640.0, -480.0, ServerTime(0));
            e
        };

        let staged = make();
        staged.refresh_current_position(ServerTime(100_000));
        staged.refresh_current_position(ServerTime(350_000));

        let direct = make();
        direct.refresh_current_position(ServerTime(350_000));

        let (sx, sy, _) = staged.position();
        let (dx, dy, _) = direct.position();
        assert_ulps_eq!(sx, dx, max_ulps = 4);
        assert_ulps_eq!(sy, dy, max_ulps = 4);
    }

    #[test]
    fn dead_entities_do_not_move() {
        let e = entity();
        e.lock().alive = false;
        e.move_to(50.0, 50.0, ServerTime(0));
        e.refresh_current_position(ServerTime(1_000_000));
        assert_eq!(e.position(), (0.0, 0.0, 0.0));
    }

    #[test]
    fn move_relative_toward_and_away() {
        let e = entity();
        e.place_at(0.0, 0.0, 0.0, ServerTime(0));

        e.move_relative(30.0, 40.0, 5.0, false, ServerTime(0), ServerTime(1));
        e.refresh_current_position(ServerTime(2));
        let (x, y, _) = e.position();
        assert_relative_eq!(x, 3.0, epsilon = 1e-4);
        assert_relative_eq!(y, 4.0, epsilon = 1e-4);

        e.move_relative(30.0, 40.0, 5.0, true, ServerTime(10), ServerTime(11));
        e.refresh_current_position(ServerTime(12));
        let (x, y, _) = e.position();
        assert_relative_eq!(x, 0.0, epsilon = 1e-4);
        assert_relative_eq!(y, 0.0, epsilon = 1e-4);
    }

    #[test]
    fn move_relative_to_own_position_is_a_no_op() {
        let e = entity();
        e.place_at(7.0, 7.0, 0.0, ServerTime(0));
        e.move_relative(7.0, 7.0, 10.0, true, ServerTime(0), ServerTime(1));
        assert!(!e.is_moving());
    }

    #[test]
    fn rotation_crosses_the_seam_without_jumping() {
        let e = entity();
        e.place_at(0.0, 0.0, 3.0, ServerTime(0));
        e.rotate(-3.0, ServerTime(0));

        e.refresh_current_position(ServerTime(250_000));
        let (_, _, rot) = e.position();
        // Halfway between 3.0 and -3.0 going the short way through pi.
        assert!(rot > 3.0 || rot < -3.0, "rotation {rot} took the long way");
    }

    #[test]
    fn correct_rotation_is_idempotent() {
        for r in [-3.15, -1.0, 0.0, 2.5, 3.15, 3.2, -3.2] {
            let once = correct_rotation(r);
            assert_eq!(correct_rotation(once), once);
        }
    }

    #[test]
    fn stop_freezes_everything() {
        let e = entity();
        e.move_to(500.0, 500.0, ServerTime(0));
        e.refresh_current_position(ServerTime(250_000));
        e.stop(ServerTime(250_000));

        assert!(!e.is_moving());
        assert!(!e.is_rotating());
    }
}
