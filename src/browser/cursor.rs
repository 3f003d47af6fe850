//! Human-like cursor motion.
//!
//! Paths are cubic Bezier curves with a perpendicular bend, eased step
//! timing and an occasional overshoot-and-correct tail. Every motion step
//! moves the real mouse and the in-page ghost cursor; every second step is
//! published to operators.

use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::input::{
    DispatchMouseEventParams, DispatchMouseEventType, MouseButton,
};
use chromiumoxide::Page;
use parking_lot::Mutex;
use rand::Rng;
use tokio::time::sleep;
use tracing::debug;

use crate::browser::eval_value;
use crate::errors::AgentError;
use crate::events::{AgentEvent, EventBus};

const CURSOR_JS: &str = include_str!("js/cursor.js");

/// A fully planned motion: points to visit and the delay between them.
#[derive(Debug, Clone)]
pub struct MotionPlan {
    pub points: Vec<(f64, f64)>,
    pub step_delay: Duration,
}

fn ease_in_out_cubic(t: f64) -> f64 {
    if t < 0.5 {
        4.0 * t * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
    }
}

fn bezier(p0: (f64, f64), c1: (f64, f64), c2: (f64, f64), p3: (f64, f64), t: f64) -> (f64, f64) {
    let u = 1.0 - t;
    let x = u.powi(3) * p0.0
        + 3.0 * u * u * t * c1.0
        + 3.0 * u * t * t * c2.0
        + t.powi(3) * p3.0;
    let y = u.powi(3) * p0.1
        + 3.0 * u * u * t * c1.1
        + 3.0 * u * t * t * c2.1
        + t.powi(3) * p3.1;
    (x, y)
}

fn curve_points(from: (f64, f64), to: (f64, f64), bend: f64, steps: usize) -> Vec<(f64, f64)> {
    let dx = to.0 - from.0;
    let dy = to.1 - from.1;
    let dist = (dx * dx + dy * dy).sqrt().max(1.0);
    // Unit perpendicular to the straight line.
    let (px, py) = (-dy / dist, dx / dist);
    let c1 = (
        from.0 + dx / 3.0 + px * bend,
        from.1 + dy / 3.0 + py * bend,
    );
    let c2 = (
        from.0 + dx * 2.0 / 3.0 + px * bend,
        from.1 + dy * 2.0 / 3.0 + py * bend,
    );
    (1..=steps)
        .map(|i| {
            let t = ease_in_out_cubic(i as f64 / steps as f64);
            bezier(from, c1, c2, to, t)
        })
        .collect()
}

/// Plan a motion from `from` to `to`. Pure so it can be tested with a seeded
/// generator.
pub fn plan_path(from: (f64, f64), to: (f64, f64), rng: &mut impl Rng) -> MotionPlan {
    let dx = to.0 - from.0;
    let dy = to.1 - from.1;
    let dist = (dx * dx + dy * dy).sqrt();
    if dist < 1.0 {
        return MotionPlan {
            points: vec![to],
            step_delay: Duration::from_millis(8),
        };
    }

    let sign = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
    let bend = (dist * 0.2).clamp(16.0, 130.0) * sign;
    let steps = ((dist / 14.0).round() as usize).clamp(12, 64);
    let duration_ms = (170.0 + 0.95 * dist).clamp(220.0, 960.0);

    let overshoot = dist > 140.0 && rng.gen_bool(0.32);
    let mut points = if overshoot {
        let extra = rng.gen_range(8.0..=26.0);
        let over = (to.0 + dx / dist * extra, to.1 + dy / dist * extra);
        let mut pts = curve_points(from, over, bend, steps);
        // Short straight correction back onto the target.
        for i in 1..=4 {
            let t = i as f64 / 4.0;
            pts.push((over.0 + (to.0 - over.0) * t, over.1 + (to.1 - over.1) * t));
        }
        pts
    } else {
        curve_points(from, to, bend, steps)
    };
    if let Some(last) = points.last_mut() {
        *last = to;
    }

    let step_delay = Duration::from_micros((duration_ms * 1000.0 / points.len() as f64) as u64);
    MotionPlan { points, step_delay }
}

/// Drives the real mouse and the ghost-cursor overlay on the active page.
pub struct CursorDriver {
    pos: Mutex<(f64, f64)>,
    events: EventBus,
    viewport: (u32, u32),
}

impl CursorDriver {
    pub fn new(events: EventBus, viewport: (u32, u32)) -> Self {
        Self {
            pos: Mutex::new((viewport.0 as f64 / 2.0, viewport.1 as f64 / 2.0)),
            events,
            viewport,
        }
    }

    pub fn position(&self) -> (f64, f64) {
        *self.pos.lock()
    }

    /// Inject the ghost cursor and park it mid-screen. Called on every new
    /// active page.
    pub async fn init(&self, page: &Page) -> Result<(), AgentError> {
        eval_value(page, CURSOR_JS).await?;
        let center = (
            self.viewport.0 as f64 / 2.0,
            self.viewport.1 as f64 / 2.0,
        );
        *self.pos.lock() = center;
        self.update_ghost(page, center.0, center.1).await;
        self.publish(center.0, center.1);
        Ok(())
    }

    /// Move along a human-like path to the target.
    pub async fn move_to(&self, page: &Page, x: f64, y: f64) -> Result<(), AgentError> {
        let plan = {
            let mut rng = rand::thread_rng();
            plan_path(self.position(), (x, y), &mut rng)
        };
        debug!(steps = plan.points.len(), "cursor motion planned");
        for (idx, (px, py)) in plan.points.iter().copied().enumerate() {
            self.dispatch_move(page, px, py).await?;
            self.update_ghost(page, px, py).await;
            *self.pos.lock() = (px, py);
            if idx % 2 == 1 {
                self.publish(px, py);
            }
            sleep(plan.step_delay).await;
        }
        self.publish(x, y);
        Ok(())
    }

    /// Move to the point and fire a down/up pair with ripple feedback.
    pub async fn click_at(&self, page: &Page, x: f64, y: f64) -> Result<(), AgentError> {
        self.move_to(page, x, y).await?;
        let pause_ms: u64 = rand::thread_rng().gen_range(35..=95);

        let _ = eval_value(
            page,
            &format!("window.__wfCursor && window.__wfCursor.down({x:.1},{y:.1})"),
        )
        .await;
        let down = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MousePressed)
            .x(x)
            .y(y)
            .button(MouseButton::Left)
            .click_count(1)
            .build()
            .map_err(AgentError::perception)?;
        page.execute(down)
            .await
            .map_err(|err| AgentError::perception(err.to_string()))?;

        sleep(Duration::from_millis(pause_ms)).await;

        let _ = eval_value(
            page,
            &format!("window.__wfCursor && window.__wfCursor.up({x:.1},{y:.1})"),
        )
        .await;
        let up = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseReleased)
            .x(x)
            .y(y)
            .button(MouseButton::Left)
            .click_count(1)
            .build()
            .map_err(AgentError::perception)?;
        page.execute(up)
            .await
            .map_err(|err| AgentError::perception(err.to_string()))?;
        Ok(())
    }

    /// Small random wander so scrolling reads as human.
    pub async fn nudge(&self, page: &Page) -> Result<(), AgentError> {
        let (dx, dy) = {
            let mut rng = rand::thread_rng();
            (rng.gen_range(-24.0..=24.0), rng.gen_range(-18.0..=18.0))
        };
        let (x, y) = self.position();
        let nx = (x + dx).clamp(4.0, self.viewport.0 as f64 - 4.0);
        let ny = (y + dy).clamp(4.0, self.viewport.1 as f64 - 4.0);
        self.move_to(page, nx, ny).await
    }

    /// Dispatch a wheel event at the current position.
    pub async fn wheel(&self, page: &Page, delta_y: f64) -> Result<(), AgentError> {
        let (x, y) = self.position();
        let params = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseWheel)
            .x(x)
            .y(y)
            .delta_x(0.0)
            .delta_y(delta_y)
            .build()
            .map_err(AgentError::perception)?;
        page.execute(params)
            .await
            .map_err(|err| AgentError::perception(err.to_string()))?;
        Ok(())
    }

    async fn dispatch_move(&self, page: &Page, x: f64, y: f64) -> Result<(), AgentError> {
        let params = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseMoved)
            .x(x)
            .y(y)
            .build()
            .map_err(AgentError::perception)?;
        page.execute(params)
            .await
            .map_err(|err| AgentError::perception(err.to_string()))?;
        Ok(())
    }

    async fn update_ghost(&self, page: &Page, x: f64, y: f64) {
        let _ = eval_value(
            page,
            &format!("window.__wfCursor && window.__wfCursor.move({x:.1},{y:.1})"),
        )
        .await;
    }

    fn publish(&self, x: f64, y: f64) {
        self.events.publish(AgentEvent::Cursor {
            x,
            y,
            viewport_width: self.viewport.0,
            viewport_height: self.viewport.1,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn path_terminates_at_target() {
        let mut rng = StdRng::seed_from_u64(7);
        let plan = plan_path((0.0, 0.0), (400.0, 120.0), &mut rng);
        let last = *plan.points.last().unwrap();
        assert_eq!(last, (400.0, 120.0));
    }

    #[test]
    fn step_count_respects_clamp() {
        let mut rng = StdRng::seed_from_u64(1);
        let short = plan_path((0.0, 0.0), (10.0, 10.0), &mut rng);
        assert!(short.points.len() >= 12);
        let long = plan_path((0.0, 0.0), (4000.0, 0.0), &mut rng);
        // 64 curve steps plus at most the 4-step correction tail.
        assert!(long.points.len() <= 68);
    }

    #[test]
    fn duration_stays_in_bounds() {
        let mut rng = StdRng::seed_from_u64(3);
        for target in [(5.0, 0.0), (300.0, 80.0), (3000.0, 900.0)] {
            let plan = plan_path((0.0, 0.0), target, &mut rng);
            let total = plan.step_delay * plan.points.len() as u32;
            assert!(total >= Duration::from_millis(200), "total {total:?}");
            assert!(total <= Duration::from_millis(1000), "total {total:?}");
        }
    }

    #[test]
    fn zero_distance_is_a_single_point() {
        let mut rng = StdRng::seed_from_u64(9);
        let plan = plan_path((50.0, 50.0), (50.0, 50.0), &mut rng);
        assert_eq!(plan.points.len(), 1);
    }
}
