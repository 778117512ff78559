//! Pointer trajectory synthesis.
//!
//! A move is planned as an ordered list of screen-space stops. Straight mode
//! is a fixed-resolution linear interpolation ending exactly on the requested
//! point. Humanized mode perturbs a waypoint near the end of the straight
//! path and replaces the line with two bezier segments sampled under an
//! ease-in-out profile, so the cursor accelerates, drifts, and settles the
//! way a hand-driven mouse does. Trajectories are ephemeral: built for one
//! move, executed, discarded.

use rand::Rng;
use serde::Deserialize;

/// A point in absolute screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn distance_to(&self, other: Point) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }
}

/// One cursor move request. A humanized move with `width` and `height`
/// present samples its destination uniformly inside the rectangle; a
/// straight move always lands on the exact point, rectangle or not.
#[derive(Debug, Clone, Deserialize)]
pub struct MoveRequest {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub width: Option<f64>,
    #[serde(default)]
    pub height: Option<f64>,
    #[serde(default)]
    pub straight: bool,
}

/// Motion speed profile handed to the execution capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedProfile {
    /// Direct placement: fast constant speed.
    Straight,
    /// Emulated human movement: slow.
    Humanized,
}

impl SpeedProfile {
    /// Cursor speed in pixels per second.
    pub fn pixels_per_second(&self) -> f64 {
        match self {
            SpeedProfile::Straight => 1000.0,
            SpeedProfile::Humanized => 30.0,
        }
    }
}

/// A planned pointer move.
#[derive(Debug, Clone)]
pub struct Trajectory {
    pub stops: Vec<Point>,
    pub speed: SpeedProfile,
}

/// Distance between interpolated stops, in pixels.
const STOP_RESOLUTION: f64 = 2.0;

/// Where along the straight path the deviation waypoint sits.
const DEVIATION_FRACTION: f64 = 0.875;

/// Independent per-axis bound on the deviation waypoint offset.
const DEVIATION_NOISE: f64 = 75.0;

/// Plan a trajectory from `from` to the request's destination.
pub fn plan<R: Rng>(from: Point, request: &MoveRequest, rng: &mut R) -> Trajectory {
    // Straight mode is exact placement: any supplied rectangle is ignored.
    if request.straight {
        let destination = Point {
            x: request.x,
            y: request.y,
        };
        return Trajectory {
            stops: straight_to(from, destination),
            speed: SpeedProfile::Straight,
        };
    }

    let destination = match (request.width, request.height) {
        (Some(width), Some(height)) => Point {
            x: request.x + rng.random_range(0.0..=width),
            y: request.y + rng.random_range(0.0..=height),
        },
        _ => Point {
            x: request.x,
            y: request.y,
        },
    };

    let base = straight_to(from, destination);
    let pivot = base[((base.len() as f64 * DEVIATION_FRACTION) as usize).min(base.len() - 1)];
    let deviation = Point {
        x: pivot.x + rng.random_range(-DEVIATION_NOISE..DEVIATION_NOISE),
        y: pivot.y + rng.random_range(-DEVIATION_NOISE..DEVIATION_NOISE),
    };

    let mut stops = curve(from, deviation, rng);
    stops.extend(curve(deviation, destination, rng));

    Trajectory {
        stops,
        speed: SpeedProfile::Humanized,
    }
}

/// Linear interpolation at fixed resolution. Always ends exactly on `to`.
pub fn straight_to(from: Point, to: Point) -> Vec<Point> {
    let steps = (from.distance_to(to) / STOP_RESOLUTION).ceil().max(1.0) as usize;
    (0..=steps)
        .map(|i| {
            let t = i as f64 / steps as f64;
            Point {
                x: from.x + (to.x - from.x) * t,
                y: from.y + (to.y - from.y) * t,
            }
        })
        .collect()
}

/// Cubic bezier segment with randomized control points, sampled under a
/// smoothstep easing so stop spacing mimics acceleration and deceleration.
/// The segment ends exactly on `to` (the final sample is the curve at t=1).
fn curve<R: Rng>(from: Point, to: Point, rng: &mut R) -> Vec<Point> {
    let dist = from.distance_to(to);
    let spread = (dist * 0.25).max(1.0);

    let control = |anchor: f64, delta: f64, rng: &mut R| anchor + delta + rng.random_range(-spread..spread);
    let c1 = Point {
        x: control(from.x, (to.x - from.x) / 3.0, rng),
        y: control(from.y, (to.y - from.y) / 3.0, rng),
    };
    let c2 = Point {
        x: control(from.x, (to.x - from.x) * 2.0 / 3.0, rng),
        y: control(from.y, (to.y - from.y) * 2.0 / 3.0, rng),
    };

    let steps = (dist / STOP_RESOLUTION).ceil().max(2.0) as usize;
    (0..=steps)
        .map(|i| {
            let t = i as f64 / steps as f64;
            // Ease in and out: slow near the endpoints, fast in the middle.
            let eased = t * t * (3.0 - 2.0 * t);
            bezier(from, c1, c2, to, eased)
        })
        .collect()
}

fn bezier(p0: Point, p1: Point, p2: Point, p3: Point, t: f64) -> Point {
    let u = 1.0 - t;
    let (b0, b1, b2, b3) = (u * u * u, 3.0 * u * u * t, 3.0 * u * t * t, t * t * t);
    Point {
        x: b0 * p0.x + b1 * p1.x + b2 * p2.x + b3 * p3.x,
        y: b0 * p0.y + b1 * p1.y + b2 * p2.y + b3 * p3.y,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn request(x: f64, y: f64, rect: Option<(f64, f64)>, straight: bool) -> MoveRequest {
        MoveRequest {
            x,
            y,
            width: rect.map(|(w, _)| w),
            height: rect.map(|(_, h)| h),
            straight,
        }
    }

    #[test]
    fn straight_move_ends_exactly_on_the_input_point() {
        let mut rng = StdRng::seed_from_u64(7);
        let from = Point { x: 10.0, y: 10.0 };
        let trajectory = plan(from, &request(500.0, 300.0, None, true), &mut rng);

        let last = *trajectory.stops.last().unwrap();
        assert_eq!(last, Point { x: 500.0, y: 300.0 });
        assert_eq!(trajectory.speed, SpeedProfile::Straight);
    }

    #[test]
    fn straight_move_ignores_a_supplied_rectangle() {
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let trajectory = plan(
                Point { x: 0.0, y: 0.0 },
                &request(100.0, 200.0, Some((80.0, 40.0)), true),
                &mut rng,
            );
            let last = *trajectory.stops.last().unwrap();
            assert_eq!(last, Point { x: 100.0, y: 200.0 });
        }
    }

    #[test]
    fn straight_path_starts_at_the_current_position() {
        let from = Point { x: 3.0, y: 4.0 };
        let stops = straight_to(from, Point { x: 100.0, y: 40.0 });
        assert_eq!(stops[0], from);
    }

    #[test]
    fn rect_destination_is_sampled_within_bounds() {
        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            let trajectory = plan(
                Point { x: 0.0, y: 0.0 },
                &request(100.0, 200.0, Some((80.0, 40.0)), false),
                &mut rng,
            );

            let last = *trajectory.stops.last().unwrap();
            assert!((100.0..=180.0).contains(&last.x), "x out of rect: {}", last.x);
            assert!((200.0..=240.0).contains(&last.y), "y out of rect: {}", last.y);
        }
    }

    #[test]
    fn humanized_move_uses_the_slow_profile() {
        let mut rng = StdRng::seed_from_u64(1);
        let trajectory = plan(
            Point { x: 0.0, y: 0.0 },
            &request(400.0, 400.0, None, false),
            &mut rng,
        );
        assert_eq!(trajectory.speed, SpeedProfile::Humanized);
        // Two concatenated curve segments.
        assert!(trajectory.stops.len() >= 4);
    }

    #[test]
    fn humanized_move_still_ends_on_the_sampled_destination() {
        let mut rng = StdRng::seed_from_u64(11);
        let trajectory = plan(
            Point { x: 50.0, y: 50.0 },
            &request(600.0, 100.0, None, false),
            &mut rng,
        );
        let last = *trajectory.stops.last().unwrap();
        assert!((last.x - 600.0).abs() < 1e-9);
        assert!((last.y - 100.0).abs() < 1e-9);
    }

    #[test]
    fn zero_length_move_yields_a_valid_trajectory() {
        let from = Point { x: 20.0, y: 20.0 };
        let stops = straight_to(from, from);
        assert!(!stops.is_empty());
        assert_eq!(*stops.last().unwrap(), from);
    }
}
