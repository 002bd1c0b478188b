//! Fixed-point arena geometry
//!
//! Positions are integers in tenths of an arena unit. All comparisons that
//! would need a square root are done on squared values so results never
//! depend on floating point.

use serde::{Deserialize, Serialize};

/// Arena side length in tenths. Valid coordinates are `0..=ARENA_SIZE`.
pub const ARENA_SIZE: i32 = 1000;

/// tan(22.5°) scaled by 1000, used to bucket a vector into an octant
const OCTANT_SLOPE_MILLI: i64 = 414;

/// 1/sqrt(2) scaled by 1000, applied to diagonal steps
const DIAGONAL_MILLI: i32 = 707;

/// Position or offset in tenths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: i32,
    pub y: i32,
}

impl Vec2 {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn sub(self, other: Self) -> Self {
        Self::new(self.x - other.x, self.y - other.y)
    }

    pub fn add(self, other: Self) -> Self {
        Self::new(self.x + other.x, self.y + other.y)
    }

    pub fn length_sq(self) -> i64 {
        let x = self.x as i64;
        let y = self.y as i64;
        x * x + y * y
    }

    /// Squared distance between two points
    pub fn distance_sq(self, other: Self) -> i64 {
        other.sub(self).length_sq()
    }

    /// Distance rounded down to whole tenths
    pub fn distance(self, other: Self) -> i32 {
        isqrt(self.distance_sq(other)) as i32
    }

    /// Clamp into the arena square
    pub fn clamp_to_arena(self) -> Self {
        Self::new(self.x.clamp(0, ARENA_SIZE), self.y.clamp(0, ARENA_SIZE))
    }

    pub fn in_arena(self) -> bool {
        (0..=ARENA_SIZE).contains(&self.x) && (0..=ARENA_SIZE).contains(&self.y)
    }

    /// Offset of `distance` tenths along `dir`. Diagonals are scaled so the
    /// step length stays close to `distance`.
    pub fn step(dir: Direction, distance: i32) -> Self {
        let (dx, dy) = dir.unit();
        if dx != 0 && dy != 0 {
            let d = distance * DIAGONAL_MILLI / 1000;
            Self::new(dx * d, dy * d)
        } else {
            Self::new(dx * distance, dy * distance)
        }
    }
}

/// One of the eight compass directions. `N` points toward +y.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    N,
    Ne,
    E,
    Se,
    S,
    Sw,
    W,
    Nw,
}

impl Direction {
    pub const ALL: [Direction; 8] = [
        Direction::N,
        Direction::Ne,
        Direction::E,
        Direction::Se,
        Direction::S,
        Direction::Sw,
        Direction::W,
        Direction::Nw,
    ];

    /// Integer unit components (not normalised on diagonals)
    pub fn unit(self) -> (i32, i32) {
        match self {
            Direction::N => (0, 1),
            Direction::Ne => (1, 1),
            Direction::E => (1, 0),
            Direction::Se => (1, -1),
            Direction::S => (0, -1),
            Direction::Sw => (-1, -1),
            Direction::W => (-1, 0),
            Direction::Nw => (-1, 1),
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::N => Direction::S,
            Direction::Ne => Direction::Sw,
            Direction::E => Direction::W,
            Direction::Se => Direction::Nw,
            Direction::S => Direction::N,
            Direction::Sw => Direction::Ne,
            Direction::W => Direction::E,
            Direction::Nw => Direction::Se,
        }
    }

    /// Nearest compass direction for a vector, `None` for the zero vector
    pub fn from_vector(v: Vec2) -> Option<Self> {
        if v.x == 0 && v.y == 0 {
            return None;
        }
        let ax = (v.x as i64).abs();
        let ay = (v.y as i64).abs();
        let sx = v.x.signum();
        let sy = v.y.signum();

        let (dx, dy) = if ay * 1000 <= ax * OCTANT_SLOPE_MILLI {
            (sx, 0)
        } else if ax * 1000 <= ay * OCTANT_SLOPE_MILLI {
            (0, sy)
        } else {
            (sx, sy)
        };

        Self::ALL.iter().copied().find(|d| d.unit() == (dx, dy))
    }
}

/// Whether `offset` lies within the 120° arc centred on `facing`, i.e. the
/// cosine between them is at least 0.5. The zero offset counts as inside.
pub fn within_facing_arc(facing: Direction, offset: Vec2) -> bool {
    if offset.x == 0 && offset.y == 0 {
        return true;
    }
    let (fx, fy) = facing.unit();
    let dot = fx as i64 * offset.x as i64 + fy as i64 * offset.y as i64;
    if dot <= 0 {
        return false;
    }
    // dot / (|f| |v|) >= 1/2  <=>  4 dot^2 >= |f|^2 |v|^2
    let facing_len_sq = (fx * fx + fy * fy) as i64;
    4 * dot * dot >= facing_len_sq * offset.length_sq()
}

/// Integer square root, rounded down
pub fn isqrt(n: i64) -> i64 {
    if n <= 0 {
        return 0;
    }
    let mut x = (n as f64).sqrt() as i64;
    while x * x > n {
        x -= 1;
    }
    while (x + 1) * (x + 1) <= n {
        x += 1;
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_from_vector() {
        assert_eq!(Direction::from_vector(Vec2::new(10, 0)), Some(Direction::E));
        assert_eq!(Direction::from_vector(Vec2::new(10, 3)), Some(Direction::E));
        assert_eq!(Direction::from_vector(Vec2::new(10, 10)), Some(Direction::Ne));
        assert_eq!(Direction::from_vector(Vec2::new(-2, -50)), Some(Direction::S));
        assert_eq!(Direction::from_vector(Vec2::new(-30, 25)), Some(Direction::Nw));
        assert_eq!(Direction::from_vector(Vec2::new(0, 0)), None);
    }

    #[test]
    fn test_step_and_clamp() {
        let p = Vec2::new(995, 500).add(Vec2::step(Direction::E, 30));
        assert_eq!(p, Vec2::new(1025, 500));
        assert_eq!(p.clamp_to_arena(), Vec2::new(1000, 500));

        let diag = Vec2::step(Direction::Sw, 100);
        assert_eq!(diag, Vec2::new(-70, -70));
    }

    #[test]
    fn test_facing_arc() {
        // Straight ahead, 45° off, 90° off, behind
        assert!(within_facing_arc(Direction::E, Vec2::new(50, 0)));
        assert!(within_facing_arc(Direction::E, Vec2::new(50, 50)));
        assert!(!within_facing_arc(Direction::E, Vec2::new(0, 50)));
        assert!(!within_facing_arc(Direction::E, Vec2::new(-50, 0)));
        // Exactly 60° off is still inside
        assert!(within_facing_arc(Direction::N, Vec2::new(866, 500)));
        assert!(!within_facing_arc(Direction::N, Vec2::new(870, 490)));
        assert!(within_facing_arc(Direction::Ne, Vec2::new(10, 0)));
    }

    #[test]
    fn test_distance() {
        let a = Vec2::new(0, 0);
        let b = Vec2::new(30, 40);
        assert_eq!(a.distance_sq(b), 2500);
        assert_eq!(a.distance(b), 50);
        assert_eq!(isqrt(99), 9);
    }
}
