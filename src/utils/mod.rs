//! Various utilities functions and types

mod geometry;
mod serial;
pub mod user_data;

pub use self::geometry::{Buffer, Coordinate, Logical, Point, Rectangle, Size, Transform};
pub use self::serial::{Serial, SerialCounter};

/// Trait for objects that can be destroyed and checked for liveness
pub trait IsAlive {
    /// Check if the object is still alive
    fn alive(&self) -> bool;
}

impl<T: IsAlive> IsAlive for &T {
    #[inline]
    fn alive(&self) -> bool {
        IsAlive::alive(*self)
    }
}
