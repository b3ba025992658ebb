// Common traits for spaces.

use rand::Rng;

/// A trait implemented by all spaces.
/// Element is the value type that lives in the space (e.g., u32 for Discrete,
/// or [T; N] for a fixed-size BoxSpace).
pub trait Space {
    type Element;

    /// Draw a sample from the space using the provided RNG.
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Self::Element;

    /// Return true if the given element is a valid member of the space.
    fn contains(&self, elem: &Self::Element) -> bool;

    /// Return true if `elem` has the shape this space declares, regardless of bounds.
    ///
    /// Fixed-size element types can never disagree, so the default accepts everything.
    fn has_shape(&self, _elem: &Self::Element) -> bool { true }
}

/// A scalar that can be stored losslessly in one 64-bit lane.
///
/// Floats are stored by bit pattern so a round trip is bit-exact, NaN payloads included.
pub trait Lane: Copy {
    fn to_lane(self) -> u64;
    fn from_lane(lane: u64) -> Self;
}

macro_rules! impl_lane_bits {
    ($($t:ty => $bits:ty),* $(,)?) => {
        $(
            impl Lane for $t {
                fn to_lane(self) -> u64 { self.to_bits() as u64 }
                fn from_lane(lane: u64) -> Self { <$t>::from_bits(lane as $bits) }
            }
        )*
    };
}

macro_rules! impl_lane_int {
    ($($t:ty => $unsigned:ty),* $(,)?) => {
        $(
            impl Lane for $t {
                fn to_lane(self) -> u64 { self as $unsigned as u64 }
                fn from_lane(lane: u64) -> Self { lane as $unsigned as $t }
            }
        )*
    };
}

impl_lane_bits!(f32 => u32, f64 => u64);
impl_lane_int!(u8 => u8, u16 => u16, u32 => u32, u64 => u64, i8 => u8, i16 => u16, i32 => u32, i64 => u64);

/// A space whose elements have a fixed number of numeric lanes.
///
/// This is what lets observations travel through the shared result buffer
/// instead of being moved through a channel.
pub trait FlatSpace: Space {
    /// Number of lanes one element occupies.
    fn flat_dim(&self) -> usize;

    /// Write `elem` into `out`, which holds exactly `flat_dim()` lanes.
    fn flatten_into(&self, elem: &Self::Element, out: &mut [u64]);

    /// Rebuild an element from exactly `flat_dim()` lanes.
    fn unflatten(&self, lanes: &[u64]) -> Self::Element;
}
