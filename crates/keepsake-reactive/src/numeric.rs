//! Counter helpers for numeric observable values.

use crate::value::Reactive;

/// Numbers an observable value can step. Integer steps saturate at the
/// type's bounds.
pub trait Numeric: Copy {
    /// The unit step.
    const ONE: Self;

    /// `self + rhs`.
    #[must_use]
    fn plus(self, rhs: Self) -> Self;

    /// `self - rhs`.
    #[must_use]
    fn minus(self, rhs: Self) -> Self;
}

macro_rules! saturating_numeric {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Numeric for $ty {
                const ONE: Self = 1;

                fn plus(self, rhs: Self) -> Self {
                    self.saturating_add(rhs)
                }

                fn minus(self, rhs: Self) -> Self {
                    self.saturating_sub(rhs)
                }
            }
        )*
    };
}

saturating_numeric!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);

macro_rules! float_numeric {
    ($($ty:ty),* $(,)?) => {
        $(
            #[allow(clippy::arithmetic_side_effects)]
            impl Numeric for $ty {
                const ONE: Self = 1.0;

                fn plus(self, rhs: Self) -> Self {
                    self + rhs
                }

                fn minus(self, rhs: Self) -> Self {
                    self - rhs
                }
            }
        )*
    };
}

float_numeric!(f32, f64);

impl<T> Reactive<T>
where
    T: Numeric + PartialEq + Send + Sync + 'static,
{
    /// Add one.
    pub fn increment(&self) {
        self.update(|current| current.plus(T::ONE));
    }

    /// Subtract one.
    pub fn decrement(&self) {
        self.update(|current| current.minus(T::ONE));
    }

    /// Add `delta`.
    pub fn add(&self, delta: T) {
        self.update(|current| current.plus(delta));
    }
}
