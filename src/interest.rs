use std::num::NonZeroU8;
use std::{fmt, ops};

/// Interest used in registering an fd with the event loop.
///
/// `Interest` describes which readiness classes the loop should monitor a
/// file descriptor for. Registering a descriptor with [`EventLoop::add_io`]
/// using [readable] interest and having it become writable produces no
/// dispatch.
///
/// The size of `Option<Interest>` is identical to `Interest` itself.
///
/// [`EventLoop::add_io`]: crate::EventLoop::add_io
/// [readable]: Interest::READABLE
#[derive(Copy, PartialEq, Eq, Clone, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Interest(NonZeroU8);

// These must be unique bits.
const READABLE: u8 = 0b01;
const WRITABLE: u8 = 0b10;

impl Interest {
    /// Returns `Interest` representing readable interest.
    pub const READABLE: Interest = Interest(unsafe { NonZeroU8::new_unchecked(READABLE) });

    /// Returns `Interest` representing writable interest.
    pub const WRITABLE: Interest = Interest(unsafe { NonZeroU8::new_unchecked(WRITABLE) });

    /// Add together two `Interest`s.
    ///
    /// This does the same thing as the `BitOr` implementation, but is a
    /// constant function.
    ///
    /// ```
    /// use evio::Interest;
    ///
    /// const INTEREST: Interest = Interest::READABLE.add(Interest::WRITABLE);
    /// # fn silent_dead_code_warning(_: Interest) { }
    /// # silent_dead_code_warning(INTEREST)
    /// ```
    #[allow(clippy::should_implement_trait)]
    pub const fn add(self, other: Interest) -> Interest {
        Interest(unsafe { NonZeroU8::new_unchecked(self.0.get() | other.0.get()) })
    }

    /// Removes `other` interest from `self`.
    ///
    /// Returns `None` if the set would be empty after removing.
    pub fn remove(self, other: Interest) -> Option<Interest> {
        NonZeroU8::new(self.0.get() & !other.0.get()).map(Interest)
    }

    /// Returns true if the value includes readable interest.
    pub const fn is_readable(self) -> bool {
        (self.0.get() & READABLE) != 0
    }

    /// Returns true if the value includes writable interest.
    pub const fn is_writable(self) -> bool {
        (self.0.get() & WRITABLE) != 0
    }
}

impl ops::BitOr for Interest {
    type Output = Self;

    #[inline]
    fn bitor(self, other: Self) -> Self {
        self.add(other)
    }
}

impl ops::BitOrAssign for Interest {
    #[inline]
    fn bitor_assign(&mut self, other: Self) {
        self.0 = (*self | other).0;
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut one = false;
        if self.is_readable() {
            write!(fmt, "READABLE")?;
            one = true
        }
        if self.is_writable() {
            if one {
                write!(fmt, " | ")?
            }
            write!(fmt, "WRITABLE")?;
            one = true
        }
        debug_assert!(one, "printing empty interest");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Interest;

    #[test]
    fn add_and_remove() {
        let both = Interest::READABLE | Interest::WRITABLE;
        assert!(both.is_readable());
        assert!(both.is_writable());

        let read = both.remove(Interest::WRITABLE).unwrap();
        assert!(read.is_readable());
        assert!(!read.is_writable());

        assert!(read.remove(Interest::READABLE).is_none());
        // Removing an absent bit leaves the rest untouched.
        assert_eq!(read.remove(Interest::WRITABLE), Some(read));
    }

    #[test]
    fn option_size() {
        use std::mem::size_of;
        assert_eq!(size_of::<Option<Interest>>(), size_of::<Interest>());
    }
}
