//! Small helper macros shared by the wire-protocol enums in
//! [`crate::protocol`] and the standard-interface constants in
//! [`crate::generator`].

/// Define a `repr(transparent)` wrapper over a raw integer with named
/// constants, behaving like a closed C-style enum but tolerant of unknown
/// values read off the wire.
macro_rules! raw_enum {
    (
        $(#[doc = $doc:literal])*
        #[repr($repr:ty)]
        $vis:vis enum $name:ident {
            $(
                $(#[$($variant_meta:meta)*])*
                $variant:ident = $value:expr
            ),* $(,)?
        }
    ) => {
        $(#[doc = $doc])*
        #[derive(Clone, Copy, PartialEq, Eq)]
        #[repr(transparent)]
        $vis struct $name(pub(crate) $repr);

        impl $name {
            $(
                $(#[$($variant_meta)*])*
                $vis const $variant: Self = Self($value);
            )*
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match *self {
                    $(Self::$variant => f.write_str(stringify!($variant)),)*
                    _ => f.write_str("INVALID"),
                }
            }
        }
    }
}

/// As [`raw_enum`], but the named constants form a bitmask rather than
/// mutually exclusive values.
macro_rules! raw_set {
    (
        $(#[doc = $doc:literal])*
        #[repr($repr:ty)]
        $vis:vis enum $name:ident {
            $(
                $(#[$($variant_meta:meta)*])*
                $variant:ident = $value:expr
            ),* $(,)?
        }
    ) => {
        $(#[doc = $doc])*
        #[derive(Default, Clone, Copy, PartialEq, Eq)]
        #[repr(transparent)]
        $vis struct $name(pub(crate) $repr);

        impl $name {
            $(
                $(#[$($variant_meta)*])*
                $vis const $variant: Self = Self($value);
            )*
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let mut f = f.debug_set();
                let mut this = *self;

                $(
                    if this & Self::$variant {
                        f.entry(&stringify!($variant));
                        this = this ^ Self::$variant;
                    }
                )*

                if this.0 != 0 {
                    f.entry(&format_args!("{:b}", this.0));
                }

                f.finish()
            }
        }

        impl ::std::ops::BitOr<$name> for $name {
            type Output = Self;

            #[inline]
            fn bitor(self, rhs: $name) -> Self::Output {
                Self(self.0 | rhs.0)
            }
        }

        impl ::std::ops::BitAnd<$name> for $name {
            type Output = bool;

            #[inline]
            fn bitand(self, rhs: $name) -> Self::Output {
                self.0 & rhs.0 != 0
            }
        }

        impl ::std::ops::BitXor<$name> for $name {
            type Output = Self;

            #[inline]
            fn bitxor(self, rhs: $name) -> Self::Output {
                Self(self.0 ^ rhs.0)
            }
        }
    }
}
