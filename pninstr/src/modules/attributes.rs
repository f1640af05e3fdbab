//! Function attributes.
//!
//! Hosts usually carry function attributes as free-form key/value strings.
//! The attributes the passes reason about are closed flags here, and
//! [`FunctionAttributes::from_key`] / [`FunctionAttributes::key`] translate at
//! the boundary. Keys without a flag stay on the function as plain strings.
use bitflags::bitflags;

bitflags! {
    /// Attributes attached to a function.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FunctionAttributes: u32 {
        /// The function does not save any callee-saved register on behalf of its
        /// callers (`"no_callee_saved_registers"`).
        const NO_CALLEE_SAVED_REGISTERS = 1 << 0;

        /// Source level request for the preserve-none convention (`"preserve_none"`).
        const PRESERVE_NONE = 1 << 1;

        /// The function must never be inlined (`"noinline"`).
        const NO_INLINE = 1 << 2;

        /// The function is rarely called (`"cold"`).
        const COLD = 1 << 3;

        /// Any attribute that implies the restricted calling convention.
        const RESTRICTED_CONVENTION = Self::NO_CALLEE_SAVED_REGISTERS.bits() | Self::PRESERVE_NONE.bits();
    }
}

const ATTRIBUTE_KEYS: [(FunctionAttributes, &str); 4] = [
    (
        FunctionAttributes::NO_CALLEE_SAVED_REGISTERS,
        "no_callee_saved_registers",
    ),
    (FunctionAttributes::PRESERVE_NONE, "preserve_none"),
    (FunctionAttributes::NO_INLINE, "noinline"),
    (FunctionAttributes::COLD, "cold"),
];

impl FunctionAttributes {
    /// Map a host attribute key onto its flag.
    pub fn from_key(key: &str) -> Option<Self> {
        ATTRIBUTE_KEYS
            .iter()
            .find(|(_, k)| *k == key)
            .map(|(flag, _)| *flag)
    }

    /// Host attribute key of a single flag. Returns `None` for composite values.
    pub fn key(self) -> Option<&'static str> {
        ATTRIBUTE_KEYS
            .iter()
            .find(|(flag, _)| *flag == self)
            .map(|(_, k)| *k)
    }

    /// Host attribute keys of every flag set in `self`.
    pub fn keys(self) -> impl Iterator<Item = &'static str> {
        ATTRIBUTE_KEYS
            .iter()
            .filter(move |(flag, _)| self.contains(*flag))
            .map(|(_, k)| *k)
    }

    /// Returns true if any flag implying the restricted convention is set.
    pub fn implies_restricted_convention(self) -> bool {
        self.intersects(Self::RESTRICTED_CONVENTION)
    }
}
