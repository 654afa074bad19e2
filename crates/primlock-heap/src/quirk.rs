bitflags::bitflags! {
    /// Simulated host defects, applied per object.
    ///
    /// Lockdown has to survive runtimes whose reflection layer is already
    /// subtly broken. Each flag makes one operation misbehave in a way
    /// real hosts have been observed to, so the hardening paths can be
    /// exercised deterministically.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Quirks: u32 {
        /// Strict delete reports `false` instead of raising.
        const DELETE_REFUSES = 1 << 0;
        /// Delete claims success but the property remains.
        const DELETE_BOUNCES = 1 << 1;
        /// Delete raises a host fault rather than a type error.
        const DELETE_THROWS = 1 << 2;
        /// `define_property` refuses every redefinition.
        const DEFINE_REFUSES = 1 << 3;
        /// Own-property enumeration fails outright.
        const ENUMERATION_FAILS = 1 << 4;
        /// Descriptor lookup fails outright.
        const DESCRIPTOR_LOOKUP_FAILS = 1 << 5;
        /// Delegate lookup fails outright.
        const PROTO_LOOKUP_FAILS = 1 << 6;
        /// `freeze` refuses to run.
        const FREEZE_REFUSES = 1 << 7;
        /// `prevent_extensions` refuses to run.
        const PREVENT_EXTENSIONS_REFUSES = 1 << 8;
    }
}
